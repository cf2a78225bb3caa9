//! Wire types for the portion of a Hive block the indexer cares about.

use anyhow::{anyhow, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::value::RawValue;

/// A chain block, reduced to its transactions.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub number: i64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// An op tuple of `[name, payload]`.
///
/// The payload stays an opaque serialized blob until a handler that knows
/// its schema re-parses it.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: String,
    pub value: Box<RawValue>,
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Operation, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut parts: Vec<Box<RawValue>> = Vec::deserialize(deserializer)?;
        if parts.len() != 2 {
            return Err(de::Error::custom(format!(
                "unexpected op format: {} elements",
                parts.len()
            )));
        }
        let value = parts
            .pop()
            .ok_or_else(|| de::Error::custom("unexpected op format"))?;
        let kind_raw = parts
            .pop()
            .ok_or_else(|| de::Error::custom("unexpected op format"))?;
        let kind: String = serde_json::from_str(kind_raw.get()).map_err(de::Error::custom)?;
        Ok(Operation { kind, value })
    }
}

/// The custom_json operation payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomJsonOp {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub json: Option<Box<RawValue>>,
    #[serde(default)]
    pub required_auths: Vec<String>,
    #[serde(default)]
    pub required_posting_auths: Vec<String>,
}

impl CustomJsonOp {
    /// Flattens the optional nested JSON string into raw payload bytes.
    ///
    /// Chain-native escaping usually wraps the payload in a string whose
    /// contents are themselves a JSON document; inline objects are passed
    /// through unchanged.
    pub fn extract_payload(&self) -> Result<Vec<u8>> {
        let raw = self
            .json
            .as_ref()
            .filter(|value| !value.get().trim().is_empty())
            .ok_or_else(|| anyhow!("missing json field"))?;

        if let Ok(inner) = serde_json::from_str::<String>(raw.get()) {
            return Ok(inner.into_bytes());
        }

        Ok(raw.get().as_bytes().to_vec())
    }

    /// Resolves the signing author: the first posting auth when non-empty,
    /// else the first active auth, else empty.
    pub fn author(&self) -> String {
        match self.required_posting_auths.first() {
            Some(first) if !first.is_empty() => first.clone(),
            _ => self.required_auths.first().cloned().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_decodes_tuple() {
        let op: Operation =
            serde_json::from_str(r#"["custom_json", {"id": "hivemoji"}]"#).unwrap();
        assert_eq!(op.kind, "custom_json");
        assert!(op.value.get().contains("hivemoji"));
    }

    #[test]
    fn operation_rejects_wrong_arity() {
        let result = serde_json::from_str::<Operation>(r#"["custom_json"]"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<Operation>(r#"["a", {}, {}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn extract_payload_unwraps_string_form() {
        let op: CustomJsonOp =
            serde_json::from_str(r#"{"id":"hivemoji","json":"{\"version\":1}"}"#).unwrap();
        let payload = op.extract_payload().unwrap();
        assert_eq!(payload, br#"{"version":1}"#);
    }

    #[test]
    fn extract_payload_passes_inline_object_through() {
        let op: CustomJsonOp =
            serde_json::from_str(r#"{"id":"hivemoji","json":{"version":2,"op":"chunk"}}"#).unwrap();
        let payload = op.extract_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["version"], 2);
    }

    #[test]
    fn extract_payload_requires_json_field() {
        let op: CustomJsonOp = serde_json::from_str(r#"{"id":"hivemoji"}"#).unwrap();
        assert!(op.extract_payload().is_err());
    }

    #[test]
    fn author_prefers_posting_auths() {
        let op: CustomJsonOp = serde_json::from_str(
            r#"{"id":"x","json":"{}","required_auths":["owner"],"required_posting_auths":["poster"]}"#,
        )
        .unwrap();
        assert_eq!(op.author(), "poster");
    }

    #[test]
    fn author_falls_back_to_active_auths() {
        let op: CustomJsonOp = serde_json::from_str(
            r#"{"id":"x","json":"{}","required_auths":["owner"],"required_posting_auths":[]}"#,
        )
        .unwrap();
        assert_eq!(op.author(), "owner");

        let op: CustomJsonOp = serde_json::from_str(r#"{"id":"x","json":"{}"}"#).unwrap();
        assert_eq!(op.author(), "");
    }

    #[test]
    fn transaction_decodes_operations() {
        let tx: Transaction = serde_json::from_str(
            r#"{"operations":[["vote",{"voter":"alice"}],["custom_json",{"id":"hivemoji"}]]}"#,
        )
        .unwrap();
        assert_eq!(tx.operations.len(), 2);
        assert_eq!(tx.operations[1].kind, "custom_json");
    }
}
