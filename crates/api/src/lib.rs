//! Read-only HTTP projection over stored hivemoji assets.
//!
//! Mutations only ever arrive through the chain; this surface serves asset
//! metadata as JSON and raw image bytes for embedding.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use storage::{mime, Asset, Store, StoreError};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

/// Builds the read API router over a shared store.
pub fn router(store: Store) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/emojis", get(handle_list))
        .route("/api/emojis/{name}", get(handle_get))
        .route("/api/authors/{author}/emojis", get(handle_list_by_author))
        .route("/api/authors/{author}/emojis/{name}", get(handle_get_by_author))
        .route("/{author}/{name}", get(handle_get_image))
        .layer(cors)
        .with_state(store)
}

#[derive(Debug, Default, Deserialize)]
struct AssetQuery {
    #[serde(default)]
    with_data: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

fn wants_data(param: &Option<String>) -> bool {
    matches!(param.as_deref(), Some(value) if value == "1" || value.eq_ignore_ascii_case("true"))
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_list(State(store): State<Store>, Query(query): Query<AssetQuery>) -> Response {
    let include_data = wants_data(&query.with_data);
    match store.list_assets(include_data).await {
        Ok(assets) => list_response(assets, include_data),
        Err(e) => internal_error(e),
    }
}

async fn handle_list_by_author(
    State(store): State<Store>,
    Path(author): Path<String>,
    Query(query): Query<AssetQuery>,
) -> Response {
    if author.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "author is required").into_response();
    }

    let include_data = wants_data(&query.with_data);
    match store.list_assets_by_author(&author, include_data).await {
        Ok(assets) => list_response(assets, include_data),
        Err(e) => internal_error(e),
    }
}

async fn handle_get(
    State(store): State<Store>,
    Path(name): Path<String>,
    Query(query): Query<AssetQuery>,
) -> Response {
    let author = match query.author.as_deref() {
        Some(author) if !author.trim().is_empty() => author.to_string(),
        _ => {
            return (StatusCode::BAD_REQUEST, "author query param is required").into_response();
        }
    };

    get_asset_response(&store, &author, &name, wants_data(&query.with_data)).await
}

async fn handle_get_by_author(
    State(store): State<Store>,
    Path((author, name)): Path<(String, String)>,
    Query(query): Query<AssetQuery>,
) -> Response {
    if author.trim().is_empty() || name.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    get_asset_response(&store, &author, &name, wants_data(&query.with_data)).await
}

async fn get_asset_response(store: &Store, author: &str, name: &str, include_data: bool) -> Response {
    match store.get_asset(author, name).await {
        Ok(Some(asset)) => Json(EmojiResponse::from_asset(asset, include_data)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

/// Serves raw image bytes at `/@author/@name`.
async fn handle_get_image(
    State(store): State<Store>,
    Path((author, name)): Path<(String, String)>,
) -> Response {
    let (Some(author), Some(name)) = (trim_at_prefix(&author), trim_at_prefix(&name)) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match store.get_asset(&author, &name).await {
        Ok(Some(asset)) if !asset.data.is_empty() => {
            match mime::normalize_emoji_mime(&asset.mime) {
                Some(mime) => ([(header::CONTENT_TYPE, mime)], asset.data).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        Ok(_) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

fn list_response(assets: Vec<Asset>, include_data: bool) -> Response {
    let body: Vec<EmojiResponse> = assets
        .into_iter()
        .map(|asset| EmojiResponse::from_asset(asset, include_data))
        .collect();
    Json(body).into_response()
}

fn internal_error(err: StoreError) -> Response {
    error!("store error: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

fn trim_at_prefix(raw: &str) -> Option<String> {
    let value = raw.strip_prefix('@')?;
    if value.trim().is_empty() {
        return None;
    }
    Some(value.to_string())
}

#[derive(Debug, Serialize)]
pub struct EmojiResponse {
    pub name: String,
    pub version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    pub animated: bool,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mime: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fallback_data: String,
}

impl EmojiResponse {
    fn from_asset(asset: Asset, include_data: bool) -> Self {
        let data = if include_data {
            general_purpose::STANDARD.encode(&asset.data)
        } else {
            String::new()
        };
        let fallback_data = if include_data && !asset.fallback_data.is_empty() {
            general_purpose::STANDARD.encode(&asset.fallback_data)
        } else {
            String::new()
        };

        EmojiResponse {
            name: asset.name,
            version: asset.version,
            author: if asset.author.is_empty() {
                None
            } else {
                Some(asset.author)
            },
            upload_id: asset.upload_id,
            mime: asset.mime,
            width: asset.width,
            height: asset.height,
            animated: asset.animated,
            loop_count: asset.loop_count,
            checksum: asset.checksum,
            fallback_mime: asset.fallback_mime,
            data,
            fallback_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset() -> Asset {
        Asset {
            name: "pained_laugh".to_string(),
            version: 2,
            author: "mrtats".to_string(),
            upload_id: Some("U1".to_string()),
            mime: "image/webp".to_string(),
            width: Some(96),
            height: Some(96),
            animated: true,
            loop_count: Some(0),
            checksum: None,
            fallback_mime: Some("image/png".to_string()),
            data: b"main bytes".to_vec(),
            fallback_data: b"fallback bytes".to_vec(),
        }
    }

    #[test]
    fn metadata_response_omits_payloads_and_nulls() {
        let mut asset = sample_asset();
        asset.fallback_mime = None;
        asset.checksum = None;

        let value =
            serde_json::to_value(EmojiResponse::from_asset(asset, false)).unwrap();
        assert_eq!(value["name"], "pained_laugh");
        assert_eq!(value["author"], "mrtats");
        assert_eq!(value["loop"], 0);
        assert!(value.get("data").is_none());
        assert!(value.get("fallback_data").is_none());
        assert!(value.get("checksum").is_none());
        assert!(value.get("fallback_mime").is_none());
    }

    #[test]
    fn data_response_base64_encodes_payloads() {
        let value = serde_json::to_value(EmojiResponse::from_asset(sample_asset(), true)).unwrap();
        assert_eq!(
            value["data"],
            general_purpose::STANDARD.encode(b"main bytes")
        );
        assert_eq!(
            value["fallback_data"],
            general_purpose::STANDARD.encode(b"fallback bytes")
        );
    }

    #[test]
    fn empty_author_is_omitted() {
        let mut asset = sample_asset();
        asset.author = String::new();
        let value = serde_json::to_value(EmojiResponse::from_asset(asset, false)).unwrap();
        assert!(value.get("author").is_none());
    }

    #[test]
    fn at_prefix_is_required_for_image_routes() {
        assert_eq!(trim_at_prefix("@mrtats").as_deref(), Some("mrtats"));
        assert_eq!(trim_at_prefix("mrtats"), None);
        assert_eq!(trim_at_prefix("@"), None);
        assert_eq!(trim_at_prefix("@  "), None);
    }

    #[test]
    fn with_data_accepts_flag_spellings() {
        assert!(wants_data(&Some("1".to_string())));
        assert!(wants_data(&Some("true".to_string())));
        assert!(wants_data(&Some("TRUE".to_string())));
        assert!(!wants_data(&Some("0".to_string())));
        assert!(!wants_data(&Some("yes".to_string())));
        assert!(!wants_data(&None));
    }
}
