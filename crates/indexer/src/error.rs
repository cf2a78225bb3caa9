use thiserror::Error;

/// Errors raised while dispatching hivemoji payloads.
///
/// `Envelope` marks a malformed payload the block scan logs and skips;
/// everything else aborts the enclosing block so it is retried.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("payload envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("decode v{version}: {source}")]
    Decode {
        version: i32,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported version {0}")]
    UnsupportedVersion(i64),

    #[error("unknown v1 op {0:?}")]
    UnknownV1Op(String),

    #[error("unsupported v2 op {0:?}")]
    UnsupportedV2Op(String),

    #[error("unknown chunk kind {0:?}")]
    UnknownKind(String),

    #[error("total must be > 0")]
    InvalidTotal,

    #[error("decode {what} data: {source}")]
    DecodeData {
        what: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error(transparent)]
    Store(#[from] storage::StoreError),

    #[error("block {number}: {source}")]
    Block {
        number: i64,
        #[source]
        source: Box<ProcessError>,
    },

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ProcessError>;
