use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("author is required")]
    MissingAuthor,

    #[error("no chunks to assemble for {upload_id}/{kind}")]
    EmptySet { upload_id: String, kind: String },

    #[error("chunk count mismatch for {upload_id}/{kind}: have {have} want {want}")]
    CountMismatch {
        upload_id: String,
        kind: String,
        have: usize,
        want: usize,
    },

    #[error("chunk sequence gap for {upload_id}/{kind}: expected seq {expected}, found {found}")]
    SeqGap {
        upload_id: String,
        kind: String,
        expected: i32,
        found: i32,
    },

    #[error("checksum mismatch for upload {upload_id} kind {kind}")]
    ChecksumMismatch { upload_id: String, kind: String },

    #[error("invalid sync cursor value {0:?}")]
    BadCursor(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
