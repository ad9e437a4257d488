//! Storage implementations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

const MAX_PAGE_SIZE: usize = 500;

/// Jobs are listed newest first; the cursor is the last `(first_seen_at, id)`.
pub(crate) fn encode_page_token(first_seen_at: DateTime<Utc>, id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}|{}", first_seen_at.timestamp_micros(), id))
}

pub(crate) fn decode_page_token(token: &str) -> StoreResult<(DateTime<Utc>, Uuid)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StoreError::InvalidPageToken)?;
    let raw = String::from_utf8(bytes).map_err(|_| StoreError::InvalidPageToken)?;
    let (micros, id) = raw.split_once('|').ok_or(StoreError::InvalidPageToken)?;
    let micros: i64 = micros.parse().map_err(|_| StoreError::InvalidPageToken)?;
    let first_seen_at =
        DateTime::<Utc>::from_timestamp_micros(micros).ok_or(StoreError::InvalidPageToken)?;
    let id = Uuid::parse_str(id).map_err(|_| StoreError::InvalidPageToken)?;
    Ok((first_seen_at, id))
}

pub(crate) fn clamp_page_size(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}
