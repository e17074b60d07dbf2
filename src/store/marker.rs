//! Keyset pagination marker encode/decode.
//!
//! A marker is the tuple of the last returned row's sort-key values plus
//! its id, serialized to JSON and base64-encoded so it is opaque and
//! URL-safe to clients, same as `next` cursors in typical REST catalogs.
//! The query engine's own `next` link hands back a bare artifact id
//! instead (matching what the original service accepts as `marker=`),
//! but `decode` still recognizes this encoded shape for callers that
//! kept an older-style opaque cursor around.

use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::value::ScalarValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marker {
    pub sort_values: Vec<Option<ScalarValue>>,
    pub id: Uuid,
}

impl Marker {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("marker always serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> ApiResult<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| ApiError::bad_value("invalid marker"))?;
        serde_json::from_slice(&bytes).map_err(|_| ApiError::bad_value("invalid marker"))
    }
}
