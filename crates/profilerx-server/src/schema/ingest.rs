//! Ingestion request types.
//!
//! Node inputs and outputs arrive as plain JSON and are interpreted with
//! [`NodeIo::from_json`]: an object is keyed by name, an array is positional,
//! `{"shape": [...]}` or an array of integers is a tensor, any other array is
//! a sequence, and everything else is opaque.

use serde::Deserialize;
use serde_json::Value;

use profilerx_core::NodeIo;

use crate::error::ApiError;

/// `POST /profilerx/workflows/{id}/nodes/{node}/start`
#[derive(Debug, Clone, Deserialize)]
pub struct StartNodeRequest {
    pub node_type: String,
    #[serde(default)]
    pub inputs: Value,
}

/// `POST /profilerx/workflows/{id}/nodes/{node}/end`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndNodeRequest {
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub cache_hit: bool,
}

/// `POST /profilerx/workflows/{id}/nodes/{node}/error`
#[derive(Debug, Clone, Deserialize)]
pub struct RecordErrorRequest {
    pub message: String,
}

/// `POST /profilerx/workflows/{id}/abort`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub(crate) fn node_io(value: &Value) -> Result<NodeIo, ApiError> {
    Ok(NodeIo::from_json(value)?)
}
