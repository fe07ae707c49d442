//! Archive management response types.

use serde::Serialize;

/// Response from archiving the current history.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveCreatedResponse {
    pub success: bool,
    /// Name of the new archive file.
    pub archive: String,
}

/// Bare success acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        SuccessResponse { success: true }
    }
}
