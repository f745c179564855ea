//! Error types for the store, device, and configuration boundaries.

/// Errors surfaced by a [`crate::store::Store`] implementation.
///
/// `Transient` covers connect/timeout/deadlock conditions the caller should
/// retry on its next natural cycle; `Permanent` covers schema mismatches and
/// auth failures that won't clear up by themselves.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("permanent store error: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors surfaced while streaming events from a terminal.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device transport error: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("malformed punch: {0}")]
    Malformed(String),
}
