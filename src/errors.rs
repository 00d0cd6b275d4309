// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the background pipeline
//!
//! Only [`PipelineError::BackendsUnavailable`] is meant to reach the end user.
//! Everything else is either recovered locally (backend fallback, missing
//! transient resources) or is a silent abort of a superseded reconcile.

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main pipeline error type
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// A segmentation backend failed to load
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The live track ended while a reconcile was in flight
    #[error("Track is no longer live")]
    StreamInvalid,

    /// Creating or revoking a transient resource failed
    #[error("Transient resource error: {0}")]
    TransientResource(String),

    /// A newer reconcile took over
    #[error("Superseded by a newer request")]
    Superseded,

    /// Neither the enhanced nor the default backend could be loaded
    #[error("No segmentation backend available: {0}")]
    BackendsUnavailable(String),

    /// Per-frame inference failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Frame data does not match its declared geometry
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::TransientResource(msg.into())
    }

    /// Whether this error is a silent abort rather than a failure
    ///
    /// Superseded reconciles and tracks that ended mid-flight are expected
    /// during normal operation and are never surfaced.
    pub fn is_silent_abort(&self) -> bool {
        matches!(self, Self::Superseded | Self::StreamInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_aborts_are_classified() {
        assert!(PipelineError::Superseded.is_silent_abort());
        assert!(PipelineError::StreamInvalid.is_silent_abort());
        assert!(!PipelineError::BackendsUnavailable("x".into()).is_silent_abort());
        assert!(!PipelineError::initialization("x").is_silent_abort());
    }

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            PipelineError::initialization("x")
                .to_string()
                .contains("Initialization failed:")
        );
        assert!(
            PipelineError::resource("x")
                .to_string()
                .contains("Transient resource error:")
        );
    }
}
