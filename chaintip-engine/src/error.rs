use thiserror::Error;

// Generic transport-level error produced by node clients. Kept boxed so the
// engine does not depend on any particular RPC library's error type.
pub type NodeError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced synchronously to the business layer.
///
/// Dispatch-path failures do not appear here: a batch that fails during
/// dispatch is reported through the event bus as a single `Error` event and
/// the batch is dropped.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed address or non-positive amount, rejected before enqueue.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Coin table problem, or a coin/platform the registry does not know.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Network or node failure on the query path. Never retried internally.
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// A batch failed while being built or submitted.
    #[error("submission failed: {0}")]
    Submission(String),

    /// Operation not available on this engine instance (e.g. staking without
    /// a registered account adapter).
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl EngineError {
    pub fn rpc(e: NodeError) -> Self {
        EngineError::Rpc(e.to_string())
    }

    pub fn submission(e: NodeError) -> Self {
        EngineError::Submission(e.to_string())
    }
}

/// Coin-table errors. Any of these at load time is fatal for the process:
/// nothing downstream can run safely without a valid registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("coin table parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid entry for {coin}: {reason}")]
    Invalid { coin: String, reason: String },

    #[error("unknown coin: {0}")]
    UnknownCoin(String),

    #[error("no adapter registered for platform: {0}")]
    UnknownPlatform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let e = EngineError::Validation("bad address".into());
        assert_eq!(e.to_string(), "validation failed: bad address");

        let e = EngineError::Registry(RegistryError::UnknownCoin("XYZ".into()));
        assert!(e.to_string().contains("unknown coin: XYZ"));
    }

    #[test]
    fn node_error_conversion() {
        let boxed: NodeError = "connection refused".into();
        let e = EngineError::rpc(boxed);
        assert!(matches!(e, EngineError::Rpc(ref s) if s == "connection refused"));
    }
}
