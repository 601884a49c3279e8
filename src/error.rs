/// Unified error type for the ingestion and retrieval core.
///
/// Every variant carries a stable `kind` tag (see [`CoreError::kind`]) so
/// callers and log sinks can classify failures without matching on the enum.
/// Transient embed/store failures are retried inside the pipeline workers;
/// permanent ones surface through the ingest report or the caller.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("config error: {message}")]
    Config { message: String },

    #[error("reader error: {message}")]
    Reader { message: String },

    #[error("split error ({stage}): {message}")]
    Split { stage: SplitStage, message: String },

    #[error("embed error: {message}")]
    Embed { message: String, transient: bool },

    #[error("store error: {message}")]
    Store { message: String, transient: bool },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("operation cancelled")]
    Cancelled,
}

/// Which side of the splitter contract failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStage {
    /// The input stream returned a non-EOF fault.
    Reader,
    /// The `emit` callback rejected a chunk; its error is propagated unchanged.
    Emit,
}

impl std::fmt::Display for SplitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitStage::Reader => write!(f, "reader"),
            SplitStage::Emit => write!(f, "emit"),
        }
    }
}

impl CoreError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn reader<S: Into<String>>(message: S) -> Self {
        Self::Reader {
            message: message.into(),
        }
    }

    pub fn split<S: Into<String>>(stage: SplitStage, message: S) -> Self {
        Self::Split {
            stage,
            message: message.into(),
        }
    }

    pub fn embed_transient<S: Into<String>>(message: S) -> Self {
        Self::Embed {
            message: message.into(),
            transient: true,
        }
    }

    pub fn embed_permanent<S: Into<String>>(message: S) -> Self {
        Self::Embed {
            message: message.into(),
            transient: false,
        }
    }

    pub fn store_transient<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
            transient: true,
        }
    }

    pub fn store_permanent<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
            transient: false,
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Stable machine-readable tag for this error class.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Config { .. } => "config",
            CoreError::Reader { .. } => "reader",
            CoreError::Split { .. } => "split",
            CoreError::Embed { .. } => "embed",
            CoreError::Store { .. } => "store",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Cancelled => "cancelled",
        }
    }

    /// Whether a retry inside the worker is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Embed {
                transient: true,
                ..
            } | CoreError::Store {
                transient: true,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(CoreError::config("x").kind(), "config");
        assert_eq!(CoreError::embed_transient("x").kind(), "embed");
        assert_eq!(CoreError::store_permanent("x").kind(), "store");
        assert_eq!(CoreError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn transient_classification() {
        assert!(CoreError::embed_transient("timeout").is_transient());
        assert!(!CoreError::embed_permanent("dimension mismatch").is_transient());
        assert!(CoreError::store_transient("conn reset").is_transient());
        assert!(!CoreError::not_found("chunk 9").is_transient());
    }
}
