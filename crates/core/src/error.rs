// Error taxonomy shared by providers, the market layer and the dispatcher

use serde::{Deserialize, Serialize};

/// Machine-readable error kind carried in every failed envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownTool,
    InvalidArgument,
    RateLimited,
    UpstreamUnavailable,
    NotFound,
    InvalidResponse,
    PartialBatchFailure,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidResponse => "InvalidResponse",
            ErrorKind::PartialBatchFailure => "PartialBatchFailure",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// `{kind, message}` pair as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Failure of a single upstream call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error surfaced by a tool invocation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("batch failed: {0}")]
    PartialBatchFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Provider(e) => e.kind(),
            Self::PartialBatchFailure(_) => ErrorKind::PartialBatchFailure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_variant_name() {
        let body = ToolError::UnknownTool("nope".to_string()).to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "UnknownTool");
        assert_eq!(json["message"], "unknown tool: nope");
    }

    #[test]
    fn test_provider_kind_passes_through() {
        let err: ToolError = ProviderError::RateLimited("slow down".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.to_string(), "rate limited by upstream: slow down");
    }
}
