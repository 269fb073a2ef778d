//! Error taxonomy for the anchor core.
//!
//! Every failure surfaced by the crate is an [`AnchorError`] carrying a
//! machine-readable [`ErrorCode`], the [`ErrorLayer`] that produced it, a
//! human-readable message, an optional underlying cause, and a free-form
//! context map. HTTP layers map codes to protocol responses via
//! [`AnchorError::is_code`].

use std::collections::HashMap;
use std::fmt;

/// Machine-readable error identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Core layer
    NetworkError,
    AccountNotFound,
    DiscoveryFetchFailed,
    DiscoveryInvalid,
    DiscoveryKeyMismatch,

    // Anchor layer
    ConfigInvalid,
    ChallengeBuildFailed,
    ChallengeVerifyFailed,
    TokenIssueFailed,
    TokenVerifyFailed,
    TokenExpired,
    StoreError,
    InvalidAsset,
    TransitionInvalid,
    InteractiveTokenInvalid,
    PaymentMismatch,

    // Observer layer
    StreamError,
    StreamDisconnected,
    CursorSaveFailed,
    HandlerPanic,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::DiscoveryFetchFailed => "DISCOVERY_FETCH_FAILED",
            Self::DiscoveryInvalid => "DISCOVERY_INVALID",
            Self::DiscoveryKeyMismatch => "DISCOVERY_KEY_MISMATCH",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ChallengeBuildFailed => "CHALLENGE_BUILD_FAILED",
            Self::ChallengeVerifyFailed => "CHALLENGE_VERIFY_FAILED",
            Self::TokenIssueFailed => "TOKEN_ISSUE_FAILED",
            Self::TokenVerifyFailed => "TOKEN_VERIFY_FAILED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::StoreError => "STORE_ERROR",
            Self::InvalidAsset => "INVALID_ASSET",
            Self::TransitionInvalid => "TRANSITION_INVALID",
            Self::InteractiveTokenInvalid => "INTERACTIVE_TOKEN_INVALID",
            Self::PaymentMismatch => "PAYMENT_MISMATCH",
            Self::StreamError => "STREAM_ERROR",
            Self::StreamDisconnected => "STREAM_DISCONNECTED",
            Self::CursorSaveFailed => "CURSOR_SAVE_FAILED",
            Self::HandlerPanic => "HANDLER_PANIC",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which component layer produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    Core,
    Anchor,
    Observer,
}

impl ErrorLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Anchor => "anchor",
            Self::Observer => "observer",
        }
    }
}

/// Structured error for all anchor-core failures.
#[derive(Debug)]
pub struct AnchorError {
    pub code: ErrorCode,
    pub layer: ErrorLayer,
    pub message: String,
    pub cause: Option<anyhow::Error>,
    pub context: HashMap<String, String>,
}

impl AnchorError {
    pub fn new(layer: ErrorLayer, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            layer,
            message: message.into(),
            cause: None,
            context: HashMap::new(),
        }
    }

    /// Core-layer error (network, account lookup, discovery).
    pub fn core(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorLayer::Core, code, message)
    }

    /// Anchor-layer error (auth, transfers, tokens, stores).
    pub fn anchor(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorLayer::Anchor, code, message)
    }

    /// Observer-layer error (streaming, cursor persistence).
    pub fn observer(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorLayer::Observer, code, message)
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach a context key/value pair (asset code, account, transfer id, ...).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Code-based equality, the hook for mapping errors to protocol responses.
    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.layer.as_str(), self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for AnchorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(AsRef::as_ref)
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_layer_and_code() {
        let err = AnchorError::anchor(ErrorCode::TransitionInvalid, "completed -> pending_stellar");
        assert_eq!(
            err.to_string(),
            "[anchor] TRANSITION_INVALID: completed -> pending_stellar"
        );
    }

    #[test]
    fn test_display_includes_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = AnchorError::observer(ErrorCode::StreamError, "stream closed").with_cause(io);
        assert!(err.to_string().contains("caused by: boom"));
    }

    #[test]
    fn test_is_code() {
        let err = AnchorError::anchor(ErrorCode::StoreError, "save failed");
        assert!(err.is_code(ErrorCode::StoreError));
        assert!(!err.is_code(ErrorCode::TransitionInvalid));
    }

    #[test]
    fn test_context_map() {
        let err = AnchorError::core(ErrorCode::AccountNotFound, "no such account")
            .with_context("account", "GABC");
        assert_eq!(err.context.get("account").map(String::as_str), Some("GABC"));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = AnchorError::anchor(ErrorCode::StoreError, "save failed").with_cause(io);
        assert!(err.source().is_some());
        let bare = AnchorError::anchor(ErrorCode::StoreError, "save failed");
        assert!(bare.source().is_none());
    }
}
