use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;

use crate::store::StoreError;

/// A structured application error that can be serialized and surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;
pub type Result<T> = AppResult<T>;

/// Coarse classification of an [`AppError`] code, used by callers to pick
/// what to tell the user (re-authenticate, retry, fix input, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    Unavailable,
    NotFound,
    /// The target record has not been confirmed by the store yet.
    Pending,
    NoHousehold,
    Validation,
    Expired,
    Internal,
}

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    pub const PERMISSION_DENIED_CODE: &'static str = "STORE/PERMISSION_DENIED";
    pub const UNAVAILABLE_CODE: &'static str = "STORE/UNAVAILABLE";
    pub const STORE_NOT_FOUND_CODE: &'static str = "STORE/NOT_FOUND";
    pub const STORE_INVALID_CODE: &'static str = "STORE/INVALID";
    pub const STORE_BACKEND_CODE: &'static str = "STORE/BACKEND";
    pub const RECORD_NOT_FOUND_CODE: &'static str = "RECORD/NOT_FOUND";
    pub const RECORD_PENDING_CODE: &'static str = "RECORD/PENDING";
    pub const HOUSEHOLD_REQUIRED_CODE: &'static str = "HOUSEHOLD/REQUIRED";
    pub const SIGNED_OUT_CODE: &'static str = "SESSION/SIGNED_OUT";
    pub const UNDO_EXPIRED_CODE: &'static str = "UNDO/EXPIRED";
    pub const UNDO_EMPTY_CODE: &'static str = "UNDO/EMPTY";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    /// Shorthand for a `VALIDATION/*` error.
    pub fn validation(code: &str, message: impl Into<String>) -> Self {
        AppError::new(format!("VALIDATION/{code}"), message)
    }

    /// The rejection every mutation returns when no household is resolved.
    pub fn household_required() -> Self {
        AppError::new(
            Self::HOUSEHOLD_REQUIRED_CODE,
            "No household is active. Sign in before making changes.",
        )
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata associated with the error.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Classifies the error code.
    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        match code {
            Self::PERMISSION_DENIED_CODE | Self::SIGNED_OUT_CODE => ErrorKind::PermissionDenied,
            Self::UNAVAILABLE_CODE => ErrorKind::Unavailable,
            Self::STORE_NOT_FOUND_CODE | Self::RECORD_NOT_FOUND_CODE => ErrorKind::NotFound,
            Self::RECORD_PENDING_CODE => ErrorKind::Pending,
            Self::HOUSEHOLD_REQUIRED_CODE => ErrorKind::NoHousehold,
            Self::UNDO_EXPIRED_CODE | Self::UNDO_EMPTY_CODE => ErrorKind::Expired,
            _ if code.starts_with("VALIDATION/")
                || code.starts_with("CATEGORY/")
                || code.starts_with("CONFIG/") =>
            {
                ErrorKind::Validation
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Extends the context map with additional key/value pairs.
    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Wraps a failed remote write: the outer error keeps the store's code so
    /// [`AppError::kind`] still classifies it, carries a message fit for the
    /// user, and nests the raw store error as its cause.
    pub fn mutation_failed(err: StoreError) -> Self {
        let inner = AppError::from(err);
        let message = match inner.kind() {
            ErrorKind::PermissionDenied => "You are not allowed to change this. Sign in again.",
            ErrorKind::Unavailable => {
                "Changes could not be saved. Check your connection and try again."
            }
            ErrorKind::NotFound => "This item no longer exists.",
            _ => "Changes could not be saved.",
        };
        AppError::new(inner.code.clone(), message).with_cause(inner)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        let message = error.to_string();
        match error {
            StoreError::PermissionDenied(_) => {
                AppError::new(AppError::PERMISSION_DENIED_CODE, message)
            }
            StoreError::Unavailable(_) => AppError::new(AppError::UNAVAILABLE_CODE, message),
            StoreError::NotFound { collection, id } => {
                AppError::new(AppError::STORE_NOT_FOUND_CODE, message)
                    .with_context("collection", collection.as_str())
                    .with_context("id", id)
            }
            StoreError::Invalid(_) => AppError::new(AppError::STORE_INVALID_CODE, message),
            StoreError::Backend(_) => AppError::new(AppError::STORE_BACKEND_CODE, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Collection;
    use anyhow::Context;

    #[test]
    fn builds_error_with_context_and_cause() {
        let error = AppError::new("TEST/CODE", "Something went wrong")
            .with_context("collection", "inventory")
            .with_context("id", "1234")
            .with_cause(AppError::from("inner failure"));

        assert_eq!(error.code(), "TEST/CODE");
        assert_eq!(error.message(), "Something went wrong");
        assert_eq!(
            error.context().get("collection"),
            Some(&"inventory".to_string())
        );
        assert_eq!(error.context().get("id"), Some(&"1234".to_string()));
        let cause = error.cause().expect("cause present");
        assert_eq!(cause.message(), "inner failure");
        assert_eq!(cause.code(), AppError::GENERIC_CODE);
    }

    #[test]
    fn converts_anyhow_error_chain_into_nested_causes() {
        let err = (|| -> anyhow::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
                .context("failed to open store")
        })()
        .unwrap_err();

        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), AppError::UNKNOWN_CODE);
        assert_eq!(app_error.message(), "failed to open store");

        let cause = app_error.cause().expect("io cause present");
        assert!(cause.message().contains("disk full"));
    }

    #[test]
    fn mutation_failure_keeps_kind_and_original_cause() {
        let err = AppError::mutation_failed(StoreError::Unavailable("offline".into()));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.message().contains("connection"));
        let cause = err.cause().expect("store cause");
        assert_eq!(cause.code(), AppError::UNAVAILABLE_CODE);
        assert!(cause.message().contains("offline"));

        let denied = AppError::mutation_failed(StoreError::PermissionDenied("rules".into()));
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn store_not_found_carries_collection_and_id() {
        let err = AppError::from(StoreError::NotFound {
            collection: Collection::Inventory,
            id: "abc".into(),
        });
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.context().get("collection"), Some(&"inventory".to_string()));
        assert_eq!(err.context().get("id"), Some(&"abc".to_string()));
    }

    #[test]
    fn classifies_validation_and_household_codes() {
        assert_eq!(
            AppError::validation("NAME_REQUIRED", "Name is required").kind(),
            ErrorKind::Validation
        );
        assert_eq!(AppError::household_required().kind(), ErrorKind::NoHousehold);
        assert_eq!(
            AppError::new(AppError::RECORD_PENDING_CODE, "saving").kind(),
            ErrorKind::Pending
        );
        assert_eq!(AppError::from("boom").kind(), ErrorKind::Internal);
    }

    #[test]
    fn serde_json_errors_capture_position() {
        let err: SerdeJsonError =
            serde_json::from_str::<serde_json::Value>("{\"foo\": }").expect_err("invalid json");
        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), "JSON/SYNTAX");
        assert!(app_error.context().contains_key("line"));
        assert!(app_error.context().contains_key("column"));
    }

    #[test]
    fn json_shape_is_flat_struct() {
        let error = AppError::new("VALIDATION/NAME", "nope").with_context("field", "name");
        let json = serde_json::to_string(&error).expect("serialize app error");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse serialized error");
        assert_eq!(
            value.get("code").and_then(|v| v.as_str()),
            Some("VALIDATION/NAME")
        );
        assert_eq!(value.get("message").and_then(|v| v.as_str()), Some("nope"));
        assert_eq!(
            value
                .get("context")
                .and_then(|c| c.get("field"))
                .and_then(|v| v.as_str()),
            Some("name")
        );
        assert!(value.get("cause").is_none());
    }
}
