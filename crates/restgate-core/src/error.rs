//! Error types for the core. Maps every failure mode named in §7 Error
//! Handling Design to an HTTP status and a stable machine-readable code.

use http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the core.
#[derive(Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Path Resolver / input errors -> Not Found (§7: grammar, comparator
    // mismatch, missing value, bad number, unknown field)
    // ------------------------------------------------------------------
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("missing value: {0}")]
    MissingValue(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    // ------------------------------------------------------------------
    // Permission errors
    // ------------------------------------------------------------------
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    // ------------------------------------------------------------------
    // State errors
    // ------------------------------------------------------------------
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    // ------------------------------------------------------------------
    // Content errors (upload)
    // ------------------------------------------------------------------
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    // ------------------------------------------------------------------
    // Resource errors
    // ------------------------------------------------------------------
    #[error("not found: {0}")]
    NotFound(String),

    // ------------------------------------------------------------------
    // Adapter errors -> the current transaction is canceled; 500 unless
    // the resource pre-set a finer status.
    // ------------------------------------------------------------------
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    // ------------------------------------------------------------------
    // Internal / config
    // ------------------------------------------------------------------
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPath(_)
            | Self::UnknownField(_)
            | Self::TypeMismatch(_)
            | Self::MissingValue(_)
            | Self::InvalidPredicate(_)
            | Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,

            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,

            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            Self::Adapter(e) => e.status_code(),

            Self::Internal(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "RG100",
            Self::UnknownField(_) => "RG101",
            Self::TypeMismatch(_) => "RG102",
            Self::MissingValue(_) => "RG103",
            Self::InvalidPredicate(_) => "RG104",
            Self::NotFound(_) => "RG105",

            Self::Forbidden(_) => "RG200",
            Self::NotImplemented(_) => "RG201",

            Self::Conflict(_) => "RG300",
            Self::BadRequest(_) => "RG301",

            Self::PayloadTooLarge(_) => "RG400",
            Self::UnsupportedMediaType(_) => "RG401",

            Self::Adapter(e) => e.code(),

            Self::Internal(_) => "RG900",
            Self::Config(_) => "RG901",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "hint": self.hint(),
        })
    }

    fn hint(&self) -> Option<String> {
        match self {
            Self::UnknownField(_) => Some("check the field name against the scheme".into()),
            Self::Forbidden(_) => Some("the current user lacks permission for this action".into()),
            Self::Adapter(e) => e.hint.clone(),
            _ => None,
        }
    }
}

/// Errors surfaced by a Storage Adapter implementation. The core never
/// inspects wire-level database error codes itself; an adapter
/// translates its backend's errors into this shape.
#[derive(Error, Debug)]
#[error("adapter error [{code}]: {message}")]
pub struct AdapterError {
    pub code: String,
    pub message: String,
    pub hint: Option<String>,
    pub transaction_broken: bool,
}

impl AdapterError {
    pub fn status_code(&self) -> StatusCode {
        if self.transaction_broken {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            match self.code.as_str() {
                "conflict" => StatusCode::CONFLICT,
                "forbidden" => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self.code.as_str() {
            "conflict" => "RG501",
            "forbidden" => "RG502",
            _ => "RG500",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_not_found() {
        assert_eq!(Error::UnknownField("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::InvalidPath("x".into()).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(Error::Forbidden("no".into()).status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn error_to_json_carries_code_and_message() {
        let err = Error::UnknownField("ghost".into());
        let json = err.to_json();
        assert_eq!(json["code"], "RG101");
        assert!(json["message"].as_str().unwrap().contains("ghost"));
    }

    #[test]
    fn adapter_conflict_maps_to_409() {
        let err = AdapterError {
            code: "conflict".into(),
            message: "duplicate key".into(),
            hint: None,
            transaction_broken: false,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
