use serde::Serialize;
use serde_json::Value;

/// HTTP result codes used across the framework.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const URI_TOO_LONG: u16 = 414;
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    pub const UNPROCESSABLE_ENTITY: u16 = 422;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
}

/// Stable taxonomy of failure kinds raised by the framework.
///
/// Every error that crosses a framework boundary carries exactly one kind;
/// the kind determines the HTTP status code reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or illegal configuration detected at boot.
    ConfigInvalid,
    /// DI lookup miss for a required binding.
    NotBound,
    /// Resolution re-entered a key that is already being resolved.
    CyclicBinding,
    /// Unknown column, unknown operator, invalid sort direction, invalid
    /// JSON path segment, or unknown relation in a filter.
    QueryInvalid,
    /// No authentication strategy accepted the request.
    Unauthenticated,
    /// Authenticated but lacking a required capability.
    Forbidden,
    /// A lookup produced no row where one was required.
    NotFound,
    /// Constraint violation reported by the data source.
    Conflict,
    /// A write was attempted on a non-open socket.
    TransportClosed,
    /// The HF logger reader detected that writers advanced past it.
    Overflow,
    /// Anything that does not fit the taxonomy above.
    Internal,
}

impl ErrorKind {
    /// One-to-one mapping from kind to HTTP status code.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::QueryInvalid => status::BAD_REQUEST,
            ErrorKind::Unauthenticated => status::UNAUTHORIZED,
            ErrorKind::Forbidden => status::FORBIDDEN,
            ErrorKind::NotFound => status::NOT_FOUND,
            ErrorKind::Conflict => status::CONFLICT,
            ErrorKind::TransportClosed => status::GONE,
            ErrorKind::ConfigInvalid
            | ErrorKind::NotBound
            | ErrorKind::CyclicBinding
            | ErrorKind::Overflow
            | ErrorKind::Internal => status::INTERNAL_SERVER_ERROR,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::NotBound => "not-bound",
            ErrorKind::CyclicBinding => "cyclic-binding",
            ErrorKind::QueryInvalid => "query-invalid",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransportClosed => "transport-closed",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Framework error: a kind, a human-readable message, and optional
/// structured details that survive serialization to the wire envelope.
#[derive(Debug, Clone)]
pub struct IgnisError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl IgnisError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details (e.g. the list of strategies tried).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn not_bound(key: &str) -> Self {
        Self::new(ErrorKind::NotBound, format!("No binding for key '{key}'"))
    }

    pub fn cyclic_binding(trail: &[String]) -> Self {
        Self::new(
            ErrorKind::CyclicBinding,
            format!("Circular binding resolution: {}", trail.join(" -> ")),
        )
    }

    pub fn query_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueryInvalid, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn transport_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportClosed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// The user-visible wire shape `{statusCode, message, details?}`.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status_code: self.status_code(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl std::fmt::Display for IgnisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for IgnisError {}

/// Serialized error shape sent over HTTP and realtime boundaries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_stable_status_codes() {
        assert_eq!(ErrorKind::QueryInvalid.status_code(), 400);
        assert_eq!(ErrorKind::Unauthenticated.status_code(), 401);
        assert_eq!(ErrorKind::Forbidden.status_code(), 403);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::Conflict.status_code(), 409);
        assert_eq!(ErrorKind::ConfigInvalid.status_code(), 500);
        assert_eq!(ErrorKind::CyclicBinding.status_code(), 500);
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let err = IgnisError::unauthenticated("No strategy accepted the request")
            .with_details(serde_json::json!({"strategies": ["jwt", "basic"]}));
        let json = serde_json::to_value(err.to_envelope()).unwrap();
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["details"]["strategies"][0], "jwt");
    }

    #[test]
    fn display_includes_kind() {
        let err = IgnisError::not_bound("controllers.Missing");
        assert!(err.to_string().contains("not-bound"));
        assert!(err.to_string().contains("controllers.Missing"));
    }
}
