//! Error types for nb-core
//!
//! Every façade operation fails with one of these variants. Raw transport
//! failures are classified into the taxonomy by [`Error::from_transport`]
//! (or `From<TransportError>` when no operation is known), so callers can
//! match on the variant instead of provider error codes.

use thiserror::Error;

/// Result type alias for nb-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for nb-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials missing, expired or rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure (unreachable endpoint, timeout, dispatch failure)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Target resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-idempotent create hit an existing resource
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Structurally invalid predicate supplied by the caller
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Remote rate limiting
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Item violates the table key schema
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// Operation or argument not supported by this resource family
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Any other error reported by the remote service
    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Raw response did not have the expected shape
    #[error("Malformed response: {0}")]
    Response(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether a caller may retry the failed operation as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Throttled(_))
    }

    /// Classify a failure of the remote `operation`
    ///
    /// A rejected request is an invalid query only for operations that carry
    /// a caller predicate, and a resource in use means it already exists only
    /// when creating a table. Both are plain service errors elsewhere.
    pub fn from_transport(operation: &str, err: TransportError) -> Self {
        let code = err.code.as_str();
        if INVALID_QUERY_CODES.contains(&code) && QUERY_OPERATIONS.contains(&operation) {
            Error::InvalidQuery(err.to_string())
        } else if code == "ResourceInUseException" && operation == "CreateTable" {
            Error::AlreadyExists(err.to_string())
        } else {
            Error::from(err)
        }
    }
}

/// Failure reported by a [`Transport`](crate::Transport) implementation
///
/// `code` is the provider error code (`NoSuchBucket`,
/// `ResourceNotFoundException`, ...) or one of the transport-level codes
/// defined as associated constants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl TransportError {
    /// Request timed out before a response arrived
    pub const TIMEOUT: &'static str = "RequestTimeout";
    /// Request could not be dispatched (DNS, TCP, TLS)
    pub const DISPATCH_FAILURE: &'static str = "DispatchFailure";
    /// No credentials could be resolved
    pub const NO_CREDENTIALS: &'static str = "NoCredentials";
    /// Transport received an operation it does not implement
    pub const UNKNOWN_OPERATION: &'static str = "UnknownOperation";
    /// Request parameters could not be converted for the SDK
    pub const INVALID_PARAMETER: &'static str = "InvalidParameter";
    /// Waiter gave up before the resource reached the desired state
    pub const WAITER_TIMEOUT: &'static str = "WaiterTimeout";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

const AUTH_CODES: &[&str] = &[
    TransportError::NO_CREDENTIALS,
    "AccessDenied",
    "AccessDeniedException",
    "AuthorizationError",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidAccessKeyId",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

const CONNECTION_CODES: &[&str] = &[
    TransportError::TIMEOUT,
    TransportError::DISPATCH_FAILURE,
    TransportError::WAITER_TIMEOUT,
];

const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchVersion",
    "ResourceNotFoundException",
    "ConditionalCheckFailedException",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "BucketAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "ResourceAlreadyExistsException",
    "TableAlreadyExistsException",
];

const THROTTLED_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "TooManyRequestsException",
];

const INVALID_QUERY_CODES: &[&str] = &["ValidationException", "InvalidParameterException"];

/// Operations driven by a caller-supplied predicate or pattern
const QUERY_OPERATIONS: &[&str] = &["Query", "Scan", "FilterLogEvents"];

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let code = err.code.as_str();
        let detail = err.to_string();

        if AUTH_CODES.contains(&code) {
            Error::Auth(detail)
        } else if CONNECTION_CODES.contains(&code) {
            Error::Connection(detail)
        } else if NOT_FOUND_CODES.contains(&code) {
            Error::NotFound(detail)
        } else if ALREADY_EXISTS_CODES.contains(&code) {
            Error::AlreadyExists(detail)
        } else if THROTTLED_CODES.contains(&code) {
            Error::Throttled(detail)
        } else if err.retryable {
            Error::Connection(detail)
        } else {
            Error::Service {
                code: err.code,
                message: err.message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("bucket/key".to_string());
        assert_eq!(err.to_string(), "Not found: bucket/key");

        let err = Error::Service {
            code: "InternalError".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Service error (InternalError): boom");
    }

    #[test]
    fn test_transport_error_classification() {
        let classify = |code: &str| Error::from(TransportError::new(code, "msg"));

        assert!(matches!(classify("NoSuchBucket"), Error::NotFound(_)));
        assert!(matches!(
            classify("ResourceNotFoundException"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            classify("BucketAlreadyOwnedByYou"),
            Error::AlreadyExists(_)
        ));
        assert!(matches!(
            classify("ProvisionedThroughputExceededException"),
            Error::Throttled(_)
        ));
        assert!(matches!(classify("ExpiredToken"), Error::Auth(_)));
        assert!(matches!(
            classify(TransportError::TIMEOUT),
            Error::Connection(_)
        ));
        assert!(matches!(classify("InternalError"), Error::Service { .. }));
    }

    #[test]
    fn test_classification_depends_on_operation() {
        let classify = |operation: &str, code: &str| {
            Error::from_transport(operation, TransportError::new(code, "msg"))
        };

        assert!(matches!(
            classify("Query", "ValidationException"),
            Error::InvalidQuery(_)
        ));
        assert!(matches!(
            classify("Scan", "ValidationException"),
            Error::InvalidQuery(_)
        ));
        assert!(matches!(
            classify("FilterLogEvents", "InvalidParameterException"),
            Error::InvalidQuery(_)
        ));
        assert!(matches!(
            classify("BatchWriteItem", "ValidationException"),
            Error::Service { ref code, .. } if code == "ValidationException"
        ));
        assert!(matches!(
            classify("Subscribe", "InvalidParameterException"),
            Error::Service { .. }
        ));

        assert!(matches!(
            classify("CreateTable", "ResourceInUseException"),
            Error::AlreadyExists(_)
        ));
        assert!(matches!(
            classify("DeleteTable", "ResourceInUseException"),
            Error::Service { ref code, .. } if code == "ResourceInUseException"
        ));
        assert!(matches!(
            classify("UpdateTable", "ResourceInUseException"),
            Error::Service { .. }
        ));

        assert!(matches!(
            classify("GetItem", "ResourceNotFoundException"),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_unknown_retryable_code_is_connection() {
        let err = Error::from(TransportError::new("InternalError", "try again").retryable(true));
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::Throttled("slow down".into()).is_retryable());
        assert!(Error::Connection("timeout".into()).is_retryable());
        assert!(!Error::Auth("denied".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }
}
