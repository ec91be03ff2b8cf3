//! SDK failures as transport errors
//!
//! Every SDK call funnels its error through [`sdk_error`], which keeps the
//! provider error code so nb-core can classify it.

use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types::error::operation::BuildError;
use nb_core::TransportError;

/// Fallback code for a service error that carries none, from the HTTP status
fn status_code(status: u16) -> &'static str {
    match status {
        400 => "BadRequest",
        401 | 403 => "AccessDenied",
        404 => "NotFound",
        409 => "Conflict",
        429 => "Throttling",
        500..=599 => "ServiceUnavailable",
        _ => "Unknown",
    }
}

/// Format an SDK error into a detailed message
fn format_sdk_error<E: std::fmt::Display>(error: &SdkError<E, HttpResponse>) -> String {
    match error {
        SdkError::ServiceError(service_err) => {
            let mut msg = format!("Service error: {}", service_err.err());
            if let Some(code) = service_err.raw().headers().get("x-amz-error-code") {
                msg.push_str(&format!(" (code: {code})"));
            }
            msg
        }
        SdkError::ConstructionFailure(err) => format!("Request construction failed: {err:?}"),
        SdkError::TimeoutError(_) => "Request timeout".to_string(),
        SdkError::DispatchFailure(err) => format!("Network dispatch error: {err:?}"),
        SdkError::ResponseError(err) => format!("Response error: {err:?}"),
        _ => error.to_string(),
    }
}

/// Whether an unmodeled failure was caused by missing credentials
fn is_credentials_failure(detail: &str) -> bool {
    let detail = detail.to_lowercase();
    detail.contains("credentials") && !detail.contains("invalid")
}

pub(crate) fn sdk_error<E>(operation: &str, error: SdkError<E, HttpResponse>) -> TransportError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let message = format_sdk_error(&error);
    let (code, retryable) = match &error {
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            let code = service_err
                .err()
                .code()
                .map(str::to_string)
                .unwrap_or_else(|| status_code(status).to_string());
            (code, status >= 500)
        }
        SdkError::TimeoutError(_) => (TransportError::TIMEOUT.to_string(), true),
        SdkError::DispatchFailure(_) | SdkError::ConstructionFailure(_)
            if is_credentials_failure(&message) =>
        {
            (TransportError::NO_CREDENTIALS.to_string(), false)
        }
        SdkError::DispatchFailure(_) => (TransportError::DISPATCH_FAILURE.to_string(), true),
        SdkError::ConstructionFailure(_) => (TransportError::INVALID_PARAMETER.to_string(), false),
        _ => ("Unknown".to_string(), false),
    };

    tracing::debug!(operation = operation, code = %code, error = %message, "SDK call failed");
    TransportError::new(code, message).retryable(retryable)
}

/// Request shape the SDK refused to build
pub(crate) fn build_error(error: BuildError) -> TransportError {
    TransportError::new(TransportError::INVALID_PARAMETER, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;
    use aws_smithy_types::error::ErrorMetadata;

    fn response(status: u16) -> HttpResponse {
        HttpResponse::new(StatusCode::try_from(status).unwrap(), SdkBody::empty())
    }

    #[test]
    fn test_service_error_keeps_provider_code() {
        let err = DescribeTableError::generic(
            ErrorMetadata::builder()
                .code("ResourceNotFoundException")
                .message("Requested resource not found")
                .build(),
        );
        let mapped = sdk_error("DescribeTable", SdkError::service_error(err, response(400)));
        assert_eq!(mapped.code, "ResourceNotFoundException");
        assert!(!mapped.retryable);
    }

    #[test]
    fn test_service_error_without_code_uses_status() {
        let err = DescribeTableError::generic(ErrorMetadata::builder().build());
        let mapped = sdk_error("HeadBucket", SdkError::service_error(err, response(404)));
        assert_eq!(mapped.code, "NotFound");

        let err = DescribeTableError::generic(ErrorMetadata::builder().build());
        let mapped = sdk_error("HeadBucket", SdkError::service_error(err, response(503)));
        assert!(mapped.retryable);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err: SdkError<DescribeTableError, HttpResponse> =
            SdkError::timeout_error("operation timed out");
        let mapped = sdk_error("DescribeTable", err);
        assert_eq!(mapped.code, TransportError::TIMEOUT);
        assert!(mapped.retryable);
    }

    #[test]
    fn test_credentials_failure_detection() {
        assert!(is_credentials_failure(
            "Network dispatch error: failed to load credentials from the provider chain"
        ));
        assert!(!is_credentials_failure("Network dispatch error: connection refused"));
    }
}
