//! Process exit codes
//!
//! Scripts branch on these, so the numbers are stable.

use nb_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Bad arguments or unparseable input
    UsageError = 2,
    /// Endpoint unreachable, timeouts, throttling that outlived retries
    NetworkError = 3,
    AuthError = 4,
    NotFound = 5,
    Conflict = 6,
    UnsupportedFeature = 7,
    /// The command ran but some items or objects were left behind
    Incomplete = 8,
}

impl ExitCode {
    /// Exit code for a failed façade operation
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Auth(_) => ExitCode::AuthError,
            Error::Connection(_) | Error::Throttled(_) => ExitCode::NetworkError,
            Error::NotFound(_) => ExitCode::NotFound,
            Error::AlreadyExists(_) => ExitCode::Conflict,
            Error::InvalidQuery(_) | Error::InvalidItem(_) | Error::Config(_) => {
                ExitCode::UsageError
            }
            Error::UnsupportedFeature(_) => ExitCode::UnsupportedFeature,
            _ => ExitCode::GeneralError,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            ExitCode::from_error(&Error::NotFound("products".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from_error(&Error::Throttled("slow down".into())),
            ExitCode::NetworkError
        );
        assert_eq!(
            ExitCode::from_error(&Error::InvalidQuery("no partition key".into())),
            ExitCode::UsageError
        );
        assert_eq!(
            ExitCode::from_error(&Error::Service {
                code: "InternalError".into(),
                message: "boom".into()
            }),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::UsageError.code(), 2);
        assert_eq!(ExitCode::NotFound.code(), 5);
        assert_eq!(ExitCode::Incomplete.code(), 8);
    }
}
