use std::fmt::{self, Display};

use http::StatusCode;

/// Engine-level failures.
///
/// Access denials are not errors: the pipeline reports them as
/// [`Decision::Deny`](crate::pipeline::Decision) values carrying a
/// caller-visible message. `Error` covers the conditions that must reach an
/// operator instead — configuration integrity problems that would otherwise
/// silently widen or narrow access.
// As long as the struct member is private, we force people to use the `new`
// method and log the error.
#[derive(Debug, PartialEq)]
pub struct Error(Box<ErrorDetails>);

impl Error {
    #[must_use]
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    #[must_use]
    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    /// HTTP status the embedding gateway should surface for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    #[must_use]
    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    #[must_use]
    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }

    pub fn log(&self) {
        self.0.log();
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    /// Malformed configuration text or a non-object root. Fatal for the
    /// current request; the caller decides whether a fallback configuration
    /// applies. Never silently defaulted.
    ConfigParse { message: String },
    /// The configuration defines no user groups and no legacy user tiers, so
    /// no cohort can be resolved for any identity.
    NoUserGroups,
}

impl ErrorDetails {
    /// Defines the log level for this error.
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::ConfigParse { .. } | ErrorDetails::NoUserGroups => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error.
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::ConfigParse { .. } | ErrorDetails::NoUserGroups => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Log the error using the `tracing` library.
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetails::ConfigParse { message } => {
                write!(f, "Failed to parse configuration: {message}")
            }
            ErrorDetails::NoUserGroups => {
                write!(
                    f,
                    "Configuration error: no user groups defined. Add at least one user group (or a legacy user tier)."
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_parse_message() {
        let error = Error::new_without_logging(ErrorDetails::ConfigParse {
            message: "expected value at line 3".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Failed to parse configuration: expected value at line 3"
        );
    }

    #[test]
    fn test_error_status_codes() {
        let parse = Error::new_without_logging(ErrorDetails::ConfigParse {
            message: "bad".to_string(),
        });
        assert_eq!(parse.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let no_groups = Error::new_without_logging(ErrorDetails::NoUserGroups);
        assert_eq!(no_groups.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
