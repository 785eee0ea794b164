//! Errors raised while setting up Strata's worker infrastructure.

use thiserror::Error;

/// Failure to start or configure engine services.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    #[error("Thread error: {0}")]
    Thread(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn describe(error: &Error) -> &'static str {
        match error {
            Error::InvalidConfig(_) => "config",
            Error::Thread(_) => "thread",
        }
    }

    #[test]
    fn variants_cover_config_and_thread_failures() {
        let config = Error::InvalidConfig("pool 'hot' needs at least one thread".to_string());
        let thread = Error::Thread("resource temporarily unavailable".to_string());

        assert_eq!(describe(&config), "config");
        assert_eq!(describe(&thread), "thread");
        assert_eq!(
            config.to_string(),
            "Invalid configuration: pool 'hot' needs at least one thread"
        );
        assert!(thread.to_string().starts_with("Thread error"));
    }
}
