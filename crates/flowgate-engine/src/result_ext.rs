//! Logging helpers for `Result` and `Option`.

use std::fmt::Display;
use tracing::error;

/// Extension trait for logging errors with context.
///
/// The error is logged with the caller's source location and the
/// original `Result` is returned unchanged.
pub trait ResultExt<T, E> {
    /// Log the error with context if this is an `Err` variant.
    ///
    /// ```ignore
    /// use flowgate_engine::result_ext::ResultExt;
    ///
    /// store.release_execution(id, owner).await.log("releasing execution lease")?;
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "flowgate_engine",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

/// Extension trait for `Option` values that are expected to be present.
pub trait OptionExt<T> {
    /// Log a warning if this is a `None` variant.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            let caller_location = std::panic::Location::caller();
            tracing::warn!(
                target: "flowgate_engine",
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Expected value was None"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_passes_through() {
        let ok: Result<i32, &str> = Ok(7);
        assert_eq!(ok.log("ok path").unwrap(), 7);

        let err: Result<i32, &str> = Err("lease lost");
        assert_eq!(err.log("err path").unwrap_err(), "lease lost");
    }

    #[test]
    fn test_option_ext_passes_through() {
        assert_eq!(Some("u-1").log_none("assignee"), Some("u-1"));
        assert!(None::<&str>.log_none("assignee").is_none());
    }
}
