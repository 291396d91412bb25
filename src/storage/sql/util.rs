use std::fmt;

pub(super) trait ResultExt<T, E> {
    /// Converts the result into an option, logging the error if any
    fn ok_logged(self) -> Option<T>;
}

impl<T, E: fmt::Display> ResultExt<T, E> for Result<T, E> {
    fn ok_logged(self) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(error) => {
                tracing::error!(%error, "sqlite storage failure");
                None
            }
        }
    }
}
