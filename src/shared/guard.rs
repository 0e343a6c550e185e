//! Panic isolation for model calls

use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a detector or recognizer call, turning a panic into an error so one
/// bad frame cannot take down the stage that made the call.
pub fn guarded<T>(call: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("collaborator panicked: {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_results_through() {
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);
        assert!(guarded::<()>(|| Err(anyhow!("model failed"))).is_err());
    }

    #[test]
    fn test_panic_becomes_error() {
        let err = guarded::<()>(|| panic!("bad tensor shape")).unwrap_err();
        assert!(err.to_string().contains("bad tensor shape"));
    }
}
