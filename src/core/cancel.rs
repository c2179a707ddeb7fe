// Cooperative cancellation flag shared between a caller and one extraction.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::Error;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Cancelled` once the token has been raised.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(())
    }

    /// The raw flag, for wiring into signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;
    use crate::core::error::ErrorKind;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        let err = token.check().expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
