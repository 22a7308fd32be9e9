//! Explicit process context.
//!
//! The quit request and the error reporter are carried through the frame loop
//! as a value instead of living in globals.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ClientError;

type ErrorReporter = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// State shared between the frame loop and whoever may ask it to stop.
#[derive(Clone)]
pub struct Context {
    quit: Arc<AtomicBool>,
    reporter: Option<ErrorReporter>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            quit: Arc::new(AtomicBool::new(false)),
            reporter: None,
        }
    }

    /// Install a callback that sees every error reported through [`Context::report`].
    pub fn with_error_reporter(
        mut self,
        reporter: impl Fn(&ClientError) + Send + Sync + 'static,
    ) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Ask the frame loop to stop at the next frame boundary.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Handle suitable for a signal handler or another thread.
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    /// Log an error and forward it to the installed reporter.
    pub fn report(&self, error: &ClientError) {
        if error.is_fatal() {
            log::error!("{error}");
        } else {
            log::warn!("{error}");
        }
        if let Some(reporter) = &self.reporter {
            reporter(error);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("quit", &self.quit_requested())
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LockType;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_quit_flag_shared() {
        let ctx = Context::new();
        let flag = ctx.quit_flag();
        assert!(!ctx.quit_requested());

        flag.store(true, Ordering::Release);
        assert!(ctx.quit_requested());
        assert!(ctx.clone().quit_requested());
    }

    #[test]
    fn test_reporter_called() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let ctx = Context::new().with_error_reporter(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        ctx.report(&ClientError::LockRejected(LockType::Camera));
        ctx.report(&ClientError::LockRejected(LockType::ChromaKey));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
