use std::sync::Arc;

/// Receives human-readable attempt/failure notes. Observational only: implementations must
/// not block.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

pub fn no_progress() -> Arc<dyn ProgressSink> {
    Arc::new(|_: &str| {})
}
