//! Operator notifications.
//!
//! Notifications are best-effort: `notify_best_effort` logs a failed send
//! and returns, so a notifier can never abort a cycle.

pub mod telegram;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::TradeError;

/// Abstraction over a message sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message. Failures are `TradeError::NotifierFailed`.
    async fn send(&self, text: &str) -> Result<(), TradeError>;

    fn name(&self) -> &str;
}

/// Send `text`, logging and discarding any failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        warn!(notifier = notifier.name(), error = %e, "Notification failed");
    }
}

/// Writes messages to the log. Used when no chat credentials are set.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), TradeError> {
        info!(target: "autotrade::notify", "{text}");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn send(&self, _text: &str) -> Result<(), TradeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TradeError::NotifierFailed("chat not found".into()))
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let n = BrokenNotifier {
            attempts: AtomicUsize::new(0),
        };
        notify_best_effort(&n, "hello").await;
        assert_eq!(n.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier.send("cycle started").await.is_ok());
    }
}
