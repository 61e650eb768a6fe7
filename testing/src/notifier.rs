//! Recording email channel.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use raffle_core::notification::{EmailMessage, Notifier, NotifyError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Captures every email instead of sending it.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<EmailMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create an empty notifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every email delivered, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.read().unwrap().clone()
    }

    /// Number of emails delivered to `address`.
    #[must_use]
    pub fn count_to(&self, address: &str) -> usize {
        self.sent
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.to == address)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn send(
        &self,
        message: EmailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Rejected {
                    status: 503,
                    message: "injected failure".to_string(),
                });
            }
            self.sent.write().unwrap().push(message);
            Ok(())
        })
    }
}
