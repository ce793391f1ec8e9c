//! Outbound mail service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::SideEffectError;

/// An email to be sent to a buyer.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Trait for the outbound mail transport.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Sends the email. Exactly one send per rendered message; the caller
    /// never retries a failed send.
    async fn send(&self, email: OutboundEmail) -> Result<(), SideEffectError>;
}

#[derive(Debug, Default)]
struct InMemoryMailState {
    sent: Vec<OutboundEmail>,
    fail_on_send: bool,
}

/// In-memory mail service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailService {
    state: Arc<RwLock<InMemoryMailState>>,
}

impl InMemoryMailService {
    /// Creates a new in-memory mail service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on the next send call.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Returns the number of emails sent.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns a copy of all sent emails.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.state.read().unwrap().sent.clone()
    }
}

#[async_trait]
impl MailService for InMemoryMailService {
    async fn send(&self, email: OutboundEmail) -> Result<(), SideEffectError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_send {
            return Err(SideEffectError::Unavailable(
                "mail transport down".to_string(),
            ));
        }

        state.sent.push(email);
        Ok(())
    }
}
