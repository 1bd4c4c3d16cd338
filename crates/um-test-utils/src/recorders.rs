//! Email and event collaborators that record what they were asked to do.

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use um_service::errors::UmError;
use um_service::services::email::{EmailSender, OtpPurpose};
use um_service::services::events::EventPublisher;

/// A passcode email as the recipient would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub code: String,
    pub purpose: OtpPurpose,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEmailSender {
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    /// Code from the most recent email to `to`.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.to == to)
            .map(|m| m.code.clone())
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_otp(
        &self,
        to: &str,
        code: &SecretString,
        purpose: OtpPurpose,
    ) -> Result<(), UmError> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            code: code.expose_secret().to_string(),
            purpose,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub stream: String,
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<PublishedEvent>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event types in publish order.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, stream: &str, event_type: &str, data: Value) {
        self.events.lock().unwrap().push(PublishedEvent {
            stream: stream.to_string(),
            event_type: event_type.to_string(),
            data,
        });
    }
}
