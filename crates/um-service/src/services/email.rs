//! Outbound email.
//!
//! Delivery is behind [`EmailSender`]. The default sender only logs the
//! send; the passcode itself never reaches a log line.

use crate::errors::UmError;
use async_trait::async_trait;
use common::secret::SecretString;

/// Why a passcode is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Registration,
    Invitation,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "registration",
            OtpPurpose::Invitation => "invitation",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_otp(
        &self,
        to: &str,
        code: &SecretString,
        purpose: OtpPurpose,
    ) -> Result<(), UmError>;
}

/// Records the send at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_otp(
        &self,
        _to: &str,
        _code: &SecretString,
        purpose: OtpPurpose,
    ) -> Result<(), UmError> {
        tracing::info!(
            target: "um.services.email",
            purpose = purpose.as_str(),
            "Passcode email sent"
        );
        Ok(())
    }
}
