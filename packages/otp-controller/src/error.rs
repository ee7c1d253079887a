//! Error taxonomy shared by the exchange unit, the wizard and the session
//! manager.
//!
//! Each variant maps to one affordance on the calling screen: `InvalidCode`
//! keeps the code field open, `Expired` forces a resend, `RateLimited` shows a
//! countdown. Callers must not collapse them.

use std::borrow::Cow;
use std::time::Duration;

use gateway::GatewayError;
use thiserror::Error;

use crate::validation::ContactRole;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("invalid verification code")]
    InvalidCode,

    #[error("verification code expired")]
    Expired,

    #[error("network error: {0}")]
    Network(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{first} and {second} share the number {value}")]
    DuplicateContact {
        value: String,
        first: ContactRole,
        second: ContactRole,
    },

    #[error("verification rejected: {0}")]
    Rejected(String),

    #[error("request failed ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("staff session expired: {0}")]
    Unauthorized(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("challenge superseded, result discarded")]
    Superseded,

    #[error("flow already disposed")]
    Disposed,
}

impl OtpError {
    /// Whether the caller may retry the same action without starting over.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OtpError::RateLimited { .. }
                | OtpError::InvalidCode
                | OtpError::Network(_)
                | OtpError::Validation(_)
                | OtpError::DuplicateContact { .. }
                | OtpError::Remote { .. }
        )
    }

    /// Message fit for showing to the person at the keyboard.
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            OtpError::RateLimited { retry_after } => format!(
                "Please wait {} seconds before requesting another code.",
                retry_after.as_secs()
            )
            .into(),
            OtpError::InvalidCode => "The code you entered is incorrect. Try again.".into(),
            OtpError::Expired => "This code has expired. Request a new one.".into(),
            OtpError::Network(_) => "Could not reach the server. Check your connection.".into(),
            OtpError::Validation(msg) => msg.clone().into(),
            OtpError::DuplicateContact { first, second, .. } => {
                format!("{first} and {second} must be different numbers.").into()
            }
            OtpError::Rejected(reason) => reason.clone().into(),
            OtpError::Remote { message, .. } => message.clone().into(),
            OtpError::Unauthorized(_) => "Your session has expired. Please sign in again.".into(),
            OtpError::InvalidState(_) | OtpError::Superseded | OtpError::Disposed => {
                "This step is no longer active. Please start again.".into()
            }
        }
    }
}

impl From<GatewayError> for OtpError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::RateLimited { retry_after_secs } => OtpError::RateLimited {
                retry_after: Duration::from_secs(retry_after_secs),
            },
            GatewayError::InvalidCode(_) => OtpError::InvalidCode,
            GatewayError::Expired(_) => OtpError::Expired,
            GatewayError::Validation(msg) => OtpError::Validation(msg),
            GatewayError::Rejected { status, message } => OtpError::Remote { status, message },
            GatewayError::Unauthorized(msg) => OtpError::Unauthorized(msg),
            GatewayError::Network(msg) | GatewayError::Decode(msg) => OtpError::Network(msg),
        }
    }
}
