//! Staff login: one OTP exchange feeding the session manager.

use std::sync::Arc;

use tracing::info;

use crate::config::OtpSettings;
use crate::error::OtpError;
use crate::exchange::{ExchangePhase, LoginChannel, OtpExchange, Submission};
use crate::kernel::BaseVerificationGateway;
use crate::session::{Session, SessionManager};
use crate::types::OtpChallenge;

/// A login screen's worth of state. Dropping it disposes the exchange.
pub struct LoginFlow {
    exchange: OtpExchange,
    sessions: SessionManager,
}

impl LoginFlow {
    pub fn new(
        gateway: Arc<dyn BaseVerificationGateway>,
        sessions: SessionManager,
        settings: OtpSettings,
    ) -> Self {
        let channel = Arc::new(LoginChannel::new(gateway));
        Self {
            exchange: OtpExchange::new("login", channel, settings),
            sessions,
        }
    }

    pub async fn request_code(&self, identifier: &str) -> Result<OtpChallenge, OtpError> {
        self.exchange.request_code(identifier).await
    }

    pub async fn resend(&self) -> Result<OtpChallenge, OtpError> {
        self.exchange.resend().await
    }

    /// Submit a code; `Ok(None)` means another submission was already in flight.
    pub async fn submit_code(&self, code: &str) -> Result<Option<Session>, OtpError> {
        let submission = self.exchange.submit_code(code).await?;
        self.submit_result(submission)
    }

    /// Feed the code field; submits once the code is complete.
    pub async fn enter_code(&self, input: &str) -> Result<Option<Session>, OtpError> {
        match self.exchange.enter_code(input).await? {
            Some(submission) => self.submit_result(submission),
            None => Ok(None),
        }
    }

    pub fn dispose(&self) {
        self.exchange.dispose();
    }

    pub fn phase(&self) -> ExchangePhase {
        self.exchange.phase()
    }

    pub fn exchange(&self) -> &OtpExchange {
        &self.exchange
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn submit_result(&self, submission: Submission) -> Result<Option<Session>, OtpError> {
        match submission {
            Submission::Verified(verification) => {
                let session = self.sessions.login(verification)?;
                info!("login completed");
                Ok(Some(session))
            }
            Submission::Duplicate => Ok(None),
        }
    }
}

impl Drop for LoginFlow {
    fn drop(&mut self) {
        self.exchange.dispose();
    }
}
