//! Controller dependencies (using traits for testability)
//!
//! Hosts build one `ControllerDeps` at startup and ask it for login flows and
//! loan wizards. Tests build it from the mocks in `test_dependencies`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gateway::{GatewayService, StaffRole};
use tracing::warn;

use super::{BaseOriginationGateway, BaseVerificationGateway};
use crate::config::{ControllerConfig, OtpSettings};
use crate::error::OtpError;
use crate::login::LoginFlow;
use crate::session::{FileSessionStore, LogoutReason, SessionManager};
use crate::types::{OtpDispatch, Verification};
use crate::wizard::{
    IdentityDraft, LoanApplication, LoanReceipt, LoanWizard, OriginationRoute, RegisteredIdentity,
};

// =============================================================================
// StaffGateway (origination calls carry the signed-in staff token)
// =============================================================================

/// Wrapper around GatewayService that authenticates every origination call
/// with the token of the current session. A call refused for its token ends
/// that session.
pub struct StaffGateway {
    service: GatewayService,
    sessions: SessionManager,
}

impl StaffGateway {
    pub fn new(service: GatewayService, sessions: SessionManager) -> Self {
        Self { service, sessions }
    }

    fn authorized(&self) -> Result<GatewayService, OtpError> {
        let token = self
            .sessions
            .token()
            .ok_or(OtpError::InvalidState("staff member is not signed in"))?;
        Ok(self.service.with_token(token))
    }

    fn settle<T>(&self, result: Result<T, OtpError>) -> Result<T, OtpError> {
        if let Err(OtpError::Unauthorized(reason)) = &result {
            warn!(%reason, "Staff token refused by gateway, signing out");
            self.sessions.logout(LogoutReason::Expired);
        }
        result
    }
}

#[async_trait]
impl BaseOriginationGateway for StaffGateway {
    async fn create_identity(
        &self,
        role: StaffRole,
        draft: &IdentityDraft,
    ) -> Result<RegisteredIdentity, OtpError> {
        let service = self.authorized()?;
        let result = BaseOriginationGateway::create_identity(&service, role, draft).await;
        self.settle(result)
    }

    async fn send_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError> {
        let service = self.authorized()?;
        let result = BaseOriginationGateway::send_identity_otp(&service, role, identifier).await;
        self.settle(result)
    }

    async fn verify_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
        code: &str,
    ) -> Result<Verification, OtpError> {
        let service = self.authorized()?;
        let result = BaseOriginationGateway::verify_identity_otp(&service, role, identifier, code).await;
        self.settle(result)
    }

    async fn send_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError> {
        let service = self.authorized()?;
        let result = BaseOriginationGateway::send_loan_otp(&service, role, principal_id, identifier).await;
        self.settle(result)
    }

    async fn verify_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
        code: &str,
    ) -> Result<(), OtpError> {
        let service = self.authorized()?;
        let result =
            BaseOriginationGateway::verify_loan_otp(&service, role, principal_id, identifier, code)
                .await;
        self.settle(result)
    }

    async fn commit_loan(
        &self,
        role: StaffRole,
        application: &LoanApplication,
    ) -> Result<LoanReceipt, OtpError> {
        let service = self.authorized()?;
        let result = BaseOriginationGateway::commit_loan(&service, role, application).await;
        self.settle(result)
    }
}

// =============================================================================
// ControllerDeps
// =============================================================================

#[derive(Clone)]
pub struct ControllerDeps {
    pub verification: Arc<dyn BaseVerificationGateway>,
    pub origination: Arc<dyn BaseOriginationGateway>,
    pub sessions: SessionManager,
    pub otp: OtpSettings,
}

impl ControllerDeps {
    pub fn new(
        verification: Arc<dyn BaseVerificationGateway>,
        origination: Arc<dyn BaseOriginationGateway>,
        sessions: SessionManager,
        otp: OtpSettings,
    ) -> Self {
        Self {
            verification,
            origination,
            sessions,
            otp,
        }
    }

    /// Production wiring: HTTP gateway plus a file-backed session store.
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        let service = GatewayService::new(config.gateway_options())
            .context("Failed to build gateway client")?;
        let store = Arc::new(FileSessionStore::new(config.session.session_dir.clone()));

        let verification: Arc<dyn BaseVerificationGateway> = Arc::new(service.clone());
        let sessions = SessionManager::new(
            verification.clone(),
            store,
            config.session.revalidate_interval,
        );
        let origination = Arc::new(StaffGateway::new(service, sessions.clone()));

        Ok(Self::new(
            verification,
            origination,
            sessions,
            config.otp.clone(),
        ))
    }

    pub fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(
            self.verification.clone(),
            self.sessions.clone(),
            self.otp.clone(),
        )
    }

    pub fn loan_wizard(&self, route: OriginationRoute) -> LoanWizard {
        LoanWizard::new(route, self.origination.clone(), self.otp.clone())
    }
}
