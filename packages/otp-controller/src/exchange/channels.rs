//! The three send/verify pairs an exchange unit can be bound to.

use std::sync::Arc;

use async_trait::async_trait;
use gateway::StaffRole;

use crate::error::OtpError;
use crate::kernel::{BaseOriginationGateway, BaseOtpChannel, BaseVerificationGateway};
use crate::types::{OtpDispatch, Principal, Verification};

/// Staff login: `/auth/send-login-otp` + `/auth/verify-otp`.
pub struct LoginChannel {
    gateway: Arc<dyn BaseVerificationGateway>,
}

impl LoginChannel {
    pub fn new(gateway: Arc<dyn BaseVerificationGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl BaseOtpChannel for LoginChannel {
    async fn send(&self, identifier: &str) -> Result<OtpDispatch, OtpError> {
        self.gateway.request_otp(identifier).await
    }

    async fn verify(&self, identifier: &str, code: &str) -> Result<Verification, OtpError> {
        self.gateway.verify_otp(identifier, code).await
    }
}

/// Customer identity verification during loan origination.
pub struct IdentityChannel {
    gateway: Arc<dyn BaseOriginationGateway>,
    role: StaffRole,
}

impl IdentityChannel {
    pub fn new(gateway: Arc<dyn BaseOriginationGateway>, role: StaffRole) -> Self {
        Self { gateway, role }
    }
}

#[async_trait]
impl BaseOtpChannel for IdentityChannel {
    async fn send(&self, identifier: &str) -> Result<OtpDispatch, OtpError> {
        self.gateway.send_identity_otp(self.role, identifier).await
    }

    async fn verify(&self, identifier: &str, code: &str) -> Result<Verification, OtpError> {
        self.gateway
            .verify_identity_otp(self.role, identifier, code)
            .await
    }
}

/// Loan consent code, scoped to the principal verified by the identity stage.
///
/// A successful verification echoes that principal back, so later stages
/// never depend on anything the operator re-typed.
pub struct LoanChannel {
    gateway: Arc<dyn BaseOriginationGateway>,
    role: StaffRole,
    principal: Principal,
}

impl LoanChannel {
    pub fn new(gateway: Arc<dyn BaseOriginationGateway>, role: StaffRole, principal: Principal) -> Self {
        Self {
            gateway,
            role,
            principal,
        }
    }
}

#[async_trait]
impl BaseOtpChannel for LoanChannel {
    async fn send(&self, identifier: &str) -> Result<OtpDispatch, OtpError> {
        self.gateway
            .send_loan_otp(self.role, &self.principal.id, identifier)
            .await
    }

    async fn verify(&self, identifier: &str, code: &str) -> Result<Verification, OtpError> {
        self.gateway
            .verify_loan_otp(self.role, &self.principal.id, identifier, code)
            .await?;
        Ok(Verification::without_token(self.principal.clone()))
    }
}
