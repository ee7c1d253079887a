// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no orchestration logic.
// The exchange unit, the wizard and the session manager depend on these,
// never on the HTTP client directly.
//
// Naming convention: Base* for trait names (e.g., BaseVerificationGateway)

use async_trait::async_trait;
use gateway::{SessionCheck, StaffRole};

use crate::error::OtpError;
use crate::types::{OtpDispatch, Verification};
use crate::wizard::{IdentityDraft, LoanApplication, LoanReceipt, RegisteredIdentity};

// =============================================================================
// Verification Gateway Trait (login + session validation)
// =============================================================================

#[async_trait]
pub trait BaseVerificationGateway: Send + Sync {
    /// Ask the backend to send a login code to the identifier
    async fn request_otp(&self, identifier: &str) -> Result<OtpDispatch, OtpError>;

    /// Check a login code; success carries the session token
    async fn verify_otp(&self, identifier: &str, code: &str) -> Result<Verification, OtpError>;

    /// Ask whether a session token is still accepted (never fails)
    async fn validate_session(&self, token: &str) -> SessionCheck;
}

// =============================================================================
// Origination Gateway Trait (customer enrollment + loan creation)
// =============================================================================

#[async_trait]
pub trait BaseOriginationGateway: Send + Sync {
    /// Register the customer identity
    async fn create_identity(
        &self,
        role: StaffRole,
        draft: &IdentityDraft,
    ) -> Result<RegisteredIdentity, OtpError>;

    async fn send_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError>;

    async fn verify_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
        code: &str,
    ) -> Result<Verification, OtpError>;

    async fn send_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError>;

    async fn verify_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
        code: &str,
    ) -> Result<(), OtpError>;

    /// Create the loan; called at most once per wizard unless it failed
    async fn commit_loan(
        &self,
        role: StaffRole,
        application: &LoanApplication,
    ) -> Result<LoanReceipt, OtpError>;
}

// =============================================================================
// OTP Channel Trait (what one exchange unit talks to)
// =============================================================================

/// A send/verify pair bound to one purpose (login, identity, loan).
#[async_trait]
pub trait BaseOtpChannel: Send + Sync {
    async fn send(&self, identifier: &str) -> Result<OtpDispatch, OtpError>;

    async fn verify(&self, identifier: &str, code: &str) -> Result<Verification, OtpError>;
}

// =============================================================================
// Session Store Trait (key/value persistence)
// =============================================================================

pub trait BaseSessionStore: Send + Sync {
    /// Raw value under `key`, `None` when absent
    fn load(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn save(&self, key: &str, value: &str) -> anyhow::Result<()>;
}
