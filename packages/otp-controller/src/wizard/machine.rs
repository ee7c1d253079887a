//! Pure stage machine for loan origination.
//!
//! The machine interprets facts about what happened and decides what the
//! orchestrator should do next. No IO, no async.
//!
//! # Key Properties
//!
//! - **Monotonic**: stages only move forward, one step per fact.
//! - **Gated commit**: `Commit` is reachable only after both OTP stages
//!   reported `Verified`.
//! - **One fact → at most one command**: returns `Option<WizardCommand>`.
//! - **Out-of-order facts are errors**, never silently absorbed.

use crate::error::OtpError;
use crate::types::Principal;

use super::{LoanReceipt, OriginationRoute, RegisteredIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStage {
    CollectIdentity,
    VerifyIdentity,
    VerifyLoanOtp,
    Commit,
    Completed,
    Abandoned,
}

impl WizardStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, WizardStage::Completed | WizardStage::Abandoned)
    }
}

/// Facts reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEvent {
    IdentityRegistered(RegisteredIdentity),
    IdentityVerified(Principal),
    LoanOtpVerified,
    LoanCommitted(LoanReceipt),
    Abandoned,
}

/// Intent for the orchestrator to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardCommand {
    StartIdentityOtp { identifier: String },
    StartLoanOtp { principal: Principal, identifier: String },
    ClearState,
    DisposeAll,
}

#[derive(Debug, Clone)]
pub struct StageMachine {
    route: OriginationRoute,
    stage: WizardStage,
    registered: Option<RegisteredIdentity>,
    principal: Option<Principal>,
    identity_verified: bool,
    loan_otp_verified: bool,
}

impl StageMachine {
    pub fn new(route: OriginationRoute) -> Self {
        Self {
            route,
            stage: WizardStage::CollectIdentity,
            registered: None,
            principal: None,
            identity_verified: false,
            loan_otp_verified: false,
        }
    }

    pub fn stage(&self) -> WizardStage {
        self.stage
    }

    /// Principal returned by identity verification, once recorded.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn registered(&self) -> Option<&RegisteredIdentity> {
        self.registered.as_ref()
    }

    pub fn can_commit(&self) -> bool {
        self.stage == WizardStage::Commit && self.identity_verified && self.loan_otp_verified
    }

    /// Apply a fact and return the next command, if any.
    pub fn decide(&mut self, event: &WizardEvent) -> Result<Option<WizardCommand>, OtpError> {
        if self.stage.is_terminal() {
            return Err(OtpError::InvalidState("loan workflow already finished"));
        }

        match (self.stage, event) {
            (_, WizardEvent::Abandoned) => {
                self.stage = WizardStage::Abandoned;
                self.registered = None;
                self.principal = None;
                Ok(Some(WizardCommand::DisposeAll))
            }
            (WizardStage::CollectIdentity, WizardEvent::IdentityRegistered(identity)) => {
                let identifier = self.route.identity_channel.pick(identity).to_string();
                self.registered = Some(identity.clone());
                self.stage = WizardStage::VerifyIdentity;
                Ok(Some(WizardCommand::StartIdentityOtp { identifier }))
            }
            (WizardStage::VerifyIdentity, WizardEvent::IdentityVerified(principal)) => {
                let Some(registered) = self.registered.as_ref() else {
                    return Err(OtpError::InvalidState("identity was never registered"));
                };
                let identifier = self.route.loan_channel.pick(registered).to_string();
                self.identity_verified = true;
                self.principal = Some(principal.clone());
                self.stage = WizardStage::VerifyLoanOtp;
                Ok(Some(WizardCommand::StartLoanOtp {
                    principal: principal.clone(),
                    identifier,
                }))
            }
            (WizardStage::VerifyLoanOtp, WizardEvent::LoanOtpVerified) => {
                if !self.identity_verified {
                    return Err(OtpError::InvalidState("identity not verified"));
                }
                self.loan_otp_verified = true;
                self.stage = WizardStage::Commit;
                Ok(None)
            }
            (WizardStage::Commit, WizardEvent::LoanCommitted(_)) => {
                if !self.can_commit() {
                    return Err(OtpError::InvalidState("verification stages incomplete"));
                }
                self.stage = WizardStage::Completed;
                self.registered = None;
                self.principal = None;
                Ok(Some(WizardCommand::ClearState))
            }
            _ => Err(OtpError::InvalidState("event does not match the current stage")),
        }
    }
}
