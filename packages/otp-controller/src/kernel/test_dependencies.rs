// Test dependencies - scripted gateway implementations for testing
//
// Both mocks record every call at the moment it starts (before any simulated
// latency), so tests can assert on "exactly one gateway call" even while a
// call is still in flight.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gateway::{SessionCheck, StaffRole};

use super::{BaseOriginationGateway, BaseVerificationGateway};
use crate::error::OtpError;
use crate::types::{OtpDispatch, Principal, Verification};
use crate::wizard::{IdentityDraft, LoanApplication, LoanReceipt, RegisteredIdentity};

/// Code both mocks accept unless scripted otherwise.
pub const ACCEPTED_CODE: &str = "123456";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Mock Verification Gateway
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    RequestOtp { identifier: String },
    VerifyOtp { identifier: String, code: String },
    ValidateSession { token: String },
}

pub struct MockVerificationGateway {
    token: String,
    role: String,
    send_results: Mutex<VecDeque<Result<OtpDispatch, OtpError>>>,
    verify_results: Mutex<VecDeque<Result<Verification, OtpError>>>,
    send_delays: Mutex<VecDeque<Duration>>,
    verify_delays: Mutex<VecDeque<Duration>>,
    session_checks: Mutex<VecDeque<SessionCheck>>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl MockVerificationGateway {
    pub fn new() -> Self {
        Self {
            token: "t1".to_string(),
            role: "admin".to_string(),
            send_results: Mutex::new(VecDeque::new()),
            verify_results: Mutex::new(VecDeque::new()),
            send_delays: Mutex::new(VecDeque::new()),
            verify_delays: Mutex::new(VecDeque::new()),
            session_checks: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Token handed out on a successful verification
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    /// Queue a result for the next `request_otp` call
    pub fn with_send_result(self, result: Result<OtpDispatch, OtpError>) -> Self {
        lock(&self.send_results).push_back(result);
        self
    }

    /// Queue a result for the next `verify_otp` call (overrides code matching)
    pub fn with_verify_result(self, result: Result<Verification, OtpError>) -> Self {
        lock(&self.verify_results).push_back(result);
        self
    }

    /// Simulated latency for the next `request_otp` call
    pub fn with_send_delay(self, delay: Duration) -> Self {
        lock(&self.send_delays).push_back(delay);
        self
    }

    /// Simulated latency for the next `verify_otp` call
    pub fn with_verify_delay(self, delay: Duration) -> Self {
        lock(&self.verify_delays).push_back(delay);
        self
    }

    /// Answers for successive `validate_session` calls; `Valid` once exhausted
    pub fn with_session_checks(self, checks: impl IntoIterator<Item = SessionCheck>) -> Self {
        lock(&self.session_checks).extend(checks);
        self
    }

    pub fn push_session_check(&self, check: SessionCheck) {
        lock(&self.session_checks).push_back(check);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn request_count(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::RequestOtp { .. }))
    }

    pub fn verify_count(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::VerifyOtp { .. }))
    }

    pub fn validate_count(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::ValidateSession { .. }))
    }

    fn count(&self, pred: impl Fn(&GatewayCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for MockVerificationGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseVerificationGateway for MockVerificationGateway {
    async fn request_otp(&self, identifier: &str) -> Result<OtpDispatch, OtpError> {
        self.record(GatewayCall::RequestOtp {
            identifier: identifier.to_string(),
        });

        let delay = lock(&self.send_delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.send_results).pop_front();
        scripted.unwrap_or_else(|| Ok(OtpDispatch::default()))
    }

    async fn verify_otp(&self, identifier: &str, code: &str) -> Result<Verification, OtpError> {
        self.record(GatewayCall::VerifyOtp {
            identifier: identifier.to_string(),
            code: code.to_string(),
        });

        let delay = lock(&self.verify_delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.verify_results).pop_front();
        if let Some(result) = scripted {
            return result;
        }

        if code == ACCEPTED_CODE {
            Ok(Verification {
                principal: Principal {
                    id: "user-1".to_string(),
                    role: self.role.clone(),
                    identifier: identifier.to_string(),
                    display_name: Some("Test User".to_string()),
                },
                token: Some(self.token.clone()),
            })
        } else {
            Err(OtpError::InvalidCode)
        }
    }

    async fn validate_session(&self, token: &str) -> SessionCheck {
        self.record(GatewayCall::ValidateSession {
            token: token.to_string(),
        });
        lock(&self.session_checks)
            .pop_front()
            .unwrap_or(SessionCheck::Valid)
    }
}

// =============================================================================
// Mock Origination Gateway
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OriginationCall {
    CreateIdentity {
        role: StaffRole,
        draft: IdentityDraft,
    },
    SendIdentityOtp {
        role: StaffRole,
        identifier: String,
    },
    VerifyIdentityOtp {
        role: StaffRole,
        identifier: String,
        code: String,
    },
    SendLoanOtp {
        role: StaffRole,
        principal_id: String,
        identifier: String,
    },
    VerifyLoanOtp {
        role: StaffRole,
        principal_id: String,
        identifier: String,
        code: String,
    },
    CommitLoan {
        role: StaffRole,
        application: LoanApplication,
    },
}

pub struct MockOriginationGateway {
    create_results: Mutex<VecDeque<Result<RegisteredIdentity, OtpError>>>,
    identity_send_results: Mutex<VecDeque<Result<OtpDispatch, OtpError>>>,
    loan_send_results: Mutex<VecDeque<Result<OtpDispatch, OtpError>>>,
    commit_results: Mutex<VecDeque<Result<LoanReceipt, OtpError>>>,
    customer_id: String,
    calls: Mutex<Vec<OriginationCall>>,
}

impl MockOriginationGateway {
    pub fn new() -> Self {
        Self {
            create_results: Mutex::new(VecDeque::new()),
            identity_send_results: Mutex::new(VecDeque::new()),
            loan_send_results: Mutex::new(VecDeque::new()),
            commit_results: Mutex::new(VecDeque::new()),
            customer_id: "cust-1".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Principal id returned by identity verification
    pub fn with_customer_id(mut self, id: &str) -> Self {
        self.customer_id = id.to_string();
        self
    }

    pub fn with_create_result(self, result: Result<RegisteredIdentity, OtpError>) -> Self {
        lock(&self.create_results).push_back(result);
        self
    }

    pub fn with_identity_send_result(self, result: Result<OtpDispatch, OtpError>) -> Self {
        lock(&self.identity_send_results).push_back(result);
        self
    }

    pub fn with_loan_send_result(self, result: Result<OtpDispatch, OtpError>) -> Self {
        lock(&self.loan_send_results).push_back(result);
        self
    }

    pub fn with_commit_result(self, result: Result<LoanReceipt, OtpError>) -> Self {
        lock(&self.commit_results).push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<OriginationCall> {
        lock(&self.calls).clone()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, OriginationCall::CommitLoan { .. }))
            .count()
    }

    fn record(&self, call: OriginationCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for MockOriginationGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseOriginationGateway for MockOriginationGateway {
    async fn create_identity(
        &self,
        role: StaffRole,
        draft: &IdentityDraft,
    ) -> Result<RegisteredIdentity, OtpError> {
        self.record(OriginationCall::CreateIdentity {
            role,
            draft: draft.clone(),
        });
        let scripted = lock(&self.create_results).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(RegisteredIdentity {
                record_id: "record-1".to_string(),
                email: draft.email.trim().to_string(),
                mobile: draft.primary_mobile.trim().to_string(),
            })
        })
    }

    async fn send_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError> {
        self.record(OriginationCall::SendIdentityOtp {
            role,
            identifier: identifier.to_string(),
        });
        let scripted = lock(&self.identity_send_results).pop_front();
        scripted.unwrap_or_else(|| Ok(OtpDispatch::default()))
    }

    async fn verify_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
        code: &str,
    ) -> Result<Verification, OtpError> {
        self.record(OriginationCall::VerifyIdentityOtp {
            role,
            identifier: identifier.to_string(),
            code: code.to_string(),
        });

        if code != ACCEPTED_CODE {
            return Err(OtpError::InvalidCode);
        }
        Ok(Verification::without_token(Principal {
            id: self.customer_id.clone(),
            role: "customer".to_string(),
            identifier: identifier.to_string(),
            display_name: None,
        }))
    }

    async fn send_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError> {
        self.record(OriginationCall::SendLoanOtp {
            role,
            principal_id: principal_id.to_string(),
            identifier: identifier.to_string(),
        });
        let scripted = lock(&self.loan_send_results).pop_front();
        scripted.unwrap_or_else(|| Ok(OtpDispatch::default()))
    }

    async fn verify_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
        code: &str,
    ) -> Result<(), OtpError> {
        self.record(OriginationCall::VerifyLoanOtp {
            role,
            principal_id: principal_id.to_string(),
            identifier: identifier.to_string(),
            code: code.to_string(),
        });

        if code == ACCEPTED_CODE {
            Ok(())
        } else {
            Err(OtpError::InvalidCode)
        }
    }

    async fn commit_loan(
        &self,
        role: StaffRole,
        application: &LoanApplication,
    ) -> Result<LoanReceipt, OtpError> {
        self.record(OriginationCall::CommitLoan {
            role,
            application: application.clone(),
        });
        let scripted = lock(&self.commit_results).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(LoanReceipt {
                loan_id: "loan-1".to_string(),
                status: Some("pending".to_string()),
            })
        })
    }
}
