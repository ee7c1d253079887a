//! Loan origination wizard.
//!
//! Executes the commands decided by [`StageMachine`]: registers the identity,
//! owns the two OTP exchanges and submits the loan exactly once.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OtpSettings;
use crate::error::OtpError;
use crate::exchange::{IdentityChannel, LoanChannel, OtpExchange, Submission};
use crate::kernel::BaseOriginationGateway;
use crate::types::OtpChallenge;

use super::machine::{StageMachine, WizardCommand, WizardEvent, WizardStage};
use super::{IdentityDraft, IdentityField, LoanApplication, LoanReceipt, LoanTerms, OriginationRoute};

const FINISHED: &str = "loan workflow already finished";

/// Data that lives exactly as long as the workflow is open.
#[derive(Default)]
struct WizardState {
    draft: IdentityDraft,
    identity_otp: Option<OtpExchange>,
    loan_otp: Option<OtpExchange>,
    terms: Option<LoanTerms>,
    committing: bool,
}

impl WizardState {
    fn dispose_exchanges(&self) {
        for exchange in [&self.identity_otp, &self.loan_otp].into_iter().flatten() {
            exchange.dispose();
        }
    }
}

/// One "add loan" workflow for a staff member.
///
/// Dropping the wizard abandons it.
pub struct LoanWizard {
    id: Uuid,
    route: OriginationRoute,
    gateway: Arc<dyn BaseOriginationGateway>,
    settings: OtpSettings,
    machine: StageMachine,
    state: Option<WizardState>,
}

impl LoanWizard {
    pub fn new(
        route: OriginationRoute,
        gateway: Arc<dyn BaseOriginationGateway>,
        settings: OtpSettings,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(wizard = %id, role = %route.role, "loan workflow opened");
        Self {
            id,
            route,
            gateway,
            settings,
            machine: StageMachine::new(route),
            state: Some(WizardState::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn route(&self) -> OriginationRoute {
        self.route
    }

    pub fn stage(&self) -> WizardStage {
        self.machine.stage()
    }

    pub fn draft(&self) -> Option<&IdentityDraft> {
        self.state.as_ref().map(|s| &s.draft)
    }

    pub fn terms(&self) -> Option<&LoanTerms> {
        self.state.as_ref().and_then(|s| s.terms.as_ref())
    }

    pub fn identity_exchange(&self) -> Option<&OtpExchange> {
        self.state.as_ref().and_then(|s| s.identity_otp.as_ref())
    }

    pub fn loan_exchange(&self) -> Option<&OtpExchange> {
        self.state.as_ref().and_then(|s| s.loan_otp.as_ref())
    }

    // =========================================================================
    // CollectIdentity
    // =========================================================================

    /// Store one field edit and report contact uniqueness for the whole draft.
    ///
    /// The edit is kept even when it collides, so the form shows what was
    /// typed alongside the error.
    pub fn set_field(&mut self, field: IdentityField, value: impl Into<String>) -> Result<(), OtpError> {
        self.expect_stage(WizardStage::CollectIdentity)?;
        let state = self.state_mut()?;
        state.draft.set(field, value.into());
        state.draft.check_contacts()
    }

    /// Register the identity and send the first code.
    ///
    /// Local validation runs first; an invalid draft never reaches the network.
    pub async fn submit_identity(&mut self) -> Result<OtpChallenge, OtpError> {
        self.expect_stage(WizardStage::CollectIdentity)?;
        let draft = self.state_mut()?.draft.clone();
        draft.validate()?;

        let registered = match self.gateway.create_identity(self.route.role, &draft).await {
            Ok(registered) => registered,
            Err(e) => {
                warn!(wizard = %self.id, "Failed to register identity: {}", e);
                return Err(e);
            }
        };
        info!(wizard = %self.id, record = %registered.record_id, "identity registered");

        let command = self
            .machine
            .decide(&WizardEvent::IdentityRegistered(registered))?;
        self.execute(command).await?.ok_or(OtpError::InvalidState(
            "identity registration did not start a code exchange",
        ))
    }

    // =========================================================================
    // VerifyIdentity
    // =========================================================================

    /// Submit the identity code. On success the loan code is requested right
    /// away; a failure of that request is returned after the stage advanced.
    pub async fn submit_identity_code(&mut self, code: &str) -> Result<Submission, OtpError> {
        let exchange = self.open_exchange(WizardStage::VerifyIdentity)?;
        let submission = exchange.submit_code(code).await?;
        self.after_identity(submission).await
    }

    pub async fn enter_identity_code(&mut self, input: &str) -> Result<Option<Submission>, OtpError> {
        let exchange = self.open_exchange(WizardStage::VerifyIdentity)?;
        match exchange.enter_code(input).await? {
            Some(submission) => self.after_identity(submission).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn resend_identity_code(&mut self) -> Result<OtpChallenge, OtpError> {
        self.open_exchange(WizardStage::VerifyIdentity)?.resend().await
    }

    async fn after_identity(&mut self, submission: Submission) -> Result<Submission, OtpError> {
        let principal = match &submission {
            Submission::Verified(verification) => Some(verification.principal.clone()),
            Submission::Duplicate => None,
        };
        let Some(principal) = principal else {
            return Ok(submission);
        };
        if self.stage() != WizardStage::VerifyIdentity {
            debug!(wizard = %self.id, "identity verified after the workflow moved on");
            return Err(OtpError::Superseded);
        }

        let command = self
            .machine
            .decide(&WizardEvent::IdentityVerified(principal))?;
        self.execute(command).await?;
        Ok(submission)
    }

    // =========================================================================
    // VerifyLoanOtp
    // =========================================================================

    pub async fn submit_loan_code(&mut self, code: &str) -> Result<Submission, OtpError> {
        let exchange = self.open_exchange(WizardStage::VerifyLoanOtp)?;
        let submission = exchange.submit_code(code).await?;
        self.after_loan(submission)
    }

    pub async fn enter_loan_code(&mut self, input: &str) -> Result<Option<Submission>, OtpError> {
        let exchange = self.open_exchange(WizardStage::VerifyLoanOtp)?;
        match exchange.enter_code(input).await? {
            Some(submission) => self.after_loan(submission).map(Some),
            None => Ok(None),
        }
    }

    pub async fn resend_loan_code(&mut self) -> Result<OtpChallenge, OtpError> {
        self.open_exchange(WizardStage::VerifyLoanOtp)?.resend().await
    }

    fn after_loan(&mut self, submission: Submission) -> Result<Submission, OtpError> {
        if matches!(submission, Submission::Verified(_)) {
            self.machine.decide(&WizardEvent::LoanOtpVerified)?;
            info!(wizard = %self.id, "loan consent verified");
        }
        Ok(submission)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Capture the loan terms; accepted at any open stage.
    pub fn set_loan_terms(&mut self, terms: LoanTerms) -> Result<(), OtpError> {
        terms.validate()?;
        self.state_mut()?.terms = Some(terms);
        Ok(())
    }

    /// Submit the loan once both codes were verified.
    ///
    /// A failed submission stays in `Commit` so it can be retried without new
    /// codes. A submission whose future was dropped mid-flight stays locked,
    /// since the backend may already hold the loan.
    pub async fn commit(&mut self) -> Result<LoanReceipt, OtpError> {
        self.expect_stage(WizardStage::Commit)?;
        if !self.machine.can_commit() {
            return Err(OtpError::InvalidState("verification stages incomplete"));
        }
        let principal = self
            .machine
            .principal()
            .cloned()
            .ok_or(OtpError::InvalidState("no verified principal"))?;

        let state = self.state_mut()?;
        if state.committing {
            return Err(OtpError::InvalidState("loan submission already in flight"));
        }
        let terms = state
            .terms
            .clone()
            .ok_or_else(|| OtpError::Validation("loan terms are required".into()))?;
        let application = LoanApplication {
            principal,
            identity: state.draft.clone(),
            terms,
        };
        state.committing = true;

        info!(wizard = %self.id, principal = %application.principal.id, "submitting loan");
        let receipt = match self.gateway.commit_loan(self.route.role, &application).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(wizard = %self.id, "Failed to submit loan: {}", e);
                if let Some(state) = self.state.as_mut() {
                    state.committing = false;
                }
                return Err(e);
            }
        };

        let command = self
            .machine
            .decide(&WizardEvent::LoanCommitted(receipt.clone()))?;
        self.execute(command).await?;
        info!(wizard = %self.id, loan = %receipt.loan_id, "loan workflow completed");
        Ok(receipt)
    }

    /// Discard the workflow. Live timers stop and in-flight results are ignored.
    pub fn abandon(&mut self) {
        if self.stage().is_terminal() {
            return;
        }
        match self.machine.decide(&WizardEvent::Abandoned) {
            Ok(_) => {
                self.teardown();
                info!(wizard = %self.id, "loan workflow abandoned");
            }
            Err(e) => warn!(wizard = %self.id, "Failed to abandon workflow: {}", e),
        }
    }

    // =========================================================================
    // Command execution
    // =========================================================================

    async fn execute(
        &mut self,
        command: Option<WizardCommand>,
    ) -> Result<Option<OtpChallenge>, OtpError> {
        let Some(command) = command else {
            return Ok(None);
        };
        debug!(wizard = %self.id, ?command, "executing wizard command");

        match command {
            WizardCommand::StartIdentityOtp { identifier } => {
                let channel = IdentityChannel::new(self.gateway.clone(), self.route.role);
                let exchange = OtpExchange::new("identity", Arc::new(channel), self.settings.clone());
                self.state_mut()?.identity_otp = Some(exchange.clone());
                exchange.request_code(&identifier).await.map(Some)
            }
            WizardCommand::StartLoanOtp {
                principal,
                identifier,
            } => {
                let channel = LoanChannel::new(self.gateway.clone(), self.route.role, principal);
                let exchange = OtpExchange::new("loan", Arc::new(channel), self.settings.clone());
                self.state_mut()?.loan_otp = Some(exchange.clone());
                exchange.request_code(&identifier).await.map(Some)
            }
            WizardCommand::ClearState | WizardCommand::DisposeAll => {
                self.teardown();
                Ok(None)
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(state) = self.state.take() {
            state.dispose_exchanges();
        }
    }

    fn state_mut(&mut self) -> Result<&mut WizardState, OtpError> {
        self.state.as_mut().ok_or(OtpError::InvalidState(FINISHED))
    }

    fn expect_stage(&self, stage: WizardStage) -> Result<(), OtpError> {
        let current = self.stage();
        if current.is_terminal() {
            return Err(OtpError::InvalidState(FINISHED));
        }
        if current != stage {
            return Err(OtpError::InvalidState("action not available at this stage"));
        }
        Ok(())
    }

    fn open_exchange(&self, stage: WizardStage) -> Result<OtpExchange, OtpError> {
        self.expect_stage(stage)?;
        let exchange = match stage {
            WizardStage::VerifyIdentity => self.identity_exchange(),
            WizardStage::VerifyLoanOtp => self.loan_exchange(),
            _ => None,
        };
        exchange
            .cloned()
            .ok_or(OtpError::InvalidState("no code exchange for this stage"))
    }
}

impl Drop for LoanWizard {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for LoanWizard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoanWizard")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("stage", &self.stage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gateway::StaffRole;
    use rust_decimal::Decimal;

    use super::*;
    use crate::exchange::ExchangePhase;
    use crate::kernel::test_dependencies::{MockOriginationGateway, OriginationCall, ACCEPTED_CODE};
    use crate::wizard::ContactChannel;

    fn terms() -> LoanTerms {
        LoanTerms {
            amount: Decimal::new(250_000, 0),
            tenure_months: 24,
            interest_rate: Decimal::new(125, 1),
            purpose: Some("working capital".into()),
        }
    }

    fn wizard(gateway: Arc<MockOriginationGateway>) -> LoanWizard {
        LoanWizard::new(OriginationRoute::admin(), gateway, OtpSettings::default())
    }

    fn fill(wizard: &mut LoanWizard) {
        wizard.set_field(IdentityField::Name, "Ada Lovelace").unwrap();
        wizard.set_field(IdentityField::Email, "ada@example.com").unwrap();
        wizard.set_field(IdentityField::PrimaryMobile, "9000000000").unwrap();
    }

    async fn reach_commit(wizard: &mut LoanWizard) {
        fill(wizard);
        wizard.submit_identity().await.unwrap();
        wizard.submit_identity_code(ACCEPTED_CODE).await.unwrap();
        wizard.submit_loan_code(ACCEPTED_CODE).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_workflow_commits_once() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let mut wizard = wizard(gateway.clone());

        reach_commit(&mut wizard).await;
        assert_eq!(wizard.stage(), WizardStage::Commit);
        wizard.set_loan_terms(terms()).unwrap();

        let receipt = wizard.commit().await.unwrap();

        assert_eq!(receipt.loan_id, "loan-1");
        assert_eq!(wizard.stage(), WizardStage::Completed);
        assert!(wizard.draft().is_none());
        assert_eq!(gateway.commit_count(), 1);
        assert!(wizard.commit().await.is_err());
        assert_eq!(gateway.commit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_codes_go_to_registered_contacts() {
        let gateway = Arc::new(MockOriginationGateway::new().with_create_result(Ok(
            crate::wizard::RegisteredIdentity {
                record_id: "record-9".into(),
                email: "stored@example.com".into(),
                mobile: "9111111111".into(),
            },
        )));
        let mut wizard = wizard(gateway.clone());
        reach_commit(&mut wizard).await;

        let calls = gateway.calls();
        assert!(calls.contains(&OriginationCall::SendIdentityOtp {
            role: StaffRole::Admin,
            identifier: "stored@example.com".into(),
        }));
        assert!(calls.contains(&OriginationCall::SendLoanOtp {
            role: StaffRole::Admin,
            principal_id: "cust-1".into(),
            identifier: "9111111111".into(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_contacts_block_without_network() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let mut wizard = wizard(gateway.clone());
        fill(&mut wizard);

        let edit = wizard.set_field(IdentityField::EmergencyMobile, " 9000000000 ");
        assert!(matches!(edit, Err(OtpError::DuplicateContact { .. })));
        assert_eq!(
            wizard.draft().unwrap().emergency_mobile,
            " 9000000000 ",
            "edit is kept for display"
        );

        let submit = wizard.submit_identity().await;
        assert!(matches!(submit, Err(OtpError::DuplicateContact { .. })));
        assert_eq!(wizard.stage(), WizardStage::CollectIdentity);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure_keeps_stage() {
        let gateway = Arc::new(MockOriginationGateway::new().with_create_result(Err(
            OtpError::Remote {
                status: 409,
                message: "customer already exists".into(),
            },
        )));
        let mut wizard = wizard(gateway);
        fill(&mut wizard);

        let result = wizard.submit_identity().await;

        assert_eq!(
            result,
            Err(OtpError::Remote {
                status: 409,
                message: "customer already exists".into()
            })
        );
        assert_eq!(wizard.stage(), WizardStage::CollectIdentity);
        assert!(wizard.identity_exchange().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_identity_code_does_not_advance() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let mut wizard = wizard(gateway);
        fill(&mut wizard);
        wizard.submit_identity().await.unwrap();

        assert_eq!(
            wizard.submit_identity_code("000000").await,
            Err(OtpError::InvalidCode)
        );
        assert_eq!(wizard.stage(), WizardStage::VerifyIdentity);
        assert!(wizard.submit_loan_code(ACCEPTED_CODE).await.is_err());
        assert!(wizard.commit().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loan_send_failure_surfaces_after_advancing() {
        let gateway = Arc::new(
            MockOriginationGateway::new()
                .with_loan_send_result(Err(OtpError::Network("timeout".into()))),
        );
        let mut wizard = wizard(gateway.clone());
        fill(&mut wizard);
        wizard.submit_identity().await.unwrap();

        let result = wizard.submit_identity_code(ACCEPTED_CODE).await;

        assert!(matches!(result, Err(OtpError::Network(_))));
        assert_eq!(wizard.stage(), WizardStage::VerifyLoanOtp);
        assert_eq!(wizard.loan_exchange().unwrap().phase(), ExchangePhase::Idle);

        wizard.resend_loan_code().await.unwrap();
        wizard.submit_loan_code(ACCEPTED_CODE).await.unwrap();
        assert_eq!(wizard.stage(), WizardStage::Commit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_commit_can_be_retried_without_codes() {
        let gateway = Arc::new(
            MockOriginationGateway::new()
                .with_commit_result(Err(OtpError::Network("connection reset".into()))),
        );
        let mut wizard = wizard(gateway.clone());
        reach_commit(&mut wizard).await;
        wizard.set_loan_terms(terms()).unwrap();

        assert!(wizard.commit().await.is_err());
        assert_eq!(wizard.stage(), WizardStage::Commit);

        wizard.commit().await.unwrap();
        assert_eq!(gateway.commit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_requires_terms() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let mut wizard = wizard(gateway.clone());
        reach_commit(&mut wizard).await;

        assert!(matches!(wizard.commit().await, Err(OtpError::Validation(_))));
        assert_eq!(gateway.commit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_disposes_exchanges() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let mut wizard = wizard(gateway);
        fill(&mut wizard);
        wizard.submit_identity().await.unwrap();
        let exchange = wizard.identity_exchange().cloned().unwrap();

        wizard.abandon();

        assert_eq!(wizard.stage(), WizardStage::Abandoned);
        assert!(exchange.is_disposed());
        assert_eq!(exchange.expiry_remaining(), Duration::ZERO);
        assert!(wizard.submit_identity_code(ACCEPTED_CODE).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_abandons_workflow() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let mut wizard = wizard(gateway);
        fill(&mut wizard);
        wizard.submit_identity().await.unwrap();
        let exchange = wizard.identity_exchange().cloned().unwrap();

        drop(wizard);

        assert!(exchange.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_channel_for_both_stages() {
        let gateway = Arc::new(MockOriginationGateway::new());
        let route = OriginationRoute::employee()
            .with_channels(ContactChannel::Email, ContactChannel::Email);
        let mut wizard = LoanWizard::new(route, gateway.clone(), OtpSettings::default());
        reach_commit(&mut wizard).await;

        assert!(gateway.calls().contains(&OriginationCall::SendLoanOtp {
            role: StaffRole::Employee,
            principal_id: "cust-1".into(),
            identifier: "ada@example.com".into(),
        }));
    }
}
