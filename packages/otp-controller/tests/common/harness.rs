//! Test harness wiring the controller to scripted gateways.
//!
//! Every harness runs on a paused tokio clock, so countdowns and the
//! revalidation loop advance only when a test sleeps.

use std::sync::Arc;
use std::time::Duration;

use otp_controller::kernel::test_dependencies::{
    MockOriginationGateway, MockVerificationGateway, ACCEPTED_CODE,
};
use otp_controller::session::MemorySessionStore;
use otp_controller::{ControllerDeps, OtpSettings, Session, SessionManager};
use test_context::AsyncTestContext;

pub const STAFF_EMAIL: &str = "staff@example.com";
pub const REVALIDATE_EVERY: Duration = Duration::from_secs(300);

pub struct TestHarness {
    pub verification: Arc<MockVerificationGateway>,
    pub origination: Arc<MockOriginationGateway>,
    pub store: Arc<MemorySessionStore>,
    pub deps: ControllerDeps,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        tokio::time::pause();
        Self::new()
    }

    async fn teardown(self) {
        self.deps.sessions.logout(otp_controller::LogoutReason::UserRequested);
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_gateways(MockVerificationGateway::new(), MockOriginationGateway::new())
    }

    pub fn with_gateways(
        verification: MockVerificationGateway,
        origination: MockOriginationGateway,
    ) -> Self {
        let verification = Arc::new(verification);
        let origination = Arc::new(origination);
        let store = Arc::new(MemorySessionStore::new());
        let sessions = SessionManager::new(verification.clone(), store.clone(), REVALIDATE_EVERY);

        let deps = ControllerDeps::new(
            verification.clone(),
            origination.clone(),
            sessions,
            OtpSettings::default(),
        );

        Self {
            verification,
            origination,
            store,
            deps,
        }
    }

    /// Swap the scripted gateways, keeping the paused clock.
    pub fn replace_gateways(
        &mut self,
        verification: MockVerificationGateway,
        origination: MockOriginationGateway,
    ) {
        *self = Self::with_gateways(verification, origination);
    }

    /// Walk the login flow with the accepted code.
    pub async fn sign_in(&self) -> Session {
        let login = self.deps.login_flow();
        login
            .request_code(STAFF_EMAIL)
            .await
            .expect("code request failed");
        login
            .enter_code(ACCEPTED_CODE)
            .await
            .expect("verification failed")
            .expect("login produced no session")
    }
}
