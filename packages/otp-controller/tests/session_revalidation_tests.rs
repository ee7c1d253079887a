//! Integration tests for the session lifecycle.
//!
//! Tests:
//! - Background revalidation logging out a revoked session
//! - Network failures during revalidation keeping the session
//! - Restoring a persisted session across manager instances

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestHarness, REVALIDATE_EVERY};
use gateway::SessionCheck;
use otp_controller::kernel::test_dependencies::{MockVerificationGateway, ACCEPTED_CODE};
use otp_controller::session::FileSessionStore;
use otp_controller::{LoginFlow, LogoutReason, OtpSettings, Session, SessionEvent, SessionManager};
use test_context::test_context;
use tokio::time::sleep;

const TICK: Duration = Duration::from_secs(1);

// ============================================================================
// Background Revalidation
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn revoked_session_logs_out_and_stops_checking(ctx: &mut TestHarness) {
    ctx.sign_in().await;
    let mut session = ctx.deps.sessions.subscribe();
    let mut events = ctx.deps.sessions.events();
    ctx.verification.push_session_check(SessionCheck::Valid);
    ctx.verification.push_session_check(SessionCheck::Invalid);

    sleep(REVALIDATE_EVERY + TICK).await;
    assert!(ctx.deps.sessions.is_authenticated());

    sleep(REVALIDATE_EVERY).await;
    assert!(!ctx.deps.sessions.is_authenticated());
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::SignedOut {
            reason: LogoutReason::Revoked
        }
    );
    assert!(session.has_changed().unwrap());
    assert_eq!(*session.borrow_and_update(), Session::signed_out());

    sleep(REVALIDATE_EVERY * 5).await;
    assert_eq!(ctx.verification.validate_count(), 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unreachable_backend_does_not_log_out(ctx: &mut TestHarness) {
    ctx.sign_in().await;
    for _ in 0..3 {
        ctx.verification.push_session_check(SessionCheck::Unreachable);
    }

    sleep(REVALIDATE_EVERY * 3 + TICK).await;

    assert_eq!(ctx.verification.validate_count(), 3);
    assert!(ctx.deps.sessions.is_authenticated());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn explicit_logout_stops_revalidation(ctx: &mut TestHarness) {
    ctx.sign_in().await;
    sleep(REVALIDATE_EVERY + TICK).await;
    assert_eq!(ctx.verification.validate_count(), 1);

    assert!(ctx.deps.sessions.logout(LogoutReason::UserRequested));
    sleep(REVALIDATE_EVERY * 4).await;

    assert_eq!(ctx.verification.validate_count(), 1);
}

// ============================================================================
// Restoration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn persisted_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MockVerificationGateway::new().with_token("t-restart"));

    let first = SessionManager::new(
        gateway.clone(),
        Arc::new(FileSessionStore::new(dir.path())),
        REVALIDATE_EVERY,
    );
    let login = LoginFlow::new(gateway.clone(), first.clone(), OtpSettings::default());
    login.request_code("staff@example.com").await.unwrap();
    login.submit_code(ACCEPTED_CODE).await.unwrap();
    drop(login);
    drop(first);

    let second = SessionManager::new(
        gateway.clone(),
        Arc::new(FileSessionStore::new(dir.path())),
        REVALIDATE_EVERY,
    );
    let restored = second.restore();

    assert!(restored.is_authenticated);
    assert_eq!(restored.token(), Some("t-restart"));

    sleep(REVALIDATE_EVERY + TICK).await;
    assert_eq!(gateway.validate_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn corrupt_session_file_starts_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("auth.json"), "{\"token\": 42").unwrap();
    let gateway = Arc::new(MockVerificationGateway::new());

    let sessions = SessionManager::new(
        gateway.clone(),
        Arc::new(FileSessionStore::new(dir.path())),
        REVALIDATE_EVERY,
    );

    assert_eq!(sessions.restore(), Session::signed_out());
    sleep(REVALIDATE_EVERY * 2).await;
    assert_eq!(gateway.validate_count(), 0);
}
