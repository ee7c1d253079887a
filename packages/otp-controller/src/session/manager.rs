//! Session lifecycle manager.
//!
//! Sole writer of the [`Session`]. Readers subscribe to a `watch` channel for
//! the current value and to a `broadcast` channel for sign-in/sign-out events.
//!
//! While authenticated a background task asks the gateway every interval
//! whether the token is still accepted. The task is tagged with an epoch;
//! logout and re-login bump it, so at most one loop ever acts on the session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use gateway::SessionCheck;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::model::{LogoutReason, Session, SessionEvent};
use super::store::STORAGE_KEY;
use crate::error::OtpError;
use crate::kernel::{BaseSessionStore, BaseVerificationGateway};
use crate::types::Verification;

const EVENT_CAPACITY: usize = 16;

struct Revalidation {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    gateway: Arc<dyn BaseVerificationGateway>,
    store: Arc<dyn BaseSessionStore>,
    interval: Duration,
    session_tx: watch::Sender<Session>,
    events_tx: broadcast::Sender<SessionEvent>,
    revalidation: Mutex<Revalidation>,
}

impl Shared {
    fn revalidation(&self) -> MutexGuard<'_, Revalidation> {
        self.revalidation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, session: &Session) {
        let result = serde_json::to_string(session)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.save(STORAGE_KEY, &raw));
        if let Err(e) = result {
            error!("Failed to persist session: {:#}", e);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Start a fresh loop for `token`, replacing any previous one.
    fn start_revalidation(self: &Arc<Self>, token: String) {
        let mut revalidation = self.revalidation();
        revalidation.epoch += 1;
        let epoch = revalidation.epoch;
        if let Some(previous) = revalidation.task.take() {
            previous.abort();
        }

        let weak = Arc::downgrade(self);
        let period = self.interval;
        revalidation.task = Some(tokio::spawn(Self::revalidate_loop(weak, token, period, epoch)));
        debug!(epoch, interval_secs = period.as_secs(), "session revalidation started");
    }

    async fn revalidate_loop(weak: Weak<Self>, token: String, period: Duration, epoch: u64) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let gateway = match weak.upgrade() {
                Some(shared) if shared.is_current(epoch) => shared.gateway.clone(),
                _ => return,
            };
            let check = gateway.validate_session(&token).await;

            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.is_current(epoch) {
                debug!(epoch, "discarding revalidation result for a replaced session");
                return;
            }

            match check {
                SessionCheck::Valid => debug!(epoch, "session still valid"),
                SessionCheck::Unreachable => {
                    warn!(epoch, "session check unreachable, retrying next interval")
                }
                SessionCheck::Invalid => {
                    info!(epoch, "session rejected by backend");
                    shared.sign_out(LogoutReason::Revoked, Some(epoch));
                    return;
                }
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.revalidation().epoch == epoch
    }

    /// End the session. `from_loop` carries the epoch of the loop asking, which
    /// must still be current and is not aborted from under itself.
    fn sign_out(&self, reason: LogoutReason, from_loop: Option<u64>) -> bool {
        let task = {
            let mut revalidation = self.revalidation();
            if let Some(epoch) = from_loop {
                if revalidation.epoch != epoch {
                    return false;
                }
            }
            revalidation.epoch += 1;
            revalidation.task.take()
        };
        if from_loop.is_none() {
            if let Some(task) = task {
                task.abort();
            }
        }

        let was_signed_in = self.session_tx.send_if_modified(|session| {
            if !session.is_authenticated {
                return false;
            }
            *session = Session::signed_out();
            true
        });
        if !was_signed_in {
            return false;
        }

        self.persist(&Session::signed_out());
        info!(?reason, "signed out");
        self.emit(SessionEvent::SignedOut { reason });
        true
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let revalidation = self
            .revalidation
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = revalidation.task.take() {
            task.abort();
        }
    }
}

/// Owns the authenticated session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<dyn BaseVerificationGateway>,
        store: Arc<dyn BaseSessionStore>,
        revalidate_interval: Duration,
    ) -> Self {
        let (session_tx, _) = watch::channel(Session::signed_out());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                gateway,
                store,
                interval: revalidate_interval,
                session_tx,
                events_tx,
                revalidation: Mutex::new(Revalidation {
                    epoch: 0,
                    task: None,
                }),
            }),
        }
    }

    /// Load the persisted record. Anything unreadable counts as signed out.
    pub fn restore(&self) -> Session {
        let shared = &self.shared;
        let restored = match shared.store.load(STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) if session.is_consistent() => session,
                Ok(_) => {
                    warn!("Persisted session is incomplete, starting signed out");
                    Session::signed_out()
                }
                Err(e) => {
                    warn!("Persisted session is malformed, starting signed out: {}", e);
                    Session::signed_out()
                }
            },
            Ok(None) => Session::signed_out(),
            Err(e) => {
                warn!("Failed to load persisted session: {:#}", e);
                Session::signed_out()
            }
        };

        shared.session_tx.send_replace(restored.clone());
        match restored.token() {
            Some(token) if restored.is_authenticated => {
                info!("session restored");
                shared.start_revalidation(token.to_string());
            }
            _ => debug!("no session to restore"),
        }
        restored
    }

    /// Turn a verified login into the current session.
    pub fn login(&self, verification: Verification) -> Result<Session, OtpError> {
        let session = Session::from_verification(verification)?;
        let shared = &self.shared;

        shared.persist(&session);
        shared.session_tx.send_replace(session.clone());
        if let Some(token) = session.token() {
            shared.start_revalidation(token.to_string());
        }

        if let Some(principal) = session.principal.clone() {
            info!(principal = %principal.id, role = %principal.role, "signed in");
            shared.emit(SessionEvent::SignedIn(principal));
        }
        Ok(session)
    }

    /// Clear the session. Returns `false` when nobody was signed in.
    pub fn logout(&self, reason: LogoutReason) -> bool {
        self.shared.sign_out(reason, None)
    }

    pub fn current(&self) -> Session {
        self.shared.session_tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.session_tx.borrow().is_authenticated
    }

    pub fn token(&self) -> Option<String> {
        self.shared.session_tx.borrow().token.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.shared.session_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn revalidate_interval(&self) -> Duration {
        self.shared.interval
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("authenticated", &self.is_authenticated())
            .field("interval", &self.shared.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;
    use crate::kernel::test_dependencies::MockVerificationGateway;
    use crate::session::MemorySessionStore;
    use crate::types::Principal;

    const INTERVAL: Duration = Duration::from_secs(300);

    fn verification(token: &str) -> Verification {
        Verification {
            principal: Principal {
                id: "user-1".into(),
                role: "admin".into(),
                identifier: "user@example.com".into(),
                display_name: None,
            },
            token: Some(token.into()),
        }
    }

    fn manager(
        gateway: Arc<MockVerificationGateway>,
        store: Arc<MemorySessionStore>,
    ) -> SessionManager {
        SessionManager::new(gateway, store, INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_persists_and_emits() {
        let gateway = Arc::new(MockVerificationGateway::new());
        let store = Arc::new(MemorySessionStore::new());
        let sessions = manager(gateway, store.clone());
        let mut events = sessions.events();

        let session = sessions.login(verification("t1")).unwrap();

        assert!(session.is_authenticated);
        assert_eq!(sessions.token().as_deref(), Some("t1"));
        let raw = store.get(STORAGE_KEY).unwrap();
        assert!(raw.contains("\"isAuthenticated\":true"));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedIn(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_without_token_is_refused() {
        let gateway = Arc::new(MockVerificationGateway::new());
        let store = Arc::new(MemorySessionStore::new());
        let sessions = manager(gateway, store.clone());

        let mut no_token = verification("t1");
        no_token.token = None;

        assert!(sessions.login(no_token).is_err());
        assert!(!sessions.is_authenticated());
        assert!(store.get(STORAGE_KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_is_idempotent() {
        let gateway = Arc::new(MockVerificationGateway::new());
        let store = Arc::new(MemorySessionStore::new());
        let sessions = manager(gateway, store.clone());
        sessions.login(verification("t1")).unwrap();
        let mut events = sessions.events();

        assert!(sessions.logout(LogoutReason::UserRequested));
        assert!(!sessions.logout(LogoutReason::UserRequested));

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SignedOut {
                reason: LogoutReason::UserRequested
            }
        );
        assert!(events.try_recv().is_err());
        let persisted: Session = serde_json::from_str(&store.get(STORAGE_KEY).unwrap()).unwrap();
        assert_eq!(persisted, Session::signed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_check_keeps_session() {
        let gateway = Arc::new(
            MockVerificationGateway::new()
                .with_session_checks([SessionCheck::Unreachable, SessionCheck::Valid]),
        );
        let store = Arc::new(MemorySessionStore::new());
        let sessions = manager(gateway.clone(), store);
        sessions.login(verification("t1")).unwrap();

        sleep(INTERVAL * 2 + Duration::from_secs(1)).await;

        assert_eq!(gateway.validate_count(), 2);
        assert!(sessions.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_check_revokes_and_stops_loop() {
        let gateway = Arc::new(
            MockVerificationGateway::new().with_session_checks([SessionCheck::Invalid]),
        );
        let store = Arc::new(MemorySessionStore::new());
        let sessions = manager(gateway.clone(), store);
        let mut events = sessions.events();
        sessions.login(verification("t1")).unwrap();
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedIn(_)));

        sleep(INTERVAL + Duration::from_secs(1)).await;

        assert!(!sessions.is_authenticated());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SignedOut {
                reason: LogoutReason::Revoked
            }
        );

        sleep(INTERVAL * 3).await;
        assert_eq!(gateway.validate_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_replaces_loop() {
        let gateway = Arc::new(MockVerificationGateway::new());
        let store = Arc::new(MemorySessionStore::new());
        let sessions = manager(gateway.clone(), store);

        sessions.login(verification("t1")).unwrap();
        sleep(Duration::from_secs(200)).await;
        sessions.login(verification("t2")).unwrap();
        sleep(Duration::from_secs(200)).await;

        // The first loop would have ticked at 300s.
        assert_eq!(gateway.validate_count(), 0);

        sleep(Duration::from_secs(101)).await;
        assert_eq!(
            gateway.calls(),
            vec![crate::kernel::test_dependencies::GatewayCall::ValidateSession {
                token: "t2".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_treats_garbage_as_signed_out() {
        let gateway = Arc::new(MockVerificationGateway::new());
        let store = Arc::new(MemorySessionStore::new().with_value(STORAGE_KEY, "{not json"));
        let sessions = manager(gateway.clone(), store);

        let restored = sessions.restore();

        assert_eq!(restored, Session::signed_out());
        sleep(INTERVAL * 2).await;
        assert_eq!(gateway.validate_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_revalidation() {
        let gateway = Arc::new(MockVerificationGateway::new());
        let record = serde_json::to_string(&Session::from_verification(verification("t9")).unwrap())
            .unwrap();
        let store = Arc::new(MemorySessionStore::new().with_value(STORAGE_KEY, &record));
        let sessions = manager(gateway.clone(), store);

        let restored = sessions.restore();

        assert!(restored.is_authenticated);
        assert_eq!(sessions.subscribe().borrow().token(), Some("t9"));
        sleep(INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(gateway.validate_count(), 1);
    }
}
