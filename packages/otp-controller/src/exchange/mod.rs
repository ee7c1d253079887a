//! OTP exchange unit.
//!
//! Drives one identifier/code pair to a single terminal outcome:
//!
//! ```text
//! Idle ─► Requesting ─► AwaitingCode ─► Verifying ─► Verified
//!              ▲              │  ▲           │
//!              │              │  └─InvalidCode┘
//!              └── resend ────┤
//!                             └─ expiry ─► Expired
//! ```
//!
//! # Guarantees
//!
//! - **Serialized submit**: a `submit_code` while `Verifying` is dropped, not
//!   queued. Auto-submit and a manual button can race freely.
//! - **Expiry is terminal**: once the expiry countdown passes no code reaches
//!   the gateway, and a verification result that lands afterwards is dropped.
//! - **Generation tags**: every issued challenge gets a new generation. A
//!   result tagged with an older generation never touches state.
//! - **Disposal**: `dispose` cancels both countdowns and makes every in-flight
//!   result a no-op.
//!
//! State sits behind a `std::sync::Mutex` that is never held across an
//! `.await`; each gateway result is checked against the *current* state after
//! the call returns.

mod channels;

pub use channels::{IdentityChannel, LoanChannel, LoginChannel};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::OtpSettings;
use crate::error::OtpError;
use crate::kernel::BaseOtpChannel;
use crate::timer::{Countdown, MAX_COUNTDOWN};
use crate::types::{OtpChallenge, Verification};

const TOO_MANY_ATTEMPTS: &str = "too many incorrect codes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Requesting,
    AwaitingCode,
    Verifying,
    Verified(Verification),
    Rejected(String),
    Expired,
}

impl ExchangePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangePhase::Verified(_) | ExchangePhase::Rejected(_) | ExchangePhase::Expired
        )
    }

    /// Caller-facing projection of the phase.
    pub fn outcome(&self) -> VerificationOutcome {
        match self {
            ExchangePhase::Idle | ExchangePhase::Requesting | ExchangePhase::AwaitingCode => {
                VerificationOutcome::Pending
            }
            ExchangePhase::Verifying => VerificationOutcome::Verifying,
            ExchangePhase::Verified(v) => VerificationOutcome::Verified(v.clone()),
            ExchangePhase::Rejected(reason) => VerificationOutcome::Rejected(reason.clone()),
            ExchangePhase::Expired => VerificationOutcome::Expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Pending,
    Verifying,
    Verified(Verification),
    Rejected(String),
    Expired,
}

/// What a `submit_code` call amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Verified(Verification),
    /// Another submission was already in flight; this one was dropped.
    Duplicate,
}

struct ExchangeState {
    phase: ExchangePhase,
    generation: u64,
    identifier: Option<String>,
    challenge: Option<OtpChallenge>,
    disposed: bool,
}

struct Shared {
    purpose: &'static str,
    channel: Arc<dyn BaseOtpChannel>,
    settings: OtpSettings,
    state: Mutex<ExchangeState>,
    resend: Countdown,
    expiry: Countdown,
    phase_tx: watch::Sender<ExchangePhase>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut ExchangeState, phase: ExchangePhase) {
        debug!(
            purpose = self.purpose,
            generation = state.generation,
            from = ?state.phase,
            to = ?phase,
            "exchange transition"
        );
        state.phase = phase.clone();
        self.phase_tx.send_replace(phase);
    }

    fn start_resend_cooldown(&self, duration: Duration) {
        let purpose = self.purpose;
        self.resend.start(duration, move || {
            debug!(purpose, "resend available");
        });
    }

    fn start_expiry(self: &Arc<Self>, duration: Duration, generation: u64) {
        let weak = Arc::downgrade(self);
        self.expiry
            .start(duration, move || Shared::on_expiry(weak, generation));
    }

    /// Put the phase back after a send that produced no new challenge. A
    /// challenge whose expiry passed while the send was in flight is dead.
    fn restore_after_failed_send(&self, state: &mut ExchangeState, previous: ExchangePhase) {
        let phase = if previous == ExchangePhase::AwaitingCode && self.expiry.has_elapsed() {
            info!(
                purpose = self.purpose,
                generation = state.generation,
                "verification code expired during resend"
            );
            ExchangePhase::Expired
        } else {
            previous
        };
        self.transition(state, phase);
    }

    fn on_expiry(weak: Weak<Self>, generation: u64) {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let mut state = shared.lock();
        if state.disposed || state.generation != generation {
            return;
        }
        if matches!(
            state.phase,
            ExchangePhase::AwaitingCode | ExchangePhase::Verifying
        ) {
            info!(purpose = shared.purpose, generation, "verification code expired");
            shared.transition(&mut state, ExchangePhase::Expired);
        }
    }
}

/// One OTP exchange. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct OtpExchange {
    shared: Arc<Shared>,
}

impl OtpExchange {
    pub fn new(
        purpose: &'static str,
        channel: Arc<dyn BaseOtpChannel>,
        settings: OtpSettings,
    ) -> Self {
        let (phase_tx, _) = watch::channel(ExchangePhase::Idle);
        Self {
            shared: Arc::new(Shared {
                purpose,
                channel,
                settings,
                state: Mutex::new(ExchangeState {
                    phase: ExchangePhase::Idle,
                    generation: 0,
                    identifier: None,
                    challenge: None,
                    disposed: false,
                }),
                resend: Countdown::new("resend-cooldown"),
                expiry: Countdown::new("otp-expiry"),
                phase_tx,
            }),
        }
    }

    /// Ask the gateway to send a code to `identifier`.
    ///
    /// Fails locally with `RateLimited` while the resend cooldown runs or
    /// while an earlier request is still in flight.
    pub async fn request_code(&self, identifier: &str) -> Result<OtpChallenge, OtpError> {
        let shared = &self.shared;
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(OtpError::Validation("an email or phone number is required".into()));
        }

        let previous = {
            let mut state = shared.lock();
            if state.disposed {
                return Err(OtpError::Disposed);
            }
            match state.phase {
                ExchangePhase::Requesting => {
                    return Err(OtpError::RateLimited {
                        retry_after: shared.settings.resend_cooldown,
                    })
                }
                ExchangePhase::Verifying => {
                    return Err(OtpError::InvalidState("a code is being verified"))
                }
                ExchangePhase::Verified(_) => {
                    return Err(OtpError::InvalidState("already verified"))
                }
                _ => {}
            }
            if shared.resend.is_running() {
                return Err(OtpError::RateLimited {
                    retry_after: shared.resend.remaining(),
                });
            }

            state.identifier = Some(identifier.to_string());
            let previous = state.phase.clone();
            shared.transition(&mut state, ExchangePhase::Requesting);
            previous
        };

        info!(purpose = shared.purpose, identifier, "requesting verification code");
        let result = shared.channel.send(identifier).await;

        let mut state = shared.lock();
        if state.disposed || state.phase != ExchangePhase::Requesting {
            debug!(purpose = shared.purpose, "discarding send result for disposed exchange");
            return Err(OtpError::Disposed);
        }

        match result {
            Ok(dispatch) => {
                state.generation += 1;
                let generation = state.generation;
                let expiry = dispatch
                    .expires_in
                    .unwrap_or(shared.settings.expiry)
                    .min(MAX_COUNTDOWN);
                let challenge = OtpChallenge::issue(
                    identifier.to_string(),
                    expiry,
                    shared.settings.resend_cooldown,
                    generation,
                );

                state.challenge = Some(challenge.clone());
                shared.start_resend_cooldown(shared.settings.resend_cooldown);
                shared.start_expiry(expiry, generation);
                shared.transition(&mut state, ExchangePhase::AwaitingCode);

                info!(
                    purpose = shared.purpose,
                    generation,
                    expires_in = expiry.as_secs(),
                    "verification code sent"
                );
                Ok(challenge)
            }
            Err(OtpError::RateLimited { retry_after }) => {
                let retry_after = retry_after.min(MAX_COUNTDOWN);
                warn!(
                    purpose = shared.purpose,
                    retry_after = retry_after.as_secs(),
                    "code request rate limited"
                );
                shared.start_resend_cooldown(retry_after);
                shared.restore_after_failed_send(&mut state, previous);
                Err(OtpError::RateLimited { retry_after })
            }
            Err(e) => {
                warn!(purpose = shared.purpose, "Failed to request code: {}", e);
                shared.restore_after_failed_send(&mut state, previous);
                Err(e)
            }
        }
    }

    /// Submit a code for the live challenge.
    pub async fn submit_code(&self, code: &str) -> Result<Submission, OtpError> {
        let shared = &self.shared;
        let code = code.trim();
        if code.is_empty() {
            return Err(OtpError::Validation("enter the verification code".into()));
        }

        let (identifier, generation) = {
            let mut state = shared.lock();
            if state.disposed {
                return Err(OtpError::Disposed);
            }
            match &state.phase {
                ExchangePhase::Verifying => {
                    debug!(purpose = shared.purpose, "submission already in flight, dropping");
                    return Ok(Submission::Duplicate);
                }
                ExchangePhase::Expired => return Err(OtpError::Expired),
                ExchangePhase::Rejected(reason) => return Err(OtpError::Rejected(reason.clone())),
                ExchangePhase::Verified(_) => {
                    return Err(OtpError::InvalidState("code already verified"))
                }
                ExchangePhase::Idle | ExchangePhase::Requesting => {
                    return Err(OtpError::InvalidState("no code has been sent"))
                }
                ExchangePhase::AwaitingCode => {}
            }

            if shared.expiry.has_elapsed() {
                info!(purpose = shared.purpose, "code submitted after expiry");
                shared.transition(&mut state, ExchangePhase::Expired);
                return Err(OtpError::Expired);
            }

            let Some(identifier) = state.identifier.clone() else {
                return Err(OtpError::InvalidState("no code has been sent"));
            };
            shared.transition(&mut state, ExchangePhase::Verifying);
            (identifier, state.generation)
        };

        let result = shared.channel.verify(&identifier, code).await;

        let mut state = shared.lock();
        if state.disposed {
            debug!(purpose = shared.purpose, "discarding verification for disposed exchange");
            return Err(OtpError::Disposed);
        }
        if state.generation != generation {
            debug!(
                purpose = shared.purpose,
                stale = generation,
                current = state.generation,
                "discarding stale verification result"
            );
            return Err(OtpError::Superseded);
        }
        if state.phase != ExchangePhase::Verifying {
            debug!(
                purpose = shared.purpose,
                phase = ?state.phase,
                "discarding verification result that arrived late"
            );
            return Err(match state.phase {
                ExchangePhase::Expired => OtpError::Expired,
                _ => OtpError::Superseded,
            });
        }

        match result {
            Ok(verification) => {
                shared.resend.cancel();
                shared.expiry.cancel();
                info!(
                    purpose = shared.purpose,
                    principal = %verification.principal.id,
                    "code verified"
                );
                shared.transition(&mut state, ExchangePhase::Verified(verification.clone()));
                Ok(Submission::Verified(verification))
            }
            Err(OtpError::InvalidCode) => {
                let attempts = match state.challenge.as_mut() {
                    Some(challenge) => {
                        challenge.attempts_consumed += 1;
                        challenge.attempts_consumed
                    }
                    None => 1,
                };

                if attempts >= shared.settings.max_attempts {
                    warn!(purpose = shared.purpose, attempts, "too many incorrect codes");
                    shared.expiry.cancel();
                    shared.transition(
                        &mut state,
                        ExchangePhase::Rejected(TOO_MANY_ATTEMPTS.to_string()),
                    );
                    return Err(OtpError::Rejected(TOO_MANY_ATTEMPTS.to_string()));
                }

                debug!(purpose = shared.purpose, attempts, "incorrect code");
                shared.transition(&mut state, ExchangePhase::AwaitingCode);
                Err(OtpError::InvalidCode)
            }
            Err(OtpError::Expired) => {
                shared.expiry.cancel();
                shared.transition(&mut state, ExchangePhase::Expired);
                Err(OtpError::Expired)
            }
            Err(e) => {
                warn!(purpose = shared.purpose, "Verification failed: {}", e);
                shared.transition(&mut state, ExchangePhase::AwaitingCode);
                Err(e)
            }
        }
    }

    /// Feed the current contents of the code field.
    ///
    /// Submits automatically once the input reaches the configured length;
    /// returns `Ok(None)` while the code is incomplete.
    pub async fn enter_code(&self, input: &str) -> Result<Option<Submission>, OtpError> {
        let code = input.trim();
        if code.chars().count() != self.shared.settings.code_length {
            return Ok(None);
        }
        self.submit_code(code).await.map(Some)
    }

    /// Request a fresh code for the same identifier once the cooldown is over.
    pub async fn resend(&self) -> Result<OtpChallenge, OtpError> {
        let identifier = {
            let state = self.shared.lock();
            if state.disposed {
                return Err(OtpError::Disposed);
            }
            state
                .identifier
                .clone()
                .ok_or(OtpError::InvalidState("no code has been requested yet"))?
        };

        if self.shared.resend.is_running() {
            return Err(OtpError::RateLimited {
                retry_after: self.shared.resend.remaining(),
            });
        }

        info!(purpose = self.shared.purpose, "resending verification code");
        self.request_code(&identifier).await
    }

    /// Cancel both countdowns and ignore any result still in flight.
    pub fn dispose(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.generation += 1;
        state.challenge = None;
        shared.resend.cancel();
        shared.expiry.cancel();
        shared.transition(&mut state, ExchangePhase::Idle);
        debug!(purpose = shared.purpose, "exchange disposed");
    }

    pub fn phase(&self) -> ExchangePhase {
        self.shared.lock().phase.clone()
    }

    pub fn outcome(&self) -> VerificationOutcome {
        self.phase().outcome()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExchangePhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn challenge(&self) -> Option<OtpChallenge> {
        self.shared.lock().challenge.clone()
    }

    pub fn identifier(&self) -> Option<String> {
        self.shared.lock().identifier.clone()
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    pub fn can_resend(&self) -> bool {
        let state = self.shared.lock();
        !state.disposed
            && state.identifier.is_some()
            && !matches!(
                state.phase,
                ExchangePhase::Requesting | ExchangePhase::Verifying | ExchangePhase::Verified(_)
            )
            && !self.shared.resend.is_running()
    }

    pub fn resend_remaining(&self) -> Duration {
        self.shared.resend.remaining()
    }

    pub fn expiry_remaining(&self) -> Duration {
        self.shared.expiry.remaining()
    }

    pub fn purpose(&self) -> &'static str {
        self.shared.purpose
    }
}

impl std::fmt::Debug for OtpExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("OtpExchange")
            .field("purpose", &self.shared.purpose)
            .field("phase", &state.phase)
            .field("generation", &state.generation)
            .field("disposed", &state.disposed)
            .finish()
    }
}
