// OTP & Session Lifecycle Controller
//
// Client-side controller for one-time-password flows: staff login, the
// three-stage loan origination wizard, and background session revalidation.
// All network access goes through the kernel traits; the `gateway` crate
// provides the HTTP binding.

pub mod config;
pub mod error;
pub mod exchange;
pub mod kernel;
pub mod login;
pub mod session;
pub mod telemetry;
pub mod timer;
pub mod types;
pub mod validation;
pub mod wizard;

pub use config::{ControllerConfig, OtpSettings, SessionSettings};
pub use error::OtpError;
pub use exchange::{ExchangePhase, OtpExchange, Submission, VerificationOutcome};
pub use kernel::ControllerDeps;
pub use login::LoginFlow;
pub use session::{LogoutReason, Session, SessionEvent, SessionManager};
pub use types::{OtpChallenge, OtpDispatch, Principal, Verification};
pub use wizard::{LoanWizard, OriginationRoute, WizardStage};
