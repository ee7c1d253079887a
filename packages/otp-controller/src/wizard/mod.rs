//! Loan origination: identity → identity code → loan code → commit.
//!
//! [`StageMachine`] decides, [`LoanWizard`] executes. One wizard serves both
//! staff roles; the [`OriginationRoute`] picks endpoints and contact channels.

mod draft;
pub mod machine;
mod orchestrator;
mod route;

pub use draft::{
    IdentityDraft, IdentityField, LoanApplication, LoanReceipt, LoanTerms, RegisteredIdentity,
};
pub use machine::{StageMachine, WizardCommand, WizardEvent, WizardStage};
pub use orchestrator::LoanWizard;
pub use route::{ContactChannel, OriginationRoute};
