//! Value types passed between the exchange unit, the wizard and the session
//! manager.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The verified identity returned by the gateway after a matching code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[serde(rename = "_id")]
    pub id: String,
    pub role: String,
    #[serde(rename = "email")]
    pub identifier: String,
    #[serde(rename = "name", default)]
    pub display_name: Option<String>,
}

/// Result of a successful `verify_otp`.
///
/// Login verifications carry a session token; loan-stage ones do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub principal: Principal,
    pub token: Option<String>,
}

impl Verification {
    pub fn without_token(principal: Principal) -> Self {
        Self {
            principal,
            token: None,
        }
    }
}

/// Gateway acknowledgement of a sent code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpDispatch {
    /// Server-side validity window, when the backend reports one.
    pub expires_in: Option<Duration>,
}

/// The live challenge of one exchange unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub identifier: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
    pub attempts_consumed: u32,
    pub generation: u64,
}

impl OtpChallenge {
    pub(crate) fn issue(
        identifier: String,
        expiry: Duration,
        cooldown: Duration,
        generation: u64,
    ) -> Self {
        let issued_at = Utc::now();
        Self {
            identifier,
            issued_at,
            expires_at: issued_at + to_chrono(expiry),
            resend_available_at: issued_at + to_chrono(cooldown),
            attempts_consumed: 0,
            generation,
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
