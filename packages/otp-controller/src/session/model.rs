use serde::{Deserialize, Serialize};

use crate::error::OtpError;
use crate::types::{Principal, Verification};

/// The authenticated session, or its signed-out placeholder.
///
/// Serialized as the persisted `{ user, token, isAuthenticated }` record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "user", default)]
    pub principal: Option<Principal>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Only a verified login carrying a token can become a session.
    pub fn from_verification(verification: Verification) -> Result<Self, OtpError> {
        let token = verification
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or(OtpError::InvalidState("login verification carried no session token"))?;

        Ok(Self {
            principal: Some(verification.principal),
            token: Some(token),
            is_authenticated: true,
        })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// A record claiming authentication must carry both a token and a user.
    pub fn is_consistent(&self) -> bool {
        !self.is_authenticated || (self.token.is_some() && self.principal.is_some())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    /// The backend no longer accepts the token.
    Revoked,
    /// A gateway call reported the session as expired.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Principal),
    SignedOut { reason: LogoutReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            id: "user-1".into(),
            role: "admin".into(),
            identifier: "user@example.com".into(),
            display_name: Some("Ops".into()),
        }
    }

    #[test]
    fn test_session_requires_token() {
        let result = Session::from_verification(Verification::without_token(principal()));
        assert!(matches!(result, Err(OtpError::InvalidState(_))));
    }

    #[test]
    fn test_persisted_record_shape() {
        let session = Session::from_verification(Verification {
            principal: principal(),
            token: Some("t1".into()),
        })
        .unwrap();

        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json["token"], "t1");
        assert_eq!(json["isAuthenticated"], true);
        assert_eq!(json["user"]["_id"], "user-1");
        assert_eq!(json["user"]["email"], "user@example.com");
    }

    #[test]
    fn test_authenticated_record_without_token_is_inconsistent() {
        let record: Session =
            serde_json::from_str(r#"{"user":null,"token":null,"isAuthenticated":true}"#).unwrap();
        assert!(!record.is_consistent());
        assert!(Session::signed_out().is_consistent());
    }
}
