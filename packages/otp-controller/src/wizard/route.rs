use gateway::StaffRole;

use super::RegisteredIdentity;

/// Which registered contact a verification stage sends its code to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactChannel {
    Email,
    Mobile,
}

impl ContactChannel {
    pub fn pick(self, identity: &RegisteredIdentity) -> &str {
        match self {
            ContactChannel::Email => identity.email.as_str(),
            ContactChannel::Mobile => identity.mobile.as_str(),
        }
    }
}

/// Role-specific endpoint family plus the channel bound to each OTP stage.
///
/// The bindings are explicit: both stages may use the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginationRoute {
    pub role: StaffRole,
    pub identity_channel: ContactChannel,
    pub loan_channel: ContactChannel,
}

impl OriginationRoute {
    /// Identity code by email, loan code by mobile.
    pub fn new(role: StaffRole) -> Self {
        Self {
            role,
            identity_channel: ContactChannel::Email,
            loan_channel: ContactChannel::Mobile,
        }
    }

    pub fn admin() -> Self {
        Self::new(StaffRole::Admin)
    }

    pub fn employee() -> Self {
        Self::new(StaffRole::Employee)
    }

    pub fn with_channels(mut self, identity: ContactChannel, loan: ContactChannel) -> Self {
        self.identity_channel = identity;
        self.loan_channel = loan;
        self
    }
}
