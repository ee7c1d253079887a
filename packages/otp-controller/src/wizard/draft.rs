//! Stage-scoped data carried by the loan wizard.

use rust_decimal::Decimal;

use crate::error::OtpError;
use crate::types::Principal;
use crate::validation::{ensure_unique_contacts, ContactRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    Name,
    Email,
    PrimaryMobile,
    SecondaryMobile,
    EmergencyMobile,
    Address,
}

/// Customer identity as typed by the operator, before registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityDraft {
    pub name: String,
    pub email: String,
    pub primary_mobile: String,
    pub secondary_mobile: String,
    pub emergency_mobile: String,
    pub address: String,
}

impl IdentityDraft {
    pub fn set(&mut self, field: IdentityField, value: String) {
        let slot = match field {
            IdentityField::Name => &mut self.name,
            IdentityField::Email => &mut self.email,
            IdentityField::PrimaryMobile => &mut self.primary_mobile,
            IdentityField::SecondaryMobile => &mut self.secondary_mobile,
            IdentityField::EmergencyMobile => &mut self.emergency_mobile,
            IdentityField::Address => &mut self.address,
        };
        *slot = value;
    }

    pub fn contacts(&self) -> [(ContactRole, &str); 3] {
        [
            (ContactRole::PrimaryMobile, self.primary_mobile.as_str()),
            (ContactRole::SecondaryMobile, self.secondary_mobile.as_str()),
            (ContactRole::EmergencyMobile, self.emergency_mobile.as_str()),
        ]
    }

    /// Uniqueness check only; used for live feedback while typing.
    pub fn check_contacts(&self) -> Result<(), OtpError> {
        ensure_unique_contacts(self.contacts())
    }

    /// Everything that must hold before the draft leaves the device.
    pub fn validate(&self) -> Result<(), OtpError> {
        let required = [
            ("name", &self.name),
            ("email", &self.email),
            ("primary mobile", &self.primary_mobile),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(OtpError::Validation(format!("{label} is required")));
            }
        }
        self.check_contacts()
    }
}

/// Identity as stored by the backend after enrollment.
///
/// OTP stages address these values, never the draft, so a typo corrected in
/// the form after submission cannot redirect a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredIdentity {
    pub record_id: String,
    pub email: String,
    pub mobile: String,
}

/// Opaque loan terms; the calculation service owns interest math.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanTerms {
    pub amount: Decimal,
    pub tenure_months: u32,
    pub interest_rate: Decimal,
    pub purpose: Option<String>,
}

impl LoanTerms {
    pub fn validate(&self) -> Result<(), OtpError> {
        if self.amount <= Decimal::ZERO {
            return Err(OtpError::Validation("loan amount must be positive".into()));
        }
        if self.tenure_months == 0 {
            return Err(OtpError::Validation("tenure must be at least one month".into()));
        }
        if self.interest_rate < Decimal::ZERO {
            return Err(OtpError::Validation("interest rate cannot be negative".into()));
        }
        Ok(())
    }
}

/// The payload submitted once at the commit stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanApplication {
    pub principal: Principal,
    pub identity: IdentityDraft,
    pub terms: LoanTerms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanReceipt {
    pub loan_id: String,
    pub status: Option<String>,
}
