//! Cross-field checks on contact numbers.
//!
//! Pure and synchronous. The wizard runs these on every draft edit for live
//! feedback and again right before the identity is submitted.

use std::fmt;

use crate::error::OtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContactRole {
    PrimaryMobile,
    SecondaryMobile,
    EmergencyMobile,
}

impl fmt::Display for ContactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactRole::PrimaryMobile => write!(f, "Primary mobile"),
            ContactRole::SecondaryMobile => write!(f, "Secondary mobile"),
            ContactRole::EmergencyMobile => write!(f, "Emergency mobile"),
        }
    }
}

/// Ensure no two non-empty contact values repeat once trimmed.
///
/// Reports the first collision in input order.
pub fn ensure_unique_contacts<'a, I>(contacts: I) -> Result<(), OtpError>
where
    I: IntoIterator<Item = (ContactRole, &'a str)>,
{
    let mut seen: Vec<(ContactRole, &str)> = Vec::with_capacity(3);

    for (role, raw) in contacts {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }

        if let Some((first, _)) = seen.iter().find(|(_, existing)| *existing == value) {
            return Err(OtpError::DuplicateContact {
                value: value.to_string(),
                first: *first,
                second: role,
            });
        }
        seen.push((role, value));
    }

    Ok(())
}
