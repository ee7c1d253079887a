//! Wire payloads exchanged with the verification backend.

use serde::{Deserialize, Serialize};

/// Body for every "send a code" call.
#[derive(Debug, Clone, Serialize)]
pub struct SendOtpRequest<'a> {
    pub identifier: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOtpRequest<'a> {
    pub identifier: &'a str,
    pub otp: &'a str,
}

/// Loan OTPs are scoped to the customer verified in the previous stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanOtpRequest<'a> {
    pub customer_id: &'a str,
    pub identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<&'a str>,
}

/// Optional acknowledgement returned by send endpoints.
///
/// The backend usually answers `{}`; newer deployments include `expiresIn`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSentResponse {
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// `429` body carrying the remaining cooldown in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitBody {
    pub time_left: u64,
}

/// Generic `{ message }` error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserRecord,
}

/// Identity fields submitted when enrolling a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    pub name: String,
    pub email: String,
    pub primary_mobile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_mobile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_mobile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomerRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub mobile: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedCustomerResponse {
    pub customer: CustomerRecord,
}

/// Loan terms are forwarded as-is; the backend owns the interest math.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTermsPayload {
    pub amount: String,
    pub tenure_months: u32,
    pub interest_rate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanRequest {
    pub customer_id: String,
    pub customer: CustomerPayload,
    pub terms: LoanTermsPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoanRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}
