//! HTTP client for the OTP verification backend.
//!
//! Thin request/response wrapper: no retries, no caching, no state beyond the
//! optional staff token used by loan-origination endpoints.

use std::fmt;
use std::time::Duration;

pub mod models;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    CreateLoanRequest, CustomerPayload, CustomerRecord, ErrorBody, LoanOtpRequest, LoanRecord,
    LoginResponse, OtpSentResponse, RateLimitBody, SendOtpRequest, VerifiedCustomerResponse,
    VerifyOtpRequest,
};

/// Header carrying the session token unless configured otherwise.
pub const DEFAULT_SESSION_HEADER: &str = "x-auth-token";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("code expired: {0}")]
    Expired(String),

    #[error("rejected input: {0}")]
    Validation(String),

    #[error("request failed ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A staff call was refused because its session token is no longer
    /// accepted.
    #[error("session token refused: {0}")]
    Unauthorized(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Result of asking the backend whether a session token is still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Valid,
    /// The backend answered and refused the token.
    Invalid,
    /// The backend could not be reached; nothing is known about the token.
    Unreachable,
}

/// Staff role whose endpoint family drives loan origination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaffRole {
    Admin,
    Employee,
}

impl StaffRole {
    pub fn path_segment(self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Employee => "employee",
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Which kind of call produced an error response; decides how 4xx is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    SendCode,
    VerifyCode,
    Plain,
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub base_url: String,
    pub session_header: String,
    pub timeout: Duration,
}

impl GatewayOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayService {
    options: GatewayOptions,
    client: Client,
    token: Option<String>,
}

impl GatewayService {
    pub fn new(options: GatewayOptions) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            options,
            client,
            token: None,
        })
    }

    /// Clone of this client that authenticates staff calls with `token`.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            options: self.options.clone(),
            client: self.client.clone(),
            token: Some(token.into()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, T>(&self, path: &str, body: &B, kind: CallKind) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.token {
            request = request.header(self.options.session_header.as_str(), token.as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", path, e);
            GatewayError::Network(e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            let error = if status == StatusCode::UNAUTHORIZED && self.token.is_some() {
                GatewayError::Unauthorized(failure_message(status, &text))
            } else {
                classify_failure(status, &text, kind)
            };
            debug!(%status, path, error = %error, "gateway call rejected");
            return Err(error);
        }

        decode_body(&text)
    }

    /// `POST /auth/send-login-otp`
    pub async fn send_login_otp(&self, identifier: &str) -> Result<OtpSentResponse, GatewayError> {
        self.post(
            "/auth/send-login-otp",
            &SendOtpRequest { identifier },
            CallKind::SendCode,
        )
        .await
    }

    /// `POST /auth/verify-otp`
    pub async fn verify_login_otp(
        &self,
        identifier: &str,
        otp: &str,
    ) -> Result<LoginResponse, GatewayError> {
        self.post(
            "/auth/verify-otp",
            &VerifyOtpRequest { identifier, otp },
            CallKind::VerifyCode,
        )
        .await
    }

    /// `GET /auth/validate`
    ///
    /// Never fails: transport problems come back as [`SessionCheck::Unreachable`].
    pub async fn validate_session(&self, token: &str) -> SessionCheck {
        let response = self
            .client
            .get(self.url("/auth/validate"))
            .header(self.options.session_header.as_str(), token)
            .send()
            .await;

        match response {
            Ok(response) => {
                let check = session_check(response.status());
                if check != SessionCheck::Valid {
                    debug!(status = %response.status(), ?check, "session token not confirmed");
                }
                check
            }
            Err(e) => {
                warn!("Session validation request failed: {}", e);
                SessionCheck::Unreachable
            }
        }
    }

    /// `POST /{role}/customers`
    pub async fn create_customer(
        &self,
        role: StaffRole,
        customer: &CustomerPayload,
    ) -> Result<CustomerRecord, GatewayError> {
        let path = format!("/{}/customers", role.path_segment());
        self.post(&path, customer, CallKind::Plain).await
    }

    /// `POST /{role}/customers/send-otp`
    pub async fn send_customer_otp(
        &self,
        role: StaffRole,
        identifier: &str,
    ) -> Result<OtpSentResponse, GatewayError> {
        let path = format!("/{}/customers/send-otp", role.path_segment());
        self.post(&path, &SendOtpRequest { identifier }, CallKind::SendCode)
            .await
    }

    /// `POST /{role}/customers/verify-otp`
    pub async fn verify_customer_otp(
        &self,
        role: StaffRole,
        identifier: &str,
        otp: &str,
    ) -> Result<CustomerRecord, GatewayError> {
        let path = format!("/{}/customers/verify-otp", role.path_segment());
        let response: VerifiedCustomerResponse = self
            .post(&path, &VerifyOtpRequest { identifier, otp }, CallKind::VerifyCode)
            .await?;
        Ok(response.customer)
    }

    /// `POST /{role}/loans/send-otp`
    pub async fn send_loan_otp(
        &self,
        role: StaffRole,
        customer_id: &str,
        identifier: &str,
    ) -> Result<OtpSentResponse, GatewayError> {
        let path = format!("/{}/loans/send-otp", role.path_segment());
        let body = LoanOtpRequest {
            customer_id,
            identifier,
            otp: None,
        };
        self.post(&path, &body, CallKind::SendCode).await
    }

    /// `POST /{role}/loans/verify-otp`
    pub async fn verify_loan_otp(
        &self,
        role: StaffRole,
        customer_id: &str,
        identifier: &str,
        otp: &str,
    ) -> Result<(), GatewayError> {
        let path = format!("/{}/loans/verify-otp", role.path_segment());
        let body = LoanOtpRequest {
            customer_id,
            identifier,
            otp: Some(otp),
        };
        let _: serde_json::Value = self.post(&path, &body, CallKind::VerifyCode).await?;
        Ok(())
    }

    /// `POST /{role}/loans`
    pub async fn create_loan(
        &self,
        role: StaffRole,
        request: &CreateLoanRequest,
    ) -> Result<LoanRecord, GatewayError> {
        let path = format!("/{}/loans", role.path_segment());
        self.post(&path, request, CallKind::Plain).await
    }
}

fn decode_body<T: DeserializeOwned>(text: &str) -> Result<T, GatewayError> {
    // Some send endpoints answer with an empty body instead of `{}`.
    let body = if text.trim().is_empty() { "{}" } else { text };
    serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))
}

/// Only an explicit client-side refusal invalidates a token. Timeouts,
/// throttling and server errors say nothing about it.
fn session_check(status: StatusCode) -> SessionCheck {
    if status.is_success() {
        SessionCheck::Valid
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        SessionCheck::Unreachable
    } else {
        SessionCheck::Invalid
    }
}

fn failure_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

fn classify_failure(status: StatusCode, body: &str, kind: CallKind) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = serde_json::from_str::<RateLimitBody>(body)
            .map(|b| b.time_left)
            .unwrap_or(0);
        return GatewayError::RateLimited { retry_after_secs };
    }

    let message = failure_message(status, body);

    if status.is_client_error() {
        match kind {
            CallKind::VerifyCode => {
                if status == StatusCode::GONE || message.to_lowercase().contains("expire") {
                    return GatewayError::Expired(message);
                }
                return GatewayError::InvalidCode(message);
            }
            CallKind::SendCode | CallKind::Plain
                if status == StatusCode::BAD_REQUEST
                    || status == StatusCode::UNPROCESSABLE_ENTITY =>
            {
                return GatewayError::Validation(message);
            }
            _ => {}
        }
    }

    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}
