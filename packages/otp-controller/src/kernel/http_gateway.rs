//! Binds the kernel traits to the HTTP client from the `gateway` crate.

use async_trait::async_trait;
use gateway::models::{CreateLoanRequest, CustomerPayload, LoanTermsPayload, OtpSentResponse};
use gateway::{GatewayService, SessionCheck, StaffRole};
use std::time::Duration;

use super::{BaseOriginationGateway, BaseVerificationGateway};
use crate::error::OtpError;
use crate::types::{OtpDispatch, Principal, Verification};
use crate::wizard::{IdentityDraft, LoanApplication, LoanReceipt, RegisteredIdentity};

const CUSTOMER_ROLE: &str = "customer";

fn dispatch(ack: OtpSentResponse) -> OtpDispatch {
    OtpDispatch {
        expires_in: ack.expires_in.map(Duration::from_secs),
    }
}

fn customer_payload(draft: &IdentityDraft) -> CustomerPayload {
    fn optional(value: &str) -> Option<String> {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    CustomerPayload {
        name: draft.name.trim().to_string(),
        email: draft.email.trim().to_string(),
        primary_mobile: draft.primary_mobile.trim().to_string(),
        secondary_mobile: optional(&draft.secondary_mobile),
        emergency_mobile: optional(&draft.emergency_mobile),
        address: optional(&draft.address),
    }
}

#[async_trait]
impl BaseVerificationGateway for GatewayService {
    async fn request_otp(&self, identifier: &str) -> Result<OtpDispatch, OtpError> {
        let ack = self.send_login_otp(identifier).await?;
        Ok(dispatch(ack))
    }

    async fn verify_otp(&self, identifier: &str, code: &str) -> Result<Verification, OtpError> {
        let response = self.verify_login_otp(identifier, code).await?;
        let user = response.user;

        Ok(Verification {
            principal: Principal {
                id: user.id,
                role: user.role,
                identifier: user.email.unwrap_or_else(|| identifier.to_string()),
                display_name: user.name,
            },
            token: Some(response.token),
        })
    }

    async fn validate_session(&self, token: &str) -> SessionCheck {
        GatewayService::validate_session(self, token).await
    }
}

#[async_trait]
impl BaseOriginationGateway for GatewayService {
    async fn create_identity(
        &self,
        role: StaffRole,
        draft: &IdentityDraft,
    ) -> Result<RegisteredIdentity, OtpError> {
        let record = self.create_customer(role, &customer_payload(draft)).await?;
        Ok(RegisteredIdentity {
            record_id: record.id,
            email: record.email,
            mobile: record.mobile,
        })
    }

    async fn send_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError> {
        let ack = self.send_customer_otp(role, identifier).await?;
        Ok(dispatch(ack))
    }

    async fn verify_identity_otp(
        &self,
        role: StaffRole,
        identifier: &str,
        code: &str,
    ) -> Result<Verification, OtpError> {
        let customer = self.verify_customer_otp(role, identifier, code).await?;
        Ok(Verification::without_token(Principal {
            id: customer.id,
            role: CUSTOMER_ROLE.to_string(),
            identifier: customer.email,
            display_name: customer.name,
        }))
    }

    async fn send_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
    ) -> Result<OtpDispatch, OtpError> {
        let ack = GatewayService::send_loan_otp(self, role, principal_id, identifier).await?;
        Ok(dispatch(ack))
    }

    async fn verify_loan_otp(
        &self,
        role: StaffRole,
        principal_id: &str,
        identifier: &str,
        code: &str,
    ) -> Result<(), OtpError> {
        GatewayService::verify_loan_otp(self, role, principal_id, identifier, code).await?;
        Ok(())
    }

    async fn commit_loan(
        &self,
        role: StaffRole,
        application: &LoanApplication,
    ) -> Result<LoanReceipt, OtpError> {
        let request = CreateLoanRequest {
            customer_id: application.principal.id.clone(),
            customer: customer_payload(&application.identity),
            terms: LoanTermsPayload {
                amount: application.terms.amount.to_string(),
                tenure_months: application.terms.tenure_months,
                interest_rate: application.terms.interest_rate.to_string(),
                purpose: application.terms.purpose.clone(),
            },
        };

        let record = self.create_loan(role, &request).await?;
        Ok(LoanReceipt {
            loan_id: record.id,
            status: record.status,
        })
    }
}
