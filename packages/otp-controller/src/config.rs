use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use gateway::{GatewayOptions, DEFAULT_SESSION_HEADER};

/// Timing and length rules for one OTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpSettings {
    pub code_length: usize,
    pub resend_cooldown: Duration,
    pub expiry: Duration,
    pub max_attempts: u32,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            code_length: 6,
            resend_cooldown: Duration::from_secs(60),
            expiry: Duration::from_secs(180),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub revalidate_interval: Duration,
    pub session_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            revalidate_interval: Duration::from_secs(300),
            session_dir: PathBuf::from(".session"),
        }
    }
}

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub gateway_base_url: String,
    pub session_header: String,
    pub request_timeout: Duration,
    pub otp: OtpSettings,
    pub session: SessionSettings,
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let otp_defaults = OtpSettings::default();
        let session_defaults = SessionSettings::default();

        Ok(Self {
            gateway_base_url: env::var("GATEWAY_BASE_URL")
                .context("GATEWAY_BASE_URL must be set")?,
            session_header: env::var("GATEWAY_SESSION_HEADER")
                .unwrap_or_else(|_| DEFAULT_SESSION_HEADER.to_string()),
            request_timeout: Duration::from_secs(
                parse_var("GATEWAY_TIMEOUT_SECS", 15)
                    .context("GATEWAY_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            otp: OtpSettings {
                code_length: parse_var("OTP_CODE_LENGTH", otp_defaults.code_length)
                    .context("OTP_CODE_LENGTH must be a valid number")?,
                resend_cooldown: Duration::from_secs(
                    parse_var("OTP_RESEND_COOLDOWN_SECS", 60)
                        .context("OTP_RESEND_COOLDOWN_SECS must be a valid number")?,
                ),
                expiry: Duration::from_secs(
                    parse_var("OTP_EXPIRY_SECS", 180)
                        .context("OTP_EXPIRY_SECS must be a valid number")?,
                ),
                max_attempts: parse_var("OTP_MAX_ATTEMPTS", otp_defaults.max_attempts)
                    .context("OTP_MAX_ATTEMPTS must be a valid number")?,
            },
            session: SessionSettings {
                revalidate_interval: Duration::from_secs(
                    parse_var("SESSION_REVALIDATE_SECS", 300)
                        .context("SESSION_REVALIDATE_SECS must be a valid number")?,
                ),
                session_dir: env::var("SESSION_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(session_defaults.session_dir),
            },
        })
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            base_url: self.gateway_base_url.clone(),
            session_header: self.session_header.clone(),
            timeout: self.request_timeout,
        }
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("could not parse {key}={raw}")),
        Err(_) => Ok(default),
    }
}
