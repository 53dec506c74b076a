//! Proof-of-humanity check against a siteverify-style endpoint.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_VERIFY_URL: &str = "http://api.gotcha.land/api/siteverify";

#[async_trait]
pub trait HumanVerifier: Send + Sync {
    /// Ok when the client token is accepted for `remote_ip`.
    async fn verify(&self, token: &str, remote_ip: &str) -> FaucetResult<()>;
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
}

pub struct CaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
    secret: String,
}

impl CaptchaVerifier {
    pub fn new(verify_url: String, secret: String) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FaucetError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            verify_url,
            secret,
        })
    }
}

#[async_trait]
impl HumanVerifier for CaptchaVerifier {
    async fn verify(&self, token: &str, remote_ip: &str) -> FaucetResult<()> {
        if self.secret.is_empty() {
            return Err(FaucetError::CaptchaFailed("secret key not configured".to_string()));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .form(&[
                ("secret", self.secret.as_str()),
                ("response", token),
                ("remoteip", remote_ip),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!("Captcha verification request failed: {}", e);
                FaucetError::CaptchaFailed(format!("verification request failed: {}", e))
            })?;

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| FaucetError::CaptchaFailed(format!("unreadable verification response: {}", e)))?;

        if !body.success {
            debug!("Captcha rejected for {}", remote_ip);
            return Err(FaucetError::CaptchaFailed("token rejected".to_string()));
        }
        Ok(())
    }
}

/// Verifier used when captcha checks are switched off.
pub struct AcceptAll;

#[async_trait]
impl HumanVerifier for AcceptAll {
    async fn verify(&self, _token: &str, _remote_ip: &str) -> FaucetResult<()> {
        Ok(())
    }
}
