//! Client for the telephony provider's REST API (outbound call initiation).
//!
//! The bridge itself never initiates calls; this is the external
//! collaborator that places one, pointing the provider at our `/twiml`
//! endpoint so the resulting media stream connects back to `/call`.

use crate::config::TwilioConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

/// Initiates outbound calls through the telephony provider.
#[async_trait]
pub trait CallInitiator: Send + Sync {
    /// Places a call to `to`, instructing the provider to fetch call
    /// instructions from `twiml_url`. Returns the provider's call id.
    async fn create_call(&self, to: &str, twiml_url: &str) -> Result<String>;
}

/// `CallInitiator` backed by the Twilio REST API.
pub struct TwilioClient {
    http: reqwest::Client,
    config: TwilioConfig,
}

#[derive(Deserialize)]
struct CreateCallResponse {
    sid: String,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl CallInitiator for TwilioClient {
    async fn create_call(&self, to: &str, twiml_url: &str) -> Result<String> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.config.account_sid
        );
        let params = [
            ("To", to),
            ("From", self.config.phone_number.as_str()),
            ("Url", twiml_url),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .context("Failed to reach the Twilio API")?
            .error_for_status()
            .context("Twilio rejected the call request")?;

        let body: CreateCallResponse = response
            .json()
            .await
            .context("Unexpected response body from the Twilio API")?;
        info!(call_sid = %body.sid, "Outbound call created");
        Ok(body.sid)
    }
}
