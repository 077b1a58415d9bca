use super::{RequestContext, VerificationError};
use crate::{
    config::{ConfigurationError, Settings},
    form::RawSubmission,
};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tinytemplate::TinyTemplate;
use tracing::debug;

pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
pub const RECAPTCHA_RESPONSE_FIELD: &str = "g-recaptcha-response";

const WIDGET_TEMPLATE_NAME: &str = "recaptcha-widget";
const WIDGET_TEMPLATE: &str = r#"<script src="https://www.google.com/recaptcha/api.js" async defer></script>
<div class="g-recaptcha" data-sitekey="{sitekey}" data-theme="{theme}"></div>"#;

/// Verifies a reCAPTCHA-style challenge token with the siteverify endpoint.
#[derive(Debug)]
pub struct ChallengeResponse {
    public_key: String,
    private_key: String,
    theme: String,
    endpoint: Cow<'static, str>,
    client: Client,
}

impl ChallengeResponse {
    pub fn new(
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        theme: impl Into<String>,
        settings: &Settings,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
            theme: theme.into(),
            endpoint: settings.recaptcha_verify_url.clone(),
            client: Client::builder()
                .timeout(settings.verification_timeout)
                .build()?,
        })
    }

    pub async fn verify(
        &self,
        submission: &RawSubmission,
        context: &RequestContext,
    ) -> Result<bool, VerificationError> {
        let Some(token) = submission
            .recaptcha_response
            .as_deref()
            .filter(|token| !token.is_empty())
        else {
            debug!("Submission carries no challenge response");
            return Ok(false);
        };
        let payload = SiteverifyPayload {
            secret: &self.private_key,
            response: token,
            remoteip: context.remote_ip.as_deref(),
        };
        let response = self
            .client
            .post(self.endpoint.as_ref())
            .form(&payload)
            .send()
            .await?;
        Self::process_response(response).await
    }

    async fn process_response(response: Response) -> Result<bool, VerificationError> {
        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::UnexpectedResponse(format!(
                "HTTP status {status}"
            )));
        }
        let response_body: SiteverifyResponse = response.json().await?;
        if response_body.success {
            Ok(true)
        } else if response_body
            .error_codes
            .iter()
            .any(|e| e == "invalid-input-secret" || e == "missing-input-secret")
        {
            Err(VerificationError::InvalidCredential)
        } else {
            debug!(
                "Challenge response rejected: {:?}",
                response_body.error_codes
            );
            Ok(false)
        }
    }

    pub fn widget_html(&self) -> String {
        let mut tt = TinyTemplate::new();
        tt.add_template(WIDGET_TEMPLATE_NAME, WIDGET_TEMPLATE)
            .unwrap();
        let context = WidgetContext {
            sitekey: &self.public_key,
            theme: &self.theme,
        };
        tt.render(WIDGET_TEMPLATE_NAME, &context).unwrap()
    }
}

#[derive(Serialize)]
struct WidgetContext<'a> {
    sitekey: &'a str,
    theme: &'a str,
}

#[derive(Serialize)]
struct SiteverifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

#[derive(Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}
