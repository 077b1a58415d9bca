use super::{RequestContext, VerificationError};
use crate::{
    config::{ConfigurationError, Settings},
    form::RawSubmission,
};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::borrow::Cow;
use tracing::{debug, warn};

pub const AKISMET_URL: &str = "https://rest.akismet.com/1.1/comment-check";
const COMMENT_TYPE: &str = "contact-form";

/// Asks an Akismet-compatible service whether the message is spam.
#[derive(Debug)]
pub struct ContentClassifier {
    api_key: String,
    endpoint: Cow<'static, str>,
    site_url: Option<String>,
    client: Client,
}

impl ContentClassifier {
    pub fn new(api_key: impl Into<String>, settings: &Settings) -> Result<Self, ConfigurationError> {
        Ok(Self {
            api_key: api_key.into(),
            endpoint: settings.akismet_url.clone(),
            site_url: settings.site_url.clone(),
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
        let blog = self.blog(context);
        let payload = CommentCheckPayload {
            api_key: &self.api_key,
            blog: &blog,
            user_ip: context.remote_ip.as_deref(),
            user_agent: context.user_agent.as_deref(),
            referrer: context.referrer.as_deref(),
            comment_type: COMMENT_TYPE,
            comment_author: submission.name.trim(),
            comment_author_email: submission.email.trim(),
            comment_content: submission.message.trim(),
        };
        let response = self
            .client
            .post(self.endpoint.as_ref())
            .form(&payload)
            .send()
            .await?;
        Self::process_response(response).await
    }

    fn blog(&self, context: &RequestContext) -> String {
        match (&self.site_url, &context.host) {
            (Some(site_url), _) => site_url.clone(),
            (None, Some(host)) => format!("https://{host}/"),
            (None, None) => String::new(),
        }
    }

    async fn process_response(response: Response) -> Result<bool, VerificationError> {
        let status = response.status();
        let debug_help = response
            .headers()
            .get("X-akismet-debug-help")
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        if status != StatusCode::OK {
            return Err(VerificationError::UnexpectedResponse(format!(
                "HTTP status {status}"
            )));
        }
        let body = response.text().await?;
        match body.trim() {
            "false" => Ok(true),
            "true" => {
                debug!("Akismet classified the submission as spam");
                Ok(false)
            }
            "invalid" => {
                if let Some(help) = debug_help {
                    warn!("Akismet says: {help}");
                }
                Err(VerificationError::InvalidCredential)
            }
            other => Err(VerificationError::UnexpectedResponse(other.into())),
        }
    }
}

#[derive(Serialize)]
struct CommentCheckPayload<'a> {
    api_key: &'a str,
    blog: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_ip: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    referrer: Option<&'a str>,
    comment_type: &'a str,
    comment_author: &'a str,
    comment_author_email: &'a str,
    comment_content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::ContentClassifier;
    use crate::{
        config::Settings,
        form::RawSubmission,
        spam_guard::{RequestContext, VerificationError},
    };
    use googletest::prelude::*;
    use std::time::Duration;
    use test_support::fake_akismet::{FakeAkismet, SPAM_MARKER};

    const API_KEY: &str = "arbitrary api key";

    fn submission(message: &str) -> RawSubmission {
        RawSubmission {
            name: "Ann".into(),
            email: "ann@example.com".into(),
            message: message.into(),
            ..RawSubmission::default()
        }
    }

    fn context() -> RequestContext {
        RequestContext {
            remote_ip: Some("192.0.2.1".into()),
            user_agent: Some("Mozilla/5.0".into()),
            referrer: None,
            host: Some("example.com".into()),
        }
    }

    fn classifier(url: String) -> ContentClassifier {
        let settings = Settings {
            akismet_url: url.into(),
            verification_timeout: Duration::from_millis(500),
            ..Settings::default()
        };
        ContentClassifier::new(API_KEY, &settings).unwrap()
    }

    #[tokio::test]
    async fn accepts_ham() -> Result<()> {
        let fake_akismet = FakeAkismet::new(API_KEY);
        let subject = classifier(fake_akismet.start().await);

        let result = subject.verify(&submission("Hi"), &context()).await;

        verify_that!(result, ok(eq(true)))
    }

    #[tokio::test]
    async fn rejects_spam() -> Result<()> {
        let fake_akismet = FakeAkismet::new(API_KEY);
        let subject = classifier(fake_akismet.start().await);

        let result = subject
            .verify(&submission(&format!("Buy now {SPAM_MARKER}")), &context())
            .await;

        verify_that!(result, ok(eq(false)))
    }

    #[tokio::test]
    async fn sends_requester_metadata() -> Result<()> {
        let fake_akismet = FakeAkismet::new(API_KEY);
        let requests = fake_akismet.requests();
        let subject = classifier(fake_akismet.start().await);

        subject.verify(&submission("Hi"), &context()).await.unwrap();

        let requests = requests.lock().unwrap();
        verify_that!(
            requests.last().cloned(),
            some(all!(
                contains_substring("user_ip=192.0.2.1"),
                contains_substring("blog=https%3A%2F%2Fexample.com%2F"),
                contains_substring("comment_type=contact-form")
            ))
        )
    }

    #[tokio::test]
    async fn reports_invalid_api_key() -> Result<()> {
        let fake_akismet = FakeAkismet::new("a different api key");
        let subject = classifier(fake_akismet.start().await);

        let result = subject.verify(&submission("Hi"), &context()).await;

        assert!(matches!(result, Err(VerificationError::InvalidCredential)));
        Ok(())
    }

    #[tokio::test]
    async fn reports_timeout() -> Result<()> {
        let fake_akismet = FakeAkismet::new(API_KEY).respond_after(Duration::from_secs(2));
        let subject = classifier(fake_akismet.start().await);

        let result = subject.verify(&submission("Hi"), &context()).await;

        assert!(matches!(result, Err(VerificationError::Timeout)));
        Ok(())
    }

    #[tokio::test]
    async fn reports_garbled_response() -> Result<()> {
        let fake_akismet = FakeAkismet::new(API_KEY).return_invalid_response();
        let subject = classifier(fake_akismet.start().await);

        let result = subject.verify(&submission("Hi"), &context()).await;

        assert!(matches!(
            result,
            Err(VerificationError::UnexpectedResponse(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reports_unreachable_service() -> Result<()> {
        let subject = classifier("http://127.0.0.1:9/1.1/comment-check".into());

        let result = subject.verify(&submission("Hi"), &context()).await;

        verify_that!(result, err(anything()))
    }
}
