pub mod akismet;
pub mod honeypot;
pub mod recaptcha;

use crate::{
    config::{credential, ConfigurationError, ContactFormConfig, Settings, SpamProtectionMethod},
    form::RawSubmission,
};
use akismet::ContentClassifier;
use honeypot::HoneyPot;
use recaptcha::ChallengeResponse;
use tracing::{error, warn};

/// Metadata about the visitor's request that remote verifiers care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub host: Option<String>,
}

/// The single spam protection strategy selected for a form.
#[derive(Debug)]
pub enum SpamGuard {
    HoneyPot(HoneyPot),
    ContentClassifier(ContentClassifier),
    ChallengeResponse(ChallengeResponse),
}

impl SpamGuard {
    /// Selects the strategy configured for the form instance.
    ///
    /// Credentials of the methods which are not selected are ignored. A missing
    /// credential for the selected method is reported here rather than when a
    /// submission arrives.
    pub fn from_config(
        config: &ContactFormConfig,
        settings: &Settings,
    ) -> Result<Self, ConfigurationError> {
        match config.spam_protection_method {
            SpamProtectionMethod::None => Ok(Self::HoneyPot(HoneyPot)),
            SpamProtectionMethod::ContentClassifier => {
                let api_key = credential(
                    config.akismet_api_key.as_ref(),
                    settings.akismet_api_key.as_ref(),
                )
                .ok_or(ConfigurationError::MissingCredential {
                    method: SpamProtectionMethod::ContentClassifier,
                    credential: "an Akismet API key",
                })?;
                Ok(Self::ContentClassifier(ContentClassifier::new(
                    api_key, settings,
                )?))
            }
            SpamProtectionMethod::ChallengeResponse => {
                let public_key = credential(
                    config.recaptcha_public_key.as_ref(),
                    settings.recaptcha_public_key.as_ref(),
                )
                .ok_or(ConfigurationError::MissingCredential {
                    method: SpamProtectionMethod::ChallengeResponse,
                    credential: "a reCAPTCHA public key",
                })?;
                let private_key = credential(
                    config.recaptcha_private_key.as_ref(),
                    settings.recaptcha_private_key.as_ref(),
                )
                .ok_or(ConfigurationError::MissingCredential {
                    method: SpamProtectionMethod::ChallengeResponse,
                    credential: "a reCAPTCHA private key",
                })?;
                Ok(Self::ChallengeResponse(ChallengeResponse::new(
                    public_key,
                    private_key,
                    &config.recaptcha_theme,
                    settings,
                )?))
            }
        }
    }

    pub fn method(&self) -> SpamProtectionMethod {
        match self {
            SpamGuard::HoneyPot(_) => SpamProtectionMethod::None,
            SpamGuard::ContentClassifier(_) => SpamProtectionMethod::ContentClassifier,
            SpamGuard::ChallengeResponse(_) => SpamProtectionMethod::ChallengeResponse,
        }
    }

    /// Returns whether the submission looks human-authored.
    ///
    /// Fails closed: a verifier which cannot give an answer rejects the
    /// submission.
    pub async fn verify(&self, submission: &RawSubmission, context: &RequestContext) -> bool {
        let verdict = match self {
            SpamGuard::HoneyPot(guard) => Ok(guard.verify(submission)),
            SpamGuard::ContentClassifier(guard) => guard.verify(submission, context).await,
            SpamGuard::ChallengeResponse(guard) => guard.verify(submission, context).await,
        };
        match verdict {
            Ok(verdict) => verdict,
            Err(error) => {
                error.log(self.method());
                false
            }
        }
    }

    /// Markup the form has to contain for this strategy to work.
    pub fn widget_html(&self) -> String {
        match self {
            SpamGuard::HoneyPot(guard) => guard.widget_html(),
            SpamGuard::ContentClassifier(_) => String::new(),
            SpamGuard::ChallengeResponse(guard) => guard.widget_html(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Verification service did not answer in time")]
    Timeout,
    #[error("Could not reach verification service: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("Verification service rejected the configured credential")]
    InvalidCredential,
    #[error("Unexpected response from verification service: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for VerificationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            VerificationError::Timeout
        } else if error.is_decode() {
            VerificationError::UnexpectedResponse(error.to_string())
        } else {
            VerificationError::Unreachable(error)
        }
    }
}

impl VerificationError {
    fn log(&self, method: SpamProtectionMethod) {
        match self {
            VerificationError::InvalidCredential => {
                error!("{method} verification is misconfigured: {self}");
            }
            _ => warn!("Error verifying submission with {method}: {self}"),
        }
        warn!("Rejecting submission without verification.");
    }
}
