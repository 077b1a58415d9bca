use lettre::{address::AddressError, message::Mailbox};
use serde::Deserialize;
use std::{
    borrow::Cow,
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::spam_guard::{akismet::AKISMET_URL, recaptcha::RECAPTCHA_VERIFY_URL};

const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// The spam protection mechanism a contact form instance uses.
///
/// `None` means no remote verification. The form still carries the hidden
/// trap field, so it falls back to the honeypot check.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpamProtectionMethod {
    #[default]
    #[serde(alias = "honeypot")]
    None,
    #[serde(alias = "akismet")]
    ContentClassifier,
    #[serde(alias = "recaptcha")]
    ChallengeResponse,
}

impl Display for SpamProtectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpamProtectionMethod::None => write!(f, "honeypot"),
            SpamProtectionMethod::ContentClassifier => write!(f, "Akismet"),
            SpamProtectionMethod::ChallengeResponse => write!(f, "reCAPTCHA"),
        }
    }
}

/// Settings of a single contact form plugin instance, as stored by the CMS.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContactFormConfig {
    #[serde(default)]
    pub form_name: String,
    pub site_email: String,
    #[serde(default = "default_name_label")]
    pub name_label: String,
    #[serde(default = "default_email_label")]
    pub email_label: String,
    #[serde(default = "default_subject_label")]
    pub subject_label: String,
    #[serde(default = "default_content_label")]
    pub content_label: String,
    #[serde(default = "default_thanks")]
    pub thanks: String,
    #[serde(default = "default_submit")]
    pub submit: String,
    #[serde(default)]
    pub spam_protection_method: SpamProtectionMethod,
    #[serde(default)]
    pub akismet_api_key: Option<String>,
    #[serde(default)]
    pub recaptcha_public_key: Option<String>,
    #[serde(default)]
    pub recaptcha_private_key: Option<String>,
    #[serde(default = "default_recaptcha_theme")]
    pub recaptcha_theme: String,
}

impl ContactFormConfig {
    pub fn new(form_name: impl Into<String>, site_email: impl Into<String>) -> Self {
        Self {
            form_name: form_name.into(),
            site_email: site_email.into(),
            name_label: default_name_label(),
            email_label: default_email_label(),
            subject_label: default_subject_label(),
            content_label: default_content_label(),
            thanks: default_thanks(),
            submit: default_submit(),
            spam_protection_method: SpamProtectionMethod::default(),
            akismet_api_key: None,
            recaptcha_public_key: None,
            recaptcha_private_key: None,
            recaptcha_theme: default_recaptcha_theme(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| ConfigurationError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn site_mailbox(&self) -> Result<Mailbox, ConfigurationError> {
        self.site_email
            .parse()
            .map_err(|error| ConfigurationError::InvalidAddress {
                setting: "site_email",
                value: self.site_email.clone(),
                error,
            })
    }
}

fn default_name_label() -> String {
    "Name".into()
}

fn default_email_label() -> String {
    "Your email address".into()
}

fn default_subject_label() -> String {
    "Subject".into()
}

fn default_content_label() -> String {
    "Message".into()
}

fn default_thanks() -> String {
    "Thank you for your message.".into()
}

fn default_submit() -> String {
    "Submit".into()
}

fn default_recaptcha_theme() -> String {
    "light".into()
}

/// Process-wide settings shared by every contact form instance.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Sender used for all notification mails. When unset, mails are sent
    /// from the visitor's own address.
    pub default_from_email: Option<Mailbox>,
    pub akismet_api_key: Option<String>,
    pub recaptcha_public_key: Option<String>,
    pub recaptcha_private_key: Option<String>,
    pub akismet_url: Cow<'static, str>,
    pub recaptcha_verify_url: Cow<'static, str>,
    pub verification_timeout: Duration,
    pub site_url: Option<String>,
    pub template_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_from_email: None,
            akismet_api_key: None,
            recaptcha_public_key: None,
            recaptcha_private_key: None,
            akismet_url: AKISMET_URL.into(),
            recaptcha_verify_url: RECAPTCHA_VERIFY_URL.into(),
            verification_timeout: DEFAULT_VERIFICATION_TIMEOUT,
            site_url: None,
            template_dir: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let default_from_email = match env_var("DEFAULT_FROM_EMAIL") {
            Some(value) => Some(value.parse().map_err(|error| {
                ConfigurationError::InvalidAddress {
                    setting: "DEFAULT_FROM_EMAIL",
                    value: value.clone(),
                    error,
                }
            })?),
            None => None,
        };
        let verification_timeout = match env_var("VERIFICATION_TIMEOUT_SECS") {
            Some(value) => value
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| ConfigurationError::InvalidSetting {
                    setting: "VERIFICATION_TIMEOUT_SECS",
                    value,
                })?,
            None => DEFAULT_VERIFICATION_TIMEOUT,
        };
        Ok(Self {
            default_from_email,
            akismet_api_key: env_var("AKISMET_API_KEY"),
            recaptcha_public_key: env_var("RECAPTCHA_PUBLIC_KEY"),
            recaptcha_private_key: env_var("RECAPTCHA_PRIVATE_KEY"),
            akismet_url: env_var("AKISMET_URL")
                .map(Cow::Owned)
                .unwrap_or(AKISMET_URL.into()),
            recaptcha_verify_url: env_var("RECAPTCHA_VERIFY_URL")
                .map(Cow::Owned)
                .unwrap_or(RECAPTCHA_VERIFY_URL.into()),
            verification_timeout,
            site_url: env_var("SITE_URL"),
            template_dir: env_var("CONTACT_FORM_TEMPLATE_DIR").map(PathBuf::from),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Picks the instance credential if it is set, otherwise the process-wide one.
pub(crate) fn credential<'a>(
    instance: Option<&'a String>,
    process_wide: Option<&'a String>,
) -> Option<&'a str> {
    instance
        .filter(|value| !value.trim().is_empty())
        .or(process_wide.filter(|value| !value.trim().is_empty()))
        .map(String::as_str)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{method} spam protection requires {credential}, which is not configured")]
    MissingCredential {
        method: SpamProtectionMethod,
        credential: &'static str,
    },
    #[error("Invalid email address {value:?} in {setting}: {error}")]
    InvalidAddress {
        setting: &'static str,
        value: String,
        #[source]
        error: AddressError,
    },
    #[error("Invalid value {value:?} for {setting}")]
    InvalidSetting {
        setting: &'static str,
        value: String,
    },
    #[error("Could not read configuration file {}: {error}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("Could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
