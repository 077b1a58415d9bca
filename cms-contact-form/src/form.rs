use crate::spam_guard::{RequestContext, SpamGuard};
use lettre::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const NO_SUBJECT: &str = "No subject";

/// Form fields exactly as the visitor sent them.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RawSubmission {
    pub name: String,
    pub email: String,
    pub subject: String,
    #[serde(alias = "content", alias = "body")]
    pub message: String,
    pub accept_terms: Option<String>,
    #[serde(rename = "g-recaptcha-response")]
    pub recaptcha_response: Option<String>,
    pub attachments: Vec<RawAttachment>,
}

/// A file uploaded along with the submission.
///
/// Every field is optional here so that a malformed entry reaches the
/// composer, which reports it, instead of failing the whole request.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RawAttachment {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content: Option<AttachmentContent>,
}

/// JSON bodies carry file content base64-encoded; multipart uploads carry
/// the bytes themselves.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String")]
pub enum AttachmentContent {
    Base64(String),
    Bytes(Vec<u8>),
}

impl From<String> for AttachmentContent {
    fn from(encoded: String) -> Self {
        AttachmentContent::Base64(encoded)
    }
}

/// The data of a submission which passed validation.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SubmissionData {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSubmission {
    data: SubmissionData,
    address: Address,
    attachments: Vec<RawAttachment>,
}

impl ValidSubmission {
    pub(crate) fn new(data: SubmissionData, address: Address, attachments: Vec<RawAttachment>) -> Self {
        Self {
            data,
            address,
            attachments,
        }
    }

    pub fn data(&self) -> &SubmissionData {
        &self.data
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn attachments(&self) -> &[RawAttachment] {
        &self.attachments
    }

    /// The subject the visitor entered, or a placeholder if they left it blank.
    pub fn subject_line(&self) -> &str {
        if self.data.subject.is_empty() {
            NO_SUBJECT
        } else {
            &self.data.subject
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Email,
    Subject,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Enter a valid email address.")]
    InvalidEmail,
    #[error("This field is required.")]
    RequiredField,
    // Gives no hint about which check failed.
    #[error("Your message could not be sent. Please try again later.")]
    SpamRejected,
}

/// Errors of a rejected submission: per field, plus one slot not tied to any
/// field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    fields: BTreeMap<Field, ValidationError>,
    general: Option<ValidationError>,
}

impl FieldErrors {
    pub fn get(&self, field: Field) -> Option<ValidationError> {
        self.fields.get(&field).copied()
    }

    pub fn general(&self) -> Option<ValidationError> {
        self.general
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.general.is_none()
    }

    pub fn contains(&self, error: ValidationError) -> bool {
        self.general == Some(error) || self.fields.values().any(|e| *e == error)
    }

    fn add(&mut self, field: Field, error: ValidationError) {
        self.fields.insert(field, error);
    }

    fn spam_rejected() -> Self {
        Self {
            fields: BTreeMap::new(),
            general: Some(ValidationError::SpamRejected),
        }
    }
}

/// The visitor-facing contact form, using the spam guard selected for its
/// configuration.
#[derive(Debug)]
pub struct SubmissionForm<'a> {
    guard: &'a SpamGuard,
    input: Option<RawSubmission>,
}

impl<'a> SubmissionForm<'a> {
    /// A form without input, for the initial render.
    pub fn unbound(guard: &'a SpamGuard) -> Self {
        Self { guard, input: None }
    }

    pub fn bound(guard: &'a SpamGuard, input: RawSubmission) -> Self {
        Self {
            guard,
            input: Some(input),
        }
    }

    pub fn guard(&self) -> &SpamGuard {
        self.guard
    }

    pub fn input(&self) -> Option<&RawSubmission> {
        self.input.as_ref()
    }

    /// Validates the fields, then asks the spam guard.
    ///
    /// The spam guard only runs once every field is valid, so invalid input
    /// never costs a remote call. An unbound form is never valid and has no
    /// errors.
    pub async fn validate(&self, context: &RequestContext) -> Result<ValidSubmission, FieldErrors> {
        let Some(input) = &self.input else {
            return Err(FieldErrors::default());
        };
        let (data, address) = clean_fields(input)?;
        if !self.guard.verify(input, context).await {
            debug!(
                "Submission rejected by {} spam protection",
                self.guard.method()
            );
            return Err(FieldErrors::spam_rejected());
        }
        Ok(ValidSubmission::new(
            data,
            address,
            input.attachments.clone(),
        ))
    }
}

fn clean_fields(input: &RawSubmission) -> Result<(SubmissionData, Address), FieldErrors> {
    let mut errors = FieldErrors::default();
    let email = input.email.trim();
    let address = if email.is_empty() {
        errors.add(Field::Email, ValidationError::RequiredField);
        None
    } else {
        match email.parse::<Address>() {
            Ok(address) => Some(address),
            Err(_) => {
                errors.add(Field::Email, ValidationError::InvalidEmail);
                None
            }
        }
    };
    let message = input.message.trim();
    if message.is_empty() {
        errors.add(Field::Message, ValidationError::RequiredField);
    }
    match address {
        Some(address) if errors.is_empty() => Ok((
            SubmissionData {
                name: input.name.trim().into(),
                email: email.into(),
                subject: input.subject.trim().into(),
                message: message.into(),
            },
            address,
        )),
        _ => Err(errors),
    }
}
