use crate::{
    config::{ContactFormConfig, Settings},
    form::{AttachmentContent, RawAttachment, SubmissionData, ValidSubmission},
    mail::DispatchError,
    templates::{
        render_text, BuiltinTemplates, DirectoryTemplates, TemplateSource, EMAIL_TEMPLATE_NAME,
        SUBJECT_TEMPLATE_NAME,
    },
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lettre::message::{header::ContentType, Mailbox};
use serde::Serialize;

const DEFAULT_ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// The notification mail about one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    pub reply_to: Mailbox,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: ContentType,
}

#[derive(Serialize)]
struct SubjectContext<'a> {
    subject: &'a str,
    form_name: &'a str,
}

#[derive(Serialize)]
struct EmailContext<'a> {
    data: &'a SubmissionData,
    form_name: &'a str,
    from_email: String,
    user_email: &'a str,
}

pub struct NotificationComposer {
    templates: Box<dyn TemplateSource>,
    default_from_email: Option<Mailbox>,
}

impl NotificationComposer {
    pub fn new(
        templates: impl TemplateSource + 'static,
        default_from_email: Option<Mailbox>,
    ) -> Self {
        Self {
            templates: Box::new(templates),
            default_from_email,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let default_from_email = settings.default_from_email.clone();
        match &settings.template_dir {
            Some(dir) => Self::new(DirectoryTemplates::new(dir), default_from_email),
            None => Self::new(BuiltinTemplates, default_from_email),
        }
    }

    pub fn compose(
        &self,
        submission: &ValidSubmission,
        config: &ContactFormConfig,
    ) -> Result<NotificationMessage, DispatchError> {
        let to = config.site_mailbox()?;
        let reply_to = Mailbox::new(
            Some(submission.data().name.clone()).filter(|name| !name.is_empty()),
            submission.address().clone(),
        );
        // The configured sender keeps SPF and DKIM happy; without one the
        // visitor's address is the best we have.
        let from = self
            .default_from_email
            .clone()
            .unwrap_or_else(|| Mailbox::new(None, submission.address().clone()));

        let rendered_subject = render_text(
            self.templates.as_ref(),
            SUBJECT_TEMPLATE_NAME,
            &SubjectContext {
                subject: submission.subject_line(),
                form_name: &config.form_name,
            },
        )?;
        let subject = first_line(&rendered_subject).into();

        let body = render_text(
            self.templates.as_ref(),
            EMAIL_TEMPLATE_NAME,
            &EmailContext {
                data: submission.data(),
                form_name: &config.form_name,
                from_email: from.to_string(),
                user_email: &submission.data().email,
            },
        )?;

        let attachments = submission
            .attachments()
            .iter()
            .enumerate()
            .map(|(index, attachment)| decode_attachment(index, attachment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NotificationMessage {
            subject,
            body,
            from,
            to: vec![to],
            reply_to,
            attachments,
        })
    }
}

/// Mail headers must not contain line breaks of any kind, so everything from
/// the first one on is dropped. `\r\n` ends a line like `\n` does.
fn first_line(text: &str) -> &str {
    text.split(is_line_break).next().unwrap_or_default()
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c'..='\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn decode_attachment(index: usize, attachment: &RawAttachment) -> Result<Attachment, DispatchError> {
    let malformed = |reason: String| DispatchError::MalformedAttachment { index, reason };
    let filename = attachment
        .filename
        .as_deref()
        .filter(|filename| !filename.trim().is_empty())
        .ok_or_else(|| malformed("missing filename".into()))?;
    let content = match &attachment.content {
        Some(AttachmentContent::Base64(encoded)) => STANDARD
            .decode(encoded)
            .map_err(|error| malformed(format!("{filename} is not valid base64: {error}")))?,
        Some(AttachmentContent::Bytes(bytes)) => bytes.clone(),
        None => return Err(malformed(format!("{filename} has no content"))),
    };
    let content_type = attachment
        .content_type
        .as_deref()
        .filter(|content_type| !content_type.trim().is_empty())
        .unwrap_or(DEFAULT_ATTACHMENT_CONTENT_TYPE);
    let content_type = ContentType::parse(content_type).map_err(|error| {
        malformed(format!(
            "{filename} has invalid content type {content_type:?}: {error}"
        ))
    })?;
    Ok(Attachment {
        filename: filename.into(),
        content,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::{first_line, NotificationComposer, NotificationMessage};
    use crate::{
        config::ContactFormConfig,
        form::{AttachmentContent, RawAttachment, SubmissionData, ValidSubmission},
        mail::DispatchError,
        templates::{BuiltinTemplates, TemplateError, TemplateSource, SUBJECT_TEMPLATE_NAME},
    };
    use googletest::prelude::*;
    use lettre::message::{header::ContentType, Mailbox};
    use std::borrow::Cow;

    struct MultilineSubject;

    impl TemplateSource for MultilineSubject {
        fn load(&self, name: &str) -> std::result::Result<Cow<'_, str>, TemplateError> {
            if name == SUBJECT_TEMPLATE_NAME {
                Ok("{subject}\nBcc: everyone@example.com\n".into())
            } else {
                BuiltinTemplates.load(name)
            }
        }
    }

    fn config() -> ContactFormConfig {
        ContactFormConfig::new("Contact", "Site owner <owner@example.com>")
    }

    fn submission(subject: &str, attachments: Vec<RawAttachment>) -> ValidSubmission {
        ValidSubmission::new(
            SubmissionData {
                name: "Ann".into(),
                email: "ann@example.com".into(),
                subject: subject.into(),
                message: "Hi".into(),
            },
            "ann@example.com".parse().unwrap(),
            attachments,
        )
    }

    fn compose(
        composer: &NotificationComposer,
        submission: &ValidSubmission,
    ) -> std::result::Result<NotificationMessage, DispatchError> {
        composer.compose(submission, &config())
    }

    #[test]
    fn renders_subject_with_form_name() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(message.subject, eq("[Contact] Question"))
    }

    #[test]
    fn uses_placeholder_for_blank_subject() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(&composer, &submission("", vec![])).unwrap();

        verify_that!(message.subject, eq("[Contact] No subject"))
    }

    #[test]
    fn keeps_only_first_line_of_subject() -> Result<()> {
        let composer = NotificationComposer::new(MultilineSubject, None);

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(message.subject, eq("Question"))
    }

    #[test]
    fn drops_subject_text_after_bare_carriage_return() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(
            &composer,
            &submission("Question\rBcc: everyone@example.com", vec![]),
        )
        .unwrap();

        verify_that!(message.subject, eq("[Contact] Question"))
    }

    #[test]
    fn first_line_stops_at_any_line_break() -> Result<()> {
        for text in [
            "Question\nrest",
            "Question\r\nrest",
            "Question\x0brest",
            "Question\x0crest",
            "Question\x1crest",
            "Question\u{85}rest",
            "Question\u{2028}rest",
            "Question\u{2029}rest",
        ] {
            verify_that!(first_line(text), eq("Question"))?;
        }
        verify_that!(first_line(""), eq(""))
    }

    #[test]
    fn attaches_uploaded_bytes_unchanged() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let attachment = RawAttachment {
            filename: Some("photo.png".into()),
            content_type: Some("image/png".into()),
            content: Some(AttachmentContent::Bytes(vec![0x89, 0x50, 0x4e, 0x47])),
        };

        let message = compose(&composer, &submission("Question", vec![attachment])).unwrap();

        verify_that!(
            message.attachments[0].content,
            eq(vec![0x89, 0x50, 0x4e, 0x47])
        )
    }

    #[test]
    fn renders_body_with_submission_data() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(
            message.body,
            all!(
                contains_substring("Name: Ann"),
                contains_substring("Email: ann@example.com"),
                contains_substring("Hi"),
                contains_substring(r#""Contact""#)
            )
        )
    }

    #[test]
    fn composing_twice_yields_identical_message() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let submission = submission("Question", vec![]);

        let first = compose(&composer, &submission).unwrap();
        let second = compose(&composer, &submission).unwrap();

        verify_that!(first.subject, eq(second.subject.as_str()))?;
        verify_that!(first.body, eq(second.body.as_str()))
    }

    #[test]
    fn sends_from_visitor_without_default_sender() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(message.from.email.to_string(), eq("ann@example.com"))
    }

    #[test]
    fn sends_from_default_sender_and_replies_to_visitor() -> Result<()> {
        let default_sender: Mailbox = "Web contact form <noreply@example.com>".parse().unwrap();
        let composer = NotificationComposer::new(BuiltinTemplates, Some(default_sender.clone()));

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(message.from, eq(default_sender))?;
        verify_that!(message.reply_to.email.to_string(), eq("ann@example.com"))?;
        verify_that!(
            message.body,
            contains_substring("<noreply@example.com>.")
        )
    }

    #[test]
    fn reply_to_is_visitor_without_default_sender() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(message.reply_to.email.to_string(), eq("ann@example.com"))?;
        verify_that!(message.reply_to.name, some(eq("Ann")))
    }

    #[test]
    fn sends_to_site_email() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);

        let message = compose(&composer, &submission("Question", vec![])).unwrap();

        verify_that!(
            message.to,
            elements_are![eq("Site owner <owner@example.com>".parse::<Mailbox>().unwrap())]
        )
    }

    #[test]
    fn attaches_uploaded_files_verbatim() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let attachment = RawAttachment {
            filename: Some("notes.txt".into()),
            content_type: Some("text/plain".into()),
            content: Some(AttachmentContent::Base64("aGVsbG8=".into())),
        };

        let message = compose(&composer, &submission("Question", vec![attachment])).unwrap();

        verify_that!(message.attachments.len(), eq(1))?;
        verify_that!(message.attachments[0].filename, eq("notes.txt"))?;
        verify_that!(message.attachments[0].content, eq(b"hello".to_vec()))?;
        verify_that!(
            message.attachments[0].content_type,
            eq(ContentType::parse("text/plain").unwrap())
        )
    }

    #[test]
    fn defaults_attachment_content_type() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let attachment = RawAttachment {
            filename: Some("blob.bin".into()),
            content_type: None,
            content: Some(AttachmentContent::Base64("AAE=".into())),
        };

        let message = compose(&composer, &submission("Question", vec![attachment])).unwrap();

        verify_that!(
            message.attachments[0].content_type,
            eq(ContentType::parse("application/octet-stream").unwrap())
        )
    }

    #[test]
    fn rejects_attachment_which_is_not_base64() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let attachment = RawAttachment {
            filename: Some("notes.txt".into()),
            content_type: Some("text/plain".into()),
            content: Some(AttachmentContent::Base64("not base64!".into())),
        };

        let result = compose(&composer, &submission("Question", vec![attachment]));

        assert!(matches!(
            result,
            Err(DispatchError::MalformedAttachment { index: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn rejects_attachment_without_filename() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let attachment = RawAttachment {
            filename: None,
            content_type: Some("text/plain".into()),
            content: Some(AttachmentContent::Base64("aGVsbG8=".into())),
        };

        let result = compose(&composer, &submission("Question", vec![attachment]));

        assert!(matches!(
            result,
            Err(DispatchError::MalformedAttachment { .. })
        ));
        Ok(())
    }

    #[test]
    fn rejects_attachment_with_invalid_content_type() -> Result<()> {
        let composer = NotificationComposer::new(BuiltinTemplates, None);
        let attachment = RawAttachment {
            filename: Some("notes.txt".into()),
            content_type: Some("not a content type".into()),
            content: Some(AttachmentContent::Base64("aGVsbG8=".into())),
        };

        let result = compose(&composer, &submission("Question", vec![attachment]));

        assert!(matches!(
            result,
            Err(DispatchError::MalformedAttachment { .. })
        ));
        Ok(())
    }
}
