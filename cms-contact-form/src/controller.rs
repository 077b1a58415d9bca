use crate::{
    compose::NotificationComposer,
    config::{ConfigurationError, ContactFormConfig, Settings},
    events::{SentEvent, SentEventSink},
    form::{Field, FieldErrors, RawSubmission, SubmissionForm, ValidSubmission},
    mail::{DispatchError, MailTransport},
    spam_guard::{RequestContext, SpamGuard},
};
use serde::Serialize;
use tracing::{debug, info};

/// What the visitor asked the contact form to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactRequest {
    /// Show the form.
    Read,
    Submit {
        input: RawSubmission,
        context: RequestContext,
    },
}

/// The context handed to the page template.
///
/// `form` is absent once a message was sent, in which case the page shows the
/// thanks text instead.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Rendering {
    pub contact: ContactView,
    pub form: Option<FormView>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ContactView {
    pub form_name: String,
    pub thanks: String,
    pub submit: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FormView {
    pub labels: FieldTexts,
    pub values: FieldTexts,
    pub errors: FieldMessages,
    pub general_error: Option<String>,
    pub spam_protection: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTexts {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMessages {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

impl From<&FieldErrors> for FieldMessages {
    fn from(errors: &FieldErrors) -> Self {
        let message_for = |field| errors.get(field).map(|error| error.to_string());
        Self {
            name: message_for(Field::Name),
            email: message_for(Field::Email),
            subject: message_for(Field::Subject),
            message: message_for(Field::Message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Could not send notification: {error}")]
    Dispatch {
        #[source]
        error: DispatchError,
        submission: Box<ValidSubmission>,
    },
}

/// Runs one contact form instance: renders it, validates submissions, and
/// sends accepted ones on.
pub struct SubmissionController<MailTransportT, EventSinkT> {
    config: ContactFormConfig,
    guard: SpamGuard,
    composer: NotificationComposer,
    transport: MailTransportT,
    events: EventSinkT,
}

impl<MailTransportT: MailTransport, EventSinkT: SentEventSink>
    SubmissionController<MailTransportT, EventSinkT>
{
    /// Fails if the recipient address or the selected spam protection is
    /// misconfigured, so that no request is served with a broken setup.
    pub fn new(
        config: ContactFormConfig,
        settings: Settings,
        composer: NotificationComposer,
        transport: MailTransportT,
        events: EventSinkT,
    ) -> Result<Self, ConfigurationError> {
        config.site_mailbox()?;
        let guard = SpamGuard::from_config(&config, &settings)?;
        debug!(
            "Contact form \"{}\" uses {} spam protection",
            config.form_name,
            guard.method()
        );
        Ok(Self {
            config,
            guard,
            composer,
            transport,
            events,
        })
    }

    pub fn config(&self) -> &ContactFormConfig {
        &self.config
    }

    pub async fn handle(&self, request: ContactRequest) -> Result<Rendering, ControllerError> {
        match request {
            ContactRequest::Read => {
                let form = SubmissionForm::unbound(&self.guard);
                Ok(self.form_rendering(&form, &FieldErrors::default()))
            }
            ContactRequest::Submit { input, context } => {
                let form = SubmissionForm::bound(&self.guard, input);
                match form.validate(&context).await {
                    Ok(submission) => {
                        debug!("Submission accepted");
                        self.accept(submission).await
                    }
                    Err(errors) => {
                        debug!("Submission rejected: {errors:?}");
                        Ok(self.form_rendering(&form, &errors))
                    }
                }
            }
        }
    }

    async fn accept(&self, submission: ValidSubmission) -> Result<Rendering, ControllerError> {
        if let Err(error) = self.dispatch(&submission).await {
            return Err(ControllerError::Dispatch {
                error,
                submission: Box::new(submission),
            });
        }
        info!(
            "Sent notification for contact form \"{}\"",
            self.config.form_name
        );
        self.events.publish(SentEvent {
            form_name: self.config.form_name.clone(),
            data: submission.data().clone(),
        });
        Ok(Rendering {
            contact: self.contact_view(),
            form: None,
        })
    }

    async fn dispatch(&self, submission: &ValidSubmission) -> Result<(), DispatchError> {
        let message = self.composer.compose(submission, &self.config)?;
        self.transport.send(&message).await
    }

    fn form_rendering(&self, form: &SubmissionForm, errors: &FieldErrors) -> Rendering {
        let values = form
            .input()
            .map(|input| FieldTexts {
                name: input.name.clone(),
                email: input.email.clone(),
                subject: input.subject.clone(),
                message: input.message.clone(),
            })
            .unwrap_or_default();
        Rendering {
            contact: self.contact_view(),
            form: Some(FormView {
                labels: FieldTexts {
                    name: self.config.name_label.clone(),
                    email: self.config.email_label.clone(),
                    subject: self.config.subject_label.clone(),
                    message: self.config.content_label.clone(),
                },
                values,
                errors: errors.into(),
                general_error: errors.general().map(|error| error.to_string()),
                spam_protection: form.guard().widget_html(),
            }),
        }
    }

    fn contact_view(&self) -> ContactView {
        ContactView {
            form_name: self.config.form_name.clone(),
            thanks: self.config.thanks.clone(),
            submit: self.config.submit.clone(),
        }
    }
}
