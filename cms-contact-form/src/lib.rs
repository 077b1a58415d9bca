pub mod compose;
pub mod config;
pub mod controller;
mod error_page;
pub mod events;
pub mod form;
pub mod handler;
pub mod mail;
pub mod page;
pub mod secrets;
pub mod spam_guard;
pub mod templates;

pub use compose::{NotificationComposer, NotificationMessage};
pub use config::{ConfigurationError, ContactFormConfig, Settings, SpamProtectionMethod};
pub use controller::{ContactRequest, ControllerError, Rendering, SubmissionController};
pub use events::{SentEvent, SentEventSink};
pub use form::{FieldErrors, RawSubmission, SubmissionForm, ValidSubmission, ValidationError};
pub use handler::ContactFormHandler;
pub use mail::{DispatchError, MailTransport, SmtpMailTransport};
pub use spam_guard::{RequestContext, SpamGuard};
