use anyhow::Context;
use cms_contact_form::{
    events::TracingEventSink,
    secrets::{AwsSecretsManagerSecretRepository, SecretRepository},
    ContactFormConfig, ContactFormHandler, NotificationComposer, Settings, SmtpMailTransport,
    SubmissionController,
};
use lambda_http::{run, service_fn, Error};

const DEFAULT_CONFIG_PATH: &str = "contact-form.json";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let handler = build_handler().await?;
    run(service_fn(|event| handler.handle(event))).await
}

async fn build_handler() -> anyhow::Result<
    ContactFormHandler<SmtpMailTransport<AwsSecretsManagerSecretRepository>, TracingEventSink>,
> {
    let settings = Settings::from_env().context("Invalid environment")?;
    let config_path =
        std::env::var("CONTACT_FORM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let config = ContactFormConfig::load(&config_path)
        .with_context(|| format!("Could not load contact form configuration {config_path}"))?;
    let composer = NotificationComposer::from_settings(&settings);
    let transport = SmtpMailTransport::from_env(AwsSecretsManagerSecretRepository::open().await);
    let controller =
        SubmissionController::new(config, settings, composer, transport, TracingEventSink)
            .context("Invalid contact form configuration")?;
    Ok(ContactFormHandler::new(controller))
}
