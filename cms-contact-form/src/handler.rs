use crate::{
    controller::{ContactRequest, ControllerError, SubmissionController},
    error_page::render_error_page,
    events::SentEventSink,
    form::{AttachmentContent, RawAttachment, RawSubmission},
    mail::MailTransport,
    page::render_page,
    spam_guard::{recaptcha::RECAPTCHA_RESPONSE_FIELD, RequestContext},
};
use futures::stream;
use lambda_http::{
    http::{header, HeaderMap, Method, StatusCode},
    Body, Error, Request, RequestPayloadExt, Response,
};
use multer::Multipart;
use std::convert::Infallible;
use tracing::{debug, error};

const UNABLE_TO_RETRIEVE: &str = "(Unable to retrieve)";

/// Serves one contact form over Lambda HTTP events.
pub struct ContactFormHandler<MailTransportT, EventSinkT> {
    controller: SubmissionController<MailTransportT, EventSinkT>,
}

impl<MailTransportT: MailTransport, EventSinkT: SentEventSink>
    ContactFormHandler<MailTransportT, EventSinkT>
{
    pub fn new(controller: SubmissionController<MailTransportT, EventSinkT>) -> Self {
        Self { controller }
    }

    pub async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        match self.process_request(event).await {
            Ok(page) => Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(page.into())
                .unwrap()),
            Err(error) => {
                error.log();
                Ok(error.into_response())
            }
        }
    }

    async fn process_request(&self, event: Request) -> Result<String, HandlerError> {
        let method = event.method().clone();
        let request = if method == Method::GET || method == Method::HEAD {
            ContactRequest::Read
        } else if method == Method::POST {
            let context = request_context(event.headers());
            let input = submission_from_request(&event).await?;
            ContactRequest::Submit { input, context }
        } else {
            return Err(HandlerError::MethodNotAllowed(method));
        };
        let rendering = self.controller.handle(request).await?;
        render_page(&rendering).map_err(|error| HandlerError::InternalError {
            description: format!("Error rendering contact page: {error}"),
            subject: UNABLE_TO_RETRIEVE.into(),
            body: UNABLE_TO_RETRIEVE.into(),
        })
    }
}

async fn submission_from_request(event: &Request) -> Result<RawSubmission, HandlerError> {
    let content_type = event
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("multipart/form-data") {
        return read_multipart(content_type, event.body().as_ref())
            .await
            .map_err(|error| HandlerError::ClientError(format!("Unreadable form data: {error}")));
    }
    match event.payload::<RawSubmission>() {
        Ok(Some(input)) => Ok(input),
        Ok(None) => Err(HandlerError::ClientError("Missing form data".into())),
        Err(error) => Err(HandlerError::ClientError(format!(
            "Unreadable form data: {error}"
        ))),
    }
}

/// Reads a browser form post. Every part with a filename is an attachment;
/// the remaining parts are the form fields.
async fn read_multipart(content_type: &str, body: &[u8]) -> Result<RawSubmission, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let body = stream::iter([Ok::<_, Infallible>(body.to_vec())]);
    let mut multipart = Multipart::new(body, boundary);
    let mut input = RawSubmission::default();
    while let Some(field) = multipart.next_field().await? {
        if let Some(filename) = field.file_name().map(String::from) {
            // A file input left empty still sends a part, with an empty filename.
            if filename.is_empty() {
                continue;
            }
            let content_type = field.content_type().map(ToString::to_string);
            let content = field.bytes().await?;
            debug!("Received attachment {filename} ({} bytes)", content.len());
            input.attachments.push(RawAttachment {
                filename: Some(filename),
                content_type,
                content: Some(AttachmentContent::Bytes(content.to_vec())),
            });
            continue;
        }
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await?;
        match name.as_str() {
            "name" => input.name = value,
            "email" => input.email = value,
            "subject" => input.subject = value,
            "message" | "content" | "body" => input.message = value,
            "accept_terms" => input.accept_terms = Some(value),
            RECAPTCHA_RESPONSE_FIELD => input.recaptcha_response = Some(value),
            _ => debug!("Ignoring unknown form field {name}"),
        }
    }
    Ok(input)
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
    };
    RequestContext {
        // The first entry is the client, the rest are proxies.
        remote_ip: header_value("x-forwarded-for").and_then(|value| {
            value
                .split(',')
                .next()
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
        }),
        user_agent: header_value(header::USER_AGENT.as_str()),
        referrer: header_value(header::REFERER.as_str()),
        host: header_value(header::HOST.as_str()),
    }
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error("Internal error: {description}")]
    InternalError {
        description: String,
        subject: String,
        body: String,
    },
    #[error("Client error: {0}")]
    ClientError(String),
    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),
}

impl From<ControllerError> for HandlerError {
    fn from(error: ControllerError) -> Self {
        match error {
            ControllerError::Dispatch { error, submission } => HandlerError::InternalError {
                description: error.to_string(),
                subject: submission.subject_line().into(),
                body: submission.data().message.clone(),
            },
        }
    }
}

impl HandlerError {
    fn log(&self) {
        match self {
            HandlerError::InternalError { description, .. } => {
                error!("Internal error handling contact form: {description}");
            }
            HandlerError::ClientError(description) => {
                error!("Client error handling contact form: {description}");
            }
            HandlerError::MethodNotAllowed(method) => {
                error!("Client error handling contact form: method {method} not allowed");
            }
        }
    }

    fn into_response(self) -> Response<Body> {
        match self {
            HandlerError::InternalError { subject, body, .. } => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(render_error_page(subject.as_str(), body.as_str()).into())
                .unwrap(),
            HandlerError::ClientError(description) => Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(format!("Client error: {description}").into())
                .unwrap(),
            HandlerError::MethodNotAllowed(_) => Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(header::ALLOW, "GET, HEAD, POST")
                .body(Body::Empty)
                .unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{request_context, ContactFormHandler};
    use crate::{
        compose::{NotificationComposer, NotificationMessage},
        config::{ContactFormConfig, Settings},
        controller::SubmissionController,
        events::TracingEventSink,
        mail::{DispatchError, MailTransport},
        spam_guard::RequestContext,
        templates::BuiltinTemplates,
    };
    use async_trait::async_trait;
    use googletest::prelude::*;
    use lambda_http::{
        http::{HeaderMap, HeaderValue, Method},
        Body, Request,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<NotificationMessage>>>,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, message: &NotificationMessage) -> std::result::Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::Connect("connection refused".into()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn handler(transport: RecordingTransport) -> ContactFormHandler<RecordingTransport, TracingEventSink> {
        ContactFormHandler::new(
            SubmissionController::new(
                ContactFormConfig::new("Contact", "owner@example.com"),
                Settings::default(),
                NotificationComposer::new(BuiltinTemplates, None),
                transport,
                TracingEventSink,
            )
            .unwrap(),
        )
    }

    fn request(method: Method, content_type: &'static str, body: &str) -> Request {
        let mut event = Request::new(Body::Text(body.into()));
        *event.method_mut() = method;
        event
            .headers_mut()
            .append("Content-Type", HeaderValue::from_static(content_type));
        event
    }

    fn body_text(body: &Body) -> String {
        match body {
            Body::Text(text) => text.clone(),
            Body::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Body::Empty => String::new(),
        }
    }

    #[tokio::test]
    async fn renders_form_on_get() -> Result<()> {
        let subject = handler(RecordingTransport::default());

        let response = subject.handle(Request::default()).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        verify_that!(
            response.headers().get("Content-Type"),
            some(eq("text/html; charset=utf-8"))
        )?;
        verify_that!(body_text(response.body()), contains_substring("<form"))
    }

    #[tokio::test]
    async fn sends_json_submission() -> Result<()> {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone());
        let event = request(
            Method::POST,
            "application/json",
            r#"{"name":"Ann","email":"ann@example.com","subject":"","message":"Hi"}"#,
        );

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        verify_that!(
            body_text(response.body()),
            contains_substring("Thank you for your message.")
        )?;
        let sent = transport.sent.lock().unwrap().len();
        verify_that!(sent, eq(1))
    }

    #[tokio::test]
    async fn sends_urlencoded_submission() -> Result<()> {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone());
        let event = request(
            Method::POST,
            "application/x-www-form-urlencoded",
            "name=Ann&email=ann%40example.com&subject=Question&message=Hi&accept_terms=",
        );

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        let sent = transport.sent.lock().unwrap();
        verify_that!(sent.len(), eq(1))?;
        verify_that!(sent[0].subject, eq("[Contact] Question"))
    }

    const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data; boundary=contact-form-boundary";

    fn multipart_body(file: Option<(&str, &str)>) -> String {
        let mut body = String::new();
        for (name, value) in [
            ("name", "Ann"),
            ("email", "ann@example.com"),
            ("subject", "Question"),
            ("message", "Hi"),
            ("accept_terms", ""),
        ] {
            body.push_str(&format!(
                "--contact-form-boundary\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        let (filename, content) = file.unwrap_or(("", ""));
        body.push_str(&format!(
            "--contact-form-boundary\r\nContent-Disposition: form-data; name=\"attachments\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
        ));
        body.push_str("--contact-form-boundary--\r\n");
        body
    }

    #[tokio::test]
    async fn sends_multipart_submission_with_attachment() -> Result<()> {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone());
        let event = request(
            Method::POST,
            MULTIPART_CONTENT_TYPE,
            &multipart_body(Some(("notes.txt", "hello"))),
        );

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        let sent = transport.sent.lock().unwrap().clone();
        verify_that!(sent.len(), eq(1))?;
        verify_that!(sent[0].subject, eq("[Contact] Question"))?;
        verify_that!(sent[0].attachments.len(), eq(1))?;
        verify_that!(sent[0].attachments[0].filename, eq("notes.txt"))?;
        verify_that!(sent[0].attachments[0].content, eq(b"hello".to_vec()))
    }

    #[tokio::test]
    async fn ignores_empty_file_input() -> Result<()> {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone());
        let event = request(Method::POST, MULTIPART_CONTENT_TYPE, &multipart_body(None));

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        let sent = transport.sent.lock().unwrap().clone();
        verify_that!(sent.len(), eq(1))?;
        verify_that!(sent[0].attachments.len(), eq(0))
    }

    #[tokio::test]
    async fn returns_400_for_multipart_without_boundary() -> Result<()> {
        let subject = handler(RecordingTransport::default());
        let event = request(Method::POST, "multipart/form-data", "name=Ann");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))
    }

    #[tokio::test]
    async fn rerenders_form_when_trap_is_filled() -> Result<()> {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone());
        let event = request(
            Method::POST,
            "application/x-www-form-urlencoded",
            "name=Ann&email=ann%40example.com&message=Hi&accept_terms=bot",
        );

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        verify_that!(
            body_text(response.body()),
            contains_substring("Your message could not be sent.")
        )?;
        let sent = transport.sent.lock().unwrap().len();
        verify_that!(sent, eq(0))
    }

    #[tokio::test]
    async fn returns_400_without_payload() -> Result<()> {
        let subject = handler(RecordingTransport::default());
        let event = request(Method::POST, "text/plain", "Hi");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))
    }

    #[tokio::test]
    async fn returns_400_for_malformed_json() -> Result<()> {
        let subject = handler(RecordingTransport::default());
        let event = request(Method::POST, "application/json", "{not json");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))
    }

    #[tokio::test]
    async fn returns_405_for_other_methods() -> Result<()> {
        let subject = handler(RecordingTransport::default());
        let event = request(Method::DELETE, "application/json", "");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(405))
    }

    #[tokio::test]
    async fn returns_error_page_with_message_when_sending_fails() -> Result<()> {
        let subject = handler(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let event = request(
            Method::POST,
            "application/json",
            r#"{"name":"Ann","email":"ann@example.com","subject":"Message subject","message":"Message body"}"#,
        );

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(500))?;
        verify_that!(
            body_text(response.body()),
            all!(
                contains_substring("Something went wrong"),
                contains_substring("Message subject"),
                contains_substring("Message body")
            )
        )
    }

    #[test]
    fn extracts_requester_metadata() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("192.0.2.1, 10.0.0.1"));
        headers.insert("User-Agent", HeaderValue::from_static("Mozilla/5.0"));
        headers.insert("Host", HeaderValue::from_static("example.com"));

        verify_that!(
            request_context(&headers),
            eq(RequestContext {
                remote_ip: Some("192.0.2.1".into()),
                user_agent: Some("Mozilla/5.0".into()),
                referrer: None,
                host: Some("example.com".into()),
            })
        )
    }
}
