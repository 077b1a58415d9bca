use crate::serve;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use log::debug;
use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

const COMMENT_CHECK_PATH: &str = "/1.1/comment-check";

/// Text which makes the fake classify a comment as spam when it appears in the
/// author or content.
pub const SPAM_MARKER: &str = "viagra-test-123";

#[derive(Clone)]
pub struct FakeAkismet {
    required_api_key: Cow<'static, str>,
    return_invalid_response: bool,
    response_delay: Option<Duration>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeAkismet {
    pub fn new(required_api_key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_api_key: required_api_key.into(),
            return_invalid_response: false,
            response_delay: None,
            requests: Default::default(),
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn respond_after(self, delay: Duration) -> Self {
        Self {
            response_delay: Some(delay),
            ..self
        }
    }

    /// Raw form bodies of all requests received so far.
    pub fn requests(&self) -> Arc<Mutex<Vec<String>>> {
        self.requests.clone()
    }

    /// Starts serving and returns the comment-check URL.
    pub async fn start(self) -> String {
        let app = Router::new()
            .route(COMMENT_CHECK_PATH, post(comment_check))
            .with_state(self);
        let address = serve(app).await;
        format!("http://{address}{COMMENT_CHECK_PATH}")
    }
}

async fn comment_check(State(state): State<FakeAkismet>, body: Bytes) -> Response {
    let body = String::from_utf8_lossy(&body).into_owned();
    debug!("Akismet got request {body}");
    state.requests.lock().unwrap().push(body.clone());
    if let Some(delay) = state.response_delay {
        tokio::time::sleep(delay).await;
    }
    let fields: HashMap<String, String> = serde_urlencoded::from_str(&body).unwrap_or_default();
    let field = |name: &str| fields.get(name).map(String::as_str).unwrap_or_default();

    if state.return_invalid_response {
        (StatusCode::OK, "Something unexpected").into_response()
    } else if field("api_key") != state.required_api_key {
        (
            StatusCode::OK,
            [("X-akismet-debug-help", "Empty \"api_key\" value or invalid key")],
            "invalid",
        )
            .into_response()
    } else if field("comment_author").contains(SPAM_MARKER)
        || field("comment_content").contains(SPAM_MARKER)
    {
        (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "true").into_response()
    } else {
        (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "false").into_response()
    }
}
