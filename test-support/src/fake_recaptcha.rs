use crate::serve;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
    time::Duration,
};

const SITEVERIFY_PATH: &str = "/recaptcha/api/siteverify";

#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_response: Option<String>,
    return_invalid_response: bool,
    response_delay: Option<Duration>,
    requests: Arc<Mutex<Vec<String>>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SiteverifyRequest {
    secret: String,
    response: String,
}

#[derive(Serialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(rename = "error-codes", skip_serializing_if = "Vec::is_empty")]
    error_codes: Vec<&'static str>,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_response: None,
            return_invalid_response: false,
            response_delay: None,
            requests: Default::default(),
        }
    }

    pub fn require_response(self, required_response: impl AsRef<str>) -> Self {
        Self {
            required_response: Some(required_response.as_ref().into()),
            ..self
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

    /// Starts serving and returns the siteverify URL.
    pub async fn start(self) -> String {
        let app = Router::new()
            .route(SITEVERIFY_PATH, post(siteverify))
            .with_state(self);
        let address = serve(app).await;
        format!("http://{address}{SITEVERIFY_PATH}")
    }
}

async fn siteverify(State(state): State<FakeRecaptcha>, body: Bytes) -> Response {
    let body = String::from_utf8_lossy(&body).into_owned();
    debug!("reCAPTCHA got request {body}");
    state.requests.lock().unwrap().push(body.clone());
    if let Some(delay) = state.response_delay {
        tokio::time::sleep(delay).await;
    }
    let request: SiteverifyRequest = serde_urlencoded::from_str(&body).unwrap_or_default();

    if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if request.secret.is_empty() {
        verdict(false, vec!["missing-input-secret"])
    } else if request.secret != state.required_secret {
        verdict(false, vec!["invalid-input-secret"])
    } else if request.response.is_empty() {
        verdict(false, vec!["missing-input-response"])
    } else if state.required_response.is_some()
        && Some(request.response) != state.required_response
    {
        verdict(false, vec!["invalid-input-response"])
    } else {
        verdict(true, vec![])
    }
}

fn verdict(success: bool, error_codes: Vec<&'static str>) -> Response {
    Json(SiteverifyResponse {
        success,
        error_codes,
    })
    .into_response()
}
