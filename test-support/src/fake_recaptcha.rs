use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/recaptcha/api/siteverify";

/// Stand-in for the reCAPTCHA `siteverify` endpoint.
///
/// Each instance listens on its own ephemeral port, so tests using it do not need to be
/// serialised.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_response: Option<String>,
    return_invalid_response: bool,
    return_server_error: bool,
    requests: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    secret: String,
    response: String,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(rename = "error-codes", skip_serializing_if = "Vec::is_empty")]
    error_codes: Vec<String>,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_response: None,
            return_invalid_response: false,
            return_server_error: false,
            requests: Default::default(),
        }
    }

    /// Only accept the given token; any other token is reported as `invalid-input-response`.
    pub fn require_response(self, required_response: impl AsRef<str>) -> Self {
        Self {
            required_response: Some(required_response.as_ref().into()),
            ..self
        }
    }

    /// Answer with a body that is not JSON.
    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    /// Answer every request with HTTP 500.
    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    /// Handle on the number of verification requests received, usable after [`Self::start`].
    pub fn request_counter(&self) -> Arc<AtomicUsize> {
        self.requests.clone()
    }

    /// Binds an ephemeral local port, serves in the background and returns the verify URL.
    pub async fn start(self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{VERIFY_PATH}")
    }
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequestPayload>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if state.return_server_error {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if payload.secret != state.required_secret {
        failure("invalid-input-secret")
    } else if payload.response.is_empty() {
        failure("missing-input-response")
    } else if state
        .required_response
        .as_ref()
        .is_some_and(|required| *required != payload.response)
    {
        failure("invalid-input-response")
    } else {
        Json(VerifyResponsePayload {
            success: true,
            error_codes: vec![],
        })
        .into_response()
    }
}

fn failure(error_code: &str) -> Response {
    Json(VerifyResponsePayload {
        success: false,
        error_codes: vec![error_code.into()],
    })
    .into_response()
}
