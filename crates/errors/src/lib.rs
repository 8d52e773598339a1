//! Typed error metadata shared across the container service.
//!
//! Every fallible call returns `anyhow::Result<T>`. When a component wants to
//! pin down *which* HTTP status and body a failure should render as, it
//! attaches an [`ErrorMetadata`] to the error chain with `.context(..)`. The
//! HTTP boundary (and nothing else) downcasts the chain back out via
//! [`ErrorMetadataExt`] to decide the response. Errors with no attached
//! metadata are treated as internal and render as 500.

use std::borrow::Cow;

use axum::response::{
    IntoResponse,
    Response,
};
use http::StatusCode;

/// Tag attached to an `anyhow::Error` chain via `.context(..)` to classify
/// how the HTTP boundary should render the failure.
///
/// The `short_msg` is a stable, ScreamingCamelCase tag usable in tests and
/// metrics; `msg` is the human-readable body sent to the client.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    PreconditionFailed,
    MethodNotAllowed,
    Unmounted,
    Internal,
}

impl ErrorCode {
    fn http_status(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            // 507 has no `http::StatusCode` constant; build it from its parts.
            ErrorCode::Unmounted => {
                StatusCode::from_u16(507).expect("507 is a valid status code")
            },
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorMetadata {
    pub fn bad_request(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn not_found(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn conflict(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Conflict,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn precondition_failed(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::PreconditionFailed,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn method_not_allowed(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::MethodNotAllowed,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn unmounted(drive: &str) -> Self {
        Self {
            code: ErrorCode::Unmounted,
            short_msg: "Unmounted".into(),
            msg: format!("{drive} is not mounted").into(),
        }
    }
}

/// Extension methods on `anyhow::Error` for pulling the attached
/// [`ErrorMetadata`] (if any) back out at the HTTP boundary.
pub trait ErrorMetadataExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn http_status(&self) -> StatusCode;
    fn short_msg(&self) -> &str;
    fn user_facing_message(&self) -> String;
}

impl ErrorMetadataExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.chain().find_map(|e| e.downcast_ref::<ErrorMetadata>())
    }

    fn http_status(&self) -> StatusCode {
        self.error_metadata()
            .map(|e| e.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn short_msg(&self) -> &str {
        self.error_metadata().map(|e| e.short_msg.as_ref()).unwrap_or("Internal")
    }

    fn user_facing_message(&self) -> String {
        match self.error_metadata() {
            Some(e) => e.msg.to_string(),
            // No classification: treat as internal and surface the full chain,
            // mirroring the traceback body the reference implementation sends.
            None => format!("{:#}", self),
        }
    }
}

/// Newtype around `anyhow::Error` that every HTTP handler returns; the only
/// site in the service that turns an error chain into a `Response`.
#[derive(Debug)]
pub struct HttpResponseError(pub anyhow::Error);

impl<E> From<E> for HttpResponseError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for HttpResponseError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %format!("{:#}", self.0), "unhandled error");
        }
        (status, self.0.user_facing_message()).into_response()
    }
}
