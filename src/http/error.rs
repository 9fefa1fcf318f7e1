//! API error type and the JSON extractors that report through it.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;

use crate::booking::BookingError;
use crate::engine::EngineError;
use crate::lifecycle::TransitionError;
use crate::payment::{GatewayError, SignatureError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("missing or invalid admin token")]
    Unauthorized,
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Engine(e) => ApiError::Engine(e),
            BookingError::Gateway(e) => ApiError::Gateway(e),
        }
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                EngineError::Validation(_) | EngineError::LimitExceeded(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "validation")
                }
                EngineError::SlotUnavailable { .. } => (StatusCode::CONFLICT, "slot_unavailable"),
                EngineError::Transition(TransitionError::NotPermitted { .. }) => (StatusCode::FORBIDDEN, "forbidden"),
                EngineError::Transition(_) => (StatusCode::CONFLICT, "illegal_transition"),
                EngineError::WalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
            ApiError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway"),
            ApiError::Signature(_) => (StatusCode::BAD_REQUEST, "signature"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        metrics::counter!(crate::observability::API_ERRORS_TOTAL, "code" => code).increment(1);
        if status.is_server_error() {
            tracing::error!(code, "request failed: {self}");
        }
        let body = serde_json::json!({ "error": self.to_string(), "code": code });
        (status, axum::Json(body)).into_response()
    }
}

/// `axum::Json` whose rejections come back as `ApiError::Validation`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::Validation(rejection.body_text())
}

/// `axum::extract::Query` with the same rejection treatment.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        axum::extract::Query::<T>::from_request_parts(parts, state)
            .await
            .map(|q| Self(q.0))
            .map_err(|rejection: QueryRejection| ApiError::Validation(rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn status(err: ApiError) -> (StatusCode, &'static str) {
        err.status_and_code()
    }

    #[test]
    fn engine_errors_map_to_stable_codes() {
        assert_eq!(
            status(EngineError::SlotUnavailable { conflicting: Ulid::new() }.into()),
            (StatusCode::CONFLICT, "slot_unavailable")
        );
        assert_eq!(
            status(EngineError::validation("bad").into()),
            (StatusCode::UNPROCESSABLE_ENTITY, "validation")
        );
        assert_eq!(
            status(EngineError::NotFound(Ulid::new()).into()),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            status(EngineError::WalError("disk".into()).into()),
            (StatusCode::INTERNAL_SERVER_ERROR, "storage")
        );
    }

    #[test]
    fn transition_errors() {
        use crate::lifecycle::Actor;
        use crate::model::StatusKind;
        let illegal: EngineError = TransitionError::Illegal {
            from: StatusKind::Expired,
            transition: "cancel",
        }
        .into();
        assert_eq!(status(illegal.into()), (StatusCode::CONFLICT, "illegal_transition"));
        let forbidden: EngineError = TransitionError::NotPermitted {
            actor: Actor::Customer,
            transition: "restore",
        }
        .into();
        assert_eq!(status(forbidden.into()), (StatusCode::FORBIDDEN, "forbidden"));
    }

    #[test]
    fn outer_errors() {
        assert_eq!(
            status(GatewayError::Transport("down".into()).into()),
            (StatusCode::BAD_GATEWAY, "gateway")
        );
        assert_eq!(status(SignatureError::Mismatch.into()), (StatusCode::BAD_REQUEST, "signature"));
        assert_eq!(status(ApiError::Unauthorized), (StatusCode::UNAUTHORIZED, "unauthorized"));
    }
}
