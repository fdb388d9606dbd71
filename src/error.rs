use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy of the booking core.
///
/// Conflicts are user-correctable and never retried automatically.
/// Storage failures are logged and surfaced; the booking path itself
/// never retries a write, since a blind retry risks double-booking.
#[derive(Debug, Error)]
pub enum BookingError {
    /// A non-expired guard lock with the same order signature exists.
    #[error("previous request still processing")]
    DuplicateRequest,

    /// One or more requested seats already carry an active booking.
    #[error("seats unavailable: {}", .0.join(", "))]
    SeatsUnavailable(Vec<String>),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Illegal state transition, e.g. cancelling a paid order.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage error")]
    Store(#[from] sqlx::Error),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::DuplicateRequest => StatusCode::CONFLICT,
            BookingError::SeatsUnavailable(_) => StatusCode::CONFLICT,
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        if let BookingError::Store(ref e) = self {
            tracing::error!("storage error in booking path: {:?}", e);
        }

        let status = self.status_code();
        let message = match &self {
            // Do not leak driver errors to clients.
            BookingError::Store(_) => "internal storage error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_map_to_409() {
        assert_eq!(
            BookingError::DuplicateRequest.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BookingError::SeatsUnavailable(vec!["A1".into()]).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn invariant_violation_is_unprocessable() {
        let err = BookingError::InvariantViolation("cannot cancel a paid order".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn seat_conflict_message_lists_seat_labels() {
        let err = BookingError::SeatsUnavailable(vec!["A1".into(), "A2".into()]);
        assert_eq!(err.to_string(), "seats unavailable: A1, A2");
    }
}
