use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use zvezda_core::ZvezdaError;

/// Challenge sent with every 401 so browsers prompt for credentials.
pub const BASIC_CHALLENGE: &str = r#"Basic realm="restricted", charset="UTF-8""#;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn unauthorized() -> Self {
        Self(ZvezdaError::Unauthorized.into())
    }
}

/// `Retry-After` takes whole seconds; round up so a client honoring it never
/// comes back early.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(e) = self.0.downcast_ref::<ZvezdaError>() else {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
            let body = serde_json::json!({ "error": self.0.to_string() });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
        };

        let status = match e {
            ZvezdaError::Unauthorized => StatusCode::UNAUTHORIZED,
            ZvezdaError::TooEarly { .. } => StatusCode::TOO_EARLY,
            ZvezdaError::UnknownDoor(_) | ZvezdaError::UserNotFound(_) => StatusCode::NOT_FOUND,
            ZvezdaError::ShuttingDown(_) | ZvezdaError::Overloaded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ZvezdaError::UserExists(_) => StatusCode::CONFLICT,
            ZvezdaError::PasswordTooShort { .. } | ZvezdaError::InvalidUsername(_) => {
                StatusCode::BAD_REQUEST
            }
            ZvezdaError::HardwareFault { .. }
            | ZvezdaError::InvalidConfig(_)
            | ZvezdaError::InvalidTiming(_)
            | ZvezdaError::PasswordHash(_)
            | ZvezdaError::CredentialDb(_)
            | ZvezdaError::Io(_)
            | ZvezdaError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }

        let body = match e {
            // One fixed body for every authentication failure.
            ZvezdaError::Unauthorized => serde_json::json!({ "error": "unauthorized" }),
            ZvezdaError::TooEarly { remaining, .. } => serde_json::json!({
                "error": e.to_string(),
                "retry_after_ms": remaining.as_millis() as u64,
            }),
            _ => serde_json::json!({ "error": e.to_string() }),
        };

        let mut response = (status, axum::Json(body)).into_response();
        match e {
            ZvezdaError::Unauthorized => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(BASIC_CHALLENGE),
                );
            }
            ZvezdaError::TooEarly { remaining, .. } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*remaining)));
            }
            ZvezdaError::Overloaded => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            }
            _ => {}
        }
        response
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: ZvezdaError) -> StatusCode {
        AppError(e.into()).into_response().status()
    }

    #[test]
    fn unauthorized_maps_to_401_with_challenge() {
        let response = AppError::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_CHALLENGE
        );
    }

    #[test]
    fn too_early_maps_to_425_with_retry_after() {
        let response = AppError(
            ZvezdaError::TooEarly {
                door: "inner".into(),
                remaining: Duration::from_millis(6_200),
            }
            .into(),
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_EARLY);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn unknown_door_maps_to_404() {
        assert_eq!(
            status_of(ZvezdaError::UnknownDoor("garage".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn hardware_fault_maps_to_500() {
        assert_eq!(
            status_of(ZvezdaError::HardwareFault {
                door: "inner".into(),
                reason: "relay stuck".into(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn shutting_down_maps_to_503() {
        assert_eq!(
            status_of(ZvezdaError::ShuttingDown("inner".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn overloaded_maps_to_503_with_retry_after() {
        let response = AppError(ZvezdaError::Overloaded.into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn non_zvezda_error_maps_to_500() {
        let response = AppError(anyhow::anyhow!("something unexpected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(7)), 7);
        assert_eq!(retry_after_secs(Duration::from_millis(6_001)), 7);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
