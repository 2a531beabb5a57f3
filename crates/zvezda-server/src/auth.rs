use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zvezda_core::ZvezdaError;

use crate::error::AppError;
use crate::state::AppState;

/// Axum middleware that requires HTTP Basic credentials on every request.
///
/// On success the verified [`zvezda_core::Identity`] is stored in the request
/// extensions for the handlers. Missing, malformed and wrong credentials all
/// produce the same 401 with a `WWW-Authenticate` challenge.
///
/// Argon2 checks run only while holding a permit from
/// `AppState::verifications`. A request that cannot get one within
/// `verification_wait` is answered with 503 without touching the credential
/// store.
pub async fn require_basic_auth(
    State(app): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some((username, secret)) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic)
    else {
        tracing::info!(path = %req.uri().path(), "request without credentials");
        return AppError::unauthorized().into_response();
    };

    let permit = match tokio::time::timeout(
        app.verification_wait,
        Arc::clone(&app.verifications).acquire_owned(),
    )
    .await
    {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) | Err(_) => {
            tracing::warn!(path = %req.uri().path(), "credential verification saturated, shedding request");
            return AppError(ZvezdaError::Overloaded.into()).into_response();
        }
    };

    // Argon2 verification is CPU bound; keep it off the async workers. The
    // permit moves into the blocking task so it is held until the hash is
    // done, even if the client disconnects first.
    let gate = Arc::clone(&app.gate);
    let verified = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        gate.authenticate(&username, &secret)
    })
    .await;

    match verified {
        Ok(Ok(identity)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Ok(Err(_)) => AppError::unauthorized().into_response(),
        Err(e) => AppError(anyhow::anyhow!("auth join error: {e}")).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decode an `Authorization: Basic <base64(user:secret)>` header value.
fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, secret) = decoded.split_once(':')?;
    Some((username.to_string(), secret.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[test]
    fn parses_username_and_secret() {
        assert_eq!(
            parse_basic(&encode("alice:open sesame")),
            Some(("alice".into(), "open sesame".into()))
        );
    }

    #[test]
    fn secret_may_contain_colons() {
        assert_eq!(
            parse_basic(&encode("alice:a:b:c")),
            Some(("alice".into(), "a:b:c".into()))
        );
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let value = format!("basic {}", STANDARD.encode("alice:pw"));
        assert!(parse_basic(&value).is_some());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(parse_basic("Bearer abc"), None);
        assert_eq!(parse_basic("Basic !!!not-base64"), None);
        assert_eq!(parse_basic(&encode("no-colon")), None);
        assert_eq!(parse_basic("Basic"), None);
    }
}
