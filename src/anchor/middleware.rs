//! Bearer-token middleware for the HTTP layer.
//!
//! Protected routes run behind [`require_auth`]; on success the verified
//! [`Claims`] land in the request extensions where handlers extract them.
//! Every failure mode collapses to a single `unauthenticated` response so
//! callers cannot probe which check tripped.

use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;

use crate::anchor::jwt::{Claims, TokenVerifier};

/// Axum middleware enforcing a valid session token.
///
/// Wire it with `middleware::from_fn` plus an `Extension` layer carrying the
/// verifier:
///
/// ```ignore
/// Router::new()
///     .route("/deposit", post(deposit))
///     .layer(middleware::from_fn(require_auth))
///     .layer(Extension(verifier))
/// ```
pub async fn require_auth(
    Extension(verifier): Extension<Arc<dyn TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Some(token) => token,
        None => return unauthenticated(),
    };

    match verifier.verify(&token).await {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => {
            log::debug!("rejected bearer token: {}", err);
            unauthenticated()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthenticated"})),
    )
        .into_response()
}

/// Read the claims a successful [`require_auth`] stored on the request.
pub fn claims_from_request(request: &Request) -> Option<&Claims> {
    request.extensions().get::<Claims>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::jwt::{HmacJwt, TokenMinter};
    use axum::body::Body;
    use axum::routing::get;
    use axum::{middleware, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn authority() -> Arc<HmacJwt> {
        Arc::new(HmacJwt::new(
            b"middleware-test-secret-middleware-test",
            "example.com",
            Duration::from_secs(60),
        ))
    }

    fn protected_app(verifier: Arc<dyn TokenVerifier>) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(claims): Extension<Claims>| async move { claims.sub }),
            )
            .layer(middleware::from_fn(require_auth))
            .layer(Extension(verifier))
    }

    async fn send(app: Router, auth_header: Option<&str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = auth_header {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn subject_claims() -> Claims {
        Claims {
            sub: "GSUBJECT".to_string(),
            iss: String::new(),
            iat: 0,
            exp: 0,
            auth_method: "web_auth".to_string(),
            memo: None,
        }
    }

    #[tokio::test]
    async fn test_valid_token_passes_and_exposes_claims() {
        let authority = authority();
        let token = authority.mint(subject_claims()).await.unwrap();
        let app = protected_app(authority);

        let (status, body) = send(app, Some(&format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "GSUBJECT");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthenticated() {
        let (status, body) = send(protected_app(authority()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("unauthenticated"));
    }

    #[tokio::test]
    async fn test_malformed_header_is_unauthenticated() {
        let (status, _) = send(protected_app(authority()), Some("Token abc")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(protected_app(authority()), Some("Bearer ")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthenticated() {
        let (status, body) = send(protected_app(authority()), Some("Bearer junk")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("unauthenticated"));
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthenticated() {
        let minting = Arc::new(HmacJwt::new(
            b"middleware-test-secret-middleware-test",
            "example.com",
            Duration::from_secs(0),
        ));
        let token = minting.mint(subject_claims()).await.unwrap();
        let (status, _) = send(
            protected_app(authority()),
            Some(&format!("Bearer {}", token)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
