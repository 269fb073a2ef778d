//! Demo anchor service.
//!
//! Wires the core components against in-memory stores and serves the thin
//! HTTP surface: challenge issuance/verification, authenticated deposit and
//! withdrawal initiation, interactive completion, and status lookup. The
//! payment observer auto-matches withdrawals when a distribution account is
//! configured.

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use stellar_anchor::account::HorizonAccountFetcher;
use stellar_anchor::anchor::manager::{DepositRequest, WithdrawalRequest};
use stellar_anchor::anchor::middleware::require_auth;
use stellar_anchor::anchor::{
    AuthConfig, AuthIssuer, Claims, HmacJwt, ManagerConfig, TokenVerifier, TransferManager,
};
use stellar_anchor::configure::load_config;
use stellar_anchor::errors::{AnchorError, ErrorCode};
use stellar_anchor::models::TransferMode;
use stellar_anchor::observer::{auto_match_payments, HorizonObserver};
use stellar_anchor::signer::{KeypairSigner, TransactionSigner};
use stellar_anchor::store::memory::{MemoryNonceStore, MemoryTransferStore};

struct AppState {
    auth: AuthIssuer,
    manager: Arc<TransferManager>,
}

#[derive(Deserialize)]
struct ChallengeParams {
    account: String,
}

#[derive(Deserialize)]
struct VerifyBody {
    transaction: String,
}

#[derive(Deserialize)]
struct InitiateBody {
    asset_code: String,
    amount: String,
    #[serde(default)]
    interactive: bool,
}

#[derive(Deserialize)]
struct CompleteBody {
    token: String,
    #[serde(default)]
    kyc: HashMap<String, serde_json::Value>,
}

fn error_response(err: &AnchorError) -> Response {
    let status = if err.is_code(ErrorCode::TransitionInvalid) {
        StatusCode::CONFLICT
    } else if err.is_code(ErrorCode::InteractiveTokenInvalid)
        || err.is_code(ErrorCode::ChallengeVerifyFailed)
    {
        StatusCode::FORBIDDEN
    } else if err.is_code(ErrorCode::StoreError) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    };
    let body = Json(serde_json::json!({
        "error": err.code.as_str(),
        "message": err.message,
    }));
    (status, body).into_response()
}

async fn get_challenge(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ChallengeParams>,
) -> Response {
    match state.auth.create_challenge(&params.account).await {
        Ok(transaction) => Json(serde_json::json!({
            "transaction": transaction,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn post_challenge(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<VerifyBody>,
) -> Response {
    match state.auth.verify_challenge(&body.transaction).await {
        Ok(token) => Json(serde_json::json!({"token": token})).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn post_deposit(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<InitiateBody>,
) -> Response {
    let req = DepositRequest {
        account: claims.sub,
        asset_code: body.asset_code,
        amount: body.amount,
        mode: if body.interactive {
            TransferMode::Interactive
        } else {
            TransferMode::Api
        },
        metadata: HashMap::new(),
    };
    match state.manager.initiate_deposit(req).await {
        Ok(result) => Json(serde_json::json!({
            "id": result.id,
            "interactive_url": result.interactive_url,
            "instructions": result.instructions,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn post_withdraw(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<InitiateBody>,
) -> Response {
    let req = WithdrawalRequest {
        account: claims.sub,
        asset_code: body.asset_code,
        amount: body.amount,
        mode: if body.interactive {
            TransferMode::Interactive
        } else {
            TransferMode::Api
        },
        ..Default::default()
    };
    match state.manager.initiate_withdrawal(req).await {
        Ok(result) => Json(serde_json::json!({
            "id": result.id,
            "interactive_url": result.interactive_url,
            "stellar_account": result.stellar_account,
            "stellar_memo": result.stellar_memo,
            "stellar_memo_type": result.stellar_memo_type,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn post_interactive_complete(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CompleteBody>,
) -> Response {
    let transfer = match state.manager.consume_interactive_token(&body.token).await {
        Ok(transfer) => transfer,
        Err(e) => return error_response(&e),
    };
    match state.manager.complete_interactive(&transfer.id, body.kyc).await {
        Ok(()) => Json(serde_json::json!({"id": transfer.id, "status": "ok"})).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_transaction(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.get_status(&id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    let config = load_config().expect("failed to load config");
    let _guard =
        stellar_anchor::logging::setup::setup_dual_logging("anchor_server", &config.log_dir);

    let signer = if config.signing_seed.is_empty() {
        let signer = KeypairSigner::random();
        log::warn!(
            "no signing_seed configured, generated ephemeral server key {}",
            signer.public_key()
        );
        Arc::new(signer)
    } else {
        Arc::new(KeypairSigner::from_secret_seed(&config.signing_seed).expect("bad signing_seed"))
    };

    let jwt_secret = if config.jwt_secret.is_empty() {
        log::warn!("no jwt_secret configured, generated ephemeral secret");
        stellar_anchor::crypto::generate_nonce(32).unwrap()
    } else {
        config.jwt_secret.clone()
    };
    let authority = Arc::new(HmacJwt::new(
        jwt_secret.as_bytes(),
        &config.domain,
        Duration::from_secs(config.jwt_ttl_secs),
    ));

    let mut auth_config = AuthConfig::new(
        &config.domain,
        &config.network_passphrase,
        signer.clone(),
        Arc::new(MemoryNonceStore::new()),
        authority.clone(),
        authority.clone(),
    )
    .with_account_fetcher(Arc::new(HorizonAccountFetcher::new(&config.horizon_url)));
    auth_config.challenge_ttl_secs = config.challenge_ttl_secs as i64;
    let auth = AuthIssuer::new(auth_config).expect("invalid auth config");

    let manager = Arc::new(TransferManager::new(
        Arc::new(MemoryTransferStore::new()),
        ManagerConfig {
            domain: config.domain.clone(),
            interactive_base_url: config.interactive_base_url.clone(),
            distribution_account: config.distribution_account.clone(),
            base_url: config.base_url.clone(),
        },
    ));

    // Observe payments into the distribution account and auto-match
    // withdrawals by memo.
    if !config.distribution_account.is_empty() {
        let observer = Arc::new(
            HorizonObserver::new(&config.horizon_url)
                .with_cursor(&config.observer_start_cursor)
                .with_reconnect_backoff(
                    Duration::from_millis(config.observer_initial_backoff_ms),
                    Duration::from_millis(config.observer_max_backoff_ms),
                ),
        );
        auto_match_payments(observer.as_ref(), manager.clone(), &config.distribution_account)
            .expect("observer wiring failed");
        let shutdown = CancellationToken::new();
        let obs = observer.clone();
        tokio::spawn(async move {
            if let Err(e) = obs.start(shutdown).await {
                log::error!("observer exited: {}", e);
            }
        });
    } else {
        log::warn!("no distribution_account configured, payment observer disabled");
    }

    let verifier: Arc<dyn TokenVerifier> = authority;
    let state = Arc::new(AppState { auth, manager });

    let protected = Router::new()
        .route("/deposit", post(post_deposit))
        .route("/withdraw", post(post_withdraw))
        .route("/transaction/:id", get(get_transaction))
        .layer(middleware::from_fn(require_auth));

    let app = Router::new()
        .route("/auth", get(get_challenge).post(post_challenge))
        .route("/interactive/complete", post(post_interactive_complete))
        .route("/health", get(health))
        .merge(protected)
        .layer(Extension(verifier))
        .layer(Extension(state))
        .layer(CorsLayer::permissive());

    log::info!("anchor server listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("bind failed");
    axum::serve(listener, app).await.expect("server failed");
}
