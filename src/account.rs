//! Account signer lookup.
//!
//! The challenge verifier needs the signer set and thresholds of the
//! authenticating account to honor multisig configurations. The fetcher is
//! optional: without one, verification falls back to master-key-only.

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{AnchorError, ErrorCode, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSigner {
    pub key: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountThresholds {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

/// Resolves the signers and thresholds of a ledger account.
///
/// An unfunded account must be reported as `ACCOUNT_NOT_FOUND`; any other
/// failure is a transport problem.
#[async_trait]
pub trait AccountFetcher: Send + Sync {
    async fn fetch_signers(
        &self,
        account: &str,
    ) -> Result<(Vec<AccountSigner>, AccountThresholds)>;
}

#[derive(Debug, Deserialize)]
struct HorizonSigner {
    key: String,
    weight: u32,
}

#[derive(Debug, Deserialize)]
struct HorizonThresholds {
    low_threshold: u32,
    med_threshold: u32,
    high_threshold: u32,
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    signers: Vec<HorizonSigner>,
    thresholds: HorizonThresholds,
}

/// Horizon-backed account fetcher.
pub struct HorizonAccountFetcher {
    horizon_url: String,
    client: reqwest::Client,
}

impl HorizonAccountFetcher {
    pub fn new(horizon_url: impl Into<String>) -> Self {
        Self {
            horizon_url: horizon_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AccountFetcher for HorizonAccountFetcher {
    async fn fetch_signers(
        &self,
        account: &str,
    ) -> Result<(Vec<AccountSigner>, AccountThresholds)> {
        let url = format!("{}/accounts/{}", self.horizon_url, account);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AnchorError::core(ErrorCode::NetworkError, "account request failed")
                .with_cause(e)
                .with_context("account", account)
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AnchorError::core(
                ErrorCode::AccountNotFound,
                format!("account {} not found", account),
            ));
        }
        if !response.status().is_success() {
            return Err(AnchorError::core(
                ErrorCode::NetworkError,
                format!("account request returned {}", response.status()),
            )
            .with_context("account", account));
        }

        let body: HorizonAccount = response.json().await.map_err(|e| {
            AnchorError::core(ErrorCode::NetworkError, "failed to parse account record")
                .with_cause(e)
        })?;

        let signers = body
            .signers
            .into_iter()
            .map(|s| AccountSigner {
                key: s.key,
                weight: s.weight,
            })
            .collect();
        let thresholds = AccountThresholds {
            low: body.thresholds.low_threshold,
            medium: body.thresholds.med_threshold,
            high: body.thresholds.high_threshold,
        };
        Ok((signers, thresholds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn spawn_horizon_stub() -> String {
        let app = Router::new().route(
            "/accounts/:id",
            get(|Path(id): Path<String>| async move {
                if id.starts_with("GFUNDED") {
                    Json(serde_json::json!({
                        "signers": [
                            {"weight": 5, "key": "GA", "type": "ed25519_public_key"},
                            {"weight": 5, "key": "GB", "type": "ed25519_public_key"}
                        ],
                        "thresholds": {
                            "low_threshold": 1,
                            "med_threshold": 10,
                            "high_threshold": 20
                        }
                    }))
                    .into_response()
                } else {
                    (axum::http::StatusCode::NOT_FOUND, "not found").into_response()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_fetch_funded_account() {
        let url = spawn_horizon_stub().await;
        let fetcher = HorizonAccountFetcher::new(url);
        let (signers, thresholds) = fetcher.fetch_signers("GFUNDED1").await.unwrap();
        assert_eq!(signers.len(), 2);
        assert_eq!(signers[0].weight, 5);
        assert_eq!(thresholds.medium, 10);
    }

    #[tokio::test]
    async fn test_unfunded_account_is_not_found() {
        let url = spawn_horizon_stub().await;
        let fetcher = HorizonAccountFetcher::new(url);
        let err = fetcher.fetch_signers("GNEW").await.unwrap_err();
        assert!(err.is_code(ErrorCode::AccountNotFound));
    }

    #[tokio::test]
    async fn test_unreachable_horizon_is_network_error() {
        let fetcher = HorizonAccountFetcher::new("http://127.0.0.1:1");
        let err = fetcher.fetch_signers("GANY").await.unwrap_err();
        assert!(err.is_code(ErrorCode::NetworkError));
    }
}
