//! Streaming payment observer.
//!
//! Streams payment operations from a Horizon endpoint over server-sent
//! events, normalizes them into [`PaymentEvent`]s, and dispatches them to
//! registered handlers. The in-memory cursor is the source of truth for
//! resumption; an optional saver callback persists it after every processed
//! event. Stream failures reconnect with exponential backoff.

use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{AnchorError, ErrorCode, Result};
use crate::observer::events::{PaymentEvent, PaymentFilter, PaymentHandler};

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_CURSOR: &str = "now";

type CursorSaver = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

struct HandlerEntry {
    handler: Arc<dyn PaymentHandler>,
    filters: Vec<PaymentFilter>,
}

pub struct HorizonObserver {
    horizon_url: String,
    client: reqwest::Client,
    handlers: RwLock<Vec<HandlerEntry>>,
    cursor: RwLock<String>,
    cursor_saver: Option<CursorSaver>,
    initial_backoff: Duration,
    max_backoff: Duration,
    running: AtomicBool,
    stop_token: CancellationToken,
}

impl HorizonObserver {
    /// Observer with the default cursor ("now": skip history) and backoff.
    pub fn new(horizon_url: impl Into<String>) -> Self {
        Self {
            horizon_url: horizon_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            handlers: RwLock::new(Vec::new()),
            cursor: RwLock::new(DEFAULT_CURSOR.to_string()),
            cursor_saver: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            running: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
        }
    }

    /// Start from a specific paging token instead of "now".
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        *self.cursor.get_mut().unwrap() = cursor.into();
        self
    }

    /// Persist the cursor after each processed payment. Save errors are
    /// logged and streaming continues.
    pub fn with_cursor_saver<F>(mut self, saver: F) -> Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.cursor_saver = Some(Box::new(saver));
        self
    }

    /// Tune the reconnect backoff (defaults: 1s initial, 60s cap).
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Register a handler with its filters (ANDed). Handlers run
    /// sequentially, in registration order, for each matching payment.
    pub fn on_payment(&self, handler: Arc<dyn PaymentHandler>, filters: Vec<PaymentFilter>) {
        let mut handlers = self.handlers.write().unwrap();
        handlers.push(HandlerEntry { handler, filters });
    }

    /// Current resume position.
    pub fn cursor(&self) -> String {
        self.cursor.read().unwrap().clone()
    }

    /// Stream until the shutdown token fires or [`stop`](Self::stop) is
    /// called. Single-flight: a second concurrent start is an error.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AnchorError::observer(
                ErrorCode::StreamError,
                "observer already running",
            ));
        }
        let result = self.run(&shutdown).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Idempotent; unblocks any backoff wait and ends the stream loop.
    pub fn stop(&self) {
        self.stop_token.cancel();
    }

    async fn run(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut backoff = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() || self.stop_token.is_cancelled() {
                return Ok(());
            }

            match self.stream_once(shutdown, &mut backoff).await {
                // The stream ended without error: clean shutdown.
                Ok(()) => return Ok(()),
                Err(e) => {
                    if shutdown.is_cancelled() || self.stop_token.is_cancelled() {
                        return Ok(());
                    }
                    log::warn!(
                        "observer: stream error (attempt {}): {}, reconnecting in {:?}",
                        attempt,
                        e,
                        backoff
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.cancelled() => return Ok(()),
                _ = self.stop_token.cancelled() => return Ok(()),
            }

            attempt += 1;
            backoff = next_backoff(backoff, self.max_backoff);
        }
    }

    /// One streaming connection: runs until the stream closes, errors, or
    /// is cancelled.
    async fn stream_once(
        &self,
        shutdown: &CancellationToken,
        backoff: &mut Duration,
    ) -> Result<()> {
        let cursor = self.cursor();
        let url = format!("{}/payments", self.horizon_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("cursor", cursor.as_str()),
                ("order", "asc"),
                ("join", "transactions"),
            ])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                AnchorError::observer(ErrorCode::StreamError, "failed to open payment stream")
                    .with_cause(e)
            })?;

        if !response.status().is_success() {
            return Err(AnchorError::observer(
                ErrorCode::StreamError,
                format!("payment stream returned {}", response.status()),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = self.stop_token.cancelled() => return Ok(()),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for data in parser.push(&bytes) {
                            self.handle_stream_data(&data, backoff).await;
                        }
                    }
                    Some(Err(e)) => {
                        return Err(AnchorError::observer(
                            ErrorCode::StreamDisconnected,
                            "payment stream disconnected",
                        )
                        .with_cause(e))
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_stream_data(&self, data: &str, backoff: &mut Duration) {
        // Horizon interleaves JSON operation records with plain keepalive
        // strings ("hello", "byebye"); only objects are records.
        let record: OperationRecord = match serde_json::from_str(data) {
            Ok(record) => record,
            Err(_) => return,
        };
        if record.paging_token.is_empty() {
            return;
        }

        // Any received operation proves the connection is healthy.
        *backoff = self.initial_backoff;

        let Some(event) = convert_operation(record) else {
            return;
        };

        self.dispatch(&event).await;

        *self.cursor.write().unwrap() = event.cursor.clone();
        if let Some(saver) = &self.cursor_saver {
            if let Err(e) = saver(&event.cursor) {
                log::error!("observer: failed to save cursor: {}", e);
            }
        }
    }

    /// Run every handler whose filters all pass, sequentially. Handler
    /// errors are logged and do not abort the stream.
    async fn dispatch(&self, event: &PaymentEvent) {
        // Handlers are registered at wiring time; entries are cloned out so
        // the lock is not held across handler awaits.
        let entries: Vec<Arc<dyn PaymentHandler>> = {
            let handlers = self.handlers.read().unwrap();
            handlers
                .iter()
                .filter(|entry| entry.filters.iter().all(|f| f(event)))
                .map(|entry| entry.handler.clone())
                .collect()
        };

        for handler in entries {
            if let Err(e) = handler.handle(event.clone()).await {
                log::warn!("observer: handler error for payment {}: {}", event.id, e);
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Incremental server-sent-events parser: buffers chunks and yields the
/// `data:` payload of each complete event.
struct SseParser {
    buffer: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        self.buffer = self.buffer.replace("\r\n", "\n");

        let mut payloads = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let raw_event: String = self.buffer.drain(..boundary + 2).collect();
            let mut data_lines = Vec::new();
            for line in raw_event.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.trim_start().to_string());
                }
                // "event:", "id:", "retry:" and comment lines are ignored
            }
            if !data_lines.is_empty() {
                payloads.push(data_lines.join("\n"));
            }
        }
        payloads
    }
}

#[derive(Debug, Default, Deserialize)]
struct TransactionStub {
    #[serde(default)]
    memo: Option<String>,
}

/// The subset of a Horizon operation record the observer reads.
#[derive(Debug, Default, Deserialize)]
struct OperationRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    paging_token: String,
    #[serde(default, rename = "type")]
    op_type: String,
    #[serde(default)]
    transaction_hash: String,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    transaction: Option<TransactionStub>,
    // payment
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    asset_type: Option<String>,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    asset_issuer: Option<String>,
    // create_account
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    funder: Option<String>,
    #[serde(default)]
    starting_balance: Option<String>,
    // account_merge
    #[serde(default)]
    into: Option<String>,
}

/// Normalize a payment-like operation record. Returns `None` for operation
/// types the observer does not surface (path payments included, deferred).
fn convert_operation(record: OperationRecord) -> Option<PaymentEvent> {
    let memo = record
        .memo
        .clone()
        .or_else(|| record.transaction.as_ref().and_then(|t| t.memo.clone()))
        .unwrap_or_default();

    let mut event = PaymentEvent {
        id: record.id.clone(),
        cursor: record.paging_token.clone(),
        transaction_hash: record.transaction_hash.clone(),
        memo,
        ..Default::default()
    };

    match record.op_type.as_str() {
        "payment" => {
            event.from = record.from?;
            event.to = record.to?;
            event.amount = record.amount?;
            event.asset = format_asset(
                record.asset_type.as_deref(),
                record.asset_code.as_deref(),
                record.asset_issuer.as_deref(),
            );
        }
        "create_account" => {
            // Funding a new account is a payment to it
            event.from = record.funder?;
            event.to = record.account?;
            event.amount = record.starting_balance?;
            event.asset = "native".to_string();
        }
        "account_merge" => {
            // The merged balance is not in the operation record; effects
            // would have to be queried for the actual amount.
            event.from = record.account?;
            event.to = record.into?;
            event.amount = "0".to_string();
            event.asset = "native".to_string();
        }
        // Deferred: exotic payment shapes
        "path_payment_strict_send" | "path_payment_strict_receive" | "path_payment" => {
            return None
        }
        _ => return None,
    }

    Some(event)
}

fn format_asset(asset_type: Option<&str>, code: Option<&str>, issuer: Option<&str>) -> String {
    match asset_type {
        Some("native") => "native".to_string(),
        _ => format!(
            "{}:{}",
            code.unwrap_or_default(),
            issuer.unwrap_or_default()
        ),
    }
}
