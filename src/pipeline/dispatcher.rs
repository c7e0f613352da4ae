//! §4.4 dispatcher stage: POSTs a [`BulkBatch`] to `<target>/<index>/_bulk`,
//! parses per-item outcomes, and retries only the failed subset as a
//! smaller bulk until everything succeeds or the retry budget (§4.4's
//! retry policy: 15 attempts, 2s-60s backoff, ~10 min total) is spent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::Client;
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::model::{BulkBatch, BulkEntry};
use crate::retry::RetryPolicy;

#[derive(Debug)]
pub struct FailedDoc {
    pub doc_id: String,
    pub cause: String,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedDoc>,
    pub max_segment_ordinal_succeeded: Option<u64>,
}

pub struct BulkDispatcher {
    client: Client,
    target_base: String,
}

impl BulkDispatcher {
    pub fn new(client: Client, target_base: impl Into<String>) -> Self {
        Self { client, target_base: target_base.into() }
    }

    /// Drives one batch through the partial-failure retry loop (§4.4
    /// "Partial failure"). The returned outcome's `failed` list is
    /// non-empty only once the retry budget is exhausted; those docs are
    /// never considered migrated and must be logged by the caller.
    #[instrument(skip(self, batch), fields(index = %batch.index_name, docs = batch.entries.len()))]
    pub async fn dispatch_until_done(&self, mut batch: BulkBatch) -> Result<BulkOutcome> {
        let policy = RetryPolicy::BULK;
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut succeeded = Vec::new();
        let mut max_ordinal: Option<u64> = None;

        loop {
            attempt += 1;
            let by_id: HashMap<&str, &BulkEntry> =
                batch.entries.iter().map(|e| (e.doc_id.as_str(), e)).collect();

            let outcome = match self.send_once(&batch).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_retryable() => {
                    let elapsed = started.elapsed();
                    if attempt >= policy.max_attempts || elapsed >= policy.max_elapsed {
                        warn!(index = %batch.index_name, error = %e, "bulk retry budget exhausted on a whole-request failure");
                        return Err(e);
                    }
                    warn!(index = %batch.index_name, error = %e, attempt, "whole bulk request failed transiently, retrying");
                    let sleep_for = backoff_with_jitter(&policy, attempt);
                    tokio::time::sleep(sleep_for).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            succeeded.extend(outcome.succeeded.iter().cloned());
            for id in &outcome.succeeded {
                if let Some(entry) = by_id.get(id.as_str()) {
                    max_ordinal = Some(max_ordinal.map_or(entry.segment_ordinal, |m| m.max(entry.segment_ordinal)));
                }
            }

            if outcome.failed.is_empty() {
                return Ok(BulkOutcome { succeeded, failed: vec![], max_segment_ordinal_succeeded: max_ordinal });
            }

            let elapsed = started.elapsed();
            if attempt >= policy.max_attempts || elapsed >= policy.max_elapsed {
                warn!(
                    index = %batch.index_name,
                    failed_docs = outcome.failed.len(),
                    "bulk retry budget exhausted, leaving docs unmigrated"
                );
                return Ok(BulkOutcome { succeeded, failed: outcome.failed, max_segment_ordinal_succeeded: max_ordinal });
            }

            let remaining: Vec<BulkEntry> = outcome
                .failed
                .iter()
                .filter_map(|f| by_id.get(f.doc_id.as_str()).map(|e| (*e).clone()))
                .collect();
            batch = BulkBatch { index_name: batch.index_name.clone(), entries: remaining };

            let sleep_for = backoff_with_jitter(&policy, attempt);
            tokio::time::sleep(sleep_for).await;
        }
    }

    async fn send_once(&self, batch: &BulkBatch) -> Result<BulkOutcome> {
        let url = format!("{}/{}/_bulk", self.target_base, batch.index_name);
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(batch.to_ndjson())
            .send()
            .await
            .map_err(|e| Error::TransientIo(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::TransientIo(format!("bulk request to {url} failed with {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::OperationFailed(format!("bulk request to {url} rejected with {status}: {text}")));
        }

        let body: serde_json::Value = resp.json().await?;
        parse_bulk_response(&body)
    }
}

/// Parses a `_bulk` response body into per-doc succeeded/failed lists
/// (§4.4: "Success criteria: HTTP 200/201 AND no `errors:true`").
fn parse_bulk_response(body: &serde_json::Value) -> Result<BulkOutcome> {
    let items = body.get("items").and_then(|v| v.as_array()).ok_or_else(|| Error::InvalidResponse {
        operation: "bulk".into(),
        detail: "response has no items array".into(),
    })?;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for item in items {
        let Some(action) = item.get("index").or_else(|| item.get("create")) else {
            continue;
        };
        let doc_id = action.get("_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let status = action.get("status").and_then(|v| v.as_u64()).unwrap_or(0);
        if (200..300).contains(&status) {
            succeeded.push(doc_id);
        } else {
            let cause = action
                .get("error")
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("status {status}"));
            failed.push(FailedDoc { doc_id, cause });
        }
    }
    Ok(BulkOutcome { succeeded, failed, max_segment_ordinal_succeeded: None })
}

fn backoff_with_jitter(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.initial_interval.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let capped = base.min(policy.max_interval.as_secs_f64());
    let jittered = rand::thread_rng().gen_range(0.5..1.0) * capped;
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_and_failure_items() {
        let body = serde_json::json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 429, "error": {"type": "es_rejected_execution_exception"}}},
            ]
        });
        let outcome = parse_bulk_response(&body).unwrap();
        assert_eq!(outcome.succeeded, vec!["1"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].doc_id, "2");
    }

    #[test]
    fn missing_items_array_is_invalid_response() {
        let body = serde_json::json!({"errors": false});
        assert!(parse_bulk_response(&body).is_err());
    }

    fn sample_batch() -> BulkBatch {
        BulkBatch {
            index_name: "idx_a".into(),
            entries: vec![BulkEntry {
                doc_id: "1".into(),
                segment_ordinal: 5,
                action_line: br#"{"index":{"_id":"1"}}"#.to_vec(),
                source_line: br#"{"v":1}"#.to_vec(),
            }],
        }
    }

    /// A minimal raw-HTTP stub (no mockito, since this test needs a
    /// response that varies by call count - reply 429 to every request
    /// but the last). Grounded in §4.4's S6 scenario: "target cluster
    /// returns 429 on every bulk for 30s then recovers."
    async fn spawn_flaky_bulk_stub(fail_times: usize) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let calls = calls_clone.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let _ = socket.read(&mut buf).await;
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    let response = if n < fail_times {
                        "HTTP/1.1 429 Too Many Requests\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string()
                    } else {
                        let body = serde_json::json!({
                            "errors": false,
                            "items": [{"index": {"_id": "1", "status": 201}}]
                        })
                        .to_string();
                        format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}"), calls)
    }

    #[tokio::test]
    async fn whole_request_429_is_retried_until_it_succeeds() {
        let (base_url, calls) = spawn_flaky_bulk_stub(2).await;
        let dispatcher = BulkDispatcher::new(Client::new(), base_url);

        let outcome = dispatcher.dispatch_until_done(sample_batch()).await.unwrap();

        assert_eq!(outcome.succeeded, vec!["1".to_string()]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.max_segment_ordinal_succeeded, Some(5));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
