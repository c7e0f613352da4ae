//! §4.4 Document Reindex Pipeline: reader thread → transform pool →
//! accumulator → dispatcher, connected by bounded `tokio::sync::mpsc`
//! channels (§9's "bounded channels + workers with deadlines" redesign
//! note, replacing the source system's reactive-stream chain).

pub mod accumulator;
pub mod dispatcher;
pub mod transform;

pub use accumulator::Accumulator;
pub use dispatcher::{BulkDispatcher, BulkOutcome, FailedDoc};
pub use transform::{IdentityTransformer, Transformer};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::lucene::LuceneDocumentReader;
use crate::model::{CheckpointCursor, LuceneDocument};

/// §4.4 tuning knobs, all with the spec's stated defaults.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_docs_per_bulk: usize,
    pub max_bytes_per_bulk: usize,
    pub transform_pool_size: usize,
    pub max_concurrent_bulk_requests: usize,
    /// No stage buffers more than this many bulk-sized batches (§4.4
    /// backpressure, default ~50).
    pub backpressure_batches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_docs_per_bulk: 1000,
            max_bytes_per_bulk: 10 * 1024 * 1024,
            transform_pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_concurrent_bulk_requests: 4,
            backpressure_batches: 50,
        }
    }
}

/// Where the dispatcher publishes its checkpoint after every successful
/// bulk. Kept independent of the coordinator's generic store parameter so
/// the pipeline doesn't need to know which `CoordinatorStore` backs it -
/// the caller supplies a thin adapter (§4.3's lease-conditional update).
#[async_trait]
pub trait CheckpointPublisher: Send + Sync {
    /// Publishes `cursor`. Returns `false` when the lease was lost mid-run
    /// (§4.4 cancellation: "no further progress is written").
    async fn publish(&self, cursor: CheckpointCursor) -> Result<bool>;
}

pub struct NullCheckpointPublisher;

#[async_trait]
impl CheckpointPublisher for NullCheckpointPublisher {
    async fn publish(&self, _cursor: CheckpointCursor) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: u64,
    pub failed: Vec<FailedDoc>,
    pub lease_lost: bool,
}

/// Runs one work item's reindex to completion: reads its shard directory,
/// transforms, batches and dispatches, publishing checkpoints as it goes.
/// Returns once the reader is exhausted, the lease is lost, or cancellation
/// is requested.
pub struct Pipeline {
    config: PipelineConfig,
    transformer: Arc<dyn Transformer>,
    dispatcher: Arc<BulkDispatcher>,
    checkpoint: Arc<dyn CheckpointPublisher>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        transformer: Arc<dyn Transformer>,
        dispatcher: Arc<BulkDispatcher>,
        checkpoint: Arc<dyn CheckpointPublisher>,
    ) -> Self {
        Self { config, transformer, dispatcher, checkpoint }
    }

    #[instrument(skip(self, reader, cancel))]
    pub async fn run(&self, reader: LuceneDocumentReader, cancel: CancellationSignal) -> Result<RunSummary> {
        let (doc_tx, doc_rx) = mpsc::channel::<Result<LuceneDocument>>(self.config.backpressure_batches * self.config.max_docs_per_bulk);
        let (entry_tx, entry_rx) = mpsc::channel::<(String, crate::model::BulkEntry)>(self.config.backpressure_batches);
        let (batch_tx, mut batch_rx) = mpsc::channel(self.config.backpressure_batches);

        let reader_handle = tokio::task::spawn_blocking(move || {
            for item in reader {
                if doc_tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let shared_doc_rx = Arc::new(AsyncMutex::new(doc_rx));
        let mut transform_handles = Vec::new();
        for _ in 0..self.config.transform_pool_size.max(1) {
            let shared_doc_rx = shared_doc_rx.clone();
            let entry_tx = entry_tx.clone();
            let transformer = self.transformer.clone();
            transform_handles.push(tokio::spawn(async move {
                loop {
                    let next = { shared_doc_rx.lock().await.recv().await };
                    let Some(item) = next else { break };
                    let doc = match item {
                        Ok(doc) if doc.is_live => doc,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "reader produced an error, stopping this worker");
                            break;
                        }
                    };
                    let index_name = doc.index_name.clone();
                    let entry = match transformer.transform(&doc).and_then(|v| transform::build_entry(&doc, &v)) {
                        Ok(entry) => entry,
                        Err(e) => {
                            warn!(error = %e, doc_id = %doc.doc_id, "document transform failed, skipping");
                            continue;
                        }
                    };
                    if entry_tx.send((index_name, entry)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(entry_tx);

        let max_docs = self.config.max_docs_per_bulk;
        let max_bytes = self.config.max_bytes_per_bulk;
        let accumulator_handle = tokio::spawn(async move {
            let mut entry_rx = entry_rx;
            let mut accumulator = Accumulator::new(max_docs, max_bytes);
            while let Some((index_name, entry)) = entry_rx.recv().await {
                if let Some(batch) = accumulator.push(&index_name, entry) {
                    if batch_tx.send(batch).await.is_err() {
                        return;
                    }
                }
            }
            if let Some(batch) = accumulator.finish() {
                let _ = batch_tx.send(batch).await;
            }
        });

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent_bulk_requests.max(1)));
        let mut summary = RunSummary::default();
        let mut inflight = Vec::new();

        while let Some(batch) = batch_rx.recv().await {
            if cancel.is_cancelled() {
                info!("cancellation requested, draining in-flight bulk requests without dispatching new ones");
                break;
            }
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let dispatcher = self.dispatcher.clone();
            let checkpoint = self.checkpoint.clone();
            inflight.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = dispatcher.dispatch_until_done(batch).await?;
                let published = if let Some(max_ordinal) = outcome.max_segment_ordinal_succeeded {
                    checkpoint.publish(CheckpointCursor { last_segment_ordinal: max_ordinal }).await?
                } else {
                    true
                };
                Ok::<_, crate::error::Error>((outcome, published))
            }));
        }

        for handle in inflight {
            match handle.await {
                Ok(Ok((outcome, published))) => {
                    summary.succeeded += outcome.succeeded.len() as u64;
                    summary.failed.extend(outcome.failed);
                    if !published {
                        summary.lease_lost = true;
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(join_err) => return Err(crate::error::Error::OperationFailed(join_err.to_string())),
            }
        }

        let _ = reader_handle.await;
        for handle in transform_handles {
            let _ = handle.await;
        }
        let _ = accumulator_handle.await;

        Ok(summary)
    }
}

/// A cooperative cancellation flag shared between the pipeline caller (on
/// lease loss) and the dispatch loop (§4.4 "Cancellation").
#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<std::sync::atomic::AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lucene::codec::CodecRegistry;
    use crate::lucene::stored_fields::encode_records;
    use std::fs;

    fn write_shard(dir: &std::path::Path, docs: &[(&str, &[u8])]) {
        fs::write(
            dir.join("segments_1"),
            serde_json::json!({"segments": [{"name": "_a", "doc_count": docs.len(), "codec": "Lucene90", "soft_deletes_field": null}]}).to_string(),
        )
        .unwrap();
        let records: Vec<(bool, bool, &[u8])> = docs.iter().map(|(_, j)| (true, false, *j)).collect();
        fs::write(dir.join("_a.fld"), encode_records(&records)).unwrap();
    }

    #[tokio::test]
    async fn runs_end_to_end_against_a_local_http_stub() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(
            dir.path(),
            &[("1", br#"{"_id":"1","v":1}"#), ("2", br#"{"_id":"2","v":2}"#)],
        );
        let registry = Arc::new(CodecRegistry::standard());
        let reader = LuceneDocumentReader::open(dir.path(), "idx_a", registry, None).unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/idx_a/_bulk")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "errors": false,
                    "items": [
                        {"index": {"_id": "1", "status": 201}},
                        {"index": {"_id": "2", "status": 201}},
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let pipeline = Pipeline::new(
            PipelineConfig { transform_pool_size: 1, ..Default::default() },
            Arc::new(IdentityTransformer),
            Arc::new(BulkDispatcher::new(reqwest::Client::new(), server.url())),
            Arc::new(NullCheckpointPublisher),
        );

        let summary = pipeline.run(reader, CancellationSignal::new()).await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert!(summary.failed.is_empty());
        mock.assert_async().await;
    }
}
