//! The `rfs` binary: the CLI surface §6 describes, wiring together the
//! metadata migrator (§4.5) and, per allowlisted index and shard, the
//! coordinator (§4.3), shard unpacker (§4.1), Lucene reader (§4.2) and
//! reindex pipeline (§4.4) into one run. Everything here is orchestration;
//! the library crate has no knowledge of `clap`, exit codes, or stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use futures::stream::BoxStream;
use reqwest::Client;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use rfs_core::coordinator::{AcquireOutcome, CasVersion, Coordinator, InMemoryCoordinatorStore, LeaseConfig};
use rfs_core::error::{Error, Result};
use rfs_core::lucene::CodecRegistry;
use rfs_core::lucene::LuceneDocumentReader;
use rfs_core::metadata::source::SnapshotMetadataSource;
use rfs_core::metadata::{self, MetadataMigratorConfig, MigrationMode};
use rfs_core::model::{CheckpointCursor, WorkItem};
use rfs_core::pipeline::{
    BulkDispatcher, CancellationSignal, CheckpointPublisher, IdentityTransformer, Pipeline, PipelineConfig,
};
use rfs_core::report::RunReport;
use rfs_core::repo::{Repository, ShardUnpacker, SnapshotRepository};
use rfs_core::storage::{LocalStorageProvider, StorageProvider};
use rfs_core::version::Version;

const EXIT_SUCCESS: i32 = 0;
const EXIT_INVALID_PARAMETER: i32 = 999;
const EXIT_UNEXPECTED_FAILURE: i32 = 888;

#[derive(Parser, Debug)]
#[command(name = "rfs", about = "Reindex-From-Snapshot: migrate an OpenSearch/Elasticsearch snapshot into a live target cluster")]
struct Cli {
    #[command(flatten)]
    snapshot: SnapshotOpts,
    #[command(flatten)]
    versions: VersionOpts,
    #[command(flatten)]
    target: TargetOpts,
    #[command(flatten)]
    allowlist: AllowlistOpts,
    #[command(flatten)]
    tuning: TuningOpts,
    /// `--mode {MIGRATE,SIMULATE}` (§6).
    #[arg(long, value_enum, default_value_t = ModeArg::Migrate)]
    mode: ModeArg,
}

#[derive(Parser, Debug)]
struct SnapshotOpts {
    #[arg(long)]
    snapshot_name: String,
    #[arg(long)]
    file_system_repo_path: Option<PathBuf>,
    #[arg(long)]
    s3_repo_uri: Option<String>,
    #[arg(long)]
    s3_region: Option<String>,
}

#[derive(Parser, Debug)]
struct VersionOpts {
    #[arg(long)]
    source_version: String,
    #[arg(long)]
    target_version: String,
}

#[derive(Parser, Debug)]
struct TargetOpts {
    #[arg(long)]
    target_host: String,
    #[arg(long)]
    target_username: Option<String>,
    #[arg(long)]
    target_password: Option<String>,
    /// Skip TLS certificate validation against the target cluster.
    #[arg(long, default_value_t = false)]
    target_insecure: bool,
}

#[derive(Parser, Debug)]
struct AllowlistOpts {
    #[arg(long)]
    index_allowlist: Option<String>,
    #[arg(long)]
    index_template_allowlist: Option<String>,
    #[arg(long)]
    component_template_allowlist: Option<String>,
    #[arg(long, default_value_t = 0)]
    min_replicas: u32,
}

#[derive(Parser, Debug)]
struct TuningOpts {
    #[arg(long, default_value_t = 1000)]
    max_docs_per_bulk: usize,
    #[arg(long, default_value_t = 10_000_000)]
    max_bytes_per_bulk: usize,
    #[arg(long, default_value_t = 4)]
    max_concurrent_bulks: usize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Migrate,
    Simulate,
}

/// Parses `--index-allowlist`-style comma-separated values, an empty or
/// absent flag meaning "no restriction."
fn parse_csv_allowlist(raw: &Option<String>) -> Vec<String> {
    raw.as_ref()
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Either a local filesystem root or an S3-backed repository, unified
/// behind [`StorageProvider`] so `main` doesn't need to monomorphize
/// [`Repository`] per backend at the call site (§4.1: both are read-only
/// byte sources).
enum AnyStorageProvider {
    Local(LocalStorageProvider),
    #[cfg(feature = "aws")]
    S3(rfs_core::storage::S3StorageProvider),
}

#[async_trait]
impl StorageProvider for AnyStorageProvider {
    async fn read(&self, path: &std::path::Path) -> Result<Vec<u8>> {
        match self {
            AnyStorageProvider::Local(p) => p.read(path).await,
            #[cfg(feature = "aws")]
            AnyStorageProvider::S3(p) => p.read(path).await,
        }
    }

    async fn read_stream(&self, path: &std::path::Path) -> Result<BoxStream<'static, Result<Bytes>>> {
        match self {
            AnyStorageProvider::Local(p) => p.read_stream(path).await,
            #[cfg(feature = "aws")]
            AnyStorageProvider::S3(p) => p.read_stream(path).await,
        }
    }

    async fn list(&self, prefix: &std::path::Path) -> Result<Vec<String>> {
        match self {
            AnyStorageProvider::Local(p) => p.list(prefix).await,
            #[cfg(feature = "aws")]
            AnyStorageProvider::S3(p) => p.list(prefix).await,
        }
    }

    async fn exists(&self, path: &std::path::Path) -> Result<bool> {
        match self {
            AnyStorageProvider::Local(p) => p.exists(path).await,
            #[cfg(feature = "aws")]
            AnyStorageProvider::S3(p) => p.exists(path).await,
        }
    }
}

async fn build_storage_provider(opts: &SnapshotOpts) -> Result<AnyStorageProvider> {
    match (&opts.file_system_repo_path, &opts.s3_repo_uri) {
        (Some(_), Some(_)) => Err(Error::InvalidParameter(
            "--file-system-repo-path and --s3-repo-uri are mutually exclusive".into(),
        )),
        (Some(path), None) => Ok(AnyStorageProvider::Local(LocalStorageProvider::new(path.clone()))),
        (None, Some(uri)) => {
            #[cfg(feature = "aws")]
            {
                let region = opts.s3_region.clone().ok_or_else(|| {
                    Error::InvalidParameter("--s3-region is required with --s3-repo-uri".into())
                })?;
                let (bucket, prefix) = parse_s3_uri(uri)?;
                Ok(AnyStorageProvider::S3(rfs_core::storage::S3StorageProvider::new(bucket, prefix, region).await))
            }
            #[cfg(not(feature = "aws"))]
            {
                let _ = uri;
                Err(Error::InvalidParameter("this build was compiled without the `aws` feature".into()))
            }
        }
        (None, None) => Err(Error::InvalidParameter(
            "one of --file-system-repo-path or --s3-repo-uri is required".into(),
        )),
    }
}

#[cfg(feature = "aws")]
fn parse_s3_uri(uri: &str) -> Result<(String, PathBuf)> {
    let rest = uri.strip_prefix("s3://").ok_or_else(|| Error::InvalidParameter(format!("not an s3:// URI: {uri}")))?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    Ok((bucket.to_string(), PathBuf::from(prefix)))
}

fn build_target_client(opts: &TargetOpts) -> Result<Client> {
    let user_agent = std::env::var("MIGRATIONS_USER_AGENT").unwrap_or_else(|_| format!("rfs/{}", env!("CARGO_PKG_VERSION")));
    let mut builder = Client::builder().user_agent(user_agent);
    if opts.target_insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(username) = &opts.target_username {
        let mut headers = reqwest::header::HeaderMap::new();
        let credentials = STANDARD.encode(format!("{username}:{}", opts.target_password.clone().unwrap_or_default()));
        let value = reqwest::header::HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| Error::InvalidParameter(format!("invalid target credentials: {e}")))?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
        builder = builder.default_headers(headers);
    }
    builder.build().map_err(|e| Error::InvalidParameter(format!("failed to build HTTP client: {e}")))
}

/// Publishes a work item's checkpoint back through the coordinator,
/// conditional on the caller still holding the lease (§4.3, §4.4). Tracks
/// the item's current CAS version across calls since each successful
/// publish advances it.
struct CoordinatorCheckpointPublisher {
    coordinator: Arc<Coordinator<InMemoryCoordinatorStore>>,
    worker_id: String,
    item_id: String,
    state: AsyncMutex<(WorkItem, CasVersion)>,
}

impl CoordinatorCheckpointPublisher {
    fn new(coordinator: Arc<Coordinator<InMemoryCoordinatorStore>>, worker_id: String, item: WorkItem, version: CasVersion) -> Self {
        let item_id = item.id.clone();
        Self { coordinator, worker_id, item_id, state: AsyncMutex::new((item, version)) }
    }

    async fn current(&self) -> (WorkItem, CasVersion) {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointPublisher for CoordinatorCheckpointPublisher {
    async fn publish(&self, cursor: CheckpointCursor) -> Result<bool> {
        let mut state = self.state.lock().await;
        let (item, version) = state.clone();
        if item.owner.as_deref() != Some(self.worker_id.as_str()) {
            return Ok(false);
        }
        // Dispatch tasks complete in arbitrary order under
        // `max_concurrent_bulk_requests` > 1; only advance the published
        // checkpoint, never regress it (§8 invariant 3: "checkpoint(w) is
        // monotonically non-decreasing over wall time").
        if let Some(existing) = item.progress_checkpoint {
            if cursor.last_segment_ordinal <= existing.last_segment_ordinal {
                return Ok(true);
            }
        }
        match self.coordinator.publish_checkpoint(&self.item_id, version, item.clone(), cursor).await? {
            Some(new_version) => {
                let mut updated = item;
                updated.progress_checkpoint = Some(cursor);
                *state = (updated, new_version);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_metadata_migration(
    repo: Arc<dyn SnapshotRepository>,
    snapshot: &str,
    source_version: Version,
    target_version: Version,
    client: &Client,
    target_base_url: &str,
    index_allowlist: &[String],
    index_template_allowlist: &[String],
    component_template_allowlist: &[String],
    min_replicas: u32,
    mode: MigrationMode,
) -> Result<RunReport> {
    let source = SnapshotMetadataSource::new(repo, snapshot, source_version);
    let config = MetadataMigratorConfig { target_version, min_replicas, multi_type_resolution: None, mode };
    let migration = metadata::migrate(
        &source,
        client,
        target_base_url,
        index_allowlist,
        index_template_allowlist,
        component_template_allowlist,
        &config,
    )
    .await?;

    let mut report = RunReport::new();
    report.record_metadata_run(&migration);
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn run_one_shard(
    repo: &Arc<Repository<AnyStorageProvider>>,
    snapshot: &str,
    index_name: &str,
    index_uuid: &str,
    shard_number: u32,
    resume_after: Option<u64>,
    scratch_root: &std::path::Path,
    registry: Arc<CodecRegistry>,
    client: &Client,
    target_base_url: &str,
    pipeline_config: PipelineConfig,
    checkpoint: Arc<dyn CheckpointPublisher>,
    cancel: CancellationSignal,
) -> Result<(u64, rfs_core::pipeline::RunSummary)> {
    let unpacker = ShardUnpacker::new(repo.as_ref(), scratch_root);
    let shard_dir = unpacker.unpack(snapshot, index_name, index_uuid, shard_number).await?;

    let reader = LuceneDocumentReader::open(&shard_dir, index_name, registry, resume_after)?;
    let dispatcher = Arc::new(BulkDispatcher::new(client.clone(), target_base_url.to_string()));
    let pipeline = Pipeline::new(pipeline_config, Arc::new(IdentityTransformer), dispatcher, checkpoint);

    // Every live document the reader yields either ends up acknowledged
    // or recorded in `failed`; the sum is the attempted count §7 wants.
    let summary = pipeline.run(reader, cancel).await?;
    let attempted = summary.succeeded + summary.failed.len() as u64;

    tokio::fs::remove_dir_all(&shard_dir).await.ok();
    Ok((attempted, summary))
}

async fn run(cli: Cli) -> Result<RunReport> {
    let source_version = Version::parse(&cli.versions.source_version)?;
    let target_version = Version::parse(&cli.versions.target_version)?;

    let provider = Arc::new(build_storage_provider(&cli.snapshot).await?);
    let repo: Arc<Repository<AnyStorageProvider>> = Arc::new(Repository::new(provider, source_version));
    let client = build_target_client(&cli.target)?;
    let target_base_url = cli.target.target_host.trim_end_matches('/').to_string();

    let index_allowlist = parse_csv_allowlist(&cli.allowlist.index_allowlist);
    let index_template_allowlist = parse_csv_allowlist(&cli.allowlist.index_template_allowlist);
    let component_template_allowlist = parse_csv_allowlist(&cli.allowlist.component_template_allowlist);
    let snapshot = cli.snapshot.snapshot_name.clone();

    let mut report = run_metadata_migration(
        repo.clone(),
        &snapshot,
        source_version,
        target_version,
        &client,
        &target_base_url,
        &index_allowlist,
        &index_template_allowlist,
        &component_template_allowlist,
        cli.allowlist.min_replicas,
        match cli.mode {
            ModeArg::Migrate => MigrationMode::Migrate,
            ModeArg::Simulate => MigrationMode::Simulate,
        },
    )
    .await?;

    if matches!(cli.mode, ModeArg::Simulate) {
        info!("SIMULATE mode: skipping document reindex");
        return Ok(report);
    }

    let indices = {
        let all = repo.list_indices(&snapshot).await?;
        if index_allowlist.is_empty() {
            all
        } else {
            all.into_iter().filter(|i| index_allowlist.contains(&i.name)).collect()
        }
    };
    let uuid_by_name: HashMap<String, String> = indices.iter().map(|i| (i.name.clone(), i.uuid.clone())).collect();

    let store = InMemoryCoordinatorStore::new();
    for index in &indices {
        for shard_number in repo.list_shards(&snapshot, &index.name).await? {
            let item = WorkItem::unassigned(&index.name, shard_number);
            store.create_if_absent(&item.id, item).await?;
        }
    }
    let coordinator = Arc::new(Coordinator::new(store, LeaseConfig::default()));

    let worker_id = uuid::Uuid::new_v4().to_string();
    let registry = Arc::new(CodecRegistry::standard());
    let scratch_root = std::env::temp_dir().join(format!("rfs-{worker_id}"));

    loop {
        let (item, version) = match coordinator.acquire(&worker_id).await? {
            AcquireOutcome::Acquired { item, version } => (item, version),
            AcquireOutcome::NoMoreWork => break,
            // A single-worker CLI run never contends for leases with
            // another owner; treat this the same as no more work rather
            // than busy-looping.
            AcquireOutcome::NoWorkReadyNow => break,
        };

        let index_uuid = uuid_by_name.get(&item.index_name).cloned().unwrap_or_default();
        let resume_after = item.progress_checkpoint.map(|c| c.last_segment_ordinal);
        let publisher = Arc::new(CoordinatorCheckpointPublisher::new(
            coordinator.clone(),
            worker_id.clone(),
            item.clone(),
            version,
        ));

        let result = run_one_shard(
            &repo,
            &snapshot,
            &item.index_name,
            &index_uuid,
            item.shard_number,
            resume_after,
            &scratch_root,
            registry.clone(),
            &client,
            &target_base_url,
            PipelineConfig {
                max_docs_per_bulk: cli.tuning.max_docs_per_bulk,
                max_bytes_per_bulk: cli.tuning.max_bytes_per_bulk,
                max_concurrent_bulk_requests: cli.tuning.max_concurrent_bulks,
                ..PipelineConfig::default()
            },
            publisher.clone(),
            CancellationSignal::new(),
        )
        .await;

        match result {
            Ok((attempted, summary)) => {
                report.record_pipeline_run(&item.index_name, attempted, &summary);
                let (final_item, final_version) = publisher.current().await;
                if let Err(e) = coordinator.complete(&item.id, &worker_id, final_version, final_item).await {
                    warn!(work_item = %item.id, error = %e, "failed to mark work item complete");
                }
            }
            Err(e) => {
                error!(index = %item.index_name, shard = item.shard_number, error = %e, "shard reindex failed");
            }
        }
    }

    Ok(report)
}

fn print_report_and_exit(result: Result<RunReport>) -> ! {
    match result {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string());
            println!("{json}");
            std::process::exit(EXIT_SUCCESS);
        }
        Err(Error::InvalidParameter(msg)) => {
            eprintln!("invalid parameter: {msg}");
            std::process::exit(EXIT_INVALID_PARAMETER);
        }
        Err(e) => {
            error!(error = %e, "run failed");
            eprintln!("unexpected failure: {e}");
            std::process::exit(EXIT_UNEXPECTED_FAILURE);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.snapshot.file_system_repo_path.is_none() && cli.snapshot.s3_repo_uri.is_none() {
        eprintln!("invalid parameter: one of --file-system-repo-path or --s3-repo-uri is required");
        std::process::exit(EXIT_INVALID_PARAMETER);
    }

    let result = run(cli).await;
    if let Err(e) = &result {
        warn!(error = %e, "run did not complete successfully");
    }
    print_report_and_exit(result);
}
