//! §4.5 Metadata Migrator: reads global/index metadata (snapshot or live),
//! transforms it across source/target version boundaries, and idempotently
//! creates it on the target, in the fixed order §4.5 mandates (legacy
//! templates, component templates, index templates, indices, aliases).

pub mod source;
pub mod target;
pub mod transform;

pub use source::{GlobalMetadata, MetadataSource};
pub use target::{MigrationMode, MigrationOutcome};
pub use transform::MultiTypeResolution;

use reqwest::Client;
use tracing::{info, instrument, warn};

use crate::version::Version;

/// §4.5 tuning the migrator needs beyond what `transform`/`create_on_target`
/// take directly.
#[derive(Clone, Debug)]
pub struct MetadataMigratorConfig {
    pub target_version: Version,
    pub min_replicas: u32,
    pub multi_type_resolution: Option<MultiTypeResolution>,
    pub mode: MigrationMode,
}

/// The full report §7 describes: per-item outcomes across every kind,
/// in migration order.
#[derive(Clone, Debug, Default)]
pub struct MigrationReport {
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationReport {
    pub fn failed(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.outcomes.iter().filter(|o| !o.successful)
    }

    pub fn all_successful(&self) -> bool {
        self.outcomes.iter().all(|o| o.successful)
    }
}

/// Every kind gated by an allowlist (§6): an empty or absent list means
/// "no restriction," matching how `--index-allowlist` behaves for indices.
fn allowed<'a>(
    items: &'a [crate::model::MetadataItem],
    allowlist: &'a [String],
) -> impl Iterator<Item = &'a crate::model::MetadataItem> {
    items.iter().filter(move |item| allowlist.is_empty() || allowlist.iter().any(|n| n == &item.name))
}

/// Runs the full migration: reads global metadata once, reads each
/// allowlisted index's metadata, transforms, and idempotently creates
/// every item on the target, in §4.5's mandated order. `index_template_allowlist`
/// gates legacy templates as well as index templates - §6 exposes no
/// separate flag for legacy templates, and a legacy template is simply the
/// ES 6.x predecessor of an index template.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(source, client, config, index_allowlist, index_template_allowlist, component_template_allowlist))]
pub async fn migrate(
    source: &dyn MetadataSource,
    client: &Client,
    target_base_url: &str,
    index_allowlist: &[String],
    index_template_allowlist: &[String],
    component_template_allowlist: &[String],
    config: &MetadataMigratorConfig,
) -> crate::error::Result<MigrationReport> {
    let global = source.read_global_metadata().await?;
    let mut report = MigrationReport::default();

    for item in allowed(&global.legacy_templates, index_template_allowlist) {
        report.outcomes.push(run_one(client, target_base_url, item, config).await);
    }
    for item in allowed(&global.component_templates, component_template_allowlist) {
        report.outcomes.push(run_one(client, target_base_url, item, config).await);
    }
    for item in allowed(&global.index_templates, index_template_allowlist) {
        report.outcomes.push(run_one(client, target_base_url, item, config).await);
    }
    for index_name in index_allowlist {
        let item = source.read_index_metadata(index_name).await?;
        report.outcomes.push(run_one(client, target_base_url, &item, config).await);
    }
    for item in &global.aliases {
        report.outcomes.push(run_one(client, target_base_url, item, config).await);
    }

    let failed = report.outcomes.iter().filter(|o| !o.successful).count();
    if failed > 0 {
        warn!(failed, total = report.outcomes.len(), "metadata migration finished with failures");
    } else {
        info!(total = report.outcomes.len(), "metadata migration completed");
    }
    Ok(report)
}

async fn run_one(
    client: &Client,
    target_base_url: &str,
    item: &crate::model::MetadataItem,
    config: &MetadataMigratorConfig,
) -> MigrationOutcome {
    let body = match transform::transform(item, config.target_version, config.min_replicas, config.multi_type_resolution) {
        Ok(body) => body,
        Err(e) => {
            return MigrationOutcome { name: item.name.clone(), kind: item.kind, successful: false, failure: Some(e.to_string()) };
        }
    };
    target::create_on_target(client, target_base_url, item, &body, config.mode).await
}
