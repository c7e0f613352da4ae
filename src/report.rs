//! §7 "User-visible failure": the CLI's structured JSON report, assembled
//! from the coordinator's final work-item states, the pipeline's per-item
//! [`crate::pipeline::RunSummary`], and the metadata migrator's
//! [`crate::metadata::MigrationReport`]. No silent swallowing (§7): every
//! skipped document or failed item is recorded here.

use serde::{Deserialize, Serialize};

use crate::metadata::MigrationReport;
use crate::pipeline::{FailedDoc, RunSummary};

/// Per-index document totals (§7: "per-index document totals attempted vs
/// succeeded"). `attempted` counts every live document the reader yielded
/// for that index's shards; `succeeded` counts those whose bulk write was
/// acknowledged.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexReport {
    pub name: String,
    pub attempted: u64,
    pub succeeded: u64,
}

/// One item (a shard's work item, or a metadata item) that did not reach
/// a successful terminal state, with the reason it failed (§7: "the list
/// of failed items with reasons").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedItem {
    pub name: String,
    pub kind: String,
    pub reason: String,
}

/// Counts for one [`crate::model::MetadataKind`], grouped the way §7
/// asks ("counts per item kind").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetadataKindCount {
    pub kind: String,
    pub attempted: u64,
    pub succeeded: u64,
}

/// The complete run report printed to stdout on exit (§6, §7). Assembled
/// once per CLI invocation from every component's outcomes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub indices: Vec<IndexReport>,
    pub metadata: Vec<MetadataKindCount>,
    pub failed_items: Vec<FailedItem>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one work item's pipeline result into the per-index totals and
    /// failed-item list (the failed docs it reports were never migrated,
    /// per §4.4's partial-failure contract).
    pub fn record_pipeline_run(&mut self, index_name: &str, attempted: u64, summary: &RunSummary) {
        let entry = self.index_entry(index_name);
        entry.attempted += attempted;
        entry.succeeded += summary.succeeded;
        for FailedDoc { doc_id, cause } in &summary.failed {
            self.failed_items.push(FailedItem {
                name: format!("{index_name}/{doc_id}"),
                kind: "document".to_string(),
                reason: cause.clone(),
            });
        }
    }

    /// Folds the metadata migrator's report into `metadata` counts and
    /// `failed_items`.
    pub fn record_metadata_run(&mut self, migration: &MigrationReport) {
        use std::collections::HashMap;
        let mut counts: HashMap<String, MetadataKindCount> = HashMap::new();
        for outcome in &migration.outcomes {
            let kind = format!("{:?}", outcome.kind);
            let entry = counts.entry(kind.clone()).or_insert_with(|| MetadataKindCount { kind, ..Default::default() });
            entry.attempted += 1;
            if outcome.successful {
                entry.succeeded += 1;
            } else {
                self.failed_items.push(FailedItem {
                    name: outcome.name.clone(),
                    kind: format!("{:?}", outcome.kind),
                    reason: outcome.failure.clone().unwrap_or_default(),
                });
            }
        }
        let mut counts: Vec<MetadataKindCount> = counts.into_values().collect();
        counts.sort_by(|a, b| a.kind.cmp(&b.kind));
        self.metadata.extend(counts);
    }

    fn index_entry(&mut self, index_name: &str) -> &mut IndexReport {
        if let Some(pos) = self.indices.iter().position(|i| i.name == index_name) {
            &mut self.indices[pos]
        } else {
            self.indices.push(IndexReport { name: index_name.to_string(), attempted: 0, succeeded: 0 });
            self.indices.last_mut().expect("just pushed")
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MigrationOutcome, MigrationReport};
    use crate::model::MetadataKind;

    #[test]
    fn record_pipeline_run_accumulates_across_shards() {
        let mut report = RunReport::new();
        report.record_pipeline_run("idx_a", 100, &RunSummary { succeeded: 100, failed: vec![], lease_lost: false });
        report.record_pipeline_run("idx_a", 50, &RunSummary { succeeded: 48, failed: vec![FailedDoc { doc_id: "x".into(), cause: "boom".into() }], lease_lost: false });

        assert_eq!(report.indices.len(), 1);
        assert_eq!(report.indices[0].attempted, 150);
        assert_eq!(report.indices[0].succeeded, 148);
        assert_eq!(report.failed_items.len(), 1);
        assert_eq!(report.failed_items[0].name, "idx_a/x");
    }

    #[test]
    fn record_metadata_run_groups_by_kind() {
        let mut report = RunReport::new();
        let migration = MigrationReport {
            outcomes: vec![
                MigrationOutcome { name: "tmpl_a".into(), kind: MetadataKind::LegacyTemplate, successful: true, failure: None },
                MigrationOutcome { name: "idx_bad".into(), kind: MetadataKind::Index, successful: false, failure: Some("multi-type".into()) },
            ],
        };
        report.record_metadata_run(&migration);
        assert_eq!(report.metadata.len(), 2);
        assert!(report.has_failures());
        assert_eq!(report.failed_items[0].name, "idx_bad");
    }

    #[test]
    fn empty_report_serializes_to_the_s1_shape() {
        let mut report = RunReport::new();
        report.record_pipeline_run("idx_a", 0, &RunSummary::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["indices"][0]["name"], "idx_a");
        assert_eq!(json["indices"][0]["attempted"], 0);
        assert_eq!(json["indices"][0]["succeeded"], 0);
    }
}
