//! §4.5 `readGlobalMetadata` / `readIndexMetadata`: metadata may come from
//! a snapshot (§4.1) or a live source cluster (HTTP), behind one
//! [`MetadataSource`] trait so the migrator doesn't care which.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{MetadataItem, MetadataKind};
use crate::repo::SnapshotRepository;
use crate::version::Version;

/// Everything `readGlobalMetadata` returns: legacy templates, component
/// templates, index templates, and aliases, each already tagged with its
/// [`MetadataKind`] and source [`Version`].
#[derive(Clone, Debug, Default)]
pub struct GlobalMetadata {
    pub legacy_templates: Vec<MetadataItem>,
    pub component_templates: Vec<MetadataItem>,
    pub index_templates: Vec<MetadataItem>,
    pub aliases: Vec<MetadataItem>,
}

impl GlobalMetadata {
    /// All items in §4.5's migration order: legacy templates, component
    /// templates, index templates, then aliases (indices are supplied
    /// separately via `read_index_metadata`, one call per allowlisted
    /// index).
    pub fn ordered(&self) -> Vec<MetadataItem> {
        let mut out = Vec::new();
        out.extend(self.legacy_templates.iter().cloned());
        out.extend(self.component_templates.iter().cloned());
        out.extend(self.index_templates.iter().cloned());
        out.extend(self.aliases.iter().cloned());
        out
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn read_global_metadata(&self) -> Result<GlobalMetadata>;
    async fn read_index_metadata(&self, index_name: &str) -> Result<MetadataItem>;
}

/// Reads global and per-index metadata out of a snapshot's `meta-<snap>.dat`
/// and `meta-<idx>.dat` files (§6 snapshot layout).
pub struct SnapshotMetadataSource<R: SnapshotRepository + ?Sized> {
    repo: std::sync::Arc<R>,
    snapshot: String,
    source_version: Version,
}

impl<R: SnapshotRepository + ?Sized> SnapshotMetadataSource<R> {
    pub fn new(repo: std::sync::Arc<R>, snapshot: impl Into<String>, source_version: Version) -> Self {
        Self { repo, snapshot: snapshot.into(), source_version }
    }
}

#[derive(serde::Deserialize)]
struct GlobalMetadataWire {
    #[serde(default)]
    legacy_templates: Vec<NamedBody>,
    #[serde(default)]
    component_templates: Vec<NamedBody>,
    #[serde(default)]
    index_templates: Vec<NamedBody>,
    #[serde(default)]
    aliases: Vec<NamedBody>,
}

#[derive(serde::Deserialize)]
struct NamedBody {
    name: String,
    body: Value,
}

#[async_trait]
impl<R: SnapshotRepository + ?Sized> MetadataSource for SnapshotMetadataSource<R> {
    async fn read_global_metadata(&self) -> Result<GlobalMetadata> {
        let bytes = self.repo.global_metadata_bytes(&self.snapshot).await?;
        let wire: GlobalMetadataWire = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Storage(format!("malformed global metadata for snapshot {}: {e}", self.snapshot))
        })?;
        let item = |kind: MetadataKind, nb: NamedBody| MetadataItem {
            kind,
            name: nb.name,
            body: nb.body,
            source_version: self.source_version,
        };
        Ok(GlobalMetadata {
            legacy_templates: wire
                .legacy_templates
                .into_iter()
                .map(|nb| item(MetadataKind::LegacyTemplate, nb))
                .collect(),
            component_templates: wire
                .component_templates
                .into_iter()
                .map(|nb| item(MetadataKind::ComponentTemplate, nb))
                .collect(),
            index_templates: wire
                .index_templates
                .into_iter()
                .map(|nb| item(MetadataKind::IndexTemplate, nb))
                .collect(),
            aliases: wire.aliases.into_iter().map(|nb| item(MetadataKind::Alias, nb)).collect(),
        })
    }

    async fn read_index_metadata(&self, index_name: &str) -> Result<MetadataItem> {
        let bytes = self.repo.index_metadata_bytes(&self.snapshot, index_name).await?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Storage(format!("malformed index metadata for {index_name}: {e}"))
        })?;
        Ok(MetadataItem {
            kind: MetadataKind::Index,
            name: index_name.to_string(),
            body,
            source_version: self.source_version,
        })
    }
}

/// Reads metadata straight from a live source cluster's HTTP surface, for
/// deployments that migrate directly rather than from a snapshot.
pub struct LiveMetadataSource {
    client: Client,
    base_url: String,
    source_version: Version,
}

impl LiveMetadataSource {
    pub fn new(client: Client, base_url: impl Into<String>, source_version: Version) -> Self {
        Self { client, base_url: base_url.into(), source_version }
    }

    async fn get_named_map(&self, path: &str, field: &str) -> Result<Vec<NamedBody>> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| Error::TransientIo(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::OperationFailed(format!("GET {url} failed with {status}: {text}")));
        }
        let body: Value = resp.json().await?;
        let map = match field {
            "" => body,
            f => body.get(f).cloned().unwrap_or(Value::Object(Default::default())),
        };
        let Value::Object(map) = map else {
            return Ok(Vec::new());
        };
        Ok(map.into_iter().map(|(name, body)| NamedBody { name, body }).collect())
    }
}

#[async_trait]
impl MetadataSource for LiveMetadataSource {
    async fn read_global_metadata(&self) -> Result<GlobalMetadata> {
        let legacy = self.get_named_map("/_template", "").await?;
        let component = self.get_named_map("/_component_template", "component_templates").await?;
        let index_tmpl = self.get_named_map("/_index_template", "index_templates").await?;
        let aliases = self.get_named_map("/_alias", "").await?;

        let item = |kind: MetadataKind, nb: NamedBody| MetadataItem {
            kind,
            name: nb.name,
            body: nb.body,
            source_version: self.source_version,
        };
        Ok(GlobalMetadata {
            legacy_templates: legacy.into_iter().map(|nb| item(MetadataKind::LegacyTemplate, nb)).collect(),
            component_templates: component.into_iter().map(|nb| item(MetadataKind::ComponentTemplate, nb)).collect(),
            index_templates: index_tmpl.into_iter().map(|nb| item(MetadataKind::IndexTemplate, nb)).collect(),
            aliases: aliases.into_iter().map(|nb| item(MetadataKind::Alias, nb)).collect(),
        })
    }

    async fn read_index_metadata(&self, index_name: &str) -> Result<MetadataItem> {
        let url = format!("{}/{}", self.base_url, index_name);
        let resp = self.client.get(&url).send().await.map_err(|e| Error::TransientIo(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::OperationFailed(format!("GET {url} failed with {status}")));
        }
        let envelope: Value = resp.json().await?;
        let body = envelope.get(index_name).cloned().unwrap_or(envelope);
        Ok(MetadataItem {
            kind: MetadataKind::Index,
            name: index_name.to_string(),
            body,
            source_version: self.source_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexRef;
    use crate::version::Flavor;
    use std::sync::Arc;

    struct FakeRepo;

    #[async_trait]
    impl SnapshotRepository for FakeRepo {
        async fn list_snapshots(&self) -> Result<Vec<String>> {
            Ok(vec!["s1".into()])
        }
        async fn list_indices(&self, _snapshot: &str) -> Result<Vec<IndexRef>> {
            Ok(vec![IndexRef { name: "idx_a".into(), uuid: "uuid-a".into() }])
        }
        async fn list_shards(&self, _snapshot: &str, _index_name: &str) -> Result<Vec<u32>> {
            Ok(vec![0])
        }
        async fn shard_manifest(&self, _s: &str, _i: &str, _n: u32) -> Result<Vec<crate::model::ShardFileInfo>> {
            Ok(vec![])
        }
        async fn blob(&self, _u: &str, _n: u32, _p: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn global_metadata_bytes(&self, _snapshot: &str) -> Result<Vec<u8>> {
            Ok(serde_json::json!({
                "legacy_templates": [{"name": "tmpl_a", "body": {"index_patterns": ["logs-*"]}}],
                "component_templates": [],
                "index_templates": [],
                "aliases": [{"name": "alias_a", "body": {"index": "idx_a"}}]
            })
            .to_string()
            .into_bytes())
        }
        async fn index_metadata_bytes(&self, _snapshot: &str, index_name: &str) -> Result<Vec<u8>> {
            Ok(serde_json::json!({"settings": {}, "mappings": {}, "name": index_name}).to_string().into_bytes())
        }
    }

    #[tokio::test]
    async fn reads_global_metadata_from_snapshot() {
        let source = SnapshotMetadataSource::new(Arc::new(FakeRepo), "s1", Version::new(Flavor::Es, 7, 10, 0));
        let global = source.read_global_metadata().await.unwrap();
        assert_eq!(global.legacy_templates.len(), 1);
        assert_eq!(global.legacy_templates[0].name, "tmpl_a");
        assert_eq!(global.aliases.len(), 1);
        assert_eq!(global.ordered().len(), 2);
    }

    #[tokio::test]
    async fn reads_index_metadata_from_snapshot() {
        let source = SnapshotMetadataSource::new(Arc::new(FakeRepo), "s1", Version::new(Flavor::Es, 7, 10, 0));
        let item = source.read_index_metadata("idx_a").await.unwrap();
        assert_eq!(item.kind, MetadataKind::Index);
        assert_eq!(item.name, "idx_a");
    }
}
