//! HTTP/JSON [`CoordinatorStore`] backed by a plain OpenSearch/Elasticsearch
//! index used purely as a CAS-capable KV store - the most natural backend
//! given the target cluster is already in the picture for the run (§4.3
//! design note). Work items are indexed documents; `_seq_no` stands in for
//! the abstract CAS version.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use super::{CasVersion, CoordinatorStore};
use crate::error::{Error, Result};
use crate::model::WorkItem;
use crate::retry::{with_retry, RetryPolicy};

pub struct HttpCoordinatorStore {
    client: Client,
    base_url: String,
    index: String,
}

impl HttpCoordinatorStore {
    pub fn new(client: Client, base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into(), index: index.into() }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }

    fn classify(status: StatusCode, body: &str) -> Error {
        if status.is_server_error() || status.as_u16() == 429 {
            Error::TransientIo(format!("coordinator store {status}: {body}"))
        } else {
            Error::OperationFailed(format!("coordinator store {status}: {body}"))
        }
    }
}

#[async_trait]
impl CoordinatorStore for HttpCoordinatorStore {
    async fn create_if_absent(&self, id: &str, body: WorkItem) -> Result<bool> {
        let url = format!("{}?op_type=create", self.doc_url(id));
        with_retry(RetryPolicy::METADATA_CREATE, || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = self.client.put(&url).json(&body).send().await.map_err(|e| {
                    Error::TransientIo(e.to_string())
                })?;
                match resp.status() {
                    StatusCode::CREATED | StatusCode::OK => Ok(true),
                    StatusCode::CONFLICT => Ok(false),
                    status => {
                        let text = resp.text().await.unwrap_or_default();
                        Err(Self::classify(status, &text))
                    }
                }
            }
        })
        .await
    }

    async fn cas_update(&self, id: &str, expected_version: CasVersion, new_body: WorkItem) -> Result<bool> {
        let url = format!(
            "{}?if_seq_no={}&if_primary_term=1",
            self.doc_url(id),
            expected_version
        );
        with_retry(RetryPolicy::METADATA_CREATE, || {
            let url = url.clone();
            let new_body = new_body.clone();
            async move {
                let resp = self.client.put(&url).json(&new_body).send().await.map_err(|e| {
                    Error::TransientIo(e.to_string())
                })?;
                match resp.status() {
                    StatusCode::CREATED | StatusCode::OK => Ok(true),
                    StatusCode::CONFLICT => Ok(false),
                    status => {
                        let text = resp.text().await.unwrap_or_default();
                        Err(Self::classify(status, &text))
                    }
                }
            }
        })
        .await
    }

    async fn read(&self, id: &str) -> Result<Option<(WorkItem, CasVersion)>> {
        let url = self.doc_url(id);
        with_retry(RetryPolicy::METADATA_CREATE, || {
            let url = url.clone();
            async move {
                let resp = self.client.get(&url).send().await.map_err(|e| Error::TransientIo(e.to_string()))?;
                if resp.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !resp.status().is_success() {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(Self::classify(status, &text));
                }
                let envelope: serde_json::Value = resp.json().await?;
                let seq_no = envelope.get("_seq_no").and_then(|v| v.as_u64()).unwrap_or(0);
                let item: WorkItem = serde_json::from_value(
                    envelope
                        .get("_source")
                        .cloned()
                        .ok_or_else(|| Error::InvalidResponse {
                            operation: "coordinator read".into(),
                            detail: "missing _source".into(),
                        })?,
                )?;
                Ok(Some((item, seq_no)))
            }
        })
        .await
    }

    async fn query_unassigned(&self, now_millis: i64, limit: usize) -> Result<Vec<String>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let query = json!({
            "size": limit,
            "_source": false,
            "query": {
                "bool": {
                    "should": [
                        {"term": {"state": "Unassigned"}},
                        {
                            "bool": {
                                "must": [
                                    {"term": {"state": "Leased"}},
                                    {"range": {"lease_expiry": {"lt": now_millis}}},
                                ]
                            }
                        }
                    ],
                    "minimum_should_match": 1
                }
            }
        });
        with_retry(RetryPolicy::METADATA_CREATE, || {
            let url = url.clone();
            let query = query.clone();
            async move {
                let resp = self.client.post(&url).json(&query).send().await.map_err(|e| {
                    Error::TransientIo(e.to_string())
                })?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(Self::classify(status, &text));
                }
                let body: serde_json::Value = resp.json().await?;
                Ok(extract_hit_ids(&body))
            }
        })
        .await
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let query = json!({"size": 10_000, "_source": false, "query": {"match_all": {}}});
        with_retry(RetryPolicy::METADATA_CREATE, || {
            let url = url.clone();
            let query = query.clone();
            async move {
                let resp = self.client.post(&url).json(&query).send().await.map_err(|e| {
                    Error::TransientIo(e.to_string())
                })?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(Self::classify(status, &text));
                }
                let body: serde_json::Value = resp.json().await?;
                Ok(extract_hit_ids(&body))
            }
        })
        .await
    }
}

fn extract_hit_ids(search_response: &serde_json::Value) -> Vec<String> {
    search_response["hits"]["hits"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|hit| hit.get("_id").and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}
