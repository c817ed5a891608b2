//! Context service - searchable knowledge entries linked to tasks

use super::{CapabilityClient, MockBackend};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_foundation::{Error, Result, CONTEXT_SERVICE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod ops {
    pub const SEARCH: &str = "context_search";
    pub const CREATE: &str = "context_create";
    pub const GET: &str = "context_get";
    pub const UPDATE: &str = "context_update";
    pub const DELETE: &str = "context_delete";
}

/// Stored context entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub id: String,
    pub title: String,
    /// Free text matched by `context_search`
    pub content: String,
    /// Serialized as `type`; free-form, e.g. "note" or "code"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary JSON attached by the caller
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContextEntry {
    pub title: String,
    pub content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Match entries carrying at least one of these tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    fn matches(&self, entry: &ContextEntry) -> bool {
        if let Some(tags) = &self.tags {
            if !tags.is_empty() && !tags.iter().any(|t| entry.tags.contains(t)) {
                return false;
            }
        }
        if let Some(entry_type) = &self.entry_type {
            if entry.entry_type.as_ref() != Some(entry_type) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if entry.created_at > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct EntryResponse {
    #[serde(default)]
    context: Option<ContextEntry>,
}

/// Typed operations on the `contextService` client
#[derive(Clone)]
pub struct ContextServiceClient {
    client: Arc<dyn CapabilityClient>,
}

impl ContextServiceClient {
    pub fn new(client: Arc<dyn CapabilityClient>) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &Arc<dyn CapabilityClient> {
        &self.client
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, args: Value) -> Result<T> {
        let value = self.client.call(operation, args).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::remote_call(
                self.client.name(),
                operation,
                format!("unexpected response: {}", e),
            )
        })
    }

    fn require_entry(&self, operation: &str, response: EntryResponse) -> Result<ContextEntry> {
        response
            .context
            .ok_or_else(|| Error::remote_call(self.client.name(), operation, "no context returned"))
    }

    pub async fn search(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<ContextEntry>> {
        let response: SearchResponse = self
            .call(ops::SEARCH, json!({ "query": query, "filters": filters }))
            .await?;
        Ok(response.results)
    }

    pub async fn create(&self, entry: &NewContextEntry) -> Result<ContextEntry> {
        let response: EntryResponse = self.call(ops::CREATE, serde_json::to_value(entry)?).await?;
        self.require_entry(ops::CREATE, response)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ContextEntry>> {
        let response: EntryResponse = self.call(ops::GET, json!({ "id": id })).await?;
        Ok(response.context)
    }

    pub async fn update(&self, id: &str, updates: &ContextUpdate) -> Result<ContextEntry> {
        let response: EntryResponse = self
            .call(ops::UPDATE, json!({ "id": id, "updates": updates }))
            .await?;
        self.require_entry(ops::UPDATE, response)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client
            .call(ops::DELETE, json!({ "id": id }))
            .await
            .map(|_| ())
    }
}

// ============================================================================
// Mock backend
// ============================================================================

/// In-memory context store with substring search
#[derive(Default)]
pub struct MockContextBackend {
    entries: Mutex<BTreeMap<String, ContextEntry>>,
}

impl MockContextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(operation: &str, message: impl Into<String>) -> Error {
        Error::remote_call(CONTEXT_SERVICE, operation, message)
    }

    fn parse<T: DeserializeOwned>(operation: &str, value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| Self::fail(operation, format!("invalid arguments: {}", e)))
    }

    fn id_arg(operation: &str, args: &Value) -> Result<String> {
        args.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Self::fail(operation, "missing 'id'"))
    }
}

impl MockBackend for MockContextBackend {
    fn handle(&self, operation: &str, args: Value) -> Result<Value> {
        let mut entries = self.entries.lock();

        match operation {
            ops::SEARCH => {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                let filters: SearchFilters = match args.get("filters") {
                    Some(value) if !value.is_null() => Self::parse(operation, value.clone())?,
                    _ => SearchFilters::default(),
                };

                let results: Vec<&ContextEntry> = entries
                    .values()
                    .filter(|entry| {
                        query.is_empty()
                            || entry.title.to_lowercase().contains(&query)
                            || entry.content.to_lowercase().contains(&query)
                    })
                    .filter(|entry| filters.matches(entry))
                    .collect();
                Ok(json!({ "results": results }))
            }
            ops::CREATE => {
                let new: NewContextEntry = Self::parse(operation, args)?;
                let now = Utc::now();
                let entry = ContextEntry {
                    id: format!("ctx-{}", uuid::Uuid::new_v4()),
                    title: new.title,
                    content: new.content,
                    entry_type: new.entry_type,
                    tags: new.tags,
                    metadata: new.metadata,
                    created_at: now,
                    updated_at: now,
                };
                entries.insert(entry.id.clone(), entry.clone());
                Ok(json!({ "context": entry }))
            }
            ops::GET => {
                let id = Self::id_arg(operation, &args)?;
                Ok(json!({ "context": entries.get(&id) }))
            }
            ops::UPDATE => {
                let id = Self::id_arg(operation, &args)?;
                let updates: ContextUpdate =
                    Self::parse(operation, args.get("updates").cloned().unwrap_or(Value::Null))?;
                let entry = entries
                    .get_mut(&id)
                    .ok_or_else(|| Self::fail(operation, format!("context {} not found", id)))?;

                if let Some(title) = updates.title {
                    entry.title = title;
                }
                if let Some(content) = updates.content {
                    entry.content = content;
                }
                if let Some(entry_type) = updates.entry_type {
                    entry.entry_type = Some(entry_type);
                }
                if let Some(tags) = updates.tags {
                    entry.tags = tags;
                }
                if let Some(metadata) = updates.metadata {
                    entry.metadata.extend(metadata);
                }
                entry.updated_at = Utc::now();
                Ok(json!({ "context": entry }))
            }
            ops::DELETE => {
                let id = Self::id_arg(operation, &args)?;
                entries
                    .remove(&id)
                    .map(|_| json!({ "deleted": id }))
                    .ok_or_else(|| Self::fail(operation, format!("context {} not found", id)))
            }
            other => Err(Self::fail(other, "unknown operation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockClient;

    async fn connected_service() -> ContextServiceClient {
        let client = MockClient::new(CONTEXT_SERVICE, Box::new(MockContextBackend::new()));
        client.connect().await.unwrap();
        ContextServiceClient::new(Arc::new(client))
    }

    fn entry(title: &str, content: &str, tags: &[&str]) -> NewContextEntry {
        NewContextEntry {
            title: title.into(),
            content: content.into(),
            entry_type: Some("note".into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_create_search_update_delete() {
        let service = connected_service().await;

        let created = service
            .create(&entry("Retry policy", "Exponential backoff, capped", &["supervisor"]))
            .await
            .unwrap();
        assert!(created.id.starts_with("ctx-"));
        service
            .create(&entry("Queue", "FIFO dispatch", &["orchestrator"]))
            .await
            .unwrap();

        let hits = service.search("backoff", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, created.id);

        let filters = SearchFilters {
            tags: Some(vec!["orchestrator".into()]),
            ..Default::default()
        };
        let hits = service.search("", Some(&filters)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Queue");

        let updated = service
            .update(
                &created.id,
                &ContextUpdate {
                    content: Some("Exponential backoff, capped at max delay".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Retry policy");
        assert!(updated.content.ends_with("max delay"));
        assert!(updated.updated_at >= created.updated_at);

        service.delete(&created.id).await.unwrap();
        assert!(service.get(&created.id).await.unwrap().is_none());
        assert!(service.delete(&created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_by_type_and_date() {
        let service = connected_service().await;
        let created = service.create(&entry("a", "b", &[])).await.unwrap();

        let wrong_type = SearchFilters {
            entry_type: Some("doc".into()),
            ..Default::default()
        };
        assert!(service.search("", Some(&wrong_type)).await.unwrap().is_empty());

        let future_only = SearchFilters {
            date_from: Some(created.created_at + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(service.search("", Some(&future_only)).await.unwrap().is_empty());
    }
}
