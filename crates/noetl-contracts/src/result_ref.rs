// ResultRef: a pointer to a possibly-externalized task result (spec.md
// §3 "ResultRef", §4.7). Small results are stored inline; large ones
// are written to an external store and referenced by this pointer plus
// a manifest for paginated retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playbook::{ResultScope, ResultStore};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPage {
    pub page: u32,
    pub byte_offset: u64,
    pub byte_len: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Describes how a multi-page external result is laid out, so
/// `GET /api/result/resolve` can stream a single page without loading
/// the whole object.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub total_bytes: u64,
    #[serde(default)]
    pub total_rows: Option<u64>,
    pub pages: Vec<ManifestPage>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRef {
    pub result_id: i64,
    pub execution_id: i64,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub store: ResultStore,
    pub scope: ResultScope,
    /// Opaque key into `store`, absent for inline results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    /// Present when the whole result fits within `inline_max_bytes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    /// Small fields lifted out via `result.select[]`, always safe to
    /// surface without resolving the full payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extracted: serde_json::Map<String, serde_json::Value>,
    /// Human-scale preview, truncated, for list views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResultRef {
    pub fn is_inline(&self) -> bool {
        self.inline.is_some()
    }
}

/// `GET /api/result/resolve` query params.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveQuery {
    pub result_id: i64,
    #[serde(default)]
    pub page: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_result_has_no_manifest_needed() {
        let r = ResultRef {
            result_id: 1,
            execution_id: 1,
            step: "fetch".into(),
            task: None,
            store: ResultStore::Memory,
            scope: ResultScope::Step,
            object_key: None,
            inline: Some(serde_json::json!({"ok": true})),
            manifest: None,
            extracted: Default::default(),
            preview: None,
            size_bytes: 13,
            created_at: chrono::Utc::now(),
            expires_at: None,
        };
        assert!(r.is_inline());
    }
}
