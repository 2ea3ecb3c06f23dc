use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{error::AppError, storage::db::SurrealDbClient, utils::ids::point_uuid};

use super::point::{DocType, SearchHit, VectorPoint, VectorRecord};

/// Points per page when serializing a backup.
const BACKUP_PAGE_SIZE: usize = 1_000;
/// Over-fetch multiplier when doc-type filtering happens in memory.
const DOC_TYPE_OVERFETCH: usize = 10;
/// HNSW search candidate pool.
const KNN_EF: usize = 40;

/// Tenant-scoped vector collection. One logical collection holds every
/// tenant's points; `tenant_id` (and `platform` when given) appears in every
/// search predicate.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<SurrealDbClient>,
    collection: String,
    dimension: usize,
    backup_dir: String,
}

#[derive(Debug, Deserialize)]
struct KnnRow {
    distance: f32,
    #[serde(flatten)]
    record: VectorRecord,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ScanRow {
    tenant_id: String,
    platform: String,
}

impl VectorStore {
    pub async fn new(
        db: Arc<SurrealDbClient>,
        collection: &str,
        dimension: usize,
        backup_dir: &str,
    ) -> Result<Self, AppError> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Validation(format!(
                "invalid collection name: {collection}"
            )));
        }

        let store = Self {
            db,
            collection: collection.to_string(),
            dimension,
            backup_dir: backup_dir.to_string(),
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Defines the collection's HNSW and payload indexes. Idempotent; also
    /// the recovery path when an upsert hits a missing collection.
    pub async fn ensure_collection(&self) -> Result<(), AppError> {
        let table = &self.collection;
        let statements = format!(
            "DEFINE INDEX IF NOT EXISTS idx_{table}_embedding ON {table} \
             FIELDS embedding HNSW DIMENSION {dim} DIST COSINE TYPE F32 EFC 100 M 8;
             DEFINE INDEX IF NOT EXISTS idx_{table}_tenant ON {table} FIELDS tenant_id;
             DEFINE INDEX IF NOT EXISTS idx_{table}_platform ON {table} FIELDS platform;
             DEFINE INDEX IF NOT EXISTS idx_{table}_original ON {table} FIELDS original_id;
             DEFINE INDEX IF NOT EXISTS idx_{table}_doc_type ON {table} FIELDS doc_type;
             DEFINE INDEX IF NOT EXISTS idx_{table}_source_type ON {table} FIELDS source_type;
             DEFINE INDEX IF NOT EXISTS idx_{table}_status ON {table} FIELDS status;",
            dim = self.dimension,
        );
        self.db.query(statements).await?;
        Ok(())
    }

    /// Upserts points under their deterministic 3-tuple ids.
    pub async fn upsert(&self, points: Vec<VectorPoint>) -> Result<usize, AppError> {
        let mut written = 0;
        let mut recreated = false;

        for point in points {
            if point.embedding.len() != self.dimension {
                return Err(AppError::VectorDb(format!(
                    "embedding dimension {} does not match collection dimension {}",
                    point.embedding.len(),
                    self.dimension
                )));
            }

            let id = point.id().to_string();
            let result = self
                .db
                .query("UPSERT type::thing($table, $id) CONTENT $point")
                .bind(("table", self.collection.clone()))
                .bind(("id", id.clone()))
                .bind(("point", point.clone()))
                .await;

            match result {
                Ok(_) => written += 1,
                Err(err) => {
                    let message = err.to_string().to_lowercase();
                    let missing =
                        message.contains("not found") || message.contains("does not exist");
                    if missing && !recreated {
                        warn!(
                            collection = %self.collection,
                            "collection missing during upsert; recreating"
                        );
                        self.ensure_collection().await?;
                        recreated = true;
                        self.db
                            .query("UPSERT type::thing($table, $id) CONTENT $point")
                            .bind(("table", self.collection.clone()))
                            .bind(("id", id))
                            .bind(("point", point))
                            .await
                            .map_err(|e| AppError::VectorDb(e.to_string()))?;
                        written += 1;
                    } else {
                        return Err(AppError::VectorDb(err.to_string()));
                    }
                }
            }
        }

        Ok(written)
    }

    /// KNN search. `tenant_id` is always in the predicate; `platform` when
    /// given. `doc_type` is filtered in memory over a 10× over-fetch so
    /// legacy points without a payload index still match.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        tenant_id: &str,
        platform: Option<&str>,
        doc_type: Option<DocType>,
    ) -> Result<Vec<SearchHit>, AppError> {
        if tenant_id.is_empty() {
            return Err(AppError::Validation("tenant_id is required".to_string()));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let fetch = if doc_type.is_some() {
            top_k.saturating_mul(DOC_TYPE_OVERFETCH)
        } else {
            top_k
        };

        let platform_clause = if platform.is_some() {
            " AND platform = $platform"
        } else {
            ""
        };
        let query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {table} \
             WHERE tenant_id = $tenant_id{platform_clause} \
             AND embedding <|{fetch},{ef}|> {embedding:?} \
             ORDER BY distance",
            table = self.collection,
            ef = KNN_EF,
            embedding = query_embedding,
        );

        let mut request = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()));
        if let Some(p) = platform {
            request = request.bind(("platform", p.to_string()));
        }
        let rows: Vec<KnnRow> = request
            .await
            .map_err(|e| AppError::VectorDb(e.to_string()))?
            .take(0)
            .map_err(|e| AppError::VectorDb(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_k);
        for row in rows {
            if let Some(wanted) = doc_type {
                if !row.record.matches_doc_type(wanted) {
                    continue;
                }
            }
            let score = (1.0 - row.distance).clamp(0.0, 1.0);
            hits.push(SearchHit {
                record: row.record,
                distance: row.distance,
                score,
            });
            if hits.len() >= top_k {
                break;
            }
        }
        Ok(hits)
    }

    /// Point lookup by the full 4-condition identity; returns payload and
    /// vector.
    pub async fn get_by_id(
        &self,
        tenant_id: &str,
        platform: &str,
        doc_type: DocType,
        original_id: &str,
    ) -> Result<Option<VectorRecord>, AppError> {
        let query = format!(
            "SELECT * FROM {table} WHERE tenant_id = $tenant_id AND platform = $platform \
             AND original_id = $original_id",
            table = self.collection,
        );
        let rows: Vec<VectorRecord> = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("original_id", original_id.to_string()))
            .await
            .map_err(|e| AppError::VectorDb(e.to_string()))?
            .take(0)
            .map_err(|e| AppError::VectorDb(e.to_string()))?;

        Ok(rows.into_iter().find(|r| r.matches_doc_type(doc_type)))
    }

    /// Deletes points by original id. Refuses to run without both tenant and
    /// platform so a bad call can never cross a tenant boundary.
    pub async fn delete(
        &self,
        original_ids: &[String],
        tenant_id: &str,
        platform: &str,
    ) -> Result<(), AppError> {
        if tenant_id.is_empty() || platform.is_empty() {
            return Err(AppError::Validation(
                "delete requires tenant_id and platform".to_string(),
            ));
        }
        if original_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = original_ids
            .iter()
            .map(|original| point_uuid(tenant_id, platform, original).to_string())
            .collect();

        let query = format!(
            "DELETE {table} WHERE record::id(id) IN $ids \
             AND tenant_id = $tenant_id AND platform = $platform",
            table = self.collection,
        );
        self.db
            .query(query)
            .bind(("ids", ids))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .await
            .map_err(|e| AppError::VectorDb(e.to_string()))?;
        Ok(())
    }

    /// Removes every point of one `(tenant, platform)` pair. Both filters
    /// are mandatory for the same reason as `delete`.
    pub async fn purge(&self, tenant_id: &str, platform: &str) -> Result<(), AppError> {
        if tenant_id.is_empty() || platform.is_empty() {
            return Err(AppError::Validation(
                "purge requires tenant_id and platform".to_string(),
            ));
        }
        let query = format!(
            "DELETE {table} WHERE tenant_id = $tenant_id AND platform = $platform",
            table = self.collection,
        );
        self.db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .await
            .map_err(|e| AppError::VectorDb(e.to_string()))?;
        Ok(())
    }

    /// Filtered point count; falls back to a scrolled scan with an in-memory
    /// predicate when the filtered count query is refused.
    pub async fn count(
        &self,
        tenant_id: Option<&str>,
        platform: Option<&str>,
    ) -> Result<usize, AppError> {
        let mut conditions = Vec::new();
        if tenant_id.is_some() {
            conditions.push("tenant_id = $tenant_id");
        }
        if platform.is_some() {
            conditions.push("platform = $platform");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT count() AS count FROM {table}{where_clause} GROUP ALL",
            table = self.collection,
        );
        let mut request = self.db.query(query);
        if let Some(t) = tenant_id {
            request = request.bind(("tenant_id", t.to_string()));
        }
        if let Some(p) = platform {
            request = request.bind(("platform", p.to_string()));
        }

        match request.await {
            Ok(mut response) => {
                let rows: Vec<CountRow> = response
                    .take(0)
                    .map_err(|e| AppError::VectorDb(e.to_string()))?;
                Ok(rows.first().map_or(0, |r| r.count))
            }
            Err(err) => {
                warn!(
                    error = %err,
                    "filtered count refused; falling back to scrolled scan"
                );
                self.count_by_scan(tenant_id, platform).await
            }
        }
    }

    async fn count_by_scan(
        &self,
        tenant_id: Option<&str>,
        platform: Option<&str>,
    ) -> Result<usize, AppError> {
        let query = format!(
            "SELECT tenant_id, platform FROM {table}",
            table = self.collection
        );
        let rows: Vec<ScanRow> = self
            .db
            .query(query)
            .await
            .map_err(|e| AppError::VectorDb(e.to_string()))?
            .take(0)
            .map_err(|e| AppError::VectorDb(e.to_string()))?;

        Ok(rows
            .iter()
            .filter(|r| tenant_id.is_none_or(|t| r.tenant_id == t))
            .filter(|r| platform.is_none_or(|p| r.platform == p))
            .count())
    }

    /// Serializes every point (vector + payload) to a timestamped JSON file,
    /// reading in pages of 1000. Returns the backup path.
    pub async fn backup(&self) -> Result<std::path::PathBuf, AppError> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;

        let mut all: Vec<VectorRecord> = Vec::new();
        let mut start = 0;
        loop {
            let query = format!(
                "SELECT * FROM {table} LIMIT {limit} START {start}",
                table = self.collection,
                limit = BACKUP_PAGE_SIZE,
            );
            let page: Vec<VectorRecord> = self
                .db
                .query(query)
                .await
                .map_err(|e| AppError::VectorDb(e.to_string()))?
                .take(0)
                .map_err(|e| AppError::VectorDb(e.to_string()))?;

            let page_len = page.len();
            all.extend(page);
            if page_len < BACKUP_PAGE_SIZE {
                break;
            }
            start += BACKUP_PAGE_SIZE;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = std::path::Path::new(&self.backup_dir)
            .join(format!("{}_{timestamp}.json", self.collection));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&all)?).await?;
        info!(
            collection = %self.collection,
            points = all.len(),
            path = %path.display(),
            "vector collection backed up"
        );
        Ok(path)
    }

    /// Drops and recreates the collection. Refuses without `confirm`; backs
    /// up first unless told otherwise.
    pub async fn reset(&self, confirm: bool, create_backup: bool) -> Result<(), AppError> {
        if !confirm {
            return Err(AppError::Validation(
                "reset requires confirm=true".to_string(),
            ));
        }

        if create_backup {
            self.backup().await?;
        }

        let drop = format!("REMOVE TABLE IF EXISTS {table}", table = self.collection);
        self.db
            .query(drop)
            .await
            .map_err(|e| AppError::VectorDb(e.to_string()))?;
        self.ensure_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const DIM: usize = 3;

    async fn test_store(backup_dir: &str) -> VectorStore {
        let database = &Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("vector_ns", database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        VectorStore::new(db, "documents", DIM, backup_dir)
            .await
            .expect("store")
    }

    fn point(tenant: &str, doc_type: DocType, original_id: &str, embedding: Vec<f32>) -> VectorPoint {
        VectorPoint {
            tenant_id: tenant.to_string(),
            platform: "freshdesk".to_string(),
            doc_type,
            original_id: original_id.to_string(),
            object_type: doc_type.as_str().to_string(),
            summary: Some(format!("summary of {original_id}")),
            tenant_metadata: json!({"status": "open"}),
            embedding,
        }
    }

    #[tokio::test]
    async fn search_filters_tenant_and_doc_type() {
        let store = test_store("./backups").await;

        store
            .upsert(vec![
                point("a", DocType::Ticket, "1", vec![1.0, 0.0, 0.0]),
                point("a", DocType::Article, "2", vec![0.9, 0.1, 0.0]),
                point("b", DocType::Ticket, "3", vec![1.0, 0.0, 0.1]),
            ])
            .await
            .expect("upsert");

        let query = [1.0, 0.0, 0.0];

        let tickets = store
            .search(&query, 10, "a", None, Some(DocType::Ticket))
            .await
            .expect("ticket search");
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].record.original_id, "1");

        let all_a = store
            .search(&query, 10, "a", None, None)
            .await
            .expect("tenant search");
        assert_eq!(all_a.len(), 2);
        assert!(all_a.iter().all(|h| h.record.tenant_id == "a"));
    }

    #[tokio::test]
    async fn reingestion_does_not_grow_point_count() {
        let store = test_store("./backups").await;

        let p = point("a", DocType::Ticket, "77", vec![0.5, 0.5, 0.0]);
        store.upsert(vec![p.clone()]).await.expect("first upsert");
        store.upsert(vec![p]).await.expect("second upsert");

        assert_eq!(store.count(Some("a"), None).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn get_by_id_returns_payload_and_vector() {
        let store = test_store("./backups").await;

        store
            .upsert(vec![point("a", DocType::Article, "kb-9", vec![0.0, 1.0, 0.0])])
            .await
            .expect("upsert");

        let found = store
            .get_by_id("a", "freshdesk", DocType::Article, "kb-9")
            .await
            .expect("get")
            .expect("record");
        assert_eq!(found.embedding.len(), DIM);
        assert_eq!(found.summary.as_deref(), Some("summary of kb-9"));

        let wrong_type = store
            .get_by_id("a", "freshdesk", DocType::Ticket, "kb-9")
            .await
            .expect("get");
        assert!(wrong_type.is_none());
    }

    #[tokio::test]
    async fn delete_requires_tenant_and_platform() {
        let store = test_store("./backups").await;

        let err = store
            .delete(&["1".to_string()], "", "freshdesk")
            .await
            .expect_err("must refuse");
        assert!(matches!(err, AppError::Validation(_)));

        store
            .upsert(vec![point("a", DocType::Ticket, "1", vec![1.0, 0.0, 0.0])])
            .await
            .expect("upsert");
        store
            .delete(&["1".to_string()], "a", "freshdesk")
            .await
            .expect("delete");
        assert_eq!(store.count(Some("a"), None).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn delete_never_crosses_tenants() {
        let store = test_store("./backups").await;

        store
            .upsert(vec![
                point("a", DocType::Ticket, "1", vec![1.0, 0.0, 0.0]),
                point("b", DocType::Ticket, "1", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .expect("upsert");

        store
            .delete(&["1".to_string()], "a", "freshdesk")
            .await
            .expect("delete");
        assert_eq!(store.count(Some("b"), None).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let store = test_store("./backups").await;
        let err = store
            .upsert(vec![point("a", DocType::Ticket, "1", vec![1.0, 0.0])])
            .await
            .expect_err("wrong dimension");
        assert!(matches!(err, AppError::VectorDb(_)));
    }

    #[tokio::test]
    async fn backup_then_reset_empties_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backup_dir = dir.path().to_string_lossy().into_owned();
        let store = test_store(&backup_dir).await;

        store
            .upsert(vec![point("a", DocType::Ticket, "1", vec![1.0, 0.0, 0.0])])
            .await
            .expect("upsert");

        assert!(matches!(
            store.reset(false, false).await,
            Err(AppError::Validation(_))
        ));

        store.reset(true, true).await.expect("reset");
        assert_eq!(store.count(None, None).await.expect("count"), 0);

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .collect::<Result<_, _>>()
            .expect("entries");
        assert_eq!(backups.len(), 1, "reset should have written one backup");
    }
}
