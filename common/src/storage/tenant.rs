use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use tracing::info;

use crate::{
    error::AppError,
    utils::config::{AppConfig, StoreBackend},
};

use super::db::SurrealDbClient;

/// How long an idle tenant connection is kept before being dropped and
/// re-created on demand.
const HANDLE_IDLE_TTL: Duration = Duration::from_secs(600);

/// Resolves per-tenant database handles for either C2 backend.
///
/// * `Embedded` — one `surrealkv` file per tenant under `data_dir`
///   (`{tenant_id}_data.db`).
/// * `Central` — one database per tenant (`tenant_{tenant_id}`) on a single
///   SurrealDB server.
///
/// Handles are cached with an idle TTL; concurrent first requests for the
/// same tenant are coalesced by the cache.
#[derive(Clone)]
pub struct TenantStores {
    config: Arc<AppConfig>,
    handles: Cache<String, Arc<SurrealDbClient>>,
}

impl TenantStores {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let handles = Cache::builder()
            .max_capacity(1_024)
            .time_to_idle(HANDLE_IDLE_TTL)
            .build();
        Self { config, handles }
    }

    pub async fn for_tenant(&self, tenant_id: &str) -> Result<Arc<SurrealDbClient>, AppError> {
        let config = Arc::clone(&self.config);
        let tenant = tenant_id.to_string();

        self.handles
            .try_get_with(tenant.clone(), async move {
                let client = Self::open(&config, &tenant).await?;
                client.ensure_tenant_schema().await?;
                info!(tenant_id = %tenant, "opened tenant store");
                Ok::<_, AppError>(Arc::new(client))
            })
            .await
            .map_err(|e: Arc<AppError>| AppError::InternalError(e.to_string()))
    }

    /// Opens the vector-store database, which lives beside the tenant stores
    /// but in its own database so one collection can span all tenants.
    pub async fn vector_client(&self) -> Result<Arc<SurrealDbClient>, AppError> {
        let config = Arc::clone(&self.config);

        self.handles
            .try_get_with("\u{0}vectors".to_string(), async move {
                let client = match &config.vector_address {
                    Some(address) => {
                        SurrealDbClient::new(
                            address,
                            Self::credentials(&config),
                            &config.surrealdb_namespace,
                            "vectors",
                        )
                        .await?
                    }
                    None => {
                        let address = format!("surrealkv://{}/vectors.db", config.data_dir);
                        SurrealDbClient::new(&address, None, &config.surrealdb_namespace, "vectors")
                            .await?
                    }
                };
                Ok::<_, AppError>(Arc::new(client))
            })
            .await
            .map_err(|e: Arc<AppError>| AppError::InternalError(e.to_string()))
    }

    fn credentials(config: &AppConfig) -> Option<(&str, &str)> {
        match (&config.surrealdb_username, &config.surrealdb_password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    async fn open(config: &AppConfig, tenant_id: &str) -> Result<SurrealDbClient, AppError> {
        match config.store_backend {
            StoreBackend::Embedded => {
                let address = format!("surrealkv://{}/{}_data.db", config.data_dir, tenant_id);
                Ok(SurrealDbClient::new(
                    &address,
                    None,
                    &config.surrealdb_namespace,
                    "data",
                )
                .await?)
            }
            StoreBackend::Central => {
                let address = config.surrealdb_address.as_deref().ok_or_else(|| {
                    AppError::Config(
                        "surrealdb_address is required for the central store backend".to_string(),
                    )
                })?;
                let database = format!("tenant_{tenant_id}");
                Ok(SurrealDbClient::new(
                    address,
                    Self::credentials(config),
                    &config.surrealdb_namespace,
                    &database,
                )
                .await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::integrated_object::{
        IntegratedObject, ObjectMetadata, ObjectType,
    };
    use serde_json::json;

    fn central_memory_config() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.store_backend = StoreBackend::Central;
        config.surrealdb_address = Some("mem://".to_string());
        Arc::new(config)
    }

    #[tokio::test]
    async fn central_backend_requires_address() {
        let mut config = AppConfig::default();
        config.store_backend = StoreBackend::Central;
        let stores = TenantStores::new(Arc::new(config));

        let err = stores.for_tenant("acme").await.expect_err("must fail");
        assert!(err.to_string().contains("surrealdb_address"));
    }

    #[tokio::test]
    async fn handles_are_cached_per_tenant() {
        let stores = TenantStores::new(central_memory_config());

        let first = stores.for_tenant("acme").await.expect("open");
        let second = stores.for_tenant("acme").await.expect("reopen");
        assert!(Arc::ptr_eq(&first, &second), "same cached handle");

        let other = stores.for_tenant("globex").await.expect("other tenant");
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn tenant_databases_are_disjoint() {
        let stores = TenantStores::new(central_memory_config());

        let acme = stores.for_tenant("acme").await.expect("acme");
        let globex = stores.for_tenant("globex").await.expect("globex");

        IntegratedObject::new(
            "acme".to_string(),
            "freshdesk".to_string(),
            ObjectType::Ticket,
            "1".to_string(),
            json!({}),
            "acme ticket".to_string(),
            ObjectMetadata::default(),
        )
        .upsert(&acme)
        .await
        .expect("acme upsert");

        let rows = IntegratedObject::get_by_type(&globex, "globex", "freshdesk", ObjectType::Ticket)
            .await
            .expect("globex query");
        assert!(rows.is_empty(), "globex must not see acme rows");
    }
}
