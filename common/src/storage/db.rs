use std::ops::Deref;

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;

#[derive(Clone, Debug)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Opens a connection and selects `namespace`/`database`.
    ///
    /// Credentials are only used when given; embedded engines
    /// (`surrealkv://`, `mem://`) are unauthenticated.
    pub async fn new(
        address: &str,
        credentials: Option<(&str, &str)>,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if let Some((username, password)) = credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the tables and indexes of a tenant database. Idempotent.
    pub async fn ensure_tenant_schema(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_object_identity ON integrated_object \
                 FIELDS tenant_id, platform, object_type, original_id UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_object_tenant ON integrated_object FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_object_tenant_platform ON integrated_object FIELDS tenant_id, platform;
                 DEFINE INDEX IF NOT EXISTS idx_object_tenant_type ON integrated_object FIELDS tenant_id, object_type;
                 DEFINE INDEX IF NOT EXISTS idx_object_original ON integrated_object FIELDS original_id;
                 DEFINE INDEX IF NOT EXISTS idx_object_created ON integrated_object FIELDS created_at;",
            )
            .await?;

        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_progress_identity ON progress_log \
                 FIELDS job_id, tenant_id, step UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_progress_job ON progress_log FIELDS job_id;",
            )
            .await?;

        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_setting_identity ON tenant_setting \
                 FIELDS tenant_id, key UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_agent_email ON agent FIELDS email UNIQUE;",
            )
            .await?;

        Ok(())
    }

    /// Stores a new object. Fails when the record id already exists.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let id = item.get_id().to_string();
        self.client.create((T::table_name(), id)).content(item).await
    }

    /// Creates or replaces an object under its record id.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let id = item.get_id().to_string();
        self.client.upsert((T::table_name(), id)).content(item).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
