//! SaaS-side persistence tables. Not on the ingestion critical path; the
//! store only has to be able to persist and list them.

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Agent, "agent", {
    tenant_id: String,
    email: String,
    name: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    active: bool
});

impl Agent {
    pub fn new(tenant_id: String, email: String, name: String, role: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            email,
            name,
            role,
            active: true,
        }
    }

    pub async fn list_for_tenant(
        db: &SurrealDbClient,
        tenant_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .query("SELECT * FROM agent WHERE tenant_id = $tenant_id ORDER BY email ASC")
            .bind(("tenant_id", tenant_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows)
    }
}

pub mod license {
    use super::*;

    stored_object!(License, "license", {
        tenant_id: String,
        plan: String,
        seats: u32,
        #[serde(default)]
        expires_at: Option<String>
    });

    impl License {
        pub async fn current(
            db: &SurrealDbClient,
            tenant_id: &str,
        ) -> Result<Option<Self>, AppError> {
            let rows: Vec<Self> = db
                .query(
                    "SELECT * FROM license WHERE tenant_id = $tenant_id \
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(("tenant_id", tenant_id.to_string()))
                .await?
                .take(0)?;
            Ok(rows.into_iter().next())
        }
    }
}

pub mod subscription {
    use super::*;

    stored_object!(Subscription, "subscription", {
        tenant_id: String,
        plan: String,
        status: String,
        #[serde(default)]
        period_end: Option<String>
    });

    impl Subscription {
        pub async fn current(
            db: &SurrealDbClient,
            tenant_id: &str,
        ) -> Result<Option<Self>, AppError> {
            let rows: Vec<Self> = db
                .query(
                    "SELECT * FROM subscription WHERE tenant_id = $tenant_id \
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(("tenant_id", tenant_id.to_string()))
                .await?
                .take(0)?;
            Ok(rows.into_iter().next())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::license::License;
    use super::*;

    #[tokio::test]
    async fn agents_are_listed_per_tenant() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.store_item(Agent::new(
            "acme".to_string(),
            "a@acme.test".to_string(),
            "Agent A".to_string(),
            Some("admin".to_string()),
        ))
        .await
        .expect("store a");
        db.store_item(Agent::new(
            "globex".to_string(),
            "b@globex.test".to_string(),
            "Agent B".to_string(),
            None,
        ))
        .await
        .expect("store b");

        let acme = Agent::list_for_tenant(&db, "acme").await.expect("list");
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].email, "a@acme.test");
    }

    #[tokio::test]
    async fn latest_license_wins() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut old = License {
            id: "l1".to_string(),
            created_at: Utc::now() - chrono::Duration::days(10),
            updated_at: Utc::now(),
            tenant_id: "acme".to_string(),
            plan: "trial".to_string(),
            seats: 3,
            expires_at: None,
        };
        db.store_item(old.clone()).await.expect("store old");

        old.id = "l2".to_string();
        old.created_at = Utc::now();
        old.plan = "enterprise".to_string();
        db.store_item(old).await.expect("store new");

        let current = License::current(&db, "acme")
            .await
            .expect("current")
            .expect("license");
        assert_eq!(current.plan, "enterprise");
    }
}
