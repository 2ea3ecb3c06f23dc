use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ProgressLog, "progress_log", {
    job_id: String,
    tenant_id: String,
    step: u32,
    total_steps: u32,
    message: String,
    percentage: f32
});

impl ProgressLog {
    fn record_id(job_id: &str, tenant_id: &str, step: u32) -> String {
        let key = format!("{job_id}:{tenant_id}:{step}");
        Uuid::from_bytes(md5::compute(key.as_bytes()).0).to_string()
    }

    /// Appends (or overwrites) one step of a job's progress time series.
    /// Percentage is clamped into `[0, 100]`.
    pub async fn log(
        db: &SurrealDbClient,
        job_id: &str,
        tenant_id: &str,
        step: u32,
        total_steps: u32,
        message: &str,
        percentage: f32,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let entry = Self {
            id: Self::record_id(job_id, tenant_id, step),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_string(),
            tenant_id: tenant_id.to_string(),
            step,
            total_steps,
            message: message.to_string(),
            percentage: percentage.clamp(0.0, 100.0),
        };
        db.upsert_item(entry).await?;
        Ok(())
    }

    pub async fn list(db: &SurrealDbClient, job_id: &str) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .query("SELECT * FROM progress_log WHERE job_id = $job_id ORDER BY step ASC")
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows)
    }

    pub async fn latest(db: &SurrealDbClient, job_id: &str) -> Result<Option<Self>, AppError> {
        let rows: Vec<Self> = db
            .query("SELECT * FROM progress_log WHERE job_id = $job_id ORDER BY step DESC LIMIT 1")
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows.into_iter().next())
    }
}
