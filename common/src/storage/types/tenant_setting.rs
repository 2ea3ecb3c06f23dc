use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    stored_object,
    utils::crypto::SettingCipher,
};

use super::system_setting::SystemSetting;

stored_object!(TenantSetting, "tenant_setting", {
    tenant_id: String,
    key: String,
    value: String,
    #[serde(default)]
    is_encrypted: bool
});

impl TenantSetting {
    fn record_id(tenant_id: &str, key: &str) -> String {
        let composite = format!("{tenant_id}:{key}");
        Uuid::from_bytes(md5::compute(composite.as_bytes()).0).to_string()
    }

    /// Writes a setting, encrypting the value at rest when asked.
    pub async fn set(
        db: &SurrealDbClient,
        tenant_id: &str,
        key: &str,
        value: &str,
        encrypt: bool,
    ) -> Result<(), AppError> {
        let stored_value = if encrypt {
            let cipher = SystemSetting::encryption_cipher(db).await?;
            cipher.encrypt(value)?
        } else {
            value.to_string()
        };

        let now = Utc::now();
        let setting = Self {
            id: Self::record_id(tenant_id, key),
            created_at: now,
            updated_at: now,
            tenant_id: tenant_id.to_string(),
            key: key.to_string(),
            value: stored_value,
            is_encrypted: encrypt,
        };
        db.upsert_item(setting).await?;
        Ok(())
    }

    /// Reads a setting, transparently decrypting when stored encrypted.
    pub async fn get(
        db: &SurrealDbClient,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<String>, AppError> {
        let found: Option<Self> = db.get_item(&Self::record_id(tenant_id, key)).await?;
        let Some(setting) = found else {
            return Ok(None);
        };

        if setting.is_encrypted {
            let cipher = SystemSetting::encryption_cipher(db).await?;
            return cipher.decrypt(&setting.value).map(Some);
        }
        Ok(Some(setting.value))
    }

    pub async fn get_all(
        db: &SurrealDbClient,
        tenant_id: &str,
    ) -> Result<Vec<(String, String)>, AppError> {
        let rows: Vec<Self> = db
            .query("SELECT * FROM tenant_setting WHERE tenant_id = $tenant_id ORDER BY key ASC")
            .bind(("tenant_id", tenant_id.to_string()))
            .await?
            .take(0)?;

        let mut cipher: Option<SettingCipher> = None;
        let mut settings = Vec::with_capacity(rows.len());
        for row in rows {
            let value = if row.is_encrypted {
                if cipher.is_none() {
                    cipher = Some(SystemSetting::encryption_cipher(db).await?);
                }
                match cipher.as_ref() {
                    Some(c) => c.decrypt(&row.value)?,
                    None => row.value,
                }
            } else {
                row.value
            };
            settings.push((row.key, value));
        }
        Ok(settings)
    }

    pub async fn delete(
        db: &SurrealDbClient,
        tenant_id: &str,
        key: &str,
    ) -> Result<bool, AppError> {
        let deleted: Option<Self> = db.delete_item(&Self::record_id(tenant_id, key)).await?;
        Ok(deleted.is_some())
    }
}
