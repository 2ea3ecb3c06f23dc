use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    stored_object,
    utils::crypto::SettingCipher,
};

/// Key of the auto-generated master key used for encrypted tenant settings.
pub const ENCRYPTION_KEY_SETTING: &str = "tenant_setting_encryption_key";

stored_object!(SystemSetting, "system_setting", {
    key: String,
    value: String,
    #[serde(default)]
    description: Option<String>
});

impl SystemSetting {
    pub async fn get(db: &SurrealDbClient, key: &str) -> Result<Option<Self>, AppError> {
        let rows: Vec<Self> = db
            .query("SELECT * FROM system_setting WHERE key = $key LIMIT 1")
            .bind(("key", key.to_string()))
            .await?
            .take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn set(
        db: &SurrealDbClient,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let setting = Self {
            id: key.to_string(),
            created_at: now,
            updated_at: now,
            key: key.to_string(),
            value: value.to_string(),
            description: description.map(str::to_string),
        };
        db.upsert_item(setting).await?;
        Ok(())
    }

    /// Loads the settings-encryption cipher, generating and persisting the
    /// master key on first use.
    pub async fn encryption_cipher(db: &SurrealDbClient) -> Result<SettingCipher, AppError> {
        if let Some(existing) = Self::get(db, ENCRYPTION_KEY_SETTING).await? {
            return SettingCipher::from_key_b64(&existing.value);
        }

        let key = SettingCipher::generate_key_b64();
        Self::set(
            db,
            ENCRYPTION_KEY_SETTING,
            &key,
            Some("master key for encrypted tenant settings"),
        )
        .await?;
        SettingCipher::from_key_b64(&key)
    }
}
