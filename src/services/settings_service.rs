//! Site settings: JSON blocks keyed by name, upserted by key.

use crate::{
    models::settings::SiteSetting,
    services::image_repository::{RepositoryError, RepositoryResult},
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use tracing::info;

#[derive(Clone)]
pub struct SettingsService {
    db: SqlitePool,
}

type SettingRow = (String, String, DateTime<Utc>);

impl SettingsService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> RepositoryResult<SiteSetting> {
        let row = sqlx::query_as::<_, SettingRow>(
            "SELECT key, value, updated_at FROM site_settings WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| RepositoryError::SettingNotFound(key.to_string()))?;
        decode(row)
    }

    /// Settings for the given keys; unknown keys are skipped.
    pub async fn get_many(&self, keys: &[String]) -> RepositoryResult<Vec<SiteSetting>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT key, value, updated_at FROM site_settings WHERE key IN (");
        let mut separated = builder.separated(", ");
        for key in keys {
            separated.push_bind(key);
        }
        separated.push_unseparated(") ORDER BY key");
        let rows: Vec<SettingRow> = builder.build_query_as().fetch_all(&self.db).await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn list(&self) -> RepositoryResult<Vec<SiteSetting>> {
        let rows = sqlx::query_as::<_, SettingRow>(
            "SELECT key, value, updated_at FROM site_settings ORDER BY key",
        )
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(decode).collect()
    }

    /// Insert or replace the value stored under `key`.
    pub async fn upsert(&self, key: &str, value: &Value) -> RepositoryResult<SiteSetting> {
        validate_key(key)?;
        let encoded = serde_json::to_string(value)
            .map_err(|err| RepositoryError::Invalid(err.to_string()))?;
        let row = sqlx::query_as::<_, SettingRow>(
            "INSERT INTO site_settings (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at \
             RETURNING key, value, updated_at",
        )
        .bind(key)
        .bind(encoded)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;
        info!(key, "setting saved");
        decode(row)
    }

    pub async fn delete(&self, key: &str) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM site_settings WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::SettingNotFound(key.to_string()));
        }
        info!(key, "setting deleted");
        Ok(())
    }
}

fn decode((key, value, updated_at): SettingRow) -> RepositoryResult<SiteSetting> {
    let value = serde_json::from_str(&value).map_err(|err| {
        RepositoryError::Invalid(format!("setting `{}` holds invalid JSON: {}", key, err))
    })?;
    Ok(SiteSetting {
        key,
        value,
        updated_at,
    })
}

fn validate_key(key: &str) -> RepositoryResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 100
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(RepositoryError::Invalid(format!(
            "Invalid setting key `{}`",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_inserts_then_replaces() {
        let service = SettingsService::new(memory_pool().await);

        let first = service
            .upsert("general", &json!({"site_name": "Studio"}))
            .await
            .unwrap();
        let second = service
            .upsert("general", &json!({"site_name": "Studio North"}))
            .await
            .unwrap();

        assert_eq!(second.value["site_name"], "Studio North");
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(service.list().await.unwrap().len(), 1);
        assert_eq!(service.get("general").await.unwrap(), second);
    }

    #[tokio::test]
    async fn get_many_skips_unknown_keys() {
        let service = SettingsService::new(memory_pool().await);
        service.upsert("social_links", &json!([])).await.unwrap();
        service.upsert("about", &json!({"bio": "hi"})).await.unwrap();

        let keys = vec!["social_links".to_string(), "missing".into(), "about".into()];
        let found = service.get_many(&keys).await.unwrap();
        let names: Vec<&str> = found.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(names, vec!["about", "social_links"]);
        assert!(service.get_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_missing_keys() {
        let service = SettingsService::new(memory_pool().await);
        service.upsert("contact", &json!({"email": "a@b.c"})).await.unwrap();

        service.delete("contact").await.unwrap();
        assert!(matches!(
            service.get("contact").await,
            Err(RepositoryError::SettingNotFound(_))
        ));
        assert!(matches!(
            service.delete("contact").await,
            Err(RepositoryError::SettingNotFound(_))
        ));
        assert!(matches!(
            service.upsert("Bad Key", &json!(1)).await,
            Err(RepositoryError::Invalid(_))
        ));
    }
}
