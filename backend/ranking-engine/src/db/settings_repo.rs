/// Tenant settings reads
///
/// The ranking engine only ever reads one settings blob per (tenant,
/// domain); interpretation and fallback live in `config::ConfigResolver`.
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{RankingDomain, SettingsStore};
use crate::error::Result;

pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn ranking_overrides(
        &self,
        tenant_id: Uuid,
        domain: RankingDomain,
    ) -> Result<Option<serde_json::Value>> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT value
            FROM tenant_settings
            WHERE tenant_id = $1 AND key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(domain.settings_key())
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }
}
