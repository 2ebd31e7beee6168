/// Clears password-reset tokens whose expiry has passed

use super::{JobResult, MaintenanceJob};
use async_trait::async_trait;
use iahome_shared::models::profile::Profile;
use sqlx::PgPool;

#[derive(Debug, Default, Clone, Copy)]
pub struct PurgeResetTokensJob;

#[async_trait]
impl MaintenanceJob for PurgeResetTokensJob {
    fn name(&self) -> &str {
        "purge-reset-tokens"
    }

    async fn run(&self, db: &PgPool) -> JobResult<u64> {
        Ok(Profile::purge_expired_reset_tokens(db).await?)
    }
}
