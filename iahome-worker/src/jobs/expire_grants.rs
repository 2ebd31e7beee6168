/// Switches off grants past their expiry date
///
/// Access checks already treat an expired grant as unusable; this job makes
/// `is_active` agree so listings and admin views stay truthful.

use super::{JobResult, MaintenanceJob};
use async_trait::async_trait;
use iahome_shared::models::user_application::UserApplication;
use sqlx::PgPool;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExpireGrantsJob;

#[async_trait]
impl MaintenanceJob for ExpireGrantsJob {
    fn name(&self) -> &str {
        "expire-grants"
    }

    async fn run(&self, db: &PgPool) -> JobResult<u64> {
        Ok(UserApplication::deactivate_expired(db).await?)
    }
}
