/// Database models for IAHome
///
/// # Models
///
/// - `profile`: Platform accounts
/// - `module`: Catalog of proxied AI tools
/// - `user_application`: Access grants with quota and expiry
/// - `qr_code`: Short-code redirects with scan counters
///
/// # Example
///
/// ```no_run
/// use iahome_shared::db::pool::{create_pool, DatabaseConfig};
/// use iahome_shared::models::module::Module;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_env()?).await?;
///
/// for module in Module::list_active(&pool, Some("audio")).await? {
///     println!("{} ({})", module.title, module.slug);
/// }
/// # Ok(())
/// # }
/// ```

pub mod module;
pub mod profile;
pub mod qr_code;
pub mod user_application;
