use serde_json::json;

use crate::auth::PasswordHasher;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::bootstrap;

use super::open_store;

pub async fn handle(config: AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let hasher = PasswordHasher::new(config.security.bcrypt_cost);
    let report = bootstrap::run(store.as_ref(), &hasher, &config.bootstrap).await?;

    output_success(
        &output_format,
        "Bootstrap complete",
        Some(json!({
            "permissions_created": report.permissions_created,
            "super_admin_grants": report.super_admin_grants,
            "admin_created": report.admin_created,
        })),
    )
}
