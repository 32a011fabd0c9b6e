//! First-run seeding: permission catalog, super-administrator role, default
//! administrator principal. Safe to run on every start.

use tracing::info;

use crate::auth::{CredentialError, PasswordHasher, SUPER_ADMIN_ROLE_ID};
use crate::config::BootstrapConfig;
use crate::database::associations::{AssociationReplacer, Children};
use crate::database::models::{NewPermission, NewRole, NewUser};
use crate::database::store::{Store, StoreError};

/// (name, description, code)
pub const DEFAULT_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("List users", "View the user list", "user:list"),
    ("Create user", "Create new users", "user:create"),
    ("Update user", "Update user details", "user:update"),
    ("Delete user", "Delete users", "user:delete"),
    ("List roles", "View the role list", "role:list"),
    ("Create role", "Create new roles", "role:create"),
    ("Update role", "Update role details", "role:update"),
    ("Delete role", "Delete roles", "role:delete"),
    ("View logs", "View system audit logs", "log:list"),
    ("List products", "View the product list", "product:list"),
    ("Create product", "Create new products", "product:create"),
    ("Update product", "Update product details", "product:update"),
    ("Delete product", "Delete products", "product:delete"),
    ("Product status", "List and delist products", "product:status"),
    ("Create permission", "Create new permissions", "permission:create"),
    ("Update permission", "Update permission details", "permission:update"),
    ("Delete permission", "Delete permissions", "permission:delete"),
];

pub const SUPER_ADMIN_ROLE_NAME: &str = "Super Administrator";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// What a bootstrap run changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub permissions_created: usize,
    pub super_admin_grants: usize,
    pub admin_created: bool,
}

pub async fn run(
    store: &dyn Store,
    hasher: &PasswordHasher,
    config: &BootstrapConfig,
) -> Result<BootstrapReport, BootstrapError> {
    let mut report = BootstrapReport::default();

    for (name, description, code) in DEFAULT_PERMISSIONS {
        if store.find_permission_by_code(code).await?.is_some() {
            continue;
        }
        store
            .create_permission(NewPermission {
                name: name.to_string(),
                description: description.to_string(),
                code: code.to_string(),
            })
            .await?;
        report.permissions_created += 1;
    }

    let role = store
        .ensure_role(
            SUPER_ADMIN_ROLE_ID,
            NewRole {
                name: SUPER_ADMIN_ROLE_NAME.to_string(),
                description: "System super administrator".to_string(),
            },
        )
        .await?;

    // Listing convenience only; role 1 is authorized for everything regardless
    let all: Vec<i64> = store.list_permissions().await?.into_iter().map(|p| p.id).collect();
    report.super_admin_grants =
        AssociationReplacer::replace(store, role.id, &Children::Grants(all)).await?;

    if store.find_user_by_username(&config.admin_username).await?.is_none() {
        let password_hash = hasher.hash(&config.admin_password).await?;
        store
            .create_user(NewUser {
                username: config.admin_username.clone(),
                password_hash,
                role_id: role.id,
                active: true,
            })
            .await?;
        report.admin_created = true;
        info!("Created administrator user '{}'", config.admin_username);
    }

    info!(
        "Bootstrap complete: {} permissions seeded, {} granted to '{}'",
        report.permissions_created, report.super_admin_grants, role.name
    );
    Ok(report)
}
