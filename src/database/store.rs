use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::database::models::{
    ActionCount, AuditEntry, LogQuery, NewAuditEntry, NewImage, NewPermission, NewRole, NewSpec,
    NewUser, Permission, Product, ProductFields, ProductImage, ProductQuery, ProductSpec, Role, User,
    UserListing,
};
use crate::types::PageRequest;

/// Errors from a [`Store`] or [`StoreTx`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate value: {0}")]
    Duplicate(String),

    #[error("Missing reference: {0}")]
    MissingReference(String),

    #[error("In use: {0}")]
    InUse(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Child collections owned by a parent row and replaced as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// role -> permission grants
    RolePermissions,
    ProductImages,
    ProductSpecs,
}

impl ChildKind {
    /// Name of the owning row, as used in error messages
    pub fn parent(self) -> &'static str {
        match self {
            ChildKind::RolePermissions => "role",
            ChildKind::ProductImages | ChildKind::ProductSpecs => "product",
        }
    }
}

/// Query/command interface over the relational store.
///
/// Implementations share one handle across every request worker; isolation
/// between concurrent writers is the store's job, not the caller's.
#[async_trait]
pub trait Store: Send + Sync {
    // Principals
    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self, page: PageRequest) -> Result<(Vec<UserListing>, i64), StoreError>;
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn update_user(&self, user: &User) -> Result<User, StoreError>;
    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;
    async fn count_users_with_role(&self, role_id: i64) -> Result<i64, StoreError>;

    // Roles
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
    async fn find_role(&self, id: i64) -> Result<Option<Role>, StoreError>;
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;
    /// Create the role with a fixed identifier unless it already exists
    async fn ensure_role(&self, id: i64, role: NewRole) -> Result<Role, StoreError>;
    async fn update_role(&self, role: &Role) -> Result<Role, StoreError>;
    async fn delete_role(&self, id: i64) -> Result<bool, StoreError>;
    /// Permissions granted to a role, ordered by code
    async fn role_permissions(&self, role_id: i64) -> Result<Vec<Permission>, StoreError>;
    /// Codes granted to a role, in one read
    async fn role_permission_codes(&self, role_id: i64) -> Result<Vec<String>, StoreError>;

    // Permissions
    /// All permissions, ordered by code
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;
    async fn find_permission(&self, id: i64) -> Result<Option<Permission>, StoreError>;
    async fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError>;
    async fn create_permission(&self, permission: NewPermission) -> Result<Permission, StoreError>;
    async fn update_permission(&self, permission: &Permission) -> Result<Permission, StoreError>;
    async fn delete_permission(&self, id: i64) -> Result<bool, StoreError>;
    async fn count_grants_for_permission(&self, permission_id: i64) -> Result<i64, StoreError>;

    // Products
    /// Newest first, children loaded
    async fn list_products(
        &self,
        query: &ProductQuery,
        page: PageRequest,
    ) -> Result<(Vec<Product>, i64), StoreError>;
    async fn find_product(&self, id: i64) -> Result<Option<Product>, StoreError>;
    async fn set_product_status(
        &self,
        id: i64,
        status: i32,
        updated_by: Option<i64>,
    ) -> Result<Option<Product>, StoreError>;

    // Audit
    async fn insert_log(&self, entry: NewAuditEntry) -> Result<(), StoreError>;
    /// Newest first
    async fn list_logs(
        &self,
        query: &LogQuery,
        page: PageRequest,
    ) -> Result<(Vec<AuditEntry>, i64), StoreError>;
    async fn log_actions(&self) -> Result<Vec<String>, StoreError>;
    async fn count_logs_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;
    async fn log_action_counts(&self) -> Result<Vec<ActionCount>, StoreError>;

    /// Open a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Round trip to the backing store
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Commands that must run inside one transaction boundary
#[async_trait]
pub trait StoreTx: Send {
    async fn create_role(&mut self, role: NewRole) -> Result<Role, StoreError>;
    async fn create_product(
        &mut self,
        fields: &ProductFields,
        created_by: Option<i64>,
    ) -> Result<Product, StoreError>;
    async fn update_product(
        &mut self,
        id: i64,
        fields: &ProductFields,
        updated_by: Option<i64>,
    ) -> Result<Product, StoreError>;
    async fn delete_product(&mut self, id: i64) -> Result<bool, StoreError>;

    /// Lock the parent of `kind` until the transaction ends, so replacements
    /// of one parent's children run one after another. Fails with
    /// `MissingReference` when the parent does not exist.
    async fn lock_parent(&mut self, kind: ChildKind, parent_id: i64) -> Result<(), StoreError>;

    /// Delete every child of `kind` scoped to `parent_id`
    async fn clear_children(&mut self, kind: ChildKind, parent_id: i64) -> Result<u64, StoreError>;
    async fn insert_grant(&mut self, role_id: i64, permission_id: i64) -> Result<(), StoreError>;
    async fn insert_image(&mut self, product_id: i64, image: &NewImage) -> Result<ProductImage, StoreError>;
    async fn insert_spec(&mut self, product_id: i64, spec: &NewSpec) -> Result<ProductSpec, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
