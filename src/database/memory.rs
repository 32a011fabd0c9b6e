use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database::models::{
    ActionCount, AuditEntry, LogQuery, NewAuditEntry, NewImage, NewPermission, NewRole, NewSpec,
    NewUser, Permission, Product, ProductFields, ProductImage, ProductQuery, ProductSpec, Role, User,
    UserListing,
};
use crate::database::store::{ChildKind, Store, StoreError, StoreTx};
use crate::types::PageRequest;

/// In-process store with the same constraints as the Postgres schema:
/// unique columns, referential checks and serialized transactions.
///
/// A transaction holds the table lock for its whole lifetime and works on a
/// staged copy; commit swaps the copy in, drop discards it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Clone, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    grants: BTreeSet<(i64, i64)>,
    products: BTreeMap<i64, Product>,
    images: BTreeMap<i64, ProductImage>,
    specs: BTreeMap<i64, ProductSpec>,
    logs: Vec<AuditEntry>,
    sequences: HashMap<&'static str, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let current = self.sequences.entry(table).or_insert(0);
        *current += 1;
        *current
    }

    fn bump_sequence(&mut self, table: &'static str, at_least: i64) {
        let current = self.sequences.entry(table).or_insert(0);
        *current = (*current).max(at_least);
    }

    fn assemble_product(&self, product: &Product) -> Product {
        let mut product = product.clone();
        product.images = self
            .images
            .values()
            .filter(|i| i.product_id == product.id)
            .cloned()
            .collect();
        product.images.sort_by_key(|i| (i.sort, i.id));
        product.specs = self
            .specs
            .values()
            .filter(|s| s.product_id == product.id)
            .cloned()
            .collect();
        product.specs.sort_by_key(|s| (s.sort, s.id));
        product
    }

    fn role_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.roles.values().any(|r| r.name == name && Some(r.id) != except)
    }

    fn permission_taken(&self, name: &str, code: &str, except: Option<i64>) -> Option<&'static str> {
        for p in self.permissions.values().filter(|p| Some(p.id) != except) {
            if p.code == code {
                return Some("permission code");
            }
            if p.name == name {
                return Some("permission name");
            }
        }
        None
    }

    fn create_role(&mut self, id: i64, role: NewRole) -> Result<Role, StoreError> {
        if self.role_name_taken(&role.name, None) {
            return Err(StoreError::Duplicate(format!("role name '{}'", role.name)));
        }
        let now = Utc::now();
        let role = Role {
            id,
            name: role.name,
            description: role.description,
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(id, role.clone());
        Ok(role)
    }

    fn write_product(
        &mut self,
        id: i64,
        fields: &ProductFields,
        created_by: Option<i64>,
        updated_by: Option<i64>,
    ) -> Product {
        let now = Utc::now();
        let (created_at, created_by) = match self.products.get(&id) {
            Some(existing) => (existing.created_at, existing.created_by),
            None => (now, created_by),
        };
        let product = Product {
            id,
            title: fields.title.clone(),
            description: fields.description.clone(),
            status: fields.status,
            created_by,
            updated_by,
            created_at,
            updated_at: now,
            images: Vec::new(),
            specs: Vec::new(),
        };
        self.products.insert(id, product.clone());
        product
    }
}

fn page_of<T: Clone>(rows: &[T], page: PageRequest) -> Vec<T> {
    rows.iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn log_matches(entry: &AuditEntry, query: &LogQuery) -> bool {
    if let Some(username) = &query.username {
        if !contains_ignore_case(&entry.username, username) {
            return false;
        }
    }
    if let Some(action) = &query.action {
        if &entry.action != action {
            return false;
        }
    }
    if let Some(start) = query.start_time {
        if entry.created_at < start {
            return false;
        }
    }
    if let Some(end) = query.end_time {
        if entry.created_at > end {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self, page: PageRequest) -> Result<(Vec<UserListing>, i64), StoreError> {
        let tables = self.tables.lock().await;
        let rows: Vec<UserListing> = tables
            .users
            .values()
            .map(|u| UserListing {
                id: u.id,
                username: u.username.clone(),
                role_id: u.role_id,
                role_name: tables
                    .roles
                    .get(&u.role_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
                active: u.active,
                created_at: u.created_at,
            })
            .collect();
        Ok((page_of(&rows, page), rows.len() as i64))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate(format!("username '{}'", user.username)));
        }
        if !tables.roles.contains_key(&user.role_id) {
            return Err(StoreError::MissingReference(format!("role {}", user.role_id)));
        }
        let id = tables.next_id("users");
        let now = Utc::now();
        let user = User {
            id,
            username: user.username,
            password_hash: user.password_hash,
            role_id: user.role_id,
            active: user.active,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.roles.contains_key(&user.role_id) {
            return Err(StoreError::MissingReference(format!("role {}", user.role_id)));
        }
        let existing = tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;
        existing.password_hash = user.password_hash.clone();
        existing.role_id = user.role_id;
        existing.active = user.active;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.users.remove(&id).is_some())
    }

    async fn count_users_with_role(&self, role_id: i64) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().filter(|u| u.role_id == role_id).count() as i64)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(self.tables.lock().await.roles.values().cloned().collect())
    }

    async fn find_role(&self, id: i64) -> Result<Option<Role>, StoreError> {
        Ok(self.tables.lock().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.roles.values().find(|r| r.name == name).cloned())
    }

    async fn ensure_role(&self, id: i64, role: NewRole) -> Result<Role, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.roles.get(&id) {
            return Ok(existing.clone());
        }
        let role = tables.create_role(id, role)?;
        tables.bump_sequence("roles", id);
        Ok(role)
    }

    async fn update_role(&self, role: &Role) -> Result<Role, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.role_name_taken(&role.name, Some(role.id)) {
            return Err(StoreError::Duplicate(format!("role name '{}'", role.name)));
        }
        let existing = tables
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role.id)))?;
        existing.name = role.name.clone();
        existing.description = role.description.clone();
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_role(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.role_id == id) {
            return Err(StoreError::InUse(format!("role {} is assigned to users", id)));
        }
        let removed = tables.roles.remove(&id).is_some();
        tables.grants.retain(|(role_id, _)| *role_id != id);
        Ok(removed)
    }

    async fn role_permissions(&self, role_id: i64) -> Result<Vec<Permission>, StoreError> {
        let tables = self.tables.lock().await;
        let mut permissions: Vec<Permission> = tables
            .grants
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| tables.permissions.get(p).cloned())
            .collect();
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    async fn role_permission_codes(&self, role_id: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .role_permissions(role_id)
            .await?
            .into_iter()
            .map(|p| p.code)
            .collect())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let tables = self.tables.lock().await;
        let mut permissions: Vec<Permission> = tables.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    async fn find_permission(&self, id: i64) -> Result<Option<Permission>, StoreError> {
        Ok(self.tables.lock().await.permissions.get(&id).cloned())
    }

    async fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.permissions.values().find(|p| p.code == code).cloned())
    }

    async fn create_permission(&self, permission: NewPermission) -> Result<Permission, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(column) = tables.permission_taken(&permission.name, &permission.code, None) {
            return Err(StoreError::Duplicate(column.to_string()));
        }
        let id = tables.next_id("permissions");
        let now = Utc::now();
        let permission = Permission {
            id,
            name: permission.name,
            description: permission.description,
            code: permission.code,
            created_at: now,
            updated_at: now,
        };
        tables.permissions.insert(id, permission.clone());
        Ok(permission)
    }

    async fn update_permission(&self, permission: &Permission) -> Result<Permission, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(column) = tables.permission_taken(&permission.name, &permission.code, Some(permission.id)) {
            return Err(StoreError::Duplicate(column.to_string()));
        }
        let existing = tables
            .permissions
            .get_mut(&permission.id)
            .ok_or_else(|| StoreError::NotFound(format!("permission {}", permission.id)))?;
        existing.name = permission.name.clone();
        existing.description = permission.description.clone();
        existing.code = permission.code.clone();
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_permission(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.grants.iter().any(|(_, p)| *p == id) {
            return Err(StoreError::InUse(format!("permission {} is granted to roles", id)));
        }
        Ok(tables.permissions.remove(&id).is_some())
    }

    async fn count_grants_for_permission(&self, permission_id: i64) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.grants.iter().filter(|(_, p)| *p == permission_id).count() as i64)
    }

    async fn list_products(
        &self,
        query: &ProductQuery,
        page: PageRequest,
    ) -> Result<(Vec<Product>, i64), StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<&Product> = tables
            .products
            .values()
            .filter(|p| query.title.as_deref().map_or(true, |t| contains_ignore_case(&p.title, t)))
            .filter(|p| query.status.map_or(true, |s| p.status == s))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = rows.len() as i64;
        let products = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|p| tables.assemble_product(p))
            .collect();
        Ok((products, total))
    }

    async fn find_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.products.get(&id).map(|p| tables.assemble_product(p)))
    }

    async fn set_product_status(
        &self,
        id: i64,
        status: i32,
        updated_by: Option<i64>,
    ) -> Result<Option<Product>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(product) = tables.products.get_mut(&id) else {
            return Ok(None);
        };
        product.status = status;
        product.updated_by = updated_by;
        product.updated_at = Utc::now();
        let product = product.clone();
        Ok(Some(tables.assemble_product(&product)))
    }

    async fn insert_log(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id("audit_logs");
        tables.logs.push(AuditEntry {
            id,
            username: entry.username,
            action: entry.action,
            resource: entry.resource,
            ip: entry.ip,
            user_agent: entry.user_agent,
            status: entry.status,
            request_body: entry.request_body,
            response: entry.response,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_logs(
        &self,
        query: &LogQuery,
        page: PageRequest,
    ) -> Result<(Vec<AuditEntry>, i64), StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<AuditEntry> = tables
            .logs
            .iter()
            .filter(|e| log_matches(e, query))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok((page_of(&rows, page), rows.len() as i64))
    }

    async fn log_actions(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().await;
        let actions: BTreeSet<String> = tables.logs.iter().map(|e| e.action.clone()).collect();
        Ok(actions.into_iter().collect())
    }

    async fn count_logs_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.logs.iter().filter(|e| e.created_at >= since).count() as i64)
    }

    async fn log_action_counts(&self) -> Result<Vec<ActionCount>, StoreError> {
        let tables = self.tables.lock().await;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for entry in &tables.logs {
            *counts.entry(entry.action.clone()).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(action, count)| ActionCount { action, count })
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn create_role(&mut self, role: NewRole) -> Result<Role, StoreError> {
        let id = self.staged.next_id("roles");
        self.staged.create_role(id, role)
    }

    async fn create_product(
        &mut self,
        fields: &ProductFields,
        created_by: Option<i64>,
    ) -> Result<Product, StoreError> {
        let id = self.staged.next_id("products");
        Ok(self.staged.write_product(id, fields, created_by, created_by))
    }

    async fn update_product(
        &mut self,
        id: i64,
        fields: &ProductFields,
        updated_by: Option<i64>,
    ) -> Result<Product, StoreError> {
        if !self.staged.products.contains_key(&id) {
            return Err(StoreError::NotFound(format!("product {}", id)));
        }
        Ok(self.staged.write_product(id, fields, None, updated_by))
    }

    async fn delete_product(&mut self, id: i64) -> Result<bool, StoreError> {
        let removed = self.staged.products.remove(&id).is_some();
        self.staged.images.retain(|_, i| i.product_id != id);
        self.staged.specs.retain(|_, s| s.product_id != id);
        Ok(removed)
    }

    async fn lock_parent(&mut self, kind: ChildKind, parent_id: i64) -> Result<(), StoreError> {
        // The table guard is already held for the whole transaction
        let exists = match kind {
            ChildKind::RolePermissions => self.staged.roles.contains_key(&parent_id),
            ChildKind::ProductImages | ChildKind::ProductSpecs => {
                self.staged.products.contains_key(&parent_id)
            }
        };
        if !exists {
            return Err(StoreError::MissingReference(format!("{} {}", kind.parent(), parent_id)));
        }
        Ok(())
    }

    async fn clear_children(&mut self, kind: ChildKind, parent_id: i64) -> Result<u64, StoreError> {
        let before;
        let after;
        match kind {
            ChildKind::RolePermissions => {
                before = self.staged.grants.len();
                self.staged.grants.retain(|(role_id, _)| *role_id != parent_id);
                after = self.staged.grants.len();
            }
            ChildKind::ProductImages => {
                before = self.staged.images.len();
                self.staged.images.retain(|_, i| i.product_id != parent_id);
                after = self.staged.images.len();
            }
            ChildKind::ProductSpecs => {
                before = self.staged.specs.len();
                self.staged.specs.retain(|_, s| s.product_id != parent_id);
                after = self.staged.specs.len();
            }
        }
        Ok((before - after) as u64)
    }

    async fn insert_grant(&mut self, role_id: i64, permission_id: i64) -> Result<(), StoreError> {
        if !self.staged.roles.contains_key(&role_id) {
            return Err(StoreError::MissingReference(format!("role {}", role_id)));
        }
        if !self.staged.permissions.contains_key(&permission_id) {
            return Err(StoreError::MissingReference(format!("permission {}", permission_id)));
        }
        if !self.staged.grants.insert((role_id, permission_id)) {
            return Err(StoreError::Duplicate(format!(
                "grant of permission {} to role {}",
                permission_id, role_id
            )));
        }
        Ok(())
    }

    async fn insert_image(&mut self, product_id: i64, image: &NewImage) -> Result<ProductImage, StoreError> {
        if !self.staged.products.contains_key(&product_id) {
            return Err(StoreError::MissingReference(format!("product {}", product_id)));
        }
        let id = self.staged.next_id("product_images");
        let row = ProductImage {
            id,
            product_id,
            url: image.url.clone(),
            sort: image.sort,
        };
        self.staged.images.insert(id, row.clone());
        Ok(row)
    }

    async fn insert_spec(&mut self, product_id: i64, spec: &NewSpec) -> Result<ProductSpec, StoreError> {
        if !self.staged.products.contains_key(&product_id) {
            return Err(StoreError::MissingReference(format!("product {}", product_id)));
        }
        let id = self.staged.next_id("product_specs");
        let row = ProductSpec {
            id,
            product_id,
            name: spec.name.clone(),
            value: spec.value.clone(),
            sort: spec.sort,
        };
        self.staged.specs.insert(id, row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
