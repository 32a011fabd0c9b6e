use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::models::{
    ActionCount, AuditEntry, LogQuery, NewAuditEntry, NewImage, NewPermission, NewRole, NewSpec,
    NewUser, Permission, Product, ProductFields, ProductImage, ProductQuery, ProductSpec, Role, User,
    UserListing,
};
use crate::database::store::{ChildKind, Store, StoreError, StoreTx};
use crate::types::PageRequest;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Idempotent schema, applied statement by statement at startup
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS roles (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS permissions (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        code TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS role_permissions (
        role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id BIGINT NOT NULL REFERENCES permissions(id),
        PRIMARY KEY (role_id, permission_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role_id BIGINT NOT NULL REFERENCES roles(id),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS products (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status INTEGER NOT NULL DEFAULT 1,
        created_by BIGINT,
        updated_by BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS product_images (
        id BIGSERIAL PRIMARY KEY,
        product_id BIGINT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        sort INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS product_specs (
        id BIGSERIAL PRIMARY KEY,
        product_id BIGINT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        sort INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS audit_logs (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL,
        action TEXT NOT NULL,
        resource TEXT NOT NULL,
        ip TEXT NOT NULL,
        user_agent TEXT NOT NULL,
        status INTEGER NOT NULL,
        request_body TEXT NOT NULL DEFAULT '',
        response TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    "CREATE INDEX IF NOT EXISTS audit_logs_created_at_idx ON audit_logs (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS product_images_product_idx ON product_images (product_id, sort)",
    "CREATE INDEX IF NOT EXISTS product_specs_product_idx ON product_specs (product_id, sort)",
];

const USER_COLUMNS: &str = "id, username, password_hash, role_id, active, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, description, code, created_at, updated_at";
const PRODUCT_COLUMNS: &str =
    "id, title, description, status, created_by, updated_by, created_at, updated_at";
const LOG_COLUMNS: &str =
    "id, username, action, resource, ip, user_agent, status, request_body, response, created_at";

/// Translate constraint violations into store-level errors
fn classify(err: sqlx::Error, what: impl Into<String>) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return StoreError::Duplicate(what.into()),
            Some(FOREIGN_KEY_VIOLATION) => return StoreError::MissingReference(what.into()),
            _ => {}
        }
    }
    StoreError::Sqlx(err)
}

/// Deletes blocked by a foreign key mean the row is still referenced
fn classify_delete(err: sqlx::Error, what: impl Into<String>) -> StoreError {
    match classify(err, what) {
        StoreError::MissingReference(what) => StoreError::InUse(what),
        other => other,
    }
}

/// PostgreSQL-backed [`Store`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or(StoreError::ConfigMissing("DATABASE_URL"))?;

        // Log where we connect without leaking credentials
        let parsed = url::Url::parse(url).map_err(|_| StoreError::InvalidDatabaseUrl)?;
        info!(
            "Connecting to database {}{}",
            parsed.host_str().unwrap_or("localhost"),
            parsed.path()
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes that do not exist yet
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema is up to date");
        Ok(())
    }

    async fn attach_children(&self, products: &mut [Product]) -> Result<(), StoreError> {
        if products.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();

        let images: Vec<ProductImage> = sqlx::query_as(
            "SELECT id, product_id, url, sort FROM product_images
             WHERE product_id = ANY($1) ORDER BY sort, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let specs: Vec<ProductSpec> = sqlx::query_as(
            "SELECT id, product_id, name, value, sort FROM product_specs
             WHERE product_id = ANY($1) ORDER BY sort, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for product in products.iter_mut() {
            product.images = images.iter().filter(|i| i.product_id == product.id).cloned().collect();
            product.specs = specs.iter().filter(|s| s.product_id == product.id).cloned().collect();
        }
        Ok(())
    }
}

fn push_product_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ProductQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(title) = &query.title {
        qb.push(" AND title ILIKE ").push_bind(format!("%{}%", title));
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status);
    }
}

fn push_log_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &LogQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(username) = &query.username {
        qb.push(" AND username ILIKE ").push_bind(format!("%{}%", username));
    }
    if let Some(action) = &query.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(start) = query.start_time {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = query.end_time {
        qb.push(" AND created_at <= ").push_bind(end);
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as(&format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list_users(&self, page: PageRequest) -> Result<(Vec<UserListing>, i64), StoreError> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as(
            "SELECT u.id, u.username, u.role_id, r.name AS role_name, u.active, u.created_at
             FROM users u JOIN roles r ON r.id = u.role_id
             ORDER BY u.id
             LIMIT $1 OFFSET $2",
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as(&format!(
            "INSERT INTO users (username, password_hash, role_id, active)
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .bind(user.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, format!("user '{}'", user.username)))
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        sqlx::query_as(&format!(
            "UPDATE users SET password_hash = $2, role_id = $3, active = $4, updated_at = now()
             WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .bind(user.active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, format!("role {}", user.role_id)))?
        .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_users_with_role(&self, role_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let roles = sqlx::query_as(&format!("SELECT {} FROM roles ORDER BY id", ROLE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn find_role(&self, id: i64) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as(&format!("SELECT {} FROM roles WHERE id = $1", ROLE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as(&format!("SELECT {} FROM roles WHERE name = $1", ROLE_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn ensure_role(&self, id: i64, role: NewRole) -> Result<Role, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO roles (id, name, description) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(&role.name)
        .bind(&role.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify(e, format!("role name '{}'", role.name)))?;

        // Explicit ids do not advance the serial sequence
        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('roles', 'id'), GREATEST((SELECT MAX(id) FROM roles), 1))",
        )
        .execute(&mut *tx)
        .await?;

        let role = sqlx::query_as(&format!("SELECT {} FROM roles WHERE id = $1", ROLE_COLUMNS))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(role)
    }

    async fn update_role(&self, role: &Role) -> Result<Role, StoreError> {
        sqlx::query_as(&format!(
            "UPDATE roles SET name = $2, description = $3, updated_at = now()
             WHERE id = $1 RETURNING {}",
            ROLE_COLUMNS
        ))
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, format!("role name '{}'", role.name)))?
        .ok_or_else(|| StoreError::NotFound(format!("role {}", role.id)))
    }

    async fn delete_role(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_delete(e, format!("role {} is assigned to users", id)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn role_permissions(&self, role_id: i64) -> Result<Vec<Permission>, StoreError> {
        let permissions = sqlx::query_as(
            "SELECT p.id, p.name, p.description, p.code, p.created_at, p.updated_at
             FROM role_permissions rp JOIN permissions p ON p.id = rp.permission_id
             WHERE rp.role_id = $1
             ORDER BY p.code",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    async fn role_permission_codes(&self, role_id: i64) -> Result<Vec<String>, StoreError> {
        let codes: Vec<(String,)> = sqlx::query_as(
            "SELECT p.code FROM role_permissions rp JOIN permissions p ON p.id = rp.permission_id
             WHERE rp.role_id = $1
             ORDER BY p.code",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes.into_iter().map(|(code,)| code).collect())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let permissions = sqlx::query_as(&format!(
            "SELECT {} FROM permissions ORDER BY code ASC",
            PERMISSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    async fn find_permission(&self, id: i64) -> Result<Option<Permission>, StoreError> {
        let permission = sqlx::query_as(&format!(
            "SELECT {} FROM permissions WHERE id = $1",
            PERMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(permission)
    }

    async fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError> {
        let permission = sqlx::query_as(&format!(
            "SELECT {} FROM permissions WHERE code = $1",
            PERMISSION_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(permission)
    }

    async fn create_permission(&self, permission: NewPermission) -> Result<Permission, StoreError> {
        sqlx::query_as(&format!(
            "INSERT INTO permissions (name, description, code) VALUES ($1, $2, $3) RETURNING {}",
            PERMISSION_COLUMNS
        ))
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(&permission.code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, format!("permission '{}'", permission.code)))
    }

    async fn update_permission(&self, permission: &Permission) -> Result<Permission, StoreError> {
        sqlx::query_as(&format!(
            "UPDATE permissions SET name = $2, description = $3, code = $4, updated_at = now()
             WHERE id = $1 RETURNING {}",
            PERMISSION_COLUMNS
        ))
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(&permission.code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, format!("permission '{}'", permission.code)))?
        .ok_or_else(|| StoreError::NotFound(format!("permission {}", permission.id)))
    }

    async fn delete_permission(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_delete(e, format!("permission {} is granted to roles", id)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_grants_for_permission(&self, permission_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM role_permissions WHERE permission_id = $1")
                .bind(permission_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_products(
        &self,
        query: &ProductQuery,
        page: PageRequest,
    ) -> Result<(Vec<Product>, i64), StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM products");
        push_product_filters(&mut count, query);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM products", PRODUCT_COLUMNS));
        push_product_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let mut products: Vec<Product> = select.build_query_as().fetch_all(&self.pool).await?;

        self.attach_children(&mut products).await?;
        Ok((products, total))
    }

    async fn find_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        let product: Option<Product> =
            sqlx::query_as(&format!("SELECT {} FROM products WHERE id = $1", PRODUCT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(product) = product else {
            return Ok(None);
        };
        let mut products = [product];
        self.attach_children(&mut products).await?;
        let [product] = products;
        Ok(Some(product))
    }

    async fn set_product_status(
        &self,
        id: i64,
        status: i32,
        updated_by: Option<i64>,
    ) -> Result<Option<Product>, StoreError> {
        let updated = sqlx::query(
            "UPDATE products SET status = $2, updated_by = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(updated_by)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_product(id).await
    }

    async fn insert_log(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (username, action, resource, ip, user_agent, status, request_body, response)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&entry.username)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(entry.status)
        .bind(&entry.request_body)
        .bind(&entry.response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs(
        &self,
        query: &LogQuery,
        page: PageRequest,
    ) -> Result<(Vec<AuditEntry>, i64), StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_log_filters(&mut count, query);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM audit_logs", LOG_COLUMNS));
        push_log_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let entries = select.build_query_as().fetch_all(&self.pool).await?;

        Ok((entries, total))
    }

    async fn log_actions(&self) -> Result<Vec<String>, StoreError> {
        let actions: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT action FROM audit_logs ORDER BY action")
                .fetch_all(&self.pool)
                .await?;
        Ok(actions.into_iter().map(|(action,)| action).collect())
    }

    async fn count_logs_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs WHERE created_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn log_action_counts(&self) -> Result<Vec<ActionCount>, StoreError> {
        let counts = sqlx::query_as(
            "SELECT action, COUNT(*) AS count FROM audit_logs GROUP BY action ORDER BY action",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    /// Pings the pool to ensure connectivity
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// Open Postgres transaction. sqlx rolls back on drop if not committed.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn create_role(&mut self, role: NewRole) -> Result<Role, StoreError> {
        sqlx::query_as(&format!(
            "INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING {}",
            ROLE_COLUMNS
        ))
        .bind(&role.name)
        .bind(&role.description)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify(e, format!("role name '{}'", role.name)))
    }

    async fn create_product(
        &mut self,
        fields: &ProductFields,
        created_by: Option<i64>,
    ) -> Result<Product, StoreError> {
        let product = sqlx::query_as(&format!(
            "INSERT INTO products (title, description, status, created_by, updated_by)
             VALUES ($1, $2, $3, $4, $4) RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.status)
        .bind(created_by)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(product)
    }

    async fn update_product(
        &mut self,
        id: i64,
        fields: &ProductFields,
        updated_by: Option<i64>,
    ) -> Result<Product, StoreError> {
        sqlx::query_as(&format!(
            "UPDATE products SET title = $2, description = $3, status = $4, updated_by = $5,
             updated_at = now() WHERE id = $1 RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.status)
        .bind(updated_by)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("product {}", id)))
    }

    async fn delete_product(&mut self, id: i64) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM product_images WHERE product_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM product_specs WHERE product_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn lock_parent(&mut self, kind: ChildKind, parent_id: i64) -> Result<(), StoreError> {
        // A DELETE of the children only locks rows that already exist, so a
        // concurrent replacement's inserts would not wait for it
        let statement = match kind {
            ChildKind::RolePermissions => "SELECT id FROM roles WHERE id = $1 FOR UPDATE",
            ChildKind::ProductImages | ChildKind::ProductSpecs => {
                "SELECT id FROM products WHERE id = $1 FOR UPDATE"
            }
        };
        let locked: Option<(i64,)> = sqlx::query_as(statement)
            .bind(parent_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        locked
            .map(|_| ())
            .ok_or_else(|| StoreError::MissingReference(format!("{} {}", kind.parent(), parent_id)))
    }

    async fn clear_children(&mut self, kind: ChildKind, parent_id: i64) -> Result<u64, StoreError> {
        let statement = match kind {
            ChildKind::RolePermissions => "DELETE FROM role_permissions WHERE role_id = $1",
            ChildKind::ProductImages => "DELETE FROM product_images WHERE product_id = $1",
            ChildKind::ProductSpecs => "DELETE FROM product_specs WHERE product_id = $1",
        };
        let result = sqlx::query(statement)
            .bind(parent_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_grant(&mut self, role_id: i64, permission_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
            .bind(role_id)
            .bind(permission_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                classify(e, format!("grant of permission {} to role {}", permission_id, role_id))
            })?;
        Ok(())
    }

    async fn insert_image(&mut self, product_id: i64, image: &NewImage) -> Result<ProductImage, StoreError> {
        sqlx::query_as(
            "INSERT INTO product_images (product_id, url, sort) VALUES ($1, $2, $3)
             RETURNING id, product_id, url, sort",
        )
        .bind(product_id)
        .bind(&image.url)
        .bind(image.sort)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify(e, format!("product {}", product_id)))
    }

    async fn insert_spec(&mut self, product_id: i64, spec: &NewSpec) -> Result<ProductSpec, StoreError> {
        sqlx::query_as(
            "INSERT INTO product_specs (product_id, name, value, sort) VALUES ($1, $2, $3, $4)
             RETURNING id, product_id, name, value, sort",
        )
        .bind(product_id)
        .bind(&spec.name)
        .bind(&spec.value)
        .bind(spec.sort)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify(e, format!("product {}", product_id)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
