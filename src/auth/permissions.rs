//! Role-based permission evaluation.
//!
//! A principal's effective permissions are the codes granted to its single
//! role, re-read on every call. The super-administrator role is classified
//! up front and short-circuits to "everything" without touching grant rows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::database::models::{Permission, User};
use crate::database::{Store, StoreError};
use crate::error::ApiError;

/// Role identifier reserved for the super administrator
pub const SUPER_ADMIN_ROLE_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClass {
    SuperAdministrator,
    Standard,
}

impl RoleClass {
    pub fn of(role_id: i64) -> Self {
        if role_id == SUPER_ADMIN_ROLE_ID {
            RoleClass::SuperAdministrator
        } else {
            RoleClass::Standard
        }
    }
}

pub fn is_super_admin(role_id: i64) -> bool {
    RoleClass::of(role_id) == RoleClass::SuperAdministrator
}

/// Effective permissions of one principal at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSet {
    /// Every code, present or future
    All,
    Granted(BTreeSet<String>),
}

impl PermissionSet {
    pub fn allows(&self, code: &str) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Granted(codes) => codes.contains(code),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("User '{0}' no longer exists")]
    PrincipalNotFound(String),

    #[error("User '{0}' is disabled")]
    AccountDisabled(String),

    #[error("User '{username}' lacks permission '{code}'")]
    Forbidden { username: String, code: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::PrincipalNotFound(_) => ApiError::unauthenticated("User does not exist"),
            AuthzError::AccountDisabled(_) => ApiError::account_disabled("User account is disabled"),
            AuthzError::Forbidden { code, .. } => {
                ApiError::forbidden(format!("Missing required permission '{}'", code))
            }
            AuthzError::Store(e) => e.into(),
        }
    }
}

/// Answers "may this principal do that" against current store state.
/// Holds no cache; every call reads through to the store.
#[derive(Clone)]
pub struct PermissionEvaluator {
    store: Arc<dyn Store>,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn permissions_of(&self, user: &User) -> Result<PermissionSet, StoreError> {
        if is_super_admin(user.role_id) {
            return Ok(PermissionSet::All);
        }
        let codes = self.store.role_permission_codes(user.role_id).await?;
        Ok(PermissionSet::Granted(codes.into_iter().collect()))
    }

    /// Codes actually granted to the principal's role, sorted. Used for
    /// display; authorization goes through [`PermissionEvaluator::permissions_of`].
    pub async fn granted_codes(&self, user: &User) -> Result<Vec<String>, StoreError> {
        let mut codes = self.store.role_permission_codes(user.role_id).await?;
        codes.sort();
        Ok(codes)
    }

    /// Resolve `username` and check it may exercise `code`.
    ///
    /// Order matters: existence, then account state, then super-admin, then
    /// grant membership.
    pub async fn authorize(&self, username: &str, code: &str) -> Result<User, AuthzError> {
        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AuthzError::PrincipalNotFound(username.to_string()))?;

        if !user.active {
            return Err(AuthzError::AccountDisabled(user.username));
        }

        if !self.permissions_of(&user).await?.allows(code) {
            return Err(AuthzError::Forbidden {
                username: user.username,
                code: code.to_string(),
            });
        }

        Ok(user)
    }
}

/// A permission code is `module:action` with exactly one separator and
/// neither side empty.
pub fn validate_code(code: &str) -> Result<(), ApiError> {
    match code.split_once(':') {
        Some((module, action))
            if !module.trim().is_empty() && !action.trim().is_empty() && !action.contains(':') =>
        {
            Ok(())
        }
        _ => Err(ApiError::policy(format!(
            "Permission code '{}' must have the form module:action",
            code
        ))),
    }
}

/// Everything before the first `:`
pub fn module_of(code: &str) -> &str {
    code.split_once(':').map(|(module, _)| module).unwrap_or(code)
}

/// Group permissions by module, modules in name order
pub fn group_by_module(permissions: Vec<Permission>) -> BTreeMap<String, Vec<Permission>> {
    let mut groups: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
    for permission in permissions {
        groups
            .entry(module_of(&permission.code).to_string())
            .or_default()
            .push(permission);
    }
    groups
}
