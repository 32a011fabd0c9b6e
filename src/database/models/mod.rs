pub mod log;
pub mod permission;
pub mod product;
pub mod role;
pub mod user;

pub use log::{ActionCount, AuditEntry, LogQuery, NewAuditEntry};
pub use permission::{NewPermission, Permission};
pub use product::{NewImage, NewSpec, Product, ProductFields, ProductImage, ProductQuery, ProductSpec};
pub use role::{NewRole, Role, RoleWithPermissions};
pub use user::{NewUser, User, UserListing};
