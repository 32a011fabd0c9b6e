pub mod audit;
pub mod auth;
pub mod authorize;
pub mod response;

pub use audit::{audit_recorder, AuditRecorder};
pub use auth::{authentication_gate, Identity};
pub use authorize::{authorization_gate, CurrentUser, PermissionGuard};
pub use response::{ApiResponse, ApiResult};
