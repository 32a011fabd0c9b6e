// handlers/mod.rs - HTTP handlers, one module per resource
//
// Everything except auth::login sits behind the authentication gate; each
// route's permission code is attached in app::router.

pub mod auth;
pub mod logs;
pub mod permissions;
pub mod products;
pub mod roles;
pub mod users;
