pub mod associations;
pub mod bootstrap;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use associations::{AssociationReplacer, Children};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{ChildKind, Store, StoreError, StoreTx};
