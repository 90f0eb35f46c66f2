//! Storage backends implementing [`UserManager`](crate::UserManager).

pub mod memory;
pub mod sqlite;

pub use memory::MemoryUserManager;
pub use sqlite::SqliteUserManager;
