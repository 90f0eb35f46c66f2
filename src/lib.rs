//! User account lifecycle and credential management.
//!
//! The [`UserManager`] trait is the single point of truth for account
//! creation, lookup, persistence, password handling and validation. Two
//! backends implement it: [`SqliteUserManager`] (raw SQL with an identity
//! map and EAV custom-field storage) and [`MemoryUserManager`] (in-process,
//! mainly for host-application tests).
//!
//! Managers are meant to be constructed per unit of work — one per request
//! or CLI invocation — not shared as process-wide singletons; the identity
//! map in the SQL backend has exactly that lifetime.
//!
//! ```no_run
//! use userstore::{SqliteUserManager, UserCriteria, UserManager};
//!
//! # async fn demo() -> userstore::Result<()> {
//! let manager = SqliteUserManager::open_in_memory().await?;
//! manager.create_schema().await?;
//!
//! let mut user = manager.create("a@example.com", "secret", Some("Alice"), &[])?;
//! let errors = manager.validate(&user).await?;
//! assert!(errors.is_empty());
//! manager.save(&mut user).await?;
//!
//! let found = manager
//!     .find_one_by(&UserCriteria::new().email("a@example.com"))
//!     .await?;
//! assert_eq!(found.map(|u| u.id()), Some(user.id()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod password;
pub mod query;
pub mod session;
pub mod store;
pub mod user;

pub use config::{ManagerOptions, PasswordStrengthValidator, StoreConfig};
pub use error::{Error, Result};
pub use events::{UserEventDispatcher, UserWrite};
pub use manager::UserManager;
pub use password::{Argon2Encoder, PasswordEncoder};
pub use query::{FindOptions, SortDirection, UserCriteria, UserField, Value};
pub use session::Session;
pub use store::{MemoryUserManager, SqliteUserManager};
pub use user::{generate_token, User, ValidationErrors, ROLE_USER};
