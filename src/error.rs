use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the user managers.
///
/// Validation problems are not errors; they come back as
/// [`ValidationErrors`](crate::user::ValidationErrors) data so callers can
/// show them to end users.
#[derive(Debug, Error)]
pub enum Error {
    /// Raised by `load_user_by_username` and `refresh_user` when the account
    /// does not exist. Plain criteria lookups return `Ok(None)` instead.
    #[error("{0}")]
    NotFound(String),

    /// A fetched row is missing a column this crate expects. Fail fast
    /// rather than hydrate a half-populated user.
    #[error("database schema appears out of date: missing column \"{0}\"")]
    SchemaOutOfDate(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// Anything the underlying connection raises. No retry policy; the
    /// caller sees the failure immediately.
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
