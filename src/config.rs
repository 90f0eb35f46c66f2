use serde::{Deserialize, Serialize};
use time::Duration;

use crate::user::User;

/// Storage-layer indirection points for the SQL-backed manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Table holding one row per account.
    pub users_table: String,
    /// EAV side table holding `(user_id, attribute, value)` rows.
    pub custom_fields_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            users_table: "users".into(),
            custom_fields_table: "user_custom_fields".into(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            users_table: std::env::var("USERSTORE_USERS_TABLE").unwrap_or_else(|_| "users".into()),
            custom_fields_table: std::env::var("USERSTORE_CUSTOM_FIELDS_TABLE")
                .unwrap_or_else(|_| "user_custom_fields".into()),
        }
    }
}

/// Policy test applied by [`validate_password_strength`](crate::UserManager::validate_password_strength).
/// Returns an error message on failure, `None` on success.
pub type PasswordStrengthValidator = Box<dyn Fn(&User, &str) -> Option<String> + Send + Sync>;

/// Backend-independent manager policy.
pub struct ManagerOptions {
    /// When true, `validate` reports a missing username as an error.
    pub username_required: bool,
    /// How long a password-reset token stays valid.
    pub password_reset_token_ttl: Duration,
    password_strength: Option<PasswordStrengthValidator>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            username_required: false,
            // One day, same default as the reset-mail flow this serves.
            password_reset_token_ttl: Duration::seconds(86_400),
            password_strength: None,
        }
    }
}

impl ManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default strength rule (password must be non-empty).
    pub fn set_password_strength_validator(
        &mut self,
        validator: impl Fn(&User, &str) -> Option<String> + Send + Sync + 'static,
    ) {
        self.password_strength = Some(Box::new(validator));
    }

    pub(crate) fn check_password_strength(&self, user: &User, plain: &str) -> Option<String> {
        match &self.password_strength {
            Some(validator) => validator(user, plain),
            None if plain.is_empty() => Some("Password cannot be empty.".to_owned()),
            None => None,
        }
    }
}

impl std::fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("username_required", &self.username_required)
            .field("password_reset_token_ttl", &self.password_reset_token_ttl)
            .field("password_strength", &self.password_strength.is_some())
            .finish()
    }
}
