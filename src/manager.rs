//! The backend-independent user manager contract.
//!
//! Storage backends implement the four required methods; everything else —
//! account creation, password handling, identifier lookup, validation,
//! session handling — is shared behavior provided by the trait.

use async_trait::async_trait;

use crate::config::ManagerOptions;
use crate::error::{Error, Result};
use crate::password::PasswordEncoder;
use crate::query::{FindOptions, UserCriteria};
use crate::session::Session;
use crate::user::{User, ValidationErrors};

#[async_trait]
pub trait UserManager: Send + Sync {
    fn password_encoder(&self) -> &dyn PasswordEncoder;

    fn manager_options(&self) -> &ManagerOptions;

    /// Insert when the user has no id yet, otherwise update the row keyed
    /// by id. Dispatches before/after lifecycle events around the write.
    async fn save(&self, user: &mut User) -> Result<()>;

    /// Remove the user and any custom fields. Dispatches before/after
    /// delete events.
    async fn delete(&self, user: &mut User) -> Result<()>;

    async fn find_by(&self, criteria: &UserCriteria, options: &FindOptions) -> Result<Vec<User>>;

    async fn find_count(&self, criteria: &UserCriteria) -> Result<u64>;

    /// Build a new in-memory user. Never persists; call [`save`](Self::save)
    /// for that. An empty plaintext leaves the password unset, which
    /// `validate` will then flag.
    fn create(
        &self,
        email: &str,
        plain_password: &str,
        name: Option<&str>,
        roles: &[&str],
    ) -> Result<User> {
        let mut user = User::new(email);
        if !plain_password.is_empty() {
            self.set_user_password(&mut user, plain_password)?;
        }
        if let Some(name) = name {
            user.set_name(name);
        }
        if !roles.is_empty() {
            user.set_roles(roles.iter().copied());
        }
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.find_one_by(&UserCriteria::new().id(id)).await
    }

    /// First user matching the criteria, if any.
    async fn find_one_by(&self, criteria: &UserCriteria) -> Result<Option<User>> {
        let users = self.find_by(criteria, &FindOptions::new().limit(1)).await?;
        Ok(users.into_iter().next())
    }

    /// Look up by email when the identifier contains "@", by username
    /// otherwise. The only lookup that fails with [`Error::NotFound`] on a
    /// miss; everything else returns `Ok(None)`.
    async fn load_user_by_username(&self, identifier: &str) -> Result<User> {
        if identifier.contains('@') {
            self.find_one_by(&UserCriteria::new().email(identifier))
                .await?
                .ok_or_else(|| Error::NotFound(format!("Email \"{identifier}\" does not exist.")))
        } else {
            self.find_one_by(&UserCriteria::new().username(identifier))
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("Username \"{identifier}\" does not exist."))
                })
        }
    }

    /// Look the user up again by its id, following the backend's normal
    /// id-lookup rules (the SQL backend may answer from its identity map).
    async fn refresh_user(&self, user: &User) -> Result<User> {
        let id = user
            .id()
            .ok_or_else(|| Error::NotFound("User has not been saved yet.".to_owned()))?;
        self.get_user(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {id} does not exist.")))
    }

    /// Local field rules plus cross-record uniqueness of email and, when
    /// set, username — each excluding the user's own row — plus the
    /// username-required policy when configured.
    async fn validate(&self, user: &User) -> Result<ValidationErrors> {
        let mut errors = user.validate();

        let duplicates = self
            .find_by(&UserCriteria::new().email(user.email()), &FindOptions::new())
            .await?;
        for duplicate in duplicates {
            if user.id().is_some() && duplicate.id() == user.id() {
                continue;
            }
            errors.insert("email", "An account with that email address already exists.");
        }

        if let Some(username) = user.username() {
            if !username.is_empty() {
                let duplicates = self
                    .find_by(&UserCriteria::new().username(username), &FindOptions::new())
                    .await?;
                for duplicate in duplicates {
                    if user.id().is_some() && duplicate.id() == user.id() {
                        continue;
                    }
                    errors.insert("username", "An account with that username already exists.");
                }
            }
        }

        if self.manager_options().username_required
            && user.username().map_or(true, str::is_empty)
        {
            errors.insert("username", "Username is required.");
        }

        Ok(errors)
    }

    /// Encode a plaintext password with the user's own salt.
    fn encode_user_password(&self, user: &User, plain: &str) -> Result<String> {
        self.password_encoder().encode(plain, user.salt())
    }

    /// Encode and set the password on the user.
    fn set_user_password(&self, user: &mut User, plain: &str) -> Result<()> {
        let encoded = self.encode_user_password(user, plain)?;
        user.set_password(encoded);
        Ok(())
    }

    /// Whether the plaintext matches the user's stored password:
    /// re-encode with the user's salt and compare.
    fn check_user_password(&self, user: &User, plain: &str) -> Result<bool> {
        let encoded = self.encode_user_password(user, plain)?;
        Ok(user.password() == Some(encoded.as_str()))
    }

    /// Policy test for new passwords. Callers invoke this explicitly; it is
    /// not applied by `set_user_password` or `validate`.
    fn validate_password_strength(&self, user: &User, plain: &str) -> Option<String> {
        self.manager_options().check_password_strength(user, plain)
    }

    /// Whether the user's outstanding password-reset request has aged past
    /// the configured token TTL.
    fn is_password_reset_request_expired(&self, user: &User) -> bool {
        user.is_password_reset_request_expired(self.manager_options().password_reset_token_ttl)
    }

    /// Make the given user the session's current user.
    fn login_as_user(&self, session: &mut Session, user: &User) {
        session.set_user(user.clone());
    }

    fn current_user<'s>(&self, session: &'s Session) -> Option<&'s User> {
        session.user()
    }

    fn is_logged_in(&self, session: &Session) -> bool {
        session.is_logged_in()
    }
}
