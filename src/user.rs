//! The user account entity and its local validation rules.

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

/// Every user carries this role whether or not it was ever added.
pub const ROLE_USER: &str = "ROLE_USER";

const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TOKEN_LEN: usize = 22;

/// Random opaque token over a base-36 alphabet, from the OS RNG.
///
/// Used for per-user password salts and email confirmation tokens.
pub fn generate_token() -> String {
    let mut rng = OsRng;
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// A user account.
///
/// `password` holds the salted encoding only; plaintext never lands here.
/// The salt is generated once at construction and cannot be changed through
/// the public API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    id: Option<i64>,
    email: String,
    username: Option<String>,
    #[serde(skip_serializing)]
    password: Option<String>,
    #[serde(skip_serializing)]
    salt: String,
    roles: Vec<String>,
    name: String,
    is_enabled: bool,
    confirmation_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    time_created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    password_reset_requested_at: Option<OffsetDateTime>,
    custom_fields: BTreeMap<String, String>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        // Whole-second precision so a persisted-and-reloaded user compares
        // equal to the original.
        let now = OffsetDateTime::now_utc();
        let now = OffsetDateTime::from_unix_timestamp(now.unix_timestamp())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        Self {
            id: None,
            email: email.into(),
            username: None,
            password: None,
            salt: generate_token(),
            roles: Vec::new(),
            name: String::new(),
            is_enabled: true,
            confirmation_token: None,
            time_created: now,
            password_reset_requested_at: None,
            custom_fields: BTreeMap::new(),
        }
    }

    /// Surrogate key, assigned on first persist. `None` before first save.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
    }

    /// The actual username value, `None` if one was never set.
    /// Compare [`username_or_email`](Self::username_or_email).
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: Option<&str>) {
        self.username = username.map(str::to_owned);
    }

    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    /// The username when set and non-empty, otherwise the email address.
    ///
    /// Sign-in accepts either identifier, so this is the value shown as
    /// "who you are logged in as".
    pub fn username_or_email(&self) -> &str {
        match self.username.as_deref() {
            Some(u) if !u.is_empty() => u,
            _ => &self.email,
        }
    }

    /// The encoded password. Plaintext is salted and encoded before it is
    /// compared against this value.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, encoded: impl Into<String>) {
        self.password = Some(encoded.into());
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub(crate) fn set_salt(&mut self, salt: impl Into<String>) {
        self.salt = salt.into();
    }

    /// Roles granted to the user. Always includes [`ROLE_USER`].
    pub fn roles(&self) -> Vec<String> {
        let mut roles = self.roles.clone();
        roles.push(ROLE_USER.to_owned());
        roles
    }

    /// The explicitly granted roles, without the implicit [`ROLE_USER`].
    /// This is what gets persisted.
    pub(crate) fn stored_roles(&self) -> &[String] {
        &self.roles
    }

    pub fn set_roles<I, S>(&mut self, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.roles.clear();
        for role in roles {
            self.add_role(role.as_ref());
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        let role = role.to_uppercase();
        role == ROLE_USER || self.roles.contains(&role)
    }

    /// Adds a role, normalized to uppercase. Adding [`ROLE_USER`] is a no-op
    /// since every user has it implicitly.
    pub fn add_role(&mut self, role: &str) {
        let role = role.to_uppercase();
        if role == ROLE_USER {
            return;
        }
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
    }

    /// Removes a role. [`ROLE_USER`] is never stored, so it cannot be removed.
    pub fn remove_role(&mut self, role: &str) {
        let role = role.to_uppercase();
        self.roles.retain(|r| *r != role);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The display name, or `"Anonymous {id}"` when none is set.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.id {
            Some(id) => format!("Anonymous {id}"),
            None => "Anonymous".to_owned(),
        }
    }

    /// Whether authentication is allowed for this account.
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.is_enabled = enabled;
    }

    /// Opaque token present while awaiting email confirmation or a password
    /// reset; cleared once either completes.
    pub fn confirmation_token(&self) -> Option<&str> {
        self.confirmation_token.as_deref()
    }

    pub fn set_confirmation_token(&mut self, token: Option<String>) {
        self.confirmation_token = token;
    }

    pub fn time_created(&self) -> OffsetDateTime {
        self.time_created
    }

    pub(crate) fn set_time_created(&mut self, time_created: OffsetDateTime) {
        self.time_created = time_created;
    }

    pub fn password_reset_requested_at(&self) -> Option<OffsetDateTime> {
        self.password_reset_requested_at
    }

    pub fn set_password_reset_requested_at(&mut self, at: Option<OffsetDateTime>) {
        self.password_reset_requested_at = at;
    }

    /// Whether an outstanding password-reset request is past its TTL.
    /// No outstanding request counts as expired.
    pub fn is_password_reset_request_expired(&self, ttl: Duration) -> bool {
        match self.password_reset_requested_at {
            Some(requested_at) => requested_at + ttl < OffsetDateTime::now_utc(),
            None => true,
        }
    }

    pub fn custom_field(&self, attribute: &str) -> Option<&str> {
        self.custom_fields.get(attribute).map(String::as_str)
    }

    pub fn has_custom_field(&self, attribute: &str) -> bool {
        self.custom_fields.contains_key(attribute)
    }

    pub fn set_custom_field(&mut self, attribute: impl Into<String>, value: impl Into<String>) {
        self.custom_fields.insert(attribute.into(), value.into());
    }

    pub fn custom_fields(&self) -> &BTreeMap<String, String> {
        &self.custom_fields
    }

    pub fn set_custom_fields(&mut self, custom_fields: BTreeMap<String, String>) {
        self.custom_fields = custom_fields;
    }

    /// Local field validation. Uniqueness checks against the store are the
    /// manager's job, see [`UserManager::validate`](crate::UserManager::validate).
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();

        if self.email.is_empty() {
            errors.insert("email", "Email address is required.");
        } else if !self.email.find('@').is_some_and(|at| at > 0) {
            // Basic format sanity check. Real validation is sending them an
            // email with a link they have to click.
            errors.insert("email", "Email address appears to be invalid.");
        } else if self.email.len() > 100 {
            errors.insert("email", "Email address can't be longer than 100 characters.");
        }

        match self.password.as_deref() {
            None | Some("") => errors.insert("password", "Password is required."),
            Some(p) if p.len() > 255 => {
                errors.insert("password", "Password can't be longer than 255 characters.")
            }
            Some(_) => {}
        }

        if self.name.len() > 100 {
            errors.insert("name", "Name can't be longer than 100 characters.");
        }

        // Username can't contain "@": that is how email and username are
        // told apart when signing in, since either one is accepted.
        if let Some(username) = self.username.as_deref() {
            if !username.is_empty() && username.contains('@') {
                errors.insert("username", "Username cannot contain the \"@\" symbol.");
            }
        }

        errors
    }
}

/// Field-keyed human-readable validation messages. One message per field;
/// a later message for the same field replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }
}
