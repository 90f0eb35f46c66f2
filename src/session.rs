//! Explicitly passed security context.
//!
//! Stands in for ambient "current request" state: the caller owns one
//! `Session` per unit of work and hands it to the manager when logging a
//! user in or asking who is logged in.

use crate::user::User;

#[derive(Debug, Clone, Default)]
pub struct Session {
    user: Option<User>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    pub fn clear(&mut self) {
        self.user = None;
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }
}
