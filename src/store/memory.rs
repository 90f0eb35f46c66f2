//! In-process manager backing the same contract as the SQL variant.
//!
//! Useful for host-application tests and as the reference semantics for
//! the contract: criteria, ordering and paging are evaluated directly on
//! the stored users.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::config::ManagerOptions;
use crate::error::Result;
use crate::events::{UserEventDispatcher, UserWrite};
use crate::manager::UserManager;
use crate::password::{Argon2Encoder, PasswordEncoder};
use crate::query::{FindOptions, SortDirection, UserCriteria, UserField, Value};
use crate::user::User;

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, User>,
    next_id: i64,
}

pub struct MemoryUserManager {
    inner: Mutex<Inner>,
    options: ManagerOptions,
    encoder: Box<dyn PasswordEncoder>,
    dispatcher: UserEventDispatcher,
}

impl Default for MemoryUserManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            options: ManagerOptions::default(),
            encoder: Box::new(Argon2Encoder),
            dispatcher: UserEventDispatcher::new(),
        }
    }

    pub fn options_mut(&mut self) -> &mut ManagerOptions {
        &mut self.options
    }

    pub fn dispatcher_mut(&mut self) -> &mut UserEventDispatcher {
        &mut self.dispatcher
    }

    pub fn set_password_encoder(&mut self, encoder: impl PasswordEncoder + 'static) {
        self.encoder = Box::new(encoder);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches(user: &User, criteria: &UserCriteria) -> bool {
    for (field, value) in criteria.predicates() {
        let hit = match (field, value) {
            (UserField::Id, Value::Int(id)) => user.id() == Some(*id),
            (UserField::Email, Value::Text(email)) => user.email() == email,
            (UserField::Username, Value::Text(username)) => {
                user.username() == Some(username.as_str())
            }
            (UserField::Name, Value::Text(name)) => user.name() == name,
            (UserField::IsEnabled, Value::Bool(enabled)) => user.is_enabled() == *enabled,
            (UserField::ConfirmationToken, Value::Text(token)) => {
                user.confirmation_token() == Some(token.as_str())
            }
            (UserField::TimeCreated, Value::Int(seconds)) => {
                user.time_created().unix_timestamp() == *seconds
            }
            (field, value) => {
                debug!(?field, ?value, "predicate value type does not fit the field");
                false
            }
        };
        if !hit {
            return false;
        }
    }
    criteria
        .custom_fields()
        .iter()
        .all(|(attribute, value)| user.custom_field(attribute) == Some(value.as_str()))
}

fn compare(a: &User, b: &User, field: UserField) -> Ordering {
    match field {
        UserField::Id => a.id().cmp(&b.id()),
        UserField::Email => a.email().cmp(b.email()),
        UserField::Username => a.username().cmp(&b.username()),
        UserField::Name => a.name().cmp(b.name()),
        UserField::IsEnabled => a.is_enabled().cmp(&b.is_enabled()),
        UserField::ConfirmationToken => a.confirmation_token().cmp(&b.confirmation_token()),
        UserField::TimeCreated => a.time_created().cmp(&b.time_created()),
    }
}

#[async_trait]
impl UserManager for MemoryUserManager {
    fn password_encoder(&self) -> &dyn PasswordEncoder {
        self.encoder.as_ref()
    }

    fn manager_options(&self) -> &ManagerOptions {
        &self.options
    }

    async fn save(&self, user: &mut User) -> Result<()> {
        let op = if user.id().is_some() {
            UserWrite::Update
        } else {
            UserWrite::Insert
        };
        self.dispatcher.dispatch_before(op, user);

        {
            let mut inner = self.lock();
            let id = match user.id() {
                Some(id) => id,
                None => {
                    inner.next_id += 1;
                    let id = inner.next_id;
                    user.set_id(id);
                    id
                }
            };
            inner.users.insert(id, user.clone());
        }
        debug!(id = user.id(), email = user.email(), "user saved");

        self.dispatcher.dispatch_after(op, user);
        Ok(())
    }

    async fn delete(&self, user: &mut User) -> Result<()> {
        self.dispatcher.dispatch_before(UserWrite::Delete, user);
        if let Some(id) = user.id() {
            self.lock().users.remove(&id);
            debug!(id, "user deleted");
        }
        self.dispatcher.dispatch_after(UserWrite::Delete, user);
        Ok(())
    }

    async fn find_by(&self, criteria: &UserCriteria, options: &FindOptions) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .lock()
            .users
            .values()
            .filter(|user| matches(user, criteria))
            .cloned()
            .collect();

        if let Some((field, direction)) = options.ordering() {
            users.sort_by(|a, b| {
                let ordering = compare(a, b, field);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let offset = options.offset_value().unwrap_or(0) as usize;
        let users = users.into_iter().skip(offset);
        Ok(match options.limit_value() {
            Some(limit) => users.take(limit as usize).collect(),
            None => users.collect(),
        })
    }

    async fn find_count(&self, criteria: &UserCriteria) -> Result<u64> {
        let count = self
            .lock()
            .users
            .values()
            .filter(|user| matches(user, criteria))
            .count();
        Ok(count as u64)
    }
}
