//! Lifecycle notifications around user writes.
//!
//! Before-write listeners receive `&mut User` and run before the write is
//! assembled, so anything they change is persisted by that write.
//! After-write listeners observe the final state (id assigned on insert)
//! and cannot mutate it.

use std::collections::HashMap;

use crate::user::User;

/// The write operation a listener is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserWrite {
    Insert,
    Update,
    Delete,
}

type BeforeHook = Box<dyn Fn(&mut User) + Send + Sync>;
type AfterHook = Box<dyn Fn(&User) + Send + Sync>;

/// Registry of lifecycle listeners, dispatched in registration order.
#[derive(Default)]
pub struct UserEventDispatcher {
    before: HashMap<UserWrite, Vec<BeforeHook>>,
    after: HashMap<UserWrite, Vec<AfterHook>>,
}

impl UserEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before(&mut self, op: UserWrite, hook: impl Fn(&mut User) + Send + Sync + 'static) {
        self.before.entry(op).or_default().push(Box::new(hook));
    }

    pub fn on_after(&mut self, op: UserWrite, hook: impl Fn(&User) + Send + Sync + 'static) {
        self.after.entry(op).or_default().push(Box::new(hook));
    }

    pub(crate) fn dispatch_before(&self, op: UserWrite, user: &mut User) {
        if let Some(hooks) = self.before.get(&op) {
            for hook in hooks {
                hook(user);
            }
        }
    }

    pub(crate) fn dispatch_after(&self, op: UserWrite, user: &User) {
        if let Some(hooks) = self.after.get(&op) {
            for hook in hooks {
                hook(user);
            }
        }
    }
}

impl std::fmt::Debug for UserEventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEventDispatcher")
            .field("before", &self.before.values().map(Vec::len).sum::<usize>())
            .field("after", &self.after.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
