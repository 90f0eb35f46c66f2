//! Typed criteria for user lookups.
//!
//! Criteria are an explicit list of field-equality predicates plus optional
//! custom-field predicates (each becomes an inner join against the EAV side
//! table, ANDed with everything else). No free-form column strings reach
//! the SQL layer.

/// User fields that can appear in equality predicates and sort orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Id,
    Email,
    Username,
    Name,
    IsEnabled,
    ConfirmationToken,
    TimeCreated,
}

impl UserField {
    pub(crate) fn column(self) -> &'static str {
        match self {
            UserField::Id => "id",
            UserField::Email => "email",
            UserField::Username => "username",
            UserField::Name => "name",
            UserField::IsEnabled => "is_enabled",
            UserField::ConfirmationToken => "confirmation_token",
            UserField::TimeCreated => "time_created",
        }
    }
}

/// A value bound into a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Equality predicates selecting users. All predicates are ANDed.
#[derive(Debug, Clone, Default)]
pub struct UserCriteria {
    predicates: Vec<(UserField, Value)>,
    custom_fields: Vec<(String, String)>,
}

impl UserCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: i64) -> Self {
        self.field(UserField::Id, id)
    }

    pub fn email(self, email: impl Into<String>) -> Self {
        self.field(UserField::Email, email.into())
    }

    pub fn username(self, username: impl Into<String>) -> Self {
        self.field(UserField::Username, username.into())
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.field(UserField::Name, name.into())
    }

    pub fn enabled(self, enabled: bool) -> Self {
        self.field(UserField::IsEnabled, enabled)
    }

    pub fn confirmation_token(self, token: impl Into<String>) -> Self {
        self.field(UserField::ConfirmationToken, token.into())
    }

    pub fn field(mut self, field: UserField, value: impl Into<Value>) -> Self {
        self.predicates.push((field, value.into()));
        self
    }

    /// Match users whose custom-field `attribute` equals `value`.
    pub fn custom_field(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.push((attribute.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.custom_fields.is_empty()
    }

    pub(crate) fn predicates(&self) -> &[(UserField, Value)] {
        &self.predicates
    }

    pub(crate) fn custom_fields(&self) -> &[(String, String)] {
        &self.custom_fields
    }

    /// The id value when the criteria are exactly one id-equality predicate.
    /// Only such lookups may be served from the identity map.
    pub(crate) fn sole_id(&self) -> Option<i64> {
        if !self.custom_fields.is_empty() {
            return None;
        }
        match self.predicates.as_slice() {
            [(UserField::Id, Value::Int(id))] => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordering and paging applied to a `find_by`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    order_by: Option<(UserField, SortDirection)>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, field: UserField, direction: SortDirection) -> Self {
        self.order_by = Some((field, direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn ordering(&self) -> Option<(UserField, SortDirection)> {
        self.order_by
    }

    pub(crate) fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    pub(crate) fn offset_value(&self) -> Option<u32> {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sole_id_recognizes_a_single_id_predicate() {
        assert_eq!(UserCriteria::new().id(3).sole_id(), Some(3));
        assert_eq!(UserCriteria::new().sole_id(), None);
        assert_eq!(UserCriteria::new().id(3).email("a@b.c").sole_id(), None);
        assert_eq!(UserCriteria::new().id(3).custom_field("k", "v").sole_id(), None);
    }

    #[test]
    fn builder_collects_predicates_in_order() {
        let criteria = UserCriteria::new().email("a@b.c").enabled(true);
        assert_eq!(
            criteria.predicates(),
            &[
                (UserField::Email, Value::Text("a@b.c".into())),
                (UserField::IsEnabled, Value::Bool(true)),
            ]
        );
    }
}
