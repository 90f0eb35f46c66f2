//! Raw-SQL manager over SQLite.
//!
//! Generates parameterized SQL from typed criteria, joins the EAV side
//! table for custom-field predicates, and keeps an identity map so that
//! repeated id lookups within one manager instance are served without
//! touching storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::{ManagerOptions, StoreConfig};
use crate::error::{Error, Result};
use crate::events::{UserEventDispatcher, UserWrite};
use crate::manager::UserManager;
use crate::password::{Argon2Encoder, PasswordEncoder};
use crate::query::{FindOptions, SortDirection, UserCriteria, Value};
use crate::user::User;

pub struct SqliteUserManager {
    pool: SqlitePool,
    config: StoreConfig,
    options: ManagerOptions,
    encoder: Box<dyn PasswordEncoder>,
    dispatcher: UserEventDispatcher,
    // Request-scoped read cache: id -> last-loaded user. Lives as long as
    // the manager, which is expected to be one per unit of work.
    identity_map: Mutex<HashMap<i64, User>>,
}

impl SqliteUserManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_config(pool, StoreConfig::default())
    }

    pub fn with_config(pool: SqlitePool, config: StoreConfig) -> Self {
        Self {
            pool,
            config,
            options: ManagerOptions::default(),
            encoder: Box::new(Argon2Encoder),
            dispatcher: UserEventDispatcher::new(),
            identity_map: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
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

    /// Create the users and custom-fields tables if they do not exist yet,
    /// under the configured names.
    pub async fn create_schema(&self) -> Result<()> {
        let users = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                password TEXT,
                salt TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                roles TEXT NOT NULL DEFAULT '',
                time_created INTEGER NOT NULL,
                username TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                confirmation_token TEXT,
                time_password_reset_requested INTEGER
            )",
            self.config.users_table
        );
        sqlx::query(&users).execute(&self.pool).await?;

        let custom_fields = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                user_id INTEGER NOT NULL,
                attribute TEXT NOT NULL,
                value TEXT NOT NULL
            )",
            self.config.custom_fields_table
        );
        sqlx::query(&custom_fields).execute(&self.pool).await?;
        Ok(())
    }

    /// Drop the whole identity map; subsequent lookups re-read storage.
    pub fn clear_identity_map(&self) {
        self.map().clear();
    }

    /// Evict a single user from the identity map.
    pub fn forget_user(&self, id: i64) {
        self.map().remove(&id);
    }

    fn map(&self) -> MutexGuard<'_, HashMap<i64, User>> {
        self.identity_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, id: i64) -> Option<User> {
        self.map().get(&id).cloned()
    }

    fn remember(&self, user: &User) {
        if let Some(id) = user.id() {
            self.map().insert(id, user.clone());
        }
    }

    async fn load_custom_fields(&self, user_id: i64) -> Result<BTreeMap<String, String>> {
        let sql = format!(
            "SELECT attribute, value FROM {} WHERE user_id = ?",
            self.config.custom_fields_table
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn save_custom_fields(&self, user: &User) -> Result<()> {
        let Some(id) = user.id() else { return Ok(()) };

        let delete = format!(
            "DELETE FROM {} WHERE user_id = ?",
            self.config.custom_fields_table
        );
        sqlx::query(&delete).bind(id).execute(&self.pool).await?;

        let insert = format!(
            "INSERT INTO {} (user_id, attribute, value) VALUES (?, ?, ?)",
            self.config.custom_fields_table
        );
        for (attribute, value) in user.custom_fields() {
            sqlx::query(&insert)
                .bind(id)
                .bind(attribute.clone())
                .bind(value.clone())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn insert_user(&self, user: &mut User) -> Result<()> {
        self.dispatcher.dispatch_before(UserWrite::Insert, user);

        let sql = format!(
            "INSERT INTO {} (email, password, salt, name, roles, time_created, username, \
             is_enabled, confirmation_token, time_password_reset_requested) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.config.users_table
        );
        let result = sqlx::query(&sql)
            .bind(user.email().to_owned())
            .bind(user.password().map(str::to_owned))
            .bind(user.salt().to_owned())
            .bind(user.name().to_owned())
            .bind(user.stored_roles().join(","))
            .bind(user.time_created().unix_timestamp())
            .bind(user.username().map(str::to_owned))
            .bind(user.is_enabled())
            .bind(user.confirmation_token().map(str::to_owned))
            .bind(user.password_reset_requested_at().map(|t| t.unix_timestamp()))
            .execute(&self.pool)
            .await?;

        user.set_id(result.last_insert_rowid());
        self.save_custom_fields(user).await?;
        self.remember(user);
        debug!(id = user.id(), email = user.email(), "user inserted");

        self.dispatcher.dispatch_after(UserWrite::Insert, user);
        Ok(())
    }

    async fn update_user(&self, id: i64, user: &mut User) -> Result<()> {
        self.dispatcher.dispatch_before(UserWrite::Update, user);

        let sql = format!(
            "UPDATE {} SET email = ?, password = ?, salt = ?, name = ?, roles = ?, \
             time_created = ?, username = ?, is_enabled = ?, confirmation_token = ?, \
             time_password_reset_requested = ? WHERE id = ?",
            self.config.users_table
        );
        sqlx::query(&sql)
            .bind(user.email().to_owned())
            .bind(user.password().map(str::to_owned))
            .bind(user.salt().to_owned())
            .bind(user.name().to_owned())
            .bind(user.stored_roles().join(","))
            .bind(user.time_created().unix_timestamp())
            .bind(user.username().map(str::to_owned))
            .bind(user.is_enabled())
            .bind(user.confirmation_token().map(str::to_owned))
            .bind(user.password_reset_requested_at().map(|t| t.unix_timestamp()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.save_custom_fields(user).await?;
        self.remember(user);
        debug!(id, "user updated");

        self.dispatcher.dispatch_after(UserWrite::Update, user);
        Ok(())
    }
}

#[async_trait]
impl UserManager for SqliteUserManager {
    fn password_encoder(&self) -> &dyn PasswordEncoder {
        self.encoder.as_ref()
    }

    fn manager_options(&self) -> &ManagerOptions {
        &self.options
    }

    async fn save(&self, user: &mut User) -> Result<()> {
        match user.id() {
            Some(id) => self.update_user(id, user).await,
            None => self.insert_user(user).await,
        }
    }

    async fn delete(&self, user: &mut User) -> Result<()> {
        self.dispatcher.dispatch_before(UserWrite::Delete, user);

        if let Some(id) = user.id() {
            self.forget_user(id);

            let delete_user = format!("DELETE FROM {} WHERE id = ?", self.config.users_table);
            sqlx::query(&delete_user).bind(id).execute(&self.pool).await?;

            let delete_fields = format!(
                "DELETE FROM {} WHERE user_id = ?",
                self.config.custom_fields_table
            );
            sqlx::query(&delete_fields).bind(id).execute(&self.pool).await?;
            debug!(id, "user deleted");
        }

        self.dispatcher.dispatch_after(UserWrite::Delete, user);
        Ok(())
    }

    async fn find_by(&self, criteria: &UserCriteria, options: &FindOptions) -> Result<Vec<User>> {
        // A bare id lookup is served from the identity map when possible.
        if let Some(id) = criteria.sole_id() {
            if let Some(user) = self.cached(id) {
                debug!(id, "identity map hit");
                return Ok(vec![user]);
            }
        }

        let (from, params) = common_find_sql(&self.config, criteria);
        let mut sql = format!("SELECT {users}.* {from}", users = self.config.users_table);

        if let Some((field, direction)) = options.ordering() {
            sql.push_str(&format!(
                " ORDER BY {}.{} {}",
                self.config.users_table,
                field.column(),
                match direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                }
            ));
        }
        match (options.limit_value(), options.offset_value()) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset.unwrap_or(0)));
            }
            // SQLite needs a LIMIT clause to accept an OFFSET.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        let mut query = sqlx::query(&sql);
        for value in &params {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = column(row, "id")?;
            // Rows already in the identity map win over freshly read data,
            // so every holder keeps seeing the same state.
            if let Some(cached) = self.cached(id) {
                users.push(cached);
                continue;
            }
            let mut user = hydrate_user(row)?;
            user.set_custom_fields(self.load_custom_fields(id).await?);
            self.remember(&user);
            users.push(user);
        }
        Ok(users)
    }

    async fn find_count(&self, criteria: &UserCriteria) -> Result<u64> {
        let (from, params) = common_find_sql(&self.config, criteria);
        let sql = format!("SELECT COUNT(*) {from}");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &params {
            query = bind_scalar_value(query, value);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

/// Query fragment common to find and count: FROM, custom-field joins, WHERE.
/// Returns the fragment and the values to bind, in placeholder order.
fn common_find_sql(config: &StoreConfig, criteria: &UserCriteria) -> (String, Vec<Value>) {
    let users = &config.users_table;
    let mut sql = format!("FROM {users}");
    let mut params = Vec::new();

    for (i, (attribute, value)) in criteria.custom_fields().iter().enumerate() {
        let alias = format!("cf{}", i + 1);
        sql.push_str(&format!(
            " JOIN {cft} {alias} ON {users}.id = {alias}.user_id \
             AND {alias}.attribute = ? AND {alias}.value = ?",
            cft = config.custom_fields_table
        ));
        params.push(Value::Text(attribute.clone()));
        params.push(Value::Text(value.clone()));
    }

    for (i, (field, value)) in criteria.predicates().iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("{users}.{} = ?", field.column()));
        params.push(value.clone());
    }

    (sql, params)
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Int(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bool(v) => query.bind(*v),
    }
}

fn bind_scalar_value<'q>(
    query: sqlx::query::QueryScalar<'q, sqlx::Sqlite, i64, sqlx::sqlite::SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::QueryScalar<'q, sqlx::Sqlite, i64, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Int(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bool(v) => query.bind(*v),
    }
}

/// Read a column, reporting a missing column as a schema problem rather
/// than a generic storage error.
fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| match e {
        sqlx::Error::ColumnNotFound(col) => Error::SchemaOutOfDate(col),
        other => Error::Storage(other),
    })
}

/// Reconstitute a user from a fetched row. Custom fields are loaded
/// separately.
fn hydrate_user(row: &SqliteRow) -> Result<User> {
    let email: String = column(row, "email")?;
    let mut user = User::new(email);

    user.set_id(column(row, "id")?);
    if let Some(password) = column::<Option<String>>(row, "password")? {
        user.set_password(password);
    }
    user.set_salt(column::<String>(row, "salt")?);
    user.set_name(column::<String>(row, "name")?);

    let roles: String = column(row, "roles")?;
    user.set_roles(roles.split(',').filter(|r| !r.is_empty()));

    let created: i64 = column(row, "time_created")?;
    user.set_time_created(decode_timestamp("time_created", created)?);

    let username: Option<String> = column(row, "username")?;
    user.set_username(username.as_deref());
    user.set_enabled(column(row, "is_enabled")?);
    user.set_confirmation_token(column(row, "confirmation_token")?);

    if let Some(requested) = column::<Option<i64>>(row, "time_password_reset_requested")? {
        user.set_password_reset_requested_at(Some(decode_timestamp(
            "time_password_reset_requested",
            requested,
        )?));
    }

    Ok(user)
}

fn decode_timestamp(column: &str, seconds: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(seconds).map_err(|e| {
        Error::Storage(sqlx::Error::ColumnDecode {
            index: column.to_owned(),
            source: Box::new(e),
        })
    })
}
