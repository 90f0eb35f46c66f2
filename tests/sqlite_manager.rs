//! Contract tests for the SQL-backed manager against an in-memory SQLite
//! database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::sqlite::SqlitePoolOptions;
use time::OffsetDateTime;
use userstore::{
    Error, FindOptions, SortDirection, SqliteUserManager, StoreConfig, UserCriteria, UserField,
    UserManager, UserWrite, ROLE_USER,
};

async fn manager() -> SqliteUserManager {
    let manager = SqliteUserManager::open_in_memory()
        .await
        .expect("open sqlite");
    manager.create_schema().await.expect("create schema");
    manager
}

fn whole_second_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    OffsetDateTime::from_unix_timestamp(now.unix_timestamp()).expect("valid timestamp")
}

#[tokio::test]
async fn store_and_fetch_round_trips_all_fields() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "password", Some("Test User"), &["role_admin"])
        .expect("create user");
    user.set_username(Some("test"));
    user.set_confirmation_token(Some("tok123".to_owned()));
    user.set_password_reset_requested_at(Some(whole_second_now()));
    user.set_custom_field("twitter", "@test");
    assert_eq!(user.id(), None);

    manager.save(&mut user).await.expect("save");
    let id = user.id().expect("id assigned");
    assert!(id > 0);

    // Force a real read from storage, not the identity map.
    manager.clear_identity_map();
    let stored = manager
        .get_user(id)
        .await
        .expect("get_user")
        .expect("user exists");
    assert_eq!(stored, user);
    assert!(stored.is_enabled());
    assert_eq!(stored.roles(), vec!["ROLE_ADMIN".to_owned(), ROLE_USER.to_owned()]);
    assert_eq!(stored.custom_field("twitter"), Some("@test"));
}

#[tokio::test]
async fn implicit_role_is_not_written_to_storage() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "password", None, &["role_admin"])
        .expect("create user");
    manager.save(&mut user).await.expect("save");

    let stored_roles: String = sqlx::query_scalar("SELECT roles FROM users WHERE id = ?")
        .bind(user.id().expect("id"))
        .fetch_one(manager.pool())
        .await
        .expect("read roles column");
    assert_eq!(stored_roles, "ROLE_ADMIN");
}

#[tokio::test]
async fn update_persists_changed_fields() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "pass", None, &[])
        .expect("create user");
    manager.save(&mut user).await.expect("insert");
    let id = user.id().expect("id");

    user.set_name("Foo");
    user.set_enabled(false);
    manager.save(&mut user).await.expect("update");

    manager.clear_identity_map();
    let stored = manager.get_user(id).await.expect("get").expect("exists");
    assert_eq!(stored.name(), "Foo");
    assert!(!stored.is_enabled());
}

#[tokio::test]
async fn delete_removes_user_and_custom_fields() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    user.set_custom_field("color", "green");
    manager.save(&mut user).await.expect("save");
    let id = user.id().expect("id");

    assert!(manager
        .find_one_by(&UserCriteria::new().email("test@example.com"))
        .await
        .expect("find")
        .is_some());

    manager.delete(&mut user).await.expect("delete");

    assert!(manager
        .find_one_by(&UserCriteria::new().email("test@example.com"))
        .await
        .expect("find")
        .is_none());
    assert_eq!(manager.get_user(id).await.expect("get"), None);

    let orphans: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM user_custom_fields WHERE user_id = ?")
            .bind(id)
            .fetch_one(manager.pool())
            .await
            .expect("count side table");
    assert_eq!(orphans, 0);
}

#[tokio::test]
async fn load_user_by_username_dispatches_on_at_sign() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    user.set_username(Some("foo"));
    manager.save(&mut user).await.expect("save");

    let by_email = manager
        .load_user_by_username("test@example.com")
        .await
        .expect("load by email");
    assert_eq!(by_email.id(), user.id());

    let by_username = manager
        .load_user_by_username("foo")
        .await
        .expect("load by username");
    assert_eq!(by_username.id(), user.id());
}

#[tokio::test]
async fn load_user_by_username_fails_with_not_found() {
    let manager = manager().await;

    let err = manager
        .load_user_by_username("does-not-exist@example.com")
        .await
        .expect_err("should miss");
    assert!(err.is_not_found());
    assert!(err.to_string().contains("does-not-exist@example.com"));

    let err = manager
        .load_user_by_username("nobody")
        .await
        .expect_err("should miss");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn validate_flags_duplicate_email_only_after_first_is_saved() {
    let manager = manager().await;

    let mut first = manager
        .create("test@example.com", "password", None, &[])
        .expect("create first");
    let second = manager
        .create("test@example.com", "password", None, &[])
        .expect("create second");

    // Nothing saved yet: both in-memory users validate clean.
    assert!(manager.validate(&second).await.expect("validate").is_empty());

    manager.save(&mut first).await.expect("save first");
    let errors = manager.validate(&second).await.expect("validate");
    assert_eq!(
        errors.get("email"),
        Some("An account with that email address already exists.")
    );

    // The saved user itself is excluded from its own uniqueness check.
    assert!(manager.validate(&first).await.expect("validate").is_empty());
}

#[tokio::test]
async fn validate_flags_duplicate_username() {
    let manager = manager().await;

    let mut first = manager
        .create("a@example.com", "password", None, &[])
        .expect("create first");
    first.set_username(Some("joe"));
    manager.save(&mut first).await.expect("save");

    let mut second = manager
        .create("b@example.com", "password", None, &[])
        .expect("create second");
    second.set_username(Some("joe"));
    let errors = manager.validate(&second).await.expect("validate");
    assert_eq!(
        errors.get("username"),
        Some("An account with that username already exists.")
    );
}

#[tokio::test]
async fn validate_enforces_username_required_policy() {
    let mut manager = manager().await;
    manager.options_mut().username_required = true;

    let user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    let errors = manager.validate(&user).await.expect("validate");
    assert_eq!(errors.get("username"), Some("Username is required."));
}

#[tokio::test]
async fn password_check_matches_last_set_password() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "secret", None, &[])
        .expect("create user");
    assert!(manager.check_user_password(&user, "secret").expect("check"));
    assert!(!manager.check_user_password(&user, "wrong").expect("check"));

    manager
        .set_user_password(&mut user, "changed")
        .expect("set password");
    assert!(manager.check_user_password(&user, "changed").expect("check"));
    assert!(!manager.check_user_password(&user, "secret").expect("check"));
}

#[tokio::test]
async fn find_and_count_with_order_limit_offset() {
    let manager = manager().await;

    for (email, name) in [
        ("c@example.com", "Carol"),
        ("a@example.com", "Alice"),
        ("b@example.com", "Bob"),
    ] {
        let mut user = manager
            .create(email, "password", Some(name), &[])
            .expect("create user");
        manager.save(&mut user).await.expect("save");
    }

    assert_eq!(
        manager.find_count(&UserCriteria::new()).await.expect("count"),
        3
    );
    assert_eq!(
        manager
            .find_count(&UserCriteria::new().email("a@example.com"))
            .await
            .expect("count"),
        1
    );

    let ordered = manager
        .find_by(
            &UserCriteria::new(),
            &FindOptions::new().order_by(UserField::Email, SortDirection::Asc),
        )
        .await
        .expect("find ordered");
    let emails: Vec<&str> = ordered.iter().map(|u| u.email()).collect();
    assert_eq!(emails, ["a@example.com", "b@example.com", "c@example.com"]);

    let page = manager
        .find_by(
            &UserCriteria::new(),
            &FindOptions::new()
                .order_by(UserField::Email, SortDirection::Desc)
                .limit(1)
                .offset(1),
        )
        .await
        .expect("find page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].email(), "b@example.com");
}

#[tokio::test]
async fn custom_field_criteria_join_the_side_table() {
    let manager = manager().await;

    let mut jack = manager
        .create("jack@example.com", "password", None, &[])
        .expect("create jack");
    jack.set_custom_field("twitter", "@jack");
    jack.set_custom_field("color", "blue");
    manager.save(&mut jack).await.expect("save jack");

    let mut jill = manager
        .create("jill@example.com", "password", None, &[])
        .expect("create jill");
    jill.set_custom_field("color", "blue");
    manager.save(&mut jill).await.expect("save jill");

    let found = manager
        .find_by(
            &UserCriteria::new().custom_field("twitter", "@jack"),
            &FindOptions::new(),
        )
        .await
        .expect("find by custom field");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email(), "jack@example.com");

    // Custom-field predicates AND with column predicates.
    let found = manager
        .find_by(
            &UserCriteria::new()
                .custom_field("color", "blue")
                .email("jill@example.com"),
            &FindOptions::new(),
        )
        .await
        .expect("find combined");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email(), "jill@example.com");

    assert_eq!(
        manager
            .find_count(&UserCriteria::new().custom_field("color", "blue"))
            .await
            .expect("count"),
        2
    );
    assert_eq!(
        manager
            .find_count(&UserCriteria::new().custom_field("twitter", "@someone-else"))
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn identity_map_serves_repeat_id_lookups_until_cleared() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "password", Some("Original"), &[])
        .expect("create user");
    manager.save(&mut user).await.expect("save");
    let id = user.id().expect("id");

    // Change the row behind the manager's back.
    sqlx::query("UPDATE users SET name = 'Changed' WHERE id = ?")
        .bind(id)
        .execute(manager.pool())
        .await
        .expect("out-of-band update");

    // Served from the identity map: the out-of-band write is not visible.
    let cached = manager.get_user(id).await.expect("get").expect("exists");
    assert_eq!(cached.name(), "Original");

    manager.clear_identity_map();
    let fresh = manager.get_user(id).await.expect("get").expect("exists");
    assert_eq!(fresh.name(), "Changed");
}

#[tokio::test]
async fn forgetting_one_user_leaves_the_rest_cached() {
    let manager = manager().await;

    let mut a = manager
        .create("a@example.com", "password", Some("A"), &[])
        .expect("create a");
    let mut b = manager
        .create("b@example.com", "password", Some("B"), &[])
        .expect("create b");
    manager.save(&mut a).await.expect("save a");
    manager.save(&mut b).await.expect("save b");

    sqlx::query("UPDATE users SET name = 'rewritten'")
        .execute(manager.pool())
        .await
        .expect("out-of-band update");

    manager.forget_user(a.id().expect("id"));

    let fresh_a = manager
        .get_user(a.id().expect("id"))
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(fresh_a.name(), "rewritten");

    let cached_b = manager
        .get_user(b.id().expect("id"))
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(cached_b.name(), "B");
}

#[tokio::test]
async fn lifecycle_events_fire_in_order_around_writes() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut manager = manager().await;
    {
        let log = log.clone();
        manager.dispatcher_mut().on_before(UserWrite::Insert, move |_| {
            log.lock().expect("log lock").push("before-insert");
        });
    }
    {
        let log = log.clone();
        manager.dispatcher_mut().on_after(UserWrite::Insert, move |user| {
            assert!(user.id().is_some(), "id assigned before after-insert");
            log.lock().expect("log lock").push("after-insert");
        });
    }
    {
        let log = log.clone();
        manager.dispatcher_mut().on_before(UserWrite::Update, move |_| {
            log.lock().expect("log lock").push("before-update");
        });
    }
    {
        let log = log.clone();
        manager.dispatcher_mut().on_after(UserWrite::Update, move |_| {
            log.lock().expect("log lock").push("after-update");
        });
    }

    let mut user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    manager.save(&mut user).await.expect("insert");
    manager.save(&mut user).await.expect("update");

    assert_eq!(
        *log.lock().expect("log lock"),
        vec!["before-insert", "after-insert", "before-update", "after-update"]
    );
}

#[tokio::test]
async fn before_insert_mutations_are_persisted() {
    let mut manager = manager().await;
    manager
        .dispatcher_mut()
        .on_before(UserWrite::Insert, |user| user.set_name("set by hook"));

    let mut user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    manager.save(&mut user).await.expect("save");

    manager.clear_identity_map();
    let stored = manager
        .get_user(user.id().expect("id"))
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.name(), "set by hook");
}

#[tokio::test]
async fn delete_events_fire_before_and_after() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut manager = manager().await;
    {
        let hits = hits.clone();
        manager.dispatcher_mut().on_before(UserWrite::Delete, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let hits = hits.clone();
        manager.dispatcher_mut().on_after(UserWrite::Delete, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    manager.save(&mut user).await.expect("save");
    manager.delete(&mut user).await.expect("delete");

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_expected_columns_fail_fast_as_schema_out_of_date() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open sqlite");

    sqlx::query(
        "CREATE TABLE legacy_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL,
            password TEXT,
            salt TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            roles TEXT NOT NULL DEFAULT '',
            time_created INTEGER NOT NULL
        )",
    )
    .execute(&pool)
    .await
    .expect("create legacy table");

    sqlx::query(
        "INSERT INTO legacy_users (email, password, salt, name, roles, time_created)
         VALUES ('old@example.com', 'enc', 'salt', '', '', 0)",
    )
    .execute(&pool)
    .await
    .expect("seed legacy row");

    let config = StoreConfig {
        users_table: "legacy_users".into(),
        ..StoreConfig::default()
    };
    let manager = SqliteUserManager::with_config(pool, config);

    let err = manager
        .find_one_by(&UserCriteria::new().email("old@example.com"))
        .await
        .expect_err("legacy schema must be rejected");
    assert!(matches!(err, Error::SchemaOutOfDate(column) if column == "username"));
}

#[tokio::test]
async fn refresh_user_reloads_by_id() {
    let manager = manager().await;

    let mut user = manager
        .create("test@example.com", "password", Some("Original"), &[])
        .expect("create user");
    manager.save(&mut user).await.expect("save");
    let id = user.id().expect("id");

    sqlx::query("UPDATE users SET name = 'Renamed' WHERE id = ?")
        .bind(id)
        .execute(manager.pool())
        .await
        .expect("out-of-band update");
    manager.forget_user(id);

    let refreshed = manager.refresh_user(&user).await.expect("refresh");
    assert_eq!(refreshed.id(), Some(id));
    assert_eq!(refreshed.name(), "Renamed");
}

#[tokio::test]
async fn refresh_user_fails_for_unsaved_or_vanished_users() {
    let manager = manager().await;

    let unsaved = manager
        .create("unsaved@example.com", "password", None, &[])
        .expect("create user");
    assert!(manager
        .refresh_user(&unsaved)
        .await
        .expect_err("unsaved user cannot be refreshed")
        .is_not_found());

    let mut user = manager
        .create("test@example.com", "password", None, &[])
        .expect("create user");
    manager.save(&mut user).await.expect("save");
    let id = user.id().expect("id");

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(manager.pool())
        .await
        .expect("out-of-band delete");
    manager.forget_user(id);

    assert!(manager
        .refresh_user(&user)
        .await
        .expect_err("vanished user cannot be refreshed")
        .is_not_found());
}

#[tokio::test]
async fn configured_table_names_are_used_throughout() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open sqlite");
    let config = StoreConfig {
        users_table: "members".into(),
        custom_fields_table: "member_attrs".into(),
    };
    let manager = SqliteUserManager::with_config(pool, config);
    manager.create_schema().await.expect("create schema");

    let mut user = manager
        .create("m@example.com", "password", None, &[])
        .expect("create user");
    user.set_custom_field("tier", "gold");
    manager.save(&mut user).await.expect("save");

    let found = manager
        .find_by(
            &UserCriteria::new().custom_field("tier", "gold"),
            &FindOptions::new(),
        )
        .await
        .expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email(), "m@example.com");
}
