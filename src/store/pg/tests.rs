//! [`PgStore`] against a real Postgres started in Docker.
//!
//! One container is shared by the whole test binary; every test gets a
//! freshly migrated database of its own.

use chrono::{TimeDelta, Utc};
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::Value;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres as PostgresImage;
use testresult::TestResult;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::PgStore;
use crate::{
    app::{config::DatabaseConfig, db},
    auth::{NewUser, UserStore},
    orders::{OrderStatus, OrderStore},
    carts::{
        CartError, CartStore,
        models::{CartOwner, MergeOutcome},
    },
    schema::{categories, products, sessions},
    sessions::{SessionKey, SessionStore, default_session_ttl},
    store::MIGRATIONS,
};

const DB_USER: &str = "storefront_test";
const DB_PASSWORD: &str = "storefront_test_password";

struct SharedPostgres {
    _container: ContainerAsync<PostgresImage>,
    host: String,
    port: u16,
}

impl SharedPostgres {
    fn url(&self, database: &str) -> String {
        format!(
            "postgresql://{DB_USER}:{DB_PASSWORD}@{}:{}/{database}",
            self.host, self.port
        )
    }
}

static POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

async fn start_postgres() -> SharedPostgres {
    let container = PostgresImage::default()
        .with_user(DB_USER)
        .with_password(DB_PASSWORD)
        .with_db_name("storefront_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get container port");
    let host =
        std::env::var("TESTCONTAINERS_HOST_OVERRIDE").unwrap_or_else(|_| "localhost".to_string());

    SharedPostgres {
        _container: container,
        host,
        port,
    }
}

/// A store over a new, fully migrated database.
async fn fresh_store() -> TestResult<PgStore> {
    let postgres = POSTGRES.get_or_init(start_postgres).await;
    let name = format!("storefront_{}", Uuid::new_v4().simple());

    let mut admin = AsyncPgConnection::establish(&postgres.url("postgres")).await?;
    diesel::sql_query(format!("CREATE DATABASE \"{name}\""))
        .execute(&mut admin)
        .await?;

    let url = postgres.url(&name);
    db::run_migrations_blocking(MIGRATIONS, &url).await?;
    let pool = db::create_pool(&DatabaseConfig {
        url,
        max_connections: 16,
    })
    .await?;

    Ok(PgStore::new(pool))
}

async fn insert_product(store: &PgStore, price_minor: i64) -> TestResult<i32> {
    let conn = &mut store.conn().await?;

    let category: i32 = diesel::insert_into(categories::table)
        .values(categories::name.eq("Tea"))
        .returning(categories::id)
        .get_result(conn)
        .await?;

    let product: i32 = diesel::insert_into(products::table)
        .values((
            products::category_id.eq(category),
            products::name.eq("Sencha"),
            products::price_minor.eq(price_minor),
            products::stock_quantity.eq(100),
        ))
        .returning(products::id)
        .get_result(conn)
        .await?;

    Ok(product)
}

async fn insert_user(store: &PgStore, email: &str) -> TestResult<i32> {
    let user = store
        .create_user(NewUser {
            email: email.to_string(),
            password_hash: "!".into(),
            phone_number: String::new(),
            address: String::new(),
            activation_token: Uuid::new_v4().simple().to_string(),
        })
        .await?;

    Ok(user.id)
}

async fn new_session(store: &PgStore) -> TestResult<SessionKey> {
    Ok(store
        .ensure_session(None, default_session_ttl())
        .await?
        .session
        .key)
}

async fn quantity_of(store: &PgStore, cart_id: i32, product_id: i32) -> TestResult<i32> {
    let (_, lines) = store.load_cart(cart_id).await?.ok_or("cart is gone")?;

    Ok(lines
        .iter()
        .filter(|line| line.item.product_id == product_id)
        .map(|line| line.item.quantity)
        .sum())
}

async fn expire(store: &PgStore, key: &SessionKey) -> TestResult {
    let conn = &mut store.conn().await?;

    diesel::update(sessions::table.find(key.as_str()))
        .set(sessions::expires_at.eq(Utc::now() - TimeDelta::seconds(1)))
        .execute(conn)
        .await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_keep_every_unit() -> TestResult {
    const ADDS: i32 = 24;

    let store = fresh_store().await?;
    let product = insert_product(&store, 4_50).await?;
    let key = new_session(&store).await?;
    let cart_id = store.get_or_create_cart(&CartOwner::Session(key)).await?.id;

    let tasks: Vec<_> = (0..ADDS)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.add_item(cart_id, product, 1).await })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    let (stored, lines) = store.load_cart(cart_id).await?.ok_or("cart is gone")?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].item.quantity, ADDS);
    assert_eq!(stored.total_minor, i64::from(ADDS) * 4_50);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn merge_racing_an_add_on_its_source_loses_nothing() -> TestResult {
    let store = fresh_store().await?;
    let product = insert_product(&store, 1_00).await?;
    let user = insert_user(&store, "racer@example.com").await?;
    let destination = store.get_or_create_cart(&CartOwner::User(user)).await?.id;

    let mut expected = 0;
    for _ in 0..10 {
        let key = new_session(&store).await?;
        let source = store.get_or_create_cart(&CartOwner::Session(key)).await?.id;
        store.add_item(source, product, 2).await?;
        expected += 2;

        let merging = {
            let store = store.clone();
            tokio::spawn(async move { store.merge_carts(source, destination).await })
        };
        let adding = {
            let store = store.clone();
            tokio::spawn(async move { store.add_item(source, product, 3).await })
        };

        let merged = merging.await??;
        assert!(matches!(merged, MergeOutcome::Merged { .. }));

        match adding.await? {
            Ok(_) => expected += 3,
            Err(CartError::Conflict) => {}
            Err(other) => return Err(other.into()),
        }

        assert!(store.load_cart(source).await?.is_none());
        assert_eq!(quantity_of(&store, destination, product).await?, expected);
    }

    let (stored, _) = store
        .load_cart(destination)
        .await?
        .ok_or("cart is gone")?;
    assert_eq!(stored.total_minor, i64::from(expected) * 1_00);

    Ok(())
}

#[tokio::test]
async fn merging_a_merged_cart_again_finds_no_source() -> TestResult {
    let store = fresh_store().await?;
    let product = insert_product(&store, 1_00).await?;
    let user = insert_user(&store, "twice@example.com").await?;
    let destination = store.get_or_create_cart(&CartOwner::User(user)).await?;
    let key = new_session(&store).await?;
    let source = store.get_or_create_cart(&CartOwner::Session(key)).await?;
    store.add_item(source.id, product, 1).await?;

    let first = store.merge_carts(source.id, destination.id).await?;
    let second = store.merge_carts(source.id, destination.id).await?;

    assert!(matches!(first, MergeOutcome::Merged { moved: 1, .. }));
    assert!(matches!(second, MergeOutcome::SourceMissing));
    assert_eq!(quantity_of(&store, destination.id, product).await?, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_cart_creation_yields_one_cart() -> TestResult {
    let store = fresh_store().await?;
    let user = insert_user(&store, "eager@example.com").await?;

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.get_or_create_cart(&CartOwner::User(user)).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await??.id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);

    Ok(())
}

#[tokio::test]
async fn cart_for_a_missing_owner_conflicts() -> TestResult {
    let store = fresh_store().await?;

    let for_session = store
        .get_or_create_cart(&CartOwner::Session(SessionKey::mint()))
        .await;
    let for_user = store.get_or_create_cart(&CartOwner::User(9_999)).await;

    assert!(
        matches!(for_session, Err(CartError::Conflict)),
        "expected Conflict, got {for_session:?}"
    );
    assert!(
        matches!(for_user, Err(CartError::Conflict)),
        "expected Conflict, got {for_user:?}"
    );

    Ok(())
}

#[tokio::test]
async fn recompute_total_picks_up_price_changes() -> TestResult {
    let store = fresh_store().await?;
    let product = insert_product(&store, 4_50).await?;
    let key = new_session(&store).await?;
    let cart = store.get_or_create_cart(&CartOwner::Session(key)).await?;
    store.add_item(cart.id, product, 2).await?;

    {
        let conn = &mut store.conn().await?;
        diesel::update(products::table.find(product))
            .set(products::price_minor.eq(5_00))
            .execute(conn)
            .await?;
    }
    let (stale, _) = store.load_cart(cart.id).await?.ok_or("cart is gone")?;
    assert_eq!(stale.total_minor, 2 * 4_50);

    let fresh = store.recompute_total(cart.id).await?;

    assert_eq!(fresh.total_minor, 2 * 5_00);

    Ok(())
}

#[tokio::test]
async fn add_that_would_overflow_a_line_is_rejected() -> TestResult {
    let store = fresh_store().await?;
    let product = insert_product(&store, 1).await?;
    let key = new_session(&store).await?;
    let cart = store.get_or_create_cart(&CartOwner::Session(key)).await?;
    store.add_item(cart.id, product, i32::MAX).await?;

    let result = store.add_item(cart.id, product, 1).await;

    assert!(
        matches!(result, Err(CartError::InvalidArgument(_))),
        "expected InvalidArgument, got {result:?}"
    );
    assert_eq!(quantity_of(&store, cart.id, product).await?, i32::MAX);

    Ok(())
}

#[tokio::test]
async fn rotation_carries_data_and_cart_to_the_new_key() -> TestResult {
    let store = fresh_store().await?;
    let user = insert_user(&store, "rotated@example.com").await?;
    let key = new_session(&store).await?;
    store
        .set_session_value(&key, "theme", Value::from("dark"))
        .await?;
    let cart = store
        .get_or_create_cart(&CartOwner::Session(key.clone()))
        .await?;

    let rotated = store
        .rotate_session(&key, Some(user), default_session_ttl())
        .await?;

    assert_ne!(rotated, key);
    let moved = store
        .ensure_session(Some(&rotated), default_session_ttl())
        .await?;
    assert!(!moved.created);
    assert_eq!(moved.session.user_id, Some(user));
    assert_eq!(
        store.get_session_value(&rotated, "theme").await?,
        Some(Value::from("dark"))
    );
    assert_eq!(
        store
            .find_cart_by_owner(&CartOwner::Session(rotated))
            .await?
            .map(|cart| cart.id),
        Some(cart.id)
    );

    let stale = store.ensure_session(Some(&key), default_session_ttl()).await?;
    assert!(stale.created);

    Ok(())
}

#[tokio::test]
async fn expired_sessions_are_replaced_and_purged_with_their_carts() -> TestResult {
    let store = fresh_store().await?;
    let product = insert_product(&store, 1_00).await?;

    let revisited = new_session(&store).await?;
    let revisited_cart = store
        .get_or_create_cart(&CartOwner::Session(revisited.clone()))
        .await?;
    store.add_item(revisited_cart.id, product, 1).await?;
    expire(&store, &revisited).await?;

    let ensured = store
        .ensure_session(Some(&revisited), default_session_ttl())
        .await?;
    assert!(ensured.created);
    assert_ne!(ensured.session.key, revisited);
    assert!(store.load_cart(revisited_cart.id).await?.is_none());

    let abandoned = new_session(&store).await?;
    let abandoned_cart = store
        .get_or_create_cart(&CartOwner::Session(abandoned.clone()))
        .await?;
    expire(&store, &abandoned).await?;

    assert_eq!(store.purge_expired_sessions().await?, 1);
    assert!(store.load_cart(abandoned_cart.id).await?.is_none());
    let live = store
        .ensure_session(Some(&ensured.session.key), default_session_ttl())
        .await?;
    assert!(!live.created);

    Ok(())
}

#[tokio::test]
async fn activation_token_works_once() -> TestResult {
    let store = fresh_store().await?;
    let user = store
        .create_user(NewUser {
            email: "new@example.com".into(),
            password_hash: "!".into(),
            phone_number: String::new(),
            address: String::new(),
            activation_token: "secret".into(),
        })
        .await?;
    assert!(!user.is_active);

    assert!(store.activate_user(user.id, "wrong").await?.is_none());
    let activated = store.activate_user(user.id, "secret").await?;
    assert!(activated.is_some_and(|user| user.is_active));
    assert!(store.activate_user(user.id, "secret").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn placing_an_order_snapshots_and_empties_the_cart() -> TestResult {
    let store = fresh_store().await?;
    let product = insert_product(&store, 2_50).await?;
    let user = insert_user(&store, "buyer@example.com").await?;
    let cart = store.get_or_create_cart(&CartOwner::User(user)).await?;
    store.add_item(cart.id, product, 4).await?;

    let order = store.place_order(user, cart.id).await?;

    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.total_minor, 4 * 2_50);
    assert_eq!(order.items.len(), 1);
    let (emptied, lines) = store.load_cart(cart.id).await?.ok_or("cart is gone")?;
    assert!(lines.is_empty());
    assert_eq!(emptied.total_minor, 0);
    assert_eq!(store.orders_for_user(user).await?, vec![order]);

    let again = store.place_order(user, cart.id).await;
    assert!(
        matches!(again, Err(CartError::InvalidArgument(_))),
        "expected InvalidArgument, got {again:?}"
    );

    Ok(())
}
