use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use storefront::{
    app::{
        app_state::AppState,
        config::{Config, StorageBackend},
    },
    catalog::Product,
    routes,
    sessions::SessionKey,
    store::memory::MemoryStore,
};
use testresult::TestResult;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    cookie_name: String,
    coffee: Product,
    mug: Product,
}

struct Reply {
    status: StatusCode,
    set_cookie: Option<String>,
    body: Value,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let category = store.insert_category("Kitchen", None);
        let coffee = store.insert_product(category, "Coffee", 12_00, 20);
        let mug = store.insert_product(category, "Mug", 7_50, 20);

        let mut config = Config::default();
        config.storage = StorageBackend::Memory;
        config.auth.bcrypt_cost = 4;
        let cookie_name = config.session.cookie_name.clone();

        let state = AppState::new(store.clone(), config);
        let router = routes::app(&state).with_state(state);

        Self {
            router,
            store,
            cookie_name,
            coffee,
            mug,
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> TestResult<Reply> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;

        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|value| value.to_str().map(str::to_owned))
            .transpose()?;
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok(Reply {
            status,
            set_cookie,
            body,
        })
    }

    /// The `name=value` pair of a `Set-Cookie` header, as a `Cookie` header.
    fn cookie_pair(&self, set_cookie: Option<&str>) -> String {
        let pair = set_cookie
            .expect("a session cookie should be set")
            .split(';')
            .next()
            .expect("cookie should have a name=value pair");
        assert!(pair.starts_with(&format!("{}=", self.cookie_name)));

        pair.to_string()
    }

    /// Opens a session and returns the `Cookie` header value for it.
    async fn visit(&self) -> TestResult<String> {
        let reply = self.send(Method::GET, "/cart", None, None).await?;
        assert_eq!(reply.status, StatusCode::OK);

        Ok(self.cookie_pair(reply.set_cookie.as_deref()))
    }

    /// Registers an account without activating it, returning its id.
    async fn register_inactive(&self, email: &str) -> TestResult<i32> {
        let reply = self
            .send(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "email": email, "password": "correct horse" })),
            )
            .await?;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        assert_eq!(reply.body["data"]["is_active"], false);

        let id = reply.body["data"]["id"]
            .as_i64()
            .expect("registered user should have an id");
        Ok(i32::try_from(id)?)
    }

    async fn activate(&self, user_id: i32, token: &str) -> TestResult<Reply> {
        self.send(
            Method::POST,
            "/auth/activate",
            None,
            Some(json!({ "user_id": user_id, "token": token })),
        )
        .await
    }

    /// Registers and activates an account.
    async fn register(&self, email: &str) -> TestResult {
        let user_id = self.register_inactive(email).await?;
        let token = self
            .store
            .pending_activation(user_id)
            .expect("a new account should await activation");

        let reply = self.activate(user_id, &token).await?;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        Ok(())
    }

    /// Logs in and returns the `Cookie` header value of the rotated session.
    async fn log_in(&self, cookie: &str, email: &str) -> TestResult<String> {
        let reply = self.login(cookie, email).await?;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);

        Ok(self.cookie_pair(reply.set_cookie.as_deref()))
    }

    async fn login(&self, cookie: &str, email: &str) -> TestResult<Reply> {
        self.send(
            Method::POST,
            "/auth/login",
            Some(cookie),
            Some(json!({ "email": email, "password": "correct horse" })),
        )
        .await
    }

    async fn add(&self, cookie: &str, product_id: i32, quantity: Value) -> TestResult<Reply> {
        self.send(
            Method::POST,
            "/cart/items",
            Some(cookie),
            Some(json!({ "product_id": product_id, "quantity": quantity })),
        )
        .await
    }
}

fn quantities(cart: &Value) -> Vec<(i64, i64)> {
    let mut lines: Vec<(i64, i64)> = cart["lines"]
        .as_array()
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| Some((line["product_id"].as_i64()?, line["quantity"].as_i64()?)))
                .collect()
        })
        .unwrap_or_default();
    lines.sort();
    lines
}

#[tokio::test]
async fn first_visit_gets_cookie_and_empty_cart() -> TestResult {
    let app = TestApp::new();

    let reply = app.send(Method::GET, "/cart", None, None).await?;

    assert_eq!(reply.status, StatusCode::OK);
    let set_cookie = reply.set_cookie.expect("session cookie should be set");
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Max-Age=1209600"));
    assert_eq!(reply.body["data"]["owner"], "session");
    assert_eq!(reply.body["data"]["total"], "0.00");
    assert!(quantities(&reply.body["data"]).is_empty());

    Ok(())
}

#[tokio::test]
async fn returning_visitor_keeps_session_and_cart() -> TestResult {
    let app = TestApp::new();
    let cookie = app.visit().await?;

    let first = app.send(Method::GET, "/cart", Some(&cookie), None).await?;
    let second = app.send(Method::GET, "/cart", Some(&cookie), None).await?;

    assert!(first.set_cookie.is_none());
    assert_eq!(first.body["data"]["id"], second.body["data"]["id"]);

    Ok(())
}

#[tokio::test]
async fn unknown_session_key_is_replaced() -> TestResult {
    let app = TestApp::new();
    let forged = format!("{}={}", app.cookie_name, "0123456789abcdef0123456789abcdef");

    let reply = app.send(Method::GET, "/cart", Some(&forged), None).await?;

    let set_cookie = reply.set_cookie.expect("a fresh session should be minted");
    assert!(!set_cookie.contains("0123456789abcdef0123456789abcdef"));

    Ok(())
}

#[tokio::test]
async fn adding_twice_accumulates_one_line() -> TestResult {
    let app = TestApp::new();
    let cookie = app.visit().await?;

    app.add(&cookie, app.coffee.id, json!("2")).await?;
    let reply = app
        .send(
            Method::POST,
            "/cart/items",
            Some(&cookie),
            Some(json!({ "product_id": app.coffee.id })),
        )
        .await?;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        quantities(&reply.body["data"]),
        vec![(i64::from(app.coffee.id), 3)]
    );
    assert_eq!(reply.body["data"]["total"], "36.00");

    Ok(())
}

#[tokio::test]
async fn invalid_cart_input_maps_to_client_errors() -> TestResult {
    let app = TestApp::new();
    let cookie = app.visit().await?;

    let unknown = app.add(&cookie, 9_999, json!(1)).await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let garbage = app.add(&cookie, app.coffee.id, json!("a few")).await?;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);

    let zero = app.add(&cookie, app.coffee.id, json!(0)).await?;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);

    let missing_line = app
        .send(Method::DELETE, "/cart/items/12345", Some(&cookie), None)
        .await?;
    assert_eq!(missing_line.status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn patch_to_zero_removes_the_line() -> TestResult {
    let app = TestApp::new();
    let cookie = app.visit().await?;

    app.add(&cookie, app.coffee.id, json!(1)).await?;
    let added = app.add(&cookie, app.mug.id, json!(2)).await?;
    let mug_line = added.body["data"]["lines"]
        .as_array()
        .and_then(|lines| {
            lines
                .iter()
                .find(|line| line["product_id"].as_i64() == Some(i64::from(app.mug.id)))
        })
        .and_then(|line| line["id"].as_i64())
        .expect("mug line should exist");

    let reply = app
        .send(
            Method::PATCH,
            &format!("/cart/items/{mug_line}"),
            Some(&cookie),
            Some(json!({ "quantity": 0 })),
        )
        .await?;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        quantities(&reply.body["data"]),
        vec![(i64::from(app.coffee.id), 1)]
    );
    assert_eq!(reply.body["data"]["total"], "12.00");

    Ok(())
}

#[tokio::test]
async fn login_merges_anonymous_cart_into_user_cart() -> TestResult {
    let app = TestApp::new();
    app.register("shopper@example.com").await?;

    // an earlier visit left a coffee in the account's cart
    let earlier = app.visit().await?;
    let earlier = app.log_in(&earlier, "shopper@example.com").await?;
    app.add(&earlier, app.coffee.id, json!(3)).await?;
    app.send(Method::POST, "/auth/logout", Some(&earlier), None)
        .await?;

    let cookie = app.visit().await?;
    app.add(&cookie, app.coffee.id, json!(2)).await?;
    app.add(&cookie, app.mug.id, json!(1)).await?;

    let login = app.login(&cookie, "Shopper@EXAMPLE.com").await?;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);

    let login = app.login(&cookie, "shopper@example.com").await?;
    assert_eq!(login.status, StatusCode::OK, "{}", login.body);
    assert_eq!(login.body["data"]["cart_total"], "67.50");
    let cookie = app.cookie_pair(login.set_cookie.as_deref());

    let cart = app.send(Method::GET, "/cart", Some(&cookie), None).await?;
    assert_eq!(cart.body["data"]["owner"], "user");
    assert_eq!(
        quantities(&cart.body["data"]),
        vec![
            (i64::from(app.coffee.id), 5),
            (i64::from(app.mug.id), 1)
        ]
    );

    Ok(())
}

#[tokio::test]
async fn checkout_requires_login_and_empties_cart() -> TestResult {
    let app = TestApp::new();
    app.register("buyer@example.com").await?;
    let cookie = app.visit().await?;
    app.add(&cookie, app.mug.id, json!(2)).await?;

    let anonymous = app.send(Method::POST, "/orders", Some(&cookie), None).await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let cookie = app.log_in(&cookie, "buyer@example.com").await?;
    let placed = app.send(Method::POST, "/orders", Some(&cookie), None).await?;
    assert_eq!(placed.status, StatusCode::CREATED, "{}", placed.body);
    assert_eq!(placed.body["data"]["status"], "processing");
    assert_eq!(placed.body["data"]["total"], "15.00");

    let cart = app.send(Method::GET, "/cart", Some(&cookie), None).await?;
    assert!(quantities(&cart.body["data"]).is_empty());
    assert_eq!(cart.body["data"]["total"], "0.00");

    let history = app.send(Method::GET, "/orders", Some(&cookie), None).await?;
    assert_eq!(history.body["data"].as_array().map(Vec::len), Some(1));

    let empty = app.send(Method::POST, "/orders", Some(&cookie), None).await?;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn logout_expires_cookie_and_forgets_session() -> TestResult {
    let app = TestApp::new();
    app.register("leaver@example.com").await?;
    let cookie = app.visit().await?;
    let cookie = app.log_in(&cookie, "leaver@example.com").await?;

    let me = app.send(Method::GET, "/auth/me", Some(&cookie), None).await?;
    assert_eq!(me.body["data"]["email"], "leaver@example.com");

    let logout = app
        .send(Method::POST, "/auth/logout", Some(&cookie), None)
        .await?;
    assert_eq!(logout.status, StatusCode::OK);
    assert!(
        logout
            .set_cookie
            .is_some_and(|cookie| cookie.contains("Max-Age=0"))
    );

    let after = app.send(Method::GET, "/auth/me", Some(&cookie), None).await?;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    assert!(after.set_cookie.is_some());

    Ok(())
}

#[tokio::test]
async fn catalog_lists_products_by_category() -> TestResult {
    let app = TestApp::new();

    let products = app.send(Method::GET, "/products", None, None).await?;
    assert_eq!(products.status, StatusCode::OK);
    assert_eq!(products.body["data"].as_array().map(Vec::len), Some(2));

    let one = app
        .send(Method::GET, &format!("/products/{}", app.mug.id), None, None)
        .await?;
    assert_eq!(one.body["data"]["price"], "7.50");

    let missing = app.send(Method::GET, "/products/9999", None, None).await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let filtered = app
        .send(
            Method::GET,
            &format!("/products?category_id={}", app.mug.category_id + 100),
            None,
            None,
        )
        .await?;
    assert_eq!(filtered.body["data"].as_array().map(Vec::len), Some(0));

    Ok(())
}

#[tokio::test]
async fn login_rotates_the_session_key() -> TestResult {
    let app = TestApp::new();
    app.register("fixed@example.com").await?;
    let before = app.visit().await?;
    app.add(&before, app.mug.id, json!(1)).await?;

    let after = app.log_in(&before, "fixed@example.com").await?;
    assert_ne!(after, before);

    let me = app.send(Method::GET, "/auth/me", Some(&after), None).await?;
    assert_eq!(me.body["data"]["email"], "fixed@example.com");
    let cart = app.send(Method::GET, "/cart", Some(&after), None).await?;
    assert_eq!(
        quantities(&cart.body["data"]),
        vec![(i64::from(app.mug.id), 1)]
    );

    let old = app.send(Method::GET, "/auth/me", Some(&before), None).await?;
    assert_eq!(old.status, StatusCode::UNAUTHORIZED);
    assert!(old.set_cookie.is_some());

    Ok(())
}

#[tokio::test]
async fn expired_session_is_replaced_with_a_new_one() -> TestResult {
    let app = TestApp::new();
    let cookie = app.visit().await?;
    app.add(&cookie, app.coffee.id, json!(1)).await?;
    let key = cookie
        .split_once('=')
        .and_then(|(_, key)| SessionKey::parse(key))
        .expect("cookie should carry a session key");

    assert!(app.store.expire_session(&key));
    let reply = app.send(Method::GET, "/cart", Some(&cookie), None).await?;

    assert_eq!(reply.status, StatusCode::OK);
    let fresh = app.cookie_pair(reply.set_cookie.as_deref());
    assert_ne!(fresh, cookie);
    assert!(quantities(&reply.body["data"]).is_empty());

    Ok(())
}

#[tokio::test]
async fn login_is_refused_until_the_account_is_activated() -> TestResult {
    let app = TestApp::new();
    let user_id = app.register_inactive("late@example.com").await?;
    let cookie = app.visit().await?;

    let early = app.login(&cookie, "late@example.com").await?;
    assert_eq!(early.status, StatusCode::UNAUTHORIZED);

    let forged = app.activate(user_id, "not-the-token").await?;
    assert_eq!(forged.status, StatusCode::BAD_REQUEST);

    let token = app
        .store
        .pending_activation(user_id)
        .expect("account should await activation");
    let activated = app.activate(user_id, &token).await?;
    assert_eq!(activated.status, StatusCode::OK);
    assert_eq!(activated.body["data"]["is_active"], true);

    let reused = app.activate(user_id, &token).await?;
    assert_eq!(reused.status, StatusCode::BAD_REQUEST);

    app.log_in(&cookie, "late@example.com").await?;

    Ok(())
}
