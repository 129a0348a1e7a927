// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the HTTP API, including concurrent purchases.

use coin_shop_rs::api::{
    ACCOUNT_HEADER, ADMIN_SECRET_HEADER, AGENT_SECRET_HEADER, AppState, ErrorResponse, router,
};
use coin_shop_rs::{Account, Category, Engine, ExternalIdentity, NewProduct, Product, Role};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

const AGENT_SECRET: &str = "s3cret";
const ADMIN_SECRET: &str = "b0t-s3cret";

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    engine: Arc<Engine>,
}

impl TestServer {
    async fn new() -> Self {
        Self::start(Some(ADMIN_SECRET.to_owned())).await
    }

    async fn start(admin_secret: Option<String>) -> Self {
        let engine = Arc::new(Engine::new());
        let state = AppState {
            engine: engine.clone(),
            agent_secret: Some(AGENT_SECRET.to_owned()),
            admin_secret,
        };

        let app = router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready by polling with retries
        let client = Client::new();
        let health_url = format!("{}/products", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer { base_url, engine }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn player(&self, username: &str, coins: i64) -> Account {
        let account = self.engine.create_account(username, Role::Player).unwrap();
        self.engine.adjust_balance(account.id(), coins).unwrap()
    }

    fn admin(&self, username: &str) -> Account {
        self.engine.create_account(username, Role::Admin).unwrap()
    }

    fn product(&self, price: u64, stock: Option<u32>) -> Product {
        self.engine
            .add_product(NewProduct {
                name: "سيارة".into(),
                name_en: "Car".into(),
                description: String::new(),
                category: Category::Vehicles,
                price,
                image: "/img/car.png".into(),
                stock,
                is_new: true,
                is_featured: false,
            })
            .unwrap()
    }
}

async fn error_code(response: reqwest::Response) -> String {
    response.json::<ErrorResponse>().await.unwrap().code
}

// === Catalog ===

#[tokio::test]
async fn catalog_lists_and_gets_products() {
    let server = TestServer::new().await;
    let client = Client::new();
    let car = server.product(500, Some(2));

    let products: Vec<Value> = client
        .get(server.url("/products"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["name_en"], "Car");
    assert_eq!(products[0]["category"], "vehicles");
    assert_eq!(products[0]["in_stock"], true);

    let response = client
        .get(server.url(&format!("/products/{}", car.id())))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let product: Value = response.json().await.unwrap();
    assert_eq!(product["price"], 500);
    assert_eq!(product["stock"], 2);

    let response = client
        .get(server.url("/products/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "INVALID_INPUT");
}

// === Purchases ===

#[tokio::test]
async fn purchase_flow() {
    let server = TestServer::new().await;
    let client = Client::new();
    let player = server.player("alice", 1000);
    let car = server.product(800, Some(1));

    let response = client
        .post(server.url("/purchases"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .json(&json!({ "product_id": car.id().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let receipt: Value = response.json().await.unwrap();
    assert_eq!(receipt["account"]["coins"], 200);
    assert_eq!(receipt["purchase"]["status"], "pending");
    assert_eq!(receipt["purchase"]["price"], 800);

    let me: Value = client
        .get(server.url("/me"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["coins"], 200);
    assert_eq!(me["role"], "player");

    let history: Vec<Value> = client
        .get(server.url("/purchases"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], receipt["purchase"]["id"]);
    assert_eq!(history[0]["product"]["name_en"], "Car");
    assert_eq!(history[0]["product"]["category"], "vehicles");
    assert_eq!(history[0]["product"]["image"], "/img/car.png");

    // The only unit is gone.
    let response = client
        .post(server.url("/purchases"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .json(&json!({ "product_id": car.id().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "PRODUCT_UNAVAILABLE");
}

#[tokio::test]
async fn purchase_rejections() {
    let server = TestServer::new().await;
    let client = Client::new();
    let player = server.player("alice", 100);
    let car = server.product(800, None);
    let body = json!({ "product_id": car.id().to_string() });

    let response = client
        .post(server.url("/purchases"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "NOT_LOGGED_IN");

    let response = client
        .post(server.url("/purchases"))
        .header(ACCOUNT_HEADER, "garbage")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(server.url("/purchases"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error = response.json::<ErrorResponse>().await.unwrap();
    assert_eq!(error.code, "INSUFFICIENT_FUNDS");
    assert_eq!(error.error, "not enough coins");

    let response = client
        .post(server.url("/purchases"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .json(&json!({ "product_id": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(server.engine.get_account(&player.id()).unwrap().coins(), 100);
}

// === Admin ===

#[tokio::test]
async fn admin_routes_require_admin() {
    let server = TestServer::new().await;
    let client = Client::new();
    let player = server.player("alice", 0);
    let admin = server.admin("root");

    let response = client
        .get(server.url("/admin/accounts"))
        .header(ACCOUNT_HEADER, player.id().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .post(server.url("/admin/coins"))
        .header(ACCOUNT_HEADER, admin.id().to_string())
        .json(&json!({ "account_id": player.id().to_string(), "amount": 750 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let account: Value = response.json().await.unwrap();
    assert_eq!(account["coins"], 750);

    let accounts: Vec<Value> = client
        .get(server.url("/admin/accounts"))
        .header(ACCOUNT_HEADER, admin.id().to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(accounts.len(), 2);
}

#[tokio::test]
async fn admin_manages_stock_and_status() {
    let server = TestServer::new().await;
    let client = Client::new();
    let admin = server.admin("root");
    let player = server.player("alice", 1000);
    let car = server.product(100, Some(0));

    let response = client
        .put(server.url(&format!("/admin/products/{}/stock", car.id())))
        .header(ACCOUNT_HEADER, admin.id().to_string())
        .json(&json!({ "stock": 4 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let product: Value = response.json().await.unwrap();
    assert_eq!(product["stock"], 4);
    assert_eq!(product["in_stock"], true);

    let receipt = server
        .engine
        .execute_purchase(player.id(), car.id())
        .unwrap();
    let status_url = server.url(&format!("/admin/purchases/{}/status", receipt.purchase.id()));

    let response = client
        .patch(&status_url)
        .header(ACCOUNT_HEADER, admin.id().to_string())
        .json(&json!({ "status": "cancelled" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .patch(&status_url)
        .header(ACCOUNT_HEADER, admin.id().to_string())
        .json(&json!({ "status": "delivered" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "INVALID_STATUS_TRANSITION");

    let response = client
        .patch(&status_url)
        .header(ACCOUNT_HEADER, admin.id().to_string())
        .json(&json!({ "status": "lost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// === Delivery agent ===

#[tokio::test]
async fn agent_login_code_and_delivery() {
    let server = TestServer::new().await;
    let client = Client::new();

    let response = client
        .post(server.url("/agent/login-codes"))
        .json(&json!({ "username": "newcomer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "INVALID_AGENT_SECRET");

    let issued: Value = client
        .post(server.url("/agent/login-codes"))
        .header(AGENT_SECRET_HEADER, AGENT_SECRET)
        .json(&json!({ "username": "newcomer" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = issued["code"].as_str().unwrap().to_owned();

    let response = client
        .post(server.url("/auth/login-code"))
        .json(&json!({ "code": code }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let account: Value = response.json().await.unwrap();
    assert_eq!(account["username"], "newcomer");

    let response = client
        .post(server.url("/auth/login-code"))
        .json(&json!({ "code": code }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "LOGIN_CODE_USED");

    let newcomer = server.engine.get_account_by_username("newcomer").unwrap();
    server.engine.adjust_balance(newcomer.id(), 500).unwrap();
    let car = server.product(300, None);
    let receipt = server
        .engine
        .execute_purchase(newcomer.id(), car.id())
        .unwrap();

    let pending: Vec<Value> = client
        .get(server.url("/agent/pending-purchases/newcomer"))
        .header(AGENT_SECRET_HEADER, AGENT_SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], receipt.purchase.id().to_string());
    assert_eq!(pending[0]["product"]["name_en"], "Car");

    for _ in 0..2 {
        let response = client
            .post(server.url("/agent/deliver"))
            .header(AGENT_SECRET_HEADER, AGENT_SECRET)
            .json(&json!({ "purchase_id": receipt.purchase.id().to_string() }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let purchase: Value = response.json().await.unwrap();
        assert_eq!(purchase["status"], "delivered");
    }

    assert!(server.engine.pending_purchases("newcomer").unwrap().is_empty());
}

// === Chat bot ===

#[tokio::test]
async fn bot_adjusts_coins_by_external_id() {
    let server = TestServer::new().await;
    let client = Client::new();
    let identity = ExternalIdentity {
        provider_id: "81234".into(),
        handle: "alice#0001".into(),
        avatar: None,
    };
    let alice = server.engine.sign_in_external(identity, "alice").unwrap();

    for secret in [None, Some("wrong")] {
        let mut request = client.post(server.url("/bot/coins"));
        if let Some(secret) = secret {
            request = request.header(ADMIN_SECRET_HEADER, secret);
        }
        let response = request
            .json(&json!({ "provider_id": "81234", "amount": 500 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "INVALID_ADMIN_SECRET");
    }

    let response = client
        .post(server.url("/bot/coins"))
        .header(ADMIN_SECRET_HEADER, ADMIN_SECRET)
        .json(&json!({ "provider_id": "81234", "amount": 500 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(body["new_balance"], 500);

    let body: Value = client
        .post(server.url("/bot/coins"))
        .header(ADMIN_SECRET_HEADER, ADMIN_SECRET)
        .json(&json!({ "provider_id": "81234", "amount": -900 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["new_balance"], 0);
    assert_eq!(server.engine.get_account(&alice.id()).unwrap().coins(), 0);

    let response = client
        .post(server.url("/bot/coins"))
        .header(ADMIN_SECRET_HEADER, ADMIN_SECRET)
        .json(&json!({ "provider_id": "404", "amount": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "ACCOUNT_NOT_FOUND");
}

#[tokio::test]
async fn bot_route_closed_without_admin_secret() {
    let server = TestServer::start(None).await;
    let client = Client::new();

    let response = client
        .post(server.url("/bot/coins"))
        .header(ADMIN_SECRET_HEADER, "")
        .json(&json!({ "provider_id": "81234", "amount": 500 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "INVALID_ADMIN_SECRET");
}

// === Concurrency ===

/// Concurrent purchases over HTTP for a scarce product: exactly `stock`
/// requests succeed and every loser gets a clean rejection.
#[tokio::test]
async fn concurrent_purchases_do_not_oversell() {
    let server = TestServer::new().await;
    let client = Client::new();

    const BUYERS: usize = 40;
    const STOCK: u32 = 10;

    let car = server.product(100, Some(STOCK));
    let buyers: Vec<Account> = (0..BUYERS)
        .map(|i| server.player(&format!("buyer{i}"), 1000))
        .collect();

    let start = Instant::now();
    let mut handles = Vec::with_capacity(BUYERS);
    for buyer in &buyers {
        let client = client.clone();
        let url = server.url("/purchases");
        let account = buyer.id().to_string();
        let body = json!({ "product_id": car.id().to_string() });

        handles.push(tokio::spawn(async move {
            client
                .post(&url)
                .header(ACCOUNT_HEADER, account)
                .json(&body)
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    let statuses: Vec<StatusCode> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    println!("Processed {} purchases in {:?}", BUYERS, start.elapsed());

    let admitted = statuses.iter().filter(|s| s.is_success()).count();
    assert_eq!(admitted, STOCK as usize);
    assert!(
        statuses
            .iter()
            .filter(|s| !s.is_success())
            .all(|s| *s == StatusCode::CONFLICT)
    );
    assert_eq!(
        server.engine.get_product(&car.id()).unwrap().stock(),
        Some(0)
    );

    let spent: u64 = buyers
        .iter()
        .map(|b| 1000 - server.engine.get_account(&b.id()).unwrap().coins())
        .sum();
    assert_eq!(spent, 100 * STOCK as u64);
}

/// Many purchases against one account: balance never overdrawn.
#[tokio::test]
async fn concurrent_purchases_do_not_double_spend() {
    let server = TestServer::new().await;
    let client = Client::new();
    let player = server.player("alice", 1000);
    let car = server.product(300, None);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let client = client.clone();
            let url = server.url("/purchases");
            let account = player.id().to_string();
            let body = json!({ "product_id": car.id().to_string() });
            tokio::spawn(async move {
                client
                    .post(&url)
                    .header(ACCOUNT_HEADER, account)
                    .json(&body)
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let statuses: Vec<StatusCode> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(statuses.iter().filter(|s| s.is_success()).count(), 3);
    assert_eq!(server.engine.get_account(&player.id()).unwrap().coins(), 100);
}
