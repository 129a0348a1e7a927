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

//! HTTP/JSON surface of the shop.
//!
//! ## Endpoints
//!
//! Shopper (caller identified by the `x-account-id` header):
//!
//! - `GET /products` - List the catalog
//! - `GET /products/{id}` - Get a product
//! - `GET /me` - Get the caller's account
//! - `GET /purchases` - The caller's purchases with product details, newest first
//! - `POST /purchases` - Buy a product: `{"product_id": "..."}`
//! - `POST /auth/login-code` - Redeem a login code: `{"code": "..."}`
//!
//! Admin (caller must be an admin account):
//!
//! - `GET /admin/accounts` - List accounts
//! - `POST /admin/coins` - Adjust a balance: `{"account_id": "...", "amount": -100}`
//! - `PUT /admin/products/{id}/stock` - Set stock: `{"stock": 3}`
//! - `PATCH /admin/purchases/{id}/status` - Set status: `{"status": "cancelled"}`
//!
//! Delivery agent (`x-agent-secret` header when a secret is configured):
//!
//! - `POST /agent/login-codes` - Mint a login code: `{"username": "..."}`
//! - `GET /agent/pending-purchases/{username}` - Purchases awaiting delivery
//! - `POST /agent/deliver` - Confirm delivery: `{"purchase_id": "..."}`
//!
//! Chat bot (`x-admin-secret` header; rejected when no secret is configured):
//!
//! - `POST /bot/coins` - Adjust the balance of the account linked to a
//!   third-party identity: `{"provider_id": "...", "amount": 500}`
//!
//! Resolving the session into `x-account-id` is the job of whatever sits in
//! front of this router.

use crate::product::Category;
use crate::store::Store;
use crate::{
    Account, AccountId, Coins, Engine, Product, ProductId, Purchase, PurchaseId, PurchaseReceipt,
    PurchaseStatus, ShopError,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

/// Header carrying the authenticated caller's account id.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Header carrying the delivery agent's shared secret.
pub const AGENT_SECRET_HEADER: &str = "x-agent-secret";

/// Header carrying the chat bot's shared secret.
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct AdjustCoinsRequest {
    pub account_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub stock: u32,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginCodeRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct DeliverRequest {
    pub purchase_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BotCoinsRequest {
    pub provider_id: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BotCoinsResponse {
    pub username: String,
    pub new_balance: Coins,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Product fields shown next to a purchase.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductSummary {
    pub name: String,
    pub name_en: String,
    pub category: Category,
    pub image: String,
}

/// A purchase joined with its product. `product` is null if the product is
/// gone from the catalog.
#[derive(Debug, Serialize)]
pub struct PurchaseDetails {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub product: Option<ProductSummary>,
}

impl From<&Product> for ProductSummary {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name().to_owned(),
            name_en: product.name_en().to_owned(),
            category: product.category(),
            image: product.image().to_owned(),
        }
    }
}

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the shop engine.
pub struct AppState<S: Store> {
    pub engine: Arc<Engine<S>>,
    pub agent_secret: Option<String>,
    pub admin_secret: Option<String>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            agent_secret: self.agent_secret.clone(),
            admin_secret: self.admin_secret.clone(),
        }
    }
}

// === Error Handling ===

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Shop(ShopError),
    NotLoggedIn,
    Forbidden,
    InvalidAgentSecret,
    InvalidAdminSecret,
    BadRequest(&'static str),
    Internal,
}

impl From<ShopError> for ApiError {
    fn from(err: ShopError) -> Self {
        ApiError::Shop(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Shop(err) => {
                let status = match err {
                    ShopError::AccountNotFound
                    | ShopError::ProductNotFound
                    | ShopError::PurchaseNotFound => StatusCode::NOT_FOUND,
                    ShopError::ProductUnavailable
                    | ShopError::InvalidStatusTransition { .. }
                    | ShopError::UsernameTaken
                    | ShopError::StockTracked => StatusCode::CONFLICT,
                    ShopError::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
                    ShopError::LoginCodeNotFound
                    | ShopError::LoginCodeUsed
                    | ShopError::LoginCodeExpired => StatusCode::UNAUTHORIZED,
                    ShopError::InvalidPrice | ShopError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    ShopError::StorageContention => StatusCode::SERVICE_UNAVAILABLE,
                    ShopError::StorageFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
            ApiError::NotLoggedIn => (
                StatusCode::UNAUTHORIZED,
                "NOT_LOGGED_IN",
                "you need to log in".to_owned(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "not allowed".to_owned(),
            ),
            ApiError::InvalidAgentSecret => (
                StatusCode::UNAUTHORIZED,
                "INVALID_AGENT_SECRET",
                "invalid agent secret".to_owned(),
            ),
            ApiError::InvalidAdminSecret => (
                StatusCode::UNAUTHORIZED,
                "INVALID_ADMIN_SECRET",
                "invalid admin secret".to_owned(),
            ),
            ApiError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                format!("invalid input: {reason}"),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "internal error".to_owned(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_owned(),
            }),
        )
            .into_response()
    }
}

fn parse_id<T: FromStr>(raw: &str, what: &'static str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| ApiError::BadRequest(what))
}

fn caller_id(headers: &HeaderMap) -> Result<AccountId, ApiError> {
    let value = headers.get(ACCOUNT_HEADER).ok_or(ApiError::NotLoggedIn)?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("malformed account id"))?;
    parse_id(value, "malformed account id")
}

fn caller<S: Store>(state: &AppState<S>, headers: &HeaderMap) -> Result<Account, ApiError> {
    let id = caller_id(headers)?;
    state.engine.get_account(&id).map_err(|err| match err {
        ShopError::AccountNotFound => ApiError::NotLoggedIn,
        other => ApiError::Shop(other),
    })
}

fn require_admin<S: Store>(state: &AppState<S>, headers: &HeaderMap) -> Result<Account, ApiError> {
    let account = caller(state, headers)?;
    if !account.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(account)
}

fn require_agent<S: Store>(state: &AppState<S>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = &state.agent_secret else {
        return Ok(());
    };
    let provided = headers
        .get(AGENT_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(secret.as_str()) {
        return Err(ApiError::InvalidAgentSecret);
    }
    Ok(())
}

/// Unlike the agent secret, an unset admin secret closes the bot routes.
fn require_admin_secret<S: Store>(
    state: &AppState<S>,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let provided = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    match (&state.admin_secret, provided) {
        (Some(secret), Some(provided)) if secret == provided => Ok(()),
        _ => Err(ApiError::InvalidAdminSecret),
    }
}

fn with_products<S: Store>(engine: &Engine<S>, purchases: Vec<Purchase>) -> Vec<PurchaseDetails> {
    purchases
        .into_iter()
        .map(|purchase| {
            let product = engine
                .get_product(&purchase.product_id())
                .ok()
                .map(|product| ProductSummary::from(&product));
            PurchaseDetails { purchase, product }
        })
        .collect()
}

/// Runs a mutating engine call off the async workers: it may wait on row
/// locks and sleep between retries.
async fn blocking<S, T>(
    state: &AppState<S>,
    call: impl FnOnce(&Engine<S>) -> Result<T, ShopError> + Send + 'static,
) -> Result<T, ApiError>
where
    S: Store + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    let result = tokio::task::spawn_blocking(move || call(&engine))
        .await
        .map_err(|err| {
            error!(error = %err, "engine task failed");
            ApiError::Internal
        })?;
    result.map_err(|err| {
        if let ShopError::StorageFailure { detail } = &err {
            error!(%detail, "storage failure");
        }
        ApiError::Shop(err)
    })
}

// === Handlers ===

/// GET /products - List the catalog.
async fn list_products<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.engine.list_products()?))
}

/// GET /products/{id} - Get a product.
async fn get_product<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let id: ProductId = parse_id(&id, "malformed product id")?;
    Ok(Json(state.engine.get_product(&id)?))
}

/// GET /me - The caller's account.
async fn me<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Account>, ApiError> {
    Ok(Json(caller(&state, &headers)?))
}

/// GET /purchases - The caller's purchases.
async fn purchase_history<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<PurchaseDetails>>, ApiError> {
    let id = caller_id(&headers)?;
    let history = state.engine.purchase_history(&id)?;
    Ok(Json(with_products(&state.engine, history)))
}

/// POST /purchases - Buy a product.
async fn create_purchase<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseReceipt>, ApiError> {
    let account_id = caller_id(&headers)?;
    let product_id: ProductId = parse_id(&request.product_id, "malformed product id")?;
    let receipt = blocking(&state, move |engine| {
        engine.execute_purchase(account_id, product_id)
    })
    .await?;
    Ok(Json(receipt))
}

/// POST /auth/login-code - Redeem a one-time login code.
async fn redeem_login_code<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<Account>, ApiError> {
    let account = blocking(&state, move |engine| {
        engine.redeem_login_code(&request.code)
    })
    .await?;
    Ok(Json(account))
}

/// GET /admin/accounts - List all accounts.
async fn list_accounts<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Account>>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.engine.list_accounts()?))
}

/// POST /admin/coins - Grant or deduct coins.
async fn adjust_coins<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<AdjustCoinsRequest>,
) -> Result<Json<Account>, ApiError> {
    require_admin(&state, &headers)?;
    let target: AccountId = parse_id(&request.account_id, "malformed account id")?;
    let account = blocking(&state, move |engine| {
        engine.adjust_balance(target, request.amount)
    })
    .await?;
    Ok(Json(account))
}

/// PUT /admin/products/{id}/stock - Set a finite stock counter.
async fn set_stock<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<StockRequest>,
) -> Result<Json<Product>, ApiError> {
    require_admin(&state, &headers)?;
    let id: ProductId = parse_id(&id, "malformed product id")?;
    let product = blocking(&state, move |engine| engine.set_stock(id, request.stock)).await?;
    Ok(Json(product))
}

/// PATCH /admin/purchases/{id}/status - Move a purchase to a new status.
async fn set_purchase_status<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Purchase>, ApiError> {
    require_admin(&state, &headers)?;
    let id: PurchaseId = parse_id(&id, "malformed purchase id")?;
    let status: PurchaseStatus = request.status.parse()?;
    let purchase = blocking(&state, move |engine| {
        engine.update_purchase_status(id, status)
    })
    .await?;
    Ok(Json(purchase))
}

/// POST /agent/login-codes - Mint a login code for an in-game user.
async fn issue_login_code<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<LoginCodeRequest>,
) -> Result<Json<IssuedCode>, ApiError> {
    require_agent(&state, &headers)?;
    let code = blocking(&state, move |engine| {
        engine.issue_login_code(&request.username)
    })
    .await?;
    Ok(Json(IssuedCode {
        code: code.code().to_owned(),
        expires_at: code.expires_at(),
    }))
}

/// GET /agent/pending-purchases/{username} - Purchases awaiting delivery.
async fn pending_purchases<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<Json<Vec<PurchaseDetails>>, ApiError> {
    require_agent(&state, &headers)?;
    let pending = state.engine.pending_purchases(&username)?;
    Ok(Json(with_products(&state.engine, pending)))
}

/// POST /agent/deliver - Confirm in-game delivery. Idempotent.
async fn deliver<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<DeliverRequest>,
) -> Result<Json<Purchase>, ApiError> {
    require_agent(&state, &headers)?;
    let id: PurchaseId = parse_id(&request.purchase_id, "malformed purchase id")?;
    let purchase = blocking(&state, move |engine| engine.mark_delivered(id)).await?;
    Ok(Json(purchase))
}

/// POST /bot/coins - Adjust coins of the account linked to a third-party identity.
async fn bot_adjust_coins<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<BotCoinsRequest>,
) -> Result<Json<BotCoinsResponse>, ApiError> {
    require_admin_secret(&state, &headers)?;
    let account = blocking(&state, move |engine| {
        engine.adjust_balance_by_external_id(&request.provider_id, request.amount)
    })
    .await?;
    Ok(Json(BotCoinsResponse {
        username: account.username().to_owned(),
        new_balance: account.coins(),
    }))
}

// === Router ===

pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/products", get(list_products::<S>))
        .route("/products/{id}", get(get_product::<S>))
        .route("/me", get(me::<S>))
        .route(
            "/purchases",
            get(purchase_history::<S>).post(create_purchase::<S>),
        )
        .route("/auth/login-code", post(redeem_login_code::<S>))
        .route("/admin/accounts", get(list_accounts::<S>))
        .route("/admin/coins", post(adjust_coins::<S>))
        .route("/admin/products/{id}/stock", put(set_stock::<S>))
        .route("/admin/purchases/{id}/status", patch(set_purchase_status::<S>))
        .route("/agent/login-codes", post(issue_login_code::<S>))
        .route(
            "/agent/pending-purchases/{username}",
            get(pending_purchases::<S>),
        )
        .route("/agent/deliver", post(deliver::<S>))
        .route("/bot/coins", post(bot_adjust_coins::<S>))
        .with_state(state)
}
