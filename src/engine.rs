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

//! Shop engine.
//!
//! The [`Engine`] is the central component: it owns a [`Store`] and runs every
//! state change as one unit of work on it.
//!
//! # Purchases
//!
//! [`Engine::execute_purchase`] locks the account row, then the product row,
//! and admits the purchase only if, in order:
//!
//! 1. the account exists ([`ShopError::AccountNotFound`]),
//! 2. the product exists ([`ShopError::ProductNotFound`]),
//! 3. the product is flagged available ([`ShopError::ProductUnavailable`]),
//! 4. the balance covers the price ([`ShopError::InsufficientFunds`]),
//! 5. finite stock is not exhausted ([`ShopError::ProductUnavailable`]).
//!
//! An admitted purchase inserts a pending [`Purchase`] at the current price,
//! debits the balance and takes one unit of stock, all in the same commit.
//! A rejected or failed attempt leaves the store untouched.
//!
//! # Contention
//!
//! Row locks are bounded by the store's lock timeout. Contention and key
//! conflicts are retried according to [`RetryPolicy`](crate::RetryPolicy);
//! business rejections never are.

use crate::account::ExternalIdentity;
use crate::base::{AccountId, Coins, ProductId, PurchaseId};
use crate::memory::MemoryStore;
use crate::product::NewProduct;
use crate::purchase::PurchaseStatus;
use crate::store::{Store, UnitOfWork};
use crate::{Account, EngineConfig, LoginCode, Product, Purchase, Role, ShopError};
use chrono::Utc;
use serde::Serialize;
use std::thread;
use tracing::{debug, error, info, warn};

/// Result of an admitted purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    /// Account with the debited balance.
    pub account: Account,
    /// The new pending purchase.
    pub purchase: Purchase,
}

/// Shop engine over a transactional store.
///
/// # Invariants
///
/// - Balances never go below zero; the debit is refused, not repaired.
/// - Finite stock never goes below zero, and a product with zero stock is
///   flagged unavailable.
/// - A purchase exists if and only if its debit and stock decrement happened.
/// - Purchase status only moves `Pending` -> `Delivered` or `Cancelled`.
/// - A login code is redeemed at most once.
pub struct Engine<S: Store = MemoryStore> {
    store: S,
    config: EngineConfig,
}

impl Engine<MemoryStore> {
    /// Creates an engine over an empty in-memory store with default settings.
    pub fn new() -> Self {
        Self::in_memory(EngineConfig::default())
    }

    /// Creates an engine over an empty in-memory store.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_store(MemoryStore::new(config.lock_timeout), config)
    }
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Engine<S> {
    pub fn with_store(store: S, config: EngineConfig) -> Self {
        Engine { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // === Purchases ===

    /// Buys one unit of `product_id` for `account_id`.
    ///
    /// # Errors
    ///
    /// - [`ShopError::AccountNotFound`] - No such account.
    /// - [`ShopError::ProductNotFound`] - No such product.
    /// - [`ShopError::ProductUnavailable`] - Product flagged unavailable or out of stock.
    /// - [`ShopError::InsufficientFunds`] - Balance is below the price.
    /// - [`ShopError::StorageContention`] - Rows stayed locked through every retry.
    /// - [`ShopError::StorageFailure`] - The store failed; nothing was applied.
    pub fn execute_purchase(
        &self,
        account_id: AccountId,
        product_id: ProductId,
    ) -> Result<PurchaseReceipt, ShopError> {
        let receipt = self.with_retry("purchase", || {
            let mut unit = self.store.begin();

            let mut account = unit
                .lock_account(&account_id)?
                .ok_or(ShopError::AccountNotFound)?;
            let mut product = unit
                .lock_product(&product_id)?
                .ok_or(ShopError::ProductNotFound)?;

            if !product.in_stock() {
                return Err(ShopError::ProductUnavailable);
            }
            let price = product.price();
            if account.coins() < price {
                return Err(ShopError::InsufficientFunds);
            }
            if product.stock() == Some(0) {
                return Err(ShopError::ProductUnavailable);
            }

            let purchase = Purchase::new(account_id, product_id, price);
            unit.put_purchase(purchase.clone())?;

            account.debit(price)?;
            unit.put_account(account.clone())?;

            product.take_one()?;
            unit.put_product(product)?;

            unit.commit()?;
            Ok(PurchaseReceipt { account, purchase })
        })?;

        info!(
            account = %account_id,
            product = %product_id,
            purchase = %receipt.purchase.id(),
            price = receipt.purchase.price(),
            balance = receipt.account.coins(),
            "purchase admitted"
        );
        Ok(receipt)
    }

    pub fn get_purchase(&self, id: &PurchaseId) -> Result<Purchase, ShopError> {
        self.store.purchase(id)?.ok_or(ShopError::PurchaseNotFound)
    }

    /// Purchases of an account, newest first.
    pub fn purchase_history(&self, account_id: &AccountId) -> Result<Vec<Purchase>, ShopError> {
        if self.store.account(account_id)?.is_none() {
            return Err(ShopError::AccountNotFound);
        }
        let mut purchases = self.store.purchases_for(account_id)?;
        purchases.sort_by_key(|purchase| std::cmp::Reverse(purchase.created_at()));
        Ok(purchases)
    }

    /// Pending purchases of the account named `username`, newest first.
    ///
    /// An unknown username has nothing to deliver and yields an empty list.
    pub fn pending_purchases(&self, username: &str) -> Result<Vec<Purchase>, ShopError> {
        let Some(account) = self.store.account_by_username(username)? else {
            return Ok(Vec::new());
        };
        let mut pending: Vec<Purchase> = self
            .store
            .purchases_for(&account.id())?
            .into_iter()
            .filter(|purchase| purchase.status() == PurchaseStatus::Pending)
            .collect();
        pending.sort_by_key(|purchase| std::cmp::Reverse(purchase.created_at()));
        Ok(pending)
    }

    /// Moves a purchase to `status`. Repeating the current status is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ShopError::PurchaseNotFound`] - No such purchase.
    /// - [`ShopError::InvalidStatusTransition`] - The purchase is already delivered or cancelled.
    pub fn update_purchase_status(
        &self,
        id: PurchaseId,
        status: PurchaseStatus,
    ) -> Result<Purchase, ShopError> {
        self.with_retry("update_purchase_status", || {
            let mut unit = self.store.begin();
            let mut purchase = unit
                .lock_purchase(&id)?
                .ok_or(ShopError::PurchaseNotFound)?;
            if purchase.set_status(status)? {
                unit.put_purchase(purchase.clone())?;
                unit.commit()?;
                info!(purchase = %id, %status, "purchase status updated");
            }
            Ok(purchase)
        })
    }

    /// Confirms in-game delivery. Idempotent.
    pub fn mark_delivered(&self, id: PurchaseId) -> Result<Purchase, ShopError> {
        self.update_purchase_status(id, PurchaseStatus::Delivered)
    }

    /// Cancels a pending purchase. Refunds are a separate balance adjustment.
    pub fn cancel_purchase(&self, id: PurchaseId) -> Result<Purchase, ShopError> {
        self.update_purchase_status(id, PurchaseStatus::Cancelled)
    }

    // === Accounts ===

    pub fn get_account(&self, id: &AccountId) -> Result<Account, ShopError> {
        self.store.account(id)?.ok_or(ShopError::AccountNotFound)
    }

    pub fn get_account_by_username(&self, username: &str) -> Result<Account, ShopError> {
        self.store
            .account_by_username(username)?
            .ok_or(ShopError::AccountNotFound)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, ShopError> {
        Ok(self.store.accounts()?)
    }

    /// Creates an account with a zero balance.
    ///
    /// # Errors
    ///
    /// - [`ShopError::InvalidInput`] - Blank username.
    /// - [`ShopError::UsernameTaken`] - Another account has this username.
    pub fn create_account(&self, username: &str, role: Role) -> Result<Account, ShopError> {
        let username = valid_username(username)?;
        let account = self.with_retry("create_account", || {
            let mut unit = self.store.begin();
            if unit.lock_account_by_username(username)?.is_some() {
                return Err(ShopError::UsernameTaken);
            }
            let account = Account::new(username, role);
            unit.put_account(account.clone())?;
            unit.commit()?;
            Ok(account)
        })?;
        info!(account = %account.id(), username, ?role, "account created");
        Ok(account)
    }

    /// Grants (`delta > 0`) or deducts (`delta < 0`) coins, flooring at zero.
    ///
    /// This is a privileged override: it skips every purchase check.
    pub fn adjust_balance(&self, id: AccountId, delta: i64) -> Result<Account, ShopError> {
        let account = self.with_retry("adjust_balance", || {
            let mut unit = self.store.begin();
            let mut account = unit.lock_account(&id)?.ok_or(ShopError::AccountNotFound)?;
            account.adjust(delta);
            unit.put_account(account.clone())?;
            unit.commit()?;
            Ok(account)
        })?;
        info!(account = %id, delta, balance = account.coins(), "balance adjusted");
        Ok(account)
    }

    /// Same as [`Engine::adjust_balance`], addressing the account by the id
    /// its third-party identity provider assigned.
    ///
    /// # Errors
    ///
    /// - [`ShopError::InvalidInput`] - Blank provider id.
    /// - [`ShopError::AccountNotFound`] - No account is linked to `provider_id`.
    pub fn adjust_balance_by_external_id(
        &self,
        provider_id: &str,
        delta: i64,
    ) -> Result<Account, ShopError> {
        let provider_id = provider_id.trim();
        if provider_id.is_empty() {
            return Err(ShopError::InvalidInput("empty provider id"));
        }
        let account = self.with_retry("adjust_balance_by_external_id", || {
            let mut unit = self.store.begin();
            let mut account = unit
                .lock_account_by_external_id(provider_id)?
                .ok_or(ShopError::AccountNotFound)?;
            account.adjust(delta);
            unit.put_account(account.clone())?;
            unit.commit()?;
            Ok(account)
        })?;
        info!(
            account = %account.id(),
            provider_id,
            delta,
            balance = account.coins(),
            "balance adjusted"
        );
        Ok(account)
    }

    /// Resolves the account linked to a third-party identity, creating it on
    /// first sign-in.
    ///
    /// # Errors
    ///
    /// - [`ShopError::InvalidInput`] - Blank username or provider id.
    /// - [`ShopError::UsernameTaken`] - New identity, but `username` belongs to someone else.
    pub fn sign_in_external(
        &self,
        identity: ExternalIdentity,
        username: &str,
    ) -> Result<Account, ShopError> {
        if identity.provider_id.trim().is_empty() {
            return Err(ShopError::InvalidInput("empty provider id"));
        }
        let username = valid_username(username)?;
        self.with_retry("sign_in_external", || {
            let mut unit = self.store.begin();
            if let Some(account) = unit.lock_account_by_external_id(&identity.provider_id)? {
                return Ok(account);
            }
            if unit.lock_account_by_username(username)?.is_some() {
                return Err(ShopError::UsernameTaken);
            }
            let account = Account::with_external(username, identity.clone());
            unit.put_account(account.clone())?;
            unit.commit()?;
            info!(account = %account.id(), username, "account linked to external identity");
            Ok(account)
        })
    }

    // === Catalog ===

    pub fn list_products(&self) -> Result<Vec<Product>, ShopError> {
        Ok(self.store.products()?)
    }

    pub fn get_product(&self, id: &ProductId) -> Result<Product, ShopError> {
        self.store.product(id)?.ok_or(ShopError::ProductNotFound)
    }

    /// Adds a product to the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidPrice`] for a zero price.
    pub fn add_product(&self, new: NewProduct) -> Result<Product, ShopError> {
        let product = Product::new(new)?;
        self.with_retry("add_product", || {
            let mut unit = self.store.begin();
            unit.put_product(product.clone())?;
            unit.commit()?;
            Ok(())
        })?;
        debug!(product = %product.id(), name = product.name_en(), "product added");
        Ok(product)
    }

    /// Inserts `products` if the catalog is empty. Returns how many were added.
    ///
    /// Emptiness is decided under the catalog lock, so concurrent seeders
    /// fill the catalog once.
    pub fn seed_catalog(&self, products: Vec<NewProduct>) -> Result<usize, ShopError> {
        let products = products
            .into_iter()
            .map(Product::new)
            .collect::<Result<Vec<_>, _>>()?;
        let added = self.with_retry("seed_catalog", || {
            let mut unit = self.store.begin();
            if unit.lock_catalog()? {
                return Ok(0);
            }
            for product in &products {
                unit.put_product(product.clone())?;
            }
            unit.commit()?;
            Ok(products.len())
        })?;
        if added == 0 {
            debug!("catalog already seeded");
        } else {
            info!(count = added, "catalog seeded");
        }
        Ok(added)
    }

    /// Sets a finite stock counter; availability becomes `stock > 0`.
    pub fn set_stock(&self, id: ProductId, stock: u32) -> Result<Product, ShopError> {
        self.update_product("set_stock", id, |product| {
            product.set_stock(stock);
            Ok(())
        })
    }

    /// Changes the list price. Existing purchases keep the price they paid.
    pub fn set_price(&self, id: ProductId, price: Coins) -> Result<Product, ShopError> {
        self.update_product("set_price", id, |product| product.set_price(price))
    }

    /// Toggles availability of an unlimited-stock product.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::StockTracked`] if the product tracks stock.
    pub fn set_availability(&self, id: ProductId, available: bool) -> Result<Product, ShopError> {
        self.update_product("set_availability", id, |product| {
            product.set_available(available)
        })
    }

    fn update_product(
        &self,
        operation: &'static str,
        id: ProductId,
        change: impl Fn(&mut Product) -> Result<(), ShopError>,
    ) -> Result<Product, ShopError> {
        let product = self.with_retry(operation, || {
            let mut unit = self.store.begin();
            let mut product = unit.lock_product(&id)?.ok_or(ShopError::ProductNotFound)?;
            change(&mut product)?;
            unit.put_product(product.clone())?;
            unit.commit()?;
            Ok(product)
        })?;
        info!(
            operation,
            product = %id,
            price = product.price(),
            stock = ?product.stock(),
            in_stock = product.in_stock(),
            "product updated"
        );
        Ok(product)
    }

    // === Login codes ===

    /// Mints a fresh login code for `username`, valid for the configured TTL.
    pub fn issue_login_code(&self, username: &str) -> Result<LoginCode, ShopError> {
        let username = valid_username(username)?;
        let ttl = chrono::Duration::from_std(self.config.login_code_ttl)
            .map_err(|_| ShopError::InvalidInput("login code ttl out of range"))?;
        // A colliding code surfaces as a conflict and the retry mints another.
        let code = self.with_retry("issue_login_code", || {
            let mut unit = self.store.begin();
            let code = LoginCode::mint(username, ttl);
            unit.put_login_code(code.clone())?;
            unit.commit()?;
            Ok(code)
        })?;
        info!(username, expires_at = %code.expires_at(), "login code issued");
        Ok(code)
    }

    /// Stores a code minted elsewhere.
    pub fn register_login_code(&self, code: LoginCode) -> Result<LoginCode, ShopError> {
        if code.code().trim().is_empty() {
            return Err(ShopError::InvalidInput("empty login code"));
        }
        valid_username(code.username())?;
        self.with_retry("register_login_code", || {
            let mut unit = self.store.begin();
            if unit.lock_login_code(code.code())?.is_some() {
                return Err(ShopError::InvalidInput("login code already exists"));
            }
            unit.put_login_code(code.clone())?;
            unit.commit()?;
            Ok(code.clone())
        })
    }

    /// Redeems a login code and returns the account it logs into, creating
    /// the account on first login.
    ///
    /// # Errors
    ///
    /// - [`ShopError::LoginCodeNotFound`] - Unknown code.
    /// - [`ShopError::LoginCodeUsed`] - Already redeemed.
    /// - [`ShopError::LoginCodeExpired`] - Past its expiry.
    pub fn redeem_login_code(&self, code: &str) -> Result<Account, ShopError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ShopError::InvalidInput("empty login code"));
        }
        let account = self.with_retry("redeem_login_code", || {
            let mut unit = self.store.begin();
            let mut login = unit
                .lock_login_code(code)?
                .ok_or(ShopError::LoginCodeNotFound)?;
            login.check(Utc::now())?;

            let account = match unit.lock_account_by_username(login.username())? {
                Some(account) => account,
                None => {
                    let account = Account::new(login.username(), Role::Player);
                    unit.put_account(account.clone())?;
                    account
                }
            };

            login.consume(account.id());
            unit.put_login_code(login)?;
            unit.commit()?;
            Ok(account)
        })?;
        info!(account = %account.id(), username = account.username(), "login code redeemed");
        Ok(account)
    }

    /// Runs `attempt` until it succeeds, fails for good, or the retry budget
    /// is spent.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> Result<T, ShopError>,
    ) -> Result<T, ShopError> {
        let policy = self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt() {
                Err(err) if err.is_retriable() && tries < max_attempts => {
                    let delay = policy.backoff(tries);
                    debug!(operation, attempt = tries, ?delay, "storage contention, retrying");
                    thread::sleep(delay);
                    tries += 1;
                }
                Err(err) => {
                    match &err {
                        ShopError::StorageContention => {
                            warn!(operation, attempts = tries, "retry budget exhausted")
                        }
                        ShopError::StorageFailure { detail } => {
                            error!(operation, detail = %detail, "storage failure")
                        }
                        rejection => debug!(operation, reason = %rejection, "rejected"),
                    }
                    return Err(err);
                }
                result => return result,
            }
        }
    }
}

fn valid_username(username: &str) -> Result<&str, ShopError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ShopError::InvalidInput("empty username"));
    }
    Ok(username)
}
