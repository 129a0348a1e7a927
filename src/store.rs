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

//! Storage contract for the shop.
//!
//! A [`Store`] serves consistent read-only snapshots and opens units of work.
//! A [`UnitOfWork`] is the only way to mutate state:
//!
//! - `lock_*` reads a row and holds an exclusive intent on it until the unit
//!   ends, the equivalent of `SELECT ... FOR UPDATE`;
//! - `put_*` stages an update of a locked row, or the insert of a new one;
//! - [`UnitOfWork::commit`] publishes every staged write at once.
//!
//! Dropping a unit without committing discards everything it staged.
//!
//! # Lock order
//!
//! Callers acquire rows in this order: login code, external-id slot,
//! username slot, account, catalog, product, purchase. Backends may rely on
//! it.

use crate::base::{AccountId, ProductId, PurchaseId};
use crate::{Account, BackendError, LoginCode, Product, Purchase};

/// A transactional backing store.
pub trait Store: Send + Sync {
    /// Unit of work type handed out by [`Store::begin`].
    type Unit<'a>: UnitOfWork
    where
        Self: 'a;

    /// Opens a new unit of work.
    fn begin(&self) -> Self::Unit<'_>;

    fn account(&self, id: &AccountId) -> Result<Option<Account>, BackendError>;

    fn account_by_username(&self, username: &str) -> Result<Option<Account>, BackendError>;

    fn account_by_external_id(&self, provider_id: &str) -> Result<Option<Account>, BackendError>;

    fn accounts(&self) -> Result<Vec<Account>, BackendError>;

    fn product(&self, id: &ProductId) -> Result<Option<Product>, BackendError>;

    fn products(&self) -> Result<Vec<Product>, BackendError>;

    fn purchase(&self, id: &PurchaseId) -> Result<Option<Purchase>, BackendError>;

    /// Every purchase owned by `account`, in no particular order.
    fn purchases_for(&self, account: &AccountId) -> Result<Vec<Purchase>, BackendError>;
}

/// An atomic, isolated sequence of reads and writes.
///
/// # Errors
///
/// Every method may fail with [`BackendError::Contention`] when a row lock is
/// not granted in time. `put_*` fails with [`BackendError::Conflict`] when it
/// would insert a key (id, username, external id or code) that already exists.
pub trait UnitOfWork {
    fn lock_account(&mut self, id: &AccountId) -> Result<Option<Account>, BackendError>;

    fn lock_account_by_username(&mut self, username: &str)
    -> Result<Option<Account>, BackendError>;

    fn lock_account_by_external_id(
        &mut self,
        provider_id: &str,
    ) -> Result<Option<Account>, BackendError>;

    /// Holds the catalog-wide insert lock until the unit ends and reports
    /// whether any product is committed.
    ///
    /// Inserting a new product through [`UnitOfWork::put_product`] takes the
    /// same lock, so the answer stays true for the rest of the unit.
    fn lock_catalog(&mut self) -> Result<bool, BackendError>;

    fn lock_product(&mut self, id: &ProductId) -> Result<Option<Product>, BackendError>;

    fn lock_purchase(&mut self, id: &PurchaseId) -> Result<Option<Purchase>, BackendError>;

    fn lock_login_code(&mut self, code: &str) -> Result<Option<LoginCode>, BackendError>;

    fn put_account(&mut self, account: Account) -> Result<(), BackendError>;

    fn put_product(&mut self, product: Product) -> Result<(), BackendError>;

    fn put_purchase(&mut self, purchase: Purchase) -> Result<(), BackendError>;

    fn put_login_code(&mut self, code: LoginCode) -> Result<(), BackendError>;

    /// Publishes all staged writes and releases the locks.
    fn commit(self) -> Result<(), BackendError>;
}
