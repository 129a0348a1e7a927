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

//! In-memory [`Store`] backend.
//!
//! Every table is a [`DashMap`] of rows. A row carries two locks:
//!
//! - an *intent* mutex, held by at most one unit of work from its `lock_*`
//!   or `put_*` call until the unit commits or is dropped;
//! - the committed value behind a [`RwLock`], read by snapshots without
//!   waiting for intents and written only while the intent is held.
//!
//! Units stage their writes privately and publish them in
//! [`UnitOfWork::commit`] before releasing any intent, so a unit that is
//! dropped early (error, panic, timeout) leaves no trace.
//!
//! Inserts reserve the key by creating a vacant row and taking its intent.
//! A second inserter waits on that intent and then sees the key taken. A
//! reservation that is never published is removed when its unit ends, unless
//! another unit is already waiting on it.
//!
//! Rows are numbered as they are reserved; listings follow that order.
//! A store-wide catalog mutex serializes product inserts.

use crate::base::{AccountId, ProductId, PurchaseId};
use crate::store::{Store, UnitOfWork};
use crate::{Account, BackendError, LoginCode, Product, Purchase};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

type Intent = ArcMutexGuard<RawMutex, ()>;

#[derive(Debug)]
struct Row<V> {
    seq: u64,
    intent: Arc<Mutex<()>>,
    value: RwLock<Option<V>>,
}

fn acquire(intent: &Arc<Mutex<()>>, timeout: Duration) -> Result<Intent, BackendError> {
    intent
        .try_lock_arc_for(timeout)
        .ok_or(BackendError::Contention)
}

impl<V> Row<V> {
    fn vacant(seq: u64) -> Self {
        Self {
            seq,
            intent: Arc::new(Mutex::new(())),
            value: RwLock::new(None),
        }
    }

    fn acquire(&self, timeout: Duration) -> Result<Intent, BackendError> {
        acquire(&self.intent, timeout)
    }
}

#[derive(Debug)]
struct Table<K: Eq + Hash, V> {
    rows: DashMap<K, Arc<Row<V>>>,
    next_seq: AtomicU64,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Clones the row handle out so no shard lock is held while waiting on it.
    fn row<Q>(&self, key: &Q) -> Option<Arc<Row<V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rows.get(key).map(|row| Arc::clone(row.value()))
    }

    fn reserve(&self, key: K) -> Arc<Row<V>> {
        let row = self.rows.entry(key).or_insert_with(|| {
            Arc::new(Row::vacant(self.next_seq.fetch_add(1, Ordering::Relaxed)))
        });
        Arc::clone(row.value())
    }

    fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.row(key)?.value.read().clone()
    }

    /// Committed values in reservation order.
    fn values(&self) -> Vec<V> {
        let mut rows: Vec<Arc<Row<V>>> =
            self.rows.iter().map(|row| Arc::clone(row.value())).collect();
        rows.sort_by_key(|row| row.seq);
        rows.iter().filter_map(|row| row.value.read().clone()).collect()
    }

    fn has_committed(&self) -> bool {
        self.rows.iter().any(|row| row.value().value.read().is_some())
    }

    /// Drops the row under `key` if it is vacant and nobody else holds it.
    ///
    /// The shard write lock keeps other units from cloning the handle while
    /// the count is checked.
    fn prune(&self, key: &K) {
        self.rows.remove_if(key, |_, row| {
            Arc::strong_count(row) == 1 && row.value.read().is_none()
        });
    }
}

/// A row whose intent this unit holds.
struct Locked<V> {
    row: Arc<Row<V>>,
    _intent: Intent,
    staged: Option<V>,
}

impl<V: Clone> Locked<V> {
    fn current(&self) -> Option<V> {
        self.staged.clone().or_else(|| self.row.value.read().clone())
    }
}

/// Rows of one table locked by a unit.
struct Held<K, V> {
    rows: HashMap<K, Locked<V>>,
}

impl<K, V> Held<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    fn holds(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    fn lock<Q>(
        &mut self,
        table: &Table<K, V>,
        key: &Q,
        timeout: Duration,
    ) -> Result<Option<V>, BackendError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(locked) = self.rows.get(key) {
            return Ok(locked.current());
        }
        let Some(row) = table.row(key) else {
            return Ok(None);
        };
        let intent = row.acquire(timeout)?;
        let value = row.value.read().clone();
        self.rows.insert(
            key.to_owned(),
            Locked {
                row,
                _intent: intent,
                staged: None,
            },
        );
        Ok(value)
    }

    /// Stages a new row under `key`, failing if the key is taken.
    fn insert(
        &mut self,
        table: &Table<K, V>,
        key: K,
        value: V,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        if let Some(locked) = self.rows.get_mut(&key) {
            if locked.current().is_some() {
                return Err(BackendError::Conflict);
            }
            locked.staged = Some(value);
            return Ok(());
        }
        let row = table.reserve(key.clone());
        let intent = row.acquire(timeout)?;
        if row.value.read().is_some() {
            return Err(BackendError::Conflict);
        }
        self.rows.insert(
            key,
            Locked {
                row,
                _intent: intent,
                staged: Some(value),
            },
        );
        Ok(())
    }

    /// Stages an update of a locked row, or inserts the row if it is not held.
    fn put(
        &mut self,
        table: &Table<K, V>,
        key: K,
        value: V,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        match self.rows.get_mut(&key) {
            Some(locked) => {
                locked.staged = Some(value);
                Ok(())
            }
            None => self.insert(table, key, value, timeout),
        }
    }

    fn publish(&mut self) {
        for locked in self.rows.values_mut() {
            if let Some(value) = locked.staged.take() {
                *locked.row.value.write() = Some(value);
            }
        }
    }

    /// Releases every intent and prunes reservations left vacant.
    fn release(&mut self, table: &Table<K, V>) {
        for (key, locked) in self.rows.drain() {
            drop(locked);
            table.prune(&key);
        }
    }
}

/// In-memory store with row-level locking.
#[derive(Debug)]
pub struct MemoryStore {
    accounts: Table<AccountId, Account>,
    usernames: Table<String, AccountId>,
    external_ids: Table<String, AccountId>,
    products: Table<ProductId, Product>,
    purchases: Table<PurchaseId, Purchase>,
    login_codes: Table<String, LoginCode>,
    catalog: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    /// Creates an empty store whose units give up on a row lock after `lock_timeout`.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            accounts: Table::new(),
            usernames: Table::new(),
            external_ids: Table::new(),
            products: Table::new(),
            purchases: Table::new(),
            login_codes: Table::new(),
            catalog: Arc::new(Mutex::new(())),
            lock_timeout,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl Store for MemoryStore {
    type Unit<'a> = MemoryUnit<'a>;

    fn begin(&self) -> MemoryUnit<'_> {
        MemoryUnit {
            store: self,
            accounts: Held::new(),
            usernames: Held::new(),
            external_ids: Held::new(),
            products: Held::new(),
            purchases: Held::new(),
            login_codes: Held::new(),
            catalog: None,
        }
    }

    fn account(&self, id: &AccountId) -> Result<Option<Account>, BackendError> {
        Ok(self.accounts.get(id))
    }

    fn account_by_username(&self, username: &str) -> Result<Option<Account>, BackendError> {
        Ok(self
            .usernames
            .get(username)
            .and_then(|id| self.accounts.get(&id)))
    }

    fn account_by_external_id(&self, provider_id: &str) -> Result<Option<Account>, BackendError> {
        Ok(self
            .external_ids
            .get(provider_id)
            .and_then(|id| self.accounts.get(&id)))
    }

    fn accounts(&self) -> Result<Vec<Account>, BackendError> {
        let mut accounts = self.accounts.values();
        accounts.sort_by_key(|account| account.created_at());
        Ok(accounts)
    }

    fn product(&self, id: &ProductId) -> Result<Option<Product>, BackendError> {
        Ok(self.products.get(id))
    }

    fn products(&self) -> Result<Vec<Product>, BackendError> {
        let mut products = self.products.values();
        products.sort_by_key(|product| product.created_at());
        Ok(products)
    }

    fn purchase(&self, id: &PurchaseId) -> Result<Option<Purchase>, BackendError> {
        Ok(self.purchases.get(id))
    }

    fn purchases_for(&self, account: &AccountId) -> Result<Vec<Purchase>, BackendError> {
        Ok(self
            .purchases
            .values()
            .into_iter()
            .filter(|purchase| purchase.account_id() == *account)
            .collect())
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    accounts: Held<AccountId, Account>,
    usernames: Held<String, AccountId>,
    external_ids: Held<String, AccountId>,
    products: Held<ProductId, Product>,
    purchases: Held<PurchaseId, Purchase>,
    login_codes: Held<String, LoginCode>,
    catalog: Option<Intent>,
}

impl MemoryUnit<'_> {
    fn hold_catalog(&mut self) -> Result<(), BackendError> {
        if self.catalog.is_none() {
            self.catalog = Some(acquire(&self.store.catalog, self.store.lock_timeout)?);
        }
        Ok(())
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn lock_account(&mut self, id: &AccountId) -> Result<Option<Account>, BackendError> {
        self.accounts
            .lock(&self.store.accounts, id, self.store.lock_timeout)
    }

    fn lock_account_by_username(
        &mut self,
        username: &str,
    ) -> Result<Option<Account>, BackendError> {
        let timeout = self.store.lock_timeout;
        match self.usernames.lock(&self.store.usernames, username, timeout)? {
            Some(id) => self.accounts.lock(&self.store.accounts, &id, timeout),
            None => Ok(None),
        }
    }

    fn lock_account_by_external_id(
        &mut self,
        provider_id: &str,
    ) -> Result<Option<Account>, BackendError> {
        let timeout = self.store.lock_timeout;
        match self
            .external_ids
            .lock(&self.store.external_ids, provider_id, timeout)?
        {
            Some(id) => self.accounts.lock(&self.store.accounts, &id, timeout),
            None => Ok(None),
        }
    }

    fn lock_catalog(&mut self) -> Result<bool, BackendError> {
        self.hold_catalog()?;
        Ok(self.store.products.has_committed())
    }

    fn lock_product(&mut self, id: &ProductId) -> Result<Option<Product>, BackendError> {
        self.products
            .lock(&self.store.products, id, self.store.lock_timeout)
    }

    fn lock_purchase(&mut self, id: &PurchaseId) -> Result<Option<Purchase>, BackendError> {
        self.purchases
            .lock(&self.store.purchases, id, self.store.lock_timeout)
    }

    fn lock_login_code(&mut self, code: &str) -> Result<Option<LoginCode>, BackendError> {
        self.login_codes
            .lock(&self.store.login_codes, code, self.store.lock_timeout)
    }

    fn put_account(&mut self, account: Account) -> Result<(), BackendError> {
        let timeout = self.store.lock_timeout;
        let id = account.id();
        if !self.accounts.holds(&id) {
            // New account: claim its unique keys first, in lock order.
            if let Some(external) = account.external() {
                self.external_ids.insert(
                    &self.store.external_ids,
                    external.provider_id.clone(),
                    id,
                    timeout,
                )?;
            }
            self.usernames.insert(
                &self.store.usernames,
                account.username().to_owned(),
                id,
                timeout,
            )?;
        }
        self.accounts.put(&self.store.accounts, id, account, timeout)
    }

    fn put_product(&mut self, product: Product) -> Result<(), BackendError> {
        if !self.products.holds(&product.id()) {
            self.hold_catalog()?;
        }
        self.products
            .put(&self.store.products, product.id(), product, self.store.lock_timeout)
    }

    fn put_purchase(&mut self, purchase: Purchase) -> Result<(), BackendError> {
        self.purchases.put(
            &self.store.purchases,
            purchase.id(),
            purchase,
            self.store.lock_timeout,
        )
    }

    fn put_login_code(&mut self, code: LoginCode) -> Result<(), BackendError> {
        self.login_codes.put(
            &self.store.login_codes,
            code.code().to_owned(),
            code,
            self.store.lock_timeout,
        )
    }

    fn commit(mut self) -> Result<(), BackendError> {
        self.login_codes.publish();
        self.external_ids.publish();
        self.usernames.publish();
        self.accounts.publish();
        self.products.publish();
        self.purchases.publish();
        // Intents are released when `self` drops, after every write is visible.
        Ok(())
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        let store = self.store;
        self.purchases.release(&store.purchases);
        self.products.release(&store.products);
        self.accounts.release(&store.accounts);
        self.usernames.release(&store.usernames);
        self.external_ids.release(&store.external_ids);
        self.login_codes.release(&store.login_codes);
    }
}
