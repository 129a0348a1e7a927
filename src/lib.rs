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

//! # Coin Shop
//!
//! This library provides the purchase engine of an in-game coin shop: players
//! spend a balance of coins on catalog products, and every purchase debits the
//! balance, decrements stock and records the purchase as one atomic unit.
//!
//! ## Core Components
//!
//! - [`Engine`]: Runs purchases, balance adjustments, catalog updates and login-code redemption
//! - [`Store`] / [`UnitOfWork`]: Storage contract with row locking and atomic commit
//! - [`MemoryStore`]: In-memory backend of that contract
//! - [`Account`], [`Product`], [`Purchase`], [`LoginCode`]: Stored records
//! - [`ShopError`]: Rejections and storage failures
//!
//! ## Example
//!
//! ```
//! use coin_shop_rs::{Category, Engine, NewProduct, Role, ShopError};
//!
//! let engine = Engine::new();
//! let player = engine.create_account("player_one", Role::Player).unwrap();
//! engine.adjust_balance(player.id(), 1000).unwrap();
//!
//! let car = engine
//!     .add_product(NewProduct {
//!         name: "سيارة".into(),
//!         name_en: "Car".into(),
//!         description: String::new(),
//!         category: Category::Vehicles,
//!         price: 800,
//!         image: "/img/car.png".into(),
//!         stock: Some(1),
//!         is_new: false,
//!         is_featured: false,
//!     })
//!     .unwrap();
//!
//! let receipt = engine.execute_purchase(player.id(), car.id()).unwrap();
//! assert_eq!(receipt.account.coins(), 200);
//!
//! // The only unit is gone.
//! let again = engine.execute_purchase(player.id(), car.id());
//! assert_eq!(again, Err(ShopError::ProductUnavailable));
//! ```
//!
//! ## Thread Safety
//!
//! The engine holds no mutable state of its own; all of it lives in the
//! store. Concurrent purchases against the same account or product serialize
//! on row locks, so they behave as if applied one at a time.

pub mod account;
pub mod api;
mod base;
pub mod catalog;
mod config;
mod engine;
pub mod error;
mod login_code;
mod memory;
pub mod product;
pub mod purchase;
mod store;

pub use account::{Account, ExternalIdentity, Role};
pub use base::{AccountId, Coins, ProductId, PurchaseId};
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{Engine, PurchaseReceipt};
pub use error::{BackendError, ShopError};
pub use login_code::LoginCode;
pub use memory::{MemoryStore, MemoryUnit};
pub use product::{Category, NewProduct, Product};
pub use purchase::{Purchase, PurchaseStatus};
pub use store::{Store, UnitOfWork};
