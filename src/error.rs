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

//! Error types for the shop engine and its storage backends.

use crate::purchase::PurchaseStatus;
use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Business rejections (everything except the two `Storage*` variants) are
/// final: retrying the same request yields the same answer. The messages are
/// meant for end users and never carry storage internals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShopError {
    /// No account with the given identifier
    #[error("account not found")]
    AccountNotFound,

    /// No product with the given identifier
    #[error("product not found")]
    ProductNotFound,

    /// Product is flagged unavailable or its stock is exhausted
    #[error("product is not available")]
    ProductUnavailable,

    /// Balance is lower than the product price
    #[error("not enough coins")]
    InsufficientFunds,

    /// No purchase with the given identifier
    #[error("purchase not found")]
    PurchaseNotFound,

    /// Purchase is in a terminal state
    #[error("purchase cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: PurchaseStatus,
        to: PurchaseStatus,
    },

    /// Login code does not exist
    #[error("invalid login code")]
    LoginCodeNotFound,

    /// Login code was already redeemed
    #[error("login code already used")]
    LoginCodeUsed,

    /// Login code is past its expiry
    #[error("login code expired")]
    LoginCodeExpired,

    /// Another account already owns the username
    #[error("username already taken")]
    UsernameTaken,

    /// Prices must be positive
    #[error("invalid price (must be positive)")]
    InvalidPrice,

    /// Request data rejected before touching the store
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Availability is derived from stock once stock is tracked
    #[error("availability follows stock for this product")]
    StockTracked,

    /// The store could not grant the row locks in time; safe to retry
    #[error("the shop is busy, please try again")]
    StorageContention,

    /// Non-retriable storage failure. `detail` is for logs only.
    #[error("the purchase could not be completed")]
    StorageFailure { detail: String },
}

impl ShopError {
    /// Returns `true` if the operation may succeed when attempted again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StorageContention)
    }

    /// Stable reason code for transports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::ProductNotFound => "PRODUCT_NOT_FOUND",
            Self::ProductUnavailable => "PRODUCT_UNAVAILABLE",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::PurchaseNotFound => "PURCHASE_NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::LoginCodeNotFound => "LOGIN_CODE_NOT_FOUND",
            Self::LoginCodeUsed => "LOGIN_CODE_USED",
            Self::LoginCodeExpired => "LOGIN_CODE_EXPIRED",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::InvalidPrice => "INVALID_PRICE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::StockTracked => "STOCK_TRACKED",
            Self::StorageContention => "STORAGE_CONTENTION",
            Self::StorageFailure { .. } => "STORAGE_FAILURE",
        }
    }
}

/// Errors raised by [`Store`](crate::Store) backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A row lock could not be acquired within the lock timeout
    #[error("row lock timed out")]
    Contention,

    /// Insert collided with an existing key
    #[error("key already exists")]
    Conflict,

    /// Anything else: lost connection, corrupted row, ...
    #[error("storage failure: {0}")]
    Failure(String),
}

impl From<BackendError> for ShopError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Contention | BackendError::Conflict => ShopError::StorageContention,
            BackendError::Failure(detail) => ShopError::StorageFailure { detail },
        }
    }
}
