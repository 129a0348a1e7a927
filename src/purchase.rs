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

//! Purchase records.
//!
//! A purchase is created once, in [`PurchaseStatus::Pending`], by the
//! purchase engine. Afterwards only its status moves:
//!
//! ```text
//!  Pending ──deliver──► Delivered
//!     │
//!     └──cancel──► Cancelled
//! ```
//!
//! Both `Delivered` and `Cancelled` are terminal. Setting the status a
//! purchase already has is a no-op, which makes delivery idempotent.

use crate::ShopError;
use crate::base::{AccountId, Coins, ProductId, PurchaseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Delivered,
    Cancelled,
}

impl PurchaseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ShopError::InvalidInput("unknown purchase status")),
        }
    }
}

/// One admitted purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    id: PurchaseId,
    account_id: AccountId,
    product_id: ProductId,
    /// Price paid, captured at admission.
    price: Coins,
    status: PurchaseStatus,
    created_at: DateTime<Utc>,
}

impl Purchase {
    pub(crate) fn new(account_id: AccountId, product_id: ProductId, price: Coins) -> Self {
        Self {
            id: PurchaseId::new(),
            account_id,
            product_id,
            price,
            status: PurchaseStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> PurchaseId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn price(&self) -> Coins {
        self.price
    }

    pub fn status(&self) -> PurchaseStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Moves the purchase to `to`. Returns `false` if it already had that status.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidStatusTransition`] when leaving a terminal state.
    pub fn set_status(&mut self, to: PurchaseStatus) -> Result<bool, ShopError> {
        if self.status == to {
            return Ok(false);
        }
        if self.status.is_terminal() || to == PurchaseStatus::Pending {
            return Err(ShopError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(true)
    }
}
