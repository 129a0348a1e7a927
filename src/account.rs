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

//! Account management.
//!
//! An account owns a coin balance. The balance only changes through two
//! paths: [`Account::debit`] (used by the purchase engine, refuses to go
//! below zero) and [`Account::adjust`] (administrative, clamps at zero).
//!
//! # Example
//!
//! ```
//! use coin_shop_rs::{Account, Role};
//!
//! let mut account = Account::new("player_one", Role::Player);
//! account.adjust(500);
//! account.debit(200).unwrap();
//! assert_eq!(account.coins(), 300);
//! ```

use crate::ShopError;
use crate::base::{AccountId, Coins};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Privilege level of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Player,
    Admin,
}

/// Linkage to a third-party identity provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Stable id assigned by the provider.
    pub provider_id: String,
    /// Display handle at the provider, e.g. `name#0001`.
    pub handle: String,
    /// Avatar reference at the provider, if any.
    pub avatar: Option<String>,
}

/// Player account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    username: String,
    external: Option<ExternalIdentity>,
    coins: Coins,
    role: Role,
    created_at: DateTime<Utc>,
}

impl Account {
    /// Creates an account with a zero balance.
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            id: AccountId::new(),
            username: username.into(),
            external: None,
            coins: 0,
            role,
            created_at: Utc::now(),
        }
    }

    /// Creates a player account linked to a third-party identity.
    pub fn with_external(username: impl Into<String>, external: ExternalIdentity) -> Self {
        Self {
            external: Some(external),
            ..Self::new(username, Role::Player)
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn external(&self) -> Option<&ExternalIdentity> {
        self.external.as_ref()
    }

    pub fn coins(&self) -> Coins {
        self.coins
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Decreases the balance by `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InsufficientFunds`] if the balance is lower than
    /// `amount`; the balance is left untouched.
    pub fn debit(&mut self, amount: Coins) -> Result<(), ShopError> {
        self.coins = self
            .coins
            .checked_sub(amount)
            .ok_or(ShopError::InsufficientFunds)?;
        Ok(())
    }

    /// Applies a signed delta, flooring the result at zero. Returns the new balance.
    pub fn adjust(&mut self, delta: i64) -> Coins {
        let magnitude = delta.unsigned_abs();
        self.coins = if delta >= 0 {
            self.coins.saturating_add(magnitude)
        } else {
            self.coins.saturating_sub(magnitude)
        };
        self.coins
    }
}
