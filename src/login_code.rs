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

//! One-time login codes minted by the game server.

use crate::ShopError;
use crate::base::AccountId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Code a player types into the shop to log in as their in-game user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCode {
    code: String,
    username: String,
    used: bool,
    account_id: Option<AccountId>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LoginCode {
    /// Number of random bytes in a minted code (two hex digits each).
    const CODE_BYTES: usize = 4;

    pub fn new(
        code: impl Into<String>,
        username: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            code: code.into(),
            username: username.into(),
            used: false,
            account_id: None,
            created_at,
            expires_at,
        }
    }

    /// Mints a random upper-case hex code for `username`, valid for `ttl`.
    pub fn mint(username: impl Into<String>, ttl: Duration) -> Self {
        let bytes: [u8; Self::CODE_BYTES] = rand::random();
        let code = bytes
            .iter()
            .fold(String::with_capacity(Self::CODE_BYTES * 2), |mut out, byte| {
                let _ = write!(out, "{byte:02X}");
                out
            });
        let now = Utc::now();
        Self::new(code, username, now, now + ttl)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn used(&self) -> bool {
        self.used
    }

    /// Account that redeemed the code.
    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Checks that the code can still be redeemed at `now`.
    ///
    /// # Errors
    ///
    /// - [`ShopError::LoginCodeUsed`] - the code was redeemed before.
    /// - [`ShopError::LoginCodeExpired`] - `now` is past the expiry.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), ShopError> {
        if self.used {
            return Err(ShopError::LoginCodeUsed);
        }
        if self.expires_at < now {
            return Err(ShopError::LoginCodeExpired);
        }
        Ok(())
    }

    pub(crate) fn consume(&mut self, account_id: AccountId) {
        self.used = true;
        self.account_id = Some(account_id);
    }
}
