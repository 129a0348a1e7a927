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

//! Catalog products.
//!
//! A product either has unlimited stock (`stock == None`) or a finite counter.
//! Once the counter is tracked, the availability flag is derived from it and
//! can only change through [`Product::set_stock`] and [`Product::take_one`].

use crate::ShopError;
use crate::base::{Coins, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vehicles,
    Features,
    Ownership,
}

impl Category {
    pub const ALL: [Category; 3] = [Self::Vehicles, Self::Features, Self::Ownership];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::Features => "features",
            Self::Ownership => "ownership",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(ShopError::InvalidInput("unknown category"))
    }
}

/// Data needed to add a product to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub name_en: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub price: Coins,
    pub image: String,
    /// `None` means unlimited stock.
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_featured: bool,
}

/// Catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    name_en: String,
    description: String,
    category: Category,
    price: Coins,
    image: String,
    in_stock: bool,
    stock: Option<u32>,
    is_new: bool,
    is_featured: bool,
    created_at: DateTime<Utc>,
}

impl Product {
    /// Builds a product from its catalog data.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidPrice`] for a zero price.
    pub fn new(new: NewProduct) -> Result<Self, ShopError> {
        if new.price == 0 {
            return Err(ShopError::InvalidPrice);
        }
        Ok(Self {
            id: ProductId::new(),
            name: new.name,
            name_en: new.name_en,
            description: new.description,
            category: new.category,
            price: new.price,
            image: new.image,
            in_stock: new.stock.is_none_or(|stock| stock > 0),
            stock: new.stock,
            is_new: new.is_new,
            is_featured: new.is_featured,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_en(&self) -> &str {
        &self.name_en
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn price(&self) -> Coins {
        self.price
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Availability flag as shown to shoppers.
    pub fn in_stock(&self) -> bool {
        self.in_stock
    }

    /// Remaining stock, `None` when unlimited.
    pub fn stock(&self) -> Option<u32> {
        self.stock
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_featured(&self) -> bool {
        self.is_featured
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sets a finite stock counter and recomputes availability.
    pub fn set_stock(&mut self, stock: u32) {
        self.stock = Some(stock);
        self.in_stock = stock > 0;
    }

    /// Removes one unit of stock for a sale.
    ///
    /// Unlimited products only need the availability flag. A finite counter
    /// that reaches zero clears the flag.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::ProductUnavailable`] if the product is flagged
    /// unavailable or has no stock left; nothing is changed.
    pub fn take_one(&mut self) -> Result<(), ShopError> {
        if !self.in_stock {
            return Err(ShopError::ProductUnavailable);
        }
        if let Some(stock) = self.stock {
            let remaining = stock.checked_sub(1).ok_or(ShopError::ProductUnavailable)?;
            self.set_stock(remaining);
        }
        Ok(())
    }

    /// Changes the list price. Purchases already made keep the price they paid.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidPrice`] for a zero price.
    pub fn set_price(&mut self, price: Coins) -> Result<(), ShopError> {
        if price == 0 {
            return Err(ShopError::InvalidPrice);
        }
        self.price = price;
        Ok(())
    }

    /// Toggles availability of an unlimited-stock product.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::StockTracked`] if the product has a stock counter.
    pub fn set_available(&mut self, available: bool) -> Result<(), ShopError> {
        if self.stock.is_some() {
            return Err(ShopError::StockTracked);
        }
        self.in_stock = available;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product(price: Coins, stock: Option<u32>) -> NewProduct {
        NewProduct {
            name: "سيارة".into(),
            name_en: "Car".into(),
            description: String::new(),
            category: Category::Vehicles,
            price,
            image: "/img/car.png".into(),
            stock,
            is_new: false,
            is_featured: false,
        }
    }

    #[test]
    fn zero_price_is_rejected() {
        assert_eq!(Product::new(new_product(0, None)), Err(ShopError::InvalidPrice));
    }

    #[test]
    fn availability_derived_from_initial_stock() {
        assert!(Product::new(new_product(10, None)).unwrap().in_stock());
        assert!(Product::new(new_product(10, Some(3))).unwrap().in_stock());
        assert!(!Product::new(new_product(10, Some(0))).unwrap().in_stock());
    }

    #[test]
    fn take_last_unit_clears_availability() {
        let mut product = Product::new(new_product(10, Some(1))).unwrap();
        product.take_one().unwrap();
        assert_eq!(product.stock(), Some(0));
        assert!(!product.in_stock());
        assert_eq!(product.take_one(), Err(ShopError::ProductUnavailable));
        assert_eq!(product.stock(), Some(0));
    }

    #[test]
    fn take_from_unlimited_keeps_stock_untracked() {
        let mut product = Product::new(new_product(10, None)).unwrap();
        for _ in 0..100 {
            product.take_one().unwrap();
        }
        assert_eq!(product.stock(), None);
        assert!(product.in_stock());
    }

    #[test]
    fn take_from_flagged_unavailable_fails() {
        let mut product = Product::new(new_product(10, None)).unwrap();
        product.set_available(false).unwrap();
        assert_eq!(product.take_one(), Err(ShopError::ProductUnavailable));
    }

    #[test]
    fn set_stock_recomputes_availability() {
        let mut product = Product::new(new_product(10, Some(0))).unwrap();
        product.set_stock(5);
        assert!(product.in_stock());
        product.set_stock(0);
        assert!(!product.in_stock());
    }

    #[test]
    fn availability_not_settable_once_tracked() {
        let mut product = Product::new(new_product(10, Some(0))).unwrap();
        assert_eq!(product.set_available(true), Err(ShopError::StockTracked));
        assert!(!product.in_stock());
    }

    #[test]
    fn set_price_rejects_zero() {
        let mut product = Product::new(new_product(10, None)).unwrap();
        assert_eq!(product.set_price(0), Err(ShopError::InvalidPrice));
        product.set_price(25).unwrap();
        assert_eq!(product.price(), 25);
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Vehicles".parse::<Category>().unwrap(), Category::Vehicles);
        assert_eq!(" ownership ".parse::<Category>().unwrap(), Category::Ownership);
        assert!("weapons".parse::<Category>().is_err());
    }
}
