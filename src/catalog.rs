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

//! Catalog loading.
//!
//! Products come either from a CSV file or from the built-in launch catalog.

use crate::product::{Category, NewProduct};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::io::Read;
use tracing::warn;

/// Raw CSV record matching the catalog format.
///
/// Fields: `name, name_en, description, category, price, image, stock, is_new, is_featured`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    name: String,
    name_en: String,
    #[serde(default)]
    description: String,
    category: String,
    price: u64,
    image: String,
    #[serde(default)]
    stock: Option<u32>,
    #[serde(default)]
    is_new: bool,
    #[serde(default)]
    is_featured: bool,
}

impl CsvRecord {
    /// Returns `None` for an unknown category or a zero price.
    fn into_new_product(self) -> Option<NewProduct> {
        let category = self.category.parse::<Category>().ok()?;
        if self.price == 0 {
            return None;
        }
        Some(NewProduct {
            name: self.name,
            name_en: self.name_en,
            description: self.description,
            category,
            price: self.price,
            image: self.image,
            stock: self.stock,
            is_new: self.is_new,
            is_featured: self.is_featured,
        })
    }
}

/// Reads products from CSV.
///
/// An empty `stock` column means unlimited stock. A `stock` that is not a
/// non-negative integer makes the row malformed. Malformed rows and rows with
/// an unknown category or a zero price are skipped with a warning.
///
/// # Example
///
/// ```csv
/// name,name_en,description,category,price,image,stock,is_new,is_featured
/// تعزيز السرعة,Speed Boost,,features,800,/img/speed.png,,true,false
/// سيارة نادرة,Rare Car,,vehicles,9000,/img/rare.png,3,false,true
/// ```
///
/// # Errors
///
/// Returns a CSV error if the header cannot be read.
pub fn load_catalog<R: Read>(reader: R) -> Result<Vec<NewProduct>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);
    rdr.headers()?;

    let mut products = Vec::new();
    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => match record.into_new_product() {
                Some(product) => products.push(product),
                None => warn!(
                    row = line + 1,
                    "skipping catalog row with invalid category or price"
                ),
            },
            Err(e) => warn!(row = line + 1, error = %e, "skipping malformed catalog row"),
        }
    }
    Ok(products)
}

/// The launch catalog.
pub fn default_catalog() -> Vec<NewProduct> {
    vec![
        NewProduct {
            is_new: true,
            is_featured: true,
            ..listing(
                "سيارة فيراري سوداء",
                "Black Ferrari",
                Category::Vehicles,
                5000,
                "black_luxury_sports_car.png",
            )
        },
        NewProduct {
            is_featured: true,
            ..listing(
                "دودج تشارجر برتقالي",
                "Orange Dodge Charger",
                Category::Vehicles,
                3500,
                "orange_muscle_car.png",
            )
        },
        listing(
            "سيارة دفع رباعي خضراء",
            "Green 4x4 SUV",
            Category::Vehicles,
            4000,
            "green_off-road_suv.png",
        ),
        NewProduct {
            is_new: true,
            ..listing(
                "دراجة نارية رياضية",
                "Sport Motorcycle",
                Category::Vehicles,
                2500,
                "blue_sport_motorcycle.png",
            )
        },
        NewProduct {
            description: "احصل على تاج VIP ذهبي مميز يظهر بجانب اسمك".into(),
            is_featured: true,
            ..listing(
                "تاج VIP الذهبي",
                "Golden VIP Crown",
                Category::Features,
                1500,
                "golden_vip_crown.png",
            )
        },
        NewProduct {
            description: "درع حماية يمنحك مناعة ضد الهجمات لمدة محددة".into(),
            ..listing(
                "درع الحماية المميز",
                "Premium Shield",
                Category::Features,
                1000,
                "premium_shield_badge.png",
            )
        },
        NewProduct {
            description: "احصل على تعزيز دائم للسرعة في جميع المركبات".into(),
            is_new: true,
            ..listing(
                "تعزيز السرعة",
                "Speed Boost",
                Category::Features,
                800,
                "speed_boost_icon.png",
            )
        },
        NewProduct {
            description: "احصل على صلاحيات المشرف في الخادم".into(),
            ..listing(
                "صلاحيات المشرف",
                "Moderator Permissions",
                Category::Ownership,
                10000,
                "premium_shield_badge.png",
            )
        },
    ]
}

/// A plain unlimited-stock entry with its image under the bundled asset path.
fn listing(name: &str, name_en: &str, category: Category, price: u64, image: &str) -> NewProduct {
    const IMAGES: &str = "/attached_assets/generated_images";

    NewProduct {
        name: name.to_owned(),
        name_en: name_en.to_owned(),
        description: String::new(),
        category,
        price,
        image: format!("{IMAGES}/{image}"),
        stock: None,
        is_new: false,
        is_featured: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "name,name_en,description,category,price,image,stock,is_new,is_featured\n";

    #[test]
    fn parse_unlimited_and_finite_stock() {
        let csv = format!(
            "{HEADER}\
             تعزيز,Speed Boost,,features,800,/img/speed.png,,true,false\n\
             سيارة,Rare Car,fast,vehicles,9000,/img/rare.png,3,false,true\n"
        );
        let products = load_catalog(Cursor::new(csv)).unwrap();

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].stock, None);
        assert!(products[0].is_new);
        assert_eq!(products[1].stock, Some(3));
        assert_eq!(products[1].category, Category::Vehicles);
        assert_eq!(products[1].description, "fast");
    }

    #[test]
    fn parse_with_whitespace() {
        let csv = format!("{HEADER} a , A , , ownership , 10 , /img/a.png , 1 , false , false \n");
        let products = load_catalog(Cursor::new(csv)).unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name_en, "A");
        assert_eq!(products[0].category, Category::Ownership);
    }

    #[test]
    fn skip_malformed_rows() {
        let csv = format!(
            "{HEADER}\
             a,A,,features,10,/img/a.png,,false,false\n\
             b,B,,weapons,10,/img/b.png,,false,false\n\
             c,C,,features,0,/img/c.png,,false,false\n\
             d,D,,features,not-a-price,/img/d.png,,false,false\n\
             e,E,,vehicles,20,/img/e.png,,false,false\n"
        );
        let products = load_catalog(Cursor::new(csv)).unwrap();
        let names: Vec<_> = products.iter().map(|p| p.name_en.as_str()).collect();
        assert_eq!(names, ["A", "E"]);
    }

    #[test]
    fn bad_stock_skips_row_instead_of_unlimiting_it() {
        let csv = format!(
            "{HEADER}\
             a,A,,vehicles,10,/img/a.png,-1,false,false\n\
             b,B,,vehicles,10,/img/b.png,3x,false,false\n\
             c,C,,vehicles,10,/img/c.png,2,false,false\n\
             d,D,,vehicles,10,/img/d.png\n"
        );
        let products = load_catalog(Cursor::new(csv)).unwrap();
        let parsed: Vec<_> = products
            .iter()
            .map(|p| (p.name_en.as_str(), p.stock))
            .collect();
        assert_eq!(parsed, [("C", Some(2)), ("D", None)]);
    }

    #[test]
    fn default_catalog_covers_every_category() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 8);
        for category in Category::ALL {
            assert!(catalog.iter().any(|p| p.category == category));
        }
        assert!(catalog.iter().all(|p| p.price > 0 && p.stock.is_none()));
    }
}
