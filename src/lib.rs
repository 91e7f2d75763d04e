//! tableside — order-tracking core for a small restaurant.
//!
//! Waitstaff record order lines per table and per section (a sub-group used
//! to split a shared table's bill), kitchen staff advance line status, and
//! an admin maintains the priced menu. Several UI sessions poll one shared
//! SQLite store; this crate is the data/business layer they all call into,
//! with no presentation concerns of its own.
//!
//! Entry point: [`db::init`] opens the store, migrates the schema and seeds
//! the default menu on first run. Every operation takes the returned
//! [`DbState`] explicitly.

use tracing_subscriber::EnvFilter;

pub mod billing;
pub mod catalog;
pub mod db;
pub mod error;
pub mod ledger;

pub use billing::{GroupBill, Grouping, SectionBill, TableBill};
pub use catalog::MenuItem;
pub use db::DbState;
pub use error::PosError;
pub use ledger::{Order, OrderFilter, OrderStatus, QtyOutcome};

/// Number of tables the floor is configured with.
pub const NUM_TABLES: i64 = 7;

/// Chairs per table, used by the legacy chair/group split view.
pub const CHAIRS_PER_TABLE: i64 = 4;

/// Split-bill groups available in the chair/group view.
pub const MAX_SPLIT_GROUPS: i64 = 4;

/// Menu seeded on first run: (name, price).
pub const DEFAULT_MENU: &[(&str, f64)] = &[
    ("Porotta", 12.0),
    ("Dosa", 40.0),
    ("Idiyappam", 15.0),
    ("Chappathi", 12.0),
    ("Chicken Fry", 80.0),
    ("Chicken Curry", 70.0),
    ("Beef Fry", 90.0),
    ("Beef Curry", 80.0),
    ("Kurumma", 30.0),
    ("Kanthari Piece", 25.0),
    ("Set Bulsey", 35.0),
    ("Single Omblet", 20.0),
    ("Double Omblet", 35.0),
    ("Kanthari Combo", 60.0),
    ("49/- Combo", 49.0),
    ("Chicken fry Combo", 99.0),
    ("Beef Chapse Combo", 109.0),
    ("Pazhampori Combo", 40.0),
    ("Chaya", 10.0),
    ("Drink (20)", 20.0),
    ("Drink (40)", 40.0),
];

/// Configured table ids, for UI layers that enumerate the floor.
pub fn table_ids() -> impl Iterator<Item = i64> {
    1..=NUM_TABLES
}

/// Console tracing bootstrap for embedding binaries.
///
/// Respects `RUST_LOG`; safe to call more than once (later calls are no-ops).
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tableside=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_ids_cover_configured_floor() {
        let ids: Vec<i64> = table_ids().collect();
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&NUM_TABLES));
        assert_eq!(ids.len() as i64, NUM_TABLES);
    }

    #[test]
    fn test_default_menu_names_unique_and_priced() {
        let mut seen = HashSet::new();
        for (name, price) in DEFAULT_MENU {
            assert!(seen.insert(*name), "duplicate seed name: {name}");
            assert!(!name.trim().is_empty());
            assert!(*price >= 0.0, "negative seed price for {name}");
        }
    }
}
