//! Error taxonomy for the tableside core.
//!
//! Nothing here is fatal to a running session: `NotFound` typically means a
//! concurrent poller already deleted the row, and callers recover by
//! re-fetching current state and re-rendering.

use thiserror::Error;

use crate::ledger::OrderStatus;

#[derive(Debug, Error)]
pub enum PosError {
    /// Menu insert/rename collides with an existing item name.
    #[error("menu item name already in use: {0}")]
    DuplicateName(String),

    /// The target row no longer exists (usually a benign poll race).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Status change outside the Preparing -> Ready -> Served path.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Parcel flag cannot change once the order is served.
    #[error("parcel flag is frozen on served order {0}")]
    ParcelFrozen(i64),

    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i64),

    #[error("menu item name must not be empty")]
    InvalidName,

    #[error("price must be non-negative, got {0}")]
    InvalidPrice(f64),

    #[error("table id out of range 1..={max}: {table_id}")]
    InvalidTable { table_id: i64, max: i64 },

    #[error("section id must be at least 1, got {0}")]
    InvalidSection(i64),

    #[error("chair id out of range 1..={max}: {chair_id}")]
    InvalidChair { chair_id: i64, max: i64 },

    #[error("split group out of range 1..={max}: {group_id}")]
    InvalidGroup { group_id: i64, max: i64 },

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl PosError {
    pub(crate) fn order_not_found(id: i64) -> Self {
        PosError::NotFound {
            entity: "order",
            id,
        }
    }

    pub(crate) fn menu_item_not_found(id: i64) -> Self {
        PosError::NotFound {
            entity: "menu item",
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages_name_the_target() {
        let not_found = PosError::order_not_found(42);
        assert_eq!(not_found.to_string(), "order not found: 42");

        let transition = PosError::InvalidTransition {
            from: OrderStatus::Served,
            to: OrderStatus::Ready,
        };
        assert_eq!(
            transition.to_string(),
            "invalid status transition: served -> ready"
        );

        let dup = PosError::DuplicateName("Dosa".to_string());
        assert_eq!(dup.to_string(), "menu item name already in use: Dosa");
    }

    #[test]
    fn test_sqlite_errors_convert() {
        let err = PosError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, PosError::Sqlite(_)));
    }
}
