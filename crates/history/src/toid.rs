//! Total-order IDs.
//!
//! A total-order ID packs a position in history into one sortable `i64`:
//!
//! ```text
//! | ledger sequence (32 bits) | transaction order (20 bits) | operation order (12 bits) |
//! ```
//!
//! Transaction and operation orders are 1-based within their ledger and
//! transaction; zero in either slot addresses the enclosing object itself.
//! Sorting by the packed value therefore orders ledgers, then transactions,
//! then operations.
//!
//! ```
//! use archivist_history::toid::TotalOrderId;
//!
//! let id = TotalOrderId::new(1000, 2, 3);
//! let packed = id.to_i64().unwrap();
//! assert_eq!(packed, (1000_i64 << 32) | (2 << 12) | 3);
//! assert_eq!(TotalOrderId::parse(packed), id);
//! ```

use std::cmp::Ordering;
use std::fmt;

use crate::error::{HistoryError, Result};

pub const LEDGER_MASK: i64 = (1 << 32) - 1;
pub const TRANSACTION_MASK: i64 = (1 << 20) - 1;
pub const OPERATION_MASK: i64 = (1 << 12) - 1;

pub const LEDGER_SHIFT: u32 = 32;
pub const TRANSACTION_SHIFT: u32 = 12;
pub const OPERATION_SHIFT: u32 = 0;

/// An unpacked total-order ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TotalOrderId {
    pub ledger_sequence: i32,
    pub transaction_order: i32,
    pub operation_order: i32,
}

impl TotalOrderId {
    pub fn new(ledger_sequence: i32, transaction_order: i32, operation_order: i32) -> Self {
        Self {
            ledger_sequence,
            transaction_order,
            operation_order,
        }
    }

    /// The greatest ID within `ledger_sequence`; every ID of later ledgers sorts after it.
    pub fn after_ledger(ledger_sequence: i32) -> Self {
        Self::new(
            ledger_sequence,
            TRANSACTION_MASK as i32,
            OPERATION_MASK as i32,
        )
    }

    /// Pack into an `i64`. Fails if a field is negative or wider than its slot.
    pub fn to_i64(&self) -> Result<i64> {
        if self.ledger_sequence < 0 {
            return Err(HistoryError::IndexOverflow(format!(
                "invalid ledger sequence {}",
                self.ledger_sequence
            )));
        }
        check_field("transaction order", self.transaction_order, TRANSACTION_MASK)?;
        check_field("operation order", self.operation_order, OPERATION_MASK)?;

        Ok(((i64::from(self.ledger_sequence) & LEDGER_MASK) << LEDGER_SHIFT)
            | ((i64::from(self.transaction_order) & TRANSACTION_MASK) << TRANSACTION_SHIFT)
            | ((i64::from(self.operation_order) & OPERATION_MASK) << OPERATION_SHIFT))
    }

    /// Unpack an `i64` produced by [`to_i64`](Self::to_i64).
    pub fn parse(id: i64) -> Self {
        Self {
            ledger_sequence: ((id >> LEDGER_SHIFT) & LEDGER_MASK) as i32,
            transaction_order: ((id >> TRANSACTION_SHIFT) & TRANSACTION_MASK) as i32,
            operation_order: ((id >> OPERATION_SHIFT) & OPERATION_MASK) as i32,
        }
    }

    /// Step to the next operation, rolling into the next transaction and
    /// then the next ledger when a slot fills up.
    pub fn inc_operation_order(&mut self) {
        self.operation_order += 1;
        if i64::from(self.operation_order) > OPERATION_MASK {
            self.operation_order = 0;
            self.transaction_order += 1;
            if i64::from(self.transaction_order) > TRANSACTION_MASK {
                self.transaction_order = 0;
                self.ledger_sequence += 1;
            }
        }
    }
}

fn check_field(name: &str, value: i32, mask: i64) -> Result<()> {
    if value < 0 || i64::from(value) > mask {
        return Err(HistoryError::IndexOverflow(format!(
            "{name} {value} does not fit in {} bits",
            mask.count_ones()
        )));
    }
    Ok(())
}

impl PartialOrd for TotalOrderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalOrderId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ledger_sequence, self.transaction_order, self.operation_order).cmp(&(
            other.ledger_sequence,
            other.transaction_order,
            other.operation_order,
        ))
    }
}

impl fmt::Display for TotalOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i64() {
            Ok(id) => write!(f, "{id}"),
            Err(_) => write!(
                f,
                "{}-{}-{}",
                self.ledger_sequence, self.transaction_order, self.operation_order
            ),
        }
    }
}

/// Packed half-open bounds `[from, to)` covering ledgers `start..=end`.
///
/// Ledger 1 starts at 0 so that nothing before it is excluded.
pub fn ledger_range_inclusive(start: u32, end: u32) -> Result<(i64, i64)> {
    if start > end || start < 1 {
        return Err(HistoryError::InvalidRange { start, end });
    }
    let to_seq = |seq: u32| {
        i32::try_from(seq).map_err(|_| HistoryError::IndexOverflow(format!("ledger {seq}")))
    };
    let from = if start > 1 {
        TotalOrderId::new(to_seq(start)?, 0, 0).to_i64()?
    } else {
        0
    };
    let next = end
        .checked_add(1)
        .ok_or_else(|| HistoryError::IndexOverflow(format!("ledger {end}")))?;
    let to = TotalOrderId::new(to_seq(next)?, 0, 0).to_i64()?;
    Ok((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let cases = [
            (TotalOrderId::new(0, 0, 1), 1),
            (TotalOrderId::new(0, 0, 4095), 4095),
            (TotalOrderId::new(0, 1, 0), 4096),
            (TotalOrderId::new(0, 1_048_575, 0), 4_294_963_200),
            (TotalOrderId::new(1, 0, 0), 4_294_967_296),
            (TotalOrderId::new(1, 1, 1), 4_294_971_393),
            (TotalOrderId::new(i32::MAX, 0, 0), 9_223_372_032_559_808_512),
        ];
        for (id, expected) in cases {
            assert_eq!(id.to_i64().unwrap(), expected, "{id:?}");
            assert_eq!(TotalOrderId::parse(expected), id);
        }
    }

    #[test]
    fn test_overflow() {
        assert!(matches!(
            TotalOrderId::new(1, 1 << 20, 0).to_i64(),
            Err(HistoryError::IndexOverflow(_))
        ));
        assert!(matches!(
            TotalOrderId::new(1, 0, 1 << 12).to_i64(),
            Err(HistoryError::IndexOverflow(_))
        ));
        assert!(matches!(
            TotalOrderId::new(-1, 0, 0).to_i64(),
            Err(HistoryError::IndexOverflow(_))
        ));
    }

    #[test]
    fn test_after_ledger_sorts_before_next_ledger() {
        let after = TotalOrderId::after_ledger(5).to_i64().unwrap();
        let next = TotalOrderId::new(6, 0, 0).to_i64().unwrap();
        assert_eq!(after + 1, next);
        assert!(TotalOrderId::after_ledger(5) < TotalOrderId::new(6, 0, 0));
    }

    #[test]
    fn test_inc_operation_order_rolls_over() {
        let mut id = TotalOrderId::new(1, 0, 4095);
        id.inc_operation_order();
        assert_eq!(id, TotalOrderId::new(1, 1, 0));

        let mut id = TotalOrderId::after_ledger(1);
        id.inc_operation_order();
        assert_eq!(id, TotalOrderId::new(2, 0, 0));
    }

    #[test]
    fn test_ledger_range_inclusive() {
        assert_eq!(
            ledger_range_inclusive(1, 1).unwrap(),
            (0, TotalOrderId::new(2, 0, 0).to_i64().unwrap())
        );
        assert_eq!(
            ledger_range_inclusive(2, 3).unwrap(),
            (
                TotalOrderId::new(2, 0, 0).to_i64().unwrap(),
                TotalOrderId::new(4, 0, 0).to_i64().unwrap()
            )
        );
        assert!(ledger_range_inclusive(3, 2).is_err());
        assert!(ledger_range_inclusive(0, 2).is_err());
        assert!(matches!(
            ledger_range_inclusive(1, i32::MAX as u32),
            Err(HistoryError::IndexOverflow(_))
        ));
    }
}
