//! # Property-Based Tests
//!
//! Progress arithmetic and position encoding hold for arbitrary inputs.

use proptest::prelude::*;

use bulk_process::budget::MemoryLimit;
use bulk_process::controller::{percent_complete, Position};

proptest! {
    /// Property: percentage stays within [0, 100] and only reaches 100 at the end
    #[test]
    fn percentage_is_bounded(total in 1u64..10_000_000, offset in 0u64..10_000_000) {
        let pct = percent_complete(offset, total);
        prop_assert!((0.0..=100.0).contains(&pct));
        prop_assert_eq!(pct == 100.0, offset >= total);
    }

    /// Property: percentage never decreases as the offset advances
    #[test]
    fn percentage_is_monotonic(total in 1u64..1_000_000, a in 0u64..1_000_000, b in 0u64..1_000_000) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(percent_complete(low, total) <= percent_complete(high, total));
    }

    /// Property: percentage has at most two decimals
    #[test]
    fn percentage_has_two_decimals(total in 1u64..1_000_000, offset in 0u64..1_000_000) {
        let pct = percent_complete(offset, total);
        prop_assert!(((pct * 100.0).round() - pct * 100.0).abs() < 1e-6);
    }

    /// Property: numeric positions survive the wire form, as numbers or strings
    #[test]
    fn positions_parse_from_numbers_and_strings(offset in any::<u64>()) {
        let from_number: Position = serde_json::from_value(serde_json::json!(offset)).unwrap();
        let from_string: Position = serde_json::from_value(serde_json::json!(offset.to_string())).unwrap();
        prop_assert_eq!(from_number, Position::Offset(offset));
        prop_assert_eq!(from_string, Position::Offset(offset));
    }

    /// Property: memory shorthand scales by the suffix
    #[test]
    fn memory_shorthand_scales(n in 1u64..4096) {
        let k: MemoryLimit = format!("{n}K").parse().unwrap();
        let m: MemoryLimit = format!("{n}m").parse().unwrap();
        let g: MemoryLimit = format!("{n}G").parse().unwrap();
        prop_assert_eq!(k, MemoryLimit::Bytes(n * 1024));
        prop_assert_eq!(m, MemoryLimit::Bytes(n * 1024 * 1024));
        prop_assert_eq!(g, MemoryLimit::Bytes(n * 1024 * 1024 * 1024));
    }
}

#[test]
fn done_position_round_trips_as_marker() {
    let json = serde_json::to_value(Position::Done).unwrap();
    assert_eq!(json, serde_json::json!("done"));
    let parsed: Position = serde_json::from_value(json).unwrap();
    assert!(parsed.is_done());
}
