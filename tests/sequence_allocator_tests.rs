//! Concurrency and property tests for the ordinal allocator
//!
//! The allocator backs the human-readable lab codes, so duplicates or gaps
//! under contention would hand two physical samples the same identity.

use proptest::prelude::*;

use lab_approval::sequence::{SequenceAllocator, format_code};
use sled::open;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[test]
fn concurrent_allocations_are_distinct_and_contiguous() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let db = open(temp.path().join("allocator.db"))?;
    db.clear()?;
    let tree = db.open_tree("sequences")?;

    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;
    let allocated = Arc::new(Mutex::new(Vec::new()));

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            let tree = tree.clone();
            let allocated = Arc::clone(&allocated);
            scope.spawn(move || {
                let allocator = SequenceAllocator::new(tree);
                for _ in 0..PER_THREAD {
                    let ordinal = allocator.allocate("lab_code_chemistry").unwrap();
                    allocated.lock().unwrap().push(ordinal);
                }
            });
        }
    });

    let allocated = allocated.lock().unwrap();
    let distinct: BTreeSet<u64> = allocated.iter().copied().collect();
    let total = (THREADS * PER_THREAD) as u64;

    // no duplicates, no gaps: exactly 1..=total was handed out
    assert_eq!(distinct.len() as u64, total);
    assert_eq!(distinct.first().copied(), Some(1));
    assert_eq!(distinct.last().copied(), Some(total));

    let allocator = SequenceAllocator::new(db.open_tree("sequences")?);
    assert_eq!(allocator.current("lab_code_chemistry")?, total);

    Ok(())
}

#[test]
fn sequences_are_independent_per_name() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let db = open(temp.path().join("independent.db"))?;
    db.clear()?;
    let allocator = SequenceAllocator::new(db.open_tree("sequences")?);

    assert_eq!(allocator.allocate("lab_code_chemistry")?, 1);
    assert_eq!(allocator.allocate("lab_code_chemistry")?, 2);
    // a different group starts from its own counter
    assert_eq!(allocator.allocate("lab_code_microbiology")?, 1);
    assert_eq!(allocator.current("lab_code_chemistry")?, 2);

    Ok(())
}

proptest! {
    /// Property: formatted codes always keep the `{PREFIX}-{NNN}` shape and
    /// round-trip their ordinal, with the pad acting as a floor not a cap.
    #[test]
    fn prop_format_code_shape(ordinal in 1u64..1_000_000) {
        let code = format_code("CHM", ordinal);
        let (prefix, digits) = code.split_once('-').unwrap();

        prop_assert_eq!(prefix, "CHM");
        prop_assert!(digits.len() >= 3);
        prop_assert_eq!(digits.parse::<u64>().unwrap(), ordinal);
        if ordinal < 1000 {
            prop_assert_eq!(digits.len(), 3);
        }
    }

    /// Property: formatting is strictly monotone in the ordinal under a
    /// numeric reading, so codes never collide across ordinals.
    #[test]
    fn prop_format_code_is_injective(a in 1u64..100_000, b in 1u64..100_000) {
        prop_assume!(a != b);
        prop_assert_ne!(format_code("MIC", a), format_code("MIC", b));
    }
}
