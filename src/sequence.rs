//! Collision-free ordinal allocation for human-readable codes.
//!
//! Counters live in their own tree, one big-endian u64 per sequence name.
//! Allocation is a read-modify-write inside a sled transaction, which is the
//! embedded analogue of a select-for-update row lock: two concurrent callers
//! can never observe the same counter value. Allocation participates in the
//! caller's wider transaction where assignment must be atomic with other
//! writes (see intake promotion), so an aborted transaction never leaks a
//! consumed ordinal into an unrelated retry.

use crate::error::{Error, Result};
use sled::Tree;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};

/// Pure code formatting: `{PREFIX}-{NNN}` with a zero-padded 3-digit ordinal.
/// Ordinals past 999 simply widen, the pad is a floor not a ceiling.
pub fn format_code(prefix: &str, ordinal: u64) -> String {
    format!("{prefix}-{ordinal:03}")
}

fn decode_counter(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Codec("sequence counter is not 8 bytes".into()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Allocate the next ordinal inside an already-open transaction.
///
/// A missing counter row is initialized here, insert-if-absent; the
/// transaction's serializability makes the initialization race-safe.
pub fn allocate_in_tx(
    tree: &TransactionalTree,
    name: &str,
) -> std::result::Result<u64, ConflictableTransactionError<Error>> {
    let next = match tree.get(name.as_bytes())? {
        Some(bytes) => {
            decode_counter(&bytes).map_err(ConflictableTransactionError::Abort)? + 1
        }
        None => 1,
    };
    tree.insert(name.as_bytes(), &next.to_be_bytes()[..])?;
    Ok(next)
}

/// Allocator over a dedicated counter tree.
pub struct SequenceAllocator {
    tree: Tree,
}

impl SequenceAllocator {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// `allocate(name) -> next ordinal`: strictly increasing, never reused,
    /// distinct across concurrent callers.
    pub fn allocate(&self, name: &str) -> Result<u64> {
        let ordinal = self
            .tree
            .transaction(|tx| allocate_in_tx(tx, name))
            .map_err(Error::from)?;
        Ok(ordinal)
    }

    /// Read the current high-water mark without consuming an ordinal.
    pub fn current(&self, name: &str) -> Result<u64> {
        match self.tree.get(name.as_bytes())? {
            Some(bytes) => decode_counter(&bytes),
            None => Ok(0),
        }
    }
}
