//! Convergence verification for mirrored stores.
//!
//! Two stores holding the same records produce the same digest, however
//! the records got there (one long run, many interrupted runs, repeated
//! runs). This is how idempotence and no-loss properties are checked.

use std::fmt;

use histmirror_core::{record_digest, Table};
use histmirror_store::{Order, RecordStore, RecordStoreExt};

use crate::error::Result;

/// Deterministic digest of a store's full contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreDigest(pub [u8; 32]);

impl StoreDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for StoreDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StoreDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the digest of every record in every table.
///
/// Algorithm:
/// 1. For each table in schema order, hash its name
/// 2. Stream its records in ascending id order
/// 3. Hash each record's canonical digest
pub async fn compute_store_digest<S: RecordStore + ?Sized>(store: &S) -> Result<StoreDigest> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"histmirror-store-v0:");

    for table in Table::ALL {
        hasher.update(table.name().as_bytes());
        hasher.update(&[0]);

        let mut cursor = store.query(table, None, Order::IdAsc);
        while let Some(record) = cursor.next().await? {
            hasher.update(&record_digest(&record).0);
        }
    }

    Ok(StoreDigest(*hasher.finalize().as_bytes()))
}

/// Result of comparing two stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both stores hold identical records.
    Converged,
    /// The stores differ.
    NotConverged { reason: String },
}

impl ConvergenceResult {
    /// Check if the stores have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare two stores, naming the first table whose row count differs.
pub async fn verify_convergence<A, B>(local: &A, other: &B) -> Result<ConvergenceResult>
where
    A: RecordStore + ?Sized,
    B: RecordStore + ?Sized,
{
    for table in Table::ALL {
        let ours = local.count(table, None).await?;
        let theirs = other.count(table, None).await?;
        if ours != theirs {
            return Ok(ConvergenceResult::NotConverged {
                reason: format!("{table} count mismatch: local={ours}, other={theirs}"),
            });
        }
    }

    if compute_store_digest(local).await? != compute_store_digest(other).await? {
        return Ok(ConvergenceResult::NotConverged {
            reason: "store digest mismatch".into(),
        });
    }

    Ok(ConvergenceResult::Converged)
}
