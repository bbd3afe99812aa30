//! Hash verification of scanned archive contents.
//!
//! Ledger headers form a hash chain: each header names the hash of the one
//! before it, and commits to the hashes of its transaction set and result
//! set. Verifying a checkpoint records, per ledger, the hashes the headers
//! expect and the hashes the files actually produce. [`Archive::report_invalid`]
//! then compares the two.
//!
//! # Transaction set hashes
//!
//! Classic sets are stored in apply order but hashed in hash order:
//! `SHA-256(previous_ledger_hash || XDR(tx)...)` with transactions sorted by
//! the hash of their own XDR. Generalized sets hash their whole XDR.
//!
//! # Bucket hashes
//!
//! A bucket is named by the SHA-256 of its uncompressed file.
//! [`Archive::verify_bucket_entries`] additionally decodes every entry and
//! hashes the re-encoded frames, catching files that hash correctly only by
//! accident of framing.

use std::collections::HashMap;
use std::io::{self, BufReader};

use archivist_storage::ObjectRead;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    BucketEntry, LedgerHeaderHistoryEntry, Limits, TransactionHistoryEntry,
    TransactionHistoryEntryExt, TransactionHistoryResultEntry, TransactionSet, WriteXdr,
};
use tracing::{error, info};

use crate::archive::{Archive, ArchiveInterface, CommandOptions};
use crate::error::{HistoryError, Result};
use crate::hash::Hash256;
use crate::paths::{bucket_path, checkpoint_path, Category};
use crate::xdr_stream::write_framed_xdr;

fn finish(hasher: Sha256) -> Hash256 {
    let mut out = Hash256::ZERO;
    out.0.copy_from_slice(&hasher.finalize());
    out
}

/// Hash of a classic transaction set, sorting its transactions into hash order.
pub fn hash_tx_set(set: &TransactionSet) -> Result<Hash256> {
    let mut encoded = set
        .txs
        .iter()
        .map(|tx| tx.to_xdr(Limits::none()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    encoded.sort_by_cached_key(|bytes| Hash256::hash(bytes));

    let mut hasher = Sha256::new();
    hasher.update(set.previous_ledger_hash.0);
    for bytes in &encoded {
        hasher.update(bytes);
    }
    Ok(finish(hasher))
}

/// Hash of the transaction set carried by a history entry.
pub fn hash_tx_history_entry(entry: &TransactionHistoryEntry) -> Result<Hash256> {
    match &entry.ext {
        TransactionHistoryEntryExt::V0 => hash_tx_set(&entry.tx_set),
        TransactionHistoryEntryExt::V1(generalized) => Ok(Hash256::hash_xdr(generalized)?),
    }
}

/// Hash an empty classic set has: its previous ledger hash alone.
pub fn hash_empty_tx_set(previous_ledger_hash: &Hash256) -> Hash256 {
    Hash256::hash(previous_ledger_hash.as_bytes())
}

/// Hash of a zero-length XDR array, the encoding of an empty result set.
pub fn empty_xdr_array_hash() -> Hash256 {
    Hash256::hash(&[0u8; 4])
}

fn check_bucket_hash(expected: &Hash256, actual: Hash256) -> Result<()> {
    if actual != *expected {
        return Err(HistoryError::HashMismatch {
            what: format!("bucket {expected}"),
            expected: *expected,
            actual,
        });
    }
    Ok(())
}

/// Count expectations with no matching actual hash, logging each one.
///
/// `pass_on` excuses an expectation that has no actual hash at all.
fn compare_hash_maps(
    expect: &HashMap<u32, Hash256>,
    actual: &HashMap<u32, Hash256>,
    kind: &str,
    pass_on: impl Fn(u32, &Hash256) -> bool,
) -> u32 {
    let mut bad = 0;
    for (&ledger, expected) in expect {
        let found = actual.get(&ledger);
        if found.is_none() && pass_on(ledger, expected) {
            continue;
        }
        let got = found.copied().unwrap_or(Hash256::ZERO);
        if got != *expected {
            bad += 1;
            error!(
                kind,
                ledger = format_args!("0x{ledger:08x}"),
                expected = %expected,
                actual = %got,
                "Mismatched hash"
            );
        }
    }
    report_validity(kind, bad, expect.len());
    bad
}

fn report_validity(kind: &str, bad: u32, total: usize) {
    if bad == 0 {
        info!(kind, total, "Verified objects have expected hashes");
    } else {
        error!(kind, bad, total, "Objects have unexpected hashes");
    }
}

impl Archive {
    /// Check a header's own hash and record what it expects of its neighbours.
    pub fn verify_ledger_header_history_entry(
        &self,
        entry: &LedgerHeaderHistoryEntry,
    ) -> Result<()> {
        let actual = Hash256::hash_xdr(&entry.header)?;
        let claimed = Hash256::from(entry.hash.clone());
        let seq = entry.header.ledger_seq;
        if actual != claimed {
            return Err(HistoryError::HashMismatch {
                what: format!("ledger {seq}"),
                expected: claimed,
                actual,
            });
        }

        let mut state = self.scan.lock();
        state.actual_ledger_hashes.insert(seq, actual);
        state.expect_ledger_hashes.insert(
            seq.wrapping_sub(1),
            Hash256::from(entry.header.previous_ledger_hash.clone()),
        );
        state.expect_tx_set_hashes.insert(
            seq,
            Hash256::from(entry.header.scp_value.tx_set_hash.clone()),
        );
        state.expect_tx_result_set_hashes.insert(
            seq,
            Hash256::from(entry.header.tx_set_result_hash.clone()),
        );
        Ok(())
    }

    pub fn verify_transaction_history_entry(&self, entry: &TransactionHistoryEntry) -> Result<()> {
        let hash = hash_tx_history_entry(entry)?;
        self.scan
            .lock()
            .actual_tx_set_hashes
            .insert(entry.ledger_seq, hash);
        Ok(())
    }

    pub fn verify_transaction_history_result_entry(
        &self,
        entry: &TransactionHistoryResultEntry,
    ) -> Result<()> {
        let hash = Hash256::hash_xdr(&entry.tx_result_set)?;
        self.scan
            .lock()
            .actual_tx_result_set_hashes
            .insert(entry.ledger_seq, hash);
        Ok(())
    }

    /// Decode one checkpoint file and record the hashes of its contents.
    ///
    /// `history` and `scp` files carry nothing to verify.
    pub fn verify_category_checkpoint(&self, category: Category, chk: u32) -> Result<()> {
        let path = checkpoint_path(category, chk);
        match category {
            Category::Ledger => {
                let mut stream = self.get_xdr_stream(&path)?;
                while let Some(entry) = stream.read_one::<LedgerHeaderHistoryEntry>()? {
                    self.verify_ledger_header_history_entry(&entry)?;
                }
                stream.close()
            }
            Category::Transactions => {
                let mut stream = self.get_xdr_stream(&path)?;
                while let Some(entry) = stream.read_one::<TransactionHistoryEntry>()? {
                    self.verify_transaction_history_entry(&entry)?;
                }
                stream.close()
            }
            Category::Results => {
                let mut stream = self.get_xdr_stream(&path)?;
                while let Some(entry) = stream.read_one::<TransactionHistoryResultEntry>()? {
                    self.verify_transaction_history_result_entry(&entry)?;
                }
                stream.close()
            }
            Category::History | Category::Scp => Ok(()),
        }
    }

    /// Check that a bucket's decompressed bytes hash to its name.
    pub fn verify_bucket_hash(&self, hash: &Hash256) -> Result<()> {
        self.live_stats().inc_downloads();
        let mut reader = self.backend().get_file(&bucket_path(hash))?;
        let mut hasher = Sha256::new();
        let copied = io::copy(
            &mut BufReader::new(GzDecoder::new(&mut reader)),
            &mut hasher,
        );
        reader.close()?;
        copied.map_err(|e| HistoryError::CorruptFile {
            path: bucket_path(hash),
            message: e.to_string(),
        })?;
        check_bucket_hash(hash, finish(hasher))
    }

    /// Decode every entry of a bucket and check the re-framed entries hash to its name.
    pub fn verify_bucket_entries(&self, hash: &Hash256) -> Result<()> {
        let mut stream = self.get_xdr_stream_for_hash(hash)?;
        let mut hasher = Sha256::new();
        while let Some(entry) = stream.read_one::<BucketEntry>()? {
            write_framed_xdr(&mut hasher, &entry)?;
        }
        stream.close()?;
        check_bucket_hash(hash, finish(hasher))
    }

    /// Compare the hashes recorded by a verifying scan. Does nothing unless
    /// `opts.verify` is set.
    pub fn report_invalid(&self, opts: &CommandOptions) -> Result<()> {
        if !opts.verify {
            return Ok(());
        }
        let mut guard = self.scan.lock();
        let state = &mut *guard;

        // One before the first scanned checkpoint; never present.
        let lowest = state.expect_ledger_hashes.keys().min().copied();
        state.invalid_ledgers = compare_hash_maps(
            &state.expect_ledger_hashes,
            &state.actual_ledger_hashes,
            "ledger header",
            |ledger, _| Some(ledger) == lowest,
        );

        let expect_ledgers = &state.expect_ledger_hashes;
        state.invalid_tx_sets = compare_hash_maps(
            &state.expect_tx_set_hashes,
            &state.actual_tx_set_hashes,
            "transaction set",
            |ledger, expected| {
                let prev = expect_ledgers
                    .get(&ledger.wrapping_sub(1))
                    .copied()
                    .unwrap_or(Hash256::ZERO);
                *expected == hash_empty_tx_set(&prev)
            },
        );

        let empty = empty_xdr_array_hash();
        state.invalid_tx_result_sets = compare_hash_maps(
            &state.expect_tx_result_set_hashes,
            &state.actual_tx_result_set_hashes,
            "transaction result set",
            |_, expected| *expected == empty,
        );

        report_validity(
            "bucket",
            state.invalid_buckets,
            state.referenced_buckets.len(),
        );

        let total = state.invalid_buckets
            + state.invalid_ledgers
            + state.invalid_tx_sets
            + state.invalid_tx_result_sets;
        if total != 0 {
            return Err(HistoryError::InvalidObjects(total));
        }
        Ok(())
    }
}
