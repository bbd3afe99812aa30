mod common;

use std::path::Path;
use std::sync::Arc;
use std::thread;

use archivist_history::{Archive, ArchiveInterface, ArchiveOptions, HistoryError, StatsSnapshot};
use common::write_category_file;
use stellar_xdr::curr::{
    Hash, LedgerHeader, LedgerHeaderExt, LedgerHeaderHistoryEntry, LedgerHeaderHistoryEntryExt,
    StellarValue, StellarValueExt, TimePoint, TransactionHistoryEntry, TransactionHistoryEntryExt,
    TransactionHistoryResultEntry, TransactionHistoryResultEntryExt, TransactionResult,
    TransactionResultExt, TransactionResultPair, TransactionResultResult, TransactionResultSet,
    TransactionSet, VecM,
};

struct FakeArchive {
    headers: Vec<LedgerHeaderHistoryEntry>,
    transactions: Vec<TransactionHistoryEntry>,
    results: Vec<TransactionHistoryResultEntry>,
}

fn hash_of(byte: u8) -> Hash {
    let mut h = [0u8; 32];
    h[0] = byte;
    Hash(h)
}

fn make_header(seq: u32, hash: u8) -> LedgerHeaderHistoryEntry {
    let header = LedgerHeader {
        ledger_version: 0,
        previous_ledger_hash: Hash([0u8; 32]),
        scp_value: StellarValue {
            tx_set_hash: Hash([0u8; 32]),
            close_time: TimePoint(0),
            upgrades: VecM::default(),
            ext: StellarValueExt::Basic,
        },
        tx_set_result_hash: Hash([0u8; 32]),
        bucket_list_hash: Hash([0u8; 32]),
        ledger_seq: seq,
        total_coins: 0,
        fee_pool: 0,
        inflation_seq: 0,
        id_pool: 0,
        base_fee: 0,
        base_reserve: 0,
        max_tx_set_size: 0,
        skip_list: [
            Hash([0u8; 32]),
            Hash([0u8; 32]),
            Hash([0u8; 32]),
            Hash([0u8; 32]),
        ],
        ext: LedgerHeaderExt::V0,
    };
    LedgerHeaderHistoryEntry {
        hash: hash_of(hash),
        header,
        ext: LedgerHeaderHistoryEntryExt::V0,
    }
}

fn make_transactions(seq: u32, prev: u8) -> TransactionHistoryEntry {
    TransactionHistoryEntry {
        ledger_seq: seq,
        tx_set: TransactionSet {
            previous_ledger_hash: hash_of(prev),
            txs: VecM::default(),
        },
        ext: TransactionHistoryEntryExt::V0,
    }
}

fn make_results(seq: u32, tx_hash: u8) -> TransactionHistoryResultEntry {
    let result = TransactionResult {
        fee_charged: 0,
        result: TransactionResultResult::TxBadSeq,
        ext: TransactionResultExt::V0,
    };
    TransactionHistoryResultEntry {
        ledger_seq: seq,
        tx_result_set: TransactionResultSet {
            results: vec![TransactionResultPair {
                transaction_hash: hash_of(tx_hash),
                result,
            }]
            .try_into()
            .unwrap(),
        },
        ext: TransactionHistoryResultEntryExt::V0,
    }
}

/// Publish ledgers 1000..=1002 in checkpoint 0x3ff.
fn make_fake_archive(arch: &Archive) -> FakeArchive {
    let fake = FakeArchive {
        headers: vec![
            make_header(1000, 1),
            make_header(1001, 2),
            make_header(1002, 3),
        ],
        transactions: vec![
            make_transactions(1000, 10),
            make_transactions(1001, 11),
            make_transactions(1002, 12),
        ],
        results: vec![
            make_results(1000, 213),
            make_results(1001, 198),
            make_results(1002, 131),
        ],
    };
    write_category_file(
        arch,
        "ledger/00/00/03/ledger-000003ff.xdr.gz",
        &fake.headers,
    );
    write_category_file(
        arch,
        "transactions/00/00/03/transactions-000003ff.xdr.gz",
        &fake.transactions,
    );
    write_category_file(
        arch,
        "results/00/00/03/results-000003ff.xdr.gz",
        &fake.results,
    );
    fake
}

fn cached_archive(url: &str, cache: &Path) -> Archive {
    let opts = ArchiveOptions {
        cache_path: Some(cache.to_path_buf()),
        ..Default::default()
    };
    Archive::connect(url, &opts).unwrap()
}

fn stats(arch: &Archive) -> StatsSnapshot {
    arch.stats().remove(0)
}

fn assert_ledgers_match(arch: &Archive, fake: &FakeArchive) {
    let ledgers = arch.get_ledgers(1000, 1002).unwrap();
    assert_eq!(ledgers.len(), 3);
    for (i, seq) in [1000u32, 1001, 1002].into_iter().enumerate() {
        let ledger = &ledgers[&seq];
        assert_eq!(ledger.header.as_ref(), Some(&fake.headers[i]));
        assert_eq!(ledger.transaction.as_ref(), Some(&fake.transactions[i]));
        assert_eq!(ledger.transaction_result.as_ref(), Some(&fake.results[i]));
    }
}

#[test]
fn test_get_ledgers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let arch = cached_archive("mock://test", &cache);

    let err = arch.get_ledgers(1000, 1002).unwrap_err();
    assert!(matches!(err, HistoryError::UnpublishedCheckpoint(1023)));
    assert_eq!(err.to_string(), "checkpoint 1023 is not published");
    assert_eq!(stats(&arch).requests, 1);
    assert_eq!(stats(&arch).downloads, 0);

    let fake = make_fake_archive(&arch);

    // Three existence checks plus three downloads.
    assert_ledgers_match(&arch, &fake);
    let s = stats(&arch);
    assert_eq!(s.requests, 7);
    assert_eq!(s.downloads, 3);
    assert_eq!(s.cache_hits, 0);

    // Served from the cache; the existence checks still go upstream.
    assert_ledgers_match(&arch, &fake);
    let s = stats(&arch);
    assert_eq!(s.requests, 10);
    assert_eq!(s.downloads, 3);
    assert_eq!(s.cache_hits, 3);
    assert!(s.cache_bandwidth > 0);

    // Deleting the cache behind its back forces a refetch.
    std::fs::remove_dir_all(&cache).unwrap();
    assert_ledgers_match(&arch, &fake);
    let s = stats(&arch);
    assert_eq!(s.downloads, 6);
    assert_eq!(s.cache_hits, 3);
}

#[test]
fn test_get_ledgers_without_cache() {
    let arch = common::mock_archive();
    let fake = make_fake_archive(&arch);
    assert_ledgers_match(&arch, &fake);
    assert_ledgers_match(&arch, &fake);
    let s = stats(&arch);
    assert_eq!(s.downloads, 6);
    assert_eq!(s.cache_hits, 0);
}

#[test]
fn test_get_ledger_header() {
    let arch = common::mock_archive();
    let fake = make_fake_archive(&arch);
    assert_eq!(arch.get_ledger_header(1001).unwrap(), fake.headers[1]);
    assert!(matches!(
        arch.get_ledger_header(1010),
        Err(HistoryError::LedgerNotFound(1010))
    ));
}

#[test]
fn test_stressful_get_ledgers() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Arc::new(cached_archive("mock://test", &dir.path().join("cache")));
    let fake = Arc::new(make_fake_archive(&arch));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let arch = arch.clone();
            let fake = fake.clone();
            thread::spawn(move || assert_ledgers_match(&arch, &fake))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let s = stats(&arch);
    assert_eq!(s.downloads + s.cache_hits, 30);
}

#[test]
fn test_cache_does_not_deadlock_on_broken_reads() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let arch = cached_archive("fmock://test", &cache);
    make_fake_archive(&arch);

    assert!(arch.get_ledgers(1000, 1002).is_err());
    // The failed population left nothing behind that would pass for a cached file.
    let cache = arch.cache().unwrap();
    assert!(!cache.is_cached("ledger/00/00/03/ledger-000003ff.xdr.gz"));
    assert!(arch.get_ledgers(1000, 1002).is_err());
}
