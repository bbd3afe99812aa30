mod common;

use std::io::Write;
use std::sync::Arc;

use archivist_history::paths::{bucket_path, ROOT_HAS_PATH};
use archivist_history::{
    mirror, repair, Archive, ArchiveInterface, ArchiveOptions, Category, CommandOptions, Hash256,
    HistoryArchiveState, HistoryError, Range,
};
use archivist_storage::{MockStorage, StorageBackend};
use common::*;
use flate2::{write::GzEncoder, Compression};

#[test]
fn test_scan_populated_archive() {
    let opts = test_options();
    let arch = random_populated_archive();
    let range = arch.scan(&opts).unwrap();
    assert_eq!(range, test_range());
    assert_eq!(arch.report_missing(&range, &opts), 0);
}

#[test]
fn test_scan_size() {
    let opts = test_options();
    let arch = random_populated_archive();
    arch.scan(&opts).unwrap();
    let mgr = arch.checkpoint_manager();
    assert_eq!(
        opts.range.size_in_checkpoints(&mgr) as usize,
        arch.scanned_checkpoints(Category::History).len()
    );
}

#[test]
fn test_scan_size_subrange() {
    let mut opts = test_options();
    let arch = random_populated_archive();
    let mgr = arch.checkpoint_manager();
    opts.range.low = mgr.next_checkpoint(opts.range.low + 1);
    opts.range.high = mgr.prev_checkpoint(opts.range.high - 1);
    arch.scan(&opts).unwrap();
    assert_eq!(
        opts.range.size_in_checkpoints(&mgr) as usize,
        arch.scanned_checkpoints(Category::History).len()
    );
}

#[test]
fn test_scan_single_checkpoint_references_few_buckets() {
    let mut opts = test_options();
    opts.range = Range::new(0x1ff, 0x1ff);
    let arch = random_populated_archive();
    arch.scan(&opts).unwrap();
    assert_eq!(arch.scanned_checkpoints(Category::History), vec![0x1ff]);
    assert_eq!(arch.referenced_buckets().len(), 33);
}

#[test]
fn test_scan_whole_range_references_all_buckets() {
    let opts = test_options();
    let arch = random_populated_archive();
    arch.scan(&opts).unwrap();
    assert_eq!(arch.referenced_buckets().len(), 15 * 33);
}

#[test]
fn test_scan_slow_missing() {
    let opts = test_options();
    let arch = mock_archive();
    populate_random_range_with_gap(&arch, test_range(), 0x1bf);
    arch.scan_checkpoints_slow(&opts, &opts.range).unwrap();
    let missing: Vec<(Category, Vec<u32>)> = arch
        .check_checkpoint_files_missing(&opts.range)
        .into_iter()
        .filter(|(_, missing)| !missing.is_empty())
        .collect();
    assert_eq!(missing.len(), 5);
    assert!(missing.iter().all(|(_, chks)| chks == &vec![0x1bf]));
}

#[test]
fn test_scan_fast_missing_matches_slow() {
    let opts = test_options();
    let arch = mock_archive();
    populate_random_range_with_gap(&arch, test_range(), 0x1bf);
    arch.scan_checkpoints(&opts).unwrap();
    let total: usize = arch
        .check_checkpoint_files_missing(&opts.range)
        .values()
        .map(Vec::len)
        .sum();
    assert_eq!(total, 5);
}

#[test]
fn test_scan_filesystem_archive() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let arch = Archive::connect(&url, &ArchiveOptions::default()).unwrap();
    populate_random_range(&arch, test_range());

    let opts = test_options();
    assert_eq!(count_missing(&arch, &opts), 0);

    std::fs::remove_file(dir.path().join(bucket_path(&arch.get_root_has().unwrap().buckets()[0])))
        .unwrap();
    let fresh = Archive::connect(&url, &ArchiveOptions::default()).unwrap();
    assert_eq!(count_missing(&fresh, &opts), 1);
}

#[test]
fn test_mirror() {
    let opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    let report = mirror(&src, &dst, &opts).unwrap();
    assert_eq!(report.checkpoint_files, 15 * 5);
    assert_eq!(report.buckets, 15 * 33);
    assert_eq!(count_missing(&dst, &opts), 0);
    assert_eq!(dst.get_root_has().unwrap().current_ledger, 0x3bf);
}

#[test]
fn test_mirror_twice_copies_nothing() {
    let opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();
    let second = mirror(&src, &dst, &opts).unwrap();
    assert_eq!(second.copied(), 0);
    assert_eq!(second.skipped, 15 * (5 + 33));
}

#[test]
fn test_only_required() {
    let with_optional = test_options();
    let only_required = CommandOptions {
        skip_optional: true,
        ..test_options()
    };

    let src = random_populated_archive();
    let dst_with_optional = mock_archive();
    let dst_only_required = mock_archive();

    mirror(&src, &dst_with_optional, &with_optional).unwrap();
    mirror(&src, &dst_only_required, &only_required).unwrap();

    assert_eq!(count_missing(&dst_with_optional, &with_optional), 0);
    assert_eq!(count_missing(&dst_with_optional, &only_required), 0);

    assert_ne!(count_missing(&dst_only_required, &with_optional), 0);
    assert_eq!(count_missing(&dst_only_required, &only_required), 0);

    // The first repair leaves optional files alone, the second fills them in.
    let first = repair(&src, &dst_only_required, &only_required).unwrap();
    assert_eq!(first.copied(), 0);
    assert_ne!(count_missing(&dst_only_required, &with_optional), 0);
    let second = repair(&src, &dst_only_required, &with_optional).unwrap();
    assert_eq!(second.checkpoint_files, 15);
    assert_eq!(count_missing(&dst_only_required, &with_optional), 0);
}

#[test]
fn test_mirror_then_repair() {
    let opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();
    assert_eq!(count_missing(&dst, &opts), 0);

    let bad = 0x1ff;
    add_random_checkpoint(&src, bad);
    copy_file(Category::History, bad, &src, &dst);
    assert_ne!(count_missing(&dst, &opts), 0);

    let report = repair(&src, &dst, &opts).unwrap();
    assert_eq!(report.buckets, 33);
    assert_eq!(count_missing(&dst, &opts), 0);

    // A second pass finds nothing left to do.
    let again = repair(&src, &dst, &opts).unwrap();
    assert_eq!(again.copied(), 0);
}

#[test]
fn test_repair_restores_deleted_checkpoint_file() {
    let opts = test_options();
    let src = random_populated_archive();
    let dst_mock = Arc::new(MockStorage::new());
    let dst = Archive::with_backend("mock://dst", dst_mock.clone(), &ArchiveOptions::default())
        .unwrap();
    mirror(&src, &dst, &opts).unwrap();

    let path = archivist_history::paths::checkpoint_path(Category::Results, 0x13f);
    assert!(dst_mock.remove(&path));
    assert_eq!(count_missing(&dst, &opts), 1);

    dst.clear_cached_info();
    let report = repair(&src, &dst, &opts).unwrap();
    assert_eq!(report.checkpoint_files, 1);
    assert!(dst.backend().exists(&path).unwrap());
}

#[test]
fn test_mirror_subset_does_pointer_update() {
    let mut opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();
    let old_high = opts.range.high;
    assert_eq!(dst.get_root_has().unwrap().current_ledger, old_high);

    opts.range.high = src.checkpoint_manager().next_checkpoint(old_high + 1);
    add_random_checkpoint(&src, opts.range.high);
    mirror(&src, &dst, &opts).unwrap();
    assert_eq!(dst.get_root_has().unwrap().current_ledger, opts.range.high);
}

#[test]
fn test_mirror_subset_no_pointer_update() {
    let mut opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();
    let old_high = opts.range.high;
    assert_eq!(dst.get_root_has().unwrap().current_ledger, old_high);

    add_random_checkpoint(&src, src.checkpoint_manager().next_checkpoint(old_high + 1));
    opts.range = Range::new(0x7f, 0xff);
    mirror(&src, &dst, &opts).unwrap();
    assert_eq!(dst.get_root_has().unwrap().current_ledger, old_high);
}

#[test]
fn test_mirror_past_gap_keeps_pointer() {
    let mut opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();
    assert_eq!(dst.get_root_has().unwrap().current_ledger, 0x3bf);

    populate_random_range(&src, Range::new(0x3ff, 0x4bf));
    opts.range = Range::new(0x47f, 0x4bf);
    let report = mirror(&src, &dst, &opts).unwrap();
    assert_eq!(report.checkpoint_files, 2 * 5);

    // 0x3ff..0x43f were never mirrored, so the root must not cover them.
    assert_eq!(dst.get_root_has().unwrap().current_ledger, 0x3bf);
    assert!(!dst
        .category_checkpoint_exists(Category::Ledger, 0x3ff)
        .unwrap());
}

#[test]
fn test_mirror_adjacent_range_moves_pointer() {
    let mut opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();

    populate_random_range(&src, Range::new(0x3ff, 0x43f));
    opts.range = Range::new(0x3ff, 0x43f);
    mirror(&src, &dst, &opts).unwrap();
    assert_eq!(dst.get_root_has().unwrap().current_ledger, 0x43f);
}

#[test]
fn test_dry_run_no_repair() {
    let mut opts = test_options();
    let src = random_populated_archive();
    let dst = mock_archive();
    mirror(&src, &dst, &opts).unwrap();
    assert_eq!(count_missing(&dst, &opts), 0);

    let bad = 0x1ff;
    add_random_checkpoint(&src, bad);
    copy_file(Category::History, bad, &src, &dst);
    assert_ne!(count_missing(&dst, &opts), 0);

    opts.dry_run = true;
    let report = repair(&src, &dst, &opts).unwrap();
    assert_eq!(report.copied(), 0);
    assert_ne!(count_missing(&dst, &opts), 0);
}

#[test]
fn test_dry_run_mirror_writes_nothing() {
    let opts = CommandOptions {
        dry_run: true,
        ..test_options()
    };
    let src = random_populated_archive();
    let dst_mock = Arc::new(MockStorage::new());
    let dst = Archive::with_backend("mock://dst", dst_mock.clone(), &ArchiveOptions::default())
        .unwrap();
    mirror(&src, &dst, &opts).unwrap();
    assert!(dst_mock.is_empty());
    assert!(!dst.backend().exists(ROOT_HAS_PATH).unwrap());
}

#[test]
fn test_mirror_from_unpublished_source_fails() {
    let src = mock_archive();
    let dst = mock_archive();
    let err = mirror(&src, &dst, &test_options()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_network_passphrase() {
    const PUBNET: &str = "Public Global Stellar Network ; September 2015";
    const TESTNET: &str = "Test SDF Network ; September 2015";
    let with_network = format!(
        r#"{{"version": 1, "server": "v14.1.0rc2", "currentLedger": 31883135, "networkPassphrase": "{PUBNET}"}}"#
    );
    let without_network = r#"{"version": 1, "server": "v14.1.0rc2", "currentLedger": 31883135}"#;

    let connect = |passphrase: Option<&str>, has: &str| {
        let opts = ArchiveOptions {
            network_passphrase: passphrase.map(str::to_string),
            ..Default::default()
        };
        let arch = Archive::connect("mock://test", &opts).unwrap();
        arch.backend()
            .put_file("has.json", &mut has.as_bytes())
            .unwrap();
        arch
    };

    // Nothing configured.
    assert!(connect(None, &with_network).get_path_has("has.json").is_ok());
    // Nothing published.
    assert!(connect(Some(PUBNET), without_network)
        .get_path_has("has.json")
        .is_ok());
    // Matching.
    assert!(connect(Some(PUBNET), &with_network)
        .get_path_has("has.json")
        .is_ok());
    // Mismatch.
    let err = connect(Some(TESTNET), &with_network)
        .get_path_has("has.json")
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Network passphrase does not match! expected={TESTNET} actual={PUBNET}")
    );
}

fn put_gz_bucket(backend: &dyn StorageBackend, name: &Hash256, content: &[u8]) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    let data = encoder.finish().unwrap();
    backend
        .put_file(&bucket_path(name), &mut data.as_slice())
        .unwrap();
}

#[test]
fn test_verifying_scan_flags_corrupt_bucket() {
    let arch = mock_archive();
    let good_content = b"good bucket".to_vec();
    let good = Hash256::hash(&good_content);
    let bad = Hash256::hash(b"what the name promises");
    put_gz_bucket(arch.backend().as_ref(), &good, &good_content);
    put_gz_bucket(arch.backend().as_ref(), &bad, b"something else");

    let mut has = HistoryArchiveState::new(63);
    has.current_buckets[0].curr = good;
    has.current_buckets[0].snap = bad;
    let force = CommandOptions {
        force: true,
        ..Default::default()
    };
    arch.put_checkpoint_has(63, &has, &force).unwrap();
    arch.put_root_has(&has, &force).unwrap();

    let opts = CommandOptions {
        verify: true,
        ..test_options()
    };
    let err = arch.scan(&opts).unwrap_err();
    assert!(matches!(
        err,
        HistoryError::Aggregate {
            count: 1,
            operation: "scanning buckets"
        }
    ));
    assert!(matches!(
        arch.report_invalid(&opts),
        Err(HistoryError::InvalidObjects(1))
    ));
}
