//! Fixtures shared by the archive integration tests.

#![allow(dead_code)]

use std::io::Write;

use archivist_history::archive_state::{HasBucketNext, NUM_LEVELS};
use archivist_history::paths::{bucket_path, checkpoint_path};
use archivist_history::xdr_stream::write_framed_xdr;
use archivist_history::{
    Archive, ArchiveInterface, ArchiveOptions, Category, CommandOptions, Hash256,
    HistoryArchiveState, Range,
};
use flate2::{write::GzEncoder, Compression};
use rand::RngCore;
use stellar_xdr::curr::WriteXdr;

pub fn test_range() -> Range {
    Range::new(63, 0x3bf)
}

pub fn test_options() -> CommandOptions {
    CommandOptions {
        range: test_range(),
        concurrency: 16,
        ..Default::default()
    }
}

pub fn mock_archive() -> Archive {
    Archive::connect("mock://test", &ArchiveOptions::default()).unwrap()
}

fn random_bytes() -> Vec<u8> {
    let mut buf = vec![0u8; 1024];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

pub fn add_random_bucket(arch: &Archive) -> Hash256 {
    let data = random_bytes();
    let hash = Hash256::hash(&data);
    arch.backend()
        .put_file(&bucket_path(&hash), &mut data.as_slice())
        .unwrap();
    hash
}

pub fn add_random_checkpoint_file(arch: &Archive, category: Category, chk: u32) {
    arch.backend()
        .put_file(&checkpoint_path(category, chk), &mut random_bytes().as_slice())
        .unwrap();
}

/// Publish `chk` with fresh random buckets and files, moving the root HAS to it.
pub fn add_random_checkpoint(arch: &Archive, chk: u32) {
    let force = CommandOptions {
        force: true,
        ..Default::default()
    };
    for category in Category::ALL {
        if category != Category::History {
            add_random_checkpoint_file(arch, category, chk);
            continue;
        }
        let mut has = HistoryArchiveState::new(chk);
        for level in has.current_buckets.iter_mut().take(NUM_LEVELS) {
            level.curr = add_random_bucket(arch);
            level.snap = add_random_bucket(arch);
            level.next = HasBucketNext {
                state: 1,
                output: Some(add_random_bucket(arch)),
                ..Default::default()
            };
        }
        arch.put_checkpoint_has(chk, &has, &force).unwrap();
        arch.put_root_has(&has, &force).unwrap();
    }
}

pub fn populate_random_range(arch: &Archive, range: Range) {
    let mgr = arch.checkpoint_manager();
    for chk in range.checkpoints(&mgr) {
        add_random_checkpoint(arch, chk);
    }
}

pub fn populate_random_range_with_gap(arch: &Archive, range: Range, gap: u32) {
    let mgr = arch.checkpoint_manager();
    for chk in range.checkpoints(&mgr).filter(|chk| *chk != gap) {
        add_random_checkpoint(arch, chk);
    }
}

pub fn random_populated_archive() -> Archive {
    let arch = mock_archive();
    populate_random_range(&arch, test_range());
    arch
}

/// Scan `arch` and count missing files and buckets the way `opts` asks.
pub fn count_missing(arch: &Archive, opts: &CommandOptions) -> usize {
    let range = match arch.scan(opts) {
        Ok(range) => range,
        Err(_) => opts.range,
    };
    let files: usize = arch
        .check_checkpoint_files_missing(&range)
        .iter()
        .filter(|(category, _)| category.is_required() || !opts.skip_optional)
        .map(|(_, missing)| missing.len())
        .sum();
    files + arch.check_buckets_missing().len()
}

/// Copy one checkpoint file between backends, bypassing the archive layer.
pub fn copy_file(category: Category, chk: u32, src: &Archive, dst: &Archive) {
    let path = checkpoint_path(category, chk);
    let mut reader = src.backend().get_file(&path).unwrap();
    dst.backend().put_file(&path, &mut reader).unwrap();
}

/// Write `entries` as a gzipped stream of framed XDR records.
pub fn write_category_file<T: WriteXdr>(arch: &Archive, path: &str, entries: &[T]) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for entry in entries {
        write_framed_xdr(&mut encoder, entry).unwrap();
    }
    encoder.flush().unwrap();
    let data = encoder.finish().unwrap();
    arch.backend().put_file(path, &mut data.as_slice()).unwrap();
}
