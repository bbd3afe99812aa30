//! Archive path layout.
//!
//! Checkpoint files and buckets are sharded into three levels of two-hex-digit
//! directories, taken from the top bytes of the checkpoint number or hash:
//!
//! ```text
//! ledger/00/00/03/ledger-000003ff.xdr.gz
//! history/00/00/03/history-000003ff.json
//! bucket/e1/13/f8/bucket-e113f8cc...46fd.xdr.gz
//! .well-known/stellar-history.json
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::hash::Hash256;

/// Location of the archive's root state file.
pub const ROOT_HAS_PATH: &str = ".well-known/stellar-history.json";

/// Kinds of per-checkpoint files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    History,
    Ledger,
    Transactions,
    Results,
    Scp,
}

impl Category {
    /// Every category, in publication order.
    pub const ALL: [Category; 5] = [
        Category::History,
        Category::Ledger,
        Category::Transactions,
        Category::Results,
        Category::Scp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::History => "history",
            Category::Ledger => "ledger",
            Category::Transactions => "transactions",
            Category::Results => "results",
            Category::Scp => "scp",
        }
    }

    /// File extension. `history` files are plain JSON.
    pub fn extension(self) -> &'static str {
        match self {
            Category::History => "json",
            _ => "xdr.gz",
        }
    }

    /// Whether a complete archive must contain this category. Only `scp` is optional.
    pub fn is_required(self) -> bool {
        self != Category::Scp
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// A three-level shard directory such as `00/00/03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirPrefix(pub [u8; 3]);

impl DirPrefix {
    /// Shard holding the files of checkpoint `chk`.
    pub fn for_checkpoint(chk: u32) -> Self {
        let b = chk.to_be_bytes();
        Self([b[0], b[1], b[2]])
    }

    /// Shard holding the bucket `hash`.
    pub fn for_hash(hash: &Hash256) -> Self {
        Self([hash.0[0], hash.0[1], hash.0[2]])
    }

    /// `xx/yy/zz`.
    pub fn path(&self) -> String {
        format!("{:02x}/{:02x}/{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for DirPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Path of `category`'s file for checkpoint `chk`.
///
/// ```
/// use archivist_history::paths::{checkpoint_path, Category};
///
/// assert_eq!(
///     checkpoint_path(Category::Ledger, 0x3ff),
///     "ledger/00/00/03/ledger-000003ff.xdr.gz"
/// );
/// assert_eq!(
///     checkpoint_path(Category::History, 63),
///     "history/00/00/00/history-0000003f.json"
/// );
/// ```
pub fn checkpoint_path(category: Category, chk: u32) -> String {
    format!(
        "{cat}/{prefix}/{cat}-{chk:08x}.{ext}",
        cat = category.as_str(),
        prefix = DirPrefix::for_checkpoint(chk).path(),
        ext = category.extension(),
    )
}

/// Path of bucket `hash`.
pub fn bucket_path(hash: &Hash256) -> String {
    format!(
        "bucket/{}/bucket-{}.xdr.gz",
        DirPrefix::for_hash(hash).path(),
        hash.to_hex()
    )
}

/// Path of the per-checkpoint state file for `chk`.
pub fn has_path(chk: u32) -> String {
    checkpoint_path(Category::History, chk)
}

const CHECKPOINT_FILE_PATTERN: &str =
    r"(?:^|/)([a-z]+)/[0-9a-f]{2}/[0-9a-f]{2}/[0-9a-f]{2}/([a-z]+)-([0-9a-f]{8})\.(json|xdr\.gz)$";

const BUCKET_FILE_PATTERN: &str =
    r"(?:^|/)bucket/[0-9a-f]{2}/[0-9a-f]{2}/[0-9a-f]{2}/bucket-([0-9a-f]{64})\.xdr\.gz$";

fn checkpoint_file_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CHECKPOINT_FILE_PATTERN).ok())
        .as_ref()
}

fn bucket_file_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BUCKET_FILE_PATTERN).ok())
        .as_ref()
}

/// Checkpoint number encoded in a listed `category` file name, if it is one.
pub fn parse_checkpoint_path(category: Category, path: &str) -> Option<u32> {
    let caps = checkpoint_file_regex()?.captures(path)?;
    let cat = category.as_str();
    if &caps[1] != cat || &caps[2] != cat || &caps[4] != category.extension() {
        return None;
    }
    u32::from_str_radix(&caps[3], 16).ok()
}

/// Bucket hash encoded in a listed bucket file name, if it is one.
pub fn parse_bucket_path(path: &str) -> Option<Hash256> {
    let caps = bucket_file_regex()?.captures(path)?;
    Hash256::from_hex(&caps[1]).ok()
}
