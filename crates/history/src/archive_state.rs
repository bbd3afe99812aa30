//! History Archive State (HAS) parsing and handling.
//!
//! The HAS is the JSON document an archive publishes at its root and once per
//! checkpoint. It names the current ledger and the hashes of every bucket in
//! the bucket list at that ledger, which is how scans learn which buckets a
//! checkpoint depends on.

use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Deserializer, Serialize};

use crate::checkpoint::CheckpointManager;
use crate::error::HistoryError;
use crate::hash::Hash256;
use crate::range::Range;

/// Number of levels in the bucket list.
pub const NUM_LEVELS: usize = 11;

/// History Archive State.
///
/// Empty bucket slots are the all-zero hash on the wire and are skipped by
/// [`buckets`](Self::buckets).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryArchiveState {
    /// Format version.
    pub version: u32,

    /// Server that published the state (e.g. "stellar-core 22.0.0").
    #[serde(default)]
    pub server: String,

    /// Ledger this state describes.
    pub current_ledger: u32,

    /// Network passphrase, published since stellar-core 14.1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_passphrase: Option<String>,

    /// Live bucket list, always [`NUM_LEVELS`] levels.
    #[serde(
        default,
        serialize_with = "serialize_levels",
        deserialize_with = "deserialize_levels"
    )]
    pub current_buckets: [HasBucketLevel; NUM_LEVELS],

    /// Hot archive bucket list, present from protocol 23.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_archive_buckets: Option<Vec<HasBucketLevel>>,
}

/// One level of the bucket list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasBucketLevel {
    pub curr: Hash256,
    pub snap: Hash256,
    pub next: HasBucketNext,
}

/// Pending merge into a level.
///
/// `state` 0 means no merge, 1 means `output` is known, 2 means only the
/// inputs (`curr`, `snap`, `shadow`) are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasBucketNext {
    pub state: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Hash256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curr: Option<Hash256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snap: Option<Hash256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<Vec<Hash256>>,
}

fn serialize_levels<S: Serializer>(
    levels: &[HasBucketLevel; NUM_LEVELS],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(NUM_LEVELS))?;
    for level in levels {
        seq.serialize_element(level)?;
    }
    seq.end()
}

/// Reads up to [`NUM_LEVELS`] levels, padding missing ones with empty levels.
fn deserialize_levels<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<[HasBucketLevel; NUM_LEVELS], D::Error> {
    let parsed = Vec::<HasBucketLevel>::deserialize(deserializer)?;
    if parsed.len() > NUM_LEVELS {
        return Err(serde::de::Error::invalid_length(
            parsed.len(),
            &"at most 11 bucket levels",
        ));
    }
    let mut levels: [HasBucketLevel; NUM_LEVELS] = Default::default();
    for (slot, level) in levels.iter_mut().zip(parsed) {
        *slot = level;
    }
    Ok(levels)
}

impl HasBucketLevel {
    /// Non-empty bucket references held by this level.
    pub fn buckets(&self) -> impl Iterator<Item = Hash256> + '_ {
        [Some(self.curr), Some(self.snap), self.next.output]
            .into_iter()
            .flatten()
            .filter_map(Hash256::non_zero)
    }
}

impl HistoryArchiveState {
    /// An empty state at `current_ledger`.
    pub fn new(current_ledger: u32) -> Self {
        Self {
            version: 1,
            current_ledger,
            ..Self::default()
        }
    }

    /// Parse a History Archive State from JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use archivist_history::archive_state::HistoryArchiveState;
    ///
    /// let json = r#"{
    ///     "version": 1,
    ///     "server": "v14.1.0rc2",
    ///     "currentLedger": 31883135,
    ///     "networkPassphrase": "Public Global Stellar Network ; September 2015"
    /// }"#;
    ///
    /// let has = HistoryArchiveState::from_json(json).unwrap();
    /// assert_eq!(has.current_ledger, 31883135);
    /// assert!(has.buckets().is_empty());
    /// ```
    pub fn from_json(json: &str) -> Result<Self, HistoryError> {
        serde_json::from_str(json).map_err(HistoryError::Json)
    }

    /// Serialize with four-space indentation, the layout stellar-core publishes.
    pub fn to_json(&self) -> Result<String, HistoryError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        String::from_utf8(out).map_err(|e| HistoryError::CorruptFile {
            path: "<has>".to_string(),
            message: e.to_string(),
        })
    }

    /// Every non-empty bucket referenced by this state, in level order.
    pub fn buckets(&self) -> Vec<Hash256> {
        let hot = self.hot_archive_buckets.iter().flatten();
        self.current_buckets
            .iter()
            .chain(hot)
            .flat_map(HasBucketLevel::buckets)
            .collect()
    }

    /// Checkpoint range this state covers, from the first checkpoint to its ledger.
    pub fn range(&self, mgr: &CheckpointManager) -> Range {
        mgr.make_range(0, self.current_ledger)
    }

    pub fn network_passphrase(&self) -> Option<&str> {
        self.network_passphrase.as_deref()
    }
}
