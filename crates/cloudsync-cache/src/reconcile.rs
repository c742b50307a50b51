//! Merging on-demand overrides into a fresh scan.
//!
//! [`reconcile`] is a pure function. It decides, for every pending
//! on-demand entry, whether the scan has caught up with it, merges the
//! entries that are still ahead of the scan and reports what the caller
//! must write back to the [`OnDemandStore`](crate::OnDemandStore).

use std::fmt;

use cloudsync_core::{Namespace, Timestamp};
use serde::Serialize;
use tracing::{debug, warn};

use crate::on_demand::OnDemandEntry;
use crate::result::CacheResult;

/// Whether an on-demand entry survives a reconcile pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// Merge the entry and keep it for the next pass.
    Keep,
    /// The scan has caught up; drop the entry.
    Evict,
}

/// The staleness rule.
///
/// An entry is kept while it was captured no earlier than the scan started,
/// and always on the first pass that sees it.
#[must_use]
pub fn decide(scan_start: Timestamp, captured_at: Timestamp, processed_count: u32) -> Decision {
    if captured_at >= scan_start || processed_count == 0 {
        Decision::Keep
    } else {
        Decision::Evict
    }
}

/// Why an entry was evicted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EvictReason {
    /// The scan started after the capture and the entry was already merged once.
    Stale,
    /// The payload could not be decoded.
    Malformed(String),
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => f.write_str("stale"),
            Self::Malformed(message) => write!(f, "malformed payload: {message}"),
        }
    }
}

/// An entry to write back with its processed count bumped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeptEntry {
    /// Resource key.
    pub key: String,
    /// Store write the decision was made for.
    pub generation: u64,
    /// Processed count before this pass.
    pub processed_count: u32,
}

/// An entry to remove from the on-demand store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvictedEntry {
    /// Resource key.
    pub key: String,
    /// Store write the decision was made for.
    pub generation: u64,
    /// Why.
    pub reason: EvictReason,
}

/// Output of one reconcile pass.
#[derive(Clone, Debug, Default)]
pub struct Reconciliation {
    /// The fresh scan with kept overrides merged in.
    pub result: CacheResult,
    /// Entries to mark processed.
    pub kept: Vec<KeptEntry>,
    /// Entries to evict.
    pub evicted: Vec<EvictedEntry>,
    /// Entities removed from `result` because an override says the resource
    /// no longer exists.
    pub removed: Vec<(Namespace, String)>,
}

/// Merge the still-relevant overrides in `pending` into `fresh`.
///
/// Entries are applied oldest capture first so that when two overrides touch
/// the same entity the newer one wins. A kept entry whose payload declares
/// its own namespace but does not contain its own key means the resource is
/// gone: the key is removed from the result instead of merged.
pub fn reconcile(
    scan_start: Timestamp,
    fresh: CacheResult,
    mut pending: Vec<OnDemandEntry>,
) -> Reconciliation {
    pending.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.key.cmp(&b.key)));

    let mut out = Reconciliation {
        result: fresh,
        ..Reconciliation::default()
    };

    for entry in pending {
        match decide(scan_start, entry.captured_at, entry.processed_count) {
            Decision::Evict => {
                debug!(
                    key = %entry.key,
                    captured_at = %entry.captured_at,
                    scan_start = %scan_start,
                    processed_count = entry.processed_count,
                    "evicting stale on-demand entry"
                );
                out.evicted.push(EvictedEntry {
                    key: entry.key,
                    generation: entry.generation,
                    reason: EvictReason::Stale,
                });
            }
            Decision::Keep => {
                let payload = match entry.decode() {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(key = %entry.key, %error, "evicting unreadable on-demand entry");
                        out.evicted.push(EvictedEntry {
                            key: entry.key,
                            generation: entry.generation,
                            reason: EvictReason::Malformed(error.to_string()),
                        });
                        continue;
                    }
                };

                if payload.has_namespace(entry.namespace)
                    && !payload.contains(entry.namespace, &entry.key)
                    && out.result.remove(entry.namespace, &entry.key).is_some()
                {
                    debug!(key = %entry.key, namespace = %entry.namespace, "on-demand entry removes entity");
                    out.removed.push((entry.namespace, entry.key.clone()));
                }

                out.result.merge_all(payload);
                out.kept.push(KeptEntry {
                    key: entry.key,
                    generation: entry.generation,
                    processed_count: entry.processed_count,
                });
            }
        }
    }

    out
}
