//! Usage statistics embedded in every workspace, library and file manifest.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub};
use time::OffsetDateTime;

/// How far the numbers in a [`StorageStats`] can be trusted. Advisory only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityState {
    /// Maintained incrementally; no known problems.
    #[default]
    Healthy,
    /// Recomputed from disk by the reconciler.
    Reconciled,
    /// An incremental update could not be applied exactly.
    Drifted,
}

/// Denormalized usage counters.
///
/// `physical_*` counts everything on disk, `active_*` only the content bound
/// to the current source hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub active_bytes: u64,
    pub physical_bytes: u64,
    pub active_file_count: u64,
    pub total_file_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub last_full_scan: Option<OffsetDateTime>,
    pub integrity_state: IntegrityState,
}
impl StorageStats {
    pub fn empty(now: OffsetDateTime) -> Self {
        Self::from_tally(Tally::default(), now, IntegrityState::Healthy)
    }

    pub fn from_tally(tally: Tally, now: OffsetDateTime, integrity_state: IntegrityState) -> Self {
        Self {
            active_bytes: tally.active_bytes,
            physical_bytes: tally.physical_bytes,
            active_file_count: tally.active_files,
            total_file_count: tally.total_files,
            last_updated: now,
            last_full_scan: None,
            integrity_state,
        }
    }

    /// Ground truth straight from a walk of the tree.
    pub fn reconciled(tally: Tally, now: OffsetDateTime) -> Self {
        Self {
            last_full_scan: Some(now),
            ..Self::from_tally(tally, now, IntegrityState::Reconciled)
        }
    }

    pub fn tally(&self) -> Tally {
        Tally {
            active_bytes: self.active_bytes,
            physical_bytes: self.physical_bytes,
            active_files: self.active_file_count,
            total_files: self.total_file_count,
        }
    }

    /// Apply a signed delta. Returns `false` if any counter would have gone
    /// negative; that counter is clamped to zero and the stats are marked
    /// [`Drifted`](IntegrityState::Drifted).
    pub fn apply(&mut self, delta: UsageDelta, now: OffsetDateTime) -> bool {
        let mut exact = true;
        for (counter, change) in [
            (&mut self.active_bytes, delta.active_bytes),
            (&mut self.physical_bytes, delta.physical_bytes),
            (&mut self.active_file_count, delta.active_files),
            (&mut self.total_file_count, delta.total_files),
        ] {
            match counter.checked_add_signed(change) {
                Some(value) => *counter = value,
                None => {
                    *counter = if change < 0 { 0 } else { u64::MAX };
                    exact = false;
                },
            }
        }
        if !exact {
            self.integrity_state = IntegrityState::Drifted;
        }
        self.last_updated = now;
        exact
    }
}

/// Plain unsigned counters, used while summing a walk of the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub active_bytes: u64,
    pub physical_bytes: u64,
    pub active_files: u64,
    pub total_files: u64,
}
impl Tally {
    /// Content that counts as both physical and active.
    pub fn active(bytes: u64, files: u64) -> Self {
        Self {
            active_bytes: bytes,
            physical_bytes: bytes,
            active_files: files,
            total_files: files,
        }
    }

    /// Content that is on disk but not bound to the current source.
    pub fn physical(bytes: u64, files: u64) -> Self {
        Self {
            physical_bytes: bytes,
            total_files: files,
            ..Self::default()
        }
    }
}
impl Add for Tally {
    type Output = Tally;
    fn add(mut self, rhs: Tally) -> Tally {
        self += rhs;
        self
    }
}
impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Tally) {
        self.active_bytes = self.active_bytes.saturating_add(rhs.active_bytes);
        self.physical_bytes = self.physical_bytes.saturating_add(rhs.physical_bytes);
        self.active_files = self.active_files.saturating_add(rhs.active_files);
        self.total_files = self.total_files.saturating_add(rhs.total_files);
    }
}
impl std::iter::Sum for Tally {
    fn sum<I: Iterator<Item = Tally>>(iter: I) -> Tally {
        iter.fold(Tally::default(), Add::add)
    }
}

/// A signed change to usage counters, bubbled from a manifest up to its
/// ancestors. Adding and removing content share one code path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub active_bytes: i64,
    pub physical_bytes: i64,
    pub active_files: i64,
    pub total_files: i64,
}
impl UsageDelta {
    /// New content bound to the current source: counts as active and physical.
    pub fn uniform(bytes: u64, files: u64) -> Self {
        Tally::active(bytes, files).into()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}
impl From<Tally> for UsageDelta {
    fn from(tally: Tally) -> Self {
        let signed = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
        Self {
            active_bytes: signed(tally.active_bytes),
            physical_bytes: signed(tally.physical_bytes),
            active_files: signed(tally.active_files),
            total_files: signed(tally.total_files),
        }
    }
}
impl From<&StorageStats> for UsageDelta {
    fn from(stats: &StorageStats) -> Self {
        stats.tally().into()
    }
}
impl Neg for UsageDelta {
    type Output = UsageDelta;
    fn neg(self) -> UsageDelta {
        Self {
            active_bytes: self.active_bytes.saturating_neg(),
            physical_bytes: self.physical_bytes.saturating_neg(),
            active_files: self.active_files.saturating_neg(),
            total_files: self.total_files.saturating_neg(),
        }
    }
}
impl Add for UsageDelta {
    type Output = UsageDelta;
    fn add(self, rhs: UsageDelta) -> UsageDelta {
        Self {
            active_bytes: self.active_bytes.saturating_add(rhs.active_bytes),
            physical_bytes: self.physical_bytes.saturating_add(rhs.physical_bytes),
            active_files: self.active_files.saturating_add(rhs.active_files),
            total_files: self.total_files.saturating_add(rhs.total_files),
        }
    }
}
impl Sub for UsageDelta {
    type Output = UsageDelta;
    fn sub(self, rhs: UsageDelta) -> UsageDelta {
        self + -rhs
    }
}
