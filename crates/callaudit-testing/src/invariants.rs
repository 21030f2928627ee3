//! Audit trail invariants.
//!
//! Checks that hold for the rows of any single logical call, no matter how
//! many retries it took or whether it ended in success.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use callaudit_core::{AuditRecord, EventKind, RequestId};

/// Invariants over persisted audit rows.
pub struct Invariants;

impl Invariants {
    /// Every row shares one request id and the trail starts with a single
    /// `INITIATED` row.
    pub fn starts_with_initiated(rows: &[AuditRecord]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };

        ensure!(
            first.event_kind == EventKind::Initiated,
            "trail for {} starts with {} instead of INITIATED",
            first.request_id,
            first.event_kind
        );

        let initiated = rows.iter().filter(|r| r.event_kind == EventKind::Initiated).count();
        ensure!(initiated == 1, "trail for {} has {initiated} INITIATED rows", first.request_id);

        for row in rows {
            ensure!(
                row.request_id == first.request_id,
                "trail mixes request ids {} and {}",
                first.request_id,
                row.request_id
            );
        }
        Ok(())
    }

    /// Error rows carry increasing retry counts starting at zero, and
    /// `is_retry` agrees with the count and the kind.
    pub fn retry_counts_consistent(rows: &[AuditRecord]) -> Result<()> {
        let errors: Vec<_> = rows.iter().filter(|r| r.event_kind.is_error()).collect();

        for (expected, row) in errors.iter().enumerate() {
            let expected = i32::try_from(expected)?;
            ensure!(
                row.retry_count == expected,
                "error row {} has retry_count {} but {} was expected",
                row.id,
                row.retry_count,
                expected
            );
            ensure!(
                row.is_retry == (row.retry_count > 0),
                "error row {} has is_retry {} with retry_count {}",
                row.id,
                row.is_retry,
                row.retry_count
            );
            ensure!(
                row.event_kind == EventKind::for_error(row.is_retry),
                "error row {} is {} with is_retry {}",
                row.id,
                row.event_kind,
                row.is_retry
            );
        }
        Ok(())
    }

    /// At most one `SUCCESS` row, and nothing after it.
    pub fn success_is_terminal(rows: &[AuditRecord]) -> Result<()> {
        let successes: Vec<_> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.event_kind == EventKind::Success)
            .map(|(position, _)| position)
            .collect();

        ensure!(successes.len() <= 1, "trail has {} SUCCESS rows", successes.len());
        if let Some(&position) = successes.first() {
            ensure!(
                position == rows.len() - 1,
                "SUCCESS row is followed by {} more rows",
                rows.len() - 1 - position
            );
        }
        Ok(())
    }

    /// Runs every single-trail check.
    pub fn check_trail(rows: &[AuditRecord]) -> Result<()> {
        Self::starts_with_initiated(rows)?;
        Self::retry_counts_consistent(rows)?;
        Self::success_is_terminal(rows)
    }

    /// Groups `rows` by request id and checks every trail.
    pub fn check_all(rows: &[AuditRecord]) -> Result<()> {
        let mut trails: BTreeMap<&RequestId, Vec<AuditRecord>> = BTreeMap::new();
        for row in rows {
            trails.entry(&row.request_id).or_default().push(row.clone());
        }

        for trail in trails.values_mut() {
            trail.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
            Self::check_trail(trail)?;
        }
        Ok(())
    }
}
