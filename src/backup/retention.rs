//! Pruning of old backup artifacts.
//!
//! Candidates are discovered from destination listings by file name only, so
//! anything that does not follow the artifact naming scheme is never touched.

use crate::backup::destination::{Destination, Target};
use crate::backup::progress::{scaled, Reporter};
use crate::backup::record::BackupRecord;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use bon::Builder;
use chrono::{NaiveDateTime, TimeDelta};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    /// Keep the newest `value` artifacts.
    #[default]
    Count,
    /// Keep artifacts younger than `value` units.
    Age,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeUnit {
    #[default]
    Days,
    Weeks,
    Months,
    Years,
}

impl AgeUnit {
    /// Length in days. Months and years are fixed approximations.
    pub fn days(self) -> f64 {
        match self {
            AgeUnit::Days => 1.0,
            AgeUnit::Weeks => 7.0,
            AgeUnit::Months => 30.4,
            AgeUnit::Years => 365.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Builder, Getters, CopyGetters)]
pub struct RetentionPolicy {
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    enabled: bool,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    mode: RetentionMode,
    #[getset(get_copy = "pub")]
    value: u32,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    unit: AgeUnit,
    /// Destination ids the policy is applied to. Empty means every destination.
    #[serde(default)]
    #[builder(default, into)]
    #[getset(get = "pub")]
    applies_to: Vec<String>,
}

impl RetentionPolicy {
    pub fn applies_to_destination(&self, id: &str) -> bool {
        self.applies_to.is_empty() || self.applies_to.iter().any(|a| a == id)
    }

    /// Instant before which artifacts are out of retention. `None` when the
    /// age reaches past the representable calendar, so nothing is that old.
    pub fn cutoff(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let seconds = (f64::from(self.value) * self.unit.days() * 86_400.0).round() as i64;
        TimeDelta::try_seconds(seconds).and_then(|age| now.checked_sub_signed(age))
    }

    /// Picks the records to delete, oldest first.
    pub fn select_for_deletion(
        &self,
        mut records: Vec<BackupRecord>,
        now: NaiveDateTime,
    ) -> Vec<BackupRecord> {
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        match self.mode {
            RetentionMode::Count => {
                let keep = self.value as usize;
                let excess = records.len().saturating_sub(keep);
                records.truncate(excess);
                records
            }
            RetentionMode::Age => match self.cutoff(now) {
                Some(cutoff) => {
                    records.retain(|r| r.timestamp < cutoff);
                    records
                }
                None => Vec::new(),
            },
        }
    }
}

/// Backup records found at the root of `destination`, oldest first.
///
/// With `job` set, only artifacts of that job are returned.
pub fn discover(destination: &dyn Destination, job: Option<&str>) -> Result<Vec<BackupRecord>> {
    let mut records: Vec<_> = destination
        .list("")
        .add_msg("Listing backups")?
        .into_iter()
        .filter(|e| !e.is_dir)
        .filter_map(|e| BackupRecord::parse(&e.name))
        .filter(|r| job.map_or(true, |job| r.job == job))
        .collect();
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunedArtifact {
    pub destination_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionOutcome {
    pub ok: bool,
    pub deleted: Vec<PrunedArtifact>,
    pub failed: Vec<PrunedArtifact>,
}

pub struct RetentionManager<'a> {
    policy: &'a RetentionPolicy,
    job: Option<&'a str>,
}

impl<'a> RetentionManager<'a> {
    pub fn new(policy: &'a RetentionPolicy, job: Option<&'a str>) -> Self {
        Self { policy, job }
    }

    /// Applies the policy to every target it covers, independently.
    ///
    /// A listing or deletion failure is reported and makes the outcome not ok,
    /// but never stops work on the remaining artifacts or targets.
    pub fn apply(&self, targets: &[Target], now: NaiveDateTime, reporter: &Reporter) -> RetentionOutcome {
        let mut outcome = RetentionOutcome {
            ok: true,
            ..Default::default()
        };
        if !self.policy.enabled {
            reporter.debug("Retention policy disabled, nothing to prune.");
            return outcome;
        }

        let targets: Vec<_> = targets
            .iter()
            .filter(|t| self.policy.applies_to_destination(&t.id))
            .collect();
        reporter.info("Applying retention policy...", 0);

        for (idx, target) in targets.iter().enumerate() {
            reporter.info(
                format!("Applying retention to {}", target.id),
                scaled(0, 100, idx, targets.len()),
            );
            let records = match discover(target.destination.as_ref(), self.job) {
                Ok(records) => records,
                Err(e) => {
                    reporter.error(format!("Error applying retention to {}: {e}", target.id));
                    outcome.ok = false;
                    continue;
                }
            };

            let to_delete = self.policy.select_for_deletion(records, now);
            if to_delete.is_empty() {
                reporter.info(format!("No backups to prune on {}.", target.id), reporter.percent());
            }
            for record in to_delete {
                let pruned = PrunedArtifact {
                    destination_id: target.id.clone(),
                    file_name: record.file_name,
                };
                match target.destination.delete(&pruned.file_name) {
                    Ok(()) => {
                        reporter.info(
                            format!("Deleted old backup {} from {}", pruned.file_name, target.id),
                            reporter.percent(),
                        );
                        outcome.deleted.push(pruned);
                    }
                    Err(e) => {
                        reporter.error(format!(
                            "Failed to delete {} from {}: {e}",
                            pruned.file_name, target.id
                        ));
                        outcome.ok = false;
                        outcome.failed.push(pruned);
                    }
                }
            }
        }

        reporter.info("Retention policy applied.", 100);
        outcome
    }
}
