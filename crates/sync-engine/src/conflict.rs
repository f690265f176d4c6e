// crates/sync-engine/src/conflict.rs
//! Conflict detection and resolution

use crate::types::RowEdit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sheetsync_core::{number_value, parse_timestamp, IdentityKey, Row, DATE, HOURS, IS_MEMBER};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Maximum number of entries kept in the conflict log
pub const CONFLICT_LOG_CAPACITY: usize = 100;

/// Conflict resolution strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The side with the later timestamp wins in full; remote on ties
    #[default]
    LatestWins,
    /// Always take the remote row
    RemoteWins,
    /// Always take the local row
    LocalWins,
    /// Per-field policy: hours summed, later date, local membership, remote otherwise
    MergeFields,
    /// Remote row with hours summed
    HoursSum,
    /// Caller-supplied resolver; latest-wins when none is set
    Custom,
}

impl ConflictStrategy {
    /// Name used in config files and events
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LatestWins => "latest_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::MergeFields => "merge_fields",
            ConflictStrategy::HoursSum => "hours_sum",
            ConflictStrategy::Custom => "custom",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "latest_wins" => Ok(ConflictStrategy::LatestWins),
            "remote_wins" => Ok(ConflictStrategy::RemoteWins),
            "local_wins" => Ok(ConflictStrategy::LocalWins),
            "merge_fields" => Ok(ConflictStrategy::MergeFields),
            "hours_sum" => Ok(ConflictStrategy::HoursSum),
            "custom" => Ok(ConflictStrategy::Custom),
            other => Err(format!("unknown conflict strategy '{}'", other)),
        }
    }
}

/// Caller-supplied resolver: `(local, remote) -> resolved row`
///
/// Returning `None` leaves the conflict unresolved.
pub type CustomResolver = Arc<dyn Fn(&RowEdit, &RowEdit) -> Option<Row> + Send + Sync>;

/// Where a resolved row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    LocalOnly,
    RemoteOnly,
    Resolved,
}

/// One authoritative row after reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRow {
    pub id: IdentityKey,
    pub data: Row,
    pub source: ResolutionSource,
}

/// Local and remote edits that touched the same identity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: IdentityKey,
    pub local: Row,
    pub remote: Row,
    pub strategy: ConflictStrategy,
    /// Strategy output; `None` if the strategy could not decide
    pub resolved: Option<Row>,
}

impl Conflict {
    /// Returns true if conflict is resolved
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

/// Output of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub resolved: Vec<ResolvedRow>,
    pub conflicts: Vec<Conflict>,
    pub strategy: ConflictStrategy,
    pub timestamp: DateTime<Utc>,
}

impl ResolutionReport {
    /// Conflicts the strategy could not settle
    pub fn unresolved(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }
}

/// One resolution attempt, kept in the bounded conflict log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    pub id: IdentityKey,
    pub strategy: ConflictStrategy,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over the conflict log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub by_strategy: BTreeMap<ConflictStrategy, usize>,
    pub last_conflict_at: Option<DateTime<Utc>>,
}

/// Reconciles local edits with remote changes
pub struct ConflictResolver {
    log: VecDeque<ConflictLogEntry>,
    custom: Option<CustomResolver>,
}

impl ConflictResolver {
    /// Creates a resolver with an empty log
    pub fn new() -> Self {
        Self {
            log: VecDeque::with_capacity(CONFLICT_LOG_CAPACITY),
            custom: None,
        }
    }

    /// Installs the resolver used by [`ConflictStrategy::Custom`]
    pub fn set_custom_resolver(&mut self, resolver: Option<CustomResolver>) {
        self.custom = resolver;
    }

    /// Reconciles `local` against `remote` using `strategy`
    ///
    /// Keys on one side only pass through tagged `local_only` or
    /// `remote_only`. Contested keys are resolved pairwise; undecidable
    /// pairs are reported in `conflicts` and left out of `resolved`.
    pub fn resolve_conflicts(
        &mut self,
        local: &[RowEdit],
        remote: &[RowEdit],
        strategy: ConflictStrategy,
    ) -> ResolutionReport {
        let local_by_key: HashMap<&IdentityKey, &RowEdit> =
            local.iter().map(|edit| (&edit.id, edit)).collect();
        let remote_keys: BTreeSet<&IdentityKey> = remote.iter().map(|edit| &edit.id).collect();

        let mut resolved = Vec::new();
        let mut conflicts = Vec::new();
        let mut seen = BTreeSet::new();

        for remote_edit in remote {
            if !seen.insert(&remote_edit.id) {
                continue;
            }

            let Some(local_edit) = local_by_key.get(&remote_edit.id) else {
                resolved.push(ResolvedRow {
                    id: remote_edit.id.clone(),
                    data: remote_edit.data.clone(),
                    source: ResolutionSource::RemoteOnly,
                });
                continue;
            };

            let outcome = self.resolve_pair(local_edit, remote_edit, strategy);
            self.log_attempt(&remote_edit.id, strategy, outcome.is_some());

            if let Some(row) = &outcome {
                resolved.push(ResolvedRow {
                    id: remote_edit.id.clone(),
                    data: row.clone(),
                    source: ResolutionSource::Resolved,
                });
            } else {
                log::warn!(
                    "Conflict on {} left unresolved by {} strategy",
                    remote_edit.id,
                    strategy
                );
            }

            conflicts.push(Conflict {
                id: remote_edit.id.clone(),
                local: local_edit.data.clone(),
                remote: remote_edit.data.clone(),
                strategy,
                resolved: outcome,
            });
        }

        for local_edit in local {
            if !remote_keys.contains(&local_edit.id) && seen.insert(&local_edit.id) {
                resolved.push(ResolvedRow {
                    id: local_edit.id.clone(),
                    data: local_edit.data.clone(),
                    source: ResolutionSource::LocalOnly,
                });
            }
        }

        ResolutionReport {
            resolved,
            conflicts,
            strategy,
            timestamp: Utc::now(),
        }
    }

    /// Resolves one contested pair without touching the log
    pub fn resolve_pair(
        &self,
        local: &RowEdit,
        remote: &RowEdit,
        strategy: ConflictStrategy,
    ) -> Option<Row> {
        match strategy {
            ConflictStrategy::LatestWins => Some(latest_wins(&local.data, &remote.data)),
            ConflictStrategy::RemoteWins => Some(remote.data.clone()),
            ConflictStrategy::LocalWins => Some(local.data.clone()),
            ConflictStrategy::MergeFields => Some(merge_fields(&local.data, &remote.data)),
            ConflictStrategy::HoursSum => Some(hours_sum(&local.data, &remote.data)),
            ConflictStrategy::Custom => match &self.custom {
                Some(resolver) => resolver(local, remote),
                None => Some(latest_wins(&local.data, &remote.data)),
            },
        }
    }

    fn log_attempt(&mut self, id: &IdentityKey, strategy: ConflictStrategy, resolved: bool) {
        if self.log.len() == CONFLICT_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(ConflictLogEntry {
            id: id.clone(),
            strategy,
            resolved,
            timestamp: Utc::now(),
        });
    }

    /// Logged attempts, oldest first
    pub fn conflict_log(&self) -> impl Iterator<Item = &ConflictLogEntry> {
        self.log.iter()
    }

    /// Summarizes the conflict log
    pub fn stats(&self) -> ConflictStats {
        let mut stats = ConflictStats {
            total: self.log.len(),
            ..Default::default()
        };
        for entry in &self.log {
            if entry.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            *stats.by_strategy.entry(entry.strategy).or_insert(0) += 1;
        }
        stats.last_conflict_at = self.log.back().map(|e| e.timestamp);
        stats
    }

    /// Empties the conflict log
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn latest_wins(local: &Row, remote: &Row) -> Row {
    match (local.timestamp(), remote.timestamp()) {
        (Some(l), Some(r)) if l > r => local.clone(),
        _ => remote.clone(),
    }
}

fn merge_fields(local: &Row, remote: &Row) -> Row {
    let names: BTreeSet<&str> = local.fields().chain(remote.fields()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let l = local.get(name);
            let r = remote.get(name);
            let value = match name {
                HOURS => sum_hours(local, remote).or_else(|| r.or(l).cloned()),
                DATE => later_date(l, r),
                IS_MEMBER => l.or(r).cloned(),
                _ => r.or(l).cloned(),
            }?;
            Some((name.to_string(), value))
        })
        .collect()
}

fn hours_sum(local: &Row, remote: &Row) -> Row {
    let mut row = remote.clone();
    if let Some(total) = sum_hours(local, remote) {
        row.insert(HOURS, total);
    } else if let Some(hours) = local.get(HOURS).filter(|_| !remote.has(HOURS)) {
        row.insert(HOURS, hours.clone());
    }
    row
}

/// Sum of both sides' numeric hours; one side alone counts as the total
fn sum_hours(local: &Row, remote: &Row) -> Option<Value> {
    match (local.number(HOURS), remote.number(HOURS)) {
        (Some(l), Some(r)) => Some(number_value(l + r)),
        (Some(only), None) | (None, Some(only)) => Some(number_value(only)),
        (None, None) => None,
    }
}

fn later_date(local: Option<&Value>, remote: Option<&Value>) -> Option<Value> {
    let parsed = |v: Option<&Value>| v.and_then(parse_timestamp);
    match (parsed(local), parsed(remote)) {
        (Some(l), Some(r)) if l > r => local.cloned(),
        (Some(_), Some(_)) => remote.cloned(),
        (Some(_), None) => local.cloned(),
        (None, Some(_)) => remote.cloned(),
        (None, None) => remote.or(local).cloned(),
    }
}
