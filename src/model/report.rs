//! Per-run report handed back to the driver.
//!
//! Each processed item ends in exactly one terminal outcome. The counters
//! keep "no relationship", "failed" and "skipped by policy" apart.

use serde::Serialize;

use super::{TicketId, TicketStatus, UserId};

/// A write the executor performs (or would perform, in dry-run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    MergeTicket {
        source: TicketId,
        target: TicketId,
    },
    CopyField {
        child: TicketId,
        field_id: u64,
    },
    Notice {
        ticket: TicketId,
    },
    MergeUser {
        source: UserId,
        target: UserId,
    },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::MergeTicket { source, target } => write!(f, "merge ticket {source} -> {target}"),
            Action::CopyField { child, field_id } => write!(f, "copy field {field_id} -> {child}"),
            Action::Notice { ticket } => write!(f, "internal note on {ticket}"),
            Action::MergeUser { source, target } => write!(f, "merge user {source} -> {target}"),
        }
    }
}

impl Action {
    /// Short label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Action::MergeTicket { .. } => "merge_ticket",
            Action::CopyField { .. } => "copy_field",
            Action::Notice { .. } => "notice",
            Action::MergeUser { .. } => "merge_user",
        }
    }
}

/// Why an item produced no write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No parent could be resolved for a child ticket.
    NoParent,
    /// The oldest ticket of a cluster cannot receive merges.
    SurvivorVetoed {
        survivor: TicketId,
        status: TicketStatus,
    },
    /// The platform already holds the desired state.
    Unchanged,
    /// Filtered out by channel or organisation policy.
    Excluded { rule: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoParent => write!(f, "no parent found"),
            SkipReason::SurvivorVetoed { survivor, status } => {
                write!(f, "survivor {survivor} is {status}")
            }
            SkipReason::Unchanged => write!(f, "already up to date"),
            SkipReason::Excluded { rule } => write!(f, "excluded by {rule}"),
        }
    }
}

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Success { action: Action },
    Failure { action: Option<Action>, error: String },
    Skipped { reason: SkipReason },
    /// Left undone because the run hit its action cap.
    Deferred { action: Action },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Deferred { .. } => "deferred",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    /// Ticket or user id the outcome is about.
    pub item: u64,
    pub outcome: Outcome,
}

/// Counts and per-item outcomes of one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub pass: String,
    pub dry_run: bool,
    pub examined: usize,
    pub excluded: usize,
    pub no_parent: usize,
    pub copied: usize,
    pub noted: usize,
    pub merged: usize,
    pub failed: usize,
    pub skipped_veto: usize,
    pub unchanged: usize,
    pub deferred: usize,
    pub items: Vec<ItemOutcome>,
}

impl RunResult {
    pub fn new(pass: impl Into<String>, dry_run: bool) -> Self {
        Self {
            pass: pass.into(),
            dry_run,
            ..Self::default()
        }
    }

    /// Record a terminal outcome and bump the matching counter.
    pub fn record(&mut self, item: u64, outcome: Outcome) {
        match &outcome {
            Outcome::Success { action } => match action {
                Action::MergeTicket { .. } | Action::MergeUser { .. } => self.merged += 1,
                Action::CopyField { .. } => self.copied += 1,
                Action::Notice { .. } => self.noted += 1,
            },
            Outcome::Failure { .. } => self.failed += 1,
            Outcome::Skipped { reason } => match reason {
                SkipReason::NoParent => self.no_parent += 1,
                SkipReason::SurvivorVetoed { .. } => self.skipped_veto += 1,
                SkipReason::Unchanged => self.unchanged += 1,
                SkipReason::Excluded { .. } => self.excluded += 1,
            },
            Outcome::Deferred { .. } => self.deferred += 1,
        }
        self.items.push(ItemOutcome { item, outcome });
    }

    /// Outcomes recorded for one ticket or user id.
    pub fn outcomes_for(&self, item: u64) -> impl Iterator<Item = &Outcome> {
        self.items
            .iter()
            .filter(move |o| o.item == item)
            .map(|o| &o.outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: examined={} merged={} copied={} noted={} | no_parent={} failed={} \
             skipped_by_policy={} excluded={} unchanged={} deferred={}",
            self.pass,
            self.examined,
            self.merged,
            self.copied,
            self.noted,
            self.no_parent,
            self.failed,
            self.skipped_veto,
            self.excluded,
            self.unchanged,
            self.deferred,
        )?;
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        Ok(())
    }
}
