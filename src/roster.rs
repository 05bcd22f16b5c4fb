//! Roster view model: the client-side list of all students.
//!
//! A roster starts from one full fetch and is then kept current by payment
//! updates merged locally, with no re-fetch. Updates for students the snapshot does
//! not know are dropped, and updates that arrive before the fetch resolves are held
//! and replayed on top of it.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::broadcast::Subscription;
use crate::models::{PaymentUpdate, StudentView};

/// Merges one update into a snapshot. Only `fees_paid` of a matching entry changes.
pub fn reduce(mut snapshot: Vec<StudentView>, update: &PaymentUpdate) -> Vec<StudentView> {
    match snapshot.iter_mut().find(|s| s.id == update.student_id) {
        Some(entry) => entry.fees_paid = update.fees_paid,
        None => trace!(student_id = %update.student_id, "update for unknown student ignored"),
    }
    snapshot
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Paid,
    Unpaid,
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "paid" => Ok(StatusFilter::Paid),
            "unpaid" | "pending" => Ok(StatusFilter::Unpaid),
            other => Err(format!("unknown status filter '{}' (all, paid, unpaid)", other)),
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusFilter::All => "all",
            StatusFilter::Paid => "paid",
            StatusFilter::Unpaid => "unpaid",
        })
    }
}

/// Search text plus fee status; an empty search matches everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterFilter {
    pub search: String,
    pub status: StatusFilter,
}

impl RosterFilter {
    pub fn status(status: StatusFilter) -> Self {
        Self {
            search: String::new(),
            status,
        }
    }

    pub fn matches(&self, student: &StudentView) -> bool {
        let needle = self.search.trim().to_lowercase();
        let matches_search = needle.is_empty()
            || student.name.to_lowercase().contains(&needle)
            || student.email.to_lowercase().contains(&needle);
        let matches_status = match self.status {
            StatusFilter::All => true,
            StatusFilter::Paid => student.fees_paid,
            StatusFilter::Unpaid => !student.fees_paid,
        };
        matches_search && matches_status
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterCounts {
    pub total: usize,
    pub paid: usize,
    pub unpaid: usize,
}

#[derive(Debug, Default)]
pub struct Roster {
    snapshot: Option<Vec<StudentView>>,
    pending: Vec<PaymentUpdate>,
}

impl Roster {
    /// An empty roster waiting for its initial fetch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Installs a fetched snapshot (server order kept, duplicate ids dropped) and
    /// replays any updates that arrived while it was in flight.
    pub fn load(&mut self, students: Vec<StudentView>) {
        let mut seen = HashSet::new();
        let mut snapshot: Vec<StudentView> = students.into_iter().filter(|s| seen.insert(s.id)).collect();

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(replayed = pending.len(), "replaying updates received during fetch");
        }
        for update in &pending {
            snapshot = reduce(snapshot, update);
        }
        self.snapshot = Some(snapshot);
    }

    pub fn apply(&mut self, update: PaymentUpdate) {
        match self.snapshot.take() {
            Some(snapshot) => self.snapshot = Some(reduce(snapshot, &update)),
            None => self.pending.push(update),
        }
    }

    /// Current snapshot; empty until loaded.
    pub fn students(&self) -> &[StudentView] {
        self.snapshot.as_deref().unwrap_or_default()
    }

    pub fn view(&self, filter: &RosterFilter) -> Vec<&StudentView> {
        self.students().iter().filter(|s| filter.matches(s)).collect()
    }

    pub fn counts(&self) -> RosterCounts {
        let students = self.students();
        let paid = students.iter().filter(|s| s.fees_paid).count();
        RosterCounts {
            total: students.len(),
            paid,
            unpaid: students.len() - paid,
        }
    }
}

/// Source of payment updates for a live roster: in-process or over the network.
#[async_trait]
pub trait UpdateStream: Send {
    /// `None` once the stream is closed; it never restarts.
    async fn next_update(&mut self) -> Option<PaymentUpdate>;

    async fn close(&mut self);
}

#[async_trait]
impl UpdateStream for Subscription {
    async fn next_update(&mut self) -> Option<PaymentUpdate> {
        self.next().await
    }

    async fn close(&mut self) {
        self.cancel();
    }
}

/// A roster bound to an open update stream.
pub struct LiveRoster<S> {
    roster: Roster,
    updates: S,
}

impl<S: UpdateStream> LiveRoster<S> {
    /// Wraps an already-open stream; call [`LiveRoster::load`] once the fetch returns.
    pub fn new(updates: S) -> Self {
        Self {
            roster: Roster::new(),
            updates,
        }
    }

    /// Runs the initial fetch while collecting updates, then reconciles both.
    pub async fn activate<F, E>(updates: S, fetch: F) -> Result<Self, E>
    where
        F: Future<Output = Result<Vec<StudentView>, E>>,
    {
        let mut live = Self::new(updates);
        tokio::pin!(fetch);

        let students = loop {
            tokio::select! {
                biased;
                Some(update) = live.updates.next_update() => live.roster.apply(update),
                result = &mut fetch => break result?,
            }
        };
        live.roster.load(students);
        Ok(live)
    }

    pub fn load(&mut self, students: Vec<StudentView>) {
        self.roster.load(students);
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Waits for the next update and merges it. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<PaymentUpdate> {
        let update = self.updates.next_update().await?;
        self.roster.apply(update.clone());
        Some(update)
    }

    pub async fn close(&mut self) {
        self.updates.close().await;
    }
}
