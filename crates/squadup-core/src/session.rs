// Sessions, signup locks, and per-guild session retention.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::draft::{Draft, SwapError, SwapOutcome};
use crate::role::{Class, Role};
use crate::roster::{Roster, RosterError};
use crate::solver::{self, SolveOutcome, SolverOptions};

pub type SessionId = String;

/// How many sessions a guild keeps by default.
pub const DEFAULT_RETENTION: usize = 12;

/// A lock duration whose deadline falls outside the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lock duration of {lock_after} is out of range")]
pub struct LockOutOfRange {
    pub lock_after: Duration,
}

/// One signup round: who is coming, in which roles, and the current draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: SessionId,
    title: String,
    #[serde(default)]
    description: Option<String>,
    /// Signups close at this instant. `None` means never.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    lock_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "signups")]
    roster: Roster,
    #[serde(default)]
    draft: Option<Draft>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session. `lock_after` is measured from `now` and stored as an
    /// absolute deadline.
    pub fn new(
        id: &str,
        title: &str,
        description: Option<&str>,
        lock_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Self, LockOutOfRange> {
        let lock_at = lock_after
            .map(|d| {
                now.checked_add_signed(d)
                    .ok_or(LockOutOfRange { lock_after: d })
            })
            .transpose()?;
        Ok(Session {
            id: id.to_string(),
            title: title.to_string(),
            description: description.map(str::to_string),
            lock_at,
            roster: Roster::new(),
            draft: None,
            created_at: now,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lock_at(&self) -> Option<DateTime<Utc>> {
        self.lock_at
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_at.is_some_and(|deadline| now >= deadline)
    }

    /// Move the signup deadline. Takes effect for the next roster change,
    /// whether or not the old deadline already passed.
    pub fn set_lock(&mut self, deadline: DateTime<Utc>) {
        self.lock_at = Some(deadline);
    }

    pub fn unlock(&mut self) {
        self.lock_at = None;
    }

    fn ensure_open(&self, now: DateTime<Utc>) -> Result<(), RosterError> {
        match self.lock_at {
            Some(locked_at) if now >= locked_at => Err(RosterError::Locked { locked_at }),
            _ => Ok(()),
        }
    }

    /// Flip one of a participant's roles. See [`Roster::toggle_role`].
    pub fn toggle_role(
        &mut self,
        participant_id: &str,
        display_name: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<bool, RosterError> {
        self.ensure_open(now)?;
        Ok(self.roster.toggle_role(participant_id, display_name, role))
    }

    pub fn set_class(
        &mut self,
        participant_id: &str,
        role: Role,
        class: Option<Class>,
        now: DateTime<Utc>,
    ) -> Result<(), RosterError> {
        self.ensure_open(now)?;
        self.roster.set_class(participant_id, role, class)
    }

    /// Set a class from free text. See [`Roster::set_class_text`].
    pub fn set_class_text(
        &mut self,
        participant_id: &str,
        role: Role,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Class>, RosterError> {
        self.ensure_open(now)?;
        self.roster.set_class_text(participant_id, role, text)
    }

    pub fn remove_player(
        &mut self,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RosterError> {
        self.ensure_open(now)?;
        Ok(self.roster.remove_player(participant_id))
    }

    /// Run the solver on the current roster. A successful run replaces the
    /// draft, discarding any manual swaps; a failed run leaves it alone.
    /// Not affected by the signup lock.
    pub fn roll<R: Rng + ?Sized>(
        &mut self,
        options: &SolverOptions,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> SolveOutcome {
        let outcome = solver::solve(&self.roster, options, rng, now);
        if let Some(draft) = outcome.draft() {
            self.draft = Some(draft.clone());
        }
        outcome
    }

    /// Swap two participants in the draft, then refresh both from the live
    /// roster. Not affected by the signup lock.
    pub fn swap(
        &mut self,
        first: &str,
        second: &str,
        force: bool,
    ) -> Result<SwapOutcome, SwapError> {
        let draft = self.draft.as_mut().ok_or(SwapError::NoDraft)?;
        let outcome = draft.swap(first, second, force)?;
        draft.rehydrate(&[first, second], &self.roster);
        Ok(outcome)
    }
}

/// Everything stored for one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildState {
    #[serde(default)]
    current_session_id: Option<SessionId>,
    #[serde(default)]
    sessions: BTreeMap<SessionId, Session>,
    /// Most recently issued id. Ids are never reissued, even after pruning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_session_id: Option<SessionId>,
}

impl GuildState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// The named session, or the current one when `session_id` is `None`.
    pub fn resolve(&self, session_id: Option<&str>) -> Option<&Session> {
        let id = session_id.or(self.current_session_id.as_deref())?;
        self.sessions.get(id)
    }

    pub fn resolve_mut(&mut self, session_id: Option<&str>) -> Option<&mut Session> {
        let id = session_id
            .map(str::to_string)
            .or_else(|| self.current_session_id.clone())?;
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions ordered newest first.
    pub fn sessions_newest_first(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        // Same-millisecond ids differ only by a numeric suffix; longer is newer.
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.len().cmp(&a.id.len()))
                .then_with(|| b.id.cmp(&a.id))
        });
        sessions
    }

    /// Create a session, make it current, and prune down to `retention`
    /// sessions. Returns the new session's id.
    pub fn create_session(
        &mut self,
        title: &str,
        description: Option<&str>,
        lock_after: Option<Duration>,
        now: DateTime<Utc>,
        retention: usize,
    ) -> Result<SessionId, LockOutOfRange> {
        let id = self.next_session_id(now);
        let session = Session::new(&id, title, description, lock_after, now)?;
        self.last_session_id = Some(id.clone());
        self.insert_current(session);
        self.prune(retention);
        Ok(id)
    }

    /// Store `session` and make it current. Replaces a session with the same id.
    pub fn insert_current(&mut self, session: Session) {
        self.current_session_id = Some(session.id.clone());
        self.sessions.insert(session.id.clone(), session);
    }

    /// Keep only the `retention` most recently created sessions. Returns the
    /// ids that were dropped.
    pub fn prune(&mut self, retention: usize) -> Vec<SessionId> {
        let dropped: Vec<SessionId> = self
            .sessions_newest_first()
            .into_iter()
            .skip(retention)
            .map(|s| s.id.clone())
            .collect();
        for id in &dropped {
            self.sessions.remove(id);
        }
        if self
            .current_session_id
            .as_ref()
            .is_some_and(|id| !self.sessions.contains_key(id))
        {
            self.current_session_id = None;
        }
        if !dropped.is_empty() {
            debug!(?dropped, retention, "pruned old sessions");
        }
        dropped
    }

    /// Session ids are derived from the creation time, e.g.
    /// `session_20261018_143022_123`. A numeric suffix disambiguates
    /// sessions created within the same millisecond; it continues after the
    /// last issued id, so a pruned id is never handed out again.
    pub(crate) fn next_session_id(&self, now: DateTime<Utc>) -> SessionId {
        let base = now.format("session_%Y%m%d_%H%M%S_%3f").to_string();
        let first = self
            .last_session_id
            .as_deref()
            .and_then(|last| last.strip_prefix(base.as_str()))
            .and_then(|rest| match rest {
                "" => Some(2),
                _ => rest.strip_prefix('_')?.parse::<u32>().ok()?.checked_add(1),
            })
            .unwrap_or(1);
        (first..)
            .map(|n| match n {
                1 => base.clone(),
                _ => format!("{base}_{n}"),
            })
            .find(|candidate| !self.sessions.contains_key(candidate))
            .unwrap_or(base)
    }
}
