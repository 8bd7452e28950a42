// Guild-level operations: permission checks, per-guild exclusion, and the
// load -> mutate -> save cycle around the session model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, SolverConfig};
use crate::draft::{Draft, SwapError, SwapOutcome};
use crate::role::{Class, Role};
use crate::roster::RosterError;
use crate::session::{GuildState, LockOutOfRange, Session, SessionId, DEFAULT_RETENTION};
use crate::solver::SolveOutcome;
use crate::store::GuildStore;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("no draft has been rolled for this session")]
    NoDraft,

    #[error("only officers may {operation}")]
    NotPermitted { operation: &'static str },

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error(transparent)]
    LockOutOfRange(#[from] LockOutOfRange),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// What a missing session is reported as when the caller asked for the
/// current one.
const CURRENT_SESSION: &str = "(current)";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The parts of [`Config`] the coordinator acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub solver: SolverConfig,
    pub retention: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            solver: SolverConfig::default(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Settings {
            solver: config.solver.clone(),
            retention: config.retention,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Runs every operation against one guild's state while holding that
/// guild's lock. State is saved only when the operation succeeds.
pub struct Coordinator<S: GuildStore> {
    store: S,
    settings: Settings,
    guild_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    clock: fn() -> DateTime<Utc>,
}

impl<S: GuildStore> Coordinator<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Coordinator {
            store,
            settings,
            guild_locks: Mutex::new(HashMap::new()),
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used for lock deadlines and timestamps.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // -- sessions ----------------------------------------------------------

    /// Start a new session and make it current. Old sessions beyond the
    /// retention limit are dropped.
    pub fn create_session(
        &self,
        privileged: bool,
        guild_id: &str,
        title: &str,
        description: Option<&str>,
        lock_after: Option<Duration>,
    ) -> Result<Session, ServiceError> {
        require(privileged, "create sessions")?;
        let retention = self.settings.retention;
        self.with_guild(guild_id, |guild, now| {
            let id = guild.create_session(title, description, lock_after, now, retention)?;
            info!(guild_id, session_id = %id, title, "session created");
            guild
                .session(&id)
                .cloned()
                .ok_or(ServiceError::SessionNotFound { session_id: id })
        })
    }

    pub fn set_lock(
        &self,
        privileged: bool,
        guild_id: &str,
        session_id: Option<&str>,
        deadline: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        require(privileged, "set the signup lock")?;
        self.with_session(guild_id, session_id, |session, _| {
            session.set_lock(deadline);
            info!(guild_id, session_id = session.id(), %deadline, "signup lock set");
            Ok(())
        })
    }

    pub fn unlock(
        &self,
        privileged: bool,
        guild_id: &str,
        session_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        require(privileged, "unlock signups")?;
        self.with_session(guild_id, session_id, |session, _| {
            session.unlock();
            info!(guild_id, session_id = session.id(), "signup lock cleared");
            Ok(())
        })
    }

    // -- roster ------------------------------------------------------------

    /// Flip one role for the participant. Returns whether they now hold it.
    pub fn toggle_role(
        &self,
        guild_id: &str,
        session_id: Option<&str>,
        participant_id: &str,
        display_name: &str,
        role: Role,
    ) -> Result<bool, ServiceError> {
        self.with_session(guild_id, session_id, |session, now| {
            let enabled = session.toggle_role(participant_id, display_name, role, now)?;
            debug!(guild_id, participant_id, %role, enabled, "role toggled");
            Ok(enabled)
        })
    }

    /// Set a class from free text. `none` or an empty string clears it.
    pub fn set_class(
        &self,
        guild_id: &str,
        session_id: Option<&str>,
        participant_id: &str,
        role: Role,
        class_text: &str,
    ) -> Result<Option<Class>, ServiceError> {
        self.with_session(guild_id, session_id, |session, now| {
            let class = session.set_class_text(participant_id, role, class_text, now)?;
            debug!(guild_id, participant_id, %role, ?class, "class set");
            Ok(class)
        })
    }

    /// Remove the participant from the roster. Returns `false` if they were
    /// not signed up.
    pub fn leave(
        &self,
        guild_id: &str,
        session_id: Option<&str>,
        participant_id: &str,
    ) -> Result<bool, ServiceError> {
        self.with_session(guild_id, session_id, |session, now| {
            let removed = session.remove_player(participant_id, now)?;
            debug!(guild_id, participant_id, removed, "player left");
            Ok(removed)
        })
    }

    // -- draft -------------------------------------------------------------

    /// Run the solver. A successful run replaces the session's draft.
    pub fn roll(
        &self,
        privileged: bool,
        guild_id: &str,
        session_id: Option<&str>,
        desired_groups: Option<usize>,
    ) -> Result<SolveOutcome, ServiceError> {
        require(privileged, "roll groups")?;
        let options = self.settings.solver.options(desired_groups);
        let mut rng = match self.settings.solver.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.with_session(guild_id, session_id, |session, now| {
            let outcome = session.roll(&options, &mut rng, now);
            match &outcome {
                SolveOutcome::Solved {
                    draft,
                    attempts_used,
                } => info!(
                    guild_id,
                    session_id = session.id(),
                    groups = draft.groups.len(),
                    bench = draft.bench.len(),
                    attempts_used,
                    "groups rolled"
                ),
                SolveOutcome::NoSolution(failure) => {
                    info!(guild_id, session_id = session.id(), "roll failed: {}", failure)
                }
            }
            Ok(outcome)
        })
    }

    /// Exchange two participants' slots in the draft.
    pub fn swap(
        &self,
        privileged: bool,
        guild_id: &str,
        session_id: Option<&str>,
        first: &str,
        second: &str,
        force: bool,
    ) -> Result<SwapOutcome, ServiceError> {
        require(privileged, "swap players")?;
        self.with_session(guild_id, session_id, |session, _| {
            if session.draft().is_none() {
                return Err(ServiceError::NoDraft);
            }
            let outcome = session.swap(first, second, force)?;
            if outcome.forced_mismatch {
                warn!(
                    guild_id,
                    session_id = session.id(),
                    first,
                    second,
                    "forced swap put a player outside their roles"
                );
            } else {
                info!(guild_id, session_id = session.id(), first, second, "players swapped");
            }
            Ok(outcome)
        })
    }

    /// Announce the current draft. The draft stays editable afterwards.
    pub fn publish(
        &self,
        privileged: bool,
        guild_id: &str,
        session_id: Option<&str>,
    ) -> Result<Draft, ServiceError> {
        require(privileged, "publish groups")?;
        let guild = self.guild(guild_id)?;
        let session = find(&guild, session_id)?;
        let draft = session.draft().cloned().ok_or(ServiceError::NoDraft)?;
        info!(
            guild_id,
            session_id = session.id(),
            groups = draft.groups.len(),
            bench = draft.bench.len(),
            "groups published"
        );
        Ok(draft)
    }

    // -- reads -------------------------------------------------------------

    /// A snapshot of the guild's state.
    pub fn guild(&self, guild_id: &str) -> Result<GuildState, ServiceError> {
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.store.load(guild_id)?)
    }

    /// A snapshot of one session, or of the current one.
    pub fn session(
        &self,
        guild_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session, ServiceError> {
        let guild = self.guild(guild_id)?;
        find(&guild, session_id).cloned()
    }

    /// The id of the guild's current session, if any.
    pub fn current_session_id(&self, guild_id: &str) -> Result<Option<SessionId>, ServiceError> {
        Ok(self.guild(guild_id)?.current_session_id().map(str::to_string))
    }

    // -- plumbing ----------------------------------------------------------

    /// The lock for one guild. Entries nobody holds are dropped here, so the
    /// registry only grows with concurrently active guilds.
    fn guild_lock(&self, guild_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .guild_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(guild_id.to_string()).or_default())
    }

    /// Load the guild under its lock, apply `f`, and save if `f` succeeded.
    fn with_guild<T>(
        &self,
        guild_id: &str,
        f: impl FnOnce(&mut GuildState, DateTime<Utc>) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut guild = self.store.load(guild_id)?;
        let value = f(&mut guild, (self.clock)())?;
        self.store.save(guild_id, &guild)?;
        Ok(value)
    }

    fn with_session<T>(
        &self,
        guild_id: &str,
        session_id: Option<&str>,
        f: impl FnOnce(&mut Session, DateTime<Utc>) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        self.with_guild(guild_id, |guild, now| {
            let session = guild
                .resolve_mut(session_id)
                .ok_or_else(|| not_found(session_id))?;
            f(session, now)
        })
    }
}

fn require(privileged: bool, operation: &'static str) -> Result<(), ServiceError> {
    if privileged {
        Ok(())
    } else {
        Err(ServiceError::NotPermitted { operation })
    }
}

fn find<'a>(guild: &'a GuildState, session_id: Option<&str>) -> Result<&'a Session, ServiceError> {
    guild.resolve(session_id).ok_or_else(|| not_found(session_id))
}

fn not_found(session_id: Option<&str>) -> ServiceError {
    ServiceError::SessionNotFound {
        session_id: session_id.unwrap_or(CURRENT_SESSION).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
