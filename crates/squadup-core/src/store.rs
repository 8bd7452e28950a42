// Guild state persistence: the storage trait, a SQLite store, an in-memory
// store, and normalization of the legacy single-session document shape.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::draft::Draft;
use crate::session::{GuildState, Session};

/// Where guild state lives between operations.
///
/// Implementations only load and save whole documents. Callers are
/// responsible for holding a per-guild lock across load -> mutate -> save;
/// [`crate::service::Coordinator`] does that.
pub trait GuildStore: Send + Sync {
    /// Load a guild's state, or an empty state if nothing was saved yet.
    fn load(&self, guild_id: &str) -> Result<GuildState>;

    fn save(&self, guild_id: &str, state: &GuildState) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Legacy normalization
// ---------------------------------------------------------------------------

/// Parse a stored guild document, converting the old flat shape (the guild
/// value was itself a single session with a `signups` map) into a
/// [`GuildState`] whose only session is current.
///
/// Returns the state and whether a conversion happened.
pub fn normalize_guild_value(value: Value, now: DateTime<Utc>) -> Result<(GuildState, bool)> {
    let Value::Object(mut object) = value else {
        anyhow::bail!("guild state must be a JSON object");
    };

    if object.is_empty()
        || object.contains_key("sessions")
        || object.contains_key("currentSessionId")
    {
        let state = serde_json::from_value(Value::Object(object))
            .context("failed to parse guild state")?;
        return Ok((state, false));
    }

    fill_legacy_defaults(&mut object, now);
    let session: Session = serde_json::from_value(Value::Object(object))
        .context("failed to parse legacy session")?;

    let mut state = GuildState::new();
    state.insert_current(session);
    Ok((state, true))
}

fn fill_legacy_defaults(object: &mut Map<String, Value>, now: DateTime<Utc>) {
    if !object.contains_key("signups") && !object.contains_key("roster") {
        object.insert("signups".into(), Value::Object(Map::new()));
    }

    // A draft in some older layout is dropped rather than failing the load.
    let draft_ok = object
        .get("draft")
        .is_some_and(|d| serde_json::from_value::<Option<Draft>>(d.clone()).is_ok());
    if !draft_ok {
        if object.get("draft").is_some_and(|d| !d.is_null()) {
            warn!("dropping unreadable legacy draft");
        }
        object.insert("draft".into(), Value::Null);
    }

    let created_at = object
        .get("createdAt")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(now);
    object.insert("createdAt".into(), Value::from(created_at.timestamp_millis()));

    if !object.get("id").is_some_and(Value::is_string) {
        let id = GuildState::new().next_session_id(created_at);
        object.insert("id".into(), Value::String(id));
    }
    if !object.get("title").is_some_and(Value::is_string) {
        object.insert("title".into(), Value::String("Untitled session".into()));
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

/// SQLite-backed guild store. Each guild is one JSON document row.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral database (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS guild_state (
                guild_id   TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock only means another thread panicked mid-query; the
    /// connection itself is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(conn: &Connection, guild_id: &str, state: &GuildState) -> Result<()> {
        let json = serde_json::to_string(state).context("failed to serialize guild state")?;
        conn.execute(
            "INSERT OR REPLACE INTO guild_state (guild_id, value, updated_at)
             VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![guild_id, json],
        )
        .context("failed to save guild state")?;
        Ok(())
    }

    /// Import a whole document mapping guild id to guild state, in either the
    /// current or the legacy shape. Existing rows for those guilds are
    /// replaced. Returns the number of guilds imported.
    pub fn import_document(&self, json: &str) -> Result<usize> {
        let document: BTreeMap<String, Value> =
            serde_json::from_str(json).context("failed to parse state document")?;
        let now = Utc::now();

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin import transaction")?;
        for (guild_id, value) in &document {
            let (state, migrated) = normalize_guild_value(value.clone(), now)
                .with_context(|| format!("invalid state for guild {guild_id}"))?;
            if migrated {
                info!(guild_id = %guild_id, "converted legacy guild state");
            }
            Self::write(&tx, guild_id, &state)?;
        }
        tx.commit().context("failed to commit import")?;
        Ok(document.len())
    }

    /// All guild ids with stored state, sorted.
    pub fn guild_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT guild_id FROM guild_state ORDER BY guild_id")
            .context("failed to prepare guild_ids query")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("failed to query guild ids")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("failed to map guild id rows")?;
        Ok(ids)
    }
}

impl GuildStore for SqliteStore {
    fn load(&self, guild_id: &str) -> Result<GuildState> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM guild_state WHERE guild_id = ?1",
                params![guild_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query guild state")?;

        let Some(json) = json else {
            return Ok(GuildState::default());
        };
        let value: Value =
            serde_json::from_str(&json).context("failed to deserialize guild state")?;
        let (state, migrated) = normalize_guild_value(value, Utc::now())?;
        if migrated {
            info!(guild_id, "converted legacy guild state");
            Self::write(&conn, guild_id, &state)?;
        }
        Ok(state)
    }

    fn save(&self, guild_id: &str, state: &GuildState) -> Result<()> {
        let conn = self.conn();
        Self::write(&conn, guild_id, state)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps serialized guild documents in memory. Goes through the same JSON
/// path as the SQLite store, so legacy documents can be seeded in tests.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document for `guild_id`.
    pub fn insert_raw(&self, guild_id: &str, value: Value) {
        self.documents()
            .insert(guild_id.to_string(), value);
    }

    /// The raw stored document for `guild_id`.
    pub fn raw(&self, guild_id: &str) -> Option<Value> {
        self.documents().get(guild_id).cloned()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GuildStore for MemoryStore {
    fn load(&self, guild_id: &str) -> Result<GuildState> {
        let mut documents = self.documents();
        let Some(value) = documents.get(guild_id).cloned() else {
            return Ok(GuildState::default());
        };
        let (state, migrated) = normalize_guild_value(value, Utc::now())?;
        if migrated {
            let json = serde_json::to_value(&state).context("failed to serialize guild state")?;
            documents.insert(guild_id.to_string(), json);
        }
        Ok(state)
    }

    fn save(&self, guild_id: &str, state: &GuildState) -> Result<()> {
        let json = serde_json::to_value(state).context("failed to serialize guild state")?;
        self.documents().insert(guild_id.to_string(), json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;
    use crate::session::DEFAULT_RETENTION;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_781_600_000).unwrap()
    }

    fn sample_state() -> GuildState {
        let mut state = GuildState::new();
        let id = state
            .create_session("Keys", Some("+10s"), None, t0(), DEFAULT_RETENTION)
            .unwrap();
        state
            .session_mut(&id)
            .unwrap()
            .toggle_role("u1", "Una", Role::Tank, t0())
            .unwrap();
        state
    }

    fn legacy_value() -> Value {
        json!({
            "title": "Old raid night",
            "lockAt": null,
            "signups": {
                "u1": { "roles": ["tank", "dps"], "displayName": "Una", "subAttributes": { "tank": "paladin" } },
                "u2": { "roles": ["heal"], "displayName": "Bo" }
            }
        })
    }

    #[test]
    fn open_creates_table() {
        let store = SqliteStore::open(":memory:").unwrap();
        let conn = store.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='guild_state'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn missing_guild_loads_default() {
        let store = SqliteStore::open(":memory:").unwrap();
        let state = store.load("g1").unwrap();
        assert!(state.is_empty());
        assert_eq!(state.current_session_id(), None);
    }

    #[test]
    fn sqlite_save_then_load() {
        let store = SqliteStore::open(":memory:").unwrap();
        let state = sample_state();
        store.save("g1", &state).unwrap();
        assert_eq!(store.load("g1").unwrap(), state);
        assert!(store.load("g2").unwrap().is_empty());
        assert_eq!(store.guild_ids().unwrap(), vec!["g1".to_string()]);
    }

    #[test]
    fn save_overwrites_previous_state() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.save("g1", &sample_state()).unwrap();
        store.save("g1", &GuildState::new()).unwrap();
        assert!(store.load("g1").unwrap().is_empty());
    }

    #[test]
    fn legacy_flat_session_is_normalized() {
        let (state, migrated) = normalize_guild_value(legacy_value(), t0()).unwrap();
        assert!(migrated);
        let session = state.resolve(None).expect("legacy session becomes current");
        assert_eq!(session.title(), "Old raid night");
        assert_eq!(session.created_at(), t0());
        assert_eq!(session.id(), "session_20251018_100000_000");
        assert!(session.draft().is_none());
        assert_eq!(session.roster().len(), 2);
        assert!(session.roster().get("u1").unwrap().is_eligible(Role::Dps));
    }

    #[test]
    fn legacy_without_signups_gets_empty_roster() {
        let value = json!({ "id": "old", "title": "Bare", "createdAt": 1_700_000_000_000i64 });
        let (state, migrated) = normalize_guild_value(value, t0()).unwrap();
        assert!(migrated);
        let session = state.session("old").unwrap();
        assert!(session.roster().is_empty());
        assert_eq!(session.created_at().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn legacy_unreadable_draft_is_dropped() {
        let mut value = legacy_value();
        value["draft"] = json!({ "teams": [[1, 2, 3]] });
        let (state, _) = normalize_guild_value(value, t0()).unwrap();
        assert!(state.resolve(None).unwrap().draft().is_none());
    }

    #[test]
    fn current_shape_is_not_migrated() {
        let state = sample_state();
        let value = serde_json::to_value(&state).unwrap();
        let (parsed, migrated) = normalize_guild_value(value, t0()).unwrap();
        assert!(!migrated);
        assert_eq!(parsed, state);

        let (empty, migrated) = normalize_guild_value(json!({}), t0()).unwrap();
        assert!(!migrated);
        assert!(empty.is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(normalize_guild_value(json!([1, 2]), t0()).is_err());
    }

    #[test]
    fn sqlite_load_rewrites_legacy_row_once() {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO guild_state (guild_id, value) VALUES (?1, ?2)",
                params!["g1", legacy_value().to_string()],
            )
            .unwrap();

        let first = store.load("g1").unwrap();
        let stored: String = store
            .conn()
            .query_row("SELECT value FROM guild_state WHERE guild_id = 'g1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        let stored: Value = serde_json::from_str(&stored).unwrap();
        assert!(stored.get("sessions").is_some());
        assert_eq!(store.load("g1").unwrap(), first);
    }

    #[test]
    fn import_document_handles_both_shapes() {
        let store = SqliteStore::open(":memory:").unwrap();
        let document = json!({
            "g-legacy": legacy_value(),
            "g-new": serde_json::to_value(sample_state()).unwrap(),
        });
        let imported = store.import_document(&document.to_string()).unwrap();
        assert_eq!(imported, 2);
        assert_eq!(store.load("g-new").unwrap(), sample_state());
        assert_eq!(store.load("g-legacy").unwrap().len(), 1);
    }

    #[test]
    fn memory_store_normalizes_and_persists() {
        let store = MemoryStore::new();
        store.insert_raw("g1", legacy_value());
        let state = store.load("g1").unwrap();
        assert_eq!(state.len(), 1);
        assert!(store.raw("g1").unwrap().get("sessions").is_some());

        store.save("g2", &sample_state()).unwrap();
        assert_eq!(store.load("g2").unwrap(), sample_state());
    }
}
