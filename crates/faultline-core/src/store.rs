use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::model::{
    AlertRecipient, AlertRule, DebugSymbolBundle, DebugSymbolKey, EventLevel, Issue,
    IssueEventKind, IssueStatus, Notification, Organization, Project,
};

/// Async SQLite-backed store for the event ingestion and grouping pipeline.
///
/// One `EventStore` wraps one `tokio_rusqlite::Connection` per process (see
/// `SPEC_FULL.md` §3.1 for why SQLite plus logical `partition_date` columns
/// stands in for the original's physically partitioned Postgres tables).
pub struct EventStore {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// helpers – enum <-> SQLite string, timestamp <-> rfc3339
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn ts_from_sql(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Look up a project and its owning organization by DSN public key.
///
/// This is the single database round trip the Auth/Throttle Gate is allowed
/// (spec §4.2 step 2, §5 "Network tier").
#[derive(Debug, Clone)]
pub struct ProjectLookup {
    pub project: Project,
    pub organization: Organization,
}

#[derive(Debug, Clone, Copy)]
pub struct IssueEventInput<'a> {
    pub event_id: Uuid,
    pub received: DateTime<Utc>,
    pub project_id: i64,
    pub issue_id: i64,
    pub event_type: IssueEventKind,
    pub level: EventLevel,
    pub timestamp: DateTime<Utc>,
    pub title: &'a str,
    pub transaction: Option<&'a str>,
    pub culprit: Option<&'a str>,
    pub tags: &'a [(String, String)],
    pub data: &'a serde_json::Value,
    pub hashes: &'a [String],
    pub release_id: Option<i64>,
}

/// One (hour, project) or (hour, issue) or (day, issue, key, value) counter
/// contribution, accumulated in memory per batch and flushed with a single
/// sorted multi-row upsert (spec §4.5 "Aggregate updates").
#[derive(Debug, Clone)]
pub struct IssueBatchUpdate {
    pub issue_id: i64,
    pub delta_count: i64,
    pub last_seen: DateTime<Utc>,
    pub search_vector_fragment: String,
    pub reopen: bool,
}

impl EventStore {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-64000;
                    PRAGMA mmap_size=268435456;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS organizations (
                        id                  INTEGER PRIMARY KEY,
                        slug                TEXT NOT NULL UNIQUE,
                        is_accepting_events INTEGER NOT NULL DEFAULT 1,
                        throttle_pct        INTEGER NOT NULL DEFAULT 0,
                        scrub_ip_addresses  INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE TABLE IF NOT EXISTS projects (
                        id                  INTEGER PRIMARY KEY,
                        slug                TEXT NOT NULL,
                        organization_id     INTEGER NOT NULL REFERENCES organizations(id),
                        scrub_ip_addresses  INTEGER NOT NULL DEFAULT 0,
                        throttle_pct        INTEGER NOT NULL DEFAULT 0,
                        first_event         TEXT,
                        UNIQUE(organization_id, slug)
                    );

                    CREATE TABLE IF NOT EXISTS dsn_keys (
                        public_key                TEXT PRIMARY KEY,
                        project_id                INTEGER NOT NULL REFERENCES projects(id),
                        rate_limit_window_secs    INTEGER,
                        rate_limit_count          INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS idx_dsn_keys_project ON dsn_keys(project_id);

                    CREATE TABLE IF NOT EXISTS project_counters (
                        project_id    INTEGER PRIMARY KEY,
                        next_short_id INTEGER NOT NULL DEFAULT 1
                    );

                    CREATE TABLE IF NOT EXISTS issues (
                        id             INTEGER PRIMARY KEY AUTOINCREMENT,
                        short_id       INTEGER NOT NULL,
                        project_id     INTEGER NOT NULL REFERENCES projects(id),
                        event_type     TEXT NOT NULL,
                        title          TEXT NOT NULL,
                        metadata       TEXT NOT NULL DEFAULT '{}',
                        level          TEXT NOT NULL,
                        first_seen     TEXT NOT NULL,
                        last_seen      TEXT NOT NULL,
                        count          INTEGER NOT NULL DEFAULT 0,
                        status         TEXT NOT NULL DEFAULT 'unresolved',
                        search_vector  TEXT NOT NULL DEFAULT '',
                        is_deleted     INTEGER NOT NULL DEFAULT 0
                    );
                    CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);

                    CREATE TABLE IF NOT EXISTS issue_hashes (
                        project_id TEXT NOT NULL,
                        hash       TEXT NOT NULL,
                        issue_id   INTEGER NOT NULL REFERENCES issues(id),
                        PRIMARY KEY (project_id, hash)
                    );

                    CREATE TABLE IF NOT EXISTS issue_events (
                        event_id       TEXT NOT NULL,
                        received       TEXT NOT NULL,
                        project_id     INTEGER NOT NULL,
                        issue_id       INTEGER NOT NULL,
                        event_type     TEXT NOT NULL,
                        level          TEXT NOT NULL,
                        timestamp      TEXT NOT NULL,
                        title          TEXT NOT NULL,
                        \"transaction\" TEXT,
                        culprit        TEXT,
                        tags           TEXT NOT NULL DEFAULT '[]',
                        data           TEXT NOT NULL DEFAULT '{}',
                        hashes         TEXT NOT NULL DEFAULT '[]',
                        release_id     INTEGER,
                        partition_date TEXT NOT NULL,
                        PRIMARY KEY (event_id, received)
                    );
                    CREATE INDEX IF NOT EXISTS idx_issue_events_issue ON issue_events(issue_id, received);
                    CREATE INDEX IF NOT EXISTS idx_issue_events_partition ON issue_events(partition_date);

                    CREATE TABLE IF NOT EXISTS tag_keys (
                        id  INTEGER PRIMARY KEY AUTOINCREMENT,
                        key TEXT NOT NULL UNIQUE
                    );
                    CREATE TABLE IF NOT EXISTS tag_values (
                        id    INTEGER PRIMARY KEY AUTOINCREMENT,
                        value TEXT NOT NULL UNIQUE
                    );
                    CREATE TABLE IF NOT EXISTS issue_tags (
                        date     TEXT NOT NULL,
                        issue_id INTEGER NOT NULL,
                        key_id   INTEGER NOT NULL,
                        value_id INTEGER NOT NULL,
                        count    INTEGER NOT NULL DEFAULT 0,
                        PRIMARY KEY (date, issue_id, key_id, value_id)
                    );

                    CREATE TABLE IF NOT EXISTS project_hourly_statistics (
                        project_id             INTEGER NOT NULL,
                        date                   TEXT NOT NULL,
                        hour                   INTEGER NOT NULL,
                        times_seen             INTEGER NOT NULL DEFAULT 0,
                        transaction_times_seen INTEGER NOT NULL DEFAULT 0,
                        PRIMARY KEY (project_id, date, hour)
                    );

                    CREATE TABLE IF NOT EXISTS issue_aggregates (
                        organization_id INTEGER NOT NULL,
                        issue_id        INTEGER NOT NULL,
                        date            TEXT NOT NULL,
                        hour            INTEGER NOT NULL,
                        count           INTEGER NOT NULL DEFAULT 0,
                        PRIMARY KEY (issue_id, date, hour)
                    );

                    CREATE TABLE IF NOT EXISTS transaction_groups (
                        id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        project_id  INTEGER NOT NULL,
                        transaction TEXT NOT NULL,
                        op          TEXT NOT NULL,
                        method      TEXT,
                        UNIQUE(project_id, transaction, op, method)
                    );

                    CREATE TABLE IF NOT EXISTS transaction_events (
                        event_id   TEXT NOT NULL,
                        received   TEXT NOT NULL,
                        group_id   INTEGER NOT NULL,
                        project_id INTEGER NOT NULL,
                        duration_ms REAL NOT NULL,
                        timestamp  TEXT NOT NULL,
                        data       TEXT NOT NULL DEFAULT '{}',
                        PRIMARY KEY (event_id, received)
                    );

                    CREATE TABLE IF NOT EXISTS transaction_group_aggregates (
                        organization_id           INTEGER NOT NULL,
                        group_id                  INTEGER NOT NULL,
                        minute                    TEXT NOT NULL,
                        count                     INTEGER NOT NULL DEFAULT 0,
                        total_duration_ms         REAL NOT NULL DEFAULT 0,
                        sum_of_squares_duration_ms REAL NOT NULL DEFAULT 0,
                        PRIMARY KEY (group_id, minute)
                    );

                    CREATE TABLE IF NOT EXISTS releases (
                        id              INTEGER PRIMARY KEY AUTOINCREMENT,
                        organization_id INTEGER NOT NULL,
                        version         TEXT NOT NULL,
                        project_ids     TEXT NOT NULL DEFAULT '[]',
                        UNIQUE(organization_id, version)
                    );

                    CREATE TABLE IF NOT EXISTS debug_symbol_bundles (
                        id                INTEGER PRIMARY KEY AUTOINCREMENT,
                        organization_id   INTEGER NOT NULL,
                        debug_id          TEXT,
                        release_id        INTEGER,
                        file_name         TEXT,
                        minified_file     TEXT NOT NULL,
                        source_map_file   TEXT,
                        last_used         TEXT
                    );
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_bundles_debug_id
                        ON debug_symbol_bundles(organization_id, debug_id) WHERE debug_id IS NOT NULL;
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_bundles_release_file
                        ON debug_symbol_bundles(release_id, file_name) WHERE release_id IS NOT NULL;

                    CREATE TABLE IF NOT EXISTS alert_rules (
                        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                        project_id         INTEGER NOT NULL,
                        timespan_minutes   INTEGER NOT NULL,
                        quantity_threshold INTEGER NOT NULL,
                        uptime             INTEGER NOT NULL DEFAULT 0,
                        recipients         TEXT NOT NULL DEFAULT '[]'
                    );
                    CREATE INDEX IF NOT EXISTS idx_alert_rules_project ON alert_rules(project_id);

                    CREATE TABLE IF NOT EXISTS notifications (
                        id             INTEGER PRIMARY KEY AUTOINCREMENT,
                        alert_rule_id  INTEGER NOT NULL,
                        issue_ids      TEXT NOT NULL DEFAULT '[]',
                        created_at     TEXT NOT NULL,
                        dispatched     INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE TABLE IF NOT EXISTS notification_issues (
                        alert_rule_id   INTEGER NOT NULL,
                        issue_id        INTEGER NOT NULL,
                        notification_id INTEGER NOT NULL,
                        PRIMARY KEY (alert_rule_id, issue_id)
                    );
                    ",
                )?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Auth / project resolution (§4.2)
    // -----------------------------------------------------------------------

    pub async fn lookup_project_by_dsn(
        &self,
        public_key: Uuid,
    ) -> Result<Option<ProjectLookup>, tokio_rusqlite::Error> {
        let key_str = public_key.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, p.slug, p.organization_id, p.scrub_ip_addresses,
                            p.throttle_pct, p.first_event,
                            o.id, o.slug, o.is_accepting_events, o.throttle_pct,
                            o.scrub_ip_addresses
                     FROM dsn_keys d
                     JOIN projects p ON p.id = d.project_id
                     JOIN organizations o ON o.id = p.organization_id
                     WHERE d.public_key = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![key_str])?;
                match rows.next()? {
                    Some(row) => {
                        let first_event_str: Option<String> = row.get(5)?;
                        let project = Project {
                            id: row.get(0)?,
                            slug: row.get(1)?,
                            organization_id: row.get(2)?,
                            scrub_ip_addresses: row.get::<_, i64>(3)? != 0,
                            throttle_pct: row.get::<_, i64>(4)? as u8,
                            first_event: first_event_str.map(|s| ts_from_sql(&s)),
                        };
                        let organization = Organization {
                            id: row.get(6)?,
                            slug: row.get(7)?,
                            is_accepting_events: row.get::<_, i64>(8)? != 0,
                            throttle_pct: row.get::<_, i64>(9)? as u8,
                            scrub_ip_addresses: row.get::<_, i64>(10)? != 0,
                        };
                        Ok(Some(ProjectLookup {
                            project,
                            organization,
                        }))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    /// Provisions an organization, a project under it, and one DSN key bound
    /// to that project. This is the one write path outside the ingest/worker
    /// pipeline proper — project setup happens out of band (an admin import,
    /// a fixture loader), the same way `seed_project` below stands in for it
    /// in this crate's own tests.
    pub async fn provision_project(
        &self,
        organization_id: i64,
        organization_slug: &str,
        project_id: i64,
        project_slug: &str,
        public_key: Uuid,
    ) -> Result<(), tokio_rusqlite::Error> {
        let organization_slug = organization_slug.to_string();
        let project_slug = project_slug.to_string();
        let key_str = public_key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO organizations (id, slug, is_accepting_events, throttle_pct, scrub_ip_addresses)
                     VALUES (?1, ?2, 1, 0, 0)
                     ON CONFLICT(id) DO NOTHING",
                    rusqlite::params![organization_id, organization_slug],
                )?;
                conn.execute(
                    "INSERT INTO projects (id, slug, organization_id, scrub_ip_addresses, throttle_pct)
                     VALUES (?1, ?2, ?3, 0, 0)
                     ON CONFLICT(id) DO NOTHING",
                    rusqlite::params![project_id, project_slug, organization_id],
                )?;
                conn.execute(
                    "INSERT INTO dsn_keys (public_key, project_id) VALUES (?1, ?2)
                     ON CONFLICT(public_key) DO NOTHING",
                    rusqlite::params![key_str, project_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Conditional `UPDATE ... WHERE first_event IS NULL` (Open Question #3,
    /// `DESIGN.md`: first-writer-wins, no re-read of the loser).
    pub async fn update_first_event(
        &self,
        project_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), tokio_rusqlite::Error> {
        let at_str = ts_to_sql(at);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE projects SET first_event = ?1 WHERE id = ?2 AND first_event IS NULL",
                    rusqlite::params![at_str, project_id],
                )?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Grouping (§4.5)
    // -----------------------------------------------------------------------

    /// Load existing `(project_id, hash) -> (issue_id, status)` mappings for
    /// a batch, in a single query (spec §4.5 step 1).
    pub async fn load_issue_hashes(
        &self,
        pairs: Vec<(i64, String)>,
    ) -> Result<std::collections::HashMap<(i64, String), (i64, IssueStatus)>, tokio_rusqlite::Error>
    {
        if pairs.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        self.conn
            .call(move |conn| {
                let mut out = std::collections::HashMap::new();
                let mut stmt = conn.prepare(
                    "SELECT h.project_id, h.hash, h.issue_id, i.status
                     FROM issue_hashes h JOIN issues i ON i.id = h.issue_id
                     WHERE h.project_id = ?1 AND h.hash = ?2",
                )?;
                for (project_id, hash) in &pairs {
                    let mut rows =
                        stmt.query(rusqlite::params![project_id.to_string(), hash])?;
                    if let Some(row) = rows.next()? {
                        let issue_id: i64 = row.get(2)?;
                        let status_str: String = row.get(3)?;
                        out.insert(
                            (*project_id, hash.clone()),
                            (issue_id, enum_from_sql::<IssueStatus>(&status_str)),
                        );
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Allocate the next short_id for a project via `UPDATE ... RETURNING`
    /// on a single counter row (spec §5 "Short-id counter").
    pub async fn next_short_id(&self, project_id: i64) -> Result<i64, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO project_counters (project_id, next_short_id)
                     VALUES (?1, 1)
                     ON CONFLICT(project_id) DO UPDATE SET
                        next_short_id = next_short_id + 1",
                    rusqlite::params![project_id],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT next_short_id FROM project_counters WHERE project_id = ?1",
                    rusqlite::params![project_id],
                    |r| r.get(0),
                )?;
                Ok(id)
            })
            .await
    }

    /// At-most-once Issue creation: insert the hash under a unique index and
    /// re-read the winner on conflict (spec §4.5 step 2,
    /// `process_event.py::check_set_issue_id`).
    ///
    /// Returns `(issue_id, created)`; `created = false` means a concurrent
    /// writer already owns `(project_id, hash)` and its issue_id was reused.
    pub async fn create_issue_or_reuse(
        &self,
        project_id: i64,
        hash: String,
        short_id: i64,
        title: String,
        event_type: IssueEventKind,
        level: EventLevel,
        metadata: serde_json::Value,
        first_seen: DateTime<Utc>,
    ) -> Result<(i64, bool), tokio_rusqlite::Error> {
        let event_type_sql = enum_to_sql(&event_type);
        let level_sql = enum_to_sql(&level);
        let status_sql = enum_to_sql(&IssueStatus::Unresolved);
        let first_seen_sql = ts_to_sql(first_seen);
        let metadata_sql = metadata.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let issue_id: i64 = tx.query_row(
                    "INSERT INTO issues (short_id, project_id, event_type, title,
                        metadata, level, first_seen, last_seen, count, status, search_vector)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?7,0,?8,'')
                     RETURNING id",
                    rusqlite::params![
                        short_id, project_id, event_type_sql, title, metadata_sql, level_sql,
                        first_seen_sql, status_sql,
                    ],
                    |r| r.get(0),
                )?;

                let inserted = tx.execute(
                    "INSERT INTO issue_hashes (project_id, hash, issue_id)
                     VALUES (?1,?2,?3)
                     ON CONFLICT(project_id, hash) DO NOTHING",
                    rusqlite::params![project_id.to_string(), hash, issue_id],
                )?;

                if inserted == 1 {
                    tx.commit()?;
                    Ok((issue_id, true))
                } else {
                    // Lost the race: roll back our half-created issue and
                    // re-read the winner's issue_id.
                    tx.execute("DELETE FROM issues WHERE id = ?1", rusqlite::params![issue_id])?;
                    let winner: i64 = tx.query_row(
                        "SELECT issue_id FROM issue_hashes WHERE project_id = ?1 AND hash = ?2",
                        rusqlite::params![project_id.to_string(), hash],
                        |r| r.get(0),
                    )?;
                    tx.commit()?;
                    Ok((winner, false))
                }
            })
            .await
    }

    /// Apply the accumulated per-issue batch contribution: bump count,
    /// extend last_seen, append the search-vector fragment, and reopen if
    /// requested (spec §4.5 "Issue incremental update").
    pub async fn apply_issue_batch_updates(
        &self,
        updates: Vec<IssueBatchUpdate>,
        max_search_vector_chars: usize,
    ) -> Result<(), tokio_rusqlite::Error> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut sorted = updates;
        sorted.sort_by_key(|u| u.issue_id);
        let resolved_sql = enum_to_sql(&IssueStatus::Resolved);
        let unresolved_sql = enum_to_sql(&IssueStatus::Unresolved);

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for u in &sorted {
                    let last_seen_sql = ts_to_sql(u.last_seen);
                    let current: Option<String> = tx
                        .query_row(
                            "SELECT search_vector FROM issues WHERE id = ?1",
                            rusqlite::params![u.issue_id],
                            |r| r.get(0),
                        )
                        .ok();
                    let merged = append_and_limit_lexemes(
                        current.as_deref().unwrap_or(""),
                        &u.search_vector_fragment,
                        max_search_vector_chars,
                    );
                    tx.execute(
                        "UPDATE issues SET
                            count = count + ?1,
                            last_seen = CASE WHEN last_seen < ?2 THEN ?2 ELSE last_seen END,
                            search_vector = ?3,
                            status = CASE WHEN ?4 = 1 AND status = ?5 THEN ?6 ELSE status END
                         WHERE id = ?7",
                        rusqlite::params![
                            u.delta_count,
                            last_seen_sql,
                            merged,
                            u.reopen as i64,
                            resolved_sql,
                            unresolved_sql,
                            u.issue_id,
                        ],
                    )?;
                    if u.reopen {
                        tx.execute(
                            "DELETE FROM notification_issues WHERE issue_id = ?1",
                            rusqlite::params![u.issue_id],
                        )?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Bulk persistence of events (§2 "Bulk Persister")
    // -----------------------------------------------------------------------

    pub async fn insert_issue_events(
        &self,
        events: Vec<OwnedIssueEvent>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if events.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO issue_events
                            (event_id, received, project_id, issue_id, event_type, level,
                             timestamp, title, \"transaction\", culprit, tags, data, hashes,
                             release_id, partition_date)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
                         ON CONFLICT(event_id, received) DO NOTHING",
                    )?;
                    for e in &events {
                        let partition_date = e.received.date_naive().to_string();
                        stmt.execute(rusqlite::params![
                            e.event_id.to_string(),
                            ts_to_sql(e.received),
                            e.project_id,
                            e.issue_id,
                            enum_to_sql(&e.event_type),
                            enum_to_sql(&e.level),
                            ts_to_sql(e.timestamp),
                            e.title,
                            e.transaction,
                            e.culprit,
                            serde_json::to_string(&e.tags).expect("serialize tags"),
                            e.data.to_string(),
                            serde_json::to_string(&e.hashes).expect("serialize hashes"),
                            e.release_id,
                            partition_date,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Statistics aggregation (§2 "Statistics Aggregator")
    // -----------------------------------------------------------------------

    pub async fn upsert_project_hourly_statistics(
        &self,
        mut counters: Vec<(i64, NaiveDate, u8, i64, i64)>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if counters.is_empty() {
            return Ok(());
        }
        counters.sort_by_key(|c| (c.0, c.1, c.2));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (project_id, date, hour, times_seen, txn_times_seen) in &counters {
                    tx.execute(
                        "INSERT INTO project_hourly_statistics
                            (project_id, date, hour, times_seen, transaction_times_seen)
                         VALUES (?1,?2,?3,?4,?5)
                         ON CONFLICT(project_id, date, hour) DO UPDATE SET
                            times_seen = times_seen + excluded.times_seen,
                            transaction_times_seen = transaction_times_seen + excluded.transaction_times_seen",
                        rusqlite::params![project_id, date.to_string(), *hour as i64, times_seen, txn_times_seen],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    pub async fn upsert_issue_aggregates(
        &self,
        mut counters: Vec<(i64, i64, NaiveDate, u8, i64)>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if counters.is_empty() {
            return Ok(());
        }
        counters.sort_by_key(|c| (c.1, c.2, c.3));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (organization_id, issue_id, date, hour, count) in &counters {
                    tx.execute(
                        "INSERT INTO issue_aggregates (organization_id, issue_id, date, hour, count)
                         VALUES (?1,?2,?3,?4,?5)
                         ON CONFLICT(issue_id, date, hour) DO UPDATE SET
                            count = count + excluded.count",
                        rusqlite::params![organization_id, issue_id, date.to_string(), *hour as i64, count],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    pub async fn upsert_issue_tags(
        &self,
        mut counters: Vec<(NaiveDate, i64, String, String, i64)>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if counters.is_empty() {
            return Ok(());
        }
        counters.sort_by(|a, b| (a.1, &a.2, &a.3).cmp(&(b.1, &b.2, &b.3)));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (date, issue_id, key, value, count) in &counters {
                    let key_id: i64 = tx.query_row(
                        "INSERT INTO tag_keys (key) VALUES (?1)
                         ON CONFLICT(key) DO UPDATE SET key = excluded.key
                         RETURNING id",
                        rusqlite::params![key],
                        |r| r.get(0),
                    )?;
                    let value_id: i64 = tx.query_row(
                        "INSERT INTO tag_values (value) VALUES (?1)
                         ON CONFLICT(value) DO UPDATE SET value = excluded.value
                         RETURNING id",
                        rusqlite::params![value],
                        |r| r.get(0),
                    )?;
                    tx.execute(
                        "INSERT INTO issue_tags (date, issue_id, key_id, value_id, count)
                         VALUES (?1,?2,?3,?4,?5)
                         ON CONFLICT(date, issue_id, key_id, value_id) DO UPDATE SET
                            count = count + excluded.count",
                        rusqlite::params![date.to_string(), issue_id, key_id, value_id, count],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Debug symbol bundles (§4.4 symbolication)
    // -----------------------------------------------------------------------

    pub async fn find_bundles_by_debug_ids(
        &self,
        organization_id: i64,
        debug_ids: Vec<Uuid>,
    ) -> Result<Vec<DebugSymbolBundle>, tokio_rusqlite::Error> {
        if debug_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.conn
            .call(move |conn| {
                let mut out = Vec::new();
                let mut stmt = conn.prepare(
                    "SELECT id, organization_id, debug_id, release_id, file_name,
                            minified_file, source_map_file, last_used
                     FROM debug_symbol_bundles
                     WHERE organization_id = ?1 AND debug_id = ?2",
                )?;
                for id in &debug_ids {
                    let mut rows =
                        stmt.query(rusqlite::params![organization_id, id.to_string()])?;
                    if let Some(row) = rows.next()? {
                        out.push(row_to_bundle(row)?);
                    }
                }
                Ok(out)
            })
            .await
    }

    pub async fn find_bundles_by_release_files(
        &self,
        release_id: i64,
        file_names: Vec<String>,
    ) -> Result<Vec<DebugSymbolBundle>, tokio_rusqlite::Error> {
        if file_names.is_empty() {
            return Ok(Vec::new());
        }
        self.conn
            .call(move |conn| {
                let mut out = Vec::new();
                let mut stmt = conn.prepare(
                    "SELECT id, organization_id, debug_id, release_id, file_name,
                            minified_file, source_map_file, last_used
                     FROM debug_symbol_bundles
                     WHERE release_id = ?1 AND file_name = ?2",
                )?;
                for name in &file_names {
                    let mut rows = stmt.query(rusqlite::params![release_id, name])?;
                    if let Some(row) = rows.next()? {
                        out.push(row_to_bundle(row)?);
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Refresh `last_used` for bundles whose timestamp is stale (>24h), the
    /// application-level equivalent of the original's
    /// `SELECT ... FOR UPDATE SKIP LOCKED` (spec §4.4, §5).
    pub async fn refresh_bundle_last_used(
        &self,
        bundle_ids: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if bundle_ids.is_empty() {
            return Ok(());
        }
        let now_sql = ts_to_sql(now);
        let cutoff_sql = ts_to_sql(now - chrono::Duration::hours(24));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for id in &bundle_ids {
                    tx.execute(
                        "UPDATE debug_symbol_bundles SET last_used = ?1
                         WHERE id = ?2 AND (last_used IS NULL OR last_used < ?3)",
                        rusqlite::params![now_sql, id, cutoff_sql],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Alerts (§4.7)
    // -----------------------------------------------------------------------

    pub async fn alert_rules_for_projects(
        &self,
        project_ids: Vec<i64>,
    ) -> Result<Vec<AlertRule>, tokio_rusqlite::Error> {
        if project_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.conn
            .call(move |conn| {
                let mut out = Vec::new();
                let mut stmt = conn.prepare(
                    "SELECT id, project_id, timespan_minutes, quantity_threshold, uptime, recipients
                     FROM alert_rules WHERE project_id = ?1",
                )?;
                for project_id in &project_ids {
                    let mut rows = stmt.query(rusqlite::params![project_id])?;
                    while let Some(row) = rows.next()? {
                        out.push(row_to_alert_rule(row)?);
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Count distinct issues in `rule.project_id` with ≥1 event inside the
    /// rule's window that do not already have a Notification for this rule,
    /// and the per-issue event counts (spec §4.7 step 2).
    pub async fn candidate_issue_counts(
        &self,
        rule_id: i64,
        project_id: i64,
        issue_ids: Vec<i64>,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64)>, tokio_rusqlite::Error> {
        if issue_ids.is_empty() {
            return Ok(Vec::new());
        }
        let window_start_sql = ts_to_sql(window_start);
        self.conn
            .call(move |conn| {
                let mut out = Vec::new();
                let mut stmt = conn.prepare(
                    "SELECT COUNT(*) FROM issue_events
                     WHERE project_id = ?1 AND issue_id = ?2 AND received >= ?3",
                )?;
                let mut already_notified = conn.prepare(
                    "SELECT 1 FROM notification_issues WHERE alert_rule_id = ?1 AND issue_id = ?2",
                )?;
                for issue_id in &issue_ids {
                    let notified = already_notified
                        .query(rusqlite::params![rule_id, issue_id])?
                        .next()?
                        .is_some();
                    if notified {
                        continue;
                    }
                    let count: i64 = stmt.query_row(
                        rusqlite::params![project_id, issue_id, window_start_sql],
                        |r| r.get(0),
                    )?;
                    out.push((*issue_id, count));
                }
                Ok(out)
            })
            .await
    }

    pub async fn create_notification(
        &self,
        alert_rule_id: i64,
        issue_ids: Vec<i64>,
        created_at: DateTime<Utc>,
    ) -> Result<Notification, tokio_rusqlite::Error> {
        let issue_ids_json = serde_json::to_string(&issue_ids).expect("serialize issue ids");
        let created_at_sql = ts_to_sql(created_at);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id: i64 = tx.query_row(
                    "INSERT INTO notifications (alert_rule_id, issue_ids, created_at, dispatched)
                     VALUES (?1,?2,?3,0) RETURNING id",
                    rusqlite::params![alert_rule_id, issue_ids_json, created_at_sql],
                    |r| r.get(0),
                )?;
                for issue_id in &issue_ids {
                    tx.execute(
                        "INSERT INTO notification_issues (alert_rule_id, issue_id, notification_id)
                         VALUES (?1,?2,?3)",
                        rusqlite::params![alert_rule_id, issue_id, id],
                    )?;
                }
                tx.commit()?;
                Ok(Notification {
                    id,
                    alert_rule_id,
                    issue_ids: issue_ids.clone(),
                    created_at,
                    dispatched: false,
                })
            })
            .await
    }

    pub async fn mark_notification_dispatched(
        &self,
        notification_id: i64,
    ) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE notifications SET dispatched = 1 WHERE id = ?1",
                    rusqlite::params![notification_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Issue rows plus their project's slug, for rendering a notification
    /// (spec §4.8 "Dispatcher" reads issue + project to build `IssueSummary`).
    pub async fn issues_for_notification(
        &self,
        issue_ids: Vec<i64>,
    ) -> Result<Vec<(Issue, String)>, tokio_rusqlite::Error> {
        if issue_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.conn
            .call(move |conn| {
                let mut out = Vec::new();
                let mut stmt = conn.prepare(
                    "SELECT i.id, i.short_id, i.project_id, i.event_type, i.title, i.metadata,
                            i.level, i.first_seen, i.last_seen, i.count, i.status,
                            i.search_vector, i.is_deleted, p.slug
                     FROM issues i JOIN projects p ON p.id = i.project_id
                     WHERE i.id = ?1",
                )?;
                for issue_id in &issue_ids {
                    if let Some(row) = stmt.query(rusqlite::params![issue_id])?.next()? {
                        let issue = row_to_issue(row)?;
                        let project_slug: String = row.get(13)?;
                        out.push((issue, project_slug));
                    }
                }
                Ok(out)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Transactions (§3 TransactionGroup/Event)
    // -----------------------------------------------------------------------

    /// Get-or-create a release row scoped to an organization (spec §3
    /// Release, used by the symbolicator's release/file bundle lookup and
    /// the grouping engine's release tag).
    pub async fn get_or_create_release(
        &self,
        organization_id: i64,
        version: String,
    ) -> Result<i64, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO releases (organization_id, version, project_ids)
                     VALUES (?1, ?2, '[]')
                     ON CONFLICT(organization_id, version) DO NOTHING",
                    rusqlite::params![organization_id, version],
                )?;
                conn.query_row(
                    "SELECT id FROM releases WHERE organization_id = ?1 AND version = ?2",
                    rusqlite::params![organization_id, version],
                    |r| r.get(0),
                )
            })
            .await
    }

    /// Get-or-create a transaction group identified by
    /// `(project_id, transaction, op, method)` (spec §3 TransactionGroup).
    pub async fn get_or_create_transaction_group(
        &self,
        project_id: i64,
        transaction: String,
        op: String,
        method: Option<String>,
    ) -> Result<i64, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO transaction_groups (project_id, transaction, op, method)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(project_id, transaction, op, method) DO NOTHING",
                    rusqlite::params![project_id, transaction, op, method],
                )?;
                conn.query_row(
                    "SELECT id FROM transaction_groups
                     WHERE project_id = ?1 AND transaction = ?2 AND op = ?3
                        AND method IS ?4",
                    rusqlite::params![project_id, transaction, op, method],
                    |r| r.get(0),
                )
            })
            .await
    }

    pub async fn insert_transaction_events(
        &self,
        events: Vec<OwnedTransactionEvent>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if events.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO transaction_events
                            (event_id, received, group_id, project_id, duration_ms, timestamp, data)
                         VALUES (?1,?2,?3,?4,?5,?6,?7)
                         ON CONFLICT(event_id, received) DO NOTHING",
                    )?;
                    for e in &events {
                        stmt.execute(rusqlite::params![
                            e.event_id.to_string(),
                            ts_to_sql(e.received),
                            e.group_id,
                            e.project_id,
                            e.duration_ms,
                            ts_to_sql(e.timestamp),
                            e.data.to_string(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Per-minute duration buckets, accumulated the same way issue
    /// aggregates are (spec §4.5 "Aggregate updates" generalized to
    /// transactions; `sum_of_squares` lets a future p95/stddev view avoid a
    /// second table scan).
    pub async fn upsert_transaction_group_aggregates(
        &self,
        mut counters: Vec<(i64, i64, DateTime<Utc>, i64, f64, f64)>,
    ) -> Result<(), tokio_rusqlite::Error> {
        if counters.is_empty() {
            return Ok(());
        }
        counters.sort_by_key(|c| (c.1, c.2));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (organization_id, group_id, minute, count, total_ms, sumsq_ms) in &counters {
                    let minute_sql = ts_to_sql(*minute);
                    tx.execute(
                        "INSERT INTO transaction_group_aggregates
                            (organization_id, group_id, minute, count, total_duration_ms, sum_of_squares_duration_ms)
                         VALUES (?1,?2,?3,?4,?5,?6)
                         ON CONFLICT(group_id, minute) DO UPDATE SET
                            count = count + excluded.count,
                            total_duration_ms = total_duration_ms + excluded.total_duration_ms,
                            sum_of_squares_duration_ms = sum_of_squares_duration_ms + excluded.sum_of_squares_duration_ms",
                        rusqlite::params![organization_id, group_id, minute_sql, count, total_ms, sumsq_ms],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Issue lifecycle / maintenance (§4.9, §9.1 soft-delete purge)
    // -----------------------------------------------------------------------

    pub async fn soft_delete_issue(&self, issue_id: i64) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE issues SET is_deleted = 1 WHERE id = ?1",
                    rusqlite::params![issue_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Hard-purge issues soft-deleted more than `grace_hours` ago (Open
    /// Question #1 in `DESIGN.md`/`SPEC_FULL.md` §9.1: 24h grace window).
    pub async fn purge_soft_deleted(
        &self,
        now: DateTime<Utc>,
        grace_hours: i64,
    ) -> Result<u64, tokio_rusqlite::Error> {
        let cutoff_sql = ts_to_sql(now - chrono::Duration::hours(grace_hours));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<i64> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM issues WHERE is_deleted = 1 AND last_seen < ?1",
                    )?;
                    let rows = stmt.query_map(rusqlite::params![cutoff_sql], |r| r.get(0))?;
                    rows.collect::<Result<_, _>>()?
                };
                for id in &ids {
                    tx.execute(
                        "DELETE FROM issue_events WHERE issue_id = ?1",
                        rusqlite::params![id],
                    )?;
                    tx.execute(
                        "DELETE FROM issue_hashes WHERE issue_id = ?1",
                        rusqlite::params![id],
                    )?;
                    tx.execute("DELETE FROM issues WHERE id = ?1", rusqlite::params![id])?;
                }
                tx.commit()?;
                Ok(ids.len() as u64)
            })
            .await
    }

    /// Coarse counts for the operator CLI's `status` subcommand.
    pub async fn status_snapshot(&self) -> Result<StatusSnapshot, tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                let projects: i64 =
                    conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?;
                let issues_open: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM issues WHERE status = 'unresolved' AND is_deleted = 0",
                    [],
                    |r| r.get(0),
                )?;
                let issues_total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM issues WHERE is_deleted = 0",
                    [],
                    |r| r.get(0),
                )?;
                let events_total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM issue_events", [], |r| r.get(0))?;
                let transactions_total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM transaction_events", [], |r| r.get(0))?;
                let undispatched_notifications: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM notifications WHERE dispatched = 0",
                    [],
                    |r| r.get(0),
                )?;
                Ok(StatusSnapshot {
                    projects,
                    issues_open,
                    issues_total,
                    events_total,
                    transactions_total,
                    undispatched_notifications,
                })
            })
            .await
    }
}

/// Snapshot returned by [`EventStore::status_snapshot`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StatusSnapshot {
    pub projects: i64,
    pub issues_open: i64,
    pub issues_total: i64,
    pub events_total: i64,
    pub transactions_total: i64,
    pub undispatched_notifications: i64,
}

#[derive(Debug, Clone)]
pub struct OwnedIssueEvent {
    pub event_id: Uuid,
    pub received: DateTime<Utc>,
    pub project_id: i64,
    pub issue_id: i64,
    pub event_type: IssueEventKind,
    pub level: EventLevel,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub transaction: Option<String>,
    pub culprit: Option<String>,
    pub tags: Vec<(String, String)>,
    pub data: serde_json::Value,
    pub hashes: Vec<String>,
    pub release_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct OwnedTransactionEvent {
    pub event_id: Uuid,
    pub received: DateTime<Utc>,
    pub group_id: i64,
    pub project_id: i64,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl<'a> From<IssueEventInput<'a>> for OwnedIssueEvent {
    fn from(input: IssueEventInput<'a>) -> Self {
        Self {
            event_id: input.event_id,
            received: input.received,
            project_id: input.project_id,
            issue_id: input.issue_id,
            event_type: input.event_type,
            level: input.level,
            timestamp: input.timestamp,
            title: input.title.to_string(),
            transaction: input.transaction.map(str::to_string),
            culprit: input.culprit.map(str::to_string),
            tags: input.tags.to_vec(),
            data: input.data.clone(),
            hashes: input.hashes.to_vec(),
            release_id: input.release_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_bundle(row: &rusqlite::Row<'_>) -> rusqlite::Result<DebugSymbolBundle> {
    let debug_id_str: Option<String> = row.get(2)?;
    let release_id: Option<i64> = row.get(3)?;
    let file_name: Option<String> = row.get(4)?;
    let last_used_str: Option<String> = row.get(7)?;

    let key = match (debug_id_str, release_id, file_name) {
        (Some(d), _, _) => DebugSymbolKey::DebugId(Uuid::parse_str(&d).expect("valid uuid")),
        (None, Some(release_id), Some(file_name)) => {
            DebugSymbolKey::ReleaseFile { release_id, file_name }
        }
        _ => DebugSymbolKey::ReleaseFile {
            release_id: 0,
            file_name: String::new(),
        },
    };

    Ok(DebugSymbolBundle {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        key,
        minified_file: row.get(5)?,
        source_map_file: row.get(6)?,
        last_used: last_used_str.map(|s| ts_from_sql(&s)),
    })
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let metadata_str: String = row.get(5)?;
    let first_seen_str: String = row.get(7)?;
    let last_seen_str: String = row.get(8)?;
    let status_str: String = row.get(10)?;
    Ok(Issue {
        id: row.get(0)?,
        short_id: row.get(1)?,
        project_id: row.get(2)?,
        event_type: enum_from_sql(&row.get::<_, String>(3)?),
        title: row.get(4)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        level: enum_from_sql(&row.get::<_, String>(6)?),
        first_seen: ts_from_sql(&first_seen_str),
        last_seen: ts_from_sql(&last_seen_str),
        count: row.get(9)?,
        status: enum_from_sql(&status_str),
        search_vector: row.get(11)?,
        is_deleted: row.get::<_, i64>(12)? != 0,
    })
}

fn row_to_alert_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRule> {
    let recipients_str: String = row.get(5)?;
    let recipients: Vec<AlertRecipient> =
        serde_json::from_str(&recipients_str).unwrap_or_default();
    Ok(AlertRule {
        id: row.get(0)?,
        project_id: row.get(1)?,
        timespan_minutes: row.get(2)?,
        quantity_threshold: row.get(3)?,
        uptime: row.get::<_, i64>(4)? != 0,
        recipients,
    })
}

/// Append `new_text` to `existing` and cap at `max_chars`, cutting at the
/// last space boundary (spec §4.6: SQLite stand-in for the original
/// `PGAppendAndLimitTsVector` — see `SPEC_FULL.md` §3.1).
fn append_and_limit_lexemes(existing: &str, new_text: &str, max_chars: usize) -> String {
    let mut combined = String::with_capacity(existing.len() + new_text.len() + 1);
    combined.push_str(existing);
    if !existing.is_empty() && !new_text.is_empty() {
        combined.push(' ');
    }
    combined.push_str(new_text);
    if combined.len() <= max_chars {
        return combined;
    }
    let mut cut = max_chars;
    while cut > 0 && !combined.is_char_boundary(cut) {
        cut -= 1;
    }
    match combined[..cut].rfind(' ') {
        Some(pos) => combined[..pos].to_string(),
        None => combined[..cut].to_string(),
    }
}
