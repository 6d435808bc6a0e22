use std::path::Path;
use std::time::Duration;

use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use thiserror::Error;

use crate::db::{
    AnalysisStatus, BinaryFunctionRecord, BinaryRecord, CrateRecord, FunctionKind,
    FunctionRecord, MatchLink, MatchRunRecord, MatchRunStatus, ProjectStats,
    SourceFunctionRecord, Stored,
};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// How long a connection waits on a lock held by another ingestion.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for project database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed project database.
///
/// Owns a single connection. Helpers take `&self`, so a caller can open a
/// transaction with [`ProjectDb::begin_immediate`] and keep calling helpers
/// until it commits; dropping the transaction rolls everything back.
#[derive(Debug)]
pub struct ProjectDb {
    conn: Connection,
}

const SOURCE_COLUMNS: &str = "id, crate, name, full_name, kind, path, impl_type, impl_trait, \
                              status, version, signature, matched";
const BINARY_COLUMNS: &str = "id, crate, name, full_name, kind, path, impl_type, impl_trait, \
                              status, binary, address, signature, matched_source";

impl ProjectDb {
    /// Open (or create) a project database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer higher-level helpers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start an `IMMEDIATE` transaction: the write lock is taken up front, so
    /// two ingestions of the same unit are serialized instead of racing.
    pub fn begin_immediate(&self) -> DbResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?)
    }

    /// Return the crate row for `(name, version)`, creating it if needed.
    ///
    /// The flag is `true` when the row was created by this call.
    pub fn get_or_create_crate(&self, name: &str, version: &str) -> DbResult<(CrateRecord, bool)> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO crates (name, version, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![name, version, now_rfc3339()],
        )?;
        let record = self.conn.query_row(
            "SELECT id, name, version FROM crates WHERE name = ?1 AND version = ?2",
            params![name, version],
            |row| Ok(CrateRecord { id: row.get(0)?, name: row.get(1)?, version: row.get(2)? }),
        )?;
        Ok((record, inserted == 1))
    }

    pub fn find_crate(&self, name: &str, version: &str) -> DbResult<Option<CrateRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, name, version FROM crates WHERE name = ?1 AND version = ?2",
                params![name, version],
                |row| Ok(CrateRecord { id: row.get(0)?, name: row.get(1)?, version: row.get(2)? }),
            )
            .optional()?;
        Ok(record)
    }

    /// List all crate versions (ordered by name, then version).
    pub fn list_crates(&self) -> DbResult<Vec<CrateRecord>> {
        let mut stmt =
            self.conn.prepare("SELECT id, name, version FROM crates ORDER BY name, version")?;
        let rows = stmt.query_map([], |row| {
            Ok(CrateRecord { id: row.get(0)?, name: row.get(1)?, version: row.get(2)? })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Number of source functions stored for a crate row.
    pub fn count_source_functions(&self, crate_id: i64) -> DbResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM source_functions WHERE crate_id = ?1",
            params![crate_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete a crate's source functions; links pointing at them are cleared.
    pub fn delete_source_functions(&self, crate_id: i64) -> DbResult<usize> {
        let removed =
            self.conn
                .execute("DELETE FROM source_functions WHERE crate_id = ?1", params![crate_id])?;
        Ok(removed)
    }

    /// Insert a source function for a crate row and return its row id.
    pub fn insert_source_function(
        &self,
        crate_id: i64,
        record: &SourceFunctionRecord,
    ) -> DbResult<i64> {
        let f = &record.function;
        let (kind, path, impl_type, impl_trait) = f.kind.to_columns();
        self.conn.execute(
            r#"
            INSERT INTO source_functions
                (crate_id, crate, name, full_name, kind, path, impl_type, impl_trait,
                 status, version, signature, matched)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                crate_id,
                f.crate_name,
                f.name,
                f.full_name,
                kind,
                path,
                impl_type,
                impl_trait,
                f.status.to_i32(),
                record.version,
                record.signature,
                record.matched,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All `ok` source functions of a crate version, ordered by id.
    pub fn source_functions(
        &self,
        crate_name: &str,
        version: &str,
    ) -> DbResult<Vec<Stored<SourceFunctionRecord>>> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM source_functions \
             WHERE crate = ?1 AND version = ?2 AND status = ?3 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![crate_name, version, AnalysisStatus::Ok.to_i32()],
            source_from_row,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_source_signature(&self, source_id: i64, signature: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE source_functions SET signature = ?1 WHERE id = ?2",
            params![signature, source_id],
        )?;
        Ok(())
    }

    /// Return the binary row for `name`, creating it if needed.
    ///
    /// The flag is `true` when the row was created by this call. An existing
    /// row keeps its hash; use [`ProjectDb::set_binary_hash`] to refresh it.
    pub fn get_or_create_binary(
        &self,
        name: &str,
        hash: Option<&str>,
    ) -> DbResult<(BinaryRecord, bool)> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO binaries (name, hash, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![name, hash, now_rfc3339()],
        )?;
        let record = self.conn.query_row(
            "SELECT id, name, hash FROM binaries WHERE name = ?1",
            params![name],
            |row| Ok(BinaryRecord { id: row.get(0)?, name: row.get(1)?, hash: row.get(2)? }),
        )?;
        Ok((record, inserted == 1))
    }

    pub fn set_binary_hash(&self, binary_id: i64, hash: Option<&str>) -> DbResult<()> {
        self.conn
            .execute("UPDATE binaries SET hash = ?1 WHERE id = ?2", params![hash, binary_id])?;
        Ok(())
    }

    /// List all binaries (ordered by id).
    pub fn list_binaries(&self) -> DbResult<Vec<BinaryRecord>> {
        let mut stmt = self.conn.prepare("SELECT id, name, hash FROM binaries ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(BinaryRecord { id: row.get(0)?, name: row.get(1)?, hash: row.get(2)? })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_binary_functions(&self, binary_id: i64) -> DbResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM binary_functions WHERE binary_id = ?1",
            params![binary_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete a binary's functions and recompute the source `matched` flags
    /// they may have been holding up.
    pub fn delete_binary_functions(&self, binary_id: i64) -> DbResult<usize> {
        let removed =
            self.conn
                .execute("DELETE FROM binary_functions WHERE binary_id = ?1", params![binary_id])?;
        self.refresh_matched_flags()?;
        Ok(removed)
    }

    /// Insert a binary function for a binary row and return its row id.
    pub fn insert_binary_function(
        &self,
        binary_id: i64,
        record: &BinaryFunctionRecord,
    ) -> DbResult<i64> {
        let f = &record.function;
        let (kind, path, impl_type, impl_trait) = f.kind.to_columns();
        self.conn.execute(
            r#"
            INSERT INTO binary_functions
                (binary_id, crate, name, full_name, kind, path, impl_type, impl_trait,
                 status, binary, address, signature, matched_source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                binary_id,
                f.crate_name,
                f.name,
                f.full_name,
                kind,
                path,
                impl_type,
                impl_trait,
                f.status.to_i32(),
                record.binary,
                record.address as i64,
                record.signature,
                record.matched_source,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// `ok` binary functions of a crate that are not linked yet, ordered by id.
    pub fn unmatched_binary_functions(
        &self,
        crate_name: &str,
    ) -> DbResult<Vec<Stored<BinaryFunctionRecord>>> {
        let sql = format!(
            "SELECT {BINARY_COLUMNS} FROM binary_functions \
             WHERE crate = ?1 AND status = ?2 AND matched_source IS NULL ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows =
            stmt.query_map(params![crate_name, AnalysisStatus::Ok.to_i32()], binary_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Binary functions of a crate with the given status, linked or not, ordered by id.
    pub fn crate_binary_functions(
        &self,
        crate_name: &str,
        status: AnalysisStatus,
    ) -> DbResult<Vec<Stored<BinaryFunctionRecord>>> {
        let sql = format!(
            "SELECT {BINARY_COLUMNS} FROM binary_functions \
             WHERE crate = ?1 AND status = ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![crate_name, status.to_i32()], binary_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Binary functions of one binary, optionally restricted to a status.
    pub fn binary_functions(
        &self,
        binary: &str,
        status: Option<AnalysisStatus>,
    ) -> DbResult<Vec<Stored<BinaryFunctionRecord>>> {
        let mut sql = format!("SELECT {BINARY_COLUMNS} FROM binary_functions WHERE binary = ?1");
        let mut args: Vec<rusqlite::types::Value> = vec![binary.to_string().into()];
        if let Some(status) = status {
            sql.push_str(" AND status = ?2");
            args.push(i64::from(status.to_i32()).into());
        }
        sql.push_str(" ORDER BY address");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), binary_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Link a binary function to a source function and mark the source matched.
    pub fn set_match(&self, binary_function_id: i64, source_id: i64) -> DbResult<()> {
        self.conn.execute(
            "UPDATE binary_functions SET matched_source = ?1 WHERE id = ?2",
            params![source_id, binary_function_id],
        )?;
        self.conn
            .execute("UPDATE source_functions SET matched = 1 WHERE id = ?1", params![source_id])?;
        Ok(())
    }

    /// Make every `matched` flag agree with the links that currently exist.
    pub fn refresh_matched_flags(&self) -> DbResult<()> {
        self.conn.execute(
            r#"
            UPDATE source_functions
            SET matched = EXISTS (
                SELECT 1 FROM binary_functions b WHERE b.matched_source = source_functions.id
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Persisted links, optionally restricted to one crate, ordered by binary and address.
    pub fn list_matches(&self, crate_name: Option<&str>) -> DbResult<Vec<MatchLink>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT b.binary, b.address, b.full_name, s.crate, s.version, s.full_name
            FROM binary_functions b
            JOIN source_functions s ON s.id = b.matched_source
            WHERE ?1 IS NULL OR s.crate = ?1
            ORDER BY b.binary, b.address
            "#,
        )?;
        let rows = stmt.query_map(params![crate_name], |row| {
            let address: i64 = row.get(1)?;
            Ok(MatchLink {
                binary: row.get(0)?,
                address: address as u64,
                binary_name: row.get(2)?,
                crate_name: row.get(3)?,
                version: row.get(4)?,
                source_name: row.get(5)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert a match run record and return its row id.
    pub fn insert_match_run(&self, record: &MatchRunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO match_runs (crate, version, linked_by_name, linked_by_signature, unmatched, failures, status, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.crate_name,
                record.version,
                record.linked_by_name as i64,
                record.linked_by_signature as i64,
                record.unmatched as i64,
                record.failures as i64,
                record.status.as_str(),
                record.started_at,
                record.finished_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all match runs (ordered by id).
    pub fn list_match_runs(&self) -> DbResult<Vec<MatchRunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT crate, version, linked_by_name, linked_by_signature, unmatched, failures, status, started_at, finished_at
            FROM match_runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(6)?;
            let status = MatchRunStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    format!("unknown match run status `{status}`").into(),
                )
            })?;
            Ok(MatchRunRecord {
                crate_name: row.get(0)?,
                version: row.get(1)?,
                linked_by_name: row.get::<_, i64>(2)? as usize,
                linked_by_signature: row.get::<_, i64>(3)? as usize,
                unmatched: row.get::<_, i64>(4)? as usize,
                failures: row.get::<_, i64>(5)? as usize,
                status,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Row counts for a quick project overview.
    pub fn stats(&self) -> DbResult<ProjectStats> {
        let count = |sql: &str| -> DbResult<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(ProjectStats {
            crates: count("SELECT COUNT(*) FROM crates")?,
            binaries: count("SELECT COUNT(*) FROM binaries")?,
            source_functions: count("SELECT COUNT(*) FROM source_functions")?,
            binary_functions: count("SELECT COUNT(*) FROM binary_functions")?,
            linked_binary_functions: count(
                "SELECT COUNT(*) FROM binary_functions WHERE matched_source IS NOT NULL",
            )?,
            matched_source_functions: count(
                "SELECT COUNT(*) FROM source_functions WHERE matched = 1",
            )?,
        })
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Read the eight shared function columns starting at `first` (which is `crate`).
fn function_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<FunctionRecord> {
    let kind_code: i32 = row.get(first + 3)?;
    let kind = FunctionKind::from_columns(
        kind_code,
        row.get(first + 4)?,
        row.get(first + 5)?,
        row.get(first + 6)?,
    )
    .ok_or(rusqlite::Error::IntegralValueOutOfRange(first + 3, i64::from(kind_code)))?;
    let status_code: i32 = row.get(first + 7)?;
    let status = AnalysisStatus::from_i32(status_code)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(first + 7, i64::from(status_code)))?;
    Ok(FunctionRecord {
        crate_name: row.get(first)?,
        name: row.get(first + 1)?,
        full_name: row.get(first + 2)?,
        kind,
        status,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Stored<SourceFunctionRecord>> {
    Ok(Stored {
        id: row.get(0)?,
        record: SourceFunctionRecord {
            function: function_from_row(row, 1)?,
            version: row.get(9)?,
            signature: row.get(10)?,
            matched: row.get(11)?,
        },
    })
}

fn binary_from_row(row: &Row<'_>) -> rusqlite::Result<Stored<BinaryFunctionRecord>> {
    let address: i64 = row.get(10)?;
    Ok(Stored {
        id: row.get(0)?,
        record: BinaryFunctionRecord {
            function: function_from_row(row, 1)?,
            binary: row.get(9)?,
            address: address as u64,
            signature: row.get(11)?,
            matched_source: row.get(12)?,
        },
    })
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: crates, binaries, source_functions, binary_functions
/// - 2: add match_runs table
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let mut current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS crates (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL,
                version    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(name, version)
            );

            CREATE TABLE IF NOT EXISTS binaries (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL UNIQUE,
                hash       TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS source_functions (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                crate_id   INTEGER NOT NULL REFERENCES crates(id) ON DELETE CASCADE,
                crate      TEXT NOT NULL,
                name       TEXT NOT NULL,
                full_name  TEXT NOT NULL,
                kind       INTEGER NOT NULL,
                path       TEXT,
                impl_type  TEXT,
                impl_trait TEXT,
                status     INTEGER NOT NULL,
                version    TEXT NOT NULL,
                signature  TEXT,
                matched    INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS source_functions_crate
                ON source_functions(crate, version);

            CREATE TABLE IF NOT EXISTS binary_functions (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                binary_id      INTEGER NOT NULL REFERENCES binaries(id) ON DELETE CASCADE,
                crate          TEXT NOT NULL,
                name           TEXT NOT NULL,
                full_name      TEXT NOT NULL,
                kind           INTEGER NOT NULL,
                path           TEXT,
                impl_type      TEXT,
                impl_trait     TEXT,
                status         INTEGER NOT NULL,
                binary         TEXT NOT NULL,
                address        INTEGER NOT NULL,
                signature      TEXT NOT NULL,
                matched_source INTEGER REFERENCES source_functions(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS binary_functions_crate
                ON binary_functions(crate);

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS match_runs (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                crate               TEXT NOT NULL,
                version             TEXT NOT NULL,
                linked_by_name      INTEGER NOT NULL,
                linked_by_signature INTEGER NOT NULL,
                unmatched           INTEGER NOT NULL,
                failures            INTEGER NOT NULL,
                status              TEXT NOT NULL,
                started_at          TEXT NOT NULL,
                finished_at         TEXT NOT NULL
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
pub fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
