//! SQLite-backed record store.
//!
//! Records live in one table keyed by `(namespace, set_name, user_key)` with
//! their bins serialised as JSON. Registered secondary indexes are kept in a
//! second table and gate which bins may be queried. Integer ranges are
//! filtered in SQL; spatial predicates are evaluated on decoded records.

use std::{
    fmt,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use camino::{Utf8Path, Utf8PathBuf};
use geoload_core::{
    IndexSpec, Query, QueryPredicate, RecordKey, StoreConnection, StoreError, StoreRecord,
};
use log::debug;
use rusqlite::{Connection, Error as SqliteError, OptionalExtension, params};
use thiserror::Error;

/// How long a connection waits for another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        namespace TEXT NOT NULL,
        set_name TEXT NOT NULL,
        user_key INTEGER NOT NULL,
        bins TEXT NOT NULL,
        PRIMARY KEY (namespace, set_name, user_key)
    );
    CREATE TABLE IF NOT EXISTS indexes (
        namespace TEXT NOT NULL,
        name TEXT NOT NULL,
        set_name TEXT NOT NULL,
        bin TEXT NOT NULL,
        kind TEXT NOT NULL,
        PRIMARY KEY (namespace, name)
    );
";

/// Errors raised while opening a [`SqliteStore`].
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Failed to create the parent directory for the database.
    #[error("failed to create parent directory for {path}: {source}")]
    CreateDirectory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Opening or configuring a connection failed.
    #[error("failed to open SQLite database at {path}: {source}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating the tables failed.
    #[error("failed to create the store schema in {path}: {source}")]
    CreateSchema {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

/// A set of independent connections to one SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    path: Utf8PathBuf,
    connections: Vec<SqliteConnection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` with `connections`
    /// independent connections.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError`] when the directory, database or schema
    /// cannot be created.
    pub fn open(path: &Utf8Path, connections: NonZeroUsize) -> Result<Self, SqliteStoreError> {
        geoload_fs::create_parent_dirs(path).map_err(|source| {
            SqliteStoreError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let connections = (0..connections.get())
            .map(|_| SqliteConnection::open(path))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = connections.first() {
            first
                .lock()
                .execute_batch(SCHEMA)
                .map_err(|source| SqliteStoreError::CreateSchema {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        debug!("opened {} connections to {path}", connections.len());
        Ok(Self {
            path: path.to_path_buf(),
            connections,
        })
    }

    /// Database path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The open connections.
    pub fn connections(&self) -> &[SqliteConnection] {
        &self.connections
    }
}

/// One connection to a [`SqliteStore`].
///
/// The underlying `rusqlite` connection is not `Sync`, so calls through one
/// `SqliteConnection` are serialised; use several connections for
/// parallelism.
pub struct SqliteConnection {
    connection: Mutex<Connection>,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

fn server_error(err: impl fmt::Display) -> StoreError {
    StoreError::new(StoreError::SERVER, err.to_string())
}

// JSON path of a bin's value in the serialised record.
fn value_path(bin: &str) -> String {
    format!("$.\"{}\".value", bin.replace('"', "\\\""))
}

impl SqliteConnection {
    fn open(path: &Utf8Path) -> Result<Self, SqliteStoreError> {
        let open_error = |source| SqliteStoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let connection = Connection::open(path.as_std_path()).map_err(open_error)?;
        connection.busy_timeout(BUSY_TIMEOUT).map_err(open_error)?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(open_error)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    // A panic while holding the lock leaves SQLite itself consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records stored in `namespace`/`set`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the count query fails.
    pub fn record_count(&self, namespace: &str, set: &str) -> Result<u64, StoreError> {
        let count: i64 = self
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM records WHERE namespace = ?1 AND set_name = ?2",
                params![namespace, set],
                |row| row.get(0),
            )
            .map_err(server_error)?;
        u64::try_from(count).map_err(server_error)
    }
}

fn ensure_index(connection: &Connection, query: &Query) -> Result<(), StoreError> {
    let predicate = &query.predicate;
    let found: Option<String> = connection
        .query_row(
            "SELECT name FROM indexes
             WHERE namespace = ?1 AND set_name = ?2 AND bin = ?3 AND kind = ?4",
            params![
                query.namespace,
                query.set,
                predicate.bin(),
                predicate.index_kind().as_str()
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(server_error)?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::new(
            StoreError::INDEX_NOT_FOUND,
            format!(
                "no {} index on {}.{}.{}",
                predicate.index_kind().as_str(),
                query.namespace,
                query.set,
                predicate.bin()
            ),
        )),
    }
}

impl StoreConnection for SqliteConnection {
    fn put(&self, key: &RecordKey, record: &StoreRecord) -> Result<(), StoreError> {
        let bins = serde_json::to_string(record)
            .map_err(|err| StoreError::new(StoreError::PARAMETER, err.to_string()))?;
        self.lock()
            .prepare_cached(
                "INSERT OR REPLACE INTO records (namespace, set_name, user_key, bins)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .and_then(|mut statement| {
                statement.execute(params![key.namespace, key.set, key.user_key, bins])
            })
            .map(|_| ())
            .map_err(server_error)
    }

    fn query(
        &self,
        query: &Query,
        on_result: &mut dyn FnMut(Option<&StoreRecord>) -> bool,
    ) -> Result<(), StoreError> {
        let connection = self.lock();
        ensure_index(&connection, query)?;

        let path = value_path(query.predicate.bin());
        let (min, max) = match query.predicate {
            QueryPredicate::IntegerRange { min, max, .. } => (min, max),
            QueryPredicate::GeoWithin { .. } | QueryPredicate::GeoContains { .. } => {
                (i64::MIN, i64::MAX)
            }
        };
        let mut statement = connection
            .prepare_cached(
                "SELECT bins FROM records
                 WHERE namespace = ?1 AND set_name = ?2
                   AND json_extract(bins, ?3) IS NOT NULL
                   AND (json_type(bins, ?3) NOT IN ('integer', 'real')
                        OR json_extract(bins, ?3) BETWEEN ?4 AND ?5)
                 ORDER BY user_key",
            )
            .map_err(server_error)?;
        let mut rows = statement
            .query(params![query.namespace, query.set, path, min, max])
            .map_err(server_error)?;

        while let Some(row) = rows.next().map_err(server_error)? {
            let text: String = row.get(0).map_err(server_error)?;
            let record: StoreRecord = serde_json::from_str(&text).map_err(server_error)?;
            if !query.predicate.matches(&record) {
                continue;
            }
            if !on_result(Some(&query.project(&record))) {
                return Ok(());
            }
        }
        on_result(None);
        Ok(())
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        let connection = self.lock();
        let existing: Option<(String, String, String)> = connection
            .query_row(
                "SELECT set_name, bin, kind FROM indexes WHERE namespace = ?1 AND name = ?2",
                params![spec.namespace, spec.name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(server_error)?;
        match existing {
            Some((set, bin, kind))
                if set == spec.set && bin == spec.bin && kind == spec.kind.as_str() =>
            {
                Ok(())
            }
            Some(_) => Err(StoreError::new(
                StoreError::INDEX_FOUND,
                format!("index {} already exists with another definition", spec.name),
            )),
            None => {
                connection
                    .execute(
                        "INSERT INTO indexes (namespace, name, set_name, bin, kind)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![spec.namespace, spec.name, spec.set, spec.bin, spec.kind.as_str()],
                    )
                    .map_err(server_error)?;
                debug!("created index {} on {}.{}", spec.name, spec.set, spec.bin);
                Ok(())
            }
        }
    }
}
