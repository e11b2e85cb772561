#![allow(unused_macros)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::{Arc, RwLock};

use diesel::connection::SimpleConnection;
use diesel::migration::MigrationSource;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::Sqlite;
use diesel::{ConnectionError, SqliteConnection};
use diesel_migrations::MigrationHarness;
use lazy_static::lazy_static;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::utils::{ensure_dir_exists, path_str};

#[derive(Debug)]
pub struct DBErrorInfo {
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl From<Box<dyn DatabaseErrorInformation + Send + Sync>> for DBErrorInfo {
    fn from(value: Box<dyn DatabaseErrorInformation + Send + Sync>) -> Self {
        Self {
            message: String::from(value.message()),
            details: value.details().map(String::from),
            hint: value.hint().map(String::from),
        }
    }
}

impl Display for DBErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(details) = self.details.as_ref() {
            write!(f, "\nDetails:\n{}", details)?;
        }
        if let Some(hint) = self.hint.as_ref() {
            write!(f, "\nHint:\n{}", hint)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection error: {0}")]
    ConnectionError(ConnectionError),
    #[error("requested database entry not found")]
    NotFound,
    #[error("invalid query")]
    InvalidQuery,
    #[error("database error {0:?}: {1}")]
    DatabaseError(DatabaseErrorKind, DBErrorInfo),
    #[error("{0}")]
    UniqueViolation(DBErrorInfo),
    #[error("{0}")]
    NonNullViolation(DBErrorInfo),
    #[error("failed to migrate database: {0}")]
    Migration(String),
    #[error("{0}")]
    IO(std::io::Error),
    #[error("generic database error: {0}")]
    Generic(String),
}

impl From<ConnectionError> for Error {
    fn from(value: ConnectionError) -> Self {
        Self::ConnectionError(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(value: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Migration(value.to_string())
    }
}

impl From<DieselError> for Error {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::InvalidCString(_) => Self::InvalidQuery,
            DieselError::NotFound => Self::NotFound,
            DieselError::QueryBuilderError(e) => Self::Generic(e.to_string()),
            DieselError::DeserializationError(e) => Self::Generic(e.to_string()),
            DieselError::SerializationError(e) => Self::Generic(e.to_string()),
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::NotNullViolation => Self::NonNullViolation(info.into()),
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.into()),
                _ => Self::DatabaseError(kind, info.into()),
            },
            DieselError::RollbackTransaction => {
                Self::Generic("unexpected transaction error".into())
            }
            DieselError::BrokenTransactionManager => Self::Generic(
                "transaction manager broken, likely due to a broken connection".into(),
            ),
            _ => Self::Generic(format!("unexpected error {:?}", value)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle to the single thread that owns the connection for one database file
#[derive(Clone)]
pub(super) struct DBThread(Arc<ThreadPool>);

impl DBThread {
    /// Open (or reuse) the database at `path`, creating its parent directory
    /// and running any pending migrations on first open
    pub(super) fn new_from_path(
        path: &Path,
        migrations: impl MigrationSource<Sqlite> + Send,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir_exists(parent)?;
            }
        }
        let url = format!("sqlite://{}", path_str(path));
        Self::new_from_url(&url, migrations)
    }

    pub(super) fn new_from_url(
        url: &String,
        migrations: impl MigrationSource<Sqlite> + Send,
    ) -> Result<Self> {
        Ok(Self(get_database_threadpool(url, migrations)?))
    }

    pub(super) fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send,
    {
        self.with_connection(|conn| conn.transaction(f))
    }

    pub(super) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send,
    {
        self.0.install(|| {
            CONNECTION.with(|c| {
                let mut borrowed = c.borrow_mut();
                match borrowed.as_mut() {
                    Some(conn) => f(conn),
                    None => Err(Error::Generic("database thread has no connection".into())),
                }
            })
        })
    }
}

// Every database URL maps to a single threaded pool whose thread holds the
// only connection. All operations on that database run on that thread.
lazy_static! {
    static ref DB_THREADS: RwLock<HashMap<String, Arc<ThreadPool>>> = RwLock::new(HashMap::new());
}

thread_local! {
    static CONNECTION: RefCell<Option<SqliteConnection>> = RefCell::new(None);
}

fn poisoned() -> Error {
    Error::Generic("database registry lock poisoned".into())
}

fn get_database_threadpool(
    url: &String,
    migrations: impl MigrationSource<Sqlite> + Send,
) -> Result<Arc<ThreadPool>> {
    if let Some(v) = DB_THREADS.read().map_err(|_| poisoned())?.get(url) {
        return Ok(Arc::clone(v));
    }

    let mut map = DB_THREADS.write().map_err(|_| poisoned())?;
    // Someone may have opened it between dropping the read lock and getting
    // the write lock
    if let Some(v) = map.get(url) {
        return Ok(Arc::clone(v));
    }
    new_database_threadpool(url, &mut map, migrations)
}

fn new_database_threadpool(
    url: &String,
    map: &mut HashMap<String, Arc<ThreadPool>>,
    migrations: impl MigrationSource<Sqlite> + Send,
) -> Result<Arc<ThreadPool>> {
    let tp = ThreadPoolBuilder::new()
        .num_threads(1)
        .thread_name(|_| String::from("surfprobe-db"))
        .build()
        .map_err(|e| Error::Generic(format!("failed to build sqlite thread: {}", e)))?;

    tp.install(|| {
        CONNECTION.with(|c| -> Result<()> {
            log::debug!("connecting to the database at {}", url);
            let mut conn = SqliteConnection::establish(url)?;
            conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            let applied = conn.run_pending_migrations(migrations)?;
            for m in applied {
                log::info!("applied database migration {}", m);
            }
            *c.borrow_mut() = Some(conn);
            Ok(())
        })
    })?;

    let arc = Arc::new(tp);
    map.insert(url.clone(), Arc::clone(&arc));
    Ok(arc)
}

#[cfg(feature = "trace_db")]
macro_rules! query {
    ($q:expr) => {{
        let __query = $q;
        ::log::trace!(
            "{}",
            diesel::debug_query::<::diesel::sqlite::Sqlite, _>(&__query)
        );

        __query
    }};
}

#[cfg(not(feature = "trace_db"))]
macro_rules! query {
    ($q:expr) => {
        $q
    };
}

macro_rules! impl_get_multi_by {
    ($vis:vis $name:ident, $sel:ty, $ret:ty, $table:ident, $($filter:tt)+) => {
        $vis fn $name(&self, sel: $sel) -> Result<Vec<$ret>> {
            self.with_connection(|conn| {
                Ok(query!(super::schema::$table::dsl::$table.filter(
                    super::schema::$table::dsl::$($filter)+(sel)
                ))
                .load(conn)?)
            })
        }
    };
}

macro_rules! impl_get_all {
    ($vis:vis $name:ident, $ret:ty, $table:ident, $order:ident) => {
        $vis fn $name(&self) -> Result<Vec<$ret>> {
            self.with_connection(|conn| {
                Ok(query!(super::schema::$table::dsl::$table
                    .order(super::schema::$table::dsl::$order.asc()))
                .load(conn)?)
            })
        }
    };
}
