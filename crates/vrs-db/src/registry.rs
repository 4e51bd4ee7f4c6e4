//! Reference-counted registry of open store connections.
//!
//! Every store path has at most one live [`Connection`]. Parameters that
//! target the same file share it through the registry, and the connection is
//! committed on every disconnect and closed when the last user leaves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use rusqlite::Connection;
use tracing::{debug, warn};
use vrs_core::{ErrorInfo, VrsError};

use crate::sql::{path_error, storage_error};

/// Connection handle shared by every user of one store path.
///
/// The lock is reentrant: a thread already holding the connection (for
/// example while streaming rows) can lock it again to write.
pub type SharedConnection = Arc<ReentrantMutex<Connection>>;

/// Outcome of dropping one reference to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other users still hold the connection.
    Shared { remaining: usize },
    /// The last reference was dropped and the connection closed.
    Closed,
}

/// Lifetime counters for the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connections opened since the registry was created.
    pub opened: u64,
    /// Connections closed since the registry was created.
    pub closed: u64,
    /// Store paths currently open.
    pub live: usize,
}

#[derive(Debug)]
struct Entry {
    connection: SharedConnection,
    refcount: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<PathBuf, Entry>,
    opened: u64,
    closed: u64,
}

/// Mapping from store path to its shared connection and reference count.
///
/// Cloning the registry yields another handle to the same mapping. All
/// mutations are serialized behind one mutex, so a disconnect that closes a
/// store completes before any later connect can reopen it.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

/// Normalizes a store path so that different spellings share one entry.
fn registry_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            parent
                .canonicalize()
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

fn flush(connection: &Connection) -> Result<(), VrsError> {
    if !connection.is_autocommit() {
        connection
            .execute_batch("COMMIT")
            .map_err(|err| storage_error("vrs_db.registry_commit", err))?;
    }
    Ok(())
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared connection for `path`, opening it on first use.
    ///
    /// Writes on a registry connection are batched in a transaction that is
    /// committed by [`ConnectionRegistry::disconnect`].
    pub fn connect(&self, path: &Path) -> Result<SharedConnection, VrsError> {
        self.connect_key(registry_key(path))
    }

    fn connect_key(&self, key: PathBuf) -> Result<SharedConnection, VrsError> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.refcount += 1;
            debug!("sqlite: reuse {} (refcount {})", key.display(), entry.refcount);
            return Ok(Arc::clone(&entry.connection));
        }
        let connection =
            Connection::open(&key).map_err(|err| path_error("vrs_db.open", &key, err))?;
        connection
            .execute_batch("BEGIN")
            .map_err(|err| path_error("vrs_db.begin", &key, err))?;
        let shared = Arc::new(ReentrantMutex::new(connection));
        state.entries.insert(
            key.clone(),
            Entry {
                connection: Arc::clone(&shared),
                refcount: 1,
            },
        );
        state.opened += 1;
        debug!("sqlite: opened {}", key.display());
        Ok(shared)
    }

    /// Drops one reference to `path`, committing pending writes.
    ///
    /// Disconnecting a path that holds no reference is an integrity error.
    pub fn disconnect(&self, path: &Path) -> Result<Release, VrsError> {
        self.disconnect_key(&registry_key(path))
    }

    fn disconnect_key(&self, key: &Path) -> Result<Release, VrsError> {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return Err(VrsError::Integrity(
                ErrorInfo::new(
                    "vrs_db.registry_unbalanced",
                    "disconnect without a matching connect",
                )
                .with_context("path", key.display().to_string()),
            ));
        };
        let flushed = {
            let connection = entry.connection.lock();
            let flushed = flush(&connection);
            if entry.refcount > 1 && flushed.is_ok() {
                connection
                    .execute_batch("BEGIN")
                    .map_err(|err| path_error("vrs_db.begin", key, err))?;
            }
            flushed
        };
        if entry.refcount > 1 {
            entry.refcount -= 1;
            let remaining = entry.refcount;
            debug!("sqlite: released {} (refcount {remaining})", key.display());
            flushed?;
            return Ok(Release::Shared { remaining });
        }
        let Some(entry) = state.entries.remove(key) else {
            return Err(storage_error("vrs_db.registry_state", "registry entry vanished"));
        };
        state.closed += 1;
        drop(state);
        let closed = match Arc::try_unwrap(entry.connection) {
            Ok(mutex) => mutex
                .into_inner()
                .close()
                .map_err(|(_, err)| path_error("vrs_db.close", key, err)),
            Err(_) => {
                warn!(
                    "sqlite: {} still referenced outside the registry; closing on last drop",
                    key.display()
                );
                Ok(())
            }
        };
        debug!("sqlite: closed {}", key.display());
        flushed?;
        closed?;
        Ok(Release::Closed)
    }

    /// Acquires a scoped reference that is released when dropped.
    pub fn lease(&self, path: &Path) -> Result<ConnectionLease, VrsError> {
        let key = registry_key(path);
        let connection = self.connect_key(key.clone())?;
        Ok(ConnectionLease {
            registry: self.clone(),
            key,
            connection: Some(connection),
        })
    }

    /// Current reference count for `path`, if it is open.
    pub fn refcount(&self, path: &Path) -> Option<usize> {
        let key = registry_key(path);
        self.state.lock().entries.get(&key).map(|entry| entry.refcount)
    }

    /// Whether `path` currently has a live connection.
    pub fn is_open(&self, path: &Path) -> bool {
        self.refcount(path).is_some()
    }

    /// Snapshot of the lifetime counters.
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            opened: state.opened,
            closed: state.closed,
            live: state.entries.len(),
        }
    }
}

/// Scoped reference to a registry connection.
///
/// Dropping a lease that was not explicitly released still commits and
/// decrements the reference count, so a failing run never leaks a store.
#[derive(Debug)]
pub struct ConnectionLease {
    registry: ConnectionRegistry,
    key: PathBuf,
    connection: Option<SharedConnection>,
}

impl ConnectionLease {
    /// Normalized path of the leased store.
    pub fn path(&self) -> &Path {
        &self.key
    }

    /// Locks the shared connection for the duration of the guard.
    ///
    /// Locking again on the same thread while a guard is alive succeeds.
    pub fn lock(&self) -> Result<ReentrantMutexGuard<'_, Connection>, VrsError> {
        let Some(connection) = self.connection.as_ref() else {
            return Err(VrsError::Integrity(ErrorInfo::new(
                "vrs_db.lease_released",
                "connection lease already released",
            )));
        };
        Ok(connection.lock())
    }

    /// Commits and drops this reference.
    pub fn release(mut self) -> Result<Release, VrsError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<Release, VrsError> {
        match self.connection.take() {
            Some(connection) => {
                drop(connection);
                self.registry.disconnect_key(&self.key)
            }
            None => Err(VrsError::Integrity(ErrorInfo::new(
                "vrs_db.lease_released",
                "connection lease already released",
            ))),
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if self.connection.is_some() {
            if let Err(err) = self.release_inner() {
                warn!("sqlite: releasing {} failed: {err}", self.key.display());
            }
        }
    }
}
