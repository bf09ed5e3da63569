use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::{Entry, VacantEntry};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::error::TrackError;
use crate::frame::Frame;
use crate::model::ModelFactory;
use crate::session::TrackingSession;

pub type SessionId = String;
pub type SharedSession = Arc<Mutex<TrackingSession>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session limit of {0} reached")]
    Full(usize),
    #[error(transparent)]
    Session(#[from] TrackError),
}

/// Independent tracking sessions keyed by caller identity.
///
/// Every session owns its own model and sits behind its own lock, so calls
/// on one session are serialized while different sessions run in parallel.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SharedSession>,
    // Slots taken by live sessions and by ones being created
    reserved: AtomicUsize,
    factory: ModelFactory,
    window_size: Option<usize>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(factory: ModelFactory, window_size: Option<usize>, max_sessions: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            factory,
            window_size,
            max_sessions,
        }
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn get_or_create(&self, id: &str) -> Result<SharedSession, RegistryError> {
        if let Some(session) = self.get(id) {
            return Ok(session);
        }
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => self.insert_new(id, entry, |_| Ok(())),
        }
    }

    /// Reset the session `id` with `frame` and `points`. A session that does
    /// not exist yet is only added once the reset succeeded.
    pub fn register(
        &self,
        id: &str,
        frame: Frame,
        points: &[[f64; 2]],
    ) -> Result<SharedSession, RegistryError> {
        if let Some(session) = self.get(id) {
            session.lock().reset(frame, points)?;
            return Ok(session);
        }
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                let session = entry.get().clone();
                // release the shard before waiting on the session
                drop(entry);
                session.lock().reset(frame, points)?;
                Ok(session)
            }
            Entry::Vacant(entry) => {
                self.insert_new(id, entry, |session| session.reset(frame, points))
            }
        }
    }

    fn insert_new(
        &self,
        id: &str,
        entry: VacantEntry<'_, SessionId, SharedSession>,
        init: impl FnOnce(&mut TrackingSession) -> Result<(), TrackError>,
    ) -> Result<SharedSession, RegistryError> {
        self.reserve_slot()?;
        let session = TrackingSession::new((self.factory)(), self.window_size).and_then(|mut session| {
            init(&mut session)?;
            Ok(session)
        });
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                return Err(e.into());
            }
        };
        info!(session = id, capacity = session.capacity(), "created tracking session");
        Ok(entry.insert(Arc::new(Mutex::new(session))).value().clone())
    }

    fn reserve_slot(&self) -> Result<(), RegistryError> {
        let Some(max) = self.max_sessions else {
            self.reserved.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| RegistryError::Full(max))
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            info!(session = id, "dropped tracking session");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
