use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use crates::domain::value_objects::{
    enums::stream_statuses::StreamStatus, owner::OwnerIdentity,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Stop signal and join handle of a stream's upload loop.
pub struct UploadHandle {
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

pub struct StreamState {
    pub stream_id: String,
    pub port: u16,
    pub listen_address: String,
    pub segment_dir: PathBuf,
    pub status: StreamStatus,
    /// `None` for streams adopted by recovery.
    pub started_at: Option<DateTime<Utc>>,
    pub owner: OwnerIdentity,
    pub task_id: Option<i64>,
    pub upload: Option<UploadHandle>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamSnapshot {
    pub stream_id: String,
    pub port: u16,
    pub listen_address: String,
    pub segment_dir: String,
    pub status: StreamStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub user_id: i32,
    pub username: String,
    pub title: String,
    pub task_id: Option<i64>,
}

impl StreamState {
    fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            stream_id: self.stream_id.clone(),
            port: self.port,
            listen_address: self.listen_address.clone(),
            segment_dir: self.segment_dir.to_string_lossy().into_owned(),
            status: self.status,
            started_at: self.started_at,
            user_id: self.owner.user_id,
            username: self.owner.username.clone(),
            title: self.owner.title.clone(),
            task_id: self.task_id,
        }
    }
}

/// Which streams are active. The map lock is only held for map operations.
///
/// A stopped stream whose final upload is still running stays "flushing"
/// until its [`FlushGuard`] is dropped. Lock order is streams, then flushing.
#[derive(Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, StreamState>>,
    flushing: Mutex<HashSet<String>>,
}

/// Marks a stream as flushing until dropped.
pub struct FlushGuard {
    registry: Arc<StreamRegistry>,
    stream_id: String,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.registry.lock_flushing().remove(&self.stream_id);
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands the state back when the stream is already registered.
    pub fn insert_if_absent(&self, state: StreamState) -> Result<(), StreamState> {
        let mut streams = self.lock();
        if streams.contains_key(&state.stream_id) {
            return Err(state);
        }
        streams.insert(state.stream_id.clone(), state);
        Ok(())
    }

    /// Hands the handle back when the stream is gone, so the caller can cancel it.
    pub fn attach_upload(&self, stream_id: &str, handle: UploadHandle) -> Result<(), UploadHandle> {
        match self.lock().get_mut(stream_id) {
            Some(state) => {
                state.upload = Some(handle);
                Ok(())
            }
            None => Err(handle),
        }
    }

    pub fn remove(&self, stream_id: &str) -> Option<StreamState> {
        self.lock().remove(stream_id)
    }

    /// Removes the stream and marks it flushing in one step, so it never
    /// looks idle between the two.
    pub fn remove_for_flush(self: &Arc<Self>, stream_id: &str) -> Option<(StreamState, FlushGuard)> {
        let mut streams = self.lock();
        let state = streams.remove(stream_id)?;
        self.lock_flushing().insert(stream_id.to_string());
        drop(streams);
        Some((
            state,
            FlushGuard {
                registry: Arc::clone(self),
                stream_id: stream_id.to_string(),
            },
        ))
    }

    /// Active, or stopped with its final upload still running.
    pub fn is_busy(&self, stream_id: &str) -> bool {
        let streams = self.lock();
        streams.contains_key(stream_id) || self.lock_flushing().contains(stream_id)
    }


    pub fn set_status(&self, stream_id: &str, status: StreamStatus) -> bool {
        match self.lock().get_mut(stream_id) {
            Some(state) => {
                state.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, stream_id: &str) -> Option<StreamSnapshot> {
        self.lock().get(stream_id).map(StreamState::snapshot)
    }

    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        let mut snapshots: Vec<StreamSnapshot> =
            self.lock().values().map(StreamState::snapshot).collect();
        snapshots.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        snapshots
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamState>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_flushing(&self) -> MutexGuard<'_, HashSet<String>> {
        self.flushing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream ids name local directories and object prefixes.
pub fn validate_stream_id(stream_id: &str) -> Result<()> {
    let trimmed = stream_id.trim();
    if trimmed.is_empty() {
        bail!("stream_id cannot be empty");
    }
    if trimmed != stream_id {
        bail!("stream_id cannot have surrounding whitespace");
    }
    if stream_id.contains(['/', '\\']) || stream_id.contains("..") {
        bail!("stream_id contains path characters: {stream_id}");
    }
    Ok(())
}
