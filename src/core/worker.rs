//! Purpose: Background thread that serializes and deserializes page maps for one cursor.
//! Exports: `PageMapWorker`, `WorkerState`.
//! Role: Optional helper started lazily by the cursor; all other work stays on the caller.
//! Invariants: Exactly one request is in flight (`&mut self` on every request).
//! Invariants: Failures travel back to the requesting thread; the cursor is never failed
//! asynchronously.

use crate::core::codec;
use crate::core::error::{Error, ErrorKind};
use crate::core::pagemap::PageMap;
use bytes::Bytes;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    Idle,
    SerializeRequested,
    SerializeDone,
    DeserializeRequested,
    DeserializeDone,
    Exit,
}

enum Request {
    Serialize(Arc<PageMap>),
    Deserialize { bytes: Bytes, row_count: u64 },
    Exit,
}

enum Response {
    Serialized(Vec<u8>),
    Deserialized(Result<PageMap, Error>),
}

fn set_state(state: &Mutex<WorkerState>, next: WorkerState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Decode a page map and check it describes exactly `row_count` rows.
pub(crate) fn decode_for_rows(bytes: &[u8], row_count: u64) -> Result<PageMap, Error> {
    codec::decode_page_map_for(bytes, row_count)
}

#[derive(Debug)]
pub struct PageMapWorker {
    requests: SyncSender<Request>,
    responses: Receiver<Response>,
    state: Arc<Mutex<WorkerState>>,
    handle: Option<JoinHandle<()>>,
}

impl PageMapWorker {
    pub fn spawn() -> Result<Self, Error> {
        let (request_tx, request_rx) = mpsc::sync_channel::<Request>(1);
        let (response_tx, response_rx) = mpsc::sync_channel::<Response>(1);
        let state = Arc::new(Mutex::new(WorkerState::Idle));
        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name("pagemap-worker".to_string())
            .spawn(move || run(request_rx, response_tx, thread_state))
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to spawn page map worker")
                    .with_source(err)
            })?;
        debug!("page map worker started");
        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            state,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn serialize(&mut self, map: Arc<PageMap>) -> Result<Vec<u8>, Error> {
        set_state(&self.state, WorkerState::SerializeRequested);
        match self.round_trip(Request::Serialize(map))? {
            Response::Serialized(bytes) => Ok(bytes),
            Response::Deserialized(_) => Err(out_of_step()),
        }
    }

    pub fn deserialize(&mut self, bytes: Bytes, row_count: u64) -> Result<PageMap, Error> {
        set_state(&self.state, WorkerState::DeserializeRequested);
        match self.round_trip(Request::Deserialize { bytes, row_count })? {
            Response::Deserialized(result) => result,
            Response::Serialized(_) => Err(out_of_step()),
        }
    }

    fn round_trip(&mut self, request: Request) -> Result<Response, Error> {
        self.requests.send(request).map_err(|_| gone())?;
        let response = self.responses.recv().map_err(|_| gone())?;
        set_state(&self.state, WorkerState::Idle);
        Ok(response)
    }

    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.requests.send(Request::Exit);
        if handle.join().is_err() {
            warn!("page map worker panicked");
        }
        set_state(&self.state, WorkerState::Exit);
        debug!("page map worker stopped");
    }
}

impl Drop for PageMapWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn gone() -> Error {
    Error::new(ErrorKind::Internal).with_message("page map worker is not running")
}

fn out_of_step() -> Error {
    Error::new(ErrorKind::Internal).with_message("page map worker answered a different request")
}

fn run(requests: Receiver<Request>, responses: SyncSender<Response>, state: Arc<Mutex<WorkerState>>) {
    while let Ok(request) = requests.recv() {
        let response = match request {
            Request::Serialize(map) => {
                let bytes = codec::encode_page_map(&map);
                set_state(&state, WorkerState::SerializeDone);
                Response::Serialized(bytes)
            }
            Request::Deserialize { bytes, row_count } => {
                let result = decode_for_rows(&bytes, row_count);
                set_state(&state, WorkerState::DeserializeDone);
                Response::Deserialized(result)
            }
            Request::Exit => break,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    set_state(&state, WorkerState::Exit);
}

/// Cursor-owned launcher: starts the worker after enough serialized reads.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    worker: Option<PageMapWorker>,
    countdown: u32,
    enabled: bool,
}

impl WorkerSlot {
    pub(crate) fn new(enabled: bool, launch_after: u32) -> Self {
        Self {
            worker: None,
            countdown: launch_after,
            enabled,
        }
    }

    pub(crate) fn state(&self) -> Option<WorkerState> {
        self.worker.as_ref().map(PageMapWorker::state)
    }

    pub(crate) fn note_materialization(&mut self) {
        if !self.enabled || self.worker.is_some() {
            return;
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return;
        }
        match PageMapWorker::spawn() {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => {
                warn!(error = %err, "page map worker unavailable, decoding inline");
                self.enabled = false;
            }
        }
    }

    /// Decode on the worker when it runs; a lost worker is retired and the map decoded inline.
    pub(crate) fn decode(&mut self, bytes: Bytes, row_count: u64) -> Result<PageMap, Error> {
        if let Some(worker) = self.worker.as_mut() {
            match worker.deserialize(bytes.clone(), row_count) {
                Err(err) if err.kind() == ErrorKind::Internal => self.retire(&err),
                result => return result,
            }
        }
        decode_for_rows(&bytes, row_count)
    }

    pub(crate) fn encode(&mut self, map: &Arc<PageMap>) -> Result<Vec<u8>, Error> {
        if let Some(worker) = self.worker.as_mut() {
            match worker.serialize(Arc::clone(map)) {
                Err(err) if err.kind() == ErrorKind::Internal => self.retire(&err),
                result => return result,
            }
        }
        Ok(codec::encode_page_map(map))
    }

    fn retire(&mut self, err: &Error) {
        warn!(error = %err, "page map worker lost, coding inline");
        self.shutdown();
        self.enabled = false;
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PageMapWorker, WorkerSlot, WorkerState};
    use crate::core::codec::encode_page_map;
    use crate::core::error::ErrorKind;
    use crate::core::pagemap::{PageMap, Run};
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn worker_round_trips_and_returns_to_idle() {
        let mut worker = PageMapWorker::spawn().expect("spawn");
        let map = Arc::new(
            PageMap::from_runs(vec![Run::new(4, 2), Run::new(1, 3)]).expect("runs"),
        );
        let bytes = worker.serialize(Arc::clone(&map)).expect("serialize");
        assert_eq!(worker.state(), WorkerState::Idle);
        let decoded = worker.deserialize(Bytes::from(bytes), 5).expect("deserialize");
        assert_eq!(decoded, *map);
        assert_eq!(worker.state(), WorkerState::Idle);
        worker.shutdown();
        assert_eq!(worker.state(), WorkerState::Exit);
    }

    #[test]
    fn worker_errors_reach_the_requester() {
        let mut worker = PageMapWorker::spawn().expect("spawn");
        let bytes = Bytes::from(encode_page_map(&PageMap::new_fixed(3, 1)));
        let err = worker.deserialize(bytes, 4).expect_err("row mismatch");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        let err = worker
            .deserialize(Bytes::from_static(b"junk"), 1)
            .expect_err("junk");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[test]
    fn slot_launches_after_countdown() {
        let mut slot = WorkerSlot::new(true, 3);
        slot.note_materialization();
        slot.note_materialization();
        assert_eq!(slot.state(), None);
        slot.note_materialization();
        assert_eq!(slot.state(), Some(WorkerState::Idle));
        slot.shutdown();
        assert_eq!(slot.state(), None);

        let mut disabled = WorkerSlot::new(false, 1);
        disabled.note_materialization();
        assert_eq!(disabled.state(), None);
    }

    #[test]
    fn stopped_worker_falls_back_to_inline_coding() {
        let mut slot = WorkerSlot::new(true, 1);
        slot.note_materialization();
        slot.worker.as_mut().expect("launched").shutdown();
        let map = PageMap::new_fixed(3, 2);
        let bytes = Bytes::from(encode_page_map(&map));
        assert_eq!(slot.decode(bytes, 3).expect("inline decode"), map);
        assert_eq!(slot.state(), None);
        slot.note_materialization();
        assert_eq!(slot.state(), None);
        let encoded = slot.encode(&Arc::new(map)).expect("inline encode");
        assert_eq!(encoded, encode_page_map(&PageMap::new_fixed(3, 2)));
    }
}
