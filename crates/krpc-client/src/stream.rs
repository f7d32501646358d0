//! Stream multiplexer.
//!
//! The server pushes `StreamUpdate` batches on the stream connection. One
//! background task reads them and publishes each result into the `watch`
//! channel of its stream id. Every [`StreamHandle`] is a receiver on that
//! channel, so each handle holds at most one pending update and a slow
//! handle only ever misses intermediate values; the reader never waits on a
//! consumer.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use krpc_codec::schema::{ProcedureResult, StreamUpdate};
use krpc_codec::{Shape, Unmarshal, Value};
use krpc_frame::FrameError;
use prost::Message;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::error::{ClientError, RemoteError, Result};

#[derive(Debug, Clone)]
enum Update {
    Value(Bytes),
    Error(RemoteError),
}

type Slot = Option<Update>;

/// How many removed ids are remembered. Late updates only trail a removal
/// by a few batches, so the oldest tombstones can be forgotten.
const TOMBSTONE_CAPACITY: usize = 1024;

/// Ids removed by the client, oldest first. Late updates for them are
/// dropped.
#[derive(Default)]
struct Tombstones {
    ids: HashSet<u64>,
    order: VecDeque<u64>,
}

impl Tombstones {
    fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    fn insert(&mut self, id: u64) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > TOMBSTONE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn lift(&mut self, id: u64) {
        if self.ids.remove(&id) {
            self.order.retain(|removed| *removed != id);
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Default)]
struct Streams {
    senders: HashMap<u64, watch::Sender<Slot>>,
    removed: Tombstones,
    closed: bool,
}

#[derive(Default)]
struct Registry {
    streams: RwLock<Streams>,
}

impl Registry {
    fn read(&self) -> RwLockReadGuard<'_, Streams> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Streams> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, update: StreamUpdate) {
        for result in update.results {
            let id = result.id;
            let update = match result.result {
                Some(ProcedureResult {
                    error: Some(err), ..
                }) => Update::Error(err.into()),
                Some(ProcedureResult { value, .. }) => Update::Value(value),
                None => {
                    warn!(id, "stream result carries no value; dropping");
                    continue;
                }
            };
            self.deliver(id, update);
        }
    }

    fn deliver(&self, id: u64, update: Update) {
        {
            let streams = self.read();
            if let Some(sender) = streams.senders.get(&id) {
                sender.send_replace(Some(update));
                return;
            }
            if streams.removed.contains(id) || streams.closed {
                debug!(id, "dropping update for removed stream");
                return;
            }
        }

        let mut streams = self.write();
        if streams.removed.contains(id) || streams.closed {
            debug!(id, "dropping update for removed stream");
            return;
        }
        match streams.senders.entry(id) {
            Entry::Occupied(entry) => {
                entry.get().send_replace(Some(update));
            }
            Entry::Vacant(entry) => {
                // The update beat the registration; keep it for the first handle.
                debug!(id, "update for unknown stream; holding latest value");
                entry.insert(watch::channel(Some(update)).0);
            }
        }
    }

    fn register(&self, id: u64) {
        let mut streams = self.write();
        if streams.closed {
            return;
        }
        streams.removed.lift(id);
        streams
            .senders
            .entry(id)
            .or_insert_with(|| watch::channel(None).0);
    }

    fn open(&self, id: u64) -> watch::Receiver<Slot> {
        let mut streams = self.write();
        if streams.closed {
            let (sender, receiver) = watch::channel(None);
            drop(sender);
            return receiver;
        }
        streams.removed.lift(id);
        let sender = streams
            .senders
            .entry(id)
            .or_insert_with(|| watch::channel(None).0);

        let mut receiver = sender.subscribe();
        let pending = sender.borrow().is_some();
        if pending {
            receiver.mark_changed();
        }
        receiver
    }

    fn remove(&self, id: u64) -> bool {
        let mut streams = self.write();
        streams.removed.insert(id);
        streams.senders.remove(&id).is_some()
    }

    fn handle_count(&self, id: u64) -> usize {
        self.read()
            .senders
            .get(&id)
            .map_or(0, watch::Sender::receiver_count)
    }

    fn close_all(&self) {
        let mut streams = self.write();
        streams.closed = true;
        streams.senders.clear();
    }
}

/// Owns the stream connection's reader task and the id-to-handles registry.
pub struct StreamMux {
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamMux {
    /// Start reading updates from a connection that has completed its
    /// STREAM handshake.
    pub fn spawn(conn: Connection) -> Self {
        let registry = Arc::new(Registry::default());
        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(read_updates(conn, registry.clone(), shutdown.clone()));
        Self {
            registry,
            shutdown,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Record that the server now streams `id`, lifting any earlier removal.
    pub fn register(&self, id: u64) {
        self.registry.register(id);
    }

    /// A new handle on `id`. If an update has already arrived it is pending
    /// on the new handle.
    pub fn open(&self, id: u64) -> StreamHandle {
        StreamHandle {
            id,
            receiver: Some(self.registry.open(id)),
        }
    }

    /// Stop delivering `id`. Its handles observe [`ClientError::Closed`] and
    /// later updates for it are dropped. Returns whether `id` was known.
    pub fn remove(&self, id: u64) -> bool {
        self.registry.remove(id)
    }

    /// Number of live handles on `id`.
    pub fn handle_count(&self, id: u64) -> usize {
        self.registry.handle_count(id)
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the reader has stopped, for whatever reason.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Stop the reader and close the connection. Every handle resolves to
    /// [`ClientError::Closed`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            if let Err(err) = reader.await {
                warn!(%err, "stream reader task failed");
            }
        }
    }
}

impl Drop for StreamMux {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for StreamMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMux")
            .field("streams", &self.registry.read().senders.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_updates(conn: Connection, registry: Arc<Registry>, shutdown: CancellationToken) {
    // The write half is unused after the handshake but keeps the socket open.
    let (mut reader, _writer) = conn.into_parts();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("stream reader cancelled");
                break;
            }
            frame = reader.read_frame() => frame,
        };

        match frame {
            Ok(frame) => match StreamUpdate::decode(frame) {
                Ok(update) => registry.dispatch(update),
                Err(err) => warn!(%err, "dropping undecodable stream update"),
            },
            Err(FrameError::ConnectionClosed) => {
                info!("stream connection closed by server");
                break;
            }
            Err(err) => {
                error!(%err, "stream reader stopped");
                break;
            }
        }
    }

    registry.close_all();
    shutdown.cancel();
}

/// One consumer of a stream's updates.
///
/// Holds at most one pending update; a newer update replaces an unread
/// one. Dropping or closing the handle deregisters only this handle.
pub struct StreamHandle {
    id: u64,
    receiver: Option<watch::Receiver<Slot>>,
}

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next update.
    ///
    /// Fails with [`ClientError::Closed`] once the handle is closed, the
    /// stream removed or the connection gone, and with
    /// [`ClientError::Remote`] when the server reported an error for this
    /// update.
    pub async fn recv(&mut self) -> Result<Bytes> {
        let receiver = self.receiver.as_mut().ok_or(ClientError::Closed)?;
        loop {
            receiver.changed().await.map_err(|_| ClientError::Closed)?;
            let update = receiver.borrow_and_update().clone();
            match update {
                Some(Update::Value(value)) => return Ok(value),
                Some(Update::Error(err)) => return Err(ClientError::Remote(err)),
                None => continue,
            }
        }
    }

    /// Deregister this handle. Idempotent.
    pub fn close(&mut self) {
        self.receiver = None;
    }

    pub fn is_closed(&self) -> bool {
        self.receiver
            .as_ref()
            .map_or(true, |receiver| receiver.has_changed().is_err())
    }

    /// Apply `convert` to every update as it is received.
    pub fn map<T, F>(self, convert: F) -> MappedStream<T>
    where
        F: Fn(Bytes) -> Result<T> + Send + Sync + 'static,
    {
        MappedStream {
            source: self,
            convert: Arc::new(convert),
        }
    }

    /// Decode every update as `T`.
    pub fn decoded<T: Unmarshal + 'static>(self) -> MappedStream<T> {
        self.map(|bytes| Ok(T::unmarshal(&bytes)?))
    }

    /// Decode every update with the dynamic codec.
    pub fn decode_with(self, shape: Shape) -> MappedStream<Value> {
        self.map(move |bytes| Ok(krpc_codec::decode(&bytes, &shape)?))
    }
}

/// The clone is a separate handle that starts with the latest update
/// pending. No network traffic is involved.
impl Clone for StreamHandle {
    fn clone(&self) -> Self {
        let receiver = self.receiver.as_ref().map(|receiver| {
            let mut receiver = receiver.clone();
            let pending = receiver.borrow().is_some();
            if pending {
                receiver.mark_changed();
            }
            receiver
        });
        Self {
            id: self.id,
            receiver,
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Convert<T> = Arc<dyn Fn(Bytes) -> Result<T> + Send + Sync>;

/// A stream handle whose updates pass through a conversion.
///
/// Cloning clones the source handle; closing closes it.
pub struct MappedStream<T> {
    source: StreamHandle,
    convert: Convert<T>,
}

impl<T> MappedStream<T> {
    pub fn id(&self) -> u64 {
        self.source.id
    }

    /// Wait for the next update and convert it. A conversion failure is
    /// returned for that update only; the stream stays open.
    pub async fn recv(&mut self) -> Result<T> {
        let bytes = self.source.recv().await?;
        (self.convert)(bytes)
    }

    pub fn close(&mut self) {
        self.source.close();
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    pub fn into_source(self) -> StreamHandle {
        self.source
    }
}

impl<T: 'static> MappedStream<T> {
    pub fn map<U: 'static, F>(self, convert: F) -> MappedStream<U>
    where
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let inner = self.convert;
        self.source.map(move |bytes| convert(inner(bytes)?))
    }
}

impl<T> Clone for MappedStream<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            convert: self.convert.clone(),
        }
    }
}

impl<T> fmt::Debug for MappedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedStream")
            .field("source", &self.source)
            .finish()
    }
}
