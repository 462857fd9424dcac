//! Lazily buffered entity bodies.
//!
//! An [`EntityBody`] starts out *streaming*: it owns an [`EntityReader`] and
//! pulls chunks from it only when a read or seek needs more bytes than are
//! buffered. Every chunk pulled is announced on the [`Dispatcher`] as
//! [`Signal::RawData`]. Once the reader reports the end of the entity the body
//! announces [`Signal::EndData`] and becomes *materialized*: a plain
//! in-memory buffer with the same read/seek/tell/write surface. The
//! transition is one-way.
//!
//! Body operations called from inside a receiver of this body's own
//! notifications fail with [`HttpError::ReentrantDispatch`].

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use bytes::{Bytes, BytesMut};

use crate::http::dispatch::{self, Delivery, Dispatcher, SenderId, Signal};
use crate::http::entity::{Chunk, EntityReader, EntitySize, Source};
use crate::http::error::{HttpError, Result};

/// Shared handle to an entity body. Clones refer to the same body.
#[derive(Clone)]
pub struct EntityBody {
    inner: Arc<BodyInner>,
}

struct BodyInner {
    id: SenderId,
    dispatcher: Dispatcher,
    /// Thread currently running receivers for this body, if any.
    dispatching_on: Mutex<Option<ThreadId>>,
    started: AtomicBool,
    materialized: AtomicBool,
    state: tokio::sync::Mutex<BodyState>,
}

enum BodyState {
    Streaming(Streaming),
    Materialized(Materialized),
}

struct Streaming {
    reader: EntityReader,
    store: BytesMut,
    pos: usize,
}

#[derive(Default)]
struct Materialized {
    framing: Option<EntitySize>,
    data: BytesMut,
    pos: usize,
}

impl BodyState {
    fn buffered(&self) -> usize {
        match self {
            BodyState::Streaming(s) => s.store.len(),
            BodyState::Materialized(m) => m.data.len(),
        }
    }

    fn pos(&self) -> usize {
        match self {
            BodyState::Streaming(s) => s.pos,
            BodyState::Materialized(m) => m.pos,
        }
    }

    fn set_pos(&mut self, pos: usize) {
        match self {
            BodyState::Streaming(s) => s.pos = pos,
            BodyState::Materialized(m) => m.pos = pos,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            BodyState::Streaming(s) => &s.store,
            BodyState::Materialized(m) => &m.data,
        }
    }

    fn bytes_mut(&mut self) -> &mut BytesMut {
        match self {
            BodyState::Streaming(s) => &mut s.store,
            BodyState::Materialized(m) => &mut m.data,
        }
    }
}

/// Clears the dispatching marker even if a receiver panics.
struct DispatchGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl EntityBody {
    /// A body that will be decoded from `source` according to `size`,
    /// announcing progress on `dispatcher`.
    pub fn streaming(source: Source, size: EntitySize, dispatcher: Dispatcher) -> Self {
        let state = BodyState::Streaming(Streaming {
            reader: EntityReader::new(source, size),
            store: BytesMut::new(),
            pos: 0,
        });
        Self::with_state(state, dispatcher, false)
    }

    /// A body that is already fully in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let state = BodyState::Materialized(Materialized {
            framing: Some(EntitySize::Length(data.len() as u64)),
            data: BytesMut::from(&data[..]),
            pos: 0,
        });
        Self::with_state(state, Dispatcher::global(), true)
    }

    fn with_state(state: BodyState, dispatcher: Dispatcher, materialized: bool) -> Self {
        Self {
            inner: Arc::new(BodyInner {
                id: SenderId::next(),
                dispatcher,
                dispatching_on: Mutex::new(None),
                started: AtomicBool::new(false),
                materialized: AtomicBool::new(materialized),
                state: tokio::sync::Mutex::new(state),
            }),
        }
    }

    /// The identity this body uses as notification sender.
    pub fn sender_id(&self) -> SenderId {
        self.inner.id
    }

    /// The registry this body announces on.
    pub fn dispatcher(&self) -> Dispatcher {
        self.inner.dispatcher.clone()
    }

    /// True once any chunk has been pulled from the reader.
    pub fn buffering_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// True once the whole entity is in memory.
    pub fn is_materialized(&self) -> bool {
        self.inner.materialized.load(Ordering::Acquire)
    }

    /// The framing the body was (or is being) decoded with. `None` for
    /// bodies built in memory and then rewritten.
    pub async fn framing(&self) -> Option<EntitySize> {
        match &*self.inner.state.lock().await {
            BodyState::Streaming(s) => Some(s.reader.size()),
            BodyState::Materialized(m) => m.framing,
        }
    }

    /// Number of bytes currently held in memory.
    pub async fn buffered_len(&self) -> usize {
        self.inner.state.lock().await.buffered()
    }

    fn check_reentry(&self, op: &'static str) -> Result<()> {
        let dispatching = self
            .inner
            .dispatching_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *dispatching == Some(thread::current().id()) {
            return Err(HttpError::ReentrantDispatch(op));
        }
        Ok(())
    }

    fn dispatch(&self, signal: Signal, info: Bytes) -> Vec<Delivery> {
        *self
            .inner
            .dispatching_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
        let _guard = DispatchGuard(&self.inner.dispatching_on);
        self.inner.dispatcher.send(signal, self.inner.id, info)
    }

    /// Pulls exactly one chunk from the reader. Returns the terminal chunk if
    /// the body is (or just became) materialized.
    pub async fn buffer_chunk(&self) -> Result<Chunk> {
        self.check_reentry("buffer_chunk")?;
        let mut state = self.inner.state.lock().await;
        self.buffer_chunk_locked(&mut state).await
    }

    /// Buffers until the entity is complete.
    pub async fn buffer_all(&self) -> Result<()> {
        self.check_reentry("buffer_all")?;
        let mut state = self.inner.state.lock().await;
        self.buffer_to_locked(&mut state, usize::MAX).await
    }

    /// Buffers until at least `size` bytes are held or the entity is
    /// complete.
    pub async fn buffer_to(&self, size: usize) -> Result<()> {
        self.check_reentry("buffer_to")?;
        let mut state = self.inner.state.lock().await;
        self.buffer_to_locked(&mut state, size).await
    }

    /// Reads `n` bytes from the cursor, or everything that is left when `n`
    /// is `None`. Fewer bytes come back only at the end of the entity.
    pub async fn read(&self, n: Option<usize>) -> Result<Bytes> {
        self.check_reentry("read")?;
        let mut state = self.inner.state.lock().await;
        let pos = state.pos();
        let want = match n {
            Some(n) => pos.saturating_add(n),
            None => usize::MAX,
        };
        self.buffer_to_locked(&mut state, want).await?;

        let bytes = state.bytes();
        let start = pos.min(bytes.len());
        let end = want.min(bytes.len());
        let out = Bytes::copy_from_slice(&bytes[start..end]);
        state.set_pos(end.max(pos));
        Ok(out)
    }

    /// Moves the cursor. Seeking relative to the end buffers the whole
    /// entity; seeking past the buffered extent buffers just enough to cover
    /// the new position.
    pub async fn seek(&self, target: SeekFrom) -> Result<u64> {
        self.check_reentry("seek")?;
        let mut state = self.inner.state.lock().await;
        let new_pos = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => state.pos() as i128 + delta as i128,
            SeekFrom::End(delta) => {
                self.buffer_to_locked(&mut state, usize::MAX).await?;
                state.buffered() as i128 + delta as i128
            }
        };
        if new_pos < 0 {
            return Err(invalid_input("seek to a negative position"));
        }

        let new_pos = usize::try_from(new_pos).map_err(|_| invalid_input("seek position out of range"))?;
        if new_pos > state.buffered() {
            self.buffer_to_locked(&mut state, new_pos).await?;
        }
        state.set_pos(new_pos);
        Ok(new_pos as u64)
    }

    pub async fn tell(&self) -> Result<u64> {
        self.check_reentry("tell")?;
        Ok(self.inner.state.lock().await.pos() as u64)
    }

    /// Writes at the cursor, overwriting and then extending. The entity is
    /// fully buffered first; a cursor past its end is rejected.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.check_reentry("write")?;
        let mut state = self.inner.state.lock().await;
        self.buffer_to_locked(&mut state, usize::MAX).await?;

        let pos = state.pos();
        if pos > state.buffered() {
            return Err(invalid_input("write starts past the end of the entity"));
        }
        let end = pos
            .checked_add(data.len())
            .ok_or_else(|| invalid_input("write would end past the addressable range"))?;
        let store = state.bytes_mut();
        if store.len() < end {
            store.resize(end, 0);
        }
        store[pos..end].copy_from_slice(data);
        state.set_pos(end);
        Ok(data.len())
    }

    /// Buffers everything and returns the whole entity without moving the
    /// cursor.
    pub async fn contents(&self) -> Result<Bytes> {
        self.check_reentry("contents")?;
        let mut state = self.inner.state.lock().await;
        self.buffer_to_locked(&mut state, usize::MAX).await?;
        Ok(Bytes::copy_from_slice(state.bytes()))
    }

    /// Swaps in a reader with a different framing. Only possible while
    /// nothing has been buffered; returns whether the swap happened.
    pub async fn reframe(&self, size: EntitySize) -> Result<bool> {
        self.check_reentry("reframe")?;
        if self.buffering_started() {
            return Ok(false);
        }
        let mut state = self.inner.state.lock().await;
        if !matches!(&*state, BodyState::Streaming(_)) {
            return Ok(false);
        }

        let previous = std::mem::replace(&mut *state, BodyState::Materialized(Materialized::default()));
        if let BodyState::Streaming(streaming) = previous {
            *state = BodyState::Streaming(Streaming {
                reader: EntityReader::new(streaming.reader.into_source(), size),
                store: BytesMut::new(),
                pos: 0,
            });
        }
        tracing::trace!(sender = ?self.inner.id, ?size, "entity reader rebuilt");
        Ok(true)
    }

    async fn buffer_to_locked(&self, state: &mut BodyState, size: usize) -> Result<()> {
        while state.buffered() < size {
            let chunk = self.buffer_chunk_locked(state).await?;
            if chunk.is_terminal() {
                break;
            }
        }
        Ok(())
    }

    async fn buffer_chunk_locked(&self, state: &mut BodyState) -> Result<Chunk> {
        let BodyState::Streaming(streaming) = &mut *state else {
            return Ok(Chunk::default());
        };

        self.inner.started.store(true, Ordering::Release);
        let chunk = streaming.reader.read_chunk().await?;

        if chunk.is_terminal() {
            self.materialize(state);
            self.dispatch(Signal::EndData, Bytes::new());
            return Ok(chunk);
        }

        streaming.store.extend_from_slice(&chunk.data);
        let replies = self.dispatch(Signal::RawData, chunk.raw.clone());
        if dispatch::aborted(&replies) {
            return Err(HttpError::BufferingAbort {
                replies: replies.len(),
            });
        }
        Ok(chunk)
    }

    /// The one-way streaming → materialized transition.
    fn materialize(&self, state: &mut BodyState) {
        let previous = std::mem::replace(state, BodyState::Materialized(Materialized::default()));
        if let BodyState::Streaming(streaming) = previous {
            *state = BodyState::Materialized(Materialized {
                framing: Some(streaming.reader.size()),
                data: streaming.store,
                pos: streaming.pos,
            });
            self.inner.materialized.store(true, Ordering::Release);
            tracing::trace!(sender = ?self.inner.id, "entity fully buffered");
        }
    }
}

fn invalid_input(message: &'static str) -> HttpError {
    HttpError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}

impl std::fmt::Debug for EntityBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityBody")
            .field("sender", &self.inner.id)
            .field("started", &self.buffering_started())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}
