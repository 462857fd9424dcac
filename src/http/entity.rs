//! Entity-body framing.
//!
//! An [`EntityReader`] decodes an entity body out of a byte source one chunk
//! at a time. The framing is fixed when the reader is built from an
//! [`EntitySize`] and never changes afterwards.

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::http::error::{HttpError, Result};

/// Upper bound for a single read on fixed-length and until-close bodies.
pub const READ_SIZE: usize = 4096;

/// Any line-buffered byte source the engine can read entities from.
pub type Source = Box<dyn AsyncBufRead + Unpin + Send>;

/// How the size of an entity body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySize {
    /// Exactly this many bytes. `Length(0)` is the zero-length body.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Read until the peer closes the connection.
    UntilClose,
    /// `multipart/byteranges`; unsupported.
    MultipartByteranges,
}

/// One decoded piece of entity body, together with the bytes that carried
/// it on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub data: Bytes,
    pub raw: Bytes,
}

impl Chunk {
    /// The empty/empty pair signals the end of the entity.
    pub fn is_terminal(&self) -> bool {
        self.data.is_empty() && self.raw.is_empty()
    }

    fn same(bytes: Vec<u8>) -> Self {
        let bytes = Bytes::from(bytes);
        Self {
            data: bytes.clone(),
            raw: bytes,
        }
    }
}

#[derive(Debug)]
enum Framing {
    Fixed { total: u64, consumed: u64 },
    UntilClose,
    Chunked { finished: bool },
    Empty,
    Multipart,
}

pub struct EntityReader {
    source: Source,
    framing: Framing,
}

impl std::fmt::Debug for EntityReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityReader")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl EntityReader {
    pub fn new(source: Source, size: EntitySize) -> Self {
        let framing = match size {
            EntitySize::Length(0) => Framing::Empty,
            EntitySize::Length(total) => Framing::Fixed { total, consumed: 0 },
            EntitySize::Chunked => Framing::Chunked { finished: false },
            EntitySize::UntilClose => Framing::UntilClose,
            EntitySize::MultipartByteranges => Framing::Multipart,
        };
        Self { source, framing }
    }

    /// The framing this reader was built with.
    pub fn size(&self) -> EntitySize {
        match self.framing {
            Framing::Fixed { total, .. } => EntitySize::Length(total),
            Framing::UntilClose => EntitySize::UntilClose,
            Framing::Chunked { .. } => EntitySize::Chunked,
            Framing::Empty => EntitySize::Length(0),
            Framing::Multipart => EntitySize::MultipartByteranges,
        }
    }

    /// Gives the byte source back, e.g. to rebuild a reader with a different
    /// framing before anything was read.
    pub fn into_source(self) -> Source {
        self.source
    }

    /// Reads the next chunk. An empty/empty [`Chunk`] means the entity is
    /// complete.
    pub async fn read_chunk(&mut self) -> Result<Chunk> {
        match &mut self.framing {
            Framing::Empty => Ok(Chunk::default()),
            Framing::Multipart => Err(HttpError::NotImplemented("multipart/byteranges entity")),
            Framing::UntilClose => {
                let raw = read_some(&mut self.source, READ_SIZE).await?;
                Ok(Chunk::same(raw))
            }
            Framing::Fixed { total, consumed } => {
                let left = *total - *consumed;
                let want = left.min(READ_SIZE as u64) as usize;
                if want == 0 {
                    return Ok(Chunk::default());
                }

                let raw = read_some(&mut self.source, want).await?;
                if raw.is_empty() {
                    return Err(HttpError::entity_read(
                        format!(
                            "data stream ended at {} with {} bytes remaining",
                            consumed, left
                        ),
                        raw,
                    ));
                }
                *consumed += raw.len() as u64;
                Ok(Chunk::same(raw))
            }
            Framing::Chunked { finished } => {
                if *finished {
                    return Ok(Chunk::default());
                }
                let chunk = read_transfer_chunk(&mut self.source).await?;
                if chunk.data.is_empty() {
                    *finished = true;
                }
                Ok(chunk)
            }
        }
    }
}

/// Reads one `size CRLF data CRLF` unit of a chunked body.
async fn read_transfer_chunk(source: &mut Source) -> Result<Chunk> {
    let mut raw = read_line(source).await?;
    if raw.is_empty() {
        return Err(HttpError::entity_read("no data read during chunk size", raw));
    }

    let size_text = String::from_utf8_lossy(&raw)
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    let Ok(size) = usize::from_str_radix(&size_text, 16) else {
        let message = format!("invalid chunk size {:?}", size_text);
        return Err(HttpError::entity_read(message, raw));
    };

    let mut data = Vec::new();
    if size > 0 {
        data = read_up_to(source, size).await?;
        if data.is_empty() {
            return Err(HttpError::entity_read("no data read during chunk data", raw));
        }
        if data.len() != size {
            let message = format!("expected chunk of size {}, but size was {}", size, data.len());
            return Err(HttpError::entity_read(message, data));
        }
        raw.extend_from_slice(&data);
    }

    let separator = read_line(source).await?;
    if separator.is_empty() {
        return Err(HttpError::entity_read("no data read during chunk separator", raw));
    }
    if separator != b"\r\n" {
        let message = format!(
            "end separator wrong; expected CRLF, found {:?}",
            String::from_utf8_lossy(&separator)
        );
        raw.extend_from_slice(&separator);
        return Err(HttpError::entity_read(message, raw));
    }
    raw.extend_from_slice(&separator);

    Ok(Chunk {
        data: Bytes::from(data),
        raw: Bytes::from(raw),
    })
}

/// Reads one line including its terminating `\n`. Returns an empty vector at
/// end of stream.
pub async fn read_line<R>(source: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    source.read_until(b'\n', &mut line).await?;
    Ok(line)
}

/// Reads up to `count` bytes, stopping early only at end of stream.
pub async fn read_up_to<R>(source: &mut R, count: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(count.min(READ_SIZE));
    (&mut *source).take(count as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// A single read of at most `count` bytes; whatever the source has ready.
async fn read_some<R>(source: &mut R, count: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; count];
    let n = source.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}
