//! Request bodies that can be replayed across attempts.
//!
//! A [`Body`] is whatever the caller hands over; [`BodySupplier`] is what the
//! request keeps. The supplier produces a fresh [`BodyStream`] positioned at
//! the start of the same content every time it is called.

use std::any::{self, Any};
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Serialize;

use crate::{NetterError, Result};

/// Caller-supplied producer of body streams, invoked once per attempt.
pub type BodyFactory = Arc<dyn Fn() -> io::Result<BodyStream> + Send + Sync>;

/// A readable body for one attempt, with its length when known.
pub struct BodyStream {
    reader: Box<dyn Read + Send>,
    len: Option<u64>,
}

impl BodyStream {
    /// Wraps a reader whose length is unknown.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            len: None,
        }
    }

    /// Wraps a reader that yields exactly `len` bytes.
    pub fn sized(reader: impl Read + Send + 'static, len: u64) -> Self {
        Self {
            reader: Box::new(reader),
            len: Some(len),
        }
    }

    /// Wraps an in-memory buffer.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        Self::sized(Cursor::new(bytes), len)
    }

    /// Length of the content, if the producer declared it.
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    /// Returns true when the declared length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    /// Reads the whole stream into memory.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len.unwrap_or(0) as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// A readable source that can be rewound.
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

/// Body input accepted when building a request.
pub enum Body {
    /// Raw bytes or a byte buffer.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// A seekable reader; every attempt rewinds to the position it had when
    /// the request was built.
    Seekable(Box<dyn SeekRead>),
    /// A one-shot reader, buffered in memory when the request is built.
    Reader(Box<dyn Read + Send>),
    /// A producer called for every attempt.
    Factory(BodyFactory),
    /// A value of a type this crate cannot send. Building a request with it
    /// fails with [`NetterError::InvalidBodyType`].
    Unsupported(String),
}

impl Body {
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn seekable(source: impl Read + Seek + Send + 'static) -> Self {
        Self::Seekable(Box::new(source))
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    /// Builds a body from a producer that returns a fresh stream per call.
    ///
    /// The producer is called once while the request is built to learn the
    /// content length, then once per attempt.
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> io::Result<BodyStream> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }

    /// Serializes `value` as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_vec(value)
            .map(|buf| Self::Bytes(buf.into()))
            .map_err(|err| NetterError::Body(io::Error::new(io::ErrorKind::InvalidInput, err)))
    }

    /// Maps an arbitrary value onto a supported body kind.
    ///
    /// Byte vectors, byte slices, strings and [`Bytes`] are accepted. Any other
    /// type becomes [`Body::Unsupported`].
    pub fn from_any<T: Any>(value: T) -> Self {
        let value: Box<dyn Any> = Box::new(value);
        let value = match value.downcast::<Body>() {
            Ok(body) => return *body,
            Err(value) => value,
        };
        let value = match value.downcast::<Vec<u8>>() {
            Ok(buf) => return Self::Bytes((*buf).into()),
            Err(value) => value,
        };
        let value = match value.downcast::<Bytes>() {
            Ok(buf) => return Self::Bytes(*buf),
            Err(value) => value,
        };
        let value = match value.downcast::<&'static [u8]>() {
            Ok(buf) => return Self::Bytes(Bytes::from_static(*buf)),
            Err(value) => value,
        };
        let value = match value.downcast::<String>() {
            Ok(text) => return Self::Text(*text),
            Err(value) => value,
        };
        match value.downcast::<&'static str>() {
            Ok(text) => Self::Text((*text).to_owned()),
            Err(_) => Self::Unsupported(any::type_name::<T>().to_owned()),
        }
    }

    /// Captures the body for replay and measures its length.
    ///
    /// One-shot readers are drained here; factories are probed once.
    pub(crate) fn into_supplier(self) -> Result<(BodySupplier, u64)> {
        match self {
            Self::Bytes(bytes) => Ok(BodySupplier::buffered(bytes)),
            Self::Text(text) => Ok(BodySupplier::buffered(Bytes::from(text))),
            Self::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map_err(NetterError::Body)?;
                Ok(BodySupplier::buffered(buf.into()))
            }
            Self::Seekable(mut source) => {
                let start = source.stream_position().map_err(NetterError::Body)?;
                let end = source.seek(SeekFrom::End(0)).map_err(NetterError::Body)?;
                source
                    .seek(SeekFrom::Start(start))
                    .map_err(NetterError::Body)?;
                let supplier = BodySupplier {
                    source: Source::Seekable {
                        source: Arc::new(Mutex::new(source)),
                        start,
                        end,
                    },
                };
                Ok((supplier, end.saturating_sub(start)))
            }
            Self::Factory(factory) => {
                let probe = factory().map_err(NetterError::Body)?;
                let len = probe.len().unwrap_or(0);
                drop(probe);
                Ok((
                    BodySupplier {
                        source: Source::Factory(factory),
                    },
                    len,
                ))
            }
            Self::Unsupported(type_name) => Err(NetterError::InvalidBodyType { type_name }),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Seekable(_) => f.write_str("Seekable(..)"),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Unsupported(type_name) => f.debug_tuple("Unsupported").field(type_name).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<&'static [u8]> for Body {
    fn from(value: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Replayable source of request body streams.
#[derive(Clone)]
pub struct BodySupplier {
    source: Source,
}

#[derive(Clone)]
enum Source {
    Buffered(Bytes),
    Seekable {
        source: Arc<Mutex<Box<dyn SeekRead>>>,
        start: u64,
        end: u64,
    },
    Factory(BodyFactory),
}

impl BodySupplier {
    fn buffered(bytes: Bytes) -> (Self, u64) {
        let len = bytes.len() as u64;
        (
            Self {
                source: Source::Buffered(bytes),
            },
            len,
        )
    }

    /// Produces a stream over the body content, starting from the beginning.
    pub fn supply(&self) -> io::Result<BodyStream> {
        match &self.source {
            Source::Buffered(bytes) => Ok(BodyStream::from_bytes(bytes.clone())),
            Source::Seekable { source, start, end } => Ok(BodyStream::sized(
                RewindReader {
                    source: Arc::clone(source),
                    pos: *start,
                    end: *end,
                },
                end.saturating_sub(*start),
            )),
            Source::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for BodySupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Buffered(_) => "buffered",
            Source::Seekable { .. } => "seekable",
            Source::Factory(_) => "factory",
        };
        f.debug_struct("BodySupplier").field("source", &kind).finish()
    }
}

/// Reads `pos..end` of a shared seekable source, seeking before every read so
/// that concurrent streams over the same source do not disturb each other.
struct RewindReader {
    source: Arc<Mutex<Box<dyn SeekRead>>>,
    pos: u64,
    end: u64,
}

impl Read for RewindReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut source = self
            .source
            .lock()
            .map_err(|_| io::Error::other("body source lock poisoned"))?;
        source.seek(SeekFrom::Start(self.pos))?;
        let read = source.read(&mut buf[..limit])?;
        self.pos += read as u64;
        Ok(read)
    }
}
