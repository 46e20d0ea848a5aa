//! Path helpers and typed routes for data items and messages.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;

use crate::buffer::MarshalContext;
use crate::error::Result;
use crate::events::{DataItem, MessageEvent};
use crate::locator::Locator;
use crate::record::{Record, encode_to_stream};

/// Join path segments with single slashes into an absolute path.
///
/// Leading and trailing slashes on each segment are dropped and empty
/// segments skipped, so `["/a/", "", "b"]` becomes `"/a/b"`.
pub fn make_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut path = String::new();
    for segment in segments {
        let segment = segment.as_ref().trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Whether `path` equals `prefix` or lies underneath it.
pub(crate) fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Items of record type `T` stored under a path prefix.
pub struct DataRoute<T> {
    path: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> DataRoute<T> {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            path: make_path(segments),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn matches(&self, locator: &Locator) -> bool {
        path_has_prefix(locator.path(), &self.path)
    }

    /// Path of one item below this route.
    pub fn child(&self, segment: &str) -> String {
        make_path([self.path.as_str(), segment])
    }

    /// Decode `item` if it falls under this route and holds a `T`.
    pub fn decode(&self, item: &DataItem, ctx: &MarshalContext) -> Result<Option<T>> {
        if !self.matches(&item.locator) {
            return Ok(None);
        }
        Ok(item
            .record(ctx)?
            .and_then(|record| record.downcast::<T>())
            .map(|record| *record))
    }
}

impl<T> Clone for DataRoute<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DataRoute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRoute")
            .field("path", &self.path)
            .field("record", &std::any::type_name::<T>())
            .finish()
    }
}

/// Messages sent under a path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRoute {
    path: String,
}

impl MessageRoute {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            path: make_path(segments),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn matches(&self, event: &MessageEvent) -> bool {
        path_has_prefix(&event.path, &self.path)
    }

    pub fn params(&self, data: impl Into<Bytes>) -> MessageParams {
        MessageParams::new(self.path.clone(), data)
    }
}

/// Payload of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageParams {
    pub path: String,
    pub data: Bytes,
}

impl MessageParams {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// A message carrying `record` in the stream format.
    pub fn from_record(path: impl Into<String>, record: &dyn Record) -> Self {
        Self::new(path, encode_to_stream(record, 0))
    }
}
