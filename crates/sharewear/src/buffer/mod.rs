//! Transport buffers: one read/write cursor over either representation.
//!
//! A [`TransportBuffer`] is what a [`Record`] writes itself into and what a
//! [`RecordFactory`](crate::record::RecordFactory) reads from. Records never
//! learn which backend they are talking to:
//!
//! - [`StreamBuffer`]: a linear byte stream with an implicit position.
//! - [`MapBuffer`]: a [`DataMap`](crate::data_map::DataMap) whose keys are
//!   synthesized from a monotonic counter (`"<prefix>-<n>"`).
//!
//! Neither format is self-describing. Fields must be read back in exactly
//! the order and with exactly the types they were written. On the map
//! backend a read out of order silently yields the default value for the
//! type (or `None`); it is a caller contract, not a detected error.

mod map;
mod stream;

use std::fmt;
use std::sync::Arc;

pub use map::MapBuffer;
pub use stream::StreamBuffer;

use tracing::warn;

use crate::config::DEFAULT_KEY_PREFIX;
use crate::data_map::BlobSource;
use crate::error::Result;
use crate::record::{Record, RecordFactory};
use crate::registry::{Scope, TypeRegistry};

/// Sequential, positional access to a transport representation.
///
/// Buffers are single-use and not safe to share between callers.
pub trait TransportBuffer {
    fn read_bool(&mut self) -> Result<bool>;
    fn write_bool(&mut self, value: bool);

    fn read_int(&mut self) -> Result<i32>;
    fn write_int(&mut self, value: i32);

    fn read_long(&mut self) -> Result<i64>;
    fn write_long(&mut self, value: i64);

    fn read_string(&mut self) -> Result<Option<String>>;
    fn write_string(&mut self, value: Option<&str>);

    /// Read a binary blob. An absent or unfetchable blob is `Ok(None)`.
    fn read_blob(&mut self) -> Result<Option<Vec<u8>>>;
    fn write_blob(&mut self, value: Option<&[u8]>);

    /// Read a nested record. Unknown record types decode to `Ok(None)`;
    /// a type that breaks the factory contract is an error.
    fn read_record(&mut self) -> Result<Option<Box<dyn Record>>>;

    /// Write a nested record. `None` still occupies one slot.
    fn write_record(&mut self, value: Option<&dyn Record>, flags: u32);

    fn position(&self) -> usize;
    fn set_position(&mut self, position: usize);
}

impl dyn TransportBuffer + '_ {
    /// Read a nested record and downcast it to `T`. A record of another
    /// concrete type is logged and treated like an unknown one.
    pub fn read_record_as<T: Record>(&mut self) -> Result<Option<T>> {
        let Some(record) = self.read_record()? else {
            return Ok(None);
        };
        let type_name = record.type_name().to_string();
        match record.downcast::<T>() {
            Some(record) => Ok(Some(*record)),
            None => {
                warn!(
                    "Nested record {type_name} is not a {}",
                    std::any::type_name::<T>()
                );
                Ok(None)
            }
        }
    }
}

/// Everything a buffer needs to rebuild nested records: the registry, the
/// scope to resolve names in, and where to fetch detached blobs from.
#[derive(Clone)]
pub struct MarshalContext {
    registry: Arc<TypeRegistry>,
    scope: Scope,
    blobs: Option<Arc<dyn BlobSource>>,
    key_prefix: Arc<str>,
}

impl MarshalContext {
    pub fn new(registry: Arc<TypeRegistry>, scope: Scope) -> Self {
        Self {
            registry,
            scope,
            blobs: None,
            key_prefix: Arc::from(DEFAULT_KEY_PREFIX),
        }
    }

    pub fn with_blob_source(mut self, blobs: Arc<dyn BlobSource>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.key_prefix = Arc::from(prefix.as_ref());
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn blob_source(&self) -> Option<&Arc<dyn BlobSource>> {
        self.blobs.as_ref()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub(crate) fn resolve(&self, type_name: &str) -> Result<Option<Arc<dyn RecordFactory>>> {
        self.registry.resolve(&self.scope, type_name)
    }
}

impl Default for MarshalContext {
    fn default() -> Self {
        Self::new(TypeRegistry::shared(), Scope::default())
    }
}

impl fmt::Debug for MarshalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshalContext")
            .field("scope", &self.scope)
            .field("key_prefix", &self.key_prefix)
            .field("has_blob_source", &self.blobs.is_some())
            .finish()
    }
}
