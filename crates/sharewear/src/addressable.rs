//! Records bound to a path, and the put requests built from them.

use std::collections::BTreeMap;

use crate::buffer::MarshalContext;
use crate::data_map::DataMap;
use crate::error::{Result, ShareError};
use crate::locator::Locator;
use crate::record::{Record, encode_to_map};

/// Borrow any record as a trait object.
pub trait AsRecord {
    fn as_record(&self) -> &dyn Record;
}

impl<T: Record> AsRecord for T {
    fn as_record(&self) -> &dyn Record {
        self
    }
}

/// A record stored under a fixed, non-empty path in the shared data layer.
pub trait AddressableRecord: Record + AsRecord {
    fn path(&self) -> &str;

    /// Locator of this record as written by `node_id`.
    fn locator_for(&self, node_id: &str) -> Result<Locator> {
        Locator::for_node(node_id, self.path())
    }

    /// Locator of this record on every node.
    fn locator(&self) -> Result<Locator> {
        Locator::for_all_nodes(self.path())
    }

    /// Serialize the record into a fresh tagged map under its path.
    fn to_put_request(&self, ctx: &MarshalContext) -> Result<PutRequest> {
        PutRequest::from_record(self.path(), self.as_record(), ctx)
    }
}

/// An outbound write to the shared data layer.
///
/// Inline blob bytes are moved out of the map when the request is built so
/// the transport can ship them separately, keyed by digest.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    path: String,
    data: DataMap,
    assets: BTreeMap<String, Vec<u8>>,
}

impl PutRequest {
    pub fn new(path: &str, mut data: DataMap) -> Result<Self> {
        if path.is_empty() || path == "/" {
            return Err(ShareError::EmptyPath);
        }
        // Items must stay addressable by the path they were written under.
        let path = Locator::for_all_nodes(path)?.path().to_string();
        let assets = data.take_inline_assets();
        Ok(Self { path, data, assets })
    }

    pub fn from_record(path: &str, record: &dyn Record, ctx: &MarshalContext) -> Result<Self> {
        Self::new(path, encode_to_map(record, ctx))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &DataMap {
        &self.data
    }

    /// Detached blob bytes keyed by digest.
    pub fn assets(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.assets
    }

    pub fn into_parts(self) -> (String, DataMap, BTreeMap<String, Vec<u8>>) {
        (self.path, self.data, self.assets)
    }
}
