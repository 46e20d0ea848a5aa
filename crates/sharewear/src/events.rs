//! Inbound events delivered by the transport.

use bytes::Bytes;
use tracing::warn;

use crate::buffer::MarshalContext;
use crate::data_map::DataMap;
use crate::error::Result;
use crate::locator::Locator;
use crate::record::{Record, decode_from_map, decode_from_stream};

/// One item in the shared data layer: the map a node wrote under a path.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub locator: Locator,
    pub data: DataMap,
}

impl DataItem {
    pub fn new(locator: Locator, data: DataMap) -> Self {
        Self { locator, data }
    }

    pub fn path(&self) -> &str {
        self.locator.path()
    }

    /// Decode the record stored in this item.
    pub fn record(&self, ctx: &MarshalContext) -> Result<Option<Box<dyn Record>>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        decode_from_map(&self.data, ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEventKind {
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub kind: DataEventKind,
    pub item: DataItem,
}

impl DataEvent {
    pub fn changed(item: DataItem) -> Self {
        Self {
            kind: DataEventKind::Changed,
            item,
        }
    }

    pub fn deleted(item: DataItem) -> Self {
        Self {
            kind: DataEventKind::Deleted,
            item,
        }
    }
}

/// A point-to-point message from another node.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub source_node_id: String,
    pub path: String,
    pub data: Bytes,
    pub request_id: u64,
}

impl MessageEvent {
    /// Decode a record carried as the message payload.
    pub fn record(&self, ctx: &MarshalContext) -> Result<Option<Box<dyn Record>>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        decode_from_stream(&self.data, ctx)
    }
}

/// A data event as handed to handlers, able to decode its own payload.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    event: DataEvent,
    marshal: MarshalContext,
}

impl RecordEvent {
    pub fn new(event: DataEvent, marshal: MarshalContext) -> Self {
        Self { event, marshal }
    }

    pub fn kind(&self) -> DataEventKind {
        self.event.kind
    }

    pub fn is_deleted(&self) -> bool {
        self.event.kind == DataEventKind::Deleted
    }

    pub fn locator(&self) -> &Locator {
        &self.event.item.locator
    }

    pub fn path(&self) -> &str {
        self.event.item.path()
    }

    /// The node that wrote (or deleted) the item.
    pub fn node_id(&self) -> Option<&str> {
        self.event.item.locator.node_id()
    }

    pub fn data(&self) -> &DataMap {
        &self.event.item.data
    }

    pub fn event(&self) -> &DataEvent {
        &self.event
    }

    /// The record carried by the item. Deleted items and unknown record
    /// types yield `None`.
    pub fn record(&self) -> Result<Option<Box<dyn Record>>> {
        if self.is_deleted() {
            return Ok(None);
        }
        self.event.item.record(&self.marshal)
    }

    /// The record carried by the item, if it is a `T`.
    pub fn record_as<T: Record>(&self) -> Result<Option<T>> {
        let Some(record) = self.record()? else {
            return Ok(None);
        };
        let type_name = record.type_name().to_string();
        match record.downcast::<T>() {
            Some(record) => Ok(Some(*record)),
            None => {
                warn!("Record at {} is a {type_name}", self.path());
                Ok(None)
            }
        }
    }
}
