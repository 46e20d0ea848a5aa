//! Tagged-map backend.
//!
//! Each read or write consumes the next synthetic key `"<prefix>-<n>"`.
//! A nested record takes exactly one key, holding its own map:
//!
//! ```text
//! "<prefix>-3" => {
//!     "<prefix>-Name"    => "demo.Point",
//!     "<prefix>-Version" => 2,
//!     "<prefix>-0"       => ...,   // the record's own fields
//! }
//! ```
//!
//! Binary blobs become content-addressed [`Asset`]s and are fetched lazily
//! through the context's [`BlobSource`](crate::data_map::BlobSource) when
//! they arrive without inline bytes.

use tracing::{debug, warn};

use super::{MarshalContext, TransportBuffer};
use crate::data_map::{Asset, DataMap, DataValue};
use crate::error::Result;
use crate::record::Record;

#[derive(Debug)]
pub struct MapBuffer {
    map: DataMap,
    position: usize,
    ctx: MarshalContext,
}

impl MapBuffer {
    /// An empty map for writing.
    pub fn new(ctx: MarshalContext) -> Self {
        Self::from_map(DataMap::new(), ctx)
    }

    /// A buffer over an existing map, positioned at the first key.
    pub fn from_map(map: DataMap, ctx: MarshalContext) -> Self {
        Self {
            map,
            position: 0,
            ctx,
        }
    }

    pub fn map(&self) -> &DataMap {
        &self.map
    }

    pub fn into_map(self) -> DataMap {
        self.map
    }

    fn next_key(&mut self) -> String {
        let key = format!("{}-{}", self.ctx.key_prefix(), self.position);
        self.position += 1;
        key
    }

    fn name_key(&self) -> String {
        format!("{}-Name", self.ctx.key_prefix())
    }

    fn version_key(&self) -> String {
        format!("{}-Version", self.ctx.key_prefix())
    }

    fn fetch(&self, asset: &Asset) -> Option<Vec<u8>> {
        if let Some(data) = asset.data() {
            return Some(data.to_vec());
        }
        let Some(blobs) = self.ctx.blob_source() else {
            warn!("No blob source to fetch asset {}", asset.digest());
            return None;
        };
        match blobs.fetch_blob(asset) {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                warn!("Asset {} is absent", asset.digest());
                None
            }
            Err(e) => {
                warn!("Failed to fetch asset {}: {e}", asset.digest());
                None
            }
        }
    }
}

impl TransportBuffer for MapBuffer {
    fn read_bool(&mut self) -> Result<bool> {
        let key = self.next_key();
        Ok(self.map.get_bool(&key).unwrap_or_default())
    }

    fn write_bool(&mut self, value: bool) {
        let key = self.next_key();
        self.map.put_bool(key, value);
    }

    fn read_int(&mut self) -> Result<i32> {
        let key = self.next_key();
        Ok(self.map.get_int(&key).unwrap_or_default())
    }

    fn write_int(&mut self, value: i32) {
        let key = self.next_key();
        self.map.put_int(key, value);
    }

    fn read_long(&mut self) -> Result<i64> {
        let key = self.next_key();
        Ok(self.map.get_long(&key).unwrap_or_default())
    }

    fn write_long(&mut self, value: i64) {
        let key = self.next_key();
        self.map.put_long(key, value);
    }

    fn read_string(&mut self) -> Result<Option<String>> {
        let key = self.next_key();
        Ok(self.map.get_string(&key).map(str::to_owned))
    }

    fn write_string(&mut self, value: Option<&str>) {
        let key = self.next_key();
        self.map.put_string(key, value);
    }

    fn read_blob(&mut self) -> Result<Option<Vec<u8>>> {
        let key = self.next_key();
        Ok(self.map.get_asset(&key).and_then(|asset| self.fetch(asset)))
    }

    fn write_blob(&mut self, value: Option<&[u8]>) {
        let key = self.next_key();
        match value {
            Some(bytes) => self.map.put_asset(key, Asset::from_bytes(bytes)),
            None => self.map.put(key, DataValue::Null),
        }
    }

    fn read_record(&mut self) -> Result<Option<Box<dyn Record>>> {
        let key = self.next_key();
        let Some(nested) = self.map.get_map(&key) else {
            return Ok(None);
        };
        let Some(type_name) = nested.get_string(&self.name_key()) else {
            debug!("Nested map under {key} carries no record type");
            return Ok(None);
        };
        let Some(factory) = self.ctx.resolve(type_name)? else {
            return Ok(None);
        };
        let version = nested.get_int(&self.version_key()).unwrap_or(-1);

        let mut source = MapBuffer::from_map(nested.clone(), self.ctx.clone());
        factory.create_from(&mut source, version).map(Some)
    }

    fn write_record(&mut self, value: Option<&dyn Record>, flags: u32) {
        let key = self.next_key();
        let nested = value.map(|record| {
            let mut dest = MapBuffer::new(self.ctx.clone());
            dest.map.put_string(self.name_key(), Some(record.type_name()));
            dest.map.put_int(self.version_key(), record.version());
            record.write_to(&mut dest, flags);
            dest.into_map()
        });
        self.map.put_map(key, nested);
    }

    fn position(&self) -> usize {
        self.position
    }

    fn set_position(&mut self, position: usize) {
        self.position = position;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
