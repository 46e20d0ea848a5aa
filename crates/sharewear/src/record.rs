//! Record contract for versioned, self-serializing data shared between nodes.
//!
//! A [`Record`] writes its own fields into a [`TransportBuffer`]; its
//! [`RecordFactory`] reads them back. The buffer wraps the fields with the
//! record's type name (and, on the map backend, its version) so the
//! receiving side can find the right factory through the
//! [`TypeRegistry`](crate::registry::TypeRegistry) and hand it the version
//! the sender wrote. Factories that know older or newer layouts branch on
//! that version.
//!
//! ```rust
//! use sharewear::buffer::TransportBuffer;
//! use sharewear::record::{Record, RecordFactory};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Battery {
//!     percent: i32,
//!     charging: bool,
//! }
//!
//! impl Record for Battery {
//!     fn type_name(&self) -> &str { "demo.Battery" }
//!     fn version(&self) -> i32 { 1 }
//!     fn write_to(&self, dest: &mut dyn TransportBuffer, _flags: u32) {
//!         dest.write_int(self.percent);
//!         dest.write_bool(self.charging);
//!     }
//! }
//!
//! #[derive(Clone)]
//! struct BatteryFactory;
//!
//! impl RecordFactory for BatteryFactory {
//!     fn type_name(&self) -> &str { "demo.Battery" }
//!     fn version(&self) -> i32 { 1 }
//!     fn create_from(
//!         &self,
//!         source: &mut dyn TransportBuffer,
//!         _version: i32,
//!     ) -> sharewear::Result<Box<dyn Record>> {
//!         Ok(Box::new(Battery {
//!             percent: source.read_int()?,
//!             charging: source.read_bool()?,
//!         }))
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;

use bytes::Bytes;

use crate::buffer::{MapBuffer, MarshalContext, StreamBuffer, TransportBuffer};
use crate::data_map::DataMap;
use crate::error::Result;

/// Write flag: the record is being written as the result of an operation
/// rather than as an argument.
pub const WRITE_RETURN_VALUE: u32 = 0x0001;

/// Object-safe access to `Any` for every sized record type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A versioned record that knows how to flatten itself.
pub trait Record: AsAny + fmt::Debug + Send + Sync {
    /// Stable, fully-qualified name the receiver resolves a factory by.
    fn type_name(&self) -> &str;

    /// Layout version of this record's fields.
    fn version(&self) -> i32;

    /// Write this record's own fields, in the order its factory reads them.
    fn write_to(&self, dest: &mut dyn TransportBuffer, flags: u32);
}

impl dyn Record {
    pub fn is<T: Record>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Record>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast<T: Record>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// Rebuilds records of one type from a [`TransportBuffer`].
pub trait RecordFactory: Send + Sync {
    /// Must equal the [`Record::type_name`] of the records it builds.
    fn type_name(&self) -> &str;

    /// The version this build writes. Used on the stream backend, where no
    /// version travels with the payload.
    fn version(&self) -> i32;

    /// Read a record written with layout `version`.
    fn create_from(&self, source: &mut dyn TransportBuffer, version: i32) -> Result<Box<dyn Record>>;
}

/// Flatten `record` into a self-contained byte stream.
pub fn encode_to_stream(record: &dyn Record, flags: u32) -> Bytes {
    let mut dest = StreamBuffer::new();
    dest.write_record(Some(record), flags);
    dest.into_bytes()
}

/// Rebuild a record written by [`encode_to_stream`].
pub fn decode_from_stream(bytes: &[u8], ctx: &MarshalContext) -> Result<Option<Box<dyn Record>>> {
    StreamBuffer::from_bytes(bytes, ctx.clone()).read_record()
}

/// Flatten `record` into a tagged map where it occupies the first slot.
pub fn encode_to_map(record: &dyn Record, ctx: &MarshalContext) -> DataMap {
    let mut dest = MapBuffer::new(ctx.clone());
    dest.write_record(Some(record), 0);
    dest.into_map()
}

/// Rebuild the record stored in the first slot of `map`.
pub fn decode_from_map(map: &DataMap, ctx: &MarshalContext) -> Result<Option<Box<dyn Record>>> {
    MapBuffer::from_map(map.clone(), ctx.clone()).read_record()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data_map::DataValue;
    use crate::error::ShareError;
    use crate::registry::{Scope, TypeRegistry};
    use std::sync::Arc;

    /// A record exercising every field kind, including nested records.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Sample {
        pub flag: bool,
        pub count: i32,
        pub stamp: i64,
        pub label: Option<String>,
        pub blob: Option<Vec<u8>>,
        pub child: Option<Box<Sample>>,
    }

    impl Sample {
        pub(crate) fn leaf(count: i32) -> Self {
            Self {
                flag: count % 2 == 0,
                count,
                stamp: i64::from(count) << 33,
                label: Some(format!("leaf-{count}")),
                blob: Some(vec![count as u8; 3]),
                child: None,
            }
        }
    }

    impl Record for Sample {
        fn type_name(&self) -> &str {
            "test.Sample"
        }
        fn version(&self) -> i32 {
            2
        }
        fn write_to(&self, dest: &mut dyn TransportBuffer, flags: u32) {
            dest.write_bool(self.flag);
            dest.write_int(self.count);
            dest.write_long(self.stamp);
            dest.write_string(self.label.as_deref());
            dest.write_blob(self.blob.as_deref());
            dest.write_record(self.child.as_deref().map(|c| c as &dyn Record), flags);
        }
    }

    #[derive(Clone)]
    pub(crate) struct SampleFactory;

    impl RecordFactory for SampleFactory {
        fn type_name(&self) -> &str {
            "test.Sample"
        }
        fn version(&self) -> i32 {
            2
        }
        fn create_from(
            &self,
            source: &mut dyn TransportBuffer,
            version: i32,
        ) -> Result<Box<dyn Record>> {
            let flag = source.read_bool()?;
            let count = source.read_int()?;
            // Version 1 had no timestamp.
            let stamp = if version >= 2 { source.read_long()? } else { 0 };
            Ok(Box::new(Sample {
                flag,
                count,
                stamp,
                label: source.read_string()?,
                blob: source.read_blob()?,
                child: source.read_record_as::<Sample>()?.map(Box::new),
            }))
        }
    }

    pub(crate) fn sample_ctx() -> MarshalContext {
        let registry = Arc::new(TypeRegistry::new());
        let scope = Scope::new("tests");
        registry.register_factory(&scope, SampleFactory);
        MarshalContext::new(registry, scope)
    }

    fn nested() -> Sample {
        let mut root = Sample::leaf(4);
        let mut middle = Sample::leaf(5);
        middle.label = None;
        middle.blob = None;
        middle.child = Some(Box::new(Sample::leaf(6)));
        root.child = Some(Box::new(middle));
        root
    }

    #[test]
    fn test_stream_roundtrip_nested() {
        let ctx = sample_ctx();
        let original = nested();
        let bytes = encode_to_stream(&original, 0);
        let decoded = decode_from_stream(&bytes, &ctx).unwrap().unwrap();
        assert_eq!(decoded.downcast_ref::<Sample>(), Some(&original));
    }

    #[test]
    fn test_map_roundtrip_nested() {
        let ctx = sample_ctx();
        let original = nested();
        let map = encode_to_map(&original, &ctx);
        assert_eq!(map.len(), 1);

        let decoded = decode_from_map(&map, &ctx).unwrap().unwrap();
        assert_eq!(*decoded.downcast::<Sample>().unwrap(), original);
    }

    #[test]
    fn test_map_layout_carries_name_and_version() {
        let ctx = sample_ctx();
        let map = encode_to_map(&Sample::leaf(1), &ctx);
        let slot = map.get_map("Record-0").unwrap();
        assert_eq!(slot.get_string("Record-Name"), Some("test.Sample"));
        assert_eq!(slot.get_int("Record-Version"), Some(2));
        assert_eq!(slot.get_int("Record-1"), Some(1));
        // Nested child slot is an explicit null.
        assert_eq!(slot.get("Record-5"), Some(&DataValue::Null));
    }

    #[test]
    fn test_factory_sees_stored_version() {
        let ctx = sample_ctx();
        let mut map = DataMap::new();
        let mut slot = DataMap::new();
        slot.put_string("Record-Name", Some("test.Sample"));
        slot.put_int("Record-Version", 1);
        slot.put_bool("Record-0", true);
        slot.put_int("Record-1", 11);
        slot.put_string("Record-2", Some("old"));
        map.put_map("Record-0", Some(slot));

        let decoded = decode_from_map(&map, &ctx).unwrap().unwrap();
        let sample = decoded.downcast_ref::<Sample>().unwrap();
        assert_eq!(sample.count, 11);
        assert_eq!(sample.stamp, 0);
        assert_eq!(sample.label.as_deref(), Some("old"));
    }

    #[test]
    fn test_unknown_type_decodes_to_none_on_both_backends() {
        let empty = MarshalContext::new(Arc::new(TypeRegistry::new()), Scope::default());
        let original = nested();

        let bytes = encode_to_stream(&original, 0);
        assert!(decode_from_stream(&bytes, &empty).unwrap().is_none());

        let map = encode_to_map(&original, &empty);
        assert!(decode_from_map(&map, &empty).unwrap().is_none());
    }

    #[test]
    fn test_unknown_stream_record_is_skipped_in_sequence() {
        let empty = MarshalContext::new(Arc::new(TypeRegistry::new()), Scope::default());
        let mut out = StreamBuffer::new();
        out.write_record(Some(&Sample::leaf(2)), 0);
        out.write_int(77);

        let mut input = StreamBuffer::from_bytes(out.into_bytes(), empty);
        assert!(input.read_record().unwrap().is_none());
        assert_eq!(input.read_int().unwrap(), 77);
    }

    #[test]
    fn test_contract_violation_propagates() {
        let registry = Arc::new(TypeRegistry::new());
        let scope = Scope::default();
        registry.register(&scope, "test.Sample", || BrokenFactory);
        let ctx = MarshalContext::new(registry, scope);

        let map = encode_to_map(&Sample::leaf(1), &ctx);
        assert!(matches!(
            decode_from_map(&map, &ctx),
            Err(ShareError::BadRecord { .. })
        ));
    }

    struct BrokenFactory;

    impl RecordFactory for BrokenFactory {
        fn type_name(&self) -> &str {
            "test.Renamed"
        }
        fn version(&self) -> i32 {
            1
        }
        fn create_from(&self, _: &mut dyn TransportBuffer, _: i32) -> Result<Box<dyn Record>> {
            unreachable!("never resolved")
        }
    }

    #[test]
    fn test_downcast_to_wrong_type_is_none() {
        let boxed: Box<dyn Record> = Box::new(Sample::leaf(1));
        assert!(boxed.is::<Sample>());
        assert!(boxed.downcast_ref::<Other>().is_none());
        assert!(boxed.downcast::<Other>().is_none());
    }

    #[derive(Debug)]
    struct Other;

    impl Record for Other {
        fn type_name(&self) -> &str {
            "test.Other"
        }
        fn version(&self) -> i32 {
            1
        }
        fn write_to(&self, _: &mut dyn TransportBuffer, _: u32) {}
    }
}
