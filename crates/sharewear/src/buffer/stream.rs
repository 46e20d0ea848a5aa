//! Byte-stream backend.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! bool    i32 (0 | 1)
//! int     i32
//! long    i64
//! string  i32 byte length (-1 = null) + UTF-8
//! blob    i32 length (-1 = null) + bytes
//! record  type-name string (null = no record) + i32 body length + body
//! ```
//!
//! No version travels with a record here; the factory's own version is
//! passed to it. The body length lets readers skip records whose type they
//! cannot resolve.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{error, warn};

use super::{MarshalContext, TransportBuffer};
use crate::error::{Result, ShareError};
use crate::record::Record;

const NULL_LEN: i32 = -1;

#[derive(Debug, Default)]
pub struct StreamBuffer {
    data: BytesMut,
    pos: usize,
    ctx: Option<MarshalContext>,
}

impl StreamBuffer {
    /// An empty buffer for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer over `bytes`, positioned at the start, able to rebuild
    /// nested records through `ctx`.
    pub fn from_bytes(bytes: impl AsRef<[u8]>, ctx: MarshalContext) -> Self {
        Self {
            data: BytesMut::from(bytes.as_ref()),
            pos: 0,
            ctx: Some(ctx),
        }
    }

    pub fn with_context(mut self, ctx: MarshalContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }

    fn emit(&mut self, bytes: &[u8]) {
        if self.pos == self.data.len() {
            self.data.put_slice(bytes);
        } else {
            let end = self.pos + bytes.len();
            if end > self.data.len() {
                self.data.resize(end, 0);
            }
            self.data[self.pos..end].copy_from_slice(bytes);
        }
        self.pos += bytes.len();
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let remaining = self.data.len().saturating_sub(self.pos);
        if n > remaining {
            return Err(ShareError::Decode(format!(
                "needed {n} bytes at offset {}, {remaining} remain",
                self.pos
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn read_len(&mut self) -> Result<Option<usize>> {
        match self.read_int()? {
            NULL_LEN => Ok(None),
            len if len < 0 => Err(ShareError::Decode(format!(
                "negative length {len} at offset {}",
                self.pos - 4
            ))),
            len => Ok(Some(len as usize)),
        }
    }

    fn write_len_prefixed(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => match i32::try_from(bytes.len()) {
                Ok(len) => {
                    self.write_int(len);
                    self.emit(bytes);
                }
                Err(_) => {
                    error!("{} bytes exceed the stream length limit, writing null", bytes.len());
                    self.write_int(NULL_LEN);
                }
            },
            None => self.write_int(NULL_LEN),
        }
    }
}

impl TransportBuffer for StreamBuffer {
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_int()? != 0)
    }

    fn write_bool(&mut self, value: bool) {
        self.write_int(i32::from(value));
    }

    fn read_int(&mut self) -> Result<i32> {
        let mut src = self.take(4)?;
        Ok(src.get_i32_le())
    }

    fn write_int(&mut self, value: i32) {
        self.emit(&value.to_le_bytes());
    }

    fn read_long(&mut self) -> Result<i64> {
        let mut src = self.take(8)?;
        Ok(src.get_i64_le())
    }

    fn write_long(&mut self, value: i64) {
        self.emit(&value.to_le_bytes());
    }

    fn read_string(&mut self) -> Result<Option<String>> {
        let Some(len) = self.read_len()? else {
            return Ok(None);
        };
        let at = self.pos;
        let raw = self.take(len)?.to_vec();
        String::from_utf8(raw)
            .map(Some)
            .map_err(|e| ShareError::Decode(format!("invalid UTF-8 string at offset {at}: {e}")))
    }

    fn write_string(&mut self, value: Option<&str>) {
        self.write_len_prefixed(value.map(str::as_bytes));
    }

    fn read_blob(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.read_len()? else {
            return Ok(None);
        };
        Ok(Some(self.take(len)?.to_vec()))
    }

    fn write_blob(&mut self, value: Option<&[u8]>) {
        self.write_len_prefixed(value);
    }

    fn read_record(&mut self) -> Result<Option<Box<dyn Record>>> {
        let Some(type_name) = self.read_string()? else {
            return Ok(None);
        };
        let body_len = self.read_len()?.unwrap_or(0);
        let body_start = self.pos;
        let body_end = body_start + body_len;
        if body_end > self.data.len() {
            return Err(ShareError::Decode(format!(
                "record {type_name} body of {body_len} bytes overruns the stream"
            )));
        }

        let factory = match &self.ctx {
            Some(ctx) => ctx.resolve(&type_name)?,
            None => {
                warn!("No marshal context to resolve record type {type_name}");
                None
            }
        };
        let Some(factory) = factory else {
            self.pos = body_end;
            return Ok(None);
        };

        let record = factory.create_from(self, factory.version())?;
        if self.pos > body_end {
            return Err(ShareError::Decode(format!(
                "factory for {type_name} read past the end of its body"
            )));
        }
        self.pos = body_end;
        Ok(Some(record))
    }

    fn write_record(&mut self, value: Option<&dyn Record>, flags: u32) {
        let Some(record) = value else {
            self.write_string(None);
            return;
        };
        let record_start = self.pos;
        self.write_string(Some(record.type_name()));
        let len_at = self.pos;
        self.write_int(0);
        let body_start = self.pos;
        record.write_to(self, flags);
        let body_end = self.pos;

        let body_len = body_end
            .checked_sub(body_start)
            .and_then(|len| i32::try_from(len).ok());
        let Some(body_len) = body_len else {
            // The record moved the cursor before its own body or wrote too
            // much; drop everything it wrote and leave a null record.
            error!(
                "Record {} wrote an invalid body ({body_start}..{body_end}), writing null",
                record.type_name()
            );
            self.data.truncate(record_start);
            self.pos = record_start;
            self.write_string(None);
            return;
        };
        self.pos = len_at;
        self.write_int(body_len);
        self.pos = body_end;
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn set_position(&mut self, position: usize) {
        self.pos = position.min(self.data.len());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Scope, TypeRegistry};
    use std::sync::Arc;

    fn ctx() -> MarshalContext {
        MarshalContext::new(Arc::new(TypeRegistry::new()), Scope::default())
    }

    #[test]
    fn test_primitives_in_write_order() {
        let mut out = StreamBuffer::new();
        out.write_bool(true);
        out.write_int(-7);
        out.write_long(1 << 40);
        out.write_string(Some("héllo"));
        out.write_string(None);
        out.write_blob(Some(&[0xde, 0xad]));
        out.write_blob(None);

        let mut input = StreamBuffer::from_bytes(out.into_bytes(), ctx());
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_int().unwrap(), -7);
        assert_eq!(input.read_long().unwrap(), 1 << 40);
        assert_eq!(input.read_string().unwrap().as_deref(), Some("héllo"));
        assert_eq!(input.read_string().unwrap(), None);
        assert_eq!(input.read_blob().unwrap(), Some(vec![0xde, 0xad]));
        assert_eq!(input.read_blob().unwrap(), None);
    }

    #[test]
    fn test_short_read_is_decode_error() {
        let mut input = StreamBuffer::from_bytes([1u8, 2], ctx());
        assert!(matches!(input.read_int(), Err(ShareError::Decode(_))));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let mut out = StreamBuffer::new();
        out.write_blob(Some(&[0xff, 0xfe]));
        let mut input = StreamBuffer::from_bytes(out.into_bytes(), ctx());
        assert!(matches!(input.read_string(), Err(ShareError::Decode(_))));
    }

    #[test]
    fn test_position_rewind_and_overwrite() {
        let mut buf = StreamBuffer::new();
        buf.write_int(1);
        buf.write_int(2);
        assert_eq!(buf.position(), 8);

        buf.set_position(4);
        buf.write_int(5);
        assert_eq!(buf.len(), 8);

        buf.set_position(0);
        assert_eq!(buf.read_int().unwrap(), 1);
        assert_eq!(buf.read_int().unwrap(), 5);
    }

    #[test]
    fn test_set_position_clamps_to_length() {
        let mut buf = StreamBuffer::new();
        buf.write_long(3);
        buf.set_position(100);
        assert_eq!(buf.position(), 8);
    }

    #[test]
    fn test_null_record_reads_none() {
        let mut out = StreamBuffer::new();
        out.write_record(None, 0);
        out.write_int(9);

        let mut input = StreamBuffer::from_bytes(out.into_bytes(), ctx());
        assert!(input.read_record().unwrap().is_none());
        assert_eq!(input.read_int().unwrap(), 9);
    }

    #[derive(Debug)]
    struct Rewinder;

    impl Record for Rewinder {
        fn type_name(&self) -> &str {
            "test.Rewinder"
        }
        fn version(&self) -> i32 {
            1
        }
        fn write_to(&self, dest: &mut dyn TransportBuffer, _flags: u32) {
            dest.set_position(0);
        }
    }

    #[test]
    fn test_record_rewinding_before_body_becomes_null() {
        let mut out = StreamBuffer::new();
        out.write_int(5);
        out.write_record(Some(&Rewinder), 0);
        out.write_int(9);

        let mut input = StreamBuffer::from_bytes(out.into_bytes(), ctx());
        assert_eq!(input.read_int().unwrap(), 5);
        assert!(input.read_record().unwrap().is_none());
        assert_eq!(input.read_int().unwrap(), 9);
        assert_eq!(input.position(), input.len());
    }
}
