use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::hexdump::format_hexdump;
use crate::utils::utf16::decode_utf16le;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;

/// Byte order used by the fixed-width reads of a `ByteCursor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// A forward reader over an immutable byte slice.
///
/// Every read is bounds checked against the cursor's limit. When a read would run past it,
/// a `Truncated` error is returned *and* latched on the cursor: all further reads fail with that
/// same error until `clear_error` is called. Callers propagate with `?` and the framing code
/// inspects/clears the latch at record boundaries.
///
/// Repositioning (`skip`, `seek`, `align`) is unchecked; the next read enforces the bounds.
///
/// `pos` is relative to the start of `buf`, `base_offset` is the absolute offset of `buf[0]`
/// in the top-level buffer and is only used for error reporting.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    limit: usize,
    base_offset: u64,
    endianness: Endianness,
    error: Option<DeserializationError>,
}

macro_rules! fixed_width_reads {
    ($($name:ident, $named:ident, $ty:ty, $width:expr, $read:ident;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self) -> DeserializationResult<$ty> {
                self.$named(stringify!($ty))
            }

            #[inline]
            pub fn $named(&mut self, what: &'static str) -> DeserializationResult<$ty> {
                let bytes = self.take_bytes($width, what)?;
                Ok(match self.endianness {
                    Endianness::Little => LittleEndian::$read(bytes),
                    Endianness::Big => BigEndian::$read(bytes),
                })
            }
        )*
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteCursor {
            buf,
            pos: 0,
            limit: buf.len(),
            base_offset: 0,
            endianness: Endianness::Little,
            error: None,
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    #[inline]
    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    /// Offset relative to the start of this cursor's slice.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Absolute offset in the top-level buffer.
    #[inline]
    pub fn position(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    #[inline]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    /// Narrows the readable window to end at `end` (relative offset), never widening it.
    /// Returns the previous limit so it can be restored with `set_limit`.
    pub fn limit_to(&mut self, end: usize) -> usize {
        let previous = self.limit;
        self.limit = end.min(self.limit);
        previous
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.min(self.buf.len());
    }

    pub fn last_error(&self) -> Option<&DeserializationError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn ensure(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let have = self.remaining();
        if n > have {
            let err = DeserializationError::Truncated {
                what,
                offset: self.position(),
                need: n,
                have,
            };
            self.error = Some(err.clone());
            return Err(err);
        }

        Ok(())
    }

    /// True iff `n` more bytes can be read. Latches a `Truncated` error otherwise.
    pub fn has_bytes(&mut self, n: usize) -> bool {
        self.ensure(n, "bytes").is_ok()
    }

    #[inline]
    pub fn take_bytes(&mut self, len: usize, what: &'static str) -> DeserializationResult<&'a [u8]> {
        self.ensure(len, what)?;
        if len == 0 {
            return Ok(&[]);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub fn array<const N: usize>(&mut self, what: &'static str) -> DeserializationResult<[u8; N]> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take_bytes(N, what)?);
        Ok(out)
    }

    /// Bulk copy of `out.len()` bytes.
    pub fn copy(&mut self, out: &mut [u8]) -> DeserializationResult<()> {
        out.copy_from_slice(self.take_bytes(out.len(), "bytes")?);
        Ok(())
    }

    #[inline]
    pub fn u8(&mut self) -> DeserializationResult<u8> {
        self.u8_named("u8")
    }

    #[inline]
    pub fn u8_named(&mut self, what: &'static str) -> DeserializationResult<u8> {
        Ok(self.take_bytes(1, what)?[0])
    }

    #[inline]
    pub fn i8(&mut self) -> DeserializationResult<i8> {
        Ok(self.u8_named("i8")? as i8)
    }

    fixed_width_reads! {
        u16, u16_named, u16, 2, read_u16;
        i16, i16_named, i16, 2, read_i16;
        u32, u32_named, u32, 4, read_u32;
        i32, i32_named, i32, 4, read_i32;
        u64, u64_named, u64, 8, read_u64;
        i64, i64_named, i64, 8, read_i64;
        f32, f32_named, f32, 4, read_f32;
        f64, f64_named, f64, 8, read_f64;
    }

    #[inline]
    pub fn peek_u8(&mut self) -> DeserializationResult<u8> {
        self.ensure(1, "peeked u8")?;
        Ok(self.buf[self.pos])
    }

    pub fn peek_u16(&mut self) -> DeserializationResult<u16> {
        let pos = self.pos;
        let value = self.u16_named("peeked u16")?;
        self.pos = pos;
        Ok(value)
    }

    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n);
    }

    /// Moves to `pos` (relative to this cursor) and returns the previous position.
    #[inline]
    pub fn seek(&mut self, pos: usize) -> usize {
        std::mem::replace(&mut self.pos, pos)
    }

    /// Advances to the next multiple of `n`.
    pub fn align(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let rem = self.pos % n;
        if rem != 0 {
            self.skip(n - rem);
        }
    }

    /// An independent cursor over `[pos, limit)` addressed from zero.
    ///
    /// The error latch is not inherited.
    pub fn sub_cursor(&self) -> ByteCursor<'a> {
        let start = self.pos.min(self.limit);
        let buf = &self.buf[start..self.limit];
        ByteCursor {
            buf,
            pos: 0,
            limit: buf.len(),
            base_offset: self.base_offset + start as u64,
            endianness: self.endianness,
            error: None,
        }
    }

    /// Read `char_count` UTF-16LE code units, stopping at a NUL if there is one.
    ///
    /// Malformed text is not an error, it decodes as an empty string.
    pub fn utf16_by_char_count(
        &mut self,
        char_count: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let offset = self.position();
        let bytes = self.take_bytes(char_count.saturating_mul(2), what)?;
        Ok(decode_utf16le(bytes).unwrap_or_else(|| {
            debug!("Offset {offset}: malformed UTF-16 in {what}, using an empty string");
            String::new()
        }))
    }

    /// Read a `u16` character count followed by that many UTF-16LE code units,
    /// and optionally a trailing NUL code unit.
    pub fn len_prefixed_utf16_string(
        &mut self,
        is_null_terminated: bool,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let char_count = self.u16_named(what)? as usize;
        let s = self.utf16_by_char_count(char_count, what)?;
        if is_null_terminated {
            self.u16_named(what)?;
        }
        Ok(s)
    }

    /// Hexdump of up to `window` bytes on each side of the current position.
    pub fn dump(&self, window: usize) -> String {
        let pos = self.pos.min(self.buf.len());
        let start = pos.saturating_sub(window);
        let end = pos.saturating_add(window).min(self.buf.len());

        let mut out = format!(
            "cursor at offset {} (relative {}), limit {}:",
            self.position(),
            self.pos,
            self.limit
        );
        out.push_str(&format_hexdump(
            &self.buf[start..end],
            self.base_offset + start as u64,
        ));
        out
    }
}
