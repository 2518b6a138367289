mod byte_cursor;
mod hexdump;
mod utf16;
pub(crate) mod windows;

pub use self::byte_cursor::{ByteCursor, Endianness};
pub use self::hexdump::format_hexdump;
pub use self::utf16::decode_utf16le;
pub use self::windows::{filetime_to_timestamp, systime_from_bytes};
