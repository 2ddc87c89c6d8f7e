//! Sequential access to a large byte source through a single bounded window.

use crate::error::{DecodeResult, SlurpError};
use crate::parsing::{NomError, StatelessParserWithId};
use crate::{Id, IdSize};
use log::trace;
use nom::number::complete as number;
use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom};
use std::{cmp, mem};

/// Random-access bytes: a slice, a file, anything that can fill a buffer at an offset.
pub trait ByteSource {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill all of `buf` with the bytes at `[offset, offset + buf.len())`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl ByteSource for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(buf.len()).map(|end| start..end));

        match range.and_then(|r| self.get(r)) {
            Some(bytes) => {
                buf.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of slice",
            )),
        }
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_at(offset, buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }
}

/// Adapts anything `Read + Seek` (typically a `File`) into a `ByteSource`.
pub struct SeekableSource<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> SeekableSource<R> {
    pub fn new(mut inner: R) -> io::Result<SeekableSource<R>> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        Ok(SeekableSource { inner, len })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for SeekableSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)
    }
}

/// Byte order for the primitive accessors. Hprof itself is always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Big
    }
}

/// Presents a source as a sequential stream while holding at most one window of it.
///
/// When a read needs more bytes than remain in the window, the window is replaced by a fresh one
/// starting at the first unconsumed byte, `max(requested, chunk_size)` long. A single read
/// therefore never spans two fetches. Skips past the end of the window don't fetch anything.
pub struct WindowedReader<S> {
    source: S,
    source_len: u64,
    chunk_size: usize,
    byte_order: ByteOrder,
    window: Vec<u8>,
    /// absolute offset of `window[0]`
    window_start: u64,
    window_pos: usize,
    fetches: u64,
}

macro_rules! primitive_getter {
    ($method_name:ident, $prim_type:ty, $be_parser:ident, $le_parser:ident) => {
        pub fn $method_name(&mut self) -> DecodeResult<$prim_type> {
            let byte_order = self.byte_order;
            let offset = self.position();
            let needed = mem::size_of::<$prim_type>();
            let input = self.get(needed)?;

            let res: nom::IResult<&[u8], $prim_type> = match byte_order {
                ByteOrder::Big => number::$be_parser(input),
                ByteOrder::Little => number::$le_parser(input),
            };

            res.map(|(_, val)| val).map_err(|_: NomError| SlurpError::TruncatedInput {
                offset,
                needed: needed as u64,
            })
        }
    };
}

impl<S: ByteSource> WindowedReader<S> {
    pub fn new(source: S, chunk_size: usize, byte_order: ByteOrder) -> WindowedReader<S> {
        let source_len = source.len();
        WindowedReader {
            source,
            source_len,
            chunk_size: cmp::max(chunk_size, 1),
            byte_order,
            window: Vec::new(),
            window_start: 0,
            window_pos: 0,
            fetches: 0,
        }
    }

    /// Absolute offset of the next unconsumed byte
    pub fn position(&self) -> u64 {
        self.window_start + self.window_pos as u64
    }

    pub fn remaining(&self) -> u64 {
        self.source_len.saturating_sub(self.position())
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// How many windows have been fetched from the source so far
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    /// Size of the currently held window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    #[cfg(test)]
    fn window_capacity(&self) -> usize {
        self.window.capacity()
    }

    fn available(&self) -> usize {
        self.window.len() - self.window_pos
    }

    fn fill(&mut self, needed: usize) -> DecodeResult<()> {
        if self.available() >= needed {
            return Ok(());
        }

        let offset = self.position();
        let remaining = self.remaining();
        if needed as u64 > remaining {
            return Err(SlurpError::UnexpectedEndOfStream {
                offset,
                needed: needed as u64,
            });
        }

        // bounded by `remaining`, so it fits in usize whenever `needed` does
        let len = cmp::min(cmp::max(needed, self.chunk_size) as u64, remaining) as usize;

        self.window.clear();
        // don't hold on to the buffer of a one-off oversized read
        if self.window.capacity() > 2 * cmp::max(len, self.chunk_size) {
            self.window.shrink_to(len);
        }
        self.window.resize(len, 0);
        self.window_start = offset;
        self.window_pos = 0;
        self.source
            .read_at(offset, &mut self.window)
            .map_err(|source| SlurpError::Io { offset, source })?;
        self.fetches += 1;

        trace!("fetched {} byte window at offset {}", len, offset);

        Ok(())
    }

    /// The next `n` raw bytes
    pub fn get(&mut self, n: usize) -> DecodeResult<&[u8]> {
        self.fill(n)?;

        let start = self.window_pos;
        self.window_pos += n;
        Ok(&self.window[start..start + n])
    }

    /// Advance `n` bytes without reading them.
    pub fn skip(&mut self, n: u64) -> DecodeResult<()> {
        if n <= self.available() as u64 {
            self.window_pos += n as usize;
            return Ok(());
        }

        let offset = self.position();
        if n > self.remaining() {
            return Err(SlurpError::UnexpectedEndOfStream { offset, needed: n });
        }

        // drop the window; the next read fetches from the new position
        self.window.clear();
        self.window_start = offset + n;
        self.window_pos = 0;

        Ok(())
    }

    /// Decode a fixed-size, id-size dependent layout.
    pub(crate) fn parse<T: StatelessParserWithId>(&mut self, id_size: IdSize) -> DecodeResult<T> {
        let offset = self.position();
        let needed = T::encoded_len(id_size);
        let input = self.get(needed)?;

        T::parse(input, id_size)
            .map(|(_, val)| val)
            .map_err(|_: NomError| SlurpError::TruncatedInput {
                offset,
                needed: needed as u64,
            })
    }

    pub fn get_id(&mut self, id_size: IdSize) -> DecodeResult<Id> {
        self.parse::<Id>(id_size)
    }

    primitive_getter!(get_u8, u8, be_u8, le_u8);
    primitive_getter!(get_u16, u16, be_u16, le_u16);
    primitive_getter!(get_u32, u32, be_u32, le_u32);
    primitive_getter!(get_u64, u64, be_u64, le_u64);
    primitive_getter!(get_i8, i8, be_i8, le_i8);
    primitive_getter!(get_i16, i16, be_i16, le_i16);
    primitive_getter!(get_i32, i32, be_i32, le_i32);
    primitive_getter!(get_i64, i64, be_i64, le_i64);
    primitive_getter!(get_f32, f32, be_f32, le_f32);
    primitive_getter!(get_f64, f64, be_f64, le_f64);
}
