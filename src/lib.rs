//! Streaming per-class memory summaries for JVM hprof heap dumps.
//!
//! The whole dump is never held in memory: the file is read through a single bounded window, and
//! only per-class tallies are kept while scanning. Once the scan reaches the end of the file the
//! tallies are turned into [SlurpEntry] size estimates.
//!
//! ```no_run
//! let result = jvm_hprof_slurp::decode_file("heap.hprof").unwrap();
//! for entry in result.entries_by_total_size().iter().take(10) {
//!     println!("{:?} {} {}", entry.name(), entry.count(), entry.total_size_estimate());
//! }
//! ```

use chrono::{DateTime, TimeZone, Utc};
use getset::CopyGetters;
use nom::number::complete as number;
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt::{Error, Formatter};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::{cmp, fmt, fs, path};
use strum_macros::EnumIter;

mod aggregate;
mod config;
mod error;
pub mod heap_dump;
mod parsing;
mod reader;
mod scanner;

pub use aggregate::{EntryKind, SlurpEntry};
pub use config::{DecoderConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEADER_LEN};
pub use error::{DecodeResult, SlurpError, TagKind};
pub use reader::{ByteOrder, ByteSource, SeekableSource, WindowedReader};
pub use scanner::{RecordStats, SlurpResult};

use parsing::StatelessParserWithId;

#[derive(CopyGetters, Copy, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Id {
    // 4-byte ids are inflated to 8 bytes; the tables are keyed the same way either way
    #[get_copy = "pub"]
    id: u64,
}

impl Id {
    /// Zero is never a real object
    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

impl From<u64> for Id {
    fn from(id: u64) -> Self {
        Id { id }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.id)
    }
}

impl fmt::UpperHex for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        fmt::UpperHex::fmt(&self.id, f)
    }
}

pub type Serial = u32;

impl StatelessParserWithId for Id {
    fn encoded_len(id_size: IdSize) -> usize {
        id_size.size_in_bytes()
    }

    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Self> {
        let (input, id) = match id_size {
            IdSize::U32 => number::be_u32(input).map(|(i, id)| (i, id as u64))?,
            IdSize::U64 => number::be_u64(input)?,
        };

        Ok((input, Id { id }))
    }
}

/// Parse an id whose value 0 means "none"
pub(crate) fn parse_optional_id(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Option<Id>> {
    let (input, id) = Id::parse(input, id_size)?;
    Ok((input, if id.is_null() { None } else { Some(id) }))
}

/// Width of every identifier in a dump, fixed by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSize {
    U32,
    U64,
}

impl IdSize {
    pub fn from_num(num: u32) -> Option<IdSize> {
        match num {
            4 => Some(IdSize::U32),
            8 => Some(IdSize::U64),
            _ => None,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            IdSize::U32 => 4,
            IdSize::U64 => 8,
        }
    }

    /// Size in bytes, for size arithmetic
    pub(crate) fn bytes(&self) -> u64 {
        self.size_in_bytes() as u64
    }
}

// https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp

#[derive(CopyGetters, Clone)]
pub struct Header {
    label: Vec<u8>,
    #[get_copy = "pub"]
    id_size: IdSize,
    /// The timestamp for the hprof as the number of millis since epoch
    #[get_copy = "pub"]
    timestamp_millis: u64,
}

impl Header {
    pub fn label(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.label)
    }

    /// `None` if the millis don't fit a `DateTime`
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp_millis)
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    fn read<S: ByteSource>(
        reader: &mut WindowedReader<S>,
        max_label_len: usize,
    ) -> DecodeResult<Header> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L63
        let mut label = Vec::new();
        loop {
            let b = match reader.get_u8() {
                Ok(b) => b,
                Err(SlurpError::UnexpectedEndOfStream { .. }) => {
                    return Err(SlurpError::MalformedHeader {
                        max_len: max_label_len,
                    })
                }
                Err(e) => return Err(e),
            };

            if b == 0 {
                break;
            }

            if label.len() == max_label_len {
                return Err(SlurpError::MalformedHeader {
                    max_len: max_label_len,
                });
            }

            label.push(b);
        }

        let id_size_offset = reader.position();
        let id_size_num = reader.get_u32().map_err(SlurpError::into_truncated)?;
        let id_size = IdSize::from_num(id_size_num).ok_or(SlurpError::UnsupportedTag {
            kind: TagKind::IdSize,
            value: id_size_num,
            offset: id_size_offset,
        })?;

        let timestamp_millis = reader.get_u64().map_err(SlurpError::into_truncated)?;

        Ok(Header {
            label,
            id_size,
            timestamp_millis,
        })
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_struct("Header")
            .field("label", &self.label())
            .field("timestamp_millis", &self.timestamp_millis())
            .field("id_size", &self.id_size())
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter)]
pub enum RecordTag {
    Utf8,
    LoadClass,
    UnloadClass,
    StackFrame,
    StackTrace,
    AllocSites,
    StartThread,
    EndThread,
    HeapSummary,
    HeapDump,
    CpuSamples,
    ControlSettings,
    HeapDumpSegment,
    HeapDumpEnd,
}

impl RecordTag {
    pub fn from_tag_byte(tag: u8) -> Option<RecordTag> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L76
        match tag {
            0x01 => Some(RecordTag::Utf8),
            0x02 => Some(RecordTag::LoadClass),
            0x03 => Some(RecordTag::UnloadClass),
            0x04 => Some(RecordTag::StackFrame),
            0x05 => Some(RecordTag::StackTrace),
            0x06 => Some(RecordTag::AllocSites),
            0x07 => Some(RecordTag::HeapSummary),
            0x0A => Some(RecordTag::StartThread),
            0x0B => Some(RecordTag::EndThread),
            0x0C => Some(RecordTag::HeapDump),
            0x0D => Some(RecordTag::CpuSamples),
            0x0E => Some(RecordTag::ControlSettings),
            0x1C => Some(RecordTag::HeapDumpSegment),
            0x2C => Some(RecordTag::HeapDumpEnd),
            _ => None,
        }
    }

    pub fn tag_byte(&self) -> u8 {
        match self {
            RecordTag::Utf8 => 0x01,
            RecordTag::LoadClass => 0x02,
            RecordTag::UnloadClass => 0x03,
            RecordTag::StackFrame => 0x04,
            RecordTag::StackTrace => 0x05,
            RecordTag::AllocSites => 0x06,
            RecordTag::HeapSummary => 0x07,
            RecordTag::StartThread => 0x0A,
            RecordTag::EndThread => 0x0B,
            RecordTag::HeapDump => 0x0C,
            RecordTag::CpuSamples => 0x0D,
            RecordTag::ControlSettings => 0x0E,
            RecordTag::HeapDumpSegment => 0x1C,
            RecordTag::HeapDumpEnd => 0x2C,
        }
    }
}

impl cmp::Ord for RecordTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag_byte().cmp(&other.tag_byte())
    }
}

impl cmp::PartialOrd for RecordTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Fixed-layout body of a LOAD_CLASS record
#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct LoadClass {
    #[get_copy = "pub"]
    class_serial: Serial,
    #[get_copy = "pub"]
    class_obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    class_name_id: Id,
}

impl StatelessParserWithId for LoadClass {
    fn encoded_len(id_size: IdSize) -> usize {
        2 * id_size.size_in_bytes() + 8
    }

    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], LoadClass> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L93
        let (input, class_serial) = number::be_u32(input)?;
        let (input, class_obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, class_name_id) = Id::parse(input, id_size)?;

        Ok((
            input,
            LoadClass {
                class_serial,
                class_obj_id,
                stack_trace_serial,
                class_name_id,
            },
        ))
    }
}

/// Decodes hprof sources into [SlurpResult]s.
///
/// A decoder holds no per-file state, so one can be shared across threads decoding different
/// files.
#[derive(Clone, Debug, Default)]
pub struct Decoder {
    config: DecoderConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Decoder {
        Decoder {
            config,
            cancel: None,
        }
    }

    /// Once `flag` is set, the decode stops at the next top-level record with
    /// [SlurpError::Cancelled].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Decoder {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn decode<S: ByteSource>(&self, source: S) -> DecodeResult<SlurpResult> {
        scanner::scan(source, &self.config, self.cancel.as_deref())
    }

    pub fn decode_file<P: AsRef<path::Path>>(&self, path: P) -> DecodeResult<SlurpResult> {
        let source = fs::File::open(path)
            .and_then(SeekableSource::new)
            .map_err(|source| SlurpError::Io { offset: 0, source })?;

        self.decode(source)
    }
}

/// Decode with the default configuration.
pub fn decode<S: ByteSource>(source: S) -> DecodeResult<SlurpResult> {
    Decoder::default().decode(source)
}

/// Decode a file on disk with the default configuration.
pub fn decode_file<P: AsRef<path::Path>>(path: P) -> DecodeResult<SlurpResult> {
    Decoder::default().decode_file(path)
}
