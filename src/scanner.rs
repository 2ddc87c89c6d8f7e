//! The top-level record loop.

use crate::aggregate::{Aggregates, Counter, SlurpEntry};
use crate::config::DecoderConfig;
use crate::error::{DecodeResult, SlurpError};
use crate::heap_dump::{SubRecord, SubRecordTag};
use crate::*;
use getset::{CopyGetters, Getters};
use log::{debug, info, trace};
use std::collections;
use std::sync::atomic;
use strum::IntoEnumIterator;

/// Outcome of a successful decode.
#[derive(Debug, Clone, Getters)]
pub struct SlurpResult {
    #[get = "pub"]
    header: Header,
    entries: Vec<SlurpEntry>,
    #[get = "pub"]
    stats: RecordStats,
}

impl SlurpResult {
    /// 4 or 8
    pub fn identifier_size(&self) -> u32 {
        self.header.id_size().size_in_bytes() as u32
    }

    /// In no particular order
    pub fn entries(&self) -> &[SlurpEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SlurpEntry> {
        self.entries
    }

    /// Largest total size first; ties broken by name so output is stable
    pub fn entries_by_total_size(&self) -> Vec<&SlurpEntry> {
        let mut sorted = self.entries.iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| {
            b.total_size_estimate()
                .cmp(&a.total_size_estimate())
                .then_with(|| a.name().cmp(&b.name()))
        });
        sorted
    }

    pub fn total_size_estimate(&self) -> u64 {
        self.entries.iter().map(|e| e.total_size_estimate()).sum()
    }
}

/// Counts of what the scan saw, for summaries.
#[derive(Debug, Clone, CopyGetters)]
pub struct RecordStats {
    records: collections::HashMap<RecordTag, u64>,
    /// Top-level records whose tag isn't in the format
    #[get_copy = "pub"]
    unknown_records: u64,
    sub_records: collections::HashMap<SubRecordTag, u64>,
    #[get_copy = "pub"]
    utf8_strings: u64,
    /// Distinct class ids that LOAD_CLASS bound to a resolvable name
    #[get_copy = "pub"]
    named_classes: u64,
    /// Distinct class dumps
    #[get_copy = "pub"]
    class_dumps: u64,
}

impl RecordStats {
    pub fn record_count(&self, tag: RecordTag) -> u64 {
        self.records.get(&tag).copied().unwrap_or(0)
    }

    pub fn sub_record_count(&self, tag: SubRecordTag) -> u64 {
        self.sub_records.get(&tag).copied().unwrap_or(0)
    }

    /// Every known record tag, including ones that never appeared, in tag byte order
    pub fn record_counts(&self) -> Vec<(RecordTag, u64)> {
        let mut counts = RecordTag::iter()
            .map(|tag| (tag, self.record_count(tag)))
            .collect::<Vec<_>>();
        counts.sort_by_key(|&(tag, _)| tag);
        counts
    }

    /// Every sub-record tag, including ones that never appeared
    pub fn sub_record_counts(&self) -> Vec<(SubRecordTag, u64)> {
        SubRecordTag::iter()
            .map(|tag| (tag, self.sub_record_count(tag)))
            .collect()
    }

    pub fn total_sub_records(&self) -> u64 {
        self.sub_records.values().sum()
    }
}

/// Per-decode mutable state: the string table and everything feeding the aggregation.
struct DecodeContext {
    id_size: IdSize,
    /// UTF8 record id -> text
    strings: collections::HashMap<Id, String>,
    aggregates: Aggregates,
    record_counts: Counter<RecordTag>,
    unknown_records: u64,
    sub_record_counts: Counter<SubRecordTag>,
}

impl DecodeContext {
    fn new(id_size: IdSize) -> DecodeContext {
        DecodeContext {
            id_size,
            strings: collections::HashMap::new(),
            aggregates: Aggregates::default(),
            record_counts: Counter::new(),
            unknown_records: 0,
            sub_record_counts: Counter::new(),
        }
    }

    /// Read the rest of a record whose tag byte (at `record_start`) was already consumed.
    fn read_record<S: ByteSource>(
        &mut self,
        reader: &mut WindowedReader<S>,
        tag_byte: u8,
        record_start: u64,
    ) -> DecodeResult<()> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L76
        let _micros_since_header_ts = reader.get_u32()?;
        let length = reader.get_u32()?;
        let body_start = reader.position();

        let tag = match RecordTag::from_tag_byte(tag_byte) {
            Some(tag) => tag,
            None => {
                trace!(
                    "Skipping unknown record tag {:#X} at {} ({} bytes)",
                    tag_byte,
                    record_start,
                    length
                );
                self.unknown_records += 1;
                return reader.skip(length as u64);
            }
        };

        trace!("{:?} at {} ({} bytes)", tag, record_start, length);
        self.record_counts.increment(tag);

        match tag {
            RecordTag::Utf8 => self.read_utf8(reader, length, record_start)?,
            RecordTag::LoadClass => self.read_load_class(reader)?,
            RecordTag::HeapDump | RecordTag::HeapDumpSegment => {
                return self.read_heap_dump_segment(reader, length, record_start)
            }
            _ => {}
        }

        // skip whatever part of the body we don't need
        let consumed = reader.position() - body_start;
        if consumed > length as u64 {
            return Err(SlurpError::LengthMismatch {
                offset: record_start,
                declared: length,
                consumed,
            });
        }

        reader.skip(length as u64 - consumed)
    }

    fn read_utf8<S: ByteSource>(
        &mut self,
        reader: &mut WindowedReader<S>,
        length: u32,
        record_start: u64,
    ) -> DecodeResult<()> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L88
        let id_len = self.id_size.bytes();
        if (length as u64) < id_len {
            return Err(SlurpError::LengthMismatch {
                offset: record_start,
                declared: length,
                consumed: id_len,
            });
        }

        let name_id = reader.get_id(self.id_size)?;
        // some Utf8 records in the wild aren't valid UTF-8
        let text = String::from_utf8_lossy(reader.get((length as u64 - id_len) as usize)?);
        self.strings.insert(name_id, text.into_owned());

        Ok(())
    }

    fn read_load_class<S: ByteSource>(&mut self, reader: &mut WindowedReader<S>) -> DecodeResult<()> {
        let lc = reader.parse::<LoadClass>(self.id_size)?;

        match self.strings.get(&lc.class_name_id()) {
            Some(name) => self
                .aggregates
                .add_class_name(lc.class_obj_id(), name.clone()),
            None => debug!(
                "No Utf8 record {} for class {}",
                lc.class_name_id(),
                lc.class_obj_id()
            ),
        }

        Ok(())
    }

    /// Sub-records until the declared length is used up exactly.
    ///
    /// A sub-record that can't fit in what's left of the declared length is a framing error. A
    /// source that ends before the declared length is truncated.
    fn read_heap_dump_segment<S: ByteSource>(
        &mut self,
        reader: &mut WindowedReader<S>,
        length: u32,
        record_start: u64,
    ) -> DecodeResult<()> {
        let declared = length as u64;
        let end = reader.position() + declared;
        let mut consumed = 0_u64;
        let mut num_sub_records = 0_u64;

        while consumed < declared {
            match SubRecord::read(reader, self.id_size, end)? {
                Some((sub_record, len)) => {
                    consumed += len;
                    num_sub_records += 1;
                    self.record_sub_record(sub_record);
                }
                None => break,
            }
        }

        if consumed != declared {
            return Err(SlurpError::LengthMismatch {
                offset: record_start,
                declared: length,
                consumed,
            });
        }

        debug!(
            "Heap dump segment at {}: {} bytes in {} sub-records",
            record_start, length, num_sub_records
        );

        Ok(())
    }

    fn record_sub_record(&mut self, sub_record: SubRecord) {
        self.sub_record_counts.increment(sub_record.tag());

        match sub_record {
            SubRecord::Class(class) => self.aggregates.add_class(class),
            SubRecord::Instance(instance) => self.aggregates.add_instance(instance.class_obj_id()),
            SubRecord::ObjectArray(array) => self
                .aggregates
                .add_object_array(array.array_class_obj_id(), array.num_elements()),
            SubRecord::PrimitiveArray(array) => self
                .aggregates
                .add_primitive_array(array.primitive_type(), array.num_elements()),
            SubRecord::GcRoot(_) => {}
        }
    }

    fn into_result(self, header: Header) -> SlurpResult {
        let stats = RecordStats {
            records: self.record_counts.iter().map(|(&t, &c)| (t, c)).collect(),
            unknown_records: self.unknown_records,
            sub_records: self
                .sub_record_counts
                .iter()
                .map(|(&t, &c)| (t, c))
                .collect(),
            utf8_strings: self.strings.len() as u64,
            named_classes: self.aggregates.num_class_names() as u64,
            class_dumps: self.aggregates.num_classes() as u64,
        };

        SlurpResult {
            entries: self.aggregates.into_entries(header.id_size()),
            header,
            stats,
        }
    }
}

/// Decode a whole source: header, then records until the source ends cleanly between records.
pub(crate) fn scan<S: ByteSource>(
    source: S,
    config: &DecoderConfig,
    cancel: Option<&atomic::AtomicBool>,
) -> DecodeResult<SlurpResult> {
    let mut reader = WindowedReader::new(source, config.chunk_size(), ByteOrder::Big);

    let header = Header::read(&mut reader, config.max_header_len())?;
    debug!("Read header {:?}", header);

    let mut ctx = DecodeContext::new(header.id_size());

    loop {
        let record_start = reader.position();

        if cancel.map_or(false, |flag| flag.load(atomic::Ordering::Relaxed)) {
            return Err(SlurpError::Cancelled {
                offset: record_start,
            });
        }

        let tag_byte = match reader.get_u8() {
            Ok(tag_byte) => tag_byte,
            // nothing of a new record has been read, so this is the normal end of the file
            Err(SlurpError::UnexpectedEndOfStream { .. }) => break,
            Err(e) => return Err(e),
        };

        ctx.read_record(&mut reader, tag_byte, record_start)
            .map_err(SlurpError::into_truncated)?;
    }

    let result = ctx.into_result(header);

    info!(
        "Decoded {} bytes: {} entries, {} sub-records, {} window fetches",
        reader.position(),
        result.entries().len(),
        result.stats().total_sub_records(),
        reader.fetches()
    );

    Ok(result)
}
