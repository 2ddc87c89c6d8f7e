//! Sub-records found inside HEAP_DUMP and HEAP_DUMP_SEGMENT records.
//!
//! Sub-records are not length-prefixed, so every one of them has to be understood well enough to
//! know where it ends. Only the fields needed for per-class tallies are kept; everything else is
//! skipped.

use crate::error::{DecodeResult, SlurpError, TagKind};
use crate::parsing::StatelessParserWithId;
use crate::*;
use strum_macros::EnumIter;

mod class;
mod field_type;
mod primitive_array;

pub use class::ClassInfo;
pub use field_type::FieldType;
pub use primitive_array::{PrimitiveArray, PrimitiveArrayType};

#[derive(Clone, Debug)]
pub enum SubRecord {
    GcRoot(GcRoot),
    Class(ClassInfo),
    Instance(Instance),
    ObjectArray(ObjectArray),
    PrimitiveArray(PrimitiveArray),
}

impl SubRecord {
    pub fn tag(&self) -> SubRecordTag {
        match self {
            SubRecord::GcRoot(root) => root.tag(),
            SubRecord::Class(_) => SubRecordTag::ClassDump,
            SubRecord::Instance(_) => SubRecordTag::InstanceDump,
            SubRecord::ObjectArray(_) => SubRecordTag::ObjectArrayDump,
            SubRecord::PrimitiveArray(_) => SubRecordTag::PrimitiveArrayDump,
        }
    }

    /// Decode the sub-record at the reader's position, which must end by the absolute offset
    /// `end`.
    ///
    /// Returns the sub-record and the number of bytes it occupied, tag byte included, or `None`
    /// when the sub-record can't fit before `end`. Only the tag and fixed-size fields are read
    /// before deciding that, so a bad length never causes the next record's bytes to be parsed
    /// as a sub-record.
    pub(crate) fn read<S: ByteSource>(
        reader: &mut WindowedReader<S>,
        id_size: IdSize,
        end: u64,
    ) -> DecodeResult<Option<(SubRecord, u64)>> {
        let start = reader.position();
        // nothing is shorter than a tag and one id
        if start + 1 + id_size.bytes() > end {
            return Ok(None);
        }

        let tag_byte = reader.get_u8()?;
        let tag = SubRecordTag::from_tag_byte(tag_byte).ok_or(SlurpError::UnsupportedTag {
            kind: TagKind::SubRecord,
            value: tag_byte as u32,
            offset: start,
        })?;

        if reader.position() + tag.min_body_len(id_size) > end {
            return Ok(None);
        }

        let record = match tag {
            SubRecordTag::ClassDump => SubRecord::Class(ClassInfo::read(reader, id_size)?),
            SubRecordTag::InstanceDump => {
                let instance = reader.parse::<Instance>(id_size)?;
                if !skip_within(reader, instance.fields_len as u64, end)? {
                    return Ok(None);
                }
                SubRecord::Instance(instance)
            }
            SubRecordTag::ObjectArrayDump => {
                let array = reader.parse::<ObjectArray>(id_size)?;
                // element ids
                if !skip_within(reader, array.num_elements as u64 * id_size.bytes(), end)? {
                    return Ok(None);
                }
                SubRecord::ObjectArray(array)
            }
            SubRecordTag::PrimitiveArrayDump => {
                let array = PrimitiveArray::read_header(reader, id_size)?;
                if !skip_within(reader, array.contents_len(), end)? {
                    return Ok(None);
                }
                SubRecord::PrimitiveArray(array)
            }
            root_tag => {
                reader.skip(root_tag.min_body_len(id_size))?;
                SubRecord::GcRoot(GcRoot { tag: root_tag })
            }
        };

        // class dumps are only checked once their tables have been walked
        if reader.position() > end {
            return Ok(None);
        }

        Ok(Some((record, reader.position() - start)))
    }
}

/// Skip `len` bytes unless that would go past `end`.
fn skip_within<S: ByteSource>(
    reader: &mut WindowedReader<S>,
    len: u64,
    end: u64,
) -> DecodeResult<bool> {
    if reader.position() + len > end {
        return Ok(false);
    }

    reader.skip(len)?;
    Ok(true)
}

// https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L150
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum SubRecordTag {
    RootUnknown,
    RootJniGlobal,
    RootJniLocal,
    RootJavaFrame,
    RootNativeStack,
    RootStickyClass,
    RootThreadBlock,
    RootMonitorUsed,
    RootThreadObject,
    ClassDump,
    InstanceDump,
    ObjectArrayDump,
    PrimitiveArrayDump,
}

impl SubRecordTag {
    pub fn from_tag_byte(tag: u8) -> Option<SubRecordTag> {
        match tag {
            0xFF => Some(SubRecordTag::RootUnknown),
            0x01 => Some(SubRecordTag::RootJniGlobal),
            0x02 => Some(SubRecordTag::RootJniLocal),
            0x03 => Some(SubRecordTag::RootJavaFrame),
            0x04 => Some(SubRecordTag::RootNativeStack),
            0x05 => Some(SubRecordTag::RootStickyClass),
            0x06 => Some(SubRecordTag::RootThreadBlock),
            0x07 => Some(SubRecordTag::RootMonitorUsed),
            0x08 => Some(SubRecordTag::RootThreadObject),
            0x20 => Some(SubRecordTag::ClassDump),
            0x21 => Some(SubRecordTag::InstanceDump),
            0x22 => Some(SubRecordTag::ObjectArrayDump),
            0x23 => Some(SubRecordTag::PrimitiveArrayDump),
            _ => None,
        }
    }

    pub fn tag_byte(&self) -> u8 {
        match self {
            SubRecordTag::RootUnknown => 0xFF,
            SubRecordTag::RootJniGlobal => 0x01,
            SubRecordTag::RootJniLocal => 0x02,
            SubRecordTag::RootJavaFrame => 0x03,
            SubRecordTag::RootNativeStack => 0x04,
            SubRecordTag::RootStickyClass => 0x05,
            SubRecordTag::RootThreadBlock => 0x06,
            SubRecordTag::RootMonitorUsed => 0x07,
            SubRecordTag::RootThreadObject => 0x08,
            SubRecordTag::ClassDump => 0x20,
            SubRecordTag::InstanceDump => 0x21,
            SubRecordTag::ObjectArrayDump => 0x22,
            SubRecordTag::PrimitiveArrayDump => 0x23,
        }
    }

    /// Bytes after the tag that every sub-record of this kind has. For GC roots that is the whole
    /// body.
    pub fn min_body_len(&self, id_size: IdSize) -> u64 {
        let id = id_size.bytes();
        match self {
            // obj id
            SubRecordTag::RootUnknown
            | SubRecordTag::RootStickyClass
            | SubRecordTag::RootMonitorUsed => id,
            // obj id, jni global ref id
            SubRecordTag::RootJniGlobal => 2 * id,
            // obj id, thread serial, frame index
            SubRecordTag::RootJniLocal | SubRecordTag::RootJavaFrame => id + 8,
            // obj id, thread serial
            SubRecordTag::RootNativeStack | SubRecordTag::RootThreadBlock => id + 4,
            // thread obj id, thread serial, stack trace serial
            SubRecordTag::RootThreadObject => id + 8,
            // plus the three table counts
            SubRecordTag::ClassDump => ClassInfo::encoded_len(id_size) as u64 + 6,
            SubRecordTag::InstanceDump => Instance::encoded_len(id_size) as u64,
            SubRecordTag::ObjectArrayDump => ObjectArray::encoded_len(id_size) as u64,
            SubRecordTag::PrimitiveArrayDump => PrimitiveArray::header_len(id_size),
        }
    }
}

/// A GC root. Only the kind is kept; roots matter here only for byte accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcRoot {
    tag: SubRecordTag,
}

impl GcRoot {
    pub fn tag(&self) -> SubRecordTag {
        self.tag
    }
}

#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct Instance {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    class_obj_id: Id,
    /// Length of the (skipped) field values
    #[get_copy = "pub"]
    fields_len: u32,
}

impl StatelessParserWithId for Instance {
    fn encoded_len(id_size: IdSize) -> usize {
        2 * id_size.size_in_bytes() + 8
    }

    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Instance> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L260
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, class_obj_id) = Id::parse(input, id_size)?;
        let (input, fields_len) = number::be_u32(input)?;

        Ok((
            input,
            Instance {
                obj_id,
                stack_trace_serial,
                class_obj_id,
                fields_len,
            },
        ))
    }
}


#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct ObjectArray {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    num_elements: u32,
    #[get_copy = "pub"]
    array_class_obj_id: Id,
}

impl StatelessParserWithId for ObjectArray {
    fn encoded_len(id_size: IdSize) -> usize {
        2 * id_size.size_in_bytes() + 8
    }

    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], ObjectArray> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L268
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, num_elements) = number::be_u32(input)?;
        let (input, array_class_obj_id) = Id::parse(input, id_size)?;

        Ok((
            input,
            ObjectArray {
                obj_id,
                stack_trace_serial,
                num_elements,
                array_class_obj_id,
            },
        ))
    }
}
