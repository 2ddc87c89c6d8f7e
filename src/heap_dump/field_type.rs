use crate::error::{DecodeResult, SlurpError, TagKind};
use crate::*;

/// Basic type codes used for constant pool entries, static fields, and instance field
/// descriptors.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum FieldType {
    /// Some writers use a separate code for array references; it's still just an id
    ArrayObject,
    Object,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl FieldType {
    pub fn from_type_code(code: u8) -> Option<FieldType> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L175
        match code {
            0x01 => Some(FieldType::ArrayObject),
            0x02 => Some(FieldType::Object),
            0x04 => Some(FieldType::Boolean),
            0x05 => Some(FieldType::Char),
            0x06 => Some(FieldType::Float),
            0x07 => Some(FieldType::Double),
            0x08 => Some(FieldType::Byte),
            0x09 => Some(FieldType::Short),
            0x0A => Some(FieldType::Int),
            0x0B => Some(FieldType::Long),
            _ => None,
        }
    }

    /// Size of one value of this type
    pub fn size_in_bytes(&self, id_size: IdSize) -> u64 {
        match self {
            FieldType::ArrayObject | FieldType::Object => id_size.bytes(),
            FieldType::Boolean | FieldType::Byte => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Float | FieldType::Int => 4,
            FieldType::Double | FieldType::Long => 8,
        }
    }

    /// Read a type code byte, failing on codes we can't size
    pub(crate) fn read<S: ByteSource>(reader: &mut WindowedReader<S>) -> DecodeResult<FieldType> {
        let offset = reader.position();
        let code = reader.get_u8()?;

        FieldType::from_type_code(code).ok_or(SlurpError::UnsupportedTag {
            kind: TagKind::ValueType,
            value: code as u32,
            offset,
        })
    }
}
