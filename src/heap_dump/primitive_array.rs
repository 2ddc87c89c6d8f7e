use crate::error::{DecodeResult, SlurpError, TagKind};
use crate::heap_dump::FieldType;
use crate::parsing::StatelessParserWithId;
use crate::*;

/// A primitive array's header. The contents are skipped.
#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct PrimitiveArray {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    primitive_type: PrimitiveArrayType,
    #[get_copy = "pub"]
    num_elements: u32,
}

/// The fixed part, before the element type has been validated
struct RawHeader {
    obj_id: Id,
    stack_trace_serial: Serial,
    num_elements: u32,
    type_code: u8,
}

impl StatelessParserWithId for RawHeader {
    fn encoded_len(id_size: IdSize) -> usize {
        id_size.size_in_bytes() + 9
    }

    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], RawHeader> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L279
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, num_elements) = number::be_u32(input)?;
        let (input, type_code) = number::be_u8(input)?;

        Ok((
            input,
            RawHeader {
                obj_id,
                stack_trace_serial,
                num_elements,
                type_code,
            },
        ))
    }
}

impl PrimitiveArray {
    /// Length of everything before the contents
    pub fn header_len(id_size: IdSize) -> u64 {
        RawHeader::encoded_len(id_size) as u64
    }

    /// Length of the element data following the header
    pub fn contents_len(&self) -> u64 {
        self.num_elements as u64 * self.primitive_type.size_in_bytes()
    }

    /// Read the header, leaving the reader at the start of the contents.
    pub(crate) fn read_header<S: ByteSource>(
        reader: &mut WindowedReader<S>,
        id_size: IdSize,
    ) -> DecodeResult<PrimitiveArray> {
        let start = reader.position();
        let raw = reader.parse::<RawHeader>(id_size)?;

        let primitive_type = PrimitiveArrayType::from_type_code(raw.type_code).ok_or(
            SlurpError::UnsupportedTag {
                kind: TagKind::ValueType,
                value: raw.type_code as u32,
                // the type code is the last byte of the header
                offset: start + RawHeader::encoded_len(id_size) as u64 - 1,
            },
        )?;

        Ok(PrimitiveArray {
            obj_id: raw.obj_id,
            stack_trace_serial: raw.stack_trace_serial,
            primitive_type,
            num_elements: raw.num_elements,
        })
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum PrimitiveArrayType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl PrimitiveArrayType {
    /// `None` for unknown codes and for object references, which aren't primitive
    pub fn from_type_code(code: u8) -> Option<PrimitiveArrayType> {
        match FieldType::from_type_code(code)? {
            FieldType::Boolean => Some(PrimitiveArrayType::Boolean),
            FieldType::Char => Some(PrimitiveArrayType::Char),
            FieldType::Float => Some(PrimitiveArrayType::Float),
            FieldType::Double => Some(PrimitiveArrayType::Double),
            FieldType::Byte => Some(PrimitiveArrayType::Byte),
            FieldType::Short => Some(PrimitiveArrayType::Short),
            FieldType::Int => Some(PrimitiveArrayType::Int),
            FieldType::Long => Some(PrimitiveArrayType::Long),
            FieldType::ArrayObject | FieldType::Object => None,
        }
    }

    pub fn size_in_bytes(&self) -> u64 {
        match self {
            PrimitiveArrayType::Boolean | PrimitiveArrayType::Byte => 1,
            PrimitiveArrayType::Char | PrimitiveArrayType::Short => 2,
            PrimitiveArrayType::Float | PrimitiveArrayType::Int => 4,
            PrimitiveArrayType::Double | PrimitiveArrayType::Long => 8,
        }
    }

    pub fn java_type_name(&self) -> &'static str {
        match self {
            PrimitiveArrayType::Boolean => "boolean",
            PrimitiveArrayType::Char => "char",
            PrimitiveArrayType::Float => "float",
            PrimitiveArrayType::Double => "double",
            PrimitiveArrayType::Byte => "byte",
            PrimitiveArrayType::Short => "short",
            PrimitiveArrayType::Int => "int",
            PrimitiveArrayType::Long => "long",
        }
    }

    /// JVM type descriptor of an array of this type, e.g. `[I`
    pub fn array_descriptor(&self) -> &'static str {
        match self {
            PrimitiveArrayType::Boolean => "[Z",
            PrimitiveArrayType::Char => "[C",
            PrimitiveArrayType::Float => "[F",
            PrimitiveArrayType::Double => "[D",
            PrimitiveArrayType::Byte => "[B",
            PrimitiveArrayType::Short => "[S",
            PrimitiveArrayType::Int => "[I",
            PrimitiveArrayType::Long => "[J",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_bytes(type_code: u8, num_elements: u32, content_len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&42_u32.to_be_bytes());
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        bytes.extend_from_slice(&num_elements.to_be_bytes());
        bytes.push(type_code);
        bytes.extend(std::iter::repeat(0).take(content_len));
        bytes
    }

    #[test]
    fn contents_len_by_element_size() {
        let bytes = array_bytes(0x0A, 3, 12);
        let mut reader = WindowedReader::new(&bytes[..], 4, ByteOrder::Big);

        let pa = PrimitiveArray::read_header(&mut reader, IdSize::U32).unwrap();
        assert_eq!(PrimitiveArrayType::Int, pa.primitive_type());
        assert_eq!(3, pa.num_elements());
        assert_eq!(Id::from(42), pa.obj_id());
        assert_eq!(PrimitiveArray::header_len(IdSize::U32), reader.position());
        assert_eq!(12, pa.contents_len());
    }

    #[test]
    fn object_type_is_not_primitive() {
        let bytes = array_bytes(0x02, 1, 4);
        let mut reader = WindowedReader::new(&bytes[..], 64, ByteOrder::Big);

        match PrimitiveArray::read_header(&mut reader, IdSize::U32) {
            Err(SlurpError::UnsupportedTag {
                kind: TagKind::ValueType,
                value: 2,
                offset: 12,
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn truncated_header() {
        let bytes = array_bytes(0x0B, 2, 0);
        let mut reader = WindowedReader::new(&bytes[..bytes.len() - 1], 64, ByteOrder::Big);

        assert!(matches!(
            PrimitiveArray::read_header(&mut reader, IdSize::U32),
            Err(SlurpError::UnexpectedEndOfStream { needed: 13, .. })
        ));
    }

    #[test]
    fn descriptors() {
        assert_eq!("[I", PrimitiveArrayType::Int.array_descriptor());
        assert_eq!("[J", PrimitiveArrayType::Long.array_descriptor());
        assert_eq!("[Z", PrimitiveArrayType::Boolean.array_descriptor());
        assert_eq!("char", PrimitiveArrayType::Char.java_type_name());
    }
}
