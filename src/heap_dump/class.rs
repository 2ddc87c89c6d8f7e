use crate::error::DecodeResult;
use crate::heap_dump::FieldType;
use crate::parsing::StatelessParserWithId;
use crate::*;
use nom::bytes::complete as bytes;

/// What a class dump contributes to size estimates: its own declared instance size and a link
/// to its super class.
#[derive(CopyGetters, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClassInfo {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    /// `None` for java.lang.Object (id 0 in the dump)
    #[get_copy = "pub"]
    super_class_obj_id: Option<Id>,
    /// Bytes of field data for this class only, not counting super classes
    #[get_copy = "pub"]
    instance_size_bytes: u32,
    #[get_copy = "pub"]
    num_instance_fields: u16,
}

impl ClassInfo {
    pub fn new(obj_id: Id, super_class_obj_id: Option<Id>, instance_size_bytes: u32) -> ClassInfo {
        ClassInfo {
            obj_id,
            stack_trace_serial: 0,
            super_class_obj_id,
            instance_size_bytes,
            num_instance_fields: 0,
        }
    }

    pub(crate) fn read<S: ByteSource>(
        reader: &mut WindowedReader<S>,
        id_size: IdSize,
    ) -> DecodeResult<ClassInfo> {
        let mut class = reader.parse::<ClassInfo>(id_size)?;

        // constant pool: index, type, value
        let num_constants = reader.get_u16()?;
        for _ in 0..num_constants {
            reader.skip(2)?;
            let field_type = FieldType::read(reader)?;
            reader.skip(field_type.size_in_bytes(id_size))?;
        }

        // static fields: name id, type, value
        let num_static_fields = reader.get_u16()?;
        for _ in 0..num_static_fields {
            reader.skip(id_size.bytes())?;
            let field_type = FieldType::read(reader)?;
            reader.skip(field_type.size_in_bytes(id_size))?;
        }

        // instance field descriptors: name id, type
        class.num_instance_fields = reader.get_u16()?;
        reader.skip(class.num_instance_fields as u64 * (id_size.bytes() + 1))?;

        Ok(class)
    }
}

impl StatelessParserWithId for ClassInfo {
    fn encoded_len(id_size: IdSize) -> usize {
        7 * id_size.size_in_bytes() + 8
    }

    /// Just the fixed-size start of a class dump, up to and including the instance size
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], ClassInfo> {
        // https://github.com/openjdk/jdk/blob/08822b4e0526fe001c39fe08e241b849eddf481d/src/hotspot/share/services/heapDumper.cpp#L224
        let (input, obj_id) = Id::parse(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, super_class_obj_id) = parse_optional_id(input, id_size)?;
        // class loader, signers, protection domain, 2x reserved
        let (input, _) = bytes::take(5 * id_size.size_in_bytes())(input)?;
        let (input, instance_size_bytes) = number::be_u32(input)?;

        Ok((
            input,
            ClassInfo {
                obj_id,
                stack_trace_serial,
                super_class_obj_id,
                instance_size_bytes,
                num_instance_fields: 0,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SlurpError, TagKind};

    fn id(bytes: &mut Vec<u8>, id: u64) {
        bytes.extend_from_slice(&id.to_be_bytes());
    }

    fn class_dump_body(super_id: u64, instance_size: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        id(&mut bytes, 1000);
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        id(&mut bytes, super_id);
        for _ in 0..5 {
            id(&mut bytes, 0);
        }
        bytes.extend_from_slice(&instance_size.to_be_bytes());
        bytes
    }

    #[test]
    fn reads_class_with_all_tables() {
        let mut bytes = class_dump_body(999, 24);
        // two constants: an int and an object
        bytes.extend_from_slice(&2_u16.to_be_bytes());
        bytes.extend_from_slice(&[0, 1, 0x0A, 0, 0, 0, 7]);
        bytes.extend_from_slice(&[0, 2, 0x02]);
        id(&mut bytes, 5);
        // one static long
        bytes.extend_from_slice(&1_u16.to_be_bytes());
        id(&mut bytes, 6);
        bytes.push(0x0B);
        bytes.extend_from_slice(&[0; 8]);
        // three instance fields
        bytes.extend_from_slice(&3_u16.to_be_bytes());
        for _ in 0..3 {
            id(&mut bytes, 7);
            bytes.push(0x0A);
        }
        bytes.push(0xEE);

        let mut reader = WindowedReader::new(&bytes[..], 10, ByteOrder::Big);
        let class = ClassInfo::read(&mut reader, IdSize::U64).unwrap();

        assert_eq!(Id::from(1000), class.obj_id());
        assert_eq!(Some(Id::from(999)), class.super_class_obj_id());
        assert_eq!(24, class.instance_size_bytes());
        assert_eq!(3, class.num_instance_fields());
        assert_eq!(bytes.len() as u64 - 1, reader.position());
    }

    #[test]
    fn zero_super_class_is_none() {
        let mut bytes = class_dump_body(0, 16);
        bytes.extend_from_slice(&[0; 6]);

        let mut reader = WindowedReader::new(&bytes[..], 1024, ByteOrder::Big);
        let class = ClassInfo::read(&mut reader, IdSize::U64).unwrap();

        assert_eq!(None, class.super_class_obj_id());
        assert!(reader.is_at_end());
    }

    #[test]
    fn bad_static_field_type_is_unsupported() {
        let mut bytes = class_dump_body(0, 16);
        bytes.extend_from_slice(&0_u16.to_be_bytes());
        bytes.extend_from_slice(&1_u16.to_be_bytes());
        id(&mut bytes, 6);
        let type_offset = bytes.len() as u64;
        bytes.push(0x03);
        bytes.extend_from_slice(&[0; 10]);

        let mut reader = WindowedReader::new(&bytes[..], 1024, ByteOrder::Big);
        match ClassInfo::read(&mut reader, IdSize::U64) {
            Err(SlurpError::UnsupportedTag {
                kind: TagKind::ValueType,
                value: 3,
                offset,
            }) => assert_eq!(type_offset, offset),
            other => panic!("unexpected {:?}", other),
        }
    }
}
