#![allow(dead_code)]

//! Writes synthetic hprof files for tests.

pub const LABEL: &[u8] = b"JAVA PROFILE 1.0.2";
pub const TIMESTAMP_MILLIS: u64 = 1_600_000_000_000;

pub const UTF8: u8 = 0x01;
pub const LOAD_CLASS: u8 = 0x02;
pub const STACK_TRACE: u8 = 0x05;
pub const HEAP_DUMP: u8 = 0x0C;
pub const HEAP_DUMP_SEGMENT: u8 = 0x1C;
pub const HEAP_DUMP_END: u8 = 0x2C;

pub const INT: u8 = 0x0A;
pub const BYTE: u8 = 0x08;
pub const LONG: u8 = 0x0B;
pub const OBJECT: u8 = 0x02;

fn push_id(bytes: &mut Vec<u8>, id_size: u32, id: u64) {
    match id_size {
        4 => bytes.extend_from_slice(&(id as u32).to_be_bytes()),
        _ => bytes.extend_from_slice(&id.to_be_bytes()),
    }
}

/// A whole file: header then top-level records.
pub struct HprofBuilder {
    id_size: u32,
    bytes: Vec<u8>,
}

impl HprofBuilder {
    pub fn new(id_size: u32) -> HprofBuilder {
        HprofBuilder::with_header(LABEL, id_size, TIMESTAMP_MILLIS)
    }

    /// `id_size` is written as is, so unsupported sizes can be tested
    pub fn with_header(label: &[u8], id_size: u32, timestamp_millis: u64) -> HprofBuilder {
        let mut bytes = label.to_vec();
        bytes.push(0);
        bytes.extend_from_slice(&id_size.to_be_bytes());
        bytes.extend_from_slice(&timestamp_millis.to_be_bytes());

        HprofBuilder { id_size, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn segment(&self) -> SegmentBuilder {
        SegmentBuilder {
            id_size: self.id_size,
            bytes: Vec::new(),
        }
    }

    pub fn record(self, tag: u8, body: &[u8]) -> HprofBuilder {
        let len = body.len() as u32;
        self.record_with_len(tag, len, body)
    }

    /// A record whose length field doesn't have to match its body
    pub fn record_with_len(mut self, tag: u8, declared_len: u32, body: &[u8]) -> HprofBuilder {
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&0_u32.to_be_bytes());
        self.bytes.extend_from_slice(&declared_len.to_be_bytes());
        self.bytes.extend_from_slice(body);
        self
    }

    pub fn utf8(self, id: u64, text: &str) -> HprofBuilder {
        let mut body = Vec::new();
        push_id(&mut body, self.id_size, id);
        body.extend_from_slice(text.as_bytes());
        self.record(UTF8, &body)
    }

    pub fn load_class(self, class_obj_id: u64, name_id: u64) -> HprofBuilder {
        let mut body = Vec::new();
        body.extend_from_slice(&1_u32.to_be_bytes());
        push_id(&mut body, self.id_size, class_obj_id);
        body.extend_from_slice(&0_u32.to_be_bytes());
        push_id(&mut body, self.id_size, name_id);
        self.record(LOAD_CLASS, &body)
    }

    /// UTF8 and LOAD_CLASS records, reusing the class id as the string id
    pub fn named_class(self, class_obj_id: u64, name: &str) -> HprofBuilder {
        self.utf8(class_obj_id, name)
            .load_class(class_obj_id, class_obj_id)
    }

    pub fn heap_dump_segment(self, segment: SegmentBuilder) -> HprofBuilder {
        self.record(HEAP_DUMP_SEGMENT, &segment.bytes)
    }

    pub fn heap_dump(self, segment: SegmentBuilder) -> HprofBuilder {
        self.record(HEAP_DUMP, &segment.bytes)
    }

    pub fn heap_dump_end(self) -> HprofBuilder {
        self.record(HEAP_DUMP_END, &[])
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Sub-records for one heap dump (segment) record.
pub struct SegmentBuilder {
    id_size: u32,
    bytes: Vec<u8>,
}

impl SegmentBuilder {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn id(&mut self, id: u64) {
        push_id(&mut self.bytes, self.id_size, id);
    }

    fn u32(&mut self, n: u32) {
        self.bytes.extend_from_slice(&n.to_be_bytes());
    }

    fn u16(&mut self, n: u16) {
        self.bytes.extend_from_slice(&n.to_be_bytes());
    }

    /// No constants or statics; one int instance field
    pub fn class_dump(mut self, class_obj_id: u64, super_class_id: u64, instance_size: u32) -> Self {
        self.bytes.push(0x20);
        self.id(class_obj_id);
        self.u32(0);
        self.id(super_class_id);
        // loader, signers, protection domain, 2x reserved
        for _ in 0..5 {
            self.id(0);
        }
        self.u32(instance_size);
        self.u16(0);
        self.u16(0);
        self.u16(1);
        self.id(99);
        self.bytes.push(INT);
        self
    }

    /// One int constant and one long static, to exercise the variable parts
    pub fn class_dump_with_statics(
        mut self,
        class_obj_id: u64,
        super_class_id: u64,
        instance_size: u32,
    ) -> Self {
        self.bytes.push(0x20);
        self.id(class_obj_id);
        self.u32(0);
        self.id(super_class_id);
        for _ in 0..5 {
            self.id(0);
        }
        self.u32(instance_size);
        self.u16(1);
        self.u16(3);
        self.bytes.push(INT);
        self.u32(17);
        self.u16(1);
        self.id(98);
        self.bytes.push(LONG);
        self.bytes.extend_from_slice(&[0; 8]);
        self.u16(0);
        self
    }

    pub fn instance(mut self, obj_id: u64, class_obj_id: u64, fields_len: u32) -> Self {
        self.bytes.push(0x21);
        self.id(obj_id);
        self.u32(0);
        self.id(class_obj_id);
        self.u32(fields_len);
        self.bytes
            .extend(std::iter::repeat(0xAB).take(fields_len as usize));
        self
    }

    pub fn object_array(mut self, obj_id: u64, array_class_obj_id: u64, num_elements: u32) -> Self {
        self.bytes.push(0x22);
        self.id(obj_id);
        self.u32(0);
        self.u32(num_elements);
        self.id(array_class_obj_id);
        for i in 0..num_elements {
            self.id(i as u64 + 1);
        }
        self
    }

    pub fn primitive_array(mut self, obj_id: u64, type_code: u8, elem_size: usize, num_elements: u32) -> Self {
        self.bytes.push(0x23);
        self.id(obj_id);
        self.u32(0);
        self.u32(num_elements);
        self.bytes.push(type_code);
        self.bytes
            .extend(std::iter::repeat(0).take(elem_size * num_elements as usize));
        self
    }

    /// A GC root of the given tag, with a body of the size that tag requires
    pub fn root(mut self, tag: u8, obj_id: u64) -> Self {
        self.bytes.push(tag);
        self.id(obj_id);
        match tag {
            0xFF | 0x05 | 0x07 => {}
            0x01 => self.id(0),
            0x02 | 0x03 | 0x08 => self.bytes.extend_from_slice(&[0; 8]),
            0x04 | 0x06 => self.bytes.extend_from_slice(&[0; 4]),
            _ => panic!("not a root tag: {:#X}", tag),
        }
        self
    }

    /// Arbitrary trailing bytes
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }
}
