//! Per-class tallies gathered during the scan, and the size estimates derived from them.
//!
//! The estimates follow the usual JVM object layout (a header of one id plus a 4-byte word,
//! field data, everything padded to the id width) but they're only estimates: the dump doesn't
//! say how the VM actually laid things out.

use crate::heap_dump::{ClassInfo, PrimitiveArrayType};
use crate::{Id, IdSize};
use getset::CopyGetters;
use log::debug;
use std::{borrow, collections, hash};

/// A convenience wrapper around a HashMap<K, u64>.
#[derive(Debug, Clone)]
pub(crate) struct Counter<K> {
    counts: collections::HashMap<K, u64>,
}

impl<K: Eq + hash::Hash> Counter<K> {
    pub(crate) fn new() -> Counter<K> {
        Counter {
            counts: collections::HashMap::new(),
        }
    }

    pub(crate) fn increment(&mut self, key: K) {
        self.add(key, 1);
    }

    pub(crate) fn add(&mut self, key: K, amount: u64) {
        *self.counts.entry(key).or_insert(0) += amount;
    }

    #[allow(unused)] // used in tests
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<u64>
    where
        K: borrow::Borrow<Q>,
        Q: hash::Hash + Eq + ?Sized,
    {
        self.counts.get(key).copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &u64)> {
        self.counts.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }
}

impl<K: Eq + hash::Hash> Default for Counter<K> {
    fn default() -> Self {
        Counter::new()
    }
}

/// Tally for one kind of array
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, CopyGetters)]
pub(crate) struct ArrayCounter {
    #[get_copy = "pub"]
    count: u64,
    #[get_copy = "pub"]
    elem_count: u64,
    #[get_copy = "pub"]
    max_count: u32,
}

impl ArrayCounter {
    pub(crate) fn add_array(&mut self, num_elements: u32) {
        self.count += 1;
        self.elem_count += num_elements as u64;
        self.max_count = self.max_count.max(num_elements);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum EntryKind {
    #[strum(serialize = "instance")]
    Instance,
    #[strum(serialize = "object array")]
    ObjectArray,
    #[strum(serialize = "primitive array")]
    PrimitiveArray,
}

/// Aggregated statistics for one class, object array class, or primitive array type.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters)]
pub struct SlurpEntry {
    #[get_copy = "pub"]
    kind: EntryKind,
    name: Option<String>,
    #[get_copy = "pub"]
    count: u64,
    #[get_copy = "pub"]
    total_size_estimate: u64,
    #[get_copy = "pub"]
    largest_size_estimate: u64,
}

impl SlurpEntry {
    /// `None` when the dump had no LOAD_CLASS / UTF8 pair for the class
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn round_up(size: u64, multiple: u64) -> u64 {
    (size + multiple - 1) / multiple * multiple
}

/// Everything accumulated during a scan that feeds the final entries.
///
/// Tables only grow while scanning; [Aggregates::into_entries] consumes them once at the end.
#[derive(Debug, Default)]
pub(crate) struct Aggregates {
    classes: collections::HashMap<Id, ClassInfo>,
    class_names: collections::HashMap<Id, String>,
    instance_counts: Counter<Id>,
    object_arrays: collections::HashMap<Id, ArrayCounter>,
    primitive_arrays: collections::HashMap<PrimitiveArrayType, ArrayCounter>,
}

impl Aggregates {
    pub(crate) fn add_class_name(&mut self, class_obj_id: Id, name: String) {
        self.class_names.insert(class_obj_id, name);
    }

    pub(crate) fn add_class(&mut self, class: ClassInfo) {
        self.classes.insert(class.obj_id(), class);
    }

    pub(crate) fn add_instance(&mut self, class_obj_id: Id) {
        self.instance_counts.increment(class_obj_id);
    }

    pub(crate) fn add_object_array(&mut self, array_class_obj_id: Id, num_elements: u32) {
        self.object_arrays
            .entry(array_class_obj_id)
            .or_default()
            .add_array(num_elements);
    }

    pub(crate) fn add_primitive_array(&mut self, prim_type: PrimitiveArrayType, num_elements: u32) {
        self.primitive_arrays
            .entry(prim_type)
            .or_default()
            .add_array(num_elements);
    }

    pub(crate) fn num_class_names(&self) -> usize {
        self.class_names.len()
    }

    pub(crate) fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Estimated size of one instance of `class_obj_id`: header plus the declared instance size
    /// of the class and each super class, padded to the id size.
    ///
    /// If a class in the chain has no class dump, the walk stops there and the estimate covers
    /// only what was found.
    pub(crate) fn instance_size(&self, class_obj_id: Id, id_size: IdSize) -> u64 {
        let id = id_size.bytes();
        let mut size = id + 4;
        let mut next = Some(class_obj_id);
        // a well-formed hierarchy can't be longer than the number of classes
        let mut steps_left = self.classes.len();

        while let Some(current) = next {
            let class = match self.classes.get(&current) {
                Some(c) => c,
                None => {
                    debug!(
                        "No class dump for {} (in hierarchy of {}); size estimate is partial",
                        current, class_obj_id
                    );
                    break;
                }
            };

            if steps_left == 0 {
                debug!("Class hierarchy of {} has a cycle", class_obj_id);
                break;
            }
            steps_left -= 1;

            size += class.instance_size_bytes() as u64;
            next = class.super_class_obj_id();
        }

        round_up(size, id)
    }

    /// Turn the tallies into entries. Order is unspecified.
    pub(crate) fn into_entries(self, id_size: IdSize) -> Vec<SlurpEntry> {
        let id = id_size.bytes();
        // object header plus a 4-byte length; already a multiple of the id size
        let array_header = id + 8;

        let mut entries = Vec::with_capacity(
            self.instance_counts.len() + self.object_arrays.len() + self.primitive_arrays.len(),
        );

        for (&class_obj_id, &count) in self.instance_counts.iter() {
            let per_object = self.instance_size(class_obj_id, id_size);
            entries.push(SlurpEntry {
                kind: EntryKind::Instance,
                name: self.class_names.get(&class_obj_id).cloned(),
                count,
                total_size_estimate: per_object * count,
                largest_size_estimate: per_object,
            });
        }

        for (array_class_obj_id, ac) in self.object_arrays.iter() {
            entries.push(SlurpEntry {
                kind: EntryKind::ObjectArray,
                name: self.class_names.get(array_class_obj_id).cloned(),
                count: ac.count(),
                // only the reference slots; the referenced objects are counted on their own
                total_size_estimate: array_header * ac.count() + id * ac.elem_count(),
                largest_size_estimate: array_header + id * ac.max_count() as u64,
            });
        }

        for (prim_type, ac) in self.primitive_arrays.iter() {
            let elem_size = prim_type.size_in_bytes();
            entries.push(SlurpEntry {
                kind: EntryKind::PrimitiveArray,
                name: Some(prim_type.array_descriptor().to_owned()),
                count: ac.count(),
                // real padding isn't recoverable; assume 4 bytes per array
                total_size_estimate: array_header * ac.count()
                    + elem_size * ac.elem_count()
                    + 4 * ac.count(),
                largest_size_estimate: round_up(
                    array_header + elem_size * ac.max_count() as u64,
                    id,
                ),
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn find<'a>(entries: &'a [SlurpEntry], kind: EntryKind, name: &str) -> &'a SlurpEntry {
        entries
            .iter()
            .find(|e| e.kind() == kind && e.name() == Some(name))
            .unwrap()
    }

    #[test]
    fn counter_get_gets() {
        let mut counter = Counter::new();

        counter.increment("foo");
        counter.increment("foo");
        counter.increment("bar");

        assert_eq!(Some(2), counter.get("foo"));
        assert_eq!(Some(1), counter.get("bar"));
        assert_eq!(None, counter.get("baz"));
    }

    #[test]
    fn counter_add_sums() {
        let mut counter = Counter::new();
        counter.increment("foo");
        counter.increment("bar");
        counter.increment("foo");
        counter.add("quux", 5);

        let pairs = counter
            .iter()
            .map(|(&k, &v)| (k, v))
            .sorted_by_key(|&(key, _)| key)
            .collect_vec();

        assert_eq!(vec![("bar", 1_u64), ("foo", 2), ("quux", 5)], pairs);
    }

    #[test]
    fn array_counter_tracks_max() {
        let mut ac = ArrayCounter::default();
        ac.add_array(5);
        ac.add_array(3);

        assert_eq!(2, ac.count());
        assert_eq!(8, ac.elem_count());
        assert_eq!(5, ac.max_count());
    }

    #[test]
    fn round_up_to_multiple() {
        assert_eq!(0, round_up(0, 8));
        assert_eq!(8, round_up(1, 8));
        assert_eq!(8, round_up(8, 8));
        assert_eq!(12, round_up(9, 4));
    }

    #[test]
    fn instance_size_walks_super_classes() {
        let mut agg = Aggregates::default();
        agg.add_class(ClassInfo::new(Id::from(2), Some(Id::from(1)), 8));
        agg.add_class(ClassInfo::new(Id::from(1), None, 12));

        // 8 + 4 + 8 + 12 = 32
        assert_eq!(32, agg.instance_size(Id::from(2), IdSize::U64));
        // 4 + 4 + 8 + 12 = 28
        assert_eq!(28, agg.instance_size(Id::from(2), IdSize::U32));
    }

    #[test]
    fn missing_super_class_gives_partial_estimate() {
        let mut agg = Aggregates::default();
        agg.add_class(ClassInfo::new(Id::from(2), Some(Id::from(1)), 20));

        // 8 + 4 + 20 = 32, and the missing super class adds nothing
        assert_eq!(32, agg.instance_size(Id::from(2), IdSize::U64));
    }

    #[test]
    fn unknown_class_is_header_only() {
        let agg = Aggregates::default();
        assert_eq!(16, agg.instance_size(Id::from(9), IdSize::U64));
        assert_eq!(8, agg.instance_size(Id::from(9), IdSize::U32));
    }

    #[test]
    fn cyclic_hierarchy_terminates() {
        let mut agg = Aggregates::default();
        agg.add_class(ClassInfo::new(Id::from(1), Some(Id::from(2)), 4));
        agg.add_class(ClassInfo::new(Id::from(2), Some(Id::from(1)), 4));

        // each class counted once: 8 + 4 + 4 + 4 = 20 -> 24
        assert_eq!(24, agg.instance_size(Id::from(1), IdSize::U64));
    }

    #[test]
    fn instance_entries() {
        let mut agg = Aggregates::default();
        agg.add_class(ClassInfo::new(Id::from(1), None, 16));
        agg.add_class_name(Id::from(1), "com.example.Foo".to_owned());
        for _ in 0..3 {
            agg.add_instance(Id::from(1));
        }

        let entries = agg.into_entries(IdSize::U64);
        let e = find(&entries, EntryKind::Instance, "com.example.Foo");
        assert_eq!(3, e.count());
        // round_up(8 + 4 + 16, 8) = 32
        assert_eq!(32, e.largest_size_estimate());
        assert_eq!(96, e.total_size_estimate());
    }

    #[test]
    fn object_array_entries() {
        let mut agg = Aggregates::default();
        agg.add_class_name(Id::from(7), "[Ljava/lang/String;".to_owned());
        agg.add_object_array(Id::from(7), 5);
        agg.add_object_array(Id::from(7), 3);

        let entries = agg.into_entries(IdSize::U64);
        let e = find(&entries, EntryKind::ObjectArray, "[Ljava/lang/String;");
        assert_eq!(2, e.count());
        assert_eq!(2 * (8 + 8) + 8 * 8, e.total_size_estimate());
        assert_eq!(16 + 8 * 5, e.largest_size_estimate());
    }

    #[test]
    fn primitive_array_entries() {
        let mut agg = Aggregates::default();
        agg.add_primitive_array(PrimitiveArrayType::Int, 3);
        agg.add_primitive_array(PrimitiveArrayType::Int, 1);

        let entries = agg.into_entries(IdSize::U64);
        let e = find(&entries, EntryKind::PrimitiveArray, "[I");
        assert_eq!(2, e.count());
        // headers 2 * 16, values 4 * 4, padding 2 * 4
        assert_eq!(32 + 16 + 8, e.total_size_estimate());
        // round_up(16 + 12, 8)
        assert_eq!(32, e.largest_size_estimate());
    }

    #[test]
    fn unnamed_entries_have_no_name() {
        let mut agg = Aggregates::default();
        agg.add_instance(Id::from(5));

        let entries = agg.into_entries(IdSize::U32);
        assert_eq!(1, entries.len());
        assert_eq!(None, entries[0].name());
        assert_eq!(8, entries[0].largest_size_estimate());
    }
}
