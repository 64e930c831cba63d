use super::heap::{BytesKey, ClosureKey, FnKey, NativeFnKey, ObjectKey, TableKey};
use super::value_stack::StackValue;
use crate::languages::ember::coerce_index;
use crate::BuildFastHasher;
use indexmap::IndexMap;

/// A hashable, bit-packed stand-in for [StackValue] used as a map key.
#[derive(Clone, Copy)]
pub(crate) struct MapKey {
    variant: u8,
    value: u64,
}

impl MapKey {
    const VARIANT_NIL: u8 = 0;
    const VARIANT_BOOL: u8 = 1;
    const VARIANT_NUMBER: u8 = 2;
    const VARIANT_BYTES: u8 = 3;
    const VARIANT_TABLE: u8 = 4;
    const VARIANT_OBJECT: u8 = 5;
    const VARIANT_FN: u8 = 6;
    const VARIANT_CLOSURE: u8 = 7;
    const VARIANT_NATIVE_FN: u8 = 8;
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        if self.variant != other.variant {
            return false;
        }

        if self.variant == Self::VARIANT_NUMBER {
            return f64::from_bits(self.value) == f64::from_bits(other.value);
        }

        self.value == other.value
    }
}

impl Eq for MapKey {}

impl std::hash::Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.variant.hash(state);
        self.value.hash(state);
    }
}

impl From<StackValue> for MapKey {
    fn from(value: StackValue) -> MapKey {
        fn from_pair(variant: u8, value: u64) -> MapKey {
            MapKey { variant, value }
        }

        match value {
            StackValue::Nil => from_pair(MapKey::VARIANT_NIL, 0),
            StackValue::Bool(b) => from_pair(MapKey::VARIANT_BOOL, b as _),
            StackValue::Number(n) => from_pair(MapKey::VARIANT_NUMBER, n.to_bits()),
            StackValue::Bytes(key) => from_pair(MapKey::VARIANT_BYTES, key.as_ffi()),
            StackValue::Table(key) => from_pair(MapKey::VARIANT_TABLE, key.as_ffi()),
            StackValue::Object(key) => from_pair(MapKey::VARIANT_OBJECT, key.as_ffi()),
            StackValue::Function(key) => from_pair(MapKey::VARIANT_FN, key.as_ffi()),
            StackValue::Closure(key) => from_pair(MapKey::VARIANT_CLOSURE, key.as_ffi()),
            StackValue::NativeFunction(key) => from_pair(MapKey::VARIANT_NATIVE_FN, key.as_ffi()),
        }
    }
}

impl From<&MapKey> for StackValue {
    fn from(key: &MapKey) -> StackValue {
        match key.variant {
            MapKey::VARIANT_BOOL => StackValue::Bool(key.value != 0),
            MapKey::VARIANT_NUMBER => StackValue::Number(f64::from_bits(key.value)),
            MapKey::VARIANT_BYTES => StackValue::Bytes(BytesKey::from_ffi(key.value)),
            MapKey::VARIANT_TABLE => StackValue::Table(TableKey::from_ffi(key.value)),
            MapKey::VARIANT_OBJECT => StackValue::Object(ObjectKey::from_ffi(key.value)),
            MapKey::VARIANT_FN => StackValue::Function(FnKey::from_ffi(key.value)),
            MapKey::VARIANT_CLOSURE => StackValue::Closure(ClosureKey::from_ffi(key.value)),
            MapKey::VARIANT_NATIVE_FN => {
                StackValue::NativeFunction(NativeFnKey::from_ffi(key.value))
            }
            _ => StackValue::Nil,
        }
    }
}

/// An ordered mapping. Number keys `0..n-1` live in a dense list part,
/// everything else in an insertion-ordered map.
#[derive(Default, Clone)]
pub(crate) struct Table {
    pub(crate) map: IndexMap<MapKey, StackValue, BuildFastHasher>,
    pub(crate) list: Vec<StackValue>,
}

const BUCKET_SIZE: usize = std::mem::size_of::<usize>() + std::mem::size_of::<StackValue>() * 2;

impl Table {
    pub(crate) const LIST_ELEMENT_SIZE: usize = std::mem::size_of::<StackValue>();
    pub(crate) const MAP_ELEMENT_SIZE: usize = std::mem::size_of::<usize>() + BUCKET_SIZE;

    pub(crate) fn heap_size(&self) -> usize {
        self.map.len() * Self::MAP_ELEMENT_SIZE + self.list.len() * Self::LIST_ELEMENT_SIZE
    }

    pub(crate) fn list_len(&self) -> usize {
        self.list.len()
    }

    pub(crate) fn reserve_list(&mut self, additional: usize) {
        self.list.reserve(additional);
    }

    pub(crate) fn get(&self, key: StackValue) -> StackValue {
        if let StackValue::Number(n) = key {
            if let Some(index) = coerce_index(n) {
                if let Some(value) = self.list.get(index) {
                    return *value;
                }
            }
        }

        self.get_from_map(key)
    }

    pub(crate) fn get_from_map(&self, key: StackValue) -> StackValue {
        let key = MapKey::from(key);

        self.map.get(&key).copied().unwrap_or_default()
    }

    pub(crate) fn set(&mut self, key: StackValue, value: StackValue) {
        if let StackValue::Number(n) = key {
            if let Some(index) = coerce_index(n) {
                if self.set_in_list(index, value) {
                    return;
                }
            }
        }

        self.set_in_map(key, value);
    }

    pub(crate) fn set_in_map(&mut self, key: StackValue, value: StackValue) {
        let key = MapKey::from(key);

        if value == StackValue::Nil {
            self.map.shift_remove(&key);
        } else {
            self.map.insert(key, value);
        }
    }

    fn set_in_list(&mut self, index: usize, value: StackValue) -> bool {
        match index.cmp(&self.list.len()) {
            std::cmp::Ordering::Less => {
                if value == StackValue::Nil && index + 1 == self.list.len() {
                    // shrink the list past any trailing nils
                    let nil_count = self
                        .list
                        .iter()
                        .rev()
                        .skip(1)
                        .take_while(|v| **v == StackValue::Nil)
                        .count()
                        + 1;

                    let new_len = self.list.len() - nil_count;
                    self.list.truncate(new_len);
                } else {
                    self.list[index] = value;
                }
            }
            std::cmp::Ordering::Equal => {
                if value == StackValue::Nil {
                    return false;
                }

                self.list.push(value);
                self.merge_from_map_into_list();
            }
            std::cmp::Ordering::Greater => return false,
        }

        true
    }

    fn merge_from_map_into_list(&mut self) {
        loop {
            let map_key = MapKey::from(StackValue::Number(self.list.len() as f64));

            let Some(value) = self.map.swap_remove(&map_key) else {
                break;
            };

            self.list.push(value);
        }
    }

    /// Total number of populated entries.
    pub(crate) fn count(&self) -> usize {
        self.list.len() + self.map.len()
    }

    /// Steps the table in insertion order: list part first, then the map.
    /// `previous == Nil` yields the first entry, `None` means exhausted.
    pub(crate) fn next(&self, previous: StackValue) -> Option<(StackValue, StackValue)> {
        let list_entry = |index: usize| {
            self.list
                .get(index)
                .map(|value| (StackValue::Number(index as f64), *value))
        };

        if previous == StackValue::Nil {
            return list_entry(0).or_else(|| self.first_map_entry());
        }

        if let StackValue::Number(n) = previous {
            if let Some(index) = coerce_index(n) {
                if index < self.list.len() {
                    return list_entry(index + 1).or_else(|| self.first_map_entry());
                }
            }
        }

        let index = self.map.get_index_of(&MapKey::from(previous))?;
        self.map.get_index(index + 1).map(|(k, v)| (k.into(), *v))
    }

    fn first_map_entry(&self) -> Option<(StackValue, StackValue)> {
        self.map.first().map(|(k, v)| (k.into(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_part_is_zero_based() {
        let mut table = Table::default();
        table.set(StackValue::Number(0.0), StackValue::Number(10.0));
        table.set(StackValue::Number(1.0), StackValue::Number(11.0));

        assert_eq!(table.list_len(), 2);
        assert_eq!(table.get(StackValue::Number(0.0)), StackValue::Number(10.0));
        assert_eq!(table.get(StackValue::Number(1.0)), StackValue::Number(11.0));
        assert_eq!(table.get(StackValue::Number(2.0)), StackValue::Nil);
    }

    #[test]
    fn map_merges_into_list() {
        let mut table = Table::default();
        table.set(StackValue::Number(1.0), StackValue::Bool(true));
        assert_eq!(table.list_len(), 0);

        table.set(StackValue::Number(0.0), StackValue::Bool(true));
        assert_eq!(table.list_len(), 2);
        assert!(table.map.is_empty());
    }

    #[test]
    fn nil_assignment_removes() {
        let mut table = Table::default();
        table.set(StackValue::Bool(true), StackValue::Number(1.0));
        table.set(StackValue::Bool(true), StackValue::Nil);

        assert_eq!(table.get(StackValue::Bool(true)), StackValue::Nil);
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn next_walks_list_then_map() {
        let mut table = Table::default();
        table.set(StackValue::Number(0.0), StackValue::Number(10.0));
        table.set(StackValue::Number(1.0), StackValue::Number(11.0));
        table.set(StackValue::Bool(true), StackValue::Number(12.0));

        let mut previous = StackValue::Nil;
        let mut seen = Vec::new();

        while let Some((k, v)) = table.next(previous) {
            seen.push(v);
            previous = k;
        }

        assert_eq!(
            seen,
            vec![
                StackValue::Number(10.0),
                StackValue::Number(11.0),
                StackValue::Number(12.0)
            ]
        );
    }
}
