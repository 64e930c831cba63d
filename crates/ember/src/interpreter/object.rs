use super::heap::ObjectKey;
use super::table::MapKey;
use super::value_stack::StackValue;
use crate::BuildFastHasher;
use indexmap::IndexMap;

/// Built-in value kinds that can be given a default prototype through the
/// registry (`registerProtoObject`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    String,
    Table,
    Object,
    Function,
}

impl ObjectKind {
    pub const COUNT: usize = 4;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::String),
            1 => Some(Self::Table),
            2 => Some(Self::Object),
            3 => Some(Self::Function),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::String => 0,
            Self::Table => 1,
            Self::Object => 2,
            Self::Function => 3,
        }
    }
}

/// A user-defined record: an insertion-ordered field map plus an optional
/// prototype used as a lookup fallback. Assignment always lands in the own
/// field map; reads walk the prototype chain.
#[derive(Default, Clone)]
pub(crate) struct Object {
    pub(crate) fields: IndexMap<MapKey, StackValue, BuildFastHasher>,
    pub(crate) proto: Option<ObjectKey>,
}

const BUCKET_SIZE: usize = std::mem::size_of::<usize>() + std::mem::size_of::<StackValue>() * 2;

impl Object {
    pub(crate) const FIELD_SIZE: usize = std::mem::size_of::<usize>() + BUCKET_SIZE;

    pub(crate) fn heap_size(&self) -> usize {
        self.fields.len() * Self::FIELD_SIZE
    }

    pub(crate) fn get(&self, key: StackValue) -> StackValue {
        self.fields
            .get(&MapKey::from(key))
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set(&mut self, key: StackValue, value: StackValue) {
        let key = MapKey::from(key);

        if value == StackValue::Nil {
            self.fields.shift_remove(&key);
        } else {
            self.fields.insert(key, value);
        }
    }

    pub(crate) fn field_count(&self) -> usize {
        self.fields.len()
    }
}
