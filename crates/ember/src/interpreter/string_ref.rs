use super::byte_string::ByteString;
use super::heap::{BytesKey, HeapRef, Storage};
use super::vm::VmContext;
use crate::errors::{RuntimeError, RuntimeErrorData};

/// An anchored handle to an interned string.
#[derive(Debug, Hash, Clone, PartialEq, Eq)]
pub struct StringRef(pub(crate) HeapRef<BytesKey>);

impl StringRef {
    #[inline]
    pub fn id(&self) -> u64 {
        Storage::key_to_id(self.0.key().data(), Storage::BYTE_STRINGS_TAG)
    }

    pub fn fetch<'vm>(&self, ctx: &'vm VmContext) -> Result<&'vm ByteString, RuntimeError> {
        let Some(bytes) = ctx.vm.heap.get_bytes(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        Ok(bytes)
    }
}
