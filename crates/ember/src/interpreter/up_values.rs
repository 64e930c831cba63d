use super::value_stack::StackValue;

/// A captured variable. Open while its stack slot is live, closed (owning
/// the value it last saw) once the slot leaves the stack. The transition is
/// one-way.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum UpValue {
    Open(usize),
    Closed(StackValue),
}

impl UpValue {
    pub(crate) fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
