use super::multi::MultiValue;
use super::vm::VmContext;
use crate::errors::RuntimeError;
use std::rc::Rc;

type Callback = dyn Fn(MultiValue, &mut VmContext) -> Result<MultiValue, RuntimeError>;

/// An opaque callable implemented by the embedder. Receives its arguments as
/// a counted [MultiValue] and returns the values to hand back to the caller.
pub(crate) struct NativeFunction {
    pub(crate) callback: Rc<Callback>,
}

impl NativeFunction {
    pub(crate) fn call(
        &self,
        args: MultiValue,
        ctx: &mut VmContext,
    ) -> Result<MultiValue, RuntimeError> {
        let results = (self.callback)(args, ctx)?;

        // invalid keys handed back by the embedder would poison the stack
        for value in results.values() {
            value.test_validity(&ctx.vm.heap)?;
        }

        Ok(results)
    }

    pub(crate) fn shallow_clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<F> From<F> for NativeFunction
where
    F: Fn(MultiValue, &mut VmContext) -> Result<MultiValue, RuntimeError> + 'static,
{
    fn from(value: F) -> Self {
        Self {
            callback: Rc::new(value),
        }
    }
}
