use super::execution::ReturnCount;
use super::function::Closure;
use super::heap::StorageKey;
use super::multi::{IntoMulti, MultiValue};
use super::value::{IntoValue, Value};
use super::value_stack::StackValue;
use super::vm::VmContext;
use crate::errors::{CompilationErrors, RuntimeError, RuntimeErrorData};
use crate::languages::ember::Compiler;

/// The stack-oriented embedding API.
///
/// The embedder's working region is the bottom of the state's operand
/// stack: values are pushed, assembled into tables/objects/globals, and
/// consumed by calls, mirroring how compiled code uses the same stack.
impl VmContext<'_> {
    /// Height of the embedder-visible stack region.
    pub fn stack_len(&self) -> usize {
        self.vm.value_stack.len()
    }

    pub fn push_value<V: IntoValue>(&mut self, value: V) -> Result<(), RuntimeError> {
        let value = value.into_value(self)?;
        value.test_validity(&self.vm.heap)?;

        if self.vm.value_stack.len() >= self.vm.limits.stack_size {
            return Err(RuntimeErrorData::StackOverflow.into());
        }

        self.vm.value_stack.push(value.to_stack_value());

        Ok(())
    }

    pub fn push_nil(&mut self) -> Result<(), RuntimeError> {
        self.push_value(Value::Nil)
    }

    pub fn push_bool(&mut self, value: bool) -> Result<(), RuntimeError> {
        self.push_value(Value::Bool(value))
    }

    pub fn push_number(&mut self, value: f64) -> Result<(), RuntimeError> {
        self.push_value(Value::Number(value))
    }

    pub fn push_string(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        let string_ref = self.intern_string(bytes);
        self.push_value(Value::String(string_ref))
    }

    /// Wraps a Rust callback and pushes it.
    pub fn push_function(
        &mut self,
        callback: impl Fn(MultiValue, &mut VmContext) -> Result<MultiValue, RuntimeError> + 'static,
    ) -> Result<(), RuntimeError> {
        let function_ref = self.create_function(callback);
        self.push_value(Value::Function(function_ref))
    }

    pub fn pop_value(&mut self) -> Value {
        let value = self.vm.value_stack.pop();
        Value::from_stack_value(&mut self.vm.heap, value)
    }

    pub fn pop_count(&mut self, count: usize) {
        self.vm.value_stack.pop_count(count);
    }

    /// Reads a value `distance_from_top` slots below the top (0 = top).
    pub fn peek_value(&mut self, distance_from_top: usize) -> Value {
        let value = self.vm.value_stack.peek(distance_from_top);
        Value::from_stack_value(&mut self.vm.heap, value)
    }

    pub fn peek_number(&mut self, distance_from_top: usize) -> Option<f64> {
        match self.vm.value_stack.peek(distance_from_top) {
            StackValue::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn peek_bool(&mut self, distance_from_top: usize) -> Option<bool> {
        match self.vm.value_stack.peek(distance_from_top) {
            StackValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn peek_string_bytes(&mut self, distance_from_top: usize) -> Option<Vec<u8>> {
        match self.vm.value_stack.peek(distance_from_top) {
            StackValue::Bytes(key) => self
                .vm
                .heap
                .get_bytes(key)
                .map(|bytes| bytes.as_bytes().to_vec()),
            _ => None,
        }
    }

    /// Inserts a value `distance_from_top` slots below the current top.
    pub fn insert_value<V: IntoValue>(
        &mut self,
        distance_from_top: usize,
        value: V,
    ) -> Result<(), RuntimeError> {
        let value = value.into_value(self)?;
        value.test_validity(&self.vm.heap)?;

        let len = self.vm.value_stack.len();
        let index = len.saturating_sub(distance_from_top);
        self.vm.value_stack.insert(index, value.to_stack_value());

        Ok(())
    }

    /// Pops `count` name/value pairs and writes them into the globals table.
    pub fn register(&mut self, count: usize) -> Result<(), RuntimeError> {
        let start = self.vm.value_stack.len().saturating_sub(count * 2);
        let entries = self.vm.value_stack.drain_from(start);

        let Some(globals) = self.vm.heap.get_table_mut(self.vm.globals) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };

        let original_size = globals.heap_size();

        for pair in entries.chunks_exact(2) {
            globals.set(pair[0], pair[1]);
        }

        let new_size = globals.heap_size();
        self.vm
            .gc
            .modify_used_memory(new_size as isize - original_size as isize);

        Ok(())
    }

    /// Builds a Table from the top `count` key/value pairs and pushes it.
    pub fn make_table(&mut self, count: usize) -> Result<(), RuntimeError> {
        let start = self.vm.value_stack.len().saturating_sub(count * 2);
        let entries = self.vm.value_stack.drain_from(start);

        let table_key = self.vm.heap.create_table(&mut self.vm.gc);
        self.vm.value_stack.push(StackValue::Table(table_key));

        let mut size = 0;

        if let Some(table) = self.vm.heap.get_table_mut(table_key) {
            for pair in entries.chunks_exact(2) {
                table.set(pair[0], pair[1]);
            }

            size = table.heap_size();
        }

        self.vm.gc.modify_used_memory(size as isize);
        self.vm.maybe_collect_garbage();

        Ok(())
    }

    /// Builds an Object from the top `count` key/value pairs and pushes it.
    pub fn make_object(&mut self, count: usize) -> Result<(), RuntimeError> {
        let start = self.vm.value_stack.len().saturating_sub(count * 2);
        let entries = self.vm.value_stack.drain_from(start);

        let object_key = self.vm.heap.create_object(&mut self.vm.gc, None);
        self.vm.value_stack.push(StackValue::Object(object_key));

        let mut size = 0;

        if let Some(object) = self.vm.heap.get_object_mut(object_key) {
            for pair in entries.chunks_exact(2) {
                object.set(pair[0], pair[1]);
            }

            size = object.heap_size();
        }

        self.vm.gc.modify_used_memory(size as isize);
        self.vm.maybe_collect_garbage();

        Ok(())
    }

    /// Compiles `source` and pushes the resulting root closure, or pushes
    /// nil and returns the diagnostics on failure.
    ///
    /// The collector is frozen for the duration of compilation.
    pub fn compile_string(
        &mut self,
        source: &str,
        module: &str,
    ) -> Result<(), CompilationErrors> {
        self.vm.gc.freeze();

        let compiler = Compiler::default();
        let result = compiler.compile(&mut self.vm.heap, &mut self.vm.gc, source, module);

        let result = match result {
            Ok(fn_key) => match self.vm.heap.get_fn_proto(fn_key).cloned() {
                Some(proto) => {
                    let closure = Closure {
                        fn_key,
                        proto,
                        up_values: Default::default(),
                    };

                    let closure_key = self.vm.heap.store_closure(&mut self.vm.gc, closure);
                    self.vm.value_stack.push(StackValue::Closure(closure_key));

                    Ok(())
                }
                None => {
                    crate::debug_unreachable!();
                    #[cfg(not(debug_assertions))]
                    {
                        self.vm.value_stack.push(StackValue::Nil);
                        Ok(())
                    }
                }
            },
            Err(errors) => {
                self.vm.value_stack.push(StackValue::Nil);
                Err(errors)
            }
        };

        self.vm.gc.unfreeze();
        self.vm.maybe_collect_garbage();

        result
    }

    /// Calls the callable below `arg_count` arguments on the stack,
    /// replacing callable and arguments with exactly `result_count` results.
    pub fn call(&mut self, arg_count: usize, result_count: usize) -> Result<(), RuntimeError> {
        let callable_index = self
            .vm
            .value_stack
            .len()
            .checked_sub(arg_count + 1)
            .ok_or(RuntimeErrorData::InvalidInternalState)?;

        let return_count = ReturnCount::Count(result_count.min(u8::MAX as usize) as u8);

        let result = self.vm.complete_call_at(callable_index, arg_count, return_count);

        if let Err(err) = result {
            self.vm.recover_stack(callable_index);
            return Err(err);
        }

        Ok(())
    }

    /// Like [VmContext::call], but traps runtime errors: on failure the
    /// stack is restored and the error value is pushed.
    pub fn pcall(&mut self, arg_count: usize, result_count: usize) -> Result<(), RuntimeError> {
        let height = self
            .vm
            .value_stack
            .len()
            .checked_sub(arg_count + 1)
            .ok_or(RuntimeErrorData::InvalidInternalState)?;

        match self.call(arg_count, result_count) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug_assert_eq!(self.vm.value_stack.len(), height);

                let message = err.data.to_string();
                let key = self.vm.heap.intern_bytes(&mut self.vm.gc, message.as_bytes());
                self.vm.value_stack.push(StackValue::Bytes(key));

                Err(err)
            }
        }
    }

    /// Rust-facing call: packs arguments, runs, and unpacks every result.
    pub fn call_value<A: IntoMulti>(
        &mut self,
        callable: Value,
        args: A,
    ) -> Result<MultiValue, RuntimeError> {
        callable.test_validity(&self.vm.heap)?;

        let args = args.into_multi(self)?;

        for value in args.values() {
            value.test_validity(&self.vm.heap)?;
        }

        self.vm.call_stack_value(callable.to_stack_value(), args)
    }

    /// Converts a value to its display form, honoring `__tostring`.
    pub fn stringify_value(&mut self, value: &Value) -> Result<Vec<u8>, RuntimeError> {
        self.vm.stringify(value.to_stack_value())
    }

    /// Renders the bytecode of a compiled function (and its inner
    /// functions) for diagnostics.
    pub fn disassemble_function(&self, function: &super::FunctionRef) -> Option<String> {
        let StorageKey::Closure(closure_key) = function.0.key() else {
            return None;
        };

        let closure = self.vm.heap.get_closure(closure_key)?;

        let mut pending = vec![closure.proto.clone()];
        let mut out = String::new();

        while let Some(proto) = pending.pop() {
            out.push_str(&format!("function {} ({}):\n", proto.name, proto.module));
            out.push_str(&proto.chunk.to_readable_instructions());
            out.push('\n');

            for constant in &proto.chunk.constants {
                if let StackValue::Function(fn_key) = constant {
                    if let Some(inner) = self.vm.heap.get_fn_proto(*fn_key) {
                        pending.push(inner.clone());
                    }
                }
            }
        }

        Some(out)
    }
}
