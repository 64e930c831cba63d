use super::function::FnProto;
use super::heap::{ClosureKey, NativeFnKey, ObjectKey, UpValueKey};
use super::instruction::{OpCode, INC_BIAS};
use super::multi::MultiValue;
use super::object::ObjectKind;
use super::up_values::UpValue;
use super::value::Value;
use super::value_stack::StackValue;
use super::vm::Vm;
use crate::errors::{RuntimeError, RuntimeErrorData, StackTraceFrame};
use std::rc::Rc;

/// How many results the caller of a frame asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnCount {
    /// The caller requested nothing; results are dropped at the call site.
    Discard,
    /// Truncate excess, pad missing values with nil.
    Count(u8),
    /// Keep every result.
    All,
}

impl ReturnCount {
    fn from_operand(operand: u8) -> Self {
        if operand == 0 {
            ReturnCount::Discard
        } else {
            ReturnCount::Count(operand)
        }
    }
}

/// One call frame: the executing closure, its program counter, and the base
/// of its stack window. Slot 0 of the window holds the callee.
pub(crate) struct CallContext {
    pub(crate) closure: ClosureKey,
    pub(crate) proto: Rc<FnProto>,
    pub(crate) ip: usize,
    /// Start of the currently executing instruction, for line resolution.
    pub(crate) op_ip: usize,
    pub(crate) stack_base: usize,
    pub(crate) return_count: ReturnCount,
    /// Set for frames entered through `__init`: the constructed Object
    /// replaces whatever the initializer returns.
    pub(crate) constructed: Option<ObjectKey>,
}

impl Vm {
    /// Runs frames until the call stack shrinks back to `base_depth`.
    /// On error, frames above `base_depth` are popped into the stack trace;
    /// the operand stack is left for the caller to restore.
    pub(crate) fn run(&mut self, base_depth: usize) -> Result<(), RuntimeError> {
        let result = self.run_inner(base_depth);

        let Err(mut err) = result else {
            return Ok(());
        };

        while self.call_stack.len() > base_depth {
            let call = self.call_stack.pop().unwrap();

            err.trace.push_frame(StackTraceFrame {
                source_name: call.proto.module.clone(),
                function_name: call.proto.name.clone(),
                line: call.proto.chunk.line(call.op_ip),
            });
        }

        Err(err)
    }

    fn run_inner(&mut self, base_depth: usize) -> Result<(), RuntimeError> {
        while self.call_stack.len() > base_depth {
            self.step()?;
        }

        Ok(())
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        let frame_index = self.call_stack.len() - 1;

        let (proto, base) = {
            let call = &mut self.call_stack[frame_index];
            call.op_ip = call.ip;
            (call.proto.clone(), call.stack_base)
        };

        let chunk = &proto.chunk;
        let mut ip = self.call_stack[frame_index].ip;

        let Some(op) = chunk.code.get(ip).copied().and_then(OpCode::from_byte) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };
        ip += 1;

        macro_rules! read_u8 {
            () => {{
                let byte = chunk.code[ip];
                ip += 1;
                byte
            }};
        }

        macro_rules! read_u16 {
            () => {{
                let value = chunk.read_u16(ip);
                ip += 2;
                value
            }};
        }

        macro_rules! store_ip {
            () => {
                self.call_stack[frame_index].ip = ip
            };
        }

        if self.value_stack.len() >= self.limits.stack_size {
            return Err(RuntimeErrorData::StackOverflow.into());
        }

        match op {
            OpCode::LoadConst => {
                let constant = read_u16!();
                store_ip!();
                let value = chunk.constants[constant as usize];
                self.value_stack.push(value);
            }
            OpCode::Nil => {
                store_ip!();
                self.value_stack.push(StackValue::Nil);
            }
            OpCode::True => {
                store_ip!();
                self.value_stack.push(StackValue::Bool(true));
            }
            OpCode::False => {
                store_ip!();
                self.value_stack.push(StackValue::Bool(false));
            }
            OpCode::Pop => {
                let count = read_u8!();
                store_ip!();
                self.value_stack.pop_count(count as usize);
            }
            OpCode::Negate => {
                store_ip!();
                let value = self.value_stack.pop();

                let StackValue::Number(n) = value else {
                    return Err(RuntimeErrorData::InvalidArithmetic(value.type_name()).into());
                };

                self.value_stack.push(StackValue::Number(-n));
            }
            OpCode::Not => {
                store_ip!();
                let value = self.value_stack.pop();
                self.value_stack.push(StackValue::Bool(!value.is_truthy()));
            }
            OpCode::Count => {
                store_ip!();
                let value = self.value_stack.pop();
                let count = self.resolve_count(value)?;
                self.value_stack.push(StackValue::Number(count as f64));
            }
            OpCode::Add | OpCode::Sub | OpCode::Mult | OpCode::Div | OpCode::Mod => {
                store_ip!();
                let b = self.value_stack.pop();
                let a = self.value_stack.pop();

                let (StackValue::Number(a), StackValue::Number(b)) = (a, b) else {
                    let culprit = if matches!(a, StackValue::Number(_)) { b } else { a };
                    return Err(RuntimeErrorData::InvalidArithmetic(culprit.type_name()).into());
                };

                let result = match op {
                    OpCode::Add => a + b,
                    OpCode::Sub => a - b,
                    OpCode::Mult => a * b,
                    // division by zero follows IEEE-754
                    OpCode::Div => a / b,
                    OpCode::Mod => a % b,
                    _ => unreachable!(),
                };

                self.value_stack.push(StackValue::Number(result));
            }
            OpCode::Equal => {
                store_ip!();
                let b = self.value_stack.pop();
                let a = self.value_stack.pop();
                let equal = self.values_equal(a, b)?;
                self.value_stack.push(StackValue::Bool(equal));
            }
            OpCode::Greater | OpCode::Less | OpCode::GreaterEqual | OpCode::LessEqual => {
                store_ip!();
                let b = self.value_stack.pop();
                let a = self.value_stack.pop();
                let result = self.compare_values(op, a, b)?;
                self.value_stack.push(StackValue::Bool(result));
            }
            OpCode::Concat => {
                let count = read_u8!() as usize;
                store_ip!();

                let start = self.value_stack.len().saturating_sub(count);

                // stringify in place; `__tostring` may allocate, and the
                // operands must stay rooted until every piece is converted
                let mut bytes = Vec::new();

                for i in 0..count {
                    let value = self.value_stack.get(start + i);
                    bytes.extend_from_slice(&self.stringify(value)?);
                }

                self.value_stack.truncate(start);

                let key = self.heap.intern_bytes(&mut self.gc, &bytes);
                self.value_stack.push(StackValue::Bytes(key));
            }
            OpCode::GetLocal => {
                let slot = read_u8!() as usize;
                store_ip!();
                let value = self.value_stack.get(base + slot);
                self.value_stack.push(value);
            }
            OpCode::SetLocal => {
                let slot = read_u8!() as usize;
                store_ip!();
                let value = self.value_stack.pop();
                self.value_stack.set(base + slot, value);
            }
            OpCode::IncLocal => {
                let delta = read_u8!() as i32 - INC_BIAS;
                let slot = read_u8!() as usize;
                store_ip!();

                let old = self.value_stack.get(base + slot);

                let StackValue::Number(n) = old else {
                    return Err(RuntimeErrorData::InvalidArithmetic(old.type_name()).into());
                };

                self.value_stack
                    .set(base + slot, StackValue::Number(n + delta as f64));
                self.value_stack.push(old);
            }
            OpCode::GetUpValue => {
                let index = read_u8!() as usize;
                store_ip!();
                let value = self.read_up_value(frame_index, index)?;
                self.value_stack.push(value);
            }
            OpCode::SetUpValue => {
                let index = read_u8!() as usize;
                store_ip!();
                let value = self.value_stack.pop();
                self.write_up_value(frame_index, index, value)?;
            }
            OpCode::IncUpValue => {
                let delta = read_u8!() as i32 - INC_BIAS;
                let index = read_u8!() as usize;
                store_ip!();

                let old = self.read_up_value(frame_index, index)?;

                let StackValue::Number(n) = old else {
                    return Err(RuntimeErrorData::InvalidArithmetic(old.type_name()).into());
                };

                self.write_up_value(frame_index, index, StackValue::Number(n + delta as f64))?;
                self.value_stack.push(old);
            }
            OpCode::GetGlobal => {
                let constant = read_u16!();
                store_ip!();
                let name = chunk.constants[constant as usize];
                let value = self.read_global(name)?;
                self.value_stack.push(value);
            }
            OpCode::SetGlobal => {
                let constant = read_u16!();
                store_ip!();
                let name = chunk.constants[constant as usize];
                let value = self.value_stack.pop();
                self.write_global(name, value)?;
            }
            OpCode::IncGlobal => {
                let delta = read_u8!() as i32 - INC_BIAS;
                let constant = read_u16!();
                store_ip!();

                let name = chunk.constants[constant as usize];
                let old = self.read_global(name)?;

                let StackValue::Number(n) = old else {
                    return Err(RuntimeErrorData::InvalidArithmetic(old.type_name()).into());
                };

                self.write_global(name, StackValue::Number(n + delta as f64))?;
                self.value_stack.push(old);
            }
            OpCode::GetObject => {
                let constant = read_u16!();
                store_ip!();
                let key = chunk.constants[constant as usize];
                let receiver = self.value_stack.pop();
                let value = self.get_field(receiver, key)?;
                self.value_stack.push(value);
            }
            OpCode::SetObject => {
                store_ip!();
                let value = self.value_stack.pop();
                let key = self.value_stack.pop();
                let receiver = self.value_stack.pop();
                self.set_field(receiver, key, value)?;
            }
            OpCode::IncObject => {
                let delta = read_u8!() as i32 - INC_BIAS;
                let constant = read_u16!();
                store_ip!();

                let key = chunk.constants[constant as usize];
                let receiver = self.value_stack.pop();
                let old = self.get_field(receiver, key)?;

                let StackValue::Number(n) = old else {
                    return Err(RuntimeErrorData::InvalidArithmetic(old.type_name()).into());
                };

                self.set_field(receiver, key, StackValue::Number(n + delta as f64))?;
                self.value_stack.push(old);
            }
            OpCode::Index => {
                store_ip!();
                let key = self.value_stack.pop();
                let receiver = self.value_stack.pop();
                let value = self.get_field(receiver, key)?;
                self.value_stack.push(value);
            }
            OpCode::NewIndex => {
                store_ip!();
                let value = self.value_stack.pop();
                let key = self.value_stack.pop();
                let receiver = self.value_stack.pop();
                self.set_field(receiver, key, value)?;
            }
            OpCode::IncIndex => {
                let delta = read_u8!() as i32 - INC_BIAS;
                store_ip!();

                let key = self.value_stack.pop();
                let receiver = self.value_stack.pop();
                let old = self.get_field(receiver, key)?;

                let StackValue::Number(n) = old else {
                    return Err(RuntimeErrorData::InvalidArithmetic(old.type_name()).into());
                };

                self.set_field(receiver, key, StackValue::Number(n + delta as f64))?;
                self.value_stack.push(old);
            }
            OpCode::NewDict => {
                let count = read_u16!() as usize;
                store_ip!();

                let start = self.value_stack.len().saturating_sub(count * 2);
                let entries = self.value_stack.drain_from(start);

                let table_key = self.heap.create_table(&mut self.gc);
                self.value_stack.push(StackValue::Table(table_key));

                let mut size = 0;

                if let Some(table) = self.heap.get_table_mut(table_key) {
                    for pair in entries.chunks_exact(2) {
                        table.set(pair[0], pair[1]);
                    }

                    size = table.heap_size();
                }

                self.gc.modify_used_memory(size as isize);
            }
            OpCode::NewObject => {
                let count = read_u16!() as usize;
                store_ip!();

                let start = self.value_stack.len().saturating_sub(count * 2);
                let entries = self.value_stack.drain_from(start);

                let proto = self.proto_registry[ObjectKind::Object.index()];
                let object_key = self.heap.create_object(&mut self.gc, proto);
                self.value_stack.push(StackValue::Object(object_key));

                let mut size = 0;

                if let Some(object) = self.heap.get_object_mut(object_key) {
                    for pair in entries.chunks_exact(2) {
                        object.set(pair[0], pair[1]);
                    }

                    size = object.heap_size();
                }

                self.gc.modify_used_memory(size as isize);
            }
            OpCode::Closure => {
                let constant = read_u16!();

                let StackValue::Function(fn_key) = chunk.constants[constant as usize] else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                let Some(fn_proto) = self.heap.get_fn_proto(fn_key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };
                let fn_proto = fn_proto.clone();

                // the inline directives that follow tell us which enclosing
                // slots and upvalues populate the closure
                let mut up_values = thin_vec::ThinVec::with_capacity(fn_proto.up_value_count as _);

                for _ in 0..fn_proto.up_value_count {
                    let directive = read_u8!();
                    let index = read_u8!() as usize;

                    let up_value_key = match OpCode::from_byte(directive) {
                        Some(OpCode::GetLocal) => self.capture_up_value(base + index),
                        Some(OpCode::GetUpValue) => {
                            let Some(closure) =
                                self.heap.get_closure(self.call_stack[frame_index].closure)
                            else {
                                return Err(RuntimeErrorData::InvalidInternalState.into());
                            };

                            let Some(&key) = closure.up_values.get(index) else {
                                return Err(RuntimeErrorData::InvalidInternalState.into());
                            };

                            key
                        }
                        _ => return Err(RuntimeErrorData::InvalidInternalState.into()),
                    };

                    up_values.push(up_value_key);
                }

                store_ip!();

                let closure_key = self.heap.store_closure(
                    &mut self.gc,
                    super::function::Closure {
                        fn_key,
                        proto: fn_proto,
                        up_values,
                    },
                );

                self.value_stack.push(StackValue::Closure(closure_key));
            }
            OpCode::Close => {
                store_ip!();
                let slot = self.value_stack.len().saturating_sub(1);
                self.close_up_values(slot);
                self.value_stack.pop();
            }
            OpCode::Call => {
                let arg_count = read_u8!() as usize;
                let return_count = ReturnCount::from_operand(read_u8!());
                store_ip!();

                let callable_index = self.value_stack.len() - arg_count - 1;
                self.begin_call(callable_index, arg_count, return_count)?;
            }
            OpCode::Invoke => {
                let arg_count = read_u8!() as usize;
                let return_count = ReturnCount::from_operand(read_u8!());
                store_ip!();

                let receiver_index = self.value_stack.len() - arg_count - 2;
                let receiver = self.value_stack.get(receiver_index);
                let name = self.value_stack.get(receiver_index + 1);

                let method = self.get_field(receiver, name)?;

                // rearrange into an ordinary call with the receiver as the
                // first argument
                self.value_stack.set(receiver_index, method);
                self.value_stack.set(receiver_index + 1, receiver);

                self.begin_call(receiver_index, arg_count + 1, return_count)?;
            }
            OpCode::Return => {
                let result_count = read_u8!() as usize;
                store_ip!();
                self.finish_frame(result_count);
            }
            OpCode::Jump => {
                let distance = read_u16!() as usize;
                ip += distance;
                store_ip!();
            }
            OpCode::JumpBack => {
                let distance = read_u16!() as usize;
                ip -= distance;
                store_ip!();
            }
            OpCode::PopJumpIfFalse => {
                let distance = read_u16!() as usize;
                let condition = self.value_stack.pop();

                if !condition.is_truthy() {
                    ip += distance;
                }

                store_ip!();
            }
            OpCode::JumpIfFalse => {
                let distance = read_u16!() as usize;
                let condition = self.value_stack.peek(0);

                if !condition.is_truthy() {
                    ip += distance;
                }

                store_ip!();
            }
            OpCode::Iter => {
                store_ip!();
                let value = self.value_stack.peek(0);
                let iterator = self.resolve_iterator(value)?;
                let top = self.value_stack.len() - 1;
                self.value_stack.set(top, iterator);
            }
            OpCode::Next => {
                let expected = read_u8!() as usize;
                let distance = read_u16!() as usize;

                let iterator = self.value_stack.peek(0);

                let next_name = StackValue::Bytes(self.metamethod_names.next.0.key());
                let Some(next_fn) = self.lookup_metamethod(iterator, next_name)? else {
                    return Err(RuntimeErrorData::NotIterable(iterator.type_name()).into());
                };

                let results = self.call_collect(next_fn, &[iterator])?;

                if results.first().copied().unwrap_or_default() == StackValue::Nil {
                    // exhausted
                    ip += distance;
                    store_ip!();
                } else {
                    store_ip!();
                    self.push_results(results, ReturnCount::Count(expected as u8));
                }
            }
        }

        self.maybe_collect_garbage();

        Ok(())
    }

    // ---------------------------------------------------------------- calls

    /// Dispatches a call at `callable_index`; arguments sit directly above.
    /// Closures push a frame, everything else completes inline.
    pub(crate) fn begin_call(
        &mut self,
        callable_index: usize,
        arg_count: usize,
        return_count: ReturnCount,
    ) -> Result<(), RuntimeError> {
        let callable = self.value_stack.get(callable_index);

        match callable {
            StackValue::Closure(closure_key) => {
                self.push_closure_frame(closure_key, callable_index, arg_count, return_count)
            }
            StackValue::NativeFunction(native_key) => {
                let results = self.call_native(native_key, callable_index, arg_count)?;
                self.push_results(results, return_count);
                Ok(())
            }
            StackValue::Object(object_key) => {
                self.begin_construction(object_key, callable_index, arg_count, return_count)
            }
            _ => Err(RuntimeErrorData::InvalidCall(callable.type_name()).into()),
        }
    }

    fn push_closure_frame(
        &mut self,
        closure_key: ClosureKey,
        callable_index: usize,
        arg_count: usize,
        return_count: ReturnCount,
    ) -> Result<(), RuntimeError> {
        if self.call_stack.len() >= self.limits.call_depth {
            return Err(RuntimeErrorData::CallDepthExceeded.into());
        }

        let Some(closure) = self.heap.get_closure(closure_key) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };

        let proto = closure.proto.clone();
        let arity = proto.arity as usize;

        // silently pad or truncate to the declared parameter count; a
        // variadic function collects the excess into a table instead
        if arg_count < arity {
            for _ in arg_count..arity {
                self.value_stack.push(StackValue::Nil);
            }
        } else if arg_count > arity {
            if proto.variadic {
                let start = callable_index + 1 + arity;
                let extra = self.value_stack.drain_from(start);

                let table_key = self.heap.create_table(&mut self.gc);
                let mut size = 0;

                if let Some(table) = self.heap.get_table_mut(table_key) {
                    table.reserve_list(extra.len());
                    table.list.extend(extra);
                    size = table.heap_size();
                }

                self.gc.modify_used_memory(size as isize);
                self.value_stack.push(StackValue::Table(table_key));
            } else {
                self.value_stack.pop_count(arg_count - arity);
            }
        }

        if proto.variadic && arg_count <= arity {
            // the variadic slot always exists, even when empty
            let table_key = self.heap.create_table(&mut self.gc);
            self.value_stack.push(StackValue::Table(table_key));
        }

        self.call_stack.push(CallContext {
            closure: closure_key,
            proto,
            ip: 0,
            op_ip: 0,
            stack_base: callable_index,
            return_count,
            constructed: None,
        });

        Ok(())
    }

    fn call_native(
        &mut self,
        native_key: NativeFnKey,
        callable_index: usize,
        arg_count: usize,
    ) -> Result<Vec<StackValue>, RuntimeError> {
        let Some(native) = self.heap.get_native_fn(native_key) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };
        let native = native.shallow_clone();

        debug_assert_eq!(callable_index + 1 + arg_count, self.value_stack.len());

        let raw_args = self.value_stack.drain_from(callable_index + 1);
        self.value_stack.truncate(callable_index);

        let args = MultiValue::from_values(
            raw_args
                .into_iter()
                .map(|value| Value::from_stack_value(&mut self.heap, value)),
        );

        if self.meta_depth >= self.limits.metamethod_depth {
            return Err(RuntimeErrorData::MetamethodDepthExceeded.into());
        }

        self.meta_depth += 1;
        let result = native.call(args, &mut self.context());
        self.meta_depth -= 1;

        let results = result?;

        Ok(results
            .to_vec()
            .into_iter()
            .map(|value| value.to_stack_value())
            .collect())
    }

    fn begin_construction(
        &mut self,
        object_key: ObjectKey,
        callable_index: usize,
        arg_count: usize,
        return_count: ReturnCount,
    ) -> Result<(), RuntimeError> {
        let init_name = StackValue::Bytes(self.metamethod_names.init.0.key());

        let Some(init) = self.lookup_metamethod(StackValue::Object(object_key), init_name)? else {
            return Err(RuntimeErrorData::MissingConstructor(super::TypeName::Object).into());
        };

        let new_object = self.heap.create_object(&mut self.gc, Some(object_key));

        self.value_stack.set(callable_index, init);
        self.value_stack
            .insert(callable_index + 1, StackValue::Object(new_object));

        match init {
            StackValue::Closure(closure_key) => {
                self.push_closure_frame(
                    closure_key,
                    callable_index,
                    arg_count + 1,
                    return_count,
                )?;

                // initializer returns are ignored; the new Object is the
                // call's result
                if let Some(call) = self.call_stack.last_mut() {
                    call.constructed = Some(new_object);
                }

                Ok(())
            }
            StackValue::NativeFunction(native_key) => {
                self.call_native(native_key, callable_index, arg_count + 1)?;
                self.push_results(vec![StackValue::Object(new_object)], return_count);
                Ok(())
            }
            _ => Err(RuntimeErrorData::InvalidCall(init.type_name()).into()),
        }
    }

    /// Handles `RETURN n`: collects results, closes upvalues into the
    /// frame's window, and hands back what the caller asked for.
    fn finish_frame(&mut self, result_count: usize) {
        let call = self.call_stack.pop().unwrap();

        let results_start = self.value_stack.len().saturating_sub(result_count);
        let mut results = self.value_stack.drain_from(results_start);

        if let Some(object_key) = call.constructed {
            results.clear();
            results.push(StackValue::Object(object_key));
        }

        self.close_up_values(call.stack_base);
        self.value_stack.truncate(call.stack_base);

        self.push_results(results, call.return_count);
    }

    fn push_results(&mut self, results: Vec<StackValue>, return_count: ReturnCount) {
        match return_count {
            ReturnCount::Discard => {}
            ReturnCount::All => self.value_stack.extend(results),
            ReturnCount::Count(count) => {
                let count = count as usize;

                self.value_stack.extend(
                    results
                        .into_iter()
                        .chain(std::iter::repeat(StackValue::Nil))
                        .take(count),
                );
            }
        }
    }

    /// Completes a call started at `callable_index`, running any pushed
    /// frames to completion.
    pub(crate) fn complete_call_at(
        &mut self,
        callable_index: usize,
        arg_count: usize,
        return_count: ReturnCount,
    ) -> Result<(), RuntimeError> {
        let base_depth = self.call_stack.len();

        self.begin_call(callable_index, arg_count, return_count)?;

        if self.call_stack.len() > base_depth {
            self.run(base_depth)?;
        }

        Ok(())
    }

    /// Calls a value from inside an instruction (metamethods, iterators)
    /// and collects every result. Counted against the re-entry limit.
    pub(crate) fn call_collect(
        &mut self,
        callable: StackValue,
        args: &[StackValue],
    ) -> Result<Vec<StackValue>, RuntimeError> {
        if self.meta_depth >= self.limits.metamethod_depth {
            return Err(RuntimeErrorData::MetamethodDepthExceeded.into());
        }

        let height = self.value_stack.len();
        self.value_stack.push(callable);
        self.value_stack.extend(args.iter().copied());

        self.meta_depth += 1;
        let result = self.complete_call_at(height, args.len(), ReturnCount::All);
        self.meta_depth -= 1;

        if let Err(err) = result {
            self.recover_stack(height);
            return Err(err);
        }

        Ok(self.value_stack.drain_from(height))
    }

    /// Rust-facing call entry: used by the embedding API and `FunctionRef`.
    pub(crate) fn call_stack_value(
        &mut self,
        callable: StackValue,
        args: MultiValue,
    ) -> Result<MultiValue, RuntimeError> {
        if self.meta_depth >= self.limits.metamethod_depth {
            return Err(RuntimeErrorData::MetamethodDepthExceeded.into());
        }

        let height = self.value_stack.len();
        self.value_stack.push(callable);

        let arg_values = args.to_vec();
        let arg_count = arg_values.len();

        for value in arg_values {
            self.value_stack.push(value.to_stack_value());
        }

        self.meta_depth += 1;
        let result = self.complete_call_at(height, arg_count, ReturnCount::All);
        self.meta_depth -= 1;

        if let Err(err) = result {
            self.recover_stack(height);
            return Err(err);
        }

        let raw = self.value_stack.drain_from(height);

        Ok(MultiValue::from_values(
            raw.into_iter()
                .map(|value| Value::from_stack_value(&mut self.heap, value))
                .collect::<Vec<_>>()
                .into_iter(),
        ))
    }

    /// Restores the operand stack after an unwound error, closing any
    /// upvalues that still point into the abandoned region.
    pub(crate) fn recover_stack(&mut self, height: usize) {
        self.close_up_values(height);
        self.value_stack.truncate(height);
    }

    // ------------------------------------------------------------- upvalues

    /// Finds or creates the open upvalue for a stack slot. At most one open
    /// upvalue exists per slot; closures sharing a slot share it.
    fn capture_up_value(&mut self, slot: usize) -> UpValueKey {
        match self
            .open_up_values
            .binary_search_by_key(&slot, |(s, _)| *s)
        {
            Ok(index) => self.open_up_values[index].1,
            Err(index) => {
                let key = self.heap.store_up_value(&mut self.gc, UpValue::Open(slot));
                self.open_up_values.insert(index, (slot, key));
                key
            }
        }
    }

    /// Closes every open upvalue at or above `from_slot`.
    pub(crate) fn close_up_values(&mut self, from_slot: usize) {
        while let Some(&(slot, key)) = self.open_up_values.last() {
            if slot < from_slot {
                break;
            }

            let value = self.value_stack.get(slot);

            if let Some(up_value) = self.heap.get_up_value_mut(key) {
                *up_value = UpValue::Closed(value);
            }

            self.open_up_values.pop();
        }
    }

    fn up_value_key(&self, frame_index: usize, index: usize) -> Result<UpValueKey, RuntimeError> {
        let closure_key = self.call_stack[frame_index].closure;

        let Some(closure) = self.heap.get_closure(closure_key) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };

        closure
            .up_values
            .get(index)
            .copied()
            .ok_or_else(|| RuntimeErrorData::InvalidInternalState.into())
    }

    fn read_up_value(
        &mut self,
        frame_index: usize,
        index: usize,
    ) -> Result<StackValue, RuntimeError> {
        let key = self.up_value_key(frame_index, index)?;

        match self.heap.get_up_value(key) {
            Some(UpValue::Open(slot)) => Ok(self.value_stack.get(*slot)),
            Some(UpValue::Closed(value)) => Ok(*value),
            None => Err(RuntimeErrorData::InvalidInternalState.into()),
        }
    }

    fn write_up_value(
        &mut self,
        frame_index: usize,
        index: usize,
        value: StackValue,
    ) -> Result<(), RuntimeError> {
        let key = self.up_value_key(frame_index, index)?;

        match self.heap.get_up_value(key) {
            Some(UpValue::Open(slot)) => {
                let slot = *slot;
                self.value_stack.set(slot, value);
                Ok(())
            }
            Some(UpValue::Closed(_)) => {
                if let Some(up_value) = self.heap.get_up_value_mut(key) {
                    *up_value = UpValue::Closed(value);
                }
                Ok(())
            }
            None => Err(RuntimeErrorData::InvalidInternalState.into()),
        }
    }

    // -------------------------------------------------------------- globals

    fn read_global(&mut self, name: StackValue) -> Result<StackValue, RuntimeError> {
        let Some(globals) = self.heap.get_table(self.globals) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };

        Ok(globals.get(name))
    }

    fn write_global(&mut self, name: StackValue, value: StackValue) -> Result<(), RuntimeError> {
        let Some(globals) = self.heap.get_table_mut(self.globals) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };

        let original_size = globals.heap_size();
        globals.set(name, value);
        let new_size = globals.heap_size();

        self.gc
            .modify_used_memory(new_size as isize - original_size as isize);

        Ok(())
    }

    // --------------------------------------------------------- field access

    /// The prototype chain entry point for a value, if any: an Object's own
    /// prototype, or the registered default for its kind.
    fn effective_proto(&self, value: StackValue) -> Option<ObjectKey> {
        match value {
            StackValue::Object(key) => self
                .heap
                .get_object(key)
                .and_then(|object| object.proto)
                .or(self.proto_registry[ObjectKind::Object.index()]),
            StackValue::Bytes(_) => self.proto_registry[ObjectKind::String.index()],
            StackValue::Table(_) => self.proto_registry[ObjectKind::Table.index()],
            StackValue::Closure(_) | StackValue::NativeFunction(_) => {
                self.proto_registry[ObjectKind::Function.index()]
            }
            _ => None,
        }
    }

    /// The next link in an object's lookup chain: its explicit prototype,
    /// falling back to the registered Object-kind default at the chain's
    /// end. The default itself terminates.
    fn next_in_chain(&self, key: ObjectKey) -> Option<ObjectKey> {
        let proto = self.heap.get_object(key).and_then(|object| object.proto);

        if proto.is_some() {
            return proto;
        }

        let default = self.proto_registry[ObjectKind::Object.index()];

        if default == Some(key) {
            None
        } else {
            default
        }
    }

    /// Walks own fields and the prototype chain for a metamethod. Getter and
    /// setter tables do not apply here.
    pub(crate) fn lookup_metamethod(
        &self,
        value: StackValue,
        name: StackValue,
    ) -> Result<Option<StackValue>, RuntimeError> {
        let mut current = match value {
            StackValue::Object(key) => Some(key),
            _ => self.effective_proto(value),
        };

        for _ in 0..self.limits.proto_chain_depth {
            let Some(object_key) = current else {
                return Ok(None);
            };

            let Some(object) = self.heap.get_object(object_key) else {
                return Err(RuntimeErrorData::InvalidInternalState.into());
            };

            let found = object.get(name);

            if found != StackValue::Nil {
                return Ok(Some(found));
            }

            current = self.next_in_chain(object_key);
        }

        Err(RuntimeErrorData::PrototypeChainTooLong.into())
    }

    /// Full field read with metamethod dispatch: own fields, then the
    /// prototype chain, then `__getter` entries, then `__index`.
    pub(crate) fn get_field(
        &mut self,
        receiver: StackValue,
        key: StackValue,
    ) -> Result<StackValue, RuntimeError> {
        match receiver {
            StackValue::Table(table_key) => {
                // bare tables never dispatch metamethods
                let Some(table) = self.heap.get_table(table_key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                Ok(table.get(key))
            }
            StackValue::Object(object_key) => self.object_field_lookup(object_key, key, receiver),
            StackValue::Bytes(bytes_key) => {
                if let StackValue::Number(n) = key {
                    // indexing a string yields its one-byte substrings
                    let Some(bytes) = self.heap.get_bytes(bytes_key) else {
                        return Err(RuntimeErrorData::InvalidInternalState.into());
                    };

                    let index = crate::languages::ember::coerce_index(n)
                        .filter(|&i| i < bytes.len())
                        .ok_or(RuntimeErrorData::OutOfBounds)?;

                    let byte = bytes.as_bytes()[index];
                    let key = self.heap.intern_bytes(&mut self.gc, &[byte]);

                    return Ok(StackValue::Bytes(key));
                }

                let Some(proto) = self.effective_proto(receiver) else {
                    return Ok(StackValue::Nil);
                };

                self.object_field_lookup(proto, key, receiver)
            }
            _ => Err(RuntimeErrorData::AttemptToIndex(receiver.type_name()).into()),
        }
    }

    fn object_field_lookup(
        &mut self,
        start: ObjectKey,
        key: StackValue,
        receiver: StackValue,
    ) -> Result<StackValue, RuntimeError> {
        let getter_name = StackValue::Bytes(self.metamethod_names.getter.0.key());
        let index_name = StackValue::Bytes(self.metamethod_names.index.0.key());

        let mut getter = None;
        let mut index_fn = None;

        let mut current = Some(start);

        for _ in 0..self.limits.proto_chain_depth {
            let Some(object_key) = current else {
                break;
            };

            let Some(object) = self.heap.get_object(object_key) else {
                return Err(RuntimeErrorData::InvalidInternalState.into());
            };

            let found = object.get(key);

            if found != StackValue::Nil {
                return Ok(found);
            }

            if getter.is_none() {
                if let StackValue::Table(getter_key) = object.get(getter_name) {
                    if let Some(table) = self.heap.get_table(getter_key) {
                        let entry = table.get(key);

                        if entry != StackValue::Nil {
                            getter = Some(entry);
                        }
                    }
                }
            }

            if index_fn.is_none() {
                let entry = object.get(index_name);

                if entry != StackValue::Nil {
                    index_fn = Some(entry);
                }
            }

            current = self.next_in_chain(object_key);
        }

        if current.is_some() {
            return Err(RuntimeErrorData::PrototypeChainTooLong.into());
        }

        if let Some(getter) = getter {
            let results = self.call_collect(getter, &[receiver])?;
            return Ok(results.first().copied().unwrap_or_default());
        }

        if let Some(index_fn) = index_fn {
            let results = self.call_collect(index_fn, &[receiver, key])?;
            return Ok(results.first().copied().unwrap_or_default());
        }

        Ok(StackValue::Nil)
    }

    /// Full field write: `__setter` entries, then `__newindex`, then the
    /// own field map. Assignment never writes into a prototype.
    pub(crate) fn set_field(
        &mut self,
        receiver: StackValue,
        key: StackValue,
        value: StackValue,
    ) -> Result<(), RuntimeError> {
        match receiver {
            StackValue::Table(table_key) => {
                let Some(table) = self.heap.get_table_mut(table_key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                let original_size = table.heap_size();
                table.set(key, value);
                let new_size = table.heap_size();

                self.gc
                    .modify_used_memory(new_size as isize - original_size as isize);

                Ok(())
            }
            StackValue::Object(object_key) => {
                let setter_name = StackValue::Bytes(self.metamethod_names.setter.0.key());
                let newindex_name = StackValue::Bytes(self.metamethod_names.newindex.0.key());

                let mut setter = None;
                let mut newindex_fn = None;

                let mut current = Some(object_key);

                for _ in 0..self.limits.proto_chain_depth {
                    let Some(chain_key) = current else {
                        break;
                    };

                    let Some(object) = self.heap.get_object(chain_key) else {
                        return Err(RuntimeErrorData::InvalidInternalState.into());
                    };

                    if setter.is_none() {
                        if let StackValue::Table(setter_key) = object.get(setter_name) {
                            if let Some(table) = self.heap.get_table(setter_key) {
                                let entry = table.get(key);

                                if entry != StackValue::Nil {
                                    setter = Some(entry);
                                }
                            }
                        }
                    }

                    if newindex_fn.is_none() {
                        let entry = object.get(newindex_name);

                        if entry != StackValue::Nil {
                            newindex_fn = Some(entry);
                        }
                    }

                    current = self.next_in_chain(chain_key);
                }

                if current.is_some() {
                    return Err(RuntimeErrorData::PrototypeChainTooLong.into());
                }

                if let Some(setter) = setter {
                    self.call_collect(setter, &[receiver, value])?;
                    return Ok(());
                }

                if let Some(newindex_fn) = newindex_fn {
                    self.call_collect(newindex_fn, &[receiver, key, value])?;
                    return Ok(());
                }

                let Some(object) = self.heap.get_object_mut(object_key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                let original_size = object.heap_size();
                object.set(key, value);
                let new_size = object.heap_size();

                self.gc
                    .modify_used_memory(new_size as isize - original_size as isize);

                Ok(())
            }
            _ => Err(RuntimeErrorData::AttemptToIndex(receiver.type_name()).into()),
        }
    }

    /// Errors when making `proto` the prototype of `target` would create a
    /// cycle through `target`.
    pub(crate) fn check_proto_cycle(
        &self,
        target: ObjectKey,
        proto: ObjectKey,
    ) -> Result<(), RuntimeError> {
        let mut current = Some(proto);

        for _ in 0..self.limits.proto_chain_depth {
            let Some(key) = current else {
                return Ok(());
            };

            if key == target {
                return Err(RuntimeErrorData::PrototypeCycle.into());
            }

            current = self.heap.get_object(key).and_then(|object| object.proto);
        }

        Err(RuntimeErrorData::PrototypeChainTooLong.into())
    }

    // ------------------------------------------------------------ operators

    fn resolve_count(&mut self, value: StackValue) -> Result<usize, RuntimeError> {
        match value {
            StackValue::Bytes(key) => {
                let Some(bytes) = self.heap.get_bytes(key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                Ok(bytes.len())
            }
            StackValue::Table(key) => {
                let Some(table) = self.heap.get_table(key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                Ok(table.count())
            }
            StackValue::Object(key) => {
                let Some(object) = self.heap.get_object(key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                Ok(object.field_count())
            }
            _ => Err(RuntimeErrorData::NoLength(value.type_name()).into()),
        }
    }

    /// Equality: structural on numbers and bools, identity on references.
    /// Strings are interned, so identity equals byte equality. Distinct
    /// Objects may override through `__equal`.
    pub(crate) fn values_equal(
        &mut self,
        a: StackValue,
        b: StackValue,
    ) -> Result<bool, RuntimeError> {
        if a == b {
            return Ok(true);
        }

        if let (StackValue::Object(_), StackValue::Object(_)) = (a, b) {
            let equal_name = StackValue::Bytes(self.metamethod_names.equal.0.key());

            if let Some(equal_fn) = self.lookup_metamethod(a, equal_name)? {
                let results = self.call_collect(equal_fn, &[a, b])?;
                return Ok(results.first().copied().unwrap_or_default().is_truthy());
            }
        }

        Ok(false)
    }

    fn compare_values(
        &mut self,
        op: OpCode,
        a: StackValue,
        b: StackValue,
    ) -> Result<bool, RuntimeError> {
        match (a, b) {
            (StackValue::Number(a), StackValue::Number(b)) => Ok(match op {
                OpCode::Greater => a > b,
                OpCode::Less => a < b,
                OpCode::GreaterEqual => a >= b,
                OpCode::LessEqual => a <= b,
                _ => unreachable!(),
            }),
            (StackValue::Bytes(a_key), StackValue::Bytes(b_key)) => {
                let (Some(a), Some(b)) = (self.heap.get_bytes(a_key), self.heap.get_bytes(b_key))
                else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                let (a, b) = (a.as_bytes(), b.as_bytes());

                Ok(match op {
                    OpCode::Greater => a > b,
                    OpCode::Less => a < b,
                    OpCode::GreaterEqual => a >= b,
                    OpCode::LessEqual => a <= b,
                    _ => unreachable!(),
                })
            }
            _ => Err(RuntimeErrorData::InvalidCompare(a.type_name(), b.type_name()).into()),
        }
    }

    // ------------------------------------------------------------ iteration

    fn resolve_iterator(&mut self, value: StackValue) -> Result<StackValue, RuntimeError> {
        match value {
            StackValue::Object(_) => {
                let iter_name = StackValue::Bytes(self.metamethod_names.iter.0.key());

                if let Some(iter_fn) = self.lookup_metamethod(value, iter_name)? {
                    let results = self.call_collect(iter_fn, &[value])?;
                    return Ok(results.first().copied().unwrap_or_default());
                }

                // without __iter, a value that provides __next is its own
                // iterator
                let next_name = StackValue::Bytes(self.metamethod_names.next.0.key());

                if self.lookup_metamethod(value, next_name)?.is_some() {
                    return Ok(value);
                }

                Err(RuntimeErrorData::NotIterable(value.type_name()).into())
            }
            StackValue::Table(_) => self.make_table_iterator(value),
            _ => Err(RuntimeErrorData::NotIterable(value.type_name()).into()),
        }
    }

    /// Builds an iterator object for a bare table: a record holding the
    /// table and the last visited key, plus a shared native `__next` that
    /// steps insertion order yielding `(key, value)`.
    fn make_table_iterator(&mut self, table: StackValue) -> Result<StackValue, RuntimeError> {
        let next_fn = self.table_next_fn();

        let table_field = self.heap.intern_bytes(&mut self.gc, b"table");
        let next_name = self.metamethod_names.next.0.key();

        let iterator_key = self.heap.create_object(&mut self.gc, None);

        let Some(iterator) = self.heap.get_object_mut(iterator_key) else {
            return Err(RuntimeErrorData::InvalidInternalState.into());
        };

        iterator.set(StackValue::Bytes(table_field), table);
        iterator.set(
            StackValue::Bytes(next_name),
            StackValue::NativeFunction(next_fn),
        );

        Ok(StackValue::Object(iterator_key))
    }

    fn table_next_fn(&mut self) -> NativeFnKey {
        if let Some(key) = self.table_next_fn {
            return key;
        }

        let function = super::native_function::NativeFunction::from(table_iterator_next);

        let key = self.heap.store_native_fn(&mut self.gc, function);

        self.table_next_fn = Some(key);
        key
    }

    // -------------------------------------------------------- stringifying

    /// Converts a value to its printable byte form, dispatching `__tostring`
    /// for Objects that define it.
    pub(crate) fn stringify(&mut self, value: StackValue) -> Result<Vec<u8>, RuntimeError> {
        match value {
            StackValue::Nil => Ok(b"nil".to_vec()),
            StackValue::Bool(true) => Ok(b"true".to_vec()),
            StackValue::Bool(false) => Ok(b"false".to_vec()),
            StackValue::Number(n) => Ok(format_number(n).into_bytes()),
            StackValue::Bytes(key) => {
                let Some(bytes) = self.heap.get_bytes(key) else {
                    return Err(RuntimeErrorData::InvalidInternalState.into());
                };

                Ok(bytes.as_bytes().to_vec())
            }
            StackValue::Object(key) => {
                let tostring_name = StackValue::Bytes(self.metamethod_names.tostring.0.key());

                if let Some(tostring_fn) = self.lookup_metamethod(value, tostring_name)? {
                    let results = self.call_collect(tostring_fn, &[value])?;
                    let result = results.first().copied().unwrap_or_default();

                    if let StackValue::Bytes(bytes_key) = result {
                        if let Some(bytes) = self.heap.get_bytes(bytes_key) {
                            return Ok(bytes.as_bytes().to_vec());
                        }
                    }

                    return self.stringify(result);
                }

                Ok(format!("<object: 0x{:08x}>", key.as_ffi() as u32).into_bytes())
            }
            StackValue::Table(key) => {
                Ok(format!("<table: 0x{:08x}>", key.as_ffi() as u32).into_bytes())
            }
            StackValue::Closure(key) => {
                Ok(format!("<function: 0x{:08x}>", key.as_ffi() as u32).into_bytes())
            }
            StackValue::NativeFunction(key) => {
                Ok(format!("<function: 0x{:08x}>", key.as_ffi() as u32).into_bytes())
            }
            StackValue::Function(_) => Err(RuntimeErrorData::InvalidInternalState.into()),
        }
    }
}

fn table_iterator_next(
    args: MultiValue,
    ctx: &mut super::vm::VmContext,
) -> Result<MultiValue, RuntimeError> {
    let (iterator,): (super::ObjectRef,) = args.unpack_args(ctx)?;

    let table: super::TableRef = iterator.raw_get("table", ctx)?;
    let previous: Value = iterator.raw_get("prev", ctx)?;

    let entry: Option<(Value, Value)> = table.next(previous, ctx)?;

    let Some((key, value)) = entry else {
        return MultiValue::pack(Value::Nil, ctx);
    };

    iterator.raw_set("prev", key.clone(), ctx)?;

    MultiValue::pack((key, value), ctx)
}

/// Canonical number formatting: integral values in range print without a
/// fractional part, everything else uses the shortest round-trip form.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::format_number;
    use crate::interpreter::chunk::Chunk;
    use crate::interpreter::function::{Closure, FnProto};
    use crate::interpreter::multi::MultiValue;
    use crate::interpreter::up_values::UpValue;
    use crate::interpreter::value::Value;
    use crate::interpreter::value_stack::StackValue;
    use crate::interpreter::{OpCode, Vm};

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    fn run_chunk(vm: &mut Vm, chunk: Chunk) -> MultiValue {
        let proto = FnProto {
            module: "test".into(),
            name: "main".into(),
            arity: 0,
            variadic: false,
            up_value_count: 0,
            chunk,
        };

        let fn_key = vm.heap.store_fn_proto(&mut vm.gc, proto);
        let proto = vm.heap.get_fn_proto(fn_key).unwrap().clone();

        let closure_key = vm.heap.store_closure(
            &mut vm.gc,
            Closure {
                fn_key,
                proto,
                up_values: Default::default(),
            },
        );

        vm.call_stack_value(StackValue::Closure(closure_key), MultiValue::default())
            .unwrap()
    }

    #[test]
    fn hand_assembled_arithmetic() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::default();

        let two = chunk.add_constant(StackValue::Number(2.0)).unwrap();
        let three = chunk.add_constant(StackValue::Number(3.0)).unwrap();
        let four = chunk.add_constant(StackValue::Number(4.0)).unwrap();

        // (2 + 3) * 4
        chunk.write_op(OpCode::LoadConst, 1);
        chunk.write_u16(two, 1);
        chunk.write_op(OpCode::LoadConst, 1);
        chunk.write_u16(three, 1);
        chunk.write_op(OpCode::Add, 1);
        chunk.write_op(OpCode::LoadConst, 1);
        chunk.write_u16(four, 1);
        chunk.write_op(OpCode::Mult, 1);
        chunk.write_op(OpCode::Return, 1);
        chunk.write_u8(1, 1);

        let mut results = run_chunk(&mut vm, chunk);
        assert_eq!(results.pop_front(), Some(Value::Number(20.0)));
        assert!(results.is_empty());
    }

    #[test]
    fn hand_assembled_jumps() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::default();

        // false branch of `if false then 1 else 2 end`
        let one = chunk.add_constant(StackValue::Number(1.0)).unwrap();
        let two = chunk.add_constant(StackValue::Number(2.0)).unwrap();

        chunk.write_op(OpCode::False, 1);
        let branch = chunk.write_jump(OpCode::PopJumpIfFalse, 1);
        chunk.write_op(OpCode::LoadConst, 1);
        chunk.write_u16(one, 1);
        let done = chunk.write_jump(OpCode::Jump, 1);
        assert!(chunk.patch_jump(branch));
        chunk.write_op(OpCode::LoadConst, 1);
        chunk.write_u16(two, 1);
        assert!(chunk.patch_jump(done));
        chunk.write_op(OpCode::Return, 1);
        chunk.write_u8(1, 1);

        let mut results = run_chunk(&mut vm, chunk);
        assert_eq!(results.pop_front(), Some(Value::Number(2.0)));
    }

    #[test]
    fn runtime_errors_carry_lines() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::default();

        chunk.write_op(OpCode::Nil, 3);
        chunk.write_op(OpCode::Nil, 3);
        chunk.write_op(OpCode::Add, 3);
        chunk.write_op(OpCode::Return, 4);
        chunk.write_u8(1, 4);

        let proto = FnProto {
            module: "test".into(),
            name: "main".into(),
            arity: 0,
            variadic: false,
            up_value_count: 0,
            chunk,
        };

        let fn_key = vm.heap.store_fn_proto(&mut vm.gc, proto);
        let proto = vm.heap.get_fn_proto(fn_key).unwrap().clone();
        let closure_key = vm.heap.store_closure(
            &mut vm.gc,
            Closure {
                fn_key,
                proto,
                up_values: Default::default(),
            },
        );

        let err = vm
            .call_stack_value(StackValue::Closure(closure_key), MultiValue::default())
            .unwrap_err();

        let frame = &err.trace.frames()[0];
        assert_eq!(frame.line(), 3);
        assert_eq!(frame.source_name(), "test");
    }

    #[test]
    fn open_up_values_are_unique_per_slot() {
        let mut vm = Vm::new();

        vm.value_stack.push(StackValue::Number(1.0));
        vm.value_stack.push(StackValue::Number(2.0));

        let a = vm.capture_up_value(0);
        let b = vm.capture_up_value(1);
        let a_again = vm.capture_up_value(0);

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(vm.open_up_values.len(), 2);

        // list stays sorted by slot even with out-of-order captures
        assert!(vm
            .open_up_values
            .windows(2)
            .all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn closing_copies_the_current_value() {
        let mut vm = Vm::new();

        vm.value_stack.push(StackValue::Number(1.0));
        let key = vm.capture_up_value(0);

        assert_eq!(vm.heap.get_up_value(key), Some(&UpValue::Open(0)));

        vm.value_stack.set(0, StackValue::Number(7.0));
        vm.close_up_values(0);

        assert_eq!(
            vm.heap.get_up_value(key),
            Some(&UpValue::Closed(StackValue::Number(7.0)))
        );
        assert!(vm.open_up_values.is_empty());
    }
}
