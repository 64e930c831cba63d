use crate::errors::RuntimeError;
use crate::interpreter::{ByteString, MultiValue, Value, VmContext};
use crate::languages::ember::parse_number;
use std::io::Write;

/// Registers the base library: `print`, `assert`, `type`, `pcall`,
/// `tonumber`, `tostring`, `error`, and `loadstring`.
pub fn impl_basic(ctx: &mut VmContext) -> Result<(), RuntimeError> {
    ctx.push_string(b"print")?;
    ctx.push_function(|args, ctx| {
        let mut out = std::io::stdout().lock();

        for value in args.to_vec() {
            let bytes = ctx.stringify_value(&value)?;
            let _ = out.write_all(&bytes);
        }

        let _ = out.write_all(b"\n");

        MultiValue::pack((), ctx)
    })?;

    ctx.push_string(b"assert")?;
    ctx.push_function(|args, ctx| {
        let (passed, message): (bool, Option<ByteString>) = args.unpack_args(ctx)?;

        if !passed {
            return Err(match message {
                Some(message) => RuntimeError::new_byte_string(message),
                None => RuntimeError::new_static_string("assertion failed!"),
            });
        }

        MultiValue::pack((), ctx)
    })?;

    ctx.push_string(b"type")?;
    ctx.push_function(|args, ctx| {
        let (value,): (Value,) = args.unpack_args(ctx)?;

        MultiValue::pack(value.type_name().as_str(), ctx)
    })?;

    ctx.push_string(b"pcall")?;
    ctx.push_function(|mut args, ctx| {
        let Some(callable) = args.pop_front() else {
            return Err(RuntimeError::new_static_string(
                "pcall() expected at least 1 argument",
            ));
        };

        match ctx.call_value(callable, args) {
            Ok(mut results) => {
                results.push_front(Value::Bool(true));
                Ok(results)
            }
            Err(err) => {
                let message = err.data.to_string();
                MultiValue::pack((false, message), ctx)
            }
        }
    })?;

    ctx.push_string(b"tonumber")?;
    ctx.push_function(|args, ctx| {
        let (value,): (Value,) = args.unpack_args(ctx)?;

        let number = match &value {
            Value::Number(n) => Some(*n),
            Value::String(string_ref) => {
                let bytes = string_ref.fetch(ctx)?;
                std::str::from_utf8(bytes.as_bytes())
                    .ok()
                    .and_then(parse_number)
            }
            _ => None,
        };

        MultiValue::pack(number, ctx)
    })?;

    ctx.push_string(b"tostring")?;
    ctx.push_function(|args, ctx| {
        let (value,): (Value,) = args.unpack_args(ctx)?;
        let bytes = ctx.stringify_value(&value)?;

        MultiValue::pack(bytes.as_slice(), ctx)
    })?;

    ctx.push_string(b"error")?;
    ctx.push_function(|args, ctx| {
        let (message,): (Option<ByteString>,) = args.unpack_args(ctx)?;

        Err(match message {
            Some(message) => RuntimeError::new_byte_string(message),
            None => RuntimeError::new_static_string("error!"),
        })
    })?;

    ctx.push_string(b"loadstring")?;
    ctx.push_function(|args, ctx| {
        let (source,): (ByteString,) = args.unpack_args(ctx)?;
        let source = source.to_string_lossy().into_owned();

        match ctx.compile_string(&source, "loadstring") {
            Ok(()) => {
                let function = ctx.pop_value();
                let mut results = MultiValue::pack(function, ctx)?;
                results.push_front(Value::Bool(true));
                Ok(results)
            }
            Err(errors) => {
                // compile_string pushed the nil placeholder
                ctx.pop_count(1);
                MultiValue::pack((false, errors.to_string()), ctx)
            }
        }
    })?;

    ctx.register(8)?;

    Ok(())
}
