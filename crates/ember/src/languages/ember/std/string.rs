use crate::errors::{RuntimeError, RuntimeErrorData};
use crate::interpreter::{ByteString, MultiValue, ObjectKind, Value, VmContext};

fn find_subslice(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if start > haystack.len() {
        return None;
    }

    if needle.is_empty() {
        return Some(start);
    }

    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|index| index + start)
}

/// Registers `string.sub`, `string.find`, `string.split`, and
/// `string.charAt`, and installs the same object as the String prototype so
/// method-call syntax works on string values. Indices are 0-based.
pub fn impl_string(ctx: &mut VmContext) -> Result<(), RuntimeError> {
    ctx.push_string(b"string")?;

    ctx.push_string(b"sub")?;
    ctx.push_function(|args, ctx| {
        let (string, index, length): (ByteString, f64, Option<f64>) = args.unpack_args(ctx)?;
        let bytes = string.as_bytes();

        let index = index as isize;

        if index < 0 || index as usize >= bytes.len() {
            return Err(RuntimeError::new_string(format!(
                "string.sub() expected index to be 0-{}, got {}",
                bytes.len().saturating_sub(1),
                index
            )));
        }

        let index = index as usize;

        let slice = match length {
            None => &bytes[index..],
            Some(length) => {
                let length = length as isize;

                if length < 0 || index + length as usize > bytes.len() {
                    return Err(RuntimeError::new_string(format!(
                        "string.sub() goes out of bounds, max length is {}",
                        bytes.len()
                    )));
                }

                &bytes[index..index + length as usize]
            }
        };

        MultiValue::pack(slice, ctx)
    })?;

    ctx.push_string(b"find")?;
    ctx.push_function(|args, ctx| {
        let (string, pattern, start): (ByteString, ByteString, Option<f64>) =
            args.unpack_args(ctx)?;

        let start = start.unwrap_or(0.0).max(0.0) as usize;
        let index = find_subslice(string.as_bytes(), pattern.as_bytes(), start);

        MultiValue::pack(index.map(|i| i as f64), ctx)
    })?;

    ctx.push_string(b"split")?;
    ctx.push_function(|args, ctx| {
        let (string, separator): (ByteString, ByteString) = args.unpack_args(ctx)?;

        let table = ctx.create_table();
        let bytes = string.as_bytes();
        let separator = separator.as_bytes();

        let mut entry = 0usize;
        let mut cursor = 0usize;

        loop {
            match find_subslice(bytes, separator, cursor) {
                Some(index) if !separator.is_empty() => {
                    table.set(entry as f64, &bytes[cursor..index], ctx)?;
                    entry += 1;
                    cursor = index + separator.len();
                }
                _ => {
                    table.set(entry as f64, &bytes[cursor..], ctx)?;
                    break;
                }
            }
        }

        MultiValue::pack(table, ctx)
    })?;

    ctx.push_string(b"charAt")?;
    ctx.push_function(|args, ctx| {
        let (string, index): (ByteString, f64) = args.unpack_args(ctx)?;
        let bytes = string.as_bytes();

        let index = index as isize;

        if index < 0 || index as usize >= bytes.len() {
            return Err(RuntimeErrorData::OutOfBounds.into());
        }

        MultiValue::pack(bytes[index as usize] as f64, ctx)
    })?;

    ctx.make_object(4)?;

    // the object doubles as the prototype for every string value
    let object = ctx.peek_value(0);

    if let Value::Object(object_ref) = &object {
        ctx.register_proto_object(ObjectKind::String, Some(object_ref));
    }

    ctx.register(1)?;

    Ok(())
}
