use crate::errors::{RuntimeError, RuntimeErrorData};
use crate::interpreter::{MultiValue, ObjectKind, ObjectRef, TableRef, Value, VmContext};

/// Registers the introspection surface: a base prototype for Objects
/// exposing `__proto` through getter/setter entries, and a `vm` object with
/// `globals` and the `baseProtos` prototype registry.
pub fn impl_vm(ctx: &mut VmContext) -> Result<(), RuntimeError> {
    // base prototype for all Objects
    ctx.push_string(b"__getter")?;
    ctx.push_string(b"__proto")?;
    ctx.push_function(|args, ctx| {
        let (object,): (ObjectRef,) = args.unpack_args(ctx)?;
        let proto = object.proto(ctx)?;

        MultiValue::pack(proto, ctx)
    })?;
    ctx.make_table(1)?;

    ctx.push_string(b"__setter")?;
    ctx.push_string(b"__proto")?;
    ctx.push_function(|args, ctx| {
        let (object, proto): (ObjectRef, Option<ObjectRef>) = args.unpack_args(ctx)?;

        object.set_proto(proto.as_ref(), ctx)?;

        MultiValue::pack((), ctx)
    })?;
    ctx.make_table(1)?;

    ctx.make_object(2)?;

    let base_proto = ctx.pop_value();

    if let Value::Object(object_ref) = &base_proto {
        ctx.register_proto_object(ObjectKind::Object, Some(object_ref));
    }

    // vm.*
    ctx.push_string(b"vm")?;

    ctx.push_string(b"baseProtos")?;

    ctx.push_string(b"__index")?;
    ctx.push_function(|args, ctx| {
        let (_, index): (Value, f64) = args.unpack_args(ctx)?;

        let kind = ObjectKind::from_index(index as usize)
            .ok_or(RuntimeErrorData::OutOfBounds)?;

        MultiValue::pack(ctx.proto_object(kind), ctx)
    })?;

    ctx.push_string(b"__newindex")?;
    ctx.push_function(|args, ctx| {
        let (_, index, proto): (Value, f64, ObjectRef) = args.unpack_args(ctx)?;

        let kind = ObjectKind::from_index(index as usize)
            .ok_or(RuntimeErrorData::OutOfBounds)?;

        ctx.register_proto_object(kind, Some(&proto));

        MultiValue::pack((), ctx)
    })?;

    ctx.make_object(2)?;

    ctx.push_string(b"__getter")?;
    ctx.push_string(b"globals")?;
    ctx.push_function(|args, ctx| {
        let (_,): (Value,) = args.unpack_args(ctx)?;
        let globals = ctx.globals();

        MultiValue::pack(globals, ctx)
    })?;
    ctx.make_table(1)?;

    ctx.push_string(b"__setter")?;
    ctx.push_string(b"globals")?;
    ctx.push_function(|args, ctx| {
        let (_, table): (Value, TableRef) = args.unpack_args(ctx)?;

        ctx.set_globals(&table);

        MultiValue::pack((), ctx)
    })?;
    ctx.make_table(1)?;

    ctx.make_object(3)?;

    ctx.register(1)?;

    Ok(())
}
