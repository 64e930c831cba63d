use ember::interpreter::{MultiValue, ObjectKind, Value, Vm};

#[test]
fn stack_round_trip() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_nil().unwrap();
    ctx.push_bool(true).unwrap();
    ctx.push_number(4.5).unwrap();
    ctx.push_string(b"hello").unwrap();

    assert_eq!(ctx.stack_len(), 4);
    assert_eq!(ctx.peek_string_bytes(0).as_deref(), Some(b"hello".as_slice()));
    assert_eq!(ctx.peek_number(1), Some(4.5));
    assert_eq!(ctx.peek_bool(2), Some(true));
    assert!(matches!(ctx.peek_value(3), Value::Nil));

    assert!(matches!(ctx.pop_value(), Value::String(_)));
    ctx.pop_count(3);
    assert_eq!(ctx.stack_len(), 0);
}

#[test]
fn register_and_call_native() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_string(b"add").unwrap();
    ctx.push_function(|args, ctx| {
        let (a, b): (f64, f64) = args.unpack_args(ctx)?;
        MultiValue::pack(a + b, ctx)
    })
    .unwrap();
    ctx.register(1).unwrap();

    ctx.compile_string("result = add(1, 2)", "test").unwrap();
    ctx.pcall(0, 0).unwrap();

    let globals = ctx.globals();
    let result: f64 = globals.get("result", ctx).unwrap();
    assert_eq!(result, 3.0);
}

#[test]
fn call_replaces_callable_and_args_with_results() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_function(|args, ctx| {
        let (a, b): (f64, f64) = args.unpack_args(ctx)?;
        MultiValue::pack((a * b, a + b), ctx)
    })
    .unwrap();
    ctx.push_number(3.0).unwrap();
    ctx.push_number(4.0).unwrap();

    ctx.call(2, 2).unwrap();

    assert_eq!(ctx.stack_len(), 2);
    assert_eq!(ctx.peek_number(1), Some(12.0));
    assert_eq!(ctx.peek_number(0), Some(7.0));
    ctx.pop_count(2);
}

#[test]
fn call_pads_missing_results_with_nil() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_function(|_, ctx| MultiValue::pack(1.0, ctx)).unwrap();
    ctx.call(0, 3).unwrap();

    assert_eq!(ctx.stack_len(), 3);
    assert_eq!(ctx.peek_number(2), Some(1.0));
    assert!(matches!(ctx.peek_value(1), Value::Nil));
    assert!(matches!(ctx.peek_value(0), Value::Nil));
}

#[test]
fn pcall_restores_the_stack_and_pushes_the_error() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_number(999.0).unwrap();

    ctx.push_function(|_, _| {
        Err(ember::errors::RuntimeError::new_static_string("native boom"))
    })
    .unwrap();

    let err = ctx.pcall(0, 1).unwrap_err();
    assert!(err.to_string().contains("native boom"));

    // the surviving value plus the pushed error
    assert_eq!(ctx.stack_len(), 2);
    assert_eq!(
        ctx.peek_string_bytes(0).as_deref(),
        Some(b"native boom".as_slice())
    );
    assert_eq!(ctx.peek_number(1), Some(999.0));
}

#[test]
fn make_table_and_object() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_string(b"x").unwrap();
    ctx.push_number(1.0).unwrap();
    ctx.push_string(b"y").unwrap();
    ctx.push_number(2.0).unwrap();
    ctx.make_table(2).unwrap();

    let Value::Table(table) = ctx.pop_value() else {
        panic!("expected a table");
    };

    let x: f64 = table.get("x", ctx).unwrap();
    let y: f64 = table.get("y", ctx).unwrap();
    assert_eq!((x, y), (1.0, 2.0));

    ctx.push_string(b"kind").unwrap();
    ctx.push_string(b"widget").unwrap();
    ctx.make_object(1).unwrap();

    let Value::Object(object) = ctx.pop_value() else {
        panic!("expected an object");
    };

    let kind: ember::interpreter::ByteString = object.raw_get("kind", ctx).unwrap();
    assert_eq!(kind.as_bytes(), b"widget");
}

#[test]
fn proto_registry_round_trip() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    assert!(ctx.proto_object(ObjectKind::String).is_none());

    let proto = ctx.create_object();
    ctx.register_proto_object(ObjectKind::String, Some(&proto));

    let fetched = ctx.proto_object(ObjectKind::String).unwrap();
    assert_eq!(fetched, proto);

    ctx.register_proto_object(ObjectKind::String, None);
    assert!(ctx.proto_object(ObjectKind::String).is_none());
}

#[test]
fn prototype_cycles_are_rejected() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let a = ctx.create_object();
    let b = ctx.create_object();

    a.set_proto(Some(&b), ctx).unwrap();

    let err = b.set_proto(Some(&a), ctx).unwrap_err();
    assert!(err.to_string().contains("cycle"));

    let err = a.set_proto(Some(&a), ctx).unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn gc_keeps_reachable_values() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let table = ctx.create_table();
    table.set("key", "value", ctx).unwrap();

    ctx.gc_collect();
    ctx.gc_collect();

    let value: ember::interpreter::ByteString = table.get("key", ctx).unwrap();
    assert_eq!(value.as_bytes(), b"value");
}

#[test]
fn gc_evicts_unreachable_interned_strings() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let held = ctx.intern_string(b"held string");
    let held_id = held.id();

    let before = ctx.gc_used_memory();

    drop(ctx.intern_string(b"a dropped string with some length to it"));

    let with_garbage = ctx.gc_used_memory();
    assert!(with_garbage > before);

    ctx.gc_collect();
    assert!(ctx.gc_used_memory() < with_garbage);

    // the anchored string survives with identity intact
    assert_eq!(ctx.intern_string(b"held string").id(), held_id);

    // re-interning the collected bytes hands out a live string again: the
    // sweep also evicted the stale intern-table entry
    let revived = ctx.intern_string(b"a dropped string with some length to it");
    assert_eq!(
        revived.fetch(ctx).unwrap().as_bytes(),
        b"a dropped string with some length to it"
    );
}

#[test]
fn freezing_postpones_collection() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.freeze_gc();
    ctx.freeze_gc();

    drop(ctx.intern_string(b"garbage made while frozen"));
    let with_garbage = ctx.gc_used_memory();

    ctx.gc_collect();
    assert_eq!(ctx.gc_used_memory(), with_garbage);

    // still frozen after one unfreeze; the count must reach zero
    ctx.unfreeze_gc();
    ctx.gc_collect();
    assert_eq!(ctx.gc_used_memory(), with_garbage);

    ctx.unfreeze_gc();
    ctx.gc_collect();
    assert!(ctx.gc_used_memory() < with_garbage);
}

#[test]
fn gc_survives_a_running_script() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_string(b"collect").unwrap();
    ctx.push_function(|_, ctx| {
        ctx.gc_collect();
        MultiValue::pack((), ctx)
    })
    .unwrap();
    ctx.register(1).unwrap();

    // collect mid-run with live locals, upvalues, and garbage churn
    let source = "\
        function makeCounter()\n\
          var i = 0\n\
          return (function() i++; return i end)\n\
        end\n\
        var c = makeCounter()\n\
        var keep = {}\n\
        for (var i = 0; i < 100; i++) do\n\
          keep[i] = \"value \" .. i\n\
          collect()\n\
        end\n\
        total = c() + c() + #keep\n";

    ctx.compile_string(source, "test").unwrap();
    ctx.pcall(0, 0).unwrap();

    let total: f64 = ctx.globals().get("total", ctx).unwrap();
    assert_eq!(total, 103.0);
}

#[test]
fn globals_can_be_replaced_wholesale() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let old_globals = ctx.globals();
    old_globals.set("x", 1.0, ctx).unwrap();

    let new_globals = ctx.create_table();
    ctx.set_globals(&new_globals);

    ctx.compile_string("x = 2", "test").unwrap();
    ctx.pcall(0, 0).unwrap();

    let old_x: f64 = old_globals.get("x", ctx).unwrap();
    let new_x: f64 = new_globals.get("x", ctx).unwrap();

    assert_eq!(old_x, 1.0);
    assert_eq!(new_x, 2.0);
}

#[test]
fn insert_value_places_below_the_top() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.push_number(1.0).unwrap();
    ctx.push_number(3.0).unwrap();
    ctx.insert_value(1, 2.0).unwrap();

    assert_eq!(ctx.peek_number(0), Some(3.0));
    assert_eq!(ctx.peek_number(1), Some(2.0));
    assert_eq!(ctx.peek_number(2), Some(1.0));
}

#[test]
fn compile_errors_push_nil() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let errors = ctx.compile_string("var = ", "test").unwrap_err();
    assert!(!errors.errors().is_empty());

    assert!(matches!(ctx.peek_value(0), Value::Nil));
}

#[test]
fn function_refs_are_callable_from_rust() {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    ctx.compile_string("function double(n) return n * 2 end", "test")
        .unwrap();
    ctx.pcall(0, 0).unwrap();

    let double: ember::interpreter::FunctionRef = ctx.globals().get("double", ctx).unwrap();

    let result: f64 = double.call(21.0, ctx).unwrap();
    assert_eq!(result, 42.0);
}
