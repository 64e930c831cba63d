use ember::interpreter::{MultiValue, Value, Vm};
use ember::languages::ember::std::{impl_basic, impl_string, impl_vm};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

/// Runs a script with `print` captured, returning everything it printed.
/// Panics on compile or runtime errors.
fn run(source: &str) -> String {
    try_run(source).unwrap_or_else(|err| panic!("{err}\n\nsource:\n{source}"))
}

fn try_run(source: &str) -> Result<String, String> {
    let out = Rc::new(RefCell::new(Vec::<u8>::new()));

    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    impl_basic(ctx).unwrap();
    impl_string(ctx).unwrap();
    impl_vm(ctx).unwrap();

    // capture print
    let out_capture = out.clone();

    let print_ref = ctx.create_function(move |args, ctx| {
        let mut out = out_capture.borrow_mut();

        for value in args.to_vec() {
            let bytes = ctx.stringify_value(&value)?;
            out.extend_from_slice(&bytes);
        }

        out.push(b'\n');

        MultiValue::pack((), ctx)
    });

    let globals = ctx.globals();
    globals.set("print", print_ref, ctx).unwrap();

    ctx.compile_string(source, "test")
        .map_err(|errors| errors.to_string())?;

    let result = ctx.pcall(0, 0).map_err(|err| err.to_string());

    if result.is_err() {
        // drop the pushed error value
        ctx.pop_count(1);
    }

    assert_eq!(ctx.stack_len(), 0, "operand stack should be balanced");

    result?;

    let printed = String::from_utf8_lossy(&out.borrow()).into_owned();
    Ok(printed)
}

#[test]
fn arithmetic() {
    assert_eq!(run("print(1+2*3)"), "7\n");
    assert_eq!(run("print((1+2)*3)"), "9\n");
    assert_eq!(run("print(10 / 4)"), "2.5\n");
    assert_eq!(run("print(7 % 3)"), "1\n");
    assert_eq!(run("print(-(2+3))"), "-5\n");
}

#[test]
fn division_by_zero_follows_ieee() {
    assert_eq!(run("print(1 / 0)"), "inf\n");
    assert_eq!(run("print(-1 / 0)"), "-inf\n");
    assert_eq!(run("print((0 / 0) != (0 / 0))"), "true\n");
}

#[test]
fn comparisons_and_equality() {
    assert_eq!(run("print(1 < 2, 2 <= 2, 3 > 4, 4 >= 5)"), "truetruefalsefalse\n");
    assert_eq!(run("print(1 == 1, 1 != 2)"), "truetrue\n");
    assert_eq!(run("print(\"a\" < \"b\", \"abc\" == \"abc\")"), "truetrue\n");
    assert_eq!(run("print(nil == nil, nil == false)"), "truefalse\n");
}

#[test]
fn truthiness() {
    assert_eq!(run("if 0 then print(\"zero is truthy\") end"), "zero is truthy\n");
    assert_eq!(run("if nil then print(\"no\") else print(\"nil is falsy\") end"), "nil is falsy\n");
    assert_eq!(run("print(!nil, !false, !0)"), "truetruefalse\n");
}

#[test]
fn short_circuit() {
    assert_eq!(run("print(true and 1)"), "1\n");
    assert_eq!(run("print(false and 1)"), "false\n");
    assert_eq!(run("print(false or 2)"), "2\n");
    assert_eq!(run("print(1 or 2)"), "1\n");

    // the right side must not be evaluated
    assert_eq!(
        run("var hits = 0\n\
             function bump() hits++ ; return true end\n\
             var _ = false and bump()\n\
             var __ = true or bump()\n\
             print(hits)"),
        "0\n"
    );
}

#[test]
fn concat() {
    assert_eq!(run("print(\"a\" .. 1 .. true)"), "a1true\n");
    assert_eq!(run("print(1 .. 2)"), "12\n");
}

#[test]
fn locals_and_scopes() {
    assert_eq!(
        run("var a = 1\n\
             do\n\
               var b = 2\n\
               do var c = 3 print(a + b + c) end\n\
             end\n\
             print(a)"),
        "6\n1\n"
    );

    // shadowing in an inner scope leaves the outer local alone
    assert_eq!(
        run("var x = 1\n\
             do var x = 2 print(x) end\n\
             print(x)"),
        "2\n1\n"
    );
}

#[test]
fn var_lists() {
    assert_eq!(run("var a, b, c = 1, 2 print(a, b, c)"), "12nil\n");
    assert_eq!(run("var a = 1, 2 print(a)"), "1\n");

    assert_eq!(
        run("function pair() return 1, 2 end\n\
             var a, b = pair()\n\
             print(a, b)"),
        "12\n"
    );
}

#[test]
fn globals() {
    assert_eq!(
        run("x = 5\n\
             function read() return x end\n\
             x = x + 1\n\
             print(read())"),
        "6\n"
    );
}

#[test]
fn while_loop() {
    assert_eq!(
        run("var i = 0\n\
             while i < 5 do i++ end\n\
             print(i)"),
        "5\n"
    );
}

#[test]
fn break_and_continue() {
    assert_eq!(
        run("var i = 0\n\
             while true do\n\
               i++\n\
               if i >= 5 then break end\n\
             end\n\
             print(i)"),
        "5\n"
    );

    assert_eq!(
        run("var total = 0\n\
             var i = 0\n\
             while i < 10 do\n\
               i++\n\
               if i % 2 == 0 then continue end\n\
               total = total + i\n\
             end\n\
             print(total)"),
        "25\n"
    );
}

#[test]
fn c_style_for() {
    assert_eq!(
        run("for (var i = 0; i < 3; i++) do print(i) end"),
        "0\n1\n2\n"
    );

    // break exits, locals scoped to the loop
    assert_eq!(
        run("var last = 0\n\
             for (var i = 0; ; i++) do\n\
               if i > 3 then break end\n\
               last = i\n\
             end\n\
             print(last)"),
        "3\n"
    );
}

#[test]
fn increments() {
    assert_eq!(run("var i = 1 print(i++) print(i)"), "1\n2\n");
    assert_eq!(run("var i = 1 print(++i) print(i)"), "2\n2\n");
    assert_eq!(run("var i = 1 print(i--) print(--i)"), "1\n-1\n");

    // fields and indices
    assert_eq!(
        run("var t = {}\n\
             t[\"k\"] = 1\n\
             t[\"k\"]++\n\
             print(t[\"k\"])\n\
             print(++t[\"k\"])"),
        "2\n3\n"
    );
}

#[test]
fn functions_and_returns() {
    assert_eq!(
        run("function add(a, b) return a + b end\n\
             print(add(3, 4))"),
        "7\n"
    );

    // missing arguments pad with nil, extras are dropped
    assert_eq!(
        run("function probe(a, b) return type(b) end\n\
             print(probe(1))\n\
             print(probe(1, 2, 3))"),
        "nil\nnumber\n"
    );

    // implicit return yields nil
    assert_eq!(
        run("function nothing() end\n\
             print(type(nothing()))"),
        "nil\n"
    );
}

#[test]
fn variadic_functions() {
    assert_eq!(
        run("function count(first, ...rest) return #rest end\n\
             print(count(1, 2, 3, 4))"),
        "3\n"
    );

    assert_eq!(
        run("function first_extra(a, ...rest) return rest[0] end\n\
             print(first_extra(1, \"x\", \"y\"))"),
        "x\n"
    );
}

#[test]
fn closure_captures_mutable_local() {
    assert_eq!(
        run("function makeCounter()\n\
               var i = 0\n\
               return (function() i++; return i end)\n\
             end\n\
             var c = makeCounter()\n\
             print(c(), c(), c())"),
        "123\n"
    );
}

#[test]
fn closures_share_upvalues() {
    assert_eq!(
        run("function makePair()\n\
               var v = 0\n\
               local function set(n) v = n end\n\
               local function get() return v end\n\
               return set, get\n\
             end\n\
             var s, g = makePair()\n\
             s(42)\n\
             print(g())"),
        "42\n"
    );
}

#[test]
fn counters_are_independent() {
    assert_eq!(
        run("function makeCounter()\n\
               var i = 0\n\
               return (function() i++; return i end)\n\
             end\n\
             var a = makeCounter()\n\
             var b = makeCounter()\n\
             print(a(), a(), b())"),
        "121\n"
    );
}

#[test]
fn prototype_method_and_constructor() {
    assert_eq!(
        run("proto Point\n\
               function __init(self, x, y)\n\
                 self.x = x; self.y = y\n\
               end\n\
               function sum(self)\n\
                 return self.x + self.y\n\
               end\n\
             end\n\
             print(Point(3,4):sum())"),
        "7\n"
    );
}

#[test]
fn prototype_metamethods() {
    assert_eq!(
        run("proto Box\n\
               function __init(self, v) self.v = v end\n\
               function __tostring(self) return \"box(\" .. self.v .. \")\" end\n\
             end\n\
             print(Box(3))"),
        "box(3)\n"
    );

    assert_eq!(
        run("proto Any\n\
               function __init(self) end\n\
               function __equal(self, other) return true end\n\
             end\n\
             print(Any() == Any())"),
        "true\n"
    );
}

#[test]
fn proto_reflection() {
    // the Object base prototype exposes __proto through a getter
    assert_eq!(
        run("proto Point\n\
               function __init(self, x) self.x = x end\n\
             end\n\
             var p = Point(1)\n\
             print(p.__proto == Point)"),
        "true\n"
    );

    assert_eq!(run("print(type(vm.globals))"), "table\n");
}

#[test]
fn dict_literals() {
    assert_eq!(run("var t = {a: 1, \"b\": 2} print(t.a + t[\"b\"])"), "3\n");
    assert_eq!(run("var t = {0: \"x\", 1: \"y\"} print(t[0] .. t[1])"), "xy\n");
    assert_eq!(run("print(#{a: 1, b: 2})"), "2\n");
}

#[test]
fn table_iteration() {
    assert_eq!(
        run("var t = {0: \"a\", 1: \"b\"}\n\
             for k, v in t do print(k, v) end"),
        "0a\n1b\n"
    );
}

#[test]
fn iterator_protocol() {
    let source = "proto Vector\n\
                    function __init(self)\n\
                      self.items = {}\n\
                      self.count = 0\n\
                    end\n\
                    function push(self, value)\n\
                      self.items[self.count] = value\n\
                      self.count++\n\
                    end\n\
                    function __iter(self)\n\
                      self.cursor = 0\n\
                      return self\n\
                    end\n\
                    function __next(self)\n\
                      var i = self.cursor\n\
                      if i >= self.count then return nil end\n\
                      self.cursor = i + 1\n\
                      return self.items[i]\n\
                    end\n\
                  end\n\
                  var vector = Vector()\n\
                  for (var i = 0; i < 100; i++) do\n\
                    vector:push(i)\n\
                  end\n\
                  var total = 0\n\
                  var expected = 0\n\
                  for value in vector do\n\
                    assert(value == expected)\n\
                    expected++\n\
                    total = total + value\n\
                  end\n\
                  print(total)";

    assert_eq!(run(source), "4950\n");
}

#[test]
fn pcall_traps_errors() {
    assert_eq!(
        run("var ok, err = pcall(function() error_undef() end)\n\
             print(ok)\n\
             print(type(err))"),
        "false\nstring\n"
    );

    assert_eq!(
        run("var ok, value = pcall(function() return 42 end)\n\
             print(ok, value)"),
        "true42\n"
    );

    assert_eq!(
        run("var ok, err = pcall(function() error(\"boom\") end)\n\
             print(ok, err)"),
        "falseboom\n"
    );
}

#[test]
fn string_prototype() {
    assert_eq!(run("print(\"hello\":sub(1))"), "ello\n");
    assert_eq!(run("print((\"hello\"):sub(1, 3))"), "ell\n");

    // dot access on a string resolves through the String prototype, and a
    // dot call passes the string itself as the receiver
    assert_eq!(run("var s = \"hello\" print(s.sub(1))"), "ello\n");

    assert_eq!(run("print(\"hello world\":find(\"world\"))"), "6\n");
    assert_eq!(run("print(type(\"abc\":find(\"zzz\")))"), "nil\n");

    assert_eq!(
        run("var parts = \"a,b,c\":split(\",\")\n\
             print(parts[0], parts[1], parts[2])"),
        "abc\n"
    );

    assert_eq!(run("print(\"A\":charAt(0))"), "65\n");

    // out of range is a runtime error, catchable with pcall
    assert_eq!(
        run("var ok = pcall(function() return \"x\":sub(5) end)\n\
             print(ok)"),
        "false\n"
    );
}

#[test]
fn string_indexing() {
    assert_eq!(run("print(\"abc\"[1])"), "b\n");

    assert_eq!(
        run("var ok = pcall(function() return \"abc\"[9] end)\n\
             print(ok)"),
        "false\n"
    );
}

#[test]
fn tostring_tonumber_round_trip() {
    assert_eq!(run("print(tonumber(tostring(3.5)) == 3.5)"), "true\n");
    assert_eq!(run("print(tonumber(tostring(7)) == 7)"), "true\n");
    assert_eq!(run("print(tonumber(tostring(0.1)) == 0.1)"), "true\n");
    assert_eq!(run("print(type(tonumber(\"not a number\")))"), "nil\n");
}

#[test]
fn calling_non_callables_errors() {
    // a single-value context truncates pcall's results to the flag
    assert_eq!(run("print(pcall(function() return nil() end))"), "false\n");

    assert_eq!(
        run("var ok, err = pcall(function() return nil() end)\n\
             print(ok, err)"),
        "falseattempt to call a nil value\n"
    );

    assert_eq!(
        run("var ok = pcall(function() return (5)(1) end)\n\
             print(ok)"),
        "false\n"
    );
}

#[test]
fn arithmetic_type_errors() {
    assert_eq!(
        run("var ok = pcall(function() return 1 + \"x\" end)\n\
             print(ok)"),
        "false\n"
    );

    assert_eq!(
        run("var ok = pcall(function() return {} + 1 end)\n\
             print(ok)"),
        "false\n"
    );
}

#[test]
fn semicolons_are_statement_separators() {
    assert_eq!(run("var a = 1; var b = 2; print(a + b);"), "3\n");
    assert_eq!(run(";;print(1);;"), "1\n");
}

#[test]
fn comments() {
    assert_eq!(
        run("// line comment\n\
             print(1) // trailing\n\
             /* block\n\
                comment */ print(2)"),
        "1\n2\n"
    );
}

#[test]
fn deep_recursion_overflows_cleanly() {
    assert_eq!(
        run("function dive(n) return dive(n + 1) end\n\
             var ok = pcall(function() return dive(0) end)\n\
             print(ok)"),
        "false\n"
    );
}

#[test]
fn nested_loops_restore_loop_state() {
    assert_eq!(
        run("var total = 0\n\
             var i = 0\n\
             while i < 3 do\n\
               i++\n\
               var j = 0\n\
               while true do\n\
                 j++\n\
                 if j >= 2 then break end\n\
               end\n\
               total = total + j\n\
             end\n\
             print(total, i)"),
        "63\n"
    );
}

// ------------------------------------------------------------- compile errors

fn compile_error(source: &str) -> String {
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let errors = ctx
        .compile_string(source, "test")
        .expect_err("expected a compile error");

    // the failed compile pushes nil for the embedder
    assert!(matches!(ctx.peek_value(0), Value::Nil));

    errors.to_string()
}

#[test]
fn break_outside_loop_is_a_compile_error() {
    assert!(compile_error("break").contains("break"));
    assert!(compile_error("continue").contains("continue"));
}

#[test]
fn return_outside_function_is_a_compile_error() {
    assert!(compile_error("return 1").contains("return"));
}

#[test]
fn invalid_assignment_is_a_compile_error() {
    assert!(compile_error("1 = 2").contains("assignment"));
    assert!(compile_error("a + b = 2").contains("assignment"));
}

#[test]
fn too_many_locals_is_a_compile_error() {
    // slot 0 is reserved for the callee, so the 256th declaration overflows
    let mut source = String::new();

    for i in 0..256 {
        source.push_str(&format!("local l{i} = {i}\n"));
    }

    assert!(compile_error(&source).contains("too many local variables"));

    // one fewer compiles fine
    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    let mut source = String::new();

    for i in 0..255 {
        source.push_str(&format!("local l{i} = {i}\n"));
    }

    ctx.compile_string(&source, "test").unwrap();
}

#[test]
fn duplicate_locals_are_a_compile_error() {
    assert!(compile_error("do var x = 1 var x = 2 end").contains("already in scope"));
}

#[test]
fn panic_mode_reports_one_error_per_statement() {
    let report = compile_error("var = 1;\nvar = 2;");

    assert_eq!(report.lines().count(), 2);
}

#[test]
fn unterminated_string_is_a_compile_error() {
    assert!(compile_error("var s = \"abc").contains("unterminated"));
}
