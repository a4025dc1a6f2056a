// Host-side behaviour of the embedding API

use garnet_core::{Config, Context, Error, HostValue, RunnableState, ValueTag};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

#[test]
fn adds_two_numbers() {
    let ctx = Context::new();
    let value = ctx.load_string("1 + 2", ()).unwrap();
    assert_eq!(value.tag(), ValueTag::Integer);
    assert_eq!(value.to_int().unwrap(), 3);
}

#[test]
fn folds_script_arguments() {
    let ctx = Context::new();
    let value = ctx
        .load_string("ARGV.inject { |x,y| x+y }", (1, 2, 3.5))
        .unwrap();
    assert_eq!(value.to_float().unwrap(), 6.5);
}

#[test]
fn calls_host_function_from_script() {
    let ctx = Context::new();
    let greeter = ctx.define_module("Greeter", None).unwrap();
    greeter
        .define_class_method("say_hello", |ctx| {
            let args = ctx.get_args()?;
            let [name] = args.as_slice() else {
                return Err(Error::Runtime {
                    class: "ArgumentError".to_string(),
                    message: format!("expected 1 argument, got {}", args.len()),
                    backtrace: Vec::new(),
                });
            };
            let name: String = name.to()?;
            ctx.to_value(format!("Hello {}!", name))
        })
        .unwrap();

    let source = "def say_hello(name)\n  Greeter.say_hello(name)\nend\nsay_hello(\"Matz\")";
    let value = ctx.load_string(source, ()).unwrap();
    assert_eq!(value.to::<String>().unwrap(), "Hello Matz!");

    let error = ctx.load_string("Greeter.say_hello", ()).unwrap_err();
    assert_eq!(error.class_name(), Some("ArgumentError"));
    assert_eq!(
        error.to_string(),
        "ArgumentError: expected 1 argument, got 0"
    );
}

#[test]
fn primitives_round_trip() {
    let ctx = Context::new();
    assert_eq!(ctx.to_value(42i64).unwrap().to_int().unwrap(), 42);
    assert_eq!(ctx.to_value(-0.25).unwrap().to_float().unwrap(), -0.25);
    assert!(ctx.to_value(true).unwrap().to_bool().unwrap());
    assert!(ctx.to_value(()).unwrap().is_nil());
    assert_eq!(ctx.to_value("héllo").unwrap().to::<String>().unwrap(), "héllo");
    assert_eq!(
        ctx.to_value(vec![1i64, 2, 3]).unwrap().to::<Vec<i64>>().unwrap(),
        vec![1, 2, 3]
    );
    assert_eq!(ctx.to_value(None::<i64>).unwrap().to::<Option<i64>>().unwrap(), None);
}

#[test]
fn hashes_round_trip_through_the_vm() {
    let ctx = Context::new();
    let mut scores = HashMap::new();
    scores.insert("ada".to_string(), 3i64);
    scores.insert("bob".to_string(), 5);
    let value = ctx.to_value(scores).unwrap();
    assert_eq!(value.tag(), ValueTag::Hash);
    ctx.set_global("scores", &value).unwrap();
    let doubled = ctx
        .load_string("$scores.transform_values { |v| v * 2 }", ())
        .unwrap();
    let back: HashMap<String, i64> = doubled.to().unwrap();
    assert_eq!(back.get("ada"), Some(&6));
    assert_eq!(back.get("bob"), Some(&10));
}

#[test]
fn no_implicit_numeric_coercion() {
    let ctx = Context::new();
    let int = ctx.load_string("2", ()).unwrap();
    let float = ctx.load_string("2.0", ()).unwrap();
    assert_eq!(
        int.to_float(),
        Err(Error::TypeMismatch {
            expected: "float",
            found: ValueTag::Integer
        })
    );
    assert_eq!(
        float.to_int(),
        Err(Error::TypeMismatch {
            expected: "integer",
            found: ValueTag::Float
        })
    );
    assert!(int.to::<f64>().is_err());
    assert!(float.to::<i64>().is_err());
}

#[test]
fn module_scoping() {
    let ctx = Context::new();
    let outer = ctx.define_module("Outer", None).unwrap();
    ctx.define_module("Inner", Some(&outer)).unwrap();

    assert!(ctx.has_module("Inner", Some(&outer)));
    assert!(!ctx.has_module("Inner", None));
    assert!(ctx.has_module("Outer", None));
    assert!(ctx.get_module("Missing", None).is_none());
    assert!(ctx.get_module("Inner", None).is_none());

    let inner = ctx.get_module("Inner", Some(&outer)).unwrap();
    assert_eq!(inner.full_name(), "Outer::Inner");
    let nested = ctx.load_string("Outer::Inner", ()).unwrap();
    assert_eq!(nested.tag(), ValueTag::Module);
    let error = ctx.load_string("Inner", ()).unwrap_err();
    assert_eq!(error.class_name(), Some("NameError"));
}

#[test]
fn defining_twice_reopens() {
    let ctx = Context::new();
    let first = ctx.define_module("Tools", None).unwrap();
    let second = ctx.define_module("Tools", None).unwrap();
    assert!(first.same(&second));

    first
        .define_class_method("ping", |ctx| ctx.to_value("pong"))
        .unwrap();
    second
        .define_class_method("echo", |ctx| {
            let args = ctx.get_args()?;
            match args.into_iter().next() {
                Some(arg) => Ok(arg),
                None => Ok(ctx.nil()),
            }
        })
        .unwrap();
    let value = ctx.load_string("[Tools.ping, Tools.echo(7)]", ()).unwrap();
    assert_eq!(
        value.to_interface().unwrap(),
        HostValue::Array(vec![HostValue::String("pong".into()), HostValue::Int(7)])
    );
}

#[test]
fn callback_errors_propagate_as_exceptions() {
    let ctx = Context::new();
    let io = ctx.define_module("Store", None).unwrap();
    io.define_class_method("fetch", |_ctx| {
        Err(Error::State("store is offline".to_string()))
    })
    .unwrap();

    let error = ctx.load_string("Store.fetch", ()).unwrap_err();
    let Error::Runtime { class, message, .. } = error else {
        panic!("expected a runtime error");
    };
    assert_eq!(class, "RuntimeError");
    assert_eq!(message, "invalid state: store is offline");

    let rescued = ctx
        .load_string("begin\n  Store.fetch\n  :unreached\nrescue => e\n  e.message\nend", ())
        .unwrap();
    assert_eq!(rescued.to::<String>().unwrap(), "invalid state: store is offline");
}

#[test]
fn reentrant_callbacks_see_their_own_arguments() {
    let ctx = Context::new();
    let relay = ctx.define_module("Relay", None).unwrap();
    relay
        .define_class_method("inner", |ctx| {
            let args = ctx.get_args()?;
            ctx.to_value(args.len() as i64 * 100)
        })
        .unwrap();
    relay
        .define_class_method("outer", |ctx| {
            let before = ctx.get_args()?.len() as i64;
            let nested = ctx.load_string("Relay.inner(:a)", ())?.to_int()?;
            let after = ctx.get_args()?.len() as i64;
            ctx.to_value(vec![before, nested, after])
        })
        .unwrap();

    let value = ctx.load_string("Relay.outer(1, 2, 3)", ()).unwrap();
    assert_eq!(value.to::<Vec<i64>>().unwrap(), vec![3, 100, 3]);
    assert!(matches!(ctx.get_args(), Err(Error::State(_))));
}

#[test]
fn nested_runs_leave_the_callers_argv_alone() {
    let ctx = Context::new();
    let hook = ctx.define_module("Hook", None).unwrap();
    hook.define_class_method("inner", |ctx| ctx.load_string("ARGV[0]", ("inner",)))
        .unwrap();
    let value = ctx
        .load_string("seen = Hook.inner\n[seen, ARGV[0]]", ("outer",))
        .unwrap();
    assert_eq!(value.to::<Vec<String>>().unwrap(), vec!["inner", "outer"]);
}

#[test]
fn held_handles_survive_collection() {
    let ctx = Context::new();
    let node = ctx
        .load_string("node = {name: \"root\"}\nnode[:self] = node\nnode", ())
        .unwrap();
    ctx.load_string("junk = []\njunk << junk\nnil", ()).unwrap();

    let emptied = ctx.collect_garbage().unwrap();
    assert!(emptied >= 1, "unreachable self-referencing array is emptied");
    let key = HostValue::Symbol("name".to_string());
    let name = node.call("[]", (key,)).unwrap();
    assert_eq!(name.to::<String>().unwrap(), "root");
    assert!(ctx.gc_stats().collections >= 1);
}

#[test]
fn collection_is_refused_inside_a_callback() {
    let ctx = Context::new();
    let gc = ctx.define_module("Sweep", None).unwrap();
    gc.define_class_method("now", |ctx| {
        let refused = matches!(ctx.collect_garbage(), Err(Error::State(_)));
        ctx.to_value(refused)
    })
    .unwrap();
    assert!(ctx.load_string("Sweep.now", ()).unwrap().to_bool().unwrap());
}

#[test]
fn compile_errors_carry_positions() {
    let ctx = Context::new();
    let error = ctx.parse("x = 1\ny = (2 +\n").unwrap_err();
    let Error::Compile { line, column, .. } = error else {
        panic!("expected a compile error, got {:?}", error);
    };
    assert!(line >= 2, "error reported on line {}", line);
    assert!(column >= 1);
}

#[test]
fn handles_from_another_context_are_rejected() {
    let first = Context::new();
    let second = Context::new();
    let foreign = first.load_string("[1, 2]", ()).unwrap();

    assert!(matches!(second.to_value(&foreign), Err(Error::State(_))));
    assert!(matches!(
        second.load_string("ARGV", (&foreign,)),
        Err(Error::State(_))
    ));
    assert!(matches!(second.set_global("x", &foreign), Err(Error::State(_))));

    let outer = first.define_module("Outer", None).unwrap();
    assert!(matches!(
        second.define_module("Inner", Some(&outer)),
        Err(Error::State(_))
    ));
}

#[test]
fn runnable_runs_once() {
    let ctx = Context::new();
    let mut program = ctx.parse("ARGV.sum").unwrap();
    assert_eq!(program.state(), RunnableState::Compiled);
    let total = program.run_with_args([4i64, 5, 6]).unwrap();
    assert_eq!(total.to_int().unwrap(), 15);
    assert_eq!(program.state(), RunnableState::Executed);
    assert!(matches!(program.run(), Err(Error::State(_))));
}

#[test]
fn no_exec_returns_the_program_as_a_proc() {
    let ctx = Context::with_config(Config::new().no_exec(true)).unwrap();
    let program = ctx.load_string("$touched = true\n6 * 7", ()).unwrap();
    assert_eq!(program.tag(), ValueTag::Proc);
    assert!(ctx.get_global("touched").is_nil());
    let result = program.call("call", ()).unwrap();
    assert_eq!(result.to_int().unwrap(), 42);
    assert!(ctx.get_global("touched").to_bool().unwrap());
}

#[test]
fn options_from_json() {
    let ctx = Context::from_options(r#"{"filename": "job.rb"}"#).unwrap();
    assert_eq!(ctx.config().filename, "job.rb");
    let error = ctx.load_string("raise \"boom\"", ()).unwrap_err();
    let Error::Runtime { backtrace, .. } = error else {
        panic!("expected a runtime error");
    };
    assert!(backtrace[0].starts_with("job.rb:1"));

    assert!(matches!(
        Context::from_options(r#"{"filename": 3}"#),
        Err(Error::Config(_))
    ));
}

#[test]
fn load_string_result_converts() {
    let ctx = Context::new();
    let host = ctx
        .load_string_result("{ok: true, items: [1, \"two\", :three, nil]}", ())
        .unwrap();
    assert_eq!(
        host,
        HostValue::Hash(vec![
            (HostValue::Symbol("ok".into()), HostValue::Bool(true)),
            (
                HostValue::Symbol("items".into()),
                HostValue::Array(vec![
                    HostValue::Int(1),
                    HostValue::String("two".into()),
                    HostValue::Symbol("three".into()),
                    HostValue::Nil,
                ])
            ),
        ])
    );
    let error = ctx.load_string_result("Object.new", ()).unwrap_err();
    assert_eq!(error, Error::UnsupportedType(ValueTag::Object));
}

#[test]
fn close_consumes_the_context() {
    let ctx = Context::new();
    ctx.load_string("$keep = [1, 2, 3]", ()).unwrap();
    ctx.close();
}
