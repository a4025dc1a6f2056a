// Proc built-ins
// Provides: Proc.new, call, yield, [], ===, to_proc, arity, lambda?

use super::expect_block;
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::runtime::Builtins;
use crate::vm::value::{Proc, Value};
use std::rc::Rc;

pub fn install(builtins: &Builtins) {
    let proc = &builtins.proc;
    proc.define_singleton_native("new", proc_new);
    proc.define_native("call", proc_call);
    proc.define_native("yield", proc_call);
    proc.define_native("[]", proc_call);
    proc.define_native("===", proc_call);
    proc.define_native("to_proc", proc_to_proc);
    proc.define_native("arity", proc_arity);
    proc.define_native("lambda?", proc_is_lambda);
}

fn expect_proc(recv: &Value) -> Result<&Rc<Proc>, NativeError> {
    recv.as_proc()
        .ok_or_else(|| NativeError::type_error("receiver is not a Proc"))
}

fn proc_new(_vm: &mut dyn ValueCaller, _recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)
        .map_err(|_| NativeError::argument("tried to create Proc object without a block"))?;
    Ok(block.clone())
}

fn proc_call(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    vm.call(recv, args.to_vec())
}

fn proc_to_proc(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

fn proc_arity(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(expect_proc(recv)?.arity()))
}

fn proc_is_lambda(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(expect_proc(recv)?.is_lambda))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_call_forms() {
        assert_eq!(eval("add = lambda { |a, b| a + b }\nadd.call(1, 2)"), "3");
        assert_eq!(eval("add = lambda { |a, b| a + b }\nadd[3, 4]"), "7");
        assert_eq!(eval("sq = proc { |x| x * x }\nsq.yield(5)"), "25");
    }

    #[test]
    fn test_arity_and_lambda_flag() {
        assert_eq!(eval("lambda { |a, b| a }.arity"), "2");
        assert_eq!(eval("proc { |a, b = 1| a }.arity"), "-2");
        assert_eq!(eval("proc { |a| a }.lambda?"), "false");
        assert_eq!(eval("lambda { |a| a }.lambda?"), "true");
    }

    #[test]
    fn test_lambda_arity_is_strict_but_proc_is_loose() {
        assert_eq!(eval("proc { |a, b| b }.call(1)"), "nil");
        assert_eq!(
            eval("lambda { |a, b| b }.call(1)"),
            "ArgumentError: wrong number of arguments (given 1, expected 2)"
        );
    }

    #[test]
    fn test_proc_as_case_matcher() {
        assert_eq!(eval("even = proc { |x| x.even? }\ncase 4\nwhen even then :yes\nelse :no\nend"), ":yes");
    }
}
