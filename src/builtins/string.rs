// String and Symbol built-ins
// Strings are mutable byte sequences; case mapping and stripping are ASCII-only
// Provides: + * << == <=> [] length size upcase downcase capitalize swapcase reverse strip
// lstrip rstrip chomp chars bytes lines split include? start_with? end_with? index sub gsub
// replace center ljust rjust to_i to_f to_s to_sym inspect empty? each_char ord hash

use super::{check_arity, expect_block, expect_bytes, expect_integer, to_s_bytes};
use crate::vm::caller::{NativeError, NativeResult, ValueCaller};
use crate::vm::interner::intern;
use crate::vm::runtime::Builtins;
use crate::vm::value::{inspect_bytes, Proc, ProcBody, Value};
use std::rc::Rc;

pub fn install(builtins: &Builtins) {
    let string = &builtins.string;
    string.define_singleton_native("new", string_new);
    string.define_native("+", string_plus);
    string.define_native("*", string_times);
    string.define_native("%", string_format);
    string.define_native("<<", string_append);
    string.define_native("concat", string_append);
    string.define_native("==", string_equal);
    string.define_native("eql?", string_equal);
    string.define_native("<=>", string_compare);
    string.define_native("[]", string_index);
    string.define_native("slice", string_index);
    string.define_native("length", string_length);
    string.define_native("size", string_length);
    string.define_native("bytesize", string_bytesize);
    string.define_native("upcase", string_upcase);
    string.define_native("downcase", string_downcase);
    string.define_native("capitalize", string_capitalize);
    string.define_native("swapcase", string_swapcase);
    string.define_native("reverse", string_reverse);
    string.define_native("strip", string_strip);
    string.define_native("lstrip", string_lstrip);
    string.define_native("rstrip", string_rstrip);
    string.define_native("chomp", string_chomp);
    string.define_native("chars", string_chars);
    string.define_native("bytes", string_bytes);
    string.define_native("lines", string_lines);
    string.define_native("split", string_split);
    string.define_native("include?", string_include);
    string.define_native("start_with?", string_start_with);
    string.define_native("end_with?", string_end_with);
    string.define_native("index", string_find);
    string.define_native("sub", string_sub);
    string.define_native("gsub", string_gsub);
    string.define_native("replace", string_replace);
    string.define_native("center", string_center);
    string.define_native("ljust", string_ljust);
    string.define_native("rjust", string_rjust);
    string.define_native("to_i", string_to_i);
    string.define_native("to_f", string_to_f);
    string.define_native("to_s", string_to_s);
    string.define_native("to_str", string_to_s);
    string.define_native("to_sym", string_to_sym);
    string.define_native("inspect", string_inspect);
    string.define_native("empty?", string_empty);
    string.define_native("each_char", string_each_char);
    string.define_native("ord", string_ord);
    string.define_native("freeze", string_to_s);

    let symbol = &builtins.symbol;
    symbol.define_native("to_s", symbol_to_s);
    symbol.define_native("name", symbol_to_s);
    symbol.define_native("to_sym", symbol_to_sym);
    symbol.define_native("to_proc", symbol_to_proc);
    symbol.define_native("inspect", symbol_inspect);
    symbol.define_native("length", symbol_length);
    symbol.define_native("size", symbol_length);
    symbol.define_native("<=>", symbol_compare);
}

fn bytes_of(recv: &Value) -> Vec<u8> {
    match recv {
        Value::String(bytes) => bytes.borrow().clone(),
        _ => Vec::new(),
    }
}

fn is_space(byte: &u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c | 0)
}

fn string_new(vm: &mut dyn ValueCaller, _recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    match args.first() {
        Some(value) => Ok(Value::string(expect_bytes(vm, value)?)),
        None => Ok(Value::str("")),
    }
}

fn string_plus(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let mut out = bytes_of(recv);
    out.extend(expect_bytes(vm, &args[0])?);
    Ok(Value::string(out))
}

fn string_times(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let count = expect_integer(vm, &args[0])?;
    if count < 0 {
        return Err(NativeError::argument("negative argument"));
    }
    Ok(Value::string(bytes_of(recv).repeat(count as usize)))
}

/// `"%s and %d" % args`: %s, %d, %f (with precision) and %%
fn string_format(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let values = match &args[0] {
        Value::Array(items) => items.borrow().clone(),
        other => vec![other.clone()],
    };
    let template = bytes_of(recv);
    let mut values = values.into_iter();
    let mut out = Vec::new();
    let mut i = 0;
    while i < template.len() {
        if template[i] != b'%' {
            out.push(template[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut precision = None;
        if template.get(i) == Some(&b'.') {
            let start = i + 1;
            let mut end = start;
            while template.get(end).is_some_and(u8::is_ascii_digit) {
                end += 1;
            }
            precision = std::str::from_utf8(&template[start..end])
                .ok()
                .and_then(|digits| digits.parse::<usize>().ok());
            i = end;
        }
        let Some(&directive) = template.get(i) else {
            return Err(NativeError::argument("incomplete format specifier"));
        };
        i += 1;
        if directive == b'%' {
            out.push(b'%');
            continue;
        }
        let value = values
            .next()
            .ok_or_else(|| NativeError::argument("too few arguments"))?;
        match directive {
            b's' => out.extend(to_s_bytes(vm, &value)?),
            b'd' | b'i' => out.extend(expect_integer(vm, &value)?.to_string().into_bytes()),
            b'f' => {
                let f = super::expect_float(vm, &value)?;
                out.extend(format!("{:.*}", precision.unwrap_or(6), f).into_bytes());
            }
            b'p' => out.extend(super::inspect_value(vm, &value)?.into_bytes()),
            other => {
                return Err(NativeError::argument(format!(
                    "malformed format string - %{}",
                    other as char
                )))
            }
        }
    }
    Ok(Value::string(out))
}

fn string_append(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let addition = match &args[0] {
        Value::Integer(n) => vec![u8::try_from(*n).map_err(|_| NativeError::argument("invalid byte"))?],
        other => expect_bytes(vm, other)?,
    };
    if let Value::String(bytes) = recv {
        bytes.borrow_mut().extend(addition);
    }
    Ok(recv.clone())
}

fn string_equal(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(Value::Bool(match &args[0] {
        Value::String(other) => bytes_of(recv) == *other.borrow(),
        _ => false,
    }))
}

fn string_compare(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(match &args[0] {
        Value::String(other) => Value::Integer(bytes_of(recv).cmp(&other.borrow()) as i64),
        _ => Value::Nil,
    })
}

/// Character-based index for valid UTF-8, byte-based otherwise
fn char_units(bytes: &[u8]) -> Vec<Vec<u8>> {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.chars().map(|c| c.to_string().into_bytes()).collect(),
        Err(_) => bytes.iter().map(|b| vec![*b]).collect(),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { len as i64 + index } else { index };
    usize::try_from(index).ok()
}

fn string_index(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 2)?;
    let units = char_units(&bytes_of(recv));
    let (start, len) = match (&args[0], args.get(1)) {
        (Value::Range(a, b, exclusive), None) => {
            let Some(start) = normalize_index(*a, units.len()) else {
                return Ok(Value::Nil);
            };
            let end = normalize_index(*b, units.len()).map(|e| if *exclusive { e } else { e + 1 });
            (start, end.unwrap_or(0).saturating_sub(start))
        }
        (Value::String(needle), None) => {
            let haystack = bytes_of(recv);
            let needle = needle.borrow().clone();
            return Ok(if find_bytes(&haystack, &needle, 0).is_some() {
                Value::string(needle)
            } else {
                Value::Nil
            });
        }
        (index, None) => {
            let index = expect_integer(vm, index)?;
            match normalize_index(index, units.len()).and_then(|i| units.get(i)) {
                Some(unit) => return Ok(Value::string(unit.clone())),
                None => return Ok(Value::Nil),
            }
        }
        (index, Some(len)) => {
            let Some(start) = normalize_index(expect_integer(vm, index)?, units.len()) else {
                return Ok(Value::Nil);
            };
            let len = expect_integer(vm, len)?;
            if len < 0 {
                return Ok(Value::Nil);
            }
            (start, len as usize)
        }
    };
    if start > units.len() {
        return Ok(Value::Nil);
    }
    let end = (start + len).min(units.len());
    Ok(Value::string(units[start..end].concat()))
}

fn string_length(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(char_units(&bytes_of(recv)).len() as i64))
}

fn string_bytesize(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(bytes_of(recv).len() as i64))
}

fn string_upcase(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::string(bytes_of(recv).to_ascii_uppercase()))
}

fn string_downcase(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::string(bytes_of(recv).to_ascii_lowercase()))
}

fn string_capitalize(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut bytes = bytes_of(recv).to_ascii_lowercase();
    if let Some(first) = bytes.first_mut() {
        first.make_ascii_uppercase();
    }
    Ok(Value::string(bytes))
}

fn string_swapcase(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv)
        .into_iter()
        .map(|b| {
            if b.is_ascii_uppercase() {
                b.to_ascii_lowercase()
            } else {
                b.to_ascii_uppercase()
            }
        })
        .collect::<Vec<u8>>();
    Ok(Value::string(bytes))
}

fn string_reverse(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut units = char_units(&bytes_of(recv));
    units.reverse();
    Ok(Value::string(units.concat()))
}

fn string_strip(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv);
    let start = bytes.iter().position(|b| !is_space(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_space(b)).map_or(start, |e| e + 1);
    Ok(Value::string(bytes[start..end.max(start)].to_vec()))
}

fn string_lstrip(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv);
    let start = bytes.iter().position(|b| !is_space(b)).unwrap_or(bytes.len());
    Ok(Value::string(bytes[start..].to_vec()))
}

fn string_rstrip(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv);
    let end = bytes.iter().rposition(|b| !is_space(b)).map_or(0, |e| e + 1);
    Ok(Value::string(bytes[..end].to_vec()))
}

fn string_chomp(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let mut bytes = bytes_of(recv);
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    } else if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    Ok(Value::string(bytes))
}

fn string_chars(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let chars = char_units(&bytes_of(recv)).into_iter().map(Value::string).collect();
    Ok(vm.runtime().new_array(chars))
}

fn string_bytes(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv)
        .into_iter()
        .map(|b| Value::Integer(b as i64))
        .collect();
    Ok(vm.runtime().new_array(bytes))
}

fn string_lines(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let lines = bytes_of(recv)
        .split_inclusive(|b| *b == b'\n')
        .map(|line| Value::string(line.to_vec()))
        .collect();
    Ok(vm.runtime().new_array(lines))
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}

fn string_split(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 0, 1)?;
    let bytes = bytes_of(recv);
    let separator = match args.first() {
        None | Some(Value::Nil) => None,
        Some(value) => Some(expect_bytes(vm, value)?),
    };
    let parts: Vec<Vec<u8>> = match separator {
        None => split_whitespace(&bytes),
        Some(sep) if sep == b" " => split_whitespace(&bytes),
        Some(sep) if sep.is_empty() => char_units(&bytes),
        Some(sep) => {
            let mut parts = Vec::new();
            let mut start = 0;
            while let Some(found) = find_bytes(&bytes, &sep, start) {
                parts.push(bytes[start..found].to_vec());
                start = found + sep.len();
            }
            parts.push(bytes[start..].to_vec());
            while parts.last().is_some_and(Vec::is_empty) {
                parts.pop();
            }
            parts
        }
    };
    Ok(vm
        .runtime()
        .new_array(parts.into_iter().map(Value::string).collect()))
}

fn split_whitespace(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .split(is_space)
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

fn string_include(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let needle = expect_bytes(vm, &args[0])?;
    Ok(Value::Bool(find_bytes(&bytes_of(recv), &needle, 0).is_some()))
}

fn string_start_with(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv);
    for arg in args {
        if bytes.starts_with(&expect_bytes(vm, arg)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn string_end_with(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv);
    for arg in args {
        if bytes.ends_with(&expect_bytes(vm, arg)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn string_find(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let needle = expect_bytes(vm, &args[0])?;
    let bytes = bytes_of(recv);
    Ok(match find_bytes(&bytes, &needle, 0) {
        Some(offset) => Value::Integer(char_units(&bytes[..offset]).len() as i64),
        None => Value::Nil,
    })
}

fn substitute(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>, global: bool) -> NativeResult {
    check_arity(args, 1, 2)?;
    let bytes = bytes_of(recv);
    let pattern = expect_bytes(vm, &args[0])?;
    if pattern.is_empty() {
        return Ok(Value::string(bytes));
    }
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(found) = find_bytes(&bytes, &pattern, start) {
        out.extend_from_slice(&bytes[start..found]);
        let replacement = match (args.get(1), block) {
            (Some(Value::Hash(table)), _) => {
                let matched = Value::string(pattern.clone());
                let value = table.borrow().get(&matched).cloned().unwrap_or(Value::Nil);
                to_s_bytes(vm, &value)?
            }
            (Some(value), _) => expect_bytes(vm, value)?,
            (None, Some(block)) => {
                let value = vm.call(block, vec![Value::string(pattern.clone())])?;
                to_s_bytes(vm, &value)?
            }
            (None, None) => return Err(NativeError::argument("wrong number of arguments (given 1, expected 2)")),
        };
        out.extend(replacement);
        start = found + pattern.len();
        if !global {
            break;
        }
    }
    out.extend_from_slice(&bytes[start..]);
    Ok(Value::string(out))
}

fn string_sub(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    substitute(vm, recv, args, block, false)
}

fn string_gsub(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], block: Option<&Value>) -> NativeResult {
    substitute(vm, recv, args, block, true)
}

fn string_replace(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    let replacement = expect_bytes(vm, &args[0])?;
    if let Value::String(bytes) = recv {
        *bytes.borrow_mut() = replacement;
    }
    Ok(recv.clone())
}

fn justify(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], left: bool, right: bool) -> NativeResult {
    check_arity(args, 1, 2)?;
    let width = expect_integer(vm, &args[0])?.max(0) as usize;
    let pad = match args.get(1) {
        Some(value) => expect_bytes(vm, value)?,
        None => b" ".to_vec(),
    };
    if pad.is_empty() {
        return Err(NativeError::argument("zero width padding"));
    }
    let bytes = bytes_of(recv);
    let len = char_units(&bytes).len();
    if width <= len {
        return Ok(Value::string(bytes));
    }
    let total = width - len;
    let (before, after) = match (left, right) {
        (true, true) => (total / 2, total - total / 2),
        (true, false) => (total, 0),
        _ => (0, total),
    };
    let fill = |n: usize| pad.iter().copied().cycle().take(n).collect::<Vec<u8>>();
    let mut out = fill(before);
    out.extend(bytes);
    out.extend(fill(after));
    Ok(Value::string(out))
}

fn string_center(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    justify(vm, recv, args, true, true)
}

fn string_ljust(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    justify(vm, recv, args, false, true)
}

fn string_rjust(vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    justify(vm, recv, args, true, false)
}

/// Leading numeric prefix, as `to_i` and `to_f` read it
fn numeric_prefix(bytes: &[u8], float: bool) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start();
    let mut out = String::new();
    let mut seen_dot = false;
    for (i, c) in text.chars().enumerate() {
        match c {
            '+' | '-' if i == 0 => out.push(c),
            '0'..='9' => out.push(c),
            '_' if !out.is_empty() => {}
            '.' if float && !seen_dot => {
                seen_dot = true;
                out.push(c);
            }
            _ => break,
        }
    }
    out
}

fn string_to_i(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let digits = numeric_prefix(&bytes_of(recv), false);
    Ok(Value::Integer(digits.parse::<i64>().unwrap_or(0)))
}

fn string_to_f(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let digits = numeric_prefix(&bytes_of(recv), true);
    let digits = digits.trim_end_matches('.');
    Ok(Value::Float(digits.parse::<f64>().unwrap_or(0.0)))
}

fn string_to_s(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

fn string_to_sym(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let name = String::from_utf8_lossy(&bytes_of(recv)).into_owned();
    Ok(Value::Symbol(intern(&name)))
}

fn string_inspect(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&inspect_bytes(&bytes_of(recv))))
}

fn string_empty(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Bool(bytes_of(recv).is_empty()))
}

fn string_each_char(vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], block: Option<&Value>) -> NativeResult {
    let block = expect_block(block)?;
    for unit in char_units(&bytes_of(recv)) {
        vm.call(block, vec![Value::string(unit)])?;
    }
    Ok(recv.clone())
}

fn string_ord(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    let bytes = bytes_of(recv);
    match std::str::from_utf8(&bytes).ok().and_then(|text| text.chars().next()) {
        Some(c) => Ok(Value::Integer(c as i64)),
        None => match bytes.first() {
            Some(byte) => Ok(Value::Integer(*byte as i64)),
            None => Err(NativeError::argument("empty string")),
        },
    }
}

// ==================== Symbol ====================

fn symbol_name(recv: &Value) -> &str {
    match recv {
        Value::Symbol(name) => name,
        _ => "",
    }
}

fn symbol_to_s(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(symbol_name(recv)))
}

fn symbol_to_sym(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(recv.clone())
}

fn symbol_to_proc(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Proc(Rc::new(Proc {
        body: ProcBody::Symbol(intern(symbol_name(recv))),
        is_lambda: true,
    })))
}

fn symbol_inspect(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::str(&recv.inspect()))
}

fn symbol_length(_vm: &mut dyn ValueCaller, recv: &Value, _args: &[Value], _: Option<&Value>) -> NativeResult {
    Ok(Value::Integer(symbol_name(recv).chars().count() as i64))
}

fn symbol_compare(_vm: &mut dyn ValueCaller, recv: &Value, args: &[Value], _: Option<&Value>) -> NativeResult {
    check_arity(args, 1, 1)?;
    Ok(match &args[0] {
        Value::Symbol(other) => Value::Integer(symbol_name(recv).cmp(other) as i64),
        _ => Value::Nil,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval;

    #[test]
    fn test_basic_transformations() {
        assert_eq!(eval("\"hello\".upcase"), "\"HELLO\"");
        assert_eq!(eval("\"  pad  \".strip"), "\"pad\"");
        assert_eq!(eval("\"abc\".reverse"), "\"cba\"");
        assert_eq!(eval("\"ruby\".capitalize"), "\"Ruby\"");
        assert_eq!(eval("\"ab\" * 3"), "\"ababab\"");
    }

    #[test]
    fn test_split_and_join_shapes() {
        assert_eq!(eval("\"a,b,,c\".split(\",\")"), "[\"a\", \"b\", \"\", \"c\"]");
        assert_eq!(eval("\" one  two \".split"), "[\"one\", \"two\"]");
        assert_eq!(eval("\"abc\".chars"), "[\"a\", \"b\", \"c\"]");
    }

    #[test]
    fn test_indexing() {
        assert_eq!(eval("\"hello\"[1]"), "\"e\"");
        assert_eq!(eval("\"hello\"[-1]"), "\"o\"");
        assert_eq!(eval("\"hello\"[1, 3]"), "\"ell\"");
        assert_eq!(eval("\"hello\"[1..2]"), "\"el\"");
        assert_eq!(eval("\"hello\"[10]"), "nil");
    }

    #[test]
    fn test_append_mutates_in_place() {
        assert_eq!(eval("s = \"a\"\nt = s\ns << \"b\"\nt"), "\"ab\"");
    }

    #[test]
    fn test_substitution_and_format() {
        assert_eq!(eval("\"a-b-c\".gsub(\"-\", \"+\")"), "\"a+b+c\"");
        assert_eq!(eval("\"a-b-c\".sub(\"-\", \"+\")"), "\"a+b-c\"");
        assert_eq!(eval("\"%s is %d\" % [\"x\", 5]"), "\"x is 5\"");
        assert_eq!(eval("\"%.2f\" % 3.14159"), "\"3.14\"");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval("\"42abc\".to_i"), "42");
        assert_eq!(eval("\"3.5\".to_f"), "3.5");
        assert_eq!(eval("\"name\".to_sym"), ":name");
        assert_eq!(eval(":name.to_s"), "\"name\"");
    }

    #[test]
    fn test_comparison_via_comparable() {
        assert_eq!(eval("\"a\" < \"b\""), "true");
        assert_eq!(eval("\"b\".between?(\"a\", \"c\")"), "true");
    }
}
