//! Built-in methods on primitive and container values.
//!
//! Attribute access on a non-instance value resolves here; each hit
//! returns a bound native method. Argument validation raises
//! `InvalidArgs`/`IncompatibleType` like the rest of the object model.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

use crate::error::{incompatible_type, Error, ErrorKind};
use crate::functions::{FuncValue, KwArgs, NativeFn};
use crate::interp::Interp;
use crate::values::Value;

/// Resolves a built-in method on `value`, returning a bound callable.
pub fn builtin_attr(value: &Value, name: &str) -> Option<Value> {
    let func: NativeFn = match value {
        Value::Str(_) => match name {
            "len" => generic_len,
            "lower" => str_lower,
            "upper" => str_upper,
            "trim" => str_trim,
            "split" => str_split,
            "join" => str_join,
            "find" => str_find,
            "replace" => str_replace,
            "starts_with" => str_starts_with,
            "ends_with" => str_ends_with,
            _ => return None,
        },
        Value::Array(_) => match name {
            "len" => generic_len,
            "append" => array_append,
            "extend" => array_extend,
            "insert" => array_insert,
            "pop" => array_pop,
            "index" => array_index,
            "sort" => array_sort,
            "reverse" => array_reverse,
            "clear" => array_clear,
            _ => return None,
        },
        Value::Map(_) => match name {
            "len" => generic_len,
            "keys" => map_keys,
            "values" => map_values,
            "items" => map_items,
            "get" => map_get,
            "has" => generic_has,
            "clear" => map_clear,
            _ => return None,
        },
        Value::Set(_) => match name {
            "len" => generic_len,
            "add" => set_add,
            "has" => generic_has,
            "remove" => set_remove,
            _ => return None,
        },
        Value::File(_) => match name {
            "read" => file_read,
            "write" => file_write,
            "lines" => file_lines,
            "close" => file_close,
            _ => return None,
        },
        Value::Regex(_) => match name {
            "matches" => regex_matches,
            "find" => regex_find,
            "replace" => regex_replace,
            _ => return None,
        },
        _ => return None,
    };

    Some(Value::Func(Rc::new(FuncValue::Bound {
        receiver: value.clone(),
        func: Rc::new(FuncValue::Native {
            name: method_name(name),
            func,
        }),
    })))
}

// NativeFn carries a 'static name for diagnostics; map the dynamic lookup
// back onto the static table.
fn method_name(name: &str) -> &'static str {
    const NAMES: &[&str] = &[
        "len",
        "lower",
        "upper",
        "trim",
        "split",
        "join",
        "find",
        "replace",
        "starts_with",
        "ends_with",
        "append",
        "extend",
        "insert",
        "pop",
        "index",
        "sort",
        "reverse",
        "clear",
        "keys",
        "values",
        "items",
        "get",
        "has",
        "add",
        "remove",
        "read",
        "write",
        "lines",
        "close",
        "matches",
    ];
    NAMES.iter().find(|n| **n == name).copied().unwrap_or("method")
}

fn arg_count(args: &[Value], min: usize, max: usize, name: &str) -> Result<(), Error> {
    // The receiver occupies slot 0.
    let given = args.len() - 1;
    if given < min || given > max {
        return Err(Error::new(
            ErrorKind::InvalidArgs,
            format!("{name}() takes {min}..{max} argument(s), {given} given"),
        ));
    }
    Ok(())
}

fn receiver_str(args: &[Value]) -> Result<Rc<str>, Error> {
    match &args[0] {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => Err(incompatible_type("method", other.type_name())),
    }
}

fn want_str(value: &Value, what: &str) -> Result<String, Error> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Error::new(
            ErrorKind::InvalidArgs,
            format!("{what} must be a string, not {}", other.type_name()),
        )),
    }
}

//
// Shared.
//

fn generic_len(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "len")?;
    Ok(Value::Int(args[0].len()?))
}

fn generic_has(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "has")?;
    Ok(Value::Bool(args[0].contains(&args[1])?))
}

//
// Strings.
//

fn str_lower(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "lower")?;
    Ok(Value::str(receiver_str(&args)?.to_lowercase()))
}

fn str_upper(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "upper")?;
    Ok(Value::str(receiver_str(&args)?.to_uppercase()))
}

fn str_trim(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "trim")?;
    Ok(Value::str(receiver_str(&args)?.trim()))
}

fn str_split(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 1, "split")?;
    let s = receiver_str(&args)?;

    let parts: Vec<Value> = match args.get(1) {
        Some(sep) => {
            let sep = want_str(sep, "separator")?;
            s.split(sep.as_str()).map(Value::str).collect()
        }
        None => s.split_whitespace().map(Value::str).collect(),
    };

    Ok(Value::array(parts))
}

fn str_join(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "join")?;
    let sep = receiver_str(&args)?;

    let Value::Array(items) = &args[1] else {
        return Err(Error::new(
            ErrorKind::InvalidArgs,
            "join() takes an array argument",
        ));
    };

    let joined = items
        .borrow()
        .iter()
        .map(Value::format)
        .collect::<Vec<_>>()
        .join(&sep);
    Ok(Value::str(joined))
}

fn str_find(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "find")?;
    let s = receiver_str(&args)?;
    let needle = want_str(&args[1], "needle")?;

    match s.find(&needle) {
        Some(byte_idx) => {
            let char_idx = s[..byte_idx].chars().count();
            Ok(Value::Int(i64::try_from(char_idx).unwrap_or(-1)))
        }
        None => Ok(Value::Int(-1)),
    }
}

fn str_replace(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 2, 2, "replace")?;
    let s = receiver_str(&args)?;
    let from = want_str(&args[1], "pattern")?;
    let to = want_str(&args[2], "replacement")?;
    Ok(Value::str(s.replace(&from, &to)))
}

fn str_starts_with(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "starts_with")?;
    let s = receiver_str(&args)?;
    let prefix = want_str(&args[1], "prefix")?;
    Ok(Value::Bool(s.starts_with(&prefix)))
}

fn str_ends_with(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "ends_with")?;
    let s = receiver_str(&args)?;
    let suffix = want_str(&args[1], "suffix")?;
    Ok(Value::Bool(s.ends_with(&suffix)))
}

//
// Arrays.
//

fn receiver_array(args: &[Value]) -> Result<Rc<RefCell<Vec<Value>>>, Error> {
    match &args[0] {
        Value::Array(a) => Ok(Rc::clone(a)),
        other => Err(incompatible_type("method", other.type_name())),
    }
}

fn array_append(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "append")?;
    receiver_array(&args)?.borrow_mut().push(args[1].clone());
    Ok(Value::Nil)
}

fn array_extend(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "extend")?;
    let receiver = receiver_array(&args)?;

    let iter = crate::iterators::obj_iter(&args[1])?;
    while matches!(crate::iterators::has_next(&iter)?, Value::Bool(true)) {
        let item = crate::iterators::next(&iter)?;
        receiver.borrow_mut().push(item);
    }
    Ok(Value::Nil)
}

fn array_insert(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 2, 2, "insert")?;
    let receiver = receiver_array(&args)?;
    let index = args[1].to_int()?;
    let mut items = receiver.borrow_mut();
    let index = usize::try_from(index.clamp(0, i64::try_from(items.len()).unwrap_or(0)))
        .unwrap_or(0);
    items.insert(index, args[2].clone());
    Ok(Value::Nil)
}

fn array_pop(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 1, "pop")?;
    let receiver = receiver_array(&args)?;
    let mut items = receiver.borrow_mut();

    if items.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgs, "pop from empty array"));
    }

    match args.get(1) {
        Some(index) => {
            let index = index.to_int()?;
            let len = i64::try_from(items.len()).unwrap_or(0);
            let index = if index < 0 { index + len } else { index };
            if index < 0 || index >= len {
                return Err(Error::new(ErrorKind::InvalidArgs, "pop index out of range"));
            }
            Ok(items.remove(index as usize))
        }
        None => Ok(items.pop().unwrap_or(Value::Nil)),
    }
}

fn array_index(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "index")?;
    let receiver = receiver_array(&args)?;
    let found = receiver
        .borrow()
        .iter()
        .position(|v| v.equals(&args[1]))
        .map_or(-1, |i| i64::try_from(i).unwrap_or(-1));
    Ok(Value::Int(found))
}

fn array_sort(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "sort")?;
    let receiver = receiver_array(&args)?;

    let mut items = receiver.borrow_mut();
    let mut failed = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|e| {
            failed.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });

    match failed {
        Some(err) => Err(err),
        None => Ok(Value::Nil),
    }
}

fn array_reverse(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "reverse")?;
    receiver_array(&args)?.borrow_mut().reverse();
    Ok(Value::Nil)
}

fn array_clear(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "clear")?;
    receiver_array(&args)?.borrow_mut().clear();
    Ok(Value::Nil)
}

//
// Maps and sets.
//

fn map_keys(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "keys")?;
    let Value::Map(map) = &args[0] else {
        return Err(incompatible_type("keys", args[0].type_name()));
    };
    Ok(Value::array(
        map.borrow().values().map(|e| e.key.clone()).collect(),
    ))
}

fn map_values(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "values")?;
    let Value::Map(map) = &args[0] else {
        return Err(incompatible_type("values", args[0].type_name()));
    };
    Ok(Value::array(
        map.borrow().values().map(|e| e.value.clone()).collect(),
    ))
}

fn map_items(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "items")?;
    let Value::Map(map) = &args[0] else {
        return Err(incompatible_type("items", args[0].type_name()));
    };
    Ok(Value::array(
        map.borrow()
            .values()
            .map(|e| Value::tuple(vec![e.key.clone(), e.value.clone()]))
            .collect(),
    ))
}

fn map_get(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 2, "get")?;
    let Value::Map(map) = &args[0] else {
        return Err(incompatible_type("get", args[0].type_name()));
    };
    let key = args[1].hash_key()?;
    Ok(map
        .borrow()
        .get(&key)
        .map(|e| e.value.clone())
        .unwrap_or_else(|| args.get(2).cloned().unwrap_or(Value::Nil)))
}

fn map_clear(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "clear")?;
    let Value::Map(map) = &args[0] else {
        return Err(incompatible_type("clear", args[0].type_name()));
    };
    map.borrow_mut().clear();
    Ok(Value::Nil)
}

fn set_add(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "add")?;
    let Value::Set(set) = &args[0] else {
        return Err(incompatible_type("add", args[0].type_name()));
    };
    let key = args[1].hash_key()?;
    set.borrow_mut().insert(key, args[1].clone());
    Ok(Value::Nil)
}

fn set_remove(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "remove")?;
    let Value::Set(set) = &args[0] else {
        return Err(incompatible_type("remove", args[0].type_name()));
    };
    let key = args[1].hash_key()?;
    if set.borrow_mut().shift_remove(&key).is_none() {
        return Err(Error::new(
            ErrorKind::IdNotFound,
            format!("member {} not found", args[1].format()),
        ));
    }
    Ok(Value::Nil)
}

//
// Files.
//

fn file_read(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "read")?;
    let Value::File(file) = &args[0] else {
        return Err(incompatible_type("read", args[0].type_name()));
    };

    let mut borrowed = file.borrow_mut();
    let Some(handle) = borrowed.file.as_mut() else {
        return Err(Error::new(ErrorKind::InvalidArgs, "file is closed"));
    };

    let mut contents = String::new();
    handle.read_to_string(&mut contents)?;
    Ok(Value::str(contents))
}

fn file_write(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "write")?;
    let Value::File(file) = &args[0] else {
        return Err(incompatible_type("write", args[0].type_name()));
    };
    let text = want_str(&args[1], "data")?;

    let mut borrowed = file.borrow_mut();
    let Some(handle) = borrowed.file.as_mut() else {
        return Err(Error::new(ErrorKind::InvalidArgs, "file is closed"));
    };

    handle.write_all(text.as_bytes())?;
    Ok(Value::Nil)
}

fn file_lines(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "lines")?;
    let Value::File(file) = &args[0] else {
        return Err(incompatible_type("lines", args[0].type_name()));
    };

    let mut borrowed = file.borrow_mut();
    let Some(handle) = borrowed.file.as_mut() else {
        return Err(Error::new(ErrorKind::InvalidArgs, "file is closed"));
    };

    let mut contents = String::new();
    handle.read_to_string(&mut contents)?;
    Ok(Value::array(contents.lines().map(Value::str).collect()))
}

fn file_close(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 0, 0, "close")?;
    let Value::File(file) = &args[0] else {
        return Err(incompatible_type("close", args[0].type_name()));
    };
    file.borrow_mut().file.take();
    Ok(Value::Nil)
}

//
// Regular expressions.
//

fn regex_matches(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "matches")?;
    let Value::Regex(regex) = &args[0] else {
        return Err(incompatible_type("matches", args[0].type_name()));
    };
    let text = want_str(&args[1], "text")?;

    let matched = regex.regex.is_match(&text).map_err(|e| {
        Error::new(ErrorKind::InvalidArgs, format!("regex error: {e}"))
    })?;
    Ok(Value::Bool(matched))
}

fn regex_find(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 1, 1, "find")?;
    let Value::Regex(regex) = &args[0] else {
        return Err(incompatible_type("find", args[0].type_name()));
    };
    let text = want_str(&args[1], "text")?;

    let found = regex.regex.find(&text).map_err(|e| {
        Error::new(ErrorKind::InvalidArgs, format!("regex error: {e}"))
    })?;
    Ok(found.map_or(Value::Nil, |m| Value::str(m.as_str())))
}

fn regex_replace(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    arg_count(&args, 2, 2, "replace")?;
    let Value::Regex(regex) = &args[0] else {
        return Err(incompatible_type("replace", args[0].type_name()));
    };
    let text = want_str(&args[1], "text")?;
    let replacement = want_str(&args[2], "replacement")?;

    Ok(Value::str(
        regex.regex.replace_all(&text, replacement.as_str()).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellEnv;
    use crate::symtab::{ScopeKind, SymbolTable, SymbolTableStack};
    use pretty_assertions::assert_eq;

    fn interp() -> Interp {
        let sys = Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Root)));
        Interp::new(
            SymbolTableStack::new(sys),
            Rc::new(RefCell::new(ShellEnv::new())),
        )
    }

    fn call(recv: &Value, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let mut interp = interp();
        let method = builtin_attr(recv, name).expect("method not found");
        let Value::Func(func) = method else {
            panic!("expected callable")
        };
        interp.call_func(&func, None, args, KwArgs::new())
    }

    #[test]
    fn string_methods() {
        let s = Value::str("  Hello World  ");
        assert_eq!(call(&s, "trim", vec![]).unwrap().format(), "Hello World");
        assert_eq!(
            call(&Value::str("abc"), "upper", vec![]).unwrap().format(),
            "ABC"
        );
        assert_eq!(
            call(&Value::str("a,b,c"), "split", vec![Value::str(",")])
                .unwrap()
                .format(),
            "[\"a\", \"b\", \"c\"]"
        );
        assert_eq!(
            call(&Value::str("-"), "join", vec![Value::array(vec![
                Value::str("x"),
                Value::str("y"),
            ])])
            .unwrap()
            .format(),
            "x-y"
        );
        assert_eq!(
            call(&Value::str("hello"), "find", vec![Value::str("ll")])
                .unwrap()
                .format(),
            "2"
        );
    }

    #[test]
    fn array_methods_mutate_in_place() {
        let arr = Value::array(vec![Value::Int(3), Value::Int(1)]);
        call(&arr, "append", vec![Value::Int(2)]).unwrap();
        assert_eq!(arr.format(), "[3, 1, 2]");

        call(&arr, "sort", vec![]).unwrap();
        assert_eq!(arr.format(), "[1, 2, 3]");

        let popped = call(&arr, "pop", vec![]).unwrap();
        assert_eq!(popped.format(), "3");
        assert_eq!(arr.format(), "[1, 2]");
    }

    #[test]
    fn map_methods() {
        let map = Value::Map(Rc::new(RefCell::new(indexmap::IndexMap::new())));
        map.set_item(&Value::str("a"), Value::Int(1)).unwrap();
        map.set_item(&Value::str("b"), Value::Int(2)).unwrap();

        assert_eq!(call(&map, "keys", vec![]).unwrap().format(), "[\"a\", \"b\"]");
        assert_eq!(
            call(&map, "get", vec![Value::str("a")]).unwrap().format(),
            "1"
        );
        assert_eq!(
            call(&map, "get", vec![Value::str("zz"), Value::Int(0)])
                .unwrap()
                .format(),
            "0"
        );
    }

    #[test]
    fn unknown_method_is_none() {
        assert!(builtin_attr(&Value::str("x"), "frobnicate").is_none());
        assert!(builtin_attr(&Value::Int(1), "len").is_none());
    }
}
