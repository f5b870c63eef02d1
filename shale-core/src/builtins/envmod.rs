//! The `env` standard module.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind};
use crate::functions::{FuncValue, KwArgs};
use crate::interp::Interp;
use crate::values::Value;

pub(super) fn module() -> Value {
    let entries: [(&'static str, crate::functions::NativeFn); 3] =
        [("get", get), ("set", set), ("vars", vars)];

    let mut symbols = IndexMap::new();
    for (name, func) in entries {
        symbols.insert(
            name.to_string(),
            Value::Func(Rc::new(FuncValue::Native { name, func })),
        );
    }
    crate::modules::native_module("env", symbols)
}

fn get(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    let Some(Value::Str(name)) = args.first() else {
        return Err(Error::new(
            ErrorKind::InvalidArgs,
            "env.get() takes a name string",
        ));
    };

    match std::env::var(name.as_ref()) {
        Ok(value) => Ok(Value::str(value)),
        Err(_) => Ok(args.get(1).cloned().unwrap_or(Value::Nil)),
    }
}

fn set(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    let (Some(Value::Str(name)), Some(value)) = (args.first(), args.get(1)) else {
        return Err(Error::new(
            ErrorKind::InvalidArgs,
            "env.set() takes a name and a value",
        ));
    };

    std::env::set_var(name.as_ref(), value.format());
    Ok(Value::Nil)
}

fn vars(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    if !args.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgs, "env.vars() takes no arguments"));
    }

    let map = Value::Map(Rc::new(RefCell::new(IndexMap::new())));
    for (name, value) in std::env::vars() {
        map.set_item(&Value::str(name), Value::str(value))?;
    }
    Ok(map)
}
