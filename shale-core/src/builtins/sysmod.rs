//! The `sys` standard module.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind};
use crate::functions::{FuncValue, KwArgs};
use crate::interp::Interp;
use crate::values::Value;

pub(super) fn module(argv: &[String]) -> Value {
    let mut symbols = IndexMap::new();

    symbols.insert(
        String::from("version"),
        Value::str(env!("CARGO_PKG_VERSION")),
    );
    symbols.insert(
        String::from("argv"),
        Value::array(argv.iter().map(Value::str).collect()),
    );
    symbols.insert(
        String::from("exit"),
        Value::Func(Rc::new(FuncValue::Native {
            name: "exit",
            func: exit,
        })),
    );

    crate::modules::native_module("sys", symbols)
}

fn exit(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    let code = match args.first() {
        Some(value) => i32::try_from(value.to_int()?).map_err(|_| {
            Error::new(ErrorKind::InvalidArgs, "exit code out of range")
        })?,
        None => 0,
    };
    std::process::exit(code);
}
