//! Built-in functions, types, modules, and commands.
//!
//! Everything registered here lands in the system table, which the symbol
//! stack consults after every script scope. The registrations cover the
//! built-in type objects (used by `catch` clauses and conversion calls),
//! the catchable exception types, the standard function set, the `env` and
//! `sys` modules, and the native commands (`cd`, `exit`, `export`).

mod cmds;
mod envmod;
mod stdf;
mod sysmod;

use std::rc::Rc;

use crate::classes::TypeValue;
use crate::error::ErrorKind;
use crate::functions::FuncValue;
use crate::symtab::{SymbolAttr, SymbolTableStack};
use crate::values::{TypeTag, Value};

/// Populates the system table. `argv` feeds `sys.argv`.
pub fn register(scopes: &SymbolTableStack, argv: &[String]) {
    let sys_table = scopes.sys_table();
    let mut table = sys_table.borrow_mut();

    // Built-in type objects.
    for (name, tag) in [
        ("nil_type", TypeTag::Nil),
        ("bool", TypeTag::Bool),
        ("int", TypeTag::Int),
        ("real", TypeTag::Real),
        ("string", TypeTag::Str),
        ("array", TypeTag::Array),
        ("tuple", TypeTag::Tuple),
        ("map", TypeTag::Map),
        ("func", TypeTag::Func),
        ("type", TypeTag::Type),
        ("object", TypeTag::DeclObj),
        ("cmdobj", TypeTag::CmdObj),
        ("file", TypeTag::FileObj),
    ] {
        table.set(
            name,
            SymbolAttr::new(Value::Type(Rc::new(TypeValue::builtin(name, tag))), true),
        );
    }

    // Catchable exception types; internal errors are materialized as
    // instances of these when a `try` block inspects them.
    for kind in ErrorKind::CATCHABLE {
        let name = kind.type_name();
        table.set(
            name,
            SymbolAttr::new(
                Value::Type(Rc::new(TypeValue::declared(name, None, vec![]))),
                true,
            ),
        );
    }

    // The standard function set.
    for (name, func) in stdf::FUNCTIONS.iter().copied() {
        table.set(
            name,
            SymbolAttr::new(
                Value::Func(Rc::new(FuncValue::Native { name, func })),
                true,
            ),
        );
    }

    // Standard modules.
    table.set("env", SymbolAttr::new(envmod::module(), true));
    table.set("sys", SymbolAttr::new(sysmod::module(argv), true));
    table.set("stdf", SymbolAttr::new(stdf::module(), true));

    drop(table);

    // Native commands live in the command namespace of the system table.
    scopes.set_sys_cmd("cd", cmds::cd);
    scopes.set_sys_cmd("exit", cmds::exit);
    scopes.set_sys_cmd("export", cmds::export);
}
