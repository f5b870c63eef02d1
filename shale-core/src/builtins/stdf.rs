//! The standard function set.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::classes::instance_of;
use crate::error::{Error, ErrorKind};
use crate::functions::{FuncValue, KwArgs, NativeFn};
use crate::interp::Interp;
use crate::iterators::RangeIter;
use crate::values::{FileValue, RegexValue, Value};

/// Name/function pairs registered into the system table.
pub(super) const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("print", print),
    ("print_err", print_err),
    ("read", read),
    ("len", len),
    ("copy", copy),
    ("range", range),
    ("assert", assert_fn),
    ("eval", eval),
    ("type", type_fn),
    ("id", id),
    ("hash", hash),
    ("instance_of", instance_of_fn),
    ("set", make_set),
    ("open", open_file),
    ("regex", make_regex),
    ("glob", glob),
    ("exit", exit),
    ("is_interactive", is_interactive),
    ("last_foreground_pid", last_foreground_pid),
    ("last_background_pid", last_background_pid),
    ("last_foreground_exit_code", last_foreground_exit_code),
    ("dump_symbol_table", dump_symbol_table),
];

/// The same set packaged as the `stdf` module for qualified access.
pub(super) fn module() -> Value {
    let mut symbols = IndexMap::new();
    for (name, func) in FUNCTIONS.iter().copied() {
        symbols.insert(
            name.to_string(),
            Value::Func(Rc::new(FuncValue::Native { name, func })),
        );
    }
    crate::modules::native_module("stdf", symbols)
}

fn check_count(args: &[Value], min: usize, max: usize, name: &str) -> Result<(), Error> {
    if args.len() < min || args.len() > max {
        return Err(Error::new(
            ErrorKind::InvalidArgs,
            format!("{name}() takes {min}..{max} argument(s), {} given", args.len()),
        ));
    }
    Ok(())
}

fn print_to(
    interp: &mut Interp,
    args: &[Value],
    kwargs: &KwArgs,
    use_stderr: bool,
) -> Result<(), Error> {
    let mut end = String::from("\n");
    let mut flush = true;

    if let Some(value) = kwargs.get("end") {
        let Value::Str(s) = value else {
            return Err(Error::new(ErrorKind::InvalidArgs, "'end' must be a string"));
        };
        end = s.to_string();
    }
    if let Some(value) = kwargs.get("flush") {
        let Value::Bool(b) = value else {
            return Err(Error::new(ErrorKind::InvalidArgs, "'flush' must be a bool"));
        };
        flush = *b;
    }

    let mut out = if use_stderr {
        interp.open_files.stderr()?
    } else {
        interp.open_files.stdout()?
    };

    for value in args {
        write!(out, "{}", value.format())?;
    }
    write!(out, "{end}")?;

    if flush {
        out.flush()?;
    }

    Ok(())
}

fn print(interp: &mut Interp, args: Vec<Value>, kwargs: KwArgs) -> Result<Value, Error> {
    print_to(interp, &args, &kwargs, false)?;
    Ok(Value::Nil)
}

fn print_err(interp: &mut Interp, args: Vec<Value>, kwargs: KwArgs) -> Result<Value, Error> {
    print_to(interp, &args, &kwargs, true)?;
    Ok(Value::Nil)
}

fn read(interp: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 0, 1, "read")?;

    if let Some(prompt) = args.first() {
        let Value::Str(prompt) = prompt else {
            return Err(Error::new(ErrorKind::InvalidArgs, "prompt must be a string"));
        };
        let mut out = interp.open_files.stdout()?;
        write!(out, "{prompt}")?;
        out.flush()?;
    }

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(Value::Nil);
    }

    if line.ends_with('\n') {
        line.pop();
    }
    Ok(Value::str(line))
}

fn len(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "len")?;
    Ok(Value::Int(args[0].len()?))
}

fn copy(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "copy")?;
    args[0].copy_value()
}

fn range(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 3, "range")?;

    let (start, stop, step) = match args.len() {
        1 => (0, args[0].to_int()?, 1),
        2 => (args[0].to_int()?, args[1].to_int()?, 1),
        _ => (args[0].to_int()?, args[1].to_int()?, args[2].to_int()?),
    };

    if step == 0 {
        return Err(Error::new(ErrorKind::InvalidArgs, "range() step cannot be 0"));
    }

    Ok(Value::Range(Rc::new(RefCell::new(RangeIter::new(
        start, stop, step,
    )))))
}

fn assert_fn(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 2, "assert")?;

    let Value::Bool(ok) = &args[0] else {
        return Err(Error::new(
            ErrorKind::InvalidArgs,
            "assert() takes a bool condition",
        ));
    };

    if !ok {
        let msg = match args.get(1) {
            Some(Value::Str(s)) => s.to_string(),
            _ => String::from("assertion failed"),
        };
        return Err(Error::new(ErrorKind::Assert, msg));
    }

    Ok(Value::Nil)
}

fn eval(interp: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "eval")?;
    let Value::Str(code) = &args[0] else {
        return Err(Error::new(ErrorKind::InvalidArgs, "eval() takes a string"));
    };

    let program = shale_parser::parse(code).map_err(|e| {
        Error::new(ErrorKind::Eval, format!("eval parse error: {e}"))
    })?;

    // Evaluated code runs in the caller's scope chain.
    for stmt in &program.body {
        interp
            .exec_stmt(stmt)
            .map_err(|e| e.chain("in eval()", stmt.pos))?;
    }

    Ok(Value::Nil)
}

fn type_fn(interp: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "type")?;

    match &args[0] {
        Value::Instance(instance) => Ok(Value::Type(Rc::clone(&instance.class))),
        other => {
            let name = other.type_name();
            match interp.scopes.lookup(name) {
                Some(ty @ Value::Type(_)) => Ok(ty),
                _ => Ok(Value::str(name)),
            }
        }
    }
}

fn id(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "id")?;
    Ok(Value::Int(args[0].id() as i64))
}

fn hash(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "hash")?;
    use std::hash::{Hash, Hasher};

    let key = args[0].hash_key()?;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    Ok(Value::Int(hasher.finish() as i64))
}

fn instance_of_fn(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 2, 2, "instance_of")?;
    Ok(Value::Bool(instance_of(&args[0], &args[1])))
}

fn make_set(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 0, 1, "set")?;

    let set = Value::Set(Rc::new(RefCell::new(IndexMap::new())));
    if let Some(source) = args.first() {
        let Value::Set(target) = &set else { unreachable!() };
        let iter = crate::iterators::obj_iter(source)?;
        while matches!(crate::iterators::has_next(&iter)?, Value::Bool(true)) {
            let item = crate::iterators::next(&iter)?;
            let key = item.hash_key()?;
            target.borrow_mut().insert(key, item);
        }
    }

    Ok(set)
}

fn open_file(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 2, "open")?;
    let Value::Str(path) = &args[0] else {
        return Err(Error::new(ErrorKind::InvalidArgs, "open() takes a path string"));
    };

    let mode = match args.get(1) {
        Some(Value::Str(m)) => m.to_string(),
        Some(_) => {
            return Err(Error::new(ErrorKind::InvalidArgs, "mode must be a string"));
        }
        None => String::from("r"),
    };

    let mut options = std::fs::OpenOptions::new();
    match mode.as_str() {
        "r" => options.read(true),
        "w" => options.write(true).create(true).truncate(true),
        "a" => options.append(true).create(true),
        "r+" => options.read(true).write(true),
        other => {
            return Err(Error::new(
                ErrorKind::InvalidArgs,
                format!("invalid open mode '{other}'"),
            ));
        }
    };

    let file = options.open(path.as_ref()).map_err(|e| {
        Error::new(ErrorKind::Io, format!("cannot open '{path}': {e}"))
    })?;

    Ok(Value::File(Rc::new(RefCell::new(FileValue {
        file: Some(file),
        path: path.to_string(),
    }))))
}

fn make_regex(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "regex")?;
    let Value::Str(pattern) = &args[0] else {
        return Err(Error::new(ErrorKind::InvalidArgs, "regex() takes a string"));
    };

    let regex = fancy_regex::Regex::new(pattern).map_err(|e| {
        Error::new(ErrorKind::InvalidArgs, format!("invalid regex: {e}"))
    })?;

    Ok(Value::Regex(Rc::new(RegexValue {
        pattern: pattern.to_string(),
        regex,
    })))
}

fn glob(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 1, 1, "glob")?;
    let Value::Str(pattern) = &args[0] else {
        return Err(Error::new(ErrorKind::InvalidArgs, "glob() takes a string"));
    };

    let cwd = std::env::current_dir().map_err(Error::from)?;
    let matches = crate::patterns::expand_glob(&cwd, pattern)?;
    Ok(Value::array(matches.into_iter().map(Value::str).collect()))
}

fn exit(_: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 0, 1, "exit")?;
    let code = match args.first() {
        Some(v) => i32::try_from(v.to_int()?).unwrap_or(1),
        None => 0,
    };
    std::process::exit(code);
}

fn is_interactive(interp: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 0, 0, "is_interactive")?;
    Ok(Value::Bool(interp.env.borrow().interactive))
}

fn last_foreground_pid(
    interp: &mut Interp,
    args: Vec<Value>,
    _: KwArgs,
) -> Result<Value, Error> {
    check_count(&args, 0, 0, "last_foreground_pid")?;
    interp
        .env
        .borrow()
        .last_foreground_pid
        .map(|pid| Value::Int(i64::from(pid)))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgs,
                "no command in foreground was executed",
            )
        })
}

fn last_background_pid(
    interp: &mut Interp,
    args: Vec<Value>,
    _: KwArgs,
) -> Result<Value, Error> {
    check_count(&args, 0, 0, "last_background_pid")?;
    interp
        .env
        .borrow()
        .last_background_pid
        .map(|pid| Value::Int(i64::from(pid)))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgs,
                "no command in background was executed",
            )
        })
}

fn last_foreground_exit_code(
    interp: &mut Interp,
    args: Vec<Value>,
    _: KwArgs,
) -> Result<Value, Error> {
    check_count(&args, 0, 0, "last_foreground_exit_code")?;
    interp
        .env
        .borrow()
        .last_foreground_exit_code
        .map(|code| Value::Int(i64::from(code)))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgs,
                "no command in foreground was executed",
            )
        })
}

fn dump_symbol_table(interp: &mut Interp, args: Vec<Value>, _: KwArgs) -> Result<Value, Error> {
    check_count(&args, 0, 0, "dump_symbol_table")?;

    let mut out = interp.open_files.stdout()?;
    let main = interp.scopes.main_table();
    for (name, attr) in main.borrow().iter() {
        writeln!(
            out,
            "{name}{} = {}",
            if attr.global { " (global)" } else { "" },
            attr.value.format()
        )?;
    }

    Ok(Value::Nil)
}
