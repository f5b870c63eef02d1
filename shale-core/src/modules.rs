//! Script modules and the import table.
//!
//! `import "path" as name` resolves the path against the importing file's
//! directory, consults the process-wide import table, and on a miss parses
//! and executes the module's top level exactly once before caching it.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use shale_parser::SourcePosition;

use crate::error::{Error, ErrorKind};
use crate::interp::Interp;
use crate::symtab::{ScopeKind, SymbolTable, SymbolTableStack};
use crate::values::Value;

/// A loaded module.
#[derive(Debug)]
pub struct ModuleValue {
    /// The name the module was imported under.
    pub name: String,
    /// Absolute path of the module source.
    pub path: PathBuf,
    /// The module's top-level symbol frame.
    pub table: Rc<RefCell<SymbolTable>>,
}

/// A module constructed natively (the `env`/`sys` standard modules).
pub fn native_module(name: &str, symbols: IndexMap<String, Value>) -> Value {
    let table = Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Module)));
    for (sym_name, value) in symbols {
        table
            .borrow_mut()
            .set(sym_name, crate::symtab::SymbolAttr::new(value, true));
    }

    Value::Module(Rc::new(ModuleValue {
        name: name.to_string(),
        path: PathBuf::new(),
        table,
    }))
}

/// Executes `import "path" as alias` for the given interpreter state.
pub fn import_module(
    interp: &mut Interp,
    path: &str,
    alias: &str,
    pos: SourcePosition,
) -> Result<(), Error> {
    let base_dir = match interp.scopes.lookup("__path__") {
        Some(Value::Str(dir)) => PathBuf::from(dir.as_ref()),
        _ => std::env::current_dir().map_err(Error::from)?,
    };

    let full_path = resolve_module_path(&base_dir, path).ok_or_else(|| {
        Error::at(
            ErrorKind::Import,
            format!("module '{path}' not found"),
            pos,
        )
    })?;

    // At most one execution per module per process.
    let cached = interp.env.borrow().import_table.get(&full_path).cloned();
    let module = match cached {
        Some(module) => module,
        None => {
            let module = load_module(interp, &full_path, alias)
                .map_err(|e| e.chain(format!("while importing '{path}'"), pos))?;
            interp
                .env
                .borrow_mut()
                .import_table
                .insert(full_path, module.clone());
            module
        }
    };

    interp.scopes.set_entry(alias, module);
    Ok(())
}

fn resolve_module_path(base_dir: &Path, path: &str) -> Option<PathBuf> {
    let raw = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base_dir.join(path)
    };

    let candidate = if raw.exists() {
        raw
    } else {
        // The conventional extension may be omitted in the import.
        let with_ext = raw.with_extension("sl");
        if !with_ext.exists() {
            return None;
        }
        with_ext
    };

    candidate.canonicalize().ok()
}

fn load_module(interp: &mut Interp, path: &Path, alias: &str) -> Result<Value, Error> {
    tracing::debug!(target: "import", "loading module from {}", path.display());

    let source = std::fs::read_to_string(path)
        .map_err(|e| Error::new(ErrorKind::Import, format!("cannot read module: {e}")))?;

    let program = shale_parser::parse(&source).map_err(|e| {
        Error::at(
            ErrorKind::Import,
            format!("parse error in module: {e}"),
            e.position(),
        )
    })?;

    // The module's top level runs in a fresh scope chain sharing the
    // system table.
    let module_scopes = SymbolTableStack::for_module(interp.scopes.sys_table());
    let module_table = module_scopes.main_table();

    register_module_vars(&module_scopes, path);

    let saved = std::mem::replace(&mut interp.scopes, module_scopes);
    let result = interp.exec_program(&program);
    interp.scopes = saved;
    result?;

    Ok(Value::Module(Rc::new(ModuleValue {
        name: alias.to_string(),
        path: path.to_path_buf(),
        table: module_table,
    })))
}

fn register_module_vars(scopes: &SymbolTableStack, path: &Path) {
    use crate::symtab::SymbolAttr;

    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let main = scopes.main_table();
    let mut main = main.borrow_mut();
    main.set("__main__", SymbolAttr::new(Value::Bool(false), true));
    main.set("__file__", SymbolAttr::new(Value::str(file_name), true));
    main.set(
        "__file_path__",
        SymbolAttr::new(Value::str(path.to_string_lossy()), true),
    );
    main.set("__path__", SymbolAttr::new(Value::str(parent), true));
}
