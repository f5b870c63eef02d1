//! The symbol-table stack.
//!
//! A stack of typed scope frames searched innermost-first, with a separate
//! system table (built-ins and standard modules) always consulted last.
//! Frames are reference-counted; function values capture a clone of the
//! stack at definition time, sharing frames with the live chain.
//!
//! The command namespace (declared commands, aliases, built-in commands) is
//! distinct from the variable namespace and lives on the main and system
//! frames only.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use shale_parser::ast;

use crate::error::{Error, ErrorKind};
use crate::interp::Interp;
use crate::values::Value;

/// What kind of scope a frame represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    /// The root (module/main) scope.
    Root,
    /// A function body.
    Function,
    /// A class body.
    Class,
    /// A loop body.
    Loop,
    /// A braced block, `try` body, or catch clause.
    Block,
    /// A loaded module's top level.
    Module,
}

/// A symbol entry.
#[derive(Clone, Debug)]
pub struct SymbolAttr {
    /// The bound value.
    pub value: Value,
    /// True when declared at module scope or via `global`.
    pub global: bool,
}

impl SymbolAttr {
    /// Returns a new entry.
    pub const fn new(value: Value, global: bool) -> Self {
        Self { value, global }
    }
}

/// Signature of a native built-in command (`cd`, `exit`, `export`).
pub type NativeCmdFn = fn(&mut Interp, &[String]) -> Result<i32, Error>;

/// An entry in the command namespace.
#[derive(Clone)]
pub enum CmdEntry {
    /// A scripted `cmd name { … }` declaration with its captured scope.
    Decl {
        body: Rc<ast::Block>,
        captured: SymbolTableStack,
    },
    /// An `alias name = word…` declaration; expanded exactly once.
    Alias(Vec<ast::CmdPiece>),
    /// A built-in command.
    Native {
        name: &'static str,
        func: NativeCmdFn,
    },
}

impl std::fmt::Debug for CmdEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decl { .. } => f.write_str("CmdEntry::Decl"),
            Self::Alias(words) => write!(f, "CmdEntry::Alias({} words)", words.len()),
            Self::Native { name, .. } => write!(f, "CmdEntry::Native({name})"),
        }
    }
}

/// One scope frame.
#[derive(Debug, Default)]
pub struct SymbolTable {
    kind: ScopeKind,
    symbols: IndexMap<String, SymbolAttr>,
    cmds: HashMap<String, CmdEntry>,
}

impl Default for ScopeKind {
    fn default() -> Self {
        Self::Block
    }
}

impl SymbolTable {
    /// Returns a new frame of the given kind.
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            symbols: IndexMap::new(),
            cmds: HashMap::new(),
        }
    }

    /// The frame's scope kind.
    pub const fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Looks up a symbol in this frame only.
    pub fn get(&self, name: &str) -> Option<&SymbolAttr> {
        self.symbols.get(name)
    }

    /// Iterates over the symbols in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SymbolAttr)> {
        self.symbols.iter()
    }

    /// Inserts or replaces a symbol in this frame.
    pub fn set(&mut self, name: impl Into<String>, attr: SymbolAttr) {
        self.symbols.insert(name.into(), attr);
    }

    /// Removes a symbol from this frame.
    pub fn remove(&mut self, name: &str) -> bool {
        self.symbols.shift_remove(name).is_some()
    }
}

/// The scope chain: an ordered list of frames plus the system table.
#[derive(Clone, Debug)]
pub struct SymbolTableStack {
    tables: Vec<Rc<RefCell<SymbolTable>>>,
    sys: Rc<RefCell<SymbolTable>>,
}

impl SymbolTableStack {
    /// Returns a new stack rooted at a fresh main table, sharing the given
    /// system table.
    pub fn new(sys: Rc<RefCell<SymbolTable>>) -> Self {
        Self {
            tables: vec![Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Root)))],
            sys,
        }
    }

    /// Returns a stack for a module's top level, sharing the system table.
    pub fn for_module(sys: Rc<RefCell<SymbolTable>>) -> Self {
        Self {
            tables: vec![Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Module)))],
            sys,
        }
    }

    /// Pushes a new scope frame.
    pub fn push(&mut self, kind: ScopeKind) {
        self.tables
            .push(Rc::new(RefCell::new(SymbolTable::new(kind))));
    }

    /// Pops the innermost frame.
    pub fn pop(&mut self) {
        self.tables.pop();
    }

    /// Number of frames (excluding the system table).
    pub fn depth(&self) -> usize {
        self.tables.len()
    }

    /// The main (bottom) frame.
    pub fn main_table(&self) -> Rc<RefCell<SymbolTable>> {
        Rc::clone(&self.tables[0])
    }

    /// The system table.
    pub fn sys_table(&self) -> Rc<RefCell<SymbolTable>> {
        Rc::clone(&self.sys)
    }

    /// Looks a name up, innermost frame first, system table last.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        for table in self.tables.iter().rev() {
            if let Some(attr) = table.borrow().get(name) {
                return Some(attr.value.clone());
            }
        }
        self.sys.borrow().get(name).map(|attr| attr.value.clone())
    }

    /// Inserts a new entry into the innermost frame. Replacing a global
    /// with another global is a redefinition and allowed; clobbering a
    /// global with a non-global raises `SymbolDef`.
    pub fn insert_entry(&self, name: &str, attr: SymbolAttr) -> Result<(), Error> {
        let innermost = self.tables.last().expect("scope chain never empty");
        let mut table = innermost.borrow_mut();

        if let Some(existing) = table.get(name) {
            if existing.global && !attr.global {
                return Err(Error::new(
                    ErrorKind::SymbolDef,
                    format!("symbol '{name}' conflicts with a global definition"),
                ));
            }
        }

        table.set(name, attr);
        Ok(())
    }

    /// Assignment semantics: updates an existing binding found between the
    /// innermost frame and the nearest enclosing function boundary, or
    /// creates an implicit local in that function frame (or the root/module
    /// frame outside functions). Function scopes are opaque to outer
    /// writes; loop and block frames are transparent for creation, so a
    /// first assignment inside them outlives the block.
    pub fn set_entry(&self, name: &str, value: Value) {
        for table in self.tables.iter().rev() {
            let mut borrowed = table.borrow_mut();
            if let Some(existing) = borrowed.symbols.get_mut(name) {
                existing.value = value;
                return;
            }
            if matches!(borrowed.kind, ScopeKind::Function) {
                break;
            }
        }

        // The bottom frame is always a root or module frame, so this find
        // cannot fail.
        let target = self
            .tables
            .iter()
            .rev()
            .find(|t| {
                matches!(
                    t.borrow().kind,
                    ScopeKind::Function | ScopeKind::Root | ScopeKind::Module
                )
            })
            .expect("scope chain never empty");

        let global = matches!(target.borrow().kind, ScopeKind::Root | ScopeKind::Module);
        target.borrow_mut().set(name, SymbolAttr::new(value, global));
    }

    /// Writes into the nearest enclosing function frame (falling back to
    /// the main frame); used to deposit the `%return` slot.
    pub fn set_entry_on_func(&self, name: &str, value: Value) {
        for table in self.tables.iter().rev() {
            let mut borrowed = table.borrow_mut();
            if matches!(borrowed.kind, ScopeKind::Function) {
                borrowed.set(name, SymbolAttr::new(value, false));
                return;
            }
        }
        self.tables[0]
            .borrow_mut()
            .set(name, SymbolAttr::new(value, false));
    }

    /// Removes the innermost binding of `name`.
    pub fn remove(&self, name: &str) -> bool {
        for table in self.tables.iter().rev() {
            if table.borrow_mut().remove(name) {
                return true;
            }
        }
        false
    }

    /// Whether a class frame is on the chain.
    pub fn has_class_table(&self) -> bool {
        self.tables
            .iter()
            .any(|t| matches!(t.borrow().kind, ScopeKind::Class))
    }

    /// Clones the chain from the bottom through the innermost function
    /// frame; used by `defer` to capture the scopes that outlive loop and
    /// block frames.
    pub fn until_func_table(&self) -> Self {
        self.until_kind(ScopeKind::Function)
    }

    /// Clones the chain from the bottom through the innermost class frame.
    pub fn until_class_table(&self) -> Self {
        self.until_kind(ScopeKind::Class)
    }

    fn until_kind(&self, kind: ScopeKind) -> Self {
        let boundary = self
            .tables
            .iter()
            .rposition(|t| t.borrow().kind == kind)
            .map_or(self.tables.len(), |idx| idx + 1);

        Self {
            tables: self.tables[..boundary].to_vec(),
            sys: Rc::clone(&self.sys),
        }
    }

    //
    // The command namespace.
    //

    /// Registers a declared command on the main frame.
    pub fn set_cmd(&self, name: impl Into<String>, entry: CmdEntry) {
        self.tables[0].borrow_mut().cmds.insert(name.into(), entry);
    }

    /// Registers a command alias on the main frame.
    pub fn set_cmd_alias(&self, name: impl Into<String>, words: Vec<ast::CmdPiece>) {
        self.set_cmd(name, CmdEntry::Alias(words));
    }

    /// Looks a command name up: main frame first, then the system table.
    pub fn lookup_cmd(&self, name: &str) -> Option<CmdEntry> {
        if let Some(entry) = self.tables[0].borrow().cmds.get(name) {
            return Some(entry.clone());
        }
        self.sys.borrow().cmds.get(name).cloned()
    }

    /// Registers a built-in command on the system table.
    pub fn set_sys_cmd(&self, name: &'static str, func: NativeCmdFn) {
        self.sys
            .borrow_mut()
            .cmds
            .insert(name.to_string(), CmdEntry::Native { name, func });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stack() -> SymbolTableStack {
        SymbolTableStack::new(Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Root))))
    }

    #[test]
    fn lookup_after_insert_returns_value() {
        let scopes = stack();
        scopes
            .insert_entry("x", SymbolAttr::new(Value::Int(1), true))
            .unwrap();
        assert_eq!(scopes.lookup("x").unwrap().format(), "1");
    }

    #[test]
    fn pop_restores_pre_insertion_binding() {
        let mut scopes = stack();
        scopes
            .insert_entry("x", SymbolAttr::new(Value::Int(1), true))
            .unwrap();

        scopes.push(ScopeKind::Block);
        scopes
            .insert_entry("x", SymbolAttr::new(Value::Int(2), false))
            .unwrap();
        assert_eq!(scopes.lookup("x").unwrap().format(), "2");

        scopes.pop();
        assert_eq!(scopes.lookup("x").unwrap().format(), "1");
    }

    #[test]
    fn set_entry_updates_through_blocks_but_not_functions() {
        let mut scopes = stack();
        scopes.set_entry("x", Value::Int(1));

        // A block write reaches the outer binding.
        scopes.push(ScopeKind::Block);
        scopes.set_entry("x", Value::Int(2));
        scopes.pop();
        assert_eq!(scopes.lookup("x").unwrap().format(), "2");

        // A function write creates an implicit local.
        scopes.push(ScopeKind::Function);
        scopes.set_entry("x", Value::Int(9));
        assert_eq!(scopes.lookup("x").unwrap().format(), "9");
        scopes.pop();
        assert_eq!(scopes.lookup("x").unwrap().format(), "2");
    }

    #[test]
    fn system_table_is_consulted_last() {
        let sys = Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Root)));
        sys.borrow_mut()
            .set("builtin", SymbolAttr::new(Value::Int(42), true));

        let scopes = SymbolTableStack::new(Rc::clone(&sys));
        assert_eq!(scopes.lookup("builtin").unwrap().format(), "42");

        // A script-level binding shadows the system table.
        scopes.set_entry("builtin", Value::Int(7));
        assert_eq!(scopes.lookup("builtin").unwrap().format(), "7");
    }

    #[test]
    fn conflicting_global_raises_symbol_def() {
        let scopes = stack();
        scopes
            .insert_entry("f", SymbolAttr::new(Value::Int(1), true))
            .unwrap();

        let err = scopes
            .insert_entry("f", SymbolAttr::new(Value::Int(2), false))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SymbolDef);

        // Global-over-global is a redefinition.
        scopes
            .insert_entry("f", SymbolAttr::new(Value::Int(3), true))
            .unwrap();
        assert_eq!(scopes.lookup("f").unwrap().format(), "3");
    }

    #[test]
    fn set_entry_on_func_targets_function_frame() {
        let mut scopes = stack();
        scopes.push(ScopeKind::Function);
        scopes.push(ScopeKind::Loop);
        scopes.push(ScopeKind::Block);

        scopes.set_entry_on_func("%return", Value::Int(5));

        scopes.pop();
        scopes.pop();
        assert_eq!(scopes.lookup("%return").unwrap().format(), "5");
        scopes.pop();
        assert!(scopes.lookup("%return").is_none());
    }

    #[test]
    fn until_func_table_excludes_inner_frames() {
        let mut scopes = stack();
        scopes.push(ScopeKind::Function);
        scopes.push(ScopeKind::Loop);
        scopes.push(ScopeKind::Block);

        let captured = scopes.until_func_table();
        assert_eq!(captured.depth(), 2);
    }

    #[test]
    fn command_namespace_is_separate() {
        let scopes = stack();
        scopes.set_entry("ls", Value::Int(1));
        assert!(scopes.lookup_cmd("ls").is_none());

        scopes.set_cmd_alias("ll", vec![]);
        assert!(matches!(
            scopes.lookup_cmd("ll"),
            Some(CmdEntry::Alias(_))
        ));
        assert_eq!(scopes.lookup("ls").unwrap().format(), "1");
    }
}
