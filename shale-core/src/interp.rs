//! The tree-walking executor.
//!
//! Control flow is signalled by an explicit [`Flow`] value returned up the
//! call stack; loops absorb `Break`/`Continue`, function calls absorb
//! `Return`, and thrown errors ride the `Err` channel until a matching
//! `catch` clause converts them back to normal flow. `return` deposits its
//! value in the enclosing function frame under the reserved `%return` key.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use shale_parser::ast::{self, BinaryOp, UnaryOp};
use shale_parser::SourcePosition;

use crate::classes::{instance_of, AbstractSig, IfaceValue, InstanceValue, TypeValue};
use crate::error::{incompatible_type, Error, ErrorKind};
use crate::functions::{bind_params, validate_params, DeclaredFunc, FuncValue, KwArgs};
use crate::iterators::{self, RangeIter};
use crate::methods;
use crate::openfiles::OpenFiles;
use crate::shell::ShellEnv;
use crate::symtab::{CmdEntry, ScopeKind, SymbolAttr, SymbolTableStack};
use crate::values::{SliceValue, TypeTag, Value};
use crate::{cmdexec, modules};

/// The reserved symbol `return` writes through.
pub const RETURN_KEY: &str = "%return";

/// Normal-channel control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep executing.
    Go,
    /// Unwind to the nearest loop and exit it.
    Break,
    /// Unwind to the nearest loop and start its next iteration.
    Continue,
    /// Unwind to the nearest function call.
    Return,
}

/// A statement deferred to scope exit, with its captured scope chain.
type Deferred = (ast::Stmt, SymbolTableStack);

/// The interpreter state threaded through every executor.
pub struct Interp {
    /// The live scope chain.
    pub scopes: SymbolTableStack,
    /// Shared shell-wide state.
    pub env: Rc<RefCell<ShellEnv>>,
    /// The shell's open files; `print` and redirections go through these.
    pub open_files: OpenFiles,
    /// One frame per active scope executor (the program, each function
    /// call, each module top level).
    defer_frames: Vec<Vec<Deferred>>,
}

impl Interp {
    /// Returns a new interpreter over the given scope chain and shell
    /// environment.
    pub fn new(scopes: SymbolTableStack, env: Rc<RefCell<ShellEnv>>) -> Self {
        Self {
            scopes,
            env,
            open_files: OpenFiles::default(),
            defer_frames: vec![],
        }
    }

    /// Executes a whole program (a script or one REPL batch).
    pub fn exec_program(&mut self, program: &ast::Program) -> Result<(), Error> {
        self.defer_frames.push(vec![]);
        let result = self.exec_stmts(&program.body);
        let defer_err = self.run_defer_frame();

        result?;
        if let Some(err) = defer_err {
            return Err(err);
        }
        Ok(())
    }

    /// Convenience lookup used by front-ends (prompt functions etc.).
    pub fn lookup_symbol(&self, name: &str) -> Option<Value> {
        self.scopes.lookup(name)
    }

    //
    // Statements.
    //

    fn exec_stmts(&mut self, stmts: &[ast::Stmt]) -> Result<Flow, Error> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Go => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Go)
    }

    fn with_scope<T>(
        &mut self,
        kind: ScopeKind,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.scopes.push(kind);
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn exec_block(&mut self, block: &ast::Block, kind: ScopeKind) -> Result<Flow, Error> {
        self.with_scope(kind, |interp| interp.exec_stmts(&block.body))
    }

    /// Executes one statement.
    #[allow(clippy::too_many_lines)]
    pub fn exec_stmt(&mut self, stmt: &ast::Stmt) -> Result<Flow, Error> {
        let pos = stmt.pos;

        let result = match &stmt.kind {
            ast::StmtKind::Expression(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Go)
            }

            ast::StmtKind::Assignment {
                targets,
                op,
                values,
                global,
            } => {
                self.exec_assignment(targets, *op, values, *global, pos)?;
                Ok(Flow::Go)
            }

            ast::StmtKind::If {
                cond,
                then_block,
                else_branch,
            } => self.with_scope(ScopeKind::Block, |interp| {
                if interp.eval_expr(cond)?.truthy() {
                    interp.exec_block(then_block, ScopeKind::Block)
                } else if let Some(else_branch) = else_branch {
                    interp.exec_stmt(else_branch)
                } else {
                    Ok(Flow::Go)
                }
            }),

            ast::StmtKind::While { cond, body } => {
                self.with_scope(ScopeKind::Loop, |interp| {
                    loop {
                        if !interp.eval_expr(cond)?.truthy() {
                            break;
                        }
                        match interp.exec_block(body, ScopeKind::Loop)? {
                            Flow::Go | Flow::Continue => {}
                            Flow::Break => break,
                            Flow::Return => return Ok(Flow::Return),
                        }
                    }
                    Ok(Flow::Go)
                })
            }

            ast::StmtKind::ForIn {
                targets,
                iterables,
                body,
            } => self.exec_for_in(targets, iterables, body, pos),

            ast::StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.exec_switch(subject.as_ref(), cases, default.as_ref()),

            ast::StmtKind::Try {
                body,
                catches,
                finally,
            } => self.exec_try(body, catches, finally.as_ref()),

            ast::StmtKind::Throw(expr) => {
                let value = self.eval_expr(expr)?;
                Err(Error::thrown(value, pos))
            }

            ast::StmtKind::Defer(inner) => {
                let captured = if self.scopes.has_class_table() {
                    self.scopes.until_class_table()
                } else {
                    self.scopes.until_func_table()
                };
                if let Some(frame) = self.defer_frames.last_mut() {
                    frame.push((inner.as_ref().clone(), captured));
                }
                Ok(Flow::Go)
            }

            ast::StmtKind::Return(exprs) => {
                let value = match exprs.len() {
                    0 => Value::Nil,
                    1 => self.eval_expr(&exprs[0])?,
                    _ => {
                        let items = exprs
                            .iter()
                            .map(|e| self.eval_expr(e))
                            .collect::<Result<Vec<_>, _>>()?;
                        Value::tuple(items)
                    }
                };
                self.scopes.set_entry_on_func(RETURN_KEY, value);
                Ok(Flow::Return)
            }

            ast::StmtKind::Break => Ok(Flow::Break),
            ast::StmtKind::Continue => Ok(Flow::Continue),

            ast::StmtKind::Del(exprs) => {
                for expr in exprs {
                    self.exec_del(expr)?;
                }
                Ok(Flow::Go)
            }

            ast::StmtKind::Import { path, alias } => {
                modules::import_module(self, path, alias, pos)?;
                Ok(Flow::Go)
            }

            ast::StmtKind::Varenv { name, value } => {
                let value = self.eval_expr(value)?;
                let text = match &value {
                    Value::Str(s) => s.to_string(),
                    other => other.format(),
                };
                std::env::set_var(name, text);
                Ok(Flow::Go)
            }

            ast::StmtKind::Block(block) => self.exec_block(block, ScopeKind::Block),

            ast::StmtKind::FuncDecl(decl) => {
                let func = self.make_function(decl, false, false)?;
                self.scopes
                    .insert_entry(&decl.name, SymbolAttr::new(func, true))
                    .map_err(|e| e.or_pos(pos))?;
                Ok(Flow::Go)
            }

            ast::StmtKind::ClassDecl(decl) => {
                self.exec_class_decl(decl, None)?;
                Ok(Flow::Go)
            }

            ast::StmtKind::IfaceDecl(decl) => {
                self.exec_iface_decl(decl)?;
                Ok(Flow::Go)
            }

            ast::StmtKind::CmdDecl { name, body } => {
                self.scopes.set_cmd(
                    name.clone(),
                    CmdEntry::Decl {
                        body: Rc::new(body.clone()),
                        captured: self.scopes.clone(),
                    },
                );
                Ok(Flow::Go)
            }

            ast::StmtKind::AliasDecl { name, words } => {
                self.scopes.set_cmd_alias(name.clone(), words.clone());
                Ok(Flow::Go)
            }

            ast::StmtKind::Command(cmd) => {
                cmdexec::exec_command(self, cmd)?;
                // Sweep finished background jobs at statement boundaries.
                self.env.borrow_mut().jobs.poll();
                Ok(Flow::Go)
            }
        };

        result.map_err(|e| e.or_pos(pos))
    }

    fn exec_for_in(
        &mut self,
        targets: &[ast::Expr],
        iterables: &[ast::Expr],
        body: &ast::Block,
        pos: SourcePosition,
    ) -> Result<Flow, Error> {
        if targets.len() != iterables.len() {
            return Err(Error::at(
                ErrorKind::InvalidArgs,
                "for-in requires as many targets as iterables",
                pos,
            ));
        }

        self.with_scope(ScopeKind::Loop, |interp| {
            let mut iters = Vec::with_capacity(iterables.len());
            for iterable in iterables {
                let value = interp.eval_expr(iterable)?;
                iters.push(iterators::obj_iter(&value).map_err(|e| e.or_pos(iterable.pos))?);
            }

            'outer: loop {
                for (iterator, iterable) in iters.iter().zip(iterables) {
                    let more = iterators::has_next(iterator).map_err(|e| e.or_pos(iterable.pos))?;
                    let Value::Bool(more) = more else {
                        return Err(Error::at(
                            ErrorKind::IncompatibleType,
                            "iterator has_next must produce a bool",
                            iterable.pos,
                        ));
                    };
                    if !more {
                        break 'outer;
                    }
                }

                let values = iters
                    .iter()
                    .map(iterators::next)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.or_pos(pos))?;

                for (target, value) in targets.iter().zip(values) {
                    // Plain identifier targets are loop-local; they shadow
                    // outer bindings and vanish when the loop frame pops.
                    match &target.kind {
                        ast::ExprKind::Ident(name) => {
                            interp
                                .scopes
                                .insert_entry(name, SymbolAttr::new(value, false))
                                .map_err(|e| e.or_pos(target.pos))?;
                        }
                        _ => self_assign(interp, target, value)?,
                    }
                }

                match interp.exec_block(body, ScopeKind::Loop)? {
                    Flow::Go | Flow::Continue => {}
                    Flow::Break => break,
                    Flow::Return => return Ok(Flow::Return),
                }
            }

            Ok(Flow::Go)
        })
    }

    fn exec_switch(
        &mut self,
        subject: Option<&ast::Expr>,
        cases: &[ast::CaseClause],
        default: Option<&ast::Block>,
    ) -> Result<Flow, Error> {
        self.with_scope(ScopeKind::Block, |interp| {
            let subject = match subject {
                Some(expr) => interp.eval_expr(expr)?,
                None => Value::Bool(true),
            };

            let mut any_matched = false;
            for case in cases {
                let mut matched = false;
                for expr in &case.exprs {
                    if interp.eval_expr(expr)?.equals(&subject) {
                        matched = true;
                        break;
                    }
                }

                if matched {
                    any_matched = true;
                    match interp.exec_block(&case.body, ScopeKind::Block)? {
                        Flow::Go => {}
                        other => return Ok(other),
                    }
                }
            }

            if !any_matched {
                if let Some(default) = default {
                    return interp.exec_block(default, ScopeKind::Block);
                }
            }

            Ok(Flow::Go)
        })
    }

    fn exec_try(
        &mut self,
        body: &ast::Block,
        catches: &[ast::CatchClause],
        finally: Option<&ast::Block>,
    ) -> Result<Flow, Error> {
        self.scopes.push(ScopeKind::Block);

        let body_result = self.exec_stmts(&body.body);

        let outcome = match body_result {
            Ok(flow) => Ok(flow),
            Err(err) => self.run_catches(catches, err),
        };

        // `finally` runs on every path: normal, matched catch, unmatched
        // rethrow.
        let finally_result = finally.map(|fin| self.exec_stmts(&fin.body));

        self.scopes.pop();

        match finally_result {
            Some(Err(err)) => Err(err),
            Some(Ok(flow)) if flow != Flow::Go => Ok(flow),
            _ => outcome,
        }
    }

    fn run_catches(
        &mut self,
        catches: &[ast::CatchClause],
        err: Error,
    ) -> Result<Flow, Error> {
        let exception = self.exception_value(&err);

        for clause in catches {
            let mut matched = false;
            for type_expr in &clause.types {
                let type_value = match self.eval_expr(type_expr) {
                    Ok(v) => v,
                    Err(e) => return Err(e),
                };
                if instance_of(&exception, &type_value) {
                    matched = true;
                    break;
                }
            }

            if matched {
                if let Some(var) = &clause.var {
                    self.scopes
                        .insert_entry(var, SymbolAttr::new(exception.clone(), false))
                        .map_err(|e| e.or_pos(clause.pos))?;
                }
                return self.exec_stmts(&clause.body.body);
            }
        }

        Err(err)
    }

    /// Materializes the catchable value for a runtime error: the thrown
    /// value itself, or an instance of the built-in exception type
    /// matching the error kind.
    pub fn exception_value(&self, err: &Error) -> Value {
        if let Some(value) = &err.thrown {
            return value.clone();
        }

        if let Some(Value::Type(ty)) = self.scopes.lookup(err.kind.type_name()) {
            let instance = InstanceValue::new(ty);
            instance
                .attrs
                .borrow_mut()
                .insert(String::from("msg"), Value::str(&err.message));
            return Value::Instance(Rc::new(instance));
        }

        Value::str(&err.message)
    }

    fn exec_del(&mut self, expr: &ast::Expr) -> Result<(), Error> {
        match &expr.kind {
            ast::ExprKind::Ident(name) => {
                if !self.scopes.remove(name) {
                    return Err(Error::at(
                        ErrorKind::IdNotFound,
                        format!("variable '{name}' not found"),
                        expr.pos,
                    ));
                }
                Ok(())
            }
            ast::ExprKind::Index { obj, index } => {
                let obj = self.eval_expr(obj)?;
                let index = self.eval_expr(index)?;
                obj.del_item(&index).map_err(|e| e.or_pos(expr.pos))
            }
            _ => Err(Error::at(
                ErrorKind::IncompatibleType,
                "expression not valid for del",
                expr.pos,
            )),
        }
    }

    //
    // Assignment.
    //

    fn exec_assignment(
        &mut self,
        targets: &[ast::Expr],
        op: ast::AssignOp,
        values: &[ast::Expr],
        global: bool,
        pos: SourcePosition,
    ) -> Result<(), Error> {
        if global && self.scopes.depth() != 1 {
            return Err(Error::at(
                ErrorKind::SymbolDef,
                "global must be defined only on main scope",
                pos,
            ));
        }

        if op != ast::AssignOp::Assign {
            if targets.len() != 1 || values.len() != 1 {
                return Err(Error::at(
                    ErrorKind::InvalidArgs,
                    "compound assignment takes a single target",
                    pos,
                ));
            }

            let current = self.eval_expr(&targets[0])?;
            let operand = self.eval_expr(&values[0])?;
            let combined = match op {
                ast::AssignOp::Add => current.add(&operand),
                ast::AssignOp::Sub => current.sub(&operand),
                ast::AssignOp::Mul => current.mul(&operand),
                ast::AssignOp::Div => current.div(&operand),
                ast::AssignOp::Mod => current.rem(&operand),
                ast::AssignOp::BitAnd => current.bit_and(&operand),
                ast::AssignOp::BitOr => current.bit_or(&operand),
                ast::AssignOp::BitXor => current.bit_xor(&operand),
                ast::AssignOp::Assign => unreachable!(),
            }
            .map_err(|e| e.or_pos(pos))?;

            return self.assign_one(&targets[0], combined, global);
        }

        let mut evaluated = values
            .iter()
            .map(|v| self.eval_expr(v))
            .collect::<Result<Vec<_>, _>>()?;

        if evaluated.len() != targets.len() {
            if evaluated.len() == 1 && targets.len() > 1 {
                evaluated = spread_value(&evaluated[0], targets.len(), pos)?;
            } else {
                return Err(Error::at(
                    ErrorKind::InvalidArgs,
                    format!(
                        "cannot assign {} value(s) to {} target(s)",
                        evaluated.len(),
                        targets.len()
                    ),
                    pos,
                ));
            }
        }

        for (target, value) in targets.iter().zip(evaluated) {
            self.assign_one(target, value, global)?;
        }

        Ok(())
    }

    fn assign_one(
        &mut self,
        target: &ast::Expr,
        value: Value,
        global: bool,
    ) -> Result<(), Error> {
        match &target.kind {
            ast::ExprKind::Ident(name) => {
                if global {
                    self.scopes
                        .insert_entry(name, SymbolAttr::new(value, true))
                        .map_err(|e| e.or_pos(target.pos))?;
                } else {
                    self.scopes.set_entry(name, value);
                }
                Ok(())
            }
            ast::ExprKind::Index { obj, index } => {
                let obj = self.eval_expr(obj)?;
                let index = self.eval_expr(index)?;
                obj.set_item(&index, value).map_err(|e| e.or_pos(target.pos))
            }
            ast::ExprKind::Attr { obj, name } => {
                let obj = self.eval_expr(obj)?;
                match obj {
                    Value::Instance(instance) => {
                        instance.attrs.borrow_mut().insert(name.clone(), value);
                        Ok(())
                    }
                    Value::Type(ty) => {
                        ty.attrs.borrow_mut().insert(name.clone(), value);
                        Ok(())
                    }
                    other => Err(Error::at(
                        ErrorKind::IncompatibleType,
                        format!("cannot assign attribute on '{}'", other.type_name()),
                        target.pos,
                    )),
                }
            }
            _ => Err(Error::at(
                ErrorKind::IncompatibleType,
                "expression is not assignable",
                target.pos,
            )),
        }
    }

    //
    // Declarations.
    //

    /// Builds a function value from a declaration, evaluating parameter
    /// defaults now and capturing the current scope chain.
    pub fn make_function(
        &mut self,
        decl: &Rc<ast::FuncDecl>,
        is_method: bool,
        is_static: bool,
    ) -> Result<Value, Error> {
        validate_params(decl)?;

        let mut defaults = IndexMap::new();
        for param in &decl.params {
            if let Some(default_expr) = &param.default {
                defaults.insert(param.name.clone(), self.eval_expr(default_expr)?);
            }
        }

        Ok(Value::Func(Rc::new(FuncValue::Declared(DeclaredFunc {
            name: decl.name.clone(),
            decl: Rc::clone(decl),
            captured: self.scopes.clone(),
            defaults: RefCell::new(defaults),
            is_method,
            is_static,
        }))))
    }

    fn exec_class_decl(
        &mut self,
        decl: &Rc<ast::ClassDecl>,
        outer: Option<&Rc<TypeValue>>,
    ) -> Result<(), Error> {
        // Resolve the base (first, and at most one) and interfaces.
        let mut base: Option<Rc<TypeValue>> = None;
        let mut ifaces: Vec<Rc<IfaceValue>> = vec![];

        for (index, parent) in decl.parents.iter().enumerate() {
            let value = self.eval_expr(parent)?;
            match value {
                Value::Type(ty) if ty.is_decl => {
                    if index != 0 || base.is_some() {
                        return Err(Error::at(
                            ErrorKind::IncompatibleType,
                            "the base class must be listed first",
                            parent.pos,
                        ));
                    }
                    base = Some(ty);
                }
                Value::Iface(iface) => ifaces.push(iface),
                other => {
                    return Err(Error::at(
                        ErrorKind::IncompatibleType,
                        format!("'{}' is not a valid super class", other.format()),
                        parent.pos,
                    ));
                }
            }
        }

        let ty = Rc::new(TypeValue::declared(&decl.name, base, ifaces));

        // The class body runs inside a class scope so methods and defers
        // capture the right chain slice.
        self.with_scope(ScopeKind::Class, |interp| {
            for member in &decl.members {
                match member {
                    ast::ClassMember::Method(method) => {
                        let func = interp
                            .make_function(method, !method.is_static, method.is_static)
                            .map_err(|e| e.or_pos(method.pos))?;
                        ty.methods.borrow_mut().insert(method.name.clone(), func);
                    }
                    ast::ClassMember::NestedClass(nested) => {
                        interp.exec_class_decl(nested, Some(&ty))?;
                    }
                    ast::ClassMember::Attribute { name, value, pos } => {
                        let value = interp.eval_expr(value).map_err(|e| e.or_pos(*pos))?;
                        ty.attrs.borrow_mut().insert(name.clone(), value);
                    }
                }
            }
            Ok(())
        })?;

        ty.check_interface_compatibility()
            .map_err(|e| e.or_pos(decl.pos))?;

        match outer {
            // Nested classes register into the outer type's scope, not the
            // module.
            Some(outer) => {
                outer
                    .attrs
                    .borrow_mut()
                    .insert(decl.name.clone(), Value::Type(ty));
            }
            None => {
                self.scopes
                    .insert_entry(&decl.name, SymbolAttr::new(Value::Type(ty), true))
                    .map_err(|e| e.or_pos(decl.pos))?;
            }
        }

        Ok(())
    }

    fn exec_iface_decl(&mut self, decl: &Rc<ast::IfaceDecl>) -> Result<(), Error> {
        let mut parents = vec![];
        for parent in &decl.parents {
            match self.eval_expr(parent)? {
                Value::Iface(iface) => parents.push(iface),
                other => {
                    return Err(Error::at(
                        ErrorKind::IncompatibleType,
                        format!("'{}' is not an interface", other.format()),
                        parent.pos,
                    ));
                }
            }
        }

        let methods = decl
            .methods
            .iter()
            .map(|sig| AbstractSig {
                name: sig.name.clone(),
                arity: sig
                    .params
                    .iter()
                    .filter(|p| !p.variadic && p.default.is_none())
                    .count(),
                variadic: sig.params.iter().any(|p| p.variadic),
            })
            .collect();

        let iface = Value::Iface(Rc::new(IfaceValue {
            name: decl.name.clone(),
            parents,
            methods,
        }));

        self.scopes
            .insert_entry(&decl.name, SymbolAttr::new(iface, true))
            .map_err(|e| e.or_pos(decl.pos))
    }

    //
    // Calls.
    //

    /// Calls any callable value.
    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: KwArgs,
        pos: SourcePosition,
    ) -> Result<Value, Error> {
        match callee {
            Value::Func(func) => self
                .call_func(func, None, args, kwargs)
                .map_err(|e| e.or_pos(pos)),
            Value::Type(ty) => self
                .call_type(ty, args, kwargs)
                .map_err(|e| e.or_pos(pos)),
            other => Err(Error::at(
                ErrorKind::IncompatibleType,
                format!("'{}' is not callable", other.type_name()),
                pos,
            )),
        }
    }

    /// Calls a function value, optionally with a bound receiver.
    pub fn call_func(
        &mut self,
        func: &Rc<FuncValue>,
        receiver: Option<Value>,
        mut args: Vec<Value>,
        kwargs: KwArgs,
    ) -> Result<Value, Error> {
        match func.as_ref() {
            FuncValue::Bound {
                receiver: bound_receiver,
                func: inner,
            } => self.call_func(inner, Some(bound_receiver.clone()), args, kwargs),

            FuncValue::Native { func, .. } => {
                if let Some(receiver) = receiver {
                    args.insert(0, receiver);
                }
                func(self, args, kwargs)
            }

            FuncValue::Declared(decl) => self.call_declared(decl, receiver, args, kwargs),
        }
    }

    fn call_declared(
        &mut self,
        func: &DeclaredFunc,
        receiver: Option<Value>,
        args: Vec<Value>,
        kwargs: KwArgs,
    ) -> Result<Value, Error> {
        let bound = bind_params(func, args, kwargs)?;

        let body = func.decl.body.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::NotImplemented,
                format!("'{}' is abstract and cannot be called", func.name),
            )
        })?;

        let mut call_scopes = func.captured.clone();
        call_scopes.push(ScopeKind::Function);

        if func.is_method && !func.is_static {
            let receiver = receiver.ok_or_else(|| {
                Error::new(
                    ErrorKind::FuncParams,
                    format!("method '{}' called without a receiver", func.name),
                )
            })?;
            call_scopes.insert_entry("this", SymbolAttr::new(receiver, false))?;
        }

        for (name, value) in bound {
            call_scopes.insert_entry(&name, SymbolAttr::new(value, false))?;
        }

        let saved_scopes = std::mem::replace(&mut self.scopes, call_scopes);
        self.defer_frames.push(vec![]);

        let flow_result = self.exec_stmts(&body.body);

        // Deferred statements run on every exit path, in LIFO order.
        let defer_err = self.run_defer_frame();

        let returned = self.scopes.lookup(RETURN_KEY);
        self.scopes = saved_scopes;

        let flow = flow_result?;
        if let Some(err) = defer_err {
            return Err(err);
        }

        Ok(match flow {
            Flow::Return => returned.unwrap_or(Value::Nil),
            _ => Value::Nil,
        })
    }

    fn call_type(
        &mut self,
        ty: &Rc<TypeValue>,
        args: Vec<Value>,
        kwargs: KwArgs,
    ) -> Result<Value, Error> {
        if ty.is_decl {
            let instance = Value::Instance(Rc::new(InstanceValue::new(Rc::clone(ty))));

            if let Some(Value::Func(init)) = ty.find_method("__init__") {
                self.call_func(&init, Some(instance.clone()), args, kwargs)?;
            } else if !args.is_empty() || !kwargs.is_empty() {
                return Err(Error::new(
                    ErrorKind::FuncParams,
                    format!("class '{}' has no constructor taking arguments", ty.name),
                ));
            }

            return Ok(instance);
        }

        // Built-in types act as conversion constructors.
        let arg = args.first().cloned().unwrap_or(Value::Nil);
        match ty.builtin_tag {
            Some(TypeTag::Int) => Ok(Value::Int(arg.to_int()?)),
            Some(TypeTag::Real) => Ok(Value::Real(arg.to_real()?)),
            Some(TypeTag::Str) => Ok(Value::str(arg.format())),
            Some(TypeTag::Bool) => Ok(Value::Bool(arg.truthy())),
            _ => Err(Error::new(
                ErrorKind::IncompatibleType,
                format!("type '{}' is not callable", ty.name),
            )),
        }
    }

    fn run_defer_frame(&mut self) -> Option<Error> {
        let frame = self.defer_frames.pop().unwrap_or_default();
        let mut first_err = None;

        for (stmt, captured) in frame.into_iter().rev() {
            let saved = std::mem::replace(&mut self.scopes, captured);
            let result = self.exec_stmt(&stmt);
            self.scopes = saved;

            if let Err(err) = result {
                if first_err.is_none() {
                    first_err = Some(err);
                } else {
                    tracing::warn!(target: "interp", "error in deferred statement: {err}");
                }
            }
        }

        first_err
    }

    //
    // Expressions.
    //

    /// Evaluates an expression to a value.
    #[allow(clippy::too_many_lines)]
    pub fn eval_expr(&mut self, expr: &ast::Expr) -> Result<Value, Error> {
        let pos = expr.pos;

        let result = match &expr.kind {
            ast::ExprKind::Literal(lit) => Ok(match lit {
                ast::Literal::Nil => Value::Nil,
                ast::Literal::Bool(b) => Value::Bool(*b),
                ast::Literal::Int(n) => Value::Int(*n),
                ast::Literal::Real(r) => Value::Real(*r),
                ast::Literal::Str(s) => Value::str(s),
            }),

            ast::ExprKind::Ident(name) => self.scopes.lookup(name).ok_or_else(|| {
                Error::at(
                    ErrorKind::IdNotFound,
                    format!("symbol '{name}' not found"),
                    pos,
                )
            }),

            ast::ExprKind::ArrayLit(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval_expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::array(values))
            }

            ast::ExprKind::TupleLit(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval_expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::tuple(values))
            }

            ast::ExprKind::MapLit(entries) => {
                let map = Value::Map(Rc::new(RefCell::new(IndexMap::new())));
                for (key_expr, value_expr) in entries {
                    let key = self.eval_expr(key_expr)?;
                    let value = self.eval_expr(value_expr)?;
                    map.set_item(&key, value)
                        .map_err(|e| e.or_pos(key_expr.pos))?;
                }
                Ok(map)
            }

            ast::ExprKind::Index { obj, index } => {
                let obj = self.eval_expr(obj)?;
                let index = self.eval_expr(index)?;
                obj.get_item(&index)
            }

            ast::ExprKind::Slice { obj, start, end } => {
                let obj = self.eval_expr(obj)?;
                let start = start
                    .as_ref()
                    .map(|e| self.eval_expr(e).and_then(|v| v.to_int()))
                    .transpose()?;
                let end = end
                    .as_ref()
                    .map(|e| self.eval_expr(e).and_then(|v| v.to_int()))
                    .transpose()?;
                let slice = Value::Slice(Rc::new(SliceValue { start, end }));
                obj.get_item(&slice)
            }

            ast::ExprKind::Attr { obj, name } => {
                let obj = self.eval_expr(obj)?;
                self.eval_attr(&obj, name, pos)
            }

            ast::ExprKind::Call {
                callee,
                args,
                kwargs,
            } => {
                let callee_value = self.eval_expr(callee)?;
                let arg_values = args
                    .iter()
                    .map(|e| self.eval_expr(e))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut kwarg_values = KwArgs::new();
                for (name, value_expr) in kwargs {
                    kwarg_values.insert(name.clone(), self.eval_expr(value_expr)?);
                }

                self.call_value(&callee_value, arg_values, kwarg_values, pos)
            }

            ast::ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                match op {
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => match value {
                        Value::Int(_) | Value::Real(_) => Ok(value),
                        other => Err(incompatible_type("pos", other.type_name())),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::BitNot => value.bit_not(),
                }
            }

            ast::ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right),

            ast::ExprKind::Conditional {
                cond,
                then_value,
                else_value,
            } => {
                if self.eval_expr(cond)?.truthy() {
                    self.eval_expr(then_value)
                } else {
                    self.eval_expr(else_value)
                }
            }

            ast::ExprKind::Range { start, end } => {
                let start = self.eval_expr(start)?.to_int()?;
                let end = self.eval_expr(end)?.to_int()?;
                let step = if end >= start { 1 } else { -1 };
                Ok(Value::Range(Rc::new(RefCell::new(RangeIter::new(
                    start, end, step,
                )))))
            }

            ast::ExprKind::FuncLit(decl) => self.make_function(decl, false, false),

            ast::ExprKind::CmdSub(cmd) => cmdexec::run_substitution(self, cmd),
        };

        result.map_err(|e| e.or_pos(pos))
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &ast::Expr,
        right: &ast::Expr,
    ) -> Result<Value, Error> {
        // Short-circuit forms first.
        match op {
            BinaryOp::And => {
                let lhs = self.eval_expr(left)?;
                if !lhs.truthy() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval_expr(right)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            BinaryOp::Or => {
                let lhs = self.eval_expr(left)?;
                if lhs.truthy() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval_expr(right)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            _ => {}
        }

        let lhs = self.eval_expr(left)?;
        let rhs = self.eval_expr(right)?;

        match op {
            BinaryOp::Add => lhs.add(&rhs),
            BinaryOp::Sub => lhs.sub(&rhs),
            BinaryOp::Mul => lhs.mul(&rhs),
            BinaryOp::Div => lhs.div(&rhs),
            BinaryOp::Mod => lhs.rem(&rhs),
            BinaryOp::Pow => lhs.pow(&rhs),
            BinaryOp::BitAnd => lhs.bit_and(&rhs),
            BinaryOp::BitOr => lhs.bit_or(&rhs),
            BinaryOp::BitXor => lhs.bit_xor(&rhs),
            BinaryOp::Shl => lhs.shl(&rhs),
            BinaryOp::Shr => lhs.shr(&rhs),
            BinaryOp::Eq => Ok(Value::Bool(lhs.equals(&rhs))),
            BinaryOp::NotEq => Ok(Value::Bool(!lhs.equals(&rhs))),
            BinaryOp::Less => Ok(Value::Bool(lhs.compare(&rhs)? == std::cmp::Ordering::Less)),
            BinaryOp::Greater => Ok(Value::Bool(
                lhs.compare(&rhs)? == std::cmp::Ordering::Greater,
            )),
            BinaryOp::LessEq => Ok(Value::Bool(
                lhs.compare(&rhs)? != std::cmp::Ordering::Greater,
            )),
            BinaryOp::GreaterEq => Ok(Value::Bool(
                lhs.compare(&rhs)? != std::cmp::Ordering::Less,
            )),
            BinaryOp::In => Ok(Value::Bool(rhs.contains(&lhs)?)),
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    /// Resolves `obj.attr`: the instance's own table first, then the type
    /// chain (yielding bound methods), then built-in type methods.
    pub fn eval_attr(
        &mut self,
        obj: &Value,
        name: &str,
        pos: SourcePosition,
    ) -> Result<Value, Error> {
        match obj {
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                if let Some(Value::Func(method)) = instance.class.find_method(name) {
                    return Ok(Value::Func(Rc::new(FuncValue::Bound {
                        receiver: obj.clone(),
                        func: method,
                    })));
                }
                if let Some(value) = instance.class.find_attr(name) {
                    return Ok(value);
                }
                Err(Error::at(
                    ErrorKind::IdNotFound,
                    format!("'{}' object has no attribute '{name}'", instance.class.name),
                    pos,
                ))
            }

            Value::Type(ty) => {
                if let Some(value) = ty.find_attr(name) {
                    return Ok(value);
                }
                if let Some(method) = ty.find_method(name) {
                    return Ok(method);
                }
                Err(Error::at(
                    ErrorKind::IdNotFound,
                    format!("type '{}' has no attribute '{name}'", ty.name),
                    pos,
                ))
            }

            Value::Module(module) => module
                .table
                .borrow()
                .get(name)
                .map(|attr| attr.value.clone())
                .ok_or_else(|| {
                    Error::at(
                        ErrorKind::IdNotFound,
                        format!("module '{}' has no attribute '{name}'", module.name),
                        pos,
                    )
                }),

            Value::CmdResult(result) => match name {
                "out" => Ok(Value::str(&result.out)),
                "err" => Ok(Value::str(&result.err)),
                "status" => Ok(Value::Int(result.status)),
                _ => Err(Error::at(
                    ErrorKind::IdNotFound,
                    format!("cmdobj has no attribute '{name}'"),
                    pos,
                )),
            },

            other => methods::builtin_attr(other, name).ok_or_else(|| {
                Error::at(
                    ErrorKind::IdNotFound,
                    format!("'{}' has no attribute '{name}'", other.type_name()),
                    pos,
                )
            }),
        }
    }
}

fn self_assign(interp: &mut Interp, target: &ast::Expr, value: Value) -> Result<(), Error> {
    interp.assign_one(target, value, false)
}

fn spread_value(
    value: &Value,
    want: usize,
    pos: SourcePosition,
) -> Result<Vec<Value>, Error> {
    let items: Vec<Value> = match value {
        Value::Tuple(items) => items.to_vec(),
        Value::Array(items) => items.borrow().clone(),
        _ => {
            return Err(Error::at(
                ErrorKind::InvalidArgs,
                "right-hand side is not unpackable",
                pos,
            ));
        }
    };

    if items.len() != want {
        return Err(Error::at(
            ErrorKind::InvalidArgs,
            format!("cannot unpack {} value(s) into {want} target(s)", items.len()),
            pos,
        ));
    }

    Ok(items)
}
