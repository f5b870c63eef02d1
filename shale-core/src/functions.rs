//! Function values and the call contract.
//!
//! A declared function captures its AST plus a snapshot of the symbol-table
//! stack at definition time. Parameter binding follows declaration order:
//! required, defaulted, at most one variadic; everything after the variadic
//! must carry a default. Violations raise `FuncParams`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use shale_parser::ast;

use crate::error::{Error, ErrorKind};
use crate::symtab::SymbolTableStack;
use crate::values::Value;

/// Named arguments at a call site.
pub type KwArgs = IndexMap<String, Value>;

/// Signature of a native (Rust-implemented) function.
pub type NativeFn =
    fn(&mut crate::interp::Interp, Vec<Value>, KwArgs) -> Result<Value, Error>;

/// A script-declared function.
pub struct DeclaredFunc {
    /// The declared name; empty for anonymous literals.
    pub name: String,
    /// The declaration AST; owning it extends the AST's lifetime past the
    /// enclosing script for interactive sessions.
    pub decl: Rc<ast::FuncDecl>,
    /// Scope chain snapshot taken at definition time.
    pub captured: SymbolTableStack,
    /// Default values, evaluated once at declaration time.
    pub defaults: RefCell<IndexMap<String, Value>>,
    /// True for methods (an implicit `this` is bound at call time).
    pub is_method: bool,
    /// True for `static func` members.
    pub is_static: bool,
}

impl std::fmt::Debug for DeclaredFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeclaredFunc({})", self.name)
    }
}

/// A function value.
#[derive(Debug)]
pub enum FuncValue {
    /// A script-declared function or literal.
    Declared(DeclaredFunc),
    /// A built-in function.
    Native {
        name: &'static str,
        func: NativeFn,
    },
    /// A method with `this` pre-bound.
    Bound {
        receiver: Value,
        func: Rc<FuncValue>,
    },
}

impl FuncValue {
    /// Printable form.
    pub fn format(&self) -> String {
        match self {
            Self::Declared(decl) => {
                if decl.name.is_empty() {
                    String::from("<func>")
                } else {
                    format!("<func {}>", decl.name)
                }
            }
            Self::Native { name, .. } => format!("<builtin {name}>"),
            Self::Bound { func, .. } => func.format(),
        }
    }

    /// The function's name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Self::Declared(decl) => {
                if decl.name.is_empty() {
                    "<anonymous>"
                } else {
                    &decl.name
                }
            }
            Self::Native { name, .. } => name,
            Self::Bound { func, .. } => func.name(),
        }
    }
}

/// Validates a parameter list at declaration time.
pub fn validate_params(decl: &ast::FuncDecl) -> Result<(), Error> {
    let variadic_count = decl.params.iter().filter(|p| p.variadic).count();
    if variadic_count > 1 {
        return Err(Error::at(
            ErrorKind::IncompatibleType,
            "no more than one variadic parameter is allowed",
            decl.pos,
        ));
    }

    // Defaults must be trailing, and everything after a variadic needs one.
    let mut saw_default = false;
    let mut saw_variadic = false;
    for param in &decl.params {
        if param.variadic {
            saw_variadic = true;
            continue;
        }
        if param.default.is_some() {
            saw_default = true;
        } else if saw_default {
            return Err(Error::at(
                ErrorKind::IncompatibleType,
                "a parameter without a default cannot follow one with a default",
                param.pos,
            ));
        } else if saw_variadic {
            return Err(Error::at(
                ErrorKind::IncompatibleType,
                "parameters after the variadic parameter must have defaults",
                param.pos,
            ));
        }
    }

    Ok(())
}

/// Binds call-site arguments to the declared parameters, in declaration
/// order. Returns `(name, value)` pairs ready for insertion into the call
/// frame.
pub fn bind_params(
    func: &DeclaredFunc,
    mut args: Vec<Value>,
    mut kwargs: KwArgs,
) -> Result<Vec<(String, Value)>, Error> {
    let params = &func.decl.params;
    let mut bound = Vec::with_capacity(params.len());
    let defaults = func.defaults.borrow();

    let mut positional = args.drain(..).collect::<std::collections::VecDeque<_>>();

    for param in params {
        if param.variadic {
            let rest: Vec<Value> = positional.drain(..).collect();
            bound.push((param.name.clone(), Value::array(rest)));
            continue;
        }

        let value = if let Some(v) = positional.pop_front() {
            if kwargs.contains_key(&param.name) {
                return Err(Error::new(
                    ErrorKind::FuncParams,
                    format!(
                        "{}() got multiple values for parameter '{}'",
                        func.name, param.name
                    ),
                ));
            }
            v
        } else if let Some(v) = kwargs.shift_remove(&param.name) {
            v
        } else if let Some(v) = defaults.get(&param.name) {
            v.clone()
        } else {
            return Err(Error::new(
                ErrorKind::FuncParams,
                format!(
                    "{}() missing required parameter '{}'",
                    func.name, param.name
                ),
            ));
        };

        bound.push((param.name.clone(), value));
    }

    if !positional.is_empty() {
        return Err(Error::new(
            ErrorKind::FuncParams,
            format!(
                "{}() takes {} parameter(s) but more were given",
                func.name,
                params.len()
            ),
        ));
    }

    if let Some(extra) = kwargs.keys().next() {
        return Err(Error::new(
            ErrorKind::FuncParams,
            format!("{}() got an unexpected keyword argument '{extra}'", func.name),
        ));
    }

    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shale_parser::SourcePosition;

    fn param(name: &str, default: Option<Value>, variadic: bool) -> (ast::Param, Option<Value>) {
        (
            ast::Param {
                name: name.to_string(),
                // The AST default only matters for presence; values come
                // from the evaluated defaults table.
                default: default.as_ref().map(|_| ast::Expr {
                    kind: ast::ExprKind::Literal(ast::Literal::Nil),
                    pos: SourcePosition::new(1, 1),
                }),
                variadic,
                pos: SourcePosition::new(1, 1),
            },
            default,
        )
    }

    fn func_with(params: Vec<(ast::Param, Option<Value>)>) -> DeclaredFunc {
        let mut defaults = IndexMap::new();
        let mut ast_params = vec![];
        for (p, d) in params {
            if let Some(d) = d {
                defaults.insert(p.name.clone(), d);
            }
            ast_params.push(p);
        }

        let decl = Rc::new(ast::FuncDecl {
            name: String::from("f"),
            params: ast_params,
            body: None,
            is_static: false,
            pos: SourcePosition::new(1, 1),
        });

        let sys = Rc::new(RefCell::new(crate::symtab::SymbolTable::new(
            crate::symtab::ScopeKind::Root,
        )));

        DeclaredFunc {
            name: String::from("f"),
            decl,
            captured: SymbolTableStack::new(sys),
            defaults: RefCell::new(defaults),
            is_method: false,
            is_static: false,
        }
    }

    #[test]
    fn binds_positional_then_defaults() {
        let f = func_with(vec![
            param("a", None, false),
            param("b", Some(Value::Int(9)), false),
        ]);

        let bound = bind_params(&f, vec![Value::Int(1)], KwArgs::new()).unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].1.format(), "1");
        assert_eq!(bound[1].1.format(), "9");
    }

    #[test]
    fn binds_keyword_arguments() {
        let f = func_with(vec![
            param("a", None, false),
            param("b", Some(Value::Int(9)), false),
        ]);

        let mut kwargs = KwArgs::new();
        kwargs.insert(String::from("b"), Value::Int(5));
        let bound = bind_params(&f, vec![Value::Int(1)], kwargs).unwrap();
        assert_eq!(bound[1].1.format(), "5");
    }

    #[test]
    fn variadic_collects_the_rest() {
        let f = func_with(vec![param("a", None, false), param("rest", None, true)]);

        let bound = bind_params(
            &f,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            KwArgs::new(),
        )
        .unwrap();
        assert_eq!(bound[1].1.format(), "[2, 3]");
    }

    #[test]
    fn missing_required_parameter_raises_func_params() {
        let f = func_with(vec![param("a", None, false)]);
        let err = bind_params(&f, vec![], KwArgs::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FuncParams);
    }

    #[test]
    fn too_many_arguments_raises_func_params() {
        let f = func_with(vec![param("a", None, false)]);
        let err = bind_params(&f, vec![Value::Int(1), Value::Int(2)], KwArgs::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FuncParams);
    }

    #[test]
    fn unknown_keyword_raises_func_params() {
        let f = func_with(vec![param("a", None, false)]);
        let mut kwargs = KwArgs::new();
        kwargs.insert(String::from("zzz"), Value::Int(1));
        let err = bind_params(&f, vec![Value::Int(1)], kwargs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FuncParams);
    }

    #[test]
    fn duplicate_parameter_raises_func_params() {
        let f = func_with(vec![param("a", None, false)]);
        let mut kwargs = KwArgs::new();
        kwargs.insert(String::from("a"), Value::Int(2));
        let err = bind_params(&f, vec![Value::Int(1)], kwargs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FuncParams);
    }
}
