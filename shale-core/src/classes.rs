//! Classes, interfaces, and instances.
//!
//! A type object carries a name, an optional base type, its implemented
//! interfaces, a method table, and attribute defaults. Method lookup walks
//! the base chain and returns a bound method. Class instances carry their
//! own per-instance attribute table.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind};
use crate::functions::FuncValue;
use crate::values::{TypeTag, Value};

/// A type object: either a built-in type or a script-declared class.
#[derive(Debug)]
pub struct TypeValue {
    /// The type name.
    pub name: String,
    /// `Some` for built-in types; the tag values of that type carry.
    pub builtin_tag: Option<TypeTag>,
    /// True for script-declared classes (`DECL_TYPE`).
    pub is_decl: bool,
    /// The base type, if any.
    pub base: Option<Rc<TypeValue>>,
    /// Interfaces this type implements.
    pub ifaces: Vec<Rc<IfaceValue>>,
    /// Methods declared on this type.
    pub methods: RefCell<IndexMap<String, Value>>,
    /// Attribute defaults, statics, and nested classes.
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl TypeValue {
    /// Returns a new built-in type object.
    pub fn builtin(name: &str, tag: TypeTag) -> Self {
        Self {
            name: name.to_string(),
            builtin_tag: Some(tag),
            is_decl: false,
            base: None,
            ifaces: vec![],
            methods: RefCell::new(IndexMap::new()),
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    /// Returns a new script-declared class.
    pub fn declared(name: &str, base: Option<Rc<Self>>, ifaces: Vec<Rc<IfaceValue>>) -> Self {
        Self {
            name: name.to_string(),
            builtin_tag: None,
            is_decl: true,
            base,
            ifaces,
            methods: RefCell::new(IndexMap::new()),
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    /// Looks a method up on this type, walking the base chain.
    pub fn find_method(&self, name: &str) -> Option<Value> {
        if let Some(found) = self.methods.borrow().get(name) {
            return Some(found.clone());
        }
        self.base.as_ref().and_then(|base| base.find_method(name))
    }

    /// Looks up a static attribute (statics and nested classes), walking
    /// the base chain.
    pub fn find_attr(&self, name: &str) -> Option<Value> {
        if let Some(found) = self.attrs.borrow().get(name) {
            return Some(found.clone());
        }
        self.base.as_ref().and_then(|base| base.find_attr(name))
    }

    /// Verifies that every abstract method of every implemented interface
    /// is present with a matching arity. Raised at class-declaration time.
    pub fn check_interface_compatibility(&self) -> Result<(), Error> {
        for iface in &self.ifaces {
            iface.for_each_method(&mut |sig| {
                let Some(method) = self.find_method(&sig.name) else {
                    return Err(Error::new(
                        ErrorKind::IncompatibleType,
                        format!(
                            "class '{}' does not implement '{}' required by interface '{}'",
                            self.name, sig.name, iface.name
                        ),
                    ));
                };

                let arity = method_arity(&method);
                if let Some((required, variadic)) = arity {
                    if required != sig.arity || variadic != sig.variadic {
                        return Err(Error::new(
                            ErrorKind::IncompatibleType,
                            format!(
                                "method '{}' of class '{}' does not match the signature \
                                 declared by interface '{}'",
                                sig.name, self.name, iface.name
                            ),
                        ));
                    }
                }

                Ok(())
            })?;
        }

        Ok(())
    }
}

fn method_arity(method: &Value) -> Option<(usize, bool)> {
    if let Value::Func(f) = method {
        if let FuncValue::Declared(decl) = f.as_ref() {
            let variadic = decl.decl.params.iter().any(|p| p.variadic);
            let required = decl
                .decl
                .params
                .iter()
                .filter(|p| !p.variadic && p.default.is_none())
                .count();
            return Some((required, variadic));
        }
    }
    None
}

/// An abstract method signature declared by an interface.
#[derive(Clone, Debug)]
pub struct AbstractSig {
    /// The method name.
    pub name: String,
    /// Number of required parameters.
    pub arity: usize,
    /// Whether the signature declares a variadic tail.
    pub variadic: bool,
}

/// An interface: a named set of abstract method signatures.
#[derive(Debug)]
pub struct IfaceValue {
    /// The interface name.
    pub name: String,
    /// Interfaces this one extends.
    pub parents: Vec<Rc<IfaceValue>>,
    /// Signatures declared directly on this interface.
    pub methods: Vec<AbstractSig>,
}

impl IfaceValue {
    /// Visits every abstract method, including inherited ones.
    pub fn for_each_method(
        &self,
        f: &mut impl FnMut(&AbstractSig) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for sig in &self.methods {
            f(sig)?;
        }
        for parent in &self.parents {
            parent.for_each_method(f)?;
        }
        Ok(())
    }

    /// Whether this interface (or one it extends) declares `name`.
    pub fn declares(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
            || self.parents.iter().any(|p| p.declares(name))
    }
}

/// A class instance (`DECL_OBJ`).
#[derive(Debug)]
pub struct InstanceValue {
    /// The instance's class.
    pub class: Rc<TypeValue>,
    /// Per-instance attribute table.
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl InstanceValue {
    /// Returns a fresh instance with the class's attribute defaults.
    pub fn new(class: Rc<TypeValue>) -> Self {
        let mut attrs = IndexMap::new();
        collect_attr_defaults(&class, &mut attrs);
        Self {
            class,
            attrs: RefCell::new(attrs),
        }
    }
}

fn collect_attr_defaults(class: &Rc<TypeValue>, into: &mut IndexMap<String, Value>) {
    // Base defaults first so derived classes shadow them.
    if let Some(base) = &class.base {
        collect_attr_defaults(base, into);
    }
    for (name, value) in class.attrs.borrow().iter() {
        if !matches!(value, Value::Type(_)) {
            into.insert(name.clone(), value.clone());
        }
    }
}

/// The `instance_of` relation: true iff the value's type chain contains
/// `of`, or (for interfaces) some type in the chain implements it.
pub fn instance_of(value: &Value, of: &Value) -> bool {
    match of {
        Value::Type(ty) => {
            if let Some(tag) = ty.builtin_tag {
                return value.type_tag() == tag
                    || (tag == TypeTag::DeclObj && matches!(value, Value::Instance(_)));
            }

            if let Value::Instance(obj) = value {
                let mut cursor = Some(Rc::clone(&obj.class));
                while let Some(class) = cursor {
                    if Rc::ptr_eq(&class, ty) {
                        return true;
                    }
                    cursor = class.base.clone();
                }
            }
            false
        }
        Value::Iface(iface) => {
            if let Value::Instance(obj) = value {
                let mut cursor = Some(Rc::clone(&obj.class));
                while let Some(class) = cursor {
                    if class
                        .ifaces
                        .iter()
                        .any(|i| Rc::ptr_eq(i, iface) || iface_extends(i, iface))
                    {
                        return true;
                    }
                    cursor = class.base.clone();
                }
            }
            false
        }
        _ => false,
    }
}

fn iface_extends(iface: &Rc<IfaceValue>, target: &Rc<IfaceValue>) -> bool {
    iface
        .parents
        .iter()
        .any(|p| Rc::ptr_eq(p, target) || iface_extends(p, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn class(name: &str, base: Option<Rc<TypeValue>>) -> Rc<TypeValue> {
        Rc::new(TypeValue::declared(name, base, vec![]))
    }

    #[test]
    fn instance_of_walks_the_base_chain() {
        let base = class("Base", None);
        let derived = class("Derived", Some(Rc::clone(&base)));
        let obj = Value::Instance(Rc::new(InstanceValue::new(Rc::clone(&derived))));

        assert!(instance_of(&obj, &Value::Type(Rc::clone(&derived))));
        assert!(instance_of(&obj, &Value::Type(Rc::clone(&base))));

        let other = class("Other", None);
        assert!(!instance_of(&obj, &Value::Type(other)));
    }

    #[test]
    fn instance_of_builtin_types() {
        let string_type = Value::Type(Rc::new(TypeValue::builtin("string", TypeTag::Str)));
        assert!(instance_of(&Value::str("x"), &string_type));
        assert!(!instance_of(&Value::Int(1), &string_type));
    }

    #[test]
    fn interface_compatibility_requires_all_methods() {
        let iface = Rc::new(IfaceValue {
            name: String::from("IShow"),
            parents: vec![],
            methods: vec![AbstractSig {
                name: String::from("show"),
                arity: 0,
                variadic: false,
            }],
        });

        let incomplete = TypeValue::declared("C", None, vec![Rc::clone(&iface)]);
        let err = incomplete.check_interface_compatibility().unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleType);
    }

    #[test]
    fn attribute_defaults_flow_base_to_derived() {
        let base = class("Base", None);
        base.attrs
            .borrow_mut()
            .insert(String::from("x"), Value::Int(1));

        let derived = class("Derived", Some(Rc::clone(&base)));
        derived
            .attrs
            .borrow_mut()
            .insert(String::from("x"), Value::Int(2));

        let obj = InstanceValue::new(derived);
        assert_eq!(obj.attrs.borrow().get("x").unwrap().format(), "2");
    }
}
