//! Runtime values.
//!
//! Every script value is a [`Value`]. Shared payloads (containers, class
//! instances, functions) are reference-counted; immutable primitives are
//! value-copied. The interpreter is single-threaded, so `Rc`/`RefCell`
//! suffice. Operations unsupported by a value's type raise
//! `IncompatibleType`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::classes::{IfaceValue, InstanceValue, TypeValue};
use crate::error::{incompatible_type, Error, ErrorKind};
use crate::functions::FuncValue;
use crate::iterators::{RangeIter, ValueIter};
use crate::modules::ModuleValue;

/// Type tags for runtime values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Nil,
    Bool,
    Int,
    Real,
    Str,
    Array,
    Tuple,
    Map,
    Set,
    Slice,
    RangeIter,
    Iterator,
    Func,
    Type,
    DeclType,
    DeclObj,
    DeclIface,
    Module,
    CmdObj,
    FileObj,
    Regex,
}

impl TypeTag {
    /// The user-visible type name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Real => "real",
            Self::Str => "string",
            Self::Array => "array",
            Self::Tuple => "tuple",
            Self::Map => "map",
            Self::Set => "set",
            Self::Slice => "slice",
            Self::RangeIter => "range",
            Self::Iterator => "iterator",
            Self::Func => "func",
            Self::Type => "type",
            Self::DeclType => "class",
            Self::DeclObj => "object",
            Self::DeclIface => "interface",
            Self::Module => "module",
            Self::CmdObj => "cmdobj",
            Self::FileObj => "file",
            Self::Regex => "regex",
        }
    }
}

/// The result of a completed command substitution.
#[derive(Debug)]
pub struct CmdResultValue {
    /// Captured standard output, trailing newlines trimmed.
    pub out: String,
    /// Captured standard error, when the substitution asked for it.
    pub err: String,
    /// The exit status of the last process in the pipeline.
    pub status: i64,
}

/// An open file handle exposed to scripts.
#[derive(Debug)]
pub struct FileValue {
    /// The backing file; `None` once closed.
    pub file: Option<std::fs::File>,
    /// The path the file was opened with.
    pub path: String,
}

/// A compiled regular expression value.
#[derive(Debug)]
pub struct RegexValue {
    /// The original pattern text.
    pub pattern: String,
    /// The compiled expression.
    pub regex: fancy_regex::Regex,
}

/// A slice value produced by `a[start:end]` syntax used as an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceValue {
    /// Inclusive start bound, if given.
    pub start: Option<i64>,
    /// Exclusive end bound, if given.
    pub end: Option<i64>,
}

/// An entry in a map: the original key value plus the mapped value.
#[derive(Clone, Debug)]
pub struct MapEntry {
    /// The key as written.
    pub key: Value,
    /// The mapped value.
    pub value: Value,
}

/// A hashable projection of a value, used as the key of maps and sets.
///
/// Equal values must project to equal keys: integral reals collapse to the
/// integer variant so `1 == 1.0` implies equal hashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashKey {
    Nil,
    Bool(bool),
    Int(i64),
    RealBits(u64),
    Str(String),
    Tuple(Vec<HashKey>),
}

/// A runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Map(Rc<RefCell<IndexMap<HashKey, MapEntry>>>),
    Set(Rc<RefCell<IndexMap<HashKey, Value>>>),
    Slice(Rc<SliceValue>),
    Range(Rc<RefCell<RangeIter>>),
    Iter(Rc<RefCell<ValueIter>>),
    Func(Rc<FuncValue>),
    Type(Rc<TypeValue>),
    Iface(Rc<IfaceValue>),
    Instance(Rc<InstanceValue>),
    Module(Rc<ModuleValue>),
    CmdResult(Rc<CmdResultValue>),
    File(Rc<RefCell<FileValue>>),
    Regex(Rc<RegexValue>),
}

impl Value {
    /// Returns a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Returns a new array value.
    pub fn array(items: Vec<Self>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    /// Returns a new tuple value.
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(Rc::from(items))
    }

    /// Returns the value's type tag.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Nil => TypeTag::Nil,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Real(_) => TypeTag::Real,
            Self::Str(_) => TypeTag::Str,
            Self::Array(_) => TypeTag::Array,
            Self::Tuple(_) => TypeTag::Tuple,
            Self::Map(_) => TypeTag::Map,
            Self::Set(_) => TypeTag::Set,
            Self::Slice(_) => TypeTag::Slice,
            Self::Range(_) => TypeTag::RangeIter,
            Self::Iter(_) => TypeTag::Iterator,
            Self::Func(_) => TypeTag::Func,
            Self::Type(t) => {
                if t.is_decl {
                    TypeTag::DeclType
                } else {
                    TypeTag::Type
                }
            }
            Self::Iface(_) => TypeTag::DeclIface,
            Self::Instance(_) => TypeTag::DeclObj,
            Self::Module(_) => TypeTag::Module,
            Self::CmdResult(_) => TypeTag::CmdObj,
            Self::File(_) => TypeTag::FileObj,
            Self::Regex(_) => TypeTag::Regex,
        }
    }

    /// Returns the user-visible name of the value's type.
    pub fn type_name(&self) -> &'static str {
        self.type_tag().name()
    }

    /// Identity: shared payloads use their allocation address; primitives
    /// hash their contents so identity survives assignment.
    pub fn id(&self) -> usize {
        match self {
            Self::Nil => 1,
            Self::Bool(b) => 2 + usize::from(*b),
            Self::Int(n) => (*n as usize).wrapping_mul(31).wrapping_add(11),
            Self::Real(r) => (r.to_bits() as usize).wrapping_mul(31).wrapping_add(13),
            Self::Str(s) => Rc::as_ptr(s).cast::<u8>() as usize,
            Self::Array(p) => Rc::as_ptr(p) as usize,
            Self::Tuple(p) => Rc::as_ptr(p).cast::<u8>() as usize,
            Self::Map(p) => Rc::as_ptr(p) as usize,
            Self::Set(p) => Rc::as_ptr(p) as usize,
            Self::Slice(p) => Rc::as_ptr(p) as usize,
            Self::Range(p) => Rc::as_ptr(p) as usize,
            Self::Iter(p) => Rc::as_ptr(p) as usize,
            Self::Func(p) => Rc::as_ptr(p) as usize,
            Self::Type(p) => Rc::as_ptr(p) as usize,
            Self::Iface(p) => Rc::as_ptr(p) as usize,
            Self::Instance(p) => Rc::as_ptr(p) as usize,
            Self::Module(p) => Rc::as_ptr(p) as usize,
            Self::CmdResult(p) => Rc::as_ptr(p) as usize,
            Self::File(p) => Rc::as_ptr(p) as usize,
            Self::Regex(p) => Rc::as_ptr(p) as usize,
        }
    }

    //
    // Coercions.
    //

    /// The truth value of the object.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Real(r) => *r != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Array(a) => !a.borrow().is_empty(),
            Self::Tuple(t) => !t.is_empty(),
            Self::Map(m) => !m.borrow().is_empty(),
            Self::Set(s) => !s.borrow().is_empty(),
            Self::CmdResult(c) => c.status == 0,
            _ => true,
        }
    }

    /// Integer coercion.
    pub fn to_int(&self) -> Result<i64, Error> {
        match self {
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Int(n) => Ok(*n),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(r) => Ok(*r as i64),
            Self::Str(s) => s.trim().parse::<i64>().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidArgs,
                    format!("cannot convert '{s}' to int"),
                )
            }),
            _ => Err(incompatible_type("int", self.type_name())),
        }
    }

    /// Real coercion.
    pub fn to_real(&self) -> Result<f64, Error> {
        match self {
            Self::Bool(b) => Ok(f64::from(u8::from(*b))),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Ok(*n as f64),
            Self::Real(r) => Ok(*r),
            Self::Str(s) => s.trim().parse::<f64>().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidArgs,
                    format!("cannot convert '{s}' to real"),
                )
            }),
            _ => Err(incompatible_type("real", self.type_name())),
        }
    }

    /// The printable form of the value. Strings print raw; containers
    /// quote their string elements.
    pub fn format(&self) -> String {
        match self {
            Self::Nil => String::from("nil"),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Real(r) => {
                if r.fract() == 0.0 && r.is_finite() {
                    format!("{r:.1}")
                } else {
                    r.to_string()
                }
            }
            Self::Str(s) => s.to_string(),
            Self::Array(a) => {
                let inner = a.borrow().iter().map(Self::format_element).join(", ");
                format!("[{inner}]")
            }
            Self::Tuple(t) => {
                let inner = t.iter().map(Self::format_element).join(", ");
                format!("({inner})")
            }
            Self::Map(m) => {
                let inner = m
                    .borrow()
                    .values()
                    .map(|e| {
                        format!(
                            "{}: {}",
                            Self::format_element(&e.key),
                            Self::format_element(&e.value)
                        )
                    })
                    .join(", ");
                format!("{{{inner}}}")
            }
            Self::Set(s) => {
                let inner = s.borrow().values().map(Self::format_element).join(", ");
                format!("{{{inner}}}")
            }
            Self::Slice(s) => format!(
                "slice({}, {})",
                s.start.map_or_else(|| String::from("nil"), |v| v.to_string()),
                s.end.map_or_else(|| String::from("nil"), |v| v.to_string()),
            ),
            Self::Range(r) => {
                let r = r.borrow();
                format!("range({}, {}, {})", r.start, r.stop, r.step)
            }
            Self::Iter(_) => String::from("<iterator>"),
            Self::Func(f) => f.format(),
            Self::Type(t) => format!("<type {}>", t.name),
            Self::Iface(i) => format!("<interface {}>", i.name),
            Self::Instance(obj) => format!("<{} object>", obj.class.name),
            Self::Module(m) => format!("<module {}>", m.name),
            Self::CmdResult(c) => c.out.clone(),
            Self::File(f) => format!("<file {}>", f.borrow().path),
            Self::Regex(r) => format!("<regex {}>", r.pattern),
        }
    }

    fn format_element(value: &Self) -> String {
        match value {
            Self::Str(s) => format!("\"{s}\""),
            other => other.format(),
        }
    }

    /// String coercion; distinct from [`Value::format`] only in name, kept
    /// separate so callers state intent.
    pub fn to_str_value(&self) -> String {
        self.format()
    }

    //
    // Arithmetic.
    //

    fn numeric_pair(&self, other: &Self) -> Option<(f64, f64)> {
        let lhs = match self {
            Self::Int(n) => *n as f64,
            Self::Real(r) => *r,
            _ => return None,
        };
        let rhs = match other {
            Self::Int(n) => *n as f64,
            Self::Real(r) => *r,
            _ => return None,
        };
        Some((lhs, rhs))
    }

    const fn both_int(&self, other: &Self) -> Option<(i64, i64)> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some((*a, *b)),
            _ => None,
        }
    }

    /// Addition; concatenates strings and arrays.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        if let Some((a, b)) = self.both_int(other) {
            return Ok(Self::Int(a.wrapping_add(b)));
        }
        if let Some((a, b)) = self.numeric_pair(other) {
            return Ok(Self::Real(a + b));
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(Self::str(format!("{a}{b}"))),
            (Self::Array(a), Self::Array(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Self::array(items))
            }
            _ => Err(incompatible_type("add", self.type_name())),
        }
    }

    /// Subtraction.
    pub fn sub(&self, other: &Self) -> Result<Self, Error> {
        if let Some((a, b)) = self.both_int(other) {
            return Ok(Self::Int(a.wrapping_sub(b)));
        }
        if let Some((a, b)) = self.numeric_pair(other) {
            return Ok(Self::Real(a - b));
        }
        Err(incompatible_type("sub", self.type_name()))
    }

    /// Multiplication; repeats strings and arrays by an integer count.
    pub fn mul(&self, other: &Self) -> Result<Self, Error> {
        if let Some((a, b)) = self.both_int(other) {
            return Ok(Self::Int(a.wrapping_mul(b)));
        }
        if let Some((a, b)) = self.numeric_pair(other) {
            return Ok(Self::Real(a * b));
        }
        match (self, other) {
            (Self::Str(s), Self::Int(n)) => {
                Ok(Self::str(s.repeat(usize::try_from(*n).unwrap_or(0))))
            }
            (Self::Array(a), Self::Int(n)) => {
                let items = a.borrow();
                let mut out = Vec::with_capacity(items.len() * usize::try_from(*n).unwrap_or(0));
                for _ in 0..*n {
                    out.extend(items.iter().cloned());
                }
                Ok(Self::array(out))
            }
            _ => Err(incompatible_type("mul", self.type_name())),
        }
    }

    /// Division. Integer division truncates; dividing by zero raises
    /// `InvalidArgs`.
    pub fn div(&self, other: &Self) -> Result<Self, Error> {
        if let Some((a, b)) = self.both_int(other) {
            if b == 0 {
                return Err(Error::new(ErrorKind::InvalidArgs, "division by zero"));
            }
            return Ok(Self::Int(a.wrapping_div(b)));
        }
        if let Some((a, b)) = self.numeric_pair(other) {
            if b == 0.0 {
                return Err(Error::new(ErrorKind::InvalidArgs, "division by zero"));
            }
            return Ok(Self::Real(a / b));
        }
        Err(incompatible_type("div", self.type_name()))
    }

    /// Modulo; zero modulus raises `InvalidArgs`.
    pub fn rem(&self, other: &Self) -> Result<Self, Error> {
        if let Some((a, b)) = self.both_int(other) {
            if b == 0 {
                return Err(Error::new(ErrorKind::InvalidArgs, "division by zero"));
            }
            return Ok(Self::Int(a.wrapping_rem(b)));
        }
        if let Some((a, b)) = self.numeric_pair(other) {
            if b == 0.0 {
                return Err(Error::new(ErrorKind::InvalidArgs, "division by zero"));
            }
            return Ok(Self::Real(a % b));
        }
        Err(incompatible_type("mod", self.type_name()))
    }

    /// Exponentiation.
    pub fn pow(&self, other: &Self) -> Result<Self, Error> {
        if let Some((a, b)) = self.both_int(other) {
            if b >= 0 {
                return Ok(Self::Int(a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX))));
            }
            return Ok(Self::Real((a as f64).powi(i32::try_from(b).unwrap_or(0))));
        }
        if let Some((a, b)) = self.numeric_pair(other) {
            return Ok(Self::Real(a.powf(b)));
        }
        Err(incompatible_type("pow", self.type_name()))
    }

    /// Arithmetic negation.
    pub fn neg(&self) -> Result<Self, Error> {
        match self {
            Self::Int(n) => Ok(Self::Int(-n)),
            Self::Real(r) => Ok(Self::Real(-r)),
            _ => Err(incompatible_type("neg", self.type_name())),
        }
    }

    //
    // Bitwise.
    //

    fn int_pair(&self, other: &Self, op: &str) -> Result<(i64, i64), Error> {
        self.both_int(other)
            .ok_or_else(|| incompatible_type(op, self.type_name()))
    }

    pub fn bit_and(&self, other: &Self) -> Result<Self, Error> {
        let (a, b) = self.int_pair(other, "bitand")?;
        Ok(Self::Int(a & b))
    }

    pub fn bit_or(&self, other: &Self) -> Result<Self, Error> {
        let (a, b) = self.int_pair(other, "bitor")?;
        Ok(Self::Int(a | b))
    }

    pub fn bit_xor(&self, other: &Self) -> Result<Self, Error> {
        let (a, b) = self.int_pair(other, "bitxor")?;
        Ok(Self::Int(a ^ b))
    }

    pub fn shl(&self, other: &Self) -> Result<Self, Error> {
        let (a, b) = self.int_pair(other, "shl")?;
        Ok(Self::Int(a.wrapping_shl(u32::try_from(b).unwrap_or(0))))
    }

    pub fn shr(&self, other: &Self) -> Result<Self, Error> {
        let (a, b) = self.int_pair(other, "shr")?;
        Ok(Self::Int(a.wrapping_shr(u32::try_from(b).unwrap_or(0))))
    }

    pub fn bit_not(&self) -> Result<Self, Error> {
        match self {
            Self::Int(n) => Ok(Self::Int(!n)),
            _ => Err(incompatible_type("bitnot", self.type_name())),
        }
    }

    //
    // Comparison.
    //

    /// Structural equality. Numeric types compare across int/real;
    /// containers compare element-wise; everything else compares by
    /// identity.
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Array(a), Self::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, e)| b.get(k).is_some_and(|o| o.value.equals(&e.value)))
            }
            (Self::Set(a), Self::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
            }
            _ => {
                if let Some((a, b)) = self.numeric_pair(other) {
                    return a == b;
                }
                self.id() == other.id()
            }
        }
    }

    /// Ordering comparison; defined for numbers and strings.
    pub fn compare(&self, other: &Self) -> Result<std::cmp::Ordering, Error> {
        if let Some((a, b)) = self.numeric_pair(other) {
            return a.partial_cmp(&b).ok_or_else(|| {
                Error::new(ErrorKind::InvalidArgs, "cannot order NaN values")
            });
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            _ => Err(incompatible_type("compare", self.type_name())),
        }
    }

    /// The `in` membership test.
    pub fn contains(&self, item: &Self) -> Result<bool, Error> {
        match self {
            Self::Str(s) => match item {
                Self::Str(needle) => Ok(s.contains(needle.as_ref())),
                _ => Err(incompatible_type("in", item.type_name())),
            },
            Self::Array(a) => Ok(a.borrow().iter().any(|v| v.equals(item))),
            Self::Tuple(t) => Ok(t.iter().any(|v| v.equals(item))),
            Self::Map(m) => {
                let key = item.hash_key()?;
                Ok(m.borrow().contains_key(&key))
            }
            Self::Set(s) => {
                let key = item.hash_key()?;
                Ok(s.borrow().contains_key(&key))
            }
            _ => Err(incompatible_type("in", self.type_name())),
        }
    }

    //
    // Hashing.
    //

    /// Projects the value onto a hashable key. Mutable containers are not
    /// hashable.
    pub fn hash_key(&self) -> Result<HashKey, Error> {
        match self {
            Self::Nil => Ok(HashKey::Nil),
            Self::Bool(b) => Ok(HashKey::Bool(*b)),
            Self::Int(n) => Ok(HashKey::Int(*n)),
            Self::Real(r) => {
                // Integral reals collapse onto ints so x == y implies
                // hash(x) == hash(y).
                if r.fract() == 0.0 && r.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(r)
                {
                    Ok(HashKey::Int(*r as i64))
                } else {
                    Ok(HashKey::RealBits(r.to_bits()))
                }
            }
            Self::Str(s) => Ok(HashKey::Str(s.to_string())),
            Self::Tuple(t) => Ok(HashKey::Tuple(
                t.iter().map(Self::hash_key).collect::<Result<_, _>>()?,
            )),
            _ => Err(incompatible_type("hash", self.type_name())),
        }
    }

    //
    // Indexing.
    //

    fn normalize_index(index: i64, len: usize) -> Result<usize, Error> {
        let len_i = i64::try_from(len).unwrap_or(i64::MAX);
        let resolved = if index < 0 { index + len_i } else { index };
        if resolved < 0 || resolved >= len_i {
            return Err(Error::new(
                ErrorKind::InvalidArgs,
                format!("index {index} out of range for length {len}"),
            ));
        }
        Ok(resolved as usize)
    }

    fn slice_bounds(slice: &SliceValue, len: usize) -> (usize, usize) {
        let len_i = i64::try_from(len).unwrap_or(i64::MAX);
        let clamp = |v: i64| -> usize {
            let v = if v < 0 { v + len_i } else { v };
            v.clamp(0, len_i) as usize
        };
        let start = slice.start.map_or(0, clamp);
        let end = slice.end.map_or(len, clamp);
        (start, end.max(start))
    }

    /// `obj[index]`.
    pub fn get_item(&self, index: &Self) -> Result<Self, Error> {
        match self {
            Self::Array(a) => match index {
                Self::Int(i) => {
                    let items = a.borrow();
                    let idx = Self::normalize_index(*i, items.len())?;
                    Ok(items[idx].clone())
                }
                Self::Slice(s) => {
                    let items = a.borrow();
                    let (start, end) = Self::slice_bounds(s, items.len());
                    Ok(Self::array(items[start..end].to_vec()))
                }
                _ => Err(incompatible_type("index", index.type_name())),
            },
            Self::Tuple(t) => match index {
                Self::Int(i) => {
                    let idx = Self::normalize_index(*i, t.len())?;
                    Ok(t[idx].clone())
                }
                Self::Slice(s) => {
                    let (start, end) = Self::slice_bounds(s, t.len());
                    Ok(Self::tuple(t[start..end].to_vec()))
                }
                _ => Err(incompatible_type("index", index.type_name())),
            },
            Self::Str(s) => match index {
                Self::Int(i) => {
                    let chars: Vec<char> = s.chars().collect();
                    let idx = Self::normalize_index(*i, chars.len())?;
                    Ok(Self::str(chars[idx].to_string()))
                }
                Self::Slice(sl) => {
                    let chars: Vec<char> = s.chars().collect();
                    let (start, end) = Self::slice_bounds(sl, chars.len());
                    Ok(Self::str(chars[start..end].iter().collect::<String>()))
                }
                _ => Err(incompatible_type("index", index.type_name())),
            },
            Self::Map(m) => {
                let key = index.hash_key()?;
                m.borrow().get(&key).map(|e| e.value.clone()).ok_or_else(|| {
                    Error::new(
                        ErrorKind::IdNotFound,
                        format!("key {} not found", index.format()),
                    )
                })
            }
            _ => Err(incompatible_type("index", self.type_name())),
        }
    }

    /// `obj[index] = value`.
    pub fn set_item(&self, index: &Self, value: Self) -> Result<(), Error> {
        match self {
            Self::Array(a) => match index {
                Self::Int(i) => {
                    let mut items = a.borrow_mut();
                    let idx = Self::normalize_index(*i, items.len())?;
                    items[idx] = value;
                    Ok(())
                }
                _ => Err(incompatible_type("index assignment", index.type_name())),
            },
            Self::Map(m) => {
                let key = index.hash_key()?;
                m.borrow_mut().insert(
                    key,
                    MapEntry {
                        key: index.clone(),
                        value,
                    },
                );
                Ok(())
            }
            _ => Err(incompatible_type("index assignment", self.type_name())),
        }
    }

    /// `del obj[index]`.
    pub fn del_item(&self, index: &Self) -> Result<(), Error> {
        match self {
            Self::Array(a) => match index {
                Self::Int(i) => {
                    let mut items = a.borrow_mut();
                    let idx = Self::normalize_index(*i, items.len())?;
                    items.remove(idx);
                    Ok(())
                }
                _ => Err(incompatible_type("del", index.type_name())),
            },
            Self::Map(m) => {
                let key = index.hash_key()?;
                if m.borrow_mut().shift_remove(&key).is_none() {
                    return Err(Error::new(
                        ErrorKind::IdNotFound,
                        format!("key {} not found", index.format()),
                    ));
                }
                Ok(())
            }
            Self::Set(s) => {
                let key = index.hash_key()?;
                if s.borrow_mut().shift_remove(&key).is_none() {
                    return Err(Error::new(
                        ErrorKind::IdNotFound,
                        format!("member {} not found", index.format()),
                    ));
                }
                Ok(())
            }
            _ => Err(incompatible_type("del", self.type_name())),
        }
    }

    /// The number of elements.
    pub fn len(&self) -> Result<i64, Error> {
        let len = match self {
            Self::Str(s) => s.chars().count(),
            Self::Array(a) => a.borrow().len(),
            Self::Tuple(t) => t.len(),
            Self::Map(m) => m.borrow().len(),
            Self::Set(s) => s.borrow().len(),
            Self::Range(r) => return Ok(r.borrow().remaining()),
            _ => return Err(incompatible_type("len", self.type_name())),
        };
        Ok(i64::try_from(len).unwrap_or(i64::MAX))
    }

    /// A shallow copy: containers get a fresh allocation with the same
    /// elements, primitives copy by value.
    pub fn copy_value(&self) -> Result<Self, Error> {
        match self {
            Self::Array(a) => Ok(Self::array(a.borrow().clone())),
            Self::Map(m) => Ok(Self::Map(Rc::new(RefCell::new(m.borrow().clone())))),
            Self::Set(s) => Ok(Self::Set(Rc::new(RefCell::new(s.borrow().clone())))),
            Self::Tuple(t) => Ok(Self::tuple(t.to_vec())),
            Self::Nil
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Real(_)
            | Self::Str(_)
            | Self::Slice(_) => Ok(self.clone()),
            Self::Instance(obj) => Ok(Self::Instance(Rc::new(InstanceValue {
                class: Rc::clone(&obj.class),
                attrs: RefCell::new(obj.attrs.borrow().clone()),
            }))),
            _ => Err(incompatible_type("copy", self.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn int_arithmetic_stays_integral() {
        let v = Value::Int(7).add(&Value::Int(3)).unwrap();
        assert_matches!(v, Value::Int(10));

        let v = Value::Int(7).div(&Value::Int(2)).unwrap();
        assert_matches!(v, Value::Int(3));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_real() {
        let v = Value::Int(1).add(&Value::Real(0.5)).unwrap();
        assert_matches!(v, Value::Real(r) if (r - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn division_by_zero_raises_invalid_args() {
        let err = Value::Int(1).div(&Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgs);

        let err = Value::Int(1).rem(&Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgs);
    }

    #[test]
    fn string_concatenation_and_repeat() {
        let v = Value::str("ab").add(&Value::str("cd")).unwrap();
        assert_eq!(v.format(), "abcd");

        let v = Value::str("ab").mul(&Value::Int(3)).unwrap();
        assert_eq!(v.format(), "ababab");
    }

    #[test]
    fn unsupported_operation_raises_incompatible_type() {
        let err = Value::Nil.add(&Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleType);

        let err = Value::str("x").bit_and(&Value::str("y")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleType);
    }

    #[test]
    fn equal_values_have_equal_hash_keys() {
        let a = Value::Int(1);
        let b = Value::Real(1.0);
        assert!(a.equals(&b));
        assert_eq!(a.hash_key().unwrap(), b.hash_key().unwrap());

        let s1 = Value::str("k");
        let s2 = Value::str("k");
        assert!(s1.equals(&s2));
        assert_eq!(s1.hash_key().unwrap(), s2.hash_key().unwrap());
    }

    #[test]
    fn mutable_containers_are_not_hashable() {
        let arr = Value::array(vec![Value::Int(1)]);
        assert_matches!(arr.hash_key(), Err(_));
    }

    #[test]
    fn identity_shared_across_assignment_and_changed_by_copy() {
        let a = Value::array(vec![Value::Int(1)]);
        let b = a.clone();
        assert_eq!(a.id(), b.id());

        let copied = a.copy_value().unwrap();
        assert!(copied.equals(&a));
        assert_ne!(copied.id(), a.id());
    }

    #[test]
    fn negative_indices_wrap() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let last = arr.get_item(&Value::Int(-1)).unwrap();
        assert_matches!(last, Value::Int(3));
    }

    #[test]
    fn slices_produce_new_containers() {
        let arr = Value::array((1..=5).map(Value::Int).collect());
        let slice = Value::Slice(Rc::new(SliceValue {
            start: Some(1),
            end: Some(3),
        }));
        let sub = arr.get_item(&slice).unwrap();
        assert_eq!(sub.format(), "[2, 3]");

        let s = Value::str("hello");
        let sub = s.get_item(&slice).unwrap();
        assert_eq!(sub.format(), "el");
    }

    #[test]
    fn map_preserves_insertion_order() {
        let map = Value::Map(Rc::new(RefCell::new(IndexMap::new())));
        map.set_item(&Value::str("z"), Value::Int(1)).unwrap();
        map.set_item(&Value::str("a"), Value::Int(2)).unwrap();
        map.set_item(&Value::str("m"), Value::Int(3)).unwrap();
        assert_eq!(map.format(), "{\"z\": 1, \"a\": 2, \"m\": 3}");
    }

    #[test]
    fn membership_tests() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        assert!(arr.contains(&Value::Int(2)).unwrap());
        assert!(!arr.contains(&Value::Int(9)).unwrap());

        let s = Value::str("hello world");
        assert!(s.contains(&Value::str("lo wo")).unwrap());
    }

    #[test]
    fn ordering_comparisons() {
        assert_eq!(
            Value::Int(1).compare(&Value::Real(1.5)).unwrap(),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            Value::str("b").compare(&Value::str("a")).unwrap(),
            std::cmp::Ordering::Greater
        );
        assert_matches!(Value::Nil.compare(&Value::Int(1)), Err(_));
    }
}
