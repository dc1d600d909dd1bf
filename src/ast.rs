//! This module defines the value model shared by code and data. The main enum,
//! [`Value`], covers every runtime variant: scalars, symbols and keywords, the three
//! collection kinds, atoms, user closures and native builtins. Because the language is
//! homoiconic the reader produces `Value` trees and the evaluator walks them directly.
//!
//! Collections are shared through `Rc`, so cloning a value never copies its elements and
//! a sequence handed to a function cannot be mutated behind the caller's back. Atoms are
//! the one deliberately mutable variant.
//!
//! Ergonomic helpers such as [`val`], [`sym`], [`kw`] and [`nil`] build ASTs in code and
//! tests; conversion traits cover common Rust types.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::Error;
use crate::env::Env;
use crate::stack::ensure_sufficient_stack;

/// Type alias for integer values in the interpreter
pub type IntType = i64;

/// Type alias for floating point values in the interpreter
pub type FloatType = f64;

/// Parameter-list token that makes the following parameter collect all remaining arguments
pub const REST_MARKER: &str = "&";

/// Check if a string is valid keyword text: a leading ':' followed by
/// `[A-Za-z0-9\-*+!_'?<>=]*`
pub(crate) fn is_valid_keyword(text: &str) -> bool {
    match text.strip_prefix(':') {
        Some(rest) => rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-*+!_'?<>=".contains(c)),
        None => false,
    }
}

/// Canonical signature of native functions.
///
/// Builtins receive ownership of their evaluated argument vector.
pub type NativeFn = dyn Fn(Vec<Value>) -> Result<Value, Error>;

/// A user-defined function created by `fn*`, or a macro created by `defmacro!`.
pub struct Closure {
    /// Parameter symbols, possibly containing [`REST_MARKER`] followed by one symbol
    pub params: Vec<Value>,
    pub body: Value,
    /// Defining environment, shared with every other closure created in it
    pub env: Env,
    pub is_macro: bool,
}

/// Core value type of the interpreter.
///
/// To build an AST, use the ergonomic helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `kw(":k")` for keywords
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// The "no value" singleton, also the empty sequence
    Nil,
    Bool(bool),
    Integer(IntType),
    Float(FloatType),
    String(String),
    /// Identifiers resolved through the environment
    Symbol(String),
    /// Self-evaluating identifiers; the text includes the leading ':'
    Keyword(String),
    List(Rc<Vec<Value>>),
    Vector(Rc<Vec<Value>>),
    Map(Rc<BTreeMap<MapKey, Value>>),
    /// Mutable reference cell; compared by identity
    Atom(Rc<RefCell<Value>>),
    /// User-defined function or macro (params, body, closure env)
    Function(Rc<Closure>),
    /// Native function; the id is used for display and equality
    Builtin { id: String, func: Rc<NativeFn> },
}

/// The hashable subset of [`Value`] usable as map keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Integer(IntType),
    /// Stored as raw bits so keys stay totally ordered
    Float(u64),
    String(String),
    Symbol(String),
    Keyword(String),
}

impl TryFrom<Value> for MapKey {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Error> {
        match &value {
            Value::Nil => Ok(MapKey::Nil),
            Value::Bool(b) => Ok(MapKey::Bool(*b)),
            Value::Integer(n) => Ok(MapKey::Integer(*n)),
            Value::Float(x) => Ok(MapKey::Float(x.to_bits())),
            Value::String(s) => Ok(MapKey::String(s.clone())),
            Value::Symbol(s) => Ok(MapKey::Symbol(s.clone())),
            Value::Keyword(s) => Ok(MapKey::Keyword(s.clone())),
            other @ (Value::List(_)
            | Value::Vector(_)
            | Value::Map(_)
            | Value::Atom(_)
            | Value::Function(_)
            | Value::Builtin { .. }) => Err(Error::TypeError(format!(
                "{} cannot be used as a map key",
                other.type_name()
            ))),
        }
    }
}

impl From<&MapKey> for Value {
    fn from(key: &MapKey) -> Self {
        match key {
            MapKey::Nil => Value::Nil,
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Integer(n) => Value::Integer(*n),
            MapKey::Float(bits) => Value::Float(FloatType::from_bits(*bits)),
            MapKey::String(s) => Value::String(s.clone()),
            MapKey::Symbol(s) => Value::Symbol(s.clone()),
            MapKey::Keyword(s) => Value::Keyword(s.clone()),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ensure_sufficient_stack(|| match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Keyword(s) => write!(f, "Keyword({s})"),
            Value::List(items) => f.debug_tuple("List").field(&items.as_slice()).finish(),
            Value::Vector(items) => f.debug_tuple("Vector").field(&items.as_slice()).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries.as_ref()).finish(),
            Value::Atom(cell) => with_open_atom(cell, |inner| write!(f, "Atom({inner:?})"))
                .unwrap_or_else(|| write!(f, "Atom(<cycle>)")),
            Value::Function(closure) => write!(
                f,
                "{}(params={:?}, body={:?})",
                if closure.is_macro { "Macro" } else { "Function" },
                closure.params,
                closure.body
            ),
            Value::Builtin { id, .. } => write!(f, "Builtin({id})"),
        })
    }
}

thread_local! {
    /// Atoms whose contents are being rendered further up the stack
    static OPEN_ATOMS: RefCell<Vec<*const RefCell<Value>>> = const { RefCell::new(Vec::new()) };
}

/// Run `render` on an atom's contents, unless this atom is already being rendered.
///
/// An atom can hold itself (`(reset! a a)`); `None` marks that cycle.
pub(crate) fn with_open_atom<R>(
    cell: &Rc<RefCell<Value>>,
    render: impl FnOnce(&Value) -> R,
) -> Option<R> {
    let ptr = Rc::as_ptr(cell);
    if OPEN_ATOMS.with_borrow(|open| open.contains(&ptr)) {
        return None;
    }
    OPEN_ATOMS.with_borrow_mut(|open| open.push(ptr));
    let result = render(&cell.borrow());
    OPEN_ATOMS.with_borrow_mut(|open| open.pop());
    Some(result)
}

impl PartialEq for Value {
    #[allow(clippy::float_cmp)] // literal equality is the intended semantics
    fn eq(&self, other: &Self) -> bool {
        // Nested containers are compared through a work-list rather than recursion
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            let same = match (a, b) {
                (Value::Nil, Value::Nil) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Integer(a), Value::Integer(b)) => a == b,
                (Value::Float(a), Value::Float(b)) => a == b,
                (Value::String(a), Value::String(b))
                | (Value::Symbol(a), Value::Symbol(b))
                | (Value::Keyword(a), Value::Keyword(b)) => a == b,
                (Value::List(a), Value::List(b)) | (Value::Vector(a), Value::Vector(b)) => {
                    let same_len = a.len() == b.len();
                    if same_len {
                        pending.extend(a.iter().zip(b.iter()));
                    }
                    same_len
                }
                (Value::Map(a), Value::Map(b)) => {
                    a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                            pending.push((va, vb));
                            ka == kb
                        })
                }
                (Value::Atom(a), Value::Atom(b)) => Rc::ptr_eq(a, b),
                (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
                // Compare builtins by id string, not function pointer
                (Value::Builtin { id: id1, .. }, Value::Builtin { id: id2, .. }) => id1 == id2,
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

/// Containers this value owns alone are emptied into a work-list before they drop, so
/// a deeply nested list is freed level by level instead of by recursion.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_children(self, &mut pending);
        while let Some(mut value) = pending.pop() {
            take_children(&mut value, &mut pending);
        }
    }
}

fn take_children(value: &mut Value, pending: &mut Vec<Value>) {
    match value {
        Value::List(items) | Value::Vector(items) => {
            if let Some(items) = Rc::get_mut(items) {
                pending.append(items);
            }
        }
        Value::Map(entries) => {
            if let Some(entries) = Rc::get_mut(entries) {
                pending.extend(std::mem::take(entries).into_values());
            }
        }
        Value::Atom(cell) => {
            if let Some(cell) = Rc::get_mut(cell) {
                pending.push(std::mem::replace(cell.get_mut(), Value::Nil));
            }
        }
        _ => {}
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<FloatType> for Value {
    fn from(x: FloatType) -> Self {
        Value::Float(x)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(IntType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating keywords; `text` includes the leading ':'
pub fn kw<S: AsRef<str>>(text: S) -> Value {
    Value::Keyword(text.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the nil singleton
pub fn nil() -> Value {
    Value::Nil
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(items))
    }

    pub fn map(entries: BTreeMap<MapKey, Value>) -> Value {
        Value::Map(Rc::new(entries))
    }

    pub fn atom(value: Value) -> Value {
        Value::Atom(Rc::new(RefCell::new(value)))
    }

    /// Wrap a Rust closure as a named native function
    pub fn builtin<F>(id: impl Into<String>, func: F) -> Value
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    {
        Value::Builtin {
            id: id.into(),
            func: Rc::new(func),
        }
    }

    /// Build a map from alternating key/value items
    pub fn map_from_pairs(items: Vec<Value>) -> Result<Value, Error> {
        if items.len() % 2 != 0 {
            return Err(Error::TypeError(
                "map requires an even number of forms".to_owned(),
            ));
        }
        let mut entries = BTreeMap::new();
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            entries.insert(MapKey::try_from(key)?, value);
        }
        Ok(Value::map(entries))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `false` and `nil` are falsy; `0`, `""` and empty collections are truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, Value::Function(closure) if closure.is_macro)
    }

    /// View a List, Vector or Nil as a slice of elements
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items.as_slice()),
            Value::Nil => Some(&[]),
            _ => None,
        }
    }

    /// Element count of a sequence, map or string; nil counts as empty
    pub fn count(&self) -> Result<usize, Error> {
        match self {
            Value::Nil => Ok(0),
            Value::List(items) | Value::Vector(items) => Ok(items.len()),
            Value::Map(entries) => Ok(entries.len()),
            Value::String(s) => Ok(s.chars().count()),
            other => Err(Error::TypeError(format!(
                "count not supported on {}",
                other.type_name()
            ))),
        }
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Atom(_) => "atom",
            Value::Function(closure) if closure.is_macro => "macro",
            Value::Function(_) | Value::Builtin { .. } => "function",
        }
    }
}
