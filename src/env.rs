//! Lexical environments.
//!
//! An [`Env`] is a shared handle to one scope. Scopes are reference counted so that any
//! number of closures can keep the scope they were created in alive, and bindings sit
//! behind a `RefCell` so `def!` can add to a scope that closures already share.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::ast::{REST_MARKER, Value};
use crate::builtinops::get_builtin_ops;
use crate::evaluator::Arity;
use crate::{Error, SyntaxErrorKind};

struct Scope {
    bindings: RefCell<HashMap<String, Value>>,
    outer: Option<Env>,
}

/// Handle to a scope in the environment chain. Cloning shares the scope.
#[derive(Clone)]
pub struct Env(Rc<Scope>);

/// Non-owning handle to a scope, for natives that must call back into an
/// environment that also holds them.
#[derive(Clone)]
pub struct WeakEnv(Weak<Scope>);

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Env({} bindings, depth {})",
            self.0.bindings.borrow().len(),
            self.depth()
        )
    }
}

impl PartialEq for Env {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Env {
    /// Create a scope under `outer`, binding `keys[i]` to `vals[i]`.
    ///
    /// A key equal to [`REST_MARKER`] makes the next key collect the remaining values as
    /// a list. Missing or surplus values are arity errors.
    pub fn new(outer: Option<&Env>, keys: &[Value], vals: Vec<Value>) -> Result<Env, Error> {
        let env = Env::empty(outer.cloned());
        let got = vals.len();
        let arity = match keys.iter().position(is_rest_marker) {
            Some(required) => Arity::AtLeast(required),
            None => Arity::Exact(keys.len()),
        };
        let mut vals = vals.into_iter();

        for (i, key) in keys.iter().enumerate() {
            let name = symbol_name(key)?;
            if name == REST_MARKER {
                return match &keys[i + 1..] {
                    [rest] => {
                        env.define(symbol_name(rest)?, Value::list(vals.collect()));
                        Ok(env)
                    }
                    _ => Err(Error::syntax(
                        SyntaxErrorKind::InvalidForm,
                        format!("'{REST_MARKER}' must be followed by exactly one parameter"),
                    )),
                };
            }
            match vals.next() {
                Some(value) => env.define(name, value),
                None => return Err(Error::arity_error(arity, got)),
            }
        }

        if vals.next().is_some() {
            return Err(Error::arity_error(arity, got));
        }
        Ok(env)
    }

    /// Create the root scope holding every builtin from the registry
    pub fn global() -> Env {
        let env = Env::empty(None);
        for op in get_builtin_ops() {
            env.define(op.id, op.to_value());
        }
        env
    }

    fn empty(outer: Option<Env>) -> Env {
        Env(Rc::new(Scope {
            bindings: RefCell::new(HashMap::new()),
            outer,
        }))
    }

    /// Bind `key` in this scope, shadowing any outer binding of the same name
    pub fn define(&self, key: &str, value: Value) {
        self.0.bindings.borrow_mut().insert(key.to_owned(), value);
    }

    /// Find the innermost scope that binds `key`
    pub fn find(&self, key: &str) -> Option<Env> {
        let mut scope = self;
        loop {
            if scope.0.bindings.borrow().contains_key(key) {
                return Some(scope.clone());
            }
            scope = scope.0.outer.as_ref()?;
        }
    }

    /// Look up `key` through the chain
    pub fn get(&self, key: &str) -> Result<Value, Error> {
        self.lookup(key).ok_or_else(|| Error::LookupError(key.to_owned()))
    }

    /// Like [`Env::get`], but absence is not an error
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let scope = self.find(key)?;
        scope.0.bindings.borrow().get(key).cloned()
    }

    pub fn outer(&self) -> Option<&Env> {
        self.0.outer.as_ref()
    }

    pub fn downgrade(&self) -> WeakEnv {
        WeakEnv(Rc::downgrade(&self.0))
    }

    /// Register a native function in this scope.
    ///
    /// ```
    /// use mallet::ast::Value;
    /// use mallet::env::Env;
    ///
    /// let env = Env::global();
    /// env.register_builtin("answer", |_args: Vec<Value>| Ok(Value::Integer(42)));
    /// ```
    pub fn register_builtin<F>(&self, name: &str, func: F)
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    {
        self.define(name, Value::builtin(name, func));
    }

    /// All bindings visible from this scope, inner bindings shadowing outer ones,
    /// sorted by name
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = match self.outer() {
            Some(outer) => outer.bindings().into_iter().collect::<HashMap<_, _>>(),
            None => HashMap::new(),
        };
        for (name, value) in self.0.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    fn depth(&self) -> usize {
        std::iter::successors(self.outer(), |env| env.outer()).count()
    }
}

impl WeakEnv {
    pub fn upgrade(&self) -> Option<Env> {
        self.0.upgrade().map(Env)
    }
}

fn is_rest_marker(key: &Value) -> bool {
    matches!(key, Value::Symbol(name) if name == REST_MARKER)
}

fn symbol_name(key: &Value) -> Result<&str, Error> {
    match key {
        Value::Symbol(name) => Ok(name),
        other => Err(Error::TypeError(format!(
            "binding names must be symbols, got {}",
            other.type_name()
        ))),
    }
}
