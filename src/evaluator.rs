//! The evaluator: special forms, macro expansion, quasiquote and application.
//!
//! [`eval`] runs an explicit loop over the current form and environment. Forms in tail
//! position (the chosen `if` branch, the last `do` form, a `let*` body, the body of a
//! called function) replace the loop state instead of recursing, so tail-recursive Lisp
//! code runs in constant host stack. Everything else recurses through
//! `eval_with_depth_tracking` and is bounded by [`MAX_EVAL_DEPTH`].

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Closure, NativeFn, Value, sym};
use crate::env::Env;
use crate::stack::ensure_sufficient_stack;
use crate::{Error, MAX_EVAL_DEPTH, SyntaxErrorKind};

/// Number of arguments a function or special form accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(self, got: usize) -> bool {
        match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(min) => got >= min,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        }
    }

    pub fn validate(self, got: usize) -> Result<(), Error> {
        if self.accepts(got) {
            Ok(())
        } else {
            Err(Error::arity_error(self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(min) => write!(f, "at least {min}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Forms whose operands are not evaluated before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    Def,
    Let,
    Do,
    If,
    Fn,
    Quote,
    Quasiquote,
    Defmacro,
    Macroexpand,
}

impl SpecialForm {
    fn from_symbol(name: &str) -> Option<Self> {
        match name {
            "def!" => Some(SpecialForm::Def),
            "let*" => Some(SpecialForm::Let),
            "do" => Some(SpecialForm::Do),
            "if" => Some(SpecialForm::If),
            "fn*" => Some(SpecialForm::Fn),
            "quote" => Some(SpecialForm::Quote),
            "quasiquote" => Some(SpecialForm::Quasiquote),
            "defmacro!" => Some(SpecialForm::Defmacro),
            "macroexpand" => Some(SpecialForm::Macroexpand),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SpecialForm::Def => "def!",
            SpecialForm::Let => "let*",
            SpecialForm::Do => "do",
            SpecialForm::If => "if",
            SpecialForm::Fn => "fn*",
            SpecialForm::Quote => "quote",
            SpecialForm::Quasiquote => "quasiquote",
            SpecialForm::Defmacro => "defmacro!",
            SpecialForm::Macroexpand => "macroexpand",
        }
    }

    fn arity(self) -> Arity {
        match self {
            SpecialForm::Def
            | SpecialForm::Let
            | SpecialForm::Fn
            | SpecialForm::Defmacro => Arity::Exact(2),
            SpecialForm::Do => Arity::Any,
            SpecialForm::If => Arity::Range(2, 3),
            SpecialForm::Quote | SpecialForm::Quasiquote | SpecialForm::Macroexpand => {
                Arity::Exact(1)
            }
        }
    }
}

/// Outcome of evaluating one list form: either a finished value, or a form to
/// continue with in place of the current one.
enum Step {
    Done(Value),
    TailCall(Value, Env),
}

thread_local! {
    /// Evaluation depth at which the innermost running builtin was called. Natives that
    /// re-enter through [`eval`] or [`apply`] continue counting from there.
    static NATIVE_CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Evaluate a form (public API)
pub fn eval(ast: &Value, env: &Env) -> Result<Value, Error> {
    eval_with_depth_tracking(ast.clone(), env.clone(), NATIVE_CALL_DEPTH.get())
}

/// Apply a function or builtin to already evaluated arguments.
///
/// This is the entry point for natives that call back into Lisp code, such as `swap!`.
pub fn apply(func: &Value, args: Vec<Value>) -> Result<Value, Error> {
    apply_with_depth(func, args, NATIVE_CALL_DEPTH.get())
}

/// Expand `ast` while its head names a macro, without evaluating the result
pub fn macroexpand(ast: &Value, env: &Env) -> Result<Value, Error> {
    expand_macros(ast.clone(), env, NATIVE_CALL_DEPTH.get())
}

fn call_native(func: &NativeFn, args: Vec<Value>, depth: usize) -> Result<Value, Error> {
    let caller_depth = NATIVE_CALL_DEPTH.replace(depth + 1);
    let result = func(args);
    NATIVE_CALL_DEPTH.set(caller_depth);
    result
}

/// Evaluate a form with depth tracking to prevent stack overflow
fn eval_with_depth_tracking(ast: Value, env: Env, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }
    ensure_sufficient_stack(|| eval_loop(ast, env, depth))
}

fn eval_loop(mut ast: Value, mut env: Env, depth: usize) -> Result<Value, Error> {
    loop {
        ast = expand_macros(ast, &env, depth)?;

        let items = match &ast {
            Value::List(items) if items.is_empty() => return Ok(ast.clone()),
            Value::List(items) => Rc::clone(items),
            _ => return eval_ast(&ast, &env, depth),
        };

        match eval_list(&items, &env, depth).map_err(|err| add_context(err, &ast))? {
            Step::Done(value) => return Ok(value),
            Step::TailCall(next, next_env) => {
                trace!(form = %next, "tail call");
                ast = next;
                env = next_env;
            }
        }
    }
}

const CONTEXT_LINE: &str = "\n  Context: while evaluating: ";

/// Helper function to add expression context to errors. Only the innermost form is
/// kept; outer frames leave an error that already has context alone.
fn add_context(error: Error, expr: &Value) -> Error {
    match error {
        Error::EvalError(msg) if !msg.contains(CONTEXT_LINE) => {
            Error::EvalError(format!("{msg}{CONTEXT_LINE}{expr}"))
        }
        Error::TypeError(msg) if !msg.contains(CONTEXT_LINE) => {
            Error::TypeError(format!("{msg}{CONTEXT_LINE}{expr}"))
        }
        // Syntax, lookup and arity errors carry their own context
        other => other,
    }
}

/// Evaluate a form as data: symbols are looked up, containers are rebuilt from their
/// evaluated elements, everything else evaluates to itself.
fn eval_ast(ast: &Value, env: &Env, depth: usize) -> Result<Value, Error> {
    match ast {
        Value::Symbol(name) => env.get(name),
        Value::List(items) => Ok(Value::list(eval_args(items, env, depth)?)),
        Value::Vector(items) => Ok(Value::vector(eval_args(items, env, depth)?)),
        Value::Map(entries) => {
            let mut evaluated = BTreeMap::new();
            for (key, value) in entries.iter() {
                let value = eval_with_depth_tracking(value.clone(), env.clone(), depth + 1)?;
                evaluated.insert(key.clone(), value);
            }
            Ok(Value::map(evaluated))
        }
        Value::Nil
        | Value::Bool(_)
        | Value::Integer(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Keyword(_)
        | Value::Atom(_)
        | Value::Function(_)
        | Value::Builtin { .. } => Ok(ast.clone()),
    }
}

/// Helper function to evaluate a list of argument expressions with depth tracking
fn eval_args(args: &[Value], env: &Env, depth: usize) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg.clone(), env.clone(), depth + 1))
        .collect()
}

/// Evaluate a non-empty list: a special form if the head names one, otherwise an
/// application.
fn eval_list(items: &[Value], env: &Env, depth: usize) -> Result<Step, Error> {
    let Some((head, args)) = items.split_first() else {
        return Ok(Step::Done(Value::list(Vec::new())));
    };

    if let Value::Symbol(name) = head
        && let Some(form) = SpecialForm::from_symbol(name)
    {
        return eval_special_form(form, args, env, depth);
    }

    let mut evaluated = eval_args(items, env, depth)?;
    let call_args = evaluated.split_off(1);
    let Some(func) = evaluated.pop() else {
        return Ok(Step::Done(Value::Nil));
    };

    match &func {
        Value::Function(closure) => {
            let call_env = Env::new(Some(&closure.env), &closure.params, call_args)
                .map_err(|err| name_arity_error(err, head))?;
            Ok(Step::TailCall(closure.body.clone(), call_env))
        }
        Value::Builtin { func, .. } => call_native(&**func, call_args, depth).map(Step::Done),
        other => Err(not_callable(other)),
    }
}

/// Attach the called form to an arity error from binding a function's parameters
fn name_arity_error(error: Error, head: &Value) -> Error {
    match error {
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, head.to_string()),
        other => other,
    }
}

fn not_callable(value: &Value) -> Error {
    Error::syntax(
        SyntaxErrorKind::NotCallable,
        format!("{value} is not callable ({})", value.type_name()),
    )
}

fn eval_special_form(
    form: SpecialForm,
    args: &[Value],
    env: &Env,
    depth: usize,
) -> Result<Step, Error> {
    trace!(form = form.name(), "special form");
    match (form, args) {
        (SpecialForm::Def, [name, expr]) => {
            let name = binding_name(form, name)?;
            let value = eval_with_depth_tracking(expr.clone(), env.clone(), depth + 1)?;
            debug!(name, "def!");
            env.define(name, value.clone());
            Ok(Step::Done(value))
        }

        (SpecialForm::Let, [bindings, body]) => {
            let let_env = Env::new(Some(env), &[], Vec::new())?;
            for (name, expr) in let_bindings(bindings)? {
                let value = eval_with_depth_tracking(expr.clone(), let_env.clone(), depth + 1)?;
                let_env.define(name, value);
            }
            Ok(Step::TailCall(body.clone(), let_env))
        }

        (SpecialForm::Do, body) => match body.split_last() {
            Some((last, init)) => {
                for expr in init {
                    eval_with_depth_tracking(expr.clone(), env.clone(), depth + 1)?;
                }
                Ok(Step::TailCall(last.clone(), env.clone()))
            }
            None => Ok(Step::Done(Value::Nil)),
        },

        (SpecialForm::If, [condition, then_branch, rest @ ..]) if rest.len() <= 1 => {
            let condition = eval_with_depth_tracking(condition.clone(), env.clone(), depth + 1)?;
            if condition.is_truthy() {
                Ok(Step::TailCall(then_branch.clone(), env.clone()))
            } else if let [else_branch] = rest {
                Ok(Step::TailCall(else_branch.clone(), env.clone()))
            } else {
                Ok(Step::Done(Value::Nil))
            }
        }

        (SpecialForm::Fn, [params, body]) => {
            let closure = Closure {
                params: parameter_list(params)?,
                body: body.clone(),
                env: env.clone(),
                is_macro: false,
            };
            Ok(Step::Done(Value::Function(Rc::new(closure))))
        }

        (SpecialForm::Quote, [expr]) => Ok(Step::Done(expr.clone())),

        (SpecialForm::Quasiquote, [expr]) => Ok(Step::TailCall(quasiquote(expr)?, env.clone())),

        (SpecialForm::Defmacro, [name, expr]) => {
            let name = binding_name(form, name)?;
            let value = eval_with_depth_tracking(expr.clone(), env.clone(), depth + 1)?;
            let Value::Function(closure) = &value else {
                return Err(Error::TypeError(format!(
                    "defmacro! requires a function, got {}",
                    value.type_name()
                )));
            };
            let macro_value = Value::Function(Rc::new(Closure {
                params: closure.params.clone(),
                body: closure.body.clone(),
                env: closure.env.clone(),
                is_macro: true,
            }));
            debug!(name, "defmacro!");
            env.define(name, macro_value.clone());
            Ok(Step::Done(macro_value))
        }

        (SpecialForm::Macroexpand, [expr]) => {
            expand_macros(expr.clone(), env, depth + 1).map(Step::Done)
        }

        _ => Err(Error::arity_error_with_expr(
            form.arity(),
            args.len(),
            form.name(),
        )),
    }
}

fn binding_name(form: SpecialForm, name: &Value) -> Result<&str, Error> {
    match name {
        Value::Symbol(name) => Ok(name),
        other => Err(Error::TypeError(format!(
            "{} requires a symbol, got {}",
            form.name(),
            other.type_name()
        ))),
    }
}

/// Pair up the names and expressions of a `let*` binding form.
///
/// Bindings are normally an alternating sequence `(a 1 b 2)`. A sequence of pairs
/// `((a 1) (b 2))` is also accepted.
fn let_bindings(bindings: &Value) -> Result<Vec<(&str, &Value)>, Error> {
    let items = match bindings {
        Value::List(items) | Value::Vector(items) => items.as_slice(),
        other => {
            return Err(Error::syntax(
                SyntaxErrorKind::InvalidForm,
                format!(
                    "let* bindings must be a list or vector, got {}",
                    other.type_name()
                ),
            ));
        }
    };

    if let Some(Value::List(_) | Value::Vector(_)) = items.first() {
        return items
            .iter()
            .map(|pair| match pair {
                Value::List(pair) | Value::Vector(pair) => match pair.as_slice() {
                    [Value::Symbol(name), expr] => Ok((name.as_str(), expr)),
                    _ => Err(invalid_binding_pair()),
                },
                _ => Err(invalid_binding_pair()),
            })
            .collect();
    }

    if items.len() % 2 != 0 {
        return Err(Error::syntax(
            SyntaxErrorKind::InvalidForm,
            format!(
                "let* requires an even number of binding forms, got {}",
                items.len()
            ),
        ));
    }
    items
        .chunks_exact(2)
        .map(|pair| match pair {
            [Value::Symbol(name), expr] => Ok((name.as_str(), expr)),
            _ => Err(Error::TypeError(format!(
                "let* binding names must be symbols, got {}",
                pair.first().map_or("nothing", Value::type_name)
            ))),
        })
        .collect()
}

fn invalid_binding_pair() -> Error {
    Error::syntax(
        SyntaxErrorKind::InvalidForm,
        "let* binding pairs must have the form (name expr)",
    )
}

fn parameter_list(params: &Value) -> Result<Vec<Value>, Error> {
    let items = match params {
        Value::List(items) | Value::Vector(items) => items,
        other => {
            return Err(Error::syntax(
                SyntaxErrorKind::InvalidForm,
                format!(
                    "fn* parameters must be a list or vector, got {}",
                    other.type_name()
                ),
            ));
        }
    };
    if let Some(bad) = items.iter().find(|p| !matches!(p, Value::Symbol(_))) {
        return Err(Error::TypeError(format!(
            "fn* parameters must be symbols, got {}",
            bad.type_name()
        )));
    }
    Ok(items.to_vec())
}

fn apply_with_depth(func: &Value, args: Vec<Value>, depth: usize) -> Result<Value, Error> {
    match func {
        Value::Function(closure) => {
            let call_env = Env::new(Some(&closure.env), &closure.params, args)?;
            eval_with_depth_tracking(closure.body.clone(), call_env, depth + 1)
        }
        Value::Builtin { func, .. } => call_native(&**func, args, depth),
        other => Err(not_callable(other)),
    }
}

/// The macro a form invokes, if its head is a symbol bound to one
fn macro_call(ast: &Value, env: &Env) -> Option<Value> {
    if let Value::List(items) = ast
        && let Some(Value::Symbol(name)) = items.first()
        && let Some(value) = env.lookup(name)
        && value.is_macro()
    {
        Some(value)
    } else {
        None
    }
}

fn expand_macros(mut ast: Value, env: &Env, depth: usize) -> Result<Value, Error> {
    while let Some(macro_fn) = macro_call(&ast, env) {
        let args = match &ast {
            Value::List(items) => items.get(1..).unwrap_or_default().to_vec(),
            _ => Vec::new(),
        };
        debug!(form = %ast, "expanding macro");
        ast = apply_with_depth(&macro_fn, args, depth + 1)?;
    }
    Ok(ast)
}

fn is_symbol(value: &Value, name: &str) -> bool {
    matches!(value, Value::Symbol(s) if s == name)
}

/// The argument of a `(splice-unquote x)` form
fn splice_unquote_arg(value: &Value) -> Result<Option<&Value>, Error> {
    match value {
        Value::List(items) | Value::Vector(items) => match items.as_slice() {
            [head, arg, ..] if is_symbol(head, "splice-unquote") => Ok(Some(arg)),
            [head] if is_symbol(head, "splice-unquote") => Err(Error::arity_error_with_expr(
                Arity::AtLeast(1),
                0,
                "splice-unquote",
            )),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Rewrite a quasiquoted template into `cons`/`concat`/`quote` calls.
///
/// ```
/// use mallet::ast::{sym, val};
/// use mallet::evaluator::quasiquote;
///
/// let expanded = quasiquote(&sym("x")).unwrap();
/// assert_eq!(expanded, val(vec![sym("quote"), sym("x")]));
/// ```
pub fn quasiquote(ast: &Value) -> Result<Value, Error> {
    ensure_sufficient_stack(|| expand_quasiquote(ast))
}

fn expand_quasiquote(ast: &Value) -> Result<Value, Error> {
    let items = match ast {
        Value::List(items) | Value::Vector(items) if !items.is_empty() => items,
        _ => return Ok(Value::list(vec![sym("quote"), ast.clone()])),
    };

    // A bare `unquote` ends the template: `(a unquote b)` is `(cons 'a b)`.
    // Forms after the unquoted one are ignored.
    let (elements, mut expanded) = match items.iter().position(|v| is_symbol(v, "unquote")) {
        Some(0) => {
            return match items.get(1) {
                Some(arg) => Ok(arg.clone()),
                None => Err(Error::arity_error_with_expr(Arity::AtLeast(1), 0, "unquote")),
            };
        }
        Some(at) => match items.get(at + 1) {
            Some(rest) => (&items[..at], rest.clone()),
            None => {
                return Err(Error::arity_error_with_expr(Arity::AtLeast(1), 0, "unquote"));
            }
        },
        None => (
            items.as_slice(),
            Value::list(vec![sym("quote"), Value::list(Vec::new())]),
        ),
    };

    for element in elements.iter().rev() {
        expanded = match splice_unquote_arg(element)? {
            Some(arg) => Value::list(vec![sym("concat"), arg.clone(), expanded]),
            None => Value::list(vec![sym("cons"), quasiquote(element)?, expanded]),
        };
    }
    Ok(expanded)
}
