//! Built-in operations registry.
//!
//! Every native function available to Lisp code is declared once in `BUILTIN_OPS`
//! with its name and arity. [`crate::env::Env::global`] installs the whole registry;
//! arity is validated before the implementation runs, so implementations can match
//! on the argument vector by shape.
//!
//! ```lisp
//! (+ 1 2 3)              ; arithmetic
//! (cons 0 [1 2])         ; sequences, always returning lists
//! (swap! counter + 1)    ; atoms, calling back into Lisp
//! ```
//!
//! ## Numbers
//!
//! Integer arithmetic stays integral and reports overflow; any float operand promotes
//! the whole operation to floating point. Division by zero is an error for both.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** following the signature `fn(Vec<Value>) -> Result<Value, Error>`
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{FloatType, IntType, Value};
use crate::evaluator::{Arity, apply};
use crate::printer::pr_seq;
use crate::reader::{Read, read_str};

/// Signature of every registered builtin
pub type BuiltinFn = fn(Vec<Value>) -> Result<Value, Error>;

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier this operation is bound to in the global environment
    pub id: &'static str,
    pub func: BuiltinFn,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Compare operations by their id, which uniquely identifies them
        self.id == other.id
    }
}

impl BuiltinOp {
    /// Check if the given number of arguments is valid for this operation
    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        if self.arity.accepts(arg_count) {
            Ok(())
        } else {
            Err(Error::arity_error_with_expr(self.arity, arg_count, self.id))
        }
    }

    /// Validate arity, then run the implementation
    pub fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        self.validate_arity(args.len())?;
        (self.func)(args)
    }

    /// The callable value bound in the global environment
    pub fn to_value(&'static self) -> Value {
        Value::builtin(self.id, move |args| self.call(args))
    }
}

//
// Numbers
//

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(IntType),
    Float(FloatType),
}

impl Number {
    fn from_value(op: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Integer(n) => Ok(Number::Int(*n)),
            Value::Float(x) => Ok(Number::Float(*x)),
            other => Err(Error::TypeError(format!(
                "{op} requires numbers, got {}",
                other.type_name()
            ))),
        }
    }

    #[allow(clippy::cast_precision_loss)] // integer operands promote like in float arithmetic
    fn as_float(self) -> FloatType {
        match self {
            Number::Int(n) => n as FloatType,
            Number::Float(x) => x,
        }
    }

    #[allow(clippy::float_cmp)] // both signed zeros count
    fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::Float(x) => x == 0.0,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Int(n) => Value::Integer(n),
            Number::Float(x) => Value::Float(x),
        }
    }
}

/// Left fold over numeric arguments with integer overflow detection
fn fold_numbers(
    op: &str,
    args: &[Value],
    int_op: fn(IntType, IntType) -> Option<IntType>,
    float_op: fn(FloatType, FloatType) -> FloatType,
) -> Result<Value, Error> {
    let Some((first, rest)) = args.split_first() else {
        return Err(Error::arity_error_with_expr(Arity::AtLeast(1), 0, op));
    };
    let mut acc = Number::from_value(op, first)?;
    for arg in rest {
        let rhs = Number::from_value(op, arg)?;
        acc = match (acc, rhs) {
            (Number::Int(a), Number::Int(b)) => Number::Int(
                int_op(a, b).ok_or_else(|| Error::EvalError(format!("Integer overflow in {op}")))?,
            ),
            (a, b) => Number::Float(float_op(a.as_float(), b.as_float())),
        };
    }
    Ok(acc.into_value())
}

fn check_divisors(op: &str, args: &[Value]) -> Result<(), Error> {
    for arg in args.iter().skip(1) {
        if Number::from_value(op, arg)?.is_zero() {
            return Err(Error::EvalError(format!("Division by zero in {op}")));
        }
    }
    Ok(())
}

fn builtin_add(args: Vec<Value>) -> Result<Value, Error> {
    if args.is_empty() {
        return Ok(Value::Integer(0));
    }
    fold_numbers("+", &args, IntType::checked_add, |a, b| a + b)
}

fn builtin_sub(args: Vec<Value>) -> Result<Value, Error> {
    match args.as_slice() {
        [only] => match Number::from_value("-", only)? {
            Number::Int(n) => n
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in -".to_owned())),
            Number::Float(x) => Ok(Value::Float(-x)),
        },
        _ => fold_numbers("-", &args, IntType::checked_sub, |a, b| a - b),
    }
}

fn builtin_mul(args: Vec<Value>) -> Result<Value, Error> {
    if args.is_empty() {
        return Ok(Value::Integer(1));
    }
    fold_numbers("*", &args, IntType::checked_mul, |a, b| a * b)
}

fn builtin_div(args: Vec<Value>) -> Result<Value, Error> {
    // (/ x) is the reciprocal
    let args = if args.len() == 1 {
        let mut reciprocal = vec![Value::Integer(1)];
        reciprocal.extend(args);
        reciprocal
    } else {
        args
    };
    check_divisors("/", &args)?;
    fold_numbers("/", &args, IntType::checked_div, |a, b| a / b)
}

fn builtin_rem(args: Vec<Value>) -> Result<Value, Error> {
    check_divisors("%", &args)?;
    fold_numbers("%", &args, IntType::checked_rem, |a, b| a % b)
}

fn builtin_sqrt(args: Vec<Value>) -> Result<Value, Error> {
    let [x] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(1), args.len(), "sqrt"));
    };
    let x = Number::from_value("sqrt", x)?.as_float();
    if x < 0.0 {
        return Err(Error::EvalError(format!("sqrt of negative number: {x:?}")));
    }
    Ok(Value::Float(x.sqrt()))
}

#[allow(clippy::cast_possible_truncation)] // range checked before the cast
fn builtin_floor(args: Vec<Value>) -> Result<Value, Error> {
    let [x] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(1), args.len(), "floor"));
    };
    match Number::from_value("floor", x)? {
        Number::Int(n) => Ok(Value::Integer(n)),
        Number::Float(x) => {
            let floored = x.floor();
            // 2^63 and -2^63 are exact in both types
            #[allow(clippy::cast_precision_loss)]
            let in_range =
                floored >= IntType::MIN as FloatType && floored < IntType::MAX as FloatType;
            if in_range {
                Ok(Value::Integer(floored as IntType))
            } else {
                Err(Error::EvalError(format!("floor: {x:?} does not fit in an integer")))
            }
        }
    }
}

//
// Comparison
//

/// Structural equality: lists equal vectors with equal elements, and numbers compare by
/// value across integer and float.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    let mut pending = vec![(a, b)];
    while let Some((a, b)) = pending.pop() {
        let same = match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => x == y,
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                numbers_cmp(a, b) == Some(std::cmp::Ordering::Equal)
            }
            (Value::List(x) | Value::Vector(x), Value::List(y) | Value::Vector(y)) => {
                let same_len = x.len() == y.len();
                if same_len {
                    pending.extend(x.iter().zip(y.iter()));
                }
                same_len
            }
            (Value::Map(x), Value::Map(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(key, value)| match y.get(key) {
                        Some(other) => {
                            pending.push((value, other));
                            true
                        }
                        None => false,
                    })
            }
            _ => a == b,
        };
        if !same {
            return false;
        }
    }
    true
}

fn numbers_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        _ => {
            let x = Number::from_value("compare", a).ok()?.as_float();
            let y = Number::from_value("compare", b).ok()?.as_float();
            x.partial_cmp(&y)
        }
    }
}

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op_str:expr, $test:expr) => {
        fn $name(args: Vec<Value>) -> Result<Value, Error> {
            for pair in args.windows(2) {
                if let [a, b] = pair {
                    Number::from_value($op_str, a)?;
                    Number::from_value($op_str, b)?;
                    let holds = numbers_cmp(a, b).is_some_and($test);
                    if !holds {
                        return Ok(Value::Bool(false));
                    }
                }
            }
            Ok(Value::Bool(true))
        }
    };
}

numeric_comparison!(builtin_lt, "<", std::cmp::Ordering::is_lt);
numeric_comparison!(builtin_le, "<=", std::cmp::Ordering::is_le);
numeric_comparison!(builtin_gt, ">", std::cmp::Ordering::is_gt);
numeric_comparison!(builtin_ge, ">=", std::cmp::Ordering::is_ge);

fn builtin_equal(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(
        args.windows(2).all(|pair| match pair {
            [a, b] => values_equal(a, b),
            _ => true,
        }),
    ))
}

//
// Logic
//

fn builtin_not(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(!args.first().is_some_and(Value::is_truthy)))
}

/// First falsy argument, else the last one; `true` with no arguments
fn builtin_and(args: Vec<Value>) -> Result<Value, Error> {
    let mut result = Value::Bool(true);
    for arg in args {
        if !arg.is_truthy() {
            return Ok(arg);
        }
        result = arg;
    }
    Ok(result)
}

/// First truthy argument, else the last one; `nil` with no arguments
fn builtin_or(args: Vec<Value>) -> Result<Value, Error> {
    let mut result = Value::Nil;
    for arg in args {
        if arg.is_truthy() {
            return Ok(arg);
        }
        result = arg;
    }
    Ok(result)
}

//
// Sequences
//

fn expect_seq<'a>(op: &str, value: &'a Value) -> Result<&'a [Value], Error> {
    value.as_seq().ok_or_else(|| {
        Error::TypeError(format!(
            "{op} requires a list or vector, got {}",
            value.type_name()
        ))
    })
}

fn expect_index(op: &str, value: &Value) -> Result<usize, Error> {
    match value {
        Value::Integer(n) => usize::try_from(*n)
            .map_err(|_| Error::EvalError(format!("{op}: index must not be negative, got {n}"))),
        other => Err(Error::TypeError(format!(
            "{op} requires an integer index, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_list(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::list(args))
}

fn builtin_vector(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::vector(args))
}

fn builtin_is_list(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args.first(), Some(Value::List(_)))))
}

fn builtin_is_vector(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args.first(), Some(Value::Vector(_)))))
}

fn builtin_is_empty(args: Vec<Value>) -> Result<Value, Error> {
    let count = args.first().map_or(Ok(0), Value::count)?;
    Ok(Value::Bool(count == 0))
}

fn builtin_count(args: Vec<Value>) -> Result<Value, Error> {
    let count = args.first().map_or(Ok(0), Value::count)?;
    IntType::try_from(count)
        .map(Value::Integer)
        .map_err(|_| Error::EvalError(format!("count {count} does not fit in an integer")))
}

fn builtin_cons(args: Vec<Value>) -> Result<Value, Error> {
    let [head, tail] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(2), args.len(), "cons"));
    };
    let tail = expect_seq("cons", tail)?;
    let mut items = Vec::with_capacity(tail.len() + 1);
    items.push(head.clone());
    items.extend_from_slice(tail);
    Ok(Value::list(items))
}

fn builtin_concat(args: Vec<Value>) -> Result<Value, Error> {
    let mut items = Vec::new();
    for arg in &args {
        items.extend_from_slice(expect_seq("concat", arg)?);
    }
    Ok(Value::list(items))
}

fn builtin_nth(args: Vec<Value>) -> Result<Value, Error> {
    let [coll, index] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(2), args.len(), "nth"));
    };
    let items = expect_seq("nth", coll)?;
    let index = expect_index("nth", index)?;
    items.get(index).cloned().ok_or_else(|| {
        Error::EvalError(format!(
            "nth: index {index} out of range for sequence of length {}",
            items.len()
        ))
    })
}

fn builtin_first(args: Vec<Value>) -> Result<Value, Error> {
    let items = args.first().map_or(Ok(&[][..]), |coll| expect_seq("first", coll))?;
    Ok(items.first().cloned().unwrap_or(Value::Nil))
}

fn builtin_rest(args: Vec<Value>) -> Result<Value, Error> {
    let items = args.first().map_or(Ok(&[][..]), |coll| expect_seq("rest", coll))?;
    Ok(Value::list(items.get(1..).unwrap_or_default().to_vec()))
}

/// `(take coll n)`: the first `n` elements, or all of them if there are fewer
fn builtin_take(args: Vec<Value>) -> Result<Value, Error> {
    let [coll, n] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(2), args.len(), "take"));
    };
    let items = expect_seq("take", coll)?;
    let n = expect_index("take", n)?;
    Ok(Value::list(items.iter().take(n).cloned().collect()))
}

//
// Strings and printing
//

fn builtin_pr_str(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::String(pr_seq(&args, true, " ")))
}

fn builtin_str(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::String(pr_seq(&args, false, "")))
}

fn builtin_prn(args: Vec<Value>) -> Result<Value, Error> {
    println!("{}", pr_seq(&args, true, " "));
    Ok(Value::Nil)
}

fn builtin_println(args: Vec<Value>) -> Result<Value, Error> {
    println!("{}", pr_seq(&args, false, " "));
    Ok(Value::Nil)
}

//
// Reader and files
//

fn expect_string<'a>(op: &str, value: &'a Value) -> Result<&'a str, Error> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::TypeError(format!(
            "{op} requires a string, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_read_string(args: Vec<Value>) -> Result<Value, Error> {
    let source = args.first().map_or(Ok(""), |s| expect_string("read-string", s))?;
    match read_str(source)? {
        Read::Form(form) => Ok(form),
        Read::Blank => Ok(Value::Nil),
    }
}

fn builtin_slurp(args: Vec<Value>) -> Result<Value, Error> {
    let path = args.first().map_or(Ok(""), |s| expect_string("slurp", s))?;
    std::fs::read_to_string(path)
        .map(Value::String)
        .map_err(|e| Error::EvalError(format!("slurp: cannot read '{path}': {e}")))
}

//
// Atoms
//

fn expect_atom<'a>(op: &str, value: &'a Value) -> Result<&'a std::cell::RefCell<Value>, Error> {
    match value {
        Value::Atom(cell) => Ok(cell.as_ref()),
        other => Err(Error::TypeError(format!(
            "{op} requires an atom, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_atom(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::atom(args.into_iter().next().unwrap_or(Value::Nil)))
}

fn builtin_is_atom(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args.first(), Some(Value::Atom(_)))))
}

fn builtin_deref(args: Vec<Value>) -> Result<Value, Error> {
    let [atom] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(1), args.len(), "deref"));
    };
    Ok(expect_atom("deref", atom)?.borrow().clone())
}

fn builtin_reset(args: Vec<Value>) -> Result<Value, Error> {
    let [atom, value] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::Exact(2), args.len(), "reset!"));
    };
    expect_atom("reset!", atom)?.replace(value.clone());
    Ok(value.clone())
}

/// `(swap! atom f & args)` stores `(f @atom args...)` and returns it
fn builtin_swap(args: Vec<Value>) -> Result<Value, Error> {
    let [atom, func, extra @ ..] = args.as_slice() else {
        return Err(Error::arity_error_with_expr(Arity::AtLeast(2), args.len(), "swap!"));
    };
    let cell = expect_atom("swap!", atom)?;
    // The borrow ends before `func` runs, so it may deref the atom itself
    let current = cell.borrow().clone();
    let mut call_args = Vec::with_capacity(extra.len() + 1);
    call_args.push(current);
    call_args.extend_from_slice(extra);
    let updated = apply(func, call_args)?;
    cell.replace(updated.clone());
    Ok(updated)
}

//
// Errors
//

fn builtin_throw(args: Vec<Value>) -> Result<Value, Error> {
    let message = match args.as_slice() {
        [Value::String(s)] => s.clone(),
        _ => pr_seq(&args, true, " "),
    };
    Err(Error::EvalError(message))
}

macro_rules! builtin {
    ($id:literal, $func:expr, $arity:expr) => {
        BuiltinOp {
            id: $id,
            func: $func,
            arity: $arity,
        }
    };
}

/// Global registry of all built-in operations.
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic operations
    builtin!("+", builtin_add, Arity::Any),
    builtin!("-", builtin_sub, Arity::AtLeast(1)),
    builtin!("*", builtin_mul, Arity::Any),
    builtin!("/", builtin_div, Arity::AtLeast(1)),
    builtin!("%", builtin_rem, Arity::AtLeast(2)),
    builtin!("sqrt", builtin_sqrt, Arity::Exact(1)),
    builtin!("floor", builtin_floor, Arity::Exact(1)),
    // Comparison operations
    builtin!("=", builtin_equal, Arity::AtLeast(2)),
    builtin!("<", builtin_lt, Arity::AtLeast(2)),
    builtin!("<=", builtin_le, Arity::AtLeast(2)),
    builtin!(">", builtin_gt, Arity::AtLeast(2)),
    builtin!(">=", builtin_ge, Arity::AtLeast(2)),
    // Logical operations
    builtin!("not", builtin_not, Arity::Exact(1)),
    builtin!("and", builtin_and, Arity::Any),
    builtin!("or", builtin_or, Arity::Any),
    // Sequence operations
    builtin!("list", builtin_list, Arity::Any),
    builtin!("vector", builtin_vector, Arity::Any),
    builtin!("list?", builtin_is_list, Arity::Exact(1)),
    builtin!("vector?", builtin_is_vector, Arity::Exact(1)),
    builtin!("empty?", builtin_is_empty, Arity::Exact(1)),
    builtin!("count", builtin_count, Arity::Exact(1)),
    builtin!("cons", builtin_cons, Arity::Exact(2)),
    builtin!("concat", builtin_concat, Arity::Any),
    builtin!("nth", builtin_nth, Arity::Exact(2)),
    builtin!("first", builtin_first, Arity::Exact(1)),
    builtin!("rest", builtin_rest, Arity::Exact(1)),
    builtin!("take", builtin_take, Arity::Exact(2)),
    // Strings and printing
    builtin!("pr-str", builtin_pr_str, Arity::Any),
    builtin!("str", builtin_str, Arity::Any),
    builtin!("prn", builtin_prn, Arity::Any),
    builtin!("println", builtin_println, Arity::Any),
    // Reader and files
    builtin!("read-string", builtin_read_string, Arity::Exact(1)),
    builtin!("slurp", builtin_slurp, Arity::Exact(1)),
    // Atoms
    builtin!("atom", builtin_atom, Arity::Exact(1)),
    builtin!("atom?", builtin_is_atom, Arity::Exact(1)),
    builtin!("deref", builtin_deref, Arity::Exact(1)),
    builtin!("reset!", builtin_reset, Arity::Exact(2)),
    builtin!("swap!", builtin_swap, Arity::AtLeast(2)),
    // Errors
    builtin!("throw", builtin_throw, Arity::AtLeast(1)),
];

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin operation by its identifier
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}
