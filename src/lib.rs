//! Mallet - a small tree-walking Lisp interpreter
//!
//! This crate implements the core of a Clojure-flavoured Lisp in the "make a lisp"
//! family: a reader that turns text into values, a lexically scoped environment
//! chain, and an evaluator with macros, quasiquote and tail-call elimination.
//!
//! ```lisp
//! (def! fib (fn* (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))
//! (let* [xs (list 1 2 3)] `(0 ~@xs 4))   ; => (0 1 2 3 4)
//! (defmacro! unless (fn* (c t f) `(if ~c ~f ~t)))
//! ```
//!
//! Code and data share one representation: every AST node is a [`ast::Value`].
//!
//! ## Embedding
//!
//! ```
//! use mallet::interpreter::Interpreter;
//!
//! let mut interp = Interpreter::new(Vec::new()).unwrap();
//! let printed = interp.rep("(+ 1 2)").unwrap();
//! assert_eq!(printed.as_deref(), Some("3"));
//! ```
//!
//! ## Modules
//!
//! - `ast`: the value model shared by code and data
//! - `env`: lexical environments
//! - `reader`: tokenizer and parser
//! - `evaluator`: special forms, macro and quasiquote expansion, application
//! - `printer`: value to text, readable or not
//! - `builtinops`: native functions installed in the global environment
//! - `interpreter`: host-level read-eval-print and Lisp bootstrap definitions

use std::fmt;

use crate::evaluator::Arity;

/// Maximum reader nesting depth. Deeper input is rejected instead of
/// overflowing the host stack during recursive descent.
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum depth of non-tail evaluation (nested argument evaluation, native
/// calls back into the evaluator, macro expansion). Tail calls do not count.
/// The host stack grows on demand, so this limit is what bounds recursion.
pub const MAX_EVAL_DEPTH: usize = 1000;

/// Categorizes the different kinds of syntax errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SyntaxErrorKind {
    /// Invalid or unexpected tokens (stray close bracket, unterminated string)
    InvalidSyntax,
    /// Input ended before the form was complete
    Incomplete,
    /// Extra forms found after a complete, valid form
    TrailingContent,
    /// Form nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Implementation-imposed limit exceeded (integer literal overflow)
    ImplementationLimit,
    /// A special form with a malformed shape, e.g. an odd `let*` binding list
    InvalidForm,
    /// The head of an application evaluated to something that cannot be called
    NotCallable,
}

/// A structured error describing malformed input or a malformed form.
#[derive(Debug, PartialEq, Clone)]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token, if identifiable
    pub found: Option<String>,
}

impl SyntaxError {
    pub fn new(
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        SyntaxError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a SyntaxError with a kind and message but no context
    pub fn from_message(kind: SyntaxErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a SyntaxError with context extracted from `input` around a byte offset
    pub fn with_context_and_found(
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let char_offset = input
            .char_indices()
            .take_while(|(byte, _)| *byte < error_offset)
            .count();
        let context_start = char_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("SyntaxError: {0}")]
    SyntaxError(SyntaxError),
    #[error("LookupError: '{0}' not found")]
    LookupError(String),
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("{}", arity_message(expected, *got, expression.as_deref()))]
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

fn arity_message(expected: &Arity, got: usize, expression: Option<&str>) -> String {
    match expression {
        Some(expr) => format!("ArityError: {expr}: expected {expected} arguments, got {got}"),
        None => format!("ArityError: function expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError naming the form or function that was misapplied
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: impl Into<String>) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression.into()),
        }
    }

    /// Create a SyntaxError without input context
    pub fn syntax(kind: SyntaxErrorKind, message: impl Into<String>) -> Self {
        Error::SyntaxError(SyntaxError::from_message(kind, message))
    }
}

impl From<SyntaxError> for Error {
    fn from(e: SyntaxError) -> Self {
        Error::SyntaxError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod env;
pub mod evaluator;
pub mod interpreter;
pub mod printer;
pub mod reader;
mod stack;
