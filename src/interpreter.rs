//! Host-level read-eval-print.
//!
//! An [`Interpreter`] owns a global environment prepared for running programs: the
//! builtin registry, `eval` and `*ARGV*`, and a few definitions written in Lisp itself.

use tracing::{debug, info};

use crate::Error;
use crate::ast::Value;
use crate::env::Env;
use crate::evaluator::{Arity, eval};
use crate::printer::pr_str;
use crate::reader::{Read, read_str};

/// Definitions evaluated in every fresh interpreter
const BOOTSTRAP: &[&str] = &[
    r#"(def! load-file (fn* (f) (eval (read-string (str "(do " (slurp f) "\nnil)")))))"#,
    r#"(defmacro! cond (fn* (& xs) (if (> (count xs) 0) (list 'if (first xs) (if (> (count xs) 1) (nth xs 1) (throw "odd number of forms to cond")) (cons 'cond (rest (rest xs)))))))"#,
];

pub struct Interpreter {
    env: Env,
}

impl Interpreter {
    /// Create an interpreter whose `*ARGV*` holds `argv`
    pub fn new(argv: Vec<String>) -> Result<Self, Error> {
        let env = Env::global();

        // A weak handle keeps the global scope from owning itself through `eval`
        let global = env.downgrade();
        env.register_builtin("eval", move |args| match args.as_slice() {
            [ast] => match global.upgrade() {
                Some(env) => eval(ast, &env),
                None => Err(Error::EvalError(
                    "eval called after its environment was dropped".to_owned(),
                )),
            },
            _ => Err(Error::arity_error_with_expr(Arity::Exact(1), args.len(), "eval")),
        });

        let argv = argv.into_iter().map(Value::String).collect();
        env.define("*ARGV*", Value::list(argv));

        let mut interpreter = Interpreter { env };
        for source in BOOTSTRAP {
            interpreter.rep(source)?;
        }
        debug!(bindings = interpreter.env.bindings().len(), "interpreter ready");
        Ok(interpreter)
    }

    /// Global environment, for registering host functions or listing bindings
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Read and evaluate one form
    pub fn read_eval(&mut self, input: &str) -> Result<Option<Value>, Error> {
        match read_str(input)? {
            Read::Form(ast) => eval(&ast, &self.env).map(Some),
            Read::Blank => Ok(None),
        }
    }

    /// Read, evaluate and print one form. Blank input yields `None`.
    pub fn rep(&mut self, input: &str) -> Result<Option<String>, Error> {
        let value = self.read_eval(input)?;
        Ok(value.map(|value| pr_str(&value, true)))
    }

    /// Evaluate every form in a file through `load-file`
    pub fn load_file(&mut self, path: &str) -> Result<Value, Error> {
        info!(path, "loading file");
        let form = Value::list(vec![
            Value::Symbol("load-file".to_owned()),
            Value::String(path.to_owned()),
        ]);
        eval(&form, &self.env)
    }
}
