//! Value to text.
//!
//! Readable output (`readable = true`) re-escapes strings so the reader can read it back;
//! the plain form prints string contents verbatim and is what `str` and `println` use.

use std::fmt;

use crate::ast::{MapKey, Value, with_open_atom};

/// Render a value as text
pub fn pr_str(value: &Value, readable: bool) -> String {
    Printed { value, readable }.to_string()
}

/// Render several values joined by `separator`
pub fn pr_seq(values: &[Value], readable: bool, separator: &str) -> String {
    values
        .iter()
        .map(|value| pr_str(value, readable))
        .collect::<Vec<_>>()
        .join(separator)
}

struct Printed<'a> {
    value: &'a Value,
    readable: bool,
}

/// Pending output while printing a value
enum Piece<'a> {
    Value(&'a Value),
    Key(&'a MapKey),
    Text(&'static str),
}

/// Queue a sequence's delimiters and elements, first element on top
fn push_seq<'a>(
    pending: &mut Vec<Piece<'a>>,
    open: &'static str,
    items: &'a [Value],
    close: &'static str,
) {
    pending.push(Piece::Text(close));
    for (i, item) in items.iter().enumerate().rev() {
        pending.push(Piece::Value(item));
        if i > 0 {
            pending.push(Piece::Text(" "));
        }
    }
    pending.push(Piece::Text(open));
}

impl Printed<'_> {
    fn nested<'v>(&self, value: &'v Value) -> Printed<'v> {
        Printed {
            value,
            readable: self.readable,
        }
    }
}

impl fmt::Display for Printed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Containers are expanded onto a work-list, so nesting depth costs heap, not stack
        let mut pending = vec![Piece::Value(self.value)];
        while let Some(piece) = pending.pop() {
            let value = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Key(key) => {
                    write!(f, "{}", self.nested(&Value::from(key)))?;
                    continue;
                }
                Piece::Value(value) => value,
            };
            match value {
                Value::Nil => write!(f, "nil")?,
                Value::Bool(b) => write!(f, "{b}")?,
                Value::Integer(n) => write!(f, "{n}")?,
                // Debug keeps the fractional part, so 1.0 reads back as a float
                Value::Float(x) => write!(f, "{x:?}")?,
                Value::String(s) if self.readable => write_escaped(f, s)?,
                Value::String(s) => write!(f, "{s}")?,
                Value::Symbol(s) | Value::Keyword(s) => write!(f, "{s}")?,
                Value::List(items) => push_seq(&mut pending, "(", items, ")"),
                Value::Vector(items) => push_seq(&mut pending, "[", items, "]"),
                Value::Map(entries) => {
                    pending.push(Piece::Text("}"));
                    for (i, (key, value)) in entries.iter().enumerate().rev() {
                        pending.push(Piece::Value(value));
                        pending.push(Piece::Text(" "));
                        pending.push(Piece::Key(key));
                        if i > 0 {
                            pending.push(Piece::Text(" "));
                        }
                    }
                    pending.push(Piece::Text("{"));
                }
                Value::Atom(cell) => {
                    with_open_atom(cell, |inner| write!(f, "(atom {})", self.nested(inner)))
                        .unwrap_or_else(|| write!(f, "(atom #<cycle>)"))?;
                }
                Value::Function(closure) if closure.is_macro => write!(f, "#<macro>")?,
                Value::Function(_) => write!(f, "#<function>")?,
                Value::Builtin { id, .. } => write!(f, "#<builtin:{id}>")?,
            }
        }
        Ok(())
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '"' => write!(f, "\\\"")?,
            '\n' => write!(f, "\\n")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

/// Values display in their readable form
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printed = Printed {
            value: self,
            readable: true,
        };
        write!(f, "{printed}")
    }
}
