//! Text to AST.
//!
//! Reading happens in two passes. [`tokenize`] splits the input into tokens with nom
//! combinators, then a recursive-descent [`Reader`] turns the tokens into a [`Value`]
//! tree. Reader macros (`'x`, `` `x ``, `~x`, `~@x`, `@x`, `^m x`) are expanded into
//! the explicit list forms the evaluator understands; nothing is evaluated here.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, not_line_ending, one_of},
    combinator::{all_consuming, opt, recognize},
    sequence::pair,
};

use crate::ast::{REST_MARKER, Value, is_valid_keyword};
use crate::stack::ensure_sufficient_stack;
use crate::{Error, MAX_PARSE_DEPTH, SyntaxError, SyntaxErrorKind};

/// Characters that always form a token on their own
const SPECIAL_CHARS: &str = "[]{}()'`~^@";

/// Characters that end a plain atom run
const ATOM_TERMINATORS: &str = "[]{}('\"`,;)";

/// Outcome of reading one line of input.
///
/// Blank input (nothing but whitespace, commas or comments) is not an error: a REPL
/// should simply prompt again.
#[derive(Debug, Clone, PartialEq)]
pub enum Read {
    Form(Value),
    Blank,
}

/// A token and its byte offset in the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub offset: usize,
}

impl Token<'_> {
    fn is_comment(&self) -> bool {
        self.text.starts_with(';')
    }
}

/// Whitespace and commas separate tokens
fn separators(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace() || c == ',').parse(input)
}

/// A double-quoted string, escapes included. An unterminated string still forms a
/// token so the parser can report it.
fn string_token(input: &str) -> IResult<&str, &str> {
    let (body, _) = char('"').parse(input)?;
    let mut chars = body.char_indices();
    let end = loop {
        match chars.next() {
            Some((i, '"')) => break i + 1,
            Some((_, '\\')) => {
                if chars.next().is_none() {
                    break body.len();
                }
            }
            Some(_) => {}
            None => break body.len(),
        }
    };
    let consumed = 1 + end;
    Ok((&input[consumed..], &input[..consumed]))
}

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && !ATOM_TERMINATORS.contains(c)
}

fn token(input: &str) -> IResult<&str, &str> {
    alt((
        tag("~@"),
        recognize(one_of(SPECIAL_CHARS)),
        string_token,
        recognize(pair(char(';'), not_line_ending)),
        take_while1(is_atom_char),
    ))
    .parse(input)
}

/// Split `input` into tokens. Comments are kept as tokens; the parser skips them.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, Error> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        rest = separators(rest).map_or(rest, |(remaining, _)| remaining);
        if rest.is_empty() {
            return Ok(tokens);
        }
        let offset = input.len() - rest.len();
        match token(rest) {
            Ok((remaining, text)) => {
                tokens.push(Token { text, offset });
                rest = remaining;
            }
            Err(_) => {
                let found: String = rest.chars().take(1).collect();
                return Err(SyntaxError::with_context_and_found(
                    SyntaxErrorKind::InvalidSyntax,
                    "Unrecognized input",
                    input,
                    offset,
                    Some(found),
                )
                .into());
            }
        }
    }
}

fn integer_literal(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1)).parse(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize((one_of("eE"), opt(one_of("+-")), digit1)).parse(input)
}

/// `1.5`, `1.`, `.5`, `1e10`, `2.5E-3`, each with an optional leading '-'
fn float_literal(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(char('-')),
        alt((
            recognize((digit1, char('.'), digit0, opt(exponent))),
            recognize((digit1, exponent)),
            recognize((char('.'), digit1, opt(exponent))),
        )),
    ))
    .parse(input)
}

fn matches_fully(parser: fn(&str) -> IResult<&str, &str>, text: &str) -> bool {
    all_consuming(parser).parse(text).is_ok()
}

/// Cursor over a token sequence
pub struct Reader<'a> {
    input: &'a str,
    tokens: Vec<Token<'a>>,
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, tokens: Vec<Token<'a>>) -> Self {
        Reader {
            input,
            tokens,
            position: 0,
        }
    }

    /// The current token, without consuming it
    pub fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.position).copied()
    }

    /// The current token, advancing past it
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        let token = self.peek()?;
        self.position += 1;
        Some(token)
    }

    fn skip_comments(&mut self) {
        while self.peek().is_some_and(|token| token.is_comment()) {
            self.position += 1;
        }
    }

    fn error_at(
        &self,
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        token: Token<'_>,
    ) -> Error {
        SyntaxError::with_context_and_found(
            kind,
            message,
            self.input,
            token.offset,
            Some(token.text.to_owned()),
        )
        .into()
    }

    fn unexpected_end(&self, expected: Option<&str>) -> Error {
        let message = match expected {
            Some(close) => format!("Unexpected end of input, expected '{close}'"),
            None => "Unexpected end of input".to_owned(),
        };
        SyntaxError::with_context_and_found(
            SyntaxErrorKind::Incomplete,
            message,
            self.input,
            self.input.len(),
            None,
        )
        .into()
    }

    /// Read one form starting at the current token
    pub fn read_form(&mut self, depth: usize) -> Result<Value, Error> {
        ensure_sufficient_stack(|| self.read_form_at(depth))
    }

    fn read_form_at(&mut self, depth: usize) -> Result<Value, Error> {
        self.skip_comments();
        let token = self.next_token().ok_or_else(|| self.unexpected_end(None))?;

        if depth >= MAX_PARSE_DEPTH {
            return Err(self.error_at(
                SyntaxErrorKind::TooDeeplyNested,
                format!("Form too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                token,
            ));
        }

        match token.text {
            "(" => Ok(Value::list(self.read_sequence(")", depth)?)),
            "[" => Ok(Value::vector(self.read_sequence("]", depth)?)),
            "{" => {
                let items = self.read_sequence("}", depth)?;
                if items.len() % 2 != 0 {
                    return Err(self.error_at(
                        SyntaxErrorKind::InvalidSyntax,
                        "Map literal requires an even number of forms",
                        token,
                    ));
                }
                Value::map_from_pairs(items)
            }
            ")" | "]" | "}" => Err(self.error_at(
                SyntaxErrorKind::InvalidSyntax,
                format!("Unexpected '{}'", token.text),
                token,
            )),
            "'" => self.read_wrapped("quote", depth),
            "`" => self.read_wrapped("quasiquote", depth),
            "~" => self.read_wrapped("unquote", depth),
            "~@" => self.read_wrapped("splice-unquote", depth),
            "@" => self.read_wrapped("deref", depth),
            "^" => {
                let meta = self.read_form(depth + 1)?;
                let form = self.read_form(depth + 1)?;
                Ok(Value::list(vec![
                    Value::Symbol("with-meta".to_owned()),
                    form,
                    meta,
                ]))
            }
            _ => self.read_atom(token),
        }
    }

    /// Read forms until `close`, consuming it
    fn read_sequence(&mut self, close: &str, depth: usize) -> Result<Vec<Value>, Error> {
        let mut items = Vec::new();
        loop {
            self.skip_comments();
            match self.peek() {
                None => return Err(self.unexpected_end(Some(close))),
                Some(token) if token.text == close => {
                    self.position += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.read_form(depth + 1)?),
            }
        }
    }

    fn read_wrapped(&mut self, head: &str, depth: usize) -> Result<Value, Error> {
        let form = self.read_form(depth + 1)?;
        Ok(Value::list(vec![Value::Symbol(head.to_owned()), form]))
    }

    /// Classify an atom token. Precedence: integer, float, reserved literal, string,
    /// keyword, symbol.
    fn read_atom(&self, token: Token<'_>) -> Result<Value, Error> {
        let text = token.text;

        if matches_fully(integer_literal, text) {
            return text.parse().map(Value::Integer).map_err(|_| {
                self.error_at(
                    SyntaxErrorKind::ImplementationLimit,
                    "Integer literal out of range",
                    token,
                )
            });
        }

        if matches_fully(float_literal, text)
            && let Ok(x) = text.parse()
        {
            return Ok(Value::Float(x));
        }

        match text {
            "nil" => return Ok(Value::Nil),
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            REST_MARKER => return Ok(Value::Symbol(REST_MARKER.to_owned())),
            _ => {}
        }

        if let Some(body) = text.strip_prefix('"') {
            return unescape(body).map(Value::String).ok_or_else(|| {
                self.error_at(
                    SyntaxErrorKind::InvalidSyntax,
                    "Expected '\"', got end of input",
                    token,
                )
            });
        }

        if is_valid_keyword(text) {
            return Ok(Value::Keyword(text.to_owned()));
        }

        Ok(Value::Symbol(text.to_owned()))
    }
}

/// Decode a string body (after the opening quote). `\\`, `\n` and `\"` are escapes;
/// any other backslash pair is kept as written. Returns `None` when the closing
/// quote is missing.
fn unescape(body: &str) -> Option<String> {
    let mut chars = body.chars();
    let mut result = String::with_capacity(body.len());

    loop {
        match chars.next()? {
            '"' => return Some(result),
            '\\' => match chars.next()? {
                'n' => result.push('\n'),
                '\\' => result.push('\\'),
                '"' => result.push('"'),
                other => {
                    result.push('\\');
                    result.push(other);
                }
            },
            c => result.push(c),
        }
    }
}

/// Read the single form in `input`.
///
/// Returns [`Read::Blank`] when the input holds no forms. Anything after the first form
/// other than comments is a syntax error.
pub fn read_str(input: &str) -> Result<Read, Error> {
    let tokens = tokenize(input)?;
    let mut reader = Reader::new(input, tokens);

    reader.skip_comments();
    if reader.peek().is_none() {
        return Ok(Read::Blank);
    }

    let form = reader.read_form(0)?;

    reader.skip_comments();
    if let Some(extra) = reader.peek() {
        return Err(reader.error_at(
            SyntaxErrorKind::TrailingContent,
            "Unexpected input after the first form",
            extra,
        ));
    }

    Ok(Read::Form(form))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{kw, nil, sym, val};
    use crate::printer::pr_str;
    use pretty_assertions::assert_eq;

    fn token_texts(input: &str) -> Vec<&str> {
        tokenize(input).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_tokenizer() {
        let cases: Vec<(&str, Vec<&str>)> = vec![
            ("(+ 1 2)", vec!["(", "+", "1", "2", ")"]),
            ("  ,, \t\n", vec![]),
            ("[a,b]", vec!["[", "a", "b", "]"]),
            ("{:a 1}", vec!["{", ":a", "1", "}"]),
            ("~@xs ~x `y 'z @w ^m", vec!["~@", "xs", "~", "x", "`", "y", "'", "z", "@", "w", "^", "m"]),
            (r#""a b" c"#, vec![r#""a b""#, "c"]),
            (r#""say \"hi\"""#, vec![r#""say \"hi\"""#]),
            (r#""open"#, vec![r#""open"#]),
            ("1 ; comment (\n2", vec!["1", "; comment (", "2"]),
            ("a~b a@b", vec!["a~b", "a@b"]),
            ("(<= -5 x)", vec!["(", "<=", "-5", "x", ")"]),
        ];

        for (input, expected) in cases {
            assert_eq!(token_texts(input), expected, "tokenizing {input:?}");
        }
    }

    #[test]
    fn test_token_offsets() {
        let tokens = tokenize("(ab  \"c\")").unwrap();
        let offsets: Vec<usize> = tokens.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![0, 1, 5, 8]);
    }

    /// Test result variants for comprehensive reading tests
    #[derive(Debug)]
    enum ReadTestResult {
        Success(Value),
        Blank,
        SpecificError(SyntaxErrorKind),
        AnyError,
    }
    use ReadTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ReadTestResult {
        Success(value.into())
    }

    fn run_read_tests(test_cases: Vec<(&str, ReadTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Read test #{} ({input:?})", i + 1);
            match (read_str(input), expected) {
                (Ok(Read::Form(actual)), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");
                }
                (Ok(Read::Blank), Blank) | (Err(_), AnyError) => {}
                (Err(crate::Error::SyntaxError(err)), SpecificError(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: error kind mismatch: {err}");
                }
                (actual, expected) => {
                    panic!("{test_id}: expected {expected:?}, got {actual:?}");
                }
            }
        }
    }

    #[test]
    fn test_reader_comprehensive() {
        let test_cases = vec![
            // ===== NUMBERS =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("0", success(0)),
            ("9223372036854775807", success(i64::MAX)),
            ("-9223372036854775808", success(i64::MIN)),
            ("99999999999999999999", SpecificError(SyntaxErrorKind::ImplementationLimit)),
            ("3.25", success(3.25)),
            ("-0.5", success(-0.5)),
            ("1.", success(1.0)),
            (".5", success(0.5)),
            ("1e3", success(1000.0)),
            ("2.5E-1", success(0.25)),
            // Not numbers: fall through to symbols
            ("-", success(sym("-"))),
            ("1+", success(sym("1+"))),
            ("inf", success(sym("inf"))),
            ("nan", success(sym("nan"))),
            ("123abc", success(sym("123abc"))),
            // ===== RESERVED LITERALS =====
            ("nil", success(nil())),
            ("true", success(true)),
            ("false", success(false)),
            ("&", success(sym("&"))),
            // ===== STRINGS =====
            (r#""hello""#, success("hello")),
            (r#""""#, success("")),
            (r#""a\nb""#, success("a\nb")),
            (r#""q\"q""#, success("q\"q")),
            (r#""back\\slash""#, success("back\\slash")),
            (r#""tab\tkept""#, success("tab\\tkept")),
            (r#""a, b""#, success("a, b")),
            (r#""unterminated"#, SpecificError(SyntaxErrorKind::InvalidSyntax)),
            (r#""ends in escape\""#, SpecificError(SyntaxErrorKind::InvalidSyntax)),
            // ===== KEYWORDS AND SYMBOLS =====
            (":kw", success(kw(":kw"))),
            (":a-b?", success(kw(":a-b?"))),
            (":", success(kw(":"))),
            (":a.b", success(sym(":a.b"))),
            ("foo", success(sym("foo"))),
            ("<=", success(sym("<="))),
            ("def!", success(sym("def!"))),
            ("a.b/c", success(sym("a.b/c"))),
            // ===== COLLECTIONS =====
            ("()", success(Value::list(vec![]))),
            ("(1 2 3)", success([1, 2, 3])),
            ("( 1 , 2 )", success([1, 2])),
            ("(+ 1 (* 2 3))", success(vec![sym("+"), val(1), val(vec![sym("*"), val(2), val(3)])])),
            ("[1 \"a\" :b]", success(Value::vector(vec![val(1), val("a"), kw(":b")]))),
            ("[]", success(Value::vector(vec![]))),
            ("(1 ; inline comment\n 2)", success([1, 2])),
            ("{}", success(Value::map_from_pairs(vec![]).unwrap())),
            ("{:a 1 \"b\" [2]}", success(Value::map_from_pairs(vec![kw(":a"), val(1), val("b"), Value::vector(vec![val(2)])]).unwrap())),
            ("{:a}", SpecificError(SyntaxErrorKind::InvalidSyntax)),
            ("{(1) 2}", AnyError),
            // ===== READER MACROS =====
            ("'a", success(vec![sym("quote"), sym("a")])),
            ("`(a ~b ~@c)", success(vec![
                sym("quasiquote"),
                val(vec![
                    sym("a"),
                    val(vec![sym("unquote"), sym("b")]),
                    val(vec![sym("splice-unquote"), sym("c")]),
                ]),
            ])),
            ("@a", success(vec![sym("deref"), sym("a")])),
            ("^{:m 1} [1]", success(vec![
                sym("with-meta"),
                Value::vector(vec![val(1)]),
                Value::map_from_pairs(vec![kw(":m"), val(1)]).unwrap(),
            ])),
            ("''a", success(vec![sym("quote"), val(vec![sym("quote"), sym("a")])])),
            // ===== BLANK INPUT =====
            ("", Blank),
            ("   \t\n", Blank),
            (",,,", Blank),
            ("; only a comment", Blank),
            // ===== ERRORS =====
            ("(1 2", SpecificError(SyntaxErrorKind::Incomplete)),
            ("((1 2)", SpecificError(SyntaxErrorKind::Incomplete)),
            ("[1 2", SpecificError(SyntaxErrorKind::Incomplete)),
            ("'", SpecificError(SyntaxErrorKind::Incomplete)),
            ("^{:m 1}", SpecificError(SyntaxErrorKind::Incomplete)),
            (")", SpecificError(SyntaxErrorKind::InvalidSyntax)),
            ("(1 2]", SpecificError(SyntaxErrorKind::InvalidSyntax)),
            ("(1 2))", SpecificError(SyntaxErrorKind::TrailingContent)),
            ("1 2", SpecificError(SyntaxErrorKind::TrailingContent)),
            ("1 ; trailing comment", success(1)),
        ];

        run_read_tests(test_cases);
    }

    #[test]
    fn test_reader_depth_limit() {
        let under = format!("{}1{}", "(".repeat(MAX_PARSE_DEPTH - 1), ")".repeat(MAX_PARSE_DEPTH - 1));
        let over = format!("{}1{}", "(".repeat(MAX_PARSE_DEPTH), ")".repeat(MAX_PARSE_DEPTH));
        let quotes = format!("{}a", "'".repeat(MAX_PARSE_DEPTH));

        assert!(matches!(read_str(&under), Ok(Read::Form(_))));
        run_read_tests(vec![
            (over.as_str(), SpecificError(SyntaxErrorKind::TooDeeplyNested)),
            (quotes.as_str(), SpecificError(SyntaxErrorKind::TooDeeplyNested)),
        ]);
    }

    #[test]
    fn test_error_context() {
        let Err(crate::Error::SyntaxError(err)) = read_str("(foo bar))") else {
            panic!("expected a syntax error");
        };
        assert_eq!(err.found.as_deref(), Some(")"));
        assert_eq!(err.context.as_deref(), Some("(foo bar))"));
        assert!(format!("{}", crate::Error::SyntaxError(err)).starts_with("SyntaxError: "));
    }

    #[test]
    fn test_literal_round_trip() {
        let literals = vec![
            val(0),
            val(-42),
            val(i64::MAX),
            val(1.5),
            val(-0.25),
            val(1.0),
            val(1e100),
            val(true),
            val(false),
            nil(),
            val(""),
            val("plain"),
            val("with \"quotes\" and \\ and\nnewline"),
            kw(":key"),
            kw(":"),
        ];

        for literal in literals {
            let printed = pr_str(&literal, true);
            let reread = read_str(&printed).unwrap();
            assert_eq!(reread, Read::Form(literal.clone()), "round trip of {printed}");
        }
    }
}
