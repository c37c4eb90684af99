//! Schema-less JSON value parser.
//!
//! The chart endpoint keys its response by signal id, so its shape can't be
//! described by a derived `Deserialize` type. This module parses any JSON text
//! into a generic [`Value`] tree instead.
//!
//! Failure policy: any malformed token sequence yields `None`. There is no
//! partial-tree recovery, callers treat `None` as "could not parse".

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

// ---

/// Generic JSON value produced by [`parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// Parse raw JSON text into a [`Value`] tree.
///
/// Text following the first complete value is ignored.
pub fn parse(text: &str) -> Option<Value> {
    // ---
    Parser::new(text).parse_value()
}

impl Value {
    /// Look up `key` when this value is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|fields| fields.get(key))
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Read a reading as `f32`, accepting either a JSON number or a numeric
    /// string such as `"3.14"`. The decimal point is always `.`.
    pub fn to_f32_lenient(&self) -> Option<f32> {
        // ---
        let parsed = match self {
            Value::Integer(n) => Some(*n as f32),
            Value::Float(n) => Some(*n as f32),
            Value::String(s) => s.trim().parse::<f32>().ok(),
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }
}

// ---

/// Deepest object/array nesting accepted; anything deeper fails the parse.
const MAX_DEPTH: usize = 128;

/// Characters that terminate a bareword or number token.
const WORD_BREAK: &str = "{}[],:\"";

fn is_word_break(c: char) -> bool {
    c.is_whitespace() || WORD_BREAK.contains(c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    None,
    CurlyOpen,
    CurlyClose,
    SquareOpen,
    SquareClose,
    Colon,
    Comma,
    String,
    Number,
    True,
    False,
    Null,
}

/// Recursive-descent parser over a character cursor with one token of
/// lookahead. Closing delimiters and commas are consumed by the lookahead,
/// opening delimiters, quotes and colons are left for the sub-parser.
struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            depth: 0,
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        let token = self.next_token();
        self.parse_by_token(token)
    }

    fn parse_by_token(&mut self, token: Token) -> Option<Value> {
        // ---
        match token {
            Token::String => self.parse_string().map(Value::String),
            Token::Number => self.parse_number(),
            Token::CurlyOpen => self.nested(Self::parse_object),
            Token::SquareOpen => self.nested(Self::parse_array),
            Token::True => Some(Value::Bool(true)),
            Token::False => Some(Value::Bool(false)),
            Token::Null => Some(Value::Null),
            _ => None,
        }
    }

    /// Run a container sub-parser one nesting level deeper.
    fn nested(&mut self, parse: fn(&mut Self) -> Option<Value>) -> Option<Value> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn parse_object(&mut self) -> Option<Value> {
        // ---
        let mut table = BTreeMap::new();
        self.chars.next(); // {

        loop {
            match self.next_token() {
                Token::Comma => continue,
                Token::CurlyClose => return Some(Value::Object(table)),
                Token::String => {
                    let name = self.parse_string()?;
                    if self.next_token() != Token::Colon {
                        return None;
                    }
                    self.chars.next(); // :

                    let value = self.parse_value()?;
                    table.insert(name, value);
                }
                _ => return None,
            }
        }
    }

    fn parse_array(&mut self) -> Option<Value> {
        // ---
        let mut array = Vec::new();
        self.chars.next(); // [

        loop {
            match self.next_token() {
                Token::None => return None,
                Token::Comma => continue,
                Token::SquareClose => return Some(Value::Array(array)),
                token => array.push(self.parse_by_token(token)?),
            }
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        // ---
        let mut s = String::new();
        self.chars.next(); // "

        loop {
            match self.chars.next()? {
                '"' => return Some(s),
                '\\' => match self.chars.next()? {
                    c @ ('"' | '\\' | '/') => s.push(c),
                    'b' => s.push('\u{0008}'),
                    'f' => s.push('\u{000C}'),
                    'n' => s.push('\n'),
                    'r' => s.push('\r'),
                    't' => s.push('\t'),
                    'u' => s.push(self.parse_unicode_escape()?),
                    _ => return None,
                },
                c => s.push(c),
            }
        }
    }

    /// Decode the `XXXX` of a `\uXXXX` escape. A high surrogate immediately
    /// followed by an escaped low surrogate is combined into one scalar; any
    /// other surrogate becomes U+FFFD.
    fn parse_unicode_escape(&mut self) -> Option<char> {
        // ---
        let unit = read_hex4(&mut self.chars)?;

        if (0xD800..0xDC00).contains(&unit) {
            let mut lookahead = self.chars.clone();
            if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
                if let Some(low) = read_hex4(&mut lookahead) {
                    if (0xDC00..0xE000).contains(&low) {
                        self.chars = lookahead;
                        let scalar = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                        return char::from_u32(scalar);
                    }
                }
            }
        }

        Some(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn parse_number(&mut self) -> Option<Value> {
        // ---
        let number = self.next_word();

        if number.contains('.') {
            number.parse::<f64>().ok().map(Value::Float)
        } else {
            number.parse::<i64>().ok().map(Value::Integer)
        }
    }

    fn eat_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn next_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.chars.next_if(|c| !is_word_break(*c)) {
            word.push(c);
        }
        word
    }

    fn next_token(&mut self) -> Token {
        // ---
        self.eat_whitespace();

        let Some(&c) = self.chars.peek() else {
            return Token::None;
        };

        match c {
            '{' => Token::CurlyOpen,
            '}' => {
                self.chars.next();
                Token::CurlyClose
            }
            '[' => Token::SquareOpen,
            ']' => {
                self.chars.next();
                Token::SquareClose
            }
            ',' => {
                self.chars.next();
                Token::Comma
            }
            '"' => Token::String,
            ':' => Token::Colon,
            '0'..='9' | '-' => Token::Number,
            _ => match self.next_word().as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                _ => Token::None,
            },
        }
    }
}

fn read_hex4(chars: &mut Peekable<Chars<'_>>) -> Option<u32> {
    let mut unit = 0;
    for _ in 0..4 {
        unit = (unit << 4) | chars.next()?.to_digit(16)?;
    }
    Some(unit)
}

// ---

/// Compact JSON rendering. Floats always carry a decimal point so that a
/// re-parse yields `Float` again; non-finite floats render as `null`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write_float(f, *n),
            Value::String(s) => write_string(f, s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_string(f, key)?;
                    write!(f, ":{value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    // ---
    if !n.is_finite() {
        return f.write_str("null");
    }

    let text = format!("{n:?}");
    if text.contains('.') {
        f.write_str(&text)
    } else if let Some(exp) = text.find('e') {
        write!(f, "{}.0{}", &text[..exp], &text[exp..])
    } else {
        write!(f, "{text}.0")
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    // ---
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\u{0008}' => f.write_str("\\b")?,
            '\u{000C}' => f.write_str("\\f")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}
