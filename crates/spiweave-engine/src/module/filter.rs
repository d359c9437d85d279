//! Filter expressions
//!
//! The boolean predicate language used in `filter:=` directives:
//!
//! ```text
//! (&(osgi.extender=osgi.serviceloader.processor)(version>=1.0))
//! (|(vendor=acme)(!(vendor~=test*)))
//! ```
//!
//! Keys are case-insensitive. `*` in an equality value is a wildcard unless
//! escaped with `\`; a value of only `*` tests presence. Ordering operators
//! compare dotted versions numerically when both sides parse as versions,
//! then integers, then falls back to string order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Filter syntax errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    /// Unexpected character
    #[error("Unexpected '{found}' at position {position}")]
    Unexpected {
        /// Offending character
        found: char,
        /// Character position
        position: usize,
    },

    /// Input ended inside an expression
    #[error("Unexpected end of filter")]
    UnexpectedEnd,

    /// Comparison with no attribute name
    #[error("Missing attribute name at position {0}")]
    MissingAttribute(usize),

    /// `&` or `|` with no operands
    #[error("Empty filter list at position {0}")]
    EmptyList(usize),

    /// Characters after the closing parenthesis
    #[error("Trailing input at position {0}")]
    TrailingInput(usize),
}

/// A parsed filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All must match
    And(Vec<Filter>),
    /// Any must match
    Or(Vec<Filter>),
    /// Negation
    Not(Box<Filter>),
    /// `key=value`
    Equal(String, String),
    /// `key~=value`: case and whitespace insensitive
    Approx(String, String),
    /// `key>=value`
    GreaterEq(String, String),
    /// `key<=value`
    LessEq(String, String),
    /// `key=*`
    Present(String),
    /// `key=a*b*c`
    Substring {
        /// Attribute name
        key: String,
        /// Required prefix
        initial: Option<String>,
        /// Pieces that must appear in order
        any: Vec<String>,
        /// Required suffix
        last: Option<String>,
    },
}

impl Filter {
    /// Parse filter text
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            chars: text.chars().collect(),
            pos: 0,
        };
        parser.skip_ws();
        let filter = parser.filter()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(FilterError::TrailingInput(parser.pos));
        }
        Ok(filter)
    }

    /// Evaluate against string properties
    pub fn matches(&self, properties: &BTreeMap<String, String>) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(properties)),
            Self::Not(filter) => !filter.matches(properties),
            Self::Present(key) => lookup(properties, key).is_some(),
            Self::Equal(key, expected) => {
                lookup(properties, key).is_some_and(|actual| values_equal(actual, expected))
            }
            Self::Approx(key, expected) => lookup(properties, key)
                .is_some_and(|actual| normalize(actual) == normalize(expected)),
            Self::GreaterEq(key, bound) => lookup(properties, key)
                .is_some_and(|actual| compare_values(actual, bound) != Ordering::Less),
            Self::LessEq(key, bound) => lookup(properties, key)
                .is_some_and(|actual| compare_values(actual, bound) != Ordering::Greater),
            Self::Substring {
                key,
                initial,
                any,
                last,
            } => lookup(properties, key)
                .is_some_and(|actual| substring_match(actual, initial.as_deref(), any, last.as_deref())),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) | Self::Or(filters) => {
                let op = if matches!(self, Self::And(_)) { '&' } else { '|' };
                write!(f, "({}", op)?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Self::Not(filter) => write!(f, "(!{})", filter),
            Self::Equal(key, value) => write!(f, "({}={})", key, escape(value)),
            Self::Approx(key, value) => write!(f, "({}~={})", key, escape(value)),
            Self::GreaterEq(key, value) => write!(f, "({}>={})", key, escape(value)),
            Self::LessEq(key, value) => write!(f, "({}<={})", key, escape(value)),
            Self::Present(key) => write!(f, "({}=*)", key),
            Self::Substring {
                key,
                initial,
                any,
                last,
            } => {
                write!(f, "({}=", key)?;
                if let Some(initial) = initial {
                    write!(f, "{}", escape(initial))?;
                }
                write!(f, "*")?;
                for piece in any {
                    write!(f, "{}*", escape(piece))?;
                }
                if let Some(last) = last {
                    write!(f, "{}", escape(last))?;
                }
                write!(f, ")")
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn lookup<'a>(properties: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn values_equal(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    match (DottedVersion::parse(actual), DottedVersion::parse(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn compare_values(actual: &str, bound: &str) -> Ordering {
    if let (Some(a), Some(b)) = (DottedVersion::parse(actual), DottedVersion::parse(bound)) {
        return a.cmp(&b);
    }
    if let (Ok(a), Ok(b)) = (actual.trim().parse::<i64>(), bound.trim().parse::<i64>()) {
        return a.cmp(&b);
    }
    actual.cmp(bound)
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    for piece in any {
        match rest.find(piece.as_str()) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last),
        None => true,
    }
}

/// `major[.minor[.micro[.qualifier]]]` with numeric leading parts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DottedVersion {
    major: u64,
    minor: u64,
    micro: u64,
    qualifier: String,
}

impl DottedVersion {
    fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().splitn(4, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let micro = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let qualifier = parts.next().unwrap_or_default().to_string();
        Some(Self {
            major,
            minor,
            micro,
            qualifier,
        })
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == wanted => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(FilterError::Unexpected {
                found,
                position: self.pos,
            }),
            None => Err(FilterError::UnexpectedEnd),
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(FilterError::UnexpectedEnd),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let start = self.pos;
        let mut filters = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            filters.push(self.filter()?);
            self.skip_ws();
        }
        if filters.is_empty() {
            return Err(FilterError::EmptyList(start));
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos].iter().collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(FilterError::MissingAttribute(start));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('~' | '<' | '>')) => {
                self.pos += 1;
                self.expect('=')?;
                c
            }
            Some(found) => {
                return Err(FilterError::Unexpected {
                    found,
                    position: self.pos,
                })
            }
            None => return Err(FilterError::UnexpectedEnd),
        };

        let pieces = self.value()?;
        let filter = match op {
            '~' => Filter::Approx(key, join(pieces)),
            '<' => Filter::LessEq(key, join(pieces)),
            '>' => Filter::GreaterEq(key, join(pieces)),
            _ if pieces.len() == 1 => Filter::Equal(key, join(pieces)),
            _ if pieces.len() == 2 && pieces.iter().all(String::is_empty) => Filter::Present(key),
            _ => {
                let mut pieces = pieces;
                let last = pieces.pop().filter(|piece| !piece.is_empty());
                let initial = Some(pieces.remove(0)).filter(|piece| !piece.is_empty());
                let any = pieces.into_iter().filter(|piece| !piece.is_empty()).collect();
                Filter::Substring {
                    key,
                    initial,
                    any,
                    last,
                }
            }
        };
        Ok(filter)
    }

    /// Read a value up to the closing `)`, split at unescaped `*`
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut pieces = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(FilterError::UnexpectedEnd),
                Some(')') => return Ok(pieces),
                Some('(') => {
                    return Err(FilterError::Unexpected {
                        found: '(',
                        position: self.pos,
                    })
                }
                Some('*') => {
                    self.pos += 1;
                    pieces.push(String::new());
                }
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or(FilterError::UnexpectedEnd)?;
                    self.pos += 1;
                    push_char(&mut pieces, escaped);
                }
                Some(c) => {
                    self.pos += 1;
                    push_char(&mut pieces, c);
                }
            }
        }
    }
}

fn push_char(pieces: &mut [String], c: char) {
    if let Some(current) = pieces.last_mut() {
        current.push(c);
    }
}

/// Rejoin wildcard pieces for operators where `*` is literal
fn join(pieces: Vec<String>) -> String {
    pieces.join("*")
}
