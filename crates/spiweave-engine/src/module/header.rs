//! Declarative header parsing
//!
//! Parses the parameter-list syntax used by capability and requirement
//! headers:
//!
//! ```text
//! osgi.extender;filter:="(osgi.extender=osgi.serviceloader.processor)",
//! osgi.serviceloader;filter:='(osgi.serviceloader=*)';cardinality:=multiple
//! ```
//!
//! A header is a comma-separated list of clauses. Each clause has one or more
//! `;`-separated keys followed by attributes (`name=value`, or typed
//! `name:Type=value`) and directives (`name:=value`). Values may be quoted
//! with single or double quotes. A clause with several keys expands to one
//! clause per key. Repeated keys are kept apart by appending `~` markers.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Header syntax errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Unexpected character
    #[error("Unexpected '{found}' at position {position}")]
    Unexpected {
        /// Offending character
        found: char,
        /// Character position
        position: usize,
    },

    /// Quoted string never closed
    #[error("Unterminated quoted string starting at position {0}")]
    UnterminatedQuote(usize),

    /// A key or parameter name is empty
    #[error("Missing name at position {0}")]
    MissingName(usize),

    /// `name=` with nothing after it
    #[error("Missing value for '{name}' at position {position}")]
    MissingValue {
        /// Attribute or directive name
        name: String,
        /// Character position
        position: usize,
    },

    /// A bare key after an attribute or directive in the same clause
    #[error("Key '{name}' follows a parameter at position {position}")]
    KeyAfterParameter {
        /// The key
        name: String,
        /// Character position
        position: usize,
    },
}

/// One clause of a header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    /// Clause key; repeated keys carry trailing `~` markers
    pub key: String,
    /// Attributes by name
    pub attributes: BTreeMap<String, String>,
    /// Declared types of typed attributes (`name:Type=value`)
    pub attribute_types: BTreeMap<String, String>,
    /// Directives by name (without the `:`)
    pub directives: BTreeMap<String, String>,
}

impl Clause {
    /// Key with duplicate markers removed
    pub fn name(&self) -> &str {
        strip_duplicate_marker(&self.key)
    }

    /// Attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Directive value
    pub fn directive(&self, name: &str) -> Option<&str> {
        self.directives.get(name).map(String::as_str)
    }
}

/// A parsed header: clauses in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    clauses: Vec<Clause>,
}

impl Parameters {
    /// Parse header text; empty or blank text yields no clauses
    pub fn parse(text: &str) -> Result<Self, HeaderError> {
        let mut parser = Parser {
            chars: text.chars().collect(),
            pos: 0,
        };
        let mut params = Parameters::default();

        parser.skip_ws();
        if parser.at_end() {
            return Ok(params);
        }

        loop {
            let (keys, template) = parser.clause()?;
            for key in keys {
                params.push(Clause {
                    key,
                    ..template.clone()
                });
            }
            match parser.bump() {
                Some(',') => continue,
                None => break,
                Some(found) => {
                    return Err(HeaderError::Unexpected {
                        found,
                        position: parser.pos - 1,
                    })
                }
            }
        }
        Ok(params)
    }

    /// Append a clause, marking its key if it repeats an existing one
    pub fn push(&mut self, mut clause: Clause) {
        while self.contains_key(&clause.key) {
            clause.key.push('~');
        }
        self.clauses.push(clause);
    }

    /// Append every clause of `other`
    pub fn extend(&mut self, other: Parameters) {
        for clause in other.clauses {
            self.push(clause);
        }
    }

    /// Whether a clause with exactly this key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.clauses.iter().any(|clause| clause.key == key)
    }

    /// Clause with exactly this key
    pub fn get(&self, key: &str) -> Option<&Clause> {
        self.clauses.iter().find(|clause| clause.key == key)
    }

    /// All clauses whose key, ignoring duplicate markers, is `name`
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Clause> + 'a {
        self.clauses.iter().filter(move |clause| clause.name() == name)
    }

    /// Clauses in order
    pub fn iter(&self) -> std::slice::Iter<'_, Clause> {
        self.clauses.iter()
    }

    /// Clause keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|clause| clause.key.as_str())
    }

    /// Number of clauses
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether there are no clauses
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a Clause;
    type IntoIter = std::slice::Iter<'a, Clause>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", clause.name())?;
            for (name, value) in &clause.attributes {
                match clause.attribute_types.get(name) {
                    Some(ty) => write!(f, ";{}:{}={}", name, ty, quote(value))?,
                    None => write!(f, ";{}={}", name, quote(value))?,
                }
            }
            for (name, value) in &clause.directives {
                write!(f, ";{}:={}", name, quote(value))?;
            }
        }
        Ok(())
    }
}

/// Strip trailing `~` duplicate markers from a clause key
pub fn strip_duplicate_marker(key: &str) -> &str {
    key.trim_end_matches('~')
}

fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| !matches!(c, ',' | ';' | '"' | '\'' | '\\' | '=' | ':') && !c.is_whitespace());
    if plain {
        value.to_string()
    } else {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
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

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Parse one clause up to (not including) the next top-level `,`
    fn clause(&mut self) -> Result<(Vec<String>, Clause), HeaderError> {
        let mut keys = Vec::new();
        let mut template = Clause::default();

        loop {
            self.skip_ws();
            let start = self.pos;
            let name = self.token()?;
            self.skip_ws();

            match self.peek() {
                Some('=') => {
                    self.pos += 1;
                    let value = self.value(&name)?;
                    template.attributes.insert(name, value);
                }
                Some(':') => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        let value = self.value(&name)?;
                        template.directives.insert(name, value);
                    } else {
                        self.skip_ws();
                        let ty = self.token()?;
                        self.skip_ws();
                        match self.bump() {
                            Some('=') => {}
                            Some(found) => {
                                return Err(HeaderError::Unexpected {
                                    found,
                                    position: self.pos - 1,
                                })
                            }
                            None => {
                                return Err(HeaderError::MissingValue {
                                    name,
                                    position: self.pos,
                                })
                            }
                        }
                        let value = self.value(&name)?;
                        template.attribute_types.insert(name.clone(), ty);
                        template.attributes.insert(name, value);
                    }
                }
                _ => {
                    if !template.attributes.is_empty() || !template.directives.is_empty() {
                        return Err(HeaderError::KeyAfterParameter {
                            name,
                            position: start,
                        });
                    }
                    keys.push(name);
                }
            }

            self.skip_ws();
            match self.peek() {
                Some(';') => self.pos += 1,
                _ => break,
            }
        }

        Ok((keys, template))
    }

    /// A name: quoted, or a run of characters up to a delimiter
    fn token(&mut self) -> Result<String, HeaderError> {
        let start = self.pos;
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let text = self.quoted()?;
            if text.is_empty() {
                return Err(HeaderError::MissingName(start));
            }
            return Ok(text);
        }
        while let Some(c) = self.peek() {
            if matches!(c, ',' | ';' | '=' | ':') || c.is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(HeaderError::MissingName(start));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// A value: quoted, or everything up to the next `,` or `;`, trimmed
    fn value(&mut self, name: &str) -> Result<String, HeaderError> {
        self.skip_ws();
        if matches!(self.peek(), Some('"') | Some('\'')) {
            return self.quoted();
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | ';') {
                break;
            }
            self.pos += 1;
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        let value = value.trim_end().to_string();
        if value.is_empty() {
            return Err(HeaderError::MissingValue {
                name: name.to_string(),
                position: start,
            });
        }
        Ok(value)
    }

    fn quoted(&mut self) -> Result<String, HeaderError> {
        let start = self.pos;
        let quote = self.bump().ok_or(HeaderError::UnterminatedQuote(start))?;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(HeaderError::UnterminatedQuote(start)),
                Some('\\') => match self.bump() {
                    Some(escaped) => text.push(escaped),
                    None => return Err(HeaderError::UnterminatedQuote(start)),
                },
                Some(c) if c == quote => return Ok(text),
                Some(c) => text.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_consumer_header() {
        let params = Parameters::parse(
            "osgi.extender;filter:='(osgi.extender=osgi.serviceloader.processor)',\
             osgi.serviceloader;filter:=\"(osgi.serviceloader=*)\"",
        )
        .unwrap();
        assert_eq!(params.len(), 2);

        let extender = params.get("osgi.extender").unwrap();
        assert_eq!(
            extender.directive("filter"),
            Some("(osgi.extender=osgi.serviceloader.processor)")
        );
        assert!(extender.attributes.is_empty());

        let loader = params.get("osgi.serviceloader").unwrap();
        assert_eq!(loader.directive("filter"), Some("(osgi.serviceloader=*)"));
    }

    #[test]
    fn test_duplicate_keys_get_markers() {
        let params = Parameters::parse(
            "osgi.serviceloader;filter:='(a=1)', osgi.serviceloader;filter:='(b=2)'",
        )
        .unwrap();
        let keys: Vec<_> = params.keys().collect();
        assert_eq!(keys, vec!["osgi.serviceloader", "osgi.serviceloader~"]);
        assert_eq!(params.named("osgi.serviceloader").count(), 2);
        assert_eq!(strip_duplicate_marker("a~~"), "a");
    }

    #[test]
    fn test_multiple_keys_and_typed_attributes() {
        let params = Parameters::parse("com.a; com.b; version:Version=1.2; mandatory:=true").unwrap();
        assert_eq!(params.len(), 2);
        for clause in &params {
            assert_eq!(clause.attribute("version"), Some("1.2"));
            assert_eq!(clause.attribute_types.get("version").map(String::as_str), Some("Version"));
            assert_eq!(clause.directive("mandatory"), Some("true"));
        }
    }

    #[test]
    fn test_blank_header() {
        assert!(Parameters::parse("   ").unwrap().is_empty());
    }

    #[test]
    fn test_glob_keys() {
        let params = Parameters::parse("com.acme.*, org.example.consumer").unwrap();
        let keys: Vec<_> = params.keys().collect();
        assert_eq!(keys, vec!["com.acme.*", "org.example.consumer"]);
    }

    #[test]
    fn test_escaped_quotes() {
        let params = Parameters::parse(r#"a;note="say \"hi\"""#).unwrap();
        assert_eq!(params.get("a").unwrap().attribute("note"), Some(r#"say "hi""#));
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            Parameters::parse("a;filter:='(x=1)"),
            Err(HeaderError::UnterminatedQuote(_))
        ));
        assert!(matches!(
            Parameters::parse("a;b=1;c"),
            Err(HeaderError::KeyAfterParameter { .. })
        ));
        assert!(matches!(
            Parameters::parse("a;b="),
            Err(HeaderError::MissingValue { .. })
        ));
        assert!(matches!(Parameters::parse("a,,b"), Err(HeaderError::MissingName(_))));
    }

    #[test]
    fn test_display_reparses() {
        let text = "osgi.extender;filter:=\"(osgi.extender=osgi.serviceloader.processor)\"";
        let params = Parameters::parse(text).unwrap();
        assert_eq!(Parameters::parse(&params.to_string()).unwrap(), params);
    }
}
