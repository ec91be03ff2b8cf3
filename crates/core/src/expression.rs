//! Expression rendering and parsing
//!
//! Predicates and partial updates are rendered into the key-value service's
//! expression syntax with placeholder names (`#n0`) and values (`:v0`), so
//! no attribute name or value is ever spliced into expression text. The
//! parser is the inverse for the subset this module renders; the in-memory
//! transport uses it to evaluate requests the same way the remote service
//! would.
//!
//! Grammar accepted by the parser:
//!
//! ```text
//! condition  := term ("AND" term)*
//! term       := "(" condition ")"
//!             | "begins_with" "(" path "," value ")"
//!             | "attribute_exists" "(" path ")"
//!             | path "=" value
//!             | path "BETWEEN" value "AND" value
//! update     := "SET" path "=" value ("," path "=" value)*
//! path       := "#" ident | ident
//! value      := ":" ident
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::predicate::{Condition, Predicate};
use crate::value::{AttributeValue, Item};

/// Collects placeholders while rendering one or more expressions for a request
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    names: BTreeMap<String, String>,
    values: BTreeMap<String, AttributeValue>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn name(&mut self, attribute: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, a)| a.as_str() == attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: &AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value.clone());
        placeholder
    }

    /// Render a condition expression
    pub fn condition(&mut self, predicate: &Predicate) -> String {
        predicate
            .terms()
            .into_iter()
            .map(|(attribute, condition)| {
                let name = self.name(attribute);
                match condition {
                    Condition::Eq(v) => format!("{name} = {}", self.value(v)),
                    Condition::BeginsWith(v) => format!("begins_with({name}, {})", self.value(v)),
                    Condition::Between(lo, hi) => {
                        let lo = self.value(lo);
                        let hi = self.value(hi);
                        format!("{name} BETWEEN {lo} AND {hi}")
                    }
                    Condition::Exists => format!("attribute_exists({name})"),
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Render a `SET` update expression covering exactly `partial`
    pub fn update(&mut self, partial: &Item) -> String {
        let assignments: Vec<String> = partial
            .iter()
            .map(|(attribute, value)| {
                let name = self.name(attribute);
                format!("{name} = {}", self.value(value))
            })
            .collect();
        format!("SET {}", assignments.join(", "))
    }

    /// Add `ExpressionAttributeNames` / `ExpressionAttributeValues` to request params
    pub fn apply(self, params: &mut Map<String, Value>) -> Result<()> {
        if !self.names.is_empty() {
            params.insert(
                "ExpressionAttributeNames".to_string(),
                serde_json::to_value(self.names)?,
            );
        }
        if !self.values.is_empty() {
            params.insert(
                "ExpressionAttributeValues".to_string(),
                serde_json::to_value(self.values)?,
            );
        }
        Ok(())
    }
}

/// Placeholder tables of a request, used to resolve a parsed expression
#[derive(Debug, Default, Clone)]
pub struct Placeholders {
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, AttributeValue>,
}

impl Placeholders {
    /// Read placeholder tables from request params
    pub fn from_params(params: &Value) -> Result<Self> {
        let names = match params.get("ExpressionAttributeNames") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => BTreeMap::new(),
        };
        let values = match params.get("ExpressionAttributeValues") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => BTreeMap::new(),
        };
        Ok(Self { names, values })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Value(String),
    Ident(String),
    Eq,
    Comma,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '#' | ':' => {
                chars.next();
                let ident = take_ident(&mut chars);
                if ident.is_empty() {
                    return Err(syntax(text, pos, "empty placeholder"));
                }
                let placeholder = format!("{c}{ident}");
                tokens.push(if c == '#' {
                    Token::Name(placeholder)
                } else {
                    Token::Value(placeholder)
                });
            }
            c if c.is_alphanumeric() || c == '_' => {
                tokens.push(Token::Ident(take_ident(&mut chars)));
            }
            other => return Err(syntax(text, pos, &format!("unexpected '{other}'"))),
        }
    }
    Ok(tokens)
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

fn syntax(text: &str, pos: usize, reason: &str) -> Error {
    Error::InvalidQuery(format!("Invalid expression '{text}' at {pos}: {reason}"))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    placeholders: &'a Placeholders,
    text: &'a str,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, placeholders: &'a Placeholders) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
            placeholders,
            text,
        })
    }

    fn error(&self, reason: &str) -> Error {
        Error::InvalidQuery(format!(
            "Invalid expression '{}' at token {}: {reason}",
            self.text, self.pos
        ))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            _ => Err(self.error(&format!("expected {expected:?}"))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(i)) if i.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> Result<()> {
        if self.at_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {keyword}")))
        }
    }

    fn path(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Name(placeholder)) => self
                .placeholders
                .names
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| self.error(&format!("undefined name {placeholder}"))),
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(self.error("expected attribute path")),
        }
    }

    fn value(&mut self) -> Result<AttributeValue> {
        match self.next() {
            Some(Token::Value(placeholder)) => self
                .placeholders
                .values
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| self.error(&format!("undefined value {placeholder}"))),
            _ => Err(self.error("expected value placeholder")),
        }
    }

    fn condition(&mut self) -> Result<Predicate> {
        let mut predicate = self.term()?;
        while self.at_keyword("AND") {
            self.pos += 1;
            predicate = predicate.and(self.term()?);
        }
        Ok(predicate)
    }

    fn term(&mut self) -> Result<Predicate> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.condition()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        if self.at_keyword("begins_with") {
            self.pos += 1;
            self.expect(Token::LParen)?;
            let attribute = self.path()?;
            self.expect(Token::Comma)?;
            let prefix = self.value()?;
            self.expect(Token::RParen)?;
            return Ok(compare(attribute, Condition::BeginsWith(prefix)));
        }

        if self.at_keyword("attribute_exists") {
            self.pos += 1;
            self.expect(Token::LParen)?;
            let attribute = self.path()?;
            self.expect(Token::RParen)?;
            return Ok(compare(attribute, Condition::Exists));
        }

        let attribute = self.path()?;
        if self.peek() == Some(&Token::Eq) {
            self.pos += 1;
            let value = self.value()?;
            return Ok(compare(attribute, Condition::Eq(value)));
        }

        self.keyword("BETWEEN")?;
        let low = self.value()?;
        self.keyword("AND")?;
        let high = self.value()?;
        Ok(compare(attribute, Condition::Between(low, high)))
    }

    fn finish(&self) -> Result<()> {
        if self.pos < self.tokens.len() {
            Err(self.error("trailing input"))
        } else {
            Ok(())
        }
    }
}

fn compare(attribute: String, condition: Condition) -> Predicate {
    Predicate::Compare {
        attribute,
        condition,
    }
}

/// Parse a condition expression back into a predicate
pub fn parse_condition(text: &str, placeholders: &Placeholders) -> Result<Predicate> {
    let mut parser = Parser::new(text, placeholders)?;
    let predicate = parser.condition()?;
    parser.finish()?;
    Ok(predicate)
}

/// Parse a `SET` update expression into its assignments
pub fn parse_update(text: &str, placeholders: &Placeholders) -> Result<Item> {
    let mut parser = Parser::new(text, placeholders)?;
    parser.keyword("SET")?;

    let mut assignments = Item::new();
    loop {
        let attribute = parser.path()?;
        parser.expect(Token::Eq)?;
        let value = parser.value()?;
        assignments.insert(attribute, value);

        if parser.peek() == Some(&Token::Comma) {
            parser.pos += 1;
        } else {
            break;
        }
    }
    parser.finish()?;
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item;
    use crate::predicate::attr;

    fn render(predicate: &Predicate) -> (String, Placeholders) {
        let mut builder = ExpressionBuilder::new();
        let text = builder.condition(predicate);
        let mut params = Map::new();
        builder.apply(&mut params).unwrap();
        let placeholders = Placeholders::from_params(&Value::Object(params)).unwrap();
        (text, placeholders)
    }

    #[test]
    fn test_render_key_condition() {
        let predicate = attr("category").eq("apparel") & attr("sku").begins_with("woo");
        let (text, placeholders) = render(&predicate);

        assert_eq!(text, "#n0 = :v0 AND begins_with(#n1, :v1)");
        assert_eq!(placeholders.names["#n0"], "category");
        assert_eq!(placeholders.values[":v1"], AttributeValue::from("woo"));
    }

    #[test]
    fn test_render_between() {
        let (text, _) = render(&(attr("in_stock").eq(true) & attr("price").between(30, 40)));
        assert_eq!(text, "#n0 = :v0 AND #n1 BETWEEN :v1 AND :v2");
    }

    #[test]
    fn test_names_are_shared_across_expressions() {
        let mut builder = ExpressionBuilder::new();
        let key = builder.condition(&attr("category").eq("apparel"));
        let filter = builder.condition(&attr("category").exists());
        assert_eq!(key, "#n0 = :v0");
        assert_eq!(filter, "attribute_exists(#n0)");
    }

    #[test]
    fn test_parse_inverts_render() {
        let predicates = vec![
            attr("category").eq("apparel"),
            attr("category").eq("apparel") & attr("sku").begins_with("foo"),
            attr("in_stock").eq(true) & attr("price").between(30, 40),
            attr("sku").exists(),
        ];
        for predicate in predicates {
            let (text, placeholders) = render(&predicate);
            let parsed = parse_condition(&text, &placeholders).unwrap();
            assert_eq!(parsed.terms(), predicate.terms(), "{text}");
        }
    }

    #[test]
    fn test_parse_parentheses_and_bare_names() {
        let placeholders = Placeholders {
            names: BTreeMap::new(),
            values: BTreeMap::from([
                (":a".to_string(), AttributeValue::from(1)),
                (":b".to_string(), AttributeValue::from(2)),
            ]),
        };
        let parsed = parse_condition("(price = :a) and (qty = :b)", &placeholders).unwrap();
        assert!(parsed.matches(&item! {"price" => 1, "qty" => 2}));
        assert!(!parsed.matches(&item! {"price" => 1, "qty" => 3}));
    }

    #[test]
    fn test_parse_errors() {
        let placeholders = Placeholders::default();
        assert!(parse_condition("#missing = :v0", &placeholders).is_err());
        assert!(parse_condition("price >", &placeholders).is_err());
        assert!(parse_condition("", &placeholders).is_err());
        assert!(parse_update("price = :v0", &placeholders).is_err());
    }

    #[test]
    fn test_update_roundtrip() {
        let partial = item! {"in_stock" => false, "price" => 54.75};
        let mut builder = ExpressionBuilder::new();
        let text = builder.update(&partial);
        assert_eq!(text, "SET #n0 = :v0, #n1 = :v1");

        let mut params = Map::new();
        builder.apply(&mut params).unwrap();
        let placeholders = Placeholders::from_params(&Value::Object(params)).unwrap();
        assert_eq!(parse_update(&text, &placeholders).unwrap(), partial);
    }
}
