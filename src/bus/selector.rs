//! Message selectors of the form `PROPERTY IN ('a','b')`.

use std::fmt;
use std::str::FromStr;

use super::message::Message;

/// Matches messages whose property value is one of a fixed set.
///
/// Single quotes inside values are written doubled, as in SQL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    property: String,
    values: Vec<String>,
}

impl Selector {
    pub fn in_list<I, S>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            property: property.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn matches(&self, message: &Message) -> bool {
        message
            .property(&self.property)
            .is_some_and(|value| self.values.iter().any(|v| v == value))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} IN (", self.property)?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "'{}'", value.replace('\'', "''"))?;
        }
        f.write_str(")")
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid selector: {}", s);

        let (property, rest) = s.trim().split_once(char::is_whitespace).ok_or_else(invalid)?;
        let rest = rest.trim_start();
        let list = rest
            .strip_prefix("IN")
            .or_else(|| rest.strip_prefix("in"))
            .map(str::trim)
            .and_then(|r| r.strip_prefix('('))
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(invalid)?;

        Ok(Selector::in_list(property, parse_values(list).ok_or_else(invalid)?))
    }
}

/// Parse `'a','b''c'` into `["a", "b'c"]`.
fn parse_values(list: &str) -> Option<Vec<String>> {
    let mut values = Vec::new();
    let mut chars = list.trim().chars().peekable();

    while chars.peek().is_some() {
        if chars.next()? != '\'' {
            return None;
        }
        let mut value = String::new();
        loop {
            match chars.next()? {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    value.push('\'');
                }
                '\'' => break,
                c => value.push(c),
            }
        }
        values.push(value);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => {
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
            }
            Some(_) => return None,
        }
    }

    Some(values)
}
