//! Tag/category boolean expressions.
//!
//! ```text
//! expr    := or
//! or      := and ( "OR" and )*
//! and     := not ( "AND" not )*
//! not     := "NOT" not | atom | "(" expr ")"
//! atom    := ("tag" | "category") ":" identifier
//! ```
//!
//! Keywords and atom values are case-sensitive; whitespace is insignificant.
//! Parsing is eager: a malformed expression is rejected with
//! [`Error::Parse`] before anything is evaluated.

use std::collections::HashSet;
use std::str::FromStr;

use notegraph_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which label set an atom tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Tag,
    Category,
}

impl Dimension {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Category => "category",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolExpr {
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Not(Box<BoolExpr>),
    Atom(Dimension, String),
}

/// Labels an item carries, as seen by [`BoolExpr::evaluate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    pub tags: &'a [String],
    pub category: Option<&'a str>,
}

/// Every literal an expression references, first-seen order, deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub tags: Vec<String>,
    pub categories: Vec<String>,
}

impl BoolExpr {
    pub fn parse(src: &str) -> Result<Self> {
        let tokens = tokenize(src);
        if tokens.is_empty() {
            return Err(Error::Parse("empty expression".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some((Token::RParen, at)) => Err(Error::Parse(format!(
                "unbalanced parentheses: unexpected `)` at {}",
                at
            ))),
            Some((_, at)) => Err(Error::Parse(format!(
                "missing operator between operands at {}",
                at
            ))),
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Self::And(l, r) => l.evaluate(ctx) && r.evaluate(ctx),
            Self::Or(l, r) => l.evaluate(ctx) || r.evaluate(ctx),
            Self::Not(inner) => !inner.evaluate(ctx),
            Self::Atom(Dimension::Tag, value) => ctx.tags.iter().any(|t| t == value),
            Self::Atom(Dimension::Category, value) => ctx.category == Some(value.as_str()),
        }
    }

    pub fn extract_dimensions(&self) -> Dimensions {
        let mut dims = Dimensions::default();
        self.collect_dimensions(&mut dims);
        dims
    }

    fn collect_dimensions(&self, dims: &mut Dimensions) {
        match self {
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_dimensions(dims);
                r.collect_dimensions(dims);
            }
            Self::Not(inner) => inner.collect_dimensions(dims),
            Self::Atom(dimension, value) => {
                let list = match dimension {
                    Dimension::Tag => &mut dims.tags,
                    Dimension::Category => &mut dims.categories,
                };
                if !list.contains(value) {
                    list.push(value.clone());
                }
            }
        }
    }

    /// Lower into a backend-agnostic [`Predicate`], resolving each atom to a
    /// node id through the given lookups. Unresolvable atoms stay in the tree
    /// and never match.
    pub fn build_predicate<T, C>(&self, tag_lookup: &T, category_lookup: &C) -> Predicate
    where
        T: Fn(&str) -> Option<String>,
        C: Fn(&str) -> Option<String>,
    {
        match self {
            Self::And(l, r) => Predicate::And(
                Box::new(l.build_predicate(tag_lookup, category_lookup)),
                Box::new(r.build_predicate(tag_lookup, category_lookup)),
            ),
            Self::Or(l, r) => Predicate::Or(
                Box::new(l.build_predicate(tag_lookup, category_lookup)),
                Box::new(r.build_predicate(tag_lookup, category_lookup)),
            ),
            Self::Not(inner) => {
                Predicate::Not(Box::new(inner.build_predicate(tag_lookup, category_lookup)))
            }
            Self::Atom(dimension, value) => {
                let node_id = match dimension {
                    Dimension::Tag => tag_lookup(value),
                    Dimension::Category => category_lookup(value),
                };
                Predicate::Atom(Condition {
                    dimension: *dimension,
                    value: value.clone(),
                    node_id,
                })
            }
        }
    }
}

impl FromStr for BoolExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And(l, r) => write!(f, "({} AND {})", l, r),
            Self::Or(l, r) => write!(f, "({} OR {})", l, r),
            Self::Not(inner) => write!(f, "NOT {}", inner),
            Self::Atom(d, v) => write!(f, "{}:{}", d.keyword(), v),
        }
    }
}

/// One atom resolved against the graph: "linked to node `node_id`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub dimension: Dimension,
    pub value: String,
    pub node_id: Option<String>,
}

/// Storage-agnostic predicate over the set of dimension nodes a document is
/// linked to. A backend may lower it to its own query form; `matches` is the
/// reference semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Atom(Condition),
}

impl Predicate {
    pub fn matches(&self, linked: &HashSet<String>) -> bool {
        match self {
            Self::And(l, r) => l.matches(linked) && r.matches(linked),
            Self::Or(l, r) => l.matches(linked) || r.matches(linked),
            Self::Not(inner) => !inner.matches(linked),
            Self::Atom(c) => c.node_id.as_ref().is_some_and(|id| linked.contains(id)),
        }
    }

    /// True when a document linked to no dimension at all satisfies it.
    pub fn matches_unlinked(&self) -> bool {
        self.matches(&HashSet::new())
    }

    /// Node ids of a pure conjunction of resolved positive atoms, for an
    /// AND-join lookup. `None` for any other shape.
    pub fn required_conjunction(&self) -> Option<Vec<String>> {
        match self {
            Self::And(l, r) => {
                let mut ids = l.required_conjunction()?;
                for id in r.required_conjunction()? {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Some(ids)
            }
            Self::Atom(Condition {
                node_id: Some(id), ..
            }) => Some(vec![id.clone()]),
            _ => None,
        }
    }

    /// Resolved node ids referenced anywhere, first-seen order.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<String>) {
        match self {
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_ids(ids);
                r.collect_ids(ids);
            }
            Self::Not(inner) => inner.collect_ids(ids),
            Self::Atom(c) => {
                if let Some(id) = &c.node_id {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------
// Tokenizer / parser
// ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Colon,
    And,
    Or,
    Not,
    Word(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Colon => ":",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::Word(w) => w,
        }
    }
}

/// Split into tokens, each tagged with its char offset.
fn tokenize(src: &str) -> Vec<(Token, usize)> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut word_start = 0;

    let flush = |word: &mut String, start: usize, tokens: &mut Vec<(Token, usize)>| {
        if word.is_empty() {
            return;
        }
        let token = match word.as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            _ => Token::Word(word.clone()),
        };
        tokens.push((token, start));
        word.clear();
    };

    for (i, ch) in src.chars().enumerate() {
        let single = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            flush(&mut word, word_start, &mut tokens);
            tokens.push((token, i));
        } else if ch.is_whitespace() {
            flush(&mut word, word_start, &mut tokens);
        } else {
            if word.is_empty() {
                word_start = i;
            }
            word.push(ch);
        }
    }
    flush(&mut word, word_start, &mut tokens);
    tokens
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, at)| (t, *at))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn parse_or(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_and()?;
        while let Some((Token::Or, _)) = self.peek() {
            self.pos += 1;
            let right = self.parse_and()?;
            left = BoolExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_not()?;
        while let Some((Token::And, _)) = self.peek() {
            self.pos += 1;
            let right = self.parse_not()?;
            left = BoolExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<BoolExpr> {
        match self.next() {
            None => Err(Error::Parse("expression ends where an operand is expected".into())),
            Some((Token::Not, _)) => Ok(BoolExpr::Not(Box::new(self.parse_not()?))),
            Some((Token::LParen, at)) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    _ => Err(Error::Parse(format!(
                        "unbalanced parentheses: `(` at {} is never closed",
                        at
                    ))),
                }
            }
            Some((Token::Word(dim), at)) => self.parse_atom(&dim, at),
            Some((op @ (Token::And | Token::Or), at)) => Err(Error::Parse(format!(
                "`{}` at {} is missing its left operand",
                op.text(),
                at
            ))),
            Some((Token::RParen, at)) => Err(Error::Parse(format!(
                "unexpected `)` at {}: empty group or unbalanced parentheses",
                at
            ))),
            Some((Token::Colon, at)) => {
                Err(Error::Parse(format!("missing dimension before `:` at {}", at)))
            }
        }
    }

    fn parse_atom(&mut self, dim: &str, at: usize) -> Result<BoolExpr> {
        if !matches!(self.peek(), Some((Token::Colon, _))) {
            return Err(Error::Parse(format!(
                "expected `tag:` or `category:` atom at {}, found `{}`",
                at, dim
            )));
        }
        let dimension = match dim {
            "tag" => Dimension::Tag,
            "category" => Dimension::Category,
            other => {
                return Err(Error::Parse(format!(
                    "unknown dimension `{}` at {}; expected `tag` or `category`",
                    other, at
                )))
            }
        };
        self.pos += 1;
        match self.next() {
            // Keywords are valid identifiers in value position: `tag:AND`.
            Some((token @ (Token::Word(_) | Token::And | Token::Or | Token::Not), _)) => {
                Ok(BoolExpr::Atom(dimension, token.text().to_string()))
            }
            _ => Err(Error::Parse(format!(
                "missing identifier after `{}:` at {}",
                dim, at
            ))),
        }
    }
}
