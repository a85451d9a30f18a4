//! Pre-parsed predicate trees over tags
//!
//! The index walks and interprets these trees; it never parses text into them.
//! Only `=`, `!=`, `=~`, `!~`, `AND` and `OR` are meaningful to the index.
//! The remaining operators exist so callers can hand over whatever their
//! parser produced and have it rejected with a proper error.

use regex::Regex;
use std::fmt;

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,       // =
    Neq,      // !=
    EqRegex,  // =~
    NeqRegex, // !~
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    /// Operators a tag predicate may contain
    pub fn is_tag_comparison(self) -> bool {
        matches!(
            self,
            Op::Eq | Op::Neq | Op::EqRegex | Op::NeqRegex | Op::And | Op::Or
        )
    }

    pub fn is_regex(self) -> bool {
        matches!(self, Op::EqRegex | Op::NeqRegex)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Eq => "=",
            Op::Neq => "!=",
            Op::EqRegex => "=~",
            Op::NeqRegex => "!~",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        };
        f.write_str(s)
    }
}

/// Predicate expression node
#[derive(Debug, Clone)]
pub enum Expr {
    Binary {
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Paren(Box<Expr>),
    /// Reference to a tag key (or the `_tagKey` pseudo tag)
    VarRef(String),
    StringLiteral(String),
    RegexLiteral(Regex),
    NumberLiteral(f64),
}

impl Expr {
    pub fn binary(op: Op, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `tag = 'value'`
    pub fn eq(tag: &str, value: &str) -> Self {
        Self::binary(Op::Eq, Expr::var(tag), Expr::string(value))
    }

    /// `tag != 'value'`
    pub fn neq(tag: &str, value: &str) -> Self {
        Self::binary(Op::Neq, Expr::var(tag), Expr::string(value))
    }

    /// `tag =~ /re/`
    pub fn regex_match(tag: &str, re: Regex) -> Self {
        Self::binary(Op::EqRegex, Expr::var(tag), Expr::RegexLiteral(re))
    }

    /// `tag !~ /re/`
    pub fn regex_not_match(tag: &str, re: Regex) -> Self {
        Self::binary(Op::NeqRegex, Expr::var(tag), Expr::RegexLiteral(re))
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(Op::And, lhs, rhs)
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(Op::Or, lhs, rhs)
    }

    pub fn paren(inner: Expr) -> Self {
        Expr::Paren(Box::new(inner))
    }

    pub fn var(name: &str) -> Self {
        Expr::VarRef(name.to_string())
    }

    pub fn string(value: &str) -> Self {
        Expr::StringLiteral(value.to_string())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::Paren(inner) => write!(f, "({})", inner),
            Expr::VarRef(name) => f.write_str(name),
            Expr::StringLiteral(s) => write!(f, "'{}'", s),
            Expr::RegexLiteral(re) => write!(f, "/{}/", re.as_str()),
            Expr::NumberLiteral(n) => write!(f, "{}", n),
        }
    }
}

/// Visit every node depth-first, parents before children
pub fn walk<F: FnMut(&Expr)>(expr: &Expr, f: &mut F) {
    f(expr);
    match expr {
        Expr::Binary { lhs, rhs, .. } => {
            walk(lhs, f);
            walk(rhs, f);
        }
        Expr::Paren(inner) => walk(inner, f),
        _ => {}
    }
}

/// Reject any operator that is not a tag comparison or a logical connective
pub fn validate_tag_predicate(expr: &Expr) -> crate::Result<()> {
    let mut bad = None;
    walk(expr, &mut |node| {
        if let Expr::Binary { op, .. } = node {
            if !op.is_tag_comparison() && bad.is_none() {
                bad = Some(*op);
            }
        }
    });

    match bad {
        Some(op) => Err(crate::IndexError::InvalidPredicate(format!(
            "invalid tag comparison operator: {}",
            op
        ))),
        None => Ok(()),
    }
}
