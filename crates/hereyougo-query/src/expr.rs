//! Criteria expressions.
//!
//! Criteria are a small expression tree instead of SQL text: column
//! references name a property (or column) of the node they belong to and get
//! qualified with that node's scope at compile time, placeholders get the
//! scope as prefix, literals are bound as generated placeholders.

use hereyougo_core::{Error, Model, Params, Result, Value};
use serde::Serialize;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
        }
    }
}

/// A criteria expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Property or column of the node's own class
    Column(String),
    /// Property or column of the parent node, only valid in join conditions
    Parent(String),
    /// Named placeholder (stored without the leading `:`)
    Placeholder(String),
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },
}

impl Expr {
    /// Reference a property or column of this node.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// Reference a property or column of the parent node.
    pub fn parent(name: impl Into<String>) -> Self {
        Expr::Parent(name.into())
    }

    /// Reference a named placeholder, with or without its leading `:`.
    pub fn placeholder(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.strip_prefix(':') {
            Some(stripped) => Expr::Placeholder(stripped.to_string()),
            None => Expr::Placeholder(name),
        }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Like, pattern)
    }

    /// Logical AND, flattening nested conjunctions.
    pub fn and(self, other: impl Into<Expr>) -> Self {
        let mut parts = match self {
            Expr::And(parts) => parts,
            other => vec![other],
        };
        match other.into() {
            Expr::And(more) => parts.extend(more),
            other => parts.push(other),
        }
        Expr::And(parts)
    }

    /// Logical OR, flattening nested disjunctions.
    pub fn or(self, other: impl Into<Expr>) -> Self {
        let mut parts = match self {
            Expr::Or(parts) => parts,
            other => vec![other],
        };
        match other.into() {
            Expr::Or(more) => parts.extend(more),
            other => parts.push(other),
        }
        Expr::Or(parts)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// Conjunction of `column = value` for every pair, `None` when empty.
    pub fn all_equal<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Option<Self> {
        pairs
            .into_iter()
            .map(|(column, value)| Expr::col(column).eq(Expr::Literal(value)))
            .reduce(Expr::and)
    }

    /// Placeholder names referenced by this expression.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Placeholder(name) = expr {
                names.push(name.as_str());
            }
        });
        names
    }

    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::And(parts) | Expr::Or(parts) => {
                for part in parts {
                    part.walk(visit);
                }
            }
            Expr::Not(expr) | Expr::IsNull { expr, .. } => expr.walk(visit),
            Expr::In { expr, values, .. } => {
                expr.walk(visit);
                for value in values {
                    value.walk(visit);
                }
            }
            Expr::Column(_) | Expr::Parent(_) | Expr::Placeholder(_) | Expr::Literal(_) => {}
        }
    }

    /// Render scoped SQL.
    pub(crate) fn render(&self, ctx: &mut RenderContext<'_>) -> Result<String> {
        match self {
            Expr::Column(name) => ctx.column(ctx.scope, ctx.model, name),
            Expr::Parent(name) => match ctx.parent {
                Some((scope, model)) => ctx.column(scope, model, name),
                None => Err(Error::broken(
                    ctx.model.class().name(),
                    format!("parent reference {} outside of a join condition", name),
                )),
            },
            Expr::Placeholder(name) => {
                let key = format!(":{}", name);
                if !ctx.placeholders.contains_key(&key) {
                    return Err(Error::broken(
                        ctx.model.class().name(),
                        format!("unbound placeholder {}", key),
                    ));
                }
                Ok(format!(":{}_{}", ctx.scope, name))
            }
            Expr::Literal(value) => {
                ctx.literals += 1;
                let key = format!(":{}_{}", ctx.scope, ctx.literals);
                ctx.bindings.insert(key.clone(), value.clone());
                Ok(key)
            }
            Expr::Binary { left, op, right } => Ok(format!(
                "{} {} {}",
                left.render(ctx)?,
                op.as_str(),
                right.render(ctx)?
            )),
            Expr::And(parts) => render_list(parts, " AND ", "1 = 1", ctx),
            Expr::Or(parts) => render_list(parts, " OR ", "1 = 0", ctx),
            Expr::Not(expr) => Ok(format!("NOT ({})", expr.render(ctx)?)),
            Expr::IsNull { expr, negated } => {
                let expr = expr.render(ctx)?;
                if *negated {
                    Ok(format!("{} IS NOT NULL", expr))
                } else {
                    Ok(format!("{} IS NULL", expr))
                }
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let expr = expr.render(ctx)?;
                let values = values
                    .iter()
                    .map(|v| v.render(ctx))
                    .collect::<Result<Vec<_>>>()?;
                let keyword = if *negated { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", expr, keyword, values.join(", ")))
            }
        }
    }
}

fn render_list(
    parts: &[Expr],
    separator: &str,
    empty: &str,
    ctx: &mut RenderContext<'_>,
) -> Result<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|part| part.render(ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", rendered.join(separator)))
}

/// State threaded through rendering of one query node.
pub(crate) struct RenderContext<'a> {
    pub scope: &'a str,
    pub model: &'a Model,
    pub parent: Option<(&'a str, &'a Model)>,
    pub placeholders: &'a Params,
    pub bindings: &'a mut Params,
    pub literals: usize,
}

impl RenderContext<'_> {
    fn column(&self, scope: &str, model: &Model, name: &str) -> Result<String> {
        model
            .property(name)
            .or_else(|| model.property_by_column(name))
            .map(|property| format!("{}.{}", scope, property.column()))
            .ok_or_else(|| {
                Error::broken(
                    model.class().name(),
                    format!("unknown property or column {}", name),
                )
            })
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(i64::from(n)))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}
