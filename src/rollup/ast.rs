//! Select-item syntax tree
//!
//! A select item is parsed once into an [`Expr`] and classified into an
//! [`AggregateShape`]. Rewriting works on the shape, never on SQL text, so a
//! rule can not re-match the output of another rule.

use serde::Serialize;

/// Aggregates whose result is a combinable summary object with its own
/// `rollup()` combinator
pub const OPAQUE_SUMMARY_FUNCTIONS: &[&str] = &[
    "stats_agg",
    "percentile_agg",
    "uddsketch",
    "tdigest",
    "state_agg",
    "compact_state_agg",
    "heartbeat_agg",
    "candlestick_agg",
    "counter_agg",
    "gauge_agg",
    "time_weight",
    "hyperloglog",
];

/// A parsed select expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expr {
    /// `*`, only meaningful inside `count(*)`
    Star,
    /// A (possibly qualified or quoted) column reference
    Column(String),
    /// A quoted string or numeric literal, kept verbatim
    Literal(String),
    /// A function call with lower-cased name
    Call { function: String, args: Vec<Expr> },
    /// Anything the parser does not model (operators, casts, keywords)
    Raw(String),
}

impl Expr {
    /// Build a call expression
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call {
            function: function.into(),
            args,
        }
    }

    /// Build a column reference
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    /// Classify this expression
    pub fn shape(&self) -> AggregateShape {
        match self {
            Expr::Column(name) => AggregateShape::Column { name: name.clone() },
            Expr::Literal(_) => AggregateShape::Constant,
            Expr::Star | Expr::Raw(_) => AggregateShape::Unrecognized,
            Expr::Call { function, args } => classify_call(function, args),
        }
    }
}

fn classify_call(function: &str, args: &[Expr]) -> AggregateShape {
    match (function, args) {
        // count(DISTINCT x) and sum(DISTINCT x) are not decomposable into partial sums
        ("count" | "sum", [arg]) if is_distinct(arg) => AggregateShape::Call {
            function: function.to_string(),
        },
        ("count", [_]) => AggregateShape::Count,
        ("sum", [_]) => AggregateShape::Sum,
        ("min", [_]) => AggregateShape::Min,
        ("max", [_]) => AggregateShape::Max,
        ("first", [_, order]) => AggregateShape::First {
            order: order.clone(),
        },
        ("last", [_, order]) => AggregateShape::Last {
            order: order.clone(),
        },
        ("rollup", [_]) => AggregateShape::Rollup,
        (f, _) if OPAQUE_SUMMARY_FUNCTIONS.contains(&f) => AggregateShape::OpaqueSummary {
            function: f.to_string(),
        },
        (f, _) => AggregateShape::Call {
            function: f.to_string(),
        },
    }
}

fn is_distinct(arg: &Expr) -> bool {
    match arg {
        Expr::Raw(text) => text
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .is_some_and(|word| word.eq_ignore_ascii_case("distinct")),
        _ => false,
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Star => write!(f, "*"),
            Expr::Column(name) | Expr::Literal(name) | Expr::Raw(name) => write!(f, "{}", name),
            Expr::Call { function, args } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Recognized aggregate shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AggregateShape {
    /// `count(*)` or `count(x)`
    Count,
    /// `sum(x)`
    Sum,
    /// `min(x)`
    Min,
    /// `max(x)`
    Max,
    /// `first(x, t)`
    First { order: Expr },
    /// `last(x, t)`
    Last { order: Expr },
    /// A summary aggregate combined with `rollup()`
    OpaqueSummary { function: String },
    /// `rollup(x)`, the coarser-level form of an opaque summary
    Rollup,
    /// A plain column, normally a group key
    Column { name: String },
    /// A constant literal
    Constant,
    /// Any other function call; eligible for custom rules
    Call { function: String },
    /// Nothing the rule table understands
    Unrecognized,
}

impl AggregateShape {
    /// Whether the shape is produced by an aggregate function
    pub fn is_aggregate(&self) -> bool {
        !matches!(
            self,
            Self::Column { .. } | Self::Constant | Self::Unrecognized
        )
    }
}

/// One entry of a select list: an expression and the alias it is addressed by
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectItem {
    /// Parsed expression
    pub expr: Expr,
    /// Output column name, stable across the whole chain
    pub alias: String,
}

impl SelectItem {
    /// Create a select item from an already parsed expression
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
        }
    }

    /// Classify the expression
    pub fn shape(&self) -> AggregateShape {
        self.expr.shape()
    }

    /// Render as it appears in a select list
    pub fn to_sql(&self) -> String {
        let expr = self.expr.to_string();
        if expr == self.alias {
            expr
        } else {
            format!("{} as {}", expr, self.alias)
        }
    }
}

impl std::fmt::Display for SelectItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}
