//! Select-item parser
//!
//! Parses select expressions into [`Expr`] trees.
//!
//! # Supported Syntax
//!
//! ```text
//! count(*) as total
//! first(price, ts) as open
//! candlestick_agg(ts, price, volume) as candlestick
//! symbol
//! "Symbol" as symbol
//! ```
//!
//! Anything that is not a column, literal or function call (operators, casts,
//! `DISTINCT`, ...) is kept verbatim as [`Expr::Raw`] so that it can still be
//! forwarded and reported by the rule table.

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{eof, map, opt, recognize},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::rollup::ast::{Expr, SelectItem};
use crate::rollup::error::{RollupError, RollupResult};

/// Parse a select item such as `count(*) as total`
///
/// Without an `AS` clause the alias defaults to the column name for bare
/// columns; any other expression requires an explicit alias.
pub fn parse_select_item(input: &str) -> RollupResult<SelectItem> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RollupError::Parse("empty select item".to_string()));
    }

    let (expression, alias) = split_alias(input);
    let expr = parse_expr(expression);

    let alias = match (alias, &expr) {
        (Some(alias), _) => alias.to_string(),
        (None, Expr::Column(name)) => unqualified(name).to_string(),
        (None, _) => {
            return Err(RollupError::Parse(format!(
                "select item '{}' needs an alias",
                input
            )))
        }
    };

    Ok(SelectItem::new(expr, alias))
}

/// Parse an expression, falling back to [`Expr::Raw`] for unmodelled syntax
pub fn parse_expr(input: &str) -> Expr {
    let trimmed = input.trim();

    match terminated(parse_node, pair(multispace0, eof))(trimmed) {
        Ok((_, expr)) => expr,
        Err(_) => Expr::Raw(trimmed.to_string()),
    }
}

/// Check whether `input` is a plain SQL identifier
pub fn is_identifier(input: &str) -> bool {
    matches!(terminated(parse_identifier, eof)(input), Ok(_))
}

/// Check whether `input` can name an output column, plain or double-quoted
pub fn is_alias(input: &str) -> bool {
    is_identifier(input) || matches!(terminated(parse_quoted_identifier, eof)(input), Ok(_))
}

/// Split a trailing top-level `AS alias` off the expression
fn split_alias(input: &str) -> (&str, Option<&str>) {
    for (idx, c) in input.char_indices() {
        if !c.is_whitespace() || !is_top_level(&input[..idx]) {
            continue;
        }

        if let Ok((_, alias)) = alias_suffix(&input[idx..]) {
            return (input[..idx].trim_end(), Some(alias));
        }
    }

    (input, None)
}

/// Parse ` AS alias` up to end of input
fn alias_suffix(input: &str) -> IResult<&str, &str> {
    terminated(
        preceded(
            tuple((multispace1, tag_no_case("AS"), multispace1)),
            alt((parse_quoted_identifier, parse_identifier)),
        ),
        pair(multispace0, eof),
    )(input)
}

/// Whether the prefix closes every parenthesis and quote it opens
fn is_top_level(prefix: &str) -> bool {
    let mut depth = 0i32;
    let mut quoted = false;
    for c in prefix.chars() {
        match c {
            '\'' => quoted = !quoted,
            _ if quoted => {}
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    depth == 0 && !quoted
}

/// Parse one expression node
fn parse_node(input: &str) -> IResult<&str, Expr> {
    alt((
        parse_call,
        map(char('*'), |_| Expr::Star),
        map(parse_literal, |s: &str| Expr::Literal(s.to_string())),
        map(parse_column, |s: &str| Expr::Column(s.to_string())),
    ))(input)
}

/// Parse a function call like `first(price, ts)`
fn parse_call(input: &str) -> IResult<&str, Expr> {
    let (input, function) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('(')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, args) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        map(balanced_argument, parse_expr),
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')')(input)?;

    Ok((input, Expr::call(function.to_lowercase(), args)))
}

/// Take argument text up to the next top-level `,` or `)`
fn balanced_argument(input: &str) -> IResult<&str, &str> {
    let mut depth = 0usize;
    let mut quoted = false;

    for (idx, c) in input.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            _ if quoted => {}
            '(' => depth += 1,
            ')' | ',' if depth == 0 => {
                let arg = &input[..idx];
                if arg.trim().is_empty() {
                    break;
                }
                return Ok((&input[idx..], arg));
            }
            ')' => depth -= 1,
            _ => {}
        }
    }

    Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)))
}

/// Parse a column reference, optionally qualified (`t.price`)
fn parse_column(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((parse_quoted_identifier, parse_identifier)),
        many0(pair(
            char('.'),
            alt((parse_quoted_identifier, parse_identifier)),
        )),
    ))(input)
}

/// Parse identifier (column name, function name, alias)
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
    ))(input)
}

/// Parse a double-quoted identifier, keeping the quotes
fn parse_quoted_identifier(input: &str) -> IResult<&str, &str> {
    recognize(delimited(char('"'), take_while1(|c| c != '"'), char('"')))(input)
}

/// Parse a quoted string or a number, verbatim
fn parse_literal(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(delimited(char('\''), take_while(|c| c != '\''), char('\''))),
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
    ))(input)
}

/// Last component of a qualified name, without quotes
fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name).trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::ast::AggregateShape;

    #[test]
    fn test_parse_count_star() {
        let item = parse_select_item("count(*) as total").unwrap();
        assert_eq!(item.alias, "total");
        assert_eq!(item.expr, Expr::call("count", vec![Expr::Star]));
        assert_eq!(item.shape(), AggregateShape::Count);
    }

    #[test]
    fn test_parse_case_insensitive() {
        let item = parse_select_item("COUNT(*) AS total").unwrap();
        assert_eq!(item.to_sql(), "count(*) as total");
    }

    #[test]
    fn test_parse_multiple_args() {
        let item = parse_select_item("candlestick_agg(ts, price, volume) as candlestick").unwrap();
        assert_eq!(
            item.expr,
            Expr::call(
                "candlestick_agg",
                vec![
                    Expr::column("ts"),
                    Expr::column("price"),
                    Expr::column("volume")
                ]
            )
        );
    }

    #[test]
    fn test_parse_nested_call() {
        let expr = parse_expr("percentile_agg(coalesce(latency, 0))");
        assert_eq!(
            expr,
            Expr::call(
                "percentile_agg",
                vec![Expr::call(
                    "coalesce",
                    vec![Expr::column("latency"), Expr::Literal("0".to_string())]
                )]
            )
        );
    }

    #[test]
    fn test_parse_bare_column_alias() {
        let item = parse_select_item("symbol").unwrap();
        assert_eq!(item.alias, "symbol");
        assert_eq!(item.to_sql(), "symbol");

        let item = parse_select_item("t.symbol").unwrap();
        assert_eq!(item.alias, "symbol");
        assert_eq!(item.to_sql(), "t.symbol as symbol");
    }

    #[test]
    fn test_parse_raw_fallback() {
        let item = parse_select_item("sum(price * volume) as notional").unwrap();
        assert_eq!(
            item.expr,
            Expr::call("sum", vec![Expr::Raw("price * volume".to_string())])
        );
        assert_eq!(item.to_sql(), "sum(price * volume) as notional");

        let expr = parse_expr("price::numeric");
        assert_eq!(expr, Expr::Raw("price::numeric".to_string()));
    }

    #[test]
    fn test_alias_inside_parens_is_not_split() {
        let item = parse_select_item("max(cast(price as numeric)) as high").unwrap();
        assert_eq!(item.alias, "high");
        assert_eq!(item.to_sql(), "max(cast(price as numeric)) as high");
    }

    #[test]
    fn test_parse_missing_alias() {
        assert!(parse_select_item("count(*)").is_err());
        assert!(parse_select_item("   ").is_err());
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("ts"));
        assert!(is_identifier("created_at"));
        assert!(!is_identifier("ts; drop table x"));
        assert!(!is_identifier("1st"));
    }
}
