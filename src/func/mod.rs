//!Row-scoped "common" functions: pure, synchronous, resolved at compile time
//!by name. Operators produced by the parser (`AND`, `<=`, `+`, ...) live here
//!alongside a small set of named helpers.

pub mod rolling;

use std::cmp::Ordering;

use crate::collect::CollectError;
use crate::eval::{EvalContext, Evaluator};
use crate::types::Value;

pub fn is_common(name: &str) -> bool {
    matches!(
        name,
        "AND"
            | "OR"
            | "NOT"
            | "NEG"
            | "="
            | "!="
            | "<"
            | "<="
            | ">"
            | ">="
            | "+"
            | "-"
            | "*"
            | "/"
            | "%"
            | "ABS"
            | "ROUND"
            | "MIN"
            | "MAX"
            | "COUNT"
    )
}

///Resolve a common function to an evaluator, or `None` when the name is not
///in the library. `text` labels the resulting evaluator.
pub fn common(name: &str, text: &str, args: Vec<Evaluator>) -> Option<Evaluator> {
    let evaluator = match name {
        "AND" => binary(text, args, |l, r, _| {
            Ok(Value::Bool(l.is_truthy() && r.is_truthy()))
        })?,
        "OR" => binary(text, args, |l, r, _| {
            Ok(Value::Bool(l.is_truthy() || r.is_truthy()))
        })?,
        "NOT" => unary(text, args, |v| Ok(Value::Bool(!v.is_truthy())))?,
        "NEG" => unary(text, args, |v| Ok(numeric(&v, |n| -n)))?,
        "=" => comparison(text, args, |ord| ord == Ordering::Equal)?,
        "!=" => comparison(text, args, |ord| ord != Ordering::Equal)?,
        "<" => ordered(text, args, |ord| ord == Ordering::Less)?,
        "<=" => ordered(text, args, |ord| ord != Ordering::Greater)?,
        ">" => ordered(text, args, |ord| ord == Ordering::Greater)?,
        ">=" => ordered(text, args, |ord| ord != Ordering::Less)?,
        "+" => arithmetic(text, args, |l, r| l + r)?,
        "-" => arithmetic(text, args, |l, r| l - r)?,
        "*" => arithmetic(text, args, |l, r| l * r)?,
        "/" => arithmetic(text, args, |l, r| l / r)?,
        "%" => arithmetic(text, args, |l, r| l % r)?,
        "ABS" => unary(text, args, |v| Ok(numeric(&v, f64::abs)))?,
        "ROUND" => round(text, args)?,
        "MIN" => fold(text, args, Ordering::Less)?,
        "MAX" => fold(text, args, Ordering::Greater)?,
        "COUNT" => count(text, args),
        _ => return None,
    };
    Some(evaluator)
}

fn numeric(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    match value.as_f64() {
        Some(n) => Value::Num(f(n)),
        None => Value::Null,
    }
}

fn unary(
    text: &str,
    args: Vec<Evaluator>,
    f: impl Fn(Value) -> Result<Value, CollectError> + Send + Sync + 'static,
) -> Option<Evaluator> {
    if args.len() != 1 {
        return None;
    }
    let arg = args.into_iter().next().unwrap();
    Some(Evaluator::new(text, move |ctx| f(arg.call(ctx)?)))
}

fn binary(
    text: &str,
    args: Vec<Evaluator>,
    f: impl Fn(Value, Value, &EvalContext) -> Result<Value, CollectError> + Send + Sync + 'static,
) -> Option<Evaluator> {
    if args.len() != 2 {
        return None;
    }
    let mut iter = args.into_iter();
    let left = iter.next().unwrap();
    let right = iter.next().unwrap();
    Some(Evaluator::new(text, move |ctx| {
        f(left.call(ctx)?, right.call(ctx)?, ctx)
    }))
}

//Equality treats NULL = NULL as true; ordering comparisons against NULL are
//always false.
fn comparison(
    text: &str,
    args: Vec<Evaluator>,
    f: impl Fn(Ordering) -> bool + Send + Sync + 'static,
) -> Option<Evaluator> {
    binary(text, args, move |l, r, _| {
        Ok(Value::Bool(f(l.cmp_order(&r))))
    })
}

fn ordered(
    text: &str,
    args: Vec<Evaluator>,
    f: impl Fn(Ordering) -> bool + Send + Sync + 'static,
) -> Option<Evaluator> {
    binary(text, args, move |l, r, _| {
        if l.is_null() || r.is_null() {
            return Ok(Value::Bool(false));
        }
        Ok(Value::Bool(f(l.cmp_order(&r))))
    })
}

fn arithmetic(
    text: &str,
    args: Vec<Evaluator>,
    f: impl Fn(f64, f64) -> f64 + Send + Sync + 'static,
) -> Option<Evaluator> {
    binary(text, args, move |l, r, _| {
        match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => Ok(Value::Num(f(l, r))),
            _ => Ok(Value::Null),
        }
    })
}

fn round(text: &str, args: Vec<Evaluator>) -> Option<Evaluator> {
    if args.is_empty() || args.len() > 2 {
        return None;
    }
    let mut iter = args.into_iter();
    let arg = iter.next().unwrap();
    let digits = iter.next();
    Some(Evaluator::new(text, move |ctx| {
        let Some(n) = arg.call(ctx)?.as_f64() else {
            return Ok(Value::Null);
        };
        let places = match &digits {
            Some(d) => d.call(ctx)?.as_f64().unwrap_or(0.0),
            None => 0.0,
        };
        let scale = 10f64.powi(places as i32);
        Ok(Value::Num((n * scale).round() / scale))
    }))
}

fn fold(text: &str, args: Vec<Evaluator>, keep: Ordering) -> Option<Evaluator> {
    if args.is_empty() {
        return None;
    }
    Some(Evaluator::new(text, move |ctx| {
        let mut best: Option<Value> = None;
        for arg in &args {
            let value = arg.call(ctx)?;
            if value.is_null() {
                continue;
            }
            best = Some(match best {
                Some(current) if value.cmp_order(&current) != keep => current,
                _ => value,
            });
        }
        Ok(best.unwrap_or(Value::Null))
    }))
}

///`COUNT()` is the number of positions in the tentative row, including the
///candidate; `COUNT(expr)` counts positions where `expr` is non-null. This is
///the primitive behind quota-style retain predicates.
fn count(text: &str, args: Vec<Evaluator>) -> Evaluator {
    Evaluator::new(text, move |ctx| {
        if args.is_empty() {
            return Ok(Value::Num(ctx.row.len() as f64));
        }
        let mut count = 0usize;
        for point in ctx.row.points() {
            let slot_ctx = EvalContext {
                completed: ctx.completed,
                row: ctx.row,
                current: point,
            };
            for arg in &args {
                if !arg.call(&slot_ctx)?.is_null() {
                    count += 1;
                }
            }
        }
        Ok(Value::Num(count as f64))
    })
}
