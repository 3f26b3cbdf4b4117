//!Expression classification: decides what must be fetched from the source,
//!what can be pushed down as a source-side filter, and how precedence
//!directives are derived.

use std::collections::HashSet;

use crate::collect::CollectError;
use crate::expr::{self, Expr};
use crate::func::rolling;
use crate::types::Value;

///True iff `name` carries a separator and the suffix after the last `.` is a
///known exchange id.
pub fn is_instrument(name: &str, exchanges: &HashSet<String>) -> bool {
    match name.rfind('.') {
        Some(idx) if idx > 0 => exchanges.contains(&name[idx + 1..]),
        _ => false,
    }
}

//Calls whose needed columns come from their arguments rather than their own
//text: the conjunct glue, cross-sectional COUNT, ordering markers and
//rolling functions. Everything else is assumed source-computable and is
//requested by its literal text.
fn derives_from_args(name: &str) -> bool {
    matches!(
        name,
        "AND" | "OR" | "NOT" | "=" | "!=" | "<" | "<=" | ">" | ">=" | "COUNT" | "ASC" | "DESC"
    ) || rolling::has(name)
}

///De-duplicated set of column names/expressions that must be included in the
///per-security source fetch for the given expressions.
pub fn needed_columns(exprs: &[Expr]) -> Vec<String> {
    let mut out = Vec::new();
    for expr in exprs {
        walk(expr, &mut out);
    }
    out
}

fn walk(expr: &Expr, out: &mut Vec<String>) {
    let found = match expr {
        Expr::Constant(_) => None,
        Expr::Variable(name) => Some(name.clone()),
        Expr::Call { name, args } => {
            if name.contains('.') {
                //external-reference form, resolved through a dedicated
                //lookup, never fetched locally; validated at compile time
                None
            } else if derives_from_args(name) {
                for arg in args {
                    walk(arg, out);
                }
                None
            } else {
                Some(expr.text())
            }
        }
    };
    if let Some(name) = found {
        if !out.contains(&name) {
            out.push(name);
        }
    }
}

///The subset of retain conjuncts that can be evaluated by the source per
///point, serialized for the fetch's `retain` field. Conjuncts touching
///external references, ordering markers, rolling functions, cross-sectional
///COUNT or null literals stay local.
pub fn quote_criteria(retain: &[Expr]) -> Option<String> {
    let pushed: Vec<String> = retain
        .iter()
        .flat_map(expr::split_conjuncts)
        .filter(pushable)
        .map(|conjunct| conjunct.text())
        .collect();
    if pushed.is_empty() {
        None
    } else {
        Some(pushed.join(" AND "))
    }
}

fn pushable(expr: &Expr) -> bool {
    match expr {
        Expr::Constant(Value::Null) => false,
        Expr::Constant(_) | Expr::Variable(_) => true,
        Expr::Call { name, args } => {
            if name.contains('.')
                || matches!(name.as_str(), "ASC" | "DESC" | "COUNT")
                || rolling::has(name)
            {
                return false;
            }
            args.iter().all(pushable)
        }
    }
}

///One sort directive. `by: None` directives are inert.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Precedence {
    pub by: Option<String>,
    pub desc: bool,
}

///Derive sort directives from precedence expressions. `cached` holds the
///column texts already requested from the source, so call expressions can
///order by their source-computed column.
pub fn precedence_of(exprs: &[Expr], cached: &[String]) -> Result<Vec<Precedence>, CollectError> {
    exprs.iter().map(|expr| directive(expr, cached)).collect()
}

fn directive(expr: &Expr, cached: &[String]) -> Result<Precedence, CollectError> {
    match expr {
        Expr::Constant(_) => Ok(Precedence::default()),
        Expr::Variable(name) => Ok(Precedence {
            by: Some(name.clone()),
            desc: false,
        }),
        Expr::Call { name, args } if name == "ASC" || name == "DESC" => {
            let inner = match args.first() {
                Some(arg) => directive(arg, cached)?,
                None => Precedence::default(),
            };
            Ok(Precedence {
                by: inner.by,
                desc: name == "DESC",
            })
        }
        Expr::Call { name, .. } => {
            let text = expr.text();
            if cached.contains(&text) {
                Ok(Precedence {
                    by: Some(text),
                    desc: false,
                })
            } else if rolling::has(name) || name == "COUNT" {
                Err(CollectError::Usage(format!(
                    "aggregate functions cannot be used in precedence: {}",
                    text
                )))
            } else {
                Ok(Precedence::default())
            }
        }
    }
}
