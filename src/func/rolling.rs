//!Rolling/aggregate functions: compiled asynchronously (they may issue their
//!own source fetches) into plain synchronous evaluators.
//!
//!`MAXCORREL(duration, expression, [criteria])` is the representative: per
//!bucket it returns the maximum Pearson correlation between the trailing
//!`duration`-length window of `expression` for the evaluated security and the
//!same window for every other portfolio security satisfying `criteria`.

use std::collections::HashMap;

use futures::future::join_all;

use crate::collect::{CollectError, CollectRequest};
use crate::eval::{compile_local, eval_point, EvalContext, Evaluator};
use crate::expr::{self, Expr};
use crate::source::{QuoteRequest, QuoteSource};
use crate::types::{Point, Value, TEMPORAL};

pub fn has(name: &str) -> bool {
    matches!(name, "MAXCORREL")
}

///Resolve a rolling function call, fetching whatever window data it needs.
///Returns `Ok(None)` when the name is not a rolling function.
pub async fn rolling<S: QuoteSource>(
    expr: &Expr,
    source: &S,
    dataset: &[Vec<Point>],
    options: &CollectRequest,
) -> Result<Option<Evaluator>, CollectError> {
    let Expr::Call { name, args } = expr else {
        return Ok(None);
    };
    match name.as_str() {
        "MAXCORREL" => maxcorrel(&expr.text(), args, source, dataset, options)
            .await
            .map(Some),
        _ => Ok(None),
    }
}

async fn maxcorrel<S: QuoteSource>(
    text: &str,
    args: &[Expr],
    source: &S,
    dataset: &[Vec<Point>],
    options: &CollectRequest,
) -> Result<Evaluator, CollectError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(CollectError::Usage(format!(
            "MAXCORREL expects (duration, expression, [criteria]): {}",
            text
        )));
    }
    let n = fold_positive_integer(&args[0], text)?;
    let window_column = args[1].text();
    let criteria = match args.get(2) {
        None | Some(Expr::Constant(Value::Null)) => None,
        Some(Expr::Constant(Value::Str(s))) => {
            let parsed = expr::parse(s)
                .map_err(|e| CollectError::Usage(format!("bad criteria in {}: {}", text, e)))?;
            Some(compile_local(&parsed)?)
        }
        Some(other) => Some(compile_local(other)?),
    };

    let populated: Vec<&Vec<Point>> = dataset.iter().filter(|data| !data.is_empty()).collect();
    if populated.len() < 2 {
        return Ok(Evaluator::new(text, |_| Ok(Value::Num(0.0))));
    }

    //one window fetch per security, padded back by the window length
    let requests: Vec<QuoteRequest> = populated
        .iter()
        .map(|data| {
            let first = data.first().unwrap();
            let last = data.last().unwrap();
            QuoteRequest {
                symbol: first.symbol.clone(),
                exchange: first.exchange.clone(),
                columns: format!("{},{}", TEMPORAL, window_column),
                retain: None,
                begin: Some(first.temporal()),
                end: Some(last.temporal()),
                now: options.now,
                pad_begin: n,
                pad_leading: 0,
                pad_end: 0,
            }
        })
        .collect();
    let fetched = join_all(requests.iter().map(|r| source.quote(r.clone()))).await;

    let mut windows: HashMap<String, Vec<Point>> = HashMap::new();
    for (request, data) in requests.iter().zip(fetched) {
        let data = data.map_err(CollectError::Source)?;
        windows.insert(format!("{}.{}", request.symbol, request.exchange), data);
    }

    let text_owned = text.to_string();
    Ok(Evaluator::new(text, move |ctx| {
        if ctx.row.len() < 2 {
            return Ok(Value::Num(0.0));
        }
        let current_id = ctx.current.security_id();
        let own = trailing_window(&windows, &current_id, ctx, n, &window_column, &text_owned)?;
        let mut best: Option<f64> = None;
        for (id, point) in ctx.row.iter() {
            if id == current_id {
                continue;
            }
            if let Some(condition) = &criteria {
                let slot_ctx = EvalContext {
                    completed: ctx.completed,
                    row: ctx.row,
                    current: point,
                };
                if !condition.call(&slot_ctx)?.is_truthy() {
                    continue;
                }
            }
            let other = trailing_window(&windows, id, ctx, n, &window_column, &text_owned)?;
            if let Some(r) = corr(&own, &other) {
                best = Some(best.map_or(r, |b| b.max(r)));
            }
        }
        Ok(Value::Num(best.unwrap_or(0.0)))
    }))
}

fn trailing_window(
    windows: &HashMap<String, Vec<Point>>,
    id: &str,
    ctx: &EvalContext,
    n: usize,
    column: &str,
    text: &str,
) -> Result<Vec<f64>, CollectError> {
    let data = windows
        .get(id)
        .ok_or_else(|| CollectError::Lookup(format!("no window data for {} in {}", id, text)))?;
    //window ends at the current bucket, inclusive when aligned
    let mut end = data.partition_point(|p| p.temporal() < ctx.row.key);
    if end < data.len() && data[end].temporal() == ctx.row.key {
        end += 1;
    }
    let start = end.saturating_sub(n);
    Ok(data[start..end]
        .iter()
        .filter_map(|p| p.get(column).as_f64())
        .collect())
}

//duration must fold to a literal positive integer at compile time
fn fold_positive_integer(expr: &Expr, text: &str) -> Result<usize, CollectError> {
    let folded = compile_local(expr)
        .and_then(|e| eval_point(&e, &Point::new("", "", 0)))
        .ok()
        .and_then(|v| v.as_f64());
    match folded {
        Some(n) if n > 0.0 && n.fract() == 0.0 && n.is_finite() => Ok(n as usize),
        _ => Err(CollectError::Usage(format!(
            "expected a literal positive integer duration in {}",
            text
        ))),
    }
}

///Pearson correlation over the trailing overlap of two windows. `None` when
///fewer than two aligned observations or when either side has no variance.
fn corr(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let m = xs.len().min(ys.len());
    if m < 2 {
        return None;
    }
    let xs = &xs[xs.len() - m..];
    let ys = &ys[ys.len() - m..];
    let mean_x = xs.iter().sum::<f64>() / m as f64;
    let mean_y = ys.iter().sum::<f64>() / m as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some(cov / denom)
}
