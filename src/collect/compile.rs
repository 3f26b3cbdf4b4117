//!Second phase of a collect call: resolves parsed expressions into
//!synchronous evaluators. Resolution is asynchronous because rolling
//!functions and external references issue their own source fetches; the
//!evaluators they produce are plain closures over the fetched data.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use log::debug;

use crate::collect::classify;
use crate::collect::{CollectError, CollectRequest};
use crate::eval::Evaluator;
use crate::expr::Expr;
use crate::func::{self, rolling};
use crate::source::{QuoteRequest, QuoteSource};
use crate::types::{Point, TEMPORAL};

///Compiles expressions against an already-fetched dataset. Expensive
///resolutions (rolling windows, external lookups) are memoized by canonical
///expression text, so an expression appearing in both retain and columns is
///fetched once.
pub struct Compiler<'a, S: QuoteSource> {
    source: &'a S,
    exchanges: &'a HashSet<String>,
    dataset: &'a [Vec<Point>],
    options: &'a CollectRequest,
    cached: &'a [String],
    memo: HashMap<String, Evaluator>,
}

impl<'a, S: QuoteSource> Compiler<'a, S> {
    pub fn new(
        source: &'a S,
        exchanges: &'a HashSet<String>,
        dataset: &'a [Vec<Point>],
        options: &'a CollectRequest,
        cached: &'a [String],
    ) -> Self {
        Self {
            source,
            exchanges,
            dataset,
            options,
            cached,
            memo: HashMap::new(),
        }
    }

    pub fn compile<'b>(&'b mut self, expr: &'b Expr) -> BoxFuture<'b, Result<Evaluator, CollectError>> {
        Box::pin(async move {
            match expr {
                Expr::Constant(value) => Ok(Evaluator::constant(value.clone())),
                Expr::Variable(name) => Ok(Evaluator::variable(name)),
                Expr::Call { name, args } => {
                    let text = expr.text();
                    //source-computed columns are projected, not re-evaluated
                    if self.cached.contains(&text) {
                        return Ok(Evaluator::column(&text));
                    }
                    if let Some(hit) = self.memo.get(&text) {
                        return Ok(hit.clone());
                    }
                    if func::is_common(name) {
                        let mut compiled = Vec::with_capacity(args.len());
                        for arg in args {
                            compiled.push(self.compile(arg).await?);
                        }
                        return func::common(name, &text, compiled).ok_or_else(|| {
                            CollectError::Usage(format!("wrong number of arguments: {}", text))
                        });
                    }
                    if rolling::has(name) {
                        debug!("resolving rolling function {}", text);
                        let evaluator =
                            rolling::rolling(expr, self.source, self.dataset, self.options)
                                .await?
                                .ok_or_else(|| {
                                    CollectError::Usage(format!("unknown function {}", text))
                                })?;
                        self.memo.insert(text, evaluator.clone());
                        return Ok(evaluator);
                    }
                    if classify::is_instrument(name, self.exchanges) {
                        let evaluator = self.external(name, args, &text).await?;
                        self.memo.insert(text, evaluator.clone());
                        return Ok(evaluator);
                    }
                    //a dotted name that is not a known instrument is a
                    //malformed external reference, not an unknown function
                    if name.contains('.') {
                        return Err(CollectError::Format(format!(
                            "unrecognised external reference {}",
                            text
                        )));
                    }
                    Err(CollectError::Usage(format!("unknown function {}", text)))
                }
            }
        })
    }

    //An external reference `SYMBOL.EXCHANGE(expr)` fetches the instrument's
    //series over the dataset's span and resolves per bucket to the latest
    //value at or before the bucket key.
    async fn external(
        &self,
        name: &str,
        args: &[Expr],
        text: &str,
    ) -> Result<Evaluator, CollectError> {
        if args.len() != 1 {
            return Err(CollectError::Usage(format!(
                "external references take a single expression: {}",
                text
            )));
        }
        let idx = name.rfind('.').unwrap();
        let symbol = &name[..idx];
        let exchange = &name[idx + 1..];
        let column = args[0].text();

        let begin = self
            .dataset
            .iter()
            .filter_map(|data| data.first())
            .map(|p| p.temporal())
            .min();
        let end = self
            .dataset
            .iter()
            .filter_map(|data| data.last())
            .map(|p| p.temporal())
            .max();

        debug!("resolving external reference {}", text);
        let data = self
            .source
            .quote(QuoteRequest {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                columns: format!("{},{}", TEMPORAL, column),
                retain: None,
                begin,
                end,
                now: self.options.now,
                pad_begin: 1,
                pad_leading: 0,
                pad_end: 0,
            })
            .await
            .map_err(CollectError::Source)?;
        if data.is_empty() {
            return Err(CollectError::Lookup(format!(
                "no data for external reference {}",
                text
            )));
        }

        Ok(Evaluator::new(text, move |ctx| {
            let key = ctx.row.key;
            let mut idx = data.partition_point(|p| p.temporal() < key);
            if idx >= data.len() {
                idx = data.len() - 1;
            } else if data[idx].temporal() > key && idx > 0 {
                idx -= 1;
            }
            Ok(data[idx].get(&column))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::Compiler;
    use crate::collect::CollectRequest;
    use crate::eval::EvalContext;
    use crate::eval::Row;
    use crate::expr::parse;
    use crate::source::{Metis, MetisBuilder};
    use crate::types::{Key, Point, Value, SECS_IN_DAY};
    use std::collections::HashSet;

    fn day(n: i64) -> i64 {
        n * SECS_IN_DAY + 57_600
    }

    fn spy() -> Metis {
        let mut builder = MetisBuilder::new();
        for n in 0..5 {
            builder.add(Point::new("SPY", "ARCA", day(n)).with("close", 400.0 + n as f64));
        }
        builder.build()
    }

    fn exchanges() -> HashSet<String> {
        ["ARCA".to_string()].into_iter().collect()
    }

    fn context_at<'a>(row: &'a Row, point: &'a Point) -> EvalContext<'a> {
        EvalContext {
            completed: &[],
            row,
            current: point,
        }
    }

    #[tokio::test]
    async fn test_that_external_references_resolve_as_of_the_bucket_key() {
        let source = spy();
        let exchanges = exchanges();
        let dataset = vec![vec![Point::new("AAA", "ARCA", day(0)), Point::new("AAA", "ARCA", day(4))]];
        let options = CollectRequest::default();
        let mut compiler = Compiler::new(&source, &exchanges, &dataset, &options, &[]);

        let evaluator = compiler
            .compile(&parse("SPY.ARCA(close)").unwrap())
            .await
            .unwrap();

        let point = Point::new("AAA", "ARCA", day(2));
        let mut row = Row::new(Key::truncate(day(2)));
        row.insert(point.security_id(), point.clone());
        let value = evaluator.call(&context_at(&row, &point)).unwrap();
        assert_eq!(value, Value::Num(402.0));
    }

    #[tokio::test]
    async fn test_that_external_lookups_step_back_to_the_latest_prior_point() {
        let source = spy();
        let exchanges = exchanges();
        let dataset = vec![vec![Point::new("AAA", "ARCA", day(0)), Point::new("AAA", "ARCA", day(4))]];
        let options = CollectRequest::default();
        let mut compiler = Compiler::new(&source, &exchanges, &dataset, &options, &[]);

        let evaluator = compiler
            .compile(&parse("SPY.ARCA(close)").unwrap())
            .await
            .unwrap();

        //a key beyond the fetched series falls back to its final point
        let point = Point::new("AAA", "ARCA", day(9));
        let mut row = Row::new(Key::truncate(day(9)));
        row.insert(point.security_id(), point.clone());
        let value = evaluator.call(&context_at(&row, &point)).unwrap();
        assert_eq!(value, Value::Num(404.0));
    }

    #[tokio::test]
    async fn test_that_unknown_functions_are_usage_errors() {
        let source = spy();
        let exchanges = exchanges();
        let dataset = Vec::new();
        let options = CollectRequest::default();
        let mut compiler = Compiler::new(&source, &exchanges, &dataset, &options, &[]);

        let err = compiler
            .compile(&parse("WAVG(close)").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("WAVG"));
    }

    #[tokio::test]
    async fn test_that_cached_expressions_compile_to_column_projections() {
        let source = spy();
        let exchanges = exchanges();
        let dataset = Vec::new();
        let options = CollectRequest::default();
        let cached = vec!["close - open".to_string()];
        let mut compiler = Compiler::new(&source, &exchanges, &dataset, &options, &cached);

        let evaluator = compiler
            .compile(&parse("close - open").unwrap())
            .await
            .unwrap();

        //the value comes from the projected column, not a local subtraction
        let point = Point::new("AAA", "ARCA", day(0)).with("close - open", 7.0);
        let mut row = Row::new(Key::truncate(day(0)));
        row.insert(point.security_id(), point.clone());
        let value = evaluator.call(&context_at(&row, &point)).unwrap();
        assert_eq!(value, Value::Num(7.0));
    }
}
