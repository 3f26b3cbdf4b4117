//!Collection engine: fetches a portfolio of per-security series, merges them
//!into time-aligned cross-sections and reduces each cross-section with
//!compiled retain/precedence/column expressions.

mod bucket;
mod classify;
mod compile;
mod merge;

use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use futures::future::join_all;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::eval::Evaluator;
use crate::expr::{self, Expr};
use crate::source::{QuoteRequest, QuoteSource};
use crate::types::{Key, Point, Security};

pub use classify::{is_instrument, needed_columns, precedence_of, quote_criteria, Precedence};
pub use compile::Compiler;
pub use merge::BucketIter;

#[derive(Debug)]
pub enum CollectError {
    ///The request itself is malformed, detected before any fetch.
    Format(String),
    ///An expression is used in a place or way it cannot be.
    Usage(String),
    ///Data a compiled evaluator depends on is missing.
    Lookup(String),
    ///A source fetch failed.
    Source(anyhow::Error),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Format(msg) => write!(f, "format error: {}", msg),
            CollectError::Usage(msg) => write!(f, "usage error: {}", msg),
            CollectError::Lookup(msg) => write!(f, "lookup error: {}", msg),
            CollectError::Source(err) => write!(f, "source error: {}", err),
        }
    }
}

impl Error for CollectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectError::Source(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

///One collection request. `portfolio` is a comma separated list of
///`SYMBOL.EXCHANGE` ids; every other field is optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CollectRequest {
    pub portfolio: String,
    #[serde(default)]
    pub columns: Option<String>,
    #[serde(default)]
    pub retain: Option<String>,
    #[serde(default)]
    pub precedence: Option<String>,
    #[serde(default)]
    pub begin: Option<Key>,
    #[serde(default)]
    pub end: Option<Key>,
    #[serde(default)]
    pub now: Option<Key>,
    #[serde(default)]
    pub pad_begin: usize,
    #[serde(default)]
    pub pad_leading: usize,
    #[serde(default)]
    pub pad_end: usize,
}

///Splits a portfolio string into securities, rejecting any entry whose
///suffix is not a known exchange id before anything is fetched.
pub fn parse_portfolio(
    portfolio: &str,
    exchanges: &HashSet<String>,
) -> Result<Vec<Security>, CollectError> {
    let mut securities = Vec::new();
    for entry in portfolio.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parsed = entry.rfind('.').and_then(|idx| {
            let symbol = &entry[..idx];
            let exchange = &entry[idx + 1..];
            let valid = !symbol.is_empty()
                && !symbol.contains(char::is_whitespace)
                && exchanges.contains(exchange);
            valid.then(|| Security::new(symbol, exchange))
        });
        match parsed {
            Some(security) => securities.push(security),
            None => {
                return Err(CollectError::Format(format!(
                    "expected SYMBOL.EXCHANGE with a known exchange: {}",
                    entry
                )))
            }
        }
    }
    if securities.is_empty() {
        return Err(CollectError::Format("empty portfolio".to_string()));
    }
    Ok(securities)
}

///Top-level entry point. Holds the source and the set of known exchange ids;
///`collect` runs one request end to end.
pub struct Collector<S> {
    source: S,
    exchanges: HashSet<String>,
}

impl<S: QuoteSource> Collector<S> {
    pub fn new(source: S, exchanges: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            source,
            exchanges: exchanges.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn collect(&self, request: CollectRequest) -> Result<Vec<Point>, CollectError> {
        let portfolio = parse_portfolio(&request.portfolio, &self.exchanges)?;

        let columns =
            expr::parse_columns_map(request.columns.as_deref().unwrap_or("symbol"))
                .map_err(|e| CollectError::Usage(e.to_string()))?;
        let retain_conjuncts = match &request.retain {
            Some(text) => expr::parse_criteria_list(text)
                .map_err(|e| CollectError::Usage(e.to_string()))?,
            None => Vec::new(),
        };
        let precedence_exprs: Vec<Expr> = match &request.precedence {
            Some(text) => expr::parse_columns_map(text)
                .map_err(|e| CollectError::Usage(e.to_string()))?
                .into_iter()
                .map(|(_, expr)| expr)
                .collect(),
            None => Vec::new(),
        };

        //everything any evaluator can reference must come back from the source
        let mut referenced: Vec<Expr> = columns.iter().map(|(_, expr)| expr.clone()).collect();
        referenced.extend(retain_conjuncts.iter().cloned());
        referenced.extend(precedence_exprs.iter().cloned());
        let cached = classify::needed_columns(&referenced);
        let fetch_columns = cached.join(",");
        let pushdown = classify::quote_criteria(&retain_conjuncts);
        debug!(
            "collecting {} securities, columns [{}], pushdown {:?}",
            portfolio.len(),
            fetch_columns,
            pushdown
        );

        let fetches = portfolio.iter().map(|security| {
            self.source.quote(QuoteRequest {
                symbol: security.symbol.clone(),
                exchange: security.exchange.clone(),
                columns: fetch_columns.clone(),
                retain: pushdown.clone(),
                begin: request.begin,
                end: request.end,
                now: request.now,
                pad_begin: request.pad_begin,
                pad_leading: request.pad_leading,
                pad_end: request.pad_end,
            })
        });
        let mut dataset = Vec::with_capacity(portfolio.len());
        for fetched in join_all(fetches).await {
            dataset.push(fetched.map_err(CollectError::Source)?);
        }

        let mut compiler =
            compile::Compiler::new(&self.source, &self.exchanges, &dataset, &request, &cached);
        let retain = match expr::join_conjuncts(retain_conjuncts) {
            Some(expr) => Some(compiler.compile(&expr).await?),
            None => None,
        };
        if let Some(retain) = &retain {
            debug!("compiled retain {}", retain.text());
        }
        let mut compiled_columns: Vec<(String, Evaluator)> = Vec::with_capacity(columns.len());
        for (name, expr) in &columns {
            compiled_columns.push((name.clone(), compiler.compile(expr).await?));
        }
        let precedence = classify::precedence_of(&precedence_exprs, &cached)?;

        let mut rows = Vec::new();
        for (key, points) in merge::BucketIter::new(dataset) {
            bucket::process(
                key,
                points,
                &precedence,
                retain.as_ref(),
                &compiled_columns,
                &mut rows,
            )?;
        }

        //warm-up rows fetched before the window are discarded here
        if let Some(begin) = request.begin {
            let first = rows
                .iter()
                .position(|row| row.key >= begin)
                .unwrap_or(rows.len());
            let start = first.saturating_sub(request.pad_leading);
            rows.drain(..start);
        }

        debug!("collected {} rows", rows.len());
        Ok(rows.into_iter().flat_map(|row| row.into_points()).collect())
    }
}
