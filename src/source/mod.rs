//!Quote sources: the collaborator that produces per-security series. The
//!engine only assumes the [`QuoteSource`] contract; `Metis` is the in-memory
//!implementation used by tests and benchmarks, `http` reaches a remote
//!process.

pub mod http;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use rand::thread_rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::eval::{compile_local, eval_point, Evaluator};
use crate::expr;
use crate::types::{is_structural, Key, Point, Value, SECS_IN_DAY};

///One per-security fetch. `columns` is a comma separated list of column
///expressions; `retain` an optional pushed-down filter evaluated per point.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct QuoteRequest {
    pub symbol: String,
    pub exchange: String,
    pub columns: String,
    #[serde(default)]
    pub retain: Option<String>,
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

///Contract: the result is ascending by temporal key, already projected and
///filtered as requested, with `pad_begin + pad_leading` extra points before
///`begin` and `pad_end` after `end` where available.
pub trait QuoteSource: Send + Sync {
    fn quote(&self, request: QuoteRequest) -> impl Future<Output = Result<Vec<Point>>> + Send;
}

///In-memory quote source holding one sorted series per security.
#[derive(Clone, Debug)]
pub struct Metis {
    inner: HashMap<String, Vec<Point>>,
}

impl Metis {
    pub fn builder() -> MetisBuilder {
        MetisBuilder::new()
    }

    ///Random daily OHLCV-ish data for benchmarks, one point per symbol per
    ///day on the `SIM` exchange.
    pub fn random(days: i64, symbols: Vec<&str>) -> Self {
        let price_dist = Uniform::new(90.0, 100.0);
        let volume_dist = Uniform::new(100.0, 1000.0);
        let mut rng = thread_rng();

        let mut builder = MetisBuilder::new();
        for day in 0..days {
            let ending = day * SECS_IN_DAY + 57_600;
            for symbol in &symbols {
                let open = price_dist.sample(&mut rng);
                let close = price_dist.sample(&mut rng);
                builder.add(
                    Point::new(*symbol, "SIM", ending)
                        .with("open", open)
                        .with("close", close)
                        .with("volume", volume_dist.sample(&mut rng)),
                );
            }
        }
        builder.build()
    }

    ///Load a series file with `symbol,exchange,ending` plus free-form
    ///columns; numeric cells become numbers, everything else strings.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();
        for required in ["symbol", "exchange", "ending"] {
            if !headers.iter().any(|h| h == required) {
                bail!("csv is missing required column {}", required);
            }
        }

        let mut builder = MetisBuilder::new();
        for record in reader.records() {
            let record = record?;
            let field = |name: &str| {
                headers
                    .iter()
                    .position(|h| h == name)
                    .and_then(|i| record.get(i))
                    .unwrap_or("")
            };
            let raw = field("ending");
            //numeric epoch seconds, or a YYYY-MM-DD calendar date
            let ending: i64 = match raw.parse() {
                Ok(seconds) => seconds,
                Err(_) => Key::from_date(raw)
                    .map(|key| key.as_i64())
                    .with_context(|| format!("bad ending in {:?}", record))?,
            };
            let mut point = Point::new(field("symbol"), field("exchange"), ending);
            for (header, cell) in headers.iter().zip(record.iter()) {
                if matches!(header, "symbol" | "exchange" | "ending") || cell.is_empty() {
                    continue;
                }
                let value = cell
                    .parse::<f64>()
                    .map(Value::Num)
                    .unwrap_or_else(|_| Value::Str(cell.to_string()));
                point.set(header, value);
            }
            builder.add(point);
        }
        Ok(builder.build())
    }

    fn projection(&self, columns: &str) -> Result<Vec<(String, Evaluator)>> {
        let mut plan = Vec::new();
        for (name, parsed) in expr::parse_columns_map(columns).map_err(|e| anyhow!("{}", e))? {
            if is_structural(&name) {
                continue;
            }
            let evaluator = compile_local(&parsed)
                .with_context(|| format!("unsupported source column {}", name))?;
            plan.push((name, evaluator));
        }
        Ok(plan)
    }
}

impl QuoteSource for Metis {
    async fn quote(&self, request: QuoteRequest) -> Result<Vec<Point>> {
        let id = format!("{}.{}", request.symbol, request.exchange);
        let series = self
            .inner
            .get(&id)
            .with_context(|| format!("unknown security {}", id))?;

        let plan = self.projection(&request.columns)?;
        let filter = match &request.retain {
            Some(text) => {
                let parsed = expr::parse(text).map_err(|e| anyhow!("{}", e))?;
                Some(compile_local(&parsed)?)
            }
            None => None,
        };

        let mut projected = Vec::with_capacity(series.len());
        for point in series {
            if let Some(filter) = &filter {
                if !eval_point(filter, point)?.is_truthy() {
                    continue;
                }
            }
            let mut out = Point::new(&point.symbol, &point.exchange, point.ending);
            for (name, evaluator) in &plan {
                out.set(name, eval_point(evaluator, point)?);
            }
            projected.push(out);
        }

        let begin = match request.begin {
            Some(begin) => projected.partition_point(|p| p.temporal() < begin),
            None => 0,
        };
        let end = match request.end {
            Some(end) => projected.partition_point(|p| p.temporal() <= end),
            None => projected.len(),
        };
        let start = begin.saturating_sub(request.pad_begin + request.pad_leading);
        let stop = (end + request.pad_end).min(projected.len());
        Ok(projected[start..stop].to_vec())
    }
}

#[derive(Debug, Default)]
pub struct MetisBuilder {
    inner: HashMap<String, Vec<Point>>,
}

impl MetisBuilder {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn add(&mut self, point: Point) -> &mut Self {
        self.inner.entry(point.security_id()).or_default().push(point);
        self
    }

    pub fn build(&mut self) -> Metis {
        let mut inner = std::mem::take(&mut self.inner);
        for series in inner.values_mut() {
            series.sort_by_key(|p| p.ending);
        }
        Metis { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::{Metis, MetisBuilder, QuoteRequest, QuoteSource};
    use crate::types::{Key, Point, Value, SECS_IN_DAY};

    fn day(n: i64) -> i64 {
        n * SECS_IN_DAY + 57_600
    }

    fn sample() -> Metis {
        let mut builder = MetisBuilder::new();
        for n in 0..5 {
            builder.add(
                Point::new("AAA", "X", day(n))
                    .with("close", 10.0 + n as f64)
                    .with("volume", 100.0 * (n + 1) as f64),
            );
        }
        builder.build()
    }

    fn request(columns: &str) -> QuoteRequest {
        QuoteRequest {
            symbol: "AAA".into(),
            exchange: "X".into(),
            columns: columns.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_that_metis_projects_requested_columns() {
        let source = sample();
        let points = source.quote(request("symbol,close")).await.unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].get("close"), Value::Num(10.0));
        //unstored columns were not projected
        assert!(points[0].get("volume").is_null());
        //structural columns are always present
        assert_eq!(points[0].get("symbol"), Value::Str("AAA".into()));
    }

    #[tokio::test]
    async fn test_that_metis_computes_expression_columns() {
        let source = sample();
        let points = source.quote(request("close * 2")).await.unwrap();
        assert_eq!(points[1].get("close * 2"), Value::Num(22.0));
    }

    #[tokio::test]
    async fn test_that_metis_applies_pushdown_retain() {
        let source = sample();
        let mut req = request("close,volume");
        req.retain = Some("volume > 250".into());
        let points = source.quote(req).await.unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].get("volume"), Value::Num(300.0));
    }

    #[tokio::test]
    async fn test_that_metis_pads_before_the_begin_boundary() {
        let source = sample();
        let mut req = request("close");
        req.begin = Some(Key::truncate(day(2)));
        req.end = Some(Key::truncate(day(3)));
        req.pad_begin = 1;
        let points = source.quote(req).await.unwrap();
        let endings: Vec<i64> = points.iter().map(|p| p.ending).collect();
        assert_eq!(endings, vec![day(1), day(2), day(3)]);
    }

    #[tokio::test]
    async fn test_that_metis_fails_on_unknown_securities() {
        let source = sample();
        let mut req = request("close");
        req.symbol = "ZZZ".into();
        assert!(source.quote(req).await.is_err());
    }

    #[test]
    fn test_that_random_data_is_sorted_per_security() {
        let source = Metis::random(10, vec!["AAA", "BBB"]);
        for series in source.inner.values() {
            assert!(series.windows(2).all(|w| w[0].ending <= w[1].ending));
        }
    }
}
