//! # What is Tabula?
//!
//! Tabula collects time-aligned cross-sections of quote data across a portfolio of
//! securities. Given a portfolio, a set of column expressions, an optional retain
//! predicate and optional precedence ordering, it fetches each security's series
//! concurrently, merges them into buckets that share a temporal key and reduces
//! each bucket with compiled evaluators into ordered output rows. It is the data
//! preparation layer a screening or backtesting frontend sits on top of.
//!
//! A collection is composed of:
//! - A quote source implementing [QuoteSource](crate::source::QuoteSource).
//! [Metis](crate::source::Metis) is the in-memory implementation used by tests and
//! benchmarks; [HttpQuoteSource](crate::source::http::HttpQuoteSource) reaches a
//! remote process serving the same contract over JSON.
//! - An expression language, parsed by [expr](crate::expr) and compiled into
//! synchronous evaluators by the engine. Expressions may reference fetched
//! columns, cross-sectional aggregates such as `COUNT()`, rolling functions such
//! as `MAXCORREL(...)` and external instruments by `SYMBOL.EXCHANGE(expr)`.
//! - The engine itself, [Collector](crate::collect::Collector), which runs one
//! [CollectRequest](crate::collect::CollectRequest) end to end.
//!
//! Compilation happens in two phases. Expressions that need their own data
//! (rolling windows, external references) resolve those fetches once, up front;
//! everything afterwards is a pure synchronous function of the evaluation
//! context, so driving the merge and bucket reduction involves no further I/O.

pub mod collect;
pub mod eval;
pub mod expr;
pub mod func;
pub mod source;
pub mod types;
