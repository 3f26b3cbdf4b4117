//!Evaluation primitives shared by the collection engine and the quote
//!sources.
//!
//!Evaluators are compiled once per request and then called synchronously per
//!candidate row. All state they may read is passed explicitly through
//![`EvalContext`]: the completed rows, the in-flight tentative row and the
//!candidate point most recently placed into it.

use std::fmt;
use std::sync::Arc;

use crate::collect::CollectError;
use crate::expr::Expr;
use crate::func;
use crate::types::{Key, Point, Value};

///One output row: the bucket's temporal key plus at most one point per
///security, keyed by `SYMBOL.EXCHANGE`. Slots keep their insertion order so
///flattened output preserves precedence order within a bucket.
#[derive(Clone, Debug)]
pub struct Row {
    pub key: Key,
    slots: Vec<(String, Point)>,
}

impl Row {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            slots: Vec::new(),
        }
    }

    pub fn insert(&mut self, id: String, point: Point) {
        match self.slots.iter_mut().find(|(slot, _)| *slot == id) {
            Some((_, existing)) => *existing = point,
            None => self.slots.push((id, point)),
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.slots.retain(|(slot, _)| slot != id);
    }

    pub fn get(&self, id: &str) -> Option<&Point> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == id)
            .map(|(_, point)| point)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Point> {
        self.slots
            .iter_mut()
            .find(|(slot, _)| slot == id)
            .map(|(_, point)| point)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Point)> {
        self.slots.iter().map(|(id, point)| (id.as_str(), point))
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.slots.iter().map(|(_, point)| point)
    }

    pub fn into_points(self) -> impl Iterator<Item = Point> {
        self.slots.into_iter().map(|(_, point)| point)
    }
}

///Read-only view handed to every evaluator invocation.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    ///Rows already appended to the result, oldest first.
    pub completed: &'a [Row],
    ///The tentative row being assembled for the current bucket.
    pub row: &'a Row,
    ///The candidate point most recently placed into `row`.
    pub current: &'a Point,
}

type EvalFn = dyn Fn(&EvalContext) -> Result<Value, CollectError> + Send + Sync;

///A compiled expression: a pure synchronous function of the evaluation
///context, labeled with the canonical text it was compiled from.
#[derive(Clone)]
pub struct Evaluator {
    text: String,
    f: Arc<EvalFn>,
}

impl Evaluator {
    pub fn new(
        text: impl Into<String>,
        f: impl Fn(&EvalContext) -> Result<Value, CollectError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            text: text.into(),
            f: Arc::new(f),
        }
    }

    pub fn constant(value: Value) -> Self {
        let text = value.to_string();
        Self::new(text, move |_| Ok(value.clone()))
    }

    ///Projects a named field from the candidate point.
    pub fn variable(name: &str) -> Self {
        let field = name.to_string();
        Self::new(name, move |ctx| Ok(ctx.current.get(&field)))
    }

    ///Projects a source-computed column by its full expression text.
    pub fn column(text: &str) -> Self {
        Self::variable(text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn call(&self, ctx: &EvalContext) -> Result<Value, CollectError> {
        (self.f)(ctx)
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Evaluator({})", self.text)
    }
}

///Compile an expression using constants, variables and common functions
///only. This is the row-scoped subset a source can apply per point when a
///filter is pushed down, and the subset rolling-function criteria may use.
pub fn compile_local(expr: &Expr) -> Result<Evaluator, CollectError> {
    match expr {
        Expr::Constant(value) => Ok(Evaluator::constant(value.clone())),
        Expr::Variable(name) => Ok(Evaluator::variable(name)),
        Expr::Call { name, args } => {
            let mut compiled = Vec::with_capacity(args.len());
            for arg in args {
                compiled.push(compile_local(arg)?);
            }
            func::common(name, &expr.text(), compiled).ok_or_else(|| {
                CollectError::Usage(format!(
                    "only common functions can be used here: {}",
                    expr.text()
                ))
            })
        }
    }
}

///Evaluate a pushdown filter against a single point, outside any bucket.
pub fn eval_point(evaluator: &Evaluator, point: &Point) -> Result<Value, CollectError> {
    let mut row = Row::new(point.temporal());
    row.insert(point.security_id(), point.clone());
    let ctx = EvalContext {
        completed: &[],
        row: &row,
        current: point,
    };
    evaluator.call(&ctx)
}
