use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use derive_more::{Add, Display, From, Into, Sub};
use serde::{Deserialize, Serialize};
use time::macros::format_description;

pub const SECS_IN_DAY: i64 = 86_400;

///Name of the canonical temporal column. Every point exposes it as the
///day-truncated alias of its `ending` timestamp so that series from
///different sessions align on the same cross-section.
pub const TEMPORAL: &str = "date";

///Day-truncated temporal key. Points across securities that share a `Key`
///belong to the same cross-section.
#[derive(
    Add,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Into,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Sub,
)]
pub struct Key(i64);

impl Key {
    pub fn truncate(ending: i64) -> Self {
        Self(ending - ending.rem_euclid(SECS_IN_DAY))
    }

    ///Midnight key for a `YYYY-MM-DD` calendar date.
    pub fn from_date(date: &str) -> Result<Self, time::error::Parse> {
        let date = time::Date::parse(date, format_description!("[year]-[month]-[day]"))?;
        let days = date.to_julian_day() - time::macros::date!(1970 - 01 - 01).to_julian_day();
        Ok(Self(i64::from(days) * SECS_IN_DAY))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

///A single cell value. Columns hold strings, numbers, booleans or nothing.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Null => false,
        }
    }

    //Total order across types so that sort passes never panic: Null < Bool <
    //Num < Str, NaN below every other number.
    pub fn cmp_order(&self, other: &Value) -> Ordering {
        fn rank(value: &Value) -> u8 {
            match value {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Num(_) => 2,
                Value::Str(_) => 3,
            }
        }

        match (self, other) {
            (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
            (Value::Num(l), Value::Num(r)) => match (l.is_nan(), r.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => l.total_cmp(r),
            },
            (Value::Str(l), Value::Str(r)) => l.cmp(r),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_order(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Null => write!(f, "NULL"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Num(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Num(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

///One instrument in a portfolio.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Security {
    pub symbol: String,
    pub exchange: String,
}

impl Security {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }
}

///A single observation for one security. `symbol`, `exchange` and `ending`
///are structural; everything else lives in `columns`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Point {
    pub symbol: String,
    pub exchange: String,
    pub ending: i64,
    #[serde(default)]
    pub columns: BTreeMap<String, Value>,
}

impl Point {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, ending: i64) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            ending,
            columns: BTreeMap::new(),
        }
    }

    pub fn temporal(&self) -> Key {
        Key::truncate(self.ending)
    }

    pub fn security_id(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }

    ///Uniform column access. Structural fields take priority over free-form
    ///columns; unknown names resolve to `Null`.
    pub fn get(&self, name: &str) -> Value {
        match name {
            "symbol" => Value::Str(self.symbol.clone()),
            "exchange" => Value::Str(self.exchange.clone()),
            "ending" => Value::Num(self.ending as f64),
            TEMPORAL => Value::Num(self.temporal().as_i64() as f64),
            _ => self.columns.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.columns.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

pub fn is_structural(name: &str) -> bool {
    matches!(name, "symbol" | "exchange" | "ending" | TEMPORAL)
}

#[cfg(test)]
mod tests {
    use super::{Key, Point, Value, SECS_IN_DAY};

    #[test]
    fn test_that_keys_truncate_to_day_boundaries() {
        assert_eq!(Key::truncate(0), Key::from(0));
        assert_eq!(Key::truncate(SECS_IN_DAY - 1), Key::from(0));
        assert_eq!(Key::truncate(SECS_IN_DAY + 1), Key::from(SECS_IN_DAY));
    }

    #[test]
    fn test_that_calendar_dates_parse_to_midnight_keys() {
        assert_eq!(Key::from_date("1970-01-01").unwrap(), Key::from(0));
        assert_eq!(
            Key::from_date("1970-01-03").unwrap(),
            Key::from(2 * SECS_IN_DAY)
        );
        assert!(Key::from_date("not-a-date").is_err());
    }

    #[test]
    fn test_that_values_order_across_types() {
        assert!(Value::Null.cmp_order(&Value::Num(0.0)).is_lt());
        assert!(Value::Num(2.0).cmp_order(&Value::Num(10.0)).is_lt());
        assert!(Value::Num(f64::NAN).cmp_order(&Value::Num(-1.0)).is_lt());
        assert!(Value::Num(-1.0).cmp_order(&Value::Num(f64::NAN)).is_gt());
        assert!(Value::Num(f64::NAN)
            .cmp_order(&Value::Num(f64::NAN))
            .is_eq());
        assert!(Value::Str("a".into()).cmp_order(&Value::Num(1.0)).is_gt());
    }

    #[test]
    fn test_that_points_resolve_structural_columns() {
        let point = Point::new("AAA", "X", SECS_IN_DAY + 60).with("close", 10.5);
        assert_eq!(point.get("symbol"), Value::Str("AAA".into()));
        assert_eq!(point.get("date"), Value::Num(SECS_IN_DAY as f64));
        assert_eq!(point.get("close"), Value::Num(10.5));
        assert!(point.get("missing").is_null());
    }

    #[test]
    fn test_that_points_roundtrip_through_json() {
        let point = Point::new("AAA", "X", 100)
            .with("close", 10.5)
            .with("note", "thin");
        let json = serde_json::to_string(&point).unwrap();
        let back: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(point, back);
    }
}
