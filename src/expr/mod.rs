//!Expression trees for column, retain and precedence specifications.
//!
//!Expressions arrive as text (`"volume > 100 AND COUNT() <= 2"`), are parsed
//!into a tagged tree and are compiled elsewhere. The canonical rendering of a
//!node (`Expr::text`) is the identity used for memoization and for matching
//!source-fetched column names, so parse → render → parse is stable.

use std::fmt;

use crate::types::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(Value),
    Variable(String),
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    ///Canonical, minimally parenthesized rendering.
    pub fn text(&self) -> String {
        match self {
            Expr::Constant(value) => value.to_string(),
            Expr::Variable(name) => name.clone(),
            Expr::Call { name, args } => match name.as_str() {
                "NEG" => format!("-{}", render_operand(&args[0], precedence_of("NEG"))),
                "NOT" => format!("NOT {}", render_operand(&args[0], precedence_of("NOT"))),
                op if is_operator(op) => {
                    let prec = precedence_of(op);
                    format!(
                        "{} {} {}",
                        render_operand(&args[0], prec),
                        op,
                        //right operand of equal precedence keeps its parens
                        render_right(&args[1], prec)
                    )
                }
                _ => {
                    let rendered: Vec<String> = args.iter().map(|a| a.text()).collect();
                    format!("{}({})", name, rendered.join(","))
                }
            },
        }
    }
}

fn is_operator(name: &str) -> bool {
    matches!(
        name,
        "OR" | "AND" | "=" | "!=" | "<" | "<=" | ">" | ">=" | "+" | "-" | "*" | "/" | "%"
    )
}

fn precedence_of(name: &str) -> u8 {
    match name {
        "OR" => 1,
        "AND" => 2,
        "NOT" => 3,
        "=" | "!=" | "<" | "<=" | ">" | ">=" => 4,
        "+" | "-" => 5,
        "*" | "/" | "%" => 6,
        "NEG" => 7,
        _ => 8,
    }
}

fn expr_precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Call { name, .. } if is_operator(name) || name == "NOT" || name == "NEG" => {
            precedence_of(name)
        }
        _ => 8,
    }
}

fn render_operand(expr: &Expr, parent: u8) -> String {
    if expr_precedence(expr) < parent {
        format!("({})", expr.text())
    } else {
        expr.text()
    }
}

fn render_right(expr: &Expr, parent: u8) -> String {
    if expr_precedence(expr) <= parent {
        format!("({})", expr.text())
    } else {
        expr.text()
    }
}

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

///Parse a single expression, requiring the whole input to be consumed.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_or()?;
    parser.skip_whitespace();
    if parser.pos < parser.input.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

///Parse a comma separated list of column expressions, keyed by canonical
///text. Commas inside parentheses or quotes do not split.
pub fn parse_columns_map(csv: &str) -> Result<Vec<(String, Expr)>, ParseError> {
    let mut map: Vec<(String, Expr)> = Vec::new();
    for part in split_top_level(csv) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let expr = parse(trimmed)?;
        let key = expr.text();
        if !map.iter().any(|(name, _)| name == &key) {
            map.push((key, expr));
        }
    }
    Ok(map)
}

///Parse a comma separated list of criteria; entries are implicitly ANDed by
///the caller.
pub fn parse_criteria_list(csv: &str) -> Result<Vec<Expr>, ParseError> {
    let mut list = Vec::new();
    for part in split_top_level(csv) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        list.push(parse(trimmed)?);
    }
    Ok(list)
}

///Flatten nested top-level ANDs into a conjunct list.
pub fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::Call { name, args } if name == "AND" && args.len() == 2 => {
            let mut out = split_conjuncts(&args[0]);
            out.extend(split_conjuncts(&args[1]));
            out
        }
        _ => vec![expr.clone()],
    }
}

///Join a conjunct list back into one AND expression.
pub fn join_conjuncts(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts
        .into_iter()
        .reduce(|acc, next| Expr::call("AND", vec![acc, next]))
}

fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (i, ch) in input.char_indices() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    parts.push(&input[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&input[start..]);
    parts
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let remaining = self.remaining();
        if remaining.starts_with(keyword) {
            let boundary = remaining[keyword.len()..]
                .chars()
                .next()
                .map(|c| !is_ident_char(c))
                .unwrap_or(true);
            if boundary {
                self.pos += keyword.len();
                return true;
            }
        }
        false
    }

    fn consume_operator(&mut self, candidates: &[&str]) -> Option<&'static str> {
        self.skip_whitespace();
        //longest tokens first so "<=" wins over "<"
        const TOKENS: &[&str] = &["!=", "<=", ">=", "<", ">", "=", "+", "-", "*", "/", "%"];
        for &token in TOKENS {
            if candidates.contains(&token) && self.remaining().starts_with(token) {
                self.pos += token.len();
                return Some(token);
            }
        }
        None
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.consume_keyword("OR") {
            let right = self.parse_and()?;
            left = Expr::call("OR", vec![left, right]);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.consume_keyword("AND") {
            let right = self.parse_not()?;
            left = Expr::call("AND", vec![left, right]);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.consume_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expr::call("NOT", vec![inner]));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        if let Some(op) = self.consume_operator(&["=", "!=", "<", "<=", ">", ">="]) {
            let right = self.parse_additive()?;
            return Ok(Expr::call(op, vec![left, right]));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.consume_operator(&["+", "-"]) {
            let right = self.parse_multiplicative()?;
            left = Expr::call(op, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.consume_operator(&["*", "/", "%"]) {
            let right = self.parse_unary()?;
            left = Expr::call(op, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.peek() == Some('-') {
            self.advance();
            let inner = self.parse_unary()?;
            //fold literal negation so "-1" stays a constant
            if let Expr::Constant(Value::Num(n)) = inner {
                return Ok(Expr::Constant(Value::Num(-n)));
            }
            return Ok(Expr::call("NEG", vec![inner]));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.advance();
                let inner = self.parse_or()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.advance();
                Ok(inner)
            }
            Some('\'') | Some('"') => self.parse_string(),
            Some(ch) if ch.is_ascii_digit() => self.parse_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.parse_identifier(),
            Some(ch) => Err(self.error(format!("unexpected character '{}'", ch))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, ParseError> {
        let quote = self.advance().unwrap();
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == quote {
                let text = self.input[start..self.pos].to_string();
                self.advance();
                return Ok(Expr::Constant(Value::Str(text)));
            }
            self.advance();
        }
        Err(self.error("unterminated string literal"))
    }

    fn parse_number(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(|n| Expr::Constant(Value::Num(n)))
            .map_err(|_| ParseError {
                message: format!("invalid number '{}'", text),
                position: start,
            })
    }

    fn parse_identifier(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if is_ident_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        let name = self.input[start..self.pos].to_string();
        match name.as_str() {
            "TRUE" => return Ok(Expr::Constant(Value::Bool(true))),
            "FALSE" => return Ok(Expr::Constant(Value::Bool(false))),
            "NULL" => return Ok(Expr::Constant(Value::Null)),
            _ => {}
        }
        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.advance();
            let mut args = Vec::new();
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                return Ok(Expr::call(name, args));
            }
            loop {
                args.push(self.parse_or()?);
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => {
                        self.advance();
                    }
                    Some(')') => {
                        self.advance();
                        return Ok(Expr::call(name, args));
                    }
                    _ => return Err(self.error("expected ',' or ')' in argument list")),
                }
            }
        }
        Ok(Expr::Variable(name))
    }
}

//identifiers may carry dots so external references like AAA.X stay one name
fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.'
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_columns_map, split_conjuncts, Expr};
    use crate::types::Value;

    #[test]
    fn test_that_operator_precedence_nests_correctly() {
        let expr = parse("volume > 100 AND rank < 3 OR closed").unwrap();
        assert_eq!(expr.text(), "volume > 100 AND rank < 3 OR closed");
        match &expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "OR");
                assert_eq!(args[0].text(), "volume > 100 AND rank < 3");
            }
            _ => panic!("expected OR at the root"),
        }
    }

    #[test]
    fn test_that_arithmetic_binds_tighter_than_comparison() {
        let expr = parse("close - open > 2 * spread").unwrap();
        match &expr {
            Expr::Call { name, args } => {
                assert_eq!(name, ">");
                assert_eq!(args[0].text(), "close - open");
                assert_eq!(args[1].text(), "2 * spread");
            }
            _ => panic!("expected comparison at the root"),
        }
    }

    #[test]
    fn test_that_dotted_names_parse_as_single_references() {
        let expr = parse("SPY.ARCA(close)").unwrap();
        match &expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "SPY.ARCA");
                assert_eq!(args[0], Expr::Variable("close".into()));
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_that_canonical_text_is_stable_under_reparse() {
        for input in [
            "COUNT() <= 1",
            "MAXCORREL(60,close,'volume > 0')",
            "(a + b) * c",
            "NOT (a OR b)",
            "-close + 1",
        ] {
            let text = parse(input).unwrap().text();
            assert_eq!(parse(&text).unwrap().text(), text);
        }
    }

    #[test]
    fn test_that_columns_map_splits_on_top_level_commas_only() {
        let map = parse_columns_map("symbol,MAXCORREL(60,close),volume").unwrap();
        let names: Vec<&str> = map.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["symbol", "MAXCORREL(60,close)", "volume"]);
    }

    #[test]
    fn test_that_conjuncts_flatten_nested_ands() {
        let expr = parse("a AND b AND c > 1").unwrap();
        let conjuncts = split_conjuncts(&expr);
        let texts: Vec<String> = conjuncts.iter().map(|c| c.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c > 1"]);
    }

    #[test]
    fn test_that_literals_parse_into_constants() {
        assert_eq!(parse("1.5").unwrap(), Expr::Constant(Value::Num(1.5)));
        assert_eq!(parse("-2").unwrap(), Expr::Constant(Value::Num(-2.0)));
        assert_eq!(
            parse("'thin'").unwrap(),
            Expr::Constant(Value::Str("thin".into()))
        );
        assert_eq!(parse("TRUE").unwrap(), Expr::Constant(Value::Bool(true)));
    }

    #[test]
    fn test_that_malformed_input_reports_position() {
        let err = parse("volume >").unwrap_err();
        assert!(err.position > 0);
        assert!(parse("a AND").is_err());
        assert!(parse("f(a,").is_err());
    }
}
