//! The filter expression mini-language: a hand-written recursive-descent
//! compiler (see `parser.rs`, `lexer.rs`) over a static field schema
//! (`fields.rs`), plus the simple numeric filter and the auto-filter
//! tracker built on top of the same evaluator.

pub mod ast;
pub mod fields;
pub mod lexer;
pub mod parser;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use indexmap::IndexMap;
use regex::RegexBuilder;

use crate::error::{Error, Result};
use crate::item::FuzzResult;

use ast::{CmpOp, Expr, OpCall, Rhs, Term, TermValue};
use fields::FieldValue;

/// A compiled `FuzzResFilter` expression: `is_visible` decides whether a
/// result survives the filter stage, with an optional baseline snapshot for
/// expressions that diff against it.
pub struct FuzzResFilter {
    source: String,
    expr: Expr,
    baseline: Mutex<Option<FuzzResult>>,
    unique_seen: Mutex<HashMap<usize, HashSet<String>>>,
}

impl FuzzResFilter {
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
            baseline: Mutex::new(None),
            unique_seen: Mutex::new(HashMap::new()),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_baseline(&self, result: FuzzResult) {
        *self.baseline.lock().unwrap() = Some(result);
    }

    pub fn is_visible(&self, result: &FuzzResult) -> Result<bool> {
        self.eval(&self.expr, result)
    }

    fn eval(&self, expr: &Expr, result: &FuzzResult) -> Result<bool> {
        match expr {
            Expr::And(a, b) => Ok(self.eval(a, result)? && self.eval(b, result)?),
            Expr::Or(a, b) => Ok(self.eval(a, result)? || self.eval(b, result)?),
            Expr::Not(inner) => Ok(!self.eval(inner, result)?),
            Expr::Cmp { left, op, right } => self.eval_cmp(left, *op, right, result),
        }
    }

    fn eval_term(&self, term: &Term, result: &FuzzResult) -> Result<FieldValue> {
        let mut value = match &term.value {
            TermValue::Field(name) => fields::get(name, result)?,
            TermValue::Int(n) => FieldValue::Int(*n),
            TermValue::Str(s) => FieldValue::Str(s.clone()),
        };
        for op in &term.ops {
            value = self.apply_op(op, value)?;
        }
        Ok(value)
    }

    fn apply_op(&self, op: &OpCall, value: FieldValue) -> Result<FieldValue> {
        Ok(match op {
            OpCall::Unquote => FieldValue::Str(
                percent_encoding::percent_decode_str(&value.as_str())
                    .decode_utf8_lossy()
                    .into_owned(),
            ),
            OpCall::Upper => FieldValue::Str(value.as_str().to_uppercase()),
            OpCall::Lower => FieldValue::Str(value.as_str().to_lowercase()),
            OpCall::StartsWith(prefix) => {
                FieldValue::Int(value.as_str().starts_with(prefix.as_str()) as i64)
            }
            OpCall::Replace(from, to) => FieldValue::Str(value.as_str().replace(from, to)),
            OpCall::Unique(id) => {
                let key = value.as_str();
                let mut seen = self.unique_seen.lock().unwrap();
                let set = seen.entry(*id).or_default();
                let first_time = set.insert(key);
                FieldValue::Int(first_time as i64)
            }
        })
    }

    fn eval_cmp(&self, left: &Term, op: CmpOp, right: &Rhs, result: &FuzzResult) -> Result<bool> {
        let left_value = self.eval_term(left, result)?;

        if matches!(op, CmpOp::Assign | CmpOp::AddAssign | CmpOp::SubAssign) {
            return Err(Error::IncorrectFilter(
                "assignment operators are only valid in --script-args, not --filter".into(),
            ));
        }

        let right_value = match right {
            Rhs::Xxx => FieldValue::Int(crate::item::ERROR_CODE as i64),
            Rhs::Term(term) => self.eval_term(term, result)?,
        };

        Ok(match op {
            CmpOp::Eq => left_value.as_str() == right_value.as_str(),
            CmpOp::Ne => left_value.as_str() != right_value.as_str(),
            CmpOp::Lt => left_value.as_i64().unwrap_or(0) < right_value.as_i64().unwrap_or(0),
            CmpOp::Gt => left_value.as_i64().unwrap_or(0) > right_value.as_i64().unwrap_or(0),
            CmpOp::Le => left_value.as_i64().unwrap_or(0) <= right_value.as_i64().unwrap_or(0),
            CmpOp::Ge => left_value.as_i64().unwrap_or(0) >= right_value.as_i64().unwrap_or(0),
            CmpOp::ReMatch => {
                let re = RegexBuilder::new(&right_value.as_str())
                    .multi_line(true)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|e| Error::IncorrectFilter(format!("bad regex: {e}")))?;
                re.is_match(&left_value.as_str())
            }
            CmpOp::Contains => left_value
                .as_str()
                .to_lowercase()
                .contains(&right_value.as_str().to_lowercase()),
            CmpOp::NotContains => !left_value
                .as_str()
                .to_lowercase()
                .contains(&right_value.as_str().to_lowercase()),
            CmpOp::ReNotMatch => unreachable!(),
            CmpOp::Assign | CmpOp::AddAssign | CmpOp::SubAssign => unreachable!(),
        })
    }
}

/// A conjunction of numeric predicates over status/lines/words/chars, plus
/// header show/hide sets — the `--hc/--sc/...` family, compiled without
/// touching the expression-language parser at all.
#[derive(Debug, Clone, Default)]
pub struct SimpleFilter {
    pub hide_codes: HashSet<u16>,
    pub hide_lines: HashSet<usize>,
    pub hide_words: HashSet<usize>,
    pub hide_chars: HashSet<usize>,
    pub show_codes: HashSet<u16>,
    pub show_lines: HashSet<usize>,
    pub show_words: HashSet<usize>,
    pub show_chars: HashSet<usize>,
}

impl SimpleFilter {
    pub fn is_visible(&self, result: &FuzzResult) -> bool {
        if self.hide_codes.contains(&result.code())
            || self.hide_lines.contains(&result.lines)
            || self.hide_words.contains(&result.words)
            || self.hide_chars.contains(&result.chars)
        {
            return false;
        }
        let has_show_rules = !self.show_codes.is_empty()
            || !self.show_lines.is_empty()
            || !self.show_words.is_empty()
            || !self.show_chars.is_empty();
        if !has_show_rules {
            return true;
        }
        self.show_codes.contains(&result.code())
            || self.show_lines.contains(&result.lines)
            || self.show_words.contains(&result.words)
            || self.show_chars.contains(&result.chars)
    }
}

/// Bounded, insertion-ordered occurrence tracker that promotes a recurring
/// `(code, lines, words)` signature into a live negated filter clause once
/// it has been seen `THRESHOLD` times.
pub struct AutoFilter {
    capacity: usize,
    threshold: u32,
    counts: Mutex<IndexMap<String, u32>>,
    clauses: Mutex<Vec<String>>,
}

const AUTO_FILTER_CAPACITY: usize = 15;
const AUTO_FILTER_THRESHOLD: u32 = 10;

impl AutoFilter {
    pub fn new() -> Self {
        Self {
            capacity: AUTO_FILTER_CAPACITY,
            threshold: AUTO_FILTER_THRESHOLD,
            counts: Mutex::new(IndexMap::new()),
            clauses: Mutex::new(Vec::new()),
        }
    }

    fn signature(result: &FuzzResult) -> String {
        format!(
            "c={} and l={} and w={}",
            result.code(),
            result.lines,
            result.words
        )
    }

    /// Records one observation. `HEAD` requests and 200 responses to them,
    /// plus transport errors, are exempt from both tracking and filtering.
    pub fn observe(&self, result: &FuzzResult) {
        if result.has_exception() || result.history.request.method == crate::item::Method::Head {
            return;
        }
        let signature = Self::signature(result);
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(signature.clone()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            counts.shift_remove(&signature);
            self.clauses
                .lock()
                .unwrap()
                .push(format!("not ({signature})"));
            return;
        }
        if counts.len() > self.capacity {
            counts.shift_remove_index(0);
        }
    }

    /// The live, recompiled filter reflecting every clause promoted so far,
    /// or `None` if nothing has crossed the threshold yet.
    pub fn compiled(&self) -> Result<Option<FuzzResFilter>> {
        let clauses = self.clauses.lock().unwrap();
        if clauses.is_empty() {
            return Ok(None);
        }
        let source = clauses.join(" and ");
        Ok(Some(FuzzResFilter::compile(&source)?))
    }
}

impl Default for AutoFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{HeaderList, Method, Request, Response};
    use std::time::Duration;

    fn result_with(code: u16, words: usize) -> FuzzResult {
        let mut r = FuzzResult::new(
            "http://h/x".into(),
            Request {
                method: Method::Get,
                url: "http://h/x".into(),
                headers: HeaderList::default(),
                body: None,
                follow_redirects: false,
            },
            crate::payload::PayloadManager::empty(),
        );
        let body = "w ".repeat(words);
        r.apply_response(
            Response {
                status: code,
                headers: HeaderList::default(),
                body: body.as_bytes().to_vec(),
                elapsed: Duration::default(),
            },
            &body,
        );
        r
    }

    #[test]
    fn equality_filter_matches_status() {
        let filter = FuzzResFilter::compile("c=200").unwrap();
        assert!(filter.is_visible(&result_with(200, 3)).unwrap());
        assert!(!filter.is_visible(&result_with(404, 3)).unwrap());
    }

    #[test]
    fn and_or_not_compose() {
        let filter = FuzzResFilter::compile("not (c=200 and w=3)").unwrap();
        assert!(!filter.is_visible(&result_with(200, 3)).unwrap());
        assert!(filter.is_visible(&result_with(200, 4)).unwrap());
    }

    #[test]
    fn numeric_comparison_on_words() {
        let filter = FuzzResFilter::compile("w>5").unwrap();
        assert!(filter.is_visible(&result_with(200, 6)).unwrap());
        assert!(!filter.is_visible(&result_with(200, 5)).unwrap());
    }

    #[test]
    fn simple_filter_hide_then_show() {
        let mut sf = SimpleFilter::default();
        sf.hide_codes.insert(404);
        assert!(!sf.is_visible(&result_with(404, 1)));
        assert!(sf.is_visible(&result_with(200, 1)));
    }

    #[test]
    fn auto_filter_promotes_after_threshold() {
        let auto = AutoFilter::new();
        for _ in 0..10 {
            auto.observe(&result_with(403, 12));
        }
        let compiled = auto.compiled().unwrap().unwrap();
        assert!(!compiled.is_visible(&result_with(403, 12)).unwrap());
        assert!(compiled.is_visible(&result_with(200, 12)).unwrap());
    }

    #[test]
    fn auto_filter_exempts_head_requests() {
        let auto = AutoFilter::new();
        let mut head = result_with(403, 12);
        head.history.request.method = Method::Head;
        for _ in 0..20 {
            auto.observe(&head);
        }
        assert!(auto.compiled().unwrap().is_none());
    }
}
