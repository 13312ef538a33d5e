//! Typed aggregation plans over document collections.
//!
//! A [`Pipeline`] is a plain value: a target [`Collection`] plus an ordered
//! list of [`Stage`]s. Plans are assembled with the fluent methods below,
//! checked with [`Pipeline::validate`] and executed by
//! [`crate::store::aggregate`] against any document source.
//!
//! Field paths are dotted (`aa_searchterms.term`). Missing fields read as
//! absent, never as an error.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Number, Value};

use crate::error::StoreError;
use crate::window::{parse_instant, DateWindow};

pub type Document = Map<String, Value>;

/// Collections known to the store. Each maps to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    PageMetrics,
    Pages,
    Tasks,
    Projects,
    UxTests,
    Feedback,
    CallDrivers,
}

impl Collection {
    pub fn table_name(self) -> &'static str {
        match self {
            Collection::PageMetrics => "page_metrics",
            Collection::Pages => "pages",
            Collection::Tasks => "tasks",
            Collection::Projects => "projects",
            Collection::UxTests => "ux_tests",
            Collection::Feedback => "feedback",
            Collection::CallDrivers => "calldrivers",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A filter on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field parses as a date inside the window (inclusive).
    Between { path: String, window: DateWindow },
    /// Field equals one of the values, or, for array fields, any element does.
    /// An empty value set matches nothing.
    In { path: String, values: Vec<Value> },
}

impl Predicate {
    pub fn path(&self) -> &str {
        match self {
            Predicate::Between { path, .. } | Predicate::In { path, .. } => path,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Between { path, window } => get_path(doc, path)
                .and_then(Value::as_str)
                .and_then(parse_instant)
                .is_some_and(|instant| window.contains(instant)),
            Predicate::In { path, values } => match get_path(doc, path) {
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| values.iter().any(|value| values_equal(item, value))),
                Some(field) => values.iter().any(|value| values_equal(field, value)),
                None => false,
            },
        }
    }

    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, Predicate::In { values, .. } if values.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(String),
    /// Unweighted arithmetic mean of the numeric values; null when there are none.
    Avg(String),
    First(String),
    Count,
    /// Collects the grouped documents themselves.
    Push,
}

impl Accumulator {
    pub fn sum(path: &str) -> Self {
        Accumulator::Sum(path.to_string())
    }

    pub fn avg(path: &str) -> Self {
        Accumulator::Avg(path.to_string())
    }

    pub fn first(path: &str) -> Self {
        Accumulator::First(path.to_string())
    }

    fn evaluate(&self, members: &[Document]) -> Value {
        match self {
            Accumulator::Sum(path) => {
                let mut int_total: i64 = 0;
                let mut float_total = 0.0;
                let mut saw_float = false;
                for number in members.iter().filter_map(|doc| number_at(doc, path)) {
                    match number.as_i64() {
                        Some(int) if !saw_float => match int_total.checked_add(int) {
                            Some(total) => int_total = total,
                            None => saw_float = true,
                        },
                        _ => saw_float = true,
                    }
                    float_total += number.as_f64().unwrap_or(0.0);
                }
                if saw_float {
                    float_value(float_total)
                } else {
                    Value::from(int_total)
                }
            }
            Accumulator::Avg(path) => {
                let values: Vec<f64> = members
                    .iter()
                    .filter_map(|doc| number_at(doc, path))
                    .filter_map(|number| number.as_f64())
                    .collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    float_value(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Accumulator::First(path) => members
                .first()
                .and_then(|doc| get_path(doc, path))
                .cloned()
                .unwrap_or(Value::Null),
            Accumulator::Count => Value::from(members.len() as i64),
            Accumulator::Push => Value::Array(
                members
                    .iter()
                    .cloned()
                    .map(Value::Object)
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Field(String),
    /// One group spanning every input document.
    All,
}

/// Attach the foreign documents whose `foreign_field` equals `local_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: Collection,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

impl Lookup {
    /// Distinct local values the foreign fetch has to cover.
    pub fn local_keys(&self, docs: &[Document]) -> Vec<Value> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for doc in docs {
            let values = match get_path(doc, &self.local_field) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => continue,
                Some(value) => vec![value.clone()],
            };
            for value in values {
                if seen.insert(value.to_string()) {
                    keys.push(value);
                }
            }
        }
        keys
    }

    fn join(&self, docs: Vec<Document>, foreign: &[Document]) -> Vec<Document> {
        docs.into_iter()
            .map(|mut doc| {
                let matched: Vec<Value> = match get_path(&doc, &self.local_field) {
                    Some(local) => foreign
                        .iter()
                        .filter(|candidate| {
                            get_path(candidate, &self.foreign_field).is_some_and(|field| {
                                match local {
                                    Value::Array(items) => {
                                        items.iter().any(|item| values_equal(item, field))
                                    }
                                    _ => values_equal(local, field),
                                }
                            })
                        })
                        .cloned()
                        .map(Value::Object)
                        .collect(),
                    None => Vec::new(),
                };
                set_path(&mut doc, &self.as_field, Value::Array(matched));
                doc
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Vec<Predicate>),
    Unwind(String),
    Lowercase(String),
    Group {
        key: GroupKey,
        accumulators: Vec<(String, Accumulator)>,
    },
    Lookup(Lookup),
    /// Copy values from paths into top-level fields; absent paths become null.
    Set(Vec<(String, String)>),
    Unset(Vec<String>),
    Rename { from: String, to: String },
    Round { path: String, places: u32 },
    Sort(Vec<(String, SortOrder)>),
    Limit(usize),
}

impl Stage {
    /// Apply this stage. `foreign` is only consulted by `Lookup`.
    pub fn apply(&self, docs: Vec<Document>, foreign: &[Document]) -> Vec<Document> {
        match self {
            Stage::Match(predicates) => docs
                .into_iter()
                .filter(|doc| predicates.iter().all(|predicate| predicate.matches(doc)))
                .collect(),
            Stage::Unwind(path) => unwind(docs, path),
            Stage::Lowercase(path) => docs
                .into_iter()
                .map(|mut doc| {
                    if let Some(Value::String(text)) = get_path_mut(&mut doc, path) {
                        *text = text.to_lowercase();
                    }
                    doc
                })
                .collect(),
            Stage::Group { key, accumulators } => group(docs, key, accumulators),
            Stage::Lookup(lookup) => lookup.join(docs, foreign),
            Stage::Set(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    let values: Vec<(String, Value)> = fields
                        .iter()
                        .map(|(field, path)| {
                            (field.clone(), get_path(&doc, path).cloned().unwrap_or(Value::Null))
                        })
                        .collect();
                    for (field, value) in values {
                        doc.insert(field, value);
                    }
                    doc
                })
                .collect(),
            Stage::Unset(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    for field in fields {
                        doc.remove(field);
                    }
                    doc
                })
                .collect(),
            Stage::Rename { from, to } => docs
                .into_iter()
                .map(|mut doc| {
                    if let Some(value) = doc.remove(from) {
                        doc.insert(to.clone(), value);
                    }
                    doc
                })
                .collect(),
            Stage::Round { path, places } => docs
                .into_iter()
                .map(|mut doc| {
                    if let Some(slot) = get_path_mut(&mut doc, path) {
                        if let Some(number) = slot.as_f64() {
                            *slot = float_value(round_to(number, *places));
                        }
                    }
                    doc
                })
                .collect(),
            Stage::Sort(keys) => {
                let mut docs = docs;
                docs.sort_by(|a, b| {
                    keys.iter()
                        .map(|(path, order)| {
                            let ordering = compare_values(get_path(a, path), get_path(b, path));
                            match order {
                                SortOrder::Asc => ordering,
                                SortOrder::Desc => ordering.reverse(),
                            }
                        })
                        .find(|ordering| *ordering != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
                docs
            }
            Stage::Limit(limit) => docs.into_iter().take(*limit).collect(),
        }
    }
}

/// An aggregation plan against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    collection: Collection,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn on(collection: Collection) -> Self {
        Self {
            collection,
            stages: Vec::new(),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Add a predicate, merging into a directly preceding `Match` stage.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        match self.stages.last_mut() {
            Some(Stage::Match(predicates)) => predicates.push(predicate),
            _ => self.stages.push(Stage::Match(vec![predicate])),
        }
        self
    }

    pub fn match_window(self, path: &str, window: DateWindow) -> Self {
        self.filter(Predicate::Between {
            path: path.to_string(),
            window,
        })
    }

    pub fn match_in<I, V>(self, path: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Predicate::In {
            path: path.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn match_eq(self, path: &str, value: impl Into<Value>) -> Self {
        self.match_in(path, [value.into()])
    }

    pub fn unwind(mut self, path: &str) -> Self {
        self.stages.push(Stage::Unwind(path.to_string()));
        self
    }

    pub fn lowercase(mut self, path: &str) -> Self {
        self.stages.push(Stage::Lowercase(path.to_string()));
        self
    }

    pub fn group<I, N>(mut self, key: GroupKey, accumulators: I) -> Self
    where
        I: IntoIterator<Item = (N, Accumulator)>,
        N: Into<String>,
    {
        self.stages.push(Stage::Group {
            key,
            accumulators: accumulators
                .into_iter()
                .map(|(name, accumulator)| (name.into(), accumulator))
                .collect(),
        });
        self
    }

    pub fn lookup(mut self, from: Collection, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        self.stages.push(Stage::Lookup(Lookup {
            from,
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
        }));
        self
    }

    pub fn set(mut self, fields: &[(&str, &str)]) -> Self {
        self.stages.push(Stage::Set(
            fields
                .iter()
                .map(|(field, path)| (field.to_string(), path.to_string()))
                .collect(),
        ));
        self
    }

    pub fn unset(mut self, fields: &[&str]) -> Self {
        self.stages
            .push(Stage::Unset(fields.iter().map(|field| field.to_string()).collect()));
        self
    }

    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.stages.push(Stage::Rename {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn round(mut self, path: &str, places: u32) -> Self {
        self.stages.push(Stage::Round {
            path: path.to_string(),
            places,
        });
        self
    }

    pub fn sort(mut self, keys: &[(&str, SortOrder)]) -> Self {
        self.stages.push(Stage::Sort(
            keys.iter()
                .map(|(path, order)| (path.to_string(), *order))
                .collect(),
        ));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.stages.push(Stage::Limit(limit));
        self
    }

    /// True when some filter can never match, so the plan yields no rows.
    pub fn matches_nothing(&self) -> bool {
        self.stages.iter().any(|stage| match stage {
            Stage::Match(predicates) => predicates.iter().any(Predicate::is_unsatisfiable),
            _ => false,
        })
    }

    /// Leading filter predicates a source may push into its fetch, and the
    /// stages left to run afterwards.
    pub fn split_pushdown(&self) -> (&[Predicate], &[Stage]) {
        match self.stages.split_first() {
            Some((Stage::Match(predicates), rest)) => (predicates, rest),
            _ => (&[], &self.stages),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |message: String| Err(StoreError::InvalidPipeline(format!("{}: {}", self.collection, message)));

        for (index, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Match(predicates) if predicates.iter().any(|p| p.path().is_empty()) => {
                    return invalid(format!("stage {index}: predicate with empty path"));
                }
                Stage::Unwind(path) | Stage::Lowercase(path) | Stage::Round { path, .. }
                    if path.is_empty() =>
                {
                    return invalid(format!("stage {index}: empty path"));
                }
                Stage::Group { accumulators, .. } => {
                    if accumulators.is_empty() {
                        return invalid(format!("stage {index}: group without accumulators"));
                    }
                    let mut names = HashSet::new();
                    for (name, _) in accumulators {
                        if name == "_id" || !names.insert(name.as_str()) {
                            return invalid(format!("stage {index}: duplicate group field '{name}'"));
                        }
                    }
                }
                Stage::Lookup(lookup)
                    if lookup.local_field.is_empty()
                        || lookup.foreign_field.is_empty()
                        || lookup.as_field.is_empty() =>
                {
                    return invalid(format!("stage {index}: lookup with empty field"));
                }
                Stage::Sort(keys) if keys.is_empty() => {
                    return invalid(format!("stage {index}: sort without keys"));
                }
                Stage::Limit(0) => return invalid(format!("stage {index}: limit must be positive")),
                _ => {}
            }
        }
        Ok(())
    }
}

fn unwind(docs: Vec<Document>, path: &str) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let items = match get_path(&doc, path) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => continue,
            Some(_) => {
                out.push(doc.clone());
                continue;
            }
        };
        for item in items {
            let mut unwound = doc.clone();
            set_path(&mut unwound, path, item);
            out.push(unwound);
        }
    }
    out
}

fn group(docs: Vec<Document>, key: &GroupKey, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut keys: Vec<Value> = Vec::new();
    let mut buckets: Vec<Vec<Document>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in docs {
        let key_value = match key {
            GroupKey::Field(path) => get_path(&doc, path).cloned().unwrap_or(Value::Null),
            GroupKey::All => Value::Null,
        };
        let slot = match index.get(&key_value.to_string()) {
            Some(slot) => *slot,
            None => {
                index.insert(key_value.to_string(), buckets.len());
                keys.push(key_value);
                buckets.push(Vec::new());
                buckets.len() - 1
            }
        };
        buckets[slot].push(doc);
    }

    keys.into_iter()
        .zip(buckets)
        .map(|(key_value, members)| {
            let mut out = Document::new();
            out.insert("_id".to_string(), key_value);
            for (name, accumulator) in accumulators {
                out.insert(name.clone(), accumulator.evaluate(&members));
            }
            out
        })
        .collect()
}

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = doc.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

fn number_at<'a>(doc: &'a Document, path: &str) -> Option<&'a Number> {
    match get_path(doc, path)? {
        Value::Number(number) => Some(number),
        _ => None,
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Round to `places` decimals, halves to even.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round_ties_even() / factor
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Value) -> Vec<Document> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|value| value.as_object().unwrap().clone())
            .collect()
    }

    fn run(pipeline: &Pipeline, input: Vec<Document>) -> Vec<Value> {
        pipeline
            .stages()
            .iter()
            .fold(input, |acc, stage| stage.apply(acc, &[]))
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    #[test]
    fn match_in_covers_scalars_and_arrays() {
        let predicate = Predicate::In {
            path: "tasks".into(),
            values: vec![json!("t1")],
        };
        let rows = docs(json!([{ "tasks": ["t0", "t1"] }, { "tasks": "t1" }, { "tasks": ["t2"] }, {}]));
        let matched: Vec<bool> = rows.iter().map(|doc| predicate.matches(doc)).collect();
        assert_eq!(matched, vec![true, true, false, false]);
    }

    #[test]
    fn numbers_compare_across_representations() {
        let predicate = Predicate::In {
            path: "tpc_id".into(),
            values: vec![json!(7)],
        };
        assert!(predicate.matches(&docs(json!([{ "tpc_id": 7.0 }]))[0]));
    }

    #[test]
    fn empty_in_set_matches_nothing() {
        let pipeline = Pipeline::on(Collection::PageMetrics).match_in("url", Vec::<String>::new());
        assert!(pipeline.matches_nothing());
        assert!(run(&pipeline, docs(json!([{ "url": "/a" }]))).is_empty());
    }

    #[test]
    fn window_filter_is_inclusive() {
        let window = DateWindow::parse("2024-01-01/2024-01-02").unwrap();
        let pipeline = Pipeline::on(Collection::PageMetrics).match_window("date", window);
        let rows = docs(json!([
            { "date": "2024-01-01T00:00:00Z" },
            { "date": "2024-01-02" },
            { "date": "2024-01-03" },
            { "date": "not a date" },
        ]));
        assert_eq!(run(&pipeline, rows).len(), 2);
    }

    #[test]
    fn consecutive_filters_merge_into_one_stage() {
        let window = DateWindow::parse("2024-01-01/2024-01-02").unwrap();
        let pipeline = Pipeline::on(Collection::Feedback)
            .match_window("date", window)
            .match_in("url", ["/a"]);
        assert_eq!(pipeline.stages().len(), 1);
        let (pushdown, rest) = pipeline.split_pushdown();
        assert_eq!(pushdown.len(), 2);
        assert!(rest.is_empty());
    }

    #[test]
    fn group_sums_stay_integral() {
        let pipeline = Pipeline::on(Collection::PageMetrics).group(
            GroupKey::Field("url".into()),
            [
                ("visits", Accumulator::sum("visits")),
                ("ctr", Accumulator::avg("ctr")),
                ("rows", Accumulator::Count),
            ],
        );
        let rows = docs(json!([
            { "url": "/a", "visits": 10, "ctr": 0.5 },
            { "url": "/b", "visits": 5 },
            { "url": "/a", "visits": 2, "ctr": 0.25 },
        ]));
        assert_eq!(
            run(&pipeline, rows),
            vec![
                json!({ "_id": "/a", "visits": 12, "ctr": 0.375, "rows": 2 }),
                json!({ "_id": "/b", "visits": 5, "ctr": null, "rows": 1 }),
            ]
        );
    }

    #[test]
    fn group_over_nothing_yields_no_rows() {
        let pipeline = Pipeline::on(Collection::PageMetrics)
            .group(GroupKey::All, [("visits", Accumulator::sum("visits"))]);
        assert!(run(&pipeline, Vec::new()).is_empty());
    }

    #[test]
    fn unwind_lowercase_and_regroup() {
        let pipeline = Pipeline::on(Collection::PageMetrics)
            .unwind("terms")
            .lowercase("terms.term")
            .group(
                GroupKey::Field("terms.term".into()),
                [("clicks", Accumulator::sum("terms.clicks"))],
            )
            .rename("_id", "term");
        let rows = docs(json!([
            { "terms": [{ "term": "Tax", "clicks": 5 }, { "term": "tax", "clicks": 3 }] },
            { "terms": [] },
            { "other": 1 },
        ]));
        assert_eq!(run(&pipeline, rows), vec![json!({ "term": "tax", "clicks": 8 })]);
    }

    #[test]
    fn lookup_attaches_matching_foreign_docs() {
        let lookup = Lookup {
            from: Collection::Pages,
            local_field: "page".into(),
            foreign_field: "_id".into(),
            as_field: "page".into(),
        };
        let rows = docs(json!([{ "page": "p1" }, { "page": "p1" }, { "page": "p9" }]));
        assert_eq!(lookup.local_keys(&rows), vec![json!("p1"), json!("p9")]);

        let foreign = docs(json!([{ "_id": "p1", "title": "One" }, { "_id": "p2" }]));
        let joined = Stage::Lookup(lookup).apply(rows, &foreign);
        assert_eq!(joined[0]["page"], json!([{ "_id": "p1", "title": "One" }]));
        assert_eq!(joined[2]["page"], json!([]));
    }

    #[test]
    fn sort_is_stable_and_puts_missing_first() {
        let pipeline = Pipeline::on(Collection::Pages).sort(&[("title", SortOrder::Asc)]);
        let rows = docs(json!([
            { "title": "b", "n": 1 },
            { "n": 2 },
            { "title": "a", "n": 3 },
            { "title": "b", "n": 4 },
        ]));
        let order: Vec<Value> = run(&pipeline, rows).into_iter().map(|doc| doc["n"].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(3), json!(1), json!(4)]);
    }

    #[test]
    fn set_and_round() {
        let pipeline = Pipeline::on(Collection::Pages)
            .set(&[("title", "page.title"), ("missing", "page.nope")])
            .unset(&["page"])
            .round("score", 2);
        let rows = docs(json!([{ "page": { "title": "T" }, "score": 1.23456 }]));
        assert_eq!(
            run(&pipeline, rows),
            vec![json!({ "title": "T", "missing": null, "score": 1.23 })]
        );
    }

    #[test]
    fn round_sends_halves_to_even() {
        assert_eq!(round_to(2.125, 2), 2.12);
        assert_eq!(round_to(2.375, 2), 2.38);
        assert_eq!(round_to(-0.125, 2), -0.12);
        assert_eq!(round_to(0.5, 0), 0.0);
        assert_eq!(round_to(1.5, 0), 2.0);

        let pipeline = Pipeline::on(Collection::Pages).round("position", 2);
        let rows = docs(json!([{ "position": 3.125 }]));
        assert_eq!(run(&pipeline, rows), vec![json!({ "position": 3.12 })]);
    }

    #[test]
    fn integer_sum_overflow_falls_back_to_float() {
        let pipeline = Pipeline::on(Collection::PageMetrics).group(GroupKey::All, [("visits", Accumulator::sum("visits"))]);
        let rows = docs(json!([{ "visits": i64::MAX }, { "visits": 1 }]));
        let out = run(&pipeline, rows);
        let total = out[0]["visits"].as_f64().unwrap();
        assert!(out[0]["visits"].is_f64());
        assert!((total - 9.223372036854775808e18).abs() < 1e4);
    }

    #[test]
    fn validation_rejects_malformed_plans() {
        let zero_limit = Pipeline::on(Collection::Pages).limit(0);
        assert!(zero_limit.validate().is_err());

        let duplicate = Pipeline::on(Collection::Pages).group(
            GroupKey::All,
            [("a", Accumulator::Count), ("a", Accumulator::Count)],
        );
        assert!(duplicate.validate().is_err());

        let empty_group = Pipeline::on(Collection::Pages)
            .group(GroupKey::All, Vec::<(String, Accumulator)>::new());
        assert!(empty_group.validate().is_err());

        let fine = Pipeline::on(Collection::Pages)
            .match_eq("_id", "p1")
            .sort(&[("title", SortOrder::Asc)])
            .limit(10);
        assert!(fine.validate().is_ok());
    }
}
