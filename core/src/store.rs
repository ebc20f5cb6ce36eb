//! Store adapter contract: the document-store algebra projections write through.
//!
//! # Overview
//!
//! A read model is materialized into a small set of tables. Projections never
//! talk to a database directly; they receive a [`ReadModelStore`] handle that is
//! scoped to one read model and speaks a deliberately small algebra:
//!
//! - [`SearchCondition`]: recursive filter expression (`And`/`Or`/`Not` over comparisons)
//! - [`UpdateCondition`]: `$set`, `$unset` or `$inc` on matching documents
//! - [`TableDeclaration`]: indexes and plain fields of a table
//! - [`FindOptions`]: field selection, sort, skip and limit
//!
//! Concrete adapters (document databases, SQL, in-memory) implement
//! [`StoreAdapter`] and hand out scoped [`ReadModelStore`] handles.
//!
//! # Example
//!
//! ```
//! use readmodel_core::store::{Comparison, SearchCondition};
//! use serde_json::json;
//!
//! let parsed = SearchCondition::from_json(&json!({
//!     "$or": [ { "author": "ann" }, { "likes": { "$gte": 10 } } ]
//! })).unwrap();
//!
//! let built = SearchCondition::or([
//!     SearchCondition::eq("author", "ann"),
//!     SearchCondition::compare("likes", Comparison::Gte, 10),
//! ]);
//!
//! assert_eq!(parsed, built);
//!
//! let doc = json!({ "author": "bob", "likes": 12 });
//! assert!(built.matches(doc.as_object().unwrap()));
//! ```

use crate::cursor::ReadModelName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// A stored row: a JSON object.
pub type Document = Map<String, Value>;

/// Errors raised by store adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connectivity or availability problem; retrying the whole build is safe.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Adapter-specific failure that will not go away on retry.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Malformed search condition.
    #[error("Invalid search condition: {0}")]
    InvalidCondition(String),

    /// Malformed update condition or update not applicable to the document.
    #[error("Invalid update condition: {0}")]
    InvalidUpdate(String),

    /// Table was used before `define_table`.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// `define_table` called twice for the same table.
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),
}

impl StoreError {
    /// Whether the error is a connectivity problem rather than a logic error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the error comes from a malformed expression (fail fast, never retried).
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidCondition(_) | Self::InvalidUpdate(_))
    }
}

/// Comparison operator of a leaf predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
}

impl Comparison {
    /// Operator keyword in the document form.
    #[must_use]
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
        }
    }

    /// Parse an operator keyword such as `"$lte"`.
    #[must_use]
    pub fn from_operator(operator: &str) -> Option<Self> {
        match operator {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            _ => None,
        }
    }

    /// Evaluate `actual <op> expected`. A missing field behaves like `null`.
    #[must_use]
    pub fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        let ordering = compare_values(actual, expected);
        match self {
            Self::Eq => values_equal(actual, expected, ordering),
            Self::Ne => !values_equal(actual, expected, ordering),
            Self::Lt => ordering == Some(Ordering::Less),
            Self::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Self::Gt => ordering == Some(Ordering::Greater),
            Self::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

fn values_equal(actual: &Value, expected: &Value, ordering: Option<Ordering>) -> bool {
    ordering.map_or_else(|| actual == expected, |o| o == Ordering::Equal)
}

/// Order two scalar JSON values of the same kind; `None` when incomparable.
///
/// Numbers compare numerically (so `1` equals `1.0`), strings lexicographically,
/// booleans `false < true`, and `null` only equals `null`.
#[must_use]
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Look up a dotted field path (`"author.name"`, `"tags.0"`) in a document.
#[must_use]
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Recursive filter expression.
///
/// The closed counterpart of the document form
/// `{ "$and": [...] } | { "$or": [...] } | { "$not": {...} } | { field: value } | { field: { "$op": value } }`.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchCondition {
    /// All conditions hold. An empty list matches every document.
    And(Vec<SearchCondition>),
    /// At least one condition holds. An empty list matches nothing.
    Or(Vec<SearchCondition>),
    /// The condition does not hold.
    Not(Box<SearchCondition>),
    /// Leaf predicate on one field.
    Compare {
        /// Dotted field path.
        field: String,
        /// Operator.
        op: Comparison,
        /// Right-hand side.
        value: Value,
    },
}

impl SearchCondition {
    /// Condition matching every document.
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    /// Leaf predicate.
    #[must_use]
    pub fn compare(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality predicate, the `{ field: value }` shorthand.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    /// Inequality predicate.
    #[must_use]
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ne, value)
    }

    /// Conjunction.
    #[must_use]
    pub fn and(conditions: impl IntoIterator<Item = Self>) -> Self {
        Self::And(conditions.into_iter().collect())
    }

    /// Disjunction.
    #[must_use]
    pub fn or(conditions: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(conditions.into_iter().collect())
    }

    /// Negation.
    #[must_use]
    pub fn not(condition: Self) -> Self {
        Self::Not(Box::new(condition))
    }

    /// Evaluate the condition against a document.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::And(conditions) => conditions.iter().all(|c| c.matches(document)),
            Self::Or(conditions) => conditions.iter().any(|c| c.matches(document)),
            Self::Not(condition) => !condition.matches(document),
            Self::Compare { field, op, value } => op.evaluate(lookup(document, field), value),
        }
    }

    /// Parse the document form of a search condition.
    ///
    /// Several keys in one object are combined with `And`. Leaf values must be
    /// JSON primitives.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCondition`] for unknown operators, non-object
    /// conditions, non-array `$and`/`$or` operands and non-primitive leaf values.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let Value::Object(entries) = value else {
            return Err(StoreError::InvalidCondition(format!(
                "expected an object, found {value}"
            )));
        };

        let mut conditions = Vec::with_capacity(entries.len());
        for (key, operand) in entries {
            match key.as_str() {
                "$and" => conditions.push(Self::And(parse_list(key, operand)?)),
                "$or" => conditions.push(Self::Or(parse_list(key, operand)?)),
                "$not" => conditions.push(Self::not(Self::from_json(operand)?)),
                op if op.starts_with('$') => {
                    return Err(StoreError::InvalidCondition(format!(
                        "unknown operator {op}"
                    )));
                }
                field => conditions.extend(parse_field(field, operand)?),
            }
        }

        if conditions.len() == 1 {
            Ok(conditions.remove(0))
        } else {
            Ok(Self::And(conditions))
        }
    }
}

fn parse_list(key: &str, operand: &Value) -> Result<Vec<SearchCondition>, StoreError> {
    let Value::Array(items) = operand else {
        return Err(StoreError::InvalidCondition(format!(
            "{key} expects an array"
        )));
    };
    items.iter().map(SearchCondition::from_json).collect()
}

fn parse_field(field: &str, operand: &Value) -> Result<Vec<SearchCondition>, StoreError> {
    match operand {
        Value::Object(operators) => {
            if operators.is_empty() {
                return Err(StoreError::InvalidCondition(format!(
                    "field {field} has an empty operator object"
                )));
            }
            operators
                .iter()
                .map(|(operator, value)| {
                    let op = Comparison::from_operator(operator).ok_or_else(|| {
                        StoreError::InvalidCondition(format!(
                            "unknown operator {operator} on field {field}"
                        ))
                    })?;
                    ensure_primitive(field, value)?;
                    Ok(SearchCondition::compare(field, op, value.clone()))
                })
                .collect()
        }
        value => {
            ensure_primitive(field, value)?;
            Ok(vec![SearchCondition::eq(field, value.clone())])
        }
    }
}

fn ensure_primitive(field: &str, value: &Value) -> Result<(), StoreError> {
    if value.is_object() || value.is_array() {
        return Err(StoreError::InvalidCondition(format!(
            "field {field} must be compared with a primitive value"
        )));
    }
    Ok(())
}

/// Right-hand side of `$inc`.
#[derive(Clone, Debug, PartialEq)]
pub enum Increment {
    /// Numeric addition.
    Number(f64),
    /// String concatenation.
    Text(String),
}

/// Update applied to every document matching a search condition.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateCondition {
    /// `$set`: assign values to (dotted) fields, creating intermediate objects.
    Set(Document),
    /// `$unset`: remove fields.
    Unset(Vec<String>),
    /// `$inc`: add to numeric fields or append to string fields.
    Inc(Vec<(String, Increment)>),
}

impl UpdateCondition {
    /// `$set` of a single field.
    #[must_use]
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Document::new();
        fields.insert(field.into(), value.into());
        Self::Set(fields)
    }

    /// `$inc` of a single numeric field.
    #[must_use]
    pub fn inc(field: impl Into<String>, by: f64) -> Self {
        Self::Inc(vec![(field.into(), Increment::Number(by))])
    }

    /// Parse the document form (`{"$set": {...}}`, `{"$unset": {...}}`, `{"$inc": {...}}`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUpdate`] unless the object has exactly one
    /// known operator with an object operand.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let Some(entries) = value.as_object().filter(|entries| entries.len() == 1) else {
            return Err(StoreError::InvalidUpdate(format!(
                "expected exactly one update operator, found {value}"
            )));
        };
        let Some((operator, Value::Object(fields))) = entries.iter().next() else {
            return Err(StoreError::InvalidUpdate(
                "update operand must be an object".to_string(),
            ));
        };

        match operator.as_str() {
            "$set" => Ok(Self::Set(fields.clone())),
            "$unset" => Ok(Self::Unset(fields.keys().cloned().collect())),
            "$inc" => fields
                .iter()
                .map(|(field, by)| match by {
                    Value::Number(n) => n
                        .as_f64()
                        .map(|n| (field.clone(), Increment::Number(n)))
                        .ok_or_else(|| {
                            StoreError::InvalidUpdate(format!("bad number for {field}"))
                        }),
                    Value::String(s) => Ok((field.clone(), Increment::Text(s.clone()))),
                    other => Err(StoreError::InvalidUpdate(format!(
                        "$inc on {field} expects a number or string, found {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Inc),
            other => Err(StoreError::InvalidUpdate(format!(
                "unknown update operator {other}"
            ))),
        }
    }

    /// Apply the update to a document in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUpdate`] when a path crosses a non-object
    /// value or `$inc` meets a value of the wrong kind.
    pub fn apply(&self, document: &mut Document) -> Result<(), StoreError> {
        match self {
            Self::Set(fields) => {
                for (path, value) in fields {
                    *slot(document, path)? = value.clone();
                }
            }
            Self::Unset(paths) => {
                for path in paths {
                    remove_path(document, path);
                }
            }
            Self::Inc(increments) => {
                for (path, by) in increments {
                    let target = slot(document, path)?;
                    *target = increment(path, target, by)?;
                }
            }
        }
        Ok(())
    }
}

fn slot<'a>(document: &'a mut Document, path: &str) -> Result<&'a mut Value, StoreError> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut current = document;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            let next = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if next.is_null() {
                *next = Value::Object(Map::new());
            }
            current = match next {
                Value::Object(map) => map,
                _ => {
                    return Err(StoreError::InvalidUpdate(format!(
                        "path {path} crosses a non-object value at {segment}"
                    )));
                }
            };
        }
    }
    Ok(current.entry(last.to_string()).or_insert(Value::Null))
}

fn remove_path(document: &mut Document, path: &str) {
    match path.rsplit_once('.') {
        None => {
            document.remove(path);
        }
        Some((parents, last)) => {
            let mut current = document;
            for segment in parents.split('.') {
                match current.get_mut(segment) {
                    Some(Value::Object(map)) => current = map,
                    _ => return,
                }
            }
            current.remove(last);
        }
    }
}

fn increment(path: &str, current: &Value, by: &Increment) -> Result<Value, StoreError> {
    match (current, by) {
        (Value::Null, Increment::Number(n)) => Ok(number_value(*n)),
        (Value::Number(value), Increment::Number(n)) => {
            let exact = value
                .as_i64()
                .zip(integral(*n))
                .and_then(|(value, n)| value.checked_add(n));
            if let Some(sum) = exact {
                return Ok(Value::from(sum));
            }
            let sum = value.as_f64().unwrap_or_default() + n;
            if !sum.is_finite() {
                return Err(StoreError::InvalidUpdate(format!(
                    "$inc of field {path} overflows"
                )));
            }
            Ok(number_value(sum))
        }
        (Value::Null, Increment::Text(s)) => Ok(Value::String(s.clone())),
        (Value::String(value), Increment::Text(s)) => Ok(Value::String(format!("{value}{s}"))),
        (other, _) => Err(StoreError::InvalidUpdate(format!(
            "cannot $inc field {path} holding {other}"
        ))),
    }
}

/// `n` as an integer when it is whole and exactly representable.
#[allow(clippy::cast_possible_truncation)]
fn integral(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() < 9.0e15).then(|| n as i64)
}

fn number_value(n: f64) -> Value {
    match integral(n) {
        Some(n) => Value::from(n),
        None => Number::from_f64(n).map_or(Value::Null, Value::Number),
    }
}

/// Type of an indexed column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Text column.
    String,
    /// Numeric column.
    Number,
}

/// Shape of a read-model table. The first index is the primary one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDeclaration {
    /// Indexed columns in declaration order.
    pub indexes: Vec<(String, IndexType)>,
    /// Non-indexed fields.
    pub fields: Vec<String>,
}

impl TableDeclaration {
    /// Empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an indexed column.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, index_type: IndexType) -> Self {
        self.indexes.push((name.into(), index_type));
        self
    }

    /// Add a plain field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    /// Name of the primary index, if any.
    #[must_use]
    pub fn primary_index(&self) -> Option<&str> {
        self.indexes.first().map(|(name, _)| name.as_str())
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// `1`
    Ascending,
    /// `-1`
    Descending,
}

/// Field selection: `true` includes, `false` excludes.
///
/// When any field is included, only included fields are returned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSelection(pub Vec<(String, bool)>);

impl FieldSelection {
    /// Apply the selection to a document. Fields may be dotted paths.
    #[must_use]
    pub fn apply(&self, document: &Document) -> Document {
        let inclusive = self.0.iter().any(|(_, include)| *include);
        if inclusive {
            let mut selected = Document::new();
            for (field, _) in self.0.iter().filter(|(_, include)| *include) {
                if let Some(value) = lookup(document, field) {
                    if let Ok(target) = slot(&mut selected, field) {
                        *target = value.clone();
                    }
                }
            }
            selected
        } else {
            let mut remaining = document.clone();
            for (field, _) in &self.0 {
                remove_path(&mut remaining, field);
            }
            remaining
        }
    }
}

/// Optional parts of a `find` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to return.
    pub projection: Option<FieldSelection>,
    /// Sort keys in priority order.
    pub sort: Vec<(String, SortOrder)>,
    /// Documents to skip after sorting.
    pub skip: usize,
    /// Maximum documents to return.
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Add a sort key.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Set the number of documents to skip.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Set the maximum number of documents.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Select fields.
    #[must_use]
    pub fn project(mut self, selection: FieldSelection) -> Self {
        self.projection = Some(selection);
        self
    }

    /// Sort, page and project already-filtered documents.
    ///
    /// Adapters without a native query engine can use this directly.
    #[must_use]
    pub fn apply(&self, mut documents: Vec<Document>) -> Vec<Document> {
        if !self.sort.is_empty() {
            documents.sort_by(|a, b| {
                for (field, order) in &self.sort {
                    let ordering = match (lookup(a, field), lookup(b, field)) {
                        (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let page = documents
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX));

        match &self.projection {
            Some(selection) => page.map(|doc| selection.apply(&doc)).collect(),
            None => page.collect(),
        }
    }
}

/// Options for `update`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the condition's equality predicates when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    /// Options with `upsert` enabled.
    #[must_use]
    pub const fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Handle to the tables of one read model.
///
/// Handed to projection functions; every call is confined to the read model the
/// handle was created for.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so handles can be shared as
/// `Arc<dyn ReadModelStore>` across projections and wrappers.
pub trait ReadModelStore: Send + Sync {
    /// Create a table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableAlreadyExists`] or an adapter error.
    fn define_table(
        &self,
        table: &str,
        declaration: TableDeclaration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Find documents matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] or an adapter error.
    fn find(
        &self,
        table: &str,
        condition: SearchCondition,
        options: FindOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Document>, StoreError>> + Send + '_>>;

    /// Find the first document matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] or an adapter error.
    fn find_one(
        &self,
        table: &str,
        condition: SearchCondition,
        projection: Option<FieldSelection>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Document>, StoreError>> + Send + '_>>;

    /// Count documents matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] or an adapter error.
    fn count(
        &self,
        table: &str,
        condition: SearchCondition,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + '_>>;

    /// Insert one document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] or an adapter error.
    fn insert(
        &self,
        table: &str,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Update every document matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUpdate`], [`StoreError::TableNotFound`] or an adapter error.
    fn update(
        &self,
        table: &str,
        condition: SearchCondition,
        update: UpdateCondition,
        options: UpdateOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Delete every document matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] or an adapter error.
    fn delete(
        &self,
        table: &str,
        condition: SearchCondition,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Connection-level side of a store adapter.
pub trait StoreAdapter: Send + Sync {
    /// Handle scoped to the tables of `read_model`.
    fn store(&self, read_model: &ReadModelName) -> Arc<dyn ReadModelStore>;

    /// Drop every table of `read_model`. Dropping an empty read model succeeds.
    ///
    /// # Errors
    ///
    /// Returns an adapter error if the tables cannot be dropped.
    fn drop_read_model(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Document built from the equality predicates of a condition, used for upserts.
#[must_use]
pub fn seed_document(condition: &SearchCondition) -> Document {
    let mut document = Document::new();
    collect_equalities(condition, &mut document);
    document
}

fn collect_equalities(condition: &SearchCondition, document: &mut Document) {
    match condition {
        SearchCondition::And(conditions) => {
            for condition in conditions {
                collect_equalities(condition, document);
            }
        }
        SearchCondition::Compare {
            field,
            op: Comparison::Eq,
            value,
        } => {
            if let Ok(slot) = slot(document, field) {
                *slot = value.clone();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn leaf_shorthand_is_equality() {
        let condition = SearchCondition::from_json(&json!({ "id": "a1" })).unwrap();
        assert_eq!(condition, SearchCondition::eq("id", "a1"));
        assert!(condition.matches(&doc(json!({ "id": "a1" }))));
        assert!(!condition.matches(&doc(json!({ "id": "a2" }))));
    }

    #[test]
    fn several_keys_are_conjunction() {
        let condition =
            SearchCondition::from_json(&json!({ "a": 1, "b": { "$gt": 2, "$lt": 5 } })).unwrap();
        assert!(condition.matches(&doc(json!({ "a": 1, "b": 3 }))));
        assert!(!condition.matches(&doc(json!({ "a": 1, "b": 5 }))));
    }

    #[test]
    fn empty_object_matches_everything() {
        let condition = SearchCondition::from_json(&json!({})).unwrap();
        assert_eq!(condition, SearchCondition::all());
        assert!(condition.matches(&Document::new()));
    }

    #[test]
    fn not_and_or_combine() {
        let condition = SearchCondition::from_json(&json!({
            "$not": { "$or": [ { "kind": "draft" }, { "hidden": true } ] }
        }))
        .unwrap();
        assert!(condition.matches(&doc(json!({ "kind": "post", "hidden": false }))));
        assert!(!condition.matches(&doc(json!({ "kind": "draft" }))));
    }

    #[test]
    fn rejects_malformed_conditions() {
        for bad in [
            json!([1, 2]),
            json!({ "$nor": [] }),
            json!({ "$and": { "a": 1 } }),
            json!({ "a": { "$regex": "x" } }),
            json!({ "a": { "b": 1 } }),
            json!({ "a": [1, 2] }),
            json!({ "a": {} }),
        ] {
            let err = SearchCondition::from_json(&bad).unwrap_err();
            assert!(err.is_configuration(), "{bad} should be rejected: {err}");
        }
    }

    #[test]
    fn missing_field_behaves_like_null() {
        assert!(SearchCondition::eq("gone", Value::Null).matches(&Document::new()));
        assert!(SearchCondition::ne("gone", 1).matches(&Document::new()));
        assert!(!SearchCondition::compare("gone", Comparison::Lt, 1).matches(&Document::new()));
    }

    #[test]
    fn numbers_compare_numerically() {
        let d = doc(json!({ "n": 1 }));
        assert!(SearchCondition::eq("n", 1.0).matches(&d));
        assert!(SearchCondition::compare("n", Comparison::Gte, 0.5).matches(&d));
        assert!(!SearchCondition::compare("n", Comparison::Gt, "0").matches(&d));
    }

    #[test]
    fn dotted_paths_reach_nested_values() {
        let d = doc(json!({ "author": { "name": "ann" }, "tags": ["x", "y"] }));
        assert!(SearchCondition::eq("author.name", "ann").matches(&d));
        assert!(SearchCondition::eq("tags.1", "y").matches(&d));
    }

    #[test]
    fn set_unset_and_inc() {
        let mut d = doc(json!({ "count": 1, "title": "a", "meta": { "x": 1 } }));

        UpdateCondition::from_json(&json!({ "$set": { "meta.y": 2, "title": "b" } }))
            .unwrap()
            .apply(&mut d)
            .unwrap();
        UpdateCondition::from_json(&json!({ "$inc": { "count": 2, "title": "!" } }))
            .unwrap()
            .apply(&mut d)
            .unwrap();
        UpdateCondition::from_json(&json!({ "$unset": { "meta.x": true } }))
            .unwrap()
            .apply(&mut d)
            .unwrap();

        assert_eq!(Value::Object(d), json!({ "count": 3, "title": "b!", "meta": { "y": 2 } }));
    }

    #[test]
    fn inc_on_wrong_kind_fails() {
        let mut d = doc(json!({ "title": "a" }));
        let err = UpdateCondition::inc("title", 1.0).apply(&mut d).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }

    #[test]
    fn inc_beyond_integer_range_falls_back_to_float() {
        let mut d = doc(json!({ "max": i64::MAX, "min": i64::MIN, "small": 1 }));

        UpdateCondition::inc("max", 1.0).apply(&mut d).unwrap();
        UpdateCondition::inc("min", -1.0).apply(&mut d).unwrap();
        UpdateCondition::inc("small", 1e19).apply(&mut d).unwrap();

        assert!(d["max"].as_i64().is_none());
        assert_eq!(d["max"].as_f64(), Some(9.223_372_036_854_776e18));
        assert_eq!(d["min"].as_f64(), Some(-9.223_372_036_854_776e18));
        assert_eq!(d["small"].as_f64(), Some(1e19));
    }

    #[test]
    fn inc_stays_exact_below_integer_bounds() {
        let mut d = doc(json!({ "n": i64::MAX - 1 }));

        UpdateCondition::inc("n", 1.0).apply(&mut d).unwrap();

        assert_eq!(d["n"].as_i64(), Some(i64::MAX));
    }

    #[test]
    fn inc_to_infinity_fails() {
        let mut d = doc(json!({ "n": f64::MAX }));
        let err = UpdateCondition::inc("n", f64::MAX).apply(&mut d).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }

    #[test]
    fn field_selection_follows_dotted_paths() {
        let d = doc(json!({ "id": "a", "owner": { "name": "ann", "email": "a@x" } }));

        let included = FieldSelection(vec![
            ("id".to_string(), true),
            ("owner.name".to_string(), true),
        ])
        .apply(&d);
        let excluded = FieldSelection(vec![("owner.email".to_string(), false)]).apply(&d);

        assert_eq!(
            Value::Object(included),
            json!({ "id": "a", "owner": { "name": "ann" } })
        );
        assert_eq!(
            Value::Object(excluded),
            json!({ "id": "a", "owner": { "name": "ann" } })
        );
    }

    #[test]
    fn update_requires_single_operator() {
        assert!(UpdateCondition::from_json(&json!({ "$set": {}, "$inc": {} })).is_err());
        assert!(UpdateCondition::from_json(&json!({ "$push": { "a": 1 } })).is_err());
        assert!(UpdateCondition::from_json(&json!({ "$set": 1 })).is_err());
    }

    #[test]
    fn find_options_sort_skip_limit_project() {
        let docs = vec![
            doc(json!({ "id": "b", "n": 2, "secret": 1 })),
            doc(json!({ "id": "a", "n": 2, "secret": 1 })),
            doc(json!({ "id": "c", "n": 1, "secret": 1 })),
        ];
        let options = FindOptions::default()
            .sort_by("n", SortOrder::Descending)
            .sort_by("id", SortOrder::Ascending)
            .skip(1)
            .limit(5)
            .project(FieldSelection(vec![("secret".to_string(), false)]));

        let page = options.apply(docs);
        assert_eq!(
            page.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![json!({ "id": "b", "n": 2 }), json!({ "id": "c", "n": 1 })]
        );
    }

    #[test]
    fn seed_document_collects_equalities() {
        let condition = SearchCondition::and([
            SearchCondition::eq("id", "a1"),
            SearchCondition::eq("owner.name", "ann"),
            SearchCondition::compare("n", Comparison::Gt, 1),
        ]);
        assert_eq!(
            Value::Object(seed_document(&condition)),
            json!({ "id": "a1", "owner": { "name": "ann" } })
        );
    }
}
