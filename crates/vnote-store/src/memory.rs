//! Process-local record store.
//!
//! Implements [`RecordStore`] over a mutex-guarded map. Every operation,
//! including `patch_if` and `increment`, is atomic. `create` rejects an id
//! that is already taken, like a PocketBase primary key. Used by the
//! worker's pipeline and poll loop tests.
//!
//! Filters support the subset the worker emits: `field = "value"`,
//! `field != "value"` and `&&` conjunctions of parenthesised clauses.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use crate::types::{FileUpload, Fields, ListQuery, ListResponse, Precondition, Record};

const DEFAULT_PER_PAGE: u32 = 30;

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Record>>,
    files: HashMap<(String, String, String), Vec<u8>>,
    failures: HashMap<String, VecDeque<StoreError>>,
    late_failures: HashMap<String, VecDeque<StoreError>>,
    calls: Vec<String>,
    seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn timestamp(&mut self) -> String {
        let seq = self.next_seq();
        format!("2025-01-01 00:00:00.{:06}Z", seq)
    }

    fn take_failure(&mut self, operation: &str) -> Option<StoreError> {
        self.failures.get_mut(operation).and_then(VecDeque::pop_front)
    }

    /// Hand back the result of an applied write, or the queued late failure.
    fn settle<T>(&mut self, operation: &str, value: T) -> StoreResult<T> {
        match self.late_failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    fn insert_record(&mut self, collection: &str, fields: Fields) -> Record {
        let mut record = Record(fields);
        if record.id().is_none() {
            let id = format!("rec{:012}", self.next_seq());
            record.0.insert("id".into(), Value::String(id));
        }
        if record.get("created").is_none() {
            let ts = self.timestamp();
            record.0.insert("created".into(), Value::String(ts.clone()));
            record.0.insert("updated".into(), Value::String(ts));
        }
        let id = record.id().unwrap_or_default().to_string();
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record.clone());
        record
    }

    fn record_mut(&mut self, collection: &str, id: &str) -> StoreResult<&mut Record> {
        self.collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))
    }
}

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic in another test thread must not poison every later call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a record. `id` and `created` are filled in when missing.
    pub fn insert(&self, collection: &str, fields: Fields) -> Record {
        self.lock().insert_record(collection, fields)
    }

    /// Current copy of a record.
    pub fn record(&self, collection: &str, id: &str) -> Option<Record> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Attach file content to a record.
    pub fn put_file(&self, collection: &str, id: &str, file_name: &str, content: Vec<u8>) {
        self.lock().files.insert(
            (collection.to_string(), id.to_string(), file_name.to_string()),
            content,
        );
    }

    pub fn file(&self, collection: &str, id: &str, file_name: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&(collection.to_string(), id.to_string(), file_name.to_string()))
            .cloned()
    }

    /// Make the next call of `operation` fail with `error`. Queued failures
    /// are consumed in order.
    pub fn fail_next(&self, operation: &str, error: StoreError) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Let the next call of `operation` take effect, then fail it with
    /// `error`, as when a write commits but its response is lost.
    pub fn fail_after_apply(&self, operation: &str, error: StoreError) {
        self.lock()
            .late_failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Calls made so far, as `"<operation> <collection>[/<id>]"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls that could have changed stored data.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| !c.starts_with("list ") && !c.starts_with("get ") && !c.starts_with("download_file "))
            .count()
    }

    fn begin(&self, operation: &str, target: String) -> StoreResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(format!("{} {}", operation, target));
        match state.take_failure(operation) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

fn apply_patch(state: &mut State, collection: &str, id: &str, fields: &Fields) -> StoreResult<Record> {
    let ts = state.timestamp();
    let record = state.record_mut(collection, id)?;
    for (key, value) in fields {
        // `field+` / `field-` number modifiers
        if let Some(field) = key.strip_suffix('+') {
            let by = value.as_f64().unwrap_or(0.0);
            let current = record.get(field).and_then(Value::as_f64).unwrap_or(0.0);
            record.0.insert(field.to_string(), number(current + by));
        } else if let Some(field) = key.strip_suffix('-') {
            let by = value.as_f64().unwrap_or(0.0);
            let current = record.get(field).and_then(Value::as_f64).unwrap_or(0.0);
            record.0.insert(field.to_string(), number(current - by));
        } else {
            record.0.insert(key.clone(), value.clone());
        }
    }
    record.0.insert("updated".into(), Value::String(ts));
    Ok(record.clone())
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> StoreResult<ListResponse<Record>> {
        let state = self.begin("list", collection.to_string())?;

        let clauses = match &query.filter {
            Some(filter) => parse_filter(filter)?,
            None => Vec::new(),
        };

        let mut items: Vec<Record> = state
            .collections
            .get(collection)
            .map(|c| c.values().filter(|r| clauses.iter().all(|cl| cl.matches(r))).cloned().collect())
            .unwrap_or_default();
        drop(state);

        if let Some(sort) = &query.sort {
            let keys = parse_sort(sort);
            items.sort_by(|a, b| compare_records(a, b, &keys));
        }

        let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).max(1);
        let page = query.page.unwrap_or(1).max(1);
        let total = items.len() as i64;
        let start = ((page - 1) * per_page) as usize;
        let items: Vec<Record> = items.into_iter().skip(start).take(per_page as usize).collect();

        let (total_items, total_pages) = if query.skip_total {
            (-1, -1)
        } else {
            (total, (total + per_page as i64 - 1) / per_page as i64)
        };

        Ok(ListResponse {
            page,
            per_page,
            total_items,
            total_pages,
            items,
        })
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        let state = self.begin("get", format!("{}/{}", collection, id))?;
        Ok(state.collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<Record> {
        let mut state = self.begin("create", collection.to_string())?;
        let taken = fields
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| state.collections.get(collection).and_then(|c| c.get(id)))
            .is_some();
        if taken {
            return Err(StoreError::from_http_status(
                400,
                r#"{"data":{"id":{"code":"validation_not_unique","message":"Value must be unique."}}}"#,
            ));
        }
        let record = state.insert_record(collection, fields);
        state.settle("create", record)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut state = self.begin("delete", format!("{}/{}", collection, id))?;
        if let Some(records) = state.collections.get_mut(collection) {
            records.remove(id);
        }
        state
            .files
            .retain(|(c, record_id, _), _| !(c == collection && record_id == id));
        state.settle("delete", ())
    }

    async fn patch(&self, collection: &str, id: &str, fields: Fields) -> StoreResult<Record> {
        let mut state = self.begin("patch", format!("{}/{}", collection, id))?;
        let record = apply_patch(&mut state, collection, id, &fields)?;
        state.settle("patch", record)
    }

    async fn patch_with_file(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        file: &FileUpload,
    ) -> StoreResult<Record> {
        let content = tokio::fs::read(&file.path).await?;
        let file_name = file.file_name();

        let mut state = self.begin("patch_with_file", format!("{}/{}", collection, id))?;
        let mut fields = fields;
        fields.insert(file.field.clone(), Value::String(file_name.clone()));
        let record = apply_patch(&mut state, collection, id, &fields)?;
        state
            .files
            .insert((collection.to_string(), id.to_string(), file_name), content);
        state.settle("patch_with_file", record)
    }

    async fn patch_if(
        &self,
        collection: &str,
        id: &str,
        precondition: &Precondition,
        fields: Fields,
    ) -> StoreResult<Record> {
        let mut state = self.begin("patch_if", format!("{}/{}", collection, id))?;
        let current = state.record_mut(collection, id)?;
        if !precondition.holds_for(current) {
            return Err(StoreError::precondition_failed(format!(
                "{}/{}: {} is {}, expected {}",
                collection,
                id,
                precondition.field,
                current.get(&precondition.field).unwrap_or(&Value::Null),
                precondition.equals
            )));
        }
        apply_patch(&mut state, collection, id, &fields)
    }

    async fn increment(&self, collection: &str, id: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut state = self.begin("increment", format!("{}/{}", collection, id))?;
        let mut fields = Fields::new();
        fields.insert(format!("{}+", field), Value::from(by));
        let record = apply_patch(&mut state, collection, id, &fields)?;
        let value = record
            .get_i64(field)
            .ok_or_else(|| StoreError::invalid_response(format!("{} is not a number", field)))?;
        state.settle("increment", value)
    }

    async fn download_file(
        &self,
        collection: &str,
        id: &str,
        file_name: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> StoreResult<u64> {
        let content = {
            let state = self.begin("download_file", format!("{}/{}", collection, id))?;
            state
                .files
                .get(&(collection.to_string(), id.to_string(), file_name.to_string()))
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("{}/{}/{}", collection, id, file_name)))?
        };

        let size = content.len() as u64;
        if size > max_bytes {
            return Err(StoreError::PayloadTooLarge { size, limit: max_bytes });
        }

        tokio::fs::write(dest, &content).await?;
        Ok(size)
    }
}

// =============================================================================
// Filter and sort evaluation
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: String,
    negated: bool,
    value: Value,
}

impl Clause {
    fn matches(&self, record: &Record) -> bool {
        // PocketBase compares missing fields as their zero value
        let empty = Value::String(String::new());
        let stored = record.get(&self.field).unwrap_or(&empty);
        (stored == &self.value) != self.negated
    }
}

fn unsupported(filter: &str) -> StoreError {
    StoreError::from_http_status(400, format!("unsupported filter: {}", filter))
}

/// Split on `&&` outside of string literals.
fn split_conjunction(filter: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = filter.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '&' if chars.peek() == Some(&'&') => {
                chars.next();
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_filter(filter: &str) -> StoreResult<Vec<Clause>> {
    split_conjunction(filter)
        .iter()
        .map(|part| parse_clause(part).ok_or_else(|| unsupported(filter)))
        .collect()
}

fn parse_clause(part: &str) -> Option<Clause> {
    let mut clause = part.trim();
    while clause.starts_with('(') && clause.ends_with(')') {
        clause = clause[1..clause.len() - 1].trim();
    }

    let eq = clause.find('=')?;
    let raw = &clause[eq + 1..];
    let (field, negated) = match clause[..eq].strip_suffix('!') {
        Some(field) => (field, true),
        None => (&clause[..eq], false),
    };

    let field = field.trim();
    if field.is_empty() || !field.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return None;
    }

    Some(Clause {
        field: field.to_string(),
        negated,
        value: parse_literal(raw.trim())?,
    })
}

fn parse_literal(raw: &str) -> Option<Value> {
    if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                out.push(chars.next()?);
            } else {
                out.push(c);
            }
        }
        return Some(Value::String(out));
    }
    serde_json::from_str(raw).ok()
}

fn parse_sort(sort: &str) -> Vec<(String, bool)> {
    sort.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| match k.strip_prefix('-') {
            Some(field) => (field.to_string(), true),
            None => (k.trim_start_matches('+').to_string(), false),
        })
        .collect()
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn compare_records(a: &Record, b: &Record, keys: &[(String, bool)]) -> Ordering {
    for (field, descending) in keys {
        let ord = compare_values(a.get(field), b.get(field));
        let ord = if *descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
