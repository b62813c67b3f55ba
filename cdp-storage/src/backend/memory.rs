// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! In-memory search backend for development and testing
//!
//! Evaluates the query-DSL subset the core emits: `match_all`, `match_none`,
//! `ids`, `term`, `match`, `terms`, `range`, `exists`, `prefix` and
//! `bool`, with `sort`, `from`/`size` paging and `terms` /
//! `date_histogram` aggregations. Anything else is rejected with a 400 the
//! way the engine would.
//!
//! Writes are visible immediately; `refresh` and `flush` only check that
//! the target exists.

use super::{BulkItem, BulkOperation, BulkResponse, SearchBackend};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Upper bound on histogram buckets, as enforced by the engine
const MAX_BUCKETS: usize = 65_535;

type Source = Map<String, Value>;

#[derive(Debug, Default)]
struct StoredIndex {
    docs: BTreeMap<String, Source>,
    /// Creation body (mappings, settings, aliases)
    settings: Value,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, StoredIndex>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    templates: BTreeMap<String, Value>,
    sql: HashMap<String, Value>,
}

/// Matched document
struct Hit<'a> {
    index: &'a str,
    id: &'a str,
    source: &'a Source,
}

/// In-process document store speaking the engine's JSON
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned answer for `translate_sql`
    pub fn register_sql_translation(&self, sql: impl Into<String>, body: Value) {
        self.state.write().sql.insert(sql.into(), body);
    }

    /// Names of all concrete indices
    pub fn indices(&self) -> Vec<String> {
        self.state.read().indices.keys().cloned().collect()
    }

    /// Concrete indices an alias points at
    pub fn alias_members(&self, alias: &str) -> Vec<String> {
        self.state
            .read()
            .aliases
            .get(alias)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Body the index was created with; `Null` for auto-created ones
    pub fn index_settings(&self, index: &str) -> Option<Value> {
        self.state
            .read()
            .indices
            .get(index)
            .map(|stored| stored.settings.clone())
    }

    /// Number of documents in a concrete index
    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .read()
            .indices
            .get(index)
            .map_or(0, |stored| stored.docs.len())
    }
}

fn bad_request(reason: impl Into<String>) -> BackendError {
    let reason = reason.into();
    BackendError::Api {
        status: 400,
        body: json!({"error": {"type": "illegal_argument_exception", "reason": reason}}).to_string(),
    }
}

/// Glob with `*` wildcards
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || !name[first.len()..].ends_with(last) {
        return false;
    }
    let mut rest = &name[first.len()..name.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

fn template_patterns(template: &Value) -> Vec<&str> {
    match &template["index_patterns"] {
        Value::String(p) => vec![p.as_str()],
        Value::Array(ps) => ps.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

impl State {
    /// Concrete indices behind a comma-separated list of names, aliases or patterns
    fn resolve_read(&self, target: &str) -> BackendResult<Vec<String>> {
        let mut resolved = BTreeSet::new();
        for part in target.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.contains('*') {
                resolved.extend(self.indices.keys().filter(|n| glob_match(part, n)).cloned());
                for (alias, members) in &self.aliases {
                    if glob_match(part, alias) {
                        resolved.extend(members.iter().cloned());
                    }
                }
            } else if self.indices.contains_key(part) {
                resolved.insert(part.to_string());
            } else if let Some(members) = self.aliases.get(part) {
                resolved.extend(members.iter().cloned());
            } else {
                return Err(BackendError::IndexNotFound(part.to_string()));
            }
        }
        Ok(resolved.into_iter().collect())
    }

    /// Concrete index receiving a write to `target`, created on demand
    fn resolve_write(&mut self, target: &str) -> BackendResult<String> {
        if self.indices.contains_key(target) {
            return Ok(target.to_string());
        }
        if let Some(members) = self.aliases.get(target) {
            let mut members = members.iter();
            return match (members.next(), members.next()) {
                (Some(only), None) => Ok(only.clone()),
                _ => Err(bad_request(format!("alias [{target}] has no single write index"))),
            };
        }
        self.create(target, &Value::Null);
        Ok(target.to_string())
    }

    fn create(&mut self, name: &str, body: &Value) {
        let mut aliases: Vec<String> = Vec::new();
        for template in self.templates.values() {
            if template_patterns(template).iter().any(|p| glob_match(p, name)) {
                if let Some(declared) = template["template"]["aliases"].as_object() {
                    aliases.extend(declared.keys().cloned());
                }
            }
        }
        if let Some(declared) = body.get("aliases").and_then(Value::as_object) {
            aliases.extend(declared.keys().cloned());
        }

        self.indices.insert(
            name.to_string(),
            StoredIndex {
                docs: BTreeMap::new(),
                settings: body.clone(),
            },
        );
        for alias in aliases {
            self.aliases.entry(alias).or_default().insert(name.to_string());
        }
    }

    fn matching(&self, indices: &[String], query: &Value) -> BackendResult<Vec<Hit<'_>>> {
        let mut hits = Vec::new();
        for name in indices {
            let Some((name, stored)) = self.indices.get_key_value(name) else {
                continue;
            };
            for (id, source) in &stored.docs {
                if matches(query, id, source)? {
                    hits.push(Hit {
                        index: name,
                        id,
                        source,
                    });
                }
            }
        }
        Ok(hits)
    }
}

/// Value at a dotted path
fn lookup<'a>(source: &'a Source, path: &str) -> Option<&'a Value> {
    if let Some(direct) = source.get(path) {
        return Some(direct);
    }
    let mut parts = path.split('.');
    let mut current = source.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Field values with arrays flattened
fn values_of<'a>(source: &'a Source, path: &str) -> Vec<&'a Value> {
    match lookup(source, path) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(value) => vec![value],
    }
}

fn parse_millis(text: &str) -> Option<i64> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.timestamp_millis());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc().timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

fn millis_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_millis(s),
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_millis(x), parse_millis(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::String(s), Value::Number(n)) => Some(parse_millis(s)?.cmp(&n.as_i64()?)),
        (Value::Number(n), Value::String(s)) => Some(n.as_i64()?.cmp(&parse_millis(s)?)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal) && std::mem::discriminant(a) == std::mem::discriminant(b)
        || a == b
}

/// `{"field": ...}` body of a leaf clause
fn field_clause<'a>(kind: &str, body: &'a Value) -> BackendResult<(&'a str, &'a Value)> {
    body.as_object()
        .and_then(|m| m.iter().next())
        .map(|(field, value)| (field.as_str(), value))
        .ok_or_else(|| bad_request(format!("[{kind}] query malformed")))
}

/// Unwrap the long form `{"value": v}` / `{"query": v}`
fn clause_value<'a>(value: &'a Value, key: &str) -> &'a Value {
    match value {
        Value::Object(m) => m.get(key).unwrap_or(value),
        _ => value,
    }
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single],
    }
}

fn matches(query: &Value, id: &str, source: &Source) -> BackendResult<bool> {
    let (kind, body) = query
        .as_object()
        .and_then(|q| q.iter().next())
        .ok_or_else(|| bad_request(format!("malformed query: {query}")))?;

    match kind.as_str() {
        "match_all" => Ok(true),
        "match_none" => Ok(false),
        "ids" => Ok(body["values"]
            .as_array()
            .map_or(false, |values| values.iter().any(|v| v.as_str() == Some(id)))),
        "term" | "match" => {
            let (field, expected) = field_clause(kind, body)?;
            let expected = clause_value(expected, if kind == "term" { "value" } else { "query" });
            Ok(values_of(source, field)
                .into_iter()
                .any(|v| loosely_equal(v, expected)))
        }
        "terms" => {
            let (field, expected) = field_clause(kind, body)?;
            let expected = expected
                .as_array()
                .ok_or_else(|| bad_request("[terms] query requires an array"))?;
            Ok(values_of(source, field)
                .into_iter()
                .any(|v| expected.iter().any(|e| loosely_equal(v, e))))
        }
        "range" => {
            let (field, bounds) = field_clause(kind, body)?;
            let bounds = bounds
                .as_object()
                .ok_or_else(|| bad_request("[range] query requires bounds"))?;
            Ok(values_of(source, field).into_iter().any(|v| {
                bounds.iter().all(|(op, bound)| {
                    let ord = compare(v, bound);
                    match op.as_str() {
                        "gt" => ord == Some(Ordering::Greater),
                        "gte" => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                        "lt" => ord == Some(Ordering::Less),
                        "lte" => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                        // format, time_zone, boost
                        _ => true,
                    }
                })
            }))
        }
        "exists" => {
            let field = body["field"]
                .as_str()
                .ok_or_else(|| bad_request("[exists] query requires a field"))?;
            Ok(values_of(source, field).into_iter().any(|v| !v.is_null()))
        }
        "prefix" => {
            let (field, prefix) = field_clause(kind, body)?;
            let prefix = clause_value(prefix, "value")
                .as_str()
                .ok_or_else(|| bad_request("[prefix] query requires a string"))?;
            Ok(values_of(source, field)
                .into_iter()
                .any(|v| v.as_str().map_or(false, |s| s.starts_with(prefix))))
        }
        "bool" => {
            let must: Vec<&Value> = clauses(body.get("must"))
                .into_iter()
                .chain(clauses(body.get("filter")))
                .collect();
            for clause in &must {
                if !matches(clause, id, source)? {
                    return Ok(false);
                }
            }
            for clause in clauses(body.get("must_not")) {
                if matches(clause, id, source)? {
                    return Ok(false);
                }
            }
            let should = clauses(body.get("should"));
            let minimum = match body.get("minimum_should_match").and_then(Value::as_u64) {
                Some(n) => n as usize,
                None if must.is_empty() && !should.is_empty() => 1,
                None => 0,
            };
            let mut matched = 0;
            for clause in should {
                if matches(clause, id, source)? {
                    matched += 1;
                }
            }
            Ok(matched >= minimum)
        }
        other => Err(bad_request(format!("unsupported query [{other}]"))),
    }
}

fn sort_keys(sort: &Value) -> BackendResult<Vec<(String, bool)>> {
    let mut keys = Vec::new();
    for item in clauses(Some(sort)) {
        let (field, descending) = match item {
            Value::String(field) => (field.clone(), false),
            Value::Object(spec) => match spec.iter().next() {
                Some((field, order)) => {
                    let order = clause_value(order, "order");
                    (field.clone(), order.as_str() == Some("desc"))
                }
                None => continue,
            },
            _ => return Err(bad_request("malformed sort")),
        };
        if field != "_score" {
            keys.push((field, descending));
        }
    }
    Ok(keys)
}

fn sort_hits(hits: &mut [Hit<'_>], sort: &Value) -> BackendResult<()> {
    let keys = sort_keys(sort)?;
    hits.sort_by(|a, b| {
        for (field, descending) in &keys {
            // missing values sort last in either direction
            let ord = match (lookup(a.source, field), lookup(b.source, field)) {
                (Some(x), Some(y)) => {
                    let ord = compare(x, y).unwrap_or(Ordering::Equal);
                    if *descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// Time zone of a date histogram
#[derive(Debug, Clone, Copy)]
enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Zone {
    fn parse(name: &str) -> Option<Self> {
        if let Ok(tz) = name.parse::<Tz>() {
            return Some(Zone::Named(tz));
        }
        // "+01:00" style offsets
        DateTime::parse_from_rfc3339(&format!("2000-01-01T00:00:00{name}"))
            .ok()
            .map(|t| Zone::Fixed(*t.offset()))
    }

    fn offset_ms(&self, utc_ms: i64) -> i64 {
        let seconds = match self {
            Zone::Fixed(offset) => offset.local_minus_utc(),
            Zone::Named(tz) => match Utc.timestamp_millis_opt(utc_ms).single() {
                Some(t) => tz.offset_from_utc_datetime(&t.naive_utc()).fix().local_minus_utc(),
                None => 0,
            },
        };
        i64::from(seconds) * 1000
    }

    fn to_local(&self, utc_ms: i64) -> i64 {
        utc_ms + self.offset_ms(utc_ms)
    }

    fn from_local(&self, local_ms: i64) -> i64 {
        local_ms - self.offset_ms(local_ms - self.offset_ms(local_ms))
    }

    fn bucket_start(&self, utc_ms: i64, step: i64) -> i64 {
        let local = self.to_local(utc_ms);
        self.from_local(local.div_euclid(step) * step)
    }

    fn format(&self, utc_ms: i64) -> String {
        let offset_secs = (self.offset_ms(utc_ms) / 1000) as i32;
        let (Some(t), Some(offset)) = (
            Utc.timestamp_millis_opt(utc_ms).single(),
            FixedOffset::east_opt(offset_secs),
        ) else {
            return utc_ms.to_string();
        };
        if offset_secs == 0 {
            t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
        } else {
            t.with_timezone(&offset)
                .format("%Y-%m-%dT%H:%M:%S%.3f%:z")
                .to_string()
        }
    }
}

/// Interval in milliseconds: `90s`, `5m`, `4h`, `2d`, `1w` or a unit name
fn parse_interval(text: &str) -> Option<i64> {
    let named = match text {
        "second" => Some(1_000),
        "minute" => Some(60_000),
        "hour" => Some(3_600_000),
        "day" => Some(86_400_000),
        "week" => Some(604_800_000),
        _ => None,
    };
    if named.is_some() {
        return named;
    }
    let split = text.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = text.split_at(split);
    let amount: i64 = amount.parse().ok()?;
    let unit_ms = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    (amount > 0).then_some(amount * unit_ms)
}

struct Bucket<'a> {
    key: Value,
    key_as_string: Option<String>,
    docs: Vec<&'a Source>,
}

fn terms_buckets<'a>(spec: &Value, docs: &[&'a Source]) -> BackendResult<Vec<Bucket<'a>>> {
    let field = spec["field"]
        .as_str()
        .ok_or_else(|| bad_request("[terms] aggregation requires a field"))?;
    let size = spec.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;

    let mut groups: Vec<(Value, Vec<&'a Source>)> = Vec::new();
    for &doc in docs {
        for value in values_of(doc, field) {
            match groups.iter_mut().find(|(key, _)| key == value) {
                Some((_, members)) => members.push(doc),
                None => groups.push((value.clone(), vec![doc])),
            }
        }
    }
    groups.sort_by(|a, b| {
        b.1.len()
            .cmp(&a.1.len())
            .then_with(|| compare(&a.0, &b.0).unwrap_or(Ordering::Equal))
    });
    groups.truncate(size);

    Ok(groups
        .into_iter()
        .map(|(key, docs)| Bucket {
            key,
            key_as_string: None,
            docs,
        })
        .collect())
}

fn date_histogram_buckets<'a>(spec: &Value, docs: &[&'a Source]) -> BackendResult<Vec<Bucket<'a>>> {
    let field = spec["field"]
        .as_str()
        .ok_or_else(|| bad_request("[date_histogram] aggregation requires a field"))?;
    let interval = ["fixed_interval", "calendar_interval", "interval"]
        .iter()
        .find_map(|key| spec.get(*key).and_then(Value::as_str))
        .ok_or_else(|| bad_request("[date_histogram] aggregation requires an interval"))?;
    let step = parse_interval(interval)
        .ok_or_else(|| bad_request(format!("unsupported interval [{interval}]")))?;
    let zone = match spec.get("time_zone").and_then(Value::as_str) {
        Some(name) => Zone::parse(name).ok_or_else(|| bad_request(format!("unknown time zone [{name}]")))?,
        None => Zone::Fixed(Utc.fix()),
    };
    let min_doc_count = spec.get("min_doc_count").and_then(Value::as_u64).unwrap_or(0) as usize;

    let mut buckets: BTreeMap<i64, Vec<&'a Source>> = BTreeMap::new();
    for &doc in docs {
        for value in values_of(doc, field) {
            if let Some(t) = millis_of(value) {
                buckets.entry(zone.bucket_start(t, step)).or_default().push(doc);
            }
        }
    }

    if min_doc_count == 0 {
        let mut low = buckets.keys().next().copied();
        let mut high = buckets.keys().next_back().copied();
        if let Some(bounds) = spec.get("extended_bounds") {
            if let Some(min) = bounds.get("min").and_then(millis_of) {
                let key = zone.bucket_start(min, step);
                low = Some(low.map_or(key, |l| l.min(key)));
            }
            if let Some(max) = bounds.get("max").and_then(millis_of) {
                let key = zone.bucket_start(max, step);
                high = Some(high.map_or(key, |h| h.max(key)));
            }
        }
        if let (Some(low), Some(high)) = (low, high) {
            let (mut local, end) = (zone.to_local(low), zone.to_local(high));
            if (end - local) / step >= MAX_BUCKETS as i64 {
                return Err(bad_request(format!(
                    "too_many_buckets_exception: more than {MAX_BUCKETS} buckets"
                )));
            }
            while local <= end {
                buckets.entry(zone.from_local(local)).or_default();
                local += step;
            }
        }
    }

    Ok(buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= min_doc_count)
        .map(|(key, docs)| Bucket {
            key: json!(key),
            key_as_string: Some(zone.format(key)),
            docs,
        })
        .collect())
}

fn aggregate(spec: &Value, docs: &[&Source]) -> BackendResult<Value> {
    let spec = spec
        .as_object()
        .ok_or_else(|| bad_request("aggregations must be an object"))?;

    let mut rendered = Map::new();
    for (name, agg) in spec {
        let buckets = if let Some(terms) = agg.get("terms") {
            terms_buckets(terms, docs)?
        } else if let Some(histogram) = agg.get("date_histogram") {
            date_histogram_buckets(histogram, docs)?
        } else {
            return Err(bad_request(format!("unsupported aggregation [{name}]")));
        };
        let sub = agg.get("aggs").or_else(|| agg.get("aggregations"));

        let mut items = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let mut item = Map::new();
            item.insert("key".into(), bucket.key);
            if let Some(text) = bucket.key_as_string {
                item.insert("key_as_string".into(), json!(text));
            }
            item.insert("doc_count".into(), json!(bucket.docs.len()));
            if let Some(sub) = sub {
                if let Value::Object(children) = aggregate(sub, &bucket.docs)? {
                    item.extend(children);
                }
            }
            items.push(Value::Object(item));
        }
        rendered.insert(name.clone(), json!({ "buckets": items }));
    }
    Ok(Value::Object(rendered))
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn bulk(&self, operations: Vec<BulkOperation>) -> BackendResult<BulkResponse> {
        let mut state = self.state.write();
        let mut items = Vec::with_capacity(operations.len());

        for op in operations {
            let id = op.id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let outcome = match (state.resolve_write(&op.index), op.source) {
                (Ok(index), Value::Object(source)) => {
                    let replaced = state
                        .indices
                        .get_mut(&index)
                        .and_then(|stored| stored.docs.insert(id.clone(), source))
                        .is_some();
                    Ok((index, if replaced { 200 } else { 201 }))
                }
                (Ok(_), _) => Err("mapper_parsing_exception: document is not an object".to_string()),
                (Err(e), _) => Err(e.to_string()),
            };

            items.push(match outcome {
                Ok((index, status)) => BulkItem {
                    index,
                    id,
                    status,
                    error: None,
                },
                Err(error) => BulkItem {
                    index: op.index,
                    id,
                    status: 400,
                    error: Some(error),
                },
            });
        }
        Ok(BulkResponse { items })
    }

    async fn search(&self, index: &str, body: &Value) -> BackendResult<Value> {
        let state = self.state.read();
        let indices = state.resolve_read(index)?;
        let match_all = json!({"match_all": {}});
        let query = body.get("query").unwrap_or(&match_all);

        let mut hits = state.matching(&indices, query)?;
        if let Some(sort) = body.get("sort") {
            sort_hits(&mut hits, sort)?;
        }

        let aggregations = match body.get("aggs").or_else(|| body.get("aggregations")) {
            Some(spec) => {
                let docs: Vec<&Source> = hits.iter().map(|h| h.source).collect();
                Some(aggregate(spec, &docs)?)
            }
            None => None,
        };

        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let page: Vec<Value> = hits
            .iter()
            .skip(from)
            .take(size)
            .map(|h| json!({"_index": h.index, "_id": h.id, "_source": h.source}))
            .collect();

        let mut response = json!({
            "took": 0,
            "timed_out": false,
            "hits": {
                "total": {"value": hits.len(), "relation": "eq"},
                "hits": page,
            }
        });
        if let Some(aggregations) = aggregations {
            response["aggregations"] = aggregations;
        }
        Ok(response)
    }

    async fn count(&self, index: &str, query: &Value) -> BackendResult<u64> {
        let state = self.state.read();
        let indices = state.resolve_read(index)?;
        Ok(state.matching(&indices, query)?.len() as u64)
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> BackendResult<u64> {
        let mut state = self.state.write();
        let indices = state.resolve_read(index)?;
        let doomed: Vec<(String, String)> = state
            .matching(&indices, query)?
            .into_iter()
            .map(|h| (h.index.to_string(), h.id.to_string()))
            .collect();

        for (index, id) in &doomed {
            if let Some(stored) = state.indices.get_mut(index) {
                stored.docs.remove(id);
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn refresh(&self, index: &str) -> BackendResult<()> {
        self.state.read().resolve_read(index).map(|_| ())
    }

    async fn flush(&self, index: &str) -> BackendResult<()> {
        self.state.read().resolve_read(index).map(|_| ())
    }

    async fn index_exists(&self, index: &str) -> BackendResult<bool> {
        Ok(self.state.read().indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> BackendResult<()> {
        let mut state = self.state.write();
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(BackendError::Api {
                status: 400,
                body: json!({"error": {"type": "resource_already_exists_exception", "index": index}})
                    .to_string(),
            });
        }
        state.create(index, body);
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> BackendResult<bool> {
        Ok(self.state.read().aliases.contains_key(alias))
    }

    async fn put_alias(&self, index: &str, alias: &str) -> BackendResult<()> {
        let mut state = self.state.write();
        if !state.indices.contains_key(index) {
            return Err(BackendError::IndexNotFound(index.to_string()));
        }
        state
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
        Ok(())
    }

    async fn template_exists(&self, name: &str) -> BackendResult<bool> {
        Ok(self.state.read().templates.contains_key(name))
    }

    async fn put_template(&self, name: &str, body: &Value) -> BackendResult<()> {
        self.state.write().templates.insert(name.to_string(), body.clone());
        Ok(())
    }

    async fn translate_sql(&self, sql: &str) -> BackendResult<Value> {
        self.state
            .read()
            .sql
            .get(sql.trim())
            .cloned()
            .ok_or_else(|| bad_request(format!("verification_exception: cannot translate [{sql}]")))
    }
}
