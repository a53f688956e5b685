//! In-memory JSON collections standing in for the database-backed resources.
//!
//! Records are JSON objects with a generated `id` and `createdAt`. Lists
//! support equality filters plus `select`, `sort`, `page` and `limit`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pipeline::stages::ParsedBody;

pub type Record = Map<String, Value>;

const DEFAULT_LIMIT: usize = 25;
const RESERVED: [&str; 4] = ["select", "sort", "page", "limit"];
const READ_ONLY: [&str; 2] = ["id", "createdAt"];

/// Shape rules for one resource.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub entity: &'static str,
    pub required: &'static [&'static str],
    pub unique: Option<&'static str>,
}

pub const BOOTCAMP: Schema = Schema {
    entity: "Bootcamp",
    required: &["name", "description"],
    unique: Some("name"),
};

pub const COURSE: Schema = Schema {
    entity: "Course",
    required: &["title", "description"],
    unique: None,
};

pub const USER: Schema = Schema {
    entity: "User",
    required: &["name", "email"],
    unique: Some("email"),
};

pub const REVIEW: Schema = Schema {
    entity: "Review",
    required: &["title", "text"],
    unique: None,
};

/// Parsed list parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<(String, String)>,
    pub select: Option<Vec<String>>,
    pub sort: Vec<(String, bool)>,
    pub page: usize,
    pub limit: usize,
}

impl ListQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let page = parse_positive(params, "page")?.unwrap_or(1);
        let limit = parse_positive(params, "limit")?.unwrap_or(DEFAULT_LIMIT);

        let select = params.get("select").map(|s| split_list(s));
        let sort = params
            .get("sort")
            .map(|s| {
                split_list(s)
                    .into_iter()
                    .map(|field| match field.strip_prefix('-') {
                        Some(f) => (f.to_string(), true),
                        None => (field, false),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut filters: Vec<(String, String)> = params
            .iter()
            .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        filters.sort();

        Ok(Self {
            filters,
            select,
            sort,
            page,
            limit,
        })
    }
}

fn parse_positive(params: &HashMap<String, String>, key: &str) -> Result<Option<usize>> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(Error::BadRequest(format!(
                "'{key}' must be a positive integer, got {raw:?}"
            ))),
        },
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// One page of a list.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub total: usize,
    pub records: Vec<Record>,
    pub next: Option<usize>,
    pub prev: Option<usize>,
    pub limit: usize,
}

#[derive(Debug)]
pub struct Collection {
    schema: Schema,
    records: RwLock<Vec<Record>>,
}

impl Collection {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self, query: &ListQuery) -> Page {
        let mut matched: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|r| {
                query
                    .filters
                    .iter()
                    .all(|(k, v)| r.get(k).is_some_and(|field| field_matches(field, v)))
            })
            .cloned()
            .collect();

        if !query.sort.is_empty() {
            matched.sort_by(|a, b| {
                for (field, desc) in &query.sort {
                    let ord = compare_fields(a.get(field), b.get(field));
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let total = matched.len();
        let start = (query.page - 1).saturating_mul(query.limit);
        let end = start.saturating_add(query.limit);

        let records = matched
            .into_iter()
            .skip(start)
            .take(query.limit)
            .map(|r| match &query.select {
                Some(fields) => project(r, fields),
                None => r,
            })
            .collect();

        Page {
            total,
            records,
            next: (end < total).then_some(query.page + 1),
            prev: (start > 0).then(|| query.page - 1),
            limit: query.limit,
        }
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        let id = parse_id(id)?;
        self.records
            .read()
            .iter()
            .find(|r| has_id(r, &id))
            .cloned()
            .ok_or_else(|| Error::not_found(self.schema.entity, &id))
    }

    pub fn create(&self, fields: Record) -> Result<Record> {
        let mut record: Record = fields
            .into_iter()
            .filter(|(k, _)| !READ_ONLY.contains(&k.as_str()))
            .collect();
        self.validate(&record)?;

        record.insert("id".into(), json!(Uuid::new_v4().to_string()));
        record.insert("createdAt".into(), json!(chrono::Utc::now().to_rfc3339()));

        let mut records = self.records.write();
        self.check_unique(&records, &record, None)?;
        records.push(record.clone());

        tracing::debug!(entity = self.schema.entity, "record created");
        Ok(record)
    }

    pub fn update(&self, id: &str, fields: Record) -> Result<Record> {
        let id = parse_id(id)?;
        let mut records = self.records.write();
        let index = records
            .iter()
            .position(|r| has_id(r, &id))
            .ok_or_else(|| Error::not_found(self.schema.entity, &id))?;

        let mut updated = records[index].clone();
        for (key, value) in fields {
            if !READ_ONLY.contains(&key.as_str()) {
                updated.insert(key, value);
            }
        }
        self.validate(&updated)?;
        self.check_unique(&records, &updated, Some(index))?;

        records[index] = updated.clone();
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let id = parse_id(id)?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| !has_id(r, &id));
        if records.len() == before {
            return Err(Error::not_found(self.schema.entity, &id));
        }
        Ok(())
    }

    fn validate(&self, record: &Record) -> Result<()> {
        let missing: Vec<String> = self
            .schema
            .required
            .iter()
            .filter(|field| match record.get(**field) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| format!("Please add a {field}"))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(missing))
        }
    }

    fn check_unique(&self, records: &[Record], record: &Record, skip: Option<usize>) -> Result<()> {
        let Some(field) = self.schema.unique else {
            return Ok(());
        };
        let Some(value) = record.get(field) else {
            return Ok(());
        };
        let clash = records
            .iter()
            .enumerate()
            .any(|(i, r)| Some(i) != skip && r.get(field) == Some(value));
        if clash {
            Err(Error::Duplicate)
        } else {
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidId(raw.to_string()))
}

fn has_id(record: &Record, id: &Uuid) -> bool {
    record.get("id").and_then(Value::as_str) == Some(id.to_string().as_str())
}

fn field_matches(field: &Value, wanted: &str) -> bool {
    match field {
        Value::String(s) => s == wanted,
        Value::Array(items) => items.iter().any(|item| field_matches(item, wanted)),
        other => other.to_string() == wanted,
    }
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn project(record: Record, fields: &[String]) -> Record {
    record
        .into_iter()
        .filter(|(k, _)| k == "id" || fields.iter().any(|f| f == k))
        .collect()
}

/// The pipeline-parsed body as a JSON object. Raw bodies the parsers did not
/// claim never reach a record; they count as an empty object.
pub fn json_object(body: Option<Extension<ParsedBody>>) -> Result<Record> {
    match body {
        None => Ok(Record::new()),
        Some(Extension(ParsedBody(Value::Object(map)))) => Ok(map),
        Some(_) => Err(Error::InvalidBody("expected a JSON object".into())),
    }
}

/// CRUD routes over a collection. Callers add extra routes, then the state.
pub fn routes() -> Router<Arc<Collection>> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(fetch).put(update).delete(remove))
}

pub fn router(collection: Arc<Collection>) -> Router {
    routes().with_state(collection)
}

async fn list(
    State(collection): State<Arc<Collection>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let query = ListQuery::from_params(&params)?;
    let page = collection.list(&query);

    let mut pagination = Map::new();
    if let Some(next) = page.next {
        pagination.insert("next".into(), json!({ "page": next, "limit": page.limit }));
    }
    if let Some(prev) = page.prev {
        pagination.insert("prev".into(), json!({ "page": prev, "limit": page.limit }));
    }

    Ok(Json(json!({
        "success": true,
        "count": page.records.len(),
        "total": page.total,
        "pagination": pagination,
        "data": page.records,
    })))
}

async fn fetch(
    State(collection): State<Arc<Collection>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let record = collection.get(&id)?;
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn create(
    State(collection): State<Arc<Collection>>,
    body: Option<Extension<ParsedBody>>,
) -> Result<(StatusCode, Json<Value>)> {
    let record = collection.create(json_object(body)?)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": record })),
    ))
}

async fn update(
    State(collection): State<Arc<Collection>>,
    Path(id): Path<String>,
    body: Option<Extension<ParsedBody>>,
) -> Result<Json<Value>> {
    let record = collection.update(&id, json_object(body)?)?;
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn remove(
    State(collection): State<Arc<Collection>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    collection.delete(&id)?;
    Ok(Json(json!({ "success": true, "data": {} })))
}
