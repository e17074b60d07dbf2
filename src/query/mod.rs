//! Query Engine.
//!
//! Parses `attr=[op:]value` filter parameters, `tags`/`tags-any`,
//! `sort`, `marker` and `limit`, then executes the resulting plan over
//! a Persistence Gateway snapshot: visibility scoping first (this
//! component owns that), then filters, then sort,
//! then keyset paging. Grounded on an expression-evaluation
//! style in `json/validator.rs` (small dispatch functions over a typed
//! value) applied to query parameters instead of SQL predicates.

use std::collections::BTreeSet;

use chrono::SecondsFormat;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::marker::Marker;
use crate::store::{ArtifactRecord, Viewer};
use crate::types::{FilterOp, TypeDescriptor};
use crate::value::{AttributeValue, ScalarValue};

/// Server-side page-size bounds, threaded down from `Config` so
/// `GLAREDB_MAX_PAGE_SIZE`/`GLAREDB_DEFAULT_PAGE_SIZE` actually govern
/// `limit` instead of a fixed constant.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self { default_limit: 25, max_limit: 1000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
struct Filter {
    attr: String,
    map_key: Option<String>,
    op: FilterOp,
    value: String,
}

/// A `marker` parameter is either the server's own opaque cursor (the
/// `next` link it hands back) or a bare artifact id a client built by
/// hand — both are accepted, same as the original service's `marker=`.
#[derive(Debug, Clone)]
enum MarkerSpec {
    Cursor(Marker),
    ById(Uuid),
}

#[derive(Debug, Default)]
pub struct QuerySpec {
    filters: Vec<Filter>,
    tags_all: Option<BTreeSet<String>>,
    tags_any: Option<BTreeSet<String>>,
    sort: Vec<(String, SortDir)>,
    marker: Option<MarkerSpec>,
    limit: usize,
    /// Set when a filter can never match anything (empty-after-op value,
    /// an unrecognized `visibility` value) — short-circuits execution to
    /// an empty page.
    impossible: bool,
}

pub struct Page {
    pub rows: Vec<ArtifactRecord>,
    pub next_marker: Option<String>,
}

fn split_value(raw: &str) -> (FilterOp, String) {
    if let Some((maybe_op, rest)) = raw.split_once(':')
        && let Some(op) = FilterOp::parse(maybe_op)
    {
        return (op, rest.to_string());
    }
    (FilterOp::Eq, raw.to_string())
}

/// `marker=` accepts the server's own opaque cursor first; if that
/// doesn't decode, a bare artifact id is also valid — a client following
/// a hand-built URL rather than the server's `next` link. The id isn't
/// resolved to sort-key values here (no row set is in scope yet); that
/// happens in `execute`, against whatever sort the request asks for.
fn parse_marker_param(raw: &str) -> ApiResult<MarkerSpec> {
    if let Ok(marker) = Marker::decode(raw) {
        return Ok(MarkerSpec::Cursor(marker));
    }
    Uuid::parse_str(raw).map(MarkerSpec::ById).map_err(|_| ApiError::bad_value("invalid marker"))
}

/// Parses the raw `(key, value)` query parameters (repeats preserved)
/// into an executable spec. `descriptor` supplies `filter_ops`/
/// `sortable` metadata for validation.
pub fn parse(params: &[(String, String)], descriptor: &TypeDescriptor, limits: PageLimits) -> ApiResult<QuerySpec> {
    let mut spec = QuerySpec { limit: limits.default_limit, ..QuerySpec::default() };

    for (key, raw) in params {
        match key.as_str() {
            "tags" => {
                if raw.is_empty() {
                    continue; // bare `tags=`/`tags` matches all
                }
                let set: BTreeSet<String> = raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
                spec.tags_all.get_or_insert_with(BTreeSet::new).extend(set);
            }
            "tags-any" => {
                if raw.is_empty() {
                    continue;
                }
                let set: BTreeSet<String> = raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
                spec.tags_any.get_or_insert_with(BTreeSet::new).extend(set);
            }
            "sort" => {
                for piece in raw.split(',') {
                    if piece.is_empty() {
                        continue;
                    }
                    let (attr, dir) = match piece.split_once(':') {
                        Some((a, "desc")) => (a, SortDir::Desc),
                        Some((a, "asc")) => (a, SortDir::Asc),
                        Some((a, other)) => {
                            return Err(ApiError::bad_value(format!("unknown sort direction '{other}'")));
                        }
                        None => (piece, SortDir::Asc),
                    };
                    validate_sortable(attr, descriptor)?;
                    spec.sort.push((attr.to_string(), dir));
                }
                let non_name = spec.sort.iter().filter(|(a, _)| a != "name").count();
                if non_name > 2 {
                    return Err(ApiError::bad_value("at most two non-name sort keys are allowed"));
                }
            }
            "marker" => {
                spec.marker = Some(parse_marker_param(raw)?);
            }
            "limit" => {
                let n: usize = raw.parse().map_err(|_| ApiError::bad_value("invalid limit"))?;
                spec.limit = n.clamp(1, limits.max_limit);
            }
            attr_key => {
                let (attr, map_key) = match attr_key.split_once('.') {
                    Some((a, k)) => (a, Some(k.to_string())),
                    None => (attr_key, None),
                };
                if raw.is_empty() {
                    // bare empty value (`name=`) matches nothing.
                    spec.impossible = true;
                    continue;
                }
                let (op, value) = split_value(raw);
                if value.is_empty() {
                    // empty value after an explicit op (`name=eq:`).
                    spec.impossible = true;
                    continue;
                }
                validate_filter(attr, map_key.as_deref(), op, &value, descriptor, &mut spec.impossible)?;
                spec.filters.push(Filter { attr: attr.to_string(), map_key, op, value });
            }
        }
    }

    Ok(spec)
}

fn validate_sortable(attr: &str, descriptor: &TypeDescriptor) -> ApiResult<()> {
    match attr {
        "name" | "created_at" | "updated_at" | "activated_at" => Ok(()),
        other => match descriptor.attribute(other) {
            Some(a) if a.sortable => Ok(()),
            Some(_) => Err(ApiError::bad_value(format!("'{other}' is not sortable"))),
            None => Err(ApiError::bad_value(format!("unknown attribute '{other}'"))),
        },
    }
}

fn validate_filter(
    attr: &str,
    map_key: Option<&str>,
    op: FilterOp,
    value: &str,
    descriptor: &TypeDescriptor,
    impossible: &mut bool,
) -> ApiResult<()> {
    match attr {
        "visibility" => {
            if op != FilterOp::Eq {
                return Err(ApiError::bad_value("'visibility' only supports the 'eq' operator"));
            }
            if value != "private" && value != "public" {
                *impossible = true;
            }
            Ok(())
        }
        "status" => {
            if !matches!(op, FilterOp::Eq | FilterOp::Neq | FilterOp::In) {
                return Err(ApiError::bad_value("'status' supports only eq/neq/in"));
            }
            Ok(())
        }
        "name" | "owner" | "type_name" | "version" | "created_at" | "updated_at" | "activated_at" => Ok(()),
        other => {
            let descriptor_attr = descriptor
                .attribute(other)
                .ok_or_else(|| ApiError::bad_value(format!("unknown attribute '{other}'")))?;
            if map_key.is_some() {
                if !matches!(op, FilterOp::Eq | FilterOp::Neq) {
                    return Err(ApiError::bad_value("map-entry filters support only eq/neq"));
                }
            } else if !descriptor_attr.filter_ops.contains(&op) {
                return Err(ApiError::bad_value(format!("'{other}' does not support the '{op:?}' operator")));
            }
            Ok(())
        }
    }
}

fn as_f64(v: &ScalarValue) -> Option<f64> {
    match v {
        ScalarValue::Int(i) => Some(*i as f64),
        ScalarValue::Float(f) => Some(*f),
        _ => None,
    }
}

fn value_eq(current: &ScalarValue, raw: &str) -> bool {
    current.as_str_lossless().as_deref() == Some(raw)
}

fn semver_key(s: &str) -> Vec<u64> {
    s.split(|c: char| c == '.' || c == '-' || c == '+')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

fn cmp_ordered(op: FilterOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match (op, ordering) {
        (FilterOp::Gt, Greater) => true,
        (FilterOp::Gte, Greater | Equal) => true,
        (FilterOp::Lt, Less) => true,
        (FilterOp::Lte, Less | Equal) => true,
        _ => false,
    }
}

fn eval_ordering_filter(op: FilterOp, attr: &str, current: Option<&str>, raw: &str) -> bool {
    let Some(current) = current else { return false };
    if attr == "version" {
        return cmp_ordered(op, semver_key(current).cmp(&semver_key(raw)));
    }
    match (current.parse::<f64>(), raw.parse::<f64>()) {
        (Ok(a), Ok(b)) => cmp_ordered(op, a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)),
        _ => cmp_ordered(op, current.cmp(raw)),
    }
}

fn intrinsic_string(record: &ArtifactRecord, attr: &str) -> Option<String> {
    match attr {
        "name" => record.name.clone(),
        "owner" => Some(record.owner.clone()),
        "type_name" => Some(record.type_name.clone()),
        "version" => record.version.clone(),
        "status" => Some(record.status.as_str().to_string()),
        "visibility" => Some(record.visibility.as_str().to_string()),
        "created_at" => Some(record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        "updated_at" => Some(record.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        "activated_at" => record.activated_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        _ => None,
    }
}

fn matches_filter(record: &ArtifactRecord, filter: &Filter) -> bool {
    if let Some(current) = intrinsic_string(record, filter.attr.as_str()) {
        return match filter.op {
            FilterOp::Eq => current == filter.value,
            FilterOp::Neq => current != filter.value,
            FilterOp::In => filter.value.split(',').any(|v| v == current),
            _ => eval_ordering_filter(filter.op, &filter.attr, Some(&current), &filter.value),
        };
    }

    match record.properties.get(filter.attr.as_str()) {
        Some(AttributeValue::Scalar(v)) => match filter.op {
            FilterOp::Eq => value_eq(v, &filter.value),
            FilterOp::Neq => !value_eq(v, &filter.value),
            FilterOp::In => filter.value.split(',').any(|raw| value_eq(v, raw)),
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                match (as_f64(v), filter.value.parse::<f64>()) {
                    (Some(a), Ok(b)) => cmp_ordered(filter.op, a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)),
                    _ => {
                        if let ScalarValue::Str(s) = v {
                            cmp_ordered(filter.op, s.as_str().cmp(filter.value.as_str()))
                        } else {
                            false
                        }
                    }
                }
            }
        },
        Some(AttributeValue::List(items)) => match filter.op {
            FilterOp::Eq => items.iter().any(|v| value_eq(v, &filter.value)),
            FilterOp::Neq => !items.iter().any(|v| value_eq(v, &filter.value)),
            _ => false,
        },
        Some(AttributeValue::Map(map)) => {
            let Some(key) = filter.map_key.as_deref() else { return false };
            match map.get(key) {
                Some(v) => match filter.op {
                    FilterOp::Eq => value_eq(v, &filter.value),
                    FilterOp::Neq => !value_eq(v, &filter.value),
                    _ => false,
                },
                None => filter.op == FilterOp::Neq,
            }
        }
        _ => false,
    }
}

fn sort_value(record: &ArtifactRecord, attr: &str) -> Option<ScalarValue> {
    if let Some(s) = intrinsic_string(record, attr) {
        return Some(ScalarValue::Str(s));
    }
    match record.properties.get(attr) {
        Some(AttributeValue::Scalar(v)) => Some(v.clone()),
        _ => None,
    }
}

fn compare_records(a: &ArtifactRecord, b: &ArtifactRecord, sort: &[(String, SortDir)]) -> std::cmp::Ordering {
    for (attr, dir) in sort {
        let ordering = match (sort_value(a, attr), sort_value(b, attr)) {
            (Some(x), Some(y)) => x.compare(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        let ordering = if *dir == SortDir::Desc { ordering.reverse() } else { ordering };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    // Total-order tiebreaker: `id desc`.
    b.id.cmp(&a.id)
}

fn marker_tuple(record: &ArtifactRecord, sort: &[(String, SortDir)]) -> Marker {
    Marker { sort_values: sort.iter().map(|(attr, _)| sort_value(record, attr)).collect(), id: record.id }
}

fn after_marker(candidate: &ArtifactRecord, marker: &Marker, sort: &[(String, SortDir)]) -> bool {
    for (i, (attr, dir)) in sort.iter().enumerate() {
        let current = sort_value(candidate, attr);
        let marker_value = marker.sort_values.get(i).cloned().flatten();
        let ordering = match (&current, &marker_value) {
            (Some(x), Some(y)) => x.compare(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        let ordering = if *dir == SortDir::Desc { ordering.reverse() } else { ordering };
        if ordering != std::cmp::Ordering::Equal {
            return ordering == std::cmp::Ordering::Greater;
        }
    }
    candidate.id.cmp(&marker.id) == std::cmp::Ordering::Less
}

/// Resolves a bare artifact id into a keyset marker by finding the row
/// and computing its sort-key values for the requested sort — a client
/// following a hand-built `?marker=<id>` URL rather than the server's
/// own `next` link still pages correctly under any sort.
fn marker_from_id(rows: &[ArtifactRecord], id: Uuid, sort: &[(String, SortDir)]) -> ApiResult<Marker> {
    rows.iter()
        .find(|r| r.id == id)
        .map(|r| marker_tuple(r, sort))
        .ok_or_else(|| ApiError::bad_value("marker artifact not found"))
}

/// Executes `spec` over a type's full non-deleted row set, applying
/// visibility scoping first (this component's job),
/// then filters, then sort + keyset paging.
pub fn execute(spec: &QuerySpec, rows: Vec<ArtifactRecord>, viewer: &Viewer) -> ApiResult<Page> {
    if spec.impossible {
        return Ok(Page { rows: Vec::new(), next_marker: None });
    }

    let marker = match &spec.marker {
        Some(MarkerSpec::Cursor(marker)) => Some(marker.clone()),
        Some(MarkerSpec::ById(id)) => Some(marker_from_id(&rows, *id, &spec.sort)?),
        None => None,
    };

    let mut visible: Vec<ArtifactRecord> = rows
        .into_iter()
        .filter(|r| viewer.can_see(r))
        .filter(|r| spec.filters.iter().all(|f| matches_filter(r, f)))
        .filter(|r| match &spec.tags_all {
            Some(required) => required.is_subset(&r.tags),
            None => true,
        })
        .filter(|r| match &spec.tags_any {
            Some(any) => any.iter().any(|t| r.tags.contains(t)),
            None => true,
        })
        .collect();

    visible.sort_by(|a, b| compare_records(a, b, &spec.sort));

    if let Some(marker) = &marker {
        visible.retain(|r| after_marker(r, marker, &spec.sort));
    }

    let has_more = visible.len() > spec.limit;
    visible.truncate(spec.limit);

    // The server's own `next` link is always a bare id, same format
    // `marker=` accepts from a hand-built client URL — resolved afresh
    // against whatever sort a later request asks for.
    let next_marker = if has_more { visible.last().map(|last| last.id.to_string()) } else { None };

    Ok(Page { rows: visible, next_marker })
}
