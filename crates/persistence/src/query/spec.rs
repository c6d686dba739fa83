//! The per-operation query specification.

use serde_json::{Map, Value};

use super::filter::{Filter, canonical_field};
use super::predicate::{Direction, Grouping, SortKey};
use crate::context::{QueryContext, RequestContext};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offset {
    Page(u64),
    Skip(u64),
}

/// Accumulates filters, ordering, grouping, paging and context for one operation.
///
/// Building performs no I/O. A `QuerySpec` belongs to exactly one operation;
/// [`ModelQuery`](crate::engine::ModelQuery) owns one and is consumed by its
/// terminal call.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    filter: Filter,
    order: Vec<SortKey>,
    grouping: Grouping,
    distinct: Vec<String>,
    limit: Option<u64>,
    page: Option<u64>,
    offset: Option<Offset>,
    request: Option<RequestContext>,
    context: QueryContext,
}

impl QuerySpec {
    /// Creates an empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition on one field, or combinator arms for `AND`/`OR`/`NOR`.
    pub fn where_field(&mut self, field: &str, value: Value) -> Result<&mut Self, ValidationError> {
        self.filter.apply(field, value)?;
        Ok(self)
    }

    /// Merges a whole filter document. `null` is ignored.
    pub fn where_all(&mut self, filter: Value) -> Result<&mut Self, ValidationError> {
        let parsed = Filter::parse(filter)?;
        self.filter.merge(parsed);
        Ok(self)
    }

    /// Merges an already parsed filter.
    pub fn where_filter(&mut self, filter: Filter) -> &mut Self {
        self.filter.merge(filter);
        self
    }

    /// Appends a sort key. A repeated field moves to the end with the new direction.
    pub fn order_by(&mut self, field: &str, direction: &str) -> &mut Self {
        let field = canonical_field(field);
        self.order.retain(|key| key.field != field);
        self.order.push(SortKey {
            field,
            direction: Direction::parse(direction),
        });
        self
    }

    /// Appends sort keys from a list of `{field: direction}` objects.
    pub fn order_by_all(&mut self, keys: &[Map<String, Value>]) -> &mut Self {
        for key in keys {
            for (field, direction) in key {
                let direction = match direction {
                    Value::String(s) => s.clone(),
                    Value::Number(n) if n.as_i64() == Some(-1) => "desc".to_string(),
                    _ => "asc".to_string(),
                };
                self.order_by(field, &direction);
            }
        }
        self
    }

    /// Groups by a field value.
    pub fn group_by(&mut self, field: &str) -> &mut Self {
        if !self.grouping.fields.iter().any(|f| f == field) {
            self.grouping.fields.push(field.to_string());
        }
        self
    }

    /// Adds a raw group stage entry; a repeated key is replaced.
    pub fn group_by_raw(&mut self, key: &str, expression: Value) -> &mut Self {
        self.grouping.raw.retain(|(k, _)| k != key);
        self.grouping.raw.push((key.to_string(), expression));
        self
    }

    /// Counts distinct values of a field.
    pub fn distinct(&mut self, field: &str) -> &mut Self {
        if !self.distinct.iter().any(|f| f == field) {
            self.distinct.push(field.to_string());
        }
        self
    }

    /// Counts distinct combinations of several fields.
    pub fn distinct_all(&mut self, fields: &[&str]) -> &mut Self {
        for field in fields {
            self.distinct(field);
        }
        self
    }

    /// Limits the number of returned records.
    pub fn take(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Selects a 1-based page; the offset is `limit * (page - 1)`.
    pub fn page(&mut self, page: u64) -> &mut Self {
        let page = page.max(1);
        self.page = Some(page);
        self.offset = Some(Offset::Page(page));
        self
    }

    /// Skips a number of records, replacing any page-derived offset.
    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.offset = Some(Offset::Skip(skip));
        self
    }

    /// Attaches the caller's request context.
    pub fn with_request(&mut self, request: RequestContext) -> &mut Self {
        self.request = Some(request);
        self
    }

    /// Sets the access role and route that select per-model triggers.
    pub fn with_access(&mut self, access_role: Option<String>, route: Option<String>) -> &mut Self {
        self.context.access_role = access_role;
        self.context.route = route;
        self
    }

    /// Merges free-form request parameters.
    pub fn with_params(&mut self, params: Map<String, Value>) -> &mut Self {
        self.context.params.extend(params);
        self
    }

    /// Sets the parent record of a nested operation.
    pub fn with_parent(&mut self, parent: Value) -> &mut Self {
        self.context.parent = Some(parent);
        self
    }

    /// The accumulated filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Mutable access to the accumulated filter.
    pub fn filter_mut(&mut self) -> &mut Filter {
        &mut self.filter
    }

    /// Sort keys in priority order.
    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    /// Grouping configuration.
    pub fn grouping(&self) -> &Grouping {
        &self.grouping
    }

    /// Distinct fields.
    pub fn distinct_fields(&self) -> &[String] {
        &self.distinct
    }

    /// Configured limit.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Requested page, defaulting to 1.
    pub fn current_page(&self) -> u64 {
        self.page.unwrap_or(1)
    }

    /// Effective offset: the last of `page` and `skip` wins.
    pub fn offset(&self) -> u64 {
        match self.offset {
            Some(Offset::Skip(n)) => n,
            Some(Offset::Page(page)) => self.limit.unwrap_or(0) * (page - 1),
            None => 0,
        }
    }

    /// The caller's request context, if any.
    pub fn request(&self) -> Option<&RequestContext> {
        self.request.as_ref()
    }

    /// The trigger-facing query context.
    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// Mutable access to the trigger-facing query context.
    pub fn context_mut(&mut self) -> &mut QueryContext {
        &mut self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_and_skip_last_writer_wins() {
        let mut spec = QuerySpec::new();
        spec.take(10).page(3);
        assert_eq!(spec.offset(), 20);
        assert_eq!(spec.current_page(), 3);

        spec.skip(5);
        assert_eq!(spec.offset(), 5);

        spec.page(2);
        assert_eq!(spec.offset(), 10);

        let mut spec = QuerySpec::new();
        spec.page(0);
        assert_eq!(spec.current_page(), 1);
        assert_eq!(spec.offset(), 0);
    }

    #[test]
    fn test_page_offset_follows_later_limit() {
        let mut spec = QuerySpec::new();
        spec.page(2).take(25);
        assert_eq!(spec.offset(), 25);
    }

    #[test]
    fn test_where_merges() {
        let mut spec = QuerySpec::new();
        spec.where_field("total", json!({"greaterThan": 1}))
            .unwrap()
            .where_all(json!({"total": {"lessThan": 9}, "status": "paid"}))
            .unwrap();
        assert_eq!(
            spec.filter().to_value(),
            json!({"total": {"greaterThan": 1, "lessThan": 9}, "status": "paid"})
        );

        assert!(spec.where_all(json!("nope")).is_err());
    }

    #[test]
    fn test_order_by() {
        let mut spec = QuerySpec::new();
        spec.order_by("createdAt", "DESC").order_by("id", "asc");
        spec.order_by_all(&[json!({"createdAt": 1}).as_object().cloned().unwrap()]);

        let fields: Vec<_> = spec.order().iter().map(|k| k.field.as_str()).collect();
        assert_eq!(fields, ["_id", "createdAt"]);
        assert_eq!(spec.order()[1].direction, Direction::Asc);
    }

    #[test]
    fn test_grouping_and_context() {
        let mut spec = QuerySpec::new();
        spec.group_by("status")
            .group_by("status")
            .group_by_raw("total", json!({"$sum": 1}))
            .group_by_raw("total", json!({"$sum": "$amount"}))
            .distinct_all(&["status", "region"])
            .with_access(Some("admin".into()), Some("orders".into()))
            .with_parent(json!({"id": "p1"}));

        assert_eq!(spec.grouping().fields, ["status".to_string()]);
        assert_eq!(spec.grouping().raw.len(), 1);
        assert_eq!(spec.distinct_fields().len(), 2);
        assert_eq!(spec.context().access_role.as_deref(), Some("admin"));
        assert!(spec.context().parent.is_some());
    }
}
