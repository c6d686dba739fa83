use serde_json::Value;

use super::{Dialect, SqlParam, columns, is_textual, quote};
use crate::backends::{Accumulator, Record};
use crate::coerce::{Calculated, float_value, format_timestamp};
use crate::model::{FieldKind, Model, PRIMARY_KEY};
use crate::query::{Predicate, Selection};

const TRUE: &str = "1 = 1";
const FALSE: &str = "1 = 0";

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Statement text.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
}

/// Compiles predicates and statements for one model.
#[derive(Debug)]
pub struct SqlBuilder<'a> {
    dialect: &'a dyn Dialect,
    model: &'a Model,
    params: Vec<SqlParam>,
}

impl<'a> SqlBuilder<'a> {
    /// Creates a builder with no bound parameters.
    pub fn new(dialect: &'a dyn Dialect, model: &'a Model) -> Self {
        Self {
            dialect,
            model,
            params: Vec::new(),
        }
    }

    fn table(&self) -> String {
        quote(self.model.collection())
    }

    fn bind(&mut self, param: SqlParam) -> String {
        let placeholder = self.dialect.placeholder(self.params.len() + 1, &param);
        self.params.push(param);
        placeholder
    }

    fn bind_value(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.value_placeholder(self.params.len())
    }

    /// Resolves a field to its column. Unknown fields compile to `NULL`.
    fn column(&self, field: &str) -> (String, Option<FieldKind>) {
        if field == PRIMARY_KEY || field == "id" {
            return (quote(PRIMARY_KEY), Some(FieldKind::Id));
        }
        match self.model.field(field) {
            Some(descriptor) => (quote(&descriptor.name), Some(descriptor.kind)),
            None => ("NULL".to_string(), None),
        }
    }

    fn not(&self, inner: &str) -> String {
        format!("NOT COALESCE(({}), {})", inner, self.dialect.false_literal())
    }

    /// Compiles a predicate into a boolean SQL expression.
    pub fn condition(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Eq(field, Value::Null) => format!("{} IS NULL", self.column(field).0),
            Predicate::Eq(field, value) => {
                let (column, kind) = self.column(field);
                let param = SqlParam::operand(kind, value);
                let column = self.dialect.operand_column(&column, kind, &param);
                format!("{} = {}", column, self.bind(param))
            }
            Predicate::Cmp(field, comparison, operand) => {
                let (column, kind) = self.column(field);
                if !operand.comparable_with(kind) {
                    return FALSE.to_string();
                }
                let param = match (operand, kind) {
                    (Calculated::Timestamp(ts), _) => SqlParam::Text(Some(format_timestamp(ts))),
                    (Calculated::Number(n), Some(k)) if is_textual(k) => {
                        SqlParam::Text(Some(float_value(*n).to_string()))
                    }
                    (Calculated::Number(n), _) => SqlParam::operand(None, &float_value(*n)),
                };
                let column = self.dialect.operand_column(&column, kind, &param);
                format!("{} {} {}", column, comparison.sql(), self.bind(param))
            }
            Predicate::In(field, values) => {
                let (column, kind) = self.column(field);
                let mut parts = Vec::new();
                // Text never equals a typed column, so such elements are dropped
                // and every bound element shares the column's type.
                let params: Vec<SqlParam> = values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| SqlParam::operand(kind, v))
                    .filter(|p| !p.is_text() || kind.is_none_or(is_textual))
                    .collect();
                if let Some(first) = params.first() {
                    let compared = self.dialect.operand_column(&column, kind, first);
                    let placeholders: Vec<String> =
                        params.into_iter().map(|p| self.bind(p)).collect();
                    parts.push(format!("{} IN ({})", compared, placeholders.join(", ")));
                }
                if values.iter().any(Value::is_null) {
                    parts.push(format!("{} IS NULL", column));
                }
                match parts.len() {
                    0 => FALSE.to_string(),
                    1 => parts.remove(0),
                    _ => format!("({})", parts.join(" OR ")),
                }
            }
            Predicate::All(field, values) => {
                if values.is_empty() {
                    return TRUE.to_string();
                }
                let (column, _) = self.column(field);
                let parts: Vec<String> = values
                    .iter()
                    .map(|value| {
                        let param = self.dialect.contains_param(value);
                        let placeholder = self.bind(param);
                        self.dialect.array_contains(&column, &placeholder)
                    })
                    .collect();
                format!("({})", parts.join(" AND "))
            }
            Predicate::Exists(field, true) => format!("{} IS NOT NULL", self.column(field).0),
            Predicate::Exists(field, false) => format!("{} IS NULL", self.column(field).0),
            Predicate::Regex(field, pattern) => {
                let (column, kind) = self.column(field);
                if kind.is_some_and(|k| !is_textual(k)) {
                    return FALSE.to_string();
                }
                let placeholder = self.bind(SqlParam::Text(Some(pattern.clone())));
                self.dialect.regex(&column, &placeholder)
            }
            Predicate::Type(field, type_name) => match self.column(field) {
                (column, Some(FieldKind::Date)) if type_name == "date" => {
                    format!("{} IS NOT NULL", column)
                }
                _ => FALSE.to_string(),
            },
            Predicate::Not(inner) => {
                let inner = self.condition(inner);
                self.not(&inner)
            }
            Predicate::And(parts) => self.junction(parts, " AND ", TRUE),
            Predicate::Or(parts) => self.junction(parts, " OR ", FALSE),
            Predicate::Nor(parts) => {
                let any = self.junction(parts, " OR ", FALSE);
                self.not(&any)
            }
        }
    }

    fn junction(&mut self, parts: &[Predicate], separator: &str, empty: &str) -> String {
        let mut compiled: Vec<String> = parts.iter().map(|p| self.condition(p)).collect();
        match compiled.len() {
            0 => empty.to_string(),
            1 => compiled.remove(0),
            _ => format!("({})", compiled.join(separator)),
        }
    }

    fn finish(self, sql: String) -> SqlStatement {
        SqlStatement {
            sql,
            params: self.params,
        }
    }

    /// `SELECT` of every column, ordered and paged.
    pub fn select(mut self, selection: &Selection) -> SqlStatement {
        let columns: Vec<String> = columns(self.model).iter().map(|(c, _)| quote(c)).collect();
        let condition = self.condition(&selection.predicate);

        let mut order: Vec<String> = selection
            .order
            .iter()
            .filter_map(|key| match self.column(&key.field) {
                (_, None) => None,
                (column, Some(_)) => Some(format!(
                    "{} {}{}",
                    column,
                    match key.direction {
                        crate::query::Direction::Asc => "ASC",
                        crate::query::Direction::Desc => "DESC",
                    },
                    self.dialect.nulls_order(key.direction)
                )),
            })
            .collect();
        order.push(format!("{} ASC", self.dialect.sequence_column()));

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}{}",
            columns.join(", "),
            self.table(),
            condition,
            order.join(", "),
            self.dialect.limit_clause(selection.limit, selection.offset)
        );
        self.finish(sql)
    }

    /// `COUNT` of matching rows, or of distinct combinations of the selection's distinct fields.
    pub fn count(mut self, selection: &Selection) -> SqlStatement {
        let condition = self.condition(&selection.predicate);
        let sql = if selection.distinct.is_empty() {
            format!("SELECT COUNT(*) FROM {} WHERE {}", self.table(), condition)
        } else {
            let fields: Vec<String> = selection
                .distinct
                .iter()
                .enumerate()
                .map(|(i, field)| format!("{} AS d{}", self.column(field).0, i))
                .collect();
            format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT {} FROM {} WHERE {}) AS distinct_rows",
                fields.join(", "),
                self.table(),
                condition
            )
        };
        self.finish(sql)
    }

    /// Scalar aggregate, with the kind its result decodes as.
    ///
    /// Returns `None` when the field is unknown or a numeric accumulator meets
    /// a non-numeric field; the caller reports the accumulator's empty value.
    pub fn aggregate(
        mut self,
        predicate: &Predicate,
        accumulator: Accumulator,
        field: &str,
    ) -> Option<(SqlStatement, FieldKind)> {
        let (column, kind) = self.column(field);
        let kind = kind?;
        let numeric = matches!(kind, FieldKind::Number | FieldKind::Float);
        if accumulator.is_numeric() && !numeric {
            return None;
        }
        let result_kind = if accumulator.is_numeric() {
            FieldKind::Float
        } else {
            kind
        };

        let condition = self.condition(predicate);
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.dialect.aggregate(accumulator, &column),
            self.table(),
            condition
        );
        Some((self.finish(sql), result_kind))
    }

    /// `INSERT` of one record; missing fields are written as `NULL`.
    pub fn insert(mut self, record: &Record) -> SqlStatement {
        let columns = columns(self.model);
        let mut names = Vec::with_capacity(columns.len());
        let mut placeholders = Vec::with_capacity(columns.len());
        for (name, kind) in &columns {
            let value = record.get(name).unwrap_or(&Value::Null);
            names.push(quote(name));
            placeholders.push(self.bind_value(SqlParam::for_kind(*kind, value)));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            names.join(", "),
            placeholders.join(", ")
        );
        self.finish(sql)
    }

    /// `UPDATE` of the stored fields present in `changes` on the listed rows.
    ///
    /// Returns `None` when there is nothing to write.
    pub fn update(mut self, ids: &[String], changes: &Record) -> Option<SqlStatement> {
        if ids.is_empty() {
            return None;
        }
        let mut assignments = Vec::new();
        for (name, kind) in columns(self.model).into_iter().skip(1) {
            if let Some(value) = changes.get(&name) {
                let placeholder = self.bind_value(SqlParam::for_kind(kind, value));
                assignments.push(format!("{} = {}", quote(&name), placeholder));
            }
        }
        if assignments.is_empty() {
            return None;
        }

        let ids: Vec<String> = ids
            .iter()
            .map(|id| self.bind(SqlParam::Text(Some(id.clone()))))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} IN ({})",
            self.table(),
            assignments.join(", "),
            quote(PRIMARY_KEY),
            ids.join(", ")
        );
        Some(self.finish(sql))
    }

    /// `DELETE` of matching rows.
    pub fn delete(mut self, predicate: &Predicate) -> SqlStatement {
        let condition = self.condition(predicate);
        let sql = format!("DELETE FROM {} WHERE {}", self.table(), condition);
        self.finish(sql)
    }

    /// `CREATE TABLE` and index statements for the model.
    pub fn create_table(&self) -> Vec<String> {
        let mut definitions: Vec<String> = Vec::new();
        if let Some(sequence) = self.dialect.sequence_definition() {
            definitions.push(sequence.to_string());
        }
        definitions.push(format!("{} TEXT PRIMARY KEY", quote(PRIMARY_KEY)));
        for (name, kind) in columns(self.model).into_iter().skip(1) {
            definitions.push(format!("{} {}", quote(&name), self.dialect.column_type(kind)));
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table(),
            definitions.join(", ")
        )];
        statements.extend(self.indexes());
        statements
    }

    /// `ALTER TABLE` statement adding a stored field.
    pub fn add_column(&self, field: &str, kind: FieldKind) -> String {
        format!(
            "ALTER TABLE {} {} {} {}",
            self.table(),
            self.dialect.add_column(),
            quote(field),
            self.dialect.column_type(kind)
        )
    }

    fn indexes(&self) -> Vec<String> {
        let mut indexed: Vec<&str> = self.model.parent_keys().iter().map(String::as_str).collect();
        if self.model.is_tenant_scoped() {
            indexed.push(crate::model::TENANT_FIELD);
        }
        indexed
            .into_iter()
            .map(|field| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote(&format!("{}_{}_idx", self.model.collection(), field)),
                    self.table(),
                    quote(field)
                )
            })
            .collect()
    }
}
