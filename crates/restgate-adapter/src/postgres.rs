//! The PostgreSQL `StorageAdapter` implementation.
//!
//! One table per Scheme (schema-qualified by the adapter's configured
//! schema), `id` as the oid primary key. `Object`/`File`/`Image` fields
//! are integer foreign-key columns on the owning table; `Array` fields
//! are `jsonb` columns. `Set`/`View` relations are never columns on the
//! owning table: a plain reverse collection is resolved by joining the
//! child table on its own foreign-key column (`Field::foreign_field`),
//! while a Reference-Set (`FieldFlags::reference_set`) or a `View` used
//! through `add_to_view`/`remove_from_view`/`get_reference_parents` is
//! backed by a dedicated join table named after the field
//! (`__rel_{field}`, columns `parent_id`, `child_id`) — see DESIGN.md
//! for why the join table is keyed by field name alone.
//!
//! One `PostgresAdapter` wraps a single connection checked out from the
//! pool for the lifetime of one request; `begin`/`commit`/`cancel` take
//! no argument because there is exactly one transaction in flight per
//! instance, matching the Storage Adapter contract's signature.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Object as PooledConnection;
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use restgate_core::adapter::{FieldTarget, StorageAdapter, Worker};
use restgate_core::error::{AdapterError, Error, Result};
use restgate_core::query::{Comparator, OrderDirection, Predicate, Query, QueryList};
use restgate_core::scheme::{Field, FieldType, Scheme, SchemeRegistry, Transform};
use restgate_core::user::{Auth, User};
use restgate_core::value::{meta_keys, Dict, Value};

use crate::builder::SqlFragment;
use crate::delete::DeleteBuilder;
use crate::expr::Expr;
use crate::identifier::{escape_ident, from_qi, QualifiedIdentifier};
use crate::insert::InsertBuilder;
use crate::param::SqlParam;
use crate::select::SelectBuilder;
use crate::update::UpdateBuilder;

const OID_COLUMN: &str = "id";
const SCHEME_DELTA_TABLE: &str = "__scheme_delta";
const VIEW_DELTA_TABLE: &str = "__view_delta";
const KV_TABLE: &str = "__kv";
const FILES_TABLE: &str = "__files";
const BROADCAST_CHANNEL: &str = "restgate_broadcast";

/// Storage Adapter over a single checked-out PostgreSQL connection.
pub struct PostgresAdapter {
    client: PooledConnection,
    registry: Arc<dyn SchemeRegistry>,
    schema: String,
    /// Name of the Scheme `authorize_user` looks rows up in — the
    /// contract carries no scheme argument, so the adapter is told once
    /// at construction time which scheme holds principals.
    auth_scheme: String,
}

impl PostgresAdapter {
    pub fn new(
        client: PooledConnection,
        registry: Arc<dyn SchemeRegistry>,
        schema: impl Into<String>,
        auth_scheme: impl Into<String>,
    ) -> Self {
        Self { client, registry, schema: schema.into(), auth_scheme: auth_scheme.into() }
    }

    fn qi(&self, name: &str) -> QualifiedIdentifier {
        QualifiedIdentifier::new(self.schema.clone(), name.to_string())
    }

    fn join_table_qi(&self, field_name: &str) -> QualifiedIdentifier {
        QualifiedIdentifier::new(self.schema.clone(), format!("__rel_{field_name}"))
    }

    fn scheme(&self, name: &str) -> Result<&Scheme> {
        self.registry.get(name).ok_or_else(|| Error::NotFound(format!("unknown scheme {name}")))
    }

    async fn exec(&self, frag: SqlFragment) -> Result<u64> {
        let (sql, params) = frag.build();
        let stmt = self.client.prepare(&sql).await.map_err(pg_err)?;
        self.client.execute(&stmt, &param_refs(&params)).await.map_err(pg_err)
    }

    async fn query_one_opt(&self, frag: SqlFragment) -> Result<Option<Row>> {
        let (sql, params) = frag.build();
        let stmt = self.client.prepare(&sql).await.map_err(pg_err)?;
        self.client.query_opt(&stmt, &param_refs(&params)).await.map_err(pg_err)
    }

    async fn query_one(&self, frag: SqlFragment) -> Result<Row> {
        let (sql, params) = frag.build();
        let stmt = self.client.prepare(&sql).await.map_err(pg_err)?;
        self.client.query_one(&stmt, &param_refs(&params)).await.map_err(pg_err)
    }

    async fn query_many(&self, frag: SqlFragment) -> Result<Vec<Row>> {
        let (sql, params) = frag.build();
        let stmt = self.client.prepare(&sql).await.map_err(pg_err)?;
        self.client.query(&stmt, &param_refs(&params)).await.map_err(pg_err)
    }

    async fn select_by_oid(&self, scheme: &Scheme, oid: i64) -> Result<Value> {
        let mut list = QueryList::new(scheme.name.clone());
        list.last_mut().query.oid = Some(oid);
        let worker = Worker::new(self.schema.clone());
        self.select(&worker, &list).await
    }

    /// Builds the `FROM ... [INNER JOIN ...]*` clause for a Query List,
    /// plus every item's own predicates (qualified to its own alias)
    /// and the alias bound to the effective (last) item.
    fn from_clause(&self, list: &QueryList) -> Result<(SqlFragment, Vec<Expr>, String)> {
        let items = list.items();
        let mut frag = SqlFragment::new();
        let mut where_exprs = Vec::new();
        let mut last_alias = String::new();

        for (i, item) in items.iter().enumerate() {
            let alias = format!("t{i}");
            let scheme = self.scheme(&item.scheme)?;

            if i == 0 {
                frag.push(&from_qi(&self.qi(&item.scheme)));
                frag.push(" AS ");
                frag.push(&escape_ident(&alias));
            } else {
                let prev_item = &items[i - 1];
                let prev_alias = format!("t{}", i - 1);
                let prev_scheme = self.scheme(&prev_item.scheme)?;
                let ref_field_name = item
                    .ref_field
                    .as_deref()
                    .ok_or_else(|| Error::InvalidPath("relation item missing its ref field".into()))?;
                let field = prev_scheme
                    .field(ref_field_name)
                    .ok_or_else(|| Error::UnknownField(ref_field_name.to_string()))?;

                let condition = match field.field_type {
                    FieldType::Object => {
                        format!("{} = {}", qcol(&prev_alias, ref_field_name), qcol(&alias, OID_COLUMN))
                    }
                    FieldType::Set | FieldType::View if field.flags.reference_set => {
                        let rel_alias = format!("r{i}");
                        let rel_qi = self.join_table_qi(ref_field_name);
                        frag.push(" INNER JOIN ");
                        frag.push(&from_qi(&rel_qi));
                        frag.push(" AS ");
                        frag.push(&escape_ident(&rel_alias));
                        frag.push(" ON ");
                        frag.push(&format!("{} = {}", qcol(&rel_alias, "parent_id"), qcol(&prev_alias, OID_COLUMN)));
                        format!("{} = {}", qcol(&alias, OID_COLUMN), qcol(&rel_alias, "child_id"))
                    }
                    FieldType::Set | FieldType::View => {
                        let back_col = field.foreign_field.clone().unwrap_or_else(|| ref_field_name.to_string());
                        format!("{} = {}", qcol(&alias, &back_col), qcol(&prev_alias, OID_COLUMN))
                    }
                    _ => {
                        return Err(Error::InvalidPath(format!("{ref_field_name} is not a navigable relation")));
                    }
                };

                frag.push(" INNER JOIN ");
                frag.push(&from_qi(&self.qi(&item.scheme)));
                frag.push(" AS ");
                frag.push(&escape_ident(&alias));
                frag.push(" ON ");
                frag.push(&condition);
            }

            where_exprs.extend(item_predicates(&alias, scheme, &item.query)?);
            last_alias = alias;
        }

        Ok((frag, where_exprs, last_alias))
    }
}

fn qcol(alias: &str, col: &str) -> String {
    format!("{}.{}", escape_ident(alias), escape_ident(col))
}

fn qualified_cmp(alias: &str, col: &str, op: &str, param: SqlParam) -> Expr {
    let mut frag = SqlFragment::new();
    frag.push(&qcol(alias, col));
    frag.push(op);
    frag.push_param(param);
    Expr::from_fragment(frag)
}

fn qualified_fts(alias: &str, col: &str, query: &str, language: Option<&str>) -> Expr {
    let mut frag = SqlFragment::new();
    frag.push(&qcol(alias, col));
    frag.push(" @@ ");
    frag.push("to_tsquery(");
    if let Some(lang) = language {
        frag.push_param(lang.to_string());
        frag.push(", ");
    }
    frag.push_param(query.to_string());
    frag.push(")");
    Expr::from_fragment(frag)
}

fn qualified_order(alias: &str, field: &str, dir: OrderDirection) -> SqlFragment {
    let mut frag = SqlFragment::raw(qcol(alias, field));
    frag.push(match dir {
        OrderDirection::Asc => " ASC",
        OrderDirection::Desc => " DESC",
    });
    frag
}

fn predicate_expr(alias: &str, field: &Field, p: &Predicate) -> Expr {
    let v1 = value_to_param(field, &p.value1);
    match p.comparator {
        Comparator::Eq => qualified_cmp(alias, &p.field, " = ", v1),
        Comparator::Neq => qualified_cmp(alias, &p.field, " <> ", v1),
        Comparator::Lt => qualified_cmp(alias, &p.field, " < ", v1),
        Comparator::Le => qualified_cmp(alias, &p.field, " <= ", v1),
        Comparator::Gt => qualified_cmp(alias, &p.field, " > ", v1),
        Comparator::Ge => qualified_cmp(alias, &p.field, " >= ", v1),
        Comparator::Bw | Comparator::Be | Comparator::Nbw | Comparator::Nbe => {
            let v2 = p.value2.as_ref().map(|v| value_to_param(field, v)).unwrap_or(SqlParam::Null);
            let exclusive = matches!(p.comparator, Comparator::Bw | Comparator::Nbw);
            let lo = qualified_cmp(alias, &p.field, if exclusive { " > " } else { " >= " }, v1);
            let hi = qualified_cmp(alias, &p.field, if exclusive { " < " } else { " <= " }, v2);
            let between = lo.and(hi);
            if matches!(p.comparator, Comparator::Nbw | Comparator::Nbe) {
                between.not()
            } else {
                between
            }
        }
    }
}

fn item_predicates(alias: &str, scheme: &Scheme, query: &Query) -> Result<Vec<Expr>> {
    let mut exprs = Vec::new();

    if let Some(oid) = query.oid {
        exprs.push(qualified_cmp(alias, OID_COLUMN, " = ", SqlParam::Int(oid)));
    }

    if let Some(alias_value) = &query.alias {
        let alias_field = scheme
            .fields
            .values()
            .find(|f| f.transform == Transform::Alias)
            .ok_or_else(|| Error::InvalidPath(format!("scheme {} has no alias field", scheme.name)))?;
        exprs.push(qualified_cmp(alias, &alias_field.name, " = ", SqlParam::Text(alias_value.clone())));
    }

    for p in &query.predicates {
        let field = scheme.field(&p.field).ok_or_else(|| Error::UnknownField(p.field.clone()))?;
        exprs.push(predicate_expr(alias, field, p));
    }

    if let Some(ft) = &query.fulltext {
        exprs.push(qualified_fts(alias, &ft.field, &ft.query, ft.language.as_deref()));
    }

    if let Some(token) = &query.continue_token {
        if let Ok(oid) = token.parse::<i64>() {
            exprs.push(qualified_cmp(alias, OID_COLUMN, " > ", SqlParam::Int(oid)));
        }
    }

    Ok(exprs)
}

fn apply_order_limit(mut builder: SelectBuilder, alias: &str, query: &Query) -> SelectBuilder {
    if let Some((field, n)) = &query.first {
        builder = builder.order_by_raw(qualified_order(alias, field, OrderDirection::Asc)).limit(*n as i64);
        return builder;
    }
    if let Some((field, n)) = &query.last {
        builder = builder.order_by_raw(qualified_order(alias, field, OrderDirection::Desc)).limit(*n as i64);
        return builder;
    }
    for term in &query.order {
        builder = builder.order_by_raw(qualified_order(alias, &term.field, term.direction));
    }
    if let Some(limit) = query.limit {
        builder = builder.limit(limit as i64);
    }
    if let Some(offset) = query.offset {
        builder = builder.offset(offset as i64);
    }
    builder
}

fn physical_fields(scheme: &Scheme) -> impl Iterator<Item = &Field> {
    scheme.fields.values().filter(|f| !matches!(f.field_type, FieldType::Set | FieldType::View | FieldType::FullTextView))
}

fn target_oid(target: &FieldTarget<'_>) -> Option<i64> {
    match target {
        FieldTarget::Oid(oid) => Some(*oid),
        FieldTarget::Value(v) => v.placeholder_oid(),
    }
}

pub(crate) fn value_to_json(v: &Value) -> JsonValue {
    match v {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Double(d) => JsonValue::from(*d),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::Array(b.iter().map(|x| JsonValue::from(*x)).collect()),
        Value::Array(a) => JsonValue::Array(a.iter().map(value_to_json).collect()),
        Value::Dict(d) => JsonValue::Object(d.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect()),
    }
}

pub(crate) fn json_to_value(v: JsonValue) -> Value {
    match v {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => n.as_i64().map(Value::Int).unwrap_or_else(|| Value::Double(n.as_f64().unwrap_or(0.0))),
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(a) => Value::Array(a.into_iter().map(json_to_value).collect()),
        JsonValue::Object(o) => {
            let mut dict = Dict::new();
            for (k, v) in o {
                dict.insert(k, json_to_value(v));
            }
            Value::Dict(dict)
        }
    }
}

fn value_to_param(field: &Field, v: &Value) -> SqlParam {
    if v.is_null() {
        return SqlParam::Null;
    }
    match field.field_type {
        FieldType::Integer => SqlParam::Int(v.as_int().unwrap_or_default()),
        FieldType::Boolean => SqlParam::Bool(v.as_bool().unwrap_or_default()),
        FieldType::Text => SqlParam::Text(v.as_str().unwrap_or_default().to_string()),
        FieldType::Bytes => SqlParam::Bytes(v.as_bytes().unwrap_or_default().to_vec()),
        FieldType::Float => SqlParam::Float(match v {
            Value::Double(d) => *d,
            Value::Int(i) => *i as f64,
            _ => 0.0,
        }),
        FieldType::Data | FieldType::Extra | FieldType::Array => SqlParam::Json(value_to_json(v)),
        FieldType::Object | FieldType::File | FieldType::Image => v.placeholder_oid().map(SqlParam::Int).unwrap_or(SqlParam::Null),
        FieldType::Set | FieldType::View | FieldType::FullTextView => SqlParam::Null,
    }
}

fn row_field_value(row: &Row, field: &Field) -> Result<Value> {
    let name = field.name.as_str();
    match field.field_type {
        FieldType::Integer => Ok(row.try_get::<_, Option<i64>>(name).map_err(pg_err)?.map(Value::Int).unwrap_or(Value::Null)),
        FieldType::Boolean => Ok(row.try_get::<_, Option<bool>>(name).map_err(pg_err)?.map(Value::Bool).unwrap_or(Value::Null)),
        FieldType::Text => Ok(row.try_get::<_, Option<String>>(name).map_err(pg_err)?.map(Value::String).unwrap_or(Value::Null)),
        FieldType::Bytes => Ok(row.try_get::<_, Option<Vec<u8>>>(name).map_err(pg_err)?.map(Value::Bytes).unwrap_or(Value::Null)),
        FieldType::Float => Ok(row.try_get::<_, Option<f64>>(name).map_err(pg_err)?.map(Value::Double).unwrap_or(Value::Null)),
        FieldType::Data | FieldType::Extra | FieldType::Array => {
            Ok(row.try_get::<_, Option<JsonValue>>(name).map_err(pg_err)?.map(json_to_value).unwrap_or(Value::Null))
        }
        FieldType::Object | FieldType::File | FieldType::Image => {
            Ok(row.try_get::<_, Option<i64>>(name).map_err(pg_err)?.map(Value::Int).unwrap_or(Value::Null))
        }
        FieldType::Set | FieldType::View | FieldType::FullTextView => Ok(Value::Null),
    }
}

fn row_to_object(row: &Row, scheme: &Scheme) -> Result<Value> {
    let mut dict = Dict::new();
    let oid: i64 = row.try_get(OID_COLUMN).map_err(pg_err)?;
    dict.insert(meta_keys::OID.to_string(), Value::Int(oid));
    for field in physical_fields(scheme) {
        dict.insert(field.name.clone(), row_field_value(row, field)?);
    }
    Ok(Value::Dict(dict))
}

fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn adapter_err(message: impl Into<String>) -> Error {
    Error::Adapter(AdapterError { code: "internal".into(), message: message.into(), hint: None, transaction_broken: false })
}

/// Maps a `tokio-postgres` failure to the core's adapter error shape.
/// A missing SQLSTATE means the failure happened below the protocol
/// level (a severed connection), which leaves the transaction broken.
fn pg_err(e: tokio_postgres::Error) -> Error {
    let sqlstate = e.code().map(|c| c.code().to_string());
    let broken = sqlstate.is_none();
    let mapped = match sqlstate.as_deref() {
        Some("23505") => "conflict",
        Some("42501") => "forbidden",
        _ => "internal",
    };
    Error::Adapter(AdapterError { code: mapped.to_string(), message: e.to_string(), hint: None, transaction_broken: broken })
}

#[async_trait]
impl StorageAdapter for PostgresAdapter {
    async fn select(&self, _worker: &Worker, list: &QueryList) -> Result<Value> {
        let effective = self.scheme(list.effective_scheme())?;
        let (from_frag, where_exprs, alias) = self.from_clause(list)?;

        let mut builder = SelectBuilder::new().from_raw(from_frag);
        builder = builder.column_raw(SqlFragment::raw(format!("{} AS {}", qcol(&alias, OID_COLUMN), escape_ident(OID_COLUMN))));
        for field in physical_fields(effective) {
            builder = builder.column_raw(SqlFragment::raw(format!("{} AS {}", qcol(&alias, &field.name), escape_ident(&field.name))));
        }
        if !where_exprs.is_empty() {
            builder = builder.where_expr(Expr::and_all(where_exprs));
        }
        let query = &list.last().query;
        builder = apply_order_limit(builder, &alias, query);

        let rows = self.query_many(builder.build()).await?;
        if query.is_single_object() {
            match rows.into_iter().next() {
                Some(row) => row_to_object(&row, effective),
                None => Err(Error::NotFound(format!("no {} matched the query", effective.name))),
            }
        } else {
            let mut arr = Vec::with_capacity(rows.len());
            for row in &rows {
                arr.push(row_to_object(row, effective)?);
            }
            Ok(Value::Array(arr))
        }
    }

    async fn create(&self, _worker: &Worker, scheme_name: &str, value: Value) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let dict = value.as_dict().cloned().unwrap_or_default();
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for field in physical_fields(scheme) {
            if let Some(v) = dict.get(&field.name) {
                columns.push(field.name.clone());
                params.push(value_to_param(field, v));
            }
        }
        let frag = InsertBuilder::new().into_table(&self.qi(&scheme.name)).columns(columns).values(params).returning_all().build();
        let row = self.query_one(frag).await?;
        let created = row_to_object(&row, scheme)?;
        self.bump_scheme_delta(&scheme.name).await?;
        Ok(created)
    }

    async fn save(&self, _worker: &Worker, scheme_name: &str, oid: i64, value: Value, fields: &[String]) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let dict = value.as_dict().cloned().unwrap_or_default();
        if fields.is_empty() {
            return self.select_by_oid(scheme, oid).await;
        }
        let mut builder = UpdateBuilder::new().table(&self.qi(&scheme.name));
        for fname in fields {
            let field = scheme.field(fname).ok_or_else(|| Error::UnknownField(fname.clone()))?;
            let v = dict.get(fname).cloned().unwrap_or(Value::Null);
            builder = builder.set(fname.as_str(), value_to_param(field, &v));
        }
        builder = builder.where_expr(Expr::eq(OID_COLUMN, oid)).returning_all();
        let row = self
            .query_one_opt(builder.build())
            .await?
            .ok_or_else(|| Error::NotFound(format!("no {scheme_name} with id {oid}")))?;
        let saved = row_to_object(&row, scheme)?;
        self.bump_scheme_delta(&scheme.name).await?;
        Ok(saved)
    }

    async fn patch(&self, _worker: &Worker, scheme_name: &str, oid: i64, patch: Value) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let dict = patch.as_dict().cloned().unwrap_or_default();
        let mut builder = UpdateBuilder::new().table(&self.qi(&scheme.name));
        let mut any = false;
        for (k, v) in dict.iter() {
            if let Some(field) = scheme.field(k) {
                if matches!(field.field_type, FieldType::Set | FieldType::View | FieldType::FullTextView) {
                    continue;
                }
                builder = builder.set(k.as_str(), value_to_param(field, v));
                any = true;
            }
        }
        if !any {
            return self.select_by_oid(scheme, oid).await;
        }
        builder = builder.where_expr(Expr::eq(OID_COLUMN, oid)).returning_all();
        let row = self
            .query_one_opt(builder.build())
            .await?
            .ok_or_else(|| Error::NotFound(format!("no {scheme_name} with id {oid}")))?;
        let patched = row_to_object(&row, scheme)?;
        self.bump_scheme_delta(&scheme.name).await?;
        Ok(patched)
    }

    async fn remove(&self, _worker: &Worker, scheme_name: &str, oid: i64) -> Result<bool> {
        let scheme = self.scheme(scheme_name)?;
        let frag = DeleteBuilder::new().from_table(&self.qi(&scheme.name)).where_expr(Expr::eq(OID_COLUMN, oid)).build();
        let n = self.exec(frag).await?;
        if n > 0 {
            self.bump_scheme_delta(&scheme.name).await?;
        }
        Ok(n > 0)
    }

    async fn count(&self, _worker: &Worker, list: &QueryList) -> Result<i64> {
        let (from_frag, where_exprs, alias) = self.from_clause(list)?;
        let mut builder =
            SelectBuilder::new().from_raw(from_frag).column_raw(SqlFragment::raw(format!("count(DISTINCT {}) AS cnt", qcol(&alias, OID_COLUMN))));
        if !where_exprs.is_empty() {
            builder = builder.where_expr(Expr::and_all(where_exprs));
        }
        let row = self.query_one(builder.build()).await?;
        row.try_get::<_, i64>("cnt").map_err(pg_err)
    }

    async fn field_get(&self, _worker: &Worker, scheme_name: &str, target: FieldTarget<'_>, field_name: &str) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let field = scheme.field(field_name).ok_or_else(|| Error::UnknownField(field_name.to_string()))?;
        let oid = target_oid(&target).ok_or_else(|| Error::InvalidPath("field target has no oid".into()))?;

        if matches!(field.field_type, FieldType::Set | FieldType::View | FieldType::FullTextView) {
            return Err(Error::NotImplemented(format!("field_get not supported for relation field {field_name}")));
        }

        let frag = SelectBuilder::new().column(field_name).from_table(&self.qi(scheme_name)).where_expr(Expr::eq(OID_COLUMN, oid)).build();
        let row = self.query_one_opt(frag).await?;
        let raw = match row {
            Some(row) => row_field_value(&row, field)?,
            None => return Ok(Value::Null),
        };

        match field.field_type {
            FieldType::Object => match raw.placeholder_oid() {
                Some(fk) => {
                    let foreign = field.foreign_scheme.as_deref().ok_or_else(|| Error::InvalidPath(format!("{field_name} has no foreign scheme")))?;
                    self.select_by_oid(self.scheme(foreign)?, fk).await
                }
                None => Ok(Value::Null),
            },
            FieldType::File | FieldType::Image => match raw.placeholder_oid() {
                Some(fid) => self.select_file_row(fid).await,
                None => Ok(Value::Null),
            },
            _ => Ok(raw),
        }
    }

    async fn field_set(&self, _worker: &Worker, scheme_name: &str, target: FieldTarget<'_>, field_name: &str, data: Value) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let field = scheme.field(field_name).ok_or_else(|| Error::UnknownField(field_name.to_string()))?;
        let oid = target_oid(&target).ok_or_else(|| Error::InvalidPath("field target has no oid".into()))?;

        let param = match field.field_type {
            FieldType::Array => SqlParam::Json(value_to_json(&Value::Array(data.coerce_to_array()))),
            FieldType::Object | FieldType::File | FieldType::Image => data.placeholder_oid().map(SqlParam::Int).unwrap_or(SqlParam::Null),
            FieldType::Set | FieldType::View | FieldType::FullTextView => {
                return Err(Error::NotImplemented(format!("field_set not supported for relation field {field_name}")));
            }
            _ => value_to_param(field, &data),
        };

        let frag = UpdateBuilder::new()
            .table(&self.qi(scheme_name))
            .set(field_name, param)
            .where_expr(Expr::eq(OID_COLUMN, oid))
            .returning(field_name)
            .build();
        let row = self.query_one_opt(frag).await?.ok_or_else(|| Error::NotFound(format!("no {scheme_name} with id {oid}")))?;
        row_field_value(&row, field)
    }

    async fn field_append(&self, worker: &Worker, scheme_name: &str, target: FieldTarget<'_>, field_name: &str, data: Value) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let field = scheme.field(field_name).ok_or_else(|| Error::UnknownField(field_name.to_string()))?;
        if field.field_type != FieldType::Array {
            return Err(Error::NotImplemented(format!("field_append not supported for field {field_name}")));
        }
        let oid = target_oid(&target).ok_or_else(|| Error::InvalidPath("field target has no oid".into()))?;
        let current = self.field_get(worker, scheme_name, FieldTarget::Oid(oid), field_name).await?;
        let mut items = current.coerce_to_array();
        items.extend(data.coerce_to_array());
        self.field_set(worker, scheme_name, FieldTarget::Oid(oid), field_name, Value::Array(items)).await
    }

    async fn field_clear(
        &self,
        worker: &Worker,
        scheme_name: &str,
        target: FieldTarget<'_>,
        field_name: &str,
        keep_ids: Option<&[i64]>,
    ) -> Result<Value> {
        let scheme = self.scheme(scheme_name)?;
        let field = scheme.field(field_name).ok_or_else(|| Error::UnknownField(field_name.to_string()))?;
        let oid = target_oid(&target).ok_or_else(|| Error::InvalidPath("field target has no oid".into()))?;

        match field.field_type {
            FieldType::Array => self.field_set(worker, scheme_name, FieldTarget::Oid(oid), field_name, Value::Array(Vec::new())).await,
            FieldType::Object | FieldType::File | FieldType::Image => {
                self.field_set(worker, scheme_name, FieldTarget::Oid(oid), field_name, Value::Null).await
            }
            FieldType::Set if field.flags.reference_set => {
                let rel_qi = self.join_table_qi(field_name);
                let mut builder = DeleteBuilder::new().from_table(&rel_qi).where_expr(Expr::eq("parent_id", oid));
                if let Some(keep) = keep_ids {
                    if !keep.is_empty() {
                        let values: Vec<SqlParam> = keep.iter().map(|id| SqlParam::Int(*id)).collect();
                        builder = builder.where_expr(Expr::in_list("child_id", values).not());
                    }
                }
                self.exec(builder.build()).await?;
                Ok(Value::array())
            }
            _ => Err(Error::NotImplemented(format!("field_clear not supported for field {field_name}"))),
        }
    }

    async fn add_to_view(&self, _worker: &Worker, scheme_name: &str, oid: i64, view_field: &str, target_oid: i64) -> Result<bool> {
        self.scheme(scheme_name)?;
        let rel_qi = self.join_table_qi(view_field);
        let frag = InsertBuilder::new()
            .into_table(&rel_qi)
            .columns(vec!["parent_id".into(), "child_id".into()])
            .values(vec![SqlParam::Int(oid), SqlParam::Int(target_oid)])
            .on_conflict_do_nothing()
            .build();
        let n = self.exec(frag).await?;
        if n > 0 {
            self.bump_view_delta(scheme_name, view_field, oid).await?;
        }
        Ok(n > 0)
    }

    async fn remove_from_view(&self, _worker: &Worker, scheme_name: &str, oid: i64, view_field: &str, target_oid: i64) -> Result<bool> {
        self.scheme(scheme_name)?;
        let rel_qi = self.join_table_qi(view_field);
        let frag = DeleteBuilder::new()
            .from_table(&rel_qi)
            .where_expr(Expr::eq("parent_id", oid))
            .where_expr(Expr::eq("child_id", target_oid))
            .build();
        let n = self.exec(frag).await?;
        if n > 0 {
            self.bump_view_delta(scheme_name, view_field, oid).await?;
        }
        Ok(n > 0)
    }

    async fn get_reference_parents(&self, _worker: &Worker, scheme_name: &str, oid: i64, _foreign_scheme: &str, field: &str) -> Result<Vec<i64>> {
        self.scheme(scheme_name)?;
        let rel_qi = self.join_table_qi(field);
        let frag = SelectBuilder::new().column("child_id").from_table(&rel_qi).where_expr(Expr::eq("parent_id", oid)).build();
        let rows = self.query_many(frag).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(row.try_get::<_, i64>("child_id").map_err(pg_err)?);
        }
        Ok(ids)
    }

    async fn perform_query_list(&self, _worker: &Worker, list: &QueryList, count: Option<u32>, for_update: bool, field: Option<&str>) -> Result<Value> {
        let effective = self.scheme(list.effective_scheme())?;
        let (from_frag, where_exprs, alias) = self.from_clause(list)?;

        let mut builder = SelectBuilder::new().from_raw(from_frag);
        builder = builder.column_raw(SqlFragment::raw(format!("{} AS {}", qcol(&alias, OID_COLUMN), escape_ident(OID_COLUMN))));
        let project_field = match field {
            Some(name) => Some(effective.field(name).ok_or_else(|| Error::UnknownField(name.to_string()))?),
            None => None,
        };
        if let Some(f) = project_field {
            builder = builder.column_raw(SqlFragment::raw(format!("{} AS {}", qcol(&alias, &f.name), escape_ident(&f.name))));
        } else {
            for f in physical_fields(effective) {
                builder = builder.column_raw(SqlFragment::raw(format!("{} AS {}", qcol(&alias, &f.name), escape_ident(&f.name))));
            }
        }
        if !where_exprs.is_empty() {
            builder = builder.where_expr(Expr::and_all(where_exprs));
        }
        let query = &list.last().query;
        builder = apply_order_limit(builder, &alias, query);
        if let Some(n) = count {
            builder = builder.limit(n as i64);
        }

        let mut frag = builder.build();
        if for_update {
            frag.push(" FOR UPDATE");
        }
        let rows = self.query_many(frag).await?;
        let mut arr = Vec::with_capacity(rows.len());
        for row in &rows {
            arr.push(match project_field {
                Some(f) => row_field_value(row, f)?,
                None => row_to_object(row, effective)?,
            });
        }
        Ok(Value::Array(arr))
    }

    async fn perform_query_list_for_ids(&self, _worker: &Worker, list: &QueryList, count: Option<u32>) -> Result<Vec<i64>> {
        let (from_frag, where_exprs, alias) = self.from_clause(list)?;
        let mut builder =
            SelectBuilder::new().from_raw(from_frag).column_raw(SqlFragment::raw(format!("{} AS {}", qcol(&alias, OID_COLUMN), escape_ident(OID_COLUMN))));
        if !where_exprs.is_empty() {
            builder = builder.where_expr(Expr::and_all(where_exprs));
        }
        let query = &list.last().query;
        builder = apply_order_limit(builder, &alias, query);
        if let Some(n) = count {
            builder = builder.limit(n as i64);
        }
        let rows = self.query_many(builder.build()).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(row.try_get::<_, i64>(OID_COLUMN).map_err(pg_err)?);
        }
        Ok(ids)
    }

    async fn get_delta_value(&self, _worker: &Worker, scheme_name: &str) -> Result<i64> {
        let frag = SelectBuilder::new().column("value").from_table(&self.qi(SCHEME_DELTA_TABLE)).where_expr(Expr::eq("scheme", scheme_name.to_string())).build();
        match self.query_one_opt(frag).await? {
            Some(row) => row.try_get::<_, i64>("value").map_err(pg_err),
            None => Ok(0),
        }
    }

    async fn get_delta_value_view(&self, _worker: &Worker, scheme_name: &str, view: &str, oid: i64) -> Result<i64> {
        let frag = SelectBuilder::new()
            .column("value")
            .from_table(&self.qi(VIEW_DELTA_TABLE))
            .where_expr(Expr::eq("scheme", scheme_name.to_string()))
            .where_expr(Expr::eq("view", view.to_string()))
            .where_expr(Expr::eq("oid", oid))
            .build();
        match self.query_one_opt(frag).await? {
            Some(row) => row.try_get::<_, i64>("value").map_err(pg_err),
            None => Ok(0),
        }
    }

    async fn authorize_user(&self, _worker: &Worker, auth: &Auth<'_>, name: &str, password: &str) -> Result<Option<User>> {
        let scheme = self.scheme(&self.auth_scheme)?;
        let frag = SelectBuilder::new().all_columns().from_table(&self.qi(&scheme.name)).where_expr(Expr::eq(auth.name_field(), name.to_string())).build();
        let row = match self.query_one_opt(frag).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        let object = row_to_object(&row, scheme)?;
        let stored = object.get(auth.password_field()).and_then(Value::as_bytes).unwrap_or_default().to_vec();
        if !auth.authorize_with_password(password, &stored, 0) {
            return Ok(None);
        }
        let oid = object.placeholder_oid().ok_or_else(|| adapter_err("authorized row missing its oid"))?;
        let admin = object.get("admin").and_then(Value::as_bool).unwrap_or(false);
        Ok(Some(User::new(oid, name.to_string(), admin)))
    }

    async fn broadcast(&self, payload: Value) -> Result<()> {
        let json = value_to_json(&payload).to_string();
        self.client.execute("SELECT pg_notify($1, $2)", &[&BROADCAST_CHANNEL, &json]).await.map_err(pg_err)?;
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        self.client.batch_execute("BEGIN").await.map_err(pg_err)
    }

    async fn commit(&self) -> Result<()> {
        self.client.batch_execute("COMMIT").await.map_err(pg_err)
    }

    async fn cancel(&self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await.map_err(pg_err)
    }

    async fn kv_set(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> Result<()> {
        let expires = match ttl_secs {
            Some(secs) => SqlParam::Timestamp(Utc::now() + chrono::Duration::seconds(secs as i64)),
            None => SqlParam::Null,
        };
        let frag = InsertBuilder::new()
            .into_table(&self.qi(KV_TABLE))
            .columns(vec!["key".into(), "value".into(), "expires_at".into()])
            .values(vec![SqlParam::Text(key.to_string()), SqlParam::Json(value_to_json(&value)), expires])
            .on_conflict_do_update(
                vec!["key".into()],
                vec![
                    ("value".into(), SqlFragment::raw("EXCLUDED.\"value\"")),
                    ("expires_at".into(), SqlFragment::raw("EXCLUDED.\"expires_at\"")),
                ],
            )
            .build();
        self.exec(frag).await?;
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Value>> {
        let frag = SelectBuilder::new()
            .column("value")
            .from_table(&self.qi(KV_TABLE))
            .where_expr(Expr::eq("key", key.to_string()))
            .where_expr(Expr::or_all(vec![Expr::is_null("expires_at"), Expr::gt("expires_at", SqlParam::Timestamp(Utc::now()))]))
            .build();
        match self.query_one_opt(frag).await? {
            Some(row) => {
                let json: JsonValue = row.try_get("value").map_err(pg_err)?;
                Ok(Some(json_to_value(json)))
            }
            None => Ok(None),
        }
    }

    async fn kv_clear(&self, key: &str) -> Result<()> {
        let frag = DeleteBuilder::new().from_table(&self.qi(KV_TABLE)).where_expr(Expr::eq("key", key.to_string())).build();
        self.exec(frag).await?;
        Ok(())
    }
}

impl PostgresAdapter {
    async fn select_file_row(&self, file_id: i64) -> Result<Value> {
        let frag = SelectBuilder::new().all_columns().from_table(&self.qi(FILES_TABLE)).where_expr(Expr::eq(OID_COLUMN, file_id)).build();
        let row = match self.query_one_opt(frag).await? {
            Some(row) => row,
            None => return Ok(Value::Null),
        };
        let mut dict = Dict::new();
        let oid: i64 = row.try_get(OID_COLUMN).map_err(pg_err)?;
        dict.insert(meta_keys::OID.to_string(), Value::Int(oid));
        if let Ok(name) = row.try_get::<_, String>("name") {
            dict.insert("name".into(), Value::String(name));
        }
        if let Ok(mime) = row.try_get::<_, String>("mime") {
            dict.insert("mime".into(), Value::String(mime));
        }
        if let Ok(size) = row.try_get::<_, i64>("size") {
            dict.insert("size".into(), Value::Int(size));
        }
        if let Ok(location) = row.try_get::<_, String>("location") {
            dict.insert("location".into(), Value::String(location));
        }
        Ok(Value::Dict(dict))
    }

    async fn bump_scheme_delta(&self, scheme_name: &str) -> Result<()> {
        let frag = InsertBuilder::new()
            .into_table(&self.qi(SCHEME_DELTA_TABLE))
            .columns(vec!["scheme".into(), "value".into()])
            .values(vec![SqlParam::Text(scheme_name.to_string()), SqlParam::Int(1)])
            .on_conflict_do_update(vec!["scheme".into()], vec![("value".into(), SqlFragment::raw("value + 1"))])
            .build();
        self.exec(frag).await?;
        Ok(())
    }

    async fn bump_view_delta(&self, scheme_name: &str, view: &str, oid: i64) -> Result<()> {
        let frag = InsertBuilder::new()
            .into_table(&self.qi(VIEW_DELTA_TABLE))
            .columns(vec!["scheme".into(), "view".into(), "oid".into(), "value".into()])
            .values(vec![SqlParam::Text(scheme_name.to_string()), SqlParam::Text(view.to_string()), SqlParam::Int(oid), SqlParam::Int(1)])
            .on_conflict_do_update(vec!["scheme".into(), "view".into(), "oid".into()], vec![("value".into(), SqlFragment::raw("value + 1"))])
            .build();
        self.exec(frag).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_json_round_trips_scalars_and_containers() {
        let mut dict = Dict::new();
        dict.insert("a".into(), Value::Int(1));
        dict.insert("b".into(), Value::Array(vec![Value::String("x".into()), Value::Bool(true)]));
        let original = Value::Dict(dict);
        let round_tripped = json_to_value(value_to_json(&original));
        assert_eq!(value_to_json(&original), value_to_json(&round_tripped));
    }

    #[test]
    fn value_to_param_encodes_object_field_as_fk_int() {
        let field = Field::new("author", FieldType::Object).references("users");
        let mut dict = Dict::new();
        dict.insert(meta_keys::OID.to_string(), Value::Int(7));
        assert!(matches!(value_to_param(&field, &Value::Dict(dict)), SqlParam::Int(7)));
        assert!(matches!(value_to_param(&field, &Value::Null), SqlParam::Null));
    }

    #[test]
    fn value_to_param_encodes_array_field_as_json() {
        let field = Field::new("tags", FieldType::Array);
        let v = Value::Array(vec![Value::String("a".into()), Value::String("b".into())]);
        match value_to_param(&field, &v) {
            SqlParam::Json(j) => assert_eq!(j, serde_json::json!(["a", "b"])),
            other => panic!("expected Json, got {other:?}"),
        }
    }

    #[test]
    fn qualified_cmp_produces_table_qualified_placeholder() {
        let expr = qualified_cmp("t0", "name", " = ", SqlParam::text("alice"));
        assert_eq!(expr.sql(), "\"t0\".\"name\" = $1");
        assert_eq!(expr.params().len(), 1);
    }

    #[test]
    fn item_predicates_builds_oid_and_field_predicates() {
        let scheme = Scheme::new("posts").with_field(Field::new("title", FieldType::Text));
        let mut query = Query::new();
        query.oid = Some(5);
        query.predicates.push(Predicate { field: "title".into(), comparator: Comparator::Eq, value1: Value::from("hello"), value2: None });
        let exprs = item_predicates("t0", &scheme, &query).unwrap();
        assert_eq!(exprs.len(), 2);
    }
}
