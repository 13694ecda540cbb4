//! Path Resolver: the stack-machine parser that turns a reversed path
//! vector plus a root scheme into a built Query List and a resource
//! kind classification (§4.1).

use crate::error::{Error, Result};
use crate::query::{Comparator, OrderDirection, OrderTerm, Predicate, Query, QueryList};
use crate::scheme::{FieldType, Scheme, SchemeRegistry};
use crate::value::Value;

/// The resource kind a resolved path classifies to; drives which
/// Resource Family variant the Handler Facade constructs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Object,
    ResourceList,
    Set,
    ReferenceSet,
    File,
    Array,
    FieldObject,
    View,
    Search,
}

pub struct ResolvedPath {
    pub list: QueryList,
    pub kind: ResourceKind,
    /// Set only for `File`/`Array`: the property field name on the
    /// current (already single-object) item's scheme, since those
    /// kinds act on a field of the last resolved row rather than
    /// pushing a new Query List item.
    pub field_name: Option<String>,
}

/// Parses a reversed token stack (`pop()` yields the next left-to-right
/// token) against `root_scheme`. An optional sub-filter (dict, integer,
/// or string) pre-seeds selection before any token is consumed.
pub fn resolve_path(
    registry: &dyn SchemeRegistry,
    root_scheme: &str,
    mut tokens: Vec<String>,
    sub_filter: Option<Value>,
) -> Result<ResolvedPath> {
    let mut scheme = registry
        .get(root_scheme)
        .ok_or_else(|| Error::NotFound(format!("unknown scheme: {root_scheme}")))?;
    let mut list = QueryList::new(root_scheme);
    let mut single_object = false;
    let mut kind: Option<ResourceKind> = None;
    let mut no_default_limit = false;
    let mut field_name: Option<String> = None;

    if let Some(filter) = sub_filter {
        apply_sub_filter(&mut list, scheme, filter, &mut single_object)?;
    }

    while let Some(tok) = tokens.pop() {
        if let Some(rest) = tok.strip_prefix("id") {
            if let Ok(oid) = rest.parse::<i64>() {
                list.last_mut().query.oid = Some(oid);
                single_object = true;
                continue;
            }
        }

        if let Some(alias) = tok.strip_prefix("named-") {
            list.last_mut().query.alias = Some(alias.to_string());
            single_object = true;
            continue;
        }

        if tok == "all" {
            no_default_limit = true;
            continue;
        }

        if tok == "select" {
            parse_select(&mut tokens, &mut list, scheme, &mut single_object)?;
            continue;
        }

        if tok == "search" {
            let field_name = tokens.pop().ok_or_else(|| Error::MissingValue("search field".into()))?;
            let field = scheme
                .field(&field_name)
                .ok_or_else(|| Error::UnknownField(field_name.clone()))?;
            if field.field_type != FieldType::FullTextView {
                return Err(Error::TypeMismatch(format!("{field_name} is not a full-text view")));
            }
            list.last_mut().query.fulltext = Some(crate::query::FullTextQuery {
                field: field_name,
                query: String::new(),
                language: None,
            });
            kind = Some(ResourceKind::Search);
            continue;
        }

        if tok == "order" {
            parse_order(&mut tokens, &mut list, scheme)?;
            continue;
        }

        if let Some(field_name) = tok.strip_prefix('+') {
            parse_order_shorthand(field_name, &mut tokens, &mut list, scheme, OrderDirection::Asc)?;
            continue;
        }

        if let Some(field_name) = tok.strip_prefix('-') {
            parse_order_shorthand(field_name, &mut tokens, &mut list, scheme, OrderDirection::Desc)?;
            continue;
        }

        if tok == "limit" {
            let n: u32 = tokens
                .pop()
                .ok_or_else(|| Error::MissingValue("limit".into()))?
                .parse()
                .map_err(|_| Error::TypeMismatch("limit expects an integer".into()))?;
            list.last_mut().query.limit = Some(n);
            if n == 1 {
                single_object = true;
            }
            continue;
        }

        if tok == "offset" {
            let n: u32 = tokens
                .pop()
                .ok_or_else(|| Error::MissingValue("offset".into()))?
                .parse()
                .map_err(|_| Error::TypeMismatch("offset expects an integer".into()))?;
            list.last_mut().query.offset = Some(n);
            continue;
        }

        if tok == "first" || tok == "last" {
            let field_name = tokens.pop().ok_or_else(|| Error::MissingValue(format!("{tok} field")))?;
            let field = scheme
                .field(&field_name)
                .ok_or_else(|| Error::UnknownField(field_name.clone()))?;
            if !field.flags.indexed {
                return Err(Error::InvalidPath(format!("{field_name} is not indexed")));
            }
            let count: u32 = tokens
                .last()
                .and_then(|s| s.parse::<u32>().ok())
                .map(|n| {
                    tokens.pop();
                    n
                })
                .unwrap_or(1);
            if tok == "first" {
                list.last_mut().query.first = Some((field_name, count));
            } else {
                list.last_mut().query.last = Some((field_name, count));
            }
            if count == 1 {
                single_object = true;
            }
            continue;
        }

        if single_object {
            // single-object position: the only remaining token is an
            // offset, or a field for property/relation navigation.
            if tok == "offset" {
                continue;
            }
        }

        // Field-name navigation: descend into a relation or terminate
        // on a property field.
        let field = scheme
            .field(&tok)
            .ok_or_else(|| Error::UnknownField(tok.clone()))?;

        match field.field_type {
            FieldType::File | FieldType::Image => {
                kind = Some(ResourceKind::File);
                field_name = Some(tok.clone());
                break;
            }
            FieldType::Array => {
                kind = Some(ResourceKind::Array);
                field_name = Some(tok.clone());
                break;
            }
            FieldType::Object => {
                let foreign = field
                    .foreign_scheme
                    .as_ref()
                    .ok_or_else(|| Error::InvalidPath(format!("{tok} has no foreign scheme")))?;
                let foreign_scheme = registry
                    .get(foreign)
                    .ok_or_else(|| Error::NotFound(foreign.clone()))?;
                list.push(foreign.clone(), tok.clone());
                scheme = foreign_scheme;
                if tokens.is_empty() {
                    kind = Some(ResourceKind::FieldObject);
                } else {
                    single_object = true;
                }
            }
            FieldType::Set => {
                let foreign = field
                    .foreign_scheme
                    .as_ref()
                    .ok_or_else(|| Error::InvalidPath(format!("{tok} has no foreign scheme")))?;
                let foreign_scheme = registry
                    .get(foreign)
                    .ok_or_else(|| Error::NotFound(foreign.clone()))?;
                list.push(foreign.clone(), tok.clone());
                scheme = foreign_scheme;
                single_object = false;
                kind = Some(if field.flags.reference_set { ResourceKind::ReferenceSet } else { ResourceKind::Set });
            }
            FieldType::View => {
                let foreign = field
                    .foreign_scheme
                    .as_ref()
                    .ok_or_else(|| Error::InvalidPath(format!("{tok} has no foreign scheme")))?;
                let foreign_scheme = registry
                    .get(foreign)
                    .ok_or_else(|| Error::NotFound(foreign.clone()))?;
                list.push(foreign.clone(), tok.clone());
                scheme = foreign_scheme;
                single_object = false;
                kind = Some(ResourceKind::View);
            }
            _ => return Err(Error::InvalidPath(format!("{tok} is not navigable"))),
        }
    }

    if !no_default_limit && list.last().query.limit.is_none() && !single_object {
        // default page limit is applied by the Handler Facade from
        // configuration, not latched here; `all` only suppresses it.
    }

    let final_kind = kind.unwrap_or(if single_object { ResourceKind::Object } else { ResourceKind::ResourceList });
    Ok(ResolvedPath { list, kind: final_kind, field_name })
}

fn apply_sub_filter(list: &mut QueryList, scheme: &Scheme, filter: Value, single_object: &mut bool) -> Result<()> {
    match filter {
        Value::Int(oid) => {
            list.last_mut().query.oid = Some(oid);
            *single_object = true;
        }
        Value::String(s) => {
            list.last_mut().query.alias = Some(s);
            *single_object = true;
        }
        Value::Dict(d) => {
            for (field_name, value) in d {
                let field = scheme
                    .field(&field_name)
                    .ok_or_else(|| Error::UnknownField(field_name.clone()))?;
                if !field.flags.indexed {
                    return Err(Error::InvalidPath(format!("{field_name} is not indexed")));
                }
                if field.latches_single_object_on_eq() {
                    *single_object = true;
                }
                list.last_mut().query.predicates.push(Predicate {
                    field: field_name,
                    comparator: Comparator::Eq,
                    value1: value,
                    value2: None,
                });
            }
        }
        _ => return Err(Error::InvalidPredicate("sub-filter must be an oid, alias, or dictionary".into())),
    }
    Ok(())
}

fn parse_select(tokens: &mut Vec<String>, list: &mut QueryList, scheme: &Scheme, single_object: &mut bool) -> Result<()> {
    let field_name = tokens.pop().ok_or_else(|| Error::MissingValue("select field".into()))?;
    let field = scheme
        .field(&field_name)
        .ok_or_else(|| Error::UnknownField(field_name.clone()))?;
    if !field.flags.indexed {
        return Err(Error::InvalidPath(format!("{field_name} is not indexed")));
    }

    let next = tokens.pop().ok_or_else(|| Error::MissingValue("comparator or value".into()))?;
    let (comparator, first_value_tok) = match Comparator::from_token(&next) {
        Some(c) => (c, None),
        None => (Comparator::Eq, Some(next)),
    };

    let value1_tok = match first_value_tok {
        Some(v) => v,
        None => tokens.pop().ok_or_else(|| Error::MissingValue("predicate value".into()))?,
    };
    let value1 = coerce_value(&field.field_type, &value1_tok)?;

    let value2 = if comparator.is_between() {
        let tok2 = tokens.pop().ok_or_else(|| Error::MissingValue("second predicate value".into()))?;
        let v2 = coerce_value(&field.field_type, &tok2)?;
        if !matches!(field.field_type, FieldType::Integer | FieldType::Float) {
            return Err(Error::TypeMismatch("between comparators require a numeric field".into()));
        }
        Some(v2)
    } else {
        None
    };

    if comparator == Comparator::Eq && field.latches_single_object_on_eq() {
        *single_object = true;
    }

    list.last_mut().query.predicates.push(Predicate { field: field_name, comparator, value1, value2 });
    Ok(())
}

fn parse_order(tokens: &mut Vec<String>, list: &mut QueryList, scheme: &Scheme) -> Result<()> {
    let field_name = tokens.pop().ok_or_else(|| Error::MissingValue("order field".into()))?;
    let field = scheme
        .field(&field_name)
        .ok_or_else(|| Error::UnknownField(field_name.clone()))?;
    if !field.flags.indexed {
        return Err(Error::InvalidPath(format!("{field_name} is not indexed")));
    }
    let direction = match tokens.last().map(String::as_str) {
        Some("asc") => {
            tokens.pop();
            OrderDirection::Asc
        }
        Some("desc") => {
            tokens.pop();
            OrderDirection::Desc
        }
        _ => OrderDirection::Asc,
    };
    list.last_mut().query.order.push(OrderTerm { field: field_name, direction });
    if let Some(n) = tokens.last().and_then(|s| s.parse::<u32>().ok()) {
        tokens.pop();
        list.last_mut().query.limit = Some(n);
    }
    Ok(())
}

fn parse_order_shorthand(
    field_name: &str,
    tokens: &mut Vec<String>,
    list: &mut QueryList,
    scheme: &Scheme,
    direction: OrderDirection,
) -> Result<()> {
    let field = scheme
        .field(field_name)
        .ok_or_else(|| Error::UnknownField(field_name.to_string()))?;
    if !field.flags.indexed {
        return Err(Error::InvalidPath(format!("{field_name} is not indexed")));
    }
    list.last_mut().query.order.push(OrderTerm { field: field_name.to_string(), direction });
    if let Some(n) = tokens.last().and_then(|s| s.parse::<u32>().ok()) {
        tokens.pop();
        list.last_mut().query.limit = Some(n);
    }
    Ok(())
}

fn coerce_value(field_type: &FieldType, tok: &str) -> Result<Value> {
    match field_type {
        FieldType::Integer => tok
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::TypeMismatch(format!("{tok} is not a valid integer"))),
        FieldType::Float => tok
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| Error::TypeMismatch(format!("{tok} is not a valid number"))),
        FieldType::Boolean => match tok {
            "t" | "true" | "1" => Ok(Value::Bool(true)),
            "f" | "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(Error::TypeMismatch(format!("{tok} is not a valid boolean"))),
        },
        FieldType::Text => Ok(Value::String(tok.to_string())),
        _ => Ok(Value::String(tok.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{Action, Field, Permission, PermissionList, StaticSchemeRegistry};

    fn registry() -> StaticSchemeRegistry {
        let mut r = StaticSchemeRegistry::new();
        r.register(
            Scheme::new("objects")
                .with_field(Field::new("counter", FieldType::Integer).indexed()),
        );
        r.register(
            Scheme::new("users")
                .with_field(Field::new("name", FieldType::Text).with_transform(crate::scheme::Transform::Alias))
                .with_permissions(PermissionList::new().set(Action::Create, Permission::Restrict).set(Action::Update, Permission::Full)),
        );
        r
    }

    #[test]
    fn scenario_path_select_order_limit() {
        let registry = registry();
        let tokens: Vec<String> = vec!["select", "counter", "gt", "10", "order", "counter", "desc", "5"]
            .into_iter()
            .rev()
            .map(String::from)
            .collect();
        let resolved = resolve_path(&registry, "objects", tokens, None).unwrap();
        assert_eq!(resolved.kind, ResourceKind::ResourceList);
        let item = resolved.list.last();
        assert_eq!(item.query.predicates.len(), 1);
        assert_eq!(item.query.predicates[0].comparator, Comparator::Gt);
        assert_eq!(item.query.order[0].direction, OrderDirection::Desc);
        assert_eq!(item.query.limit, Some(5));
    }

    #[test]
    fn scenario_reverse_alias_access() {
        let registry = registry();
        let tokens: Vec<String> = vec!["named-admin"].into_iter().rev().map(String::from).collect();
        let resolved = resolve_path(&registry, "users", tokens, None).unwrap();
        assert_eq!(resolved.kind, ResourceKind::Object);
        assert_eq!(resolved.list.last().query.alias.as_deref(), Some("admin"));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let registry = registry();
        let tokens: Vec<String> = vec!["select", "ghost", "eq", "1"].into_iter().rev().map(String::from).collect();
        assert!(resolve_path(&registry, "objects", tokens, None).is_err());
    }
}
