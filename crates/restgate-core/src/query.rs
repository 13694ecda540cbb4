//! Query List: the ordered sequence of per-segment query items built by
//! the Path Resolver and consumed by the Resource Family and Adapter.

use crate::scheme::{FieldType, Scheme};
use crate::value::Value;

/// Comparators accepted by the `select` token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Between, exclusive of both bounds.
    Bw,
    /// Between, inclusive of both bounds.
    Be,
    Nbw,
    Nbe,
}

impl Comparator {
    pub fn from_token(tok: &str) -> Option<Self> {
        Some(match tok {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "bw" => Self::Bw,
            "be" => Self::Be,
            "nbw" => Self::Nbw,
            "nbe" => Self::Nbe,
            _ => return None,
        })
    }

    /// Between-variants consume two values; everything else consumes one.
    pub fn is_between(&self) -> bool {
        matches!(self, Self::Bw | Self::Be | Self::Nbw | Self::Nbe)
    }
}

/// A single `(field, comparator, value1, value2)` predicate.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub field: String,
    pub comparator: Comparator,
    pub value1: Value,
    pub value2: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug)]
pub struct OrderTerm {
    pub field: String,
    pub direction: OrderDirection,
}

/// A full-text sub-query bound by the `search` token.
#[derive(Clone, Debug)]
pub struct FullTextQuery {
    pub field: String,
    pub query: String,
    pub language: Option<String>,
}

/// A selection record for a single Query List segment.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub oid: Option<i64>,
    pub alias: Option<String>,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub first: Option<(String, u32)>,
    pub last: Option<(String, u32)>,
    pub fulltext: Option<FullTextQuery>,
    pub continue_token: Option<String>,
    pub select: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_single_object(&self) -> bool {
        self.oid.is_some()
            || self.alias.is_some()
            || self.limit == Some(1)
            || (self.first.is_some() && matches!(self.first, Some((_, 1))))
            || (self.last.is_some() && matches!(self.last, Some((_, 1))))
    }
}

/// Bitset deciding the Hydrator's default collapse policy when a
/// relation's include set is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub files: bool,
    pub ids: bool,
    pub sets: bool,
    pub objects: bool,
}

impl ResolveOptions {
    pub const NONE: Self = Self { files: false, ids: false, sets: false, objects: false };
    pub const ALL: Self = Self { files: true, ids: true, sets: true, objects: true };

    pub fn apply_token(&mut self, token: &str) {
        match token {
            "$files" => self.files = true,
            "$ids" => self.ids = true,
            "$sets" => self.sets = true,
            "$objects" => self.objects = true,
            "$all" => *self = Self::ALL,
            _ => {}
        }
    }
}

/// One item of a Query List: a target scheme, its selection query, and
/// (for non-root items) the field on the previous item's scheme that
/// bound it here.
#[derive(Clone, Debug)]
pub struct QueryListItem {
    pub scheme: String,
    pub query: Query,
    pub ref_field: Option<String>,
}

/// A non-empty ordered vector of Query List items. The final item
/// determines the "effective scheme" for access control and hydration.
#[derive(Clone, Debug)]
pub struct QueryList {
    items: Vec<QueryListItem>,
    resolve_depth: u32,
    continue_token: Option<String>,
}

impl QueryList {
    pub fn new(root_scheme: impl Into<String>) -> Self {
        Self {
            items: vec![QueryListItem { scheme: root_scheme.into(), query: Query::new(), ref_field: None }],
            resolve_depth: 1,
            continue_token: None,
        }
    }

    pub fn push(&mut self, scheme: impl Into<String>, ref_field: impl Into<String>) {
        self.items.push(QueryListItem {
            scheme: scheme.into(),
            query: Query::new(),
            ref_field: Some(ref_field.into()),
        });
    }

    pub fn items(&self) -> &[QueryListItem] {
        &self.items
    }

    pub fn last(&self) -> &QueryListItem {
        self.items.last().expect("QueryList is never empty")
    }

    pub fn last_mut(&mut self) -> &mut QueryListItem {
        self.items.last_mut().expect("QueryList is never empty")
    }

    /// The scheme name that governs access control and hydration.
    pub fn effective_scheme(&self) -> &str {
        &self.last().scheme
    }

    pub fn set_resolve_depth(&mut self, depth: u32, max: u32) {
        self.resolve_depth = depth.min(max).max(1);
    }

    pub fn resolve_depth(&self) -> u32 {
        self.resolve_depth
    }

    pub fn set_continue_token(&mut self, token: impl Into<String>) {
        self.continue_token = Some(token.into());
    }

    pub fn continue_token(&self) -> Option<&str> {
        self.continue_token.as_deref()
    }

    pub fn set_fulltext_query(&mut self, field: impl Into<String>, query: impl Into<String>, language: Option<String>) {
        self.last_mut().query.fulltext = Some(FullTextQuery { field: field.into(), query: query.into(), language });
    }

    /// Substitutes the scheme's auto-mtime field as the sole select
    /// predicate, used by the delta-polling path.
    pub fn set_query_as_mtime(&mut self, scheme: &Scheme, since_micros: i64) {
        if let Some(field) = scheme.auto_mtime_field() {
            let item = self.last_mut();
            item.query.predicates.clear();
            item.query.predicates.push(Predicate {
                field: field.name.clone(),
                comparator: Comparator::Gt,
                value1: Value::Int(since_micros),
                value2: None,
            });
        }
    }

    /// True iff every item selects by oid/alias/unique/first/last (i.e.
    /// the whole list resolves at most one row per level) and the
    /// effective scheme has delta tracking enabled, or the terminal
    /// field is a delta-tracked view.
    pub fn delta_applicable(&self, registry: &dyn crate::scheme::SchemeRegistry) -> bool {
        let all_single = self.items.iter().all(|item| item.query.is_single_object());
        if !all_single {
            return false;
        }
        match registry.get(self.effective_scheme()) {
            Some(scheme) => {
                if scheme.delta_enabled {
                    return true;
                }
                // terminal field a delta-tracked view of the previous item
                if let Some(ref_field) = &self.last().ref_field {
                    if let Some(prev) = self.items.get(self.items.len().wrapping_sub(2)) {
                        if let Some(prev_scheme) = registry.get(&prev.scheme) {
                            if let Some(field) = prev_scheme.field(ref_field) {
                                return field.field_type == FieldType::View && scheme.delta_enabled;
                            }
                        }
                    }
                }
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{Field, PermissionList, StaticSchemeRegistry};

    fn objects_scheme() -> Scheme {
        Scheme::new("objects")
            .with_field(Field::new("counter", FieldType::Integer).indexed())
            .with_permissions(PermissionList::new())
    }

    #[test]
    fn effective_scheme_is_the_last_item() {
        let mut list = QueryList::new("objects");
        list.push("peers", "peer");
        assert_eq!(list.effective_scheme(), "peers");
    }

    #[test]
    fn single_object_latches_on_oid_or_limit_one() {
        let mut q = Query::new();
        assert!(!q.is_single_object());
        q.limit = Some(1);
        assert!(q.is_single_object());
        let mut q2 = Query::new();
        q2.oid = Some(42);
        assert!(q2.is_single_object());
    }

    #[test]
    fn delta_applicable_requires_single_object_and_delta_flag() {
        let mut registry = StaticSchemeRegistry::new();
        registry.register(objects_scheme().with_delta(true));
        let mut list = QueryList::new("objects");
        assert!(!list.delta_applicable(&registry));
        list.last_mut().query.oid = Some(1);
        assert!(list.delta_applicable(&registry));
    }
}
