//! Field Resolver: per-scheme include graph plus meta-flag policy,
//! consulted by the Hydrator at every depth of the result tree.

use indexmap::{IndexMap, IndexSet};

use crate::query::ResolveOptions;
use crate::value::{meta_keys, Value};

/// Which meta sub-keys survive hydration for a given node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetaFlags {
    pub action: bool,
    pub time: bool,
    pub view: bool,
}

impl MetaFlags {
    pub fn apply_token(&mut self, token: &str) {
        match token {
            "$action" => self.action = true,
            "$time" => self.time = true,
            "$view" => self.view = true,
            _ => {}
        }
    }
}

/// A node of the include graph bound to one scheme at one depth.
#[derive(Clone, Debug)]
pub struct FieldResolver {
    pub scheme: String,
    include: IndexSet<String>,
    children: IndexMap<String, FieldResolver>,
    pub resolve_options: ResolveOptions,
    pub meta: MetaFlags,
    pub depth: u32,
}

impl FieldResolver {
    pub fn root(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            include: IndexSet::new(),
            children: IndexMap::new(),
            resolve_options: ResolveOptions::NONE,
            meta: MetaFlags::default(),
            depth: 0,
        }
    }

    /// Builds a root node from a comma-separated `resolve` query param.
    /// `$ids`/`$files`/`$sets`/`$objects`/`$all` set `ResolveOptions` bits;
    /// `$action`/`$time`/`$view` set meta flags; dotted paths (`a.b.c`)
    /// build the nested include tree.
    pub fn build(scheme: impl Into<String>, resolve_param: &str) -> Self {
        let mut root = Self::root(scheme);
        for token in resolve_param.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(stripped) = token.strip_prefix('$') {
                let dollar = format!("${stripped}");
                root.resolve_options.apply_token(&dollar);
                root.meta.apply_token(&dollar);
                continue;
            }
            let parts: Vec<&str> = token.split('.').collect();
            root.insert_path(&parts);
        }
        root
    }

    fn insert_path(&mut self, parts: &[&str]) {
        let Some((head, rest)) = parts.split_first() else { return };
        self.include.insert((*head).to_string());
        if !rest.is_empty() {
            let child = self
                .children
                .entry((*head).to_string())
                .or_insert_with(|| Self::root(String::new()));
            child.depth = self.depth + 1;
            child.insert_path(rest);
        }
    }

    /// Whether `name` is in this node's include set (explicitly
    /// requested, or ancestor-traversed into via a dotted path).
    pub fn includes(&self, name: &str) -> bool {
        self.include.contains(name)
    }

    pub fn include_set(&self) -> &IndexSet<String> {
        &self.include
    }

    /// The child node for a named relation field. Returns a permissive
    /// default node (empty include set, inherited resolve options) when
    /// the field was not explicitly dotted into.
    pub fn next(&self, field_name: &str, foreign_scheme: impl Into<String>) -> Self {
        if let Some(child) = self.children.get(field_name) {
            let mut child = child.clone();
            if child.scheme.is_empty() {
                child.scheme = foreign_scheme.into();
            }
            return child;
        }
        Self {
            scheme: foreign_scheme.into(),
            include: IndexSet::new(),
            children: IndexMap::new(),
            resolve_options: self.resolve_options,
            meta: self.meta,
            depth: self.depth + 1,
        }
    }
}

/// Reduces a `{action, time}` delta dictionary per the node's meta flags:
/// with no delta meta requested the value collapses to the bare string
/// `"delete"` (preserving tombstones) or is dropped entirely; individual
/// flags gate the `action`/`time` sub-keys.
pub fn reduce_delta_meta(delta: &Value, meta: MetaFlags) -> Option<Value> {
    let action = delta.get("action").and_then(Value::as_str).map(str::to_string);
    if !meta.action && !meta.time {
        return match action.as_deref() {
            Some("delete") => Some(Value::String("delete".to_string())),
            _ => None,
        };
    }
    let mut out = Value::dict();
    if meta.action {
        if let Some(a) = &action {
            out.set("action", Value::String(a.clone()));
        }
    }
    if meta.time {
        if let Some(t) = delta.get("time") {
            out.set("time", t.clone());
        }
    }
    Some(out)
}

/// `__views` is retained only when the `view` meta flag is set.
pub fn retains_views_meta(meta: MetaFlags) -> bool {
    meta.view
}

pub const VIEWS_KEY: &str = meta_keys::VIEWS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_path_builds_nested_include() {
        let root = FieldResolver::build("things", "peer.peer");
        assert!(root.includes("peer"));
        let child = root.next("peer", "things");
        assert!(child.includes("peer"));
        assert_eq!(child.depth, 1);
    }

    #[test]
    fn dollar_tokens_set_resolve_options_and_meta() {
        let root = FieldResolver::build("things", "$ids,$action");
        assert!(root.resolve_options.ids);
        assert!(root.meta.action);
    }

    #[test]
    fn reduce_delta_meta_collapses_to_delete_string_when_no_flags() {
        let mut delta = Value::dict();
        delta.set("action", Value::String("delete".into()));
        delta.set("time", Value::Int(1));
        let reduced = reduce_delta_meta(&delta, MetaFlags::default());
        assert!(matches!(reduced, Some(Value::String(s)) if s == "delete"));

        let mut delta2 = Value::dict();
        delta2.set("action", Value::String("update".into()));
        assert!(reduce_delta_meta(&delta2, MetaFlags::default()).is_none());
    }
}
