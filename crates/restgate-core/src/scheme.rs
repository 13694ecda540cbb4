//! Scheme and Field declarations: the static, process-wide data model
//! that the Path Resolver, Access Control, and Hydrator all read from.
//!
//! Schemes and Fields are immutable after registry startup, so they are
//! modeled as plain records rather than behind any interior mutability.

use indexmap::IndexMap;

/// The type of a Field's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Boolean,
    Text,
    Bytes,
    Float,
    Data,
    Extra,
    Object,
    Set,
    Array,
    File,
    Image,
    View,
    FullTextView,
}

impl FieldType {
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object | Self::Set | Self::View)
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Self::File | Self::Image)
    }
}

/// A transform applied when a Field's value crosses the adapter boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Transform {
    #[default]
    None,
    Alias,
    Uuid,
    Password,
}

/// Per-field behavioral flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldFlags {
    pub indexed: bool,
    pub unique: bool,
    pub protected: bool,
    pub auto_mtime: bool,
    /// For `Set`-typed fields: true when this is a many-to-many
    /// Reference-Set (an owned list of references) rather than a plain
    /// reverse collection keyed by a foreign key on the child row.
    pub reference_set: bool,
}

impl FieldFlags {
    pub const NONE: Self =
        Self { indexed: false, unique: false, protected: false, auto_mtime: false, reference_set: false };

    pub fn indexed() -> Self {
        Self { indexed: true, ..Self::NONE }
    }
}

/// A single reachable attribute of a Scheme.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub transform: Transform,
    pub flags: FieldFlags,
    /// For `Object`/`Set`/`View`: the name of the foreign scheme.
    pub foreign_scheme: Option<String>,
    /// For `Set`: the name of the field on the foreign scheme that owns
    /// the back-reference (the reverse-collection key).
    pub foreign_field: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            transform: Transform::None,
            flags: FieldFlags::NONE,
            foreign_scheme: None,
            foreign_field: None,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.flags.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.flags.unique = true;
        self.flags.indexed = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.flags.protected = true;
        self
    }

    pub fn auto_mtime(mut self) -> Self {
        self.flags.auto_mtime = true;
        self
    }

    pub fn reference_set(mut self) -> Self {
        self.flags.reference_set = true;
        self
    }

    pub fn with_transform(mut self, t: Transform) -> Self {
        self.transform = t;
        self
    }

    pub fn references(mut self, scheme: impl Into<String>) -> Self {
        self.foreign_scheme = Some(scheme.into());
        self
    }

    pub fn owned_by(mut self, field: impl Into<String>) -> Self {
        self.foreign_field = Some(field.into());
        self
    }

    /// `eq` on this field latches the Path Resolver's single-object flag:
    /// true for fields with the `Unique` flag or the `Alias` transform.
    pub fn latches_single_object_on_eq(&self) -> bool {
        self.flags.unique || self.transform == Transform::Alias
    }
}

/// The access-control lattice: `Restrict < Partial < Full`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Restrict,
    Partial,
    Full,
}

impl Permission {
    pub fn min(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }
}

/// The six actions Access Control gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Append,
    Update,
    Remove,
    Reference,
}

/// Per-scheme, per-action permission table. Absent entries fall back to
/// the scheme's default: admin bypass if applicable, `Full` for `Read`,
/// `Restrict` otherwise.
#[derive(Clone, Debug, Default)]
pub struct PermissionList {
    entries: IndexMap<Action, Permission>,
}

impl PermissionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, action: Action, perm: Permission) -> Self {
        self.entries.insert(action, perm);
        self
    }

    pub fn get(&self, action: Action) -> Option<Permission> {
        self.entries.get(&action).copied()
    }

    pub fn default_for(action: Action) -> Permission {
        match action {
            Action::Read => Permission::Full,
            _ => Permission::Restrict,
        }
    }
}

/// A named record of fields: the unit the Path Resolver and Resource
/// Family both operate against.
#[derive(Clone, Debug)]
pub struct Scheme {
    pub name: String,
    pub fields: IndexMap<String, Field>,
    /// Field names that carry the `Alias` transform, for fast alias lookup.
    pub aliases: Vec<String>,
    /// Field names of type `View`.
    pub views: Vec<String>,
    pub delta_enabled: bool,
    pub permissions: PermissionList,
    pub max_request_size: usize,
    pub max_var_size: usize,
    pub max_file_size: usize,
}

impl Scheme {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            aliases: Vec::new(),
            views: Vec::new(),
            delta_enabled: false,
            permissions: PermissionList::new(),
            max_request_size: 1 << 20,
            max_var_size: 1 << 16,
            max_file_size: 10 << 20,
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        if field.transform == Transform::Alias {
            self.aliases.push(field.name.clone());
        }
        if field.field_type == FieldType::View {
            self.views.push(field.name.clone());
        }
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn with_delta(mut self, enabled: bool) -> Self {
        self.delta_enabled = enabled;
        self
    }

    pub fn with_permissions(mut self, list: PermissionList) -> Self {
        self.permissions = list;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn auto_mtime_field(&self) -> Option<&Field> {
        self.fields.values().find(|f| f.flags.auto_mtime)
    }

    /// Permission for an action, honoring the scheme's own default and
    /// the process default when no entry and no admin bypass applies.
    pub fn permission(&self, action: Action) -> Permission {
        self.permissions
            .get(action)
            .unwrap_or_else(|| PermissionList::default_for(action))
    }
}

/// Process-wide, read-only-after-init lookup of registered Schemes.
pub trait SchemeRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<&Scheme>;
}

#[derive(Default)]
pub struct StaticSchemeRegistry {
    schemes: IndexMap<String, Scheme>,
}

impl StaticSchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scheme: Scheme) -> &mut Self {
        self.schemes.insert(scheme.name.clone(), scheme);
        self
    }
}

impl SchemeRegistry for StaticSchemeRegistry {
    fn get(&self, name: &str) -> Option<&Scheme> {
        self.schemes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_lattice_orders_correctly() {
        assert!(Permission::Restrict < Permission::Partial);
        assert!(Permission::Partial < Permission::Full);
        assert_eq!(Permission::Full.min(Permission::Partial), Permission::Partial);
    }

    #[test]
    fn unique_and_alias_fields_latch_on_eq() {
        let unique = Field::new("slug", FieldType::Text).unique();
        let alias = Field::new("name", FieldType::Text).with_transform(Transform::Alias);
        let plain = Field::new("counter", FieldType::Integer);
        assert!(unique.latches_single_object_on_eq());
        assert!(alias.latches_single_object_on_eq());
        assert!(!plain.latches_single_object_on_eq());
    }

    #[test]
    fn scheme_default_permission_full_read_restrict_else() {
        let scheme = Scheme::new("objects");
        assert_eq!(scheme.permission(Action::Read), Permission::Full);
        assert_eq!(scheme.permission(Action::Update), Permission::Restrict);
    }
}
