//! Access Control: the two-tier scheme/object permission pipeline that
//! gates every Resource Family action and may rewrite update patches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::scheme::{Action, Permission, Scheme};
use crate::user::User;
use crate::value::Value;

/// Scheme-tier callback: given the current user and action, returns the
/// permission to apply when the scheme-level entry is `Partial`.
pub type SchemeFn = Arc<dyn Fn(Option<&User>, Action) -> Permission + Send + Sync>;

/// Object-tier callback: given the user, scheme, action, the current
/// object value, and a mutable patch, may prune the patch and returns
/// whether the action is allowed at all.
pub type ObjectFn = Arc<dyn Fn(Option<&User>, &Scheme, Action, &Value, &mut Value) -> bool + Send + Sync>;

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
struct Key<'a> {
    scheme: &'a str,
    action: Action,
}

/// Process-wide access control policy: per-scheme callbacks plus the
/// admin-bypass configuration.
#[derive(Default)]
pub struct AccessControl {
    scheme_callbacks: HashMap<(String, u8), SchemeFn>,
    object_callbacks: HashMap<(String, u8), ObjectFn>,
    admin_privileges_enabled: bool,
    /// Cross-server auth header name/value pairs that, when matched,
    /// grant `Full` unconditionally (the original's server-to-server
    /// bypass, independent of the request's user principal).
    server_auth_pairs: Vec<(String, String)>,
}

fn action_tag(action: Action) -> u8 {
    match action {
        Action::Create => 0,
        Action::Read => 1,
        Action::Append => 2,
        Action::Update => 3,
        Action::Remove => 4,
        Action::Reference => 5,
    }
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin_privileges(mut self, enabled: bool) -> Self {
        self.admin_privileges_enabled = enabled;
        self
    }

    pub fn with_server_auth_pair(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.server_auth_pairs.push((header.into(), value.into()));
        self
    }

    pub fn on_scheme(&mut self, scheme: impl Into<String>, action: Action, f: SchemeFn) {
        self.scheme_callbacks.insert((scheme.into(), action_tag(action)), f);
    }

    pub fn on_object(&mut self, scheme: impl Into<String>, action: Action, f: ObjectFn) {
        self.object_callbacks.insert((scheme.into(), action_tag(action)), f);
    }

    /// True when the request authenticates as a cross-server peer via a
    /// configured header pair.
    pub fn authorizes_server_pair(&self, headers: &HashMap<String, String>) -> bool {
        self.server_auth_pairs
            .iter()
            .any(|(name, value)| headers.get(name.as_str()).map(|v| v == value).unwrap_or(false))
    }

    /// Scheme-tier evaluation, with the admin bypass applied first.
    pub fn authorize_scheme(
        &self,
        user: Option<&User>,
        scheme: &Scheme,
        action: Action,
        server_headers: &HashMap<String, String>,
    ) -> Permission {
        if self.admin_privileges_enabled {
            let is_admin = user.map(User::is_admin).unwrap_or(false);
            if is_admin || self.authorizes_server_pair(server_headers) {
                return Permission::Full;
            }
        }

        let declared = scheme.permission(action);
        match declared {
            Permission::Full => Permission::Full,
            Permission::Restrict => Permission::Restrict,
            Permission::Partial => {
                match self.scheme_callbacks.get(&(scheme.name.clone(), action_tag(action))) {
                    Some(cb) => cb(user, action),
                    None => Permission::Partial,
                }
            }
        }
    }

    /// Object-tier evaluation. Only meaningful (and only called by
    /// callers) when `authorize_scheme` returned `Partial`.
    pub fn authorize_object(
        &self,
        user: Option<&User>,
        scheme: &Scheme,
        action: Action,
        object: &Value,
        patch: &mut Value,
    ) -> bool {
        match self.object_callbacks.get(&(scheme.name.clone(), action_tag(action))) {
            Some(cb) => cb(user, scheme, action, object, patch),
            None => false,
        }
    }

    /// Full scheme+object evaluation collapsed to a single boolean,
    /// used by callers that don't need the intermediate lattice value
    /// (e.g. a plain existence/visibility check).
    pub fn is_allowed(
        &self,
        user: Option<&User>,
        scheme: &Scheme,
        action: Action,
        object: &Value,
        patch: &mut Value,
        server_headers: &HashMap<String, String>,
    ) -> bool {
        match self.authorize_scheme(user, scheme, action, server_headers) {
            Permission::Full => true,
            Permission::Restrict => false,
            Permission::Partial => self.authorize_object(user, scheme, action, object, patch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::PermissionList;

    #[test]
    fn restrict_denies_without_consulting_object_tier() {
        let ac = AccessControl::new();
        let scheme = Scheme::new("things").with_permissions(PermissionList::new().set(Action::Remove, Permission::Restrict));
        let mut patch = Value::dict();
        let headers = HashMap::new();
        assert!(!ac.is_allowed(None, &scheme, Action::Remove, &Value::dict(), &mut patch, &headers));
    }

    #[test]
    fn full_grants_without_object_tier() {
        let ac = AccessControl::new();
        let scheme = Scheme::new("things").with_permissions(PermissionList::new().set(Action::Read, Permission::Full));
        let mut patch = Value::dict();
        let headers = HashMap::new();
        assert!(ac.is_allowed(None, &scheme, Action::Read, &Value::dict(), &mut patch, &headers));
    }

    #[test]
    fn admin_bypass_grants_full_regardless_of_scheme_entry() {
        let ac = AccessControl::new().with_admin_privileges(true);
        let scheme = Scheme::new("things").with_permissions(PermissionList::new().set(Action::Remove, Permission::Restrict));
        let user = User::new_for_test(1, "root", true);
        let mut patch = Value::dict();
        let headers = HashMap::new();
        assert_eq!(
            ac.authorize_scheme(Some(&user), &scheme, Action::Remove, &headers),
            Permission::Full
        );
    }
}
