use super::collaborators::{Authorizer, AuthzToken, EntityAction};
use super::UserContext;
use crate::core::{EntityError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// Entry name granting a permission on every entity.
pub const ANY_ENTITY: &str = "*";

/// Entity permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityPermission {
    View,
    Create,
    Update,
    Delete,
    /// Every action on every entity
    Admin,
}

impl From<EntityAction> for EntityPermission {
    fn from(action: EntityAction) -> Self {
        match action {
            EntityAction::View => Self::View,
            EntityAction::Create => Self::Create,
            EntityAction::Update => Self::Update,
            EntityAction::Delete => Self::Delete,
        }
    }
}

/// Grants held by one user, keyed by entity name or [`ANY_ENTITY`].
#[derive(Debug, Clone, Default)]
struct UserGrants {
    grants: HashMap<String, Vec<EntityPermission>>,
}

impl UserGrants {
    fn is_admin(&self) -> bool {
        self.grants
            .values()
            .any(|perms| perms.contains(&EntityPermission::Admin))
    }

    fn has_permission(&self, entity_name: &str, permission: EntityPermission) -> bool {
        if self.is_admin() {
            return true;
        }
        [entity_name, ANY_ENTITY].iter().any(|key| {
            self.grants
                .get(*key)
                .is_some_and(|perms| perms.contains(&permission))
        })
    }

    fn add_permission(&mut self, entity_name: &str, permission: EntityPermission) -> bool {
        let perms = self.grants.entry(entity_name.to_string()).or_default();
        if perms.contains(&permission) {
            false
        } else {
            perms.push(permission);
            true
        }
    }

    fn remove_permission(&mut self, entity_name: &str, permission: EntityPermission) -> bool {
        match self.grants.get_mut(entity_name) {
            Some(perms) => {
                let len_before = perms.len();
                perms.retain(|p| p != &permission);
                len_before != perms.len()
            }
            None => false,
        }
    }
}

/// Table-driven authorizer
///
/// Keeps per-user entity grants and the stack of actions currently pushed.
pub struct PermissionAuthorizer {
    users: RwLock<HashMap<String, UserGrants>>,
    active: Mutex<Vec<(AuthzToken, String, EntityAction)>>,
    next_token: AtomicU64,
}

impl PermissionAuthorizer {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Grants permissions on an entity (or [`ANY_ENTITY`]) to a user
    pub fn grant(
        &self,
        user_id: &str,
        entity_name: &str,
        permissions: &[EntityPermission],
    ) -> Result<()> {
        let mut users = self.users.write()?;
        let grants = users.entry(user_id.to_string()).or_default();
        for permission in permissions {
            grants.add_permission(entity_name, *permission);
        }
        Ok(())
    }

    pub fn grant_admin(&self, user_id: &str) -> Result<()> {
        self.grant(user_id, ANY_ENTITY, &[EntityPermission::Admin])
    }

    /// Returns true when the permission was held
    pub fn revoke(
        &self,
        user_id: &str,
        entity_name: &str,
        permission: EntityPermission,
    ) -> Result<bool> {
        let mut users = self.users.write()?;
        Ok(users
            .get_mut(user_id)
            .is_some_and(|grants| grants.remove_permission(entity_name, permission)))
    }

    pub fn is_allowed(&self, user_id: &str, entity_name: &str, action: EntityAction) -> Result<bool> {
        let users = self.users.read()?;
        Ok(users
            .get(user_id)
            .is_some_and(|grants| grants.has_permission(entity_name, action.into())))
    }

    /// Number of actions currently pushed
    pub fn depth(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Pushed actions, outermost first
    pub fn active(&self) -> Vec<(String, EntityAction)> {
        self.active
            .lock()
            .map(|active| {
                active
                    .iter()
                    .map(|(_, entity, action)| (entity.clone(), *action))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for PermissionAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Authorizer for PermissionAuthorizer {
    fn check_and_push(
        &self,
        user: &UserContext,
        entity_name: &str,
        action: EntityAction,
        skip_check: bool,
    ) -> Result<AuthzToken> {
        if !skip_check {
            let user_id = user.user_id.as_deref().ok_or_else(|| {
                EntityError::Authorization(format!(
                    "No user logged in, cannot {} {}",
                    action, entity_name
                ))
            })?;
            if !self.is_allowed(user_id, entity_name, action)? {
                return Err(EntityError::Authorization(format!(
                    "User {} is not authorized to {} {}",
                    user_id, action, entity_name
                )));
            }
        }

        let token = AuthzToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.active
            .lock()?
            .push((token, entity_name.to_string(), action));
        Ok(token)
    }

    fn pop(&self, token: AuthzToken) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(pos) = active.iter().rposition(|(t, _, _)| *t == token) {
                active.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_and_wildcard_grants() {
        let authz = PermissionAuthorizer::new();
        authz.grant("alice", "Party", &[EntityPermission::View, EntityPermission::Update]).unwrap();
        authz.grant("alice", ANY_ENTITY, &[EntityPermission::View]).unwrap();

        assert!(authz.is_allowed("alice", "Party", EntityAction::Update).unwrap());
        assert!(authz.is_allowed("alice", "Invoice", EntityAction::View).unwrap());
        assert!(!authz.is_allowed("alice", "Invoice", EntityAction::Delete).unwrap());
        assert!(!authz.is_allowed("bob", "Party", EntityAction::View).unwrap());
    }

    #[test]
    fn test_admin_allows_everything() {
        let authz = PermissionAuthorizer::new();
        authz.grant_admin("root").unwrap();
        assert!(authz.is_allowed("root", "Anything", EntityAction::Delete).unwrap());
    }

    #[test]
    fn test_revoke() {
        let authz = PermissionAuthorizer::new();
        authz.grant("alice", "Party", &[EntityPermission::Delete]).unwrap();
        assert!(authz.revoke("alice", "Party", EntityPermission::Delete).unwrap());
        assert!(!authz.revoke("alice", "Party", EntityPermission::Delete).unwrap());
        assert!(!authz.is_allowed("alice", "Party", EntityAction::Delete).unwrap());
    }

    #[test]
    fn test_skip_check_still_pushes() {
        let authz = PermissionAuthorizer::new();
        let anonymous = UserContext::default();
        assert!(
            authz
                .check_and_push(&anonymous, "Party", EntityAction::Create, false)
                .is_err()
        );

        let token = authz
            .check_and_push(&anonymous, "Party", EntityAction::Create, true)
            .unwrap();
        assert_eq!(authz.active(), vec![("Party".to_string(), EntityAction::Create)]);
        authz.pop(token);
        assert_eq!(authz.depth(), 0);
    }
}
