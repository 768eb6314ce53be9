use std::collections::HashMap;
use std::fmt;

use crate::authz::Principal;
use crate::settings::DirectoryUser;

/// Resolves caller credentials to a principal with its identity attributes.
pub trait PrincipalSource: Send + Sync + fmt::Debug {
    fn resolve_token(&self, token: &str) -> Option<Principal>;
}

/// Principals declared in settings under `directory.users`.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    by_token: HashMap<String, DirectoryUser>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        let mut by_token = HashMap::new();
        for user in users {
            if user.token.is_empty() {
                tracing::warn!(user = %user.id, "Skipping directory user without a token");
                continue;
            }
            if let Some(previous) = by_token.insert(user.token.clone(), user) {
                tracing::warn!(user = %previous.id, "Directory token reused, keeping the later user");
            }
        }
        Self { by_token }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

impl PrincipalSource for StaticDirectory {
    fn resolve_token(&self, token: &str) -> Option<Principal> {
        self.by_token
            .get(token)
            .map(|user| Principal::new(&user.id).with_groups(user.groups.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, token: &str, groups: &[&str]) -> DirectoryUser {
        DirectoryUser {
            id: id.into(),
            token: token.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolve_token() {
        let dir = StaticDirectory::new([
            user("alice", "t-alice", &["Administrators"]),
            user("bob", "t-bob", &[]),
            user("nobody", "", &[]),
        ]);
        assert_eq!(dir.len(), 2);

        let alice = dir.resolve_token("t-alice").unwrap();
        assert_eq!(alice.id, "alice");
        assert!(alice.in_group("Administrators"));
        assert!(dir.resolve_token("t-bob").unwrap().groups.is_empty());
        assert!(dir.resolve_token("").is_none());
        assert!(dir.resolve_token("t-mallory").is_none());
    }
}
