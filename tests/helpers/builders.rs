use certacl::authz::types::AclResource;
use certacl::authz::AuthorizationManager;
use certacl::settings::DirectoryUser;
use std::sync::Arc;

/// Builder for creating test ACLs through the manager
pub struct AclBuilder {
    name: String,
    rights: Vec<String>,
    acis: Vec<String>,
    description: Option<String>,
}

impl AclBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rights: vec!["read".to_string()],
            acis: Vec::new(),
            description: None,
        }
    }

    pub fn rights(mut self, rights: &[&str]) -> Self {
        self.rights = rights.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn aci(mut self, aci: &str) -> Self {
        self.acis.push(aci.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn create(self, manager: &AuthorizationManager) -> Arc<AclResource> {
        manager
            .update_acls(
                &self.name,
                &self.rights.join(","),
                &self.acis.join(";"),
                self.description.as_deref(),
            )
            .expect("Failed to create test ACL")
    }
}

/// Builder for directory users handed to the HTTP layer
pub struct DirectoryUserBuilder {
    id: String,
    groups: Vec<String>,
}

impl DirectoryUserBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            groups: Vec::new(),
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }

    /// The bearer token is `<id>-token`
    pub fn build(self) -> DirectoryUser {
        DirectoryUser {
            token: format!("{}-token", self.id),
            id: self.id,
            groups: self.groups,
        }
    }
}
