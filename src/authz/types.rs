use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authz::aci::{self, Expr};
use crate::authz::errors::AuthzError;

/// Characters allowed in rights, attribute names and other bare tokens.
pub(crate) fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

// ---------- Rights ----------

/// Ordered set of rights. Duplicates collapse onto their first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rights(Vec<String>);

impl Rights {
    /// Parse `"read, modify"` style lists.
    pub fn parse_csv(input: &str) -> Result<Self, AuthzError> {
        if input.trim().is_empty() {
            return Err(AuthzError::InvalidRights(input.to_string()));
        }
        Self::from_tokens(input.split(',').map(str::trim))
            .map_err(|_| AuthzError::InvalidRights(input.to_string()))
    }

    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, AuthzError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rights: Vec<String> = Vec::new();
        for token in tokens {
            let token = token.as_ref();
            if token.is_empty() || !token.chars().all(is_token_char) {
                return Err(AuthzError::InvalidRights(token.to_string()));
            }
            if !rights.iter().any(|r| r == token) {
                rights.push(token.to_string());
            }
        }
        if rights.is_empty() {
            return Err(AuthzError::InvalidRights(String::new()));
        }
        Ok(Self(rights))
    }

    pub fn contains(&self, right: &str) -> bool {
        self.0.iter().any(|r| r == right)
    }

    /// First right of `self` that `universe` does not declare.
    pub fn first_missing_from<'a>(&'a self, universe: &Rights) -> Option<&'a str> {
        self.0
            .iter()
            .find(|r| !universe.contains(r))
            .map(|r| r.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|r| r.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

// ---------- Permission / Operator ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Deny,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Allow => "allow",
            Permission::Deny => "deny",
        })
    }
}

/// Comparison operator used inside an ACI expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Lt,
        Operator::Gt,
        Operator::Le,
        Operator::Ge,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            ">" => Ok(Operator::Gt),
            "<=" => Ok(Operator::Le),
            ">=" => Ok(Operator::Ge),
            other => Err(format!("unknown operator `{other}`")),
        }
    }
}

// ---------- ACL entries and resources ----------

/// One parsed ACI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub permission: Permission,
    pub rights: Rights,
    pub expression: Expr,
}

impl AclEntry {
    pub fn applies_to(&self, right: &str) -> bool {
        self.rights.contains(right)
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rights, self.permission, self.expression)
    }
}

impl FromStr for AclEntry {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        aci::parse_aci(s)
    }
}

/// A protected resource and its ordered entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclResource {
    name: String,
    description: Option<String>,
    rights: Rights,
    entries: Vec<AclEntry>,
}

impl AclResource {
    /// Builds a resource, rejecting entries that use undeclared rights.
    pub fn new(
        name: impl Into<String>,
        rights: Rights,
        entries: Vec<AclEntry>,
        description: Option<String>,
    ) -> Result<Self, AuthzError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AuthzError::MissingField("resource id"));
        }
        for entry in &entries {
            if let Some(right) = entry.rights.first_missing_from(&rights) {
                return Err(AuthzError::UndeclaredRight {
                    resource: name,
                    aci: entry.to_string(),
                    right: right.to_string(),
                });
            }
        }
        Ok(Self {
            name,
            description: description.filter(|d| !d.is_empty()),
            rights,
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn rights(&self) -> &Rights {
        &self.rights
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    /// Entries re-serialized as one semicolon separated list.
    pub fn aci_list(&self) -> String {
        aci::join_aci_list(&self.entries)
    }
}

// ---------- Principals ----------

/// The party an authorization decision is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub groups: Vec<String>,
    pub remote_addr: Option<IpAddr>,
    pub request_time: DateTime<Utc>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            groups: Vec::new(),
            remote_addr: None,
            request_time: Utc::now(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.request_time = time;
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

// ---------- Decisions ----------

/// Why no explicit permission was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndeterminateReason {
    UnknownResource,
    UndeclaredRight,
    NoMatchingEntry,
}

/// Outcome of [`AuthorizationManager::authorize`](crate::authz::manager::AuthorizationManager::authorize).
///
/// `Indeterminate` is kept apart from `Deny` for logging; callers must treat
/// it as a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Indeterminate(IndeterminateReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn label(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Indeterminate(_) => "indeterminate",
        }
    }
}

impl From<Permission> for Decision {
    fn from(value: Permission) -> Self {
        match value {
            Permission::Allow => Decision::Allow,
            Permission::Deny => Decision::Deny,
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    /// e.g. "certServer.ca.certificate"
    pub resource: String,
    /// e.g. "read"
    pub right: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub decision: &'static str,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IndeterminateReason>,
}

impl From<Decision> for AuthorizeResponse {
    fn from(decision: Decision) -> Self {
        Self {
            decision: decision.label(),
            allowed: decision.is_allowed(),
            reason: match decision {
                Decision::Indeterminate(reason) => Some(reason),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclView {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rights: Vec<String>,
    pub acis: Vec<String>,
}

impl From<&AclResource> for AclView {
    fn from(res: &AclResource) -> Self {
        Self {
            name: res.name().to_string(),
            description: res.description().map(str::to_string),
            rights: res.rights().to_vec(),
            acis: res.entries().iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAclRequest {
    /// Comma separated rights, e.g. "read,modify"
    #[serde(default)]
    pub rights: String,
    /// Semicolon separated ACIs
    #[serde(default)]
    pub acis: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluatorSummary {
    #[serde(rename = "type")]
    pub evaluator_type: String,
    pub implementation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluatorOperators {
    #[serde(rename = "type")]
    pub evaluator_type: String,
    pub operators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddEvaluatorRequest {
    #[serde(default)]
    pub implementation: String,
}

// ---------- Bootstrap policy types ----------

/// An `acl` node from a bootstrap KDL file.
#[derive(Debug, Clone, Default)]
pub struct AclDefinition {
    pub name: String,
    pub description: Option<String>,
    pub rights: Vec<String>,
    pub acis: Vec<String>,
}

/// An `evaluator` node from a bootstrap KDL file.
#[derive(Debug, Clone)]
pub struct EvaluatorDefinition {
    pub evaluator_type: String,
    pub implementation: String,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub acls: Vec<AclDefinition>,
    pub evaluators: Vec<EvaluatorDefinition>,
}
