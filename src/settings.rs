use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authz::ACL_CONFIG_RESOURCE;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub store: Store,
    pub authz: Authz,
    pub audit: Audit,
    #[serde(default)]
    pub directory: Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// JSON file holding the configuration tree. Default: data/store.json
    pub path: PathBuf,
    /// fsync the store file on every commit
    #[serde(default = "default_sync")]
    pub sync: bool,
}

fn default_sync() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    /// KDL policies used to seed an empty store
    pub bootstrap_dir: PathBuf,
    /// Resource whose ACL guards the administrative API
    pub admin_resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub enabled: bool,
    /// Append audit records as JSON lines. Logged through tracing only if unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Directory {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
}

/// A static principal, authenticated by bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/store.json"),
            sync: true,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            bootstrap_dir: PathBuf::from("policies"),
            admin_resource: ACL_CONFIG_RESOURCE.to_string(),
        }
    }
}

impl Default for Audit {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "store.path",
                Store::default().path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("store.sync", Store::default().sync)
            .into_diagnostic()?
            .set_default(
                "authz.bootstrap_dir",
                Authz::default().bootstrap_dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("authz.admin_resource", Authz::default().admin_resource)
            .into_diagnostic()?
            .set_default("audit.enabled", Audit::default().enabled)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: CERTACL__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("CERTACL").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize paths to be relative to current dir
        let cwd = std::env::current_dir().into_diagnostic()?;
        if s.store.path.is_relative() {
            s.store.path = cwd.join(&s.store.path);
        }
        if s.authz.bootstrap_dir.is_relative() {
            s.authz.bootstrap_dir = cwd.join(&s.authz.bootstrap_dir);
        }
        if let Some(audit_path) = s.audit.path.as_mut() {
            if audit_path.is_relative() {
                *audit_path = cwd.join(&*audit_path);
            }
        }

        Ok(s)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
