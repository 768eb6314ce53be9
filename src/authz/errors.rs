use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Error classes surfaced to administrative callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Parse,
    Validation,
    Persistence,
    Denied,
    Bootstrap,
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("ACL resource `{0}` does not exist")]
    #[diagnostic(code(certacl::authz::resource_not_found))]
    ResourceNotFound(String),

    #[error("Evaluator type `{0}` is not registered")]
    #[diagnostic(code(certacl::authz::evaluator_not_found))]
    EvaluatorNotFound(String),

    #[error("Invalid ACI `{input}` at offset {position}: {message}")]
    #[diagnostic(
        code(certacl::authz::invalid_aci),
        help("ACI syntax: <rights> allow|deny <attribute><op>\"<value>\" joined with &&, ||, ! and parentheses")
    )]
    InvalidAci {
        input: String,
        position: usize,
        message: String,
    },

    #[error("Invalid rights list `{0}`")]
    #[diagnostic(
        code(certacl::authz::invalid_rights),
        help("Rights are a comma separated list such as `read,modify`")
    )]
    InvalidRights(String),

    #[error("ACI `{aci}` uses right `{right}` which resource `{resource}` does not declare")]
    #[diagnostic(code(certacl::authz::undeclared_right))]
    UndeclaredRight {
        resource: String,
        aci: String,
        right: String,
    },

    #[error("Missing required field `{0}`")]
    #[diagnostic(code(certacl::authz::missing_field))]
    MissingField(&'static str),

    #[error("Unknown evaluator implementation `{0}`")]
    #[diagnostic(
        code(certacl::authz::unknown_implementation),
        help("Built-in implementations: user, group, ipaddress, time")
    )]
    UnknownImplementation(String),

    #[error("Evaluator must support at least one operator")]
    #[diagnostic(code(certacl::authz::empty_operator_set))]
    EmptyOperatorSet,

    #[error("Failed to persist ACL configuration")]
    #[diagnostic(code(certacl::authz::persistence))]
    Persistence(#[source] StoreError),

    #[error("Principal `{principal}` lacks `{right}` on `{resource}`")]
    #[diagnostic(code(certacl::authz::access_denied))]
    AccessDenied {
        principal: String,
        resource: String,
        right: String,
    },

    #[error("Missing or unknown credentials")]
    #[diagnostic(code(certacl::authz::unauthenticated))]
    Unauthenticated,

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(certacl::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(certacl::authz::invalid_policy),
        help("Each policy file may contain `acl` and `evaluator` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(certacl::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(certacl::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::ResourceNotFound(_) | AuthzError::EvaluatorNotFound(_) => {
                ErrorKind::NotFound
            }
            AuthzError::InvalidAci { .. } | AuthzError::InvalidRights(_) => ErrorKind::Parse,
            AuthzError::UndeclaredRight { .. }
            | AuthzError::MissingField(_)
            | AuthzError::UnknownImplementation(_)
            | AuthzError::EmptyOperatorSet => ErrorKind::Validation,
            AuthzError::Persistence(_) => ErrorKind::Persistence,
            AuthzError::AccessDenied { .. } | AuthzError::Unauthenticated => ErrorKind::Denied,
            AuthzError::PolicyLoadError { .. }
            | AuthzError::InvalidPolicy(_)
            | AuthzError::KdlParse(_)
            | AuthzError::Io(_) => ErrorKind::Bootstrap,
        }
    }
}

impl From<StoreError> for AuthzError {
    fn from(value: StoreError) -> Self {
        AuthzError::Persistence(value)
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Parse | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Denied => match self {
                AuthzError::Unauthenticated => StatusCode::UNAUTHORIZED,
                _ => StatusCode::FORBIDDEN,
            },
            ErrorKind::Persistence | ErrorKind::Bootstrap => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
