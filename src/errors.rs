use miette::Diagnostic;
use thiserror::Error;

use crate::authz::AuthzError;
use crate::store::StoreError;

#[derive(Debug, Error, Diagnostic)]
pub enum CertAclError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(certacl::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),
}
