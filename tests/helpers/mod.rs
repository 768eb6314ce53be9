#![allow(dead_code)]

pub mod builders;
pub mod store;

pub use builders::{AclBuilder, DirectoryUserBuilder};
pub use store::{FailingBackend, TestStore};
