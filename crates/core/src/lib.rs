pub mod config;
pub mod domain;
pub mod errors;

pub use domain::identity::{IdentityFields, IdentityNumber, IdentityRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
