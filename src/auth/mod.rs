//! Authentication and authorization
//!
//! Credential namespaces:
//! - user bearer tokens: issued on account creation
//! - application tokens: issued per application, can be verified or invalidated
//!
//! Capabilities:
//! - `bearer`: the caller is a user
//! - `application`: the caller is a valid application
//! - `verified`: the application was verified by an administrator
//! - `admin`: the owning user is an administrator

mod capabilities;
mod resolver;
mod tokens;

pub use capabilities::{Capability, CapabilitySet, Requirement};
pub use resolver::{
    Account, Authenticated, CredentialResolver, Principal, PrincipalKind, ResolveError,
};
pub use tokens::{
    claimed_owner_id, decode_owner_id, generate_token, Redacted, TokenError, SECRET_BYTES,
};
