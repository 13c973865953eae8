//! # Access Control
//!
//! Record-level read permissions and session-token identity resolution.
//!
//! A delivery is allowed when the record is publicly readable, or when the
//! subscriber's session token resolves to an identity the record's ACL
//! grants read to. Resolution failures deny.

pub mod acl;
pub mod errors;
pub mod identity;
pub mod lru;
pub mod remote;

pub use acl::AccessControlList;
pub use errors::{AuthError, AuthResult};
pub use identity::{IdentityCache, IdentityResolver, StaticIdentityResolver, DEFAULT_CACHE_CAPACITY};
pub use lru::LruCache;
pub use remote::ParseSessionResolver;
