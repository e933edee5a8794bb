//! AuthCore: user registry, session store, token issuance, and request middleware (§4.8).

pub mod middleware;
pub mod pkce;
pub mod store;
pub mod tokens;

pub use middleware::{AuthContext, AuthUser};
pub use pkce::{generate_pkce_pair, PkceStore};
pub use store::AuthStore;
pub use tokens::TokenCodec;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::middleware::{AuthContext, AuthUser};
    pub use super::pkce::PkceStore;
    pub use super::store::AuthStore;
    pub use super::tokens::TokenCodec;
}
