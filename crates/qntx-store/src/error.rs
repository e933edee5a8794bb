//! Store-local error bridge. `qntx_core::Error` is the canonical kind hierarchy (§7); this
//! module only adds the `sqlx::Error` mapping the donor's `StateStoreError` had, since sqlx
//! errors need a kind judgment call (not-found vs internal) this crate is best placed to make.

use qntx_core::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Map a `sqlx::Error` onto the closest QNTX error kind.
pub fn from_sqlx(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::RowNotFound => Error::not_found("row not found"),
        other => Error::Database(other),
    }
}
