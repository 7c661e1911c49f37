//! Authentication state trait and macro.

use crate::db::Database;

/// Trait for state types that provide database access for authentication.
pub trait HasAuthBackend {
    fn db(&self) -> &Database;
}

/// Macro to implement `HasAuthBackend` for state structs with a `db: Database` field.
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}
