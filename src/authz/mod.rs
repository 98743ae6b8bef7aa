pub mod guard;
pub mod scope;

pub use guard::{Action, AuthorizationGuard, DenialReason};
pub use scope::{Scope, ScopeResolver};
