//! Acting principal and the per-request context threaded through every component.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod request_context;

pub use principal::Principal;
pub use request_context::RequestContext;
