pub mod error;
pub mod model;
pub mod routes;
pub mod server;
pub mod state;

pub use error::*;
pub use model::*;
pub use routes::*;
pub use server::*;
pub use state::*;

#[cfg(test)]
mod tests {
    use super::{router, run_web_server, sse_event_name, ErrorBody, WebError, WebState};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_types() {
        let _ = TypeId::of::<WebError>();
        let _ = TypeId::of::<ErrorBody>();
        let _ = TypeId::of::<WebState>();
    }

    #[test]
    fn crate_root_reexports_helpers_and_handlers() {
        let _event_name = sse_event_name;
        let _router: fn(WebState) -> axum::Router = router;
        let _run_server = run_web_server;
    }
}
