//! HTTP API: routes, handlers and the WebSocket relay endpoints.

mod error;
mod handlers;
mod proxy;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::FormOrJson;
pub use routes::create_router;
pub use state::AppState;
