//! Transport host: axum router and the WebSocket channel adapter.

mod routes;
mod ws;

pub use routes::{AppState, CreateSessionRequest, CreateSessionResponse, router};
pub use ws::WsChannel;
