//! Request handlers for different server endpoints

pub mod routes;
pub mod websocket;

// Re-export the websocket handler and the route tree
pub use routes::routes;
pub use websocket::handle_ws_client;
