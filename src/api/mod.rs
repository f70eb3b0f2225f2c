pub mod routes;
pub mod websocket;

pub use routes::signal_routes;
