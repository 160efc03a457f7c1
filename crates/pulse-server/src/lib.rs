pub mod connection;
pub mod handlers;
pub mod poll;
pub mod server;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
