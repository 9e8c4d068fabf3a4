pub mod bridge;
pub mod client;
pub mod handlers;
pub mod server;

pub use client::ClientRegistry;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
