// Library exports for orderbook-mirror

pub mod binance; // Venue feed: wire types, REST snapshots, WebSocket client
pub mod config; // Environment configuration
pub mod error; // Crate error types
pub mod orderbook; // Book engine: ladder, analytics, validation, registry
pub mod server; // HTTP query surface + WebSocket push surface
