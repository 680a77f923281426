// Outpost Infrastructure - HTTP Adapters
// Implements: Transport

pub mod transport;

pub use transport::HttpTransport;
