pub mod rotation;
pub mod server;
