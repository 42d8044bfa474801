pub mod access_log;
pub mod http_handler;
pub mod server;
