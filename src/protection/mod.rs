pub mod blocklist;
pub mod geo;
pub mod interceptor;
