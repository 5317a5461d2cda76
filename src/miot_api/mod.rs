pub mod cached_spec_client;
pub mod models;
pub mod resolver;
pub mod spec_client;
