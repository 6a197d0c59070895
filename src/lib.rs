pub mod config;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod model;
pub mod store;
