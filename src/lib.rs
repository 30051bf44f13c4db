pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mail;
pub mod models;
pub mod permissions;
pub mod queue;
pub mod retention;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
pub mod workflow;

pub use routes::create_router;
pub use workers::{default_handlers, Worker, WorkerContext};
