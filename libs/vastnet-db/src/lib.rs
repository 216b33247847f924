pub mod models;
pub mod db;
pub mod repositories;

pub use sqlx;
pub use db::{connect_in_memory, init_db};
