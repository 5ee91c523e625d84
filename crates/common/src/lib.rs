pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod mutation_log;
pub mod types;

pub use error::{HeraldError, HeraldResult};
