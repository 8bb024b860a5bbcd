pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod utils;

pub use error::{Error, Result};
