pub mod annotation;
pub mod catalog;
pub mod config;
pub mod detection;
pub mod error;
pub mod export;
pub mod storage;
pub mod video;

pub use error::{ErrorKind, LabelError, Result};
