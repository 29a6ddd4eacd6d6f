pub mod data;
pub mod dataset;
pub mod error;
pub mod model;
pub mod show;
pub mod training;

pub use error::{Error, LoadError};
