#![doc = include_str!("../README.md")]

mod error;

pub mod correlator;
pub mod framing;
pub mod pipeline;
pub mod rotation;

pub use error::{Error, Result};
