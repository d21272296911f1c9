#![doc = include_str!("../README.md")]

mod allocation;
mod allocator;
mod config;
mod error;
mod orchestrator;
mod reaper;
mod status;
mod time;
mod treasury;

pub use crate::allocation::*;
pub use crate::allocator::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::orchestrator::*;
pub use crate::reaper::*;
pub use crate::status::*;
pub use crate::time::*;
pub use crate::treasury::*;
