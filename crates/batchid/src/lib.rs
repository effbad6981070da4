#![doc = include_str!("../README.md")]

mod allocator;
mod batch;
mod client;
mod config;
mod error;
mod key;
mod requester;
mod storage;

pub use crate::allocator::*;
pub use crate::batch::*;
pub use crate::client::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::key::*;
pub use crate::requester::*;
pub use crate::storage::*;
