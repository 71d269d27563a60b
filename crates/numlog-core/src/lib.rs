#![doc = include_str!("../README.md")]

mod error;
mod ledger;
mod record;

pub use crate::error::*;
pub use crate::ledger::*;
pub use crate::record::*;
