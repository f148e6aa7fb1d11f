#![allow(dead_code)]

pub mod constants;
pub mod coupling;
pub mod defaults;
pub mod error;
pub mod fragments;
pub mod initialization;
pub mod interface;
pub mod output;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
