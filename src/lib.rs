#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::missing_doc_code_examples)]
#![doc = include_str!("../README.md")]

pub mod code;
pub mod domain;
pub mod fingerprint;
pub mod hook;
pub mod host;
pub mod instrument;
pub mod lifecycle;
pub mod patcher;
pub mod patches;

#[cfg(test)]
mod testing;
