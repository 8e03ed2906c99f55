//! # Code
//!
//! Architecture-specific machine code

pub mod x64;
