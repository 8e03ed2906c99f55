//! # Patches
//!
//! This module contains the leaf patch behaviors the lifecycle drives.

pub mod hooks;
pub mod retune;
