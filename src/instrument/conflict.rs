//! Detects instrumentation installed by someone else.
//!
//! Any foreign hook counts. Whether two independently written hooks on one function
//! get along can't be proven, so this never tries.

use super::{InstrumentationRecord, Owner};

/// Whether anyone other than `me` has hooked the function described by `record`
pub fn already_patched_by_others(record: &InstrumentationRecord, me: &Owner) -> bool {
    record.entries().iter().any(|entry| entry.owner != *me)
}
