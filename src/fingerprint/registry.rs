//! Known-good fingerprints for a target function, one per supported host edition

use std::borrow::Cow;

use super::Fingerprint;

/// A fingerprint tagged with the host edition it was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownFingerprint {
    /// Host edition the body was compiled in, e.g. `e1.4.0.228531`
    pub edition: &'static str,
    /// Digest of the body in that edition
    pub digest: Fingerprint,
}
impl KnownFingerprint {
    /// Tags `digest` with `edition`
    pub const fn new(edition: &'static str, digest: [u8; 32]) -> Self {
        Self {
            edition,
            digest: Fingerprint::new(digest),
        }
    }
}

/// Ordered, append-only set of accepted fingerprints.
///
/// Duplicates are allowed but pointless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSet(Cow<'static, [KnownFingerprint]>);
impl FingerprintSet {
    /// Wraps a table that ships with a patch
    pub const fn from_static(known: &'static [KnownFingerprint]) -> Self {
        Self(Cow::Borrowed(known))
    }
    /// Set that accepts nothing
    pub const fn empty() -> Self {
        Self(Cow::Borrowed(&[]))
    }
    /// Accepts another edition
    pub fn push(&mut self, known: KnownFingerprint) {
        self.0.to_mut().push(known);
    }
    /// Known fingerprints, oldest edition first
    pub fn iter(&self) -> impl Iterator<Item = &KnownFingerprint> {
        self.0.iter()
    }
    /// Number of accepted editions
    pub fn len(&self) -> usize {
        self.0.len()
    }
    /// Whether nothing is accepted
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Edition whose body produced `fp`, if any
    pub fn edition_of(&self, fp: &Fingerprint) -> Option<&'static str> {
        self.iter().find(|k| k.digest == *fp).map(|k| k.edition)
    }
}

/// Whether `fp` byte-equals any fingerprint in `known`.
///
/// There is no fuzzy matching; one differing byte means the patch doesn't fit.
pub fn matches_any(fp: &Fingerprint, known: &FingerprintSet) -> bool {
    known.iter().any(|k| k.digest == *fp)
}
