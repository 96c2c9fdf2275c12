//! Ordered-tuple key type for the KV store.
//!
//! The contract in spec.md §6 fixes exact key-prefix strings
//! (`oauth/auth_codes/…`, `sessions/by_user/…`, ...). We model a key as an
//! ordered sequence of string segments and render it with `/` as the
//! separator so the on-the-wire layout matches the spec's examples exactly,
//! while still comparing/ordering segment-by-segment rather than
//! byte-by-byte on the joined string (a segment containing `/` could
//! otherwise confuse prefix matching).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<String>);

impl Key {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Append segments, returning a new key (keys are otherwise immutable).
    #[must_use]
    pub fn join<S: Into<String>>(&self, segment: S) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Whether `self` is `prefix` or an extension of it.
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Build a [`Key`] from segments, e.g. `key!["oauth", "auth_codes", code]`.
#[macro_export]
macro_rules! key {
    ($($seg:expr),+ $(,)?) => {
        $crate::Key::new([$($seg.to_string()),+])
    };
}
