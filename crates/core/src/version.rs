//! Optimistic concurrency control over event streams.

/// The version an append expects the stream to be at before it commits.
///
/// Stream versions are the count of events previously committed to the
/// stream (i.e. the sequence number of the last committed event). A fresh
/// stream is at version 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// Append regardless of the current version. Used for commands that
    /// tolerate concurrent writers (e.g. saga emissions).
    Any,
    /// The stream must not exist yet (current version must be 0).
    NoStream,
    /// The stream must be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Returns whether `current` satisfies this expectation.
    pub fn matches(&self, current: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => current == 0,
            ExpectedVersion::Exact(expected) => *expected == current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn no_stream_only_matches_zero() {
        assert!(ExpectedVersion::NoStream.matches(0));
        assert!(!ExpectedVersion::NoStream.matches(1));
    }

    #[test]
    fn exact_matches_only_that_version() {
        assert!(ExpectedVersion::Exact(5).matches(5));
        assert!(!ExpectedVersion::Exact(5).matches(4));
        assert!(!ExpectedVersion::Exact(5).matches(6));
    }
}
