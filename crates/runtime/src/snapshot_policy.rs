/// Decides whether a repository should persist a snapshot after an append.
///
/// Snapshotting is an acceleration, never a correctness requirement: a
/// policy that never fires still yields a correct (if slower) repository.
pub trait SnapshotPolicy: Send + Sync {
    fn should_snapshot(&self, version_before: u64, version_after: u64) -> bool;
}

/// Snapshots once the aggregate crosses a multiple of `n` events.
#[derive(Debug, Clone, Copy)]
pub struct EveryNVersions(pub u64);

impl SnapshotPolicy for EveryNVersions {
    fn should_snapshot(&self, version_before: u64, version_after: u64) -> bool {
        if self.0 == 0 {
            return false;
        }
        version_after / self.0 > version_before / self.0
    }
}

/// Never snapshots; every load replays from event 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshot;

impl SnapshotPolicy for NeverSnapshot {
    fn should_snapshot(&self, _version_before: u64, _version_after: u64) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_n_versions_fires_on_crossing_the_boundary() {
        let policy = EveryNVersions(10);
        assert!(!policy.should_snapshot(1, 9));
        assert!(policy.should_snapshot(9, 10));
        assert!(policy.should_snapshot(15, 21));
        assert!(!policy.should_snapshot(21, 25));
    }

    #[test]
    fn never_snapshot_always_declines() {
        let policy = NeverSnapshot;
        assert!(!policy.should_snapshot(0, 1_000_000));
    }
}
