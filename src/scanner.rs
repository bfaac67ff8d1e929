//! Artifact Staging Scanner (spec component B).
//!
//! Finds the next installable artifact in the staging directory and records
//! it in the process-wide [`CandidateSlot`].

use std::path::Path;
use std::sync::Mutex;

use tracing::{info, warn};

/// A candidate artifact discovered in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The trailing dotted suffix, e.g. `ver24`.
    pub version: String,
    /// The full directory entry name, e.g. `self-upgrade.ver24`.
    pub name: String,
}

/// Process-wide optional holding the filename of the next installable
/// artifact. Single writer (the scanner), many readers (status page,
/// coordinator).
#[derive(Default)]
pub struct CandidateSlot(Mutex<Option<String>>);

impl CandidateSlot {
    pub fn new() -> Self {
        Self(Mutex::new(None))
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().expect("candidate slot poisoned").clone()
    }

    fn set(&self, name: String) {
        *self.0.lock().expect("candidate slot poisoned") = Some(name);
    }

    /// Consume the slot, returning the candidate name if one was present.
    pub fn take(&self) -> Option<String> {
        self.0.lock().expect("candidate slot poisoned").take()
    }
}

/// Scan `staging_dir` in lexicographic order and return the first entry
/// whose name splits on `.` into exactly two segments. Writes the winner
/// into `slot`.
///
/// A missing or unreadable directory is indistinguishable from an empty one
/// at this interface — callers (in particular the edge adapter) must not
/// treat the two differently.
pub fn scan(staging_dir: &Path, slot: &CandidateSlot) -> Option<Candidate> {
    let candidate = find_candidate(staging_dir);
    if let Some(candidate) = &candidate {
        info!(name = %candidate.name, version = %candidate.version, "scan found candidate");
        slot.set(candidate.name.clone());
    } else {
        warn!(dir = %staging_dir.display(), "scan found no candidate");
    }
    candidate
}

fn find_candidate(staging_dir: &Path) -> Option<Candidate> {
    let mut names: Vec<String> = std::fs::read_dir(staging_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    for name in names {
        let mut segments = name.split('.');
        let (first, second, third) = (segments.next(), segments.next(), segments.next());
        if let (Some(_), Some(version), None) = (first, second, third) {
            return Some(Candidate {
                version: version.to_string(),
                name,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_returns_none_for_missing_directory() {
        let slot = CandidateSlot::new();
        let result = scan(Path::new("/nonexistent/staging/dir/for/sure"), &slot);
        assert!(result.is_none());
        assert!(slot.get().is_none());
    }

    #[test]
    fn scan_returns_none_for_empty_directory() {
        let dir = tempdir().unwrap();
        let slot = CandidateSlot::new();
        assert!(scan(dir.path(), &slot).is_none());
    }

    #[test]
    fn scan_skips_signature_files_and_finds_artifact() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("self-upgrade.ver24"), b"binary").unwrap();
        std::fs::write(
            dir.path().join("self-upgrade.ver24.RSAsignature"),
            b"sig",
        )
        .unwrap();

        let slot = CandidateSlot::new();
        let candidate = scan(dir.path(), &slot).expect("candidate expected");
        assert_eq!(candidate.name, "self-upgrade.ver24");
        assert_eq!(candidate.version, "ver24");
        assert_eq!(slot.get(), Some("self-upgrade.ver24".to_string()));
    }

    #[test]
    fn scan_skips_entries_with_no_dot() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("README"), b"not a candidate").unwrap();
        let slot = CandidateSlot::new();
        assert!(scan(dir.path(), &slot).is_none());
    }

    #[test]
    fn scan_is_deterministic_and_picks_lexicographic_first() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("self-upgrade.ver9"), b"a").unwrap();
        std::fs::write(dir.path().join("self-upgrade.ver24"), b"b").unwrap();

        let slot = CandidateSlot::new();
        let first = scan(dir.path(), &slot).unwrap();
        let second = scan(dir.path(), &slot).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "self-upgrade.ver24"); // "ver24" < "ver9" lexicographically
    }

    #[test]
    fn candidate_slot_take_consumes_once() {
        let slot = CandidateSlot::new();
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("app.v1"), b"x").unwrap();
        scan(dir.path(), &slot);

        assert_eq!(slot.take(), Some("app.v1".to_string()));
        assert_eq!(slot.take(), None);
    }
}
