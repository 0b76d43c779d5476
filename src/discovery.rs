//! Test folder discovery
//!
//! Walks upward from a saved file's directory looking for the nearest
//! ancestor that has a child directory with the test folder name.

use std::path::{Path, PathBuf};

/// Default name of the directory holding the tests.
pub const DEFAULT_TEST_DIR_NAME: &str = "test";

/// Find the nearest ancestor of `anchor_dir` (inclusive) containing a
/// subdirectory literally named `name`.
///
/// Returns the ancestor itself, which is where the test command runs, or
/// `None` once the filesystem root has been checked.
pub fn find_test_folder(anchor_dir: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    anchor_dir
        .ancestors()
        .find(|dir| dir.join(name).is_dir())
        .map(Path::to_path_buf)
}

/// Directory to start the search from for a saved file.
///
/// Bare file names resolve against the current directory.
pub fn anchor_for(saved_file: &Path) -> &Path {
    saved_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}
