//! Project root detection and binary lookup.

use std::path::{Component, Path, PathBuf};

/// Files marking the root of a PHP project.
pub const PROJECT_MARKERS: [&str; 3] = ["composer.json", "phpunit.xml", "phpunit.xml.dist"];

/// Looks up executables relative to the project.
pub trait Filesystem {
    /// The first existing candidate, else the last candidate unresolved.
    fn find_up(&self, candidates: &[&str]) -> String;
}

/// [`Filesystem`] walking up from a project root, then searching `PATH`.
#[derive(Debug, Clone)]
pub struct ProjectFiles {
    root: PathBuf,
}

impl ProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Filesystem for ProjectFiles {
    fn find_up(&self, candidates: &[&str]) -> String {
        for dir in self.root.ancestors() {
            if let Some(found) = candidates
                .iter()
                .map(|candidate| dir.join(candidate))
                .find(|path| path.is_file())
            {
                return found.to_string_lossy().to_string();
            }
        }

        candidates
            .iter()
            .filter(|candidate| !candidate.contains('/'))
            .find_map(|candidate| which::which(candidate).ok())
            .map_or_else(
                || candidates.last().map(ToString::to_string).unwrap_or_default(),
                |path| path.to_string_lossy().to_string(),
            )
    }
}

/// Determine the root of the project containing a file based on marker files.
fn detect_workspace_from_file(file_path: &Path, marker_files: &[&str]) -> Option<PathBuf> {
    let parent = file_path.parent()?;
    if marker_files
        .iter()
        .any(|file_name| parent.join(file_name).exists())
    {
        Some(parent.to_path_buf())
    } else {
        detect_workspace_from_file(parent, marker_files)
    }
}

/// The project root of a file: the nearest ancestor holding a project marker,
/// or the file's own directory.
#[must_use]
pub fn project_root(file_path: &Path) -> PathBuf {
    detect_workspace_from_file(file_path, &PROJECT_MARKERS).unwrap_or_else(|| {
        file_path
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf)
    })
}

/// Resolve a relative path against a base directory, handling ../ and ./
/// components.
pub fn resolve_path(base_dir: &Path, relative_path: &str) -> PathBuf {
    let absolute = if Path::new(relative_path).is_absolute() {
        PathBuf::from(relative_path)
    } else {
        base_dir.join(relative_path)
    };

    let mut components = Vec::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::Normal(_) | Component::RootDir | Component::Prefix(_) => {
                components.push(component);
            }
            Component::CurDir => {}
        }
    }

    PathBuf::from_iter(components)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_resolve_path() {
        let base_dir = PathBuf::from("/Users/test/projects");

        assert_eq!(
            resolve_path(&base_dir, "tests/FooTest.php"),
            PathBuf::from("/Users/test/projects/tests/FooTest.php")
        );

        assert_eq!(
            resolve_path(&base_dir, "./vendor/bin/phpunit"),
            PathBuf::from("/Users/test/projects/vendor/bin/phpunit")
        );

        assert_eq!(
            resolve_path(&base_dir, "../other/project"),
            PathBuf::from("/Users/test/other/project")
        );

        assert_eq!(
            resolve_path(&base_dir, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn vendor_binary_wins_over_path() {
        let project = tempfile::tempdir().unwrap();
        fs::create_dir_all(project.path().join("vendor/bin")).unwrap();
        fs::write(project.path().join("vendor/bin/phpunit"), "#!/usr/bin/env php").unwrap();
        let nested = project.path().join("tests/Unit");
        fs::create_dir_all(&nested).unwrap();

        let files = ProjectFiles::new(&nested);
        assert_eq!(
            files.find_up(&["vendor/bin/phpunit", "phpunit"]),
            project.path().join("vendor/bin/phpunit").to_string_lossy()
        );
    }

    #[test]
    fn unresolved_lookup_returns_last_candidate() {
        let project = tempfile::tempdir().unwrap();
        let files = ProjectFiles::new(project.path());
        assert_eq!(
            files.find_up(&["vendor/bin/phpunit-lsp-missing", "phpunit-lsp-missing"]),
            "phpunit-lsp-missing"
        );
    }

    #[test]
    fn project_root_is_nearest_marker_directory() {
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("composer.json"), "{}").unwrap();
        let test_dir = project.path().join("tests");
        fs::create_dir_all(&test_dir).unwrap();

        assert_eq!(
            project_root(&test_dir.join("FooTest.php")),
            project.path().to_path_buf()
        );
    }
}
