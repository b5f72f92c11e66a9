use std::path::{Path, PathBuf};

/// Maps file references in a scene description to paths on disk by trying an
/// ordered list of search directories. Unresolvable names are returned
/// unchanged so the caller's existence check produces the diagnostic.
#[derive(Debug, Clone)]
pub struct FileResolver {
    paths: Vec<PathBuf>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self {
            paths: vec![PathBuf::from(".")],
        }
    }

    pub fn prepend(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(0, path.into());
    }

    pub fn append(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        let name = Path::new(name);
        if !name.is_absolute() {
            for base in &self.paths {
                let candidate = base.join(name);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
        name.to_path_buf()
    }
}

impl Default for FileResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_against_search_paths_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("nested");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(inner.join("scene.xml"), "<scene/>").unwrap();

        let mut resolver = FileResolver::new();
        resolver.prepend(&inner);
        assert_eq!(resolver.resolve("scene.xml"), inner.join("scene.xml"));
        // Unresolvable names come back unchanged.
        assert_eq!(resolver.resolve("missing.xml"), PathBuf::from("missing.xml"));
    }
}
