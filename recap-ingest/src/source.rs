//! Where receipt documents come from.

use std::path::{Path, PathBuf};

use recap_core::ParseError;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::normalize::{DocumentFormat, SourceDocument};

/// One document as fetched. A read failure belongs to that document alone.
pub type FetchedDocument = Result<SourceDocument, ParseError>;

/// A provider of raw receipt documents (mailbox, local directory, ...).
pub trait DocumentSource {
    fn fetch(&self) -> Vec<FetchedDocument>;
}

/// Files and directories on the local filesystem.
///
/// Files named explicitly must have a supported extension. Directories are
/// walked recursively, following symlinks; unsupported files and unreadable
/// entries inside them are skipped.
#[derive(Debug, Clone, Default)]
pub struct DirectorySource {
    paths: Vec<PathBuf>,
}

impl DirectorySource {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    fn collect_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for path in &self.paths {
            if !path.is_dir() {
                files.push(path.clone());
                continue;
            }
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(root = %path.display(), "skipping unreadable entry: {err}");
                        None
                    }
                })
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    let supported = DocumentFormat::from_path(p).is_some();
                    if !supported {
                        debug!(path = %p.display(), "skipping unsupported file");
                    }
                    supported
                })
                .collect();
            found.sort();
            files.extend(found);
        }
        files
    }
}

impl DocumentSource for DirectorySource {
    fn fetch(&self) -> Vec<FetchedDocument> {
        self.collect_files()
            .iter()
            .map(|p| SourceDocument::from_path(p.as_path()))
            .collect()
    }
}

/// Documents already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: Vec<SourceDocument>,
}

impl MemorySource {
    pub fn new(documents: Vec<SourceDocument>) -> Self {
        Self { documents }
    }

    pub fn push(&mut self, document: SourceDocument) {
        self.documents.push(document);
    }
}

impl DocumentSource for MemorySource {
    fn fetch(&self) -> Vec<FetchedDocument> {
        self.documents.iter().cloned().map(Ok).collect()
    }
}

/// Convenience for a single path.
pub fn fetch_path(path: &Path) -> Vec<FetchedDocument> {
    DirectorySource::new([path]).fetch()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_directory_source_walks_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.eml"), "a").unwrap();
        fs::write(dir.path().join("notes.md"), "skip").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.html"), "<p>c</p>").unwrap();

        let docs: Vec<SourceDocument> = fetch_path(dir.path())
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|d| Path::new(&d.id).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.eml", "b.txt", "c.html"]);
        assert_eq!(docs[0].format, DocumentFormat::Mail);
        assert_eq!(docs[2].format, DocumentFormat::Html);
    }

    #[test]
    fn test_explicit_unsupported_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.csv");
        fs::write(&path, "x").unwrap();
        assert!(matches!(
            fetch_path(&path).as_slice(),
            [Err(ParseError::UnsupportedFormat { .. })]
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            fetch_path(&dir.path().join("gone.eml")).as_slice(),
            [Err(ParseError::Io { .. })]
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_skips_broken_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing.eml"), dir.path().join("b.eml")).unwrap();

        let fetched = fetch_path(dir.path());
        assert_eq!(fetched.len(), 1);
        assert!(fetched[0].as_ref().unwrap().id.ends_with("a.txt"));
    }

    #[test]
    fn test_bad_file_does_not_hide_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        fs::write(&good, "Total $1.00").unwrap();
        let source = DirectorySource::new([good.clone(), dir.path().join("gone.txt"), dir.path().join("x.csv")]);

        let fetched = source.fetch();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0].as_ref().unwrap().id, good.display().to_string());
        assert!(matches!(fetched[1], Err(ParseError::Io { .. })));
        assert!(matches!(fetched[2], Err(ParseError::UnsupportedFormat { .. })));
    }
}
