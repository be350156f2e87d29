//! # Output Sinks
//!
//! Write-once files under the success, unsupported and error directories.
//! Names are process-id qualified, so a file that already exists was
//! written by an earlier delivery of the same message and counts as
//! delivered.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::FilesConfig;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// A previous delivery already produced this file
    AlreadyPresent(PathBuf),
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Written(path) | Self::AlreadyPresent(path) => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSink {
    name: &'static str,
    root: PathBuf,
}

impl FileSink {
    pub fn new(name: &'static str, root: impl Into<PathBuf>) -> Self {
        Self {
            name,
            root: root.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> PipelineResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PipelineError::io("create sink directory", &self.root, e))
    }

    /// Create `relative` below the sink root exclusively and write `contents`
    pub async fn write_once(
        &self,
        relative: &Path,
        contents: &[u8],
    ) -> PipelineResult<WriteOutcome> {
        if !is_plain_relative(relative) {
            return Err(PipelineError::filename_format(
                relative.display().to_string(),
                "sink paths must be relative and must not leave the sink directory",
            ));
        }

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io("create sink directory", parent, e))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(sink = self.name, path = %path.display(), "Sink file already present");
                return Ok(WriteOutcome::AlreadyPresent(path));
            }
            Err(e) => return Err(PipelineError::io("create sink file", &path, e)),
        };

        file.write_all(contents)
            .await
            .map_err(|e| PipelineError::io("write sink file", &path, e))?;
        file.sync_all()
            .await
            .map_err(|e| PipelineError::io("sync sink file", &path, e))?;

        debug!(
            sink = self.name,
            path = %path.display(),
            bytes = contents.len(),
            "📤 Sink file written"
        );
        Ok(WriteOutcome::Written(path))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// The three terminal file destinations
#[derive(Debug, Clone)]
pub struct OutputSinks {
    pub success: FileSink,
    pub unsupported: FileSink,
    pub error: FileSink,
}

impl OutputSinks {
    pub fn from_config(files: &FilesConfig) -> Self {
        Self {
            success: FileSink::new("success", &files.success),
            unsupported: FileSink::new("unsupported", &files.unsupported),
            error: FileSink::new("error", &files.error),
        }
    }

    pub async fn ensure_roots(&self) -> PipelineResult<()> {
        self.success.ensure_root().await?;
        self.unsupported.ensure_root().await?;
        self.error.ensure_root().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn second_write_is_reported_as_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new("success", dir.path());

        let first = assert_ok!(
            sink.write_once(Path::new("7/pacs.008.001.08.xml"), b"<Document/>")
                .await
        );
        assert!(matches!(first, WriteOutcome::Written(_)));

        let second = sink
            .write_once(Path::new("7/pacs.008.001.08.xml"), b"<Other/>")
            .await
            .unwrap();
        assert!(matches!(second, WriteOutcome::AlreadyPresent(_)));

        let stored = std::fs::read_to_string(first.path()).unwrap();
        assert_eq!(stored, "<Document/>");
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new("error", dir.path().join("error"));
        let error = sink
            .write_once(Path::new("../outside.xml"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::FilenameFormat { .. }));
        assert_err!(sink.write_once(Path::new("/abs.xml"), b"x").await);
    }

    #[tokio::test]
    async fn tagged_names_are_plain_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = OutputSinks::from_config(&FilesConfig::rooted_at(dir.path()));
        sinks.ensure_roots().await.unwrap();
        let outcome = sinks
            .unsupported
            .write_once(Path::new("$$3$$note.txt"), b"hello")
            .await
            .unwrap();
        assert_eq!(outcome.path(), dir.path().join("unsupported").join("$$3$$note.txt"));
    }
}
