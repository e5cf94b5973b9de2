//! Canonical on-disk layout of the storage tree.
//!
//! ```text
//! root/workspaces/{workspaceId}/manifest.json
//! root/workspaces/{workspaceId}/libraries/{libraryId}/manifest.json
//! root/workspaces/{workspaceId}/libraries/{libraryId}/files/{fileId}/manifest.json
//! root/.../files/{fileId}/source
//! root/.../files/{fileId}/extractions/{methodId}/metadata.json
//! root/.../files/{fileId}/extractions/{methodId}/output.md
//! root/.../files/{fileId}/extractions/{methodId}/shards/NNNNN.md
//! ```
//!
//! [`Layout`] only computes paths. Whether anything exists at a computed path
//! is for the caller to find out.

use crate::error::{ErrorKind, Result};
use crate::path::{validate as validate_path, validate_identifier};
use exn::OptionExt;
use std::path::{Path, PathBuf};

pub const WORKSPACES_DIR: &str = "workspaces";
pub const LIBRARIES_DIR: &str = "libraries";
pub const FILES_DIR: &str = "files";
pub const EXTRACTIONS_DIR: &str = "extractions";
pub const SHARDS_DIR: &str = "shards";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const SOURCE_FILE: &str = "source";
pub const OUTPUT_FILE: &str = "output.md";

/// The levels of the hierarchy that carry a usage manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Workspace,
    Library,
    File,
}

/// Path resolver rooted at the storage root.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}
impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join(WORKSPACES_DIR)
    }

    pub fn workspace_dir(&self, workspace: &str) -> Result<PathBuf> {
        Ok(self.workspaces_dir().join(validate_identifier(workspace)?))
    }

    pub fn library_dir(&self, workspace: &str, library: &str) -> Result<PathBuf> {
        Ok(self.workspace_dir(workspace)?.join(LIBRARIES_DIR).join(validate_identifier(library)?))
    }

    pub fn file_dir(&self, workspace: &str, library: &str, file: &str) -> Result<PathBuf> {
        Ok(self.library_dir(workspace, library)?.join(FILES_DIR).join(validate_identifier(file)?))
    }

    pub fn extraction_dir(&self, workspace: &str, library: &str, file: &str, method: &str) -> Result<PathBuf> {
        Ok(self.file_dir(workspace, library, file)?.join(EXTRACTIONS_DIR).join(validate_identifier(method)?))
    }

    /// Reverse lookup: works out which workspace, library, file and
    /// extraction an arbitrary path inside the tree belongs to.
    ///
    /// Accepts absolute paths under the root, or paths relative to it. Paths
    /// outside the root, or not under `workspaces/{id}`, are rejected with
    /// [`InvalidPath`](ErrorKind::InvalidPath).
    pub fn locate(&self, path: impl AsRef<Path>) -> Result<Location> {
        let path = path.as_ref();
        let relative = match path.is_absolute() {
            true => path.strip_prefix(&self.root).ok().ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?,
            false => path,
        };
        let relative = validate_path(relative)?;
        let parts = relative
            .iter()
            .map(|part| part.to_str().ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf())))
            .collect::<Result<Vec<_>>>()?;
        Location::from_parts(&parts).ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))
    }
}

/// The entities enclosing some path inside the storage tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub workspace: String,
    pub library: Option<String>,
    pub file: Option<String>,
    pub method: Option<String>,
}
impl Location {
    fn from_parts(parts: &[&str]) -> Option<Self> {
        let [WORKSPACES_DIR, workspace, rest @ ..] = parts else {
            return None;
        };
        let mut location = Location {
            workspace: workspace.to_string(),
            library: None,
            file: None,
            method: None,
        };
        if let [LIBRARIES_DIR, library, rest @ ..] = rest {
            location.library = Some(library.to_string());
            if let [FILES_DIR, file, rest @ ..] = rest {
                location.file = Some(file.to_string());
                if let [EXTRACTIONS_DIR, method, ..] = rest {
                    location.method = Some(method.to_string());
                }
            }
        }
        Some(location)
    }

    /// Most specific manifest-carrying level.
    pub fn level(&self) -> Level {
        match (&self.library, &self.file) {
            (Some(_), Some(_)) => Level::File,
            (Some(_), None) => Level::Library,
            _ => Level::Workspace,
        }
    }

    /// Directory of the enclosing entity at `level`, if the location is at
    /// least that deep.
    pub fn dir(&self, layout: &Layout, level: Level) -> Result<Option<PathBuf>> {
        match (level, &self.library, &self.file) {
            (Level::Workspace, _, _) => layout.workspace_dir(&self.workspace).map(Some),
            (Level::Library, Some(library), _) => layout.library_dir(&self.workspace, library).map(Some),
            (Level::File, Some(library), Some(file)) => layout.file_dir(&self.workspace, library, file).map(Some),
            _ => Ok(None),
        }
    }

    /// Enclosing manifest directories, most specific first.
    pub fn chain(&self, layout: &Layout) -> Result<Vec<(Level, PathBuf)>> {
        let mut chain = Vec::with_capacity(3);
        for level in [Level::File, Level::Library, Level::Workspace] {
            if let Some(dir) = self.dir(layout, level)? {
                chain.push((level, dir));
            }
        }
        Ok(chain)
    }
}
