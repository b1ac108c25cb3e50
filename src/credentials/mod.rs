//! Local storage of cluster credential bundles.
//!
//! Bundles live under `<home>/clusters/<account prefix>/<cluster>/` unless the
//! caller supplies an explicit directory. A directory only counts as a bundle
//! when it holds the CA certificate, and nothing is removed from a directory
//! that does not.

use std::io::Write;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::DirBuilder;
use cap_std::fs_utf8::{Dir, OpenOptions};

use crate::account::Account;
use crate::cluster::{CA_CERT_FILE, CredentialsBundle};
use crate::error::ClusterError;
use crate::service::ClusterService;

/// Directory below the flotilla home that holds credential bundles.
pub const CLUSTERS_DIR: &str = "clusters";

#[cfg(unix)]
const BUNDLE_DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const BUNDLE_FILE_MODE: u32 = 0o600;

/// Derives, downloads, verifies, and removes credential bundles.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialManager {
    root: Utf8PathBuf,
}

impl CredentialManager {
    /// Roots the manager at `<home>/clusters`.
    #[must_use]
    pub fn new(home: &Utf8Path) -> Self {
        Self {
            root: home.join(CLUSTERS_DIR),
        }
    }

    /// Directory holding every managed bundle.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolves the bundle directory for a cluster.
    ///
    /// The override wins when supplied; otherwise the path is
    /// `<root>/<account prefix>/<cluster>`. The result is normalised
    /// lexically.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::CredentialState`] when the path normalises to
    /// nothing, the current directory, or the file system root, or when the
    /// cluster name is not a single path segment.
    pub fn path_for(
        &self,
        account: &Account,
        cluster: &str,
        override_dir: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ClusterError> {
        let candidate = if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else {
            if !is_single_segment(cluster) {
                return Err(ClusterError::CredentialState {
                    path: self.root.join(account.cluster_prefix()),
                    message: format!("'{cluster}' is not a usable cluster directory name"),
                });
            }
            self.root.join(account.cluster_prefix()).join(cluster)
        };

        let normalised = normalise(&candidate);
        if is_unsafe(&normalised) {
            return Err(ClusterError::CredentialState {
                path: candidate,
                message: String::from("credentials path must name a dedicated directory"),
            });
        }
        Ok(normalised)
    }

    /// Fetches the cluster's bundle and writes it to disk, returning the
    /// bundle directory.
    ///
    /// # Errors
    ///
    /// Propagates service failures, and returns
    /// [`ClusterError::CredentialState`] for a bundle without a CA certificate
    /// or with unsafe file names and [`ClusterError::Io`] when writing fails.
    pub async fn download<S: ClusterService + ?Sized>(
        &self,
        service: &S,
        account: &Account,
        cluster: &str,
        override_dir: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ClusterError> {
        let path = self.path_for(account, cluster, override_dir)?;
        let bundle = service.cluster_credentials(cluster).await?;
        tracing::debug!(path = %path, files = bundle.files.len(), "writing credentials bundle");
        write_bundle(&path, &bundle)?;
        Ok(path)
    }

    /// Returns `true` when `path` is a directory containing the CA
    /// certificate.
    #[must_use]
    pub fn verify(path: &Utf8Path) -> bool {
        Dir::open_ambient_dir(path, ambient_authority())
            .is_ok_and(|dir| dir.is_file(CA_CERT_FILE))
    }

    /// Removes a cluster's bundle directory.
    ///
    /// Returns `false` when there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::CredentialState`] for an unsafe path or a
    /// directory that exists without the CA certificate, and
    /// [`ClusterError::Io`] when removal fails.
    pub fn delete(
        &self,
        account: &Account,
        cluster: &str,
        override_dir: Option<&Utf8Path>,
    ) -> Result<bool, ClusterError> {
        let path = self.path_for(account, cluster, override_dir)?;
        let (parent, name) = split(&path)?;
        let parent_dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(ClusterError::io(parent, &err)),
        };
        if !parent_dir
            .try_exists(name)
            .map_err(|err| ClusterError::io(&path, &err))?
        {
            return Ok(false);
        }
        if !Self::verify(&path) {
            return Err(ClusterError::CredentialState {
                path,
                message: format!("directory exists but has no {CA_CERT_FILE}"),
            });
        }

        parent_dir
            .remove_dir_all(name)
            .map_err(|err| ClusterError::io(&path, &err))?;
        tracing::debug!(path = %path, "removed credentials bundle");
        Ok(true)
    }
}

fn is_single_segment(name: &str) -> bool {
    let mut components = Utf8Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Utf8Component::Normal(_)), None)
    )
}

fn normalise(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                let ends_in_normal =
                    matches!(out.components().next_back(), Some(Utf8Component::Normal(_)));
                if ends_in_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

fn is_unsafe(path: &Utf8Path) -> bool {
    !path
        .components()
        .any(|component| !matches!(component, Utf8Component::Prefix(_) | Utf8Component::RootDir))
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), ClusterError> {
    let name = path.file_name().ok_or_else(|| ClusterError::CredentialState {
        path: path.to_path_buf(),
        message: String::from("credentials path has no final directory name"),
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, name))
}

fn bundle_file_path(path: &Utf8Path, name: &str) -> Result<Utf8PathBuf, ClusterError> {
    let relative = Utf8Path::new(name);
    let safe = !name.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
    if !safe {
        return Err(ClusterError::CredentialState {
            path: path.to_path_buf(),
            message: format!("bundle contains unsafe file name '{name}'"),
        });
    }
    Ok(relative.to_path_buf())
}

fn private_dir_builder() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use cap_std::fs::DirBuilderExt;
        builder.mode(BUNDLE_DIR_MODE);
    }
    builder
}

fn write_bundle(path: &Utf8Path, bundle: &CredentialsBundle) -> Result<(), ClusterError> {
    if !bundle.has_ca_cert() {
        return Err(ClusterError::CredentialState {
            path: path.to_path_buf(),
            message: format!("backend returned a bundle without {CA_CERT_FILE}"),
        });
    }
    let files = bundle
        .files
        .iter()
        .map(|(name, contents)| Ok((bundle_file_path(path, name)?, contents)))
        .collect::<Result<Vec<_>, ClusterError>>()?;

    let (parent, name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| ClusterError::io(parent, &err))?;
    let parent_dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| ClusterError::io(parent, &err))?;
    let builder = private_dir_builder();
    parent_dir
        .create_dir_with(name, &builder)
        .map_err(|err| ClusterError::io(path, &err))?;
    let dir = parent_dir
        .open_dir(name)
        .map_err(|err| ClusterError::io(path, &err))?;

    for (relative, contents) in files {
        if let Some(subdir) = relative.parent().filter(|sub| !sub.as_str().is_empty()) {
            dir.create_dir_with(subdir, &builder)
                .map_err(|err| ClusterError::io(path.join(subdir), &err))?;
        }
        write_private(&dir, &relative, contents)
            .map_err(|err| ClusterError::io(path.join(&relative), &err))?;
    }
    Ok(())
}

fn write_private(dir: &Dir, name: &Utf8Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use cap_std::fs::OpenOptionsExt;
        options.mode(BUNDLE_FILE_MODE);
    }
    let mut file = dir.open_with(name, &options)?;
    file.write_all(contents)
}
