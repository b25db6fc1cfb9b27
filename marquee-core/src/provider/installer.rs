//! Provider bundle installation with backup-and-restore.
//!
//! A bundle and its sibling manifest are downloaded sequentially. Each file
//! goes through its own atomic step: an existing file is moved to
//! `<name>.old`, the new content is streamed into a fresh file, and the
//! backup is either deleted (success) or moved back (any failure).
//! There is no transaction log; a crash between the two renames leaves the
//! provider uninstalled, which a re-install repairs.
//!
//! Providers of one repository share a folder and its manifest. Installs
//! into a folder run concurrently but write the manifest one at a time;
//! removals wait for running installs to finish.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::config::NetworkConfig;
use crate::provider::metadata::ProviderMetadata;
use crate::repository::Repository;
use crate::transport::Transport;

const BACKUP_SUFFIX: &str = ".old";

/// Errors raised while installing or removing a provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstallError {
    /// Download or write failed; the previous file state was restored
    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Invalid build URL: {url}")]
    InvalidBuildUrl { url: String },

    #[error("Provider {provider_id} is already being installed")]
    AlreadyInstalling { provider_id: String },

    #[error("Failed to remove {path}: {reason}")]
    Uninstall { path: String, reason: String },
}

/// Marks a provider as installing until dropped.
pub struct InstallingGuard {
    installing: Arc<Mutex<HashSet<String>>>,
    provider_id: String,
}

impl Drop for InstallingGuard {
    fn drop(&mut self) {
        self.installing.lock().remove(&self.provider_id);
    }
}

/// Coordination for the files a repository's providers share.
#[derive(Default)]
struct FolderLock {
    /// Shared by installs, exclusive for removals
    usage: tokio::sync::RwLock<()>,
    manifest: tokio::sync::Mutex<()>,
}

/// Downloads provider bundles into place.
pub struct ProviderInstaller {
    transport: Arc<dyn Transport>,
    manifest_filename: String,
    installing: Arc<Mutex<HashSet<String>>>,
    folders: Mutex<HashMap<PathBuf, Arc<FolderLock>>>,
}

impl ProviderInstaller {
    pub fn new(transport: Arc<dyn Transport>, config: &NetworkConfig) -> Self {
        Self {
            transport,
            manifest_filename: config.manifest_filename.clone(),
            installing: Arc::new(Mutex::new(HashSet::new())),
            folders: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an install of `provider_id` is currently running.
    pub fn is_installing(&self, provider_id: &str) -> bool {
        self.installing.lock().contains(provider_id)
    }

    /// Derives the manifest URL published next to a bundle.
    ///
    /// # Errors
    /// - `InstallError::InvalidBuildUrl` - URL does not parse or has no file segment
    pub fn manifest_url_for(&self, build_url: &str) -> Result<String, InstallError> {
        let invalid = || InstallError::InvalidBuildUrl {
            url: build_url.to_string(),
        };

        let mut url = url::Url::parse(build_url).map_err(|_| invalid())?;
        let has_file = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .is_some_and(|last| !last.is_empty());
        if !has_file {
            return Err(invalid());
        }

        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop()
            .push(&self.manifest_filename);
        Ok(url.to_string())
    }

    /// Installed location of a provider bundle:
    /// `<root>/<user_id>/<owner>-<name>/<bundle filename>`.
    ///
    /// # Errors
    /// - `InstallError::InvalidBuildUrl` - Build URL carries no file name
    pub fn bundle_path(
        root: &Path,
        user_id: &str,
        repository: &Repository,
        metadata: &ProviderMetadata,
    ) -> Result<PathBuf, InstallError> {
        let filename = metadata
            .bundle_filename()
            .ok_or_else(|| InstallError::InvalidBuildUrl {
                url: metadata.build_url.clone(),
            })?;

        Ok(root
            .join(user_id)
            .join(repository.install_folder_name())
            .join(filename))
    }

    /// Installs into the user's folder for `repository`.
    ///
    /// # Errors
    /// Same as [`ProviderInstaller::install`].
    pub async fn install_for_user(
        &self,
        metadata: &ProviderMetadata,
        repository: &Repository,
        root: &Path,
        user_id: &str,
    ) -> Result<PathBuf, InstallError> {
        let destination = root.join(user_id).join(repository.install_folder_name());
        self.install(metadata, &destination).await
    }

    /// Downloads the bundle and its manifest into `destination_dir`.
    ///
    /// Returns the path of the installed bundle.
    ///
    /// # Errors
    /// - `InstallError::InvalidBuildUrl` - Build URL has no file name
    /// - `InstallError::AlreadyInstalling` - Same provider is mid-install
    /// - `InstallError::DownloadFailed` - Non-2xx response, broken body or
    ///   write failure; the destination file is left as it was before
    pub async fn install(
        &self,
        metadata: &ProviderMetadata,
        destination_dir: &Path,
    ) -> Result<PathBuf, InstallError> {
        let bundle_name = metadata
            .bundle_filename()
            .ok_or_else(|| InstallError::InvalidBuildUrl {
                url: metadata.build_url.clone(),
            })?;
        let manifest_url = self.manifest_url_for(&metadata.build_url)?;
        let _guard = self.begin_install(&metadata.id)?;

        tracing::info!(
            "Installing provider {} v{} ({}) into {}",
            metadata.id,
            metadata.version_name,
            metadata.version_code,
            destination_dir.display()
        );

        let folder = self.folder_lock(destination_dir);
        let _usage = folder.usage.read().await;

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| InstallError::DownloadFailed {
                url: metadata.build_url.clone(),
                reason: format!("cannot create {}: {e}", destination_dir.display()),
            })?;

        let bundle_path = destination_dir.join(&bundle_name);
        self.download_atomically(&metadata.build_url, &bundle_path)
            .await?;

        let manifest_path = destination_dir.join(&self.manifest_filename);
        {
            let _manifest = folder.manifest.lock().await;
            self.download_atomically(&manifest_url, &manifest_path)
                .await?;
        }

        tracing::info!("Installed provider {} at {}", metadata.id, bundle_path.display());
        Ok(bundle_path)
    }

    /// Removes an installed bundle.
    ///
    /// The sibling manifest and the folder are removed only when no other
    /// bundle of the repository remains. Missing files are not an error.
    ///
    /// # Errors
    /// - `InstallError::Uninstall` - A file exists but cannot be removed, or
    ///   the folder cannot be listed
    pub async fn uninstall(&self, bundle_path: &Path) -> Result<(), InstallError> {
        let Some(folder) = parent_folder(bundle_path) else {
            return remove_if_present(bundle_path).await;
        };

        let lock = self.folder_lock(folder);
        let _usage = lock.usage.write().await;

        remove_if_present(bundle_path).await?;

        if self.has_bundles(folder).await? {
            tracing::debug!(
                "Keeping {} for the remaining providers in {}",
                self.manifest_filename,
                folder.display()
            );
        } else {
            remove_if_present(&folder.join(&self.manifest_filename)).await?;
            if tokio::fs::remove_dir(folder).await.is_ok() {
                tracing::debug!("Removed empty provider folder {}", folder.display());
            }
        }

        tracing::info!("Uninstalled {}", bundle_path.display());
        Ok(())
    }

    /// Removes a single bundle file, leaving the shared manifest in place.
    ///
    /// # Errors
    /// - `InstallError::Uninstall` - The file exists but cannot be removed
    pub async fn remove_bundle(&self, bundle_path: &Path) -> Result<(), InstallError> {
        let lock = parent_folder(bundle_path).map(|folder| self.folder_lock(folder));
        let _usage = match &lock {
            Some(lock) => Some(lock.usage.write().await),
            None => None,
        };

        remove_if_present(bundle_path).await?;
        tracing::debug!("Removed bundle {}", bundle_path.display());
        Ok(())
    }

    fn folder_lock(&self, folder: &Path) -> Arc<FolderLock> {
        let mut folders = self.folders.lock();
        Arc::clone(folders.entry(folder.to_path_buf()).or_default())
    }

    async fn has_bundles(&self, folder: &Path) -> Result<bool, InstallError> {
        let listing_failed = |e: std::io::Error| InstallError::Uninstall {
            path: folder.display().to_string(),
            reason: e.to_string(),
        };

        let mut entries = match tokio::fs::read_dir(folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(listing_failed(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(listing_failed)? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name != self.manifest_filename.as_str() && !name.ends_with(BACKUP_SUFFIX) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn begin_install(&self, provider_id: &str) -> Result<InstallingGuard, InstallError> {
        let mut installing = self.installing.lock();
        if !installing.insert(provider_id.to_string()) {
            return Err(InstallError::AlreadyInstalling {
                provider_id: provider_id.to_string(),
            });
        }

        Ok(InstallingGuard {
            installing: Arc::clone(&self.installing),
            provider_id: provider_id.to_string(),
        })
    }

    async fn download_atomically(&self, url: &str, destination: &Path) -> Result<(), InstallError> {
        let backup = backup_path(destination);
        let had_original = tokio::fs::try_exists(destination).await.map_err(|e| {
            InstallError::DownloadFailed {
                url: url.to_string(),
                reason: format!("cannot inspect {}: {e}", destination.display()),
            }
        })?;

        if had_original {
            tokio::fs::rename(destination, &backup)
                .await
                .map_err(|e| InstallError::DownloadFailed {
                    url: url.to_string(),
                    reason: format!("cannot back up {}: {e}", destination.display()),
                })?;
        }

        match self.write_fresh(url, destination).await {
            Ok(bytes) => {
                tracing::debug!("Wrote {} bytes from {} to {}", bytes, url, destination.display());
                if had_original {
                    if let Err(e) = tokio::fs::remove_file(&backup).await {
                        tracing::warn!("Failed to delete backup {}: {}", backup.display(), e);
                    }
                }
                Ok(())
            }
            Err(reason) => {
                tracing::warn!("Download of {} failed: {}", url, reason);
                let _ = tokio::fs::remove_file(destination).await;

                if had_original {
                    match tokio::fs::rename(&backup, destination).await {
                        Ok(()) => tracing::info!("Restored {}", destination.display()),
                        Err(e) => tracing::error!(
                            "Failed to restore {} from backup: {}",
                            destination.display(),
                            e
                        ),
                    }
                }

                Err(InstallError::DownloadFailed {
                    url: url.to_string(),
                    reason,
                })
            }
        }
    }

    async fn write_fresh(&self, url: &str, destination: &Path) -> Result<u64, String> {
        let mut body = self.transport.get(url).await.map_err(|e| e.to_string())?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| format!("cannot create {}: {e}", destination.display()))?;

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write to {} failed: {e}", destination.display()))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| e.to_string())?;
        file.sync_all().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

fn parent_folder(path: &Path) -> Option<&Path> {
    path.parent().filter(|folder| !folder.as_os_str().is_empty())
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

async fn remove_if_present(path: &Path) -> Result<(), InstallError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::Uninstall {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}
