//! Self-upgrade from GitHub releases.

use std::env;
use std::sync::LazyLock;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::files::{self, FsError};

/// Version compiled into this binary.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Release listing for manual downloads.
pub const RELEASES_PAGE: &str = "https://github.com/jiraguha/dock/releases";

const LATEST_RELEASE_API: &str = "https://api.github.com/repos/jiraguha/dock/releases/latest";
const CHECKSUMS_ASSET: &str = "checksums.txt";
const USER_AGENT: &str = "dock-cli";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Errors raised while checking for or installing an upgrade.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum UpgradeError {
    /// Raised when a request cannot be sent or its body read.
    #[error("Failed to fetch {url}: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// Transport error.
        message: String,
    },
    /// Raised for non-success HTTP statuses.
    #[error("Request to {url} failed with HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// Raised when a version string is not semver.
    #[error("invalid version {version}: {message}")]
    Version {
        /// Offending version.
        version: String,
        /// Parser error.
        message: String,
    },
    /// Raised on platforms without release binaries.
    #[error("Unsupported platform: {os}-{arch}")]
    UnsupportedPlatform {
        /// Operating system.
        os: String,
        /// CPU architecture.
        arch: String,
    },
    /// Raised when the release has no binary for this platform.
    #[error("No binary available for your platform ({asset}). Download manually from {RELEASES_PAGE}")]
    NoAsset {
        /// Expected asset name.
        asset: String,
    },
    /// Raised when the download does not match `checksums.txt`.
    #[error("Checksum verification failed for {asset}. Download may be corrupted.")]
    Checksum {
        /// Asset name.
        asset: String,
    },
    /// Raised when the running executable cannot be located.
    #[error("cannot locate the current executable: {message}")]
    CurrentExe {
        /// Underlying error.
        message: String,
    },
    /// Raised when files cannot be written.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// A GitHub release as returned by the API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Release {
    /// Tag such as `v0.2.0`.
    pub tag_name: String,
    /// Downloadable files.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// One release file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ReleaseAsset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
}

/// Outcome of comparing the running version with the latest release.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpgradeInfo {
    /// Running version.
    pub current_version: String,
    /// Latest release tag.
    pub latest_version: String,
    /// Whether the release is newer.
    pub update_available: bool,
    /// Platform asset name.
    pub asset: String,
    /// Binary URL, when published for this platform.
    pub download_url: Option<String>,
    /// `checksums.txt` URL, when published.
    pub checksum_url: Option<String>,
}

/// Release asset name for `os`/`arch` as reported by [`std::env::consts`].
///
/// # Errors
///
/// Returns [`UpgradeError::UnsupportedPlatform`] outside macOS and Linux.
pub fn platform_asset(os: &str, arch: &str) -> Result<String, UpgradeError> {
    let os_name = match os {
        "macos" => "darwin",
        "linux" => "linux",
        _ => {
            return Err(UpgradeError::UnsupportedPlatform {
                os: os.to_owned(),
                arch: arch.to_owned(),
            });
        }
    };
    let arch_name = if arch == "aarch64" { "arm64" } else { "x64" };
    Ok(format!("dock-{os_name}-{arch_name}"))
}

fn parse_version(raw: &str) -> Result<Version, UpgradeError> {
    let trimmed = raw.trim();
    Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed)).map_err(|err| {
        UpgradeError::Version {
            version: raw.to_owned(),
            message: err.to_string(),
        }
    })
}

/// Whether `latest` is a newer version than `current` (a leading `v` is
/// ignored).
///
/// # Errors
///
/// Returns [`UpgradeError::Version`] when either side is not semver.
pub fn is_newer(current: &str, latest: &str) -> Result<bool, UpgradeError> {
    Ok(parse_version(latest)? > parse_version(current)?)
}

/// Compares `release` with `current` and picks the assets for `asset`.
///
/// # Errors
///
/// Returns [`UpgradeError::Version`] for malformed versions.
pub fn plan(release: &Release, current: &str, asset: &str) -> Result<UpgradeInfo, UpgradeError> {
    let url_of = |name: &str| {
        release
            .assets
            .iter()
            .find(|candidate| candidate.name == name)
            .map(|found| found.browser_download_url.clone())
    };
    Ok(UpgradeInfo {
        current_version: current.to_owned(),
        latest_version: release.tag_name.clone(),
        update_available: is_newer(current, &release.tag_name)?,
        asset: asset.to_owned(),
        download_url: url_of(asset),
        checksum_url: url_of(CHECKSUMS_ASSET),
    })
}

/// Expected digest for `asset` from a `sha256sum`-style listing.
#[must_use]
pub fn expected_checksum(listing: &str, asset: &str) -> Option<String> {
    listing
        .lines()
        .find(|line| {
            line.split_whitespace()
                .nth(1)
                .is_some_and(|name| name.trim_start_matches('*') == asset)
        })
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_lowercase)
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

async fn get(url: &str) -> Result<reqwest::Response, UpgradeError> {
    debug!(url, "http get");
    let response = HTTP_CLIENT
        .get(url)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|err| UpgradeError::Http {
            url: url.to_owned(),
            message: err.to_string(),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(UpgradeError::Status {
            url: url.to_owned(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn get_bytes(url: &str) -> Result<Vec<u8>, UpgradeError> {
    let body = get(url).await?.bytes().await.map_err(|err| UpgradeError::Http {
        url: url.to_owned(),
        message: err.to_string(),
    })?;
    Ok(body.to_vec())
}

/// Fetches the latest release and compares it with this binary.
///
/// # Errors
///
/// Returns [`UpgradeError`] when the platform is unsupported, the API is
/// unreachable, or the tag is not a version.
pub async fn check() -> Result<UpgradeInfo, UpgradeError> {
    let asset = platform_asset(env::consts::OS, env::consts::ARCH)?;
    let body = get_bytes(LATEST_RELEASE_API).await?;
    let release: Release = serde_json::from_slice(&body).map_err(|err| UpgradeError::Http {
        url: String::from(LATEST_RELEASE_API),
        message: err.to_string(),
    })?;
    plan(&release, CURRENT_VERSION, &asset)
}

/// Downloads, verifies, and installs the release over the running binary.
/// Returns the replaced executable's path.
///
/// # Errors
///
/// Returns [`UpgradeError`] when the download fails, the checksum does not
/// match, or the binary cannot be replaced.
pub async fn install(info: &UpgradeInfo, tmp_dir: &Utf8Path) -> Result<Utf8PathBuf, UpgradeError> {
    let url = info.download_url.as_deref().ok_or_else(|| UpgradeError::NoAsset {
        asset: info.asset.clone(),
    })?;
    info!(version = %info.latest_version, "downloading release");
    let binary = get_bytes(url).await?;

    if let Some(checksum_url) = &info.checksum_url {
        let listing = String::from_utf8_lossy(&get_bytes(checksum_url).await?).into_owned();
        match expected_checksum(&listing, &info.asset) {
            Some(expected) if expected != sha256_hex(&binary) => {
                return Err(UpgradeError::Checksum {
                    asset: info.asset.clone(),
                });
            }
            Some(_) => info!("checksum verified"),
            None => warn!(asset = %info.asset, "no checksum published for asset"),
        }
    }

    let staged = tmp_dir.join(format!("dock-new-{}", std::process::id()));
    files::write(&staged, &binary)?;
    files::set_mode(&staged, 0o755)?;

    let current = current_executable()?;
    replace_binary(&staged, &current, &binary)?;
    Ok(current)
}

fn current_executable() -> Result<Utf8PathBuf, UpgradeError> {
    let path = env::current_exe().map_err(|err| UpgradeError::CurrentExe {
        message: err.to_string(),
    })?;
    Utf8PathBuf::from_path_buf(path).map_err(|path| UpgradeError::CurrentExe {
        message: format!("non UTF-8 path {}", path.display()),
    })
}

/// Moves `staged` over `target`, falling back to writing `contents` when a
/// rename crosses filesystems.
fn replace_binary(
    staged: &Utf8Path,
    target: &Utf8Path,
    contents: &[u8],
) -> Result<(), UpgradeError> {
    if let Err(err) = files::rename(staged, target) {
        debug!(error = %err, "rename failed, copying instead");
        files::write(target, contents)?;
        files::set_mode(target, 0o755)?;
        files::remove_file(staged)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn release(tag: &str, assets: &[&str]) -> Release {
        Release {
            tag_name: tag.to_owned(),
            assets: assets
                .iter()
                .map(|name| ReleaseAsset {
                    name: (*name).to_owned(),
                    browser_download_url: format!("https://dl.example/{name}"),
                })
                .collect(),
        }
    }

    #[rstest]
    #[case("macos", "aarch64", "dock-darwin-arm64")]
    #[case("macos", "x86_64", "dock-darwin-x64")]
    #[case("linux", "aarch64", "dock-linux-arm64")]
    #[case("linux", "x86_64", "dock-linux-x64")]
    fn asset_names_follow_platform(#[case] os: &str, #[case] arch: &str, #[case] expected: &str) {
        assert_eq!(platform_asset(os, arch).expect("supported"), expected);
    }

    #[rstest]
    fn windows_is_unsupported() {
        assert!(matches!(
            platform_asset("windows", "x86_64"),
            Err(UpgradeError::UnsupportedPlatform { .. })
        ));
    }

    #[rstest]
    #[case("0.1.7", "v0.1.8", true)]
    #[case("0.1.7", "v0.1.7", false)]
    #[case("0.2.0", "0.1.9", false)]
    #[case("0.1.7", "v0.10.0", true)]
    fn versions_compare_numerically(
        #[case] current: &str,
        #[case] latest: &str,
        #[case] newer: bool,
    ) {
        assert_eq!(is_newer(current, latest).expect("versions"), newer);
    }

    #[rstest]
    fn malformed_tag_is_rejected() {
        assert!(matches!(
            is_newer("0.1.7", "nightly"),
            Err(UpgradeError::Version { .. })
        ));
    }

    #[rstest]
    fn plan_selects_platform_and_checksum_assets() {
        let info = plan(
            &release("v0.2.0", &["dock-linux-x64", "dock-darwin-arm64", "checksums.txt"]),
            "0.1.7",
            "dock-linux-x64",
        )
        .expect("plan");
        assert!(info.update_available);
        assert_eq!(info.download_url.as_deref(), Some("https://dl.example/dock-linux-x64"));
        assert_eq!(info.checksum_url.as_deref(), Some("https://dl.example/checksums.txt"));
    }

    #[rstest]
    fn plan_without_platform_binary_has_no_url() {
        let info = plan(&release("v0.2.0", &["dock-darwin-arm64"]), "0.1.7", "dock-linux-x64")
            .expect("plan");
        assert_eq!(info.download_url, None);
        assert_eq!(info.checksum_url, None);
    }

    #[rstest]
    fn checksum_listing_is_matched_by_exact_name() {
        let listing = "AAA111  dock-linux-x64-debug\nBBB222  dock-linux-x64\nccc333 *dock-darwin-arm64\n";
        assert_eq!(expected_checksum(listing, "dock-linux-x64").as_deref(), Some("bbb222"));
        assert_eq!(expected_checksum(listing, "dock-darwin-arm64").as_deref(), Some("ccc333"));
        assert_eq!(expected_checksum(listing, "dock-linux-arm64"), None);
    }

    #[rstest]
    fn sha256_is_lower_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[rstest]
    fn replace_binary_moves_staged_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8");
        let staged = root.join("tmp/dock-new");
        let target = root.join("bin/dock");
        std::fs::create_dir_all(root.join("bin")).expect("bin dir");
        std::fs::write(&target, b"old").expect("old binary");
        files::write(&staged, b"new").expect("staged");

        replace_binary(&staged, &target, b"new").expect("replace");

        assert_eq!(std::fs::read(&target).expect("target"), b"new");
        assert!(!staged.exists());
    }
}
