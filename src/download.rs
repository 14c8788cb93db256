//! # Downloadable Main Software
//!
//! Fetching of release archives over HTTP(S) and their extraction into the
//! parts directory.
//!
//! Two caching policies decide whether an archive already present in the
//! downloads directory is reused:
//!
//! - [`HttpCaching::Filename`]: reuse it whenever a file of that name exists.
//! - [`HttpCaching::HttpHead`]: issue a `HEAD` request and reuse it only if
//!   the server reports the same `Content-Length` and `Last-Modified`. Any
//!   failure or non-200 answer counts as stale, so the archive is fetched
//!   again.
//!
//! Extraction only accepts members under the top-level directory named by
//! the first member of the archive; other members are skipped with a
//! warning.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use reqwest::StatusCode;
use tar::Archive;
use url::Url;

use crate::error::{Error, Result};

/// Policy for reusing an already downloaded archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpCaching {
    #[default]
    Filename,
    HttpHead,
}

impl FromStr for HttpCaching {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "filename" => Ok(HttpCaching::Filename),
            "http-head" => Ok(HttpCaching::HttpHead),
            other => Err(Error::config_with_hint(
                format!("Invalid HTTP caching policy '{}'", other),
                "use filename or http-head",
            )),
        }
    }
}

/// What the server says about a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStamp {
    pub length: Option<u64>,
    pub last_modified: Option<SystemTime>,
}

/// Fetches archives into a downloads directory.
pub struct Downloader {
    client: Client,
    caching: HttpCaching,
    offline: bool,
}

impl Downloader {
    pub fn new(caching: HttpCaching, offline: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("recipe-sources/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            caching,
            offline,
        })
    }

    /// Makes sure the archive at `url` is in `downloads_dir` and returns its
    /// local path.
    pub fn fetch(&self, url: &str, downloads_dir: &Path) -> Result<PathBuf> {
        let local = downloads_dir.join(archive_file_name(url)?);
        if local.exists() {
            if self.offline {
                debug!("Offline: reusing {}", local.display());
                return Ok(local);
            }
            let fresh = match self.caching {
                HttpCaching::Filename => true,
                HttpCaching::HttpHead => !self.is_stale(url, &local),
            };
            if fresh {
                info!("{} already downloaded", local.display());
                return Ok(local);
            }
            info!("{} is stale, downloading it again", local.display());
        } else if self.offline {
            return Err(Error::Offline {
                target: local,
                action: format!("downloading {}", url),
            });
        }
        self.download(url, &local)?;
        Ok(local)
    }

    /// True unless a `HEAD` request confirms length and date of `local`.
    pub fn is_stale(&self, url: &str, local: &Path) -> bool {
        let response = match self.client.head(url).send() {
            Ok(response) => response,
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                return true;
            }
        };
        if response.status() != StatusCode::OK {
            debug!("HEAD {} answered {}", url, response.status());
            return true;
        }
        let headers = response.headers();
        let stamp = RemoteStamp {
            length: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
            last_modified: headers
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date),
        };
        match fs::metadata(local) {
            Ok(metadata) => !stamp.matches(metadata.len(), metadata.modified().ok()),
            Err(_) => true,
        }
    }

    fn download(&self, url: &str, local: &Path) -> Result<()> {
        info!("Downloading {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = local.with_extension("part");
        let mut file = File::create(&partial)?;
        io::copy(&mut response, &mut file).map_err(|e| Error::Download {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if let Some(modified) = last_modified {
            file.set_modified(modified)?;
        }
        drop(file);
        fs::rename(&partial, local)?;
        Ok(())
    }
}

impl RemoteStamp {
    /// Both length and date must be known and equal (to the second).
    pub fn matches(&self, local_len: u64, local_modified: Option<SystemTime>) -> bool {
        let same_length = self.length == Some(local_len);
        let same_date = match (self.last_modified, local_modified) {
            (Some(remote), Some(local)) => unix_seconds(remote) == unix_seconds(local),
            _ => false,
        };
        same_length && same_date
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parses an RFC 2822 / HTTP date.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let parsed = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let secs = u64::try_from(parsed.timestamp()).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

/// Last path segment of `url`, used as the local archive name.
pub fn archive_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::config(format!("Cannot derive an archive name from URL '{}'", url)))
}

fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let file = File::open(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let reader: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else if name.ends_with(".tar") {
        Box::new(file)
    } else {
        return Err(Error::Archive {
            path: path.to_path_buf(),
            message: "unsupported archive format, expected .tar, .tar.gz or .tgz".to_string(),
        });
    };
    Ok(Archive::new(reader))
}

fn archive_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Archive {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Rejects absolute paths and `..` components.
fn validate_entry_path(path: &Path) -> bool {
    !path.is_absolute()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// First component of a member path, ignoring `./`.
fn top_component(path: &Path) -> Option<String> {
    path.components().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// Name of the top-level directory of the archive's first member.
pub fn archive_top_dir(archive_path: &Path) -> Result<String> {
    let mut archive = open_archive(archive_path)?;
    let mut entries = archive.entries().map_err(|e| archive_error(archive_path, e))?;
    let first = entries
        .next()
        .ok_or_else(|| archive_error(archive_path, "archive is empty"))?
        .map_err(|e| archive_error(archive_path, e))?;
    let path = first.path().map_err(|e| archive_error(archive_path, e))?;
    top_component(&path).ok_or_else(|| archive_error(archive_path, "first member has no name"))
}

/// Extracts the members rooted under the archive's top-level directory into
/// `dest` and returns `dest/<top>`.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let top = archive_top_dir(archive_path)?;
    fs::create_dir_all(dest)?;
    let mut archive = open_archive(archive_path)?;
    let entries = archive.entries().map_err(|e| archive_error(archive_path, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(archive_path, e))?;
        let member = entry
            .path()
            .map_err(|e| archive_error(archive_path, e))?
            .into_owned();
        if !validate_entry_path(&member) || top_component(&member).as_deref() != Some(top.as_str()) {
            warn!(
                "Skipping member {} of {}: outside of top directory {}",
                member.display(),
                archive_path.display(),
                top
            );
            continue;
        }
        entry
            .unpack_in(dest)
            .map_err(|e| archive_error(archive_path, format!("{}: {}", member.display(), e)))?;
    }
    Ok(dest.join(top))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn append_file<W: io::Write>(builder: &mut tar::Builder<W>, path: &str, content: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        // set_path refuses `..`, write the raw name instead
        let name = &mut header.as_old_mut().name;
        name[..path.len()].copy_from_slice(path.as_bytes());
        header.set_cksum();
        builder.append(&header, content).unwrap();
    }

    fn make_tgz(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in members {
            append_file(&mut builder, name, content.as_bytes());
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_caching_policy_parsing() {
        assert_eq!("filename".parse::<HttpCaching>().unwrap(), HttpCaching::Filename);
        assert_eq!("http-head".parse::<HttpCaching>().unwrap(), HttpCaching::HttpHead);
        assert_eq!("".parse::<HttpCaching>().unwrap(), HttpCaching::Filename);
        assert!("etag".parse::<HttpCaching>().is_err());
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name("https://example.com/releases/odoo_16.0.tar.gz").unwrap(),
            "odoo_16.0.tar.gz"
        );
        assert!(archive_file_name("https://example.com/").is_err());
        assert!(archive_file_name("not a url").is_err());
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(unix_seconds(parsed), 1_445_412_480);
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_remote_stamp_matching() {
        let when = UNIX_EPOCH + Duration::from_secs(1_000);
        let stamp = RemoteStamp {
            length: Some(10),
            last_modified: Some(when),
        };
        assert!(stamp.matches(10, Some(when + Duration::from_millis(300))));
        assert!(!stamp.matches(11, Some(when)));
        assert!(!stamp.matches(10, Some(when + Duration::from_secs(5))));
        assert!(!stamp.matches(10, None));
        let unknown = RemoteStamp {
            length: Some(10),
            last_modified: None,
        };
        assert!(!unknown.matches(10, Some(when)));
    }

    #[test]
    fn test_extract_only_top_directory_members() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("odoo-16.tar.gz");
        make_tgz(
            &archive,
            &[
                ("odoo-16/setup.py", "setup"),
                ("odoo-16/odoo/__init__.py", "init"),
                ("evil/payload", "x"),
                ("odoo-16/../escape", "x"),
            ],
        );
        let parts = temp.path().join("parts");

        let main_dir = extract_archive(&archive, &parts).unwrap();

        assert_eq!(main_dir, parts.join("odoo-16"));
        assert_eq!(fs::read_to_string(main_dir.join("setup.py")).unwrap(), "setup");
        assert!(main_dir.join("odoo/__init__.py").exists());
        assert!(!parts.join("evil").exists());
        assert!(!temp.path().join("escape").exists());
        assert!(!parts.join("escape").exists());
    }

    #[test]
    fn test_archive_top_dir() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("release.tgz");
        make_tgz(&archive, &[("./release-1.0/a.txt", "a")]);
        assert_eq!(archive_top_dir(&archive).unwrap(), "release-1.0");
    }

    #[test]
    fn test_unsupported_archive_format() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("release.zip");
        fs::write(&archive, "PK").unwrap();
        assert!(matches!(archive_top_dir(&archive), Err(Error::Archive { .. })));
    }

    #[test]
    fn test_offline_fetch() {
        let temp = TempDir::new().unwrap();
        let downloader = Downloader::new(HttpCaching::HttpHead, true).unwrap();

        let missing = downloader.fetch("https://example.invalid/odoo.tar.gz", temp.path());
        assert!(matches!(missing, Err(Error::Offline { .. })));

        fs::write(temp.path().join("odoo.tar.gz"), "cached").unwrap();
        let cached = downloader
            .fetch("https://example.invalid/odoo.tar.gz", temp.path())
            .unwrap();
        assert_eq!(cached, temp.path().join("odoo.tar.gz"));
    }

    #[test]
    fn test_filename_caching_skips_network() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("odoo.tar.gz"), "cached").unwrap();
        let downloader = Downloader::new(HttpCaching::Filename, false).unwrap();
        let path = downloader
            .fetch("https://example.invalid/odoo.tar.gz", temp.path())
            .unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "cached");
    }

    #[test]
    fn test_head_failure_is_stale() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("odoo.tar.gz");
        fs::write(&local, "cached").unwrap();
        let downloader = Downloader::new(HttpCaching::HttpHead, false).unwrap();
        // port 9 (discard) is closed on test machines; connection fails fast
        assert!(downloader.is_stale("http://127.0.0.1:9/odoo.tar.gz", &local));
    }
}
