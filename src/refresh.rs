//! Catalog refresh: conditional download of the packaged definitions file.
//!
//! The remote catalog is a zip holding a single `vspackages.json`. The local
//! file's modification time doubles as the cache validator: it is sent as
//! `If-Modified-Since` and set to the remote `Last-Modified` after a refresh.

use crate::archive::ArchiveExtractor;
use crate::catalog::CATALOG_FILE_NAME;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use std::fmt;
use std::fs::{self, File};
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// Where the packaged definitions are published.
pub const DEFAULT_CATALOG_URL: &str = "http://www.vapoursynth.com/vsrepo/vspackages.zip";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Server answered 304; carries the local file's timestamp.
    UpToDate(DateTime<Utc>),
    /// New definitions were written; carries the remote timestamp.
    Updated(DateTime<Utc>),
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::UpToDate(t) => write!(
                f,
                "Local definitions already up to date: {}",
                t.format(HTTP_DATE_FORMAT)
            ),
            RefreshOutcome::Updated(t) => write!(
                f,
                "Local definitions updated to: {}",
                t.format(HTTP_DATE_FORMAT)
            ),
        }
    }
}

/// Modification time of the local file, or the epoch when there is none.
fn local_mtime(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

/// `If-Modified-Since` value: local mtime plus a ten second grace period.
pub fn if_modified_since(local: DateTime<Utc>) -> String {
    (local + Duration::seconds(10))
        .format(HTTP_DATE_FORMAT)
        .to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Pull the definitions file out of the downloaded zip and stamp it with the
/// remote modification time.
pub fn install_definitions(
    payload: &[u8],
    extractor: &dyn ArchiveExtractor,
    dest: &Path,
    remote_time: DateTime<Utc>,
) -> Result<()> {
    let data = extractor
        .stage(payload)
        .and_then(|archive| archive.extract_member(CATALOG_FILE_NAME))
        .context("Failed to extract package definitions")?;
    fs::write(dest, &data).context(format!("Failed to write definitions: {:?}", dest))?;
    File::options()
        .write(true)
        .open(dest)?
        .set_modified(SystemTime::from(remote_time))
        .context(format!("Failed to set modification time of {:?}", dest))?;
    Ok(())
}

/// Refresh `dest` from `url` unless the server reports it unchanged.
pub fn refresh_catalog(
    url: &str,
    dest: &Path,
    extractor: &dyn ArchiveExtractor,
) -> Result<RefreshOutcome> {
    let local = local_mtime(dest);
    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .header(IF_MODIFIED_SINCE, if_modified_since(local))
        .send()
        .context(format!("Failed to request {url}"))?;

    if response.status() == StatusCode::NOT_MODIFIED {
        return Ok(RefreshOutcome::UpToDate(local));
    }
    let response = response
        .error_for_status()
        .context(format!("Failed to download {url}"))?;

    let remote_time = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or_else(Utc::now);
    let payload = response.bytes().context("Failed to read definitions payload")?;
    debug!(bytes = payload.len(), %remote_time, "downloaded definitions");

    install_definitions(&payload, extractor, dest, remote_time)?;
    Ok(RefreshOutcome::Updated(remote_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::StagedArchive;
    use crate::error::RepoError;
    use chrono::TimeZone;

    struct OneMember(Vec<u8>);

    impl ArchiveExtractor for OneMember {
        fn stage(&self, _archive: &[u8]) -> crate::error::Result<Box<dyn StagedArchive + '_>> {
            Ok(Box::new(self))
        }
    }

    impl StagedArchive for OneMember {
        fn extract_member(&self, member: &str) -> crate::error::Result<Vec<u8>> {
            if member == CATALOG_FILE_NAME {
                Ok(self.0.clone())
            } else {
                Err(RepoError::Extraction {
                    member: member.to_string(),
                    status: "exit status: 2".into(),
                    stderr: String::new(),
                })
            }
        }
    }

    #[test]
    fn header_adds_grace_period() {
        let t = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(if_modified_since(t), "Wed, 21 Oct 2015 07:28:10 GMT");
    }

    #[test]
    fn parses_last_modified() {
        let t = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap());
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn missing_local_file_uses_epoch() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            local_mtime(&dir.path().join("nope.json")),
            DateTime::<Utc>::from(SystemTime::UNIX_EPOCH)
        );
    }

    #[test]
    fn definitions_written_with_remote_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(CATALOG_FILE_NAME);
        let remote = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        install_definitions(b"zip", &OneMember(b"[]".to_vec()), &dest, remote).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"[]");
        assert_eq!(local_mtime(&dest), remote);
    }

    #[test]
    fn outcome_messages() {
        let t = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            RefreshOutcome::Updated(t).to_string(),
            "Local definitions updated to: Thu, 02 Jan 2020 03:04:05 GMT"
        );
    }
}
