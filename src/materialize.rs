//! Turns a release's remote payload into verified files on disk.
//!
//! Every file is hash-checked before it is written. A mismatch stops the
//! whole release; files already written for it stay on disk and the next
//! detection pass classifies the package as `Unknown`.

use crate::archive::{is_archive, ArchiveExtractor};
use crate::catalog::{BinaryDescriptor, Package, Release};
use crate::error::{RepoError, Result};
use crate::fetch::ContentFetcher;
use crate::hash::check_hash;
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How a payload yields its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unpacker {
    /// Each declared file is a member of the archive payload.
    Archive,
    /// The payload is the single declared file.
    Direct,
}

impl Unpacker {
    pub fn select(
        package: &Package,
        release: &Release,
        binary: &BinaryDescriptor,
        payload: &[u8],
    ) -> Result<Self> {
        if is_archive(&binary.url, payload) {
            Ok(Unpacker::Archive)
        } else if binary.files.len() == 1 {
            Ok(Unpacker::Direct)
        } else {
            Err(RepoError::UnsupportedLayout {
                package: package.name.clone(),
                version: release.version.clone(),
                files: binary.files.len(),
            })
        }
    }
}

/// Last `/`-separated component of a declared file.
pub fn stripped_name(file: &str) -> &str {
    file.rsplit('/').next().unwrap_or(file)
}

/// Fetch, verify and write every file of `binary` into `dest`.
///
/// Returns the paths written, in declaration order.
pub fn materialize(
    package: &Package,
    release: &Release,
    binary: &BinaryDescriptor,
    dest: &Path,
    fetcher: &mut dyn ContentFetcher,
    extractor: &dyn ArchiveExtractor,
) -> Result<Vec<PathBuf>> {
    let payload = fetcher.fetch(&binary.url)?;
    let unpacker = Unpacker::select(package, release, binary, &payload)?;
    fs::create_dir_all(dest)?;

    // Stage an archive once for all of its members
    let staged = match unpacker {
        Unpacker::Archive => Some(extractor.stage(&payload)?),
        Unpacker::Direct => None,
    };

    let mut written = Vec::with_capacity(binary.files.len());
    for file in &binary.files {
        let data = match &staged {
            Some(archive) => Bytes::from(archive.extract_member(file)?),
            None => payload.clone(),
        };

        // Members are flattened into the install directory
        let name = stripped_name(file);
        let expected = binary.hash.get(name).ok_or_else(|| RepoError::MissingHash {
            package: package.name.clone(),
            version: release.version.clone(),
            file: name.to_string(),
        })?;
        // Verify before anything touches the disk
        let check = check_hash(&data, expected);
        if !check.matched {
            return Err(RepoError::HashMismatch {
                file: name.to_string(),
                expected: check.expected,
                actual: check.actual,
            });
        }

        let path = dest.join(name);
        debug!(?path, bytes = data.len(), "writing");
        fs::write(&path, &data)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::StagedArchive;
    use crate::catalog::PackageType;
    use sha2::{Digest, Sha256};
    use std::cell::Cell;
    use std::collections::{BTreeMap, HashMap};

    struct StaticFetcher(HashMap<String, Bytes>);

    impl ContentFetcher for StaticFetcher {
        fn fetch(&mut self, url: &str) -> Result<Bytes> {
            self.0.get(url).cloned().ok_or_else(|| RepoError::Fetch {
                url: url.to_string(),
                reason: "not found".into(),
            })
        }
    }

    /// Treats the payload as irrelevant and serves members from a map.
    #[derive(Default)]
    struct MapArchive {
        members: HashMap<String, Vec<u8>>,
        stages: Cell<usize>,
    }

    impl MapArchive {
        fn new(members: HashMap<String, Vec<u8>>) -> Self {
            Self {
                members,
                stages: Cell::new(0),
            }
        }
    }

    impl ArchiveExtractor for MapArchive {
        fn stage(&self, _archive: &[u8]) -> Result<Box<dyn StagedArchive + '_>> {
            self.stages.set(self.stages.get() + 1);
            Ok(Box::new(self))
        }
    }

    impl StagedArchive for MapArchive {
        fn extract_member(&self, member: &str) -> Result<Vec<u8>> {
            self.members.get(member).cloned().ok_or_else(|| RepoError::Extraction {
                member: member.to_string(),
                status: "exit status: 2".into(),
                stderr: "No files to process".into(),
            })
        }
    }

    fn sha256(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    fn fixture(url: &str, files: &[&str], hashes: &[(&str, &[u8])]) -> (Package, Release) {
        let binary = BinaryDescriptor {
            url: url.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            hash: hashes
                .iter()
                .map(|(n, d)| (n.to_string(), sha256(d)))
                .collect::<BTreeMap<_, _>>(),
        };
        let release = Release {
            version: "r1".into(),
            script: None,
            win32: None,
            win64: Some(binary),
        };
        let package = Package {
            name: "Plug".into(),
            identifier: "com.example.plug".into(),
            kind: PackageType::Plugin,
            namespace: Some("plug".into()),
            modulename: None,
            dependencies: vec![],
            releases: vec![release.clone()],
        };
        (package, release)
    }

    #[test]
    fn stripped_name_takes_last_component() {
        assert_eq!(stripped_name("x64/sub/a.dll"), "a.dll");
        assert_eq!(stripped_name("a.dll"), "a.dll");
    }

    #[test]
    fn direct_payload_written() {
        let dir = tempfile::tempdir().unwrap();
        let (package, release) = fixture("https://x/a.dll", &["a.dll"], &[("a.dll", b"bin")]);
        let mut fetcher = StaticFetcher(HashMap::from([(
            "https://x/a.dll".to_string(),
            Bytes::from_static(b"bin"),
        )]));
        let written = materialize(
            &package,
            &release,
            release.win64.as_ref().unwrap(),
            dir.path(),
            &mut fetcher,
            &MapArchive::default(),
        )
        .unwrap();
        assert_eq!(written, vec![dir.path().join("a.dll")]);
        assert_eq!(fs::read(dir.path().join("a.dll")).unwrap(), b"bin");
    }

    #[test]
    fn archive_members_extracted_and_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let (package, release) = fixture(
            "https://x/p.7z",
            &["x64/a.dll", "x64/b.dll"],
            &[("a.dll", b"A"), ("b.dll", b"B")],
        );
        let mut fetcher = StaticFetcher(HashMap::from([(
            "https://x/p.7z".to_string(),
            Bytes::from_static(b"archive"),
        )]));
        let archive = MapArchive::new(HashMap::from([
            ("x64/a.dll".to_string(), b"A".to_vec()),
            ("x64/b.dll".to_string(), b"B".to_vec()),
        ]));
        materialize(
            &package,
            &release,
            release.win64.as_ref().unwrap(),
            dir.path(),
            &mut fetcher,
            &archive,
        )
        .unwrap();
        assert_eq!(fs::read(dir.path().join("b.dll")).unwrap(), b"B");
        assert_eq!(archive.stages.get(), 1);
    }

    #[test]
    fn hash_mismatch_stops_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (package, release) = fixture("https://x/a.dll", &["a.dll"], &[("a.dll", b"good")]);
        let mut fetcher = StaticFetcher(HashMap::from([(
            "https://x/a.dll".to_string(),
            Bytes::from_static(b"evil"),
        )]));
        let err = materialize(
            &package,
            &release,
            release.win64.as_ref().unwrap(),
            dir.path(),
            &mut fetcher,
            &MapArchive::default(),
        )
        .unwrap_err();
        match err {
            RepoError::HashMismatch { expected, actual, .. } => {
                assert_eq!(expected, sha256(b"good"));
                assert_eq!(actual, sha256(b"evil"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("a.dll").exists());
    }

    #[test]
    fn multiple_files_without_archive_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (package, release) = fixture(
            "https://x/bundle.bin",
            &["a.dll", "b.dll"],
            &[("a.dll", b"A"), ("b.dll", b"B")],
        );
        let mut fetcher = StaticFetcher(HashMap::from([(
            "https://x/bundle.bin".to_string(),
            Bytes::from_static(b"raw"),
        )]));
        let err = materialize(
            &package,
            &release,
            release.win64.as_ref().unwrap(),
            dir.path(),
            &mut fetcher,
            &MapArchive::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RepoError::UnsupportedLayout { files: 2, .. }));
    }

    #[test]
    fn extraction_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (package, release) = fixture("https://x/p.zip", &["x64/a.dll"], &[("a.dll", b"A")]);
        let mut fetcher = StaticFetcher(HashMap::from([(
            "https://x/p.zip".to_string(),
            Bytes::from_static(b"archive"),
        )]));
        let err = materialize(
            &package,
            &release,
            release.win64.as_ref().unwrap(),
            dir.path(),
            &mut fetcher,
            &MapArchive::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RepoError::Extraction { .. }));
    }
}
