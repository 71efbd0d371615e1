//! Artifact packing and extraction
//!
//! Archive layout:
//!
//! ```text
//! <id>.tar[.gz]
//! ├── graph.export             raw engine export stream
//! └── export_manifest.json     id, counts, engine version
//! ```
//!
//! The artifact is written to a `.partial` path, fsynced, then renamed into
//! place; a crash mid-pack leaves only a `.partial` file that cleanup
//! removes. Zero partial success.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// Archive entry holding the engine export stream.
pub const EXPORT_ENTRY: &str = "graph.export";

/// Archive entry holding the manifest.
pub const MANIFEST_ENTRY: &str = "export_manifest.json";

/// Manifest embedded in every artifact so an archive is self-describing
/// even without its metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub node_count: u64,
    pub relationship_count: u64,
    pub engine_version: String,
}

/// Write adapter that counts bytes, used to record the uncompressed export
/// size.
pub struct CountingWriter<W> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Packs the export file and manifest into `artifact_path`, fsyncing before
/// returning. `compress` selects gzip framing.
pub fn pack(
    export_path: &Path,
    manifest: &ArtifactManifest,
    artifact_path: &Path,
    compress: bool,
) -> io::Result<()> {
    let manifest_bytes = serde_json::to_vec_pretty(manifest)?;
    let file = File::create(artifact_path)?;

    if compress {
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_entries(&mut builder, export_path, &manifest_bytes)?;
        let encoder = builder.into_inner()?;
        let mut out = encoder.finish()?;
        out.flush()?;
        out.get_ref().sync_all()?;
    } else {
        let mut builder = tar::Builder::new(BufWriter::new(file));
        append_entries(&mut builder, export_path, &manifest_bytes)?;
        let mut out = builder.into_inner()?;
        out.flush()?;
        out.get_ref().sync_all()?;
    }

    Ok(())
}

fn append_entries<W: Write>(
    builder: &mut tar::Builder<W>,
    export_path: &Path,
    manifest_bytes: &[u8],
) -> io::Result<()> {
    builder.append_path_with_name(export_path, EXPORT_ENTRY)?;

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, MANIFEST_ENTRY, manifest_bytes)?;
    Ok(())
}

/// Extracts the export stream from an artifact into `dest`.
pub fn extract_export(artifact_path: &Path, dest: &Path) -> io::Result<()> {
    let mut archive = open_archive(artifact_path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(EXPORT_ENTRY) {
            let mut out = File::create(dest)?;
            io::copy(&mut entry, &mut out)?;
            out.sync_all()?;
            return Ok(());
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("artifact '{}' has no {} entry", artifact_path.display(), EXPORT_ENTRY),
    ))
}

/// Reads the embedded manifest out of an artifact.
pub fn read_manifest(artifact_path: &Path) -> io::Result<ArtifactManifest> {
    let mut archive = open_archive(artifact_path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(MANIFEST_ENTRY) {
            let mut raw = String::new();
            entry.read_to_string(&mut raw)?;
            return Ok(serde_json::from_str(&raw)?);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("artifact '{}' has no {} entry", artifact_path.display(), MANIFEST_ENTRY),
    ))
}

fn open_archive(artifact_path: &Path) -> io::Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(artifact_path)?;
    let gz = artifact_path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);
    let reader: Box<dyn Read> = if gz {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(tar::Archive::new(reader))
}

/// Removes a partial artifact or scratch file, ignoring absence. A backup
/// failure must never leave an ambiguous half-written archive behind.
pub fn cleanup_partial(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest() -> ArtifactManifest {
        ArtifactManifest {
            format_version: 1,
            backup_id: "20260829T030000Z".to_string(),
            created_at: Utc::now(),
            node_count: 100,
            relationship_count: 250,
            engine_version: "memgraph-mem/0.1".to_string(),
        }
    }

    fn write_export(dir: &Path) -> std::path::PathBuf {
        let export = dir.join("graph.export");
        std::fs::write(&export, br#"{"nodes":{},"relationships":{},"schema":[]}"#).unwrap();
        export
    }

    #[test]
    fn test_pack_and_extract_roundtrip_plain() {
        let dir = TempDir::new().unwrap();
        let export = write_export(dir.path());
        let artifact = dir.path().join("b1.tar");

        pack(&export, &manifest(), &artifact, false).unwrap();
        assert!(artifact.exists());

        let restored = dir.path().join("restored.export");
        extract_export(&artifact, &restored).unwrap();
        assert_eq!(
            std::fs::read(&export).unwrap(),
            std::fs::read(&restored).unwrap()
        );
    }

    #[test]
    fn test_pack_and_extract_roundtrip_gzip() {
        let dir = TempDir::new().unwrap();
        let export = write_export(dir.path());
        let artifact = dir.path().join("b1.tar.gz");

        pack(&export, &manifest(), &artifact, true).unwrap();

        let restored = dir.path().join("restored.export");
        extract_export(&artifact, &restored).unwrap();
        assert_eq!(
            std::fs::read(&export).unwrap(),
            std::fs::read(&restored).unwrap()
        );
    }

    #[test]
    fn test_manifest_survives_packing() {
        let dir = TempDir::new().unwrap();
        let export = write_export(dir.path());
        let artifact = dir.path().join("b1.tar.gz");

        let m = manifest();
        pack(&export, &m, &artifact, true).unwrap();

        let back = read_manifest(&artifact).unwrap();
        assert_eq!(back.backup_id, m.backup_id);
        assert_eq!(back.node_count, 100);
        assert_eq!(back.relationship_count, 250);
        assert_eq!(back.format_version, 1);
    }

    #[test]
    fn test_extract_missing_entry_fails() {
        let dir = TempDir::new().unwrap();
        // A tar with no graph.export entry
        let artifact = dir.path().join("empty.tar");
        let file = File::create(&artifact).unwrap();
        let mut builder = tar::Builder::new(file);
        builder.finish().unwrap();
        drop(builder);

        let dest = dir.path().join("out");
        assert!(extract_export(&artifact, &dest).is_err());
    }

    #[test]
    fn test_counting_writer() {
        let mut counter = CountingWriter::new(Vec::new());
        counter.write_all(b"hello").unwrap();
        counter.write_all(b" world").unwrap();
        assert_eq!(counter.bytes_written(), 11);
        assert_eq!(counter.into_inner(), b"hello world");
    }

    #[test]
    fn test_cleanup_partial_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b1.tar.gz.partial");
        std::fs::write(&path, b"half written").unwrap();

        cleanup_partial(&path);
        assert!(!path.exists());
        // Absent file is not an error
        cleanup_partial(&path);
    }

    #[test]
    fn test_gzip_actually_compresses() {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("graph.export");
        // Highly compressible payload
        std::fs::write(&export, "a".repeat(64 * 1024)).unwrap();

        let plain = dir.path().join("b1.tar");
        let gz = dir.path().join("b1.tar.gz");
        pack(&export, &manifest(), &plain, false).unwrap();
        pack(&export, &manifest(), &gz, true).unwrap();

        let plain_len = std::fs::metadata(&plain).unwrap().len();
        let gz_len = std::fs::metadata(&gz).unwrap().len();
        assert!(gz_len < plain_len);
    }
}
