//! Artifact decompression and parsing.
//!
//! The declared format comes from the attachment's file name:
//!
//! | Suffix | Format |
//! |--------|--------|
//! | `.json` | stored as-is |
//! | `.gz` | gzip stream |
//! | `.tar.gz`, `.tgz` | gzip-compressed tar archive |
//! | `.zip` | zip archive |
//!
//! Archives yield their first `.json` member, or their first regular file
//! when none ends in `.json`. Bytes that do not match the declared format
//! fail with [`PipelineError::CorruptArtifact`].

use std::io::{Cursor, Read};

use flate2::read::MultiGzDecoder;
use snapshot_relay_core::document::ParsedDocument;

use crate::error::PipelineError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Compression format declared by an attachment's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Gzip,
    TarGzip,
    Zip,
}

impl ArtifactFormat {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArtifactFormat::TarGzip)
        } else if lower.ends_with(".gz") {
            Some(ArtifactFormat::Gzip)
        } else if lower.ends_with(".zip") {
            Some(ArtifactFormat::Zip)
        } else if lower.ends_with(".json") {
            Some(ArtifactFormat::Json)
        } else {
            None
        }
    }
}

/// True if a file name qualifies as a snapshot attachment.
pub fn is_supported_attachment(name: &str) -> bool {
    ArtifactFormat::from_file_name(name).is_some()
}

/// Inflate `bytes` according to the format declared by `file_name`.
pub fn decompress(file_name: &str, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let format = ArtifactFormat::from_file_name(file_name).ok_or_else(|| {
        PipelineError::CorruptArtifact(format!("unsupported attachment type: {}", file_name))
    })?;

    match format {
        ArtifactFormat::Json => Ok(bytes.to_vec()),
        ArtifactFormat::Gzip => {
            expect_magic(bytes, &GZIP_MAGIC, "gzip")?;
            let mut out = Vec::new();
            MultiGzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| PipelineError::CorruptArtifact(format!("gzip stream: {}", e)))?;
            Ok(out)
        }
        ArtifactFormat::TarGzip => {
            expect_magic(bytes, &GZIP_MAGIC, "gzip")?;
            extract_tar(MultiGzDecoder::new(bytes))
        }
        ArtifactFormat::Zip => {
            expect_magic(bytes, &ZIP_MAGIC, "zip")?;
            extract_zip(bytes)
        }
    }
}

/// Decompress and parse an artifact into a document.
///
/// Pure: the same bytes always yield an equal document.
pub fn parse_artifact(file_name: &str, bytes: &[u8]) -> Result<ParsedDocument, PipelineError> {
    let payload = decompress(file_name, bytes)?;
    Ok(ParsedDocument::from_slice(&payload)?)
}

fn expect_magic(bytes: &[u8], magic: &[u8], label: &str) -> Result<(), PipelineError> {
    if bytes.starts_with(magic) {
        Ok(())
    } else {
        Err(PipelineError::CorruptArtifact(format!(
            "payload is not {} data ({} bytes)",
            label,
            bytes.len()
        )))
    }
}

fn extract_tar<R: Read>(reader: R) -> Result<Vec<u8>, PipelineError> {
    let corrupt = |e: std::io::Error| PipelineError::CorruptArtifact(format!("tar archive: {}", e));

    let mut archive = tar::Archive::new(reader);
    let mut fallback: Option<Vec<u8>> = None;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let is_json = entry
            .path()
            .map(|p| p.to_string_lossy().to_ascii_lowercase().ends_with(".json"))
            .unwrap_or(false);
        if !is_json && fallback.is_some() {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(corrupt)?;
        if is_json {
            return Ok(buf);
        }
        fallback = Some(buf);
    }

    fallback.ok_or_else(|| PipelineError::CorruptArtifact("tar archive has no files".to_string()))
}

fn extract_zip(bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let corrupt = |e: zip::result::ZipError| PipelineError::CorruptArtifact(format!("zip archive: {}", e));

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;

    let mut json_index = None;
    let mut first_file = None;
    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(corrupt)?;
        if !file.is_file() {
            continue;
        }
        if first_file.is_none() {
            first_file = Some(i);
        }
        if file.name().to_ascii_lowercase().ends_with(".json") {
            json_index = Some(i);
            break;
        }
    }

    let index = json_index
        .or(first_file)
        .ok_or_else(|| PipelineError::CorruptArtifact("zip archive has no files".to_string()))?;

    let mut file = archive.by_index(index).map_err(corrupt)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| PipelineError::CorruptArtifact(format!("zip member: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const DOC: &[u8] = br#"{"items": [{"id": 1}]}"#;

    #[test]
    fn test_format_from_file_name() {
        assert_eq!(ArtifactFormat::from_file_name("backup.JSON"), Some(ArtifactFormat::Json));
        assert_eq!(ArtifactFormat::from_file_name("b.json.gz"), Some(ArtifactFormat::Gzip));
        assert_eq!(ArtifactFormat::from_file_name("b.tar.gz"), Some(ArtifactFormat::TarGzip));
        assert_eq!(ArtifactFormat::from_file_name("b.tgz"), Some(ArtifactFormat::TarGzip));
        assert_eq!(ArtifactFormat::from_file_name("b.zip"), Some(ArtifactFormat::Zip));
        assert_eq!(ArtifactFormat::from_file_name("b.pdf"), None);
    }

    #[test]
    fn test_gzip_roundtrip() {
        let doc = parse_artifact("backup.json.gz", &gzip(DOC)).unwrap();
        assert_eq!(doc.collections[0].name, "items");
    }

    #[test]
    fn test_concatenated_gzip_members_are_all_read() {
        let mut joined = gzip(br#"{"t": [{"a": 1}"#);
        joined.extend(gzip(br#", {"a": 2}]}"#));
        let doc = parse_artifact("b.json.gz", &joined).unwrap();
        assert_eq!(doc.collections[0].records.len(), 2);
    }

    #[test]
    fn test_concatenated_tar_gz_members_are_all_read() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(DOC.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "data.json", DOC).unwrap();
        let raw = builder.into_inner().unwrap();

        // Header block in one member, file data and trailer in the next.
        let (head, tail) = raw.split_at(512);
        let mut joined = gzip(head);
        joined.extend(gzip(tail));
        assert_eq!(decompress("backup.tar.gz", &joined).unwrap(), DOC);
    }

    #[test]
    fn test_tar_gz_prefers_json_member() {
        let archive = tar_gz(&[("readme.txt", b"hello"), ("dump/data.json", DOC)]);
        assert_eq!(decompress("backup.tar.gz", &archive).unwrap(), DOC);
    }

    #[test]
    fn test_tar_gz_falls_back_to_first_file() {
        let archive = tar_gz(&[("payload.bin", DOC), ("other.bin", b"x")]);
        assert_eq!(decompress("backup.tgz", &archive).unwrap(), DOC);
    }

    #[test]
    fn test_zip_member() {
        let archive = zip_of(&[("notes.txt", b"n"), ("data.json", DOC)]);
        assert_eq!(decompress("backup.zip", &archive).unwrap(), DOC);
    }

    #[test]
    fn test_format_mismatch_is_corrupt() {
        let err = decompress("backup.json.gz", DOC).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptArtifact(_)));
        let err = decompress("backup.zip", &gzip(DOC)).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptArtifact(_)));
    }

    #[test]
    fn test_truncated_gzip_is_corrupt() {
        let full = gzip(DOC);
        let truncated = &full[..full.len() / 2];
        let err = decompress("backup.gz", truncated).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptArtifact(_)));
    }

    #[test]
    fn test_invalid_json_is_invalid_format() {
        let err = parse_artifact("backup.json.gz", &gzip(b"{\"items\": [}")).unwrap_err();
        match err {
            PipelineError::InvalidFormat { offset, .. } => assert!(offset.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
