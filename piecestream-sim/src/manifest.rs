//! JSON content manifests understood by the simulated engine.
//!
//! A manifest plays the role of an archive description: it names the files,
//! fixes the piece length and seeds the generator that produces the content
//! bytes. The same manifest always describes the same bytes.

use bytes::Bytes;
use piecestream_core::demux::PieceSpan;
use piecestream_core::engine::{Content, ContentHandle, FileEntry};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Errors from parsing or validating a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Piece length must be non-zero")]
    ZeroPieceLength,

    #[error("Manifest lists no files")]
    NoFiles,

    #[error("Content of {total_size} bytes needs more than {max} pieces")]
    TooManyPieces { total_size: u64, max: u32 },
}

/// One file of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub size: u64,
}

/// Description of simulated content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    #[serde(default)]
    pub name: String,
    pub piece_length: u32,
    #[serde(default)]
    pub seed: u64,
    pub files: Vec<ManifestFile>,
}

/// Derives the content handle from the raw description bytes.
pub fn content_handle(description: &[u8]) -> ContentHandle {
    let digest = Sha1::digest(description);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    ContentHandle::new(hash)
}

impl ContentManifest {
    /// Builds a manifest with one generated file per size.
    pub fn synthetic(name: &str, piece_length: u32, sizes: &[u64], seed: u64) -> Self {
        let files = sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| ManifestFile {
                path: format!("{name}/file-{index}.bin"),
                size,
            })
            .collect();
        Self {
            name: name.to_string(),
            piece_length,
            seed,
            files,
        }
    }

    /// Parses and validates a manifest.
    ///
    /// # Errors
    ///
    /// - `ManifestError::Parse` - If the bytes are not a manifest document
    /// - `ManifestError::ZeroPieceLength` - If the piece length is zero
    /// - `ManifestError::NoFiles` - If no files are listed
    /// - `ManifestError::TooManyPieces` - If the piece count overflows
    pub fn from_json(description: &[u8]) -> Result<Self, ManifestError> {
        let mut manifest: Self = serde_json::from_slice(description)?;
        manifest.validate()?;
        if manifest.name.is_empty() {
            let digest = content_handle(description);
            manifest.name = format!("content_{}", hex::encode(&digest.as_bytes()[..8]));
        }
        Ok(manifest)
    }

    /// Serializes the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// - `ManifestError::Parse` - If serialization fails
    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Checks that the manifest describes addressable content.
    ///
    /// # Errors
    ///
    /// - `ManifestError::ZeroPieceLength` - If the piece length is zero
    /// - `ManifestError::NoFiles` - If no files are listed
    /// - `ManifestError::TooManyPieces` - If the piece count overflows
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.piece_length == 0 {
            return Err(ManifestError::ZeroPieceLength);
        }
        if self.files.is_empty() {
            return Err(ManifestError::NoFiles);
        }
        let total_size = self.total_size();
        if total_size.div_ceil(u64::from(self.piece_length)) > u64::from(u32::MAX) {
            return Err(ManifestError::TooManyPieces {
                total_size,
                max: u32::MAX,
            });
        }
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }

    /// Geometry of the described content; files are laid out back to back.
    pub fn content(&self) -> Content {
        let mut offset = 0;
        let files = self
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let entry = FileEntry {
                    index,
                    path: file.path.clone(),
                    offset,
                    size: file.size,
                };
                offset += file.size;
                entry
            })
            .collect();
        Content {
            piece_length: self.piece_length,
            num_pieces: self.total_size().div_ceil(u64::from(self.piece_length)) as u32,
            files,
        }
    }

    /// Generates the bytes of one piece.
    pub fn piece_bytes(&self, index: u32) -> Bytes {
        let start = u64::from(index) * u64::from(self.piece_length);
        let end = (start + u64::from(self.piece_length)).min(self.total_size());
        if start >= end {
            return Bytes::new();
        }
        let piece_seed = self
            .seed
            .wrapping_add(u64::from(index))
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = ChaCha8Rng::seed_from_u64(piece_seed);
        let mut data = vec![0u8; (end - start) as usize];
        rng.fill_bytes(&mut data);
        Bytes::from(data)
    }

    /// Assembles the bytes of one file from its pieces.
    pub fn file_bytes(&self, index: usize) -> Option<Vec<u8>> {
        let content = self.content();
        let file = content.files.get(index)?;
        let span = PieceSpan::for_range(self.piece_length, file.offset, file.size);
        let mut bytes = Vec::with_capacity(file.size as usize);
        for piece in span.start_piece..=span.last_data_piece() {
            bytes.extend_from_slice(&span.trim(piece, &self.piece_bytes(piece)));
        }
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_manifest_round_trips_through_json() {
        let manifest = ContentManifest::synthetic("movie", 16384, &[100, 500], 9);
        let json = manifest.to_json().unwrap();
        assert_eq!(ContentManifest::from_json(&json).unwrap(), manifest);
        assert_eq!(manifest.files[1].path, "movie/file-1.bin");
    }

    #[test]
    fn test_invalid_manifests_rejected() {
        assert!(matches!(
            ContentManifest::from_json(b"d8:announce"),
            Err(ManifestError::Parse(_))
        ));
        assert!(matches!(
            ContentManifest::from_json(br#"{"piece_length":0,"files":[{"path":"a","size":1}]}"#),
            Err(ManifestError::ZeroPieceLength)
        ));
        assert!(matches!(
            ContentManifest::from_json(br#"{"piece_length":16,"files":[]}"#),
            Err(ManifestError::NoFiles)
        ));
    }

    #[test]
    fn test_missing_name_derived_from_digest() {
        let json = br#"{"piece_length":16,"files":[{"path":"a","size":1}]}"#;
        let manifest = ContentManifest::from_json(json).unwrap();
        assert!(manifest.name.starts_with("content_"));
        assert_eq!(manifest.name.len(), "content_".len() + 16);
        assert_eq!(manifest.seed, 0);
    }

    #[test]
    fn test_geometry_lays_files_back_to_back() {
        let content = ContentManifest::synthetic("x", 100, &[150, 0, 275], 1).content();
        assert_eq!(content.num_pieces, 5);
        assert_eq!(content.files[1].offset, 150);
        assert_eq!(content.files[2].offset, 150);
        assert_eq!(content.total_size(), 425);
    }

    #[test]
    fn test_piece_bytes_are_deterministic() {
        let manifest = ContentManifest::synthetic("x", 100, &[250], 42);
        assert_eq!(manifest.piece_bytes(1), manifest.piece_bytes(1));
        assert_ne!(manifest.piece_bytes(0), manifest.piece_bytes(1));
        assert_eq!(manifest.piece_bytes(2).len(), 50);
        assert!(manifest.piece_bytes(3).is_empty());

        let reseeded = ContentManifest::synthetic("x", 100, &[250], 43);
        assert_ne!(manifest.piece_bytes(0), reseeded.piece_bytes(0));
    }

    #[test]
    fn test_file_bytes_cut_from_pieces() {
        let manifest = ContentManifest::synthetic("x", 100, &[150, 120], 5);
        let first = manifest.file_bytes(0).unwrap();
        let second = manifest.file_bytes(1).unwrap();
        assert_eq!(first.len(), 150);
        assert_eq!(second.len(), 120);

        let mut whole = first;
        whole.extend_from_slice(&second);
        let pieces: Vec<u8> = (0..3)
            .flat_map(|piece| manifest.piece_bytes(piece).to_vec())
            .collect();
        assert_eq!(whole, pieces);
        assert!(manifest.file_bytes(2).is_none());
    }

    #[test]
    fn test_handle_is_sha1_of_description() {
        let handle = content_handle(b"abc");
        assert_eq!(
            handle.to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
