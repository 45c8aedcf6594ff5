//! ZIP packing of processed images and extraction of uploaded archives

use crate::{
    config::ArchiveNaming,
    error::{ProcessingError, Result},
    pipeline::ImageItem,
    services::FormatGate,
};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::{FileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

/// Base name of a path-like filename, without directories
///
/// Returns `fallback` for names that reduce to nothing, `.` or `..`.
#[must_use]
pub fn sanitize_filename(filename: &str, fallback: &str) -> String {
    // Archives written on Windows use backslashes
    let normalized = filename.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// Output name for a processed image: the input stem with a `.png` extension
///
/// # Examples
/// ```
/// use image_processor::archive::png_name;
///
/// assert_eq!(png_name("holiday.JPG"), "holiday.png");
/// assert_eq!(png_name("dir/scan.tiff"), "scan.png");
/// assert_eq!(png_name("archive.tar.gz"), "archive.tar.png");
/// ```
#[must_use]
pub fn png_name(filename: &str) -> String {
    let base = sanitize_filename(filename, "image");
    let stem = Path::new(&base)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{stem}.png")
}

/// Hands out output names under an [`ArchiveNaming`] policy
///
/// With `LastWriteWins` every name is returned unchanged, so a repeated
/// name overwrites the earlier file. With `Suffix` a repeated name gets the
/// first free `_N` suffix before its extension.
#[derive(Debug)]
pub struct EntryNamer {
    naming: ArchiveNaming,
    taken: HashSet<String>,
}

impl EntryNamer {
    #[must_use]
    pub fn new(naming: ArchiveNaming) -> Self {
        Self {
            naming,
            taken: HashSet::new(),
        }
    }

    pub fn assign(&mut self, name: &str) -> String {
        let assigned = match self.naming {
            ArchiveNaming::Suffix if self.taken.contains(name) => self.suffixed(name),
            _ => name.to_string(),
        };
        self.taken.insert(assigned.clone());
        assigned
    }

    fn suffixed(&self, name: &str) -> String {
        let path = Path::new(name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        let extension = path.extension().and_then(|s| s.to_str());

        (1..)
            .map(|n| match extension {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            })
            .find(|candidate| !self.taken.contains(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Builds ZIP archives from named byte buffers
pub struct ArchivePacker;

impl ArchivePacker {
    /// Pack `(name, bytes)` entries into a deflate-compressed ZIP
    ///
    /// Names are reduced to their base name. Entries that end up with the
    /// same name are resolved by `naming`: either the later bytes replace
    /// the earlier ones under a single entry, or later entries get a
    /// numeric suffix (`a.png`, `a_1.png`, ...).
    ///
    /// # Errors
    /// Returns `ProcessingError::Archive` if the ZIP writer fails.
    pub fn pack(entries: Vec<(String, Vec<u8>)>, naming: ArchiveNaming) -> Result<Vec<u8>> {
        let entries = Self::resolve_names(entries, naming);

        let mut buffer = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o644);

            for (name, bytes) in &entries {
                zip.start_file(name.as_str(), options)?;
                zip.write_all(bytes).map_err(|e| {
                    ProcessingError::archive(format!("Failed to write {name} to ZIP: {e}"))
                })?;
            }

            zip.finish()?;
        }

        log::debug!("Packed {} entries into {} bytes", entries.len(), buffer.len());
        Ok(buffer)
    }

    /// Apply the naming policy, keeping first-appearance order
    fn resolve_names(
        entries: Vec<(String, Vec<u8>)>,
        naming: ArchiveNaming,
    ) -> Vec<(String, Vec<u8>)> {
        let mut namer = EntryNamer::new(naming);
        let mut resolved: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (index, (name, bytes)) in entries.into_iter().enumerate() {
            let name = namer.assign(&sanitize_filename(&name, &format!("file_{index}")));

            if let Some(&position) = positions.get(&name) {
                log::warn!("Archive entry {name} written twice; keeping the later one");
                if let Some(slot) = resolved.get_mut(position) {
                    slot.1 = bytes;
                }
            } else {
                positions.insert(name.clone(), resolved.len());
                resolved.push((name, bytes));
            }
        }

        resolved
    }

    /// Extract the image entries of an uploaded ZIP
    ///
    /// Directory entries, macOS resource forks and names failing the format
    /// gate are skipped. Entry names are reduced to their base name.
    ///
    /// # Errors
    /// - `ProcessingError::Archive` when the bytes are not a readable ZIP
    /// - `ProcessingError::Validation` when the uncompressed images exceed
    ///   `max_uncompressed` bytes in total
    pub fn extract_images(bytes: &[u8], max_uncompressed: u64) -> Result<Vec<ImageItem>> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ProcessingError::archive(format!("Invalid zip file: {e}")))?;

        let mut items = Vec::new();
        let mut total: u64 = 0;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let raw_name = entry.name().to_string();
            if entry.is_dir() || raw_name.starts_with("__MACOSX/") {
                continue;
            }

            let filename = sanitize_filename(&raw_name, "");
            if filename.is_empty() || !FormatGate::is_supported(&filename) {
                log::debug!("Skipping archive entry {raw_name}");
                continue;
            }

            // Header sizes are untrusted; count the bytes actually inflated
            let remaining = max_uncompressed.saturating_sub(total);
            let mut data = Vec::new();
            entry
                .by_ref()
                .take(remaining.saturating_add(1))
                .read_to_end(&mut data)
                .map_err(|e| {
                    ProcessingError::archive(format!("Failed to read {raw_name} from ZIP: {e}"))
                })?;

            total = total.saturating_add(data.len() as u64);
            if total > max_uncompressed {
                return Err(ProcessingError::validation(format!(
                    "Archive contents exceed {max_uncompressed} bytes"
                )));
            }
            items.push(ImageItem::from_bytes(filename, data));
        }

        Ok(items)
    }
}
