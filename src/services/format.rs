//! Input format gate
//!
//! Decides from a filename alone whether an upload is worth decoding. The
//! check is extension based and never touches the payload.

use std::path::Path;

/// Supported input formats and the extensions that identify them
///
/// Some of these (RAW, SVG, EPS, AI, HEIC/HEIF, PSD) are accepted by the gate
/// but have no decoder; such items fail later at the decode stage.
pub const SUPPORTED_FORMATS: &[(&str, &[&str])] = &[
    ("JPEG", &["jpg", "jpeg"]),
    ("PNG", &["png"]),
    ("GIF", &["gif"]),
    ("WEBP", &["webp"]),
    ("BMP", &["bmp"]),
    ("TIFF", &["tiff", "tif"]),
    ("RAW", &["raw", "cr2", "nef", "arw", "dng"]),
    ("SVG", &["svg"]),
    ("EPS", &["eps"]),
    ("AI", &["ai"]),
    ("HEIC", &["heic"]),
    ("HEIF", &["heif"]),
    ("PSD", &["psd"]),
];

/// Service for extension-based format checks
pub struct FormatGate;

impl FormatGate {
    /// Check if a filename carries a supported image extension
    ///
    /// The extension is the text after the last `.` of the base name,
    /// compared case-insensitively. Names without an extension (including
    /// dotfiles such as `.png`) are rejected.
    ///
    /// # Examples
    /// ```rust
    /// use image_processor::services::FormatGate;
    ///
    /// assert!(FormatGate::is_supported("holiday.JPG"));
    /// assert!(!FormatGate::is_supported("notes.xyz"));
    /// assert!(!FormatGate::is_supported("README"));
    /// ```
    #[must_use]
    pub fn is_supported(filename: &str) -> bool {
        Self::format_of(filename).is_some()
    }

    /// Name of the format a filename maps to, if any
    #[must_use]
    pub fn format_of(filename: &str) -> Option<&'static str> {
        let ext = Self::extension(filename)?.to_lowercase();
        SUPPORTED_FORMATS
            .iter()
            .find(|(_, extensions)| extensions.contains(&ext.as_str()))
            .map(|(name, _)| *name)
    }

    /// Extension of a filename as written, without the leading dot
    #[must_use]
    pub fn extension(filename: &str) -> Option<&str> {
        Path::new(filename)
            .extension()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
    }

    /// Names of all supported formats, in table order
    #[must_use]
    pub fn format_names() -> Vec<&'static str> {
        SUPPORTED_FORMATS.iter().map(|(name, _)| *name).collect()
    }
}
