// EXIF metadata extraction.
//
// Camera photos almost always carry EXIF; generated images and screenshots
// usually don't, and re-encoding pipelines strip it. Absence is therefore a
// weak suspicion signal, never proof. A Software tag naming a known image
// generator is surfaced separately for the reasoning summary.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Software names that identify generative tools.
const GENERATOR_MARKERS: [&str; 8] = [
    "stable diffusion",
    "midjourney",
    "dall-e",
    "dall·e",
    "firefly",
    "comfyui",
    "automatic1111",
    "novelai",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataReport {
    /// At least one EXIF field was found
    pub present: bool,
    pub field_count: usize,
    /// Value of the Software tag, if any
    pub software: Option<String>,
    /// Software tag names a known generator
    pub generator_hint: bool,
}

/// Extract EXIF metadata. Never fails: unreadable or missing metadata yields
/// a report with `present == false`.
pub fn extract_metadata(bytes: &[u8]) -> MetadataReport {
    let mut reader = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(error = %e, "No readable EXIF");
            return MetadataReport::default();
        }
    };

    let field_count = exif.fields().count();
    let software = exif
        .get_field(exif::Tag::Software, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches('"').trim().to_string())
        .filter(|s| !s.is_empty());
    let generator_hint = software.as_deref().is_some_and(is_generator_software);

    MetadataReport {
        present: field_count > 0,
        field_count,
        software,
        generator_hint,
    }
}

/// Whether a Software tag value names a generative tool.
pub fn is_generator_software(software: &str) -> bool {
    let lower = software.to_lowercase();
    GENERATOR_MARKERS.iter().any(|m| lower.contains(m))
}
