//! Settings – the per-batch [`RenderSettings`] record received from the upload
//! form, and the process-level [`PipelineConfig`].

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BatchError, BatchResult};

/// Default template limit in pixels, applied to both axes.
pub const MAX_TEMPLATE_DIM: u32 = 500;

/// How the name is drawn on every certificate of a batch.
///
/// Serialised with the camelCase keys the upload form posts
/// (`fontSize`, `fontFamily`, `x`, `y`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    /// Font size in pixels.
    #[serde(deserialize_with = "number_or_string")]
    pub font_size: f32,
    pub font_family: String,
    /// Left edge of the text, in pixels from the left of the template.
    #[serde(deserialize_with = "number_or_string")]
    pub x: f32,
    /// Baseline-adjusted vertical position; see [`RenderSettings::text_top`].
    #[serde(deserialize_with = "number_or_string")]
    pub y: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            font_size: 24.0,
            font_family: "Arial".to_string(),
            x: 0.0,
            y: 24.0,
        }
    }
}

impl RenderSettings {
    /// Parse the JSON settings object and validate it.
    pub fn from_json(json: &str) -> BatchResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| BatchError::InvalidSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> BatchResult<()> {
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(BatchError::InvalidSettings(format!(
                "fontSize must be a positive number, got {}",
                self.font_size
            )));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(BatchError::InvalidSettings(
                "x and y must be finite numbers".to_string(),
            ));
        }
        Ok(())
    }

    /// Top of the text box. `y` is treated as a baseline position and the
    /// font size is subtracted to get the top edge; this is a fixed
    /// convention, not derived from font metrics.
    pub fn text_top(&self) -> f32 {
        self.y - self.font_size
    }
}

/// Accept `24`, `24.5` or `"24"` for numeric settings.
fn number_or_string<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n as f32),
        Raw::Text(s) => s
            .trim()
            .parse::<f32>()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {s:?}"))),
    }
}

/// Process-level configuration shared by every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest accepted template width in pixels (default: 500).
    pub max_template_width: u32,
    /// Largest accepted template height in pixels (default: 500).
    pub max_template_height: u32,
    /// Drop the first CSV record before extracting names (default: false).
    pub skip_header: bool,
    /// Delete the template and names files once the batch ends (default: true).
    pub release_inputs: bool,
    /// Load the host's installed fonts into the font manager (default: true).
    pub load_system_fonts: bool,
    /// Extra directory scanned for TTF/OTF files.
    pub fonts_dir: Option<PathBuf>,
    /// DEFLATE level for archive entries, 1-9 (default: 6).
    pub compression_level: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_template_width: MAX_TEMPLATE_DIM,
            max_template_height: MAX_TEMPLATE_DIM,
            skip_header: false,
            release_inputs: true,
            load_system_fonts: true,
            fonts_dir: None,
            compression_level: 6,
        }
    }
}
