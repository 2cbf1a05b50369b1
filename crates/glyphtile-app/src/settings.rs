// Settings persistence: driver configuration in the platform config dir,
// e.g. ~/.config/glyphtile/settings.json on Linux.

use std::path::PathBuf;

use glyphtile_core::{FontStyle, FontWeight, TextStyleParams};
use glyphtile_renderer::AtlasConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphtileSettings {
    #[serde(default)]
    pub atlas: AtlasSettings,
    #[serde(default)]
    pub font: FontSettings,
    /// Tile-worker threads laying out labels in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Frames to simulate before exiting.
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    /// Horizontal-cross skybox image uploaded as a cube map.
    #[serde(default)]
    pub cube_map: Option<PathBuf>,
}

impl Default for GlyphtileSettings {
    fn default() -> Self {
        Self {
            atlas: AtlasSettings::default(),
            font: FontSettings::default(),
            workers: default_workers(),
            frames: default_frames(),
            labels: default_labels(),
            cube_map: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

fn default_frames() -> u32 {
    3
}

fn default_labels() -> Vec<String> {
    [
        "Main Street",
        "Harbour Front",
        "Old Town",
        "Central Station",
        "Riverside Park",
        "Market Square",
        "North Shore Boulevard",
        "Université",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u16,
    #[serde(default = "default_padding")]
    pub padding: u16,
    #[serde(default = "default_true")]
    pub sdf: bool,
    #[serde(default = "default_sdf_radius")]
    pub sdf_radius: f32,
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            padding: default_padding(),
            sdf: true,
            sdf_radius: default_sdf_radius(),
        }
    }
}

fn default_page_size() -> u16 {
    256
}

fn default_padding() -> u16 {
    3
}

fn default_true() -> bool {
    true
}

fn default_sdf_radius() -> f32 {
    3.0
}

impl AtlasSettings {
    pub fn to_config(&self) -> AtlasConfig {
        AtlasConfig {
            page_size: self.page_size.max(16),
            padding: self.padding,
            sdf_radius: (self.sdf && self.sdf_radius > 0.0).then_some(self.sdf_radius),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSettings {
    #[serde(default = "default_family")]
    pub family: String,
    /// "normal", "italic" or "oblique".
    #[serde(default = "default_keyword")]
    pub style: String,
    /// CSS keyword or numeric weight.
    #[serde(default = "default_keyword")]
    pub weight: String,
    #[serde(default = "default_font_size")]
    pub size: f32,
    #[serde(default)]
    pub letter_spacing: f32,
    #[serde(default)]
    pub text_wrap: Option<u32>,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            family: default_family(),
            style: default_keyword(),
            weight: default_keyword(),
            size: default_font_size(),
            letter_spacing: 0.0,
            text_wrap: None,
        }
    }
}

fn default_family() -> String {
    "sans-serif".to_string()
}

fn default_keyword() -> String {
    "normal".to_string()
}

fn default_font_size() -> f32 {
    16.0
}

impl FontSettings {
    /// Resolve keywords into style parameters; unknown values fall back to
    /// normal with a warning.
    pub fn to_style(&self) -> TextStyleParams {
        let font_style = FontStyle::parse(&self.style).unwrap_or_else(|| {
            log::warn!("Unknown font style '{}', using normal", self.style);
            FontStyle::Normal
        });
        let font_weight = FontWeight::parse(&self.weight).unwrap_or_else(|| {
            log::warn!("Unknown font weight '{}', using normal", self.weight);
            FontWeight::NORMAL
        });
        TextStyleParams {
            font_family: self.family.clone(),
            font_style,
            font_weight,
            font_size: self.size,
            text_wrap: self.text_wrap,
            letter_spacing: self.letter_spacing,
        }
    }
}

fn settings_path() -> Option<PathBuf> {
    let config_dir = dirs::config_dir()?;
    Some(config_dir.join("glyphtile").join("settings.json"))
}

pub fn parse_settings(data: &str) -> Result<GlyphtileSettings, serde_json::Error> {
    serde_json::from_str(data)
}

pub fn load_settings() -> GlyphtileSettings {
    let path = match settings_path() {
        Some(p) => p,
        None => return GlyphtileSettings::default(),
    };

    match std::fs::read_to_string(&path) {
        Ok(data) => match parse_settings(&data) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to parse {}: {}", path.display(), e);
                GlyphtileSettings::default()
            }
        },
        Err(_) => {
            let settings = GlyphtileSettings::default();
            save_settings(&settings);
            settings
        }
    }
}

pub fn save_settings(settings: &GlyphtileSettings) {
    let path = match settings_path() {
        Some(p) => p,
        None => {
            log::warn!("Cannot determine settings path");
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::error!("Failed to create config dir {}: {}", parent.display(), e);
            return;
        }
    }

    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                log::error!("Failed to write {}: {}", path.display(), e);
            } else {
                log::info!("Wrote default settings to {}", path.display());
            }
        }
        Err(e) => {
            log::error!("Failed to serialize settings: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings = parse_settings("{}").unwrap();
        assert_eq!(settings, GlyphtileSettings::default());
        assert_eq!(settings.atlas.to_config(), AtlasConfig::default());
    }

    #[test]
    fn test_partial_sections_fill_missing_fields() {
        let settings = parse_settings(
            r#"{ "atlas": { "page_size": 512, "sdf": false }, "font": { "weight": "bold" } }"#,
        )
        .unwrap();
        let config = settings.atlas.to_config();
        assert_eq!(config.page_size, 512);
        assert_eq!(config.padding, 3);
        assert_eq!(config.sdf_radius, None);
        assert_eq!(settings.font.to_style().font_weight, FontWeight::BOLD);
        assert_eq!(settings.font.family, "sans-serif");
    }

    #[test]
    fn test_unknown_keywords_fall_back_to_normal() {
        let font = FontSettings {
            style: "slanted".to_string(),
            weight: "heaviest".to_string(),
            ..FontSettings::default()
        };
        let style = font.to_style();
        assert_eq!(style.font_style, FontStyle::Normal);
        assert_eq!(style.font_weight, FontWeight::NORMAL);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(parse_settings("{ \"workers\": \"many\" }").is_err());
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut settings = GlyphtileSettings::default();
        settings.cube_map = Some(PathBuf::from("/tmp/sky.png"));
        settings.font.text_wrap = Some(12);
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(parse_settings(&json).unwrap(), settings);
    }
}
