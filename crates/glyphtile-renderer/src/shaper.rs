// TextShaper over cosmic-text: fontdb lookup, rustybuzz shaping through
// `Buffer`, swash rasterisation.

use cosmic_text::{
    fontdb, Attrs, Buffer, CacheKey, Family, FontSystem, Metrics, Shaping, Stretch, Style,
    SwashCache, SwashContent, Weight,
};
use glyphtile_core::{FontKey, FontStyle, GlyphBitmap, ShapedGlyph, TextShaper};

/// A face found in the font database.
#[derive(Debug, Clone, PartialEq)]
pub struct CosmicFont {
    pub id: fontdb::ID,
    pub family: String,
    pub weight: Weight,
    pub style: Style,
}

pub struct CosmicShaper {
    font_system: FontSystem,
    swash_cache: SwashCache,
}

impl CosmicShaper {
    /// Shaper over the system fonts.
    pub fn new() -> Self {
        Self::with_font_system(FontSystem::new())
    }

    /// Shaper restricted to the given font files (TTF/OTF bytes).
    pub fn with_fonts(fonts: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mut db = fontdb::Database::new();
        for data in fonts {
            db.load_font_data(data);
        }
        Self::with_font_system(FontSystem::new_with_locale_and_db("en-US".to_string(), db))
    }

    pub fn with_font_system(font_system: FontSystem) -> Self {
        log::info!("Font database: {} faces", font_system.db().len());
        Self {
            font_system,
            swash_cache: SwashCache::new(),
        }
    }

    pub fn load_font_data(&mut self, data: Vec<u8>) {
        self.font_system.db_mut().load_font_data(data);
    }

    pub fn face_count(&self) -> usize {
        self.font_system.db().len()
    }

    fn family(name: &str) -> Family<'_> {
        match name {
            "serif" => Family::Serif,
            "sans-serif" => Family::SansSerif,
            "monospace" => Family::Monospace,
            "cursive" => Family::Cursive,
            "fantasy" => Family::Fantasy,
            name => Family::Name(name),
        }
    }

    fn style(style: FontStyle) -> Style {
        match style {
            FontStyle::Normal => Style::Normal,
            FontStyle::Italic => Style::Italic,
            FontStyle::Oblique => Style::Oblique,
        }
    }
}

impl Default for CosmicShaper {
    fn default() -> Self {
        Self::new()
    }
}

impl TextShaper for CosmicShaper {
    type Font = CosmicFont;
    type GlyphKey = CacheKey;

    fn load_font(&mut self, key: &FontKey) -> Option<CosmicFont> {
        let weight = Weight(key.weight.0);
        let style = Self::style(key.style);
        let families = [Self::family(&key.family)];
        let db = self.font_system.db();
        let id = db.query(&fontdb::Query {
            families: &families,
            weight,
            stretch: Stretch::Normal,
            style,
        })?;
        let face = db.face(id)?;
        let family = face
            .families
            .first()
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| key.family.clone());
        log::debug!("Resolved '{}' to face '{family}'", key.family);
        Some(CosmicFont {
            id,
            family,
            weight,
            style,
        })
    }

    fn fallback_font(&mut self) -> Option<CosmicFont> {
        let sans = FontKey {
            family: "sans-serif".to_string(),
            style: FontStyle::Normal,
            weight: Default::default(),
        };
        if let Some(font) = self.load_font(&sans) {
            return Some(font);
        }
        let face = self.font_system.db().faces().next()?;
        Some(CosmicFont {
            id: face.id,
            family: face.families.first()?.0.clone(),
            weight: face.weight,
            style: face.style,
        })
    }

    fn shape(&mut self, font: &CosmicFont, size: f32, text: &str) -> Vec<ShapedGlyph<CacheKey>> {
        let line_height = (size * 1.2).ceil();
        let metrics = Metrics::new(size, line_height);
        let attrs = Attrs::new()
            .family(Family::Name(&font.family))
            .weight(font.weight)
            .style(font.style);

        let mut buffer = Buffer::new(&mut self.font_system, metrics);
        buffer.set_text(&mut self.font_system, text, attrs, Shaping::Advanced);
        buffer.shape_until_scroll(&mut self.font_system, false);

        let mut glyphs = Vec::new();
        for run in buffer.layout_runs() {
            for glyph in run.glyphs.iter() {
                let physical = glyph.physical((0.0, run.line_y), 1.0);
                glyphs.push(ShapedGlyph {
                    key: physical.cache_key,
                    x: physical.x as f32,
                    y: physical.y as f32,
                    line: run.line_i,
                });
            }
        }
        glyphs
    }

    fn rasterize(&mut self, glyph: CacheKey) -> Option<GlyphBitmap> {
        let image = self
            .swash_cache
            .get_image(&mut self.font_system, glyph)
            .as_ref()?;

        let width = image.placement.width;
        let height = image.placement.height;
        if width == 0 || height == 0 {
            return None;
        }

        let data: Vec<u8> = match image.content {
            SwashContent::Mask => image.data.clone(),
            SwashContent::Color => image
                .data
                .chunks(4)
                .map(|c| c.get(3).copied().unwrap_or(255))
                .collect(),
            SwashContent::SubpixelMask => image
                .data
                .chunks(3)
                .map(|c| {
                    let sum: u16 = c.iter().map(|&v| v as u16).sum();
                    (sum / 3) as u8
                })
                .collect(),
        };

        Some(GlyphBitmap {
            width,
            height,
            left: image.placement.left,
            top: image.placement.top,
            data,
        })
    }
}
