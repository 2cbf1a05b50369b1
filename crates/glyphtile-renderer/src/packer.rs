// Shelf packing of glyph bitmaps into fixed-size atlas pages.

use std::collections::HashMap;
use std::hash::Hash;

use glyphtile_core::{AtlasId, AtlasPageListener, GlyphQuad, QuadCorner};

/// Gap left between neighbouring glyphs on a shelf and between shelves.
const GUTTER: u32 = 1;

/// Placement of one glyph in an atlas page. `x`, `y`, `width`, `height`
/// cover the padded region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasGlyph {
    pub atlas: AtlasId,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Bearing of the unpadded bitmap relative to the pen position.
    pub left: i32,
    pub top: i32,
}

impl AtlasGlyph {
    /// Quad for this glyph drawn with its pen at `(pen_x, pen_y)`.
    pub fn quad(&self, pen_x: f32, pen_y: f32, padding: u16) -> GlyphQuad {
        let x0 = pen_x + self.left as f32 - padding as f32;
        let y0 = pen_y - self.top as f32 - padding as f32;
        let x1 = x0 + self.width as f32;
        let y1 = y0 + self.height as f32;
        let (u0, v0) = (self.x, self.y);
        let (u1, v1) = (self.x + self.width, self.y + self.height);
        GlyphQuad {
            atlas: self.atlas,
            corners: [
                QuadCorner { pos: [x0, y0], uv: [u0, v0] },
                QuadCorner { pos: [x1, y0], uv: [u1, v0] },
                QuadCorner { pos: [x1, y1], uv: [u1, v1] },
                QuadCorner { pos: [x0, y1], uv: [u0, v1] },
            ],
        }
    }
}

/// Cached result of rasterising a glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphEntry {
    /// No ink (whitespace); nothing to draw.
    Blank,
    Placed(AtlasGlyph),
}

pub struct GlyphPacker<K> {
    page_size: u16,
    padding: u16,
    current: Option<AtlasId>,
    cursor_x: u32,
    cursor_y: u32,
    row_height: u32,
    glyphs: HashMap<K, GlyphEntry>,
}

impl<K: Copy + Eq + Hash> GlyphPacker<K> {
    pub fn new(page_size: u16, padding: u16) -> Self {
        Self {
            page_size,
            padding,
            current: None,
            cursor_x: 0,
            cursor_y: 0,
            row_height: 0,
            glyphs: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    pub fn padding(&self) -> u16 {
        self.padding
    }

    /// Page new glyphs are packed into.
    pub fn current_page(&self) -> Option<AtlasId> {
        self.current
    }

    pub fn get(&self, key: &K) -> Option<GlyphEntry> {
        self.glyphs.get(key).copied()
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    pub fn insert_blank(&mut self, key: K) {
        self.glyphs.insert(key, GlyphEntry::Blank);
    }

    /// Drop cached whitespace entries. They hold no texels, so only a
    /// change of fonts makes them worth discarding.
    pub fn forget_blanks(&mut self) {
        let before = self.glyphs.len();
        self.glyphs
            .retain(|_, entry| matches!(entry, GlyphEntry::Placed(_)));
        log::debug!("Forgot {} blank glyphs", before - self.glyphs.len());
    }

    /// Whether a `width` x `height` bitmap plus padding fits on an empty page.
    pub fn fits_page(&self, width: u32, height: u32) -> bool {
        let padded_w = width + 2 * self.padding as u32;
        let padded_h = height + 2 * self.padding as u32;
        padded_w <= self.page_size as u32 && padded_h <= self.page_size as u32
    }

    /// Start packing into `id`, asking the listener for a fresh page.
    /// Returns false if the listener refused it; there is then no current
    /// page.
    pub fn open_page(&mut self, id: AtlasId, listener: &mut dyn AtlasPageListener) -> bool {
        if !listener.add_atlas_page(id, self.page_size, self.page_size) {
            self.current = None;
            return false;
        }
        self.current = Some(id);
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.row_height = 0;
        true
    }

    /// Drop every glyph placed on `id`; its texels are about to be reused.
    pub fn forget_page(&mut self, id: AtlasId) {
        let before = self.glyphs.len();
        self.glyphs.retain(|_, entry| match entry {
            GlyphEntry::Placed(glyph) => glyph.atlas != id,
            GlyphEntry::Blank => true,
        });
        if self.current == Some(id) {
            self.current = None;
        }
        log::debug!("Forgot {} glyphs on atlas {id}", before - self.glyphs.len());
    }

    /// Reserve room for a padded glyph on the current page. `None` when
    /// there is no page or the page is full.
    fn allocate(&mut self, width: u32, height: u32) -> Option<(AtlasId, u32, u32)> {
        let id = self.current?;
        let size = self.page_size as u32;

        // Move to next row if needed
        if self.cursor_x + width > size {
            self.cursor_x = 0;
            self.cursor_y += self.row_height + GUTTER;
            self.row_height = 0;
        }
        if self.cursor_y + height > size {
            return None;
        }

        let (x, y) = (self.cursor_x, self.cursor_y);
        self.cursor_x += width + GUTTER;
        if height > self.row_height {
            self.row_height = height;
        }
        Some((id, x, y))
    }

    /// Pack a `width` x `height` bitmap on the current page and hand it to
    /// the listener. Returns `None` if the current page has no room left.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        key: K,
        width: u32,
        height: u32,
        left: i32,
        top: i32,
        bitmap: &[u8],
        listener: &mut dyn AtlasPageListener,
    ) -> Option<AtlasGlyph> {
        let padded_w = width + 2 * self.padding as u32;
        let padded_h = height + 2 * self.padding as u32;
        let (atlas, x, y) = self.allocate(padded_w, padded_h)?;

        // Coordinates are bounded by the u16 page size.
        let glyph = AtlasGlyph {
            atlas,
            x: x as u16,
            y: y as u16,
            width: padded_w as u16,
            height: padded_h as u16,
            left,
            top,
        };
        listener.add_glyph_bitmap(
            atlas,
            glyph.x,
            glyph.y,
            width as u16,
            height as u16,
            bitmap,
            self.padding,
        );
        self.glyphs.insert(key, GlyphEntry::Placed(glyph));
        Some(glyph)
    }
}
