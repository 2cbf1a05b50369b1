// Glyph atlas manager: a bounded pool of reference-counted atlas pages fed
// by the text shaper, shared between tile workers and the render thread.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glyphtile_core::{
    AtlasId, AtlasPageListener, AtlasSet, FontKey, FontStyle, FontWeight, GlyphBitmap,
    GlyphQuadSink, GpuBackend, GpuCapabilities, Rect, TextShaper, TextStyleParams,
    TextureOptions, MAX_ATLASES,
};

use crate::error::LayoutError;
use crate::font_cache::{FontCache, ResolvedFont};
use crate::packer::{AtlasGlyph, GlyphEntry, GlyphPacker};
use crate::render_state::RenderContext;
use crate::sdf;
use crate::texture::{Texture, UploadKind};
use crate::wrap::wrap_text;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasConfig {
    /// Width and height of every atlas page.
    pub page_size: u16,
    /// Border around each glyph bitmap, in pixels.
    pub padding: u16,
    /// Convert glyph coverage to a distance field saturating this many
    /// pixels from the outline. `None` keeps plain coverage.
    pub sdf_radius: Option<f32>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            page_size: 256,
            padding: 3,
            sdf_radius: Some(3.0),
        }
    }
}

// ──────────────────────────────────────────────
// Page pool
// ──────────────────────────────────────────────

#[derive(Debug)]
struct AtlasPage {
    texture: Texture,
    last_used: u64,
}

struct AtlasPool {
    pages: Vec<Option<AtlasPage>>,
    ref_counts: [usize; MAX_ATLASES],
    capabilities: GpuCapabilities,
    sdf_radius: Option<f32>,
    clock: u64,
}

impl AtlasPool {
    fn new(capabilities: GpuCapabilities, sdf_radius: Option<f32>) -> Self {
        Self {
            pages: (0..MAX_ATLASES).map(|_| None).collect(),
            ref_counts: [0; MAX_ATLASES],
            capabilities,
            sdf_radius,
            clock: 0,
        }
    }

    fn page(&self, id: AtlasId) -> Option<&AtlasPage> {
        self.pages.get(id).and_then(Option::as_ref)
    }

    fn page_mut(&mut self, id: AtlasId) -> Option<&mut AtlasPage> {
        self.pages.get_mut(id).and_then(Option::as_mut)
    }

    /// Slot for a new page: the lowest unused id, otherwise the least
    /// recently used page. Locked ids and ids in `exclude` are skipped,
    /// allocated or not. The flag tells whether an existing page is being
    /// reclaimed.
    fn next_page(&self, exclude: AtlasSet) -> Option<(AtlasId, bool)> {
        let free = |id: AtlasId| self.ref_counts[id] == 0 && !exclude.contains(id);
        if let Some(id) = (0..MAX_ATLASES).find(|&id| self.pages[id].is_none() && free(id)) {
            return Some((id, false));
        }
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(id, page)| page.as_ref().map(|page| (id, page.last_used)))
            .filter(|&(id, _)| free(id))
            .min_by_key(|&(_, last_used)| last_used)
            .map(|(id, _)| (id, true))
    }

    fn lock(&mut self, atlases: &AtlasSet) {
        self.clock += 1;
        for id in atlases.iter() {
            self.ref_counts[id] += 1;
            if let Some(page) = self.pages[id].as_mut() {
                page.last_used = self.clock;
            }
        }
    }

    fn release(&mut self, atlases: &AtlasSet) {
        for id in atlases.iter() {
            match self.ref_counts[id].checked_sub(1) {
                Some(count) => self.ref_counts[id] = count,
                None => {
                    log::error!("Atlas {id} released without a matching lock");
                    debug_assert!(
                        self.ref_counts[id] > 0,
                        "reference count underflow on atlas {id}"
                    );
                }
            }
        }
    }

    fn locked(&self) -> AtlasSet {
        (0..MAX_ATLASES)
            .filter(|&id| self.ref_counts[id] > 0)
            .collect()
    }
}

impl AtlasPageListener for AtlasPool {
    fn add_atlas_page(&mut self, id: AtlasId, width: u16, height: u16) -> bool {
        if id >= MAX_ATLASES {
            log::error!("Atlas id {id} is beyond the {MAX_ATLASES} page limit");
            return false;
        }
        if self.ref_counts[id] > 0 {
            log::error!(
                "Atlas {id} is locked by {} layouts, not replacing it",
                self.ref_counts[id]
            );
            return false;
        }

        self.clock += 1;
        let (width, height) = (width as u32, height as u32);
        match self.pages[id].as_mut() {
            Some(page) if page.texture.width() == width && page.texture.height() == height => {
                // Same storage, cleared in place.
                let blank = vec![0; page.texture.data().len()];
                if let Err(e) = page.texture.set_data(&blank) {
                    log::warn!("Failed to clear atlas {id}: {e}");
                }
                page.last_used = self.clock;
            }
            _ => {
                self.pages[id] = Some(AtlasPage {
                    texture: Texture::new(
                        width,
                        height,
                        TextureOptions::ALPHA,
                        false,
                        self.capabilities,
                    ),
                    last_used: self.clock,
                });
            }
        }
        log::debug!("Atlas page {id} ready ({width}x{height})");
        true
    }

    fn add_glyph_bitmap(
        &mut self,
        id: AtlasId,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        bitmap: &[u8],
        padding: u16,
    ) {
        let sdf_radius = self.sdf_radius;
        let clock = self.clock;
        let Some(page) = self.page_mut(id) else {
            log::warn!("Glyph bitmap for unallocated atlas {id}");
            return;
        };

        let (w, h, pad) = (width as usize, height as usize, padding as usize);
        if bitmap.len() < w * h {
            log::warn!(
                "Glyph bitmap holds {} bytes, {width}x{height} needs {}",
                bitmap.len(),
                w * h
            );
            return;
        }

        let padded_w = w + 2 * pad;
        let padded_h = h + 2 * pad;
        let mut staging = vec![0u8; padded_w * padded_h];
        for row in 0..h {
            let dst = (row + pad) * padded_w + pad;
            staging[dst..dst + w].copy_from_slice(&bitmap[row * w..(row + 1) * w]);
        }
        if let Some(radius) = sdf_radius {
            sdf::coverage_to_sdf(&mut staging, padded_w, padded_h, radius);
        }

        let (pw, ph) = (padded_w as u32, padded_h as u32);
        if let Err(e) = page
            .texture
            .set_sub_data(&staging, x as u32, y as u32, pw, ph, pw)
        {
            log::warn!("Failed to write glyph into atlas {id}: {e}");
        }
        page.last_used = clock;
    }
}

// ──────────────────────────────────────────────
// Shared state
// ──────────────────────────────────────────────

struct AtlasState<K> {
    pool: AtlasPool,
    packer: GlyphPacker<K>,
}

impl<K: Copy + Eq + Hash> AtlasState<K> {
    /// Pack `bitmap`, opening or reclaiming pages as needed. Pages in
    /// `in_use` are never reclaimed.
    fn insert_glyph(
        &mut self,
        key: K,
        bitmap: &GlyphBitmap,
        in_use: AtlasSet,
    ) -> Option<AtlasGlyph> {
        if !self.packer.fits_page(bitmap.width, bitmap.height) {
            log::warn!(
                "{}x{} glyph does not fit a {}px atlas page",
                bitmap.width,
                bitmap.height,
                self.packer.page_size()
            );
            return None;
        }

        loop {
            if let Some(glyph) = self.packer.place(
                key,
                bitmap.width,
                bitmap.height,
                bitmap.left,
                bitmap.top,
                &bitmap.data,
                &mut self.pool,
            ) {
                return Some(glyph);
            }

            let Some((id, reclaimed)) = self.pool.next_page(in_use) else {
                log::warn!("All {MAX_ATLASES} atlas pages are locked, dropping glyph");
                return None;
            };
            if reclaimed {
                log::debug!("Reclaiming atlas {id}");
                self.packer.forget_page(id);
            }
            if !self.packer.open_page(id, &mut self.pool) {
                log::warn!("Atlas {id} refused, dropping glyph");
                return None;
            }
        }
    }

    /// Cached entry for `key`, placing it from `rasters` if this layout
    /// rasterised it.
    fn lookup(
        &mut self,
        key: K,
        rasters: &HashMap<K, Option<GlyphBitmap>>,
        in_use: AtlasSet,
    ) -> Lookup {
        match self.packer.get(&key) {
            Some(GlyphEntry::Placed(glyph)) => return Lookup::Placed(glyph),
            Some(GlyphEntry::Blank) => return Lookup::Blank,
            None => {}
        }
        match rasters.get(&key) {
            Some(Some(bitmap)) if bitmap.width > 0 && bitmap.height > 0 => {
                match self.insert_glyph(key, bitmap, in_use) {
                    Some(glyph) => Lookup::Placed(glyph),
                    None => Lookup::Missing,
                }
            }
            Some(_) => {
                self.packer.insert_blank(key);
                Lookup::Blank
            }
            None => Lookup::Evicted,
        }
    }
}

enum Lookup {
    Placed(AtlasGlyph),
    Blank,
    /// No page could take it.
    Missing,
    /// Dropped from the atlas after this layout checked for it.
    Evicted,
}

/// Quads emitted so far by one layout.
struct QuadBatch {
    padding: u16,
    used: AtlasSet,
    bbox: Option<Rect>,
    quad_count: usize,
    missing_glyphs: usize,
}

impl QuadBatch {
    fn new(padding: u16) -> Self {
        Self {
            padding,
            used: AtlasSet::empty(),
            bbox: None,
            quad_count: 0,
            missing_glyphs: 0,
        }
    }

    fn push(&mut self, glyph: &AtlasGlyph, pen_x: f32, pen_y: f32, sink: &mut dyn GlyphQuadSink) {
        self.used.insert(glyph.atlas);
        let quad = glyph.quad(pen_x, pen_y, self.padding);
        let bounds = quad.bounds();
        self.bbox = Some(self.bbox.map_or(bounds, |b| b.union(&bounds)));
        sink.push_glyph(quad);
        self.quad_count += 1;
    }
}

/// Releases the atlas locks held by a lease.
trait ReleaseAtlases: Send + Sync {
    fn release_atlases(&self, atlases: &AtlasSet);
}

impl<K: Send> ReleaseAtlases for Mutex<AtlasState<K>> {
    fn release_atlases(&self, atlases: &AtlasSet) {
        lock_or_recover(self).pool.release(atlases);
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ShaperState<S: TextShaper> {
    shaper: S,
    fonts: FontCache<S::Font>,
}

impl<S: TextShaper> ShaperState<S> {
    fn rasterize(&mut self, keys: Vec<S::GlyphKey>) -> HashMap<S::GlyphKey, Option<GlyphBitmap>> {
        keys.into_iter()
            .map(|key| (key, self.shaper.rasterize(key)))
            .collect()
    }

    fn resolve(&mut self, key: &FontKey) -> Option<S::Font> {
        let ShaperState { shaper, fonts } = self;
        fonts.get_or_load(key, |key| {
            shaper.load_font(key).or_else(|| {
                log::warn!(
                    "Font '{}' ({:?}, {}) unavailable, using fallback",
                    key.family,
                    key.style,
                    key.weight.0
                );
                shaper.fallback_font()
            })
        })
    }
}

// ──────────────────────────────────────────────
// Leases
// ──────────────────────────────────────────────

/// Lock on the atlas pages referenced by one layout. Dropping the lease
/// releases the lock.
#[must_use = "dropping the lease releases its atlas locks"]
pub struct AtlasLease {
    atlases: AtlasSet,
    owner: Option<Arc<dyn ReleaseAtlases>>,
}

impl AtlasLease {
    fn new(atlases: AtlasSet, owner: Arc<dyn ReleaseAtlases>) -> Self {
        Self {
            atlases,
            owner: Some(owner),
        }
    }

    pub fn atlases(&self) -> AtlasSet {
        self.atlases
    }

    /// Give the locks back now instead of at the end of scope.
    pub fn release(self) {}
}

impl Drop for AtlasLease {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            owner.release_atlases(&self.atlases);
        }
    }
}

impl fmt::Debug for AtlasLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtlasLease")
            .field("atlases", &self.atlases)
            .field("held", &self.owner.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct TextLayout {
    pub bbox: Rect,
    pub lease: AtlasLease,
    pub quad_count: usize,
    /// Glyphs dropped because no atlas page could take them.
    pub missing_glyphs: usize,
}

// ──────────────────────────────────────────────
// GlyphAtlasManager
// ──────────────────────────────────────────────

pub struct GlyphAtlasManager<S: TextShaper> {
    config: AtlasConfig,
    atlas: Arc<Mutex<AtlasState<S::GlyphKey>>>,
    shaper: Mutex<ShaperState<S>>,
}

impl<S: TextShaper> GlyphAtlasManager<S> {
    pub fn new(shaper: S, config: AtlasConfig, capabilities: GpuCapabilities) -> Self {
        let state = AtlasState {
            pool: AtlasPool::new(capabilities, config.sdf_radius),
            packer: GlyphPacker::new(config.page_size, config.padding),
        };
        Self {
            config,
            atlas: Arc::new(Mutex::new(state)),
            shaper: Mutex::new(ShaperState {
                shaper,
                fonts: FontCache::default(),
            }),
        }
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    fn atlas(&self) -> MutexGuard<'_, AtlasState<S::GlyphKey>> {
        lock_or_recover(&self.atlas)
    }

    fn shaper(&self) -> MutexGuard<'_, ShaperState<S>> {
        lock_or_recover(&self.shaper)
    }

    /// Run `f` with exclusive access to the shaper.
    pub fn with_shaper<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.shaper().shaper)
    }

    /// Allocate page `id`, or clear it if it exists. Glyphs cached on a
    /// cleared page are forgotten. Returns false if the page is locked or
    /// `id` is out of range.
    pub fn add_atlas_page(&self, id: AtlasId, width: u16, height: u16) -> bool {
        let mut state = self.atlas();
        if !state.pool.add_atlas_page(id, width, height) {
            return false;
        }
        state.packer.forget_page(id);
        true
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_glyph_bitmap(
        &self,
        id: AtlasId,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        bitmap: &[u8],
        padding: u16,
    ) {
        self.atlas()
            .pool
            .add_glyph_bitmap(id, x, y, width, height, bitmap, padding);
    }

    pub fn lock(&self, atlases: &AtlasSet) {
        self.atlas().pool.lock(atlases);
    }

    /// Must pair with an earlier `lock` of the same set.
    pub fn release(&self, atlases: &AtlasSet) {
        self.atlas().pool.release(atlases);
    }

    /// Flush every page's pending pixels. Call once per frame on the
    /// render thread. Returns the number of pages uploaded.
    pub fn update_all<B: GpuBackend>(&self, ctx: &mut RenderContext<B>) -> usize {
        let mut state = self.atlas();
        let mut uploaded = 0;
        for page in state.pool.pages.iter_mut().flatten() {
            if page.texture.update(ctx, 0) != UploadKind::None {
                uploaded += 1;
            }
        }
        uploaded
    }

    pub fn bind<B: GpuBackend>(&self, id: AtlasId, ctx: &mut RenderContext<B>, unit: u32) {
        match self.atlas().pool.page(id) {
            Some(page) => page.texture.bind(ctx, unit),
            None => log::warn!("Bind of unallocated atlas {id}"),
        }
    }

    pub fn resolve_font(
        &self,
        family: &str,
        style: FontStyle,
        weight: FontWeight,
        size: f32,
    ) -> Option<ResolvedFont<S::Font>> {
        let key = FontKey {
            family: family.to_string(),
            style,
            weight,
        };
        let (font, fonts_evicted) = {
            let mut shaper = self.shaper();
            let font = shaper.resolve(&key);
            (font, shaper.fonts.take_evicted())
        };
        if fonts_evicted {
            self.atlas().packer.forget_blanks();
        }
        Some(ResolvedFont { font: font?, size })
    }

    /// Shape `text`, make sure every glyph is in an atlas page and emit one
    /// quad per visible glyph into `sink`. The returned lease keeps the
    /// referenced pages locked until dropped.
    pub fn layout_text(
        &self,
        params: &TextStyleParams,
        text: &str,
        sink: &mut dyn GlyphQuadSink,
    ) -> Result<TextLayout, LayoutError> {
        if text.is_empty() {
            return Err(LayoutError::EmptyText);
        }
        let text = match params.text_wrap {
            Some(columns) if columns > 0 => wrap_text(text, columns as usize),
            _ => text.into(),
        };

        let (shaped, fonts_evicted) = {
            let mut shaper = self.shaper();
            let font = shaper
                .resolve(&params.font_key())
                .ok_or_else(|| LayoutError::NoFont(params.font_family.clone()))?;
            let shaped = shaper.shaper.shape(&font, params.font_size, &text);
            (shaped, shaper.fonts.take_evicted())
        };
        if shaped.is_empty() {
            return Err(LayoutError::NoGlyphs);
        }

        // Rasterise outside the atlas lock.
        let missing: Vec<S::GlyphKey> = {
            let mut state = self.atlas();
            if fonts_evicted {
                state.packer.forget_blanks();
            }
            let mut seen = HashSet::new();
            shaped
                .iter()
                .map(|glyph| glyph.key)
                .filter(|key| state.packer.get(key).is_none() && seen.insert(*key))
                .collect()
        };
        let rasters = if missing.is_empty() {
            HashMap::new()
        } else {
            self.shaper().rasterize(missing)
        };

        let mut batch = QuadBatch::new(self.config.padding);
        let mut evicted = Vec::new();
        let mut line = usize::MAX;
        let mut index_in_line = 0;

        let mut state = self.atlas();
        for glyph in &shaped {
            if glyph.line != line {
                line = glyph.line;
                index_in_line = 0;
            }
            let pen_x = glyph.x + index_in_line as f32 * params.letter_spacing;
            index_in_line += 1;

            match state.lookup(glyph.key, &rasters, batch.used) {
                Lookup::Placed(placed) => batch.push(&placed, pen_x, glyph.y, sink),
                Lookup::Blank => {}
                Lookup::Missing => batch.missing_glyphs += 1,
                Lookup::Evicted => evicted.push((glyph.key, pen_x, glyph.y)),
            }
        }
        // Locked before the guard drops so a retry cannot reclaim them.
        state.pool.lock(&batch.used);
        drop(state);
        let owner: Arc<dyn ReleaseAtlases> = self.atlas.clone();
        let mut lease = AtlasLease::new(batch.used, owner);

        if !evicted.is_empty() {
            log::debug!("Rasterising {} evicted glyphs again", evicted.len());
            let mut seen = HashSet::new();
            let keys = evicted
                .iter()
                .map(|&(key, _, _)| key)
                .filter(|key| seen.insert(*key))
                .collect();
            let rasters = self.shaper().rasterize(keys);

            let mut state = self.atlas();
            for &(key, pen_x, pen_y) in &evicted {
                match state.lookup(key, &rasters, batch.used) {
                    Lookup::Placed(placed) => batch.push(&placed, pen_x, pen_y, sink),
                    Lookup::Blank => {}
                    Lookup::Missing | Lookup::Evicted => batch.missing_glyphs += 1,
                }
            }
            let extra = AtlasSet::from_bits(batch.used.bits() & !lease.atlases().bits());
            state.pool.lock(&extra);
            lease.atlases = batch.used;
        }

        let Some(bbox) = batch.bbox else {
            return Err(LayoutError::NoGlyphs);
        };
        if batch.missing_glyphs > 0 {
            log::warn!("Laid out '{text}' without {} glyphs", batch.missing_glyphs);
        }
        Ok(TextLayout {
            bbox,
            lease,
            quad_count: batch.quad_count,
            missing_glyphs: batch.missing_glyphs,
        })
    }

    /// Number of allocated atlas pages.
    pub fn page_count(&self) -> usize {
        self.atlas().pool.pages.iter().flatten().count()
    }

    pub fn ref_count(&self, id: AtlasId) -> usize {
        self.atlas().pool.ref_counts.get(id).copied().unwrap_or(0)
    }

    /// Ids with a non-zero reference count.
    pub fn locked(&self) -> AtlasSet {
        self.atlas().pool.locked()
    }

    /// Number of glyphs currently cached in atlas pages, blanks included.
    pub fn glyph_count(&self) -> usize {
        self.atlas().packer.glyph_count()
    }

    /// Copy of a page's CPU-side pixels.
    pub fn page_pixels(&self, id: AtlasId) -> Option<Vec<u8>> {
        self.atlas()
            .pool
            .page(id)
            .map(|page| page.texture.data().to_vec())
    }
}
