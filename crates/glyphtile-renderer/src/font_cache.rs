// Small most-recently-used cache of resolved font faces.

use glyphtile_core::FontKey;

pub const FONT_CACHE_SIZE: usize = 3;

/// Font face resolved for a style, at the requested size.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFont<F> {
    pub font: F,
    pub size: f32,
}

/// Entries are kept most-recently-used first; a miss on a full cache
/// replaces the last one.
#[derive(Debug)]
pub struct FontCache<F> {
    entries: Vec<(FontKey, F)>,
    capacity: usize,
    evicted: bool,
}

impl<F: Clone> Default for FontCache<F> {
    fn default() -> Self {
        Self::new(FONT_CACHE_SIZE)
    }
}

impl<F: Clone> FontCache<F> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            evicted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &FontKey) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Cached face for `key`, or the result of `load`. A failed load is
    /// not cached so the next request tries again.
    pub fn get_or_load(
        &mut self,
        key: &FontKey,
        load: impl FnOnce(&FontKey) -> Option<F>,
    ) -> Option<F> {
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == key) {
            let entry = self.entries.remove(pos);
            let font = entry.1.clone();
            self.entries.insert(0, entry);
            return Some(font);
        }

        let font = load(key)?;
        if self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.pop() {
                log::debug!("Font cache evicted '{}'", evicted.family);
                self.evicted = true;
            }
        }
        self.entries.insert(0, (key.clone(), font.clone()));
        Some(font)
    }

    /// Whether a face was evicted since the last call.
    pub fn take_evicted(&mut self) -> bool {
        std::mem::take(&mut self.evicted)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
