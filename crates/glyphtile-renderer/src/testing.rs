// Test doubles: a backend that records every GPU call and a shaper with
// fixed advances, so tests need neither a GPU nor system fonts.

use glyphtile_core::{
    FontKey, GlyphBitmap, GpuBackend, GpuCapabilities, ImageTarget, PixelFormat, ShapedGlyph,
    TextShaper, TextureHandle, TextureOptions, TextureTarget,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GpuCall {
    Create {
        handle: TextureHandle,
        target: TextureTarget,
    },
    Delete {
        handle: TextureHandle,
    },
    Bind {
        unit: u32,
        handle: Option<TextureHandle>,
    },
    UploadImage {
        handle: TextureHandle,
        image: ImageTarget,
        width: u32,
        height: u32,
        mipmaps: bool,
        data: Vec<u8>,
    },
    UploadRows {
        handle: TextureHandle,
        y: u32,
        height: u32,
        data: Vec<u8>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    calls: Vec<GpuCall>,
    next_handle: u32,
    capabilities: GpuCapabilities,
}

impl RecordingBackend {
    pub(crate) fn with_capabilities(capabilities: GpuCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    pub(crate) fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Calls that moved pixels to the GPU.
    pub(crate) fn uploads(&self) -> usize {
        self.count(|c| matches!(c, GpuCall::UploadImage { .. } | GpuCall::UploadRows { .. }))
    }

    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }
}

impl GpuBackend for RecordingBackend {
    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities
    }

    fn create_texture(
        &mut self,
        target: TextureTarget,
        _options: &TextureOptions,
    ) -> Option<TextureHandle> {
        self.next_handle += 1;
        let handle = TextureHandle::new(self.next_handle)?;
        self.calls.push(GpuCall::Create { handle, target });
        Some(handle)
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        self.calls.push(GpuCall::Delete { handle });
    }

    fn bind_texture(&mut self, unit: u32, _target: TextureTarget, handle: Option<TextureHandle>) {
        self.calls.push(GpuCall::Bind { unit, handle });
    }

    fn upload_image(
        &mut self,
        handle: TextureHandle,
        image: ImageTarget,
        width: u32,
        height: u32,
        _options: &TextureOptions,
        data: &[u8],
        generate_mipmaps: bool,
    ) {
        self.calls.push(GpuCall::UploadImage {
            handle,
            image,
            width,
            height,
            mipmaps: generate_mipmaps,
            data: data.to_vec(),
        });
    }

    fn upload_rows(
        &mut self,
        handle: TextureHandle,
        y: u32,
        _width: u32,
        height: u32,
        _format: PixelFormat,
        data: &[u8],
    ) {
        self.calls.push(GpuCall::UploadRows {
            handle,
            y,
            height,
            data: data.to_vec(),
        });
    }
}

/// Called with each character before it is rasterised.
pub(crate) type RasterHook = Box<dyn FnMut(char) + Send>;

/// Every character is one glyph with a fixed advance; spaces have no ink.
pub(crate) struct FixedShaper {
    pub(crate) families: Vec<String>,
    pub(crate) has_fallback: bool,
    pub(crate) glyph_width: u32,
    pub(crate) glyph_height: u32,
    pub(crate) rasterized: usize,
    pub(crate) loads: usize,
    pub(crate) on_rasterize: Option<RasterHook>,
}

impl Default for FixedShaper {
    fn default() -> Self {
        Self {
            families: vec!["sans-serif".to_string(), "serif".to_string()],
            has_fallback: true,
            glyph_width: 4,
            glyph_height: 6,
            rasterized: 0,
            loads: 0,
            on_rasterize: None,
        }
    }
}

impl FixedShaper {
    pub(crate) fn with_glyph_size(width: u32, height: u32) -> Self {
        Self {
            glyph_width: width,
            glyph_height: height,
            ..Self::default()
        }
    }
}

impl TextShaper for FixedShaper {
    type Font = String;
    type GlyphKey = (char, u32);

    fn load_font(&mut self, key: &FontKey) -> Option<String> {
        self.loads += 1;
        self.families
            .iter()
            .find(|family| **family == key.family)
            .cloned()
    }

    fn fallback_font(&mut self) -> Option<String> {
        self.has_fallback.then(|| "fallback".to_string())
    }

    fn shape(&mut self, _font: &String, size: f32, text: &str) -> Vec<ShapedGlyph<(char, u32)>> {
        let advance = size * 0.5;
        let mut glyphs = Vec::new();
        for (line, content) in text.split('\n').enumerate() {
            let baseline = size * (line as f32 + 1.0);
            for (column, character) in content.chars().enumerate() {
                glyphs.push(ShapedGlyph {
                    key: (character, size as u32),
                    x: column as f32 * advance,
                    y: baseline,
                    line,
                });
            }
        }
        glyphs
    }

    fn rasterize(&mut self, glyph: (char, u32)) -> Option<GlyphBitmap> {
        self.rasterized += 1;
        if let Some(hook) = self.on_rasterize.as_mut() {
            hook(glyph.0);
        }
        if glyph.0.is_whitespace() {
            return None;
        }
        let size = (self.glyph_width * self.glyph_height) as usize;
        Some(GlyphBitmap {
            width: self.glyph_width,
            height: self.glyph_height,
            left: 0,
            top: self.glyph_height as i32,
            data: vec![(glyph.0 as u32 % 250) as u8 + 1; size],
        })
    }
}
