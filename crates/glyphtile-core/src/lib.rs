use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU32;

// ──────────────────────────────────────────────
// Geometry
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_min_max(min: Vec2, max: Vec2) -> Self {
        Self::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    pub fn max(&self) -> Vec2 {
        Vec2::new(self.x + self.width, self.y + self.height)
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let max = self.max();
        let other_max = other.max();
        Rect::from_min_max(
            Vec2::new(self.x.min(other.x), self.y.min(other.y)),
            Vec2::new(max.x.max(other_max.x), max.y.max(other_max.y)),
        )
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

pub fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

// ──────────────────────────────────────────────
// Texture configuration
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Alpha,
    Luminance,
    LuminanceAlpha,
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Alpha | PixelFormat::Luminance => 1,
            PixelFormat::LuminanceAlpha => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl FilterMode {
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, FilterMode::Nearest | FilterMode::Linear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureFiltering {
    pub min: FilterMode,
    pub mag: FilterMode,
}

impl TextureFiltering {
    pub const LINEAR: Self = Self {
        min: FilterMode::Linear,
        mag: FilterMode::Linear,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureWrapping {
    pub s: WrapMode,
    pub t: WrapMode,
}

impl TextureWrapping {
    pub const CLAMP: Self = Self {
        s: WrapMode::ClampToEdge,
        t: WrapMode::ClampToEdge,
    };

    pub fn is_repeat(&self) -> bool {
        self.s == WrapMode::Repeat || self.t == WrapMode::Repeat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureOptions {
    pub internal_format: PixelFormat,
    pub format: PixelFormat,
    pub filtering: TextureFiltering,
    pub wrapping: TextureWrapping,
}

impl TextureOptions {
    /// Single channel, linear, clamped: the layout used by glyph atlas pages.
    pub const ALPHA: Self = Self {
        internal_format: PixelFormat::Alpha,
        format: PixelFormat::Alpha,
        filtering: TextureFiltering::LINEAR,
        wrapping: TextureWrapping::CLAMP,
    };

    pub fn bytes_per_pixel(&self) -> usize {
        self.internal_format.bytes_per_pixel()
    }
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            internal_format: PixelFormat::Rgba,
            format: PixelFormat::Rgba,
            filtering: TextureFiltering::LINEAR,
            wrapping: TextureWrapping::CLAMP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    CubeMap,
}

/// Cube directions, in the order faces are stored and uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Array layer of this face in a cube texture.
    pub fn layer(self) -> u32 {
        match self {
            CubeFace::PositiveX => 0,
            CubeFace::NegativeX => 1,
            CubeFace::PositiveY => 2,
            CubeFace::NegativeY => 3,
            CubeFace::PositiveZ => 4,
            CubeFace::NegativeZ => 5,
        }
    }
}

/// Image slot written by a full upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTarget {
    Texture2D,
    CubeFace(CubeFace),
}

// ──────────────────────────────────────────────
// Trait: GpuBackend
// ──────────────────────────────────────────────

/// Opaque GPU texture name. Never zero; an absent texture is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(NonZeroU32);

impl TextureHandle {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// Non-power-of-two textures may use mipmaps and repeat wrapping.
    pub npot_textures: bool,
    pub max_texture_size: u32,
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self {
            npot_textures: true,
            max_texture_size: 4096,
        }
    }
}

/// The raw texture calls a graphics API must provide.
/// Render-state caching (bind deduplication, context generations) lives
/// above this trait, so implementations issue every call they receive.
pub trait GpuBackend {
    fn capabilities(&self) -> GpuCapabilities;

    fn create_texture(
        &mut self,
        target: TextureTarget,
        options: &TextureOptions,
    ) -> Option<TextureHandle>;

    fn delete_texture(&mut self, handle: TextureHandle);

    fn bind_texture(&mut self, unit: u32, target: TextureTarget, handle: Option<TextureHandle>);

    /// (Re)allocate storage for one image of `handle` and fill it with `data`.
    #[allow(clippy::too_many_arguments)]
    fn upload_image(
        &mut self,
        handle: TextureHandle,
        image: ImageTarget,
        width: u32,
        height: u32,
        options: &TextureOptions,
        data: &[u8],
        generate_mipmaps: bool,
    );

    /// Overwrite rows `y..y + height` over the full `width` of the texture.
    fn upload_rows(
        &mut self,
        handle: TextureHandle,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &[u8],
    );
}

// ──────────────────────────────────────────────
// Glyph atlases
// ──────────────────────────────────────────────

pub type AtlasId = usize;

/// Upper bound on concurrently live atlas pages.
pub const MAX_ATLASES: usize = 64;

/// Fixed-width set of atlas ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AtlasSet(u64);

impl AtlasSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Returns false if `id` is out of range.
    pub fn insert(&mut self, id: AtlasId) -> bool {
        if id >= MAX_ATLASES {
            return false;
        }
        self.0 |= 1 << id;
        true
    }

    pub fn remove(&mut self, id: AtlasId) {
        if id < MAX_ATLASES {
            self.0 &= !(1 << id);
        }
    }

    pub fn contains(&self, id: AtlasId) -> bool {
        id < MAX_ATLASES && self.0 & (1 << id) != 0
    }

    pub fn union(&self, other: &AtlasSet) -> AtlasSet {
        AtlasSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = AtlasId> {
        let bits = self.0;
        (0..MAX_ATLASES).filter(move |id| bits & (1 << id) != 0)
    }
}

impl FromIterator<AtlasId> for AtlasSet {
    fn from_iter<I: IntoIterator<Item = AtlasId>>(iter: I) -> Self {
        let mut set = AtlasSet::empty();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadCorner {
    pub pos: [f32; 2],
    /// Texel coordinates in the atlas page.
    pub uv: [u16; 2],
}

/// One positioned glyph, textured from a single atlas page.
/// Corners are top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    pub atlas: AtlasId,
    pub corners: [QuadCorner; 4],
}

impl GlyphQuad {
    pub fn bounds(&self) -> Rect {
        let min = self.corners[0].pos;
        let max = self.corners[2].pos;
        Rect::from_min_max(Vec2::new(min[0], min[1]), Vec2::new(max[0], max[1]))
    }
}

/// Receives atlas page requests and glyph bitmaps from the glyph packer.
pub trait AtlasPageListener {
    /// Returns false if the page was refused; nothing may be packed into it.
    fn add_atlas_page(&mut self, id: AtlasId, width: u16, height: u16) -> bool;

    /// `bitmap` is `width * height` bytes, written at `(x + padding, y + padding)`.
    #[allow(clippy::too_many_arguments)]
    fn add_glyph_bitmap(
        &mut self,
        id: AtlasId,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        bitmap: &[u8],
        padding: u16,
    );
}

/// Receives one quad per visible glyph of a laid out string.
pub trait GlyphQuadSink {
    fn push_glyph(&mut self, quad: GlyphQuad);
}

impl GlyphQuadSink for Vec<GlyphQuad> {
    fn push_glyph(&mut self, quad: GlyphQuad) {
        self.push(quad);
    }
}

// ──────────────────────────────────────────────
// Text styling
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

impl FontStyle {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "regular" => Some(FontStyle::Normal),
            "italic" => Some(FontStyle::Italic),
            "oblique" => Some(FontStyle::Oblique),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const NORMAL: Self = Self(400);
    pub const BOLD: Self = Self(700);

    /// Accepts CSS keywords or a numeric weight in 1..=1000.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "regular" => Some(Self::NORMAL),
            "bold" => Some(Self::BOLD),
            "thin" => Some(Self(100)),
            "light" => Some(Self(300)),
            "medium" => Some(Self(500)),
            "semibold" => Some(Self(600)),
            "extrabold" => Some(Self(800)),
            "black" => Some(Self(900)),
            other => match other.parse::<u16>() {
                Ok(weight) if (1..=1000).contains(&weight) => Some(Self(weight)),
                _ => None,
            },
        }
    }
}

impl Default for FontWeight {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Identity of a resolved font face, independent of size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontKey {
    pub family: String,
    pub style: FontStyle,
    pub weight: FontWeight,
}

/// Text styling, already resolved from the stylesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyleParams {
    pub font_family: String,
    pub font_style: FontStyle,
    pub font_weight: FontWeight,
    /// Pixels.
    pub font_size: f32,
    /// Maximum line length in display columns.
    pub text_wrap: Option<u32>,
    /// Extra pixels between consecutive glyphs of a line.
    pub letter_spacing: f32,
}

impl Default for TextStyleParams {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".to_string(),
            font_style: FontStyle::Normal,
            font_weight: FontWeight::NORMAL,
            font_size: 16.0,
            text_wrap: None,
            letter_spacing: 0.0,
        }
    }
}

impl TextStyleParams {
    pub fn font_key(&self) -> FontKey {
        FontKey {
            family: self.font_family.clone(),
            style: self.font_style,
            weight: self.font_weight,
        }
    }
}

// ──────────────────────────────────────────────
// Trait: TextShaper
// ──────────────────────────────────────────────

/// A glyph positioned by the shaper. `(x, y)` is the pen position on the
/// baseline, y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph<K> {
    pub key: K,
    pub x: f32,
    pub y: f32,
    pub line: usize,
}

/// Coverage bitmap of one glyph. The top-left texel sits at
/// `(pen.x + left, pen.y - top)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub data: Vec<u8>,
}

/// External text shaping engine: font lookup, glyph selection and
/// positioning, rasterisation.
pub trait TextShaper: Send {
    type Font: Clone + fmt::Debug + Send;
    type GlyphKey: Copy + Eq + Hash + fmt::Debug + Send + 'static;

    fn load_font(&mut self, key: &FontKey) -> Option<Self::Font>;

    /// Face used when a requested family cannot be loaded.
    fn fallback_font(&mut self) -> Option<Self::Font>;

    fn shape(
        &mut self,
        font: &Self::Font,
        size: f32,
        text: &str,
    ) -> Vec<ShapedGlyph<Self::GlyphKey>>;

    /// `None` for glyphs without ink (spaces).
    fn rasterize(&mut self, glyph: Self::GlyphKey) -> Option<GlyphBitmap>;
}
