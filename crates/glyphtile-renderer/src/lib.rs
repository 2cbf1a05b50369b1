// GPU texture resources and glyph atlas management
// Implements glyphtile_core::GpuBackend using wgpu and TextShaper using cosmic-text

mod atlas;
mod cube;
mod decode;
mod dirty;
mod error;
mod font_cache;
mod packer;
mod render_state;
mod sdf;
mod shaper;
mod texture;
mod wgpu_backend;
mod wrap;

#[cfg(test)]
mod testing;

pub use atlas::{AtlasConfig, AtlasLease, GlyphAtlasManager, TextLayout};
pub use cube::{face_at, CubeMapFace, CubeMapTexture, CROSS_LAYOUT};
pub use decode::{decode_rgba, read_rgba, DecodedImage};
pub use dirty::{DirtyRange, DirtyRanges};
pub use error::{CubeMapError, ImageError, LayoutError, TextureError};
pub use font_cache::{FontCache, ResolvedFont, FONT_CACHE_SIZE};
pub use packer::{AtlasGlyph, GlyphEntry, GlyphPacker};
pub use render_state::{GpuTexture, ReleaseQueue, RenderContext};
pub use sdf::coverage_to_sdf;
pub use shaper::{CosmicFont, CosmicShaper};
pub use texture::{Texture, UploadKind};
pub use wgpu_backend::WgpuBackend;
pub use wrap::wrap_text;
