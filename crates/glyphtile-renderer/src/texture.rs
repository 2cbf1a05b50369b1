// 2D texture with a CPU-side mirror, dirty row tracking and lazy upload.

use std::path::Path;

use glyphtile_core::{
    is_power_of_two, GpuBackend, GpuCapabilities, ImageTarget, PixelFormat, TextureFiltering,
    TextureHandle, TextureOptions, TextureTarget,
};

use crate::decode::{self, DecodedImage};
use crate::dirty::{DirtyRange, DirtyRanges};
use crate::error::{ImageError, TextureError};
use crate::render_state::{GpuTexture, RenderContext};

/// GPU work performed by one `update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    None,
    /// Storage (re)allocated from the whole mirror.
    Full,
    /// Number of row ranges re-uploaded.
    Partial(usize),
}

#[derive(Debug)]
pub struct Texture {
    width: u32,
    height: u32,
    options: TextureOptions,
    generate_mipmaps: bool,
    capabilities: GpuCapabilities,
    /// Authoritative pixels, `width * height * bpp` bytes.
    data: Vec<u8>,
    dirty: DirtyRanges,
    should_resize: bool,
    gpu: Option<GpuTexture>,
}

impl Texture {
    pub fn new(
        width: u32,
        height: u32,
        options: TextureOptions,
        generate_mipmaps: bool,
        capabilities: GpuCapabilities,
    ) -> Self {
        let mut texture = Self {
            width: 0,
            height: 0,
            options,
            generate_mipmaps,
            capabilities,
            data: Vec::new(),
            dirty: DirtyRanges::new(),
            should_resize: false,
            gpu: None,
        };
        texture.resize(width, height);
        texture
    }

    /// Decode PNG/JPEG bytes. Bad input is logged and yields an empty texture.
    pub fn from_encoded(
        bytes: &[u8],
        options: TextureOptions,
        generate_mipmaps: bool,
        capabilities: GpuCapabilities,
    ) -> Self {
        Self::from_decoded(decode::decode_rgba(bytes), options, generate_mipmaps, capabilities)
    }

    pub fn from_file(
        path: &Path,
        options: TextureOptions,
        generate_mipmaps: bool,
        capabilities: GpuCapabilities,
    ) -> Self {
        Self::from_decoded(decode::read_rgba(path), options, generate_mipmaps, capabilities)
    }

    fn from_decoded(
        decoded: Result<DecodedImage, ImageError>,
        options: TextureOptions,
        generate_mipmaps: bool,
        capabilities: GpuCapabilities,
    ) -> Self {
        let options = TextureOptions {
            internal_format: PixelFormat::Rgba,
            format: PixelFormat::Rgba,
            ..options
        };
        match decoded {
            Ok(image) => {
                let mut texture =
                    Self::new(image.width, image.height, options, generate_mipmaps, capabilities);
                texture.data = image.pixels;
                texture
            }
            Err(e) => {
                log::error!("Texture data unavailable: {e}");
                Self::new(0, 0, options, generate_mipmaps, capabilities)
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn options(&self) -> &TextureOptions {
        &self.options
    }

    pub fn generates_mipmaps(&self) -> bool {
        self.generate_mipmaps
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn dirty_ranges(&self) -> &[DirtyRange] {
        self.dirty.as_slice()
    }

    pub fn needs_resize(&self) -> bool {
        self.should_resize
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.gpu.as_ref().map(GpuTexture::handle)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.options.bytes_per_pixel()
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel()
    }

    /// Change dimensions. Pending partial updates are superseded by the
    /// full upload this schedules; the mirror is cleared if its size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;

        let npot = !(is_power_of_two(width) && is_power_of_two(height));
        if npot
            && !self.capabilities.npot_textures
            && (self.generate_mipmaps || self.options.wrapping.is_repeat())
        {
            log::warn!(
                "{width}x{height} texture: no mipmaps or repeat wrapping for NPOT textures on this GPU, falling back to linear filtering"
            );
            self.options.filtering = TextureFiltering::LINEAR;
            self.generate_mipmaps = false;
        }

        let len = self.byte_len();
        if self.data.len() != len {
            self.data.clear();
            self.data.resize(len, 0);
        }

        self.should_resize = true;
        self.dirty.clear();
    }

    /// Replace every pixel.
    pub fn set_data(&mut self, pixels: &[u8]) -> Result<(), TextureError> {
        let expected = self.byte_len();
        if pixels.len() != expected {
            return Err(TextureError::DataSize {
                expected,
                actual: pixels.len(),
                width: self.width,
                height: self.height,
            });
        }
        self.data.copy_from_slice(pixels);
        self.dirty.insert(0, self.height);
        Ok(())
    }

    /// Copy a `width` x `height` block into the mirror at `(x, y)`.
    /// `stride` is the source row length in pixels.
    pub fn set_sub_data(
        &mut self,
        pixels: &[u8],
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        stride: u32,
    ) -> Result<(), TextureError> {
        let fits_x = x.checked_add(width).is_some_and(|end| end <= self.width);
        let fits_y = y.checked_add(height).is_some_and(|end| end <= self.height);
        if !fits_x || !fits_y {
            return Err(TextureError::OutOfBounds {
                x,
                y,
                width,
                height,
                texture_width: self.width,
                texture_height: self.height,
            });
        }
        if stride < width {
            return Err(TextureError::Stride { stride, width });
        }
        if width == 0 || height == 0 {
            return Ok(());
        }

        let bpp = self.bytes_per_pixel();
        let row_bytes = width as usize * bpp;
        let src_stride = stride as usize * bpp;
        let expected = (height as usize - 1) * src_stride + row_bytes;
        if pixels.len() < expected {
            return Err(TextureError::ShortSource {
                expected,
                actual: pixels.len(),
            });
        }

        let dst_stride = self.width as usize * bpp;
        for row in 0..height as usize {
            let src = row * src_stride;
            let dst = (y as usize + row) * dst_stride + x as usize * bpp;
            self.data[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }

        self.dirty.insert(y, y + height);
        Ok(())
    }

    pub fn is_valid<B: GpuBackend>(&self, ctx: &RenderContext<B>) -> bool {
        self.gpu
            .as_ref()
            .is_some_and(|gpu| ctx.is_valid_generation(gpu.generation()))
    }

    /// Drop a handle that belongs to a lost context; its storage must be
    /// rebuilt from the mirror.
    fn check_validity<B: GpuBackend>(&mut self, ctx: &RenderContext<B>) {
        let stale = self
            .gpu
            .as_ref()
            .is_some_and(|gpu| !ctx.is_valid_generation(gpu.generation()));
        if stale {
            self.gpu = None;
            self.should_resize = true;
        }
    }

    /// Push pending changes to the GPU. Call from the rendering thread.
    pub fn update<B: GpuBackend>(&mut self, ctx: &mut RenderContext<B>, unit: u32) -> UploadKind {
        self.check_validity(ctx);

        if !self.should_resize && self.dirty.is_empty() {
            return UploadKind::None;
        }
        if self.is_empty() {
            self.should_resize = false;
            self.dirty.clear();
            return UploadKind::None;
        }

        let handle = match self.gpu.as_ref() {
            Some(gpu) => gpu.handle(),
            None => match ctx.create_texture(TextureTarget::Texture2D, &self.options) {
                Some(gpu) => {
                    let handle = gpu.handle();
                    self.gpu = Some(gpu);
                    self.should_resize = true;
                    handle
                }
                None => {
                    log::error!("Failed to create a {}x{} texture", self.width, self.height);
                    return UploadKind::None;
                }
            },
        };
        ctx.bind_texture(unit, TextureTarget::Texture2D, Some(handle));

        if self.should_resize {
            let max = ctx.capabilities().max_texture_size;
            if self.width > max || self.height > max {
                log::warn!(
                    "{}x{} texture exceeds the hardware maximum of {max}",
                    self.width,
                    self.height
                );
            }
            ctx.backend_mut().upload_image(
                handle,
                ImageTarget::Texture2D,
                self.width,
                self.height,
                &self.options,
                &self.data,
                self.generate_mipmaps,
            );
            self.should_resize = false;
            self.dirty.clear();
            return UploadKind::Full;
        }

        let row_bytes = self.width as usize * self.bytes_per_pixel();
        let ranges = self.dirty.len();
        for range in self.dirty.iter() {
            let start = range.min as usize * row_bytes;
            let end = range.max as usize * row_bytes;
            ctx.backend_mut().upload_rows(
                handle,
                range.min,
                self.width,
                range.rows(),
                self.options.format,
                &self.data[start..end],
            );
        }
        self.dirty.clear();
        UploadKind::Partial(ranges)
    }

    pub fn bind<B: GpuBackend>(&self, ctx: &mut RenderContext<B>, unit: u32) {
        let handle = self
            .gpu
            .as_ref()
            .filter(|gpu| ctx.is_valid_generation(gpu.generation()))
            .map(GpuTexture::handle);
        ctx.bind_texture(unit, TextureTarget::Texture2D, handle);
    }

    /// Release the GPU handle now rather than at the next garbage collection.
    pub fn destroy<B: GpuBackend>(&mut self, ctx: &mut RenderContext<B>) {
        if let Some(gpu) = self.gpu.take() {
            ctx.delete_texture(gpu);
        }
        self.should_resize = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::encode_png;
    use crate::testing::{GpuCall, RecordingBackend};
    use glyphtile_core::{FilterMode, TextureWrapping, WrapMode};

    fn alpha_texture(width: u32, height: u32) -> Texture {
        Texture::new(
            width,
            height,
            TextureOptions::ALPHA,
            false,
            GpuCapabilities::default(),
        )
    }

    fn context() -> RenderContext<RecordingBackend> {
        RenderContext::new(RecordingBackend::default())
    }

    #[test]
    fn test_new_allocates_mirror_and_schedules_full_upload() {
        let texture = Texture::new(
            8,
            4,
            TextureOptions::default(),
            false,
            GpuCapabilities::default(),
        );
        assert_eq!(texture.data().len(), 8 * 4 * 4);
        assert!(texture.needs_resize());
        assert!(texture.dirty_ranges().is_empty());
    }

    #[test]
    fn test_first_update_uploads_zero_filled_storage() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);

        assert_eq!(texture.update(&mut ctx, 0), UploadKind::Full);
        let full = ctx.backend().calls().iter().find_map(|call| match call {
            GpuCall::UploadImage { data, width, height, .. } => Some((data.clone(), *width, *height)),
            _ => None,
        });
        assert_eq!(full, Some((vec![0; 16], 4, 4)));
        assert!(texture.is_valid(&ctx));
    }

    #[test]
    fn test_sub_data_writes_region_and_leaves_rest() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.update(&mut ctx, 0);

        texture.set_sub_data(&[1, 2, 3, 4], 1, 2, 2, 2, 2).unwrap();
        assert_eq!(texture.update(&mut ctx, 0), UploadKind::Partial(1));

        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 0,
            0, 0, 0, 0,
            0, 1, 2, 0,
            0, 3, 4, 0,
        ];
        assert_eq!(texture.data(), &expected);

        let rows = ctx.backend().calls().last().cloned();
        assert_eq!(
            rows,
            Some(GpuCall::UploadRows {
                handle: texture.handle().unwrap(),
                y: 2,
                height: 2,
                data: expected[8..].to_vec(),
            })
        );
    }

    #[test]
    fn test_sub_data_honors_wider_stride() {
        let mut texture = alpha_texture(4, 2);
        // 3-pixel source rows, only the first 2 pixels of each are copied.
        texture.set_sub_data(&[7, 8, 99, 9, 10], 0, 0, 2, 2, 3).unwrap();
        assert_eq!(texture.data(), &[7, 8, 0, 0, 9, 10, 0, 0]);
    }

    #[test]
    fn test_sub_data_rgba_offsets_by_bytes_per_pixel() {
        let mut texture = Texture::new(
            2,
            1,
            TextureOptions::default(),
            false,
            GpuCapabilities::default(),
        );
        texture.set_sub_data(&[1, 2, 3, 4], 1, 0, 1, 1, 1).unwrap();
        assert_eq!(texture.data(), &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sub_data_out_of_bounds_is_rejected() {
        let mut texture = alpha_texture(4, 4);
        let before = texture.data().to_vec();

        let err = texture.set_sub_data(&[1; 9], 2, 2, 3, 3, 3).unwrap_err();
        assert!(matches!(err, TextureError::OutOfBounds { .. }));
        assert!(matches!(
            texture.set_sub_data(&[1; 2], 0, 0, 2, 2, 2),
            Err(TextureError::ShortSource { .. })
        ));
        assert!(matches!(
            texture.set_sub_data(&[1; 4], 0, 0, 2, 2, 1),
            Err(TextureError::Stride { .. })
        ));
        assert_eq!(texture.data(), before.as_slice());
    }

    #[test]
    fn test_writes_coalesce_into_one_upload_per_range() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 32);
        texture.update(&mut ctx, 0);
        ctx.backend_mut().clear();

        texture.set_sub_data(&[1; 4], 0, 0, 4, 1, 4).unwrap();
        texture.set_sub_data(&[1; 4], 0, 1, 4, 1, 4).unwrap();
        texture.set_sub_data(&[1; 4], 0, 2, 4, 1, 4).unwrap();
        texture.set_sub_data(&[1; 8], 0, 20, 4, 2, 4).unwrap();

        assert_eq!(texture.update(&mut ctx, 0), UploadKind::Partial(2));
        assert_eq!(ctx.backend().uploads(), 2);
    }

    #[test]
    fn test_second_update_is_a_no_op() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.set_data(&[5; 16]).unwrap();

        assert_eq!(texture.update(&mut ctx, 0), UploadKind::Full);
        let calls = ctx.backend().calls().len();
        assert_eq!(texture.update(&mut ctx, 0), UploadKind::None);
        assert_eq!(ctx.backend().calls().len(), calls);
    }

    #[test]
    fn test_set_data_marks_every_row() {
        let mut ctx = context();
        let mut texture = alpha_texture(2, 3);
        texture.update(&mut ctx, 0);

        texture.set_data(&[9; 6]).unwrap();
        assert_eq!(texture.dirty_ranges(), &[DirtyRange::new(0, 3)]);
        assert!(matches!(
            texture.set_data(&[9; 5]),
            Err(TextureError::DataSize { expected: 6, .. })
        ));
    }

    #[test]
    fn test_resize_discards_dirty_ranges() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.update(&mut ctx, 0);
        texture.set_sub_data(&[1; 4], 0, 0, 4, 1, 4).unwrap();

        texture.resize(8, 8);
        assert!(texture.dirty_ranges().is_empty());
        assert!(texture.needs_resize());
        assert_eq!(texture.data().len(), 64);
        assert_eq!(texture.update(&mut ctx, 0), UploadKind::Full);
    }

    #[test]
    fn test_context_loss_forces_full_reupload() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.update(&mut ctx, 0);
        texture.set_sub_data(&[3; 4], 0, 1, 4, 1, 4).unwrap();

        ctx.invalidate();
        ctx.backend_mut().clear();

        assert_eq!(texture.update(&mut ctx, 0), UploadKind::Full);
        let calls = ctx.backend().calls();
        assert!(matches!(calls[0], GpuCall::Create { .. }));
        assert_eq!(
            ctx.backend().count(|c| matches!(c, GpuCall::UploadRows { .. })),
            0
        );
        let uploaded = calls.iter().find_map(|call| match call {
            GpuCall::UploadImage { data, .. } => Some(data.clone()),
            _ => None,
        });
        assert_eq!(uploaded.as_deref(), Some(texture.data()));
        assert!(texture.is_valid(&ctx));
    }

    #[test]
    fn test_npot_without_support_downgrades_filtering() {
        let caps = GpuCapabilities {
            npot_textures: false,
            max_texture_size: 2048,
        };
        let options = TextureOptions {
            filtering: TextureFiltering {
                min: FilterMode::LinearMipmapLinear,
                mag: FilterMode::Linear,
            },
            ..TextureOptions::default()
        };

        let texture = Texture::new(100, 60, options, true, caps);
        assert_eq!(texture.options().filtering, TextureFiltering::LINEAR);
        assert!(!texture.generates_mipmaps());

        let pot = Texture::new(128, 64, options, true, caps);
        assert!(pot.generates_mipmaps());
        assert_eq!(pot.options().filtering, options.filtering);
    }

    #[test]
    fn test_npot_repeat_wrapping_downgrades_filtering() {
        let caps = GpuCapabilities {
            npot_textures: false,
            max_texture_size: 2048,
        };
        let options = TextureOptions {
            filtering: TextureFiltering {
                min: FilterMode::Nearest,
                mag: FilterMode::Nearest,
            },
            wrapping: TextureWrapping {
                s: WrapMode::Repeat,
                t: WrapMode::ClampToEdge,
            },
            ..TextureOptions::default()
        };
        let texture = Texture::new(30, 30, options, false, caps);
        assert_eq!(texture.options().filtering, TextureFiltering::LINEAR);
    }

    #[test]
    fn test_destroy_unbinds_texture() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.update(&mut ctx, 3);
        let handle = texture.handle().unwrap();
        assert_eq!(ctx.bound_texture(3, TextureTarget::Texture2D), Some(handle));

        texture.destroy(&mut ctx);
        assert_eq!(ctx.bound_texture(3, TextureTarget::Texture2D), None);
        assert!(ctx.backend().calls().contains(&GpuCall::Delete { handle }));
        assert_eq!(ctx.collect_garbage(), 0);
    }

    #[test]
    fn test_dropped_texture_released_through_queue() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.update(&mut ctx, 0);
        let handle = texture.handle().unwrap();

        drop(texture);
        assert_eq!(ctx.collect_garbage(), 1);
        assert!(ctx.backend().calls().contains(&GpuCall::Delete { handle }));
    }

    #[test]
    fn test_bind_goes_through_cache() {
        let mut ctx = context();
        let mut texture = alpha_texture(4, 4);
        texture.update(&mut ctx, 0);
        ctx.backend_mut().clear();

        texture.bind(&mut ctx, 0);
        texture.bind(&mut ctx, 1);
        texture.bind(&mut ctx, 1);
        assert_eq!(ctx.backend().count(|c| matches!(c, GpuCall::Bind { .. })), 1);
    }

    #[test]
    fn test_from_encoded_png() {
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        let texture = Texture::from_encoded(
            &encode_png(4, 4, &pixels),
            TextureOptions::ALPHA,
            false,
            GpuCapabilities::default(),
        );
        assert_eq!((texture.width(), texture.height()), (4, 4));
        assert_eq!(texture.options().format, PixelFormat::Rgba);
        assert_eq!(texture.data(), pixels.as_slice());
    }

    #[test]
    fn test_corrupt_image_yields_empty_texture() {
        let mut ctx = context();
        let mut texture = Texture::from_encoded(
            b"garbage",
            TextureOptions::default(),
            false,
            GpuCapabilities::default(),
        );
        assert!(texture.is_empty());
        assert_eq!(texture.update(&mut ctx, 0), UploadKind::None);
        assert!(ctx.backend().calls().is_empty());
    }
}
