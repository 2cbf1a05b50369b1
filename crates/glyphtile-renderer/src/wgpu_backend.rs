// GpuBackend over wgpu. Handles are allocated up front; storage is created
// on the first full upload and recreated whenever its shape changes.

use std::collections::HashMap;
use std::sync::Arc;

use glyphtile_core::{
    FilterMode, GpuBackend, GpuCapabilities, ImageTarget, PixelFormat, TextureHandle,
    TextureOptions, TextureTarget, WrapMode,
};

struct Storage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    mip_levels: u32,
    format: wgpu::TextureFormat,
}

struct Entry {
    target: TextureTarget,
    options: TextureOptions,
    sampler: wgpu::Sampler,
    storage: Option<Storage>,
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    textures: HashMap<TextureHandle, Entry>,
    bound: HashMap<u32, TextureHandle>,
    next_handle: u32,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            textures: HashMap::new(),
            bound: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// View of the texture bound to `unit`, for bind group construction.
    pub fn bound_view(&self, unit: u32) -> Option<&wgpu::TextureView> {
        self.bound.get(&unit).and_then(|handle| self.view(*handle))
    }

    pub fn bound_handle(&self, unit: u32) -> Option<TextureHandle> {
        self.bound.get(&unit).copied()
    }

    pub fn view(&self, handle: TextureHandle) -> Option<&wgpu::TextureView> {
        self.textures
            .get(&handle)
            .and_then(|entry| entry.storage.as_ref())
            .map(|storage| &storage.view)
    }

    pub fn sampler(&self, handle: TextureHandle) -> Option<&wgpu::Sampler> {
        self.textures.get(&handle).map(|entry| &entry.sampler)
    }

    fn create_sampler(device: &wgpu::Device, options: &TextureOptions) -> wgpu::Sampler {
        let (min_filter, mipmap_filter) = filter_mode(options.filtering.min);
        let (mag_filter, _) = filter_mode(options.filtering.mag);
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("glyphtile_sampler"),
            address_mode_u: address_mode(options.wrapping.s),
            address_mode_v: address_mode(options.wrapping.t),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter,
            min_filter,
            mipmap_filter,
            ..Default::default()
        })
    }

    fn allocate(
        device: &wgpu::Device,
        target: TextureTarget,
        width: u32,
        height: u32,
        mip_levels: u32,
        format: wgpu::TextureFormat,
    ) -> Storage {
        let layers = match target {
            TextureTarget::Texture2D => 1,
            TextureTarget::CubeMap => 6,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glyphtile_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let dimension = match target {
            TextureTarget::Texture2D => wgpu::TextureViewDimension::D2,
            TextureTarget::CubeMap => wgpu::TextureViewDimension::Cube,
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(dimension),
            ..Default::default()
        });
        Storage {
            texture,
            view,
            width,
            height,
            mip_levels,
            format,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        mip_level: u32,
        layer: u32,
        y: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        data: &[u8],
    ) {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level,
                origin: wgpu::Origin3d { x: 0, y, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_pixel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl GpuBackend for WgpuBackend {
    fn capabilities(&self) -> GpuCapabilities {
        GpuCapabilities {
            npot_textures: true,
            max_texture_size: self.device.limits().max_texture_dimension_2d,
        }
    }

    fn create_texture(
        &mut self,
        target: TextureTarget,
        options: &TextureOptions,
    ) -> Option<TextureHandle> {
        self.next_handle = self.next_handle.checked_add(1)?;
        let handle = TextureHandle::new(self.next_handle)?;
        let sampler = Self::create_sampler(&self.device, options);
        self.textures.insert(
            handle,
            Entry {
                target,
                options: *options,
                sampler,
                storage: None,
            },
        );
        Some(handle)
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        if let Some(storage) = self.textures.remove(&handle).and_then(|entry| entry.storage) {
            storage.texture.destroy();
        }
        self.bound.retain(|_, bound| *bound != handle);
    }

    fn bind_texture(&mut self, unit: u32, _target: TextureTarget, handle: Option<TextureHandle>) {
        match handle {
            Some(handle) => self.bound.insert(unit, handle),
            None => self.bound.remove(&unit),
        };
    }

    fn upload_image(
        &mut self,
        handle: TextureHandle,
        image: ImageTarget,
        width: u32,
        height: u32,
        options: &TextureOptions,
        data: &[u8],
        generate_mipmaps: bool,
    ) {
        let Some(entry) = self.textures.get_mut(&handle) else {
            log::warn!("Upload to unknown texture {handle}");
            return;
        };
        if width == 0 || height == 0 {
            return;
        }
        let expected = width as usize * height as usize * options.format.bytes_per_pixel();
        if data.len() < expected {
            log::error!(
                "Texture {handle}: {} bytes for a {width}x{height} image, expected {expected}",
                data.len()
            );
            return;
        }

        if entry.options != *options {
            entry.sampler = Self::create_sampler(&self.device, options);
            entry.options = *options;
        }

        let format = texture_format(options.internal_format);
        let mip_levels = if generate_mipmaps {
            mip_level_count(width, height)
        } else {
            1
        };
        let reusable = entry.storage.as_ref().is_some_and(|s| {
            s.width == width && s.height == height && s.format == format && s.mip_levels == mip_levels
        });
        if !reusable {
            if let Some(old) = entry.storage.take() {
                old.texture.destroy();
            }
            entry.storage = Some(Self::allocate(
                &self.device,
                entry.target,
                width,
                height,
                mip_levels,
                format,
            ));
        }
        let Some(storage) = entry.storage.as_ref() else {
            return;
        };

        let layer = match image {
            ImageTarget::Texture2D => 0,
            ImageTarget::CubeFace(face) => face.layer(),
        };
        let bpp = gpu_bytes_per_pixel(options.internal_format);
        let mut level = to_gpu_layout(options.format, options.internal_format, &data[..expected]);
        let (mut w, mut h) = (width, height);
        Self::write(&self.queue, &storage.texture, 0, layer, 0, w, h, bpp, &level);
        for mip in 1..mip_levels {
            level = downsample(&level, w, h, bpp as usize);
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            Self::write(&self.queue, &storage.texture, mip, layer, 0, w, h, bpp, &level);
        }
    }

    fn upload_rows(
        &mut self,
        handle: TextureHandle,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &[u8],
    ) {
        let Some(entry) = self.textures.get(&handle) else {
            log::warn!("Row upload to unknown texture {handle}");
            return;
        };
        let Some(storage) = entry.storage.as_ref() else {
            log::warn!("Row upload to texture {handle} before its storage exists");
            return;
        };
        if y + height > storage.height || width != storage.width {
            log::error!(
                "Texture {handle}: rows {y}..{} of width {width} outside {}x{}",
                y + height,
                storage.width,
                storage.height
            );
            return;
        }
        let internal = entry.options.internal_format;
        let pixels = to_gpu_layout(format, internal, data);
        let bpp = gpu_bytes_per_pixel(internal);
        Self::write(&self.queue, &storage.texture, 0, 0, y, width, height, bpp, &pixels);
    }
}

// ──────────────────────────────────────────────
// Format helpers
// ──────────────────────────────────────────────

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Alpha | PixelFormat::Luminance => wgpu::TextureFormat::R8Unorm,
        PixelFormat::LuminanceAlpha => wgpu::TextureFormat::Rg8Unorm,
        PixelFormat::Rgb | PixelFormat::Rgba => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn gpu_bytes_per_pixel(format: PixelFormat) -> u32 {
    match texture_format(format) {
        wgpu::TextureFormat::R8Unorm => 1,
        wgpu::TextureFormat::Rg8Unorm => 2,
        _ => 4,
    }
}

/// Convert CPU pixels to the layout of the GPU format. Only RGB needs
/// work: there is no three-channel 8-bit texture format.
fn to_gpu_layout(source: PixelFormat, internal: PixelFormat, data: &[u8]) -> Vec<u8> {
    if source == PixelFormat::Rgb && texture_format(internal) == wgpu::TextureFormat::Rgba8Unorm {
        data.chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect()
    } else {
        data.to_vec()
    }
}

fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Halve an image with a 2x2 box filter. Odd edges reuse the last texel.
fn downsample(data: &[u8], width: u32, height: u32, channels: usize) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    let mut out = Vec::with_capacity(nw * nh * channels);
    for y in 0..nh {
        for x in 0..nw {
            let (x0, y0) = ((x * 2).min(w - 1), (y * 2).min(h - 1));
            let (x1, y1) = ((x * 2 + 1).min(w - 1), (y * 2 + 1).min(h - 1));
            for c in 0..channels {
                let texel = |tx: usize, ty: usize| data[(ty * w + tx) * channels + c] as u32;
                let sum = texel(x0, y0) + texel(x1, y0) + texel(x0, y1) + texel(x1, y1);
                out.push(((sum + 2) / 4) as u8);
            }
        }
    }
    out
}

fn filter_mode(mode: FilterMode) -> (wgpu::FilterMode, wgpu::FilterMode) {
    use wgpu::FilterMode::{Linear, Nearest};
    match mode {
        FilterMode::Nearest => (Nearest, Nearest),
        FilterMode::Linear => (Linear, Nearest),
        FilterMode::NearestMipmapNearest => (Nearest, Nearest),
        FilterMode::LinearMipmapNearest => (Linear, Nearest),
        FilterMode::NearestMipmapLinear => (Nearest, Linear),
        FilterMode::LinearMipmapLinear => (Linear, Linear),
    }
}

fn address_mode(mode: WrapMode) -> wgpu::AddressMode {
    match mode {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}
