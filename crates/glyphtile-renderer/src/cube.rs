// Cube map built from a horizontal-cross image:
//
//          +----+
//          | +Y |
//     +----+----+----+----+
//     | -X | +Z | +X | -Z |
//     +----+----+----+----+
//          | -Y |
//          +----+

use std::path::Path;

use glyphtile_core::{
    CubeFace, GpuBackend, ImageTarget, PixelFormat, TextureHandle, TextureOptions, TextureTarget,
};

use crate::decode;
use crate::error::CubeMapError;
use crate::render_state::{GpuTexture, RenderContext};

const BYTES_PER_PIXEL: usize = 4;

/// Macro-cell `(column, row)` of each face in the cross.
pub const CROSS_LAYOUT: [(CubeFace, u32, u32); 6] = [
    (CubeFace::PositiveX, 2, 1),
    (CubeFace::NegativeX, 0, 1),
    (CubeFace::PositiveY, 1, 0),
    (CubeFace::NegativeY, 1, 2),
    (CubeFace::PositiveZ, 1, 1),
    (CubeFace::NegativeZ, 3, 1),
];

/// Face stored at a macro-cell, if any.
pub fn face_at(column: u32, row: u32) -> Option<CubeFace> {
    CROSS_LAYOUT
        .iter()
        .find(|&&(_, c, r)| c == column && r == row)
        .map(|&(face, _, _)| face)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeMapFace {
    pub face: CubeFace,
    /// RGBA8, `size * size` pixels.
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct CubeMapTexture {
    face_size: u32,
    options: TextureOptions,
    faces: Vec<CubeMapFace>,
    gpu: Option<GpuTexture>,
}

impl CubeMapTexture {
    /// Slice an RGBA8 cross image into its six faces.
    pub fn from_rgba(
        width: u32,
        height: u32,
        pixels: &[u8],
        options: TextureOptions,
    ) -> Result<Self, CubeMapError> {
        if width == 0 || width % 4 != 0 || height % 3 != 0 || width / 4 != height / 3 {
            return Err(CubeMapError::Geometry { width, height });
        }
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(CubeMapError::DataSize {
                expected,
                actual: pixels.len(),
            });
        }

        let size = width / 4;
        let face_row = size as usize * BYTES_PER_PIXEL;
        let mut faces: Vec<CubeMapFace> = CubeFace::ALL
            .iter()
            .map(|&face| CubeMapFace {
                face,
                data: Vec::with_capacity(face_row * size as usize),
            })
            .collect();

        let image_row = width as usize * BYTES_PER_PIXEL;
        for y in 0..height {
            let row = y / size;
            for column in 0..4 {
                let Some(face) = face_at(column, row) else {
                    continue;
                };
                let start = y as usize * image_row + column as usize * face_row;
                faces[face.layer() as usize]
                    .data
                    .extend_from_slice(&pixels[start..start + face_row]);
            }
        }

        Ok(Self {
            face_size: size,
            options: TextureOptions {
                internal_format: PixelFormat::Rgba,
                format: PixelFormat::Rgba,
                ..options
            },
            faces,
            gpu: None,
        })
    }

    pub fn from_encoded(bytes: &[u8], options: TextureOptions) -> Result<Self, CubeMapError> {
        let image = decode::decode_rgba(bytes)?;
        Self::from_rgba(image.width, image.height, &image.pixels, options)
    }

    pub fn from_file(path: &Path, options: TextureOptions) -> Result<Self, CubeMapError> {
        let image = decode::read_rgba(path)?;
        Self::from_rgba(image.width, image.height, &image.pixels, options)
    }

    pub fn face_size(&self) -> u32 {
        self.face_size
    }

    pub fn faces(&self) -> &[CubeMapFace] {
        &self.faces
    }

    pub fn face(&self, face: CubeFace) -> &CubeMapFace {
        &self.faces[face.layer() as usize]
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.gpu.as_ref().map(GpuTexture::handle)
    }

    /// Upload all faces the first time, and again after a context loss.
    /// Returns whether anything was uploaded.
    pub fn update<B: GpuBackend>(&mut self, ctx: &mut RenderContext<B>, unit: u32) -> bool {
        if self
            .gpu
            .as_ref()
            .is_some_and(|gpu| !ctx.is_valid_generation(gpu.generation()))
        {
            self.gpu = None;
        }
        if self.gpu.is_some() {
            return false;
        }

        let Some(gpu) = ctx.create_texture(TextureTarget::CubeMap, &self.options) else {
            log::error!("Failed to create a cube map texture");
            return false;
        };
        let handle = gpu.handle();
        self.gpu = Some(gpu);
        ctx.bind_texture(unit, TextureTarget::CubeMap, Some(handle));

        for face in &self.faces {
            ctx.backend_mut().upload_image(
                handle,
                ImageTarget::CubeFace(face.face),
                self.face_size,
                self.face_size,
                &self.options,
                &face.data,
                false,
            );
        }
        true
    }

    pub fn bind<B: GpuBackend>(&self, ctx: &mut RenderContext<B>, unit: u32) {
        let handle = self
            .gpu
            .as_ref()
            .filter(|gpu| ctx.is_valid_generation(gpu.generation()))
            .map(GpuTexture::handle);
        ctx.bind_texture(unit, TextureTarget::CubeMap, handle);
    }

    pub fn destroy<B: GpuBackend>(&mut self, ctx: &mut RenderContext<B>) {
        if let Some(gpu) = self.gpu.take() {
            ctx.delete_texture(gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::encode_png;
    use crate::testing::{GpuCall, RecordingBackend};

    /// Cross image where every macro-cell is filled with `[column, row, 7, 255]`.
    fn cross_image(size: u32) -> (u32, u32, Vec<u8>) {
        let (width, height) = (size * 4, size * 3);
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x / size) as u8, (y / size) as u8, 7, 255]);
            }
        }
        (width, height, pixels)
    }

    #[test]
    fn test_faces_match_layout_table() {
        let (width, height, pixels) = cross_image(4);
        let cube = CubeMapTexture::from_rgba(width, height, &pixels, TextureOptions::default())
            .unwrap();
        assert_eq!(cube.face_size(), 4);

        for &(face, column, row) in &CROSS_LAYOUT {
            let expected: Vec<u8> = [column as u8, row as u8, 7, 255].repeat(16);
            assert_eq!(cube.face(face).data, expected, "face {face:?}");
        }
    }

    #[test]
    fn test_center_cell_is_positive_z() {
        assert_eq!(face_at(1, 1), Some(CubeFace::PositiveZ));
        assert_eq!(face_at(1, 0), Some(CubeFace::PositiveY));
        assert_eq!(face_at(0, 0), None);
        assert_eq!(face_at(3, 2), None);
    }

    #[test]
    fn test_face_rows_keep_their_order() {
        // Distinct value per row inside the +Y cell.
        let size = 2;
        let (width, height) = (8, 6);
        let mut pixels = vec![0u8; (width * height * 4) as usize];
        for y in 0..size {
            for x in size..size * 2 {
                let offset = ((y * width + x) * 4) as usize;
                pixels[offset] = 10 + y as u8;
            }
        }
        let cube = CubeMapTexture::from_rgba(width, height, &pixels, TextureOptions::default())
            .unwrap();
        let face = &cube.face(CubeFace::PositiveY).data;
        assert_eq!(face[0], 10);
        assert_eq!(face[4], 10);
        assert_eq!(face[8], 11);
        assert_eq!(face[12], 11);
    }

    #[test]
    fn test_bad_geometry_is_rejected() {
        let pixels = vec![0u8; 10 * 6 * 4];
        assert!(matches!(
            CubeMapTexture::from_rgba(10, 6, &pixels, TextureOptions::default()),
            Err(CubeMapError::Geometry { .. })
        ));
        let pixels = vec![0u8; 8 * 9 * 4];
        assert!(matches!(
            CubeMapTexture::from_rgba(8, 9, &pixels, TextureOptions::default()),
            Err(CubeMapError::Geometry { .. })
        ));
        assert!(matches!(
            CubeMapTexture::from_rgba(8, 6, &[0; 4], TextureOptions::default()),
            Err(CubeMapError::DataSize { .. })
        ));
    }

    #[test]
    fn test_uploads_six_faces_once() {
        let (width, height, pixels) = cross_image(2);
        let mut cube =
            CubeMapTexture::from_rgba(width, height, &pixels, TextureOptions::default()).unwrap();
        let mut ctx = RenderContext::new(RecordingBackend::default());

        assert!(cube.update(&mut ctx, 0));
        assert!(!cube.update(&mut ctx, 0));

        let faces: Vec<ImageTarget> = ctx
            .backend()
            .calls()
            .iter()
            .filter_map(|call| match call {
                GpuCall::UploadImage { image, .. } => Some(*image),
                _ => None,
            })
            .collect();
        let expected: Vec<ImageTarget> =
            CubeFace::ALL.iter().map(|&f| ImageTarget::CubeFace(f)).collect();
        assert_eq!(faces, expected);
    }

    #[test]
    fn test_reuploads_after_context_loss() {
        let (width, height, pixels) = cross_image(2);
        let mut cube =
            CubeMapTexture::from_rgba(width, height, &pixels, TextureOptions::default()).unwrap();
        let mut ctx = RenderContext::new(RecordingBackend::default());
        cube.update(&mut ctx, 0);

        ctx.invalidate();
        ctx.backend_mut().clear();
        assert!(cube.update(&mut ctx, 0));
        assert_eq!(ctx.backend().uploads(), 6);
    }

    #[test]
    fn test_from_encoded_cross() {
        let (width, height, pixels) = cross_image(3);
        let cube =
            CubeMapTexture::from_encoded(&encode_png(width, height, &pixels), TextureOptions::default())
                .unwrap();
        assert_eq!(cube.face_size(), 3);
        assert_eq!(cube.face(CubeFace::NegativeZ).data[..4], [3, 1, 7, 255]);
    }

    #[test]
    fn test_undecodable_bytes_fail() {
        assert!(matches!(
            CubeMapTexture::from_encoded(b"nope", TextureOptions::default()),
            Err(CubeMapError::Image(_))
        ));
    }
}
