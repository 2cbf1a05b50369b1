use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("pixel data is {actual} bytes, a {width}x{height} texture needs {expected}")]
    DataSize {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
    #[error(
        "region {width}x{height} at ({x}, {y}) exceeds the {texture_width}x{texture_height} texture"
    )]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        texture_width: u32,
        texture_height: u32,
    },
    #[error("source stride {stride} is narrower than the region width {width}")]
    Stride { stride: u32, width: u32 },
    #[error("source holds {actual} bytes, the region needs {expected}")]
    ShortSource { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image data is empty")]
    Empty,
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum CubeMapError {
    #[error("{width}x{height} is not a 4x3 cross of square faces")]
    Geometry { width: u32, height: u32 },
    #[error("pixel data is {actual} bytes, expected {expected}")]
    DataSize { expected: usize, actual: usize },
    #[error(transparent)]
    Image(#[from] ImageError),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("text is empty")]
    EmptyText,
    #[error("no usable font for family '{0}'")]
    NoFont(String),
    #[error("text produced no visible glyphs")]
    NoGlyphs,
}
