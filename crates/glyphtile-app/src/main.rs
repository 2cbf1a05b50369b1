// Headless driver: tile workers lay out labels in parallel, the render
// thread flushes atlas pages and batches quads per page every frame.

mod gpu;
mod settings;

use std::collections::BTreeMap;
use std::thread;

use glyphtile_core::{AtlasId, GlyphQuad, QuadCorner, TextStyleParams, TextureOptions};
use glyphtile_renderer::{
    CosmicShaper, CubeMapTexture, GlyphAtlasManager, RenderContext, TextLayout, WgpuBackend,
};
use wgpu::util::DeviceExt;

/// Labels of one tile. Dropping it releases the atlas pages it locked.
struct TileLabels {
    quads: Vec<GlyphQuad>,
    layouts: Vec<TextLayout>,
}

fn build_tile(
    manager: &GlyphAtlasManager<CosmicShaper>,
    style: &TextStyleParams,
    labels: &[String],
) -> TileLabels {
    let mut tile = TileLabels {
        quads: Vec::new(),
        layouts: Vec::new(),
    };
    for label in labels {
        match manager.layout_text(style, label, &mut tile.quads) {
            Ok(layout) => {
                if layout.missing_glyphs > 0 {
                    log::warn!("'{label}' is missing {} glyphs", layout.missing_glyphs);
                }
                tile.layouts.push(layout);
            }
            Err(e) => log::warn!("Skipping label '{label}': {e}"),
        }
    }
    tile
}

/// Quads of one atlas page, uploaded for the frame that drew them.
struct PageBatch {
    atlas: AtlasId,
    quads: usize,
    vertices: wgpu::Buffer,
}

/// Group quads by atlas page and upload one vertex buffer per page.
fn draw(
    manager: &GlyphAtlasManager<CosmicShaper>,
    ctx: &mut RenderContext<WgpuBackend>,
    tiles: &[TileLabels],
) -> Vec<PageBatch> {
    let mut pages: BTreeMap<AtlasId, Vec<QuadCorner>> = BTreeMap::new();
    for quad in tiles.iter().flat_map(|tile| &tile.quads) {
        pages
            .entry(quad.atlas)
            .or_default()
            .extend_from_slice(&quad.corners);
    }

    let mut batches = Vec::with_capacity(pages.len());
    for (atlas, corners) in pages {
        manager.bind(atlas, ctx, 0);
        if ctx.backend().bound_view(0).is_none() {
            log::warn!("Atlas {atlas} has no GPU storage yet");
            continue;
        }
        let vertices =
            ctx.backend()
                .device()
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("glyph_quads"),
                    contents: bytemuck::cast_slice(&corners),
                    usage: wgpu::BufferUsages::VERTEX,
                });
        batches.push(PageBatch {
            atlas,
            quads: corners.len() / 4,
            vertices,
        });
    }
    batches
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = settings::load_settings();
    let Some(gpu) = gpu::init_gpu() else {
        log::error!("No suitable GPU adapter found");
        std::process::exit(1);
    };

    let mut ctx = RenderContext::new(WgpuBackend::new(gpu.device.clone(), gpu.queue.clone()));
    let shaper = CosmicShaper::new();
    if shaper.face_count() == 0 {
        log::warn!("No system fonts found, every label will be skipped");
    }
    let manager = GlyphAtlasManager::new(shaper, settings.atlas.to_config(), ctx.capabilities());
    let style = settings.font.to_style();

    if let Some(path) = &settings.cube_map {
        match CubeMapTexture::from_file(path, TextureOptions::default()) {
            Ok(mut cube) => {
                cube.update(&mut ctx, 1);
                log::info!("Cube map {}: {}px faces", path.display(), cube.face_size());
            }
            Err(e) => log::warn!("Cube map {} unavailable: {e}", path.display()),
        }
    }

    let workers = settings.workers.max(1);
    let chunk = settings.labels.len().div_ceil(workers).max(1);
    let mut previous: Vec<TileLabels> = Vec::new();
    let mut batches: Vec<PageBatch> = Vec::new();

    for frame in 0..settings.frames {
        let tiles: Vec<TileLabels> = thread::scope(|scope| {
            let manager = &manager;
            let style = &style;
            let handles: Vec<_> = settings
                .labels
                .chunks(chunk)
                .map(|labels| scope.spawn(move || build_tile(manager, style, labels)))
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| match handle.join() {
                    Ok(tile) => Some(tile),
                    Err(_) => {
                        log::error!("Tile worker panicked");
                        None
                    }
                })
                .collect()
        });

        // Tiles of the last frame are torn down once the new ones are built.
        drop(std::mem::replace(&mut previous, Vec::new()));

        let uploaded = manager.update_all(&mut ctx);
        // Last frame's vertex buffers are freed here.
        batches = draw(&manager, &mut ctx, &tiles);
        for batch in &batches {
            log::debug!(
                "Atlas {}: {} quads in {} bytes",
                batch.atlas,
                batch.quads,
                batch.vertices.size()
            );
        }
        let collected = ctx.collect_garbage();
        log::info!(
            "Frame {frame}: {} labels, {uploaded} pages uploaded, {} batches, {} pages locked, {collected} textures freed",
            tiles.iter().map(|tile| tile.layouts.len()).sum::<usize>(),
            batches.len(),
            manager.locked().len(),
        );
        previous = tiles;
    }

    drop(batches);
    drop(previous);
    log::info!(
        "{}: {} atlas pages, {} glyphs cached, {} pages still locked",
        gpu.adapter_name,
        manager.page_count(),
        manager.glyph_count(),
        manager.locked().len()
    );
}
