// Render state owned by the rendering thread: the backend, the context
// generation, the texture binding cache and the deferred release queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use glyphtile_core::{GpuBackend, GpuCapabilities, TextureHandle, TextureTarget};

/// A texture name that has been released but not yet deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRelease {
    target: TextureTarget,
    handle: TextureHandle,
    generation: u64,
}

/// Handles queued for deletion by resources dropped on any thread.
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue {
    pending: Arc<Mutex<Vec<PendingRelease>>>,
}

impl ReleaseQueue {
    fn push(&self, release: PendingRelease) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(release);
    }

    fn take(&self) -> Vec<PendingRelease> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live GPU texture name stamped with the generation that created it.
/// Dropping it queues the name for deletion on the rendering thread.
#[derive(Debug)]
pub struct GpuTexture {
    handle: TextureHandle,
    target: TextureTarget,
    generation: u64,
    releases: Option<ReleaseQueue>,
}

impl GpuTexture {
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Give up the name without queueing it, e.g. after deleting it directly.
    fn forget(mut self) {
        self.releases = None;
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let Some(releases) = self.releases.take() {
            releases.push(PendingRelease {
                target: self.target,
                handle: self.handle,
                generation: self.generation,
            });
        }
    }
}

// ──────────────────────────────────────────────
// RenderContext
// ──────────────────────────────────────────────

pub struct RenderContext<B: GpuBackend> {
    backend: B,
    generation: u64,
    active_unit: Option<u32>,
    bound: HashMap<(u32, TextureTarget), TextureHandle>,
    releases: ReleaseQueue,
}

impl<B: GpuBackend> RenderContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            generation: 1,
            active_unit: None,
            bound: HashMap::new(),
            releases: ReleaseQueue::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn capabilities(&self) -> GpuCapabilities {
        self.backend.capabilities()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_valid_generation(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn release_queue(&self) -> ReleaseQueue {
        self.releases.clone()
    }

    pub fn active_unit(&self) -> Option<u32> {
        self.active_unit
    }

    /// The GPU context was lost: every existing handle is dead.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.active_unit = None;
        self.bound.clear();
        log::info!("GPU context invalidated, generation {}", self.generation);
    }

    /// Install a recreated backend after a context loss.
    pub fn replace_backend(&mut self, backend: B) -> B {
        let old = std::mem::replace(&mut self.backend, backend);
        self.invalidate();
        old
    }

    /// Create a texture name stamped with the current generation.
    pub(crate) fn create_texture(
        &mut self,
        target: TextureTarget,
        options: &glyphtile_core::TextureOptions,
    ) -> Option<GpuTexture> {
        let handle = self.backend.create_texture(target, options)?;
        Some(GpuTexture {
            handle,
            target,
            generation: self.generation,
            releases: Some(self.releases.clone()),
        })
    }

    /// Delete a texture right away instead of through the release queue.
    pub(crate) fn delete_texture(&mut self, texture: GpuTexture) {
        if self.is_valid_generation(texture.generation) {
            self.backend.delete_texture(texture.handle);
            self.unbind(texture.target, texture.handle);
        }
        texture.forget();
    }

    /// Bind `handle` to `unit`, skipping the backend call when the cache
    /// says it is already bound there.
    pub fn bind_texture(&mut self, unit: u32, target: TextureTarget, handle: Option<TextureHandle>) {
        self.active_unit = Some(unit);
        let current = self.bound.get(&(unit, target)).copied();
        if current == handle {
            return;
        }
        self.backend.bind_texture(unit, target, handle);
        match handle {
            Some(handle) => {
                self.bound.insert((unit, target), handle);
            }
            None => {
                self.bound.remove(&(unit, target));
            }
        }
    }

    pub fn is_bound(&self, target: TextureTarget, handle: TextureHandle) -> bool {
        self.bound
            .iter()
            .any(|(&(_, bound_target), &bound)| bound_target == target && bound == handle)
    }

    pub fn bound_texture(&self, unit: u32, target: TextureTarget) -> Option<TextureHandle> {
        self.bound.get(&(unit, target)).copied()
    }

    /// A deleted texture falls back to "nothing bound" wherever it was bound.
    pub fn unbind(&mut self, target: TextureTarget, handle: TextureHandle) {
        self.bound
            .retain(|&(_, bound_target), bound| !(bound_target == target && *bound == handle));
    }

    /// Delete every texture released since the last call. Names from an
    /// older generation died with their context and are only dropped.
    pub fn collect_garbage(&mut self) -> usize {
        let mut deleted = 0;
        for release in self.releases.take() {
            if !self.is_valid_generation(release.generation) {
                continue;
            }
            self.backend.delete_texture(release.handle);
            self.unbind(release.target, release.handle);
            deleted += 1;
        }
        if deleted > 0 {
            log::debug!("Deleted {deleted} released textures");
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{GpuCall, RecordingBackend};
    use glyphtile_core::TextureOptions;

    #[test]
    fn test_capabilities_come_from_backend() {
        let caps = GpuCapabilities {
            npot_textures: false,
            max_texture_size: 1024,
        };
        let ctx = RenderContext::new(RecordingBackend::with_capabilities(caps));
        assert_eq!(ctx.capabilities(), caps);
        assert_eq!(ctx.active_unit(), None);
    }

    #[test]
    fn test_bind_is_deduplicated() {
        let mut ctx = RenderContext::new(RecordingBackend::default());
        let texture = ctx
            .create_texture(TextureTarget::Texture2D, &TextureOptions::default())
            .unwrap();
        let handle = texture.handle();

        ctx.bind_texture(0, TextureTarget::Texture2D, Some(handle));
        ctx.bind_texture(0, TextureTarget::Texture2D, Some(handle));
        ctx.bind_texture(1, TextureTarget::Texture2D, Some(handle));

        assert_eq!(ctx.backend().count(|c| matches!(c, GpuCall::Bind { .. })), 2);
        assert!(ctx.is_bound(TextureTarget::Texture2D, handle));
        ctx.delete_texture(texture);
    }

    #[test]
    fn test_invalidate_bumps_generation_and_clears_bindings() {
        let mut ctx = RenderContext::new(RecordingBackend::default());
        let texture = ctx
            .create_texture(TextureTarget::Texture2D, &TextureOptions::default())
            .unwrap();
        ctx.bind_texture(0, TextureTarget::Texture2D, Some(texture.handle()));

        let before = ctx.generation();
        ctx.invalidate();
        assert_eq!(ctx.generation(), before + 1);
        assert_eq!(ctx.bound_texture(0, TextureTarget::Texture2D), None);
        assert!(!ctx.is_valid_generation(texture.generation()));
        drop(texture);
    }

    #[test]
    fn test_dropped_texture_is_deleted_on_collect() {
        let mut ctx = RenderContext::new(RecordingBackend::default());
        let texture = ctx
            .create_texture(TextureTarget::Texture2D, &TextureOptions::default())
            .unwrap();
        let handle = texture.handle();
        ctx.bind_texture(2, TextureTarget::Texture2D, Some(handle));

        drop(texture);
        assert_eq!(ctx.release_queue().len(), 1);
        assert_eq!(ctx.collect_garbage(), 1);

        assert!(ctx.backend().calls().contains(&GpuCall::Delete { handle }));
        assert_eq!(ctx.bound_texture(2, TextureTarget::Texture2D), None);
        assert!(ctx.release_queue().is_empty());
    }

    #[test]
    fn test_stale_release_is_not_deleted() {
        let mut ctx = RenderContext::new(RecordingBackend::default());
        let texture = ctx
            .create_texture(TextureTarget::Texture2D, &TextureOptions::default())
            .unwrap();
        ctx.invalidate();
        drop(texture);

        assert_eq!(ctx.collect_garbage(), 0);
        assert_eq!(ctx.backend().count(|c| matches!(c, GpuCall::Delete { .. })), 0);
    }
}
