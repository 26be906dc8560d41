//! Asset gathering: bulk preload at startup, on-demand text rendering on a
//! worker thread, and lazy GPU upload on the render thread.

pub mod decode;
pub mod request;
pub mod text;
pub mod worker;

use crate::config::{Config, WidgetConfig};
use crate::core::gfx::{self, TextureDesc, TextureUploader};
use decode::PreloadTarget;
use log::{debug, error, info, trace, warn};
use request::{PreloadRequest, TargetKind};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use text::{CosmicText, TextRasterizer};
use worker::{AsyncLoopState, lock};

pub const BACKGROUND_WIDGET: &str = "background";

/// A GPU-resident image reachable by id. The handle stays valid until the
/// cache entry is overwritten or the assets are disposed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreloadedAsset<H> {
    pub id: String,
    pub texture: H,
    pub width: u32,
    pub height: u32,
}

/// Everything guarded by the cache lock.
struct Staging<H> {
    targets: Vec<PreloadTarget>,
    assets: HashMap<String, PreloadedAsset<H>>,
}

impl<H> Default for Staging<H> {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            assets: HashMap::new(),
        }
    }
}

/// A hook run on the initialization thread before the bulk gather, e.g. to
/// make a shared graphics context current there.
pub type GatherHook = Box<dyn FnOnce() + Send>;

pub struct GathererOptions {
    pub wait_timeout: Duration,
    pub rasterizer: Box<dyn TextRasterizer>,
    pub on_gather_start: Option<GatherHook>,
}

impl Default for GathererOptions {
    fn default() -> Self {
        Self {
            wait_timeout: worker::DEFAULT_WAIT_TIMEOUT,
            rasterizer: Box::new(CosmicText::new()),
            on_gather_start: None,
        }
    }
}

impl GathererOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            wait_timeout: Duration::from_secs(cfg.worker_wait_seconds),
            ..Self::default()
        }
    }
}

// Progress is an f32 stored by bit pattern.
#[derive(Default)]
struct Progress(AtomicU32);

impl Progress {
    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn add(&self, step: f32) {
        let next = self.get() + step;
        self.0.store(next.to_bits(), Ordering::Release);
    }
}

/// Shared between the gatherer and its background threads.
struct Shared<H> {
    loop_state: AsyncLoopState,
    staging: Mutex<Staging<H>>,
    progress: Progress,
    ready: AtomicBool,
    applied: AtomicBool,
}

pub struct ResourceGatherer<H> {
    shared: Arc<Shared<H>>,
}

impl<H: Clone + Send + 'static> ResourceGatherer<H> {
    /// Starts the initialization thread and returns right away. That thread
    /// runs the bulk gather, then spawns the async preload loop.
    pub fn new(widgets: Vec<WidgetConfig>, options: GathererOptions) -> Self {
        let shared = Arc::new(Shared {
            loop_state: AsyncLoopState::new(),
            staging: Mutex::new(Staging::default()),
            progress: Progress::default(),
            ready: AtomicBool::new(false),
            applied: AtomicBool::new(false),
        });

        let GathererOptions {
            wait_timeout,
            mut rasterizer,
            on_gather_start,
        } = options;

        let init_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("gather-init".into())
            .spawn(move || {
                if let Some(hook) = on_gather_start {
                    hook();
                }
                gather(&init_shared, &widgets);

                let loop_shared = Arc::clone(&init_shared);
                let spawned = thread::Builder::new()
                    .name("gather-async".into())
                    .spawn(move || {
                        worker::run_loop(
                            &loop_shared.loop_state,
                            rasterizer.as_mut(),
                            wait_timeout,
                            |target| {
                                let mut staging = lock(&loop_shared.staging);
                                if loop_shared.loop_state.should_terminate() {
                                    trace!("Dropping '{}' decoded after shutdown.", target.id);
                                    return;
                                }
                                staging.targets.push(target);
                            },
                        );
                    });
                if let Err(e) = spawned {
                    error!("Failed to spawn async preload thread: {e}");
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn gather thread: {e}");
        }

        Self { shared }
    }

    /// Looks up a ready asset. Must be called on the thread that owns the
    /// graphics context, since a miss may upload everything queued so far.
    ///
    /// Returns `None` right away while the worker is mid-batch; that is a
    /// "try again later", not proof of absence.
    pub fn get_asset_by_id<U>(&self, id: &str, uploader: &mut U) -> Option<PreloadedAsset<H>>
    where
        U: TextureUploader<Handle = H>,
    {
        if self.shared.loop_state.is_busy() {
            trace!("Asset lookup for '{id}' skipped: preload loop busy.");
            return None;
        }

        let mut staging = lock(&self.shared.staging);
        // A batch may have started while we waited for the lock.
        if self.shared.loop_state.is_busy() {
            trace!("Asset lookup for '{id}' skipped: preload loop busy.");
            return None;
        }
        if let Some(asset) = staging.assets.get(id) {
            return Some(asset.clone());
        }

        if !staging.targets.is_empty() {
            apply_locked(&mut staging, uploader);
            self.shared.applied.store(true, Ordering::Release);
            return staging.assets.get(id).cloned();
        }

        None
    }

    /// Uploads every queued target into the cache.
    pub fn apply<U>(&self, uploader: &mut U)
    where
        U: TextureUploader<Handle = H>,
    {
        apply_locked(&mut lock(&self.shared.staging), uploader);
        self.shared.applied.store(true, Ordering::Release);
    }

    /// Queues an on-demand decode. Safe from any thread; never blocks on the
    /// worker.
    pub fn request_async_asset_preload(&self, request: PreloadRequest) {
        debug!("Async preload requested for '{}'.", request.id);
        self.shared.loop_state.submit(request);
    }

    /// Releases every cached texture through `uploader`.
    pub fn dispose_assets<U>(&self, uploader: &mut U)
    where
        U: TextureUploader<Handle = H>,
    {
        let assets = std::mem::take(&mut lock(&self.shared.staging).assets);
        let count = assets.len();
        for (_, asset) in assets {
            uploader.release(asset.texture);
        }
        info!("Disposed {count} preloaded asset(s).");
    }

    #[cfg(test)]
    pub(crate) fn push_target(&self, target: PreloadTarget) {
        lock(&self.shared.staging).targets.push(target);
    }
}

impl<H> ResourceGatherer<H> {
    /// Bulk gather progress in `[0, 1)`; reaches `N / (N + 1)` for N images.
    pub fn progress(&self) -> f32 {
        self.shared.progress.get()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    pub fn is_applied(&self) -> bool {
        self.shared.applied.load(Ordering::Acquire)
    }

    /// Advisory; see [`get_asset_by_id`](Self::get_asset_by_id).
    pub fn is_busy(&self) -> bool {
        self.shared.loop_state.is_busy()
    }

    pub fn queued_targets(&self) -> usize {
        lock(&self.shared.staging).targets.len()
    }

    pub fn cached_assets(&self) -> usize {
        lock(&self.shared.staging).assets.len()
    }

    /// Stops the async loop within one wait timeout and frees queued pixel
    /// buffers. Cached textures belong to the GPU context; release them with
    /// `dispose_assets` first.
    pub fn shutdown(&self) {
        self.shared.loop_state.request_shutdown();
        let dropped = std::mem::take(&mut lock(&self.shared.staging).targets);
        if !dropped.is_empty() {
            debug!("Released {} unapplied preload target(s).", dropped.len());
        }
    }

    #[cfg(test)]
    pub(crate) fn loop_state(&self) -> &AsyncLoopState {
        &self.shared.loop_state
    }
}

impl<H> Drop for ResourceGatherer<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn gather<H>(shared: &Shared<H>, widgets: &[WidgetConfig]) {
    let started = Instant::now();
    let backgrounds = widgets
        .iter()
        .filter(|w| w.kind == BACKGROUND_WIDGET)
        .collect::<Vec<_>>();
    let step = 1.0 / (backgrounds.len() as f32 + 1.0);
    info!("Gathering {} background image(s)...", backgrounds.len());

    let mut loaded = 0usize;
    for widget in backgrounds {
        shared.progress.add(step);

        let path = match widget.values.str("path") {
            Ok(Some(path)) => path,
            Ok(None) => {
                warn!("Background widget has no 'path'. Skipping.");
                continue;
            }
            Err(e) => {
                warn!("Background widget {e}. Skipping.");
                continue;
            }
        };

        match decode::decode_image(Path::new(path)) {
            Ok(buffer) => {
                lock(&shared.staging).targets.push(PreloadTarget {
                    id: format!("background:{path}"),
                    kind: TargetKind::Image,
                    buffer,
                });
                loaded += 1;
            }
            Err(e) => warn!("{e}. Skipping."),
        }
    }

    shared.ready.store(true, Ordering::Release);
    info!(
        "Gather complete in {:.2}s: {} image(s) queued.",
        started.elapsed().as_secs_f64(),
        loaded
    );
}

fn apply_locked<H, U>(staging: &mut Staging<H>, uploader: &mut U)
where
    U: TextureUploader<Handle = H>,
{
    let targets = std::mem::take(&mut staging.targets);
    let mut uploaded = 0usize;
    for target in targets {
        if target.kind != TargetKind::Image {
            error!(
                "Unsupported type {:?} in apply for '{}'. Dropping.",
                target.kind, target.id
            );
            continue;
        }

        let (format, swizzle_rb) = gfx::upload_layout(target.buffer.format());
        let (width, height) = target.size();
        let desc = TextureDesc {
            width,
            height,
            format,
            swizzle_rb,
            data: target.buffer.as_bytes(),
        };
        match uploader.upload(&desc) {
            Ok(texture) => {
                let asset = PreloadedAsset {
                    id: target.id.clone(),
                    texture,
                    width,
                    height,
                };
                if let Some(old) = staging.assets.insert(target.id, asset) {
                    uploader.release(old.texture);
                }
                uploaded += 1;
            }
            Err(e) => warn!("Failed to upload '{}': {e}. Skipping.", target.id),
        }
    }
    debug!("Applied {uploaded} preload target(s).");
}
