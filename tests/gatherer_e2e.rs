use resource_gatherer::assets::decode::{DecodeError, PixelBuffer, TextStyle};
use resource_gatherer::assets::text::TextRasterizer;
use resource_gatherer::config::{self, WidgetConfig};
use resource_gatherer::core::gfx::{GpuFormat, TextureDesc, TextureUploader, UploadError};
use resource_gatherer::{GathererOptions, PreloadRequest, PreloadedAsset, ResourceGatherer};
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RecordingUploader {
    next: u32,
    uploads: Vec<(u32, u32, GpuFormat)>,
    released: Vec<u32>,
}

impl TextureUploader for RecordingUploader {
    type Handle = u32;

    fn upload(&mut self, desc: &TextureDesc<'_>) -> Result<u32, UploadError> {
        self.next += 1;
        self.uploads.push((desc.width, desc.height, desc.format));
        Ok(self.next)
    }

    fn release(&mut self, handle: u32) {
        self.released.push(handle);
    }
}

/// Six pixels per char, twenty rows tall.
struct BlockText;

impl TextRasterizer for BlockText {
    fn measure(&mut self, _: &TextStyle, text: &str) -> Result<(u32, u32), DecodeError> {
        Ok((text.chars().count() as u32 * 6, 20))
    }

    fn paint(&mut self, style: &TextStyle, _: &str, canvas: &mut PixelBuffer) -> Result<(), DecodeError> {
        let (w, h) = (canvas.width(), canvas.height());
        canvas.blend_rect(0, 0, w, h, style.rgba8());
        Ok(())
    }
}

fn options() -> GathererOptions {
    GathererOptions {
        wait_timeout: Duration::from_millis(50),
        rasterizer: Box::new(BlockText),
        on_gather_start: None,
    }
}

fn wait_until(mut ready: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn poll_asset(
    gatherer: &ResourceGatherer<u32>,
    id: &str,
    uploader: &mut RecordingUploader,
) -> Option<PreloadedAsset<u32>> {
    let mut found = None;
    wait_until(|| {
        found = gatherer.get_asset_by_id(id, uploader);
        found.is_some()
    });
    found
}

fn background_widgets(paths: &[String]) -> Vec<WidgetConfig> {
    let ini = paths
        .iter()
        .map(|p| format!("[background]\npath = {p}\n"))
        .collect::<String>();
    config::parse(&ini).widgets
}

#[test]
fn startup_gather_uploads_backgrounds_on_first_lookup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = [(1920, 1080), (800, 600)]
        .iter()
        .enumerate()
        .map(|(i, &(w, h))| {
            let path = dir.path().join(format!("bg{i}.png"));
            image::RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255]))
                .save(&path)
                .expect("write png");
            path.to_string_lossy().into_owned()
        })
        .collect::<Vec<_>>();

    let gatherer = ResourceGatherer::new(background_widgets(&paths), options());
    assert!(wait_until(|| gatherer.is_ready()), "gather finished");
    assert!((gatherer.progress() - 2.0 / 3.0).abs() < 1e-4);
    assert_eq!(gatherer.queued_targets(), 2);

    let mut up = RecordingUploader::default();
    let first = gatherer
        .get_asset_by_id(&format!("background:{}", paths[0]), &mut up)
        .expect("first background");
    assert_eq!((first.width, first.height), (1920, 1080));
    assert_eq!(up.uploads.len(), 2, "one miss uploads the whole queue");

    let second = gatherer
        .get_asset_by_id(&format!("background:{}", paths[1]), &mut up)
        .expect("second background");
    assert_eq!((second.width, second.height), (800, 600));
    assert!(up.uploads.iter().all(|u| u.2 == GpuFormat::Rgba8));
    assert!(gatherer.is_applied());
}

#[test]
fn unreadable_background_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("gone.png").to_string_lossy().into_owned();

    let gatherer = ResourceGatherer::new(background_widgets(&[missing.clone()]), options());
    assert!(wait_until(|| gatherer.is_ready()));
    assert!((gatherer.progress() - 0.5).abs() < 1e-4);
    assert_eq!(gatherer.queued_targets(), 0);

    let mut up = RecordingUploader::default();
    assert!(gatherer
        .get_asset_by_id(&format!("background:{missing}"), &mut up)
        .is_none());
    assert!(up.uploads.is_empty());
}

#[test]
fn async_text_request_is_sized_to_its_layout() {
    let gatherer = ResourceGatherer::new(Vec::new(), options());
    gatherer.request_async_asset_preload(
        PreloadRequest::text("greeting", "Hello, world").with_prop("font_size", 24),
    );

    let mut up = RecordingUploader::default();
    let asset = poll_asset(&gatherer, "greeting", &mut up).expect("text asset");
    assert_eq!(asset.id, "greeting");
    assert_eq!((asset.width, asset.height), (72, 20));
    assert_ne!((asset.width, asset.height), (1920, 1080));
}

#[test]
fn bad_request_does_not_block_later_ones() {
    let gatherer = ResourceGatherer::new(Vec::new(), options());
    gatherer.request_async_asset_preload(
        PreloadRequest::text("bad", "oops").with_prop("font_size", "large"),
    );
    gatherer.request_async_asset_preload(PreloadRequest::text("good", "ok"));

    let mut up = RecordingUploader::default();
    assert!(poll_asset(&gatherer, "good", &mut up).is_some());
    assert!(gatherer.get_asset_by_id("bad", &mut up).is_none());
}

#[test]
fn unapplied_targets_are_freed_on_shutdown() {
    let gatherer = ResourceGatherer::<u32>::new(Vec::new(), options());
    gatherer.request_async_asset_preload(PreloadRequest::text("never-shown", "bye"));
    assert!(wait_until(|| gatherer.queued_targets() == 1));
    assert_eq!(gatherer.cached_assets(), 0);

    gatherer.shutdown();
    assert_eq!(gatherer.queued_targets(), 0);
    assert_eq!(gatherer.cached_assets(), 0);
    assert!(!gatherer.is_applied());
}

#[test]
fn unknown_id_returns_none_without_uploading() {
    let gatherer = ResourceGatherer::new(Vec::new(), options());
    assert!(wait_until(|| gatherer.is_ready()));
    let mut up = RecordingUploader::default();
    assert!(gatherer.get_asset_by_id("no-such-asset", &mut up).is_none());
    assert!(up.uploads.is_empty());
}

#[test]
fn dispose_releases_uploaded_textures() {
    let gatherer = ResourceGatherer::new(Vec::new(), options());
    gatherer.request_async_asset_preload(PreloadRequest::text("a", "a"));
    gatherer.request_async_asset_preload(PreloadRequest::text("b", "bb"));

    let mut up = RecordingUploader::default();
    assert!(poll_asset(&gatherer, "a", &mut up).is_some());
    assert!(poll_asset(&gatherer, "b", &mut up).is_some());
    gatherer.dispose_assets(&mut up);

    up.released.sort_unstable();
    assert_eq!(up.released, (1..=up.next).collect::<Vec<_>>());
    assert_eq!(gatherer.cached_assets(), 0);
}
