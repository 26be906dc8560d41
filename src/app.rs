use resource_gatherer::assets::request::PreloadRequest;
use resource_gatherer::assets::{GathererOptions, ResourceGatherer};
use resource_gatherer::config::Config;
use resource_gatherer::core::gfx::opengl::{self, Texture};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};

use log::{error, info};
use std::{error::Error, sync::Arc, time::Instant};

const LABEL_WIDGET: &str = "label";
const STATUS_LABEL_ID: &str = "status:locked";
const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.08, 1.0];

/// Asset ids the demo polls for until they show up in the cache.
fn wanted_ids(config: &Config) -> Vec<String> {
    let mut ids = config
        .widgets_of(resource_gatherer::assets::BACKGROUND_WIDGET)
        .filter_map(|w| w.values.str("path").ok().flatten())
        .map(|path| format!("background:{path}"))
        .collect::<Vec<_>>();
    ids.extend(label_requests(config).into_iter().map(|r| r.id));
    ids
}

/// One text request per label widget, plus a fixed status line.
fn label_requests(config: &Config) -> Vec<PreloadRequest> {
    let mut requests = config
        .widgets_of(LABEL_WIDGET)
        .enumerate()
        .filter_map(|(i, w)| {
            let text = w.values.str("text").ok().flatten()?;
            Some(PreloadRequest {
                props: w.values.clone(),
                ..PreloadRequest::text(format!("label:{i}"), text)
            })
        })
        .collect::<Vec<_>>();
    requests.push(PreloadRequest::text(STATUS_LABEL_ID, "Locked").with_prop("font_size", 24));
    requests
}

pub struct App {
    window: Option<Arc<Window>>,
    backend: Option<opengl::State>,
    gatherer: ResourceGatherer<Texture>,
    config: Config,
    pending: Vec<String>,
    requested: bool,
    start_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let gatherer = ResourceGatherer::new(
            config.widgets.clone(),
            GathererOptions::from_config(&config),
        );
        let pending = wanted_ids(&config);
        Self {
            window: None,
            backend: None,
            gatherer,
            config,
            pending,
            requested: false,
            start_time: Instant::now(),
        }
    }

    fn init_graphics(&mut self, event_loop: &ActiveEventLoop) -> Result<(), Box<dyn Error>> {
        let window_attributes = Window::default_attributes()
            .with_title("Resource Gatherer")
            .with_resizable(true)
            .with_transparent(false)
            .with_inner_size(PhysicalSize::new(1280, 720));

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let backend = opengl::init(&window, self.config.vsync)?;
        let (w, h) = backend.window_size();
        info!("Window ready at {w}x{h}.");

        self.window = Some(window);
        self.backend = Some(backend);
        info!("Starting event loop...");
        Ok(())
    }

    fn poll_assets(&mut self) {
        let Some(backend) = &self.backend else {
            return;
        };

        if !self.requested && self.gatherer.is_ready() {
            for request in label_requests(&self.config) {
                self.gatherer.request_async_asset_preload(request);
            }
            self.requested = true;
        }

        let mut uploader = backend.uploader();
        let gatherer = &self.gatherer;
        let elapsed = self.start_time.elapsed().as_secs_f32();
        self.pending.retain(|id| match gatherer.get_asset_by_id(id, &mut uploader) {
            Some(asset) => {
                info!(
                    "Asset '{}' ready after {elapsed:.2}s ({}x{}).",
                    asset.id, asset.width, asset.height
                );
                false
            }
            None => true,
        });
    }

    fn update_title(&self) {
        if let Some(window) = &self.window {
            window.set_title(&format!(
                "Resource Gatherer | gather {:.0}% | {} waiting",
                self.gatherer.progress() * 100.0,
                self.pending.len()
            ));
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init_graphics(event_loop)
        {
            error!("Failed to initialize graphics: {}", e);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref().cloned() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested. Shutting down.");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(backend) = &mut self.backend {
                    opengl::resize(backend, new_size.width, new_size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.poll_assets();
                self.update_title();
                if let Some(backend) = &mut self.backend
                    && let Err(e) = opengl::present(backend, CLEAR_COLOR)
                {
                    error!("Failed to present frame: {e}");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(backend) = &self.backend {
            self.gatherer.dispose_assets(&mut backend.uploader());
        }
        self.gatherer.shutdown();
    }
}

pub fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
