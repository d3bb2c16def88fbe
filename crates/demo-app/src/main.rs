use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mosaic_config::MosaicConfig;
use mosaic_core::{GpuFrameTarget, WgpuBackend};
use mosaic_scene::{Renderer, Waker};
use parking_lot::Mutex;
use pollster::FutureExt;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{EventLoopBuilder, EventLoopProxy};
use winit::window::WindowBuilder;

mod showcase;
use showcase::Showcase;

#[derive(Debug, Clone, Copy)]
enum DemoEvent {
    TasksPending,
}

/// Wakes the event loop when a background thread enqueues renderer work.
struct ProxyWaker(Mutex<EventLoopProxy<DemoEvent>>);

impl Waker for ProxyWaker {
    fn wake(&self) {
        let _ = self.0.lock().send_event(DemoEvent::TasksPending);
    }
}

fn surface_config(
    adapter: &wgpu::Adapter,
    surface: &wgpu::Surface,
    width: u32,
    height: u32,
) -> wgpu::SurfaceConfiguration {
    let caps = surface.get_capabilities(adapter);
    // Vertex colours are written as-is, so prefer a linear format.
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| !f.is_srgb())
        .unwrap_or(caps.formats[0]);
    let present_mode = caps
        .present_modes
        .iter()
        .copied()
        .find(|m| *m == wgpu::PresentMode::Fifo)
        .unwrap_or(caps.present_modes[0]);
    wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode,
        desired_maximum_frame_latency: 2,
        alpha_mode: caps.alpha_modes[0],
        view_formats: vec![],
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MosaicConfig::load();
    config.validate().map_err(anyhow::Error::msg)?;

    let event_loop = EventLoopBuilder::<DemoEvent>::with_user_event().build()?;
    let window = WindowBuilder::new()
        .with_title(&config.window.title)
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)?;
    // Leak the window to satisfy wgpu surface lifetime; event loop never returns.
    let window: &'static winit::window::Window = Box::leak(Box::new(window));

    let instance = wgpu::Instance::default();
    let surface = instance.create_surface(window)?;
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        })
        .block_on()
        .context("No suitable GPU adapters found")?;
    log::info!("Using adapter: {:?}", adapter.get_info());
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .block_on()?;
    let device = Arc::new(device);
    let queue = Arc::new(queue);

    let mut size = window.inner_size();
    let mut surface_cfg = surface_config(&adapter, &surface, size.width, size.height);
    surface.configure(&device, &surface_cfg);

    let mut backend = WgpuBackend::new(
        device.clone(),
        queue,
        surface_cfg.format,
        config.batch.slots as u32,
    );
    backend.set_clear_color(config.window.clear_color);
    let mut renderer = Renderer::new(&config, backend)?;
    renderer
        .task_queue()
        .set_waker(Arc::new(ProxyWaker(Mutex::new(event_loop.create_proxy()))));

    let showcase = Showcase::build(&mut renderer, size.width, size.height)?;

    // A worker flips the marker between the front and the back every two
    // seconds through the render thread's task queue.
    let tasks = renderer.tasks();
    let marker = showcase.marker;
    std::thread::spawn(move || {
        let mut front = true;
        loop {
            std::thread::sleep(Duration::from_secs(2));
            front = !front;
            let z = if front { 10 } else { -1 };
            tasks.enqueue(move |r: &mut Renderer<WgpuBackend>| {
                if let Err(e) = r.scene_mut().set_z_index(marker, z) {
                    log::warn!("marker update failed: {e}");
                }
            });
        }
    });

    let started = Instant::now();
    let mut last_rotation = Instant::now();

    event_loop.run(move |event, target| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            window_id,
        } if window_id == window.id() => {
            if let Err(e) = renderer.dispose() {
                log::warn!("dispose failed: {e}");
            }
            target.exit();
        }
        Event::WindowEvent {
            event: WindowEvent::Resized(new_size),
            window_id,
        } if window_id == window.id() => {
            size = new_size;
            if size.width > 0 && size.height > 0 {
                surface_cfg.width = size.width;
                surface_cfg.height = size.height;
                surface.configure(&device, &surface_cfg);
            }
        }
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            window_id,
        } if window_id == window.id() => match surface.get_current_texture() {
            Ok(frame) => {
                let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
                renderer.backend_mut().set_target(GpuFrameTarget {
                    view,
                    width: size.width,
                    height: size.height,
                });

                let t = started.elapsed().as_secs_f32();
                if let Err(e) = showcase.animate(&mut renderer, t, size.width, size.height) {
                    log::warn!("animation step failed: {e}");
                }
                if last_rotation.elapsed() > Duration::from_secs(3) {
                    last_rotation = Instant::now();
                    if let Err(e) = showcase.rotate_textures(&mut renderer) {
                        log::warn!("texture rotation failed: {e}");
                    }
                }
                if let Err(e) = renderer.render() {
                    log::error!("render failed: {e}");
                }
                frame.present();
            }
            Err(e) => {
                log::warn!("Failed to get current texture: {:?}", e);
                surface.configure(&device, &surface_cfg);
            }
        },
        Event::UserEvent(DemoEvent::TasksPending) => window.request_redraw(),
        Event::AboutToWait => window.request_redraw(),
        _ => {}
    })?;

    Ok(())
}
