//! Viewer application: an orbiting camera around one point cloud.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use ember_app::{CliCommand, CliOptions, EmberApp, ExtraFlag, FrameContext, RenderEngine, WindowEvent};
use ember_render::{DispatchConfig, PointRenderer, PointShaders, VideoPlaneTextures};
use ember_video::{
    DecodeThread, StreamLayout, TestPatternStream, VideoFrameQueue, VideoFrameSet,
    VideoQueueConfig, VideoStream,
};
use glam::{Mat4, Vec3};
use tracing::{error, info};
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::cloud;

/// Orbit speed in radians per second.
const ORBIT_SPEED: f32 = 0.4;

/// Vertical field of view in radians.
const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;

/// Camera distance as a multiple of the cloud's bounding radius.
const ORBIT_DISTANCE: f32 = 2.5;

/// Frames per synthetic test stream before it rewinds.
const TEST_STREAM_FRAMES: u32 = 120;

/// Flags the viewer accepts on top of the common window flags.
pub const EXTRA_FLAGS: &[ExtraFlag] = &[
    ExtraFlag::value("--render-shader", "SPIR-V for the point render pass"),
    ExtraFlag::value("--resolve-shader", "SPIR-V for the resolve pass"),
    ExtraFlag::switch("--video-test", "Decode synthetic video streams each frame"),
];

/// Viewer settings taken from the command line.
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    pub clouds: Vec<PathBuf>,
    pub highest_lod: Option<u8>,
    pub render_shader: PathBuf,
    pub resolve_shader: PathBuf,
    pub video_test: bool,
}

impl ViewerOptions {
    /// Parse viewer settings from the process arguments.
    pub fn from_args() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse viewer settings from `args`, which exclude the program name.
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match CliOptions::parse_from(args, EXTRA_FLAGS)? {
            CliCommand::Run(options) => Ok(Self::from_cli(&options)),
            CliCommand::Help => anyhow::bail!("--help does not start the viewer"),
        }
    }

    pub fn from_cli(options: &CliOptions) -> Self {
        let shader = |flag: &str, default: &str| {
            options.value(flag).map_or_else(
                || PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders").join(default),
                PathBuf::from,
            )
        };
        Self {
            clouds: options.paths.clone(),
            highest_lod: options.highest_lod,
            render_shader: shader("--render-shader", "points_render.spv"),
            resolve_shader: shader("--resolve-shader", "points_resolve.spv"),
            video_test: options.has("--video-test"),
        }
    }
}

/// Decoded test streams uploaded to plane textures each frame.
struct VideoPlayback {
    decoder: DecodeThread,
    textures: VideoPlaneTextures,
    scratch: VideoFrameSet,
    frames_uploaded: u64,
}

impl VideoPlayback {
    fn start(engine: &RenderEngine) -> anyhow::Result<Self> {
        let layouts = [StreamLayout::new(320, 240), StreamLayout::new(160, 120)];
        let queue = Arc::new(VideoFrameQueue::new(VideoQueueConfig::default(), &layouts)?);

        let streams: Vec<Box<dyn VideoStream>> = layouts
            .iter()
            .enumerate()
            .map(|(i, &layout)| {
                Box::new(TestPatternStream::new(layout, TEST_STREAM_FRAMES).with_seed(i as u8 * 64))
                    as Box<dyn VideoStream>
            })
            .collect();

        let textures =
            VideoPlaneTextures::new(&engine.gpu().arena(), &layouts, engine.frames_in_flight())?;
        let scratch = queue.allocate_set();
        let decoder = DecodeThread::spawn(streams, queue)?;

        info!("Video test streams started: {:?}", layouts);
        Ok(Self {
            decoder,
            textures,
            scratch,
            frames_uploaded: 0,
        })
    }

    /// Upload the oldest decoded frame set, if one is ready.
    fn poll(&mut self, engine: &RenderEngine, frame: &FrameContext) -> anyhow::Result<()> {
        if !self.decoder.queue().try_dequeue_into(&mut self.scratch) {
            return Ok(());
        }
        unsafe {
            self.textures.record_upload(
                engine.gpu().device(),
                frame.command_buffer,
                frame.slot,
                &self.scratch,
            )?;
        }
        self.frames_uploaded += 1;
        Ok(())
    }

    /// Join the decoder, then release the textures. The device must be idle.
    fn stop(mut self, engine: &RenderEngine) {
        self.decoder.shutdown();
        if let Err(e) = self.textures.destroy(&engine.gpu().arena()) {
            error!("Failed to destroy video textures: {e}");
        }
        info!("Video playback stopped after {} frames", self.frames_uploaded);
    }
}

/// Viewer application state.
pub struct Viewer {
    renderer: PointRenderer,
    video: Option<VideoPlayback>,
    center: Vec3,
    radius: f32,
    orbit_angle: f32,
    should_exit: bool,
}

impl Viewer {
    /// Projection times view for the current orbit position.
    ///
    /// Built on the frame's transform stack; the orbit spin is applied in a
    /// pushed scope around the cloud center.
    fn view_proj(&self, frame: &mut FrameContext) -> anyhow::Result<Mat4> {
        let aspect = frame.extent.width as f32 / frame.extent.height.max(1) as f32;
        let distance = self.radius * ORBIT_DISTANCE;
        let eye = self.center + Vec3::new(0.0, 0.35, 1.0).normalize() * distance;

        // Vulkan clip space has +Y pointing down
        let proj = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::perspective_rh(FOV_Y, aspect, distance * 0.01, distance * 4.0);

        let transforms = frame.transforms_mut();
        transforms.load(proj);
        transforms.multiply(Mat4::look_at_rh(eye, self.center, Vec3::Y));

        transforms.push()?;
        transforms.translate(self.center);
        transforms.rotate(Vec3::Y, self.orbit_angle);
        transforms.translate(-self.center);
        let view_proj = transforms.current();
        transforms.pop()?;

        Ok(view_proj)
    }
}

impl EmberApp for Viewer {
    fn init(engine: &mut RenderEngine) -> anyhow::Result<Self> {
        let options = ViewerOptions::from_args()?;
        info!("Viewer options: {:?}", options);

        let cloud = cloud::decimate(cloud::load_clouds(&options.clouds)?, options.highest_lod);
        let (center, radius) = cloud.bounds().map_or((Vec3::ZERO, 1.0), |(min, max)| {
            ((min + max) * 0.5, ((max - min).length() * 0.5).max(1e-3))
        });
        info!(
            "Point cloud: {} points, center {:?}, radius {:.3}",
            cloud.len(),
            center,
            radius
        );

        let render_spirv = ember_gpu::load_spirv(&options.render_shader)?;
        let resolve_spirv = ember_gpu::load_spirv(&options.resolve_shader)?;
        let renderer = PointRenderer::new(
            engine.gpu(),
            &PointShaders {
                render: &render_spirv,
                resolve: &resolve_spirv,
            },
            DispatchConfig::default(),
            &cloud,
            engine.extent(),
            engine.frames_in_flight(),
        )?;

        let video = if options.video_test {
            Some(VideoPlayback::start(engine)?)
        } else {
            None
        };

        info!("Viewer initialized successfully!");

        Ok(Self {
            renderer,
            video,
            center,
            radius,
            orbit_angle: 0.0,
            should_exit: false,
        })
    }

    fn update(&mut self, _engine: &RenderEngine, dt: f32) {
        self.orbit_angle = (self.orbit_angle + ORBIT_SPEED * dt) % std::f32::consts::TAU;
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render(&mut self, engine: &RenderEngine, frame: &mut FrameContext) -> anyhow::Result<()> {
        if let Some(video) = &mut self.video {
            video.poll(engine, frame)?;
        }

        let view_proj = self.view_proj(frame)?;
        unsafe {
            self.renderer.record(
                engine.gpu().device(),
                frame.command_buffer,
                frame.slot,
                view_proj,
                frame.swapchain_image,
            )?;
        }
        Ok(())
    }

    fn on_resize(&mut self, engine: &RenderEngine, extent: vk::Extent2D) -> anyhow::Result<()> {
        self.renderer.resize(engine.gpu(), extent)?;
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed
                && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
            {
                self.should_exit = true;
                return true;
            }
        }
        false
    }

    fn should_exit(&self) -> bool {
        self.should_exit
    }

    fn cleanup(&mut self, engine: &RenderEngine) {
        if let Some(video) = self.video.take() {
            video.stop(engine);
        }
        if let Err(e) = self.renderer.destroy(engine.gpu()) {
            error!("Failed to destroy point renderer: {e}");
        }
        info!("Viewer cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_bundled_shaders() {
        let options = ViewerOptions::parse(Vec::<String>::new()).unwrap();

        assert!(options.clouds.is_empty());
        assert_eq!(options.highest_lod, None);
        assert!(options.render_shader.ends_with("shaders/points_render.spv"));
        assert!(options.resolve_shader.ends_with("shaders/points_resolve.spv"));
        assert!(!options.video_test);
    }

    #[test]
    fn viewer_flags_are_parsed() {
        let options = ViewerOptions::parse([
            "--video-test",
            "--render-shader",
            "/tmp/r.spv",
            "--highest_lod",
            "3",
            "a.bin",
            "b.bin",
        ])
        .unwrap();

        assert!(options.video_test);
        assert_eq!(options.render_shader, PathBuf::from("/tmp/r.spv"));
        assert!(options.resolve_shader.ends_with("points_resolve.spv"));
        assert_eq!(options.highest_lod, Some(3));
        assert_eq!(options.clouds, [PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
    }

    #[test]
    fn bad_arguments_are_errors() {
        assert!(ViewerOptions::parse(["--render-shader"]).is_err());
        assert!(ViewerOptions::parse(["--bogus"]).is_err());
        assert!(ViewerOptions::parse(["--help"]).is_err());
    }
}
