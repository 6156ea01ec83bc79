//! Application framework for the Ember engine.
//!
//! The runner owns the window and the [`RenderEngine`], and drives every
//! frame through the pacer protocol:
//! - wait for the slot's fence, acquire a swapchain image
//! - hand the recording command buffer to [`EmberApp::render`]
//! - submit, present and recreate the swapchain when it goes stale
//!
//! # Example
//!
//! ```no_run
//! use ember_app::{run_app, AppConfig, EmberApp, FrameContext, RenderEngine};
//!
//! struct MyApp;
//!
//! impl EmberApp for MyApp {
//!     fn init(engine: &mut RenderEngine) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, engine: &RenderEngine, dt: f32) {}
//!
//!     fn render(&mut self, engine: &RenderEngine, frame: &mut FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
pub mod cli;
mod engine;
mod frame;
mod runner;

pub use app::EmberApp;
pub use cli::{CliCommand, CliError, CliOptions, ExtraFlag};
pub use engine::{RenderEngine, WindowSurface};
pub use frame::FrameContext;
pub use runner::{init_logging, run_app, AppConfig};

pub use ember_gpu::{GpuContext, GpuContextBuilder};
pub use winit::event::WindowEvent;
