//! Ember point cloud viewer.
//!
//! Draws one or more point-cloud files (or a generated demo sphere) with the
//! compute point renderer, orbiting the camera around the cloud.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p ember-viewer -- [OPTIONS] [POINTS.bin...]
//! ```
//!
//! The compute shaders are read as SPIR-V. Compile the GLSL sources first:
//!
//! ```bash
//! glslangValidator -V apps/ember-viewer/shaders/points_render.comp -o apps/ember-viewer/shaders/points_render.spv
//! glslangValidator -V apps/ember-viewer/shaders/points_resolve.comp -o apps/ember-viewer/shaders/points_resolve.spv
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod cloud;

use ember_app::{run_app, CliOptions};

use crate::app::{Viewer, EXTRA_FLAGS};

const PROGRAM: &str = "ember-viewer";
const TITLE: &str = "Ember Point Viewer";

fn main() -> anyhow::Result<()> {
    // Window flags are needed before the event loop; the viewer reads the
    // rest again in `Viewer::init`
    let options = CliOptions::parse_or_exit(PROGRAM, EXTRA_FLAGS);

    run_app::<Viewer>(options.into_app_config(TITLE))
}
