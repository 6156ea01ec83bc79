//! Point cloud sources for the viewer.

use std::f32::consts::TAU;
use std::path::Path;

use ember_app::cli::MAX_LOD;
use ember_core::{PointCloud, PointVertex};
use glam::Vec3;

/// Number of points in the built-in demo cloud.
pub const DEMO_POINTS: u32 = 250_000;

/// Golden angle in radians.
const GOLDEN_ANGLE: f32 = 2.399_963_1;

/// Load every file in `paths` into one cloud, or build the demo cloud when
/// no path was given.
pub fn load_clouds(paths: &[impl AsRef<Path>]) -> anyhow::Result<PointCloud> {
    if paths.is_empty() {
        return Ok(demo_cloud(DEMO_POINTS));
    }

    let mut vertices = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let cloud = PointCloud::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?;
        tracing::info!("Loaded {} points from {}", cloud.len(), path.display());
        vertices.extend(cloud.vertices);
    }
    Ok(PointCloud::new(vertices))
}

/// Sphere of evenly spread points, shell radius rippled along the latitude
/// and colored by direction.
pub fn demo_cloud(count: u32) -> PointCloud {
    let vertices = (0..count)
        .map(|i| {
            let t = (i as f32 + 0.5) / count as f32;
            let y = 1.0 - 2.0 * t;
            let ring = (1.0 - y * y).max(0.0).sqrt();
            let theta = GOLDEN_ANGLE * i as f32;
            let dir = Vec3::new(ring * theta.cos(), y, ring * theta.sin());

            let radius = 1.0 + 0.08 * (y * 6.0 * TAU).sin();
            let color = (dir * 0.5 + Vec3::splat(0.5)) * 255.0;
            PointVertex::new(
                dir * radius,
                [color.x as u8, color.y as u8, color.z as u8],
            )
        })
        .collect();
    PointCloud::new(vertices)
}

/// Keep every `2^(MAX_LOD - lod)`-th point. `None` keeps everything.
pub fn decimate(cloud: PointCloud, lod: Option<u8>) -> PointCloud {
    let Some(lod) = lod else {
        return cloud;
    };
    let stride = 1usize << MAX_LOD.saturating_sub(lod);
    if stride == 1 {
        return cloud;
    }
    PointCloud::new(cloud.vertices.into_iter().step_by(stride).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn demo_cloud_is_bounded() {
        let cloud = demo_cloud(1000);
        assert_eq!(cloud.len(), 1000);

        let (min, max) = cloud.bounds().unwrap();
        assert!(min.cmpge(Vec3::splat(-1.1)).all());
        assert!(max.cmple(Vec3::splat(1.1)).all());
        assert_relative_eq!(cloud.vertices[0].position.length(), 1.0, epsilon = 0.1);
    }

    #[test]
    fn decimation_strides() {
        let cloud = demo_cloud(640);

        assert_eq!(decimate(cloud.clone(), None).len(), 640);
        assert_eq!(decimate(cloud.clone(), Some(MAX_LOD)).len(), 640);
        assert_eq!(decimate(cloud.clone(), Some(5)).len(), 320);
        assert_eq!(decimate(cloud.clone(), Some(0)).len(), 10);

        let coarse = decimate(cloud.clone(), Some(4));
        assert_eq!(coarse.vertices[1], cloud.vertices[4]);
    }

    #[test]
    fn no_paths_gives_demo_cloud() {
        let paths: [&str; 0] = [];
        let cloud = load_clouds(&paths).unwrap();
        assert_eq!(cloud.len(), DEMO_POINTS as usize);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_clouds(&["/nonexistent/ember/points.bin"]).unwrap_err();
        assert!(err.to_string().contains("points.bin"));
    }
}
