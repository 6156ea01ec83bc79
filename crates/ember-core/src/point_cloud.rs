//! Point-cloud binary file format.
//!
//! Layout (little-endian, no padding):
//! - `u64` vertex count
//! - `count` records of `{ f32 x, f32 y, f32 z, u8 r, u8 g, u8 b }`
//!
//! Alpha is implied fully opaque.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use glam::Vec3;

use crate::constants::{POINT_CLOUD_HEADER_SIZE, POINT_RECORD_SIZE};
use crate::error::{Error, Result};

/// Upper bound on the number of vertices preallocated from an untrusted header.
const MAX_PREALLOCATED_VERTICES: usize = 1 << 20;

/// A single colored point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointVertex {
    pub position: Vec3,
    pub color: [u8; 3],
}

impl PointVertex {
    /// Create a new vertex.
    pub const fn new(position: Vec3, color: [u8; 3]) -> Self {
        Self { position, color }
    }

    /// Color packed as little-endian RGBA8 with opaque alpha.
    pub fn packed_rgba(&self) -> u32 {
        u32::from_le_bytes([self.color[0], self.color[1], self.color[2], u8::MAX])
    }

    fn encode(&self, out: &mut [u8; POINT_RECORD_SIZE]) {
        out[0..4].copy_from_slice(&self.position.x.to_le_bytes());
        out[4..8].copy_from_slice(&self.position.y.to_le_bytes());
        out[8..12].copy_from_slice(&self.position.z.to_le_bytes());
        out[12..15].copy_from_slice(&self.color);
    }

    fn decode(bytes: &[u8; POINT_RECORD_SIZE]) -> Self {
        let f = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            position: Vec3::new(f(0), f(4), f(8)),
            color: [bytes[12], bytes[13], bytes[14]],
        }
    }
}

/// An in-memory point cloud.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub vertices: Vec<PointVertex>,
}

impl PointCloud {
    /// Create a point cloud from vertices.
    pub fn new(vertices: Vec<PointVertex>) -> Self {
        Self { vertices }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the cloud has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Read a point cloud from the binary format.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; POINT_CLOUD_HEADER_SIZE];
        reader.read_exact(&mut header).map_err(truncated("header"))?;

        let count = u64::from_le_bytes(header);
        let count = usize::try_from(count).map_err(|_| {
            Error::InvalidData(format!("vertex count {count} does not fit in memory"))
        })?;

        let mut vertices = Vec::with_capacity(count.min(MAX_PREALLOCATED_VERTICES));
        let mut record = [0u8; POINT_RECORD_SIZE];
        for index in 0..count {
            reader.read_exact(&mut record).map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    Error::InvalidData(format!(
                        "file declares {count} vertices but ends after {index}"
                    ))
                } else {
                    Error::Io(e)
                }
            })?;
            vertices.push(PointVertex::decode(&record));
        }

        Ok(Self { vertices })
    }

    /// Write the point cloud in the binary format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.vertices.len() as u64).to_le_bytes())?;

        let mut record = [0u8; POINT_RECORD_SIZE];
        for vertex in &self.vertices {
            vertex.encode(&mut record);
            writer.write_all(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load a point cloud from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_from(&mut BufReader::new(file))
    }

    /// Save a point cloud to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(&mut BufWriter::new(file))
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` when empty.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.vertices.first()?.position;
        Some(self.vertices.iter().fold((first, first), |(min, max), v| {
            (min.min(v.position), max.max(v.position))
        }))
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        POINT_CLOUD_HEADER_SIZE + self.vertices.len() * POINT_RECORD_SIZE
    }
}

fn truncated(what: &'static str) -> impl FnOnce(std::io::Error) -> Error {
    move |e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::InvalidData(format!("truncated point cloud {what}"))
        } else {
            Error::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> PointCloud {
        PointCloud::new(vec![
            PointVertex::new(Vec3::new(1.0, -2.5, 3.25), [255, 0, 17]),
            PointVertex::new(Vec3::new(f32::MIN_POSITIVE, 0.0, -0.0), [0, 128, 255]),
            PointVertex::new(Vec3::new(1.0e9, -1.0e-9, 42.0), [1, 2, 3]),
        ])
    }

    #[test]
    fn file_round_trip_is_exact() {
        let cloud = sample();
        let mut bytes = Vec::new();
        cloud.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), cloud.encoded_len());

        let read = PointCloud::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read.len(), cloud.len());
        for (a, b) in read.vertices.iter().zip(&cloud.vertices) {
            assert_eq!(a.position.to_array().map(f32::to_bits), b.position.to_array().map(f32::to_bits));
            assert_eq!(a.color, b.color);
        }
    }

    #[test]
    fn layout_is_packed_little_endian() {
        let cloud = PointCloud::new(vec![PointVertex::new(Vec3::new(1.0, 2.0, 3.0), [9, 8, 7])]);
        let mut bytes = Vec::new();
        cloud.write_to(&mut bytes).unwrap();

        assert_eq!(&bytes[0..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &3.0f32.to_le_bytes());
        assert_eq!(&bytes[20..23], &[9, 8, 7]);
        assert_eq!(bytes.len(), 23);
    }

    #[test]
    fn empty_cloud() {
        let mut bytes = Vec::new();
        PointCloud::default().write_to(&mut bytes).unwrap();
        assert_eq!(bytes, 0u64.to_le_bytes());

        let read = PointCloud::read_from(&mut Cursor::new(bytes)).unwrap();
        assert!(read.is_empty());
        assert!(read.bounds().is_none());
    }

    #[test]
    fn truncated_records_are_rejected() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 4);

        let err = PointCloud::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn oversized_count_does_not_preallocate() {
        let bytes = u64::MAX.to_le_bytes().to_vec();
        let err = PointCloud::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = PointCloud::read_from(&mut Cursor::new(vec![1, 0, 0])).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn bounds_and_packed_color() {
        let (min, max) = sample().bounds().unwrap();
        assert_eq!(min, Vec3::new(f32::MIN_POSITIVE, -2.5, -0.0));
        assert_eq!(max, Vec3::new(1.0e9, 0.0, 42.0));

        let v = PointVertex::new(Vec3::ZERO, [0x11, 0x22, 0x33]);
        assert_eq!(v.packed_rgba(), 0xFF33_2211);
    }
}
