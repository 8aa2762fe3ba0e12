//! ## FrameOfData - one observation of every tracked entity.
//!
//! A frame-of-data payload carries, in order: the server frame number, the named marker
//! sets, the unlabeled markers, the rigid bodies, the skeletons (2.1+), the labeled
//! markers (2.3+), the force-plate samples (2.9+), then latency, SMPTE timecode, the
//! server timestamp and the status bits, closed by a 4-byte end-of-data sentinel.
//!
//! Everything here is *raw*: positions are in the server's coordinate space, names are
//! exactly as sent, and no model-definition lookups have happened yet. The client layer
//! turns one of these into an application-facing `Frame`.

use crate::protocol::{
    read_count, read_counted_vec, read_counted_versioned_vec, read_name, write_counted_vec,
    write_counted_versioned_vec, write_name, DecodeError, ProtocolVersion, ReadBytes,
    ReadBytesExt, ReadFromBytes, ReadVersionedBytes, WriteBytes, WriteBytesExt, WriteToBytes,
    WriteVersionedBytes, LE,
};
use log::trace;
use std::io;

/// A raw 3D sample in the server's coordinate space.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A rigid-body orientation quaternion, `(x, y, z, w)` as laid out on the wire.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C)]
pub struct Orientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// A named marker set: the markers belonging to one tracked asset.
#[derive(Clone, Debug, PartialEq)]
#[repr(C)]
pub struct MarkerSetData {
    /// The asset name, null-terminated on the wire.
    pub name: String,
    pub markers: Vec<Position>,
}

/// One rigid body observation.
///
/// Up to NatNet 2.x the member markers ride along inside the rigid body itself, with
/// parallel id and size arrays from 2.0. From 3.0 the per-body marker detail is omitted
/// from the wire entirely and is recovered from the marker sets via the model
/// definitions instead.
#[derive(Clone, Debug, PartialEq)]
#[repr(C)]
pub struct RigidBodyData {
    /// The stream id the server tracks this body under.
    pub id: i32,
    pub position: Position,
    pub orientation: Orientation,
    /// Member marker positions. Empty on the wire at 3.0 and newer.
    pub markers: Vec<Position>,
    /// Parallel to `markers` (2.0 up to 3.0).
    pub marker_ids: Vec<i32>,
    /// Parallel to `markers` (2.0 up to 3.0).
    pub marker_sizes: Vec<f32>,
    /// Average residual between observed and expected marker positions. Zero below 2.0.
    pub mean_marker_error: f32,
    /// Status bits, present from 2.6: bit 0 = successfully tracked this frame.
    pub params: Option<i16>,
}

impl RigidBodyData {
    /// Whether the body was successfully tracked this frame.
    ///
    /// Streams older than 2.6 carry no tracking bit; for those this falls back to the
    /// `mean_marker_error > 0` heuristic that NatNet clients have historically used.
    pub fn tracking(&self) -> bool {
        match self.params {
            Some(params) => params & 0x01 != 0,
            None => self.mean_marker_error > 0.0,
        }
    }
}

/// A skeleton observation: an id plus one rigid body per joint.
#[derive(Clone, Debug, PartialEq)]
#[repr(C)]
pub struct SkeletonData {
    pub id: i32,
    pub joints: Vec<RigidBodyData>,
}

/// A labeled marker observation (2.3 and newer).
#[derive(Clone, Debug, PartialEq)]
#[repr(C)]
pub struct LabeledMarkerData {
    pub id: i32,
    pub position: Position,
    pub size: f32,
    /// Status bits, present from 2.6. See the `occluded`/`point_cloud_solved`/
    /// `model_solved` accessors.
    pub params: Option<i16>,
    /// Solver residual, present from 3.0.
    pub residual: Option<f32>,
}

impl LabeledMarkerData {
    /// The marker was not visible this frame.
    pub fn occluded(&self) -> bool {
        self.params.map_or(false, |p| p & 0x01 != 0)
    }

    /// The position was provided by the point-cloud solver.
    pub fn point_cloud_solved(&self) -> bool {
        self.params.map_or(false, |p| p & 0x02 != 0)
    }

    /// The position was provided by the model solver.
    pub fn model_solved(&self) -> bool {
        self.params.map_or(false, |p| p & 0x04 != 0)
    }
}

/// Force-plate samples (2.9 and newer), one `Vec<f32>` of sub-frames per channel.
///
/// Interpreting these is out of scope; they are parsed structurally so the cursor
/// advances exactly, and kept here as the hook for callers that want the raw samples.
#[derive(Clone, Debug, PartialEq)]
#[repr(C)]
pub struct ForcePlateData {
    pub id: i32,
    pub channels: Vec<Vec<f32>>,
}

/// A complete frame-of-data payload.
#[derive(Clone, Debug, PartialEq)]
#[repr(C)]
pub struct FrameOfData {
    pub frame_number: i32,
    pub marker_sets: Vec<MarkerSetData>,
    /// Markers the server could not associate with any asset.
    pub other_markers: Vec<Position>,
    pub rigid_bodies: Vec<RigidBodyData>,
    /// Empty below 2.1.
    pub skeletons: Vec<SkeletonData>,
    /// Empty below 2.3.
    pub labeled_markers: Vec<LabeledMarkerData>,
    /// Empty below 2.9. Never surfaced through the client's `Frame`.
    pub force_plates: Vec<ForcePlateData>,
    /// Server-reported latency in seconds.
    pub latency: f32,
    /// SMPTE timecode and sub-frame counter.
    pub timecode: u32,
    pub timecode_sub: u32,
    /// Server clock timestamp. Single precision on the wire below 2.7.
    pub timestamp: f64,
    /// Bit 0 = the server is recording, bit 1 = the tracked model list changed.
    pub params: i16,
}

impl FrameOfData {
    pub fn is_recording(&self) -> bool {
        self.params & 0x01 != 0
    }

    pub fn tracked_models_changed(&self) -> bool {
        self.params & 0x02 != 0
    }

    /// Decode a FRAMEOFDATA payload as the given protocol revision lays it out.
    ///
    /// Verifies the end-of-data sentinel and that the consumed byte count equals the
    /// payload length; a mismatch means the packet is malformed and no frame may be
    /// emitted from it.
    pub fn decode(payload: &[u8], version: ProtocolVersion) -> Result<Self, DecodeError> {
        let mut reader = payload;
        let frame = FrameOfData::read_versioned_bytes(&mut reader, version)?;
        let eod = reader.read_i32::<LE>()?;
        if eod != 0 {
            return Err(DecodeError::EndOfData(eod));
        }
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes {
                remaining: reader.len(),
            });
        }
        Ok(frame)
    }

    /// Encode the frame, including the trailing end-of-data sentinel.
    pub fn encode(&self, version: ProtocolVersion) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_versioned_bytes(&mut bytes, version)?;
        bytes.write_i32::<LE>(0)?;
        Ok(bytes)
    }
}

impl WriteToBytes for Position {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_f32::<LE>(self.x)?;
        writer.write_f32::<LE>(self.y)?;
        writer.write_f32::<LE>(self.z)?;
        Ok(())
    }
}

impl ReadFromBytes for Position {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let x = reader.read_f32::<LE>()?;
        let y = reader.read_f32::<LE>()?;
        let z = reader.read_f32::<LE>()?;
        Ok(Position { x, y, z })
    }
}

impl WriteToBytes for Orientation {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_f32::<LE>(self.x)?;
        writer.write_f32::<LE>(self.y)?;
        writer.write_f32::<LE>(self.z)?;
        writer.write_f32::<LE>(self.w)?;
        Ok(())
    }
}

impl ReadFromBytes for Orientation {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let x = reader.read_f32::<LE>()?;
        let y = reader.read_f32::<LE>()?;
        let z = reader.read_f32::<LE>()?;
        let w = reader.read_f32::<LE>()?;
        Ok(Orientation { x, y, z, w })
    }
}

impl WriteToBytes for MarkerSetData {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        write_name(&mut writer, &self.name)?;
        write_counted_vec(&mut writer, &self.markers)?;
        Ok(())
    }
}

impl ReadFromBytes for MarkerSetData {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let name = read_name(&mut reader)?;
        let markers = read_counted_vec(&mut reader)?;
        let marker_set = MarkerSetData { name, markers };
        Ok(marker_set)
    }
}

// Rigid bodies carry their member markers inline only below 3.0; the `major == 0`
// forward-compatibility wildcard therefore selects the 3.0-and-newer layout.
fn inline_rigid_markers(version: ProtocolVersion) -> bool {
    version.major != 0 && version.major < 3
}

impl WriteVersionedBytes for RigidBodyData {
    fn write_versioned_bytes<W: WriteBytesExt>(
        &self,
        mut writer: W,
        version: ProtocolVersion,
    ) -> io::Result<()> {
        writer.write_i32::<LE>(self.id)?;
        writer.write_bytes(self.position)?;
        writer.write_bytes(self.orientation)?;
        if inline_rigid_markers(version) {
            writer.write_i32::<LE>(self.markers.len() as i32)?;
            for marker in &self.markers {
                writer.write_bytes(marker)?;
            }
            if version.at_least(2, 0) {
                for &id in &self.marker_ids {
                    writer.write_i32::<LE>(id)?;
                }
                for &size in &self.marker_sizes {
                    writer.write_f32::<LE>(size)?;
                }
            }
        }
        if version.at_least(2, 0) {
            writer.write_f32::<LE>(self.mean_marker_error)?;
        }
        if version.at_least(2, 6) {
            writer.write_i16::<LE>(self.params.unwrap_or(0))?;
        }
        Ok(())
    }
}

impl ReadVersionedBytes for RigidBodyData {
    fn read_versioned_bytes<R: ReadBytesExt>(
        mut reader: R,
        version: ProtocolVersion,
    ) -> io::Result<Self> {
        let id = reader.read_i32::<LE>()?;
        let position = reader.read_bytes()?;
        let orientation = reader.read_bytes()?;
        let mut markers = Vec::new();
        let mut marker_ids = Vec::new();
        let mut marker_sizes = Vec::new();
        if inline_rigid_markers(version) {
            let num_markers = read_count(&mut reader)?;
            markers.reserve(num_markers as usize);
            for _ in 0..num_markers {
                markers.push(reader.read_bytes::<Position>()?);
            }
            if version.at_least(2, 0) {
                marker_ids.reserve(num_markers as usize);
                for _ in 0..num_markers {
                    marker_ids.push(reader.read_i32::<LE>()?);
                }
                marker_sizes.reserve(num_markers as usize);
                for _ in 0..num_markers {
                    marker_sizes.push(reader.read_f32::<LE>()?);
                }
            }
        }
        let mean_marker_error = if version.at_least(2, 0) {
            reader.read_f32::<LE>()?
        } else {
            0.0
        };
        let params = if version.at_least(2, 6) {
            Some(reader.read_i16::<LE>()?)
        } else {
            None
        };
        let rigid_body = RigidBodyData {
            id,
            position,
            orientation,
            markers,
            marker_ids,
            marker_sizes,
            mean_marker_error,
            params,
        };
        Ok(rigid_body)
    }
}

impl WriteVersionedBytes for SkeletonData {
    fn write_versioned_bytes<W: WriteBytesExt>(
        &self,
        mut writer: W,
        version: ProtocolVersion,
    ) -> io::Result<()> {
        writer.write_i32::<LE>(self.id)?;
        write_counted_versioned_vec(&mut writer, &self.joints, version)?;
        Ok(())
    }
}

impl ReadVersionedBytes for SkeletonData {
    fn read_versioned_bytes<R: ReadBytesExt>(
        mut reader: R,
        version: ProtocolVersion,
    ) -> io::Result<Self> {
        let id = reader.read_i32::<LE>()?;
        let joints = read_counted_versioned_vec(&mut reader, version)?;
        let skeleton = SkeletonData { id, joints };
        Ok(skeleton)
    }
}

impl WriteVersionedBytes for LabeledMarkerData {
    fn write_versioned_bytes<W: WriteBytesExt>(
        &self,
        mut writer: W,
        version: ProtocolVersion,
    ) -> io::Result<()> {
        writer.write_i32::<LE>(self.id)?;
        writer.write_bytes(self.position)?;
        writer.write_f32::<LE>(self.size)?;
        if version.at_least(2, 6) {
            writer.write_i16::<LE>(self.params.unwrap_or(0))?;
        }
        if version.at_least(3, 0) {
            writer.write_f32::<LE>(self.residual.unwrap_or(0.0))?;
        }
        Ok(())
    }
}

impl ReadVersionedBytes for LabeledMarkerData {
    fn read_versioned_bytes<R: ReadBytesExt>(
        mut reader: R,
        version: ProtocolVersion,
    ) -> io::Result<Self> {
        let id = reader.read_i32::<LE>()?;
        let position = reader.read_bytes()?;
        let size = reader.read_f32::<LE>()?;
        let params = if version.at_least(2, 6) {
            Some(reader.read_i16::<LE>()?)
        } else {
            None
        };
        let residual = if version.at_least(3, 0) {
            Some(reader.read_f32::<LE>()?)
        } else {
            None
        };
        let labeled_marker = LabeledMarkerData {
            id,
            position,
            size,
            params,
            residual,
        };
        Ok(labeled_marker)
    }
}

impl WriteToBytes for ForcePlateData {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<LE>(self.id)?;
        writer.write_i32::<LE>(self.channels.len() as i32)?;
        for channel in &self.channels {
            writer.write_i32::<LE>(channel.len() as i32)?;
            for &value in channel {
                writer.write_f32::<LE>(value)?;
            }
        }
        Ok(())
    }
}

impl ReadFromBytes for ForcePlateData {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let id = reader.read_i32::<LE>()?;
        let num_channels = read_count(&mut reader)?;
        let mut channels = Vec::with_capacity(num_channels.min(64) as usize);
        for _ in 0..num_channels {
            let num_frames = read_count(&mut reader)?;
            let mut frames = Vec::with_capacity(num_frames.min(1024) as usize);
            for _ in 0..num_frames {
                frames.push(reader.read_f32::<LE>()?);
            }
            channels.push(frames);
        }
        let force_plate = ForcePlateData { id, channels };
        Ok(force_plate)
    }
}

impl WriteVersionedBytes for FrameOfData {
    fn write_versioned_bytes<W: WriteBytesExt>(
        &self,
        mut writer: W,
        version: ProtocolVersion,
    ) -> io::Result<()> {
        writer.write_i32::<LE>(self.frame_number)?;
        write_counted_vec(&mut writer, &self.marker_sets)?;
        write_counted_vec(&mut writer, &self.other_markers)?;
        write_counted_versioned_vec(&mut writer, &self.rigid_bodies, version)?;
        if version.at_least(2, 1) {
            write_counted_versioned_vec(&mut writer, &self.skeletons, version)?;
        }
        if version.at_least(2, 3) {
            write_counted_versioned_vec(&mut writer, &self.labeled_markers, version)?;
        }
        if version.at_least(2, 9) {
            write_counted_vec(&mut writer, &self.force_plates)?;
        }
        writer.write_f32::<LE>(self.latency)?;
        writer.write_u32::<LE>(self.timecode)?;
        writer.write_u32::<LE>(self.timecode_sub)?;
        if version.at_least(2, 7) {
            writer.write_f64::<LE>(self.timestamp)?;
        } else {
            writer.write_f32::<LE>(self.timestamp as f32)?;
        }
        writer.write_i16::<LE>(self.params)?;
        Ok(())
    }
}

impl ReadVersionedBytes for FrameOfData {
    fn read_versioned_bytes<R: ReadBytesExt>(
        mut reader: R,
        version: ProtocolVersion,
    ) -> io::Result<Self> {
        let frame_number = reader.read_i32::<LE>()?;
        trace!("unpacking frame {}", frame_number);
        let marker_sets = read_counted_vec(&mut reader)?;
        let other_markers = read_counted_vec(&mut reader)?;
        let rigid_bodies = read_counted_versioned_vec(&mut reader, version)?;
        let skeletons = if version.at_least(2, 1) {
            read_counted_versioned_vec(&mut reader, version)?
        } else {
            Vec::new()
        };
        let labeled_markers = if version.at_least(2, 3) {
            read_counted_versioned_vec(&mut reader, version)?
        } else {
            Vec::new()
        };
        let force_plates = if version.at_least(2, 9) {
            read_counted_vec(&mut reader)?
        } else {
            Vec::new()
        };
        let latency = reader.read_f32::<LE>()?;
        let timecode = reader.read_u32::<LE>()?;
        let timecode_sub = reader.read_u32::<LE>()?;
        let timestamp = if version.at_least(2, 7) {
            reader.read_f64::<LE>()?
        } else {
            reader.read_f32::<LE>()? as f64
        };
        let params = reader.read_i16::<LE>()?;
        let frame = FrameOfData {
            frame_number,
            marker_sets,
            other_markers,
            rigid_bodies,
            skeletons,
            labeled_markers,
            force_plates,
            latency,
            timecode,
            timecode_sub,
            timestamp,
            params,
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;

    fn pos(x: f32, y: f32, z: f32) -> Position {
        Position { x, y, z }
    }

    const IDENTITY: Orientation = Orientation {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// A frame carrying exactly the fields the given revision lays out on the wire.
    fn synthetic_frame(version: ProtocolVersion) -> FrameOfData {
        let inline = inline_rigid_markers(version);
        let rigid_body = RigidBodyData {
            id: 7,
            position: pos(1.0, 2.0, 3.0),
            orientation: IDENTITY,
            markers: if inline {
                vec![pos(1.0, 2.0, 3.0), pos(1.5, 2.0, 3.0)]
            } else {
                Vec::new()
            },
            marker_ids: if inline { vec![1, 2] } else { Vec::new() },
            marker_sizes: if inline { vec![0.01, 0.012] } else { Vec::new() },
            mean_marker_error: 0.002,
            params: version.at_least(2, 6).then_some(0x01),
        };
        let skeletons = if version.at_least(2, 1) {
            vec![SkeletonData {
                id: 3,
                joints: vec![RigidBodyData {
                    id: 301,
                    position: pos(0.5, 1.0, 0.0),
                    orientation: IDENTITY,
                    markers: if inline { vec![pos(0.5, 1.0, 0.0)] } else { Vec::new() },
                    marker_ids: if inline { vec![9] } else { Vec::new() },
                    marker_sizes: if inline { vec![0.02] } else { Vec::new() },
                    mean_marker_error: 0.001,
                    params: version.at_least(2, 6).then_some(0x01),
                }],
            }]
        } else {
            Vec::new()
        };
        let labeled_markers = if version.at_least(2, 3) {
            vec![LabeledMarkerData {
                id: 42,
                position: pos(4.0, 5.0, 6.0),
                size: 0.014,
                params: version.at_least(2, 6).then_some(0x02),
                residual: version.at_least(3, 0).then_some(0.0005),
            }]
        } else {
            Vec::new()
        };
        let force_plates = if version.at_least(2, 9) {
            vec![ForcePlateData {
                id: 1,
                channels: vec![vec![0.1, 0.2, 0.3], vec![9.81]],
            }]
        } else {
            Vec::new()
        };
        FrameOfData {
            frame_number: 42,
            marker_sets: vec![MarkerSetData {
                name: "hand".to_string(),
                markers: vec![pos(1.0, 2.0, 3.0), pos(1.5, 2.0, 3.0)],
            }],
            other_markers: vec![pos(0.0, 0.0, 0.0), pos(10.0, 0.0, 0.0)],
            rigid_bodies: vec![rigid_body],
            skeletons,
            labeled_markers,
            force_plates,
            latency: 0.004,
            timecode: 0,
            timecode_sub: 0,
            // Exactly representable in f32 so the pre-2.7 narrowing round-trips.
            timestamp: 12.5,
            params: 0x01,
        }
    }

    #[test]
    fn round_trip_across_supported_versions() {
        let versions = [
            (2, 0),
            (2, 3),
            (2, 6),
            (2, 7),
            (2, 9),
            (2, 10),
            (3, 0),
            (3, 1),
        ];
        for (major, minor) in versions {
            let version = ProtocolVersion::new(major, minor);
            let frame = synthetic_frame(version);
            let bytes = frame.encode(version).unwrap();
            let decoded = FrameOfData::decode(&bytes, version)
                .unwrap_or_else(|e| panic!("decode failed at {}: {}", version, e));
            assert_eq!(decoded, frame, "round trip mismatch at {}", version);
        }
    }

    #[test]
    fn round_trip_randomized_positions() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for (major, minor) in [(2, 6), (2, 7), (3, 1)] {
            let version = ProtocolVersion::new(major, minor);
            for _ in 0..50 {
                let mut frame = synthetic_frame(version);
                frame.other_markers = (0..rng.gen_range(0..20))
                    .map(|_| {
                        pos(
                            rng.gen_range(-10.0..10.0),
                            rng.gen_range(-10.0..10.0),
                            rng.gen_range(-10.0..10.0),
                        )
                    })
                    .collect();
                frame.frame_number = rng.gen_range(0..i32::MAX);
                let bytes = frame.encode(version).unwrap();
                assert_eq!(FrameOfData::decode(&bytes, version).unwrap(), frame);
            }
        }
    }

    #[test]
    fn parallel_marker_arrays_agree() {
        let version = ProtocolVersion::new(2, 6);
        let frame = synthetic_frame(version);
        let bytes = frame.encode(version).unwrap();
        let decoded = FrameOfData::decode(&bytes, version).unwrap();
        for rb in &decoded.rigid_bodies {
            assert_eq!(rb.markers.len(), rb.marker_ids.len());
            assert_eq!(rb.markers.len(), rb.marker_sizes.len());
        }
    }

    #[test]
    fn minimal_frame_v26() {
        let version = ProtocolVersion::new(2, 6);
        let frame = FrameOfData {
            frame_number: 42,
            marker_sets: vec![MarkerSetData {
                name: "all".to_string(),
                markers: Vec::new(),
            }],
            other_markers: Vec::new(),
            rigid_bodies: vec![RigidBodyData {
                id: 1,
                position: pos(1.0, 2.0, 3.0),
                orientation: IDENTITY,
                markers: Vec::new(),
                marker_ids: Vec::new(),
                marker_sizes: Vec::new(),
                mean_marker_error: 0.0,
                params: Some(0x01),
            }],
            skeletons: Vec::new(),
            labeled_markers: Vec::new(),
            force_plates: Vec::new(),
            latency: 0.004,
            timecode: 0,
            timecode_sub: 0,
            timestamp: 0.0,
            params: 0,
        };
        let bytes = frame.encode(version).unwrap();
        let decoded = FrameOfData::decode(&bytes, version).unwrap();
        assert_eq!(decoded.frame_number, 42);
        assert_eq!(decoded.rigid_bodies.len(), 1);
        assert!(decoded.rigid_bodies[0].tracking());
        assert_eq!(decoded.latency, 0.004);
    }

    #[test]
    fn trailing_byte_is_malformed() {
        let version = ProtocolVersion::new(2, 6);
        let mut bytes = synthetic_frame(version).encode(version).unwrap();
        bytes.push(0xFF);
        match FrameOfData::decode(&bytes, version) {
            Err(DecodeError::TrailingBytes { remaining: 1 }) => {}
            other => panic!("expected TrailingBytes, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let version = ProtocolVersion::new(3, 1);
        let bytes = synthetic_frame(version).encode(version).unwrap();
        let truncated = &bytes[..bytes.len() - 5];
        assert!(FrameOfData::decode(truncated, version).is_err());
    }

    #[test]
    fn bad_sentinel_is_malformed() {
        let version = ProtocolVersion::new(2, 6);
        let mut bytes = synthetic_frame(version).encode(version).unwrap();
        let tail = bytes.len() - 4;
        bytes[tail..].copy_from_slice(&7i32.to_le_bytes());
        match FrameOfData::decode(&bytes, version) {
            Err(DecodeError::EndOfData(7)) => {}
            other => panic!("expected EndOfData, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn tracking_heuristic_below_2_6() {
        let tracked = RigidBodyData {
            id: 1,
            position: pos(0.0, 0.0, 0.0),
            orientation: IDENTITY,
            markers: Vec::new(),
            marker_ids: Vec::new(),
            marker_sizes: Vec::new(),
            mean_marker_error: 0.003,
            params: None,
        };
        assert!(tracked.tracking());
        let untracked = RigidBodyData {
            mean_marker_error: 0.0,
            ..tracked.clone()
        };
        assert!(!untracked.tracking());
        // The explicit bit wins once present, even with a zero error.
        let bit_tracked = RigidBodyData {
            params: Some(0x01),
            ..untracked
        };
        assert!(bit_tracked.tracking());
    }

    #[test]
    fn zero_major_decodes_as_newest() {
        let newest = ProtocolVersion::new(0, 0);
        let v31 = ProtocolVersion::new(3, 1);
        let frame = synthetic_frame(v31);
        let bytes = frame.encode(v31).unwrap();
        let decoded = FrameOfData::decode(&bytes, newest).unwrap();
        assert_eq!(decoded, frame);
    }
}
