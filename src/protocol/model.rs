//! ## ModelDef - the server's description of what it is tracking.
//!
//! A model-definition payload is a count-prefixed list of datasets, each tagged with a
//! type id: `0` marker set, `1` rigid body, `2` skeleton. The client keeps the most
//! recent tables around to resolve stream ids into names, and - from NatNet 3.0 - to map
//! asset marker sets back onto the rigid bodies that own them.

use crate::protocol::{
    read_count, read_name, write_name, DecodeError, ProtocolVersion, ReadBytes, ReadBytesExt,
    ReadVersionedBytes, WriteBytes, WriteBytesExt, WriteVersionedBytes, LE,
};
use crate::protocol::frame::Position;
use log::trace;
use std::collections::HashMap;
use std::io;

const DATASET_MARKER_SET: i32 = 0;
const DATASET_RIGID_BODY: i32 = 1;
const DATASET_SKELETON: i32 = 2;

/// The markers that make up one named marker set.
#[derive(Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub struct MarkerSetDescription {
    pub name: String,
    pub marker_names: Vec<String>,
}

/// One rigid body the server tracks.
#[derive(Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub struct RigidBodyDescription {
    /// Absent from the wire below 2.0.
    pub name: String,
    /// The stream id rigid bodies in frame-of-data packets refer to.
    pub id: i32,
    /// Stream id of the parent body; 0 for top-level bodies.
    pub parent_id: i32,
    /// Rest offset from the parent.
    pub offset: Position,
}

/// One skeleton: a named, ordered set of rigid-body joints.
#[derive(Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub struct SkeletonDescription {
    pub name: String,
    pub id: i32,
    pub joints: Vec<RigidBodyDescription>,
}

/// A single dataset within a MODELDEF payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Dataset {
    MarkerSet(MarkerSetDescription),
    RigidBody(RigidBodyDescription),
    Skeleton(SkeletonDescription),
}

/// The wire form of a MODELDEF payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelDef {
    pub datasets: Vec<Dataset>,
}

impl ModelDef {
    /// Decode a MODELDEF payload as the given protocol revision lays it out.
    ///
    /// Verifies that the consumed byte count equals the payload length.
    pub fn decode(payload: &[u8], version: ProtocolVersion) -> Result<Self, DecodeError> {
        let mut reader = payload;
        let num_datasets = read_count(&mut reader)?;
        trace!("unpacking {} model datasets", num_datasets);
        let mut datasets = Vec::with_capacity(num_datasets.min(256) as usize);
        for _ in 0..num_datasets {
            datasets.push(read_dataset(&mut reader, version)?);
        }
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes {
                remaining: reader.len(),
            });
        }
        Ok(ModelDef { datasets })
    }

    /// Encode the dataset list.
    ///
    /// The ≥3.0 rest-pose marker block on rigid-body datasets is not represented in
    /// [`RigidBodyDescription`], so it is written with a zero marker count.
    pub fn encode(&self, version: ProtocolVersion) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.write_i32::<LE>(self.datasets.len() as i32)?;
        for dataset in &self.datasets {
            write_dataset(&mut bytes, dataset, version)?;
        }
        Ok(bytes)
    }
}

fn read_dataset<R: ReadBytesExt>(mut reader: R, version: ProtocolVersion) -> io::Result<Dataset> {
    let dataset_type = reader.read_i32::<LE>()?;
    match dataset_type {
        DATASET_MARKER_SET => {
            let name = read_name(&mut reader)?;
            let num_markers = read_count(&mut reader)?;
            let mut marker_names = Vec::with_capacity(num_markers.min(1024) as usize);
            for _ in 0..num_markers {
                marker_names.push(read_name(&mut reader)?);
            }
            let description = MarkerSetDescription { name, marker_names };
            Ok(Dataset::MarkerSet(description))
        }
        DATASET_RIGID_BODY => {
            let description = RigidBodyDescription::read_versioned_bytes(&mut reader, version)?;
            // From 3.0 a standalone rigid-body dataset carries its rest-pose markers:
            // count, then count positions and count label ids. Skeleton joints do not.
            if version.at_least(3, 0) {
                let num_markers = read_count(&mut reader)?;
                for _ in 0..num_markers {
                    reader.read_bytes::<Position>()?;
                }
                for _ in 0..num_markers {
                    reader.read_i32::<LE>()?;
                }
            }
            Ok(Dataset::RigidBody(description))
        }
        DATASET_SKELETON => {
            let name = read_name(&mut reader)?;
            let id = reader.read_i32::<LE>()?;
            let num_joints = read_count(&mut reader)?;
            let mut joints = Vec::with_capacity(num_joints.min(256) as usize);
            for _ in 0..num_joints {
                joints.push(RigidBodyDescription::read_versioned_bytes(
                    &mut reader,
                    version,
                )?);
            }
            let description = SkeletonDescription { name, id, joints };
            Ok(Dataset::Skeleton(description))
        }
        other => {
            let err_msg = format!("unknown dataset type {}", other);
            Err(io::Error::new(io::ErrorKind::InvalidData, err_msg))
        }
    }
}

fn write_dataset<W: WriteBytesExt>(
    mut writer: W,
    dataset: &Dataset,
    version: ProtocolVersion,
) -> io::Result<()> {
    match dataset {
        Dataset::MarkerSet(description) => {
            writer.write_i32::<LE>(DATASET_MARKER_SET)?;
            write_name(&mut writer, &description.name)?;
            writer.write_i32::<LE>(description.marker_names.len() as i32)?;
            for marker_name in &description.marker_names {
                write_name(&mut writer, marker_name)?;
            }
        }
        Dataset::RigidBody(description) => {
            writer.write_i32::<LE>(DATASET_RIGID_BODY)?;
            description.write_versioned_bytes(&mut writer, version)?;
            if version.at_least(3, 0) {
                writer.write_i32::<LE>(0)?;
            }
        }
        Dataset::Skeleton(description) => {
            writer.write_i32::<LE>(DATASET_SKELETON)?;
            write_name(&mut writer, &description.name)?;
            writer.write_i32::<LE>(description.id)?;
            writer.write_i32::<LE>(description.joints.len() as i32)?;
            for joint in &description.joints {
                joint.write_versioned_bytes(&mut writer, version)?;
            }
        }
    }
    Ok(())
}

impl WriteVersionedBytes for RigidBodyDescription {
    fn write_versioned_bytes<W: WriteBytesExt>(
        &self,
        mut writer: W,
        version: ProtocolVersion,
    ) -> io::Result<()> {
        if version.at_least(2, 0) {
            write_name(&mut writer, &self.name)?;
        }
        writer.write_i32::<LE>(self.id)?;
        writer.write_i32::<LE>(self.parent_id)?;
        writer.write_bytes(self.offset)?;
        Ok(())
    }
}

impl ReadVersionedBytes for RigidBodyDescription {
    fn read_versioned_bytes<R: ReadBytesExt>(
        mut reader: R,
        version: ProtocolVersion,
    ) -> io::Result<Self> {
        let name = if version.at_least(2, 0) {
            read_name(&mut reader)?
        } else {
            String::new()
        };
        let id = reader.read_i32::<LE>()?;
        let parent_id = reader.read_i32::<LE>()?;
        let offset = reader.read_bytes()?;
        let description = RigidBodyDescription {
            name,
            id,
            parent_id,
            offset,
        };
        Ok(description)
    }
}

/// The most-recently-received model tables, published as one atomic snapshot.
///
/// The tables are replaced whole on every MODELDEF; readers never observe a
/// half-updated table. The name/stream-id indices are derived from the rigid-body
/// descriptions when the snapshot is built.
#[derive(Clone, Debug, Default)]
pub struct ModelDefinitions {
    pub marker_sets: Vec<MarkerSetDescription>,
    pub rigid_bodies: Vec<RigidBodyDescription>,
    pub skeletons: Vec<SkeletonDescription>,
    name_to_stream_id: HashMap<String, i32>,
    stream_id_to_name: HashMap<i32, String>,
}

impl ModelDefinitions {
    /// Build a snapshot, and its indices, from a decoded dataset list.
    pub fn from_model_def(def: ModelDef) -> Self {
        let mut marker_sets = Vec::new();
        let mut rigid_bodies = Vec::new();
        let mut skeletons = Vec::new();
        for dataset in def.datasets {
            match dataset {
                Dataset::MarkerSet(d) => marker_sets.push(d),
                Dataset::RigidBody(d) => rigid_bodies.push(d),
                Dataset::Skeleton(d) => skeletons.push(d),
            }
        }
        let mut name_to_stream_id = HashMap::new();
        let mut stream_id_to_name = HashMap::new();
        for rb in &rigid_bodies {
            name_to_stream_id.insert(rb.name.clone(), rb.id);
            stream_id_to_name.insert(rb.id, rb.name.clone());
        }
        ModelDefinitions {
            marker_sets,
            rigid_bodies,
            skeletons,
            name_to_stream_id,
            stream_id_to_name,
        }
    }

    /// The stream id a rigid body publishes under, looked up by name.
    pub fn stream_id(&self, name: &str) -> Option<i32> {
        self.name_to_stream_id.get(name).copied()
    }

    /// The name of the rigid body with the given stream id.
    pub fn rigid_body_name(&self, id: i32) -> Option<&str> {
        self.stream_id_to_name.get(&id).map(String::as_str)
    }

    /// The name of the skeleton with the given id.
    pub fn skeleton_name(&self, id: i32) -> Option<&str> {
        self.skeletons
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.as_str())
    }

    /// The name of a skeleton joint, looked up across every skeleton's joint table.
    pub fn joint_name(&self, id: i32) -> Option<&str> {
        self.skeletons
            .iter()
            .flat_map(|s| s.joints.iter())
            .find(|j| j.id == id)
            .map(|j| j.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::Position;
    use crate::protocol::WriteBytes;

    fn sample_def() -> ModelDef {
        ModelDef {
            datasets: vec![
                Dataset::MarkerSet(MarkerSetDescription {
                    name: "hand".to_string(),
                    marker_names: vec!["thumb".to_string(), "index".to_string()],
                }),
                Dataset::RigidBody(RigidBodyDescription {
                    name: "tool".to_string(),
                    id: 7,
                    parent_id: 0,
                    offset: Position {
                        x: 0.0,
                        y: 0.1,
                        z: 0.0,
                    },
                }),
                Dataset::Skeleton(SkeletonDescription {
                    name: "actor".to_string(),
                    id: 3,
                    joints: vec![
                        RigidBodyDescription {
                            name: "hip".to_string(),
                            id: 301,
                            parent_id: 0,
                            offset: Position::default(),
                        },
                        RigidBodyDescription {
                            name: "spine".to_string(),
                            id: 302,
                            parent_id: 301,
                            offset: Position {
                                x: 0.0,
                                y: 0.2,
                                z: 0.0,
                            },
                        },
                    ],
                }),
            ],
        }
    }

    #[test]
    fn round_trip_v26_and_v31() {
        for version in [ProtocolVersion::new(2, 6), ProtocolVersion::new(3, 1)] {
            let def = sample_def();
            let bytes = def.encode(version).unwrap();
            let decoded = ModelDef::decode(&bytes, version).unwrap();
            assert_eq!(decoded, def, "round trip mismatch at {}", version);
        }
    }

    #[test]
    fn rest_pose_marker_block_is_skipped() {
        // Hand-build a v3.1 rigid-body dataset carrying two rest-pose markers; the
        // decoder must walk past them and consume the payload exactly.
        let version = ProtocolVersion::new(3, 1);
        let mut bytes = Vec::new();
        bytes.write_i32::<LE>(1).unwrap();
        bytes.write_i32::<LE>(DATASET_RIGID_BODY).unwrap();
        write_name(&mut bytes, "tool").unwrap();
        bytes.write_i32::<LE>(7).unwrap();
        bytes.write_i32::<LE>(0).unwrap();
        bytes
            .write_bytes(Position {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            })
            .unwrap();
        bytes.write_i32::<LE>(2).unwrap();
        for _ in 0..2 {
            bytes
                .write_bytes(Position {
                    x: 0.5,
                    y: 0.5,
                    z: 0.5,
                })
                .unwrap();
        }
        bytes.write_i32::<LE>(11).unwrap();
        bytes.write_i32::<LE>(12).unwrap();
        let decoded = ModelDef::decode(&bytes, version).unwrap();
        assert_eq!(decoded.datasets.len(), 1);
        match &decoded.datasets[0] {
            Dataset::RigidBody(rb) => {
                assert_eq!(rb.name, "tool");
                assert_eq!(rb.id, 7);
            }
            other => panic!("expected a rigid body dataset, got {:?}", other),
        }
    }

    #[test]
    fn unnamed_rigid_bodies_below_2_0() {
        // NatNet 1.x rigid-body descriptions carry no name field.
        let version = ProtocolVersion::new(1, 0);
        let def = ModelDef {
            datasets: vec![Dataset::RigidBody(RigidBodyDescription {
                name: String::new(),
                id: 5,
                parent_id: 0,
                offset: Position::default(),
            })],
        };
        let bytes = def.encode(version).unwrap();
        let decoded = ModelDef::decode(&bytes, version).unwrap();
        assert_eq!(decoded, def);
    }

    #[test]
    fn snapshot_indices() {
        let defs = ModelDefinitions::from_model_def(sample_def());
        assert_eq!(defs.stream_id("tool"), Some(7));
        assert_eq!(defs.rigid_body_name(7), Some("tool"));
        assert_eq!(defs.rigid_body_name(8), None);
        assert_eq!(defs.skeleton_name(3), Some("actor"));
        assert_eq!(defs.joint_name(302), Some("spine"));
        assert_eq!(defs.joint_name(999), None);
    }

    #[test]
    fn unknown_dataset_type_is_malformed() {
        let mut bytes = Vec::new();
        bytes.write_i32::<LE>(1).unwrap();
        bytes.write_i32::<LE>(9).unwrap();
        assert!(ModelDef::decode(&bytes, ProtocolVersion::new(3, 1)).is_err());
    }
}
