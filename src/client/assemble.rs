//! Raw decoded primitives to application-facing [`Frame`] values.
//!
//! Runs on the receiver thread, once per decoded frame-of-data. Applies the user
//! transform to every position and orientation, resolves names through the latest
//! model-definition snapshot, merges asset markers back onto their rigid bodies for
//! NatNet 3.0 and newer, and computes the duplicate-filtered marker view.

use crate::frame::{Frame, LabeledMarker, Marker, RigidBody, Skeleton, UNKNOWN_NAME};
use crate::protocol::frame::{FrameOfData, Position, RigidBodyData};
use crate::protocol::model::ModelDefinitions;
use crate::protocol::ProtocolVersion;
use glam::{Mat4, Quat, Vec3};
use std::collections::{BTreeMap, HashMap};

fn point(transform: &Mat4, p: Position) -> Vec3 {
    transform.transform_point3(Vec3::new(p.x, p.y, p.z))
}

fn rigid_body(
    raw: &RigidBodyData,
    transform: &Mat4,
    rotation: Quat,
    name: String,
    asset_markers: Option<&Vec<Marker>>,
) -> RigidBody {
    let raw_position = Vec3::new(raw.position.x, raw.position.y, raw.position.z);
    let translation = transform.transform_point3(raw_position);
    let q = Quat::from_xyzw(
        raw.orientation.x,
        raw.orientation.y,
        raw.orientation.z,
        raw.orientation.w,
    );
    let markers = match asset_markers {
        // 3.0+: per-body marker detail comes from the asset's marker set.
        Some(markers) => markers.clone(),
        None => raw.markers.iter().map(|&m| point(transform, m)).collect(),
    };
    RigidBody {
        id: raw.id,
        name,
        matrix: Mat4::from_rotation_translation(rotation * q, translation),
        raw_position,
        markers,
        marker_ids: raw.marker_ids.clone(),
        marker_sizes: raw.marker_sizes.clone(),
        mean_marker_error: raw.mean_marker_error,
        tracking: raw.tracking(),
    }
}

/// Build the consumer-facing frame from one decoded payload.
///
/// `arrival` is the datagram's local arrival time in seconds on the engine clock and
/// becomes the frame's delivery timestamp.
pub(crate) fn assemble(
    raw: FrameOfData,
    version: ProtocolVersion,
    transform: &Mat4,
    models: &ModelDefinitions,
    removal_distance: f32,
    arrival: f64,
) -> Frame {
    let (_, rotation, _) = transform.to_scale_rotation_translation();

    let mut marker_sets: BTreeMap<String, Vec<Marker>> = BTreeMap::new();
    // For 3.0+ the marker sets double as the source of rigid-body member markers,
    // keyed by the stream id the model definitions associate with the asset name.
    let mut markers_by_stream_id: HashMap<i32, Vec<Marker>> = HashMap::new();
    let merge_assets = version.at_least(3, 0);
    for set in &raw.marker_sets {
        let markers: Vec<Marker> = set.markers.iter().map(|&m| point(transform, m)).collect();
        if merge_assets {
            if let Some(id) = models.stream_id(&set.name) {
                markers_by_stream_id.insert(id, markers.clone());
            }
        }
        marker_sets.insert(set.name.clone(), markers);
    }

    let mut markers: Vec<Marker> = raw
        .other_markers
        .iter()
        .map(|&m| point(transform, m))
        .collect();

    let labeled_markers: Vec<LabeledMarker> = raw
        .labeled_markers
        .iter()
        .map(|m| LabeledMarker {
            id: m.id,
            position: point(transform, m.position),
            size: m.size,
            params: m.params.unwrap_or(0),
            residual: m.residual.unwrap_or(0.0),
        })
        .collect();
    // Labeled markers join the loose marker pool as well.
    markers.extend(labeled_markers.iter().map(|m| m.position));

    let rigid_bodies: Vec<RigidBody> = raw
        .rigid_bodies
        .iter()
        .map(|rb| {
            let name = models
                .rigid_body_name(rb.id)
                .unwrap_or(UNKNOWN_NAME)
                .to_string();
            let asset_markers = merge_assets
                .then(|| markers_by_stream_id.get(&rb.id))
                .flatten();
            rigid_body(rb, transform, rotation, name, asset_markers)
        })
        .collect();

    let skeletons: Vec<Skeleton> = raw
        .skeletons
        .iter()
        .map(|s| {
            let name = models.skeleton_name(s.id).unwrap_or(UNKNOWN_NAME).to_string();
            let joints = s
                .joints
                .iter()
                .map(|j| {
                    let joint_name = models
                        .joint_name(j.id)
                        .or_else(|| models.rigid_body_name(j.id))
                        .unwrap_or(UNKNOWN_NAME)
                        .to_string();
                    rigid_body(j, transform, rotation, joint_name, None)
                })
                .collect();
            Skeleton {
                id: s.id,
                name,
                joints,
            }
        })
        .collect();

    let filtered_markers = filter_markers(&markers, &rigid_bodies, removal_distance);

    Frame {
        timestamp: arrival,
        frame_number: raw.frame_number,
        marker_sets,
        markers,
        filtered_markers,
        labeled_markers,
        rigid_bodies,
        skeletons,
        latency: raw.latency,
        timecode: raw.timecode,
        timecode_sub: raw.timecode_sub,
        natnet_timestamp: raw.timestamp,
        is_recording: raw.is_recording(),
        tracked_models_changed: raw.tracked_models_changed(),
    }
}

/// The marker pool minus any point duplicating a rigid-body member marker.
///
/// O(markers x member markers); distances are compared in user-transformed
/// coordinates. A distance of zero disables the filter.
fn filter_markers(markers: &[Marker], rigid_bodies: &[RigidBody], distance: f32) -> Vec<Marker> {
    if distance <= 0.0 {
        return markers.to_vec();
    }
    let limit_sq = distance * distance;
    markers
        .iter()
        .filter(|&&m| {
            !rigid_bodies
                .iter()
                .flat_map(|rb| rb.markers.iter())
                .any(|member| m.distance_squared(*member) <= limit_sq)
        })
        .copied()
        .collect()
}
