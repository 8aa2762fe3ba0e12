//! ## Application-facing mocap data.
//!
//! Everything in this module is in *user* coordinates: the client's transform has been
//! applied to every position and orientation, names have been resolved through the most
//! recent model definitions, and the duplicate-point filter has produced the
//! `filtered_markers` view. Values are immutable snapshots - a marker, rigid body or
//! skeleton exists only for the [`Frame`] that contains it.

use glam::{Mat4, Quat, Vec3};
use std::collections::BTreeMap;

/// The name a rigid body or skeleton reports until a model definition resolves it.
pub const UNKNOWN_NAME: &str = "(UNKNOWN)";

/// A single tracked point.
pub type Marker = Vec3;

/// A marker the server has identified, with its status bits.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LabeledMarker {
    pub id: i32,
    pub position: Vec3,
    pub size: f32,
    /// Raw status bits; see the accessors.
    pub params: i16,
    /// Solver residual (NatNet 3.0+, zero otherwise).
    pub residual: f32,
}

impl LabeledMarker {
    /// The marker was not visible this frame.
    pub fn occluded(&self) -> bool {
        self.params & 0x01 != 0
    }

    /// The position was provided by the point-cloud solver.
    pub fn point_cloud_solved(&self) -> bool {
        self.params & 0x02 != 0
    }

    /// The position was provided by the model solver.
    pub fn model_solved(&self) -> bool {
        self.params & 0x04 != 0
    }
}

/// A pose-tracked assembly of markers.
#[derive(Clone, Debug)]
pub struct RigidBody {
    /// The stream id the server publishes this body under.
    pub id: i32,
    /// Resolved from the latest model definitions; [`UNKNOWN_NAME`] until one arrives.
    pub name: String,
    /// The body pose (translation and rotation) in user coordinates.
    pub matrix: Mat4,
    /// The translation before the user transform was applied.
    pub raw_position: Vec3,
    /// Member markers, in user coordinates.
    pub markers: Vec<Marker>,
    /// Parallel to `markers` where the stream provides ids (NatNet 2.0 up to 3.0).
    pub marker_ids: Vec<i32>,
    /// Parallel to `markers` where the stream provides sizes (NatNet 2.0 up to 3.0).
    pub marker_sizes: Vec<f32>,
    /// Average residual between observed and expected marker positions.
    pub mean_marker_error: f32,
    /// Whether the body was successfully tracked this frame. Below NatNet 2.6 this is
    /// the `mean_marker_error > 0` heuristic rather than an explicit bit.
    pub tracking: bool,
}

impl RigidBody {
    /// The body's translation in user coordinates.
    pub fn position(&self) -> Vec3 {
        self.matrix.w_axis.truncate()
    }

    /// The body's orientation in user coordinates.
    pub fn orientation(&self) -> Quat {
        Quat::from_mat4(&self.matrix)
    }
}

/// A named set of connected rigid-body joints.
#[derive(Clone, Debug)]
pub struct Skeleton {
    pub id: i32,
    /// Resolved from the latest model definitions; [`UNKNOWN_NAME`] until one arrives.
    pub name: String,
    pub joints: Vec<RigidBody>,
}

/// One timestamped observation of every tracked entity, ready for consumption.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    /// Local arrival time of the datagram, in seconds on the client's monotonic clock.
    /// Monotonic with arrival order within a session.
    pub timestamp: f64,
    /// The server's frame number. Not guaranteed contiguous on lossy networks.
    pub frame_number: i32,
    /// Marker sets keyed by asset name.
    pub marker_sets: BTreeMap<String, Vec<Marker>>,
    /// All loose markers, including the labeled ones.
    pub markers: Vec<Marker>,
    /// `markers` with points duplicating a rigid-body member marker removed. Equals
    /// `markers` when the removal distance is zero.
    pub filtered_markers: Vec<Marker>,
    pub labeled_markers: Vec<LabeledMarker>,
    pub rigid_bodies: Vec<RigidBody>,
    pub skeletons: Vec<Skeleton>,
    /// Server-reported latency in seconds.
    pub latency: f32,
    /// SMPTE timecode and sub-frame counter.
    pub timecode: u32,
    pub timecode_sub: u32,
    /// The server's own clock timestamp for this frame.
    pub natnet_timestamp: f64,
    /// The server is recording.
    pub is_recording: bool,
    /// The list of actively tracked models has changed since the last frame.
    pub tracked_models_changed: bool,
}

impl Frame {
    /// The rigid body with the given stream id, if present this frame.
    pub fn rigid_body(&self, id: i32) -> Option<&RigidBody> {
        self.rigid_bodies.iter().find(|rb| rb.id == id)
    }

    /// The rigid body with the given resolved name, if present this frame.
    pub fn rigid_body_by_name(&self, name: &str) -> Option<&RigidBody> {
        self.rigid_bodies.iter().find(|rb| rb.name == name)
    }

    /// The skeleton with the given id, if present this frame.
    pub fn skeleton(&self, id: i32) -> Option<&Skeleton> {
        self.skeletons.iter().find(|s| s.id == id)
    }

    /// The skeleton with the given resolved name, if present this frame.
    pub fn skeleton_by_name(&self, name: &str) -> Option<&Skeleton> {
        self.skeletons.iter().find(|s| s.name == name)
    }
}
