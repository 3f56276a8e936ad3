//! Wire protocol shared by the Aurora client crates.
//!
//! Every request and response travels inside an [`envelope::Message`];
//! the typed payloads live in [`messages`] and the map/sensor records in
//! [`types`].

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{ErrorCode, IdMismatch, Message, WireError};
pub use types::{
    GlobalMappingInfo, ImuSample, Keyframe, LidarPoint, LidarScan, MapDescriptor, MapId,
    MapPoint, MapSelector, PoseSE3, Quaternion, StorageSessionKind, StorageState, StorageStatus,
    Vector3,
};
