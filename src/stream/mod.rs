//! Detection stream
//!
//! Everything between the socket and the registry.
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Device -> Client
//! {"type": "frame", "frame": "<base64 jpeg>"}
//! {"type": "detections", "objects": [{"id": "1", "label": "Person", "confidence": 0.92,
//!   "bbox": {"x": 0.2, "y": 0.3, "width": 0.2, "height": 0.4}, "depth": 2.5}]}
//!
//! // Client -> Device
//! {"command": "start_tracking", "objectId": "1"}
//! {"command": "stop_tracking"}
//! ```

pub mod decoder;
pub mod protocol;
pub mod transport;

pub use decoder::{Decoder, DecoderStats, StreamEvent};
pub use protocol::{DeviceMessage, ObjectRecord, TrackingCommand};
pub use transport::{SessionState, SessionStatus, SessionTransport, TransportEvent};
