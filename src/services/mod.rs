//! Services - pipeline stages and state management
//!
//! - `error_classifier` - device/network failures to the error taxonomy
//! - `permission` - camera authorization gate
//! - `camera` - camera acquisition state machine
//! - `normalizer` - raw payload to identity request
//! - `throttle` - busy and duplicate suppression
//! - `cache` - LRU+TTL identity cache
//! - `feedback` - operator feedback channels and sinks
//! - `performance` - rolling scan statistics
//! - `orchestrator` - scan-to-decision control loop

pub mod cache;
pub mod camera;
pub mod error_classifier;
pub mod feedback;
pub mod normalizer;
pub mod orchestrator;
pub mod performance;
pub mod permission;
pub mod throttle;

// Re-export commonly used types
pub use cache::IdentityCache;
pub use camera::CameraAcquisition;
pub use feedback::{FeedbackChannel, FeedbackEmitter, FeedbackSink, TerminalSink};
pub use normalizer::PayloadNormalizer;
pub use orchestrator::{OrchestratorHandle, ScanDisposition, ScanOrchestrator};
pub use performance::PerformanceMonitor;
pub use permission::PermissionGate;
pub use throttle::{DuplicateThrottle, ThrottleWindows};
