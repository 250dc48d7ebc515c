//! Parkwatch Monitor
//!
//! Watches a parking bay through an MJPEG camera. Every ten seconds a frame
//! is saved and sent to a plate recognition service; each confidently read
//! plate is looked up in the payment registry, the gate display is told
//! whether it has paid, and the detection is appended to the parking log.
//!
//! ## Architecture
//!
//! ```text
//!  Camera (MJPEG)        Plate Recognizer API         Gate display
//! ┌──────────────┐       ┌──────────────┐            ┌──────────────┐
//! │ MjpegStream  │       │ Recognition  │            │ HttpNotifier │
//! └──────────────┘       │ Client       │            └──────────────┘
//!        │               └──────────────┘                   ▲
//!        ▼                      ▲                           │
//! ┌──────────────┐       ┌──────────────┐            ┌──────────────┐
//! │ Cadence      │──────▶│ Snapshot     │───────────▶│ Reconciler   │
//! │ Gate         │       │ Writer       │            └──────────────┘
//! └──────────────┘       └──────────────┘                   │
//!                               │                           ▼
//!                               ▼                    ┌──────────────┐
//!                          ./photo/*.jpg             │ ParkingStore │
//!                                                    │ (SQLite)     │
//!                                                    └──────────────┘
//! ```
//!
//! Everything runs on one task as sequential ticks driven by
//! [`AcquisitionLoop`].

pub mod acquisition;
pub mod cadence;
pub mod config;
pub mod mjpeg;
pub mod notifier;
pub mod recognition;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod stream;

pub use acquisition::{
    AcquisitionLoop, AcquisitionSettings, CaptureReport, Clock, LoopExit, LoopStats, SystemClock,
    TickOutcome,
};
pub use cadence::{CadenceGate, CadenceState};
pub use config::MonitorConfig;
pub use notifier::{HttpNotifier, Notifier, NotifyError};
pub use recognition::{PlateRecognizer, RecognitionCandidate, RecognitionClient, RecognitionError};
pub use reconcile::{ReconcileOutcome, Reconciler, StatusSource};
pub use snapshot::{Snapshot, SnapshotError, SnapshotWriter};
pub use store::{AuditLog, ParkingLogEntry, ParkingStore, PaymentRegistry, PaymentStatus, StoreError};
pub use stream::{FrameSource, MjpegStream, RawFrame, StreamError};
