//! Data model shared between the monitor engine and the surfaces that
//! create, edit and persist monitor records.

pub mod monitor;

pub use monitor::{
    MonitorId, MonitorRecord, MonitorState, MonitorTarget, MonitorType, ValidationError,
};
