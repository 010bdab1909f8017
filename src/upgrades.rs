//! Upgrade controllers for the Talos OS layer and the Kubernetes layer.
//!
//! Both controllers share the same shape: validate the target, resolve the
//! current version through a caller-chosen oracle, decide, and only then
//! touch the cluster. The decision logic is identical in rehearsal and live
//! runs; only execution differs.

pub mod kubernetes;
pub mod oracle;
pub mod talos;
