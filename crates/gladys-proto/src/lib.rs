//! gRPC wire types for the GLADyS core services.
//!
//! The four service contracts (orchestrator, salience gateway, memory
//! storage, executive) are defined in `proto/` at the workspace root and
//! compiled here with `tonic-build`. Conversions between wire types and
//! the domain types in `gladys-core` live in [`convert`].

pub mod convert;

/// Metadata header carrying the trace id across service hops.
pub const TRACE_ID_HEADER: &str = "x-gladys-trace-id";

// Re-export generated protobuf types.
#[allow(clippy::clone_on_ref_ptr)] // Generated tonic code uses Arc::clone() patterns
#[allow(clippy::large_enum_variant)]
pub mod v1 {
    tonic::include_proto!("gladys.v1");
}
