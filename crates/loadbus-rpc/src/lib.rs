//! The typed object and method facade: the `Kind` schema system (object
//! serdes) plus the method/interface descriptors that drive both client
//! proxies and server-side handler dispatch.

pub mod kind;
pub mod method;
pub mod workload_param;

pub use kind::{FieldSpec, Kind, MultiObjectDescriptor, ObjectDescriptor};
pub use method::{
    dispatch, invoke, protocol_error_from_code, CallContext, CommandSink, Interface, MethodHandler,
    MethodSpec, RpcError,
};
