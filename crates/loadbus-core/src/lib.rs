//! The broker's in-process routing core: connection state, flows, ACLs,
//! the local-agent trait, and the broker itself. No socket I/O lives
//! here — that belongs to the deployable broker binary, which implements
//! [`connection::FrameSink`] over real TCP.

pub mod agent;
pub mod broker;
pub mod connection;
pub mod flow;
pub mod state;

pub use agent::{LocalAgent, ListenerAgent};
pub use broker::{Broker, ConnectionSnapshot, LocalCommandSink};
pub use connection::{Connection, Endpoint, FrameSink};
pub use flow::{AclRule, Flow, ListenerFlow};
pub use state::{AuthLevel, ConnState};
