//! Shared data types for asynchronous instrument I/O.
//!
//! This crate holds the plain values exchanged between the runtime, its
//! transport collaborators, and callers:
//!
//! - **Identities**: sessions, jobs, transport handles, trigger lines and bus segments
//! - **Operations**: what an asynchronous job asks the transport to do
//! - **Status**: job lifecycle states and transport error kinds
//! - **Events**: completion and service-request notifications
//!
//! Types here carry no behavior beyond small accessors and serde support.
//! The coordination logic lives in `instr-runtime`.

pub mod event;
pub mod status;
pub mod types;

pub use event::*;
pub use status::*;
pub use types::*;
