//! Instrument runtime - asynchronous jobs, completion dispatch, and hardware guards
//!
//! This crate coordinates non-blocking I/O against instrument sessions on top
//! of a [`Transport`]:
//!
//! - **Sessions**: per-device contexts owning their jobs and handlers
//! - **Job registry**: pending jobs, cancellation, terminal status
//! - **Dispatcher**: one completion handler per session, run off the caller's stack
//! - **Guards**: trigger reservations, trigger routes, and session locks that
//!   release only what they acquired
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  open / close  ┌─────────────────┐
//! │ application  ├───────────────►│ ResourceManager │
//! └──────┬───────┘                │  dispatch loop  │◄──── notifications ───┐
//!        │ submit / cancel        └────────┬────────┘                       │
//! ┌──────▼───────┐                         │ settle + deliver        ┌──────┴────┐
//! │   Session    ├─────────────────────────┼────────────────────────►│ Transport │
//! │ jobs+handler │◄────────────────────────┘  begin / abort / claim  └───────────┘
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let (sim, notifications) = SimTransport::new();
//! let sim = sim.with_resource("GPIB::2::INSTR");
//! let (manager, _loop) = ResourceManager::start(Arc::new(sim), notifications, RuntimeConfig::default());
//!
//! let session = manager.open("GPIB::2::INSTR")?;
//! let job = session.read_async(4096)?;
//! match session.wait(&job, Duration::from_secs(2)).await {
//!     Ok(status) => println!("{status}"),
//!     Err(e) if e.is_timeout() => { session.cancel(&job)?; }
//!     Err(e) => return Err(e),
//! }
//! session.close();
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod job;
pub mod manager;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::RuntimeConfig;
pub use dispatcher::{CompletionHandler, ServiceRequestHandler};
pub use error::{Error, Result};
pub use guard::{GuardState, Pairing, Reservation, RouteHandle, ScopedGuard, SessionLock};
pub use job::AsyncJob;
pub use manager::ResourceManager;
pub use registry::CancelOutcome;
pub use session::Session;
pub use transport::{
	NotificationReceiver, NotificationSender, SimTransport, Transport, TransportCall, notification_channel,
	resource_expression,
};

pub use instr_protocol as protocol;
