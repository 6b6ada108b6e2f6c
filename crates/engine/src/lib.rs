//! scn: an execution engine for declarative UI test scenarios.
//!
//! The engine runs multi-step test plans against a pluggable
//! browser-automation backend, supports interruption for human-in-the-loop
//! verification (CAPTCHA solving and the like) mid-run, and reports
//! progress to observers in real time.
//!
//! # Architecture
//!
//! - [`automation::Automation`] - the capability contract every backend
//!   implements; the engine never depends on a concrete backend.
//! - [`backend`] - the closed set of implementations: CDP over a
//!   WebSocket, and a scripted mock.
//! - [`registry::SessionRegistry`] - authoritative owner of session
//!   records, one lock and one signal channel per session.
//! - [`executor`] - the per-session step scheduler enforcing the state
//!   machine (pause/resume/stop/manual-verification gating).
//! - [`broadcast::Broadcaster`] - best-effort fan-out of progress events
//!   to every connected observer.
//! - [`Engine`] - the facade tying these together behind the control
//!   surface.
//!
//! # Example
//!
//! ```ignore
//! use scn::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default());
//! let plan = serde_json::from_str(r#"{ "scenarios": [ ... ] }"#)?;
//! let session_id = engine.start_execution(1, None, &plan)?;
//!
//! let mut sub = engine.subscribe();
//! while let Some(event) = sub.rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod automation;
pub mod backend;
pub mod broadcast;
mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod session;

pub use automation::{Automation, InterceptRule, register_mocks};
pub use backend::{Backend, BackendConfig, BackendKind, CdpBackend, MockBackend};
pub use broadcast::{Broadcaster, Subscription};
pub use engine::{Engine, EngineConfig};
pub use error::{AdapterError, EngineError, Result};
pub use executor::{ResolvedAction, ResolvedStep, RunConfig, resolve_plan, run_session, step_message};
pub use registry::{SessionCell, SessionRegistry};
pub use session::{LogEntry, LogKind, Session, now_ms};
