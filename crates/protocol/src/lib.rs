//! Wire types for the scenario execution protocol.
//!
//! This crate contains the serde-serializable types shared between the
//! execution engine and its clients: the test plan as authored (scenarios of
//! steps), the session status vocabulary, and the JSON messages exchanged
//! over the real-time channel. These types represent the "protocol layer" -
//! the shapes of data as they appear on the wire.
//!
//! Types in this crate are pure data plus validation; the execution
//! semantics live in `scn-engine`.

pub mod message;
pub mod plan;
pub mod status;

pub use message::*;
pub use plan::*;
pub use status::*;
