//! Message routing between views and the pipeline.
//!
//! Views speak three inbound channels (`LOADMODULE`, `EXECUTE`, `READY`) and
//! receive replies on `LOADMODULE`/`EXECUTE` plus the `NEW` payload once a
//! freshly loaded view reports ready.

pub mod messages;
pub mod router;

pub use messages::{argument_text, ClientMessage, ServerMessage};
pub use router::{MessageRouter, Reply};
