//! Shared foundations for the lattice platform crates.
//!
//! Two things live here because every engine needs them: the error
//! taxonomy (`Error`/`ErrorKind`) and the chat message model consumed by
//! the LLM interfaces and the memory engine.

pub mod error;
pub mod message;

pub use error::{Error, ErrorKind, Result};
pub use message::{ContentPart, FunctionCall, Message, Role, ToolCall};
