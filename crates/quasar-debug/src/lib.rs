//! Debug control core of the quasar tooling server.
//!
//! This crate drives one target JVM at a time over the debug wire protocol:
//! it resolves source-level breakpoints against dynamically loaded classes,
//! steps and resumes threads, marshals target values for the editor, and
//! turns the target's blocking event queue into asynchronous domain events.
//!
//! The entry point is [`DebugController::spawn`], which starts the
//! single-consumer controller thread and returns a [`DebugHandle`] for
//! issuing requests. Domain events ([`DebugEvent`]) are broadcast to the
//! sink supplied at construction.

pub mod breakpoints;
pub mod config;
pub mod controller;
pub mod error;
pub mod object_registry;
pub mod proto;
pub mod source_map;

mod locations;
mod marshal;
mod output;
mod pump;
mod session;

pub use crate::breakpoints::Breakpoint;
pub use crate::config::DebugConfig;
pub use crate::controller::{DebugController, DebugHandle};
pub use crate::error::{DebugError, DebugResult};
pub use crate::proto::{
    Backtrace, BreakpointList, ClassField, DebugEvent, DebugLocation, DebugValue, SourcePosition,
    StackFrame, StackLocal, StartResult,
};
