//! Client-facing payloads: the values, locations, and events the controller
//! exchanges with the editor through the outer server.

use std::path::PathBuf;

use quasar_jdwp::{ObjectId, ThreadId};
use serde::{Deserialize, Serialize};

use crate::breakpoints::Breakpoint;

/// A place in the target that a client request can refer back to.
///
/// Object ids are only valid within the session that minted them, and only
/// after the value containing them was returned by the controller (which
/// guarantees the id is held in the session's identity cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DebugLocation {
    ObjectReference {
        object_id: ObjectId,
    },
    ObjectField {
        object_id: ObjectId,
        field_name: String,
    },
    ArrayElement {
        object_id: ObjectId,
        index: u32,
    },
    StackSlot {
        thread_id: ThreadId,
        frame_index: u32,
        slot: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassField {
    pub index: u32,
    pub name: String,
    pub type_name: String,
    pub summary: String,
}

/// A target value marshaled for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DebugValue {
    Null,
    Primitive {
        summary: String,
        type_name: String,
    },
    Str {
        summary: String,
        fields: Vec<ClassField>,
        type_name: String,
        object_id: ObjectId,
    },
    Array {
        length: u32,
        type_name: String,
        element_type_name: String,
        object_id: ObjectId,
    },
    Object {
        summary: String,
        fields: Vec<ClassField>,
        type_name: String,
        object_id: ObjectId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackLocal {
    pub slot: u32,
    pub name: String,
    pub summary: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub index: u32,
    pub locals: Vec<StackLocal>,
    pub num_args: u32,
    pub class_name: String,
    pub method_name: String,
    pub source: Option<SourcePosition>,
    /// Id of the frame's `this` object, or -1 when unavailable.
    pub this_object_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backtrace {
    pub frames: Vec<StackFrame>,
    pub thread_id: ThreadId,
    pub thread_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointList {
    pub active: Vec<Breakpoint>,
    pub pending: Vec<Breakpoint>,
}

/// Reply to a start/attach request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StartResult {
    Success,
    Error { code: i32, message: String },
}

impl StartResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StartResult::Success)
    }
}

/// Asynchronous events broadcast to the sink supplied at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DebugEvent {
    VmStart,
    Disconnected,
    Step {
        thread_id: ThreadId,
        thread_name: String,
        source: SourcePosition,
    },
    Breakpoint {
        thread_id: ThreadId,
        thread_name: String,
        source: SourcePosition,
    },
    Exception {
        exception_id: ObjectId,
        thread_id: ThreadId,
        thread_name: String,
        /// Where the exception will be caught; absent for uncaught
        /// exceptions.
        catch_source: Option<SourcePosition>,
    },
    ThreadStart {
        thread_id: ThreadId,
    },
    ThreadDeath {
        thread_id: ThreadId,
    },
    Output {
        text: String,
    },
    BackgroundMessage {
        text: String,
    },
}
