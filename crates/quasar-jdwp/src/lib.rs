//! Typed debug-wire protocol (JDWP) facade for the quasar debug core.
//!
//! `quasar-debug` consumes this crate to drive the target JVM: installing
//! event requests, walking stacks, reading and writing values, and draining
//! the target's event queue.
//!
//! The crate deliberately contains no wire-level implementation. It defines
//! the [`Vm`] and [`Connector`] traits plus the value/event data model, and a
//! scripted [`mock`] implementation used by tests. A production transport
//! plugs in behind the same traits.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub type ThreadId = u64;
pub type ObjectId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
/// Identifier of an installed event request, minted by the target runtime.
pub type RequestId = i32;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("target disconnected")]
    Disconnected,
    #[error("invalid object id {0}")]
    InvalidObject(ObjectId),
    #[error("invalid thread id {0}")]
    InvalidThread(ThreadId),
    #[error("invalid frame index {0}")]
    InvalidFrame(u32),
    #[error("debug information is absent")]
    AbsentInformation,
    #[error("operation not supported by the target")]
    Unsupported,
    #[error("wire protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VmError {
    /// True when the underlying connection is gone and every subsequent
    /// operation on the same handle will fail the same way.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, VmError::Disconnected)
    }
}

pub type Result<T> = std::result::Result<T, VmError>;

/// Whether the target pauses threads when an event for this request fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPolicy {
    All,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDepth {
    Into,
    Over,
    Out,
}

/// A concrete code position inside a loaded class at which a breakpoint can
/// be installed, together with the source coordinates the target reports for
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireLocation {
    pub class: ReferenceTypeId,
    pub method: MethodId,
    pub index: u64,
    pub line: u32,
    pub source_name: String,
    pub source_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub id: ReferenceTypeId,
    /// Fully qualified dotted name, e.g. `com.example.Main`.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: FieldId,
    pub name: String,
    pub type_name: String,
    pub is_static: bool,
}

/// A local variable slot visible at some point of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: u32,
    pub name: String,
    pub type_name: String,
}

/// A value read from the target runtime.
///
/// Object-like variants carry only the target-minted id; everything else
/// about them (type, fields, text, elements) is read through [`Vm`].
#[derive(Debug, Clone, PartialEq)]
pub enum VmValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(ObjectId),
    Array(ObjectId),
    Object(ObjectId),
}

impl VmValue {
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            VmValue::Str(id) | VmValue::Array(id) | VmValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    VmStart {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        class: ReferenceTypeId,
    },
    Breakpoint {
        request: RequestId,
        thread: ThreadId,
        location: WireLocation,
    },
    Step {
        request: RequestId,
        thread: ThreadId,
        location: WireLocation,
    },
    Exception {
        thread: ThreadId,
        exception: ObjectId,
        catch_location: Option<WireLocation>,
    },
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    FieldAccess {
        thread: ThreadId,
    },
    MethodEntry {
        thread: ThreadId,
    },
    MethodExit {
        thread: ThreadId,
    },
    ClassUnload {
        signature: String,
    },
    VmDeath,
    VmDisconnect,
}

/// One batch drained from the target's event queue. All events in a set were
/// raised together and share a suspend policy; a suspend-all set keeps the
/// target paused until [`Vm::resume_event_set`] is called for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSet {
    pub id: u64,
    pub suspend: SuspendPolicy,
    pub events: Vec<VmEvent>,
}

impl EventSet {
    pub fn is_disconnect(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, VmEvent::VmDeath | VmEvent::VmDisconnect))
    }
}

/// Blocking client surface over one live target runtime connection.
///
/// Every method may fail with [`VmError::Disconnected`] at any time; callers
/// are expected to treat that as a session-ending condition rather than
/// retry. Implementations must be usable from multiple threads (the event
/// pump blocks on [`Vm::next_event_set`] while the controller issues
/// commands).
pub trait Vm: Send + Sync {
    /// Release the connection. Idempotent; tolerates an already-disconnected
    /// target.
    fn dispose(&self);

    /// Resume the whole target.
    fn resume(&self) -> Result<()>;

    /// False for read-only targets (e.g. core-dump style connections); value
    /// mutation and method invocation are unavailable on those.
    fn can_be_modified(&self) -> bool;

    fn all_classes(&self) -> Result<Vec<ClassInfo>>;
    fn all_threads(&self) -> Result<Vec<ThreadInfo>>;

    // Reference types ------------------------------------------------------

    /// Unqualified source file name the class was compiled from.
    fn source_name(&self, class: ReferenceTypeId) -> Result<String>;
    fn reference_type_name(&self, class: ReferenceTypeId) -> Result<String>;
    /// Fields declared directly by `class`, in declaration order. Inherited
    /// fields are reached by walking [`Vm::superclass`].
    fn fields(&self, class: ReferenceTypeId) -> Result<Vec<FieldInfo>>;
    fn superclass(&self, class: ReferenceTypeId) -> Result<Option<ReferenceTypeId>>;
    /// All code locations of `class` (across its methods and the class
    /// itself) that map to the given source line. Methods with no line info
    /// contribute nothing.
    fn locations_of_line(&self, class: ReferenceTypeId, line: u32) -> Result<Vec<WireLocation>>;
    fn method_name(&self, class: ReferenceTypeId, method: MethodId) -> Result<String>;

    // Threads and frames ---------------------------------------------------

    fn thread_name(&self, thread: ThreadId) -> Result<String>;
    fn frame_count(&self, thread: ThreadId) -> Result<u32>;
    fn frame_location(&self, thread: ThreadId, frame: u32) -> Result<WireLocation>;
    fn visible_variables(&self, thread: ThreadId, frame: u32) -> Result<Vec<SlotInfo>>;
    fn slot_value(&self, thread: ThreadId, frame: u32, slot: u32) -> Result<VmValue>;
    fn set_slot_value(
        &self,
        thread: ThreadId,
        frame: u32,
        slot: u32,
        value: &VmValue,
    ) -> Result<()>;
    fn this_object(&self, thread: ThreadId, frame: u32) -> Result<Option<ObjectId>>;
    fn argument_count(&self, thread: ThreadId, frame: u32) -> Result<u32>;

    // Objects --------------------------------------------------------------

    fn object_reference_type(&self, object: ObjectId) -> Result<ReferenceTypeId>;
    fn string_text(&self, object: ObjectId) -> Result<String>;
    fn array_length(&self, object: ObjectId) -> Result<u32>;
    fn array_element_type_name(&self, object: ObjectId) -> Result<String>;
    fn array_elements(&self, object: ObjectId, first: u32, count: u32) -> Result<Vec<VmValue>>;
    /// Value of an instance field of `object`.
    fn field_value(&self, object: ObjectId, field: FieldId) -> Result<VmValue>;
    /// Value of a static field declared by `class`.
    fn static_field_value(&self, class: ReferenceTypeId, field: FieldId) -> Result<VmValue>;

    /// Create a new string in the target (JDWP `mirrorOf`).
    fn create_string(&self, text: &str) -> Result<VmValue>;

    /// Invoke `toString()` on `object` in the given thread, resuming only
    /// that thread for the duration of the call (single-threaded invocation
    /// semantics).
    fn invoke_to_string(&self, thread: ThreadId, object: ObjectId) -> Result<String>;

    // Event requests -------------------------------------------------------

    fn request_breakpoint(
        &self,
        location: &WireLocation,
        suspend: SuspendPolicy,
    ) -> Result<RequestId>;
    /// Create a line step bounded by a count filter of one, so the request
    /// auto-expires after a single step event.
    fn request_step(
        &self,
        thread: ThreadId,
        depth: StepDepth,
        suspend: SuspendPolicy,
    ) -> Result<RequestId>;
    fn request_class_prepare(&self, suspend: SuspendPolicy) -> Result<RequestId>;
    fn request_thread_start(&self, suspend: SuspendPolicy) -> Result<RequestId>;
    fn request_thread_death(&self, suspend: SuspendPolicy) -> Result<RequestId>;
    fn request_exception(
        &self,
        caught: bool,
        uncaught: bool,
        suspend: SuspendPolicy,
    ) -> Result<RequestId>;
    fn clear_request(&self, request: RequestId) -> Result<()>;
    fn clear_all_breakpoints(&self) -> Result<()>;
    /// Delete every pending step request. Only one step is ever in flight,
    /// so this runs before each new [`Vm::request_step`].
    fn clear_step_requests(&self) -> Result<()>;

    // Event queue ----------------------------------------------------------

    /// Block until the next event set is available. Returns
    /// [`VmError::Disconnected`] once the connection is gone.
    fn next_event_set(&self) -> Result<EventSet>;
    /// Resume the threads suspended by the given event set.
    fn resume_event_set(&self, set: u64) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Main class followed by program arguments, as a single command line.
    pub main: String,
    pub classpath: Vec<PathBuf>,
    pub vm_args: Vec<String>,
}

/// A freshly launched target: the VM connection plus the child process's
/// output streams. The target starts suspended so the debugger can install
/// breakpoints before user code runs.
pub struct LaunchedVm {
    pub vm: Arc<dyn Vm>,
    pub stdout: Box<dyn io::Read + Send>,
    pub stderr: Box<dyn io::Read + Send>,
}

/// Factory for target connections, mirroring the two JDWP connector kinds.
pub trait Connector: Send + Sync {
    fn launch(&self, options: &LaunchOptions) -> Result<LaunchedVm>;
    fn attach(&self, host: &str, port: u16) -> Result<Arc<dyn Vm>>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock;
