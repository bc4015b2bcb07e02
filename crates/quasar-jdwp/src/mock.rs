//! A scripted in-process target runtime used for unit/integration testing.
//!
//! It intentionally supports a *small* subset of the debug-wire surface,
//! sufficient to exercise the debug core without requiring a JDK on the
//! system: tests register classes, threads, and objects up front, then
//! inject event sets that the core drains exactly as it would from a live
//! connection.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::{
    ClassInfo, Connector, EventSet, FieldId, FieldInfo, LaunchOptions, LaunchedVm, ObjectId,
    ReferenceTypeId, RequestId, Result, SlotInfo, StepDepth, SuspendPolicy, ThreadId, ThreadInfo,
    Vm, VmError, VmEvent, VmValue, WireLocation,
};

#[derive(Debug, Clone)]
pub struct ScriptedClass {
    pub id: ReferenceTypeId,
    pub name: String,
    pub source_name: String,
    pub source_path: String,
    /// Every breakpoint-capable location of the class, across all methods.
    pub line_locations: Vec<WireLocation>,
    pub fields: Vec<FieldInfo>,
    pub superclass: Option<ReferenceTypeId>,
    pub static_values: HashMap<FieldId, VmValue>,
    pub method_names: HashMap<u64, String>,
}

impl ScriptedClass {
    pub fn new(id: ReferenceTypeId, name: &str, source_name: &str, source_path: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            source_name: source_name.to_string(),
            source_path: source_path.to_string(),
            line_locations: Vec::new(),
            fields: Vec::new(),
            superclass: None,
            static_values: HashMap::new(),
            method_names: HashMap::new(),
        }
    }

    pub fn with_method_name(mut self, method: u64, name: &str) -> Self {
        self.method_names.insert(method, name.to_string());
        self
    }

    pub fn with_line(mut self, method: u64, line: u32) -> Self {
        self.line_locations.push(WireLocation {
            class: self.id,
            method,
            index: self.line_locations.len() as u64,
            line,
            source_name: self.source_name.clone(),
            source_path: self.source_path.clone(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedObjectKind {
    Plain,
    Text(String),
    Array {
        element_type_name: String,
        elements: Vec<VmValue>,
    },
}

#[derive(Debug, Clone)]
pub struct ScriptedObject {
    pub id: ObjectId,
    pub class: ReferenceTypeId,
    pub kind: ScriptedObjectKind,
    pub field_values: HashMap<FieldId, VmValue>,
    /// Reply for `invoke_to_string`; defaults to a JDK-ish `Type@id` form.
    pub to_string: Option<String>,
}

impl ScriptedObject {
    pub fn plain(id: ObjectId, class: ReferenceTypeId) -> Self {
        Self {
            id,
            class,
            kind: ScriptedObjectKind::Plain,
            field_values: HashMap::new(),
            to_string: None,
        }
    }

    pub fn text(id: ObjectId, class: ReferenceTypeId, text: &str) -> Self {
        Self {
            id,
            class,
            kind: ScriptedObjectKind::Text(text.to_string()),
            field_values: HashMap::new(),
            to_string: Some(text.to_string()),
        }
    }

    pub fn array(
        id: ObjectId,
        class: ReferenceTypeId,
        element_type_name: &str,
        elements: Vec<VmValue>,
    ) -> Self {
        Self {
            id,
            class,
            kind: ScriptedObjectKind::Array {
                element_type_name: element_type_name.to_string(),
                elements,
            },
            field_values: HashMap::new(),
            to_string: None,
        }
    }

    pub fn with_field(mut self, field: FieldId, value: VmValue) -> Self {
        self.field_values.insert(field, value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedFrame {
    pub location: WireLocation,
    pub this: Option<ObjectId>,
    pub arg_count: u32,
    pub slots: Vec<(SlotInfo, VmValue)>,
}

#[derive(Debug, Clone)]
pub struct ScriptedThread {
    pub id: ThreadId,
    pub name: String,
    pub frames: Vec<ScriptedFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstalledRequest {
    Breakpoint(WireLocation),
    Step { thread: ThreadId, depth: StepDepth },
    ClassPrepare,
    ThreadStart,
    ThreadDeath,
    Exception { caught: bool, uncaught: bool },
}

struct State {
    disconnected: bool,
    disposed: bool,
    can_be_modified: bool,
    resume_count: usize,
    classes: HashMap<ReferenceTypeId, ScriptedClass>,
    loaded: Vec<ReferenceTypeId>,
    objects: HashMap<ObjectId, ScriptedObject>,
    threads: Vec<ScriptedThread>,
    requests: Vec<(RequestId, InstalledRequest)>,
    resumed_sets: Vec<u64>,
    last_invoke_thread: Option<ThreadId>,
    next_object_id: ObjectId,
}

struct Inner {
    state: Mutex<State>,
    events_tx: Mutex<Option<mpsc::Sender<EventSet>>>,
    events_rx: Mutex<mpsc::Receiver<EventSet>>,
    next_request_id: AtomicI32,
    next_set_id: AtomicU64,
}

/// Cloneable handle to the scripted target. All clones share state.
#[derive(Clone)]
pub struct MockVm {
    inner: Arc<Inner>,
}

impl Default for MockVm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVm {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    disconnected: false,
                    disposed: false,
                    can_be_modified: true,
                    resume_count: 0,
                    classes: HashMap::new(),
                    loaded: Vec::new(),
                    objects: HashMap::new(),
                    threads: Vec::new(),
                    requests: Vec::new(),
                    resumed_sets: Vec::new(),
                    last_invoke_thread: None,
                    next_object_id: 0x1000,
                }),
                events_tx: Mutex::new(Some(tx)),
                events_rx: Mutex::new(rx),
                next_request_id: AtomicI32::new(1),
                next_set_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn as_vm(&self) -> Arc<dyn Vm> {
        Arc::new(self.clone())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    // -- scripting ---------------------------------------------------------

    /// Register a class and mark it loaded from the start.
    pub fn load_class(&self, class: ScriptedClass) {
        let mut state = self.state();
        state.loaded.push(class.id);
        state.classes.insert(class.id, class);
    }

    /// Register a class that the target has not loaded yet; pair with
    /// [`MockVm::prepare_class`] to simulate late class loading.
    pub fn defer_class(&self, class: ScriptedClass) {
        self.state().classes.insert(class.id, class);
    }

    pub fn add_object(&self, object: ScriptedObject) {
        self.state().objects.insert(object.id, object);
    }

    pub fn add_thread(&self, thread: ScriptedThread) {
        self.state().threads.push(thread);
    }

    pub fn set_can_be_modified(&self, value: bool) {
        self.state().can_be_modified = value;
    }

    /// Inject an event set as if drained from the target's queue. Returns
    /// the set id so tests can assert on [`MockVm::resumed_sets`].
    pub fn push_event_set(&self, suspend: SuspendPolicy, events: Vec<VmEvent>) -> u64 {
        let id = self.inner.next_set_id.fetch_add(1, Ordering::Relaxed);
        let tx = self.inner.events_tx.lock().unwrap();
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(EventSet {
                id,
                suspend,
                events,
            });
        }
        id
    }

    /// Mark a deferred class loaded and raise the matching class-prepare
    /// event set (suspend-all, as the real runtime does).
    pub fn prepare_class(&self, class: ReferenceTypeId, thread: ThreadId) -> u64 {
        self.state().loaded.push(class);
        self.push_event_set(
            SuspendPolicy::All,
            vec![VmEvent::ClassPrepare { thread, class }],
        )
    }

    /// Drop the connection: every subsequent operation fails with
    /// [`VmError::Disconnected`] and the event queue reports a disconnect.
    pub fn disconnect(&self) {
        self.push_event_set(SuspendPolicy::None, vec![VmEvent::VmDisconnect]);
        self.state().disconnected = true;
        *self.inner.events_tx.lock().unwrap() = None;
    }

    /// Fail every subsequent operation without raising a disconnect event,
    /// the way a crashed transport first shows up mid-request. The event
    /// queue stays silent until the connection is disposed.
    pub fn sever(&self) {
        self.state().disconnected = true;
    }

    // -- assertions --------------------------------------------------------

    pub fn installed_breakpoints(&self) -> Vec<WireLocation> {
        self.state()
            .requests
            .iter()
            .filter_map(|(_, r)| match r {
                InstalledRequest::Breakpoint(loc) => Some(loc.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn installed_requests(&self) -> Vec<InstalledRequest> {
        self.state().requests.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn step_requests(&self) -> Vec<(ThreadId, StepDepth)> {
        self.state()
            .requests
            .iter()
            .filter_map(|(_, r)| match r {
                InstalledRequest::Step { thread, depth } => Some((*thread, *depth)),
                _ => None,
            })
            .collect()
    }

    pub fn resume_count(&self) -> usize {
        self.state().resume_count
    }

    pub fn resumed_sets(&self) -> Vec<u64> {
        self.state().resumed_sets.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    pub fn last_invoke_thread(&self) -> Option<ThreadId> {
        self.state().last_invoke_thread
    }

    pub fn slot_snapshot(&self, thread: ThreadId, frame: u32, slot: u32) -> Option<VmValue> {
        let state = self.state();
        let t = state.threads.iter().find(|t| t.id == thread)?;
        let f = t.frames.get(frame as usize)?;
        f.slots
            .iter()
            .find(|(info, _)| info.slot == slot)
            .map(|(_, v)| v.clone())
    }
}

fn check_live(state: &State) -> Result<()> {
    if state.disconnected {
        Err(VmError::Disconnected)
    } else {
        Ok(())
    }
}

impl Vm for MockVm {
    fn dispose(&self) {
        let mut state = self.state();
        state.disposed = true;
        state.disconnected = true;
        drop(state);
        *self.inner.events_tx.lock().unwrap() = None;
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.state();
        check_live(&state)?;
        state.resume_count += 1;
        Ok(())
    }

    fn can_be_modified(&self) -> bool {
        self.state().can_be_modified
    }

    fn all_classes(&self) -> Result<Vec<ClassInfo>> {
        let state = self.state();
        check_live(&state)?;
        Ok(state
            .loaded
            .iter()
            .filter_map(|id| state.classes.get(id))
            .map(|c| ClassInfo {
                id: c.id,
                name: c.name.clone(),
            })
            .collect())
    }

    fn all_threads(&self) -> Result<Vec<ThreadInfo>> {
        let state = self.state();
        check_live(&state)?;
        Ok(state
            .threads
            .iter()
            .map(|t| ThreadInfo {
                id: t.id,
                name: t.name.clone(),
            })
            .collect())
    }

    fn source_name(&self, class: ReferenceTypeId) -> Result<String> {
        let state = self.state();
        check_live(&state)?;
        state
            .classes
            .get(&class)
            .map(|c| c.source_name.clone())
            .ok_or(VmError::AbsentInformation)
    }

    fn reference_type_name(&self, class: ReferenceTypeId) -> Result<String> {
        let state = self.state();
        check_live(&state)?;
        state
            .classes
            .get(&class)
            .map(|c| c.name.clone())
            .ok_or(VmError::AbsentInformation)
    }

    fn fields(&self, class: ReferenceTypeId) -> Result<Vec<FieldInfo>> {
        let state = self.state();
        check_live(&state)?;
        state
            .classes
            .get(&class)
            .map(|c| c.fields.clone())
            .ok_or(VmError::AbsentInformation)
    }

    fn superclass(&self, class: ReferenceTypeId) -> Result<Option<ReferenceTypeId>> {
        let state = self.state();
        check_live(&state)?;
        state
            .classes
            .get(&class)
            .map(|c| c.superclass)
            .ok_or(VmError::AbsentInformation)
    }

    fn locations_of_line(&self, class: ReferenceTypeId, line: u32) -> Result<Vec<WireLocation>> {
        let state = self.state();
        check_live(&state)?;
        let Some(c) = state.classes.get(&class) else {
            return Err(VmError::AbsentInformation);
        };
        Ok(c.line_locations
            .iter()
            .filter(|loc| loc.line == line)
            .cloned()
            .collect())
    }

    fn method_name(&self, class: ReferenceTypeId, method: u64) -> Result<String> {
        let state = self.state();
        check_live(&state)?;
        state
            .classes
            .get(&class)
            .and_then(|c| c.method_names.get(&method))
            .cloned()
            .ok_or(VmError::AbsentInformation)
    }

    fn thread_name(&self, thread: ThreadId) -> Result<String> {
        let state = self.state();
        check_live(&state)?;
        state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .map(|t| t.name.clone())
            .ok_or(VmError::InvalidThread(thread))
    }

    fn frame_count(&self, thread: ThreadId) -> Result<u32> {
        let state = self.state();
        check_live(&state)?;
        state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .map(|t| t.frames.len() as u32)
            .ok_or(VmError::InvalidThread(thread))
    }

    fn frame_location(&self, thread: ThreadId, frame: u32) -> Result<WireLocation> {
        let state = self.state();
        check_live(&state)?;
        let t = state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .ok_or(VmError::InvalidThread(thread))?;
        t.frames
            .get(frame as usize)
            .map(|f| f.location.clone())
            .ok_or(VmError::InvalidFrame(frame))
    }

    fn visible_variables(&self, thread: ThreadId, frame: u32) -> Result<Vec<SlotInfo>> {
        let state = self.state();
        check_live(&state)?;
        let t = state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .ok_or(VmError::InvalidThread(thread))?;
        let f = t
            .frames
            .get(frame as usize)
            .ok_or(VmError::InvalidFrame(frame))?;
        Ok(f.slots.iter().map(|(info, _)| info.clone()).collect())
    }

    fn slot_value(&self, thread: ThreadId, frame: u32, slot: u32) -> Result<VmValue> {
        let state = self.state();
        check_live(&state)?;
        let t = state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .ok_or(VmError::InvalidThread(thread))?;
        let f = t
            .frames
            .get(frame as usize)
            .ok_or(VmError::InvalidFrame(frame))?;
        f.slots
            .iter()
            .find(|(info, _)| info.slot == slot)
            .map(|(_, v)| v.clone())
            .ok_or(VmError::AbsentInformation)
    }

    fn set_slot_value(
        &self,
        thread: ThreadId,
        frame: u32,
        slot: u32,
        value: &VmValue,
    ) -> Result<()> {
        let mut state = self.state();
        check_live(&state)?;
        let t = state
            .threads
            .iter_mut()
            .find(|t| t.id == thread)
            .ok_or(VmError::InvalidThread(thread))?;
        let f = t
            .frames
            .get_mut(frame as usize)
            .ok_or(VmError::InvalidFrame(frame))?;
        let entry = f
            .slots
            .iter_mut()
            .find(|(info, _)| info.slot == slot)
            .ok_or(VmError::AbsentInformation)?;
        entry.1 = value.clone();
        Ok(())
    }

    fn this_object(&self, thread: ThreadId, frame: u32) -> Result<Option<ObjectId>> {
        let state = self.state();
        check_live(&state)?;
        let t = state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .ok_or(VmError::InvalidThread(thread))?;
        t.frames
            .get(frame as usize)
            .map(|f| f.this)
            .ok_or(VmError::InvalidFrame(frame))
    }

    fn argument_count(&self, thread: ThreadId, frame: u32) -> Result<u32> {
        let state = self.state();
        check_live(&state)?;
        let t = state
            .threads
            .iter()
            .find(|t| t.id == thread)
            .ok_or(VmError::InvalidThread(thread))?;
        t.frames
            .get(frame as usize)
            .map(|f| f.arg_count)
            .ok_or(VmError::InvalidFrame(frame))
    }

    fn object_reference_type(&self, object: ObjectId) -> Result<ReferenceTypeId> {
        let state = self.state();
        check_live(&state)?;
        state
            .objects
            .get(&object)
            .map(|o| o.class)
            .ok_or(VmError::InvalidObject(object))
    }

    fn string_text(&self, object: ObjectId) -> Result<String> {
        let state = self.state();
        check_live(&state)?;
        match state.objects.get(&object).map(|o| &o.kind) {
            Some(ScriptedObjectKind::Text(text)) => Ok(text.clone()),
            Some(_) => Err(VmError::Protocol(format!("object {object} is not a string"))),
            None => Err(VmError::InvalidObject(object)),
        }
    }

    fn array_length(&self, object: ObjectId) -> Result<u32> {
        let state = self.state();
        check_live(&state)?;
        match state.objects.get(&object).map(|o| &o.kind) {
            Some(ScriptedObjectKind::Array { elements, .. }) => Ok(elements.len() as u32),
            Some(_) => Err(VmError::Protocol(format!("object {object} is not an array"))),
            None => Err(VmError::InvalidObject(object)),
        }
    }

    fn array_element_type_name(&self, object: ObjectId) -> Result<String> {
        let state = self.state();
        check_live(&state)?;
        match state.objects.get(&object).map(|o| &o.kind) {
            Some(ScriptedObjectKind::Array {
                element_type_name, ..
            }) => Ok(element_type_name.clone()),
            Some(_) => Err(VmError::Protocol(format!("object {object} is not an array"))),
            None => Err(VmError::InvalidObject(object)),
        }
    }

    fn array_elements(&self, object: ObjectId, first: u32, count: u32) -> Result<Vec<VmValue>> {
        let state = self.state();
        check_live(&state)?;
        match state.objects.get(&object).map(|o| &o.kind) {
            Some(ScriptedObjectKind::Array { elements, .. }) => {
                let first = first as usize;
                let end = (first + count as usize).min(elements.len());
                if first > elements.len() {
                    return Err(VmError::Protocol("array index out of bounds".to_string()));
                }
                Ok(elements[first..end].to_vec())
            }
            Some(_) => Err(VmError::Protocol(format!("object {object} is not an array"))),
            None => Err(VmError::InvalidObject(object)),
        }
    }

    fn field_value(&self, object: ObjectId, field: FieldId) -> Result<VmValue> {
        let state = self.state();
        check_live(&state)?;
        let o = state
            .objects
            .get(&object)
            .ok_or(VmError::InvalidObject(object))?;
        o.field_values
            .get(&field)
            .cloned()
            .ok_or(VmError::AbsentInformation)
    }

    fn static_field_value(&self, class: ReferenceTypeId, field: FieldId) -> Result<VmValue> {
        let state = self.state();
        check_live(&state)?;
        let c = state.classes.get(&class).ok_or(VmError::AbsentInformation)?;
        c.static_values
            .get(&field)
            .cloned()
            .ok_or(VmError::AbsentInformation)
    }

    fn create_string(&self, text: &str) -> Result<VmValue> {
        let mut state = self.state();
        check_live(&state)?;
        let id = state.next_object_id;
        state.next_object_id += 1;
        // Mirrored strings belong to the synthetic class 0, which tests do
        // not need to register unless they read the string back.
        state.objects.insert(
            id,
            ScriptedObject {
                id,
                class: 0,
                kind: ScriptedObjectKind::Text(text.to_string()),
                field_values: HashMap::new(),
                to_string: Some(text.to_string()),
            },
        );
        Ok(VmValue::Str(id))
    }

    fn invoke_to_string(&self, thread: ThreadId, object: ObjectId) -> Result<String> {
        let mut state = self.state();
        check_live(&state)?;
        if !state.threads.iter().any(|t| t.id == thread) {
            return Err(VmError::InvalidThread(thread));
        }
        state.last_invoke_thread = Some(thread);
        let o = state
            .objects
            .get(&object)
            .ok_or(VmError::InvalidObject(object))?;
        Ok(o.to_string
            .clone()
            .unwrap_or_else(|| format!("@{object:x}")))
    }

    fn request_breakpoint(
        &self,
        location: &WireLocation,
        _suspend: SuspendPolicy,
    ) -> Result<RequestId> {
        let mut state = self.state();
        check_live(&state)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        state
            .requests
            .push((id, InstalledRequest::Breakpoint(location.clone())));
        Ok(id)
    }

    fn request_step(
        &self,
        thread: ThreadId,
        depth: StepDepth,
        _suspend: SuspendPolicy,
    ) -> Result<RequestId> {
        let mut state = self.state();
        check_live(&state)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        state
            .requests
            .push((id, InstalledRequest::Step { thread, depth }));
        Ok(id)
    }

    fn request_class_prepare(&self, _suspend: SuspendPolicy) -> Result<RequestId> {
        let mut state = self.state();
        check_live(&state)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        state.requests.push((id, InstalledRequest::ClassPrepare));
        Ok(id)
    }

    fn request_thread_start(&self, _suspend: SuspendPolicy) -> Result<RequestId> {
        let mut state = self.state();
        check_live(&state)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        state.requests.push((id, InstalledRequest::ThreadStart));
        Ok(id)
    }

    fn request_thread_death(&self, _suspend: SuspendPolicy) -> Result<RequestId> {
        let mut state = self.state();
        check_live(&state)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        state.requests.push((id, InstalledRequest::ThreadDeath));
        Ok(id)
    }

    fn request_exception(
        &self,
        caught: bool,
        uncaught: bool,
        _suspend: SuspendPolicy,
    ) -> Result<RequestId> {
        let mut state = self.state();
        check_live(&state)?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        state
            .requests
            .push((id, InstalledRequest::Exception { caught, uncaught }));
        Ok(id)
    }

    fn clear_request(&self, request: RequestId) -> Result<()> {
        let mut state = self.state();
        check_live(&state)?;
        state.requests.retain(|(id, _)| *id != request);
        Ok(())
    }

    fn clear_all_breakpoints(&self) -> Result<()> {
        let mut state = self.state();
        check_live(&state)?;
        state
            .requests
            .retain(|(_, r)| !matches!(r, InstalledRequest::Breakpoint(_)));
        Ok(())
    }

    fn clear_step_requests(&self) -> Result<()> {
        let mut state = self.state();
        check_live(&state)?;
        state
            .requests
            .retain(|(_, r)| !matches!(r, InstalledRequest::Step { .. }));
        Ok(())
    }

    fn next_event_set(&self) -> Result<EventSet> {
        let rx = self.inner.events_rx.lock().unwrap();
        rx.recv().map_err(|_| VmError::Disconnected)
    }

    fn resume_event_set(&self, set: u64) -> Result<()> {
        let mut state = self.state();
        check_live(&state)?;
        state.resumed_sets.push(set);
        Ok(())
    }
}

/// Connector handing out a pre-scripted [`MockVm`].
pub struct MockConnector {
    vm: MockVm,
    queued: Mutex<Vec<MockVm>>,
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
    fail_with: Option<String>,
    last_launch: Mutex<Option<LaunchOptions>>,
    last_attach: Mutex<Option<(String, u16)>>,
}

impl MockConnector {
    pub fn new(vm: MockVm) -> Self {
        Self {
            vm,
            queued: Mutex::new(Vec::new()),
            stdout: Mutex::new(Vec::new()),
            stderr: Mutex::new(Vec::new()),
            fail_with: None,
            last_launch: Mutex::new(None),
            last_attach: Mutex::new(None),
        }
    }

    /// A connector whose launch/attach always fails, for startup-error paths.
    pub fn failing(message: &str) -> Self {
        let mut conn = Self::new(MockVm::new());
        conn.fail_with = Some(message.to_string());
        conn
    }

    pub fn vm(&self) -> &MockVm {
        &self.vm
    }

    /// Hand out this VM for the next launch/attach instead of the primary
    /// one; lets tests replace a session with a fresh target.
    pub fn queue_vm(&self, vm: MockVm) {
        self.queued.lock().unwrap().push(vm);
    }

    fn next_vm(&self) -> MockVm {
        let mut queued = self.queued.lock().unwrap();
        if queued.is_empty() {
            self.vm.clone()
        } else {
            queued.remove(0)
        }
    }

    pub fn with_stdout(self, bytes: &[u8]) -> Self {
        *self.stdout.lock().unwrap() = bytes.to_vec();
        self
    }

    pub fn with_stderr(self, bytes: &[u8]) -> Self {
        *self.stderr.lock().unwrap() = bytes.to_vec();
        self
    }

    pub fn last_launch_options(&self) -> Option<LaunchOptions> {
        self.last_launch.lock().unwrap().clone()
    }

    pub fn last_attach_addr(&self) -> Option<(String, u16)> {
        self.last_attach.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn launch(&self, options: &LaunchOptions) -> Result<LaunchedVm> {
        if let Some(message) = &self.fail_with {
            return Err(VmError::Protocol(message.clone()));
        }
        *self.last_launch.lock().unwrap() = Some(options.clone());
        Ok(LaunchedVm {
            vm: self.next_vm().as_vm(),
            stdout: Box::new(Cursor::new(self.stdout.lock().unwrap().clone())),
            stderr: Box::new(Cursor::new(self.stderr.lock().unwrap().clone())),
        })
    }

    fn attach(&self, host: &str, port: u16) -> Result<Arc<dyn Vm>> {
        if let Some(message) = &self.fail_with {
            return Err(VmError::Protocol(message.clone()));
        }
        *self.last_attach.lock().unwrap() = Some((host.to_string(), port));
        Ok(self.next_vm().as_vm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(class: ReferenceTypeId, line: u32) -> WireLocation {
        WireLocation {
            class,
            method: 1,
            index: 0,
            line,
            source_name: "Main.scala".to_string(),
            source_path: "com/example/Main.scala".to_string(),
        }
    }

    #[test]
    fn deferred_classes_are_invisible_until_prepared() {
        let vm = MockVm::new();
        vm.defer_class(ScriptedClass::new(7, "com.example.Late", "Late.scala", "Late.scala"));
        assert!(vm.all_classes().unwrap().is_empty());

        vm.prepare_class(7, 1);
        let classes = vm.all_classes().unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "com.example.Late");

        let set = vm.next_event_set().unwrap();
        assert_eq!(set.suspend, SuspendPolicy::All);
        assert!(matches!(set.events[0], VmEvent::ClassPrepare { class: 7, .. }));
    }

    #[test]
    fn disconnect_fails_pending_queue_reads() {
        let vm = MockVm::new();
        vm.disconnect();

        // The queued disconnect set is still delivered, then the queue dies.
        let set = vm.next_event_set().unwrap();
        assert!(set.is_disconnect());
        assert!(matches!(vm.next_event_set(), Err(VmError::Disconnected)));
        assert!(matches!(vm.resume(), Err(VmError::Disconnected)));
    }

    #[test]
    fn breakpoint_requests_are_tracked_and_cleared() {
        let vm = MockVm::new();
        let loc = location(3, 10);
        let id = vm.request_breakpoint(&loc, SuspendPolicy::All).unwrap();
        assert_eq!(vm.installed_breakpoints(), vec![loc]);

        vm.clear_request(id).unwrap();
        assert!(vm.installed_breakpoints().is_empty());
    }

    #[test]
    fn set_slot_value_rejects_missing_slots() {
        let vm = MockVm::new();
        vm.add_thread(ScriptedThread {
            id: 9,
            name: "main".to_string(),
            frames: vec![ScriptedFrame {
                location: location(3, 10),
                this: None,
                arg_count: 0,
                slots: vec![(
                    SlotInfo {
                        slot: 0,
                        name: "x".to_string(),
                        type_name: "int".to_string(),
                    },
                    VmValue::Int(1),
                )],
            }],
        });

        assert!(vm.set_slot_value(9, 0, 0, &VmValue::Int(5)).is_ok());
        assert_eq!(vm.slot_snapshot(9, 0, 0), Some(VmValue::Int(5)));
        assert!(matches!(
            vm.set_slot_value(9, 0, 4, &VmValue::Int(5)),
            Err(VmError::AbsentInformation)
        ));
        assert!(matches!(
            vm.set_slot_value(9, 99, 0, &VmValue::Int(5)),
            Err(VmError::InvalidFrame(99))
        ));
    }
}
