//! The debug controller: a single-consumer mailbox that owns the source map,
//! the breakpoint registry, and at most one live target session.
//!
//! Every mutation happens on the controller thread. Client requests arrive
//! as mailbox messages carrying oneshot reply senders; the event pump and
//! output relays deliver target activity the same way. Because every
//! facade call is blocking, the controller runs on its own OS thread rather
//! than inside the async runtime; [`DebugHandle`] is the async face the
//! outer server talks to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use quasar_jdwp::{
    Connector, EventSet, ObjectId, ReferenceTypeId, StepDepth, SuspendPolicy, ThreadId, Vm,
    VmEvent, VmValue, WireLocation,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::breakpoints::{Breakpoint, BreakpointRegistry};
use crate::config::DebugConfig;
use crate::error::{DebugError, DebugResult};
use crate::marshal;
use crate::object_registry::ObjectRegistry;
use crate::proto::{
    Backtrace, BreakpointList, DebugEvent, DebugLocation, DebugValue, SourcePosition, StackFrame,
    StackLocal, StartResult,
};
use crate::session::{SessionId, SessionMode, TargetSession};
use crate::source_map::SourceMap;

pub(crate) enum ControllerMessage {
    Command(DebugCommand),
    VmEvents { session: SessionId, set: EventSet },
    PumpDisconnected { session: SessionId },
    Output { session: SessionId, text: String },
}

pub(crate) enum DebugCommand {
    Start {
        command_line: String,
        reply: oneshot::Sender<StartResult>,
    },
    Attach {
        host: String,
        port: u16,
        reply: oneshot::Sender<StartResult>,
    },
    SetBreakpoint {
        file: PathBuf,
        line: u32,
        reply: oneshot::Sender<()>,
    },
    ClearBreakpoint {
        file: PathBuf,
        line: u32,
        reply: oneshot::Sender<()>,
    },
    ClearAllBreakpoints {
        reply: oneshot::Sender<()>,
    },
    ListBreakpoints {
        reply: oneshot::Sender<BreakpointList>,
    },
    Run {
        reply: oneshot::Sender<bool>,
    },
    Continue {
        thread_id: ThreadId,
        reply: oneshot::Sender<bool>,
    },
    Next {
        thread_id: ThreadId,
        reply: oneshot::Sender<bool>,
    },
    Step {
        thread_id: ThreadId,
        reply: oneshot::Sender<bool>,
    },
    StepOut {
        thread_id: ThreadId,
        reply: oneshot::Sender<bool>,
    },
    LocateName {
        thread_id: ThreadId,
        name: String,
        reply: oneshot::Sender<Option<DebugLocation>>,
    },
    Value {
        location: DebugLocation,
        reply: oneshot::Sender<Option<DebugValue>>,
    },
    ToString {
        thread_id: ThreadId,
        location: DebugLocation,
        reply: oneshot::Sender<Option<String>>,
    },
    SetValue {
        location: DebugLocation,
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Backtrace {
        thread_id: ThreadId,
        start: u32,
        count: i64,
        reply: oneshot::Sender<Option<Backtrace>>,
    },
    ActiveVm {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Cloneable async request side of the controller.
///
/// Every method sends a mailbox message and awaits the reply; if the
/// controller is gone the documented "not available" value is returned
/// instead.
#[derive(Clone)]
pub struct DebugHandle {
    tx: mpsc::UnboundedSender<ControllerMessage>,
}

impl DebugHandle {
    async fn request<T>(
        &self,
        fallback: T,
        build: impl FnOnce(oneshot::Sender<T>) -> DebugCommand,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(ControllerMessage::Command(build(tx)))
            .is_err()
        {
            return fallback;
        }
        rx.await.unwrap_or(fallback)
    }

    pub async fn start(&self, command_line: impl Into<String>) -> StartResult {
        let command_line = command_line.into();
        self.request(unavailable(), |reply| DebugCommand::Start {
            command_line,
            reply,
        })
        .await
    }

    pub async fn attach(&self, host: impl Into<String>, port: u16) -> StartResult {
        let host = host.into();
        self.request(unavailable(), |reply| DebugCommand::Attach {
            host,
            port,
            reply,
        })
        .await
    }

    pub async fn set_breakpoint(&self, file: impl Into<PathBuf>, line: u32) {
        let file = file.into();
        self.request((), |reply| DebugCommand::SetBreakpoint { file, line, reply })
            .await
    }

    pub async fn clear_breakpoint(&self, file: impl Into<PathBuf>, line: u32) {
        let file = file.into();
        self.request((), |reply| DebugCommand::ClearBreakpoint { file, line, reply })
            .await
    }

    pub async fn clear_all_breakpoints(&self) {
        self.request((), |reply| DebugCommand::ClearAllBreakpoints { reply })
            .await
    }

    pub async fn list_breakpoints(&self) -> BreakpointList {
        self.request(BreakpointList::default(), |reply| {
            DebugCommand::ListBreakpoints { reply }
        })
        .await
    }

    pub async fn run(&self) -> bool {
        self.request(false, |reply| DebugCommand::Run { reply }).await
    }

    /// Resumes the whole VM, not just the thread; callers must not rely on
    /// other threads staying suspended.
    pub async fn continue_thread(&self, thread_id: ThreadId) -> bool {
        self.request(false, |reply| DebugCommand::Continue { thread_id, reply })
            .await
    }

    pub async fn next(&self, thread_id: ThreadId) -> bool {
        self.request(false, |reply| DebugCommand::Next { thread_id, reply })
            .await
    }

    pub async fn step(&self, thread_id: ThreadId) -> bool {
        self.request(false, |reply| DebugCommand::Step { thread_id, reply })
            .await
    }

    pub async fn step_out(&self, thread_id: ThreadId) -> bool {
        self.request(false, |reply| DebugCommand::StepOut { thread_id, reply })
            .await
    }

    pub async fn locate_name(
        &self,
        thread_id: ThreadId,
        name: impl Into<String>,
    ) -> Option<DebugLocation> {
        let name = name.into();
        self.request(None, |reply| DebugCommand::LocateName {
            thread_id,
            name,
            reply,
        })
        .await
    }

    pub async fn value(&self, location: DebugLocation) -> Option<DebugValue> {
        self.request(None, |reply| DebugCommand::Value { location, reply })
            .await
    }

    pub async fn to_string_value(
        &self,
        thread_id: ThreadId,
        location: DebugLocation,
    ) -> Option<String> {
        self.request(None, |reply| DebugCommand::ToString {
            thread_id,
            location,
            reply,
        })
        .await
    }

    pub async fn set_value(&self, location: DebugLocation, text: impl Into<String>) -> bool {
        let text = text.into();
        self.request(false, |reply| DebugCommand::SetValue {
            location,
            text,
            reply,
        })
        .await
    }

    /// Frames `[start, start + count)`, clamped to the thread's frame count;
    /// a negative count means "to the end".
    pub async fn backtrace(
        &self,
        thread_id: ThreadId,
        start: u32,
        count: i64,
    ) -> Option<Backtrace> {
        self.request(None, |reply| DebugCommand::Backtrace {
            thread_id,
            start,
            count,
            reply,
        })
        .await
    }

    pub async fn is_active(&self) -> bool {
        self.request(false, |reply| DebugCommand::ActiveVm { reply })
            .await
    }

    pub async fn stop(&self) -> bool {
        self.request(false, |reply| DebugCommand::Stop { reply }).await
    }

    /// Dispose any session and stop the controller thread. Requests sent
    /// after this receive their "not available" reply.
    pub fn shutdown(&self) {
        let _ = self
            .tx
            .send(ControllerMessage::Command(DebugCommand::Shutdown));
    }
}

fn unavailable() -> StartResult {
    StartResult::Error {
        code: 1,
        message: "debug controller is not running".to_string(),
    }
}

pub struct DebugController {
    config: DebugConfig,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<DebugEvent>,
    sources: SourceMap,
    breakpoints: BreakpointRegistry,
    session: Option<TargetSession>,
    next_session: SessionId,
    tx: mpsc::UnboundedSender<ControllerMessage>,
}

impl DebugController {
    /// Start the controller thread and return its request handle. Domain
    /// events are broadcast to `events` as they happen.
    pub fn spawn(
        config: DebugConfig,
        connector: Arc<dyn Connector>,
        events: broadcast::Sender<DebugEvent>,
    ) -> DebugHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DebugHandle { tx: tx.clone() };
        let sources = SourceMap::new(&config);
        let controller = Self {
            config,
            connector,
            events,
            sources,
            breakpoints: BreakpointRegistry::default(),
            session: None,
            next_session: 1,
            tx,
        };
        std::thread::Builder::new()
            .name("quasar-debug-controller".to_string())
            .spawn(move || controller.run(rx))
            .expect("failed to spawn debug controller thread");
        handle
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControllerMessage>) {
        while let Some(message) = rx.blocking_recv() {
            if !self.handle_message(message) {
                break;
            }
        }
        if let Some(mut session) = self.session.take() {
            session.dispose();
        }
    }

    fn handle_message(&mut self, message: ControllerMessage) -> bool {
        match message {
            ControllerMessage::Command(DebugCommand::Shutdown) => {
                if let Some(mut session) = self.session.take() {
                    session.dispose();
                }
                false
            }
            ControllerMessage::Command(command) => {
                self.handle_command(command);
                true
            }
            ControllerMessage::VmEvents { session, set } => {
                if self.is_current(session) {
                    self.handle_event_set(set);
                }
                true
            }
            ControllerMessage::PumpDisconnected { session } => {
                if self.is_current(session) {
                    self.disconnected();
                }
                true
            }
            ControllerMessage::Output { session, text } => {
                if self.is_current(session) {
                    self.emit(DebugEvent::Output { text });
                }
                true
            }
        }
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    fn handle_command(&mut self, command: DebugCommand) {
        match command {
            DebugCommand::Start {
                command_line,
                reply,
            } => {
                let result = self.start_session(SessionMode::Launch { command_line });
                let _ = reply.send(result);
            }
            DebugCommand::Attach { host, port, reply } => {
                let result = self.start_session(SessionMode::Attach { host, port });
                let _ = reply.send(result);
            }
            DebugCommand::SetBreakpoint { file, line, reply } => {
                self.set_breakpoint(file, line);
                let _ = reply.send(());
            }
            DebugCommand::ClearBreakpoint { file, line, reply } => {
                self.clear_breakpoint(&file, line);
                let _ = reply.send(());
            }
            DebugCommand::ClearAllBreakpoints { reply } => {
                if let Some(session) = self.session.as_mut() {
                    session.clear_all_breakpoints();
                }
                self.breakpoints.clear();
                let _ = reply.send(());
            }
            DebugCommand::ListBreakpoints { reply } => {
                let _ = reply.send(self.breakpoints.list());
            }
            DebugCommand::Run { reply } => {
                let result = self.resume_target();
                let value = self.settle(result, false);
                let _ = reply.send(value);
            }
            DebugCommand::Continue { thread_id, reply } => {
                // There is no per-thread resume primitive; both forms resume
                // the whole VM.
                let _ = thread_id;
                let result = self.resume_target();
                let value = self.settle(result, false);
                let _ = reply.send(value);
            }
            DebugCommand::Next { thread_id, reply } => {
                let result = self.step_thread(thread_id, StepDepth::Over);
                let value = self.settle(result, false);
                let _ = reply.send(value);
            }
            DebugCommand::Step { thread_id, reply } => {
                let result = self.step_thread(thread_id, StepDepth::Into);
                let value = self.settle(result, false);
                let _ = reply.send(value);
            }
            DebugCommand::StepOut { thread_id, reply } => {
                let result = self.step_thread(thread_id, StepDepth::Out);
                let value = self.settle(result, false);
                let _ = reply.send(value);
            }
            DebugCommand::LocateName {
                thread_id,
                name,
                reply,
            } => {
                let result = self.locate_name(thread_id, &name);
                let value = self.settle(result, None);
                let _ = reply.send(value);
            }
            DebugCommand::Value { location, reply } => {
                let result = self.value_at(&location);
                let value = self.settle(result, None);
                let _ = reply.send(value);
            }
            DebugCommand::ToString {
                thread_id,
                location,
                reply,
            } => {
                let result = self.to_string_at(thread_id, &location);
                let value = self.settle(result, None);
                let _ = reply.send(value);
            }
            DebugCommand::SetValue {
                location,
                text,
                reply,
            } => {
                let result = self.set_value_at(&location, &text);
                let value = self.settle(result, false);
                let _ = reply.send(value);
            }
            DebugCommand::Backtrace {
                thread_id,
                start,
                count,
                reply,
            } => {
                let result = self.backtrace_of(thread_id, start, count);
                let value = self.settle(result, None);
                let _ = reply.send(value);
            }
            DebugCommand::ActiveVm { reply } => {
                let _ = reply.send(self.session.is_some());
            }
            DebugCommand::Stop { reply } => {
                let _ = reply.send(self.stop_session());
            }
            DebugCommand::Shutdown => {}
        }
    }

    // -- lifecycle ---------------------------------------------------------

    fn start_session(&mut self, mode: SessionMode) -> StartResult {
        // Starting over an active session replaces it; its breakpoints are
        // demoted so the new session re-installs them as classes load.
        if let Some(mut existing) = self.session.take() {
            self.breakpoints.demote_all_to_pending();
            existing.dispose();
        }

        let id = self.next_session;
        self.next_session += 1;
        match TargetSession::open(id, mode, &self.config, self.connector.as_ref(), &self.tx) {
            Ok(session) => {
                self.session = Some(session);
                StartResult::Success
            }
            Err(err) => StartResult::Error {
                code: 1,
                message: err.to_string(),
            },
        }
    }

    /// Client-initiated stop: dispose the session and nothing else. The
    /// caller gets `true` back, so unlike a target-initiated disconnect no
    /// event is broadcast and the breakpoint registry is left untouched.
    fn stop_session(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        session.dispose();
        true
    }

    /// Active → NoSession: demote breakpoints, tear the session down, tell
    /// the client. Safe to call when already in NoSession.
    fn disconnected(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.breakpoints.demote_all_to_pending();
        session.dispose();
        self.emit(DebugEvent::Disconnected);
    }

    // -- breakpoints -------------------------------------------------------

    fn set_breakpoint(&mut self, file: PathBuf, line: u32) {
        let bp = Breakpoint::new(file, line);
        let attempt = self
            .session
            .as_mut()
            .map(|session| session.set_breakpoint(&bp.file, line));
        let installed = match attempt {
            Some(Ok(installed)) => installed,
            Some(Err(err)) => {
                self.on_error(err);
                false
            }
            None => false,
        };

        if installed {
            self.breakpoints.add_active(bp);
        } else {
            self.breakpoints.add_pending(bp);
            self.emit(DebugEvent::BackgroundMessage {
                text: "Location not loaded. Set pending breakpoint.".to_string(),
            });
        }
    }

    fn clear_breakpoint(&mut self, file: &Path, line: u32) {
        let bp = Breakpoint::new(file, line);
        if let Some(session) = self.session.as_mut() {
            session.clear_breakpoints(std::slice::from_ref(&bp));
        }
        self.breakpoints.remove(&bp.file, line);
    }

    // -- execution control -------------------------------------------------

    fn resume_target(&mut self) -> DebugResult<bool> {
        let Some(session) = self.session.as_ref() else {
            return Err(DebugError::NoSession);
        };
        session.vm().resume()?;
        Ok(true)
    }

    fn step_thread(&mut self, thread: ThreadId, depth: StepDepth) -> DebugResult<bool> {
        let Some(session) = self.session.as_ref() else {
            return Err(DebugError::NoSession);
        };
        ensure_thread(session.vm(), thread)?;
        session.step(thread, depth)?;
        Ok(true)
    }

    // -- inspection --------------------------------------------------------

    fn locate_name(
        &mut self,
        thread: ThreadId,
        name: &str,
    ) -> DebugResult<Option<DebugLocation>> {
        let Some(session) = self.session.as_mut() else {
            return Err(DebugError::NoSession);
        };
        let (vm, objects) = session.vm_and_objects();
        ensure_thread(vm, thread)?;

        if name == "this" {
            let Some(this) = marshal::best(vm.this_object(thread, 0), None)? else {
                return Ok(None);
            };
            marshal::remember(vm, objects, this)?;
            return Ok(Some(DebugLocation::ObjectReference { object_id: this }));
        }

        // Nearest scope wins: walk from the innermost frame outward.
        let frame_count = marshal::best(vm.frame_count(thread), 0)?;
        for frame in 0..frame_count {
            for slot in marshal::best(vm.visible_variables(thread, frame), Vec::new())? {
                if slot.name == name {
                    return Ok(Some(DebugLocation::StackSlot {
                        thread_id: thread,
                        frame_index: frame,
                        slot: slot.slot,
                    }));
                }
            }
        }

        // Fall back to the fields of the top frame's receiver, including
        // inherited ones.
        if let Some(this) = marshal::best(vm.this_object(thread, 0), None)? {
            if let Some(class) = marshal::best_opt(vm.object_reference_type(this))? {
                if let Some((_, field)) = marshal::find_field(vm, class, name)? {
                    marshal::remember(vm, objects, this)?;
                    return Ok(Some(DebugLocation::ObjectField {
                        object_id: this,
                        field_name: field.name,
                    }));
                }
            }
        }

        Ok(None)
    }

    fn value_at(&mut self, location: &DebugLocation) -> DebugResult<Option<DebugValue>> {
        let Some(session) = self.session.as_mut() else {
            return Err(DebugError::NoSession);
        };
        let (vm, objects) = session.vm_and_objects();
        let Some(value) = resolve_location(vm, objects, location)? else {
            return Ok(None);
        };
        Ok(Some(marshal::marshal(vm, objects, &value)?))
    }

    fn to_string_at(
        &mut self,
        thread: ThreadId,
        location: &DebugLocation,
    ) -> DebugResult<Option<String>> {
        let Some(session) = self.session.as_mut() else {
            return Err(DebugError::NoSession);
        };
        let (vm, objects) = session.vm_and_objects();
        let Some(value) = resolve_location(vm, objects, location)? else {
            return Ok(None);
        };
        match value {
            VmValue::Array(id) => {
                let Some(length) = marshal::best_opt(vm.array_length(id))? else {
                    return Ok(None);
                };
                let plural = if length == 1 { "" } else { "s" };
                Ok(Some(format!("<array of {length} element{plural}>")))
            }
            VmValue::Str(id) => marshal::best_opt(vm.string_text(id)),
            VmValue::Object(id) => {
                if !vm.can_be_modified() {
                    tracing::info!(
                        target: "quasar.debug",
                        "target is read-only; toString cannot be invoked"
                    );
                    return Ok(None);
                }
                marshal::best_opt(vm.invoke_to_string(thread, id))
            }
            other => Ok(Some(marshal::summarize(vm, &other)?)),
        }
    }

    fn set_value_at(&mut self, location: &DebugLocation, text: &str) -> DebugResult<bool> {
        let DebugLocation::StackSlot {
            thread_id,
            frame_index,
            slot,
        } = location
        else {
            tracing::error!(
                target: "quasar.debug",
                "set-value is only supported for stack slots"
            );
            return Ok(false);
        };

        let Some(session) = self.session.as_ref() else {
            return Err(DebugError::NoSession);
        };
        let vm = session.vm();
        ensure_thread(vm, *thread_id)?;
        let Some(slots) = marshal::best_opt(vm.visible_variables(*thread_id, *frame_index))?
        else {
            return Ok(false);
        };
        let Some(info) = slots.into_iter().find(|s| s.slot == *slot) else {
            return Ok(false);
        };
        let value = match marshal::parse_value(vm, &info.type_name, text) {
            Ok(value) => value,
            Err(err) if err.is_disconnect() => return Err(err),
            Err(_) => return Ok(false),
        };
        Ok(marshal::best_opt(vm.set_slot_value(*thread_id, *frame_index, *slot, &value))?
            .is_some())
    }

    fn backtrace_of(
        &mut self,
        thread: ThreadId,
        start: u32,
        count: i64,
    ) -> DebugResult<Option<Backtrace>> {
        let Some(session) = self.session.as_mut() else {
            return Err(DebugError::NoSession);
        };
        let (vm, objects) = session.vm_and_objects();
        ensure_thread(vm, thread)?;

        let frame_count = vm.frame_count(thread)?;
        let end = if count < 0 {
            frame_count
        } else {
            frame_count.min(start.saturating_add(count as u32))
        };

        let mut frames = Vec::new();
        for index in start..end {
            frames.push(render_frame(vm, objects, &self.sources, thread, index)?);
        }
        let thread_name = marshal::best(vm.thread_name(thread), "thread".to_string())?;
        Ok(Some(Backtrace {
            frames,
            thread_id: thread,
            thread_name,
        }))
    }

    // -- target events -----------------------------------------------------

    fn handle_event_set(&mut self, set: EventSet) {
        if set.is_disconnect() {
            self.disconnected();
            return;
        }

        let mut keep_suspended = false;
        let mut resumed_vm = false;
        for event in &set.events {
            match event {
                VmEvent::VmStart { .. } => {
                    let result = self.vm_started();
                    self.settle(result, ());
                    resumed_vm = true;
                }
                VmEvent::ClassPrepare { class, .. } => {
                    let result = self.class_prepared(*class);
                    self.settle(result, ());
                }
                VmEvent::Breakpoint {
                    thread, location, ..
                } => {
                    keep_suspended = true;
                    self.emit_stop_event(*thread, location, StopKind::Breakpoint);
                }
                VmEvent::Step {
                    thread, location, ..
                } => {
                    keep_suspended = true;
                    self.emit_stop_event(*thread, location, StopKind::Step);
                }
                VmEvent::Exception {
                    thread,
                    exception,
                    catch_location,
                } => {
                    keep_suspended = true;
                    let result = self.exception_event(*thread, *exception, catch_location.as_ref());
                    self.settle(result, ());
                }
                VmEvent::ThreadStart { thread } => {
                    self.emit(DebugEvent::ThreadStart { thread_id: *thread });
                }
                VmEvent::ThreadDeath { thread } => {
                    self.emit(DebugEvent::ThreadDeath { thread_id: *thread });
                }
                // Never subscribed; tolerated if a target sends them anyway.
                VmEvent::FieldAccess { .. }
                | VmEvent::MethodEntry { .. }
                | VmEvent::MethodExit { .. }
                | VmEvent::ClassUnload { .. } => {}
                // Disconnect variants are handled for the whole set above.
                VmEvent::VmDeath | VmEvent::VmDisconnect => {}
            }
            if self.session.is_none() {
                // Disconnected while processing; drop the rest of the set.
                return;
            }
        }

        // A suspend-all set that produced no client-visible stop must not
        // leave the target paused (class-prepare and stray unhandled kinds).
        if set.suspend == SuspendPolicy::All && !keep_suspended && !resumed_vm {
            let result = self
                .session
                .as_ref()
                .map(|session| session.vm().resume_event_set(set.id));
            if let Some(Err(err)) = result {
                self.on_error(err.into());
            }
        }
    }

    fn vm_started(&mut self) -> DebugResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.init_location_map()?;
        session.vm().resume()?;
        self.emit(DebugEvent::VmStart);
        Ok(())
    }

    fn class_prepared(&mut self, class: ReferenceTypeId) -> DebugResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(key) = session.register_class(class)? else {
            return Ok(());
        };
        for bp in self.breakpoints.pending_for_key(&key) {
            if session.set_breakpoint(&bp.file, bp.line)? {
                self.breakpoints.promote(&bp);
            }
        }
        Ok(())
    }

    fn exception_event(
        &mut self,
        thread: ThreadId,
        exception: ObjectId,
        catch_location: Option<&WireLocation>,
    ) -> DebugResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let (vm, objects) = session.vm_and_objects();
        marshal::remember(vm, objects, exception)?;
        let thread_name = marshal::best(vm.thread_name(thread), String::new())?;
        let catch_source = catch_location.and_then(|loc| position(&self.sources, loc));
        self.emit(DebugEvent::Exception {
            exception_id: exception,
            thread_id: thread,
            thread_name,
            catch_source,
        });
        Ok(())
    }

    fn emit_stop_event(&mut self, thread: ThreadId, location: &WireLocation, kind: StopKind) {
        let Some(source) = position(&self.sources, location) else {
            tracing::warn!(
                target: "quasar.debug",
                line = location.line,
                "dropping stop event with unresolved position"
            );
            return;
        };

        let name_result = match self.session.as_ref() {
            Some(session) => marshal::best(session.vm().thread_name(thread), String::new()),
            None => Ok(String::new()),
        };
        let thread_name = self.settle(name_result, String::new());
        if self.session.is_none() {
            return;
        }

        let event = match kind {
            StopKind::Breakpoint => DebugEvent::Breakpoint {
                thread_id: thread,
                thread_name,
                source,
            },
            StopKind::Step => DebugEvent::Step {
                thread_id: thread,
                thread_name,
                source,
            },
        };
        self.emit(event);
    }

    // -- plumbing ----------------------------------------------------------

    fn emit(&self, event: DebugEvent) {
        let _ = self.events.send(event);
    }

    fn on_error(&mut self, err: DebugError) {
        if err.is_disconnect() {
            self.disconnected();
            return;
        }
        match err {
            DebugError::NoSession => {
                tracing::debug!(target: "quasar.debug", "request requires an active session");
            }
            other => {
                tracing::warn!(target: "quasar.debug", err = %other, "request failed");
            }
        }
    }

    fn settle<T>(&mut self, result: DebugResult<T>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(err) => {
                self.on_error(err);
                fallback
            }
        }
    }
}

#[derive(Clone, Copy)]
enum StopKind {
    Breakpoint,
    Step,
}

fn ensure_thread(vm: &dyn Vm, thread: ThreadId) -> DebugResult<()> {
    if vm.all_threads()?.iter().any(|t| t.id == thread) {
        Ok(())
    } else {
        Err(DebugError::UnknownThread(thread))
    }
}

/// Dereference a debug location to a raw target value. Object ids must have
/// been recorded in the identity cache by an earlier reply; anything else
/// resolves to none.
fn resolve_location(
    vm: &dyn Vm,
    objects: &mut ObjectRegistry,
    location: &DebugLocation,
) -> DebugResult<Option<VmValue>> {
    match location {
        DebugLocation::ObjectReference { object_id } => Ok(objects
            .lookup(*object_id)
            .map(marshal::value_for_handle)),
        DebugLocation::ObjectField {
            object_id,
            field_name,
        } => {
            if objects.lookup(*object_id).is_none() {
                return Ok(None);
            }
            let Some(class) = marshal::best_opt(vm.object_reference_type(*object_id))? else {
                return Ok(None);
            };
            let Some((declaring, field)) = marshal::find_field(vm, class, field_name)? else {
                return Ok(None);
            };
            let value = if field.is_static {
                vm.static_field_value(declaring, field.id)
            } else {
                vm.field_value(*object_id, field.id)
            };
            marshal::best_opt(value)
        }
        DebugLocation::ArrayElement { object_id, index } => {
            if objects.lookup(*object_id).is_none() {
                return Ok(None);
            }
            let elements = marshal::best_opt(vm.array_elements(*object_id, *index, 1))?;
            Ok(elements.and_then(|mut e| {
                if e.is_empty() {
                    None
                } else {
                    Some(e.remove(0))
                }
            }))
        }
        DebugLocation::StackSlot {
            thread_id,
            frame_index,
            slot,
        } => marshal::best_opt(vm.slot_value(*thread_id, *frame_index, *slot)),
    }
}

fn position(sources: &SourceMap, location: &WireLocation) -> Option<SourcePosition> {
    if location.source_name.is_empty() {
        return None;
    }
    let file = sources
        .resolve(&location.source_name)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&location.source_name));
    Some(SourcePosition {
        file,
        line: location.line,
    })
}

/// Best-effort frame rendering: any readable piece is returned and any
/// unreadable piece is replaced with a sentinel, so a partially corrupt
/// frame still produces a result. Only a disconnect aborts.
fn render_frame(
    vm: &dyn Vm,
    objects: &mut ObjectRegistry,
    sources: &SourceMap,
    thread: ThreadId,
    index: u32,
) -> DebugResult<StackFrame> {
    let location = marshal::best_opt(vm.frame_location(thread, index))?;
    let (class_name, method_name, source) = match &location {
        Some(loc) => (
            marshal::best(vm.reference_type_name(loc.class), "Class".to_string())?,
            marshal::best(vm.method_name(loc.class, loc.method), "Method".to_string())?,
            position(sources, loc),
        ),
        None => ("Class".to_string(), "Method".to_string(), None),
    };

    let mut locals = Vec::new();
    for slot in marshal::best(vm.visible_variables(thread, index), Vec::new())? {
        let summary = match marshal::best_opt(vm.slot_value(thread, index, slot.slot))? {
            Some(value) => marshal::summarize(vm, &value)?,
            None => marshal::MISSING.to_string(),
        };
        locals.push(StackLocal {
            slot: slot.slot,
            name: slot.name,
            summary,
            type_name: slot.type_name,
        });
    }

    let num_args = marshal::best(vm.argument_count(thread, index), 0)?;
    let this_object_id = match marshal::best(vm.this_object(thread, index), None)? {
        Some(id) => {
            marshal::remember(vm, objects, id)?;
            id as i64
        }
        None => -1,
    };

    Ok(StackFrame {
        index,
        locals,
        num_args,
        class_name,
        method_name,
        source,
        this_object_id,
    })
}
