//! A live connection to one target runtime: the VM handle, the event pump
//! and output relays, the loaded-class index, and the identity cache. All of
//! it is created together and torn down together.

use std::path::Path;
use std::sync::Arc;

use quasar_jdwp::{
    Connector, LaunchOptions, ReferenceTypeId, RequestId, StepDepth, SuspendPolicy, ThreadId, Vm,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::breakpoints::Breakpoint;
use crate::config::DebugConfig;
use crate::controller::ControllerMessage;
use crate::error::{DebugError, DebugResult};
use crate::locations::LocationResolver;
use crate::marshal;
use crate::object_registry::ObjectRegistry;
use crate::output::spawn_output_relay;
use crate::pump::spawn_event_pump;
use crate::source_map::file_key;

/// Monotonic generation tag; messages from a replaced session's workers are
/// discarded by the controller when the tag no longer matches.
pub(crate) type SessionId = u64;

pub(crate) enum SessionMode {
    Launch { command_line: String },
    Attach { host: String, port: u16 },
}

#[derive(Debug)]
struct InstalledBreakpoint {
    request: RequestId,
    breakpoint: Breakpoint,
}

pub(crate) struct TargetSession {
    pub(crate) id: SessionId,
    vm: Arc<dyn Vm>,
    resolver: LocationResolver,
    objects: ObjectRegistry,
    installed: Vec<InstalledBreakpoint>,
    dispose_token: CancellationToken,
}

impl TargetSession {
    /// Connect to a target. Launch mode starts the process suspended (so
    /// breakpoints can be installed before user code runs) and wires up the
    /// stdout/stderr relays; attach mode resumes immediately, which is a
    /// no-op if the remote is already running.
    pub(crate) fn open(
        id: SessionId,
        mode: SessionMode,
        config: &DebugConfig,
        connector: &dyn Connector,
        tx: &UnboundedSender<ControllerMessage>,
    ) -> DebugResult<Self> {
        let dispose_token = CancellationToken::new();

        let (vm, attached) = match mode {
            SessionMode::Launch { command_line } => {
                let options = LaunchOptions {
                    main: command_line,
                    classpath: config.classpath.clone(),
                    vm_args: config.vm_args.clone(),
                };
                let launched = connector
                    .launch(&options)
                    .map_err(|err| DebugError::Startup(err.to_string()))?;
                spawn_output_relay(
                    id,
                    launched.stdout,
                    tx.clone(),
                    dispose_token.clone(),
                    "stdout",
                );
                spawn_output_relay(
                    id,
                    launched.stderr,
                    tx.clone(),
                    dispose_token.clone(),
                    "stderr",
                );
                (launched.vm, false)
            }
            SessionMode::Attach { host, port } => (
                connector
                    .attach(&host, port)
                    .map_err(|err| DebugError::Startup(err.to_string()))?,
                true,
            ),
        };

        vm.request_class_prepare(SuspendPolicy::All)?;
        vm.request_thread_start(SuspendPolicy::None)?;
        vm.request_thread_death(SuspendPolicy::None)?;
        vm.request_exception(false, true, SuspendPolicy::All)?;

        spawn_event_pump(id, vm.clone(), tx.clone());

        let mut session = Self {
            id,
            vm,
            resolver: LocationResolver::default(),
            objects: ObjectRegistry::default(),
            installed: Vec::new(),
            dispose_token,
        };

        // A launched target delivers a VM-start event once resumed and the
        // location map is built then; an attached target is already past
        // that point, so index its classes now and let it run.
        if attached {
            session.init_location_map()?;
            session.vm.resume()?;
        }

        Ok(session)
    }

    pub(crate) fn vm(&self) -> &dyn Vm {
        self.vm.as_ref()
    }

    /// Split borrow for request handlers that read the target while
    /// recording ids in the identity cache.
    pub(crate) fn vm_and_objects(&mut self) -> (&dyn Vm, &mut ObjectRegistry) {
        (self.vm.as_ref(), &mut self.objects)
    }

    /// Index every class the target has already loaded.
    pub(crate) fn init_location_map(&mut self) -> DebugResult<()> {
        for class in self.vm.all_classes()? {
            self.register_class(class.id)?;
        }
        Ok(())
    }

    /// Register one loaded class under its declared source short name.
    /// Classes without source information are not indexed. Returns the key
    /// so the caller can retry pending breakpoints for it.
    pub(crate) fn register_class(
        &mut self,
        class: ReferenceTypeId,
    ) -> DebugResult<Option<String>> {
        let Some(key) = marshal::best_opt(self.vm.source_name(class))? else {
            return Ok(None);
        };
        self.resolver.register(&key, class);
        Ok(Some(key))
    }

    /// Install a breakpoint at every wire location resolving to the file and
    /// line. True iff at least one request was installed.
    pub(crate) fn set_breakpoint(&mut self, file: &Path, line: u32) -> DebugResult<bool> {
        let key = file_key(file);
        let locations = self.resolver.locations(self.vm.as_ref(), &key, line)?;
        let mut installed = false;
        for location in &locations {
            let request = self.vm.request_breakpoint(location, SuspendPolicy::All)?;
            self.installed.push(InstalledBreakpoint {
                request,
                breakpoint: Breakpoint::new(file, line),
            });
            installed = true;
        }
        Ok(installed)
    }

    /// Disable any installed requests whose position matches a breakpoint in
    /// the set. Target errors are tolerated; the request bookkeeping is
    /// dropped either way.
    pub(crate) fn clear_breakpoints(&mut self, targets: &[Breakpoint]) {
        let mut kept = Vec::with_capacity(self.installed.len());
        for entry in self.installed.drain(..) {
            if targets.contains(&entry.breakpoint) {
                let _ = self.vm.clear_request(entry.request);
            } else {
                kept.push(entry);
            }
        }
        self.installed = kept;
    }

    pub(crate) fn clear_all_breakpoints(&mut self) {
        let _ = self.vm.clear_all_breakpoints();
        self.installed.clear();
    }

    /// Replace any pending step with a fresh one-shot line step and let the
    /// target run.
    pub(crate) fn step(&self, thread: ThreadId, depth: StepDepth) -> DebugResult<()> {
        self.vm.clear_step_requests()?;
        self.vm.request_step(thread, depth, SuspendPolicy::All)?;
        self.vm.resume()?;
        Ok(())
    }

    /// Tear the session down. Tolerates an already-disconnected target; the
    /// pump and relays observe the dispose through the dead connection and
    /// the cancelled token.
    pub(crate) fn dispose(&mut self) {
        self.dispose_token.cancel();
        self.vm.dispose();
        self.objects.clear();
    }
}
