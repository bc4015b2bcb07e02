//! Shared fixture: a controller wired to a scripted target runtime.
#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quasar_debug::{DebugConfig, DebugController, DebugEvent, DebugHandle};
use quasar_jdwp::mock::{MockConnector, MockVm, ScriptedClass, ScriptedFrame, ScriptedThread};
use quasar_jdwp::{SlotInfo, VmValue, WireLocation};
use tokio::sync::broadcast;

pub const FOO_PATH: &str = "/proj/com/example/Foo.scala";
pub const MAIN_THREAD: u64 = 9;

pub struct Fixture {
    pub vm: MockVm,
    pub connector: Arc<MockConnector>,
    pub handle: DebugHandle,
    pub events: broadcast::Receiver<DebugEvent>,
}

pub fn fixture(config: DebugConfig, connector: MockConnector) -> Fixture {
    let vm = connector.vm().clone();
    let connector = Arc::new(connector);
    let (events_tx, events) = broadcast::channel(64);
    let handle = DebugController::spawn(config, connector.clone(), events_tx);
    Fixture {
        vm,
        connector,
        handle,
        events,
    }
}

pub fn config_with_sources(files: &[&str]) -> DebugConfig {
    DebugConfig {
        source_files: files.iter().map(PathBuf::from).collect(),
        ..DebugConfig::default()
    }
}

/// `com.example.Foo`, declared in `Foo.scala`, with code on lines 10, 42,
/// and 43 of its `main` method.
pub fn foo_class() -> ScriptedClass {
    ScriptedClass::new(1, "com.example.Foo", "Foo.scala", "com/example/Foo.scala")
        .with_method_name(1, "main")
        .with_line(1, 10)
        .with_line(1, 42)
        .with_line(1, 43)
}

pub fn foo_location(line: u32) -> WireLocation {
    WireLocation {
        class: 1,
        method: 1,
        index: 0,
        line,
        source_name: "Foo.scala".to_string(),
        source_path: "com/example/Foo.scala".to_string(),
    }
}

pub fn int_slot(slot: u32, name: &str, value: i32) -> (SlotInfo, VmValue) {
    (
        SlotInfo {
            slot,
            name: name.to_string(),
            type_name: "int".to_string(),
        },
        VmValue::Int(value),
    )
}

pub fn main_thread(frames: Vec<ScriptedFrame>) -> ScriptedThread {
    ScriptedThread {
        id: MAIN_THREAD,
        name: "main".to_string(),
        frames,
    }
}

pub fn frame_at(line: u32, slots: Vec<(SlotInfo, VmValue)>) -> ScriptedFrame {
    ScriptedFrame {
        location: foo_location(line),
        this: None,
        arg_count: 0,
        slots,
    }
}

/// Receive events until one matches, ignoring the rest.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<DebugEvent>,
    mut matches: impl FnMut(&DebugEvent) -> bool,
) -> DebugEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for debug event")
}

/// Poll an async condition until it holds; background workers deliver their
/// messages on their own schedule.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}
