//! Execution control: resume, per-thread stepping, and the step/breakpoint
//! stop events.

mod common;

use common::*;
use quasar_debug::{DebugEvent, StartResult};
use quasar_jdwp::mock::{MockConnector, MockVm};
use quasar_jdwp::{StepDepth, SuspendPolicy, VmEvent};

fn attached_fixture() -> Fixture {
    let vm = MockVm::new();
    vm.load_class(foo_class());
    vm.add_thread(main_thread(vec![frame_at(42, vec![int_slot(0, "x", 1)])]));
    fixture(config_with_sources(&[FOO_PATH]), MockConnector::new(vm))
}

#[tokio::test]
async fn run_and_continue_resume_the_whole_vm() {
    let fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);
    let after_attach = fx.vm.resume_count();

    assert!(fx.handle.run().await);
    assert_eq!(fx.vm.resume_count(), after_attach + 1);

    // Continue takes a thread id but there is no per-thread resume
    // primitive; the whole VM runs.
    assert!(fx.handle.continue_thread(MAIN_THREAD).await);
    assert_eq!(fx.vm.resume_count(), after_attach + 2);
}

#[tokio::test]
async fn stepping_installs_a_one_shot_request_and_resumes() {
    let fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);
    let after_attach = fx.vm.resume_count();

    assert!(fx.handle.next(MAIN_THREAD).await);
    assert_eq!(fx.vm.step_requests(), vec![(MAIN_THREAD, StepDepth::Over)]);
    assert_eq!(fx.vm.resume_count(), after_attach + 1);

    // A new step replaces the previous request; only one is ever pending.
    assert!(fx.handle.step(MAIN_THREAD).await);
    assert_eq!(fx.vm.step_requests(), vec![(MAIN_THREAD, StepDepth::Into)]);

    assert!(fx.handle.step_out(MAIN_THREAD).await);
    assert_eq!(fx.vm.step_requests(), vec![(MAIN_THREAD, StepDepth::Out)]);
}

#[tokio::test]
async fn stepping_an_unknown_thread_is_refused() {
    let fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);
    let after_attach = fx.vm.resume_count();

    assert!(!fx.handle.next(777).await);
    assert!(fx.vm.step_requests().is_empty());
    assert_eq!(fx.vm.resume_count(), after_attach);
}

#[tokio::test]
async fn step_event_emits_the_resolved_position() {
    let mut fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);

    assert!(fx.handle.step(MAIN_THREAD).await);
    let set = fx.vm.push_event_set(
        SuspendPolicy::All,
        vec![VmEvent::Step {
            request: 1,
            thread: MAIN_THREAD,
            location: foo_location(43),
        }],
    );

    let event = wait_for_event(&mut fx.events, |e| matches!(e, DebugEvent::Step { .. })).await;
    let DebugEvent::Step {
        thread_id,
        thread_name,
        source,
    } = event
    else {
        unreachable!();
    };
    assert_eq!(thread_id, MAIN_THREAD);
    assert_eq!(thread_name, "main");
    assert_eq!(source.file, std::path::PathBuf::from(FOO_PATH));
    assert_eq!(source.line, 43);

    // The stop keeps the target suspended for inspection.
    assert!(!fx.vm.resumed_sets().contains(&set));
}

#[tokio::test]
async fn stop_events_with_unresolvable_positions_are_dropped() {
    let mut fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);

    let mut nameless = foo_location(43);
    nameless.source_name = String::new();
    fx.vm.push_event_set(
        SuspendPolicy::All,
        vec![VmEvent::Step {
            request: 1,
            thread: MAIN_THREAD,
            location: nameless,
        }],
    );
    // Follow with a resolvable breakpoint stop; it must be the first event
    // the client sees.
    fx.vm.push_event_set(
        SuspendPolicy::All,
        vec![VmEvent::Breakpoint {
            request: 2,
            thread: MAIN_THREAD,
            location: foo_location(42),
        }],
    );

    let event = wait_for_event(&mut fx.events, |e| {
        matches!(e, DebugEvent::Step { .. } | DebugEvent::Breakpoint { .. })
    })
    .await;
    assert!(
        matches!(event, DebugEvent::Breakpoint { .. }),
        "expected the dropped step to be skipped, got {event:?}"
    );
}

#[tokio::test]
async fn thread_lifecycle_events_are_forwarded() {
    let mut fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);

    fx.vm.push_event_set(
        SuspendPolicy::None,
        vec![VmEvent::ThreadStart { thread: 21 }],
    );
    fx.vm.push_event_set(
        SuspendPolicy::None,
        vec![VmEvent::ThreadDeath { thread: 21 }],
    );

    let started =
        wait_for_event(&mut fx.events, |e| matches!(e, DebugEvent::ThreadStart { .. })).await;
    assert_eq!(started, DebugEvent::ThreadStart { thread_id: 21 });
    let died =
        wait_for_event(&mut fx.events, |e| matches!(e, DebugEvent::ThreadDeath { .. })).await;
    assert_eq!(died, DebugEvent::ThreadDeath { thread_id: 21 });
}

#[tokio::test]
async fn suspend_all_sets_with_only_unhandled_events_are_released() {
    let fx = attached_fixture();
    assert_eq!(fx.handle.attach("127.0.0.1", 5005).await, StartResult::Success);

    let set = fx.vm.push_event_set(
        SuspendPolicy::All,
        vec![VmEvent::MethodEntry {
            thread: MAIN_THREAD,
        }],
    );

    eventually("unhandled suspend-all set to be resumed", || {
        let vm = fx.vm.clone();
        async move { vm.resumed_sets().contains(&set) }
    })
    .await;
}
