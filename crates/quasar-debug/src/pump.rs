//! The event pump: a dedicated thread blocking on the target's event queue.
//!
//! The pump is a pure forwarder. It never touches controller-owned state;
//! event sets are delivered as mailbox messages and the controller decides
//! what to register, emit, and resume.

use std::sync::Arc;

use quasar_jdwp::Vm;
use tokio::sync::mpsc::UnboundedSender;

use crate::controller::ControllerMessage;
use crate::session::SessionId;

pub(crate) fn spawn_event_pump(
    session: SessionId,
    vm: Arc<dyn Vm>,
    tx: UnboundedSender<ControllerMessage>,
) {
    let spawned = std::thread::Builder::new()
        .name("quasar-event-pump".to_string())
        .spawn(move || loop {
            match vm.next_event_set() {
                Ok(set) => {
                    let finished = set.is_disconnect();
                    if tx
                        .send(ControllerMessage::VmEvents { session, set })
                        .is_err()
                    {
                        break;
                    }
                    if finished {
                        break;
                    }
                }
                Err(err) if err.is_disconnect() => {
                    let _ = tx.send(ControllerMessage::PumpDisconnected { session });
                    break;
                }
                Err(err) => {
                    // Fail closed: the controller observes the disconnection
                    // on its next target interaction.
                    tracing::error!(target: "quasar.pump", %err, "event pump failed");
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        tracing::error!(target: "quasar.pump", %err, "failed to spawn event pump");
    }
}
