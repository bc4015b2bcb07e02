//! Drains a launched target's stdout/stderr into controller messages.

use std::io::Read;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::controller::ControllerMessage;
use crate::session::SessionId;

const CHUNK: usize = 512;

/// Spawn a blocking reader thread that forwards fixed-size output chunks to
/// the controller. Terminates on end-of-stream, on the session's dispose
/// signal, or when the controller is gone.
pub(crate) fn spawn_output_relay(
    session: SessionId,
    mut reader: Box<dyn Read + Send>,
    tx: UnboundedSender<ControllerMessage>,
    dispose: CancellationToken,
    stream: &'static str,
) {
    let spawned = std::thread::Builder::new()
        .name(format!("quasar-output-{stream}"))
        .spawn(move || {
            let mut buf = [0u8; CHUNK];
            loop {
                if dispose.is_cancelled() {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if tx
                            .send(ControllerMessage::Output { session, text })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(
                            target: "quasar.debug",
                            %err,
                            stream,
                            "output relay terminated"
                        );
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        tracing::error!(target: "quasar.debug", %err, stream, "failed to spawn output relay");
    }
}
