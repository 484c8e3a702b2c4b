//! Ordered, boundary-trimmed delivery of one stream's pieces to its port.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::DemuxError;
use super::dispatcher::DemuxShared;
use super::stream::{Delivery, Stream};
use crate::output::PushError;
use crate::sniff;

/// Starts the delivery thread of a stream.
///
/// Returns `None` if the stream already has a worker.
pub(crate) fn spawn(
    shared: Arc<DemuxShared>,
    stream: Arc<Stream>,
) -> io::Result<Option<JoinHandle<()>>> {
    let Some(receiver) = stream.take_receiver() else {
        return Ok(None);
    };
    let name = format!("piecestream-deliver-{}", stream.index());
    let worker = DeliveryWorker {
        shared,
        stream,
        receiver,
    };
    thread::Builder::new()
        .name(name)
        .spawn(move || worker.run())
        .map(Some)
}

struct DeliveryWorker {
    shared: Arc<DemuxShared>,
    stream: Arc<Stream>,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

/// What a delivery entry resolved to under the stream lock.
struct Outgoing {
    data: Bytes,
    segment: Option<(u64, u64)>,
    is_last: bool,
    open_port: bool,
}

impl DeliveryWorker {
    fn run(mut self) {
        let port = self.stream.index();
        debug!(stream = port, "Delivery worker started");
        while let Some(delivery) = self.receiver.blocking_recv() {
            let flow = match delivery {
                Delivery::Shutdown => break,
                Delivery::Piece {
                    generation,
                    piece,
                    data,
                } => self.deliver(generation, Some((piece, data))),
                Delivery::EmptyRange { generation } => self.deliver(generation, None),
            };
            if flow.is_break() {
                break;
            }
        }
        debug!(stream = port, "Delivery worker stopped");
    }

    fn deliver(&self, generation: u64, piece: Option<(u32, Bytes)>) -> ControlFlow<()> {
        let port = self.stream.index();
        let Some(outgoing) = self.prepare(generation, piece) else {
            return ControlFlow::Continue(());
        };

        if outgoing.open_port {
            let content_type = sniff::detect_content_type(&outgoing.data);
            debug!(stream = port, ?content_type, "Sniffed first bytes");
            self.shared.open_port(&self.stream, content_type);
            self.shared.check_ports_settled();
        }

        let output = &self.shared.output;
        if let Some((start, end)) = outgoing.segment {
            debug!(stream = port, start, end, "Announcing range");
            output.announce_range(port, start, end);
        }

        if !outgoing.data.is_empty() {
            let len = outgoing.data.len();
            match output.push(port, outgoing.data) {
                Ok(()) => trace!(stream = port, len, "Pushed"),
                Err(PushError::Flushing) => {
                    debug!(stream = port, len, "Port flushing, buffer dropped");
                }
                Err(reason) => {
                    warn!(stream = port, "Push failed: {reason}");
                    {
                        let mut state = self.stream.lock();
                        state.requested = false;
                        state.finished = true;
                    }
                    output.end_of_stream(port);
                    output.error(DemuxError::StreamFlow {
                        stream: port,
                        reason,
                    });
                    return ControlFlow::Break(());
                }
            }
        }

        if outgoing.is_last {
            debug!(stream = port, "End of stream");
            output.end_of_stream(port);
        }
        ControlFlow::Continue(())
    }

    /// Validates an entry against the current activation and takes what must
    /// be sent. Stale entries yield `None`.
    fn prepare(&self, generation: u64, piece: Option<(u32, Bytes)>) -> Option<Outgoing> {
        let mut state = self.stream.lock();
        if !state.requested || state.generation != generation {
            trace!(
                stream = state.index,
                generation,
                current = state.generation,
                "Dropping stale delivery"
            );
            return None;
        }

        let (data, is_last) = match piece {
            Some((index, data)) => {
                if !state.span.contains(index) {
                    trace!(stream = state.index, piece = index, "Dropping piece outside range");
                    return None;
                }
                (state.span.trim(index, &data), index == state.last_piece)
            }
            None => (Bytes::new(), true),
        };
        let segment = std::mem::take(&mut state.pending_segment).then_some(state.segment);
        if is_last {
            state.finished = true;
        }

        Some(Outgoing {
            data,
            segment,
            is_last,
            open_port: !state.port_open,
        })
    }
}
