//! Pub/sub endpoint with drop-on-full fan-out.

use super::{wire, FrameSink, PublishError, TransportError};
use crate::codec::CompressedFrame;
use bytes::Bytes;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the accept thread polls for new subscribers.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

struct Subscription {
    peer: SocketAddr,
    queue: Sender<Bytes>,
    /// Used to unblock a writer stuck on a stalled peer at shutdown.
    stream: Option<TcpStream>,
    writer: Option<JoinHandle<()>>,
}

impl Subscription {
    fn close(mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        drop(self.queue);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

struct Shared {
    subscribers: Mutex<Vec<Subscription>>,
    send_hwm: usize,
    stopped: AtomicBool,
}

impl Shared {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One bound pub/sub port.
///
/// Subscribers that connect after a frame was published do not receive
/// it; there is no replay.
pub struct FramePublisher {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl FramePublisher {
    /// Binds `addr` and starts accepting subscribers.
    ///
    /// `send_hwm` is the per-subscriber queue capacity in frames.
    pub fn bind(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        send_hwm: usize,
    ) -> Result<Self, TransportError> {
        let bind_err = |source: io::Error| TransportError::Bind {
            addr: format!("{addr:?}"),
            source,
        };
        let listener = TcpListener::bind(&addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Vec::new()),
            send_hwm: send_hwm.max(1),
            stopped: AtomicBool::new(false),
        });
        let accept_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name(format!("publisher-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, accept_shared))?;

        tracing::info!(addr = %local_addr, send_hwm, "Publisher bound");
        Ok(Self {
            local_addr,
            shared,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of subscribers currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Stops accepting, disconnects every subscriber and joins all threads.
    pub fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let acceptor = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(acceptor) = acceptor {
            let _ = acceptor.join();
        }
        let subscribers = std::mem::take(&mut *self.shared.subscribers());
        for subscription in subscribers {
            subscription.close();
        }
        tracing::info!(addr = %self.local_addr, "Publisher shut down");
    }

    #[cfg(test)]
    fn attach(&self, peer: SocketAddr, queue: Sender<Bytes>) {
        self.shared.subscribers().push(Subscription {
            peer,
            queue,
            stream: None,
            writer: None,
        });
    }
}

impl FrameSink for FramePublisher {
    fn publish(&self, frame: &CompressedFrame) -> Result<(), PublishError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        let payload = frame.bytes();
        let mut dropped = 0;
        let mut subscribers = self.shared.subscribers();
        subscribers.retain(|sub| match sub.queue.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::info!(peer = %sub.peer, "Subscriber disconnected");
                false
            }
        });

        if dropped > 0 {
            return Err(PublishError::BackpressureDrop {
                dropped,
                subscribers: subscribers.len(),
            });
        }
        Ok(())
    }
}

impl Drop for FramePublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.stopped.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = attach_subscriber(&shared, stream, peer) {
                    tracing::warn!(%peer, error = %e, "Failed to attach subscriber");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn attach_subscriber(shared: &Shared, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let control = stream.try_clone()?;

    let (queue, outbound) = bounded::<Bytes>(shared.send_hwm);
    let writer = thread::Builder::new()
        .name(format!("subscriber-{peer}"))
        .spawn(move || {
            let mut stream = stream;
            for payload in outbound.iter() {
                if let Err(e) = wire::write_message(&mut stream, &payload) {
                    tracing::debug!(%peer, error = %e, "Subscriber write failed");
                    break;
                }
            }
        })?;

    shared.subscribers().push(Subscription {
        peer,
        queue,
        stream: Some(control),
        writer: Some(writer),
    });
    tracing::info!(%peer, "Subscriber connected");
    Ok(())
}
