//! Asynchronous command streams.
//!
//! Every stream owns a worker thread that drains an in-order command queue. Launching work only
//! enqueues a command; host code observes results through events or [`Stream::synchronize`].
//! While a stream is capturing, kernel launches are recorded into a [`GraphBuilder`] instead of
//! being queued.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::{CapturedGraph, GraphBuilder, GraphExec};

use super::buffer::Buffer;
use super::executor::execute_kernel;
use super::kernel::KernelLaunch;
use super::{DeviceId, DeviceShared};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// Completion marker recorded on a stream. Signalled once every earlier command has run.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    signaled: Mutex<bool>,
    ready: Condvar,
}

impl Event {
    fn new() -> Self {
        Event {
            inner: Arc::new(EventInner {
                signaled: Mutex::new(false),
                ready: Condvar::new(),
            }),
        }
    }

    fn signal(&self) {
        *lock(&self.inner.signaled) = true;
        self.inner.ready.notify_all();
    }

    /// Blocks the calling thread until the event has been signalled.
    pub fn wait(&self) {
        let mut signaled = lock(&self.inner.signaled);
        while !*signaled {
            signaled = self
                .inner
                .ready
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_complete(&self) -> bool {
        *lock(&self.inner.signaled)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("complete", &self.is_complete())
            .finish()
    }
}

enum Command {
    Kernel(KernelLaunch),
    Graph {
        graph: Arc<CapturedGraph>,
        bindings: Arc<[Arc<Buffer>]>,
    },
    Record(Event),
    Wait(Event),
}

/// Handle to an in-order command queue on a device. Clones share the same queue.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: StreamId,
    shared: Arc<DeviceShared>,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    capture: Mutex<Option<GraphBuilder>>,
}

impl Stream {
    pub(crate) fn spawn(shared: Arc<DeviceShared>) -> Result<Self> {
        let id = StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("devgraph-{id}"))
            .spawn(move || worker_loop(worker_shared, id, receiver))
            .with_context(|| format!("failed to spawn worker thread for {id}"))?;
        Ok(Stream {
            inner: Arc::new(StreamInner {
                id,
                shared,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                capture: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    pub fn device_id(&self) -> DeviceId {
        self.inner.shared.id
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.inner.capture).is_some()
    }

    fn send(&self, command: Command) -> Result<()> {
        let sender = lock(&self.inner.sender);
        let sender = sender.as_ref().ok_or_else(|| {
            GraphError::DeviceFault(format!("{} has been shut down", self.inner.id))
        })?;
        sender.send(command).map_err(|_| {
            GraphError::DeviceFault(format!("worker of {} has stopped", self.inner.id))
        })?;
        Ok(())
    }

    /// Enqueues a kernel, or records it when the stream is capturing.
    pub(crate) fn enqueue(&self, launch: KernelLaunch) -> Result<()> {
        {
            let mut capture = lock(&self.inner.capture);
            if let Some(builder) = capture.as_mut() {
                builder.record_kernel(launch);
                return Ok(());
            }
        }
        self.send(Command::Kernel(launch))
    }

    /// Records an event that completes once all previously enqueued work has run.
    pub fn record_event(&self) -> Result<Event> {
        if self.is_capturing() {
            return Err(GraphError::unsupported(format!(
                "cannot record events on {} while it is capturing",
                self.inner.id
            ))
            .into());
        }
        let event = Event::new();
        self.send(Command::Record(event.clone()))?;
        Ok(event)
    }

    /// Makes later work on this stream wait for `event` without blocking the host.
    pub fn wait_event(&self, event: &Event) -> Result<()> {
        if self.is_capturing() {
            return Err(GraphError::unsupported(format!(
                "cannot wait on events from {} while it is capturing",
                self.inner.id
            ))
            .into());
        }
        self.send(Command::Wait(event.clone()))
    }

    /// Orders later work on this stream after everything already enqueued on `other`.
    pub fn wait_stream(&self, other: &Stream) -> Result<()> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(());
        }
        let event = other.record_event()?;
        self.wait_event(&event)
    }

    /// Blocks until all enqueued work has run and reports any sticky device fault.
    pub fn synchronize(&self) -> Result<()> {
        if self.is_capturing() {
            return Err(GraphError::SyncDuringCapture.into());
        }
        let event = Event::new();
        self.send(Command::Record(event.clone()))?;
        event.wait();
        match self.inner.shared.fault() {
            Some(message) => Err(GraphError::DeviceFault(message).into()),
            None => Ok(()),
        }
    }

    /// Enqueues a replay of `exec` using a snapshot of its current bindings.
    pub(crate) fn launch_graph(&self, exec: &GraphExec) -> Result<()> {
        if self.is_capturing() {
            return Err(GraphError::unsupported(format!(
                "cannot launch a graph on {} while it is capturing",
                self.inner.id
            ))
            .into());
        }
        self.send(Command::Graph {
            graph: Arc::clone(exec.graph()),
            bindings: exec.bindings(),
        })
    }

    /// Switches the stream into capture mode until the returned session ends.
    pub(crate) fn begin_capture(&self) -> Result<CaptureSession<'_>> {
        let mut capture = lock(&self.inner.capture);
        if capture.is_some() {
            return Err(GraphError::CaptureInProgress.into());
        }
        *capture = Some(GraphBuilder::new());
        debug!(stream = %self.inner.id, "capture started");
        Ok(CaptureSession {
            stream: self,
            finished: false,
        })
    }

    /// Runs `f` against the active graph builder.
    pub(crate) fn with_builder<R>(&self, f: impl FnOnce(&mut GraphBuilder) -> R) -> Result<R> {
        let mut capture = lock(&self.inner.capture);
        let builder = capture.as_mut().ok_or_else(|| {
            GraphError::structural(format!("{} is not capturing", self.inner.id))
        })?;
        Ok(f(builder))
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Stream {}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("device", &self.inner.shared.id)
            .finish()
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        lock(&self.sender).take();
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                warn!(stream = %self.id, "stream worker panicked");
            }
        }
    }
}

/// Active capture on a stream. Dropping it without [`CaptureSession::finish`] discards the
/// recording and leaves the stream in normal mode.
pub(crate) struct CaptureSession<'a> {
    stream: &'a Stream,
    finished: bool,
}

impl CaptureSession<'_> {
    pub(crate) fn finish(mut self) -> Result<GraphBuilder> {
        self.finished = true;
        let builder = lock(&self.stream.inner.capture).take().ok_or_else(|| {
            GraphError::structural(format!("{} lost its capture state", self.stream.id()))
        })?;
        debug!(stream = %self.stream.id(), "capture finished");
        Ok(builder)
    }
}

impl Drop for CaptureSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.stream.inner.capture).take();
            debug!(stream = %self.stream.id(), "capture aborted");
        }
    }
}

fn worker_loop(shared: Arc<DeviceShared>, id: StreamId, receiver: Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Kernel(launch) => {
                if shared.is_faulted() {
                    continue;
                }
                if let Err(err) = execute_kernel(
                    shared.backend.as_ref(),
                    &launch.op,
                    &launch.inputs,
                    &launch.output,
                ) {
                    warn!(stream = %id, op = launch.op.label(), "kernel failed: {err}");
                    shared.record_fault(format!("{} on {id}: {err}", launch.op.label()));
                }
            }
            Command::Graph { graph, bindings } => {
                if shared.is_faulted() {
                    continue;
                }
                if let Err(err) = graph.run(shared.backend.as_ref(), &bindings) {
                    warn!(stream = %id, "graph replay failed: {err}");
                    shared.record_fault(format!("graph replay on {id}: {err}"));
                }
            }
            Command::Record(event) => event.signal(),
            Command::Wait(event) => event.wait(),
        }
    }
}
