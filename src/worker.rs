//! Per-analyzer worker threads.
//!
//! Each analyzer owns its model and state on a dedicated thread. The
//! scheduler hands frames over through a capacity-1 channel guarded by an
//! in-flight flag: the flag is claimed before a frame is sent and released by
//! the worker once that frame's outputs (or its error) have been published,
//! so at most one frame per analyzer is ever pending or running.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::detect::DetectionBatch;
use crate::error::{ErrorKind, ProctorError};
use crate::face::{FocusEvent, FocusUpdate};
use crate::frame::Frame;
use crate::scheduler::{FrameSink, SubmitOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Face,
    Objects,
}

impl AnalyzerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalyzerKind::Face => "face",
            AnalyzerKind::Objects => "objects",
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one analyzed frame produced.
#[derive(Clone, Debug, PartialEq)]
pub enum AnalyzerOutput {
    State(FocusUpdate),
    Event(FocusEvent),
    Results(DetectionBatch),
}

/// A frame analysis stage. Runs on its worker thread only.
pub trait FrameAnalyzer: Send {
    fn kind(&self) -> AnalyzerKind;

    /// Load models. Called once on the worker thread before the first frame.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn analyze(&mut self, frame: &Frame) -> Result<Vec<AnalyzerOutput>>;

    /// Clear algorithmic state; loaded models are kept.
    fn reset(&mut self);
}

/// Builds a fresh analyzer each time a worker is (re)started.
pub type AnalyzerFactory = Arc<dyn Fn() -> Result<Box<dyn FrameAnalyzer>> + Send + Sync>;

enum WorkerInbound {
    Init,
    Frame(Frame),
    Reset,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkerOutbound {
    Ready,
    State(FocusUpdate),
    Event(FocusEvent),
    Results(DetectionBatch),
    Error(ProctorError),
}

impl From<AnalyzerOutput> for WorkerOutbound {
    fn from(output: AnalyzerOutput) -> Self {
        match output {
            AnalyzerOutput::State(update) => WorkerOutbound::State(update),
            AnalyzerOutput::Event(event) => WorkerOutbound::Event(event),
            AnalyzerOutput::Results(batch) => WorkerOutbound::Results(batch),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkerMessage {
    pub analyzer: AnalyzerKind,
    pub body: WorkerOutbound,
}

/// Flags shared between a handle and its thread.
#[derive(Default)]
struct WorkerFlags {
    ready: AtomicBool,
    in_flight: AtomicBool,
    cancelled: AtomicBool,
    reset_requested: AtomicBool,
}

pub struct AnalyzerHandle {
    kind: AnalyzerKind,
    inbound: Option<SyncSender<WorkerInbound>>,
    flags: Arc<WorkerFlags>,
    join: Option<JoinHandle<()>>,
}

impl AnalyzerHandle {
    /// Start a worker thread. The analyzer is built and initialized on that
    /// thread; `Ready` or an `Initialization` error is published when done.
    pub fn spawn(
        kind: AnalyzerKind,
        factory: AnalyzerFactory,
        outbound: Sender<WorkerMessage>,
    ) -> Result<Self> {
        let (tx, rx) = sync_channel(1);
        let flags = Arc::new(WorkerFlags::default());
        let thread_flags = flags.clone();
        let join = std::thread::Builder::new()
            .name(format!("proctor-{}", kind))
            .spawn(move || run_worker(kind, factory, rx, outbound, thread_flags))?;
        tx.send(WorkerInbound::Init)
            .map_err(|_| anyhow!("{} worker exited before init", kind))?;
        Ok(Self {
            kind,
            inbound: Some(tx),
            flags,
            join: Some(join),
        })
    }

    pub fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    pub fn is_ready(&self) -> bool {
        self.flags.ready.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> bool {
        self.flags.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        self.inbound.is_some() && self.is_ready() && !self.in_flight()
    }

    /// Offer a frame without blocking.
    pub fn try_submit(&self, frame: Frame) -> SubmitOutcome {
        let Some(tx) = &self.inbound else {
            return SubmitOutcome::Closed;
        };
        if self.flags.cancelled.load(Ordering::SeqCst) {
            return SubmitOutcome::Closed;
        }
        if !self.is_ready() {
            return SubmitOutcome::NotReady;
        }
        if self
            .flags
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SubmitOutcome::Busy;
        }
        match tx.try_send(WorkerInbound::Frame(frame)) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(TrySendError::Full(_)) => {
                self.flags.in_flight.store(false, Ordering::SeqCst);
                SubmitOutcome::Busy
            }
            Err(TrySendError::Disconnected(_)) => {
                self.flags.in_flight.store(false, Ordering::SeqCst);
                SubmitOutcome::Closed
            }
        }
    }

    /// Ask the worker to clear algorithmic state before its next frame.
    pub fn reset(&self) {
        self.flags.reset_requested.store(true, Ordering::SeqCst);
        if let Some(tx) = &self.inbound {
            // A full channel means a frame is pending; the flag covers it.
            let _ = tx.try_send(WorkerInbound::Reset);
        }
    }

    /// Stop the worker: pending frames are discarded, outputs of a frame in
    /// progress are suppressed, and the thread is joined.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.flags.cancelled.store(true, Ordering::SeqCst);
        if let Some(tx) = self.inbound.take() {
            // Dropping the sender also ends the loop when the channel is full.
            let _ = tx.try_send(WorkerInbound::Shutdown);
        }
        let result = match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("{} worker thread panicked", self.kind)),
            None => Ok(()),
        };
        self.flags.in_flight.store(false, Ordering::SeqCst);
        self.flags.ready.store(false, Ordering::SeqCst);
        result
    }
}

impl Drop for AnalyzerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{}", err);
        }
    }
}

fn run_worker(
    kind: AnalyzerKind,
    factory: AnalyzerFactory,
    inbound: Receiver<WorkerInbound>,
    outbound: Sender<WorkerMessage>,
    flags: Arc<WorkerFlags>,
) {
    let publish = |body: WorkerOutbound| {
        let _ = outbound.send(WorkerMessage {
            analyzer: kind,
            body,
        });
    };
    let mut analyzer: Option<Box<dyn FrameAnalyzer>> = None;

    while let Ok(msg) = inbound.recv() {
        if flags.cancelled.load(Ordering::SeqCst) {
            break;
        }
        match msg {
            WorkerInbound::Shutdown => break,
            WorkerInbound::Init => {
                let built = factory().and_then(|mut a| a.initialize().map(|_| a));
                match built {
                    Ok(a) => {
                        analyzer = Some(a);
                        flags.ready.store(true, Ordering::SeqCst);
                        log::info!("{} analyzer ready", kind);
                        publish(WorkerOutbound::Ready);
                    }
                    Err(err) => {
                        log::error!("{} analyzer failed to initialize: {:#}", kind, err);
                        publish(WorkerOutbound::Error(ProctorError::from_anyhow(
                            ErrorKind::Initialization,
                            kind.as_str(),
                            &err,
                        )));
                    }
                }
            }
            WorkerInbound::Reset => {
                if let Some(a) = analyzer.as_mut() {
                    if flags.reset_requested.swap(false, Ordering::SeqCst) {
                        a.reset();
                    }
                }
            }
            WorkerInbound::Frame(frame) => {
                if let Some(a) = analyzer.as_mut() {
                    if flags.reset_requested.swap(false, Ordering::SeqCst) {
                        a.reset();
                    }
                    let result = a.analyze(&frame);
                    drop(frame);
                    if !flags.cancelled.load(Ordering::SeqCst) {
                        match result {
                            Ok(outputs) => {
                                for output in outputs {
                                    publish(output.into());
                                }
                            }
                            Err(err) => {
                                log::warn!("{} analysis failed: {:#}", kind, err);
                                publish(WorkerOutbound::Error(ProctorError::from_anyhow(
                                    ErrorKind::Frame,
                                    kind.as_str(),
                                    &err,
                                )));
                            }
                        }
                    }
                }
                flags.in_flight.store(false, Ordering::SeqCst);
            }
        }
    }
    log::debug!("{} worker exiting", kind);
}

/// Replaceable slot for one analyzer, shared by the scheduler and the session.
/// An empty slot means the analyzer is disabled.
#[derive(Clone)]
pub struct AnalyzerSlot {
    kind: AnalyzerKind,
    handle: Arc<Mutex<Option<AnalyzerHandle>>>,
}

impl AnalyzerSlot {
    pub fn new(kind: AnalyzerKind) -> Self {
        Self {
            kind,
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<AnalyzerHandle>>> {
        self.handle
            .lock()
            .map_err(|_| anyhow!("{} slot lock poisoned", self.kind))
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Enabled and initialized.
    pub fn is_ready(&self) -> bool {
        self.lock()
            .map(|slot| slot.as_ref().is_some_and(|h| h.is_ready()))
            .unwrap_or(false)
    }

    /// Start a worker in the slot unless one is already running.
    pub fn enable(&self, factory: AnalyzerFactory, outbound: Sender<WorkerMessage>) -> Result<()> {
        let mut slot = self.lock()?;
        if slot.is_none() {
            *slot = Some(AnalyzerHandle::spawn(self.kind, factory, outbound)?);
        }
        Ok(())
    }

    /// Stop and remove the worker, if any.
    pub fn disable(&self) -> Result<()> {
        let handle = self.lock()?.take();
        match handle {
            Some(handle) => handle.shutdown(),
            None => Ok(()),
        }
    }

    pub fn reset(&self) -> Result<()> {
        if let Some(handle) = self.lock()?.as_ref() {
            handle.reset();
        }
        Ok(())
    }
}

impl FrameSink for AnalyzerSlot {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn is_available(&self) -> bool {
        match self.lock() {
            Ok(slot) => slot.as_ref().map(|h| h.is_available()).unwrap_or(false),
            Err(_) => false,
        }
    }

    fn submit(&mut self, frame: Frame) -> SubmitOutcome {
        match self.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(handle) => handle.try_submit(frame),
                None => SubmitOutcome::Disabled,
            },
            Err(_) => SubmitOutcome::Closed,
        }
    }
}
