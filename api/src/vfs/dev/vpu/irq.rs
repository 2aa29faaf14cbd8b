//! Interrupt-to-waiter handoff
//!
//! The hardware handlers only latch status, acknowledge the source and queue
//! the deferred task. The deferred task, running on the `vpu_wq` thread, is
//! the only path that publishes a completion and wakes waiters.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use std::vec::Vec;

use event_listener::{Event, Listener};
use mxcvpu_core::hal::RegisterIo;
use spin::Mutex;

use super::error::{VpuError, VpuResult};
use super::regs::*;

/// Callback run by the deferred task on every completion (SIGIO analogue).
/// Must return promptly: `IrqWorker::flush` waits for it.
pub type AsyncNotifier = Arc<dyn Fn() + Send + Sync>;

/// Single-slot completion flag with blocking waits.
pub struct CompletionChannel {
    irq_pending: AtomicBool,
    codec_done: AtomicBool,
    event: Event,
    notifiers: Mutex<Vec<(u64, AsyncNotifier)>>,
}

impl CompletionChannel {
    pub fn new() -> Self {
        Self {
            irq_pending: AtomicBool::new(false),
            codec_done: AtomicBool::new(false),
            event: Event::new(),
            notifiers: Mutex::new(Vec::new()),
        }
    }

    /// Latched by the hardware handler when a picture finished.
    pub fn mark_codec_done(&self) {
        self.codec_done.store(true, Ordering::SeqCst);
    }

    pub fn codec_done(&self) -> bool {
        self.codec_done.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.irq_pending.load(Ordering::SeqCst)
    }

    /// Publishes one completion: notifies subscribers, sets the pending
    /// flag and wakes every waiter.
    pub fn complete(&self) {
        let notifiers: Vec<AsyncNotifier> =
            self.notifiers.lock().iter().map(|(_, n)| n.clone()).collect();
        for notify in notifiers {
            notify();
        }
        self.irq_pending.store(true, Ordering::SeqCst);
        self.codec_done.store(false, Ordering::SeqCst);
        self.event.notify(usize::MAX);
    }

    /// Wakes waiters without publishing anything, so they recheck their
    /// interruption flag.
    pub fn kick(&self) {
        self.event.notify(usize::MAX);
    }

    /// Drops an unconsumed completion.
    pub fn reset(&self) {
        self.irq_pending.store(false, Ordering::SeqCst);
    }

    fn try_consume(&self) -> bool {
        self.irq_pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Blocks until a completion is pending, `timeout` elapses, or
    /// `signal` is raised. A consumed completion is not seen by the next
    /// waiter.
    ///
    /// `signal` is cleared when it ends the wait.
    pub fn wait(&self, timeout: Duration, signal: &AtomicBool) -> VpuResult<()> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if signal.swap(false, Ordering::SeqCst) {
                warn!("VPU interrupt received");
                return Err(VpuError::Interrupted);
            }
            if self.try_consume() {
                return Ok(());
            }

            let listener = self.event.listen();
            if signal.load(Ordering::SeqCst) || self.is_pending() {
                continue;
            }
            let woken = match deadline {
                Some(deadline) => listener.wait_deadline(deadline).is_some(),
                None => {
                    listener.wait();
                    true
                }
            };
            if !woken {
                if self.try_consume() {
                    return Ok(());
                }
                warn!("VPU blocking: timeout");
                return Err(VpuError::Timeout);
            }
        }
    }

    pub fn subscribe(&self, id: u64, notifier: AsyncNotifier) {
        let mut notifiers = self.notifiers.lock();
        notifiers.retain(|(owner, _)| *owner != id);
        notifiers.push((id, notifier));
    }

    pub fn unsubscribe(&self, id: u64) {
        self.notifiers.lock().retain(|(owner, _)| *owner != id);
    }
}

impl Default for CompletionChannel {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkState {
    queued: bool,
    running: bool,
    stop: bool,
}

struct WorkerShared {
    state: Mutex<WorkState>,
    wake: Event,
    idle: Event,
    channel: Arc<CompletionChannel>,
}

impl WorkerShared {
    fn run(&self) {
        loop {
            let listener = self.wake.listen();
            let job = {
                let mut st = self.state.lock();
                if st.stop {
                    break;
                }
                let job = st.queued;
                if job {
                    st.queued = false;
                    st.running = true;
                }
                job
            };
            if !job {
                listener.wait();
                continue;
            }

            self.channel.complete();
            self.state.lock().running = false;
            self.idle.notify(usize::MAX);
        }
        self.idle.notify(usize::MAX);
    }

    fn wait_idle(&self) {
        loop {
            let listener = self.idle.listen();
            {
                let st = self.state.lock();
                if (!st.queued || st.stop) && !st.running {
                    return;
                }
            }
            listener.wait();
        }
    }
}

/// Deferred-task thread feeding a [`CompletionChannel`].
///
/// Queuing an already queued task is a no-op, so a burst of interrupts
/// yields one completion.
pub struct IrqWorker {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IrqWorker {
    pub fn start(channel: Arc<CompletionChannel>) -> VpuResult<Self> {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkState {
                queued: false,
                running: false,
                stop: false,
            }),
            wake: Event::new(),
            idle: Event::new(),
            channel,
        });
        let worker = shared.clone();
        let handle = std::thread::Builder::new()
            .name("vpu_wq".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                error!("failed to start vpu_wq: {}", e);
                VpuError::ResourceExhausted
            })?;
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues the deferred task. Returns false if it was already queued.
    pub fn queue(&self) -> bool {
        {
            let mut st = self.shared.state.lock();
            if st.queued || st.stop {
                return false;
            }
            st.queued = true;
        }
        self.shared.wake.notify(1);
        true
    }

    /// Drops queued work and waits for a running task to finish.
    pub fn cancel_sync(&self) {
        self.shared.state.lock().queued = false;
        self.shared.wait_idle();
    }

    /// Waits until no work is queued or running.
    pub fn flush(&self) {
        self.shared.wait_idle();
    }

    /// Stops the thread. Queued work is dropped.
    pub fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            st.stop = true;
            st.queued = false;
        }
        self.shared.wake.notify(usize::MAX);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("vpu_wq panicked");
            }
        }
    }
}

impl Drop for IrqWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Codec (BIT processor) interrupt.
pub fn handle_ipi_irq(regs: &dyn RegisterIo, channel: &CompletionChannel, worker: &IrqWorker) {
    let reason = regs.read(BIT_INT_REASON);
    if reason & INT_REASON_CODEC_DONE != 0 {
        channel.mark_codec_done();
    }
    regs.write(BIT_INT_CLEAR, 0x1);
    worker.queue();
}

/// JPEG unit interrupt. The source clears itself.
pub fn handle_jpu_irq(regs: &dyn RegisterIo, channel: &CompletionChannel, worker: &IrqWorker) {
    if regs.read(MJPEG_PIC_STATUS_REG) & MJPEG_DONE_MASK != 0 {
        channel.mark_codec_done();
    }
    worker.queue();
}
