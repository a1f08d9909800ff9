//! In-process stand-in for a GPU runtime.
//!
//! Device memory is a set of reference-counted host buffers charged against
//! a memory budget. Work is submitted to a single ordered queue drained by
//! a worker thread, so submission returns before the work is done and
//! [`GpuDevice::synchronize`] is the only way to observe completion.
//!
//! A failing command leaves a sticky error on the device: later commands
//! are skipped until the next synchronize reports and clears it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use crate::error::{backend_err, AllocationError, ForgeResult};

use super::GPU_BACKEND;

/// Device command body; `Err` carries the failure message.
pub type Job = Box<dyn FnOnce() -> Result<(), String> + Send>;

enum Command {
    Job { label: String, job: Job },
    Fence(Sender<()>),
}

#[derive(Default)]
struct DeviceState {
    error: Mutex<Option<String>>,
    fault: Mutex<Option<String>>,
    completed: AtomicUsize,
    skipped: AtomicUsize,
}

impl DeviceState {
    fn has_error(&self) -> bool {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn record_error(&self, message: String) {
        let mut error = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        error.get_or_insert(message);
    }

    fn take_error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Counters exposed for tests and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub allocated_bytes: usize,
    pub completed: usize,
    pub skipped: usize,
}

pub struct GpuDevice {
    memory_limit: Option<usize>,
    allocated: Arc<AtomicUsize>,
    state: Arc<DeviceState>,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("memory_limit", &self.memory_limit)
            .field("stats", &self.stats())
            .finish()
    }
}

impl GpuDevice {
    /// Create the device and start its queue worker.
    pub fn new(memory_limit: Option<usize>) -> ForgeResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let state = Arc::new(DeviceState::default());
        let worker_state = Arc::clone(&state);
        let worker = std::thread::Builder::new()
            .name("nnforge-gpu-queue".to_string())
            .spawn(move || drain(receiver, worker_state))
            .map_err(|e| backend_err(GPU_BACKEND, format!("failed to start device queue: {}", e)))?;
        tracing::debug!(memory_limit = ?memory_limit, "gpu device started");
        Ok(Self {
            memory_limit,
            allocated: Arc::new(AtomicUsize::new(0)),
            state,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            allocated_bytes: self.allocated_bytes(),
            completed: self.state.completed.load(Ordering::SeqCst),
            skipped: self.state.skipped.load(Ordering::SeqCst),
        }
    }

    /// Reserve a zero-filled buffer of `elements` floats.
    pub fn allocate(&self, elements: usize) -> ForgeResult<DeviceBuffer> {
        let bytes = elements * std::mem::size_of::<f32>();
        let limit = self.memory_limit;
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| match limit {
                Some(limit) if used + bytes > limit => None,
                _ => Some(used + bytes),
            })
            .map_err(|used| AllocationError::OutOfMemory {
                requested: bytes,
                available: limit.unwrap_or(usize::MAX).saturating_sub(used),
            })?;
        Ok(DeviceBuffer {
            inner: Arc::new(DeviceBufferInner {
                data: RwLock::new(vec![0.0; elements]),
                bytes,
                accounting: Arc::clone(&self.allocated),
            }),
        })
    }

    /// Submit `job` to the queue without waiting for it.
    pub fn enqueue<F>(&self, label: impl Into<String>, job: F) -> ForgeResult<()>
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        self.send(Command::Job {
            label: label.into(),
            job: Box::new(job),
        })
    }

    /// Wait until every submitted command has finished.
    ///
    /// Reports the first failure since the previous synchronize and clears
    /// it, so the device is usable again afterwards.
    pub fn synchronize(&self) -> ForgeResult<()> {
        let (done, wait) = mpsc::channel();
        self.send(Command::Fence(done))?;
        wait.recv()
            .map_err(|_| backend_err(GPU_BACKEND, "device queue stopped"))?;
        match self.state.take_error() {
            Some(message) => Err(backend_err(GPU_BACKEND, message)),
            None => Ok(()),
        }
    }

    /// Make the next executed command fail with `message`.
    pub fn inject_fault(&self, message: impl Into<String>) {
        *self.state.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    fn send(&self, command: Command) -> ForgeResult<()> {
        let sender = self.sender.lock()?;
        sender
            .as_ref()
            .ok_or_else(|| backend_err(GPU_BACKEND, "device queue stopped"))?
            .send(command)
            .map_err(|_| backend_err(GPU_BACKEND, "device queue stopped"))
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn drain(receiver: Receiver<Command>, state: Arc<DeviceState>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Job { label, job } => {
                if state.has_error() {
                    state.skipped.fetch_add(1, Ordering::SeqCst);
                    tracing::trace!(%label, "skipped after earlier device failure");
                    continue;
                }
                let result = match state.take_fault() {
                    Some(message) => Err(message),
                    None => catch_unwind(AssertUnwindSafe(job))
                        .unwrap_or_else(|_| Err("command panicked".to_string())),
                };
                match result {
                    Ok(()) => {
                        state.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(message) => {
                        tracing::warn!(%label, %message, "device command failed");
                        state.record_error(format!("{}: {}", label, message));
                    }
                }
            }
            Command::Fence(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Device memory. Clones share the allocation, which is released when the
/// last clone is dropped.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    inner: Arc<DeviceBufferInner>,
}

#[derive(Debug)]
struct DeviceBufferInner {
    data: RwLock<Vec<f32>>,
    bytes: usize,
    accounting: Arc<AtomicUsize>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.inner.bytes / std::mem::size_of::<f32>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.inner.bytes
    }

    /// Shared access for code running on the queue.
    pub(crate) fn load(&self) -> Result<RwLockReadGuard<'_, Vec<f32>>, String> {
        self.inner.data.read().map_err(|e| e.to_string())
    }

    /// Exclusive access for code running on the queue.
    pub(crate) fn store(&self) -> Result<RwLockWriteGuard<'_, Vec<f32>>, String> {
        self.inner.data.write().map_err(|e| e.to_string())
    }
}

impl Drop for DeviceBufferInner {
    fn drop(&mut self) {
        self.accounting.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, ForgeError};

    #[test]
    fn test_commands_run_in_order() {
        let device = GpuDevice::new(None).unwrap();
        let buffer = device.allocate(1).unwrap();
        for step in 1..=3 {
            let target = buffer.clone();
            device
                .enqueue(format!("step {}", step), move || {
                    let mut data = target.store()?;
                    data[0] = data[0] * 10.0 + step as f32;
                    Ok(())
                })
                .unwrap();
        }
        device.synchronize().unwrap();
        assert_eq!(buffer.load().unwrap()[0], 123.0);
        assert_eq!(device.stats().completed, 3);
    }

    #[test]
    fn test_failure_is_sticky_until_synchronize() {
        let device = GpuDevice::new(None).unwrap();
        device.inject_fault("ecc error");
        device.enqueue("first", || Ok(())).unwrap();
        device.enqueue("second", || Ok(())).unwrap();

        let err = device.synchronize().unwrap_err();
        match err {
            ForgeError::Execution(ExecutionError::Backend { backend, message }) => {
                assert_eq!(backend, "gpu");
                assert!(message.contains("ecc error"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(device.stats().skipped, 1);

        device.enqueue("third", || Ok(())).unwrap();
        device.synchronize().unwrap();
    }

    #[test]
    fn test_panicking_command_is_reported() {
        let device = GpuDevice::new(None).unwrap();
        device.enqueue("boom", || panic!("kernel crashed")).unwrap();
        assert!(device.synchronize().is_err());
        device.synchronize().unwrap();
    }

    #[test]
    fn test_memory_limit() {
        let device = GpuDevice::new(Some(64)).unwrap();
        let first = device.allocate(12).unwrap();
        assert_eq!(device.allocated_bytes(), 48);

        let err = device.allocate(8).unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Allocation(AllocationError::OutOfMemory {
                requested: 32,
                available: 16
            })
        ));

        drop(first);
        assert_eq!(device.allocated_bytes(), 0);
        device.allocate(16).unwrap();
    }
}
