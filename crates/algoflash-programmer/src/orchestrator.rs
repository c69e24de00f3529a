//! Single-flight programming orchestrator
//!
//! A `Programmer` owns one worker thread that executes programming requests
//! one at a time. `submit` hands a command to the worker and waits only for
//! the accept/reject decision; the programming itself runs asynchronously
//! and is observed through `is_busy`, `progress` and `last_result`.
//!
//! While a request runs, further commands are rejected rather than queued.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use algoflash_core::algorithm::TargetConnector;
use algoflash_core::image::ImageFormat;
use serde::Serialize;

use crate::algorithm::AlgorithmLoader;
use crate::config::ProgrammerConfig;
use crate::error::ProgrammerError;
use crate::image::{ImageProgrammer, ProgramStats};
use crate::progress::ProgressCounter;
use crate::request::ProgrammingRequest;

// `last_result` encoding; 0 until the first request finishes
const RESULT_SUCCESS: u8 = 1;
const RESULT_FAILURE: u8 = 2;

/// Snapshot of the orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    /// A request is being executed
    pub busy: bool,
    /// Progress of the current or last request, in percent
    pub progress: u8,
    /// Outcome of the last finished request, if any
    pub last_result: Option<bool>,
}

/// State written by the worker and read by callers
#[derive(Debug, Default)]
struct Shared {
    busy: AtomicBool,
    progress: ProgressCounter,
    last_result: AtomicU8,
}

struct Command {
    payload: Vec<u8>,
    accepted: SyncSender<bool>,
}

/// Handle to the programming worker
///
/// Dropping the handle closes the command channel and waits for the
/// request in flight, if any, to finish.
pub struct Programmer {
    shared: Arc<Shared>,
    admission: Mutex<()>,
    commands: Option<SyncSender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Programmer {
    /// Start the worker thread
    pub fn spawn<L, C>(config: ProgrammerConfig, loader: L, connector: C) -> Result<Self, ProgrammerError>
    where
        L: AlgorithmLoader + 'static,
        C: TargetConnector + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (commands, receiver) = mpsc::sync_channel(1);

        let worker = Worker {
            config,
            loader,
            connector,
            shared: Arc::clone(&shared),
        };
        let handle = thread::Builder::new()
            .name("programmer".into())
            .spawn(move || worker.run(receiver))?;

        Ok(Self {
            shared,
            admission: Mutex::new(()),
            commands: Some(commands),
            worker: Some(handle),
        })
    }

    /// Submit a JSON programming command
    ///
    /// Returns `false` straight away if a request is running. Otherwise
    /// blocks until the worker has validated the command and returns
    /// whether it was accepted. Completion is not awaited.
    pub fn submit(&self, command: &[u8]) -> bool {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);

        if self.is_busy() {
            log::warn!("programmer busy, command rejected");
            return false;
        }

        let Some(commands) = &self.commands else {
            return false;
        };

        let (accepted, decision) = mpsc::sync_channel(1);
        let command = Command {
            payload: command.to_vec(),
            accepted,
        };
        if commands.send(command).is_err() {
            log::error!("programmer worker has stopped");
            return false;
        }

        decision.recv().unwrap_or(false)
    }

    /// Progress of the running or most recent request, in percent
    pub fn progress(&self) -> u8 {
        self.shared.progress.get()
    }

    /// Whether a request is running
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Outcome of the most recent finished request
    pub fn last_result(&self) -> Option<bool> {
        match self.shared.last_result.load(Ordering::Acquire) {
            RESULT_SUCCESS => Some(true),
            RESULT_FAILURE => Some(false),
            _ => None,
        }
    }

    /// All observable state at once
    pub fn status(&self) -> Status {
        Status {
            busy: self.is_busy(),
            progress: self.progress(),
            last_result: self.last_result(),
        }
    }
}

impl Drop for Programmer {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("programmer worker panicked");
            }
        }
    }
}

struct Worker<L, C> {
    config: ProgrammerConfig,
    loader: L,
    connector: C,
    shared: Arc<Shared>,
}

impl<L: AlgorithmLoader, C: TargetConnector> Worker<L, C> {
    fn run(mut self, commands: Receiver<Command>) {
        log::debug!("programmer worker started");

        while let Ok(command) = commands.recv() {
            let request = match ProgrammingRequest::parse(&command.payload, &self.config) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("rejected command: {}", e);
                    let _ = command.accepted.send(false);
                    continue;
                }
            };

            self.shared.progress.reset();
            self.shared.busy.store(true, Ordering::Release);
            let _ = command.accepted.send(true);

            log::info!(
                "programming {} with {}",
                request.image_path.display(),
                request.algorithm_path.display()
            );
            let outcome = match self.execute_guarded(&request) {
                Ok(stats) => {
                    log::info!(
                        "programmed {} bytes, elapsed time {} ms",
                        stats.bytes_written,
                        stats.elapsed.as_millis()
                    );
                    RESULT_SUCCESS
                }
                Err(e) => {
                    log::error!("programming failed: {}", e);
                    RESULT_FAILURE
                }
            };

            self.shared.last_result.store(outcome, Ordering::Release);
            self.shared.busy.store(false, Ordering::Release);
        }

        log::debug!("programmer worker stopped");
    }

    /// Run `execute`, turning a panic into a failed request
    ///
    /// The worker keeps serving commands after a loader, connector or
    /// backend panics.
    fn execute_guarded(
        &mut self,
        request: &ProgrammingRequest,
    ) -> Result<ProgramStats, ProgrammerError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.execute(request))).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ProgrammerError::Panicked(message))
        })
    }

    /// Load the algorithm, attach it and program the image
    ///
    /// The algorithm and the attached backend are dropped on every return
    /// path before `busy` is cleared.
    fn execute(&mut self, request: &ProgrammingRequest) -> Result<ProgramStats, ProgrammerError> {
        let algorithm = self.loader.load(request)?;
        let intf = self.connector.attach(&algorithm)?;
        let programmer = ImageProgrammer::new(&self.shared.progress);

        match request.image_format {
            ImageFormat::IntelHex => {
                if let Some(addr) = request.flash_address {
                    log::debug!("ignoring flash_addr 0x{:08X} for Intel HEX image", addr);
                }
                programmer.program_hex(intf, &request.image_path)
            }
            ImageFormat::Binary => {
                let addr = request
                    .flash_address
                    .ok_or(ProgrammerError::MissingFlashAddress)?;
                programmer.program_bin(intf, addr, &request.image_path)
            }
        }
    }
}
