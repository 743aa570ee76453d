//! Single-slot task dispatcher
//!
//! The control loop owns the module and processes one task at a time.
//! Callers hold a [`ControlHandle`]: requests travel over a channel, and
//! each task kind publishes its status on a watch channel. A task kind
//! cannot be requested again until its previous request was served.

use crate::sensor::{EcModule, MeasurementRecord, Step, StepFailure};
use config_store::NvStorage;
use ezo_protocol::DeviceInfo;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Work the control loop can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    SensorInit,
    Measurement,
}

impl Task {
    fn slot(self) -> usize {
        match self {
            Task::SensorInit => 0,
            Task::Measurement => 1,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::SensorInit => write!(f, "sensor init"),
            Task::Measurement => write!(f, "measurement"),
        }
    }
}

/// Progress of the most recent task of one kind
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus<T> {
    /// Never run
    NotReady,
    /// Running now
    Busy,
    /// Finished with this result
    Ready(T),
}

impl<T> TaskStatus<T> {
    /// Tag as shown to operators
    pub fn tag(&self) -> &'static str {
        match self {
            TaskStatus::NotReady => "NOT_READY",
            TaskStatus::Busy => "BUSY",
            TaskStatus::Ready(_) => "READY",
        }
    }
}

/// Result of a measurement task
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementOutcome {
    /// Readings after the task; failed channels keep older values
    pub record: MeasurementRecord,
    /// Steps that failed
    pub failures: Vec<StepFailure>,
}

/// Result of a sensor init task
pub type InitOutcome = Result<DeviceInfo, StepFailure>;

/// Request rejected by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// A request of this kind is still outstanding
    #[error("A {0} request is already outstanding")]
    Busy(Task),

    /// The control loop has stopped
    #[error("Control loop is not running")]
    Closed,
}

impl RequestError {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            RequestError::Busy(_) => -16,
            RequestError::Closed => -32,
        }
    }
}

/// Outstanding-request flag per task kind
#[derive(Debug, Default)]
struct Pending([AtomicBool; 2]);

impl Pending {
    /// Claim the slot; false if already claimed
    fn claim(&self, task: Task) -> bool {
        !self.0[task.slot()].swap(true, Ordering::AcqRel)
    }

    fn release(&self, task: Task) {
        self.0[task.slot()].store(false, Ordering::Release);
    }
}

/// Caller side of the control loop
#[derive(Clone)]
pub struct ControlHandle {
    requests: mpsc::Sender<Task>,
    pending: Arc<Pending>,
    init: watch::Receiver<TaskStatus<InitOutcome>>,
    measurement: watch::Receiver<TaskStatus<MeasurementOutcome>>,
}

impl ControlHandle {
    /// Ask the loop to run `task`
    pub fn request(&self, task: Task) -> Result<(), RequestError> {
        if !self.pending.claim(task) {
            return Err(RequestError::Busy(task));
        }
        if self.requests.try_send(task).is_err() {
            self.pending.release(task);
            return Err(RequestError::Closed);
        }
        debug!("Requested {}", task);
        Ok(())
    }

    /// Status of the last sensor init
    pub fn init_status(&self) -> TaskStatus<InitOutcome> {
        self.init.borrow().clone()
    }

    /// Status of the last measurement
    pub fn measurement_status(&self) -> TaskStatus<MeasurementOutcome> {
        self.measurement.borrow().clone()
    }

    /// Request a sensor init and wait for its result
    pub async fn initialize(&mut self) -> Result<InitOutcome, RequestError> {
        self.init.borrow_and_update();
        self.request(Task::SensorInit)?;
        wait_ready(&mut self.init).await
    }

    /// Request a measurement and wait for its result
    pub async fn measure(&mut self) -> Result<MeasurementOutcome, RequestError> {
        self.measurement.borrow_and_update();
        self.request(Task::Measurement)?;
        wait_ready(&mut self.measurement).await
    }
}

async fn wait_ready<T: Clone>(status: &mut watch::Receiver<TaskStatus<T>>) -> Result<T, RequestError> {
    loop {
        status.changed().await.map_err(|_| RequestError::Closed)?;
        if let TaskStatus::Ready(outcome) = &*status.borrow_and_update() {
            return Ok(outcome.clone());
        }
    }
}

/// The control loop and the module it owns
pub struct ControlLoop<W, S> {
    module: EcModule<W, S>,
    requests: mpsc::Receiver<Task>,
    pending: Arc<Pending>,
    init: watch::Sender<TaskStatus<InitOutcome>>,
    measurement: watch::Sender<TaskStatus<MeasurementOutcome>>,
    record: MeasurementRecord,
}

impl<W, S> ControlLoop<W, S>
where
    W: AsyncWrite + Unpin + Send,
    S: NvStorage,
{
    /// Create the loop and its first handle
    pub fn new(module: EcModule<W, S>) -> (Self, ControlHandle) {
        // One slot per task kind
        let (request_tx, request_rx) = mpsc::channel(2);
        let (init_tx, init_rx) = watch::channel(TaskStatus::NotReady);
        let (measurement_tx, measurement_rx) = watch::channel(TaskStatus::NotReady);
        let pending = Arc::new(Pending::default());

        let control = Self {
            module,
            requests: request_rx,
            pending: Arc::clone(&pending),
            init: init_tx,
            measurement: measurement_tx,
            record: MeasurementRecord::default(),
        };
        let handle = ControlHandle {
            requests: request_tx,
            pending,
            init: init_rx,
            measurement: measurement_rx,
        };
        (control, handle)
    }

    /// Serve requests until every handle is dropped, then give the module
    /// back
    pub async fn run(mut self) -> EcModule<W, S> {
        info!("Control loop started");

        while let Some(task) = self.requests.recv().await {
            match task {
                Task::SensorInit => {
                    self.init.send_replace(TaskStatus::Busy);
                    let outcome = match self.module.initialize().await {
                        Ok(info) => Ok(info),
                        Err(e) => {
                            warn!("Sensor init failed: {}", e);
                            Err(StepFailure {
                                step: Step::Initialize,
                                code: e.code(),
                                message: e.to_string(),
                            })
                        }
                    };
                    self.init.send_replace(TaskStatus::Ready(outcome));
                }
                Task::Measurement => {
                    self.measurement.send_replace(TaskStatus::Busy);
                    let failures = self.module.measure_all(&mut self.record).await;
                    self.measurement.send_replace(TaskStatus::Ready(MeasurementOutcome {
                        record: self.record,
                        failures,
                    }));
                }
            }
            self.pending.release(task);
        }

        info!("Control loop stopped");
        self.module
    }
}
