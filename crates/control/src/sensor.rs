//! Sensor aggregate

use crate::capability::{ProbeSelect, TemperatureProbe};
use crate::ModuleError;
use config_store::{ConfigStore, NvStorage, Probe};
use ezo_protocol::clock;
use ezo_protocol::{DeviceInfo, EzoClient};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Wait between loading a probe's calibration and reading it
pub const CONDUCTIVITY_SETTLE: Duration = Duration::from_millis(1000);

/// Latest readings of both probes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeasurementRecord {
    /// Conductivity per probe, thousandths of µS/cm
    pub conductivity: [u32; 2],
    /// Temperature per probe, hundredths of °C
    pub temperature: [i32; 2],
}

/// One step of a sensor task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Initialize,
    TriggerTemperature(Probe),
    Conductivity(Probe),
    Temperature(Probe),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Initialize => write!(f, "initialize"),
            Step::TriggerTemperature(p) => write!(f, "trigger temperature {}", p),
            Step::Conductivity(p) => write!(f, "conductivity {}", p),
            Step::Temperature(p) => write!(f, "temperature {}", p),
        }
    }
}

/// A failed step, kept after the error itself is gone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: Step,
    pub code: i32,
    pub message: String,
}

impl StepFailure {
    fn new(step: Step, error: &ModuleError) -> Self {
        Self {
            step,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.step, self.code, self.message)
    }
}

/// The transducer, its two probes and their configuration
pub struct EcModule<W, S> {
    client: EzoClient<W>,
    store: ConfigStore<S>,
    thermometers: [Box<dyn TemperatureProbe + Send>; 2],
    selector: Box<dyn ProbeSelect + Send>,
}

impl<W, S> EcModule<W, S>
where
    W: AsyncWrite + Unpin + Send,
    S: NvStorage,
{
    /// Assemble a module from its parts
    pub fn new(
        client: EzoClient<W>,
        store: ConfigStore<S>,
        thermometers: [Box<dyn TemperatureProbe + Send>; 2],
        selector: Box<dyn ProbeSelect + Send>,
    ) -> Self {
        Self {
            client,
            store,
            thermometers,
            selector,
        }
    }

    /// Wake and identify the transducer
    pub async fn initialize(&mut self) -> Result<DeviceInfo, ModuleError> {
        let info = self.client.initialize().await?;
        Ok(info)
    }

    /// Connect `probe` to the transducer
    pub fn switch_probe(&mut self, probe: Probe) -> Result<(), ModuleError> {
        self.selector.select(probe)?;
        debug!("Probe {} selected", probe);
        Ok(())
    }

    /// Read one probe's conductivity with its own K-value and calibration,
    /// in thousandths of µS/cm
    pub async fn conductivity(&mut self, probe: Probe) -> Result<u32, ModuleError> {
        self.switch_probe(probe)?;
        self.client.set_k(self.store.k_value(probe)).await?;

        let blob = *self.store.calibration(probe);
        if blob.is_complete() {
            self.client.import_calibration(&blob).await?;
        } else {
            warn!("Probe {} has no stored calibration; measuring uncalibrated", probe);
        }

        clock::sleep(CONDUCTIVITY_SETTLE).await;
        let value = self.client.measure().await?;
        debug!("Probe {} conductivity {}", probe, value);
        Ok(value)
    }

    /// Start a temperature conversion on a probe
    pub fn trigger_temperature(&mut self, probe: Probe) -> Result<(), ModuleError> {
        self.thermometers[probe.index()].trigger()?;
        Ok(())
    }

    /// Converted temperature of a probe, in hundredths of °C
    pub fn temperature(&mut self, probe: Probe) -> Result<i32, ModuleError> {
        Ok(self.thermometers[probe.index()].read()?)
    }

    /// Run the full measurement sequence, updating `record` channel by
    /// channel.
    ///
    /// A failed step leaves its channel's previous value in place and the
    /// sequence continues. Returns the failed steps.
    pub async fn measure_all(&mut self, record: &mut MeasurementRecord) -> Vec<StepFailure> {
        let mut failures = Vec::new();

        for probe in Probe::ALL {
            if let Err(e) = self.trigger_temperature(probe) {
                failures.push(self.step_failed(Step::TriggerTemperature(probe), e));
            }
        }

        for probe in Probe::ALL {
            match self.conductivity(probe).await {
                Ok(value) => record.conductivity[probe.index()] = value,
                Err(e) => failures.push(self.step_failed(Step::Conductivity(probe), e)),
            }
        }

        for probe in Probe::ALL {
            match self.temperature(probe) {
                Ok(value) => record.temperature[probe.index()] = value,
                Err(e) => failures.push(self.step_failed(Step::Temperature(probe), e)),
            }
        }

        info!("Measurement complete with {} failed steps", failures.len());
        failures
    }

    fn step_failed(&self, step: Step, error: ModuleError) -> StepFailure {
        warn!("Measurement step {} failed: {}", step, error);
        StepFailure::new(step, &error)
    }

    /// Transducer client
    pub fn client(&mut self) -> &mut EzoClient<W> {
        &mut self.client
    }

    /// Replace the transducer link (after reopening at another baud rate)
    pub fn set_client(&mut self, client: EzoClient<W>) {
        self.client = client;
    }

    /// Configuration store
    pub fn store(&self) -> &ConfigStore<S> {
        &self.store
    }

    /// Mutable configuration store
    pub fn store_mut(&mut self) -> &mut ConfigStore<S> {
        &mut self.store
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capability::{SimProbeSelect, SimThermometer};
    use config_store::MemoryStorage;
    use ezo_protocol::sim::{SimHandle, SimProbe};
    use ezo_protocol::{CalibrationBlob, LINE_COUNT};

    pub(crate) fn module() -> (EcModule<SimProbe, MemoryStorage>, SimHandle, SimProbeSelect) {
        let (client, sim) = SimProbe::client();
        let store = ConfigStore::new(MemoryStorage::default());
        let selector = SimProbeSelect::new();
        let module = EcModule::new(
            client,
            store,
            [Box::new(SimThermometer::new(2150)), Box::new(SimThermometer::new(1875))],
            Box::new(selector.clone()),
        );
        (module, sim, selector)
    }

    fn blob(tag: char) -> CalibrationBlob {
        let lines: Vec<String> = (0..LINE_COUNT).map(|i| format!("{}{:011}", tag, i)).collect();
        CalibrationBlob::from_lines(lines.iter().map(String::as_str)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_conductivity_loads_probe_settings() {
        let (mut module, sim, selector) = module();
        module.store_mut().set_k_value(Probe::B, 10);
        module.store_mut().set_calibration(Probe::B, blob('B')).unwrap();
        sim.set_readings(&["1413.5"]);

        let value = module.conductivity(Probe::B).await.unwrap();
        assert_eq!(value, 1_413_500);
        assert_eq!(selector.selected(), Some(Probe::B));
        assert_eq!(sim.k_value(), "1.0");
        assert_eq!(sim.calibration_lines(), blob('B').lines().collect::<Vec<_>>());

        let commands = sim.commands();
        let k = commands.iter().position(|c| c == "K,1.0").unwrap();
        let read = commands.iter().position(|c| c == "R").unwrap();
        assert!(k < read);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conductivity_skips_missing_calibration() {
        let (mut module, sim, _) = module();
        sim.set_readings(&["12"]);

        assert_eq!(module.conductivity(Probe::A).await.unwrap(), 12_000);
        assert!(!sim.commands().iter().any(|c| c.starts_with("Import,")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_all_fills_record() {
        let (mut module, sim, _) = module();
        sim.set_readings(&["100.0", "200.0"]);

        let mut record = MeasurementRecord::default();
        let failures = module.measure_all(&mut record).await;

        assert!(failures.is_empty());
        assert_eq!(record.conductivity, [100_000, 200_000]);
        assert_eq!(record.temperature, [2150, 1875]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_all_continues_past_failures() {
        let (client, sim) = SimProbe::client();
        let mut module = EcModule::new(
            client,
            ConfigStore::new(MemoryStorage::default()),
            [Box::new(SimThermometer::unavailable()), Box::new(SimThermometer::new(1875))],
            Box::new(SimProbeSelect::new()),
        );
        sim.set_readings(&["300.0"]);
        // Probe A's reading goes unanswered
        sim.respond("R", &[]);

        let mut record = MeasurementRecord {
            conductivity: [7, 7],
            temperature: [-1, -1],
        };
        let failures = module.measure_all(&mut record).await;

        let steps: Vec<Step> = failures.iter().map(|f| f.step).collect();
        assert_eq!(
            steps,
            vec![
                Step::TriggerTemperature(Probe::A),
                Step::Conductivity(Probe::A),
                Step::Temperature(Probe::A),
            ]
        );
        assert_eq!(failures[1].code, -110);
        assert_eq!(record.conductivity, [7, 300_000]);
        assert_eq!(record.temperature, [-1, 1875]);
    }
}
