//! Provisioning sequence

use crate::stage::{Stage, StepEvent, StepState};
use crate::ProvisionError;
use config_store::{NvStorage, Probe};
use control::EcModule;
use ezo_protocol::fixed::{format_fixed, parse_fixed, parse_k_value};
use ezo_protocol::{
    Connector, EzoClient, FACTORY_BAUD_RATE, K_VALUE_PRECISION, LINE_COUNT, MEASUREMENT_PRECISION,
    OPERATING_BAUD_RATE,
};
use stability::{wait_for_stable, StabilityError};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

/// The person at the bench
pub trait Operator {
    /// Show a progress message
    fn notify(&mut self, message: &str);

    /// Show `message` and wait for one line of input; `None` once input
    /// has ended
    fn prompt(&mut self, message: &str) -> Option<String>;
}

/// Tunables of the workflow
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Baud rate a fresh transducer listens on
    pub factory_baud_rate: u32,
    /// Baud rate to leave the transducer on
    pub operating_baud_rate: u32,
    /// Time allowed for readings to settle per attempt
    pub stabilization_timeout: Duration,
    /// Allowed standard deviation per stage (dry, low, high), µS/cm
    pub tolerance: [f64; 3],
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            factory_baud_rate: FACTORY_BAUD_RATE,
            operating_baud_rate: OPERATING_BAUD_RATE,
            stabilization_timeout: Duration::from_secs(10),
            tolerance: [1000.0; 3],
        }
    }
}

impl ProvisioningConfig {
    fn tolerance(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Dry => self.tolerance[0],
            Stage::Low => self.tolerance[1],
            Stage::High => self.tolerance[2],
        }
    }
}

/// Run the full provisioning sequence.
///
/// Stabilization timeouts repeat the affected stage; every other failure
/// ends the workflow. Nothing is persisted unless the operator confirms at
/// the end.
pub async fn provision<C, S, O>(
    module: &mut EcModule<C::Writer, S>,
    connector: &mut C,
    operator: &mut O,
    config: &ProvisioningConfig,
) -> Result<(), ProvisionError>
where
    C: Connector,
    S: NvStorage,
    O: Operator,
{
    operator.notify("1. Fixing transducer configuration");
    // The device opens exclusively; the current link has to go first
    module.client().close().await;
    let client = recover_link(connector, operator, config).await?;
    module.set_client(client);

    module.client().factory_reset().await?;
    operator.notify("Factory reset transducer");
    module.client().set_continuous(false).await?;
    operator.notify("Disabled continuous reading");
    module.client().set_led(false).await?;
    operator.notify("Disabled LED");

    for (step, probe) in [(2, Probe::A), (3, Probe::B)] {
        let k_value = ask_k_value(operator, step, probe)?;
        module.store_mut().set_k_value(probe, k_value);
    }

    for (number, probe) in [(4, Probe::A), (5, Probe::B)] {
        let k_value = module.store().k_value(probe);
        operator.notify(&format!(
            "Switching to probe {} (K: {})",
            probe,
            format_fixed(i64::from(k_value), K_VALUE_PRECISION)
        ));
        module.switch_probe(probe)?;
        module.client().set_k(k_value).await?;

        for (index, stage) in Stage::ALL.into_iter().enumerate() {
            let label = format!("{}{}.{}", number, probe, index + 1);
            run_stage(module.client(), operator, config, stage, &label).await?;
        }

        operator.notify(&format!("Calibration of probe {} done, exporting", probe));
        let (blob, lines) = module.client().export_calibration().await?;
        if lines != LINE_COUNT {
            warn!("Probe {} export returned {} of {} lines", probe, lines, LINE_COUNT);
            return Err(ProvisionError::IncompleteExport(lines));
        }
        module.store_mut().set_calibration(probe, blob)?;
    }

    for probe in Probe::ALL {
        module.store_mut().mark_calibrated(probe, true)?;
    }

    prompt(operator, "6. Provisioning is done, press enter to save")?;
    module.store_mut().persist()?;
    operator.notify("Saved, module is ready for use. If a probe is swapped, run provisioning again");
    info!("Provisioning complete");
    Ok(())
}

/// Move the transducer to the operating baud rate if it still runs at the
/// factory rate, then open the operating link
async fn recover_link<C, O>(
    connector: &mut C,
    operator: &mut O,
    config: &ProvisioningConfig,
) -> Result<EzoClient<C::Writer>, ProvisionError>
where
    C: Connector,
    O: Operator,
{
    let recovered = match connector.connect(config.factory_baud_rate) {
        Ok(mut client) => {
            let moved = match client.initialize().await {
                Ok(_) => client.set_baud(config.operating_baud_rate).await.map(|()| true),
                Err(e) => {
                    info!("No transducer at {} baud: {}", config.factory_baud_rate, e);
                    Ok(false)
                }
            };
            client.close().await;
            moved?
        }
        Err(e) => {
            info!("Could not open link at {} baud: {}", config.factory_baud_rate, e);
            false
        }
    };

    if recovered {
        operator.notify(&format!("Moved transducer to {} baud", config.operating_baud_rate));
    } else {
        operator.notify("Transducer not on factory settings, perhaps already fixed");
    }

    let mut client = connector.connect(config.operating_baud_rate)?;
    client.initialize().await?;
    Ok(client)
}

/// Walk one calibration stage through its state machine
async fn run_stage<W, O>(
    client: &mut EzoClient<W>,
    operator: &mut O,
    config: &ProvisioningConfig,
    stage: Stage,
    label: &str,
) -> Result<(), ProvisionError>
where
    W: AsyncWrite + Unpin + Send,
    O: Operator,
{
    let mut state = StepState::AwaitConfirm;
    let mut solution = 0;

    loop {
        let event = match state {
            StepState::AwaitConfirm => {
                let message = format!("{}: {}", label, stage.instruction());
                if stage.needs_solution() {
                    operator.notify(&message);
                    solution = ask_solution(operator)?;
                    operator.notify(&format!(
                        "Calibrating for: {} mS",
                        format_fixed(i64::from(solution), MEASUREMENT_PRECISION)
                    ));
                } else {
                    prompt(operator, &message)?;
                }
                StepEvent::Confirmed
            }
            StepState::Sampling => {
                operator.notify("Waiting for readings to stabilize...");
                match wait_for_stable(client, config.stabilization_timeout, config.tolerance(stage)).await {
                    Ok(stats) => {
                        info!("{} calibration stable at {:.3} µS/cm", stage, stats.mean);
                        StepEvent::Stable
                    }
                    Err(StabilityError::Timeout { .. }) => {
                        operator.notify(&format!(
                            "Readings did not stabilize. {}, then try again",
                            stage.retry_hint()
                        ));
                        StepEvent::Unstable
                    }
                    Err(StabilityError::Sample(e)) => return Err(e.into()),
                }
            }
            StepState::Committing => {
                match stage {
                    Stage::Dry => client.calibrate_dry().await?,
                    Stage::Low => client.calibrate_low(solution).await?,
                    Stage::High => client.calibrate_high(solution).await?,
                }
                StepEvent::Committed
            }
            StepState::Done => return Ok(()),
        };

        // Every state above only produces events it accepts
        state = state.next(event).unwrap_or(StepState::Done);
    }
}

fn prompt<O: Operator>(operator: &mut O, message: &str) -> Result<String, ProvisionError> {
    operator.prompt(message).ok_or(ProvisionError::Operator)
}

/// Ask until the operator enters a valid K-value
fn ask_k_value<O: Operator>(operator: &mut O, step: u8, probe: Probe) -> Result<u8, ProvisionError> {
    loop {
        let answer = prompt(operator, &format!("{}. K-Value of probe {}:", step, probe))?;
        match parse_k_value(&answer) {
            Ok(k_value) => {
                operator.notify(&format!("Got {}", format_fixed(i64::from(k_value), K_VALUE_PRECISION)));
                return Ok(k_value);
            }
            Err(e) => operator.notify(&format!("error({}), try again", e)),
        }
    }
}

/// Ask until the operator enters a solution conductivity in mS/cm; returns
/// µS/cm
fn ask_solution<O: Operator>(operator: &mut O) -> Result<u32, ProvisionError> {
    loop {
        let answer = prompt(operator, "Solution concentration in mS:")?;
        match parse_fixed(&answer, MEASUREMENT_PRECISION) {
            Ok(micro_siemens) => return Ok(micro_siemens),
            Err(e) => operator.notify(&format!("error({}), try again", e)),
        }
    }
}
