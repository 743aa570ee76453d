//! Operator command surface
//!
//! Each command maps onto one module operation and reports a status code:
//! 0 on success, a negative error code otherwise.

use config_store::{NvStorage, Probe};
use control::{EcModule, MeasurementRecord, StepFailure};
use ezo_protocol::fixed::{format_fixed, parse_k_value};
use ezo_protocol::{command, Connector, K_VALUE_PRECISION, MEASUREMENT_PRECISION};
use provisioning::{provision, Operator, ProvisioningConfig};
use std::fmt::Write;
use tracing::{info, warn};

/// Status code for malformed commands
const USAGE: i32 = -22;

/// Decimal places shown for temperatures
const TEMPERATURE_PRECISION: u8 = 2;

/// Command names with their descriptions
pub const COMMANDS: &[(&str, &str)] = &[
    ("provision", "Full provisioning sequence for the module"),
    ("measure", "Performs a full measurement"),
    ("export", "Exports the currently loaded configuration"),
    ("switch", "Switches the current active probe: switch <A/B>"),
    ("set_k", "Sets the K-Value for a probe: set_k <A/B> <K_Value>"),
    ("save", "Saves the configuration to memory"),
    ("factory", "Clears all configuration and calibrations"),
    ("ec_cmd", "Debugging: send a raw command to the transducer"),
    ("help", "Lists the commands"),
];

/// What a command printed and its status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub text: String,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self { code: 0, text }
    }

    fn failed(code: i32, text: String) -> Self {
        Self { code, text }
    }
}

/// The module plus what commands need besides it
pub struct Shell<C: Connector, S> {
    module: EcModule<C::Writer, S>,
    connector: C,
    provisioning: ProvisioningConfig,
    record: MeasurementRecord,
}

impl<C, S> Shell<C, S>
where
    C: Connector,
    S: NvStorage,
{
    pub fn new(module: EcModule<C::Writer, S>, connector: C, provisioning: ProvisioningConfig) -> Self {
        Self {
            module,
            connector,
            provisioning,
            record: MeasurementRecord::default(),
        }
    }

    /// The module being operated
    pub fn module(&mut self) -> &mut EcModule<C::Writer, S> {
        &mut self.module
    }

    /// Run one command line
    pub async fn execute<O: Operator>(&mut self, line: &str, operator: &mut O) -> CommandOutput {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();
        info!("Shell command: {}", line);

        match name {
            "" => CommandOutput::default(),
            "help" => CommandOutput::ok(help()),
            "provision" => self.provision(operator).await,
            "measure" => self.measure().await,
            "export" => CommandOutput::ok(self.export()),
            "switch" => self.switch(&args),
            "set_k" => self.set_k(&args),
            "save" => self.save(),
            "factory" => {
                self.module.store_mut().clear();
                CommandOutput::ok("Config cleared, use the `save` command to save the empty config\n".to_string())
            }
            "ec_cmd" => self.ec_cmd(rest).await,
            other => CommandOutput::failed(USAGE, format!("Unknown command: {}\n{}", other, help())),
        }
    }

    async fn provision<O: Operator>(&mut self, operator: &mut O) -> CommandOutput {
        match provision(&mut self.module, &mut self.connector, operator, &self.provisioning).await {
            Ok(()) => CommandOutput::ok(String::new()),
            Err(e) => {
                warn!("Provisioning failed: {}", e);
                CommandOutput::failed(e.code(), format!("Provisioning failed ({}): {}\n", e.code(), e))
            }
        }
    }

    async fn measure(&mut self) -> CommandOutput {
        let failures = self.module.measure_all(&mut self.record).await;
        CommandOutput::ok(render_measurement(&self.record, &failures))
    }

    fn export(&self) -> String {
        let store = self.module.store();
        let mut text = String::new();
        for probe in Probe::ALL {
            let _ = writeln!(text, "=============== PROBE {} ===================", probe);
            let _ = writeln!(
                text,
                "K-Value: {}",
                format_fixed(i64::from(store.k_value(probe)), K_VALUE_PRECISION)
            );
            let _ = writeln!(text, "Calibration: {}", store.calibration(probe));
            if !store.has_calibration(probe) {
                let _ = writeln!(text, "(not calibrated)");
            }
            text.push('\n');
        }
        text
    }

    fn switch(&mut self, args: &[&str]) -> CommandOutput {
        let probe = match args {
            [probe] => probe.parse::<Probe>(),
            _ => return CommandOutput::failed(USAGE, "Usage: switch <A/B>\n".to_string()),
        };
        let probe = match probe {
            Ok(probe) => probe,
            Err(e) => return CommandOutput::failed(USAGE, format!("{}\nUsage: switch <A/B>\n", e)),
        };

        match self.module.switch_probe(probe) {
            Ok(()) => CommandOutput::ok(format!("Switched to probe {}\n", probe)),
            Err(e) => CommandOutput::failed(e.code(), format!("Could not switch probe: {}\n", e)),
        }
    }

    fn set_k(&mut self, args: &[&str]) -> CommandOutput {
        const SET_K_USAGE: &str = "Usage: set_k <A/B> <K_Value>\nThe K value can have up to 1 decimal (0.1 - 25.5)\n";

        let (probe, value) = match args {
            [probe, value] => (probe.parse::<Probe>(), parse_k_value(value)),
            _ => return CommandOutput::failed(USAGE, SET_K_USAGE.to_string()),
        };
        let (probe, k_value) = match (probe, value) {
            (Ok(probe), Ok(k_value)) => (probe, k_value),
            _ => return CommandOutput::failed(USAGE, SET_K_USAGE.to_string()),
        };
        self.module.store_mut().set_k_value(probe, k_value);
        CommandOutput::ok(format!(
            "K-Value of probe {} set to {}, use `save` to persist\n",
            probe,
            format_fixed(i64::from(k_value), K_VALUE_PRECISION)
        ))
    }

    fn save(&mut self) -> CommandOutput {
        match self.module.store_mut().persist() {
            Ok(()) => CommandOutput::ok("Saved\n".to_string()),
            Err(e) => CommandOutput::failed(e.code(), format!("Could not save: {}\n", e)),
        }
    }

    async fn ec_cmd(&mut self, raw: &str) -> CommandOutput {
        if raw.is_empty() {
            return CommandOutput::failed(USAGE, "Usage: ec_cmd <command>\n".to_string());
        }
        let command = match command!("{}", raw) {
            Ok(command) => command,
            Err(e) => return CommandOutput::failed(e.code(), format!("{}\n", e)),
        };

        match self.module.client().passthrough(&command).await {
            Ok(lines) => {
                let mut text = String::new();
                for line in lines {
                    let _ = writeln!(text, "<<< {}", line);
                }
                CommandOutput::ok(text)
            }
            Err(e) => CommandOutput::failed(e.code(), format!("Transducer error ({}): {}\n", e.code(), e)),
        }
    }
}

fn help() -> String {
    let mut text = String::from("Commands:\n");
    for (name, description) in COMMANDS {
        let _ = writeln!(text, "  {:<10} {}", name, description);
    }
    text
}

/// Table of the last readings, followed by any failed steps
pub fn render_measurement(record: &MeasurementRecord, failures: &[StepFailure]) -> String {
    let mut text = String::new();
    for failure in failures {
        let _ = writeln!(text, "ERR({}) {}", failure.code, failure.step);
    }
    let _ = writeln!(text, "===========================================");
    let _ = writeln!(text, "           Conductivity        Temperature");
    for probe in Probe::ALL {
        let i = probe.index();
        let _ = writeln!(
            text,
            "PROBE {}    {:>12} uS    {:>8} C",
            probe,
            format_fixed(i64::from(record.conductivity[i]), MEASUREMENT_PRECISION),
            format_fixed(i64::from(record.temperature[i]), TEMPERATURE_PRECISION)
        );
    }
    text
}
