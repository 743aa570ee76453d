//! EC Module - Main Entry Point
//!
//! `ec-module [--config FILE]` opens an interactive command prompt,
//! `ec-module [--config FILE] <command> [args]` runs one command and
//! `ec-module [--config FILE] serve` answers `init` / `measure` / `status`
//! requests from stdin through the control loop.

use anyhow::{bail, Context, Result};
use config_store::{ConfigStore, FileStorage, NvStorage, DEFAULT_CAPACITY};
use control::{
    ControlLoop, EcModule, ProbeSelect, SimProbeSelect, SimThermometer, TemperatureProbe,
};
use ezo_protocol::sim::SimConnector;
use ezo_protocol::{Connector, SerialConnector};
use provisioning::ProvisioningConfig;
use shell::{
    init_logging, render_measurement, Settings, Shell, StdinOperator, SysfsProbeSelect, W1Thermometer,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tracing::{info, warn};

/// Readings served by the simulated transducer, µS/cm
const SIM_READINGS: &[&str] = &["1413.00", "1413.20", "1412.90", "1413.10"];

enum Mode {
    Interactive,
    Once(String),
    Serve,
}

fn parse_args() -> Result<(Option<PathBuf>, Mode)> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut rest = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let file = args.next().context("--config needs a file")?;
                config = Some(PathBuf::from(file));
            }
            _ => rest.push(arg),
        }
    }

    let mode = match rest.first().map(String::as_str) {
        None => Mode::Interactive,
        Some("serve") if rest.len() == 1 => Mode::Serve,
        Some(_) => Mode::Once(rest.join(" ")),
    };
    Ok((config, mode))
}

fn thermometer(device: Option<&PathBuf>, settings: &Settings) -> Box<dyn TemperatureProbe + Send> {
    match device {
        Some(device) => Box::new(W1Thermometer::new(device, settings.w1_bus_master.clone())),
        None => {
            warn!("Thermometer not configured; temperature readings will fail");
            Box::new(SimThermometer::unavailable())
        }
    }
}

fn probe_select(settings: &Settings) -> Box<dyn ProbeSelect + Send> {
    match &settings.probe_select_gpio {
        Some(value) => Box::new(SysfsProbeSelect::new(value)),
        None => {
            warn!("Probe selector GPIO not configured; probe switching is a no-op");
            Box::new(SimProbeSelect::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, mode) = parse_args()?;
    let settings = Settings::load(config.as_deref()).context("Failed to load settings")?;
    init_logging(&settings.log_level)?;

    info!("=== EC Module v{} ===", env!("CARGO_PKG_VERSION"));

    let storage = FileStorage::new(&settings.storage_path, DEFAULT_CAPACITY);

    if settings.is_simulated() {
        info!("Using simulated transducer");
        let (connector, sim) = SimConnector::new(settings.baud_rate);
        sim.set_readings(SIM_READINGS);
        let thermometers: [Box<dyn TemperatureProbe + Send>; 2] =
            [Box::new(SimThermometer::new(2150)), Box::new(SimThermometer::new(2100))];
        run(connector, storage, thermometers, Box::new(SimProbeSelect::new()), &settings, mode).await
    } else {
        let connector = SerialConnector::new(settings.serial_device.clone());
        let thermometers = [
            thermometer(settings.temperature_a.as_ref(), &settings),
            thermometer(settings.temperature_b.as_ref(), &settings),
        ];
        let selector = probe_select(&settings);
        run(connector, storage, thermometers, selector, &settings, mode).await
    }
}

async fn run<C>(
    mut connector: C,
    storage: FileStorage,
    thermometers: [Box<dyn TemperatureProbe + Send>; 2],
    selector: Box<dyn ProbeSelect + Send>,
    settings: &Settings,
    mode: Mode,
) -> Result<()>
where
    C: Connector,
    C::Writer: 'static,
{
    let store = ConfigStore::open(storage).context("Failed to load configuration")?;
    let client = connector
        .connect(settings.baud_rate)
        .context("Failed to open transducer link")?;
    let mut module = EcModule::new(client, store, thermometers, selector);

    let line = match mode {
        Mode::Serve => return serve(module).await,
        Mode::Once(line) => Some(line),
        Mode::Interactive => None,
    };

    if let Err(e) = module.initialize().await {
        warn!("Transducer not ready ({}); run `provision` if it is new", e);
    }

    let provisioning = ProvisioningConfig {
        factory_baud_rate: settings.factory_baud_rate,
        operating_baud_rate: settings.baud_rate,
        ..Default::default()
    };
    let mut shell = Shell::new(module, connector, provisioning);
    let mut operator = StdinOperator;

    if let Some(line) = line {
        let output = shell.execute(&line, &mut operator).await;
        print!("{}", output.text);
        if output.code != 0 {
            bail!("Command failed with code {}", output.code);
        }
        return Ok(());
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let output = shell.execute(&line, &mut operator).await;
        print!("{}", output.text);
        if output.code != 0 {
            println!("(code {})", output.code);
        }
    }

    Ok(())
}

async fn serve<W, S>(module: EcModule<W, S>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
    S: NvStorage + Send + 'static,
{
    let (control, mut handle) = ControlLoop::new(module);
    let worker = tokio::spawn(control.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "init" => match handle.initialize().await {
                Ok(Ok(info)) => println!("READY firmware {}", info.firmware),
                Ok(Err(failure)) => println!("READY {}", failure),
                Err(e) => println!("ERR({}) {}", e.code(), e),
            },
            "measure" => match handle.measure().await {
                Ok(outcome) => {
                    println!("READY");
                    print!("{}", render_measurement(&outcome.record, &outcome.failures));
                }
                Err(e) => println!("ERR({}) {}", e.code(), e),
            },
            "status" => println!(
                "init {} measurement {}",
                handle.init_status().tag(),
                handle.measurement_status().tag()
            ),
            "" => {}
            other => println!("Unknown request {:?} (init, measure, status)", other),
        }
    }

    drop(handle);
    worker.await.context("Control loop panicked")?;
    Ok(())
}
