//! EZO Conductivity Client
//!
//! Every command is one round trip: write the line, optionally read one
//! data reply, then read status lines until the command is acknowledged.

use crate::calibration::{CalibrationBlob, LINE_COUNT, LINE_WIDTH};
use crate::command::Command;
use crate::error::EzoError;
use crate::fixed::{format_fixed, parse_fixed};
use crate::status::StatusCode;
use crate::transport::LineTransport;
use crate::{timeouts, K_VALUE_PRECISION, MAX_STATUS_LEN, MEASUREMENT_PRECISION, RX_MAX_LINE_LEN};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Upper bound on lines collected by a raw passthrough
const MAX_PASSTHROUGH_LINES: usize = 32;

/// Identification returned by the `i` query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device type code (always `EC` once accepted)
    pub device_type: String,
    /// Firmware version string
    pub firmware: String,
}

impl DeviceInfo {
    /// Parse a `?I,<type>,<firmware>` reply, accepting only conductivity circuits
    pub fn parse(reply: &str) -> Result<Self, EzoError> {
        if reply.get(3..5) != Some("EC") {
            return Err(EzoError::NotConductivityDevice(reply.to_string()));
        }

        let mut fields = reply.split(',').skip(1);
        let device_type = fields.next().unwrap_or_default().to_string();
        let firmware = fields.next().unwrap_or_default().to_string();
        Ok(Self {
            device_type,
            firmware,
        })
    }
}

/// Client for one EZO conductivity transducer
pub struct EzoClient<W> {
    /// Serial line transport
    transport: LineTransport<W>,
    /// Baud rate the link was opened with
    baud_rate: u32,
}

impl<W: AsyncWrite + Unpin> EzoClient<W> {
    /// Create a new client over an open transport
    pub fn new(transport: LineTransport<W>, baud_rate: u32) -> Self {
        Self {
            transport,
            baud_rate,
        }
    }

    /// Release the serial link so the device can be reopened.
    ///
    /// Every later command fails with `LinkClosed`.
    pub async fn close(&mut self) {
        if self.transport.is_open() {
            debug!("Closing link at {} baud", self.baud_rate);
            self.transport.close().await;
        }
    }

    /// Read the next status line, skipping anything before its marker
    async fn read_status(&mut self, timeout: Duration) -> Result<StatusCode, EzoError> {
        self.transport.resync();
        let line = self.transport.read_line(MAX_STATUS_LEN, timeout).await?;
        Ok(StatusCode::parse(&line))
    }

    /// Wait for the acknowledgement of `command`.
    ///
    /// Transient lifecycle events are consumed and skipped.
    async fn expect_ok(&mut self, command: &str) -> Result<(), EzoError> {
        loop {
            let status = self.read_status(timeouts::STATUS).await?;
            match status {
                StatusCode::Ok => return Ok(()),
                StatusCode::Error => return Err(EzoError::Rejected(command.to_string())),
                code if code.is_transient() => {
                    debug!("Skipping {} while waiting for {} acknowledgement", code, command);
                }
                code => {
                    return Err(EzoError::ProtocolError(format!(
                        "unexpected status {} after {}",
                        code, command
                    )))
                }
            }
        }
    }

    /// Send a command that only returns a status
    pub async fn execute(&mut self, command: &Command) -> Result<(), EzoError> {
        self.transport.write_line(command).await?;
        self.expect_ok(command.as_str()).await
    }

    /// Send a command that returns one data line before its status
    pub async fn query(&mut self, command: &Command, timeout: Duration) -> Result<String, EzoError> {
        self.transport.write_line(command).await?;
        let reply = self.transport.read_line(RX_MAX_LINE_LEN, timeout).await?;
        self.expect_ok(command.as_str()).await?;
        Ok(reply)
    }

    /// Wake the transducer and verify it is a conductivity circuit
    pub async fn initialize(&mut self) -> Result<DeviceInfo, EzoError> {
        // A bare terminator wakes the device; its answer is irrelevant
        if let Err(e) = self.execute(&Command::literal("")?).await {
            debug!("Wake-up not acknowledged: {}", e);
        }

        let reply = self.query(&Command::literal("i")?, timeouts::IDENTIFY).await?;
        if reply.len() < 5 {
            return Err(EzoError::ProtocolError(format!(
                "identification reply too short: {:?}",
                reply
            )));
        }

        let info = DeviceInfo::parse(&reply)?;
        info!("Conductivity transducer ready (firmware {})", info.firmware);
        Ok(info)
    }

    /// Change the transducer's serial baud rate
    pub async fn set_baud(&mut self, baud_rate: u32) -> Result<(), EzoError> {
        let command = crate::command!("Baud,{}", baud_rate)?;
        self.execute(&command).await
    }

    /// Send the probe's K-value, given in tenths
    pub async fn set_k(&mut self, k_value: u8) -> Result<(), EzoError> {
        let command = crate::command!("K,{}", format_fixed(i64::from(k_value), K_VALUE_PRECISION))?;
        self.execute(&command).await
    }

    /// Enable or disable unsolicited continuous readings
    pub async fn set_continuous(&mut self, enabled: bool) -> Result<(), EzoError> {
        let command = crate::command!("C,{}", u8::from(enabled))?;
        self.execute(&command).await
    }

    /// Enable or disable the indicator LED
    pub async fn set_led(&mut self, enabled: bool) -> Result<(), EzoError> {
        let command = crate::command!("L,{}", u8::from(enabled))?;
        self.execute(&command).await
    }

    /// Take one reading, in thousandths of µS/cm
    pub async fn measure(&mut self) -> Result<u32, EzoError> {
        let reply = self.query(&Command::literal("R")?, timeouts::MEASURE).await?;
        parse_fixed(&reply, MEASUREMENT_PRECISION)
            .map_err(|e| EzoError::ProtocolError(format!("malformed reading {:?}: {}", reply, e)))
    }

    /// Number of calibration points the transducer holds
    pub async fn is_calibrated(&mut self) -> Result<u8, EzoError> {
        let reply = self
            .query(&Command::literal("Cal,?")?, timeouts::CALIBRATION_QUERY)
            .await?;

        // Reply is `?CAL,<n>`
        match reply.as_bytes().get(5) {
            Some(digit) if digit.is_ascii_digit() => Ok(digit - b'0'),
            _ => Err(EzoError::ProtocolError(format!(
                "malformed calibration query reply {:?}",
                reply
            ))),
        }
    }

    /// Dry calibration point
    pub async fn calibrate_dry(&mut self) -> Result<(), EzoError> {
        self.execute(&Command::literal("Cal,dry")?).await
    }

    /// Low calibration point at the given solution conductivity (µS/cm)
    pub async fn calibrate_low(&mut self, micro_siemens: u32) -> Result<(), EzoError> {
        let command = crate::command!("Cal,low,{}", micro_siemens)?;
        self.execute(&command).await
    }

    /// High calibration point at the given solution conductivity (µS/cm)
    pub async fn calibrate_high(&mut self, micro_siemens: u32) -> Result<(), EzoError> {
        let command = crate::command!("Cal,high,{}", micro_siemens)?;
        self.execute(&command).await
    }

    /// Load a previously exported calibration into the transducer.
    ///
    /// After the last line the transducer restarts (`*RS`, then `*RE`).
    /// Some firmware revisions skip one or both events, so a missing or
    /// different line here is only logged.
    pub async fn import_calibration(&mut self, blob: &CalibrationBlob) -> Result<(), EzoError> {
        for (index, line) in blob.lines().enumerate() {
            let command = crate::command!("Import,{}", line)?;
            if let Err(e) = self.execute(&command).await {
                warn!("Calibration import failed at line {}: {}", index, e);
                return Err(e);
            }
        }

        for expected in [StatusCode::Reset, StatusCode::Ready] {
            match self.transport.read_line(LINE_WIDTH, timeouts::RESET).await {
                Ok(line) if StatusCode::parse(&line) == expected => {
                    debug!("Transducer reported {} after import", expected);
                }
                Ok(line) => {
                    warn!("Expected {} after import, got {:?}; assuming transducer settled", expected, line);
                    return Ok(());
                }
                Err(EzoError::Timeout(ms)) => {
                    warn!("No {} within {}ms after import; assuming transducer settled", expected, ms);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        debug!("Calibration import complete");
        Ok(())
    }

    /// Read the transducer's calibration.
    ///
    /// Returns the blob together with the number of lines received before
    /// `*DONE`.
    pub async fn export_calibration(&mut self) -> Result<(CalibrationBlob, usize), EzoError> {
        let command = Command::literal("Export")?;
        let mut blob = CalibrationBlob::empty();

        for index in 0..=LINE_COUNT {
            let reply = self.query(&command, timeouts::EXPORT).await?;
            if StatusCode::parse(&reply) == StatusCode::Done {
                debug!("Calibration export done after {} lines", index);
                return Ok((blob, index));
            }
            if index == LINE_COUNT {
                break;
            }
            blob.set_line(index, &reply)?;
        }

        Err(EzoError::ProtocolError(format!(
            "calibration export did not finish within {} lines",
            LINE_COUNT + 1
        )))
    }

    /// Restore factory settings (the baud rate is kept).
    ///
    /// The transducer must answer exactly `*OK`, `*RS`, `*RE` in that order.
    pub async fn factory_reset(&mut self) -> Result<(), EzoError> {
        self.transport.write_line(&Command::literal("Factory")?).await?;

        for expected in [StatusCode::Ok, StatusCode::Reset, StatusCode::Ready] {
            let status = self.read_status(timeouts::RESET).await?;
            if status != expected {
                return Err(EzoError::ProtocolError(format!(
                    "factory reset expected {}, got {}",
                    expected, status
                )));
            }
        }

        info!("Transducer factory reset complete");
        Ok(())
    }

    /// Send a raw command and collect every reply line until the link goes
    /// quiet
    pub async fn passthrough(&mut self, command: &Command) -> Result<Vec<String>, EzoError> {
        self.transport.write_line(command).await?;

        let mut lines = Vec::new();
        while lines.len() < MAX_PASSTHROUGH_LINES {
            match self.transport.read_line(RX_MAX_LINE_LEN, timeouts::PASSTHROUGH).await {
                Ok(line) => lines.push(line),
                Err(EzoError::Timeout(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProbe;
    use proptest::prelude::*;

    fn blob(seed: &str) -> CalibrationBlob {
        let lines: Vec<String> = (0..LINE_COUNT).map(|i| format!("{}{:02}", seed, i)).collect();
        CalibrationBlob::from_lines(lines.iter().map(String::as_str)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_identifies_device() {
        let (mut client, _sim) = SimProbe::client();
        let info = client.initialize().await.unwrap();
        assert_eq!(info.device_type, "EC");
        assert_eq!(info.firmware, "2.16");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_rejects_other_device() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("i", &["?I,pH,1.98", "*OK"]);

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, EzoError::NotConductivityDevice(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_parses_fixed_point() {
        let (mut client, sim) = SimProbe::client();
        sim.set_readings(&["1413.00", "12", "0.001"]);

        assert_eq!(client.measure().await.unwrap(), 1413000);
        assert_eq!(client.measure().await.unwrap(), 12000);
        assert_eq!(client.measure().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_malformed_reply() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("R", &["12,5", "*OK"]);

        let err = client.measure().await.unwrap_err();
        assert!(matches!(err, EzoError::ProtocolError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_skips_transient_events() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("C,0", &["*WA", "*UV", "*RS", "*RE", "*OK"]);

        client.set_continuous(false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_rejects_command() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("L,0", &["*ER"]);

        let err = client.set_led(false).await.unwrap_err();
        assert!(matches!(err, EzoError::Rejected(ref cmd) if cmd == "L,0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_is_protocol_error() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("Cal,dry", &["*DONE"]);

        let err = client.calibrate_dry().await.unwrap_err();
        assert!(matches!(err, EzoError::ProtocolError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_status_times_out() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("Cal,dry", &[]);

        let err = client.calibrate_dry().await.unwrap_err();
        assert!(matches!(err, EzoError::Timeout(2500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_k_sends_one_decimal() {
        let (mut client, sim) = SimProbe::client();
        client.set_k(10).await.unwrap();
        client.set_k(5).await.unwrap();

        assert_eq!(sim.k_value(), "0.5");
        assert!(sim.commands().contains(&"K,1.0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_commands() {
        let (mut client, sim) = SimProbe::client();
        client.calibrate_dry().await.unwrap();
        client.calibrate_low(12880).await.unwrap();
        client.calibrate_high(80000).await.unwrap();

        assert_eq!(client.is_calibrated().await.unwrap(), 2);
        let commands = sim.commands();
        assert!(commands.contains(&"Cal,low,12880".to_string()));
        assert!(commands.contains(&"Cal,high,80000".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_reads_until_done() {
        let (mut client, sim) = SimProbe::client();
        let (exported, lines) = client.export_calibration().await.unwrap();

        assert_eq!(lines, LINE_COUNT);
        assert!(exported.is_complete());
        assert_eq!(exported.lines().collect::<Vec<_>>(), sim.calibration_lines());
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_without_done_fails() {
        let (mut client, sim) = SimProbe::client();
        sim.set_calibration(&vec!["ABCDEFGHIJKL"; LINE_COUNT + 1]);

        let err = client.export_calibration().await.unwrap_err();
        assert!(matches!(err, EzoError::ProtocolError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_waits_for_restart() {
        let (mut client, sim) = SimProbe::client();
        let blob = blob("IMPORTLINE");

        client.import_calibration(&blob).await.unwrap();
        assert_eq!(sim.calibration_lines(), blob.lines().collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_tolerates_missing_ready() {
        let (mut client, sim) = SimProbe::client();
        let blob = blob("IMPORTLINE");
        sim.respond(&format!("Import,{}", blob.line(LINE_COUNT - 1)), &["*OK", "*RS"]);

        client.import_calibration(&blob).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_propagates_line_failure() {
        let (mut client, sim) = SimProbe::client();
        let blob = blob("IMPORTLINE");
        sim.respond(&format!("Import,{}", blob.line(3)), &["*ER"]);

        let err = client.import_calibration(&blob).await.unwrap_err();
        assert!(matches!(err, EzoError::Rejected(_)));
        // Nothing after the failing line was sent
        assert!(!sim.commands().contains(&format!("Import,{}", blob.line(4))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_reset_sequence() {
        let (mut client, _sim) = SimProbe::client();
        client.factory_reset().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_reset_out_of_order() {
        let (mut client, sim) = SimProbe::client();
        sim.respond("Factory", &["*OK", "*RE", "*RS"]);
        assert!(client.factory_reset().await.is_err());

        sim.respond("Factory", &["*OK", "*ER", "*RS", "*RE"]);
        assert!(client.factory_reset().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_collects_lines() {
        let (mut client, _sim) = SimProbe::client();
        let lines = client.passthrough(&Command::literal("i").unwrap()).await.unwrap();
        assert_eq!(lines, vec!["?I,EC,2.16".to_string(), "*OK".to_string()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_import_then_export_is_identity(lines in proptest::collection::vec("[ -~]{12}", LINE_COUNT)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            let blob = CalibrationBlob::from_lines(lines.iter().map(String::as_str)).unwrap();
            let exported = runtime.block_on(async {
                let (mut client, _sim) = SimProbe::client();
                client.import_calibration(&blob).await.unwrap();
                client.export_calibration().await.unwrap()
            });

            prop_assert_eq!(exported.1, LINE_COUNT);
            prop_assert_eq!(exported.0, blob);
        }
    }
}
