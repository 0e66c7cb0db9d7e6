//! ==============================================================================
//! sensor.rs - sensor sources for producer nodes
//! ==============================================================================
//!
//! purpose:
//!     a sensor source is a no-argument read that returns a payload
//!     (field name -> number or string). the agent doesn't care how the
//!     values were produced.
//!
//! sources:
//!     - SystemSensor:  board stats (cpu temp, load, memory, uptime).
//!                      useful on nodes with nothing wired up yet.
//!     - CommandSensor: runs a helper program that prints one json object.
//!                      timing-sensitive drivers (dht22 bit-banging, adc
//!                      libraries) stay in whatever language handles them best.
//!     - closures:      any `FnMut() -> Result<Payload>` is a source, which is
//!                      what tests and embedders use.
//!
//! ==============================================================================

use crate::config::{SensorConfig, SensorKind};
use crate::domain::Payload;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait SensorSource: Send {
    async fn read(&mut self) -> Result<Payload>;
}

#[async_trait]
impl<F> SensorSource for F
where
    F: FnMut() -> Result<Payload> + Send,
{
    async fn read(&mut self) -> Result<Payload> {
        (self)()
    }
}

/// build the configured source
pub fn from_config(config: &SensorConfig) -> Result<Box<dyn SensorSource>> {
    match config.kind {
        SensorKind::System => Ok(Box::new(SystemSensor::new())),
        SensorKind::Command => {
            let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(15));
            Ok(Box::new(CommandSensor::new(config.command.clone(), timeout)?))
        }
    }
}

// ==============================================================================
// system stats
// ==============================================================================

pub struct SystemSensor {
    sys: sysinfo::System,
}

impl SystemSensor {
    pub fn new() -> Self {
        Self { sys: sysinfo::System::new() }
    }
}

impl Default for SystemSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorSource for SystemSensor {
    async fn read(&mut self) -> Result<Payload> {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let mut payload = Payload::new();
        // boards without a thermal zone simply omit the field
        if let Some(temp) = cpu_temp() {
            payload.insert("cpu_temp".into(), round2(temp).into());
        }
        payload.insert(
            "cpu_usage".into(),
            round2(f64::from(self.sys.global_cpu_info().cpu_usage())).into(),
        );
        payload.insert("load_1m".into(), round2(sysinfo::System::load_average().one).into());
        payload.insert("mem_used_mb".into(), (self.sys.used_memory() / 1_048_576).into());
        payload.insert("mem_total_mb".into(), (self.sys.total_memory() / 1_048_576).into());
        payload.insert("uptime_s".into(), sysinfo::System::uptime().into());
        Ok(payload)
    }
}

/// cpu temperature in celsius
///
/// reads /sys/class/thermal/thermal_zone0/temp, which holds millidegrees
/// (e.g., 45000 = 45.0°C)
fn cpu_temp() -> Option<f64> {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|t| t / 1000.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ==============================================================================
// external helper program
// ==============================================================================

pub struct CommandSensor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSensor {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts.next().ok_or_else(|| anyhow!("sensor command is empty"))?;
        Ok(Self { program, args: parts.collect(), timeout })
    }
}

#[async_trait]
impl SensorSource for CommandSensor {
    async fn read(&mut self) -> Result<Payload> {
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", self.program, self.timeout))?
        .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} failed ({}): {}", self.program, output.status, stderr.trim()));
        }

        parse_payload(&String::from_utf8_lossy(&output.stdout))
    }
}

/// the helper's stdout must be a single json object
fn parse_payload(stdout: &str) -> Result<Payload> {
    let stdout = stdout.trim();
    if stdout.is_empty() || stdout == "null" {
        return Err(anyhow!("Sensor returned null"));
    }

    match serde_json::from_str::<Value>(stdout) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(anyhow!("expected a JSON object, got {}", other)),
        Err(e) => Err(anyhow!("JSON parse error: {} (got: {})", e, stdout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_helper_output() {
        let payload = parse_payload("{\"t\": 22.5, \"h\": 41.0}\n").unwrap();
        assert_eq!(payload["t"], 22.5);
        assert!(parse_payload("null").is_err());
        assert!(parse_payload("").is_err());
        assert!(parse_payload("[1, 2]").is_err());
        assert!(parse_payload("t=22.5").is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandSensor::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn closures_are_sources() {
        let mut n = 0;
        let mut source = move || -> Result<Payload> {
            n += 1;
            let mut p = Payload::new();
            p.insert("count".into(), n.into());
            Ok(p)
        };
        assert_eq!(source.read().await.unwrap()["count"], 1);
        assert_eq!(source.read().await.unwrap()["count"], 2);
    }

    #[tokio::test]
    async fn system_sensor_reports_memory() {
        let payload = SystemSensor::new().read().await.unwrap();
        assert!(payload.contains_key("mem_total_mb"));
        assert!(payload.contains_key("uptime_s"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_sensor_reads_stdout() {
        let mut sensor = CommandSensor::new(
            vec!["sh".into(), "-c".into(), "echo '{\"temperature\": 19.5}'".into()],
            Duration::from_secs(5),
        )
        .unwrap();
        let payload = sensor.read().await.unwrap();
        assert_eq!(payload["temperature"], 19.5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_sensor_surfaces_failures() {
        let mut sensor = CommandSensor::new(
            vec!["sh".into(), "-c".into(), "echo boom >&2; exit 3".into()],
            Duration::from_secs(5),
        )
        .unwrap();
        let err = sensor.read().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
