//! Cellular modem collector (§4.2).
//!
//! Preferred path is QMI via the `uqmi` CLI; if that binary is missing or
//! the modem doesn't speak QMI, falls back to an AT command chain
//! (`AT+CSQ`, `AT+QNWINFO`, `AT+QCSQ`, `AT+QENG`) written directly to the
//! modem's AT port. Values are clipped to protocol-defined ranges —
//! RSRP [-140, -44] dBm, RSRQ [-20, -3] dB, SINR [-20, 30] dB — and a
//! reading outside that range marks the sample `degraded` rather than
//! failing the whole collection.

use std::io::{Read, Write};
use std::os::unix::io::RawFd;
use std::time::Duration;

use async_trait::async_trait;
use uplinkd_common::{CellularExt, ClassSample, CollectError, Member, Sample};

use crate::Collector;

const RSRP_RANGE: (f64, f64) = (-140.0, -44.0);
const RSRQ_RANGE: (f64, f64) = (-20.0, -3.0);
const SINR_RANGE: (f64, f64) = (-20.0, 30.0);

#[derive(Debug, Clone)]
pub struct CellularConfig {
    /// QMI control device, e.g. `/dev/cdc-wdm0`. `None` skips the QMI path.
    pub qmi_device: Option<String>,
    /// AT command serial port, e.g. `/dev/ttyUSB2`. `None` skips the AT path.
    pub at_device: Option<String>,
    pub at_baud: u32,
    pub command_timeout: Duration,
}

impl Default for CellularConfig {
    fn default() -> Self {
        CellularConfig {
            qmi_device: Some("/dev/cdc-wdm0".to_string()),
            at_device: Some("/dev/ttyUSB2".to_string()),
            at_baud: 115_200,
            command_timeout: Duration::from_millis(1000),
        }
    }
}

struct CellularReading {
    rsrp: f64,
    rsrq: f64,
    sinr: f64,
    network_type: String,
    roaming: bool,
    operator: String,
}

pub struct CellularCollector {
    config: CellularConfig,
}

impl CellularCollector {
    pub fn new(config: CellularConfig) -> Self {
        CellularCollector { config }
    }
}

impl Default for CellularCollector {
    fn default() -> Self {
        CellularCollector::new(CellularConfig::default())
    }
}

#[async_trait]
impl Collector for CellularCollector {
    async fn collect(&self, member: &Member, deadline: Duration) -> Result<Sample, CollectError> {
        let timeout = self.config.command_timeout.min(deadline);

        let reading = if let Some(device) = self.config.qmi_device.clone() {
            match tokio::time::timeout(timeout, run_uqmi(device)).await {
                Ok(Ok(reading)) => Some(reading),
                Ok(Err(e)) => {
                    tracing::debug!(member = %member.name, error = %e, "qmi query failed, falling back to AT");
                    None
                }
                Err(_) => None,
            }
        } else {
            None
        };

        let reading = match reading {
            Some(r) => r,
            None => {
                let device = self.config.at_device.clone().ok_or_else(|| {
                    CollectError::Permanent("no qmi or at device configured".to_string())
                })?;
                let baud = self.config.at_baud;
                tokio::time::timeout(timeout, run_at_chain(device, baud))
                    .await
                    .map_err(|_| CollectError::Transient("at command chain timed out".to_string()))??
            }
        };

        let valid = (RSRP_RANGE.0..=RSRP_RANGE.1).contains(&reading.rsrp)
            && (RSRQ_RANGE.0..=RSRQ_RANGE.1).contains(&reading.rsrq)
            && (SINR_RANGE.0..=SINR_RANGE.1).contains(&reading.sinr);

        let ext = CellularExt {
            rsrp: reading.rsrp.clamp(RSRP_RANGE.0, RSRP_RANGE.1),
            rsrq: reading.rsrq.clamp(RSRQ_RANGE.0, RSRQ_RANGE.1),
            sinr: reading.sinr.clamp(SINR_RANGE.0, SINR_RANGE.1),
            network_type: reading.network_type,
            roaming: reading.roaming,
            operator: reading.operator,
        };

        let mut sample = Sample::connected_ok(0.0, 0.0, 0.0, ClassSample::Cellular(ext));
        sample.degraded = !valid;
        Ok(sample)
    }
}

/// Runs `uqmi -d <device> --get-signal-info` and parses its JSON output.
///
/// Expected shape: `{"type":"lte","rsrp":-95,"rsrq":-11,"sinr":12,
/// "network":"LTE","roaming":false,"operator":"T-Mobile"}`.
async fn run_uqmi(device: String) -> Result<CellularReading, CollectError> {
    let output = tokio::process::Command::new("uqmi")
        .args(["-d", &device, "--get-signal-info"])
        .output()
        .await
        .map_err(|e| CollectError::Transient(format!("failed to spawn uqmi: {e}")))?;

    if !output.status.success() {
        return Err(CollectError::Transient(format!(
            "uqmi exited with {}",
            output.status
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| CollectError::Transient(format!("malformed uqmi output: {e}")))?;

    Ok(CellularReading {
        rsrp: json.get("rsrp").and_then(|v| v.as_f64()).unwrap_or(f64::MIN),
        rsrq: json.get("rsrq").and_then(|v| v.as_f64()).unwrap_or(f64::MIN),
        sinr: json.get("sinr").and_then(|v| v.as_f64()).unwrap_or(f64::MIN),
        network_type: json
            .get("network")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        roaming: json.get("roaming").and_then(|v| v.as_bool()).unwrap_or(false),
        operator: json
            .get("operator")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
    })
}

async fn run_at_chain(device: String, baud: u32) -> Result<CellularReading, CollectError> {
    tokio::task::spawn_blocking(move || run_at_chain_blocking(&device, baud))
        .await
        .map_err(|e| CollectError::Transient(format!("at command task panicked: {e}")))?
}

fn run_at_chain_blocking(device: &str, baud: u32) -> Result<CellularReading, CollectError> {
    let port = SerialPort::open(device, baud)
        .map_err(|e| CollectError::Permanent(format!("cannot open {device}: {e}")))?;

    let csq = port
        .command("AT+CSQ")
        .map_err(|e| CollectError::Transient(e.to_string()))?;
    let qnwinfo = port
        .command("AT+QNWINFO")
        .map_err(|e| CollectError::Transient(e.to_string()))?;
    let qcsq = port
        .command("AT+QCSQ")
        .map_err(|e| CollectError::Transient(e.to_string()))?;

    let (rssi_csq, _ber) = parse_csq(&csq).unwrap_or((99, 99));
    let (network_type, operator) = parse_qnwinfo(&qnwinfo).unwrap_or(("unknown".into(), "unknown".into()));
    let (rsrp, sinr, rsrq) = parse_qcsq(&qcsq).unwrap_or((
        rssi_to_rsrp_estimate(rssi_csq),
        f64::MIN,
        f64::MIN,
    ));

    Ok(CellularReading {
        rsrp,
        rsrq,
        sinr,
        network_type,
        roaming: false,
        operator,
    })
}

/// `+CSQ: <rssi>,<ber>` where rssi is an index 0-31 (99 = unknown).
fn parse_csq(response: &str) -> Option<(i32, i32)> {
    let line = response.lines().find(|l| l.trim_start().starts_with("+CSQ:"))?;
    let body = line.split(':').nth(1)?;
    let mut parts = body.split(',').map(|s| s.trim().parse::<i32>());
    let rssi = parts.next()?.ok()?;
    let ber = parts.next().and_then(|r| r.ok()).unwrap_or(99);
    Some((rssi, ber))
}

/// `+QNWINFO: "<act>","<oper>","<band>",<channel>`
fn parse_qnwinfo(response: &str) -> Option<(String, String)> {
    let line = response
        .lines()
        .find(|l| l.trim_start().starts_with("+QNWINFO:"))?;
    let body = line.split(':').nth(1)?;
    let fields: Vec<&str> = body.split(',').map(|s| s.trim().trim_matches('"')).collect();
    let act = fields.first()?.to_string();
    let oper = fields.get(1).map(|s| s.to_string()).unwrap_or_default();
    Some((act, oper))
}

/// `+QCSQ: "<sysmode>",<rssi>,<rsrp>,<sinr_raw>,<rsrq>` where `sinr_raw`
/// is in Quectel's 0.2 dB units offset by -20 dB (`sinr_db = raw/5 - 20`).
fn parse_qcsq(response: &str) -> Option<(f64, f64, f64)> {
    let line = response.lines().find(|l| l.trim_start().starts_with("+QCSQ:"))?;
    let body = line.split(':').nth(1)?;
    let fields: Vec<&str> = body.split(',').map(|s| s.trim()).collect();
    let rsrp = fields.get(2)?.parse::<f64>().ok()?;
    let sinr_raw = fields.get(3)?.parse::<f64>().ok()?;
    let rsrq = fields.get(4)?.parse::<f64>().ok()?;
    Some((rsrp, sinr_raw / 5.0 - 20.0, rsrq))
}

/// Coarse fallback when only `AT+CSQ` succeeded: RSSI index 0-31 maps
/// roughly onto [-113, -51] dBm; treated as an RSRP stand-in.
fn rssi_to_rsrp_estimate(rssi_index: i32) -> f64 {
    if !(0..=31).contains(&rssi_index) {
        return f64::MIN;
    }
    -113.0 + rssi_index as f64 * 2.0
}

/// Minimal termios-based serial port wrapper: raw mode, no flow control,
/// blocking reads bounded by a `VTIME` read timeout.
struct SerialPort {
    fd: RawFd,
}

impl SerialPort {
    fn open(path: &str, baud: u32) -> std::io::Result<Self> {
        use std::os::unix::io::AsRawFd;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let fd = file.as_raw_fd();
        std::mem::forget(file); // fd lifetime owned by `SerialPort` below.

        unsafe {
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                libc::close(fd);
                return Err(std::io::Error::last_os_error());
            }
            libc::cfmakeraw(&mut tio);
            let speed = baud_to_speed(baud);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
            tio.c_cc[libc::VMIN] = 0;
            tio.c_cc[libc::VTIME] = 10; // deciseconds
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                libc::close(fd);
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(SerialPort { fd })
    }

    fn command(&self, cmd: &str) -> std::io::Result<String> {
        let mut f = unsafe { <std::fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(self.fd) };
        let line = format!("{cmd}\r\n");
        let result = (|| {
            f.write_all(line.as_bytes())?;
            let mut buf = [0u8; 512];
            let mut out = String::new();
            for _ in 0..5 {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.push_str(&String::from_utf8_lossy(&buf[..n]));
                if out.contains("OK") || out.contains("ERROR") {
                    break;
                }
            }
            Ok(out)
        })();
        std::mem::forget(f); // fd ownership stays with `SerialPort`.
        result
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn baud_to_speed(baud: u32) -> libc::speed_t {
    match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        _ => libc::B115200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_csq_extracts_rssi_and_ber() {
        let resp = "AT+CSQ\r\n+CSQ: 20,99\r\n\r\nOK\r\n";
        assert_eq!(parse_csq(resp), Some((20, 99)));
    }

    #[test]
    fn parse_csq_missing_line_is_none() {
        assert_eq!(parse_csq("ERROR\r\n"), None);
    }

    #[test]
    fn parse_qnwinfo_extracts_act_and_operator() {
        let resp = "+QNWINFO: \"FDD LTE\",\"310410\",\"LTE BAND 4\",1850\r\nOK\r\n";
        let (act, oper) = parse_qnwinfo(resp).unwrap();
        assert_eq!(act, "FDD LTE");
        assert_eq!(oper, "310410");
    }

    #[test]
    fn parse_qcsq_converts_sinr_units() {
        let resp = "+QCSQ: \"LTE\",-75,-95,150,-11\r\nOK\r\n";
        let (rsrp, sinr, rsrq) = parse_qcsq(resp).unwrap();
        assert!((rsrp - (-95.0)).abs() < 0.001);
        assert!((sinr - 10.0).abs() < 0.001); // 150/5 - 20 = 10
        assert!((rsrq - (-11.0)).abs() < 0.001);
    }

    #[test]
    fn rssi_estimate_out_of_range_is_min() {
        assert_eq!(rssi_to_rsrp_estimate(99), f64::MIN);
    }

    #[test]
    fn rssi_estimate_in_range_is_plausible() {
        let est = rssi_to_rsrp_estimate(16);
        assert!((-113.0..=-51.0).contains(&est));
    }

    #[tokio::test]
    async fn collect_fails_permanent_when_no_device_configured() {
        let collector = CellularCollector::new(CellularConfig {
            qmi_device: None,
            at_device: None,
            at_baud: 115_200,
            command_timeout: Duration::from_millis(200),
        });
        let member = Member::new("cell0", uplinkd_common::MemberClass::Cellular, "wwan0");
        let result = collector.collect(&member, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(CollectError::Permanent(_))));
    }
}
