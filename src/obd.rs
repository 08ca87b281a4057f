//! Decoding of ELM327 responses to OBD-II mode 01 and mode 03 requests.

use std::fmt;

use thiserror::Error;
use tracing::debug;

/// Response prefix for mode 01 (show current data).
const MODE_CURRENT_DATA: u8 = 0x41;
/// Response prefix for mode 03 (stored trouble codes).
const MODE_STORED_DTCS: u8 = 0x43;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("response holds fewer than two bytes")]
    NoData,
    #[error("response has an odd number of hex digits")]
    InvalidLength,
    #[error("PID {pid:02X} needs {needed} data bytes, got {got}")]
    Truncated { pid: u8, needed: usize, got: usize },
    #[error("mode {0:02X} is not supported")]
    UnsupportedMode(u8),
    #[error("PID {0:02X} is not supported")]
    UnsupportedPid(u8),
}

/// Fuel trim bank and term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuelTrim {
    ShortTerm,
    LongTerm,
}

/// A decoded vehicle reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    MonitorStatus {
        mil_on: bool,
        dtc_count: u8,
        tests_available: u8,
        tests_complete: u8,
    },
    EngineLoad(f64),
    CoolantTemp(i16),
    FuelTrim {
        term: FuelTrim,
        bank: u8,
        percent: f64,
    },
    FuelPressure(u16),
    ManifoldPressure(u8),
    EngineRpm(u32),
    VehicleSpeed(u8),
    TimingAdvance(f64),
    IntakeAirTemp(i16),
    MafRate(f64),
    ThrottlePosition(f64),
    TroubleCodes(Vec<String>),
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::MonitorStatus {
                mil_on,
                dtc_count,
                tests_available,
                tests_complete,
            } => write!(
                f,
                "MIL status: {}, Stored DTCs: {dtc_count}, Test availability: 0x{tests_available:02X}, Test completion: 0x{tests_complete:02X}",
                if *mil_on { "ON" } else { "OFF" }
            ),
            Reading::EngineLoad(v) => write!(f, "Engine load is {v:.1}%."),
            Reading::CoolantTemp(v) => write!(f, "Engine coolant temperature is {v}°C."),
            Reading::FuelTrim {
                term,
                bank,
                percent,
            } => {
                let term = match term {
                    FuelTrim::ShortTerm => "Short",
                    FuelTrim::LongTerm => "Long",
                };
                write!(f, "{term} term fuel trim (Bank {bank}) is {percent:.1}%.")
            }
            Reading::FuelPressure(v) => write!(f, "Fuel pressure is {v} kPa."),
            Reading::ManifoldPressure(v) => {
                write!(f, "Intake manifold absolute pressure is {v} kPa.")
            }
            Reading::EngineRpm(v) => write!(f, "Engine RPM is {v}."),
            Reading::VehicleSpeed(v) => write!(f, "Vehicle speed is {v} km/h."),
            Reading::TimingAdvance(v) => write!(f, "Timing advance is {v:.1}°."),
            Reading::IntakeAirTemp(v) => write!(f, "Intake air temperature is {v}°C."),
            Reading::MafRate(v) => write!(f, "MAF air flow rate is {v:.2} g/s."),
            Reading::ThrottlePosition(v) => write!(f, "Throttle position is {v:.1}%."),
            Reading::TroubleCodes(codes) if codes.is_empty() => write!(f, "Stored DTCs: None"),
            Reading::TroubleCodes(codes) => write!(f, "Stored DTCs: {}", codes.join(", ")),
        }
    }
}

/// Request line for `code` as sent to an ELM327 adapter.
///
/// ```
/// assert_eq!(obd_llm::obd::pid_request("010c"), "010C\r");
/// ```
pub fn pid_request(code: &str) -> String {
    format!("{}\r", code.trim().to_ascii_uppercase())
}

/// Decode a raw adapter response such as `"41 0C 1A F8"`.
///
/// Adapter output is split into lines on carriage returns, newlines and the
/// `>` prompt. The last line made only of hex digits and spaces whose mode
/// byte marks a reply is decoded. Command echoes and status text such as
/// `SEARCHING...` or `NO DATA` are skipped.
pub fn decode_response(raw: &str) -> Result<Reading, DecodeError> {
    let line = response_line(raw).ok_or(DecodeError::NoData)?;
    let digits: Vec<u8> = line
        .chars()
        .filter_map(|c| c.to_digit(16))
        .map(|d| d as u8)
        .collect();
    if digits.len() % 2 != 0 {
        return Err(DecodeError::InvalidLength);
    }
    let bytes: Vec<u8> = digits.chunks(2).map(|p| (p[0] << 4) | p[1]).collect();
    let [mode, pid, data @ ..] = bytes.as_slice() else {
        return Err(DecodeError::NoData);
    };

    let reading = match *mode {
        MODE_CURRENT_DATA => current_data(*pid, data)?,
        // mode 03 has no PID byte, the second byte starts the first code
        MODE_STORED_DTCS => Reading::TroubleCodes(trouble_codes(&bytes[1..])),
        other => return Err(DecodeError::UnsupportedMode(other)),
    };
    debug!(%reading, "decoded obd response");
    Ok(reading)
}

fn response_line(raw: &str) -> Option<&str> {
    raw.split(['\r', '\n', '>'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| line.chars().all(|c| c.is_ascii_hexdigit() || c == ' '))
        // replies carry a mode byte of 0x40 or above, echoed requests do not
        .filter(|line| matches!(line.chars().next().and_then(|c| c.to_digit(16)), Some(4..)))
        .last()
}

fn need(pid: u8, data: &[u8], needed: usize) -> Result<(), DecodeError> {
    if data.len() < needed {
        return Err(DecodeError::Truncated {
            pid,
            needed,
            got: data.len(),
        });
    }
    Ok(())
}

fn current_data(pid: u8, data: &[u8]) -> Result<Reading, DecodeError> {
    let width = match pid {
        0x01 => 4,
        0x0C | 0x10 => 2,
        0x04..=0x11 => 1,
        other => return Err(DecodeError::UnsupportedPid(other)),
    };
    need(pid, data, width)?;
    let a = data[0];
    let ab = || u32::from(a) * 256 + u32::from(data[1]);

    Ok(match pid {
        0x01 => Reading::MonitorStatus {
            mil_on: a & 0x80 != 0,
            dtc_count: a & 0x7F,
            tests_available: data[1],
            tests_complete: data[2],
        },
        0x04 => Reading::EngineLoad(f64::from(a) * 100.0 / 255.0),
        0x05 => Reading::CoolantTemp(i16::from(a) - 40),
        0x06..=0x09 => Reading::FuelTrim {
            term: if pid % 2 == 0 {
                FuelTrim::ShortTerm
            } else {
                FuelTrim::LongTerm
            },
            bank: if pid < 0x08 { 1 } else { 2 },
            percent: (f64::from(a) - 128.0) * 100.0 / 128.0,
        },
        0x0A => Reading::FuelPressure(u16::from(a) * 3),
        0x0B => Reading::ManifoldPressure(a),
        0x0C => Reading::EngineRpm(ab() / 4),
        0x0D => Reading::VehicleSpeed(a),
        0x0E => Reading::TimingAdvance(f64::from(a) / 2.0 - 64.0),
        0x0F => Reading::IntakeAirTemp(i16::from(a) - 40),
        0x10 => Reading::MafRate(f64::from(ab()) / 100.0),
        0x11 => Reading::ThrottlePosition(f64::from(a) * 100.0 / 255.0),
        other => return Err(DecodeError::UnsupportedPid(other)),
    })
}

fn trouble_codes(data: &[u8]) -> Vec<String> {
    data.chunks_exact(2)
        .take_while(|pair| pair[0] != 0 || pair[1] != 0)
        .map(|pair| dtc(pair[0], pair[1]))
        .collect()
}

/// Format a two-byte trouble code, e.g. `0x01 0x33` as `P0133`.
fn dtc(a: u8, b: u8) -> String {
    let system = ['P', 'C', 'B', 'U'][usize::from(a >> 6)];
    format!("{system}{}{:X}{b:02X}", (a >> 4) & 0x03, a & 0x0F)
}
