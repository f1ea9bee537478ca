// src/io/mod.rs
//
// Serial line types shared by the transport drivers and the session layer.
//
// The transport capability itself (device enumeration, permission, port
// handles) lives in `transport`; `serial` is the host implementation on
// top of nusb + serialport and `mock` is the in-memory one used by tests.

pub mod error;
pub mod mock;
pub mod transport;

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
pub mod serial;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use error::IoError;
pub use transport::{PortHandle, UsbDeviceInfo, UsbTransport};

// ============================================================================
// Line parameters
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

impl Parity {
    /// Parse the single-letter form used by the protocol engine ('N', 'E', 'O').
    pub fn from_char(c: char) -> Option<Parity> {
        match c.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'E' => Some(Parity::Even),
            'O' => Some(Parity::Odd),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// Stop bit setting. 1.5 is only honoured by some chips.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        StopBits::One
    }
}

impl StopBits {
    /// Parse the numeric form used by the protocol engine (1, 1.5, 2).
    pub fn from_f32(value: f32) -> Option<StopBits> {
        if value == 1.0 {
            Some(StopBits::One)
        } else if value == 1.5 {
            Some(StopBits::OnePointFive)
        } else if value == 2.0 {
            Some(StopBits::Two)
        } else {
            None
        }
    }

    pub fn as_f32(&self) -> f32 {
        match self {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

/// Baud rate, framing and parity of one port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineParams {
    pub baud_rate: u32,
    pub data_bits: u8,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl LineParams {
    pub fn new(baud_rate: u32, data_bits: u8, stop_bits: StopBits, parity: Parity) -> Self {
        Self {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        }
    }

    /// Reject values no chip accepts before they reach the driver.
    pub fn validate(&self) -> Result<(), String> {
        if self.baud_rate == 0 {
            return Err("baud rate must be non-zero".to_string());
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(format!("data bits must be 5-8, got {}", self.data_bits));
        }
        Ok(())
    }
}

impl std::fmt::Display for LineParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.as_char(),
            self.stop_bits.as_f32()
        )
    }
}

// ============================================================================
// Control and status lines
// ============================================================================

/// Modem status lines (read-only).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLine {
    Cts,
    Dsr,
    Cd,
    Ri,
}

impl StatusLine {
    pub fn name(&self) -> &'static str {
        match self {
            StatusLine::Cts => "cts",
            StatusLine::Dsr => "dsr",
            StatusLine::Cd => "cd",
            StatusLine::Ri => "ri",
        }
    }
}

impl FromStr for StatusLine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cts" => Ok(StatusLine::Cts),
            "dsr" => Ok(StatusLine::Dsr),
            "cd" => Ok(StatusLine::Cd),
            "ri" => Ok(StatusLine::Ri),
            other => Err(format!("unknown status line '{}'", other)),
        }
    }
}

/// Result of sampling a status line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineState {
    High,
    Low,
    /// The chip cannot report this line
    Unavailable,
}

impl LineState {
    pub fn from_level(level: bool) -> Self {
        if level {
            LineState::High
        } else {
            LineState::Low
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, LineState::High)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_from_char() {
        assert_eq!(Parity::from_char('N'), Some(Parity::None));
        assert_eq!(Parity::from_char('e'), Some(Parity::Even));
        assert_eq!(Parity::from_char('O'), Some(Parity::Odd));
        assert_eq!(Parity::from_char('M'), None);
        assert_eq!(Parity::default(), Parity::None);
    }

    #[test]
    fn test_stop_bits_from_f32() {
        assert_eq!(StopBits::from_f32(1.0), Some(StopBits::One));
        assert_eq!(StopBits::from_f32(1.5), Some(StopBits::OnePointFive));
        assert_eq!(StopBits::from_f32(2.0), Some(StopBits::Two));
        assert_eq!(StopBits::from_f32(3.0), None);
    }

    #[test]
    fn test_line_params_validate() {
        assert!(LineParams::default().validate().is_ok());
        assert!(LineParams::new(0, 8, StopBits::One, Parity::None).validate().is_err());
        assert!(LineParams::new(9600, 9, StopBits::One, Parity::None).validate().is_err());
        assert!(LineParams::new(9600, 5, StopBits::Two, Parity::Odd).validate().is_ok());
    }

    #[test]
    fn test_line_params_display() {
        let params = LineParams::new(9600, 8, StopBits::One, Parity::None);
        assert_eq!(params.to_string(), "9600 8N1");
        let params = LineParams::new(19200, 7, StopBits::OnePointFive, Parity::Even);
        assert_eq!(params.to_string(), "19200 7E1.5");
    }

    #[test]
    fn test_status_line_parse() {
        assert_eq!("cts".parse::<StatusLine>(), Ok(StatusLine::Cts));
        assert_eq!("RI".parse::<StatusLine>(), Ok(StatusLine::Ri));
        assert!("dcd".parse::<StatusLine>().is_err());
    }

    #[test]
    fn test_line_params_toml_defaults() {
        let params: LineParams = toml::from_str("baud_rate = 9600\ndata_bits = 7").unwrap();
        assert_eq!(params.stop_bits, StopBits::One);
        assert_eq!(params.parity, Parity::None);
    }
}
