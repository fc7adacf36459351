//! ELM327 Protocol Definitions
//!
//! Wire constants and the adapter init sequences.

use serde::{Deserialize, Serialize};

/// Line terminator appended to every command
pub const COMMAND_TERMINATOR: char = '\r';

/// Prompt the adapter prints when it is ready for the next command
pub const PROMPT: char = '>';

/// Adapter reset
pub const RESET: &str = "ATZ";
/// Echo off
pub const ECHO_OFF: &str = "ATE0";
/// Linefeeds off
pub const LINEFEED_OFF: &str = "ATL0";
/// Spaces off
pub const SPACES_OFF: &str = "ATS0";
/// Headers off
pub const HEADERS_OFF: &str = "ATH0";

/// Mode 09 PID 02 request (VIN)
pub const VIN_REQUEST: &str = "0902";

/// Supported OBD-II protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// Get the ELM327 AT command for this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141_2 => "ATSP3",
            ObdProtocol::Iso14230_4Kwp => "ATSP4",
            ObdProtocol::Iso14230_4KwpFast => "ATSP5",
            ObdProtocol::Iso15765_4Can11bit500 => "ATSP6",
            ObdProtocol::Iso15765_4Can29bit500 => "ATSP7",
            ObdProtocol::Iso15765_4Can11bit250 => "ATSP8",
            ObdProtocol::Iso15765_4Can29bit250 => "ATSP9",
        }
    }
}

/// Full adapter init: reset, formatting off, protocol selection
pub fn full_init_sequence(protocol: ObdProtocol) -> Vec<&'static str> {
    vec![
        RESET,
        ECHO_OFF,
        LINEFEED_OFF,
        SPACES_OFF,
        HEADERS_OFF,
        protocol.to_elm_command(),
    ]
}

/// Reconnect init: formatting only, no reset
pub fn light_init_sequence() -> Vec<&'static str> {
    vec![ECHO_OFF, LINEFEED_OFF, SPACES_OFF, HEADERS_OFF]
}

/// Whether an adapter reply means the command was rejected
pub fn is_rejection(response: &str) -> bool {
    let trimmed = response.trim();
    trimmed == "?" || trimmed.to_ascii_uppercase().contains("ERROR")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_init_order() {
        assert_eq!(
            full_init_sequence(ObdProtocol::Auto),
            vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"]
        );
        assert_eq!(
            full_init_sequence(ObdProtocol::Iso15765_4Can11bit500).last(),
            Some(&"ATSP6")
        );
    }

    #[test]
    fn test_light_init_skips_reset() {
        let seq = light_init_sequence();
        assert!(!seq.contains(&RESET));
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn test_rejection() {
        assert!(is_rejection("?\r\r"));
        assert!(is_rejection("CAN ERROR"));
        assert!(!is_rejection("OK"));
        assert!(!is_rejection("ELM327 v1.5"));
    }
}
