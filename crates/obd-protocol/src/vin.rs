//! Vehicle Identification Number (Mode 09 PID 02)
//!
//! Extracts the VIN from single-line or multi-frame adapter replies and
//! decodes the manufacturer, model year and region.

use serde::{Deserialize, Serialize};

use crate::pid::parse_hex_bytes;

/// Vehicle identity derived from the VIN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: String,
    /// World Manufacturer Identifier (first three characters)
    pub wmi: String,
    pub manufacturer: Option<String>,
    pub country: Option<String>,
    pub model_year: Option<u16>,
}

/// Characters that may appear in a VIN (I, O and Q never do)
fn is_vin_char(c: char) -> bool {
    c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q'))
}

/// Pull the 17-character VIN out of a raw `0902` reply.
///
/// Handles CAN multi-frame replies (`014`, `0:...`, `1:...`) and legacy
/// replies that repeat the `4902` header on every line.
pub fn extract_vin(raw: &str) -> Option<String> {
    let mut chars = Vec::new();

    for line in raw.split(['\r', '\n']) {
        let mut cleaned: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(idx) = cleaned.find(':') {
            cleaned = cleaned[idx + 1..].to_string();
        }
        cleaned.make_ascii_uppercase();

        // Multi-frame byte count line
        if cleaned.len() <= 3 {
            continue;
        }

        let payload = match cleaned.find("4902") {
            Some(idx) => &cleaned[idx + 4..],
            None => cleaned.as_str(),
        };

        let Some(bytes) = parse_hex_bytes(payload) else {
            continue;
        };
        chars.extend(bytes.into_iter().map(char::from).filter(|c| is_vin_char(*c)));
    }

    if chars.len() < 17 {
        return None;
    }
    Some(chars[chars.len() - 17..].iter().collect())
}

impl VehicleInfo {
    /// Decode a 17-character VIN
    pub fn from_vin(vin: &str) -> Option<Self> {
        let vin = vin.trim().to_ascii_uppercase();
        if vin.len() != 17 || !vin.chars().all(is_vin_char) {
            return None;
        }

        let wmi = vin[..3].to_string();
        let chars: Vec<char> = vin.chars().collect();

        Some(Self {
            manufacturer: manufacturer(&wmi).map(str::to_string),
            country: country(chars[0]).map(str::to_string),
            model_year: model_year(chars[9], chars[6]),
            wmi,
            vin,
        })
    }
}

fn manufacturer(wmi: &str) -> Option<&'static str> {
    let name = match wmi {
        "9BW" => "Volkswagen do Brasil",
        "9BG" => "Chevrolet do Brasil",
        "9BD" => "Fiat do Brasil",
        "9BF" => "Ford do Brasil",
        "93H" => "Honda do Brasil",
        "9BR" => "Toyota do Brasil",
        "93Y" => "Renault do Brasil",
        "9BH" => "Hyundai do Brasil",
        "936" | "935" => "Peugeot Citroen do Brasil",
        "WVW" | "WV1" | "WV2" => "Volkswagen",
        "WBA" => "BMW",
        "WDB" | "WDD" => "Mercedes-Benz",
        "WAU" => "Audi",
        "1HG" | "JHM" => "Honda",
        "JT2" | "JTD" => "Toyota",
        "1FA" | "1FT" => "Ford",
        "1G1" => "Chevrolet",
        "KMH" => "Hyundai",
        "VF1" => "Renault",
        "VF3" => "Peugeot",
        "ZFA" => "Fiat",
        _ => return None,
    };
    Some(name)
}

fn country(first: char) -> Option<&'static str> {
    let region = match first {
        '1' | '4' | '5' => "United States",
        '2' => "Canada",
        '3' => "Mexico",
        '8' => "Argentina",
        '9' => "Brazil",
        'J' => "Japan",
        'K' => "South Korea",
        'L' => "China",
        'S' => "United Kingdom",
        'V' => "France/Spain",
        'W' => "Germany",
        'Y' => "Sweden/Finland",
        'Z' => "Italy",
        _ => return None,
    };
    Some(region)
}

/// Position 10 year code; an alphabetic position 7 selects the 2010+ cycle
fn model_year(code: char, position7: char) -> Option<u16> {
    const CODES: &str = "ABCDEFGHJKLMNPRSTVWXY123456789";
    let index = CODES.find(code)? as u16;
    let base = if position7.is_ascii_alphabetic() { 2010 } else { 1980 };
    Some(base + index)
}
