//! # VE.HEX Register Catalog
//!
//! Static per-device-family register tables, loaded once at startup and shared
//! read-only by everything that resolves VE.HEX messages.
//!
//! Tables are comma-separated text, one register per row:
//!
//! ```text
//! # address, name, scale, width, unit, summary mode
//! 0xEDD5, charger_voltage, 0.01, u16, V, mean
//! ```
//!
//! Families are searched in load order, so an address defined by two families
//! resolves to the one loaded first.

use csv::{ReaderBuilder, Trim};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::error::{Result, VeError};
use crate::summary::SummaryMode;
use crate::vedirect::decoder::decode_hex_message;
use crate::vedirect::protocol::HexFrame;

const MPPT_TABLE: &str = include_str!("../tables/mppt_registers.csv");
const PHOENIX_INVERTER_TABLE: &str = include_str!("../tables/phoenix_inverter_registers.csv");

/// Integer encoding of a register value on the wire (little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    U8,
    U16,
    U32,
    S8,
    S16,
    S32,
    /// Strings and composite values this catalog cannot decode
    Unknown,
}

impl RegisterWidth {
    /// Parse a width code (`u8`, `s16`, ...). Anything unrecognized is `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "u8" => RegisterWidth::U8,
            "u16" => RegisterWidth::U16,
            "u32" => RegisterWidth::U32,
            "s8" => RegisterWidth::S8,
            "s16" => RegisterWidth::S16,
            "s32" => RegisterWidth::S32,
            _ => RegisterWidth::Unknown,
        }
    }

    /// Number of payload bytes this width occupies
    pub fn byte_len(self) -> Option<usize> {
        match self {
            RegisterWidth::U8 | RegisterWidth::S8 => Some(1),
            RegisterWidth::U16 | RegisterWidth::S16 => Some(2),
            RegisterWidth::U32 | RegisterWidth::S32 => Some(4),
            RegisterWidth::Unknown => None,
        }
    }
}

/// One register of a device family
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDefinition {
    pub address: u16,
    pub name: String,
    /// Multiply the raw value by this to get `unit`
    pub scale: Option<f64>,
    pub width: RegisterWidth,
    pub unit: String,
    /// How values of this register are folded into summary bins; `None` drops them
    pub summary_mode: Option<SummaryMode>,
}

impl RegisterDefinition {
    /// Decode this register's value from the start of a payload
    ///
    /// # Errors
    ///
    /// - `UnsupportedWidth` if the width is `Unknown`
    /// - `DataTooShort` if the payload is shorter than the width
    pub fn decode_payload(&self, payload: &[u8]) -> Result<i64> {
        let needed = self
            .width
            .byte_len()
            .ok_or(VeError::UnsupportedWidth(self.address))?;
        if payload.len() < needed {
            return Err(VeError::DataTooShort {
                address: self.address,
                needed,
                got: payload.len(),
            });
        }

        let value = match self.width {
            RegisterWidth::U8 => payload[0] as i64,
            RegisterWidth::S8 => payload[0] as i8 as i64,
            RegisterWidth::U16 => u16::from_le_bytes([payload[0], payload[1]]) as i64,
            RegisterWidth::S16 => i16::from_le_bytes([payload[0], payload[1]]) as i64,
            RegisterWidth::U32 => {
                u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as i64
            }
            RegisterWidth::S32 => {
                i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as i64
            }
            RegisterWidth::Unknown => return Err(VeError::UnsupportedWidth(self.address)),
        };
        Ok(value)
    }
}

/// A register value resolved from a VE.HEX message
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterValue<'a> {
    pub register: &'a RegisterDefinition,
    /// Raw integer as sent by the device
    pub value: i64,
}

impl RegisterValue<'_> {
    /// Value in the register's unit, applying its scale if it has one
    pub fn scaled(&self) -> f64 {
        match self.register.scale {
            Some(scale) => self.value as f64 * scale,
            None => self.value as f64,
        }
    }
}

#[derive(Debug, Clone)]
struct RegisterFamily {
    name: String,
    registers: Vec<RegisterDefinition>,
    by_address: HashMap<u16, usize>,
}

/// Immutable set of register tables, searched in load order
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    families: Vec<RegisterFamily>,
}

impl RegisterCatalog {
    /// Catalog with no families
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in families: MPPT charge controller, then Phoenix inverter
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        catalog.add_family("mppt", MPPT_TABLE)?;
        catalog.add_family("phoenix_inverter", PHOENIX_INVERTER_TABLE)?;
        Ok(catalog)
    }

    /// Append a family parsed from table text
    ///
    /// # Errors
    ///
    /// Returns `RegisterTable` on malformed rows or duplicate addresses.
    pub fn add_family(&mut self, name: &str, table: &str) -> Result<()> {
        let registers = parse_register_table(table)
            .map_err(|e| VeError::RegisterTable(format!("{}: {}", name, e)))?;

        let mut by_address = HashMap::with_capacity(registers.len());
        for (i, reg) in registers.iter().enumerate() {
            if by_address.insert(reg.address, i).is_some() {
                return Err(VeError::RegisterTable(format!(
                    "{}: duplicate register 0x{:04X}",
                    name, reg.address
                )));
            }
        }

        info!("Loaded {} registers for device family {}", registers.len(), name);
        self.families.push(RegisterFamily {
            name: name.to_string(),
            registers,
            by_address,
        });
        Ok(())
    }

    /// Append a family from a table file, named after the file stem
    pub fn add_family_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let table = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.add_family(&name, &table)
    }

    /// Names of the loaded families, in search order
    pub fn family_names(&self) -> Vec<&str> {
        self.families.iter().map(|f| f.name.as_str()).collect()
    }

    /// Total number of register definitions across all families
    pub fn len(&self) -> usize {
        self.families.iter().map(|f| f.registers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the first definition of `address` across families, in load order
    pub fn resolve(&self, address: u16) -> Option<&RegisterDefinition> {
        self.families
            .iter()
            .find_map(|f| f.by_address.get(&address).map(|&i| &f.registers[i]))
    }

    /// Resolve a validated VE.HEX frame to a named value
    ///
    /// # Errors
    ///
    /// - `UnknownRegister` if no family defines the frame's register
    /// - `DataTooShort` / `UnsupportedWidth` from decoding the payload
    pub fn decode(&self, frame: &HexFrame) -> Result<RegisterValue<'_>> {
        let register = self
            .resolve(frame.register)
            .ok_or(VeError::UnknownRegister(frame.register))?;
        let value = register.decode_payload(&frame.payload)?;
        Ok(RegisterValue { register, value })
    }

    /// Validate and resolve the hex text stored in an `_x` field
    pub fn decode_text(&self, text: &str) -> Result<RegisterValue<'_>> {
        let frame = decode_hex_message(text)?;
        self.decode(&frame)
    }
}

/// Parse table text into register definitions
///
/// Lines starting with `#` are comments. The summary mode column may be
/// omitted or empty.
pub fn parse_register_table(table: &str) -> Result<Vec<RegisterDefinition>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(table.as_bytes());

    let mut out = Vec::with_capacity(64);
    for row in reader.records() {
        let row = row?;
        if row.len() < 5 {
            return Err(VeError::RegisterTable(format!(
                "expected at least 5 columns, got {}: {:?}",
                row.len(),
                row
            )));
        }

        let address_text = row[0].trim_start_matches("0x").trim_start_matches("0X");
        let address = u16::from_str_radix(address_text, 16).map_err(|e| {
            VeError::RegisterTable(format!("bad address {:?}: {}", &row[0], e))
        })?;

        let scale = if row[2].is_empty() {
            None
        } else {
            Some(row[2].parse::<f64>().map_err(|e| {
                VeError::RegisterTable(format!("bad scale {:?} for 0x{:04X}: {}", &row[2], address, e))
            })?)
        };

        let summary_mode = match row.get(5) {
            None | Some("") => None,
            Some(mode) => Some(SummaryMode::from_str(mode)?),
        };

        out.push(RegisterDefinition {
            address,
            name: row[1].to_string(),
            scale,
            width: RegisterWidth::from_code(&row[3]),
            unit: row[4].to_string(),
            summary_mode,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vedirect::encoder::encode_hex_message;
    use crate::vedirect::protocol::VE_HEX_CMD_ASYNC;

    fn frame(register: u16, payload: &[u8]) -> HexFrame {
        HexFrame {
            command: VE_HEX_CMD_ASYNC,
            register,
            flags: 0,
            payload: payload.to_vec(),
            text: String::new(),
        }
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = RegisterCatalog::builtin().unwrap();
        assert_eq!(catalog.family_names(), vec!["mppt", "phoenix_inverter"]);
        assert!(catalog.len() > 50);

        let reg = catalog.resolve(0xEDD5).unwrap();
        assert_eq!(reg.name, "charger_voltage");
        assert_eq!(reg.width, RegisterWidth::U16);
        assert_eq!(reg.scale, Some(0.01));
        assert_eq!(reg.unit, "V");
        assert_eq!(reg.summary_mode, Some(SummaryMode::Mean));
    }

    #[test]
    fn test_resolve_searches_families_in_order() {
        let mut catalog = RegisterCatalog::new();
        catalog.add_family("first", "0x1000, alpha, , u8, ,\n").unwrap();
        catalog
            .add_family("second", "0x1000, beta, , u8, ,\n0x2000, gamma, , u16, ,\n")
            .unwrap();

        assert_eq!(catalog.resolve(0x1000).unwrap().name, "alpha");
        assert_eq!(catalog.resolve(0x2000).unwrap().name, "gamma");
        assert!(catalog.resolve(0x3000).is_none());
    }

    #[test]
    fn test_inverter_only_register_resolves() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let reg = catalog.resolve(0x2200).unwrap();
        assert_eq!(reg.name, "ac_out_voltage");
        assert_eq!(reg.width, RegisterWidth::S16);
    }

    #[test]
    fn test_parse_table_comments_and_optional_columns() {
        let table = "# comment line\n0xEDD5, charger_voltage, 0.01, u16, V, mean\n0104, group_id, , u8, \n";
        let regs = parse_register_table(table).unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[1].address, 0x0104);
        assert_eq!(regs[1].scale, None);
        assert_eq!(regs[1].summary_mode, None);
    }

    #[test]
    fn test_parse_table_rejects_bad_rows() {
        assert!(parse_register_table("0xZZZZ, x, , u8, ,\n").is_err());
        assert!(parse_register_table("0x0001, x, fast, u8, ,\n").is_err());
        assert!(parse_register_table("0x0001, x\n").is_err());
        assert!(parse_register_table("0x0001, x, , u8, , median\n").is_err());
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut catalog = RegisterCatalog::new();
        let result = catalog.add_family("dup", "0x0001, a, , u8, ,\n0x0001, b, , u8, ,\n");
        assert!(matches!(result, Err(VeError::RegisterTable(_))));
    }

    #[test]
    fn test_unknown_width_code() {
        assert_eq!(RegisterWidth::from_code("u64"), RegisterWidth::Unknown);
        assert_eq!(RegisterWidth::Unknown.byte_len(), None);
    }

    #[test]
    fn test_decode_widths() {
        let mut catalog = RegisterCatalog::new();
        catalog
            .add_family(
                "t",
                "0x0001, a, , u8, ,\n0x0002, b, , s8, ,\n0x0003, c, , u16, ,\n\
                 0x0004, d, , s16, ,\n0x0005, e, , u32, ,\n0x0006, f, , s32, ,\n",
            )
            .unwrap();

        assert_eq!(catalog.decode(&frame(1, &[0xFF])).unwrap().value, 255);
        assert_eq!(catalog.decode(&frame(2, &[0xFF])).unwrap().value, -1);
        assert_eq!(catalog.decode(&frame(3, &[0x34, 0x12])).unwrap().value, 0x1234);
        assert_eq!(catalog.decode(&frame(4, &[0x00, 0x80])).unwrap().value, -32768);
        assert_eq!(
            catalog.decode(&frame(5, &[0xFF, 0xFF, 0xFF, 0xFF])).unwrap().value,
            4_294_967_295
        );
        assert_eq!(catalog.decode(&frame(6, &[0xFE, 0xFF, 0xFF, 0xFF])).unwrap().value, -2);
    }

    #[test]
    fn test_decode_errors() {
        let catalog = RegisterCatalog::builtin().unwrap();

        let err = catalog.decode(&frame(0x4242, &[0x01])).unwrap_err();
        assert!(matches!(err, VeError::UnknownRegister(0x4242)));

        let err = catalog.decode(&frame(0x0100, &[0x01, 0x02])).unwrap_err();
        assert!(matches!(err, VeError::DataTooShort { needed: 4, got: 2, .. }));

        let err = catalog.decode(&frame(0x010A, &[0x41, 0x42])).unwrap_err();
        assert!(matches!(err, VeError::UnsupportedWidth(0x010A)));

        let err = catalog.decode(&frame(0x0104, &[])).unwrap_err();
        assert!(matches!(err, VeError::DataTooShort { needed: 1, got: 0, .. }));
    }

    #[test]
    fn test_decode_text_and_scale() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let value = catalog.decode_text("0AD5ED00E204A3").unwrap();
        assert_eq!(value.register.name, "charger_voltage");
        assert_eq!(value.value, 1250);
        assert!((value.scaled() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_text_from_encoded_line() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let line = encode_hex_message(VE_HEX_CMD_ASYNC, 0xEDDB, 0, &(-1234i16).to_le_bytes());
        let text = format!("0{}", line.trim_start_matches(':').trim_end());
        let value = catalog.decode_text(&text).unwrap();
        assert_eq!(value.register.name, "charger_internal_temperature");
        assert_eq!(value.value, -1234);
    }

    #[test]
    fn test_add_family_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# custom").unwrap();
        writeln!(file, "0x9000, custom_reading, 0.1, u16, A, max").unwrap();
        file.flush().unwrap();

        let mut catalog = RegisterCatalog::builtin().unwrap();
        catalog.add_family_file(file.path()).unwrap();
        assert_eq!(catalog.family_names().len(), 3);
        assert_eq!(catalog.resolve(0x9000).unwrap().summary_mode, Some(SummaryMode::Max));
    }
}
