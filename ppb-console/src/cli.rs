use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use ppb_protocol::{Address, FuDirection, TechCommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "ppb", about = "Run PPB commands through the UDP bridge", version)]
pub struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/ppb-link/settings.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Bridge IP address
    #[arg(long)]
    pub ip: Option<IpAddr>,
    /// Bridge UDP port
    #[arg(long)]
    pub port: Option<u16>,
    /// Unit address, hex (0x0001) or decimal
    #[arg(long)]
    pub address: Option<Address>,
    /// Request period
    #[arg(long)]
    pub period: Option<u8>,
    /// Two payload bytes as hex for fu-tx / fu-rx (e.g. ABCD)
    #[arg(long, default_value = "0000")]
    pub data: String,
    /// Run against a simulated bridge on loopback
    #[arg(long, default_value_t = false)]
    pub simulate: bool,
    /// Print every datagram exchanged with the bridge
    #[arg(long, default_value_t = false)]
    pub traffic: bool,
    /// Write the effective settings back to the settings file
    #[arg(long, default_value_t = false)]
    pub save: bool,
    /// Commands to run in order (TS, VERS, PRBS_S2M, fu-tx, ...)
    pub commands: Vec<String>,
}

/// One step of a console run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Catalog command, completion awaited
    Command(TechCommand),
    /// Raw functional request, not acknowledged
    Functional(FuDirection),
}

impl Step {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fu-tx" | "fu_tx" => Ok(Step::Functional(FuDirection::Transmit)),
            "fu-rx" | "fu_rx" => Ok(Step::Functional(FuDirection::Receive)),
            _ => name
                .parse::<TechCommand>()
                .map(Step::Command)
                .map_err(|e| anyhow!(e)),
        }
    }
}

/// Parse "ABCD" into two bytes
pub fn parse_data(hex: &str) -> Result<[u8; 2]> {
    let hex = hex.trim_start_matches("0x");
    if hex.len() != 4 {
        bail!("expected 4 hex digits, got {:?}", hex);
    }
    let hi = u8::from_str_radix(&hex[..2], 16)?;
    let lo = u8::from_str_radix(&hex[2..], 16)?;
    Ok([hi, lo])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        assert_eq!(Step::parse("vers").unwrap(), Step::Command(TechCommand::Vers));
        assert_eq!(
            Step::parse("FU-TX").unwrap(),
            Step::Functional(FuDirection::Transmit)
        );
        assert!(Step::parse("reboot").is_err());
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(parse_data("ABCD").unwrap(), [0xAB, 0xCD]);
        assert_eq!(parse_data("0x0102").unwrap(), [0x01, 0x02]);
        assert!(parse_data("123").is_err());
        assert!(parse_data("zz00").is_err());
    }

    #[test]
    fn test_cli_arguments() {
        let cli = Cli::parse_from([
            "ppb", "--ip", "10.0.0.2", "--address", "0x0004", "--simulate", "ts", "vers",
        ]);
        assert_eq!(cli.address, Some(Address(0x0004)));
        assert!(cli.simulate);
        assert_eq!(cli.commands, vec!["ts", "vers"]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn data_hex_parses_back(hi: u8, lo: u8) {
                prop_assert_eq!(parse_data(&format!("{:02X}{:02x}", hi, lo)).unwrap(), [hi, lo]);
            }
        }
    }
}
