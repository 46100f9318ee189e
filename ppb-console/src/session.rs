//! One console run: connect, execute steps in order, report results

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ppb_engine::{EngineConfig, EngineEvent, PpbController, RequestParams};
use ppb_protocol::{Address, CommandData, SequenceReport, TechCommand};
use ppb_sim::{spawn_loopback_bridge, VirtualBridge, VirtualBridgeCommand, VirtualBridgeHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::Step;

/// Longest wait for a single command to finish
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the session sends its requests
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub ip: IpAddr,
    pub port: u16,
    pub address: Address,
    pub period: u8,
    pub data: [u8; 2],
}

pub struct Session {
    controller: PpbController,
    events: mpsc::Receiver<EngineEvent>,
    target: SessionTarget,
    simulator: Option<VirtualBridgeHandle>,
    show_traffic: bool,
}

impl Session {
    /// Start the engine, optionally against a loopback simulator
    pub async fn start(
        mut config: EngineConfig,
        mut target: SessionTarget,
        simulate: bool,
        show_traffic: bool,
    ) -> Result<Self> {
        let simulator = if simulate {
            let handle = spawn_loopback_bridge(VirtualBridge::with_units(target.address.devices()))
                .await
                .context("Failed to start simulated bridge")?;
            info!("Simulated bridge listening on {}", handle.local_addr);
            target.ip = handle.local_addr.ip();
            target.port = handle.local_addr.port();
            config.bind_address = "127.0.0.1:0".to_string();
            Some(handle)
        } else {
            None
        };

        let mut controller = PpbController::new();
        let events = controller.start(config).await?;
        if let Some(local) = controller.local_addr() {
            info!("Engine bound to {}", local);
        }

        Ok(Self {
            controller,
            events,
            target,
            simulator,
            show_traffic,
        })
    }

    /// Run the connection handshake
    pub async fn connect(&mut self) -> Result<()> {
        let SessionTarget { ip, port, address, .. } = self.target;
        println!("Connecting to {} via {}:{}", address, ip, port);
        self.controller.connect(address, ip, port).await?;
        if !self.await_completion(TechCommand::Ts).await? {
            bail!("Could not connect to {}", address);
        }
        Ok(())
    }

    /// Run one step; returns whether it succeeded
    pub async fn run(&mut self, step: Step) -> Result<bool> {
        let SessionTarget {
            address,
            period,
            data,
            ..
        } = self.target;
        match step {
            Step::Command(command) => {
                let params = RequestParams {
                    period,
                    aux: [data[0], data[1], 0],
                };
                let outcome = self.controller.execute(command, address, params).await?;
                debug!("{} dispatch: {:?}", command, outcome);
                self.await_completion(command).await
            }
            Step::Functional(direction) => {
                self.controller
                    .send_functional(direction, address, period, data)
                    .await?;
                println!("{:?} functional request sent to {}", direction, address);
                Ok(true)
            }
        }
    }

    /// Disconnect and stop every task
    pub async fn finish(mut self) -> Result<()> {
        self.controller.disconnect().await?;
        self.controller.shutdown().await;
        if let Some(simulator) = self.simulator.take() {
            let _ = simulator.cmd_tx.send(VirtualBridgeCommand::Shutdown).await;
            match simulator.task.await {
                Ok(Err(e)) => warn!("Simulated bridge failed: {}", e),
                Err(e) => warn!("Simulated bridge task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }

    async fn await_completion(&mut self, command: TechCommand) -> Result<bool> {
        let address = self.target.address;
        let show_traffic = self.show_traffic;
        let wait = async {
            while let Some(event) = self.events.recv().await {
                match event {
                    EngineEvent::CommandCompleted {
                        address: a,
                        command: c,
                        success,
                        message,
                    } if a == address && c == command => {
                        let verdict = if success { "ok" } else { "FAILED" };
                        println!("{} {}: {}", command, verdict, message);
                        return Some(success);
                    }
                    EngineEvent::DataReady { data, .. } => println!("  {}", describe_data(&data)),
                    EngineEvent::SequenceAnalyzed { report, .. } => {
                        for line in describe_report(&report) {
                            println!("  {}", line);
                        }
                    }
                    EngineEvent::CommandProgress {
                        received, expected, ..
                    } => debug!("{} progress {}/{}", command, received, expected),
                    EngineEvent::Error { address, message } => match address {
                        Some(a) => warn!("{}: {}", a, message),
                        None => warn!("{}", message),
                    },
                    EngineEvent::DatagramOut { data, target } if show_traffic => {
                        println!("  -> {:?} {:02X?}", target, data)
                    }
                    EngineEvent::DatagramIn { data, from } if show_traffic => {
                        println!("  <- {} {:02X?}", from, data)
                    }
                    other => debug!("{:?}", other),
                }
            }
            None
        };

        match tokio::time::timeout(COMPLETION_TIMEOUT, wait).await {
            Ok(Some(success)) => Ok(success),
            Ok(None) => bail!("Engine stopped while waiting for {}", command),
            Err(_) => bail!("{} did not finish within {:?}", command, COMPLETION_TIMEOUT),
        }
    }
}

/// One-line rendering of command data
pub fn describe_data(data: &CommandData) -> String {
    match data {
        CommandData::Status { packets } => {
            let bytes: Vec<String> = packets
                .iter()
                .map(|p| format!("{:02X}{:02X}", p.data[0], p.data[1]))
                .collect();
            format!("status ({} packets): {}", packets.len(), bytes.join(" "))
        }
        CommandData::Version { crc32 } => format!("firmware version 0x{:08X}", crc32),
        CommandData::Checksum { value } => format!("firmware checksum 0x{:08X}", value),
        CommandData::DroppedPackets { count } => format!("dropped packets: {}", count),
        CommandData::BitErrors { kind, value } => format!("{:?} bit errors: {:.6}", kind, value),
        CommandData::PrbsSent { packets } => format!("test sequence sent: {} packets", packets.len()),
        CommandData::PrbsReceived {
            packets,
            expected,
            parse_errors,
        } => format!(
            "test sequence received: {} of {} packets, {} parse errors",
            packets.len(),
            expected,
            parse_errors
        ),
    }
}

/// Multi-line rendering of a sequence comparison
pub fn describe_report(report: &SequenceReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "sequence: {} sent, {} received, {} matched",
            report.sent, report.received, report.matched
        ),
        format!(
            "lost {} ({:.2}%), corrupted {}, duplicates {}, out of order {}, unknown {}",
            report.lost,
            report.loss_ratio() * 100.0,
            report.corrupted,
            report.duplicates,
            report.out_of_order,
            report.unknown
        ),
        format!(
            "bit errors {} (BER {:.3e})",
            report.bit_errors,
            report.bit_error_rate()
        ),
    ];
    if !report.lost_counters.is_empty() {
        let shown: Vec<String> = report
            .lost_counters
            .iter()
            .take(16)
            .map(|c| c.to_string())
            .collect();
        let more = report.lost_counters.len().saturating_sub(16);
        let suffix = if more > 0 {
            format!(" (+{} more)", more)
        } else {
            String::new()
        };
        lines.push(format!("lost counters: {}{}", shown.join(", "), suffix));
    }
    lines
}
