//! Virtual bridge actor task
//!
//! Owns a [`VirtualBridge`] and serves it on a UDP socket. Replies go back to
//! whichever endpoint sent the request. A command channel allows tests to
//! inject faults and inspect units while the task runs.

use std::io;
use std::net::SocketAddr;

use ppb_protocol::{Address, DataPacket, Request};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ppb::Faults;
use crate::VirtualBridge;

/// Commands that can be sent to a running virtual bridge
#[derive(Debug)]
pub enum VirtualBridgeCommand {
    /// Replace the faults of one unit
    SetFaults {
        /// Unit address
        address: Address,
        /// New faults
        faults: Faults,
    },
    /// Fetch the test sequence a unit has received
    StreamReceived {
        /// Unit address
        address: Address,
        /// Channel to send back the packets
        response: oneshot::Sender<Vec<DataPacket>>,
    },
    /// Fetch the raw functional requests seen so far
    FunctionalRequests {
        /// Channel to send back the requests
        response: oneshot::Sender<Vec<Request>>,
    },
    /// Shutdown the virtual bridge task
    Shutdown,
}

/// Handle to a bridge spawned on loopback
#[derive(Debug)]
pub struct VirtualBridgeHandle {
    /// Address the bridge listens on
    pub local_addr: SocketAddr,
    /// Command channel
    pub cmd_tx: mpsc::Sender<VirtualBridgeCommand>,
    /// Task handle
    pub task: JoinHandle<io::Result<()>>,
}

/// Run the virtual bridge task until shutdown
pub async fn run_virtual_bridge_task(
    socket: UdpSocket,
    mut bridge: VirtualBridge,
    mut cmd_rx: mpsc::Receiver<VirtualBridgeCommand>,
) -> io::Result<()> {
    let mut buf = [0u8; 1500];
    info!("Starting virtual bridge on {}", socket.local_addr()?);

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (n, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Virtual bridge receive failed: {}", e);
                        continue;
                    }
                };
                debug!("Virtual bridge received {} bytes from {}: {:02X?}", n, from, &buf[..n]);

                for reply in bridge.handle_datagram(&buf[..n]) {
                    if let Err(e) = socket.send_to(&reply, from).await {
                        warn!("Virtual bridge send to {} failed: {}", from, e);
                    }
                    // Let the receiver drain its socket between packets
                    tokio::task::yield_now().await;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualBridgeCommand::SetFaults { address, faults }) => {
                        if !bridge.set_faults(address, faults) {
                            warn!("Virtual bridge has no unit at {}", address);
                        }
                    }
                    Some(VirtualBridgeCommand::StreamReceived { address, response }) => {
                        let packets = bridge
                            .unit(address)
                            .map(|unit| unit.stream().to_vec())
                            .unwrap_or_default();
                        let _ = response.send(packets);
                    }
                    Some(VirtualBridgeCommand::FunctionalRequests { response }) => {
                        let _ = response.send(bridge.functional_requests().to_vec());
                    }
                    Some(VirtualBridgeCommand::Shutdown) | None => {
                        info!("Virtual bridge shutting down");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Bind a loopback socket and spawn the bridge task on it
pub async fn spawn_loopback_bridge(bridge: VirtualBridge) -> io::Result<VirtualBridgeHandle> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let local_addr = socket.local_addr()?;
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let task = tokio::spawn(run_virtual_bridge_task(socket, bridge, cmd_rx));
    Ok(VirtualBridgeHandle {
        local_addr,
        cmd_tx,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppb_protocol::{EncodeFrame, PpbResponse, TechCommand};

    #[tokio::test]
    async fn test_serves_requests_over_udp() {
        let handle = spawn_loopback_bridge(VirtualBridge::with_units([Address(0x0001)]))
            .await
            .unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let request = TechCommand::Tc.build_request(Address(0x0001), 0, [0; 3]);
        client
            .send_to(&request.encode(), handle.local_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, handle.local_addr);
        assert!(PpbResponse::decode(&buf[..n]).unwrap().is_ok());

        handle
            .cmd_tx
            .send(VirtualBridgeCommand::Shutdown)
            .await
            .unwrap();
        handle.task.await.unwrap().unwrap();
    }
}
