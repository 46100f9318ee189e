//! UDP transport task
//!
//! Moves datagrams between one UDP socket and the engine actor. Outgoing
//! datagrams arrive from the actor's outbound channel; every received
//! datagram is forwarded to the actor as [`EngineCommand::Datagram`].
//! The two directions never wait on each other.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::actor::EngineCommand;
use crate::engine::Outgoing;
use crate::error::EngineError;
use crate::events::Target;

/// Largest datagram accepted from the bridge
pub const MAX_DATAGRAM: usize = 1500;

/// Bind the engine's socket with broadcast enabled
///
/// Use `"0.0.0.0:0"` to let the OS pick the port.
pub async fn bind_socket(addr: &str) -> Result<UdpSocket, EngineError> {
    let bind_addr: SocketAddr = addr
        .parse()
        .map_err(|_| EngineError::InvalidSocketAddress(addr.to_string()))?;
    debug!(addr = %bind_addr, "Binding UDP socket");

    let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
        error!(addr = %bind_addr, error = %e, "Failed to bind UDP socket");
        EngineError::Io(e)
    })?;
    socket.set_broadcast(true)?;

    let local_addr = socket.local_addr()?;
    debug!(local_addr = %local_addr, "UDP socket bound");
    Ok(socket)
}

/// Resolve a target to a concrete socket address
pub fn destination(target: Target) -> SocketAddr {
    match target {
        Target::Unicast(addr) => addr,
        Target::Broadcast(port) => SocketAddr::from((Ipv4Addr::BROADCAST, port)),
    }
}

/// Run the transport until the actor drops its outbound sender
///
/// Sending and receiving run as separate loops over one socket, so outgoing
/// datagrams keep flowing while the receive side waits for room in the
/// actor's command channel.
pub async fn run_udp_transport(
    socket: UdpSocket,
    outbound_rx: mpsc::Receiver<Outgoing>,
    engine_tx: mpsc::Sender<EngineCommand>,
) {
    let socket = Arc::new(socket);
    let receiver = tokio::spawn(receive_loop(Arc::clone(&socket), engine_tx));

    send_loop(&socket, outbound_rx).await;

    receiver.abort();
    let _ = receiver.await;
    debug!("UDP transport stopped");
}

async fn send_loop(socket: &UdpSocket, mut outbound_rx: mpsc::Receiver<Outgoing>) {
    while let Some(outgoing) = outbound_rx.recv().await {
        let dest = destination(outgoing.target);
        trace!(remote = %dest, bytes = outgoing.data.len(), "Sending datagram");
        if let Err(e) = socket.send_to(&outgoing.data, dest).await {
            warn!(remote = %dest, error = %e, "Failed to send datagram");
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, engine_tx: mpsc::Sender<EngineCommand>) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                trace!(remote = %from, bytes = n, "Received datagram");
                let cmd = EngineCommand::Datagram {
                    data: buf[..n].to_vec(),
                    from,
                };
                if engine_tx.send(cmd).await.is_err() {
                    break;
                }
            }
            // ICMP port-unreachable surfaces here on some platforms
            Err(e) => warn!(error = %e, "Failed to receive datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwards_both_directions() {
        let socket = bind_socket("127.0.0.1:0").await.unwrap();
        let local = socket.local_addr().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (out_tx, out_rx) = mpsc::channel(8);
        let (engine_tx, mut engine_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_udp_transport(socket, out_rx, engine_tx));

        out_tx
            .send(Outgoing {
                data: vec![1, 2, 3, 4],
                target: Target::Unicast(peer_addr),
            })
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);
        assert_eq!(from, local);

        peer.send_to(&[9, 8, 7, 6], local).await.unwrap();
        match engine_rx.recv().await.unwrap() {
            EngineCommand::Datagram { data, from } => {
                assert_eq!(data, vec![9, 8, 7, 6]);
                assert_eq!(from, peer_addr);
            }
            other => panic!("unexpected command {:?}", other),
        }

        drop(out_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sends_while_actor_is_not_reading() {
        let socket = bind_socket("127.0.0.1:0").await.unwrap();
        let local = socket.local_addr().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (out_tx, out_rx) = mpsc::channel(1);
        let (engine_tx, engine_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_udp_transport(socket, out_rx, engine_tx));

        // Fill the command channel; nobody reads it during the burst
        for i in 0..4u8 {
            peer.send_to(&[i, 0, 0, 0], local).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let burst = async {
            for i in 0..64u8 {
                out_tx
                    .send(Outgoing {
                        data: vec![i, 1, 2, 3],
                        target: Target::Unicast(peer_addr),
                    })
                    .await
                    .unwrap();
            }
            let mut buf = [0u8; 16];
            for i in 0..64u8 {
                let (n, _) = peer.recv_from(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], &[i, 1, 2, 3]);
            }
        };
        tokio::time::timeout(Duration::from_secs(5), burst)
            .await
            .expect("outgoing datagrams stalled behind inbound ones");

        drop(engine_rx);
        drop(out_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_bad_bind_address() {
        assert!(matches!(
            bind_socket("not-an-address").await,
            Err(EngineError::InvalidSocketAddress(_))
        ));
    }

    #[test]
    fn test_broadcast_destination() {
        assert_eq!(
            destination(Target::Broadcast(5000)),
            "255.255.255.255:5000".parse::<SocketAddr>().unwrap()
        );
    }
}
