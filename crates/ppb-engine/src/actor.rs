//! Engine Actor
//!
//! This module runs the [`Engine`] inside a single async task. Every
//! mutation of engine state happens here: caller requests, datagrams from the
//! transport, queue drain ticks and context deadlines are all delivered as
//! branches of one `select!` loop, so the engine itself needs no locking.
//!
//! # Architecture
//!
//! The actor receives commands through a channel and emits two streams:
//! - Outgoing datagrams, consumed by the UDP transport task
//! - Engine events (traffic, state changes, results), consumed by observers
//!
//! # Example
//!
//! ```rust,ignore
//! use ppb_engine::actor::{run_engine_actor, EngineCommand};
//! use ppb_engine::Engine;
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(256);
//! let (out_tx, out_rx) = mpsc::channel(256);
//! let (event_tx, mut event_rx) = mpsc::channel(256);
//!
//! tokio::spawn(run_engine_actor(Engine::new(), cmd_rx, out_tx, event_tx));
//! ```

use std::net::SocketAddr;

use ppb_protocol::{Address, FuDirection, TechCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{DispatchOutcome, Engine, Outgoing, RequestParams};
use crate::error::DispatchError;
use crate::events::EngineEvent;
use crate::state::PpbState;

/// Snapshot of one address, for queries across the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressStatus {
    /// Current state
    pub state: PpbState,
    /// Commands waiting
    pub queued: usize,
    /// Command in flight
    pub in_flight: Option<TechCommand>,
    /// Address currently holding the dialog gate
    pub gate_holder: Option<Address>,
    /// Recorded bridge endpoint
    pub endpoint: Option<SocketAddr>,
}

/// Commands sent to the engine actor
#[derive(Debug)]
pub enum EngineCommand {
    /// Record a bridge endpoint and start the handshake
    Connect {
        /// Unit address (one bit)
        address: Address,
        /// Bridge endpoint
        endpoint: SocketAddr,
        /// Dispatch result
        response: oneshot::Sender<Result<DispatchOutcome, DispatchError>>,
    },

    /// Run a catalog command
    Execute {
        /// Command to run
        command: TechCommand,
        /// Target address
        address: Address,
        /// Period and auxiliary bytes
        params: RequestParams,
        /// Dispatch result
        response: oneshot::Sender<Result<DispatchOutcome, DispatchError>>,
    },

    /// Send a fire-and-forget functional request
    SendFunctional {
        /// Transmit or receive
        direction: FuDirection,
        /// Target address
        address: Address,
        /// Repetition period
        period: u8,
        /// Payload bytes
        data: [u8; 2],
        /// Send result
        response: oneshot::Sender<Result<(), DispatchError>>,
    },

    /// Cancel everything and forget all endpoints
    Disconnect,

    /// Datagram received by the transport
    Datagram {
        /// Raw bytes
        data: Vec<u8>,
        /// Sender
        from: SocketAddr,
    },

    /// Query the status of one address
    QueryState {
        /// Address to query
        address: Address,
        /// Channel to send back the snapshot
        response: oneshot::Sender<AddressStatus>,
    },

    /// Shutdown the actor
    Shutdown,
}

/// Run the engine actor until shutdown or until every sender is dropped
pub async fn run_engine_actor(
    mut engine: Engine,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    out_tx: mpsc::Sender<Outgoing>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    info!("Engine actor started");

    let mut tick = interval(engine.config().tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let deadline = engine.next_deadline();

        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    EngineCommand::Connect { address, endpoint, response } => {
                        let result = engine.connect(address, endpoint, Instant::now());
                        report_rejection(&mut engine, address, &result);
                        let _ = response.send(result);
                    }

                    EngineCommand::Execute { command, address, params, response } => {
                        let result = engine.execute(command, address, params, Instant::now());
                        report_rejection(&mut engine, address, &result);
                        let _ = response.send(result);
                    }

                    EngineCommand::SendFunctional { direction, address, period, data, response } => {
                        let result = engine.send_functional(direction, address, period, data);
                        report_rejection(&mut engine, address, &result);
                        let _ = response.send(result);
                    }

                    EngineCommand::Disconnect => engine.disconnect(),

                    EngineCommand::Datagram { data, from } => {
                        engine.handle_datagram(&data, from, Instant::now());
                    }

                    EngineCommand::QueryState { address, response } => {
                        let status = AddressStatus {
                            state: engine.state(address),
                            queued: engine.queue_len(address),
                            in_flight: engine.context(address).map(|ctx| ctx.command),
                            gate_holder: engine.gate().holder(),
                            endpoint: engine.endpoint(address),
                        };
                        let _ = response.send(status);
                    }

                    EngineCommand::Shutdown => {
                        info!("Engine actor shutting down");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                engine.drain_queues(Instant::now());
            }

            _ = wait_for(deadline) => {
                engine.expire_timers(Instant::now());
            }
        }

        flush(&mut engine, &out_tx, &event_tx).await;
    }

    flush(&mut engine, &out_tx, &event_tx).await;
    info!("Engine actor stopped");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn report_rejection<T>(engine: &mut Engine, address: Address, result: &Result<T, DispatchError>) {
    if let Err(err) = result {
        warn!("Rejected request for {}: {}", address, err);
        engine.push_event(EngineEvent::Error {
            address: Some(address),
            message: err.to_string(),
        });
    }
}

/// Forward buffered datagrams to the transport, then events to observers
///
/// Traffic events are dropped rather than awaited when the observer falls
/// behind; a 256-packet stream must not stall the engine.
async fn flush(
    engine: &mut Engine,
    out_tx: &mpsc::Sender<Outgoing>,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    for datagram in engine.drain_outgoing() {
        if out_tx.send(datagram).await.is_err() {
            warn!("Transport closed, dropping outgoing datagram");
        }
    }

    for event in engine.drain_events() {
        if event.is_traffic() {
            if let Err(err) = event_tx.try_send(event) {
                debug!("Traffic event not delivered: {}", err);
            }
        } else {
            let _ = event_tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Target;
    use ppb_protocol::{DataPacket, EncodeFrame, PpbResponse};
    use std::time::Duration;

    const A1: Address = Address(0x0001);

    fn bridge() -> SocketAddr {
        "10.0.0.2:5000".parse().unwrap()
    }

    struct Harness {
        cmd_tx: mpsc::Sender<EngineCommand>,
        out_rx: mpsc::Receiver<Outgoing>,
        event_rx: mpsc::Receiver<EngineEvent>,
        actor: tokio::task::JoinHandle<()>,
    }

    fn spawn_actor() -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(512);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let actor = tokio::spawn(run_engine_actor(Engine::new(), cmd_rx, out_tx, event_tx));
        Harness {
            cmd_tx,
            out_rx,
            event_rx,
            actor,
        }
    }

    async fn next_completion(event_rx: &mut mpsc::Receiver<EngineEvent>) -> (bool, String) {
        loop {
            match event_rx.recv().await.expect("event stream closed") {
                EngineEvent::CommandCompleted {
                    success, message, ..
                } => return (success, message),
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_through_actor() {
        let mut h = spawn_actor();

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(EngineCommand::Connect {
                address: A1,
                endpoint: bridge(),
                response: tx,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(DispatchOutcome::Dispatched));

        let request = h.out_rx.recv().await.unwrap();
        assert_eq!(request.target, Target::Unicast(bridge()));
        assert_eq!(request.data[2], TechCommand::Ts.opcode());

        let ack = PpbResponse {
            address: A1,
            status: 0,
        };
        h.cmd_tx
            .send(EngineCommand::Datagram {
                data: ack.encode(),
                from: bridge(),
            })
            .await
            .unwrap();
        for i in 0..9u8 {
            h.cmd_tx
                .send(EngineCommand::Datagram {
                    data: DataPacket::new([i, i], i).encode(),
                    from: bridge(),
                })
                .await
                .unwrap();
        }

        let (success, _) = next_completion(&mut h.event_rx).await;
        assert!(success);

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(EngineCommand::QueryState {
                address: A1,
                response: tx,
            })
            .await
            .unwrap();
        let status = rx.await.unwrap();
        assert_eq!(status.state, PpbState::Ready);
        assert_eq!(status.gate_holder, None);
        assert_eq!(status.endpoint, Some(bridge()));

        h.cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        h.actor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_without_traffic() {
        let mut h = spawn_actor();

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(EngineCommand::Connect {
                address: A1,
                endpoint: bridge(),
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        let started = Instant::now();
        let (success, message) = next_completion(&mut h.event_rx).await;
        assert!(!success);
        assert!(message.contains("no acknowledgement"), "{}", message);
        // Initial attempt plus three retries, one second each
        assert!(started.elapsed() >= Duration::from_secs(4));

        let mut requests = 0;
        while h.out_rx.try_recv().is_ok() {
            requests += 1;
        }
        assert_eq!(requests, 4);

        drop(h.cmd_tx);
        h.actor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_reported() {
        let mut h = spawn_actor();

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(EngineCommand::Execute {
                command: TechCommand::Vers,
                address: A1,
                params: RequestParams::default(),
                response: tx,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Err(DispatchError::NoEndpoint(A1)));

        let event = h.event_rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::Error { address: Some(a), .. } if a == A1));

        h.cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        h.actor.await.unwrap();
    }
}
