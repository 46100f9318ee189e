//! Controller facade
//!
//! [`PpbController`] is the entry point for applications. It owns the
//! channels to the engine actor and offers one async method per caller
//! operation. Calls made before [`PpbController::start`] are parked in
//! arrival order and replayed once the engine runs.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};

use ppb_protocol::{Address, FuDirection, TechCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actor::{run_engine_actor, AddressStatus, EngineCommand};
use crate::engine::{DispatchOutcome, Engine, EngineConfig, Outgoing, RequestParams};
use crate::error::{ControllerError, DispatchError};
use crate::events::EngineEvent;
use crate::state::PpbState;
use crate::transport::{bind_socket, run_udp_transport};

/// Caller operation waiting for the engine to start
#[derive(Debug, Clone)]
enum PendingCall {
    Connect {
        address: Address,
        endpoint: SocketAddr,
    },
    Execute {
        command: TechCommand,
        address: Address,
        params: RequestParams,
    },
    Functional {
        direction: FuDirection,
        address: Address,
        period: u8,
        data: [u8; 2],
    },
}

/// Channels of an engine started without a socket
///
/// The embedder moves `outgoing` datagrams onto its own transport and feeds
/// received datagrams back through `commands` as
/// [`EngineCommand::Datagram`].
#[derive(Debug)]
pub struct EngineIo {
    /// Engine events
    pub events: mpsc::Receiver<EngineEvent>,
    /// Datagrams to send
    pub outgoing: mpsc::Receiver<Outgoing>,
    /// Command channel into the actor
    pub commands: mpsc::Sender<EngineCommand>,
}

/// Facade over the engine actor and its UDP transport
#[derive(Debug, Default)]
pub struct PpbController {
    cmd_tx: Option<mpsc::Sender<EngineCommand>>,
    pending: VecDeque<PendingCall>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl PpbController {
    /// Create a controller; nothing runs until [`start`](Self::start)
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine is running
    pub fn is_started(&self) -> bool {
        self.cmd_tx.is_some()
    }

    /// Local address of the UDP socket, once started with one
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the UDP socket, spawn the engine and return its event stream
    pub async fn start(
        &mut self,
        config: EngineConfig,
    ) -> Result<mpsc::Receiver<EngineEvent>, ControllerError> {
        if self.is_started() {
            return Err(ControllerError::AlreadyStarted);
        }

        let socket = bind_socket(&config.bind_address).await?;
        self.local_addr = socket.local_addr().ok();

        let io = self.spawn_engine(config);
        let transport = tokio::spawn(run_udp_transport(socket, io.outgoing, io.commands));
        self.tasks.push(transport);

        info!(
            "PPB controller started on {}",
            self.local_addr
                .map_or_else(|| "unknown address".to_string(), |a| a.to_string())
        );
        self.replay_pending().await;
        Ok(io.events)
    }

    /// Spawn the engine without a socket
    pub async fn start_with_io(&mut self, config: EngineConfig) -> Result<EngineIo, ControllerError> {
        if self.is_started() {
            return Err(ControllerError::AlreadyStarted);
        }
        let io = self.spawn_engine(config);
        self.replay_pending().await;
        Ok(io)
    }

    /// Record the bridge endpoint for `address` and run the handshake
    pub async fn connect(
        &mut self,
        address: Address,
        ip: IpAddr,
        port: u16,
    ) -> Result<DispatchOutcome, ControllerError> {
        let endpoint = SocketAddr::new(ip, port);
        if !self.is_started() {
            return Ok(self.park(PendingCall::Connect { address, endpoint }));
        }
        Ok(self
            .request(|response| EngineCommand::Connect {
                address,
                endpoint,
                response,
            })
            .await??)
    }

    /// Run a catalog command
    pub async fn execute(
        &mut self,
        command: TechCommand,
        address: Address,
        params: RequestParams,
    ) -> Result<DispatchOutcome, ControllerError> {
        if !self.is_started() {
            return Ok(self.park(PendingCall::Execute {
                command,
                address,
                params,
            }));
        }
        Ok(self
            .request(|response| EngineCommand::Execute {
                command,
                address,
                params,
                response,
            })
            .await??)
    }

    /// Run a command given by name (`"VERS"`, `"prbs-s2m"`, ...)
    pub async fn execute_named(
        &mut self,
        name: &str,
        address: Address,
        params: RequestParams,
    ) -> Result<DispatchOutcome, ControllerError> {
        let command: TechCommand = name.parse().map_err(DispatchError::from)?;
        self.execute(command, address, params).await
    }

    /// Send a raw functional transmit request
    pub async fn send_fu_transmit(
        &mut self,
        address: Address,
        period: u8,
        data: [u8; 2],
    ) -> Result<(), ControllerError> {
        self.send_functional(FuDirection::Transmit, address, period, data)
            .await
    }

    /// Send a raw functional receive request
    pub async fn send_fu_receive(
        &mut self,
        address: Address,
        period: u8,
        data: [u8; 2],
    ) -> Result<(), ControllerError> {
        self.send_functional(FuDirection::Receive, address, period, data)
            .await
    }

    /// Cancel all work and forget every endpoint
    pub async fn disconnect(&mut self) -> Result<(), ControllerError> {
        let Some(tx) = &self.cmd_tx else {
            debug!("Dropping {} parked calls", self.pending.len());
            self.pending.clear();
            return Ok(());
        };
        tx.send(EngineCommand::Disconnect)
            .await
            .map_err(|_| ControllerError::NotRunning)
    }

    /// Current state of `address`
    pub async fn state(&self, address: Address) -> Result<PpbState, ControllerError> {
        Ok(self.status(address).await?.state)
    }

    /// Full status snapshot of `address`
    pub async fn status(&self, address: Address) -> Result<AddressStatus, ControllerError> {
        if !self.is_started() {
            return Ok(AddressStatus {
                state: PpbState::Idle,
                queued: 0,
                in_flight: None,
                gate_holder: None,
                endpoint: None,
            });
        }
        self.request(|response| EngineCommand::QueryState { address, response })
            .await
    }

    /// Stop the engine and wait for its tasks to finish
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(EngineCommand::Shutdown).await;
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }
        self.local_addr = None;
        info!("PPB controller stopped");
    }

    /// Send a raw functional request in either direction
    pub async fn send_functional(
        &mut self,
        direction: FuDirection,
        address: Address,
        period: u8,
        data: [u8; 2],
    ) -> Result<(), ControllerError> {
        if !self.is_started() {
            self.park(PendingCall::Functional {
                direction,
                address,
                period,
                data,
            });
            return Ok(());
        }
        Ok(self
            .request(|response| EngineCommand::SendFunctional {
                direction,
                address,
                period,
                data,
                response,
            })
            .await??)
    }

    fn spawn_engine(&mut self, config: EngineConfig) -> EngineIo {
        let capacity = config.event_buffer.max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        let engine = Engine::with_config(config);
        self.tasks
            .push(tokio::spawn(run_engine_actor(engine, cmd_rx, out_tx, event_tx)));
        self.cmd_tx = Some(cmd_tx.clone());

        EngineIo {
            events: event_rx,
            outgoing: out_rx,
            commands: cmd_tx,
        }
    }

    fn park(&mut self, call: PendingCall) -> DispatchOutcome {
        debug!("Engine not started, parking {:?}", call);
        self.pending.push_back(call);
        DispatchOutcome::Deferred
    }

    /// Forward parked calls in order; rejections surface as error events
    async fn replay_pending(&mut self) {
        let Some(tx) = self.cmd_tx.clone() else {
            return;
        };
        while let Some(call) = self.pending.pop_front() {
            let cmd = match call {
                PendingCall::Connect { address, endpoint } => EngineCommand::Connect {
                    address,
                    endpoint,
                    response: oneshot::channel().0,
                },
                PendingCall::Execute {
                    command,
                    address,
                    params,
                } => EngineCommand::Execute {
                    command,
                    address,
                    params,
                    response: oneshot::channel().0,
                },
                PendingCall::Functional {
                    direction,
                    address,
                    period,
                    data,
                } => EngineCommand::SendFunctional {
                    direction,
                    address,
                    period,
                    data,
                    response: oneshot::channel().0,
                },
            };
            if tx.send(cmd).await.is_err() {
                warn!("Engine stopped while replaying parked calls");
                break;
            }
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, ControllerError> {
        let tx = self.cmd_tx.as_ref().ok_or(ControllerError::NotRunning)?;
        let (response_tx, response_rx) = oneshot::channel();
        tx.send(build(response_tx))
            .await
            .map_err(|_| ControllerError::NotRunning)?;
        response_rx.await.map_err(|_| ControllerError::NotRunning)
    }
}

impl Drop for PpbController {
    fn drop(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.try_send(EngineCommand::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_calls_before_start_are_replayed_in_order() {
        let mut controller = PpbController::new();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        assert_eq!(
            controller.connect(Address(0x0001), ip, 6000).await.unwrap(),
            DispatchOutcome::Deferred
        );
        assert_eq!(
            controller
                .execute(TechCommand::Tc, Address(0x0001), RequestParams::default())
                .await
                .unwrap(),
            DispatchOutcome::Deferred
        );
        assert_eq!(controller.state(Address(0x0001)).await.unwrap(), PpbState::Idle);

        let mut io = controller
            .start_with_io(EngineConfig::default())
            .await
            .unwrap();

        let first = io.outgoing.recv().await.unwrap();
        assert_eq!(first.data[2], TechCommand::Ts.opcode());

        let status = controller.status(Address(0x0001)).await.unwrap();
        assert_eq!(status.state, PpbState::SendingCommand);
        assert_eq!(status.queued, 1);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_command_name() {
        let mut controller = PpbController::new();
        let _io = controller
            .start_with_io(EngineConfig::default())
            .await
            .unwrap();

        let result = controller
            .execute_named("REBOOT", Address(0x0001), RequestParams::default())
            .await;
        assert!(matches!(
            result,
            Err(ControllerError::Dispatch(DispatchError::UnknownCommand(_)))
        ));

        let result = controller
            .execute_named("vers", Address(0x0001), RequestParams::default())
            .await;
        assert!(matches!(
            result,
            Err(ControllerError::Dispatch(DispatchError::NoEndpoint(_)))
        ));

        controller.shutdown().await;
        assert!(matches!(
            controller.state(Address(0x0001)).await,
            Ok(PpbState::Idle)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut controller = PpbController::new();
        let _io = controller
            .start_with_io(EngineConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            controller.start_with_io(EngineConfig::default()).await,
            Err(ControllerError::AlreadyStarted)
        ));
        controller.shutdown().await;
    }
}
