//! Command engine
//!
//! The core state machine that serializes commands per address, enforces the
//! dialog gate, interprets incoming datagrams and turns deadline expiries
//! into retries or failures.
//!
//! The engine performs no I/O. Every entry point takes the current time and
//! buffers outgoing datagrams and events, which the actor drains after each
//! call and forwards to the transport and to observers.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use ppb_protocol::frame::{ACK_LEN, STATUS_OK};
use ppb_protocol::{
    check_crc, prbs, Address, BridgeResponse, CommandData, CounterAnalyzer, DataPacket,
    DecodeError, EncodeFrame, FuDirection, OkAction, PpbResponse, ProtocolError,
    SequenceAnalyzer, SignalClass, TechCommand, TimeoutVerdict,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::PpbContext;
use crate::error::{DispatchError, TimeoutError};
use crate::events::{EngineEvent, Target};
use crate::state::{DialogGate, PpbState};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local UDP bind address
    pub bind_address: String,
    /// Queue drain interval (ms)
    pub tick_interval_ms: u64,
    /// Quiet period after the minimum reply length is reached (ms)
    pub settle_ms: u64,
    /// Re-sends of an unanswered connection handshake
    pub connect_retries: u8,
    /// Commands that may wait per address
    pub max_queue_len: usize,
    /// Emit progress every this many data packets
    pub progress_interval: usize,
    /// Port for broadcast requests when no bridge port is known
    pub broadcast_port: u16,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:0".to_string(),
            tick_interval_ms: 100,
            settle_ms: 50,
            connect_retries: 3,
            max_queue_len: 32,
            progress_interval: 16,
            broadcast_port: 5000,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Queue drain interval
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Settle period for variable-length replies
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Period and auxiliary bytes of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestParams {
    /// Repetition period
    pub period: u8,
    /// Auxiliary bytes (only the first two reach FU requests)
    pub aux: [u8; 3],
}

/// What happened to an accepted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent immediately
    Dispatched,
    /// Waiting behind earlier work
    Queued {
        /// Position in the address's queue (1 = next)
        position: usize,
    },
    /// Parked by the controller until the engine starts
    Deferred,
}

/// Datagram ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Raw bytes
    pub data: Vec<u8>,
    /// Destination
    pub target: Target,
}

#[derive(Debug, Clone, Copy)]
struct QueuedCommand {
    command: TechCommand,
    params: RequestParams,
}

/// The command engine
pub struct Engine {
    config: EngineConfig,
    states: HashMap<Address, PpbState>,
    contexts: HashMap<Address, PpbContext>,
    queues: HashMap<Address, VecDeque<QueuedCommand>>,
    endpoints: HashMap<Address, SocketAddr>,
    group_acks: HashMap<Address, Instant>,
    gate: DialogGate,
    analyzer: Box<dyn SequenceAnalyzer>,
    reference: Vec<DataPacket>,
    next_operation: u64,
    outgoing: Vec<Outgoing>,
    event_buffer: Vec<EngineEvent>,
}

impl Engine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            contexts: HashMap::new(),
            queues: HashMap::new(),
            endpoints: HashMap::new(),
            group_acks: HashMap::new(),
            gate: DialogGate::default(),
            analyzer: Box::new(CounterAnalyzer),
            reference: prbs::generate_sequence(),
            next_operation: 0,
            outgoing: Vec::new(),
            event_buffer: Vec::new(),
        }
    }

    /// Replace the sequence analyzer
    pub fn set_analyzer(&mut self, analyzer: Box<dyn SequenceAnalyzer>) {
        self.analyzer = analyzer;
    }

    /// Get the current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state of an address
    pub fn state(&self, address: Address) -> PpbState {
        self.states.get(&address).copied().unwrap_or_default()
    }

    /// In-flight context of an address
    pub fn context(&self, address: Address) -> Option<&PpbContext> {
        self.contexts.get(&address)
    }

    /// The dialog gate
    pub fn gate(&self) -> &DialogGate {
        &self.gate
    }

    /// Commands waiting for an address
    pub fn queue_len(&self, address: Address) -> usize {
        self.queues.get(&address).map_or(0, VecDeque::len)
    }

    /// Bridge endpoint recorded for an address
    pub fn endpoint(&self, address: Address) -> Option<SocketAddr> {
        self.endpoints.get(&address).copied()
    }

    /// Earliest running context or group acknowledgement deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.contexts
            .values()
            .filter_map(PpbContext::deadline)
            .chain(self.group_acks.values().copied())
            .min()
    }

    /// Whether a unit still owes the ack of a multi-unit command
    pub fn awaiting_group_ack(&self, address: Address) -> bool {
        self.group_acks.contains_key(&address)
    }

    /// Take buffered events
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    /// Take buffered outgoing datagrams
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outgoing)
    }

    pub(crate) fn push_event(&mut self, event: EngineEvent) {
        self.event_buffer.push(event);
    }

    // -------------------------------------------------------------------------
    // Caller entry points
    // -------------------------------------------------------------------------

    /// Record the bridge endpoint for an address and start the handshake
    pub fn connect(
        &mut self,
        address: Address,
        endpoint: SocketAddr,
        now: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        if !address.is_single() {
            return Err(DispatchError::InvalidAddress {
                address,
                command: TechCommand::Ts.name().to_string(),
            });
        }
        self.endpoints.insert(address, endpoint);
        info!("Connecting to PPB {} via {}", address, endpoint);
        self.execute(TechCommand::Ts, address, RequestParams::default(), now)
    }

    /// Run a command now if possible, otherwise queue it
    ///
    /// Commands for several units at once, broadcast included, are sent
    /// without a context once every member unit is at rest, and complete as
    /// soon as they are sent. Their acknowledgements are not tracked.
    pub fn execute(
        &mut self,
        command: TechCommand,
        address: Address,
        params: RequestParams,
        now: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        if address.is_empty() || (command.needs_single_unit() && !address.is_single()) {
            return Err(DispatchError::InvalidAddress {
                address,
                command: command.name().to_string(),
            });
        }
        if self.resolve_target(address).is_none() {
            return Err(DispatchError::NoEndpoint(address));
        }

        let queued = self.queue_len(address);
        if queued >= self.config.max_queue_len {
            return Err(DispatchError::Busy { address, queued });
        }

        if queued == 0 && self.ready_for(address, command) {
            self.dispatch(address, command, params, now);
            return Ok(DispatchOutcome::Dispatched);
        }

        self.queues
            .entry(address)
            .or_default()
            .push_back(QueuedCommand { command, params });
        let position = queued + 1;
        debug!(
            "Queued {} for {} (position {}, state {:?}, gate {:?})",
            command,
            address,
            position,
            self.state(address),
            self.gate.holder()
        );
        Ok(DispatchOutcome::Queued { position })
    }

    /// Send a fire-and-forget functional request
    pub fn send_functional(
        &mut self,
        direction: FuDirection,
        address: Address,
        period: u8,
        data: [u8; 2],
    ) -> Result<(), DispatchError> {
        let target = self
            .resolve_target(address)
            .ok_or(DispatchError::NoEndpoint(address))?;
        let request = direction.build_request(address, period, data);
        debug!("Functional {:?} request to {}", direction, address);
        self.send(address, request.encode(), target);
        Ok(())
    }

    /// Stop all work and forget every endpoint
    pub fn disconnect(&mut self) {
        self.queues.clear();

        let mut in_flight: Vec<PpbContext> = self.contexts.drain().map(|(_, ctx)| ctx).collect();
        in_flight.sort_by_key(|ctx| ctx.operation_id);
        for mut ctx in in_flight {
            ctx.stop_timer();
            if ctx.operation_completed {
                continue;
            }
            ctx.operation_completed = true;
            self.event_buffer.push(EngineEvent::CommandCompleted {
                address: ctx.request.address,
                command: ctx.command,
                success: false,
                message: "cancelled by disconnect".to_string(),
            });
        }

        self.gate.clear();
        self.endpoints.clear();
        self.group_acks.clear();

        let mut busy: Vec<(Address, PpbState)> = self
            .states
            .drain()
            .filter(|(_, state)| *state != PpbState::Idle)
            .collect();
        busy.sort_by_key(|(address, _)| *address);
        for (address, from) in busy {
            self.event_buffer.push(EngineEvent::StateChanged {
                address,
                from,
                to: PpbState::Idle,
            });
        }

        info!("Disconnected from all PPB units");
        self.event_buffer.push(EngineEvent::Disconnected);
    }

    // -------------------------------------------------------------------------
    // Transport and timer entry points
    // -------------------------------------------------------------------------

    /// Interpret one datagram from the bridge
    ///
    /// TU acks and data packets share a layout and a CRC, so a 4-byte frame
    /// is classified in order: the gate holder's next data packet (counter
    /// equal to the packets received so far, CRC valid), then an ack for a
    /// context waiting on its address, then any other data for the holder.
    /// A data packet whose payload spells another waiting address and whose
    /// counter is not the next one is still read as that address's ack.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) {
        debug!("IN  <-PPB({}) {:02X?}", from, &data[..data.len().min(64)]);
        self.event_buffer.push(EngineEvent::DatagramIn {
            data: data.to_vec(),
            from,
        });

        if data.len() != ACK_LEN {
            let err = DecodeError::WrongSize {
                expected: ACK_LEN,
                actual: data.len(),
            };
            warn!("Dropping datagram from {}: {}", from, err);
            return;
        }

        let receiver = self
            .gate
            .holder()
            .filter(|holder| self.contexts.get(holder).is_some_and(PpbContext::is_receiving));

        if let Some(holder) = receiver {
            if self.is_next_packet(holder, data) {
                self.handle_data(holder, data, now);
                return;
            }
        }

        let address = Address::from_le_bytes([data[0], data[1]]);
        if self.group_acks.contains_key(&address) {
            if let Ok(ack) = PpbResponse::decode(data) {
                self.group_acks.remove(&address);
                if !ack.is_ok() {
                    warn!(
                        "PPB {} rejected a multi-unit command: status 0x{:02X}",
                        address, ack.status
                    );
                }
                self.drain_queue(address, now);
                self.drain_group_queues(address, now);
                return;
            }
        }

        if let Some(status) = self.match_ack(address, data) {
            self.handle_ack(address, status, now);
            return;
        }

        if let Some(holder) = receiver {
            self.handle_data(holder, data, now);
            return;
        }

        debug!("Dropping unsolicited datagram {:02X?} from {}", data, from);
    }

    /// Fire every deadline that has passed
    pub fn expire_timers(&mut self, now: Instant) {
        let mut silent: Vec<Address> = self
            .group_acks
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(address, _)| *address)
            .collect();
        silent.sort();
        for address in silent {
            self.group_acks.remove(&address);
            debug!("No ack from {} for a multi-unit command", address);
            self.drain_queue(address, now);
            self.drain_group_queues(address, now);
        }

        let mut expired: Vec<(u64, Address)> = self
            .contexts
            .iter()
            .filter(|(_, ctx)| ctx.is_expired(now))
            .map(|(address, ctx)| (ctx.operation_id, *address))
            .collect();
        expired.sort();

        for (_, address) in expired {
            self.handle_timeout(address, now);
        }
    }

    /// Dispatch the head of every queue whose address is at rest
    pub fn drain_queues(&mut self, now: Instant) {
        let mut addresses: Vec<Address> = self
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(address, _)| *address)
            .collect();
        addresses.sort();

        for address in addresses {
            self.drain_queue(address, now);
        }
    }

    /// Finish the operation identified by `operation_id`
    ///
    /// Returns `false` without side effects when the operation is unknown or
    /// was already completed.
    pub fn complete_operation(
        &mut self,
        address: Address,
        operation_id: u64,
        success: bool,
        message: String,
        now: Instant,
    ) -> bool {
        let Some(ctx) = self.contexts.get_mut(&address) else {
            debug!("No operation in flight for {}", address);
            return false;
        };
        if ctx.operation_id != operation_id || ctx.operation_completed {
            debug!(
                "Ignoring completion of stale operation {} for {}",
                operation_id, address
            );
            return false;
        }

        ctx.operation_completed = true;
        ctx.stop_timer();
        let command = ctx.command;
        let before = ctx.state_before_command;
        let parsed = ctx.parsed.take();
        self.contexts.remove(&address);
        self.gate.release(address);

        let (success, message, data) = match parsed {
            Some(parsed) => {
                let message = if success { parsed.message } else { message };
                (parsed.success && success, message, parsed.data)
            }
            None => (success, message, None),
        };

        if command == TechCommand::Ts && success && before == PpbState::Idle {
            self.set_state(address, PpbState::Ready);
            info!("PPB {} connected", address);
            self.event_buffer.push(EngineEvent::Connected { address });
        } else if !success && before == PpbState::Idle {
            self.set_state(address, PpbState::Idle);
            warn!("Connection to PPB {} failed: {}", address, message);
            self.event_buffer.push(EngineEvent::Error {
                address: Some(address),
                message: format!("connection failed: {}", message),
            });
        } else {
            self.set_state(address, PpbState::Ready);
        }

        if let Some(data) = data {
            if let CommandData::PrbsReceived { packets, .. } = &data {
                let report = self.analyzer.analyze(&self.reference, packets);
                debug!("Sequence analysis for {}: {:?}", address, report);
                self.event_buffer
                    .push(EngineEvent::SequenceAnalyzed { address, report });
            }
            self.event_buffer.push(EngineEvent::DataReady {
                address,
                command,
                data,
            });
        }

        if success {
            info!("{} for {} completed: {}", command, address, message);
        } else {
            warn!("{} for {} failed: {}", command, address, message);
        }
        self.event_buffer.push(EngineEvent::CommandCompleted {
            address,
            command,
            success,
            message,
        });

        self.drain_queue(address, now);
        self.drain_group_queues(address, now);
        true
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn ready_for(&self, address: Address, command: TechCommand) -> bool {
        if !address.is_single() {
            return address.devices().all(|device| {
                self.state(device).is_rest()
                    && self.queue_len(device) == 0
                    && !self.group_acks.contains_key(&device)
            });
        }
        self.state(address).is_rest()
            && !self.group_acks.contains_key(&address)
            && (!command.expects_data() || self.gate.allows(address))
    }

    fn is_next_packet(&self, holder: Address, data: &[u8]) -> bool {
        self.contexts.get(&holder).is_some_and(|ctx| {
            data[2] == ctx.packets_received() as u8 && check_crc(&data[..3], data[3])
        })
    }

    fn resolve_target(&self, address: Address) -> Option<Target> {
        if let Some(endpoint) = self.endpoints.get(&address) {
            return Some(Target::Unicast(*endpoint));
        }
        if address.is_broadcast() {
            let port = self
                .endpoints
                .values()
                .map(SocketAddr::port)
                .min()
                .unwrap_or(self.config.broadcast_port);
            return Some(Target::Broadcast(port));
        }
        address
            .devices()
            .find_map(|device| self.endpoints.get(&device))
            .map(|endpoint| Target::Unicast(*endpoint))
    }

    fn drain_queue(&mut self, address: Address, now: Instant) {
        let Some(head) = self.queues.get(&address).and_then(|q| q.front()).copied() else {
            return;
        };
        if !self.ready_for(address, head.command) {
            return;
        }
        if let Some(queue) = self.queues.get_mut(&address) {
            queue.pop_front();
            if queue.is_empty() {
                self.queues.remove(&address);
            }
        }
        self.dispatch(address, head.command, head.params, now);
    }

    /// Retry multi-unit queues that were waiting on `device`
    fn drain_group_queues(&mut self, device: Address, now: Instant) {
        let mut groups: Vec<Address> = self
            .queues
            .keys()
            .filter(|group| !group.is_single() && group.contains(device))
            .copied()
            .collect();
        groups.sort();
        for group in groups {
            self.drain_queue(group, now);
        }
    }

    fn dispatch(
        &mut self,
        address: Address,
        command: TechCommand,
        params: RequestParams,
        now: Instant,
    ) {
        let Some(target) = self.resolve_target(address) else {
            warn!("Cannot dispatch {} to {}: no endpoint", command, address);
            self.event_buffer.push(EngineEvent::Error {
                address: Some(address),
                message: DispatchError::NoEndpoint(address).to_string(),
            });
            return;
        };

        let request = command.build_request(address, params.period, params.aux);
        if !address.is_single() {
            let deadline = now + command.timeout();
            self.group_acks
                .extend(address.devices().map(|device| (device, deadline)));
            self.send(address, request.encode(), target);
            let message = format!("{} sent to {} unit(s)", command, address.device_count());
            info!("{} for {} completed: {}", command, address, message);
            self.event_buffer.push(EngineEvent::CommandCompleted {
                address,
                command,
                success: true,
                message,
            });
            return;
        }

        self.next_operation += 1;
        let mut ctx = PpbContext::new(
            self.next_operation,
            command,
            request,
            self.state(address),
            now,
        );
        ctx.arm(now + command.timeout());

        if command.expects_data() {
            self.gate.acquire(address);
        }

        debug!(
            "Dispatching {} (op {}) to {}",
            command, ctx.operation_id, address
        );
        self.contexts.insert(address, ctx);
        self.send(address, request.encode(), target);
        self.set_state(address, PpbState::SendingCommand);
    }

    fn send(&mut self, address: Address, data: Vec<u8>, target: Target) {
        debug!("OUT ->PPB({}) {:02X?}", address, data);
        self.event_buffer.push(EngineEvent::DatagramOut {
            data: data.clone(),
            target,
        });
        self.outgoing.push(Outgoing { data, target });
    }

    fn set_state(&mut self, address: Address, to: PpbState) {
        let from = self.state(address);
        if from == to {
            return;
        }
        if to == PpbState::Idle {
            self.states.remove(&address);
        } else {
            self.states.insert(address, to);
        }
        debug!("PPB {} state {:?} -> {:?}", address, from, to);
        self.event_buffer
            .push(EngineEvent::StateChanged { address, from, to });
    }

    /// Status byte if `data` acknowledges the request in flight for `address`
    fn match_ack(&self, address: Address, data: &[u8]) -> Option<u8> {
        let ctx = self.contexts.get(&address)?;
        if !ctx.waiting_for_ok || ctx.operation_completed {
            return None;
        }
        match ctx.command.signal_class() {
            SignalClass::Tu => match PpbResponse::decode(data) {
                Ok(ack) => Some(ack.status),
                Err(err) => {
                    debug!("Not an ack for {}: {}", address, err);
                    None
                }
            },
            SignalClass::Fu => BridgeResponse::decode(data)
                .ok()
                .filter(|ack| ack.opcode == ctx.command.opcode())
                .map(|ack| ack.status),
        }
    }

    fn handle_ack(&mut self, address: Address, status: u8, now: Instant) {
        let Some(ctx) = self.contexts.get_mut(&address) else {
            return;
        };
        ctx.waiting_for_ok = false;
        let command = ctx.command;
        let operation_id = ctx.operation_id;

        if status != STATUS_OK {
            let err = ProtocolError::DeviceReportedFault(status);
            self.complete_operation(address, operation_id, false, err.to_string(), now);
            return;
        }

        debug!("{} acknowledged by {}", command, address);
        match command.on_ok_received() {
            OkAction::Complete { message } => {
                self.complete_operation(address, operation_id, true, message, now);
            }
            OkAction::AwaitData { expected, timeout } => {
                ctx.packets_expected = expected;
                ctx.arm(now + timeout);
                self.set_state(address, PpbState::WaitingData);
            }
            OkAction::Stream { packets, result } => {
                ctx.parsed = Some(result);
                let Some(target) = self.resolve_target(address) else {
                    self.complete_operation(
                        address,
                        operation_id,
                        false,
                        DispatchError::NoEndpoint(address).to_string(),
                        now,
                    );
                    return;
                };
                info!("Streaming {} packets to {}", packets.len(), address);
                for packet in &packets {
                    self.send(address, packet.encode(), target);
                }
                let message = format!("{} packets sent", packets.len());
                self.complete_operation(address, operation_id, true, message, now);
            }
        }
    }

    fn handle_data(&mut self, address: Address, data: &[u8], now: Instant) {
        let settle = self.config.settle();
        let progress_interval = self.config.progress_interval.max(1);
        let Some(ctx) = self.contexts.get_mut(&address) else {
            return;
        };

        let decoded = if ctx.command.keeps_corrupt_packets() {
            DataPacket::decode_unchecked(data)
        } else {
            DataPacket::decode(data)
        };
        let packet = match decoded {
            Ok(packet) => packet,
            Err(err) => {
                ctx.dropped_frames += 1;
                warn!("Dropping data frame for {}: {}", address, err);
                return;
            }
        };
        ctx.received_data.push(packet);

        let command = ctx.command;
        let operation_id = ctx.operation_id;
        let expected = ctx.packets_expected;
        let received = ctx.packets_received();

        if received >= expected.max {
            ctx.parsed = Some(command.on_data_received(&ctx.received_data, expected));
        } else if received >= expected.min {
            ctx.arm(now + settle);
        }

        if received % progress_interval == 0 || received == expected.max {
            self.event_buffer.push(EngineEvent::CommandProgress {
                address,
                command,
                received,
                expected: expected.max,
            });
        }

        if received >= expected.max {
            let message = format!("{} packets received", received);
            self.complete_operation(address, operation_id, true, message, now);
        }
    }

    fn handle_timeout(&mut self, address: Address, now: Instant) {
        let max_retries = self.config.connect_retries;
        let Some(ctx) = self.contexts.get_mut(&address) else {
            return;
        };
        ctx.stop_timer();
        let command = ctx.command;
        let operation_id = ctx.operation_id;

        if ctx.waiting_for_ok {
            let handshake =
                command == TechCommand::Ts && ctx.state_before_command == PpbState::Idle;
            if handshake && ctx.attempts <= max_retries {
                ctx.attempts += 1;
                ctx.arm(now + command.timeout());
                let request = ctx.request;
                info!(
                    "No answer from {}, retrying {} (attempt {})",
                    address, command, ctx.attempts
                );
                match self.resolve_target(address) {
                    Some(target) => self.send(address, request.encode(), target),
                    None => warn!("Cannot retry {} for {}: no endpoint", command, address),
                }
                return;
            }
            let err = TimeoutError::NoAcknowledgement {
                attempts: ctx.attempts,
            };
            self.complete_operation(address, operation_id, false, err.to_string(), now);
            return;
        }

        let expected = ctx.packets_expected;
        let received = ctx.packets_received();
        match command.on_timeout(received, expected) {
            TimeoutVerdict::Complete => {
                ctx.parsed = Some(command.on_data_received(&ctx.received_data, expected));
                let message = format!("{} packets received", received);
                self.complete_operation(address, operation_id, true, message, now);
            }
            TimeoutVerdict::PartialData { received, expected: total } => {
                ctx.parsed = Some(command.on_data_received(&ctx.received_data, expected));
                let err = TimeoutError::PartialData { received, total };
                self.complete_operation(address, operation_id, false, err.to_string(), now);
            }
            TimeoutVerdict::NoData => {
                let err = TimeoutError::NoData;
                self.complete_operation(address, operation_id, false, err.to_string(), now);
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
