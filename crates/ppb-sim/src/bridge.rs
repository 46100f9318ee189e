//! Virtual UDP bridge
//!
//! Routes requests to the virtual units named by the address mask, speaks
//! the bridge's own acknowledgement for FU commands and collects streamed
//! test sequences.

use std::collections::BTreeMap;

use ppb_protocol::frame::{ACK_LEN, REQUEST_LEN};
use ppb_protocol::{
    Address, BridgeResponse, DataPacket, EncodeFrame, PpbResponse, Request, SignalClass,
    TechCommand, FU_RECEIVE, FU_TRANSMIT,
};
use tracing::{debug, warn};

use crate::ppb::{Faults, Reply, VirtualPpb};

/// A simulated bridge fronting up to 16 units
#[derive(Debug, Default)]
pub struct VirtualBridge {
    units: BTreeMap<Address, VirtualPpb>,
    /// Unit currently receiving a test sequence
    stream_target: Option<Address>,
    /// Raw functional requests seen
    functional: Vec<Request>,
}

impl VirtualBridge {
    /// Create an empty bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bridge with default units at `addresses`
    pub fn with_units(addresses: impl IntoIterator<Item = Address>) -> Self {
        let mut bridge = Self::new();
        for address in addresses {
            bridge.add_unit(VirtualPpb::new(address));
        }
        bridge
    }

    /// Attach a unit, replacing any unit at the same address
    pub fn add_unit(&mut self, unit: VirtualPpb) {
        self.units.insert(unit.address(), unit);
    }

    /// Look up a unit
    pub fn unit(&self, address: Address) -> Option<&VirtualPpb> {
        self.units.get(&address)
    }

    /// Look up a unit for modification
    pub fn unit_mut(&mut self, address: Address) -> Option<&mut VirtualPpb> {
        self.units.get_mut(&address)
    }

    /// Replace the faults of one unit; returns false if it does not exist
    pub fn set_faults(&mut self, address: Address, faults: Faults) -> bool {
        match self.units.get_mut(&address) {
            Some(unit) => {
                unit.set_faults(faults);
                true
            }
            None => false,
        }
    }

    /// Raw transmit/receive requests seen so far
    pub fn functional_requests(&self) -> &[Request] {
        &self.functional
    }

    /// Process one datagram from the controller and return the replies
    pub fn handle_datagram(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        match data.len() {
            REQUEST_LEN => match Request::decode(data) {
                Ok(request) => self.handle_request(request),
                Err(e) => {
                    warn!("Virtual bridge: bad request: {}", e);
                    Vec::new()
                }
            },
            ACK_LEN => {
                self.handle_stream_packet(data);
                Vec::new()
            }
            n => {
                warn!("Virtual bridge: dropping {}-byte datagram", n);
                Vec::new()
            }
        }
    }

    fn handle_request(&mut self, request: Request) -> Vec<Vec<u8>> {
        match request.class {
            SignalClass::Tu => {
                let Ok(command) = TechCommand::try_from(request.opcode) else {
                    warn!("Virtual bridge: unknown opcode 0x{:02X}", request.opcode);
                    return Vec::new();
                };
                let mut out = Vec::new();
                for unit in self.units_in(request.address) {
                    if let Some(reply) = unit.respond(command) {
                        let ack = PpbResponse {
                            address: unit.address(),
                            status: reply.status,
                        };
                        out.push(ack.encode());
                        out.extend(reply.data.iter().map(EncodeFrame::encode));
                    }
                }
                out
            }
            SignalClass::Fu => self.handle_functional(request),
        }
    }

    fn handle_functional(&mut self, request: Request) -> Vec<Vec<u8>> {
        let function = request.aux[0];
        if function == FU_TRANSMIT || function == FU_RECEIVE {
            debug!(
                "Virtual bridge: functional 0x{:02X} for {}",
                function, request.address
            );
            self.functional.push(request);
            return Vec::new();
        }

        let Ok(command) = TechCommand::try_from(function) else {
            warn!("Virtual bridge: unknown function 0x{:02X}", function);
            return Vec::new();
        };

        let Some(unit) = self.units.get_mut(&request.address) else {
            debug!("Virtual bridge: no unit at {}", request.address);
            return Vec::new();
        };
        let Some(Reply { status, data }) = unit.respond(command) else {
            return Vec::new();
        };

        if command == TechCommand::PrbsM2s && status == 0 {
            self.stream_target = Some(request.address);
        }

        let ack = BridgeResponse {
            address: request.address,
            opcode: function,
            status,
        };
        let mut out = vec![ack.encode()];
        out.extend(data.iter().map(EncodeFrame::encode));
        out
    }

    fn handle_stream_packet(&mut self, data: &[u8]) {
        let Some(address) = self.stream_target else {
            debug!("Virtual bridge: unexpected 4-byte datagram {:02X?}", data);
            return;
        };
        let Ok(packet) = DataPacket::decode_unchecked(data) else {
            return;
        };
        let Some(unit) = self.units.get_mut(&address) else {
            return;
        };
        unit.accept_stream_packet(packet);
        if unit.stream_complete() {
            debug!("Virtual bridge: test sequence complete for {}", address);
            self.stream_target = None;
        }
    }

    fn units_in(&mut self, mask: Address) -> impl Iterator<Item = &mut VirtualPpb> {
        self.units
            .values_mut()
            .filter(move |unit| mask.contains(unit.address()))
    }
}
