//! Per-address in-flight operation record

use ppb_protocol::{DataPacket, PacketCount, ParsedOutcome, Request, TechCommand};
use tokio::time::Instant;

use crate::state::PpbState;

/// Progress of the command currently executing for one address
///
/// Created when a command is dispatched and dropped when the address returns
/// to rest. Owns the response deadline.
#[derive(Debug, Clone)]
pub struct PpbContext {
    /// Unique id of this dispatch
    pub operation_id: u64,
    /// Command being executed
    pub command: TechCommand,
    /// Request frame, kept for retries
    pub request: Request,
    /// Data packets received so far, in arrival order
    pub received_data: Vec<DataPacket>,
    /// Packets the reply should contain
    pub packets_expected: PacketCount,
    /// Still waiting for the acknowledgement
    pub waiting_for_ok: bool,
    /// Completion already reported
    pub operation_completed: bool,
    /// State of the address when the command started
    pub state_before_command: PpbState,
    /// Requests sent, including retries
    pub attempts: u8,
    /// Data frames dropped because they failed to decode
    pub dropped_frames: usize,
    /// Command-specific interpretation, consumed at completion
    pub parsed: Option<ParsedOutcome>,
    /// Dispatch time
    pub started: Instant,
    deadline: Option<Instant>,
}

impl PpbContext {
    /// Create a context for a freshly dispatched command
    pub fn new(
        operation_id: u64,
        command: TechCommand,
        request: Request,
        state_before_command: PpbState,
        now: Instant,
    ) -> Self {
        Self {
            operation_id,
            command,
            request,
            received_data: Vec::new(),
            packets_expected: PacketCount::NONE,
            waiting_for_ok: true,
            operation_completed: false,
            state_before_command,
            attempts: 1,
            dropped_frames: 0,
            parsed: None,
            started: now,
            deadline: None,
        }
    }

    /// Packets received so far
    pub fn packets_received(&self) -> usize {
        self.received_data.len()
    }

    /// Whether the command is in its data phase
    pub fn is_receiving(&self) -> bool {
        !self.waiting_for_ok && !self.operation_completed && self.packets_expected.expects_data()
    }

    /// (Re)start the timer
    pub fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Stop the timer
    pub fn stop_timer(&mut self) {
        self.deadline = None;
    }

    /// Pending deadline, if the timer is running
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer has fired by `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppb_protocol::Address;
    use std::time::Duration;

    #[test]
    fn test_timer_lifecycle() {
        let now = Instant::now();
        let request = TechCommand::Tc.build_request(Address(1), 0, [0; 3]);
        let mut ctx = PpbContext::new(1, TechCommand::Tc, request, PpbState::Ready, now);

        assert!(ctx.waiting_for_ok);
        assert!(!ctx.is_expired(now + Duration::from_secs(10)));

        ctx.arm(now + Duration::from_millis(500));
        assert!(!ctx.is_expired(now + Duration::from_millis(499)));
        assert!(ctx.is_expired(now + Duration::from_millis(500)));

        ctx.stop_timer();
        assert_eq!(ctx.deadline(), None);
    }

    #[test]
    fn test_receiving_phase() {
        let now = Instant::now();
        let request = TechCommand::Vers.build_request(Address(1), 0, [0; 3]);
        let mut ctx = PpbContext::new(7, TechCommand::Vers, request, PpbState::Ready, now);
        assert!(!ctx.is_receiving());

        ctx.waiting_for_ok = false;
        ctx.packets_expected = PacketCount::exactly(2);
        assert!(ctx.is_receiving());

        ctx.operation_completed = true;
        assert!(!ctx.is_receiving());
    }
}
