//! Per-peer logical channels, one per delivery mode.
//!
//! Channels are sans-IO: messages go in through [`Channel::enqueue`], encoded
//! datagrams come out of [`Channel::flush`], and inbound data packets are
//! turned into deliveries by [`Channel::receive`].

use crate::protocol::{
    seq_after, seq_diff, AckPacket, DataPacket, DeliveryMode, FragmentHeader, Packet, SeqNum,
    WINDOW_SIZE,
};
use crate::reliability::{AckWindow, Receipt, RetransmitQueue, RetriesExhausted, RttEstimator};

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// A message (or one fragment of one) handed to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Bytes,
    pub fragment: Option<FragmentHeader>,
}

/// What a channel did with an inbound data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Accepted, possibly buffered for later delivery
    Accepted,
    /// Seen before
    Duplicate,
    /// Older than what was already delivered, or outside the receive window
    Stale,
}

/// Timing inputs and output sink for one flush
pub struct FlushContext<'a> {
    pub now: Instant,
    pub rto: Duration,
    pub max_rto: Duration,
    pub max_retries: u32,
    pub out: &'a mut Vec<Bytes>,
}

#[derive(Debug)]
struct Outgoing {
    payload: Bytes,
    fragment: Option<FragmentHeader>,
}

/// Common interface of the five channel kinds
pub trait Channel: Send + fmt::Debug {
    fn mode(&self) -> DeliveryMode;

    /// Queue a message for the next flush
    fn enqueue(&mut self, payload: Bytes, fragment: Option<FragmentHeader>);

    /// Process an inbound data packet of this channel's mode
    fn receive(&mut self, packet: DataPacket, delivered: &mut Vec<Delivery>) -> Inbound;

    /// Process an ack from the remote receiver
    fn handle_ack(&mut self, _ack: &AckPacket, _now: Instant, _rtt: &mut RttEstimator) {}

    /// Emit queued messages, pending acks, and due retransmissions.
    /// Returns the number of retransmissions.
    fn flush(&mut self, ctx: &mut FlushContext<'_>) -> Result<usize, RetriesExhausted>;

    /// Messages queued or awaiting acknowledgement
    fn pending(&self) -> usize;
}

fn encode_data(
    mode: DeliveryMode,
    sequence: SeqNum,
    fragment: Option<FragmentHeader>,
    payload: Bytes,
) -> Bytes {
    Packet::Data(DataPacket {
        mode,
        sequence,
        fragment,
        payload,
    })
    .to_bytes()
}

/// Fire-and-forget delivery
#[derive(Debug, Default)]
pub struct UnreliableChannel {
    outgoing: VecDeque<Outgoing>,
}

impl Channel for UnreliableChannel {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Unreliable
    }

    fn enqueue(&mut self, payload: Bytes, fragment: Option<FragmentHeader>) {
        self.outgoing.push_back(Outgoing { payload, fragment });
    }

    fn receive(&mut self, packet: DataPacket, delivered: &mut Vec<Delivery>) -> Inbound {
        delivered.push(Delivery {
            payload: packet.payload,
            fragment: packet.fragment,
        });
        Inbound::Accepted
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>) -> Result<usize, RetriesExhausted> {
        for message in self.outgoing.drain(..) {
            ctx.out.push(encode_data(
                DeliveryMode::Unreliable,
                0,
                message.fragment,
                message.payload,
            ));
        }
        Ok(0)
    }

    fn pending(&self) -> usize {
        self.outgoing.len()
    }
}

/// Newest-wins delivery. With `reliable` set, the newest packet is resent
/// until the receiver acknowledges it or something newer supersedes it.
#[derive(Debug)]
pub struct SequencedChannel {
    reliable: bool,
    outgoing: VecDeque<Outgoing>,
    local_sequence: SeqNum,
    retransmit: RetransmitQueue,
    last_received: Option<SeqNum>,
    ack_pending: bool,
}

impl SequencedChannel {
    pub fn new(reliable: bool) -> Self {
        Self {
            reliable,
            outgoing: VecDeque::new(),
            local_sequence: 0,
            retransmit: RetransmitQueue::new(),
            last_received: None,
            ack_pending: false,
        }
    }
}

impl Channel for SequencedChannel {
    fn mode(&self) -> DeliveryMode {
        if self.reliable {
            DeliveryMode::ReliableSequenced
        } else {
            DeliveryMode::Sequenced
        }
    }

    fn enqueue(&mut self, payload: Bytes, fragment: Option<FragmentHeader>) {
        self.outgoing.push_back(Outgoing { payload, fragment });
    }

    fn receive(&mut self, packet: DataPacket, delivered: &mut Vec<Delivery>) -> Inbound {
        if self.reliable {
            self.ack_pending = true;
        }

        let fresh = match self.last_received {
            None => true,
            Some(last) => seq_after(packet.sequence, last),
        };
        if !fresh {
            return if self.last_received == Some(packet.sequence) {
                Inbound::Duplicate
            } else {
                Inbound::Stale
            };
        }

        self.last_received = Some(packet.sequence);
        delivered.push(Delivery {
            payload: packet.payload,
            fragment: packet.fragment,
        });
        Inbound::Accepted
    }

    fn handle_ack(&mut self, ack: &AckPacket, now: Instant, rtt: &mut RttEstimator) {
        if let Some(acked) = self.retransmit.acknowledge(ack.window_start, now) {
            if let Some(sample) = acked.rtt_sample {
                rtt.update(sample);
            }
        }
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>) -> Result<usize, RetriesExhausted> {
        let mode = self.mode();

        if self.ack_pending {
            self.ack_pending = false;
            if let Some(last) = self.last_received {
                ctx.out.push(
                    Packet::Ack(AckPacket {
                        mode,
                        window_start: last,
                        mask: 0,
                    })
                    .to_bytes(),
                );
            }
        }

        while let Some(message) = self.outgoing.pop_front() {
            let sequence = self.local_sequence;
            self.local_sequence = self.local_sequence.wrapping_add(1);

            let datagram = encode_data(mode, sequence, message.fragment, message.payload);
            if self.reliable {
                // Only the newest packet is worth resending
                self.retransmit.clear();
                self.retransmit
                    .track(sequence, datagram.clone(), ctx.now, ctx.rto);
            }
            ctx.out.push(datagram);
        }

        if self.reliable {
            self.retransmit
                .poll_due(ctx.now, ctx.max_rto, ctx.max_retries, ctx.out)
        } else {
            Ok(0)
        }
    }

    fn pending(&self) -> usize {
        self.outgoing.len() + self.retransmit.len()
    }
}

/// Exactly-once delivery over a sliding window, in send order when `ordered`
#[derive(Debug)]
pub struct ReliableChannel {
    ordered: bool,

    // Send side
    outgoing: VecDeque<Outgoing>,
    local_sequence: SeqNum,
    local_window_start: SeqNum,
    retransmit: RetransmitQueue,

    // Receive side
    next_expected: SeqNum,
    ack_window: AckWindow,
    early: Vec<Option<Delivery>>,
}

impl ReliableChannel {
    pub fn new(ordered: bool) -> Self {
        let early = if ordered {
            (0..WINDOW_SIZE).map(|_| None).collect()
        } else {
            Vec::new()
        };

        Self {
            ordered,
            outgoing: VecDeque::new(),
            local_sequence: 0,
            local_window_start: 0,
            retransmit: RetransmitQueue::new(),
            next_expected: 0,
            ack_window: AckWindow::new(),
            early,
        }
    }

    fn window_full(&self) -> bool {
        seq_diff(self.local_sequence, self.local_window_start) >= WINDOW_SIZE as i16
    }

    fn slot(sequence: SeqNum) -> usize {
        (sequence % WINDOW_SIZE) as usize
    }
}

impl Channel for ReliableChannel {
    fn mode(&self) -> DeliveryMode {
        if self.ordered {
            DeliveryMode::ReliableOrdered
        } else {
            DeliveryMode::ReliableUnordered
        }
    }

    fn enqueue(&mut self, payload: Bytes, fragment: Option<FragmentHeader>) {
        self.outgoing.push_back(Outgoing { payload, fragment });
    }

    fn receive(&mut self, packet: DataPacket, delivered: &mut Vec<Delivery>) -> Inbound {
        let sequence = packet.sequence;
        match self.ack_window.record(sequence, self.next_expected) {
            Receipt::Duplicate => return Inbound::Duplicate,
            Receipt::OutOfWindow => return Inbound::Stale,
            Receipt::New => {}
        }

        let delivery = Delivery {
            payload: packet.payload,
            fragment: packet.fragment,
        };

        if self.ordered {
            if sequence != self.next_expected {
                self.early[Self::slot(sequence)] = Some(delivery);
                return Inbound::Accepted;
            }

            delivered.push(delivery);
            self.next_expected = self.next_expected.wrapping_add(1);
            while let Some(buffered) = self.early[Self::slot(self.next_expected)].take() {
                delivered.push(buffered);
                self.next_expected = self.next_expected.wrapping_add(1);
            }
        } else {
            delivered.push(delivery);
            while self.ack_window.is_received(self.next_expected) {
                self.next_expected = self.next_expected.wrapping_add(1);
            }
        }

        Inbound::Accepted
    }

    fn handle_ack(&mut self, ack: &AckPacket, now: Instant, rtt: &mut RttEstimator) {
        let mut sequence = self.local_window_start;
        while sequence != self.local_sequence {
            let rel = seq_diff(sequence, ack.window_start);
            if (0..WINDOW_SIZE as i16).contains(&rel) && ack.mask & (1u64 << rel) != 0 {
                if let Some(acked) = self.retransmit.acknowledge(sequence, now) {
                    if let Some(sample) = acked.rtt_sample {
                        rtt.update(sample);
                    }
                }
            }
            sequence = sequence.wrapping_add(1);
        }

        while self.local_window_start != self.local_sequence
            && !self.retransmit.contains(self.local_window_start)
        {
            self.local_window_start = self.local_window_start.wrapping_add(1);
        }
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>) -> Result<usize, RetriesExhausted> {
        let mode = self.mode();

        if let Some(ack) = self.ack_window.take_ack(mode) {
            ctx.out.push(Packet::Ack(ack).to_bytes());
        }

        while !self.window_full() {
            let Some(message) = self.outgoing.pop_front() else {
                break;
            };
            let sequence = self.local_sequence;
            self.local_sequence = self.local_sequence.wrapping_add(1);

            let datagram = encode_data(mode, sequence, message.fragment, message.payload);
            self.retransmit
                .track(sequence, datagram.clone(), ctx.now, ctx.rto);
            ctx.out.push(datagram);
        }

        self.retransmit
            .poll_due(ctx.now, ctx.max_rto, ctx.max_retries, ctx.out)
    }

    fn pending(&self) -> usize {
        self.outgoing.len() + self.retransmit.len()
    }
}

/// The five channels of one peer, indexed by [`DeliveryMode::index`]
#[derive(Debug)]
pub struct ChannelSet {
    channels: Vec<Box<dyn Channel>>,
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSet {
    pub fn new() -> Self {
        let channels = DeliveryMode::ALL
            .iter()
            .map(|mode| -> Box<dyn Channel> {
                match mode {
                    DeliveryMode::ReliableUnordered => Box::new(ReliableChannel::new(false)),
                    DeliveryMode::Sequenced => Box::new(SequencedChannel::new(false)),
                    DeliveryMode::ReliableOrdered => Box::new(ReliableChannel::new(true)),
                    DeliveryMode::ReliableSequenced => Box::new(SequencedChannel::new(true)),
                    DeliveryMode::Unreliable => Box::new(UnreliableChannel::default()),
                }
            })
            .collect();
        Self { channels }
    }

    pub fn get_mut(&mut self, mode: DeliveryMode) -> &mut dyn Channel {
        self.channels[mode.index()].as_mut()
    }

    /// Flush every channel, stopping at the first exhausted retransmission
    pub fn flush(&mut self, ctx: &mut FlushContext<'_>) -> Result<usize, RetriesExhausted> {
        let mut resent = 0;
        for channel in &mut self.channels {
            resent += channel.flush(ctx)?;
        }
        Ok(resent)
    }

    /// Messages queued or in flight across all channels
    pub fn pending(&self) -> usize {
        self.channels.iter().map(|channel| channel.pending()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTO: Duration = Duration::from_millis(100);

    fn flush(channel: &mut dyn Channel, now: Instant) -> Vec<Packet> {
        let mut out = Vec::new();
        let mut ctx = FlushContext {
            now,
            rto: RTO,
            max_rto: Duration::from_secs(1),
            max_retries: 5,
            out: &mut out,
        };
        channel.flush(&mut ctx).unwrap();
        out.into_iter().map(|d| Packet::decode(d).unwrap()).collect()
    }

    fn data(packets: Vec<Packet>) -> Vec<DataPacket> {
        packets
            .into_iter()
            .filter_map(|p| match p {
                Packet::Data(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    fn acks(packets: &[Packet]) -> Vec<AckPacket> {
        packets
            .iter()
            .filter_map(|p| match p {
                Packet::Ack(a) => Some(*a),
                _ => None,
            })
            .collect()
    }

    fn payloads(delivered: &[Delivery]) -> Vec<&[u8]> {
        delivered.iter().map(|d| d.payload.as_ref()).collect()
    }

    #[test]
    fn test_ordered_buffers_until_gap_fills() {
        let now = Instant::now();
        let mut sender = ReliableChannel::new(true);
        let mut receiver = ReliableChannel::new(true);

        for msg in [&b"a"[..], b"b", b"c"] {
            sender.enqueue(Bytes::copy_from_slice(msg), None);
        }
        let mut packets = data(flush(&mut sender, now));
        assert_eq!(packets.len(), 3);

        let mut delivered = Vec::new();
        let first = packets.remove(0);
        // Arrive as 2, 1, 0
        for packet in packets.into_iter().rev() {
            assert_eq!(receiver.receive(packet, &mut delivered), Inbound::Accepted);
        }
        assert!(delivered.is_empty());

        assert_eq!(receiver.receive(first.clone(), &mut delivered), Inbound::Accepted);
        assert_eq!(payloads(&delivered), vec![&b"a"[..], b"b", b"c"]);
        assert_eq!(receiver.receive(first, &mut delivered), Inbound::Duplicate);
        assert_eq!(delivered.len(), 3);
    }

    #[test]
    fn test_unordered_delivers_immediately_once() {
        let now = Instant::now();
        let mut sender = ReliableChannel::new(false);
        let mut receiver = ReliableChannel::new(false);

        sender.enqueue(Bytes::from_static(b"x"), None);
        sender.enqueue(Bytes::from_static(b"y"), None);
        let packets = data(flush(&mut sender, now));

        let mut delivered = Vec::new();
        receiver.receive(packets[1].clone(), &mut delivered);
        assert_eq!(payloads(&delivered), vec![&b"y"[..]]);
        receiver.receive(packets[0].clone(), &mut delivered);
        receiver.receive(packets[1].clone(), &mut delivered);
        assert_eq!(payloads(&delivered), vec![&b"y"[..], b"x"]);
        assert_eq!(receiver.next_expected, 2);
    }

    #[test]
    fn test_ack_clears_retransmission() {
        let now = Instant::now();
        let mut sender = ReliableChannel::new(true);
        let mut receiver = ReliableChannel::new(true);
        let mut rtt = RttEstimator::new(RTO, Duration::from_millis(10), Duration::from_secs(1));

        sender.enqueue(Bytes::from_static(b"hello"), None);
        let packets = data(flush(&mut sender, now));
        let mut delivered = Vec::new();
        receiver.receive(packets[0].clone(), &mut delivered);

        let reply = flush(&mut receiver, now);
        let ack = acks(&reply)[0];
        sender.handle_ack(&ack, now + Duration::from_millis(20), &mut rtt);

        assert_eq!(sender.pending(), 0);
        assert_eq!(rtt.srtt(), Some(Duration::from_millis(20)));
        assert!(flush(&mut sender, now + RTO * 3).is_empty());
    }

    #[test]
    fn test_lost_packet_is_retransmitted() {
        let now = Instant::now();
        let mut sender = ReliableChannel::new(true);
        sender.enqueue(Bytes::from_static(b"lost"), None);
        assert_eq!(data(flush(&mut sender, now)).len(), 1);

        assert!(flush(&mut sender, now + RTO / 2).is_empty());
        let resent = data(flush(&mut sender, now + RTO));
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].sequence, 0);
        assert_eq!(resent[0].payload, Bytes::from_static(b"lost"));
    }

    #[test]
    fn test_send_window_limits_in_flight() {
        let now = Instant::now();
        let mut sender = ReliableChannel::new(true);
        let mut receiver = ReliableChannel::new(true);
        let mut rtt = RttEstimator::new(RTO, Duration::from_millis(10), Duration::from_secs(1));

        for i in 0..100u32 {
            sender.enqueue(Bytes::copy_from_slice(&i.to_le_bytes()), None);
        }
        let first = data(flush(&mut sender, now));
        assert_eq!(first.len(), WINDOW_SIZE as usize);
        assert_eq!(sender.pending(), 100);

        let mut delivered = Vec::new();
        for packet in first {
            receiver.receive(packet, &mut delivered);
        }
        let ack = acks(&flush(&mut receiver, now))[0];
        sender.handle_ack(&ack, now, &mut rtt);

        let rest = data(flush(&mut sender, now));
        assert_eq!(rest.len(), 36);
        assert_eq!(rest[0].sequence, 64);
    }

    #[test]
    fn test_sequenced_drops_stale() {
        let now = Instant::now();
        let mut sender = SequencedChannel::new(false);
        let mut receiver = SequencedChannel::new(false);

        for msg in [&b"1"[..], b"2", b"3"] {
            sender.enqueue(Bytes::copy_from_slice(msg), None);
        }
        let packets = data(flush(&mut sender, now));

        let mut delivered = Vec::new();
        assert_eq!(receiver.receive(packets[2].clone(), &mut delivered), Inbound::Accepted);
        assert_eq!(receiver.receive(packets[0].clone(), &mut delivered), Inbound::Stale);
        assert_eq!(receiver.receive(packets[1].clone(), &mut delivered), Inbound::Stale);
        assert_eq!(payloads(&delivered), vec![&b"3"[..]]);
        assert!(flush(&mut receiver, now).is_empty());
    }

    #[test]
    fn test_reliable_sequenced_resends_only_newest() {
        let now = Instant::now();
        let mut sender = SequencedChannel::new(true);
        let mut receiver = SequencedChannel::new(true);
        let mut rtt = RttEstimator::new(RTO, Duration::from_millis(10), Duration::from_secs(1));

        sender.enqueue(Bytes::from_static(b"old"), None);
        sender.enqueue(Bytes::from_static(b"new"), None);
        assert_eq!(data(flush(&mut sender, now)).len(), 2);

        let resent = data(flush(&mut sender, now + RTO));
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].payload, Bytes::from_static(b"new"));

        let mut delivered = Vec::new();
        receiver.receive(resent[0].clone(), &mut delivered);
        let ack = acks(&flush(&mut receiver, now + RTO))[0];
        assert_eq!(ack.window_start, 1);

        sender.handle_ack(&ack, now + RTO, &mut rtt);
        assert_eq!(sender.pending(), 0);
    }

    #[test]
    fn test_retries_exhausted() {
        let now = Instant::now();
        let mut sender = ReliableChannel::new(false);
        sender.enqueue(Bytes::from_static(b"void"), None);

        let mut out = Vec::new();
        let mut result = Ok(0);
        for step in 0..100u32 {
            let mut ctx = FlushContext {
                now: now + Duration::from_millis(100) * step,
                rto: RTO,
                max_rto: Duration::from_millis(200),
                max_retries: 3,
                out: &mut out,
            };
            result = sender.flush(&mut ctx);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err().sequence, 0);
        // One original plus three retransmissions
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_channel_set_routes_by_mode() {
        let mut set = ChannelSet::new();
        for mode in DeliveryMode::ALL {
            assert_eq!(set.get_mut(mode).mode(), mode);
        }
        set.get_mut(DeliveryMode::Unreliable)
            .enqueue(Bytes::from_static(b"u"), None);
        assert_eq!(set.pending(), 1);
    }
}
