//! Wire types, constants, and the packet framer
//!
//! Every datagram starts with a [`PacketKind`] tag byte. All integers are
//! little-endian. Decoding is bounds-checked: anything truncated, unknown, or
//! inconsistent yields [`NetError::MalformedPacket`] and is never a panic.
//!
//! When checksums are enabled the framed datagram is wrapped by [`seal`],
//! which appends a CRC-32 trailer, and unwrapped by [`unseal`] before decoding.

use crate::error::{NetError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Identifies this protocol revision in connect requests
pub const PROTOCOL_ID: u32 = 1;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Kind + mode bytes
pub const HEADER_SIZE: usize = 2;

/// Kind + mode + sequence
pub const SEQUENCED_HEADER_SIZE: usize = HEADER_SIZE + 2;

/// Fragment id + index + count
pub const FRAGMENT_HEADER_SIZE: usize = 6;

/// Full header of a fragmented data packet
pub const FRAGMENTED_HEADER_SIZE: usize = SEQUENCED_HEADER_SIZE + FRAGMENT_HEADER_SIZE;

/// Reliable window size, equal to the ack bitmask width
pub const WINDOW_SIZE: u16 = 64;

/// Length prefix in front of each packet inside a merged datagram
pub const MERGE_ITEM_OVERHEAD: usize = 2;

/// CRC-32 trailer appended when checksums are enabled
pub const CHECKSUM_SIZE: usize = 4;

/// Path MTUs probed by discovery, smallest first
pub const MTU_CANDIDATES: [usize; 7] = [508, 1024, 1164, 1392, 1404, 1424, 1432];

const FRAGMENTED_FLAG: u8 = 0x80;

/// Sequence number type
pub type SeqNum = u16;

/// Wrapping distance from `b` to `a`
#[inline]
pub fn seq_diff(a: SeqNum, b: SeqNum) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Check if a sequence number is before another (handling wrapping)
#[inline]
pub fn seq_before(a: SeqNum, b: SeqNum) -> bool {
    seq_diff(a, b) < 0
}

/// Check if a sequence number is after another (handling wrapping)
#[inline]
pub fn seq_after(a: SeqNum, b: SeqNum) -> bool {
    seq_diff(a, b) > 0
}

/// Delivery guarantees of a logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeliveryMode {
    /// Exactly once, any order
    ReliableUnordered = 0,
    /// Newest wins, stale packets dropped, no retransmission
    Sequenced = 1,
    /// Exactly once, in send order
    ReliableOrdered = 2,
    /// Newest wins, and the newest is retransmitted until acknowledged
    ReliableSequenced = 3,
    /// Fire and forget
    Unreliable = 4,
}

impl DeliveryMode {
    /// All modes, in channel index order
    pub const ALL: [DeliveryMode; 5] = [
        DeliveryMode::ReliableUnordered,
        DeliveryMode::Sequenced,
        DeliveryMode::ReliableOrdered,
        DeliveryMode::ReliableSequenced,
        DeliveryMode::Unreliable,
    ];

    /// Parse a wire tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DeliveryMode::ReliableUnordered),
            1 => Some(DeliveryMode::Sequenced),
            2 => Some(DeliveryMode::ReliableOrdered),
            3 => Some(DeliveryMode::ReliableSequenced),
            4 => Some(DeliveryMode::Unreliable),
            _ => None,
        }
    }

    /// Channel slot for this mode
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Packets of this mode are acknowledged and retransmitted
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            DeliveryMode::ReliableUnordered
                | DeliveryMode::ReliableOrdered
                | DeliveryMode::ReliableSequenced
        )
    }

    /// Payloads larger than one datagram may be split
    pub fn can_fragment(self) -> bool {
        matches!(
            self,
            DeliveryMode::ReliableUnordered | DeliveryMode::ReliableOrdered
        )
    }

    /// A sequence number is carried on the wire
    pub fn has_sequence(self) -> bool {
        self != DeliveryMode::Unreliable
    }

    /// Header size of an unfragmented data packet in this mode
    pub fn header_size(self) -> usize {
        if self.has_sequence() {
            SEQUENCED_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryMode::ReliableUnordered => "ReliableUnordered",
            DeliveryMode::Sequenced => "Sequenced",
            DeliveryMode::ReliableOrdered => "ReliableOrdered",
            DeliveryMode::ReliableSequenced => "ReliableSequenced",
            DeliveryMode::Unreliable => "Unreliable",
        };
        f.write_str(name)
    }
}

/// Leading tag byte of every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Data = 0,
    Ack = 1,
    Ping = 2,
    Pong = 3,
    ConnectRequest = 4,
    ConnectAccept = 5,
    ConnectReject = 6,
    Disconnect = 7,
    Unconnected = 8,
    Merged = 9,
    MtuCheck = 10,
    MtuOk = 11,
}

impl PacketKind {
    /// Parse a wire tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PacketKind::Data),
            1 => Some(PacketKind::Ack),
            2 => Some(PacketKind::Ping),
            3 => Some(PacketKind::Pong),
            4 => Some(PacketKind::ConnectRequest),
            5 => Some(PacketKind::ConnectAccept),
            6 => Some(PacketKind::ConnectReject),
            7 => Some(PacketKind::Disconnect),
            8 => Some(PacketKind::Unconnected),
            9 => Some(PacketKind::Merged),
            10 => Some(PacketKind::MtuCheck),
            11 => Some(PacketKind::MtuOk),
            _ => None,
        }
    }
}

/// Position of one fragment within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub fragment_id: u16,
    pub index: u16,
    pub count: u16,
}

/// Application data on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub mode: DeliveryMode,
    /// Zero and absent on the wire for unreliable packets
    pub sequence: SeqNum,
    pub fragment: Option<FragmentHeader>,
    pub payload: Bytes,
}

impl DataPacket {
    /// Encoded size of this packet
    pub fn size(&self) -> usize {
        let header = if self.fragment.is_some() {
            FRAGMENTED_HEADER_SIZE
        } else {
            self.mode.header_size()
        };
        header + self.payload.len()
    }
}

/// Selective acknowledgement for a reliable channel.
///
/// Bit `i` of `mask` acknowledges sequence `window_start + i`. The
/// reliable-sequenced channel acknowledges a single sequence in
/// `window_start` and leaves `mask` empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub mode: DeliveryMode,
    pub window_start: SeqNum,
    pub mask: u64,
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Ack(AckPacket),
    Ping {
        sequence: SeqNum,
    },
    Pong {
        sequence: SeqNum,
    },
    ConnectRequest {
        protocol_id: u32,
        connection_id: u64,
        key: String,
    },
    ConnectAccept {
        connection_id: u64,
    },
    ConnectReject {
        connection_id: u64,
        reason: Bytes,
    },
    Disconnect {
        connection_id: u64,
        data: Bytes,
    },
    Unconnected {
        payload: Bytes,
    },
    /// Several encoded packets for one peer sharing a datagram
    Merged {
        packets: Vec<Bytes>,
    },
    /// Padded so the whole datagram is `mtu` bytes on the wire
    MtuCheck {
        mtu: u16,
        padding: usize,
    },
    MtuOk {
        mtu: u16,
    },
}

impl Packet {
    /// Wire tag of this packet
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Data(_) => PacketKind::Data,
            Packet::Ack(_) => PacketKind::Ack,
            Packet::Ping { .. } => PacketKind::Ping,
            Packet::Pong { .. } => PacketKind::Pong,
            Packet::ConnectRequest { .. } => PacketKind::ConnectRequest,
            Packet::ConnectAccept { .. } => PacketKind::ConnectAccept,
            Packet::ConnectReject { .. } => PacketKind::ConnectReject,
            Packet::Disconnect { .. } => PacketKind::Disconnect,
            Packet::Unconnected { .. } => PacketKind::Unconnected,
            Packet::Merged { .. } => PacketKind::Merged,
            Packet::MtuCheck { .. } => PacketKind::MtuCheck,
            Packet::MtuOk { .. } => PacketKind::MtuOk,
        }
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        match self {
            Packet::Data(data) => data.size(),
            Packet::Ack(_) => HEADER_SIZE + 2 + 8,
            Packet::Ping { .. } | Packet::Pong { .. } => 1 + 2,
            Packet::ConnectRequest { key, .. } => 1 + 4 + 8 + key.len(),
            Packet::ConnectAccept { .. } => 1 + 8,
            Packet::ConnectReject { reason, .. } => 1 + 8 + reason.len(),
            Packet::Disconnect { data, .. } => 1 + 8 + data.len(),
            Packet::Unconnected { payload } => 1 + payload.len(),
            Packet::Merged { packets } => {
                1 + packets
                    .iter()
                    .map(|p| MERGE_ITEM_OVERHEAD + p.len())
                    .sum::<usize>()
            }
            Packet::MtuCheck { padding, .. } => 1 + 2 + padding,
            Packet::MtuOk { .. } => 1 + 2,
        }
    }

    /// Encode packet into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());
        buf.put_u8(self.kind() as u8);

        match self {
            Packet::Data(data) => {
                let mut mode = data.mode as u8;
                if data.fragment.is_some() {
                    mode |= FRAGMENTED_FLAG;
                }
                buf.put_u8(mode);
                if data.mode.has_sequence() {
                    buf.put_u16_le(data.sequence);
                }
                if let Some(fragment) = data.fragment {
                    buf.put_u16_le(fragment.fragment_id);
                    buf.put_u16_le(fragment.index);
                    buf.put_u16_le(fragment.count);
                }
                buf.extend_from_slice(&data.payload);
            }
            Packet::Ack(ack) => {
                buf.put_u8(ack.mode as u8);
                buf.put_u16_le(ack.window_start);
                buf.put_u64_le(ack.mask);
            }
            Packet::Ping { sequence } | Packet::Pong { sequence } => {
                buf.put_u16_le(*sequence);
            }
            Packet::ConnectRequest {
                protocol_id,
                connection_id,
                key,
            } => {
                buf.put_u32_le(*protocol_id);
                buf.put_u64_le(*connection_id);
                buf.extend_from_slice(key.as_bytes());
            }
            Packet::ConnectAccept { connection_id } => {
                buf.put_u64_le(*connection_id);
            }
            Packet::ConnectReject {
                connection_id,
                reason: data,
            }
            | Packet::Disconnect {
                connection_id,
                data,
            } => {
                buf.put_u64_le(*connection_id);
                buf.extend_from_slice(data);
            }
            Packet::Unconnected { payload } => {
                buf.extend_from_slice(payload);
            }
            Packet::Merged { packets } => {
                for packet in packets {
                    buf.put_u16_le(packet.len() as u16);
                    buf.extend_from_slice(packet);
                }
            }
            Packet::MtuCheck { mtu, padding } => {
                buf.put_u16_le(*mtu);
                buf.put_bytes(0, *padding);
            }
            Packet::MtuOk { mtu } => {
                buf.put_u16_le(*mtu);
            }
        }
    }

    /// Probe that fills a datagram of exactly `mtu` bytes once `trailer`
    /// checksum bytes are appended
    pub fn mtu_check(mtu: u16, trailer: usize) -> Self {
        Packet::MtuCheck {
            mtu,
            padding: (mtu as usize).saturating_sub(1 + 2 + trailer),
        }
    }

    /// Encode into a fresh, frozen buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a datagram
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        ensure(&buf, 1, "kind")?;
        let tag = buf.get_u8();
        let kind = PacketKind::from_u8(tag)
            .ok_or_else(|| NetError::malformed(format!("unknown packet kind {tag}")))?;

        let packet = match kind {
            PacketKind::Data => Packet::Data(decode_data(buf)?),
            PacketKind::Ack => {
                ensure(&buf, 1 + 2 + 8, "ack")?;
                let mode = decode_mode(buf.get_u8())?;
                if !mode.is_reliable() {
                    return Err(NetError::malformed(format!("ack for unreliable mode {mode}")));
                }
                let window_start = buf.get_u16_le();
                let mask = buf.get_u64_le();
                expect_end(&buf, "ack")?;
                Packet::Ack(AckPacket {
                    mode,
                    window_start,
                    mask,
                })
            }
            PacketKind::Ping | PacketKind::Pong => {
                ensure(&buf, 2, "ping sequence")?;
                let sequence = buf.get_u16_le();
                expect_end(&buf, "ping")?;
                if kind == PacketKind::Ping {
                    Packet::Ping { sequence }
                } else {
                    Packet::Pong { sequence }
                }
            }
            PacketKind::ConnectRequest => {
                ensure(&buf, 4 + 8, "connect request")?;
                let protocol_id = buf.get_u32_le();
                let connection_id = buf.get_u64_le();
                let key = String::from_utf8(buf.to_vec())
                    .map_err(|_| NetError::malformed("connection key is not UTF-8"))?;
                Packet::ConnectRequest {
                    protocol_id,
                    connection_id,
                    key,
                }
            }
            PacketKind::ConnectAccept => {
                ensure(&buf, 8, "connect accept")?;
                let connection_id = buf.get_u64_le();
                expect_end(&buf, "connect accept")?;
                Packet::ConnectAccept { connection_id }
            }
            PacketKind::ConnectReject => {
                ensure(&buf, 8, "connect reject")?;
                let connection_id = buf.get_u64_le();
                Packet::ConnectReject {
                    connection_id,
                    reason: buf,
                }
            }
            PacketKind::Disconnect => {
                ensure(&buf, 8, "disconnect")?;
                let connection_id = buf.get_u64_le();
                Packet::Disconnect {
                    connection_id,
                    data: buf,
                }
            }
            PacketKind::Unconnected => Packet::Unconnected { payload: buf },
            PacketKind::Merged => Packet::Merged {
                packets: decode_merged(buf)?,
            },
            PacketKind::MtuCheck => {
                ensure(&buf, 2, "mtu check")?;
                let mtu = buf.get_u16_le();
                Packet::MtuCheck {
                    mtu,
                    padding: buf.remaining(),
                }
            }
            PacketKind::MtuOk => {
                ensure(&buf, 2, "mtu ok")?;
                let mtu = buf.get_u16_le();
                expect_end(&buf, "mtu ok")?;
                Packet::MtuOk { mtu }
            }
        };

        Ok(packet)
    }
}

fn decode_mode(tag: u8) -> Result<DeliveryMode> {
    DeliveryMode::from_u8(tag)
        .ok_or_else(|| NetError::malformed(format!("unknown delivery mode {tag}")))
}

fn decode_merged(mut buf: Bytes) -> Result<Vec<Bytes>> {
    let mut packets = Vec::new();
    while buf.has_remaining() {
        ensure(&buf, MERGE_ITEM_OVERHEAD, "merged length")?;
        let len = buf.get_u16_le() as usize;
        if len == 0 {
            return Err(NetError::malformed("empty packet inside merged datagram"));
        }
        ensure(&buf, len, "merged packet")?;
        let packet = buf.split_to(len);
        if packet[0] == PacketKind::Merged as u8 {
            return Err(NetError::malformed("nested merged datagram"));
        }
        packets.push(packet);
    }
    if packets.is_empty() {
        return Err(NetError::malformed("merged datagram without packets"));
    }
    Ok(packets)
}

fn decode_data(mut buf: Bytes) -> Result<DataPacket> {
    ensure(&buf, 1, "delivery mode")?;
    let raw = buf.get_u8();
    let fragmented = raw & FRAGMENTED_FLAG != 0;
    let mode = decode_mode(raw & !FRAGMENTED_FLAG)?;

    let sequence = if mode.has_sequence() {
        ensure(&buf, 2, "sequence")?;
        buf.get_u16_le()
    } else {
        0
    };

    let fragment = if fragmented {
        if !mode.can_fragment() {
            return Err(NetError::malformed(format!("fragment flag on {mode} packet")));
        }
        ensure(&buf, FRAGMENT_HEADER_SIZE, "fragment header")?;
        let header = FragmentHeader {
            fragment_id: buf.get_u16_le(),
            index: buf.get_u16_le(),
            count: buf.get_u16_le(),
        };
        if header.count == 0 || header.index >= header.count {
            return Err(NetError::malformed(format!(
                "fragment index {} out of range for count {}",
                header.index, header.count
            )));
        }
        Some(header)
    } else {
        None
    };

    Ok(DataPacket {
        mode,
        sequence,
        fragment,
        payload: buf,
    })
}

/// Append a little-endian CRC-32 of `datagram`
pub fn seal(datagram: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(datagram.len() + CHECKSUM_SIZE);
    buf.extend_from_slice(datagram);
    buf.put_u32_le(crc32fast::hash(datagram));
    buf.freeze()
}

/// Verify and strip the trailer added by [`seal`]
pub fn unseal(mut datagram: Bytes) -> Result<Bytes> {
    if datagram.len() <= CHECKSUM_SIZE {
        return Err(NetError::malformed(format!(
            "datagram of {} bytes cannot carry a checksum",
            datagram.len()
        )));
    }
    let mut trailer = datagram.split_off(datagram.len() - CHECKSUM_SIZE);
    let expected = trailer.get_u32_le();
    let actual = crc32fast::hash(&datagram);
    if expected != actual {
        return Err(NetError::malformed(format!(
            "checksum mismatch: expected {expected:#010x}, computed {actual:#010x}"
        )));
    }
    Ok(datagram)
}

#[inline]
fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(NetError::malformed(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

#[inline]
fn expect_end(buf: &Bytes, what: &str) -> Result<()> {
    if buf.has_remaining() {
        return Err(NetError::malformed(format!(
            "{} trailing bytes after {what}",
            buf.remaining()
        )));
    }
    Ok(())
}
