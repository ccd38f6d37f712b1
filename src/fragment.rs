//! Splitting oversized messages and reassembling them on the far side

use crate::error::{NetError, Result};
use crate::protocol::FragmentHeader;

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Splits payloads into MTU-sized fragments, numbering each group
#[derive(Debug, Default)]
pub struct Fragmenter {
    next_id: u16,
}

impl Fragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `payload` into chunks of at most `chunk_size` bytes.
    ///
    /// Fails when more than `max_fragments` would be needed.
    pub fn split(
        &mut self,
        payload: &Bytes,
        chunk_size: usize,
        max_fragments: u16,
    ) -> Result<Vec<(FragmentHeader, Bytes)>> {
        if chunk_size == 0 {
            return Err(NetError::buffer("Fragment size must be non-zero"));
        }

        let count = payload.len().div_ceil(chunk_size).max(1);
        if count > max_fragments as usize {
            return Err(NetError::buffer(format!(
                "Message of {} bytes needs {count} fragments, limit is {max_fragments}",
                payload.len()
            )));
        }

        let fragment_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let fragments = (0..count)
            .map(|index| {
                let start = index * chunk_size;
                let end = (start + chunk_size).min(payload.len());
                let header = FragmentHeader {
                    fragment_id,
                    index: index as u16,
                    count: count as u16,
                };
                (header, payload.slice(start..end))
            })
            .collect();

        Ok(fragments)
    }
}

#[derive(Debug)]
struct PartialMessage {
    parts: Vec<Option<Bytes>>,
    received: u16,
    total_len: usize,
    last_arrival: Instant,
}

/// Collects fragments until every part of a group has arrived
#[derive(Debug)]
pub struct FragmentAssembler {
    groups: HashMap<u16, PartialMessage>,
    timeout: Duration,
    max_fragments: u16,
}

impl FragmentAssembler {
    pub fn new(timeout: Duration, max_fragments: u16) -> Self {
        Self {
            groups: HashMap::new(),
            timeout,
            max_fragments,
        }
    }

    /// Add one fragment, returning the whole message once complete.
    ///
    /// Duplicate parts are ignored. A part whose count disagrees with the
    /// rest of its group is rejected.
    pub fn insert(
        &mut self,
        header: FragmentHeader,
        payload: Bytes,
        now: Instant,
    ) -> Result<Option<Bytes>> {
        if header.count == 0 || header.index >= header.count {
            return Err(NetError::malformed("Fragment index out of range"));
        }
        if header.count > self.max_fragments {
            return Err(NetError::malformed(format!(
                "Fragment group of {} parts exceeds limit {}",
                header.count, self.max_fragments
            )));
        }

        let group = self
            .groups
            .entry(header.fragment_id)
            .or_insert_with(|| PartialMessage {
                parts: vec![None; header.count as usize],
                received: 0,
                total_len: 0,
                last_arrival: now,
            });

        if group.parts.len() != header.count as usize {
            return Err(NetError::malformed(format!(
                "Fragment group {} count changed from {} to {}",
                header.fragment_id,
                group.parts.len(),
                header.count
            )));
        }

        let slot = &mut group.parts[header.index as usize];
        if slot.is_some() {
            return Ok(None);
        }
        group.total_len += payload.len();
        *slot = Some(payload);
        group.received += 1;
        group.last_arrival = now;

        if group.received < header.count {
            return Ok(None);
        }

        let Some(group) = self.groups.remove(&header.fragment_id) else {
            return Ok(None);
        };
        let mut message = BytesMut::with_capacity(group.total_len);
        for part in group.parts.into_iter().flatten() {
            message.extend_from_slice(&part);
        }
        Ok(Some(message.freeze()))
    }

    /// Drop groups that received no new part within the timeout
    pub fn purge_expired(&mut self, now: Instant) -> Vec<NetError> {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        self.groups.retain(|&fragment_id, group| {
            let alive = now.saturating_duration_since(group.last_arrival) < timeout;
            if !alive {
                debug!(
                    fragment_id,
                    received = group.received,
                    count = group.parts.len(),
                    "Dropping incomplete fragment group"
                );
                expired.push(NetError::AssemblyTimeout { fragment_id });
            }
            alive
        });
        expired
    }

    /// Groups currently being assembled
    pub fn in_progress(&self) -> usize {
        self.groups.len()
    }
}
