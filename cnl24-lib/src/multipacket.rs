//! Multipacket transfer reassembly.
//!
//! Bulk payloads (history, basal patterns) arrive as an INITIATE message
//! announcing the segment geometry, followed by numbered SEGMENT messages in
//! whatever order the radio delivers them. The session tracks one slot per
//! expected packet; the driver asks [`MultipacketSession::missing_segments`]
//! for the earliest gap when the stream stalls and requests a resend of
//! exactly that run. Later gaps are repaired on subsequent cycles.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::constants::{MULTIPACKET_SEGMENT_MS, MULTIPACKET_TIMEOUT_MS};
use crate::error::CnlError;
use crate::responses::{InitiateMultipacket, MultipacketSegment};

#[derive(Debug)]
pub struct MultipacketSession {
    segment_size: u32,
    packet_size: u16,
    last_packet_size: u16,
    packets_to_fetch: u16,
    slots: Vec<Option<Bytes>>,
    filled: u16,
}

impl MultipacketSession {
    pub fn new(init: &InitiateMultipacket) -> Result<Self, CnlError> {
        let packets = init.packets_to_fetch()?;
        if packets == 0 {
            return Err(CnlError::MultipacketIntegrity(
                "transfer announced zero packets".into(),
            ));
        }
        let session = Self {
            segment_size: init.segment_size()?,
            packet_size: init.packet_size()?,
            last_packet_size: init.last_packet_size()?,
            packets_to_fetch: packets,
            slots: vec![None; packets as usize],
            filled: 0,
        };
        debug!(
            segment_size = session.segment_size,
            packet_size = session.packet_size,
            last_packet_size = session.last_packet_size,
            packets_to_fetch = session.packets_to_fetch,
            "multipacket transfer initiated"
        );
        Ok(session)
    }

    pub fn packets_to_fetch(&self) -> u16 {
        self.packets_to_fetch
    }

    pub fn segments_filled(&self) -> u16 {
        self.filled
    }

    pub fn payload_complete(&self) -> bool {
        self.filled == self.packets_to_fetch
    }

    fn last_packet_number(&self) -> u16 {
        self.packets_to_fetch - 1
    }

    fn expected_size(&self, packet_number: u16) -> u16 {
        if packet_number == self.last_packet_number() {
            self.last_packet_size
        } else {
            self.packet_size
        }
    }

    /// Store one received segment. Returns `true` if the segment filled a new
    /// slot. Duplicates and size mismatches are dropped, not fatal: the pump
    /// resends freely and a bad segment will be covered by a later resend
    /// request.
    pub fn add_segment(&mut self, segment: &MultipacketSegment) -> Result<bool, CnlError> {
        let packet_number = segment.packet_number()?;
        let payload = segment.segment_payload();

        let expected = self.expected_size(packet_number);
        let Some(slot) = self.slots.get_mut(packet_number as usize) else {
            debug!(packet_number, "segment index beyond announced transfer, dropped");
            return Ok(false);
        };
        if slot.is_some() {
            debug!(
                packet_number,
                filled = self.filled,
                "repeated multipacket segment, dropped"
            );
            return Ok(false);
        }
        if payload.len() != expected as usize {
            debug!(
                packet_number,
                size = payload.len(),
                expected,
                "multipacket segment size mismatch, dropped"
            );
            return Ok(false);
        }

        *slot = Some(payload);
        self.filled += 1;
        info!(
            segment = packet_number + 1,
            of = self.packets_to_fetch,
            filled = self.filled,
            "got multipacket segment"
        );
        Ok(true)
    }

    /// Locate the first gap in sequential fill order: `(first_missing_index,
    /// contiguous_missing_count)`. Gaps further along are left for the next
    /// repair cycle.
    pub fn missing_segments(&self) -> (u16, u16) {
        let mut position = 0u16;
        let mut missing = 0u16;
        for slot in &self.slots {
            if slot.is_some() {
                if missing > 0 {
                    break;
                }
                position += 1;
            } else {
                missing += 1;
            }
        }
        debug!(position, missing, "first missing multipacket run");
        (position, missing)
    }

    /// Read timeout while `outstanding` segments are still expected, scaled so
    /// large transfers get proportionally more time.
    pub fn read_timeout_ms(&self, outstanding: u16) -> u64 {
        MULTIPACKET_TIMEOUT_MS.max(MULTIPACKET_SEGMENT_MS * outstanding as u64)
    }

    /// True when a stalled transfer is beyond saving: nothing ever arrived, or
    /// less than a fifth of the segments made it before the stall.
    pub fn stalled_beyond_recovery(&self) -> bool {
        self.filled == 0 || (self.filled as u32 * 100) / (self.packets_to_fetch as u32) < 20
    }

    /// Concatenate all slots in order. Only valid once [`payload_complete`]
    /// is true.
    ///
    /// [`payload_complete`]: MultipacketSession::payload_complete
    pub fn assemble(&self) -> Result<Bytes, CnlError> {
        if !self.payload_complete() {
            return Err(CnlError::MultipacketIntegrity(format!(
                "assemble with {}/{} segments",
                self.filled, self.packets_to_fetch
            )));
        }
        let mut out = BytesMut::with_capacity(self.segment_size as usize);
        for slot in &self.slots {
            out.extend_from_slice(slot.as_ref().expect("complete transfer has no empty slot"));
        }
        Ok(out.freeze())
    }
}
