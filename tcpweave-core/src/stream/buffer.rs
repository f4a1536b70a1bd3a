use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

/// How to resolve two buffered fragments that cover the same bytes with
/// different content.
///
/// Only fragments still waiting for a gap to fill are affected. Bytes that
/// were already appended to the contiguous stream are never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Keep the bytes observed first.
    FirstWrite,
    /// The newest observation replaces older buffered bytes.
    #[default]
    LastWrite,
}

/// A gap in the sequence space (bytes that were never captured).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub start_seq: u32,
    pub end_seq: u32,
}

impl SequenceGap {
    pub fn len(&self) -> u32 {
        self.end_seq.wrapping_sub(self.start_seq)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to one ingested payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Zero-length payload, nothing to do.
    Empty,
    /// Bytes were appended to the contiguous stream (including any drained
    /// fragments).
    Delivered(usize),
    /// Stored out of order, waiting for a gap to fill.
    Buffered,
    /// Every byte was already delivered or buffered.
    Duplicate,
}

/// Buffer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub segment_count: u32,
    pub retransmit_count: u32,
    pub out_of_order_count: u32,
    pub gap_count: u32,
    /// Bytes jumped over because the out-of-order limit was hit.
    pub skipped_bytes: u64,
    /// Out-of-order bytes thrown away by [`StreamBuffer::flush`].
    pub discarded_bytes: u64,
    pub bytes_available: usize,
}

/// Buffer for one direction of a TCP stream.
///
/// Fragments are placed on a 64-bit stream offset derived from the 32-bit
/// sequence number with wraparound-aware arithmetic, so ordering is correct
/// across the 2^32 boundary.
#[derive(Debug)]
pub struct StreamBuffer {
    /// Sequence number of the next byte to deliver; `None` until anchored.
    next_seq: Option<u32>,
    /// Stream offset of the next byte to deliver.
    next_offset: u64,
    /// Whether the anchor came from a SYN (definitive) vs the first payload.
    anchored_by_syn: bool,
    /// Offset ranges, ascending, of bytes that were contiguous before the
    /// origin moved back and now wait in `pending`.
    settled: Vec<(u64, u64)>,
    /// Out-of-order fragments keyed by stream offset. Ranges never overlap.
    pending: BTreeMap<u64, Bytes>,
    pending_bytes: usize,
    /// Contiguous reassembled data.
    reassembled: BytesMut,
    gaps: Vec<SequenceGap>,
    policy: OverlapPolicy,
    max_pending: usize,
    stats: BufferStats,
}

impl StreamBuffer {
    pub fn new(policy: OverlapPolicy, max_pending: usize) -> Self {
        Self {
            next_seq: None,
            next_offset: 0,
            anchored_by_syn: false,
            settled: Vec::new(),
            pending: BTreeMap::new(),
            pending_bytes: 0,
            reassembled: BytesMut::new(),
            gaps: Vec::new(),
            policy,
            max_pending,
            stats: BufferStats::default(),
        }
    }

    /// Set the initial sequence number (from SYN).
    ///
    /// A SYN that precedes the bytes already held moves the stream origin
    /// back to it, unless the origin was already fixed by an earlier SYN or
    /// bytes were skipped.
    pub fn set_initial_seq(&mut self, isn: u32) {
        let first = isn.wrapping_add(1); // SYN consumes one seq
        if self.next_seq.is_none() {
            self.next_seq = Some(first);
            self.anchored_by_syn = true;
            return;
        }

        if self.reassembled.is_empty() && self.pending.is_empty() {
            self.next_seq = Some(first);
            self.next_offset = 0;
            self.anchored_by_syn = true;
            return;
        }

        let origin = self.seq_at(0);
        if origin == first {
            self.anchored_by_syn = true;
        } else if self.can_rebase() && seq_diff(origin, first) > 0 {
            self.rebase(first, seq_diff(origin, first) as u64);
            self.anchored_by_syn = true;
        }
    }

    /// Add one segment's payload.
    pub fn ingest(&mut self, seq: u32, payload: &Bytes) -> Ingest {
        if payload.is_empty() {
            return Ingest::Empty;
        }
        self.stats.segment_count += 1;

        // If we haven't seen a SYN, use first segment's seq
        let next_seq = *self.next_seq.get_or_insert(seq);
        let mut start = self.next_offset as i64 + seq_diff(seq, next_seq) as i64;
        let before = self.reassembled.len();
        let mut held_end = None;

        // Mid-stream capture: bytes from before the first one we anchored on
        // move the stream origin back.
        if start < 0 && self.can_rebase() {
            let shift = (-start) as u64;
            self.rebase(seq, shift);
            held_end = Some(shift + before as u64);
            start = 0;
        }

        let next = self.next_offset as i64;
        let end = start + payload.len() as i64;
        let mut data = payload.clone();

        // Retransmission of delivered bytes
        if end <= next {
            self.stats.retransmit_count += 1;
            return Ingest::Duplicate;
        }

        // Partial overlap - trim the beginning
        if start < next {
            data = data.slice((next - start) as usize..);
            start = next;
        }
        let start = start as u64;

        // Fast path: in-order with nothing pending
        if start == self.next_offset && self.pending.is_empty() {
            self.append(&data);
            return Ingest::Delivered(data.len());
        }

        let end = start + data.len() as u64;
        let covered = self.covered(start, end);
        if covered == data.len() as u64 {
            self.stats.retransmit_count += 1;
            if self.policy == OverlapPolicy::FirstWrite {
                return Ingest::Duplicate;
            }
        }

        if start > self.next_offset && covered == 0 {
            self.stats.out_of_order_count += 1;
        }

        match self.policy {
            OverlapPolicy::LastWrite => {
                for (offset, piece) in self.unsettled(start, data) {
                    self.insert_last_write(offset, piece);
                }
            }
            OverlapPolicy::FirstWrite => self.insert_first_write(start, data),
        }

        self.drain_pending();
        self.enforce_limit();
        let after = self.reassembled.len();
        // Bytes delivered before the origin moved count once they rejoin
        let restored = match held_end {
            Some(end) if self.next_offset < end => 0,
            _ => before,
        };

        if after > restored {
            Ingest::Delivered(after - restored)
        } else if covered == end - start {
            Ingest::Duplicate
        } else {
            Ingest::Buffered
        }
    }

    /// Give up on any gap: out-of-order fragments are discarded and only the
    /// contiguous prefix remains. Returns the number of bytes discarded.
    pub fn flush(&mut self) -> usize {
        let discarded = self.pending_bytes;
        if let Some((&first, _)) = self.pending.first_key_value() {
            let start_seq = self.seq_at(self.next_offset);
            let end_seq = self.seq_at(first);
            self.record_gap(start_seq, end_seq);
        }
        self.pending.clear();
        self.pending_bytes = 0;
        self.settled.clear();
        self.stats.discarded_bytes += discarded as u64;
        discarded
    }

    /// Get contiguous reassembled data.
    pub fn contiguous(&self) -> &[u8] {
        &self.reassembled
    }

    /// Take the contiguous data out of the buffer.
    pub fn take_contiguous(&mut self) -> Bytes {
        std::mem::take(&mut self.reassembled).freeze()
    }

    /// Get number of bytes available.
    pub fn available(&self) -> usize {
        self.reassembled.len()
    }

    /// Bytes held out of order.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Sequence number of the next byte expected, once anchored.
    pub fn next_seq(&self) -> Option<u32> {
        self.next_seq
    }

    /// Get current gaps in the stream.
    pub fn gaps(&self) -> &[SequenceGap] {
        &self.gaps
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            gap_count: self.gaps.len() as u32,
            bytes_available: self.reassembled.len(),
            ..self.stats.clone()
        }
    }

    fn append(&mut self, data: &[u8]) {
        self.reassembled.extend_from_slice(data);
        self.advance(data.len() as u64);
    }

    fn advance(&mut self, n: u64) {
        self.next_offset += n;
        if let Some(seq) = self.next_seq.as_mut() {
            *seq = seq.wrapping_add(n as u32);
        }
    }

    /// The origin may only move while it came from payload and every byte
    /// from offset zero is still held.
    fn can_rebase(&self) -> bool {
        !self.anchored_by_syn
            && self.gaps.is_empty()
            && self.reassembled.len() as u64 == self.next_offset
    }

    /// Move the stream origin `shift` bytes back, to `origin_seq`.
    ///
    /// Everything held so far becomes pending at its new offset. Bytes that
    /// were already contiguous are recorded as settled so a later overlap
    /// cannot replace them.
    fn rebase(&mut self, origin_seq: u32, shift: u64) {
        let held = std::mem::take(&mut self.reassembled).freeze();
        let mut pending: BTreeMap<u64, Bytes> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(offset, data)| (offset + shift, data))
            .collect();
        for range in &mut self.settled {
            range.0 += shift;
            range.1 += shift;
        }
        if !held.is_empty() {
            self.settled.insert(0, (shift, shift + held.len() as u64));
            self.pending_bytes += held.len();
            pending.insert(shift, held);
        }
        self.pending = pending;
        self.next_offset = 0;
        self.next_seq = Some(origin_seq);
    }

    /// Pieces of `[start, start + data.len())` outside every settled range.
    fn unsettled(&self, start: u64, data: Bytes) -> Vec<(u64, Bytes)> {
        let end = start + data.len() as u64;
        let mut pieces = Vec::new();
        let mut cursor = start;
        for &(lo, hi) in &self.settled {
            if hi <= cursor || lo >= end {
                continue;
            }
            if lo > cursor {
                pieces.push((cursor, data.slice((cursor - start) as usize..(lo - start) as usize)));
            }
            cursor = cursor.max(hi);
        }
        if cursor < end {
            pieces.push((cursor, data.slice((cursor - start) as usize..)));
        }
        pieces
    }

    /// Sequence number of the byte at `offset`.
    fn seq_at(&self, offset: u64) -> u32 {
        let next_seq = self.next_seq.unwrap_or(0);
        next_seq.wrapping_add((offset as i64 - self.next_offset as i64) as u32)
    }

    /// Buffered fragments intersecting `[start, end)`, ascending.
    fn overlapping(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        let mut found: Vec<(u64, u64)> = self
            .pending
            .range(..end)
            .rev()
            .map(|(&offset, data)| (offset, offset + data.len() as u64))
            .take_while(|&(_, frag_end)| frag_end > start)
            .collect();
        found.reverse();
        found
    }

    /// Bytes of `[start, end)` already held in pending fragments.
    fn covered(&self, start: u64, end: u64) -> u64 {
        self.overlapping(start, end)
            .into_iter()
            .map(|(s, e)| e.min(end) - s.max(start))
            .sum()
    }

    fn insert_last_write(&mut self, start: u64, data: Bytes) {
        let end = start + data.len() as u64;
        for (offset, frag_end) in self.overlapping(start, end) {
            let Some(old) = self.pending.remove(&offset) else {
                continue;
            };
            self.pending_bytes -= old.len();
            if offset < start {
                self.put(offset, old.slice(..(start - offset) as usize));
            }
            if frag_end > end {
                self.put(end, old.slice((end - offset) as usize..));
            }
        }
        self.put(start, data);
    }

    fn insert_first_write(&mut self, start: u64, data: Bytes) {
        let end = start + data.len() as u64;
        let mut cursor = start;
        for (offset, frag_end) in self.overlapping(start, end) {
            if offset > cursor {
                let piece = data.slice((cursor - start) as usize..(offset - start) as usize);
                self.put(cursor, piece);
            }
            cursor = cursor.max(frag_end);
        }
        if cursor < end {
            self.put(cursor, data.slice((cursor - start) as usize..));
        }
    }

    fn put(&mut self, offset: u64, data: Bytes) {
        self.pending_bytes += data.len();
        self.pending.insert(offset, data);
    }

    /// Move pending fragments that are now in order to the contiguous stream.
    fn drain_pending(&mut self) {
        while let Some(entry) = self.pending.first_entry() {
            let offset = *entry.key();
            if offset > self.next_offset {
                // Gap - can't continue
                break;
            }
            let data = entry.remove();
            self.pending_bytes -= data.len();
            let frag_end = offset + data.len() as u64;
            if frag_end <= self.next_offset {
                continue;
            }
            let skip = (self.next_offset - offset) as usize;
            self.append(&data[skip..]);
        }
        let next = self.next_offset;
        self.settled.retain(|&(_, hi)| hi > next);
    }

    /// Too much out-of-order data: treat the first gap as lost.
    fn enforce_limit(&mut self) {
        while self.pending_bytes > self.max_pending {
            let Some((&first, _)) = self.pending.first_key_value() else {
                break;
            };
            let skipped = first - self.next_offset;
            let start_seq = self.seq_at(self.next_offset);
            let end_seq = self.seq_at(first);
            self.record_gap(start_seq, end_seq);
            self.stats.skipped_bytes += skipped;
            self.advance(skipped);
            self.drain_pending();
        }
    }

    fn record_gap(&mut self, start_seq: u32, end_seq: u32) {
        self.gaps.push(SequenceGap { start_seq, end_seq });
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(OverlapPolicy::default(), 16 * 1024 * 1024)
    }
}

/// Signed distance from `b` to `a` in sequence space.
pub(crate) fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}
