use crate::error::SendError;
use crate::transceiver::Transceiver;

/// Soft, per-connection send queue in front of a non-blocking stream.
///
/// Whatever the socket does not take right away is kept here. The queue grows
/// to 1.5x of what it needs, never past `max` (reaching past `max` means the
/// peer is not draining and the connection has to go), and shrinks back
/// toward `min` once it has drained.
///
/// While corked nothing is written; the tick loop uncorks around the frame
/// broadcast so every member sees exactly one write per tick.
#[derive(Debug)]
pub struct SendQueue {
    buf: Vec<u8>,
    allocated: usize,
    min: usize,
    max: usize,
    corked: bool,
}

impl SendQueue {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.min(max);
        Self {
            buf: Vec::with_capacity(min),
            allocated: min,
            min,
            max,
            corked: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current allocation the queue accounts for.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn is_corked(&self) -> bool {
        self.corked
    }

    pub fn cork(&mut self) {
        self.corked = true;
    }

    pub fn uncork(&mut self) {
        self.corked = false;
    }

    pub fn send<T: Transceiver>(&mut self, stream: &mut T, data: &[u8]) -> Result<(), SendError> {
        let mut data = data;
        if self.buf.is_empty() {
            let sent = if self.corked { 0 } else { stream.send(data)? };
            data = &data[sent.min(data.len())..];
            if data.is_empty() {
                return Ok(());
            }
        }

        let needed = self.buf.len() + data.len();
        if needed > self.allocated {
            if needed > self.max {
                return Err(SendError::Overflow(needed - self.max));
            }
            self.reallocate((needed + (needed >> 1)).min(self.max));
        }
        self.buf.extend_from_slice(data);

        self.flush(stream)
    }

    /// One write attempt of everything queued, unless corked.
    pub fn flush<T: Transceiver>(&mut self, stream: &mut T) -> Result<(), SendError> {
        if self.corked || self.buf.is_empty() {
            return Ok(());
        }
        let sent = stream.send(&self.buf)?.min(self.buf.len());
        if sent > 0 {
            self.buf.drain(..sent);
            self.reallocate(self.buf.len().max(self.min));
        }
        Ok(())
    }

    fn reallocate(&mut self, size: usize) {
        if size > self.buf.capacity() {
            self.buf.reserve_exact(size - self.buf.len());
        } else {
            self.buf.shrink_to(size);
        }
        self.allocated = size;
    }
}
