// src/session/buffer.rs
//
// Inbound byte queue of one session. The background reader is the only
// producer; `read` and `reset` are the consumers.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::logging::hex_dump;

struct BufferState {
    data: VecDeque<u8>,
    closed: bool,
    total_received: u64,
}

/// Unbounded FIFO byte queue with a blocking, deadline-bounded read.
pub struct SessionBuffer {
    label: String,
    state: Mutex<BufferState>,
    not_empty: Condvar,
}

impl SessionBuffer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(BufferState {
                data: VecDeque::new(),
                closed: false,
                total_received: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Append bytes from the hardware and wake blocked readers.
    /// Returns false once the buffer is closed; the bytes are dropped.
    pub fn push(&self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.data.extend(bytes.iter().copied());
        state.total_received += bytes.len() as u64;
        self.not_empty.notify_all();
        true
    }

    /// Collect up to `size` bytes in arrival order. Waits for more data until
    /// `timeout` has elapsed since the call started, then returns whatever was
    /// collected. A short or empty result is not an error. Returns early when
    /// the buffer is closed.
    pub fn read(&self, size: usize, timeout: Duration) -> Vec<u8> {
        let mut out = Vec::with_capacity(size.min(4096));
        if size == 0 {
            return out;
        }
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();
        loop {
            let take = state.data.len().min(size - out.len());
            out.extend(state.data.drain(..take));
            if out.len() == size || state.closed {
                break;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                // Bytes may have landed between the wakeup and the timeout
                let take = state.data.len().min(size - out.len());
                out.extend(state.data.drain(..take));
                break;
            }
        }
        out
    }

    pub fn in_waiting(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Discard everything buffered. Returns the number of bytes dropped.
    pub fn reset(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.data.len();
        if discarded > 0 {
            let bytes: Vec<u8> = state.data.drain(..).collect();
            tlog!(
                "[session:{}] Reset input buffer, discarded {} bytes: {}",
                self.label,
                discarded,
                hex_dump(&bytes)
            );
        }
        discarded
    }

    /// Stop accepting bytes and wake every blocked reader. Already buffered
    /// bytes stay readable.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn total_received(&self) -> u64 {
        self.state.lock().total_received
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_returns_buffered_bytes_in_order() {
        let buffer = SessionBuffer::new("test");
        buffer.push(&[1, 2]);
        buffer.push(&[3]);
        buffer.push(&[4, 5, 6]);
        assert_eq!(buffer.read(6, Duration::from_millis(100)), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(buffer.in_waiting(), 0);
        assert_eq!(buffer.total_received(), 6);
    }

    #[test]
    fn test_read_leaves_excess_bytes() {
        let buffer = SessionBuffer::new("test");
        buffer.push(b"abcdef");
        assert_eq!(buffer.read(4, Duration::from_millis(10)), b"abcd");
        assert_eq!(buffer.in_waiting(), 2);
        assert_eq!(buffer.read(4, Duration::from_millis(10)), b"ef");
    }

    #[test]
    fn test_short_read_returns_at_deadline() {
        let buffer = SessionBuffer::new("test");
        buffer.push(&[0xAA, 0xBB]);
        let started = Instant::now();
        let got = buffer.read(10, Duration::from_millis(80));
        let elapsed = started.elapsed();
        assert_eq!(got, vec![0xAA, 0xBB]);
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_empty_read_and_zero_size() {
        let buffer = SessionBuffer::new("test");
        assert!(buffer.read(4, Duration::from_millis(20)).is_empty());
        buffer.push(&[1]);
        assert!(buffer.read(0, Duration::from_secs(5)).is_empty());
        assert_eq!(buffer.in_waiting(), 1);
    }

    #[test]
    fn test_blocked_read_sees_later_pushes() {
        let buffer = Arc::new(SessionBuffer::new("test"));
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for chunk in [&b"he"[..], &b"llo"[..], &b" world"[..]] {
                    thread::sleep(Duration::from_millis(10));
                    buffer.push(chunk);
                }
            })
        };
        let got = buffer.read(11, Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(got, b"hello world");
    }

    #[test]
    fn test_reset_then_in_waiting_is_zero() {
        let buffer = SessionBuffer::new("test");
        buffer.push(&[9; 40]);
        assert_eq!(buffer.reset(), 40);
        assert_eq!(buffer.in_waiting(), 0);
        assert_eq!(buffer.reset(), 0);
    }

    #[test]
    fn test_close_wakes_reader_and_rejects_pushes() {
        let buffer = Arc::new(SessionBuffer::new("test"));
        buffer.push(&[7]);
        let reader = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.read(100, Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        buffer.close();
        assert_eq!(reader.join().unwrap(), vec![7]);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!buffer.push(&[8]));
        assert!(buffer.is_closed());
    }
}
