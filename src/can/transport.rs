/// CAN transport seam — physical adapters and the log-only mock.
///
/// The bus runs at 500 kbps with 11-bit identifiers; a physical adapter
/// bounds `send` at 100 ms. `MockCan` fulfils the same contract by logging
/// the frame and reporting success, which is how a console without the
/// audio module keeps running silently.
use super::codec::CanFrame;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub const CAN_SEND_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanError {
    #[error("transmit failed: {0}")]
    Tx(String),
    #[error("transmit timeout after {0} ms")]
    Timeout(u64),
}

pub trait CanTransport: Send {
    fn send(&mut self, frame: &CanFrame) -> Result<(), CanError>;
    /// Non-blocking poll for an inbound frame (ACK / STATUS).
    fn try_recv(&mut self) -> Option<CanFrame>;
}

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

struct MockCanState {
    sent: Vec<CanFrame>,
    rx_queue: VecDeque<CanFrame>,
    fail_remaining: u32,
}

/// Log-only transport. Cloning yields another handle on the same state so
/// tests can inspect sent frames and prime inbound ACKs.
#[derive(Clone)]
pub struct MockCan {
    state: Arc<Mutex<MockCanState>>,
}

impl MockCan {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCanState {
                sent: Vec::new(),
                rx_queue: VecDeque::new(),
                fail_remaining: 0,
            })),
        }
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.st().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.st().sent.clear();
    }

    /// Queue a frame the module "receives" on its next poll.
    pub fn push_rx(&self, frame: CanFrame) {
        self.st().rx_queue.push_back(frame);
    }

    pub fn fail_next(&self, n: u32) {
        self.st().fail_remaining = n;
    }

    fn st(&self) -> MutexGuard<'_, MockCanState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockCan {
    fn default() -> Self {
        Self::new()
    }
}

impl CanTransport for MockCan {
    fn send(&mut self, frame: &CanFrame) -> Result<(), CanError> {
        let mut st = self.st();
        if st.fail_remaining > 0 {
            st.fail_remaining -= 1;
            return Err(CanError::Tx("mock failure".into()));
        }
        let hex: Vec<String> = frame.data[..frame.dlc as usize]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect();
        tracing::info!(
            "[MOCK TX] ID=0x{:03X} DLC={} DATA=[{}]",
            frame.id,
            frame.dlc,
            hex.join(" ")
        );
        st.sent.push(*frame);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<CanFrame> {
        self.st().rx_queue.pop_front()
    }
}
