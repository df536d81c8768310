use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::{Result, UsbError};
use crate::traits::{Direction, Endpoint, TransferBuffer, TransferRequest, UsbConnection};

/// Callback producing the IN packets a device sends in reply to one OUT packet.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Scripted in-memory USB HID device.
///
/// OUT transfers complete immediately and are recorded; each written packet
/// is handed to the responder (if any), whose replies become IN packets. IN
/// transfers complete when an inbound packet is available. Stall switches
/// make transfers in one direction block until cancelled, which is how tests
/// simulate a key that never answers.
///
/// Clones share the same device state.
#[derive(Clone)]
pub struct SimulatedDevice {
    shared: Arc<Shared>,
    endpoint_in: Endpoint,
    endpoint_out: Endpoint,
}

struct Shared {
    state: Mutex<SimState>,
    cond: Condvar,
}

#[derive(Default)]
struct SimState {
    next_request_id: u64,
    pending: VecDeque<Pending>,
    inbound: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    stall_in: bool,
    stall_out: bool,
    fail_initialize: bool,
    fail_queue: bool,
    fail_wait: bool,
    allocated: usize,
    cancel_calls: usize,
    close_calls: usize,
}

struct Pending {
    request: u64,
    direction: Direction,
    buffer: TransferBuffer,
    length: usize,
    cancelled: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SimulatedDevice {
    /// A device with 64-byte interrupt endpoints 0x81 / 0x01.
    pub fn new() -> Self {
        Self::with_packet_size(64)
    }

    /// A device whose endpoints report `packet_size` as `wMaxPacketSize`.
    pub fn with_packet_size(packet_size: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState::default()),
                cond: Condvar::new(),
            }),
            endpoint_in: Endpoint::interrupt_in(1, packet_size),
            endpoint_out: Endpoint::interrupt_out(1, packet_size),
        }
    }

    /// Install a responder invoked for every completed OUT packet.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    /// Queue a packet for the host to read.
    pub fn push_inbound(&self, packet: impl Into<Vec<u8>>) {
        self.shared.lock().inbound.push_back(packet.into());
        self.shared.cond.notify_all();
    }

    /// Every packet the host has written, in order.
    pub fn written_packets(&self) -> Vec<Vec<u8>> {
        self.shared.lock().written.clone()
    }

    /// Forget recorded OUT packets.
    pub fn clear_written(&self) {
        self.shared.lock().written.clear();
    }

    /// Number of inbound packets not yet read by the host.
    pub fn inbound_len(&self) -> usize {
        self.shared.lock().inbound.len()
    }

    /// Make IN transfers block until cancelled.
    pub fn set_stall_in(&self, stall: bool) {
        self.shared.lock().stall_in = stall;
        self.shared.cond.notify_all();
    }

    /// Make OUT transfers block until cancelled.
    pub fn set_stall_out(&self, stall: bool) {
        self.shared.lock().stall_out = stall;
        self.shared.cond.notify_all();
    }

    /// Make `TransferRequest::initialize` fail.
    pub fn set_fail_initialize(&self, fail: bool) {
        self.shared.lock().fail_initialize = fail;
    }

    /// Make `TransferRequest::queue` fail.
    pub fn set_fail_queue(&self, fail: bool) {
        self.shared.lock().fail_queue = fail;
    }

    /// Make `UsbConnection::request_wait` fail.
    pub fn set_fail_wait(&self, fail: bool) {
        self.shared.lock().fail_wait = fail;
        self.shared.cond.notify_all();
    }

    /// Number of transfer requests allocated so far.
    pub fn allocated_requests(&self) -> usize {
        self.shared.lock().allocated
    }

    /// Number of `cancel` calls across all requests.
    pub fn cancel_count(&self) -> usize {
        self.shared.lock().cancel_calls
    }

    /// Number of `close` calls across all requests.
    pub fn close_count(&self) -> usize {
        self.shared.lock().close_calls
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("endpoint_in", &self.endpoint_in)
            .field("endpoint_out", &self.endpoint_out)
            .finish()
    }
}

impl UsbConnection for SimulatedDevice {
    type Request = SimRequest;

    fn open_endpoints(&self) -> Result<(Endpoint, Endpoint)> {
        Ok((self.endpoint_in, self.endpoint_out))
    }

    fn allocate_request(&self) -> SimRequest {
        let mut state = self.shared.lock();
        state.next_request_id += 1;
        state.allocated += 1;
        SimRequest {
            id: state.next_request_id,
            shared: Arc::clone(&self.shared),
            direction: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn request_wait(&self) -> Result<()> {
        let mut state = self.shared.lock();
        loop {
            if state.fail_wait {
                return Err(UsbError::Wait("simulated stack failure".to_string()));
            }

            if let Some(idx) = state.pending.iter().position(|p| p.cancelled) {
                let _ = state.pending.remove(idx);
                return Err(UsbError::Cancelled);
            }

            let ready = state.pending.iter().position(|p| match p.direction {
                Direction::Out => !state.stall_out,
                Direction::In => !state.stall_in && !state.inbound.is_empty(),
            });

            if let Some(idx) = ready {
                if let Some(done) = state.pending.remove(idx) {
                    complete(&mut state, done);
                }
                return Ok(());
            }

            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

fn complete(state: &mut SimState, done: Pending) {
    match done.direction {
        Direction::Out => {
            let packet = done.buffer.to_vec(done.length);
            trace!(request = done.request, ">>> {:02x?}", packet);
            if let Some(responder) = state.responder.as_mut() {
                let replies = responder(&packet);
                state.inbound.extend(replies);
            }
            state.written.push(packet);
        }
        Direction::In => {
            if let Some(packet) = state.inbound.pop_front() {
                trace!(request = done.request, "<<< {:02x?}", packet);
                let mut buf = done.buffer.lock();
                let len = done.length.min(buf.len());
                let n = packet.len().min(len);
                buf[..n].copy_from_slice(&packet[..n]);
                buf[n..len].fill(0);
            }
        }
    }
}

/// Transfer request handed out by [`SimulatedDevice`].
pub struct SimRequest {
    id: u64,
    shared: Arc<Shared>,
    direction: Mutex<Option<Direction>>,
    closed: AtomicBool,
}

impl SimRequest {
    fn direction(&self) -> Option<Direction> {
        *self
            .direction
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TransferRequest for SimRequest {
    fn initialize(&self, endpoint: &Endpoint) -> bool {
        {
            let state = self.shared.lock();
            if self.closed.load(Ordering::SeqCst) || state.fail_initialize {
                return false;
            }
        }
        *self
            .direction
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(endpoint.direction);
        true
    }

    fn queue(&self, buffer: &TransferBuffer, length: usize) -> bool {
        if length > buffer.len() {
            return false;
        }
        let Some(direction) = self.direction() else {
            return false;
        };

        // `closed` is only written under the state lock, so a concurrent
        // close either sees this transfer pending or makes it fail here.
        let mut state = self.shared.lock();
        if self.closed.load(Ordering::SeqCst) || state.fail_queue {
            return false;
        }
        state.pending.push_back(Pending {
            request: self.id,
            direction,
            buffer: buffer.clone(),
            length,
            cancelled: false,
        });
        self.shared.cond.notify_all();
        true
    }

    fn cancel(&self) {
        let mut state = self.shared.lock();
        state.cancel_calls += 1;
        for pending in state.pending.iter_mut().filter(|p| p.request == self.id) {
            pending.cancelled = true;
        }
        debug!(request = self.id, "transfer request cancelled");
        self.shared.cond.notify_all();
    }

    fn close(&self) {
        let mut state = self.shared.lock();
        self.closed.store(true, Ordering::SeqCst);
        state.close_calls += 1;
        // A closed request can never complete; let any blocked waiter observe
        // that instead of sleeping forever.
        for pending in state.pending.iter_mut().filter(|p| p.request == self.id) {
            pending.cancelled = true;
        }
        self.shared.cond.notify_all();
    }
}
