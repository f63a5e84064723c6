/* Transceiver instance: receive ring ownership, command/URC lock and the
interrupt-safe feed path. The tokenizer and command builder live in the
read/write submodules and operate on a held lock. */

use crate::config::{WriteOptions, WriteState};
use crate::ring::Ring;
use crate::sync::{Event, Semaphore};
use crate::{Error, Result};
use bytes::BytesMut;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

mod read;
mod write;

/// Callback tasked with pushing outgoing command bytes toward the modem.
///
/// Invoked with the transceiver lock held. The returned count must equal
/// the fragment length; a short write is treated as an I/O failure.
pub type WriteFunction = Box<dyn FnMut(&[u8]) -> std::io::Result<usize> + Send>;

/// State owned by whoever holds the transceiver lock.
struct Session {
    /// True while the read cursor sits just past a `<S4>` (or at ring
    /// start right after construction). Maintained by the syntax-aware
    /// read operations only, never by raw reads or skips.
    start_of_line: bool,
    tx: BytesMut,
    tx_capacity: usize,
    /// Bytes buffered for sending, or already emitted under
    /// [`WriteOptions::NO_BUFFER`]. Drives echo consumption during flush.
    tx_used: usize,
    options: WriteOptions,
    state: WriteState,
    write: WriteFunction,
}

struct Shared {
    ring: Ring,
    /// Posted by the feeder when ring data becomes available; awaited by
    /// blocking readers.
    rx_ready: Event,
    /// Serializes solicited-command sessions against the URC listener.
    lock: Semaphore,
    /// Uncontended by construction: only taken after winning `lock`.
    session: Mutex<Session>,
}

/// Handle to an AT transceiver.
///
/// The handle is cheap to clone and shares one underlying instance; a
/// typical setup keeps one clone on the command-issuing side and one in
/// the URC listener. All token-level I/O requires taking the lock first,
/// see [`lock`](Self::lock).
#[derive(Clone)]
pub struct Transceiver {
    shared: Arc<Shared>,
}

/// Producer half of the receive path.
///
/// There is exactly one feeder per transceiver and [`feed`](Self::feed)
/// takes `&mut self`, which pins the ring to a single producer. Feeding
/// is permitted concurrently with any lock holder and is safe to drive
/// from an interrupt-style context.
pub struct Feeder {
    shared: Arc<Shared>,
}

impl Transceiver {
    /// Create a transceiver with a receive ring of `rx_capacity` bytes.
    ///
    /// The ring bridges the latency between feeding and consuming and also
    /// bounds the longest token obtainable through the read api. `write`
    /// is called whenever a flushed command must travel to the modem.
    pub fn new(rx_capacity: usize, write: WriteFunction) -> Result<(Transceiver, Feeder)> {
        if rx_capacity == 0 {
            return Err(Error::InvalidParam(
                "receive capacity must be non-zero".to_string(),
            ));
        }
        let shared = Arc::new(Shared {
            ring: Ring::new(rx_capacity),
            rx_ready: Event::new(),
            lock: Semaphore::new(),
            session: Mutex::new(Session {
                start_of_line: true,
                tx: BytesMut::new(),
                tx_capacity: 0,
                tx_used: 0,
                options: WriteOptions::empty(),
                state: WriteState::Invalid,
                write,
            }),
        });
        let feeder = Feeder {
            shared: shared.clone(),
        };
        Ok((Transceiver { shared }, feeder))
    }

    /// Take exclusive ownership of the read and write api, blocking until
    /// the current owner releases it. Dropping the guard unlocks.
    ///
    /// Re-locking from the owning thread deadlocks; recursive locking is
    /// not supported.
    pub fn lock(&self) -> TransceiverGuard<'_> {
        self.shared.lock.acquire();
        TransceiverGuard::new(&self.shared)
    }

    /// Like [`lock`](Self::lock), but gives up after `timeout`.
    pub fn try_lock(&self, timeout: Duration) -> Result<TransceiverGuard<'_>> {
        if !self.shared.lock.acquire_timeout(timeout) {
            return Err(Error::Timeout { actual: 0 });
        }
        Ok(TransceiverGuard::new(&self.shared))
    }

    /// Number of received bytes currently buffered. Does not require the
    /// lock; the URC listener uses this to decide whether to dispatch.
    pub fn available(&self) -> usize {
        self.shared.ring.available()
    }
}

impl Feeder {
    /// Feed received bytes into the ring and wake blocked readers.
    ///
    /// On a full ring the bytes that fit are kept and
    /// [`Error::OutOfResources`] reports how many; retry once the
    /// consumer has drained some. Already-accepted bytes are never lost.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize> {
        let accepted = self.shared.ring.push(data);
        if accepted > 0 {
            self.shared.rx_ready.post();
        }
        if accepted < data.len() {
            return Err(Error::OutOfResources { actual: accepted });
        }
        Ok(accepted)
    }

    /// Capacity of the receive ring in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

/// Exclusive session on a locked transceiver.
///
/// Every operation of the read api (tokenizer) and write api (command
/// builder) is a method of this guard, so holding it is the only way to
/// touch the byte stream. Dropping the guard releases the lock.
pub struct TransceiverGuard<'a> {
    shared: &'a Shared,
    session: MutexGuard<'a, Session>,
}

impl<'a> TransceiverGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        // The semaphore was won by the caller; nobody else touches the
        // session mutex without it, so this cannot contend for long.
        let session = shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self { shared, session }
    }

    /// Whether the read cursor sits at the start of a response line. Lets
    /// an interpreter detect the final argument of responses with a
    /// variable argument count. No I/O is performed.
    pub fn is_start_of_line(&self) -> bool {
        self.session.start_of_line
    }

    /// Number of received bytes currently buffered.
    pub fn available(&self) -> usize {
        self.shared.ring.available()
    }

    /// The command assembled so far by the current write-sequence. Empty
    /// under [`WriteOptions::NO_BUFFER`] or right after a flush.
    pub fn tx_buffer(&self) -> &[u8] {
        &self.session.tx
    }
}

impl Drop for TransceiverGuard<'_> {
    fn drop(&mut self) {
        // The session mutex guard drops right after this; a contender that
        // wins the semaphore first blocks on it only momentarily.
        self.shared.lock.release();
    }
}
