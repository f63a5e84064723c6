/* Engine glue: owns the single transceiver instance, pumps modem bytes
into it and runs the URC listener task. */

use crate::Result;
use crate::config::WriteOptions;
use crate::sync::Event;
use crate::transceiver::{Feeder, Transceiver, TransceiverGuard, WriteFunction};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PUMP_CHUNK: usize = 256;
/// Back-off before re-feeding bytes that did not fit into the ring.
const FEED_RETRY_DELAY: Duration = Duration::from_millis(2);
/// Upper bound between listener wakeups; also caps shutdown latency.
const LISTENER_POLL: Duration = Duration::from_millis(100);
/// How long the listener competes for the lock before backing off.
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Variant-specific interpretation of unsolicited responses.
///
/// Called by the engine's listener task with a locked, ready-to-read
/// transceiver whenever unsolicited data is pending and no command
/// exchange is running. The transceiver may only be used for the duration
/// of the call.
pub trait UrcHandler: Send {
    fn handle_urc(&mut self, t: &mut TransceiverGuard<'_>);
}

impl<F> UrcHandler for F
where
    F: FnMut(&mut TransceiverGuard<'_>) + Send,
{
    fn handle_urc(&mut self, t: &mut TransceiverGuard<'_>) {
        self(t)
    }
}

/// Owns one [`Transceiver`] plus the two tasks around it: a pump thread
/// feeding bytes from the modem into the receive ring, and a listener
/// thread dispatching unsolicited traffic to an [`UrcHandler`].
///
/// Command exchanges go through [`open`](Self::open), which locks the
/// transceiver for the caller and thereby keeps the listener out until
/// the returned guard is dropped.
pub struct Engine {
    transceiver: Transceiver,
    echo_mode: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    data_ready: Arc<Event>,
    pump: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine around a byte `source` and a write callback.
    ///
    /// `source` should be configured with a read timeout; the pump thread
    /// only notices shutdown between reads. Echo mode starts enabled,
    /// matching a modem in its V.250 default configuration.
    pub fn new<R, H>(
        rx_capacity: usize,
        source: R,
        write: WriteFunction,
        handler: H,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
        H: UrcHandler + 'static,
    {
        let (transceiver, feeder) = Transceiver::new(rx_capacity, write)?;
        let running = Arc::new(AtomicBool::new(true));
        let data_ready = Arc::new(Event::new());

        let pump = thread::Builder::new()
            .name("at-rx-pump".to_string())
            .spawn({
                let running = running.clone();
                let data_ready = data_ready.clone();
                move || pump_loop(source, feeder, running, data_ready)
            })?;
        let listener = thread::Builder::new()
            .name("at-urc-listener".to_string())
            .spawn({
                let transceiver = transceiver.clone();
                let running = running.clone();
                let data_ready = data_ready.clone();
                move || urc_loop(transceiver, handler, running, data_ready)
            })?;

        Ok(Self {
            transceiver,
            echo_mode: Arc::new(AtomicBool::new(true)),
            running,
            data_ready,
            pump: Some(pump),
            listener: Some(listener),
        })
    }

    /// Lock the transceiver for a command exchange and prepare an
    /// unbuffered write-sequence whose options reflect the current echo
    /// mode. Dropping the guard closes the exchange and lets the URC
    /// listener back in.
    pub fn open(&self) -> Result<TransceiverGuard<'_>> {
        let mut guard = self.transceiver.lock();
        let mut options = WriteOptions::NO_BUFFER;
        if !self.echo_mode.load(Ordering::Relaxed) {
            options |= WriteOptions::NO_ECHO;
        }
        guard.prepare_write(options, 0)?;
        Ok(guard)
    }

    /// Record whether the modem currently echoes command lines. Consulted
    /// on every [`open`](Self::open); flip it after sending `ATE0`/`ATE1`.
    pub fn set_echo_mode(&self, enabled: bool) {
        self.echo_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn echo_mode(&self) -> bool {
        self.echo_mode.load(Ordering::Relaxed)
    }

    /// Direct access to the owned transceiver, e.g. for custom locking.
    pub fn transceiver(&self) -> &Transceiver {
        &self.transceiver
    }

    /// Stop and join the pump and listener threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.data_ready.post();
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Move bytes from the modem into the receive ring. A full ring is
/// retried after a short back-off; the already-accepted bytes stay in
/// order.
fn pump_loop<R: Read>(
    mut source: R,
    mut feeder: Feeder,
    running: Arc<AtomicBool>,
    data_ready: Arc<Event>,
) {
    let mut buf = [0u8; PUMP_CHUNK];
    while running.load(Ordering::Relaxed) {
        let n = match source.read(&mut buf) {
            Ok(0) => {
                debug!("rx source reached end of stream");
                break;
            }
            Ok(n) => n,
            Err(ref e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::TimedOut
                    || e.kind() == ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => {
                warn!("rx source read failed: {}", e);
                break;
            }
        };

        let mut offset = 0;
        while offset < n && running.load(Ordering::Relaxed) {
            match feeder.feed(&buf[offset..n]) {
                Ok(_) => offset = n,
                Err(crate::Error::OutOfResources { actual }) => {
                    offset += actual;
                    warn!("rx ring full, {} bytes pending", n - offset);
                    thread::sleep(FEED_RETRY_DELAY);
                }
                Err(e) => {
                    warn!("feed failed: {}", e);
                    return;
                }
            }
            data_ready.post();
        }
    }
}

/// Dispatch unsolicited data whenever the lock is free and bytes are
/// pending. Pending leftovers are retried at the next poll interval, so a
/// handler that cannot make progress does not spin the thread.
fn urc_loop<H: UrcHandler>(
    transceiver: Transceiver,
    mut handler: H,
    running: Arc<AtomicBool>,
    data_ready: Arc<Event>,
) {
    while running.load(Ordering::Relaxed) {
        data_ready.wait_deadline(Instant::now() + LISTENER_POLL);
        if !running.load(Ordering::Relaxed) {
            break;
        }
        if transceiver.available() == 0 {
            continue;
        }
        let Ok(mut guard) = transceiver.try_lock(LOCK_RETRY) else {
            continue;
        };
        if guard.available() == 0 {
            // Drained by the command path while we waited for the lock.
            continue;
        }
        debug!("dispatching unsolicited data to URC handler");
        handler.handle_urc(&mut guard);
    }
}

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use serial2::SerialPort;
    use tracing::info;

    /// Read adapter over a port shared between the pump thread and the
    /// write callback.
    struct SharedPort(Arc<SerialPort>);

    impl Read for SharedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Engine {
        /// Open a serial device (e.g. `/dev/ttyUSB2`, `COM3`) and build an
        /// engine on top of it. The port uses a short read timeout so the
        /// pump observes shutdown promptly.
        pub fn open_serial<H>(
            path: &str,
            baud: u32,
            rx_capacity: usize,
            handler: H,
        ) -> Result<Self>
        where
            H: UrcHandler + 'static,
        {
            let mut port = SerialPort::open(path, baud)?;
            port.set_read_timeout(Duration::from_millis(100))?;
            let port = Arc::new(port);

            let writer = port.clone();
            let write: WriteFunction = Box::new(move |data| writer.write(data));

            info!("modem {}: opened at {} baud", path, baud);
            Engine::new(rx_capacity, SharedPort(port), write, handler)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc::{self, RecvTimeoutError, Sender};

    /// Byte source fed from a channel, timing out like a UART driver.
    struct ChannelSource(mpsc::Receiver<Vec<u8>>);

    impl Read for ChannelSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.recv_timeout(Duration::from_millis(20)) {
                Ok(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Err(RecvTimeoutError::Timeout) => Err(ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => Ok(0),
            }
        }
    }

    type Captured = Arc<Mutex<Vec<Vec<u8>>>>;

    /// Records the mnemonic of every dispatched URC line.
    struct Recorder {
        seen: Captured,
    }

    impl UrcHandler for Recorder {
        fn handle_urc(&mut self, t: &mut TransceiverGuard<'_>) {
            if let Ok(cmd) = t.read_command_any(16, Duration::from_millis(50)) {
                self.seen.lock().unwrap().push(cmd.into_bytes());
            }
            let _ = t.skip_line(Duration::from_millis(50));
        }
    }

    fn engine_with_recorder() -> (Engine, Sender<Vec<u8>>, Captured, Captured) {
        let (tx, rx) = mpsc::channel();
        let sent: Captured = Arc::new(Mutex::new(Vec::new()));
        let urcs: Captured = Arc::new(Mutex::new(Vec::new()));

        let sink = sent.clone();
        let write: WriteFunction = Box::new(move |data: &[u8]| {
            sink.lock().unwrap().push(data.to_vec());
            Ok(data.len())
        });

        let handler = Recorder { seen: urcs.clone() };
        let engine = Engine::new(256, ChannelSource(rx), write, handler).unwrap();
        (engine, tx, sent, urcs)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_echo_mode_defaults_to_enabled() {
        let (engine, _tx, _sent, _urcs) = engine_with_recorder();
        assert!(engine.echo_mode());
        engine.set_echo_mode(false);
        assert!(!engine.echo_mode());
        engine.shutdown();
    }

    #[test]
    fn test_open_streams_fragments_through_callback() {
        let (engine, _tx, sent, _urcs) = engine_with_recorder();
        // Echo disabled so the flush does not wait for an echo to arrive.
        engine.set_echo_mode(false);

        let mut guard = engine.open().unwrap();
        guard.write_action("+CGMM").unwrap();
        guard.flush(Duration::from_millis(100)).unwrap();
        drop(guard);

        let got: Vec<Vec<u8>> = sent.lock().unwrap().clone();
        let want: Vec<&[u8]> = vec![b"AT+CGMM", b"\r\n"];
        assert_eq!(got, want);
        engine.shutdown();
    }

    #[test]
    fn test_urc_listener_dispatches_pending_data() {
        let (engine, tx, _sent, urcs) = engine_with_recorder();
        tx.send(b"\r\n+CREG: 1,2\r\n".to_vec()).unwrap();

        assert!(wait_until(|| {
            urcs.lock()
                .unwrap()
                .first()
                .is_some_and(|cmd| cmd.as_slice() == b"CREG")
        }));
        engine.shutdown();
    }

    #[test]
    fn test_urc_listener_blocked_while_command_runs() {
        let (engine, tx, _sent, urcs) = engine_with_recorder();

        let guard = engine.open().unwrap();
        tx.send(b"\r\n+CREG: 1,2\r\n".to_vec()).unwrap();
        // The listener cannot take the lock while the exchange is open.
        thread::sleep(Duration::from_millis(300));
        assert!(urcs.lock().unwrap().is_empty());

        drop(guard);
        assert!(wait_until(|| !urcs.lock().unwrap().is_empty()));
        engine.shutdown();
    }
}
