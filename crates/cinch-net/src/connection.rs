//! The live connection: socket ownership, background reader thread,
//! session-key rotation, and packet delivery.
//!
//! Lock order, everywhere: `run` → cipher (`encryptor`/`decryptor`) →
//! socket half (`read_half`/`write_half`). Re-keys run inline on the
//! reader thread with both socket halves held, which is what guarantees
//! no frame interleaves with handshake traffic; the requesting side
//! additionally suspends application writes the moment it asks for a
//! re-key.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use cinch_core::packet::control;
use cinch_core::{read_frame, write_frame, Packet};
use cinch_crypto::cipher::{BlockCipher, BLOCK_SIZE};
use cinch_crypto::handshake::{self, Handshake};
use cinch_crypto::identity::{RemotePublicKey, RsaIdentity};

use crate::config::{ConnectionConfig, DeliveryMode};
use crate::error::{DisconnectReason, IoFailure, NetError};
use crate::queue::DeliveryQueue;

type PacketCallback = Box<dyn Fn(Packet, usize) + Send + Sync>;
type DisconnectCallback = Box<dyn Fn(DisconnectReason) + Send + Sync>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
}

/// Mutable connection state, guarded by one mutex with a condvar for
/// write-resume and close wakeups.
struct RunState {
    state: ConnState,
    /// A re-key is in flight (requested or being driven).
    handshake_pending: bool,
    /// Application writes park on the condvar while this is set.
    writes_suspended: bool,
    disconnect_received: bool,
    /// Local close in progress; reader failures are swallowed.
    closing: bool,
    last_handshake: Instant,
    local_id: Uuid,
    remote_id: Option<Uuid>,
    delivery_mode: DeliveryMode,
}

struct Shared {
    config: ConnectionConfig,
    identity: RsaIdentity,
    read_half: Mutex<TcpStream>,
    write_half: Mutex<TcpStream>,
    run: Mutex<RunState>,
    run_changed: Condvar,
    encryptor: Mutex<BlockCipher>,
    decryptor: Mutex<BlockCipher>,
    remote_key: Mutex<RemotePublicKey>,
    queue: DeliveryQueue,
    on_packet: Mutex<Option<PacketCallback>>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn run(&self) -> MutexGuard<'_, RunState> {
        lock(&self.run)
    }
}

/// A secure, connection-oriented packet transport over one TCP socket.
pub struct Connection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to `addr` and run the full handshake.
    pub fn connect(
        addr: impl ToSocketAddrs,
        identity: RsaIdentity,
        config: ConnectionConfig,
    ) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr)?;
        Self::wrap(stream, identity, config)
    }

    /// Take ownership of an accepted socket and run the full handshake.
    /// Both sides of a connection call into the same code path; the
    /// handshake itself is symmetric.
    pub fn wrap(
        mut stream: TcpStream,
        identity: RsaIdentity,
        config: ConnectionConfig,
    ) -> Result<Self, NetError> {
        stream.set_nodelay(true)?;
        let ciphers = Handshake::new(&mut stream, &identity)
            .with_compression(config.compress)
            .full()?;

        let read_half = stream.try_clone()?;
        read_half.set_read_timeout(Some(config.read_timeout))?;

        let local_id = Uuid::new_v4();
        let shared = Arc::new(Shared {
            queue: DeliveryQueue::new(config.queue_capacity),
            run: Mutex::new(RunState {
                state: ConnState::Connected,
                handshake_pending: false,
                writes_suspended: false,
                disconnect_received: false,
                closing: false,
                last_handshake: Instant::now(),
                local_id,
                remote_id: None,
                delivery_mode: config.delivery_mode,
            }),
            run_changed: Condvar::new(),
            encryptor: Mutex::new(ciphers.encryptor),
            decryptor: Mutex::new(ciphers.decryptor),
            remote_key: Mutex::new(ciphers.remote_key),
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(stream),
            on_packet: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            config,
            identity,
        });

        advertise_id(&shared, local_id)?;

        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("cinch-reader".into())
                .spawn(move || read_loop(&shared))?
        };
        debug!(%local_id, "connection established");

        Ok(Self {
            shared,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Encrypt, frame, and write one packet. Blocks while writes are
    /// suspended for a pending re-key; returns the total bytes written
    /// to the socket (length prefix and padding included).
    pub fn send(&self, packet: Packet) -> Result<usize, NetError> {
        {
            let mut run = self.shared.run();
            while run.writes_suspended && run.state == ConnState::Connected && !run.closing {
                run = self
                    .shared
                    .run_changed
                    .wait(run)
                    .unwrap_or_else(|e| e.into_inner());
            }
            if run.state != ConnState::Connected || run.closing {
                return Err(NetError::Closed);
            }
        }
        write_packet(&self.shared, packet)
    }

    /// Fetch one buffered packet. Only valid in pull delivery mode.
    pub fn recv(&self, timeout: Duration) -> Result<(Packet, usize), NetError> {
        if self.shared.run().delivery_mode != DeliveryMode::Pull {
            return Err(NetError::NotPullMode);
        }
        self.shared.queue.pop(timeout)
    }

    /// Switch delivery mode at runtime. Switching to push flushes every
    /// queued-but-undelivered packet to the callback in arrival order.
    pub fn set_delivery_mode(&self, mode: DeliveryMode) {
        {
            let mut run = self.shared.run();
            run.delivery_mode = mode;
        }
        if mode == DeliveryMode::Push {
            flush_to_callback(&self.shared);
        }
    }

    /// Register the push-mode packet callback. Packets that arrived
    /// before registration are flushed to it in order.
    pub fn on_packet<F>(&self, callback: F)
    where
        F: Fn(Packet, usize) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_packet) = Some(Box::new(callback));
        if self.shared.run().delivery_mode == DeliveryMode::Push {
            flush_to_callback(&self.shared);
        }
    }

    /// Register the disconnect callback, invoked once when the
    /// connection goes down for any reason other than a local `close`.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(DisconnectReason) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_disconnect) = Some(Box::new(callback));
    }

    /// Orderly local shutdown: best-effort disconnect notification,
    /// then tear down the socket and join the reader thread.
    pub fn close(&self) -> Result<(), NetError> {
        let already_down = {
            let mut run = self.shared.run();
            let down = run.state == ConnState::Disconnected || run.closing;
            run.closing = true;
            run.writes_suspended = false;
            self.shared.run_changed.notify_all();
            down
        };
        if !already_down {
            let _ = write_packet(
                &self.shared,
                Packet::new(control::DISCONNECT_NOTIFICATION, Vec::new()),
            );
            // Half-close: stop receiving, but leave the write side open so
            // the notification above reaches the peer before FIN.
            let _ = lock(&self.shared.write_half).shutdown(Shutdown::Read);
        }
        // Close the queue first: the reader may be parked in a
        // backpressured push and must be woken before it can observe
        // the closing flag and exit.
        self.shared.queue.close();
        if let Some(handle) = lock(&self.reader).take() {
            let _ = handle.join();
        }
        self.shared.run().state = ConnState::Disconnected;
        Ok(())
    }

    pub fn state(&self) -> ConnState {
        self.shared.run().state
    }

    pub fn connection_id(&self) -> Uuid {
        self.shared.run().local_id
    }

    pub fn remote_id(&self) -> Option<Uuid> {
        self.shared.run().remote_id
    }

    /// Age of the current session keys.
    pub fn time_since_handshake(&self) -> Duration {
        self.shared.run().last_handshake.elapsed()
    }

    /// Packets currently buffered for pull-mode delivery.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Simultaneous re-key requests: the side with the lexicographically
/// smaller connection id yields and keeps waiting.
pub(crate) fn yields_to(local: &Uuid, remote: &Uuid) -> bool {
    local.as_bytes() < remote.as_bytes()
}

/// Record a peer's advertised connection id. An advertisement equal to
/// our own id forces a local regeneration; the caller must re-advertise
/// the returned id.
fn note_remote_id(run: &mut RunState, remote: Uuid) -> Option<Uuid> {
    run.remote_id = Some(remote);
    if remote == run.local_id {
        run.local_id = Uuid::new_v4();
        Some(run.local_id)
    } else {
        None
    }
}

fn advertise_id(shared: &Shared, id: Uuid) -> Result<(), NetError> {
    write_packet(
        shared,
        Packet::new(control::CONNECTION_ID_EXCHANGE, id.as_bytes().to_vec()),
    )?;
    Ok(())
}

/// Encrypt and frame one packet under the cipher and write locks.
fn write_packet(shared: &Shared, mut packet: Packet) -> Result<usize, NetError> {
    let ciphertext = lock(&shared.encryptor).encrypt(&packet.encode())?;
    let mut write_half = lock(&shared.write_half);
    Ok(write_frame(&mut *write_half, &ciphertext, BLOCK_SIZE)?)
}

/// Take the connection down once. `DisconnectReason` reaches the
/// callback only when the close was not locally initiated.
fn teardown(shared: &Shared, reason: DisconnectReason) {
    let closing = {
        let mut run = shared.run();
        if run.state == ConnState::Disconnected {
            return;
        }
        run.state = ConnState::Disconnected;
        run.writes_suspended = false;
        shared.run_changed.notify_all();
        run.closing
    };
    shared.queue.close();
    let _ = lock(&shared.read_half).shutdown(Shutdown::Both);
    if !closing {
        debug!(?reason, "connection down");
        if let Some(callback) = lock(&shared.on_disconnect).as_ref() {
            callback(reason);
        }
    }
}

/// Deliver one application packet per the current mode. In push mode
/// any queue remnants (from a mode switch or pre-callback buffering)
/// are flushed first so arrival order is preserved.
fn deliver(shared: &Shared, packet: Packet, wire_len: usize) {
    let mode = shared.run().delivery_mode;
    if mode == DeliveryMode::Pull {
        let _ = shared.queue.push(packet, wire_len);
        return;
    }
    let guard = lock(&shared.on_packet);
    match guard.as_ref() {
        Some(callback) => {
            for (queued, queued_len) in shared.queue.drain() {
                callback(queued, queued_len);
            }
            callback(packet, wire_len);
        }
        None => {
            drop(guard);
            // No callback registered yet; buffer until one appears.
            let _ = shared.queue.push(packet, wire_len);
        }
    }
}

fn flush_to_callback(shared: &Shared) {
    let guard = lock(&shared.on_packet);
    if let Some(callback) = guard.as_ref() {
        for (packet, wire_len) in shared.queue.drain() {
            callback(packet, wire_len);
        }
    }
}

/// What the key-age check decided for this iteration.
enum AgeAction {
    Idle,
    Request,
    ForceClose,
}

fn read_loop(shared: &Arc<Shared>) {
    let mut error_streak: u32 = 0;
    loop {
        let action = {
            let mut run = shared.run();
            if run.closing || run.state == ConnState::Disconnected {
                break;
            }
            // The request goes out at max_key_age; the re-key must then
            // complete within max_age_skew of grace, both measured from
            // the last successful handshake.
            if run.handshake_pending {
                if run.last_handshake.elapsed()
                    >= shared.config.max_key_age + shared.config.max_age_skew
                {
                    AgeAction::ForceClose
                } else {
                    AgeAction::Idle
                }
            } else if run.last_handshake.elapsed() >= shared.config.max_key_age {
                run.handshake_pending = true;
                run.writes_suspended = true;
                AgeAction::Request
            } else {
                AgeAction::Idle
            }
        };
        match action {
            AgeAction::Request => {
                debug!("session keys aged out; requesting re-key");
                if let Err(err) = write_packet(
                    shared,
                    Packet::new(control::HANDSHAKE_REQUEST, Vec::new()),
                ) {
                    warn!("failed to request re-key: {err}");
                    teardown(shared, DisconnectReason::Error);
                    break;
                }
            }
            AgeAction::ForceClose => {
                warn!("re-key window missed; dropping connection");
                teardown(shared, DisconnectReason::Error);
                break;
            }
            AgeAction::Idle => {}
        }

        let frame = {
            let mut read_half = lock(&shared.read_half);
            let mut patient = Patient::new(&mut *read_half);
            read_frame(&mut patient, BLOCK_SIZE)
        };
        let (ciphertext, wire_len) = match frame {
            Ok(frame) => frame,
            Err(err) => match IoFailure::classify(&err).disconnect_reason() {
                None => continue,
                Some(reason) => {
                    teardown(shared, reason);
                    break;
                }
            },
        };

        let decoded = lock(&shared.decryptor)
            .decrypt(&ciphertext)
            .map_err(NetError::from)
            .and_then(|plaintext| Packet::decode(&plaintext).map_err(NetError::from));
        let packet = match decoded {
            Ok(packet) => {
                error_streak = 0;
                packet
            }
            Err(err) => {
                error_streak += 1;
                warn!(streak = error_streak, "dropping undecipherable frame: {err}");
                if error_streak >= shared.config.error_budget {
                    teardown(shared, DisconnectReason::Error);
                    break;
                }
                continue;
            }
        };

        if control::is_control(packet.type_id) {
            if let Some(reason) = handle_control(shared, packet) {
                teardown(shared, reason);
                break;
            }
        } else {
            deliver(shared, packet, wire_len);
        }
    }
    trace!("reader thread exiting");
}

/// Handle one reserved-range packet. `Some(reason)` tears the
/// connection down.
fn handle_control(shared: &Arc<Shared>, packet: Packet) -> Option<DisconnectReason> {
    match packet.type_id {
        control::HANDSHAKE_REQUEST => {
            let drive = {
                let mut run = shared.run();
                if run.handshake_pending {
                    match run.remote_id {
                        Some(remote) if yields_to(&run.local_id, &remote) => {
                            debug!("simultaneous re-key requests; yielding");
                            false
                        }
                        _ => true,
                    }
                } else {
                    run.handshake_pending = true;
                    run.writes_suspended = true;
                    true
                }
            };
            if drive {
                drive_rekey(shared);
            }
            None
        }
        control::INIT_HANDSHAKE => {
            {
                let mut run = shared.run();
                run.handshake_pending = true;
                run.writes_suspended = true;
            }
            if let Err(err) = run_full_rekey(shared, false) {
                abandon_rekey(shared, &err);
            }
            None
        }
        control::INIT_PARTIAL_HANDSHAKE => {
            match handshake::partial_accept(&shared.identity, &packet.data, shared.config.compress)
            {
                Ok(cipher) => {
                    *lock(&shared.decryptor) = cipher;
                    let _ = write_packet(
                        shared,
                        Packet::new(control::END_PARTIAL_HANDSHAKE, Vec::new()),
                    );
                    finish_rekey(shared);
                    debug!("partial re-key complete");
                }
                Err(err) => abandon_rekey(shared, &NetError::Handshake(err)),
            }
            None
        }
        control::END_PARTIAL_HANDSHAKE => {
            trace!("peer confirmed refreshed session key");
            None
        }
        control::CANCEL_HANDSHAKE => {
            debug!("peer abandoned re-key; keeping old session keys");
            clear_pending(shared);
            None
        }
        control::CONNECTION_ID_EXCHANGE => {
            match Uuid::from_slice(&packet.data) {
                Ok(remote) => {
                    let regenerated = note_remote_id(&mut shared.run(), remote);
                    if let Some(id) = regenerated {
                        debug!(%id, "connection id collision; regenerated local id");
                        let _ = advertise_id(shared, id);
                    }
                }
                Err(_) => warn!("ignoring malformed connection id advertisement"),
            }
            None
        }
        control::DISCONNECT_NOTIFICATION => {
            shared.run().disconnect_received = true;
            drain_in_flight(shared);
            Some(DisconnectReason::Disconnect)
        }
        other => {
            trace!(type_id = other, "ignoring stray control packet");
            None
        }
    }
}

/// Drive a re-key as the responding side: full when our own keys are
/// also past `max_key_age`, partial otherwise. A failure keeps the
/// connection up on the old keys.
fn drive_rekey(shared: &Arc<Shared>) {
    let full = shared.run().last_handshake.elapsed() >= shared.config.max_key_age;
    let outcome = if full {
        run_full_rekey(shared, true)
    } else {
        offer_partial(shared)
    };
    if let Err(err) = outcome {
        abandon_rekey(shared, &err);
    }
}

/// Run the full handshake inline with both socket halves held. The
/// driving side announces with `INIT_HANDSHAKE` first; the other side
/// enters from its control dispatch.
fn run_full_rekey(shared: &Arc<Shared>, driving: bool) -> Result<(), NetError> {
    if driving {
        write_packet(shared, Packet::new(control::INIT_HANDSHAKE, Vec::new()))?;
    }

    let outcome = {
        let mut read_half = lock(&shared.read_half);
        let mut write_half = lock(&shared.write_half);
        // The handshake owns the socket; reads block until it is done.
        read_half.set_read_timeout(None)?;
        let mut joined = Joined {
            read: &mut *read_half,
            write: &mut *write_half,
        };
        let outcome = Handshake::new(&mut joined, &shared.identity)
            .with_compression(shared.config.compress)
            .full();
        read_half.set_read_timeout(Some(shared.config.read_timeout))?;
        outcome
    };

    let ciphers = outcome?;
    *lock(&shared.encryptor) = ciphers.encryptor;
    *lock(&shared.decryptor) = ciphers.decryptor;
    *lock(&shared.remote_key) = ciphers.remote_key;
    finish_rekey(shared);
    debug!("full re-key complete");
    Ok(())
}

/// Partial re-key, offering side: send a fresh key bundle for our
/// outgoing direction and swap the encryptor in the same critical
/// section, so every later frame uses the new key.
fn offer_partial(shared: &Arc<Shared>) -> Result<(), NetError> {
    let remote = lock(&shared.remote_key).clone();
    let (cipher, bundle) = handshake::partial_offer(&remote, shared.config.compress)?;
    {
        let mut encryptor = lock(&shared.encryptor);
        let mut write_half = lock(&shared.write_half);
        let mut packet = Packet::new(control::INIT_PARTIAL_HANDSHAKE, bundle);
        let ciphertext = encryptor.encrypt(&packet.encode())?;
        write_frame(&mut *write_half, &ciphertext, BLOCK_SIZE)?;
        *encryptor = cipher;
    }
    clear_pending(shared);
    debug!("offered partial re-key");
    Ok(())
}

/// A re-key attempt failed: tell the peer, keep the old keys, resume.
fn abandon_rekey(shared: &Shared, err: &NetError) {
    warn!("re-key failed, keeping old session keys: {err}");
    let _ = write_packet(shared, Packet::new(control::CANCEL_HANDSHAKE, Vec::new()));
    clear_pending(shared);
}

fn finish_rekey(shared: &Shared) {
    let mut run = shared.run();
    run.last_handshake = Instant::now();
    run.handshake_pending = false;
    run.writes_suspended = false;
    shared.run_changed.notify_all();
}

fn clear_pending(shared: &Shared) {
    let mut run = shared.run();
    run.handshake_pending = false;
    run.writes_suspended = false;
    shared.run_changed.notify_all();
}

/// After a disconnect notification, pull whatever the peer managed to
/// flush before closing. Bounded; the first timeout or error ends it.
fn drain_in_flight(shared: &Shared) {
    for _ in 0..3 {
        let frame = {
            let mut read_half = lock(&shared.read_half);
            read_frame(&mut *read_half, BLOCK_SIZE)
        };
        let Ok((ciphertext, wire_len)) = frame else {
            return;
        };
        let decoded = lock(&shared.decryptor)
            .decrypt(&ciphertext)
            .map_err(NetError::from)
            .and_then(|plaintext| Packet::decode(&plaintext).map_err(NetError::from));
        match decoded {
            Ok(packet) if !control::is_control(packet.type_id) => {
                deliver(shared, packet, wire_len);
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

/// Read adapter for the reader loop: the first byte of a frame may time
/// out (that timeout is the loop's tick), but once a frame has started,
/// timeouts are retried so a slow sender cannot desynchronize the
/// stream. A frame stalled across too many ticks is a hard error.
struct Patient<'a> {
    inner: &'a mut TcpStream,
    started: bool,
    stalls: u32,
}

const MAX_MID_FRAME_STALLS: u32 = 40;

impl<'a> Patient<'a> {
    fn new(inner: &'a mut TcpStream) -> Self {
        Self {
            inner,
            started: false,
            stalls: 0,
        }
    }
}

impl Read for Patient<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    self.started = true;
                    self.stalls = 0;
                    return Ok(n);
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    if !self.started {
                        return Err(err);
                    }
                    self.stalls += 1;
                    if self.stalls > MAX_MID_FRAME_STALLS {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            "frame stalled mid-read",
                        ));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }
}

/// Rejoin the two locked socket halves into one stream for the
/// handshake coordinator.
struct Joined<'a> {
    read: &'a mut TcpStream,
    write: &'a mut TcpStream,
}

impl Read for Joined<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read.read(buf)
    }
}

impl Write for Joined<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_state(local_id: Uuid) -> RunState {
        RunState {
            state: ConnState::Connected,
            handshake_pending: false,
            writes_suspended: false,
            disconnect_received: false,
            closing: false,
            last_handshake: Instant::now(),
            local_id,
            remote_id: None,
            delivery_mode: DeliveryMode::Push,
        }
    }

    #[test]
    fn identical_ids_regenerate_on_exchange() {
        let shared_id = Uuid::new_v4();
        let mut a = run_state(shared_id);
        let mut b = run_state(shared_id);

        // Each side sees its own id advertised back: both regenerate.
        let a_readvertised = note_remote_id(&mut a, shared_id).unwrap();
        let b_readvertised = note_remote_id(&mut b, shared_id).unwrap();
        assert_ne!(a.local_id, shared_id);
        assert_ne!(b.local_id, shared_id);
        assert_eq!(a_readvertised, a.local_id);
        assert_eq!(b_readvertised, b.local_id);

        // The fresh advertisements settle without further regeneration.
        assert!(note_remote_id(&mut a, b_readvertised).is_none());
        assert!(note_remote_id(&mut b, a_readvertised).is_none());
        assert_eq!(a.remote_id, Some(b.local_id));
        assert_eq!(b.remote_id, Some(a.local_id));
    }

    #[test]
    fn distinct_ids_are_stored_untouched() {
        let mut run = run_state(Uuid::new_v4());
        let local = run.local_id;
        let remote = Uuid::new_v4();

        assert!(note_remote_id(&mut run, remote).is_none());
        assert_eq!(run.local_id, local);
        assert_eq!(run.remote_id, Some(remote));
    }

    #[test]
    fn tie_break_is_deterministic() {
        let smaller = Uuid::from_bytes([0; 16]);
        let mut bytes = [0u8; 16];
        bytes[15] = 1;
        let larger = Uuid::from_bytes(bytes);

        assert!(yields_to(&smaller, &larger));
        assert!(!yields_to(&larger, &smaller));
        // Equal ids never yield; the collision path regenerates instead.
        assert!(!yields_to(&smaller, &smaller));
    }
}
