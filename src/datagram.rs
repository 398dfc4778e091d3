//! Authenticated repliable datagrams (`STYLE=DATAGRAM`) and the UDP
//! forwarding plane shared by every datagram-flavoured style.
//!
//! Inbound traffic arrives as UDP packets on a session-owned loopback socket:
//! a source header line, a newline, then the raw payload. Outbound traffic is
//! injected through a transient UDP socket towards the bridge's fixed
//! datagram port, framed as `"3.x <session-id> <destination>\n" || payload`.

use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::debug;

use crate::error::{Result, SamError};
use crate::net::{Destination, I2pAddr};
use crate::options::{SamOptions, SignatureType};
use crate::sam::{nickname, SamConnection, SessionStyle};
use crate::session::{BaseSession, SessionAddr, SessionKeys, DEFAULT_SEND_TIMEOUT};
use crate::utils::{lock_mutex, read_lock, write_lock};

/// Receive buffer for forwarded packets: I2P's maximum datagram size plus
/// headroom for the source header line.
pub(crate) const FORWARD_BUF_LEN: usize = 65536;

/// Hard ceiling the router enforces on datagram payloads. Not enforced here;
/// oversized sends are rejected bridge-side.
pub const MAX_DATAGRAM_LEN: usize = 31_744;

/// Payload size below which delivery is considered reliable.
pub const RECOMMENDED_DATAGRAM_LEN: usize = 11 * 1024;

const RECV_CHAN_CAP: usize = 10;
const ERR_CHAN_CAP: usize = 1;

/// A received datagram whose source was authenticated by the router.
#[derive(Clone, Debug)]
pub struct Datagram {
	data: Vec<u8>,
	source: Destination,
	local: SessionAddr,
}

impl Datagram {
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	pub fn into_data(self) -> Vec<u8> {
		self.data
	}

	/// The sender's full destination.
	pub fn source(&self) -> &Destination {
		&self.source
	}

	/// The receiving session's address.
	pub fn local_addr(&self) -> &SessionAddr {
		&self.local
	}
}

/// Parses one forwarded UDP packet: `<b64-dest>[ FROM_PORT=n TO_PORT=n]\n`
/// followed by the raw payload. Port hints are accepted and ignored.
pub(crate) fn parse_forwarded(buf: &[u8], session: &BaseSession) -> Result<Datagram> {
	let (header, payload) = split_forwarded(buf)?;
	let source = header
		.split_ascii_whitespace()
		.next()
		.unwrap_or_default();
	let source = Destination::from_b64(source)?;
	Ok(Datagram {
		data: payload.to_vec(),
		source,
		local: session.local_addr(),
	})
}

/// Common header/payload split for every forwarded style.
pub(crate) fn split_forwarded(buf: &[u8]) -> Result<(&str, &[u8])> {
	let nl = buf
		.iter()
		.position(|&b| b == b'\n')
		.ok_or_else(|| SamError::Framing("no newline after source header".to_string()))?;
	let header = std::str::from_utf8(&buf[..nl])
		.map_err(|_| SamError::Framing("source header is not ASCII".to_string()))?
		.trim_end();
	if header.is_empty() {
		return Err(SamError::Framing("empty source header".to_string()));
	}
	let payload = &buf[nl + 1..];
	if payload.is_empty() {
		return Err(SamError::EmptyPayload);
	}
	Ok((header, payload))
}

struct ReaderState {
	closed: bool,
}

/// Channel plumbing behind every datagram-flavoured reader.
///
/// One receive loop per reader: it pulls packets off the session's forwarding
/// socket, parses them, and fans out over a bounded payload channel. The
/// close signal is broadcast by dropping the sender half of a zero-capacity
/// channel; the loop closes the done channel the same way at its very exit.
/// Payload and error channels are never closed by the close path.
pub(crate) struct ReaderCore<T> {
	session: Arc<BaseSession>,
	recv_rx: Receiver<T>,
	err_rx: Receiver<SamError>,
	close_tx: Mutex<Option<Sender<()>>>,
	close_rx: Receiver<()>,
	done_rx: Receiver<()>,
	state: RwLock<ReaderState>,
}

impl<T: Send + 'static> ReaderCore<T> {
	pub(crate) fn spawn<F>(session: Arc<BaseSession>, parse: F) -> Result<ReaderCore<T>>
	where
		F: Fn(&[u8], &BaseSession) -> Result<T> + Send + 'static,
	{
		session.ensure_open()?;
		// fail before spawning if this style has no forwarding socket
		session.udp_handle()?;

		let (recv_tx, recv_rx) = bounded(RECV_CHAN_CAP);
		let (err_tx, err_rx) = bounded(ERR_CHAN_CAP);
		let (close_tx, close_rx) = bounded::<()>(0);
		let (done_tx, done_rx) = bounded::<()>(0);

		let loop_session = Arc::clone(&session);
		let loop_close_rx = close_rx.clone();
		thread::Builder::new()
			.name(format!("sam3-recv-{}", session.id()))
			.spawn(move || {
				receive_loop(loop_session, parse, recv_tx, err_tx, loop_close_rx, done_tx)
			})
			.map_err(SamError::from)?;

		Ok(ReaderCore {
			session,
			recv_rx,
			err_rx,
			close_tx: Mutex::new(Some(close_tx)),
			close_rx,
			done_rx,
			state: RwLock::new(ReaderState { closed: false }),
		})
	}

	/// Blocks until a datagram, an error, or a close arrives, whichever is
	/// first.
	pub(crate) fn receive(&self) -> Result<T> {
		self.session.ensure_open()?;
		if read_lock(&self.state).closed {
			return Err(SamError::Closed);
		}
		select! {
			recv(self.recv_rx) -> msg => msg.map_err(|_| SamError::Closed),
			recv(self.err_rx) -> err => match err {
				Ok(e) => Err(e),
				Err(_) => Err(SamError::Closed),
			},
			recv(self.close_rx) -> _ => Err(SamError::Closed),
		}
	}

	/// Signals the receive loop to stop. Safe to call any number of times,
	/// from any thread.
	pub(crate) fn close(&self) {
		{
			let mut state = write_lock(&self.state);
			if state.closed {
				return;
			}
			state.closed = true;
		}
		if let Some(tx) = lock_mutex(&self.close_tx).take() {
			drop(tx);
		}
	}

	pub(crate) fn is_closed(&self) -> bool {
		read_lock(&self.state).closed
	}

	/// True once the receive loop has exited. Blocks up to `timeout`.
	pub(crate) fn wait_done(&self, timeout: Duration) -> bool {
		matches!(
			self.done_rx.recv_timeout(timeout),
			Err(RecvTimeoutError::Disconnected)
		)
	}

	pub(crate) fn session(&self) -> &Arc<BaseSession> {
		&self.session
	}
}

impl<T> Drop for ReaderCore<T> {
	fn drop(&mut self) {
		// a leaked reader must still terminate its receive loop
		let mut state = write_lock(&self.state);
		state.closed = true;
		drop(state);
		if let Some(tx) = lock_mutex(&self.close_tx).take() {
			drop(tx);
		}
	}
}

fn receive_loop<T, F>(
	session: Arc<BaseSession>,
	parse: F,
	recv_tx: Sender<T>,
	err_tx: Sender<SamError>,
	close_rx: Receiver<()>,
	done_tx: Sender<()>,
) where
	F: Fn(&[u8], &BaseSession) -> Result<T>,
{
	// dropped at every exit path, closing the done channel
	let _done = done_tx;
	let mut buf = vec![0u8; FORWARD_BUF_LEN];
	loop {
		match close_rx.try_recv() {
			Err(TryRecvError::Empty) => {}
			_ => return,
		}
		let n = match session.recv_forwarded(&mut buf) {
			Ok(n) => n,
			Err(SamError::Closed) => return,
			Err(e) => {
				if matches!(close_rx.try_recv(), Err(TryRecvError::Empty)) {
					let _ = err_tx.try_send(e);
				}
				return;
			}
		};
		match parse(&buf[..n], &session) {
			Ok(datagram) => {
				select! {
					send(recv_tx, datagram) -> delivered => {
						if delivered.is_err() {
							return;
						}
					}
					recv(close_rx) -> _ => return,
				}
			}
			// a malformed packet poisons nothing; report it and keep reading
			Err(e) => {
				let _ = err_tx.try_send(e);
			}
		}
	}
}

/// Composes the outbound injection packet.
pub(crate) fn frame_datagram(
	prefix: &str,
	session_id: &str,
	dest: &Destination,
	payload: &[u8],
) -> Vec<u8> {
	let mut packet = format!("{} {} {}\n", prefix, session_id, dest.base64()).into_bytes();
	packet.extend_from_slice(payload);
	packet
}

/// Send half shared by every datagram-flavoured style: a transient UDP
/// socket per send, dialed at the bridge's datagram port.
pub(crate) struct WriterCore {
	session: Arc<BaseSession>,
	timeout: Duration,
}

impl WriterCore {
	pub(crate) fn new(session: Arc<BaseSession>) -> WriterCore {
		WriterCore {
			session,
			timeout: DEFAULT_SEND_TIMEOUT,
		}
	}

	pub(crate) fn set_timeout(&mut self, timeout: Duration) {
		self.timeout = timeout;
	}

	pub(crate) fn send(&self, payload: &[u8], dest: &Destination) -> Result<()> {
		self.session.ensure_open()?;
		let socket = UdpSocket::bind(("127.0.0.1", 0))
			.map_err(|e| SamError::Io(format!("transient send socket: {e}")))?;
		socket
			.set_write_timeout(Some(self.timeout))
			.map_err(SamError::from)?;
		socket
			.connect(self.session.data_endpoint())
			.map_err(|e| SamError::Io(format!("bridge datagram port: {e}")))?;
		let packet = frame_datagram(
			self.session.style().send_prefix(),
			self.session.id(),
			dest,
			payload,
		);
		socket
			.send(&packet)
			.map_err(|e| SamError::Io(format!("datagram injection: {e}")))?;
		debug!(
			"session {} sent {} bytes to {}",
			self.session.id(),
			payload.len(),
			dest.base64().chars().take(16).collect::<String>()
		);
		Ok(())
	}
}

/// Reader for authenticated datagram styles (`DATAGRAM`, `DATAGRAM2`).
pub struct DatagramReader {
	core: ReaderCore<Datagram>,
}

impl DatagramReader {
	pub(crate) fn spawn(session: Arc<BaseSession>) -> Result<DatagramReader> {
		Ok(DatagramReader {
			core: ReaderCore::spawn(session, parse_forwarded)?,
		})
	}

	/// The next datagram delivered by the bridge.
	pub fn receive(&self) -> Result<Datagram> {
		self.core.receive()
	}

	/// Stops the receive loop. Idempotent.
	pub fn close(&self) {
		self.core.close()
	}

	pub fn is_closed(&self) -> bool {
		self.core.is_closed()
	}
}

/// Writer shared by the datagram-flavoured styles; the session determines
/// the wire prefix.
pub struct DatagramWriter {
	core: WriterCore,
}

impl DatagramWriter {
	pub(crate) fn new(session: Arc<BaseSession>) -> DatagramWriter {
		DatagramWriter {
			core: WriterCore::new(session),
		}
	}

	/// Sets the send timeout, returning the writer for chaining.
	pub fn with_timeout(mut self, timeout: Duration) -> DatagramWriter {
		self.core.set_timeout(timeout);
		self
	}

	pub fn send(&self, payload: &[u8], dest: &Destination) -> Result<()> {
		self.core.send(payload, dest)
	}
}

struct ConnState {
	closed: bool,
}

/// Packet-connection adapter over one reader/writer pair.
///
/// Dropping the connection without closing it still terminates its receive
/// loop.
pub struct DatagramConn {
	reader: DatagramReader,
	writer: DatagramWriter,
	remote: RwLock<Option<Destination>>,
	state: RwLock<ConnState>,
}

impl DatagramConn {
	pub(crate) fn new(reader: DatagramReader, writer: DatagramWriter) -> DatagramConn {
		DatagramConn {
			reader,
			writer,
			remote: RwLock::new(None),
			state: RwLock::new(ConnState { closed: false }),
		}
	}

	fn ensure_open(&self) -> Result<()> {
		if read_lock(&self.state).closed {
			Err(SamError::Closed)
		} else {
			Ok(())
		}
	}

	/// Receives one datagram into `buf`, returning the copied length and the
	/// sender. Oversized payloads are truncated to `buf`.
	pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Destination)> {
		self.ensure_open()?;
		let datagram = self.reader.receive()?;
		let n = datagram.data().len().min(buf.len());
		buf[..n].copy_from_slice(&datagram.data()[..n]);
		Ok((n, datagram.source().clone()))
	}

	pub fn send_to(&self, payload: &[u8], dest: &Destination) -> Result<usize> {
		self.ensure_open()?;
		self.writer.send(payload, dest)?;
		Ok(payload.len())
	}

	/// Stream-style read: the first sender seen becomes the connection's
	/// remote peer.
	pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
		let (n, source) = self.recv_from(buf)?;
		let mut remote = write_lock(&self.remote);
		if remote.is_none() {
			*remote = Some(source);
		}
		Ok(n)
	}

	/// Stream-style write to the cached remote peer.
	pub fn write(&self, payload: &[u8]) -> Result<usize> {
		let remote = read_lock(&self.remote).clone().ok_or_else(|| {
			SamError::InvalidArgument("no remote peer cached; read first or use send_to".to_string())
		})?;
		self.send_to(payload, &remote)
	}

	pub fn remote_addr(&self) -> Option<Destination> {
		read_lock(&self.remote).clone()
	}

	pub fn local_addr(&self) -> SessionAddr {
		self.reader.core.session().local_addr()
	}

	/// Placeholder: read deadlines are not applied to the forwarding socket
	/// yet. Always succeeds.
	pub fn set_read_deadline(&self, _deadline: std::time::Instant) -> Result<()> {
		Ok(())
	}

	/// Idempotent close; terminates the receive loop.
	pub fn close(&self) {
		{
			let mut state = write_lock(&self.state);
			if state.closed {
				return;
			}
			state.closed = true;
		}
		self.reader.close();
	}
}

impl Drop for DatagramConn {
	fn drop(&mut self) {
		self.close();
	}
}

/// An authenticated repliable datagram session (legacy `STYLE=DATAGRAM`,
/// no replay protection; prefer [`crate::Datagram2Session`]).
///
/// # Examples
///
/// ```no_run
/// use sam3::{DatagramSession, SamOptions};
///
/// let session = DatagramSession::transient("127.0.0.1:7656").unwrap();
/// let datagram = session.receive().unwrap();
/// session.send(b"pong", datagram.source()).unwrap();
/// ```
pub struct DatagramSession {
	base: Arc<BaseSession>,
}

impl DatagramSession {
	/// Creates a session bound to `destination` (a private key blob, or
	/// `TRANSIENT`).
	pub fn new<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<DatagramSession> {
		Ok(DatagramSession {
			base: BaseSession::open(sam_addr, SessionStyle::Datagram, id, destination, options, None)?,
		})
	}

	/// As [`DatagramSession::new`], selecting the signature type used for a
	/// transient destination.
	pub fn with_signature<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		signature: SignatureType,
	) -> Result<DatagramSession> {
		Ok(DatagramSession {
			base: BaseSession::open(
				sam_addr,
				SessionStyle::Datagram,
				id,
				destination,
				options,
				Some(signature),
			)?,
		})
	}

	/// As [`DatagramSession::new`], fixing the I2CP port range.
	pub fn with_ports<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		from_port: u16,
		to_port: u16,
	) -> Result<DatagramSession> {
		let mut options = options.clone();
		options.from_port = Some(from_port);
		options.to_port = Some(to_port);
		Self::new(sam_addr, id, destination, &options)
	}

	/// A throwaway session with an auto-generated id and destination.
	pub fn transient<A: ToSocketAddrs>(sam_addr: A) -> Result<DatagramSession> {
		Self::new(sam_addr, &nickname(), "TRANSIENT", &SamOptions::default())
	}

	/// Wraps a subsession pre-registered by a primary session. `udp` must be
	/// the forwarding socket announced in the subsession's options.
	pub fn from_subsession(
		sam: SamConnection,
		id: &str,
		keys: SessionKeys,
		udp: UdpSocket,
	) -> Result<DatagramSession> {
		Ok(DatagramSession {
			base: BaseSession::from_subsession(sam, SessionStyle::Datagram, id, keys, Some(udp))?,
		})
	}

	pub fn id(&self) -> &str {
		self.base.id()
	}

	pub fn addr(&self) -> I2pAddr {
		self.base.addr()
	}

	pub fn local_addr(&self) -> SessionAddr {
		self.base.local_addr()
	}

	pub fn keys(&self) -> &SessionKeys {
		self.base.keys()
	}

	pub fn is_closed(&self) -> bool {
		self.base.is_closed()
	}

	/// Spawns a reader with its own receive loop.
	pub fn reader(&self) -> Result<DatagramReader> {
		DatagramReader::spawn(Arc::clone(&self.base))
	}

	pub fn writer(&self) -> Result<DatagramWriter> {
		self.base.ensure_open()?;
		Ok(DatagramWriter::new(Arc::clone(&self.base)))
	}

	/// A packet connection owning a private reader/writer pair.
	pub fn conn(&self) -> Result<DatagramConn> {
		Ok(DatagramConn::new(self.reader()?, self.writer()?))
	}

	/// One-shot receive, reading the forwarding socket directly.
	///
	/// Use this when exactly one message is wanted; it avoids spawning a
	/// receive loop whose teardown would contend with a concurrent close.
	pub fn receive(&self) -> Result<Datagram> {
		let mut buf = vec![0u8; FORWARD_BUF_LEN];
		let n = self.base.recv_forwarded(&mut buf)?;
		parse_forwarded(&buf[..n], &self.base)
	}

	/// Sends one datagram with the default timeout.
	pub fn send(&self, payload: &[u8], dest: &Destination) -> Result<()> {
		WriterCore::new(Arc::clone(&self.base)).send(payload, dest)
	}

	/// Idempotent teardown; readers and writers produced from this session
	/// reject further use.
	pub fn close(&self) -> Result<()> {
		self.base.close()
	}
}
