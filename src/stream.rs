//! Reliable TCP-like byte streams (`STYLE=STREAM`).
//!
//! The session duplex doubles as the bearer for inbound connections: a
//! single accept loop owns its read side, scanning `STREAM STATUS` lines and
//! yielding connections threaded through the same socket. Outbound dials
//! never touch that socket; each one runs its handshake on a fresh control
//! connection which then becomes the connection's bearer.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use log::debug;

use crate::error::{Result, SamError};
use crate::net::{Destination, I2pAddr, I2pEndpoint, ToI2pSocketAddr};
use crate::options::{SamOptions, SignatureType};
use crate::parsers::sam_stream_status;
use crate::sam::{nickname, verify_response, SamConnection, SessionStyle};
use crate::session::{BaseSession, SessionAddr, SessionHook, SessionKeys, DEFAULT_SEND_TIMEOUT};
use crate::utils::{lock_mutex, read_lock, write_lock};

const ACCEPT_CHAN_CAP: usize = 10;
const ERR_CHAN_CAP: usize = 1;

/// One end of an I2P stream.
///
/// Dialed connections own their socket; accepted connections share the
/// session duplex, so closing them never tears the session down.
pub struct StreamConn {
	stream: TcpStream,
	owns_socket: bool,
	local: SessionAddr,
	remote: Destination,
	closed: RwLock<bool>,
}

impl StreamConn {
	fn dialed(stream: TcpStream, local: SessionAddr, remote: Destination) -> StreamConn {
		StreamConn {
			stream,
			owns_socket: true,
			local,
			remote,
			closed: RwLock::new(false),
		}
	}

	fn accepted(stream: TcpStream, local: SessionAddr, remote: Destination) -> StreamConn {
		StreamConn {
			stream,
			owns_socket: false,
			local,
			remote,
			closed: RwLock::new(false),
		}
	}

	pub fn local_addr(&self) -> SessionAddr {
		self.local.clone()
	}

	/// The peer's full destination.
	pub fn remote_dest(&self) -> &Destination {
		&self.remote
	}

	/// The peer's b32 address.
	pub fn peer_addr(&self) -> Result<I2pAddr> {
		self.remote.b32_addr()
	}

	pub fn is_closed(&self) -> bool {
		*read_lock(&self.closed)
	}

	fn ensure_open_io(&self) -> io::Result<()> {
		if self.is_closed() {
			Err(io::Error::new(
				io::ErrorKind::NotConnected,
				"i2p stream connection closed",
			))
		} else {
			Ok(())
		}
	}

	pub fn set_read_timeout(&self, duration: Option<Duration>) -> io::Result<()> {
		self.stream.set_read_timeout(duration)
	}

	pub fn set_write_timeout(&self, duration: Option<Duration>) -> io::Result<()> {
		self.stream.set_write_timeout(duration)
	}

	/// Idempotent close. Dialed connections shut their socket down;
	/// accepted connections only mark themselves closed, since the socket
	/// is the session duplex.
	pub fn close(&self) {
		{
			let mut closed = write_lock(&self.closed);
			if *closed {
				return;
			}
			*closed = true;
		}
		if self.owns_socket {
			let _ = self.stream.shutdown(Shutdown::Both);
		}
	}
}

impl Read for StreamConn {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.ensure_open_io()?;
		self.stream.read(buf)
	}
}

impl Write for StreamConn {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.ensure_open_io()?;
		self.stream.write(buf)
	}
	fn flush(&mut self) -> io::Result<()> {
		self.stream.flush()
	}
}

impl Drop for StreamConn {
	fn drop(&mut self) {
		self.close();
	}
}

/// Extracts the remote destination from an inbound `STREAM STATUS` line.
pub(crate) fn parse_accept_line(line: &str) -> Result<Destination> {
	let pairs = sam_stream_status(line)
		.map_err(|_| SamError::Protocol(line.trim_end().to_string()))?
		.1;
	let map = pairs
		.iter()
		.map(|(k, v)| (k.to_string(), v.to_string()))
		.collect();
	verify_response(&map)?;
	let dest = map
		.get("DESTINATION")
		.ok_or_else(|| SamError::Protocol("STREAM STATUS missing DESTINATION".to_string()))?;
	Destination::from_b64(dest)
}

enum StatusRead {
	Line(String),
	Eof,
	Closed,
	Failed(io::Error),
}

/// Pulls the next newline-terminated line off the duplex, polling so the
/// close signal is observed even while no data arrives. Partial lines stay
/// buffered in `pending` across poll timeouts.
fn read_status_line(
	stream: &mut TcpStream,
	pending: &mut Vec<u8>,
	close_rx: &Receiver<()>,
) -> StatusRead {
	let mut buf = [0u8; 1024];
	loop {
		if !matches!(close_rx.try_recv(), Err(TryRecvError::Empty)) {
			return StatusRead::Closed;
		}
		if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
			let line: Vec<u8> = pending.drain(..=pos).collect();
			return StatusRead::Line(String::from_utf8_lossy(&line).into_owned());
		}
		match stream.read(&mut buf) {
			Ok(0) => return StatusRead::Eof,
			Ok(n) => pending.extend_from_slice(&buf[..n]),
			Err(e)
				if matches!(
					e.kind(),
					io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
				) =>
			{
				continue
			}
			Err(e) => return StatusRead::Failed(e),
		}
	}
}

struct StreamListenerState {
	closed: bool,
}

struct StreamListenerInner {
	base: Arc<BaseSession>,
	accept_rx: Receiver<StreamConn>,
	err_rx: Receiver<SamError>,
	close_tx: Mutex<Option<Sender<()>>>,
	close_rx: Receiver<()>,
	state: RwLock<StreamListenerState>,
}

impl StreamListenerInner {
	fn close_internal(&self) {
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
}

impl SessionHook for StreamListenerInner {
	fn on_session_close(&self) {
		self.close_internal();
	}
}

fn accept_loop(
	base: Arc<BaseSession>,
	mut duplex: TcpStream,
	accept_tx: Sender<StreamConn>,
	err_tx: Sender<SamError>,
	close_rx: Receiver<()>,
) {
	let mut pending = Vec::new();
	loop {
		match read_status_line(&mut duplex, &mut pending, &close_rx) {
			StatusRead::Closed => return,
			StatusRead::Eof => {
				if matches!(close_rx.try_recv(), Err(TryRecvError::Empty)) {
					let _ = err_tx.try_send(SamError::Closed);
				}
				return;
			}
			StatusRead::Failed(e) => {
				if matches!(close_rx.try_recv(), Err(TryRecvError::Empty)) {
					let _ = err_tx.try_send(e.into());
				}
				return;
			}
			StatusRead::Line(line) => {
				let remote = match parse_accept_line(&line) {
					Ok(remote) => remote,
					// a bad status line is reported but does not kill the loop
					Err(e) => {
						let _ = err_tx.try_send(e);
						continue;
					}
				};
				let conn = match duplex.try_clone() {
					Ok(stream) => StreamConn::accepted(stream, base.local_addr(), remote),
					Err(e) => {
						let _ = err_tx.try_send(e.into());
						return;
					}
				};
				debug!("session {} accepted inbound stream", base.id());
				select! {
					send(accept_tx, conn) -> delivered => {
						if delivered.is_err() {
							return;
						}
					}
					// closing wins over delivering to a blocked accept()
					recv(close_rx) -> _ => return,
				}
			}
		}
	}
}

/// Listener for inbound I2P streams.
///
/// # Examples
///
/// ```no_run
/// use sam3::StreamSession;
///
/// let session = StreamSession::transient("127.0.0.1:7656").unwrap();
/// let listener = session.listen().unwrap();
/// for conn in listener.incoming() {
///     match conn {
///         Ok(conn) => println!("peer {}", conn.peer_addr().unwrap()),
///         Err(e) => eprintln!("accept failed: {e}"),
///     }
/// }
/// ```
pub struct StreamListener {
	inner: Arc<StreamListenerInner>,
}

/// An infinite iterator over the connections accepted by a
/// [`StreamListener`], equivalent to calling `accept` in a loop.
pub struct Incoming<'a> {
	listener: &'a StreamListener,
}

impl StreamListener {
	pub(crate) fn bind(base: Arc<BaseSession>) -> Result<StreamListener> {
		base.ensure_open()?;
		// No poll timeout here: the duplex is shared with accepted
		// connections, so the loop relies on the session-close shutdown to
		// unblock an in-flight read.
		let duplex = base.duplex()?;

		let (accept_tx, accept_rx) = bounded(ACCEPT_CHAN_CAP);
		let (err_tx, err_rx) = bounded(ERR_CHAN_CAP);
		let (close_tx, close_rx) = bounded::<()>(0);

		let inner = Arc::new(StreamListenerInner {
			base: Arc::clone(&base),
			accept_rx,
			err_rx,
			close_tx: Mutex::new(Some(close_tx)),
			close_rx: close_rx.clone(),
			state: RwLock::new(StreamListenerState { closed: false }),
		});
		let hook: Weak<StreamListenerInner> = Arc::downgrade(&inner);
		base.register_hook(hook)?;

		let loop_base = Arc::clone(&base);
		thread::Builder::new()
			.name(format!("sam3-accept-{}", base.id()))
			.spawn(move || accept_loop(loop_base, duplex, accept_tx, err_tx, close_rx))
			.map_err(SamError::from)?;

		Ok(StreamListener { inner })
	}

	/// Blocks until an inbound connection, an accept-loop error, or a close
	/// arrives.
	pub fn accept(&self) -> Result<StreamConn> {
		self.inner.base.ensure_open()?;
		if read_lock(&self.inner.state).closed {
			return Err(SamError::Closed);
		}
		select! {
			recv(self.inner.accept_rx) -> conn => conn.map_err(|_| SamError::Closed),
			recv(self.inner.err_rx) -> err => match err {
				Ok(e) => Err(e),
				Err(_) => Err(SamError::Closed),
			},
			recv(self.inner.close_rx) -> _ => Err(SamError::Closed),
		}
	}

	pub fn incoming(&self) -> Incoming<'_> {
		Incoming { listener: self }
	}

	pub fn local_addr(&self) -> SessionAddr {
		self.inner.base.local_addr()
	}

	pub fn is_closed(&self) -> bool {
		read_lock(&self.inner.state).closed
	}

	/// Idempotent close; terminates the accept loop without touching the
	/// session.
	pub fn close(&self) {
		self.inner.close_internal();
	}
}

impl Drop for StreamListener {
	fn drop(&mut self) {
		self.inner.close_internal();
	}
}

impl<'a> Iterator for Incoming<'a> {
	type Item = Result<StreamConn>;
	fn next(&mut self) -> Option<Result<StreamConn>> {
		Some(self.listener.accept())
	}
}

enum DialTarget<'a> {
	Name(&'a str),
	Dest(&'a Destination),
}

/// Outbound dialer for a stream session.
///
/// Every dial opens a fresh control connection so the handshake never
/// interleaves with the accept loop on the session duplex. The configured
/// timeout and any per-call deadline are combined, earliest wins; expiry
/// closes the auxiliary connection.
pub struct StreamDialer {
	base: Arc<BaseSession>,
	timeout: Duration,
}

impl StreamDialer {
	pub(crate) fn new(base: Arc<BaseSession>) -> StreamDialer {
		StreamDialer {
			base,
			timeout: DEFAULT_SEND_TIMEOUT,
		}
	}

	/// Sets the dial timeout, returning the dialer for chaining.
	pub fn with_timeout(mut self, timeout: Duration) -> StreamDialer {
		self.timeout = timeout;
		self
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Dials a hostname or b32 address, resolving it first.
	pub fn dial(&self, name: &str) -> Result<StreamConn> {
		if name.is_empty() {
			return Err(SamError::InvalidArgument("empty destination name".to_string()));
		}
		self.dial_inner(DialTarget::Name(name), 0, None)
	}

	/// Dials an I2P socket address; a non-zero port becomes the connect's
	/// `TO_PORT`. Name endpoints are resolved first, destination endpoints
	/// dial directly.
	pub fn dial_addr<A: ToI2pSocketAddr>(&self, addr: A) -> Result<StreamConn> {
		let addr = addr.to_i2p_socket_addr()?;
		match addr.endpoint() {
			I2pEndpoint::Name(name) => {
				self.dial_inner(DialTarget::Name(name.as_str()), addr.port(), None)
			}
			I2pEndpoint::Dest(dest) => self.dial_inner(DialTarget::Dest(dest), addr.port(), None),
		}
	}

	/// Dials a known destination, skipping resolution.
	pub fn dial_dest(&self, dest: &Destination) -> Result<StreamConn> {
		self.dial_inner(DialTarget::Dest(dest), 0, None)
	}

	/// As [`StreamDialer::dial_dest`] with an absolute deadline; the earlier
	/// of the deadline and the configured timeout applies.
	pub fn dial_dest_deadline(&self, dest: &Destination, deadline: Instant) -> Result<StreamConn> {
		self.dial_inner(DialTarget::Dest(dest), 0, Some(deadline))
	}

	fn dial_inner(
		&self,
		target: DialTarget<'_>,
		to_port: u16,
		deadline: Option<Instant>,
	) -> Result<StreamConn> {
		self.base.ensure_open()?;

		let limit = {
			let by_timeout = Instant::now() + self.timeout;
			match deadline {
				Some(d) if d < by_timeout => d,
				_ => by_timeout,
			}
		};
		let budget = |what: &str| -> Result<Duration> {
			let remaining = limit.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				Err(SamError::Timeout(format!("dial deadline expired before {what}")))
			} else {
				Ok(remaining)
			}
		};

		// Fresh control connection: the session duplex belongs to the
		// accept loop. Dropping it on any error below closes the socket.
		let mut sam = SamConnection::connect_timeout(&self.base.sam_api(), budget("connect")?)?;

		let dest = match target {
			DialTarget::Name(name) => {
				sam.set_read_timeout(Some(budget("lookup")?))
					.map_err(SamError::from)?;
				let value = sam.naming_lookup(name)?;
				Destination::from_b64(&value)?
			}
			DialTarget::Dest(dest) => dest.clone(),
		};

		sam.set_read_timeout(Some(budget("handshake")?))
			.map_err(SamError::from)?;
		let port = if to_port > 0 {
			format!(" TO_PORT={to_port}")
		} else {
			String::new()
		};
		let connect_msg = format!(
			"STREAM CONNECT ID={id} DESTINATION={dest} SILENT=false{port}\n",
			id = self.base.id(),
			dest = dest.base64(),
		);
		sam.send(connect_msg, sam_stream_status)?;

		// handshake done; the socket is now the stream bearer
		let stream = sam.into_stream();
		stream.set_read_timeout(None).map_err(SamError::from)?;
		stream.set_write_timeout(None).map_err(SamError::from)?;
		debug!("session {} dialed {}", self.base.id(), dest.b32_addr()?);
		Ok(StreamConn::dialed(stream, self.base.local_addr(), dest))
	}
}

/// A reliable byte-stream session.
///
/// # Examples
///
/// ```no_run
/// use std::io::prelude::*;
/// use sam3::StreamSession;
///
/// let session = StreamSession::transient("127.0.0.1:7656").unwrap();
/// let mut conn = session.dial("example.i2p").unwrap();
/// conn.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
/// ```
pub struct StreamSession {
	base: Arc<BaseSession>,
}

impl StreamSession {
	pub fn new<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<StreamSession> {
		Ok(StreamSession {
			base: BaseSession::open(sam_addr, SessionStyle::Stream, id, destination, options, None)?,
		})
	}

	pub fn with_signature<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		signature: SignatureType,
	) -> Result<StreamSession> {
		Ok(StreamSession {
			base: BaseSession::open(
				sam_addr,
				SessionStyle::Stream,
				id,
				destination,
				options,
				Some(signature),
			)?,
		})
	}

	pub fn with_ports<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		from_port: u16,
		to_port: u16,
	) -> Result<StreamSession> {
		let mut options = options.clone();
		options.from_port = Some(from_port);
		options.to_port = Some(to_port);
		Self::new(sam_addr, id, destination, &options)
	}

	pub fn transient<A: ToSocketAddrs>(sam_addr: A) -> Result<StreamSession> {
		Self::new(sam_addr, &nickname(), "TRANSIENT", &SamOptions::default())
	}

	/// Wraps a subsession pre-registered by a primary session.
	pub fn from_subsession(sam: SamConnection, id: &str, keys: SessionKeys) -> Result<StreamSession> {
		Ok(StreamSession {
			base: BaseSession::from_subsession(sam, SessionStyle::Stream, id, keys, None)?,
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

	/// Starts accepting inbound streams. The listener registers itself for
	/// the session close cascade.
	pub fn listen(&self) -> Result<StreamListener> {
		StreamListener::bind(Arc::clone(&self.base))
	}

	/// A dialer with the default timeout.
	pub fn dialer(&self) -> Result<StreamDialer> {
		self.base.ensure_open()?;
		Ok(StreamDialer::new(Arc::clone(&self.base)))
	}

	/// Dials a hostname or b32 address with the default timeout.
	pub fn dial(&self, name: &str) -> Result<StreamConn> {
		self.dialer()?.dial(name)
	}

	/// Dials an I2P socket address with the default timeout.
	pub fn dial_addr<A: ToI2pSocketAddr>(&self, addr: A) -> Result<StreamConn> {
		self.dialer()?.dial_addr(addr)
	}

	/// Dials a known destination with the default timeout.
	pub fn dial_dest(&self, dest: &Destination) -> Result<StreamConn> {
		self.dialer()?.dial_dest(dest)
	}

	pub fn close(&self) -> Result<()> {
		self.base.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil;

	fn session() -> (testutil::FakeBridge, StreamSession) {
		let _ = env_logger::builder().is_test(true).try_init();
		let bridge = testutil::spawn_bridge();
		let session = StreamSession::new(
			bridge.addr,
			"stream-test",
			"TRANSIENT",
			&SamOptions::default(),
		)
		.unwrap();
		(bridge, session)
	}

	#[test]
	fn parse_accept_line_ok() {
		let dest_b64 = testutil::lookup_value();
		let line = format!("STREAM STATUS RESULT=OK DESTINATION={dest_b64}\n");
		let dest = parse_accept_line(&line).unwrap();
		assert_eq!(dest.base64(), dest_b64);
	}

	#[test]
	fn parse_accept_line_failures() {
		assert!(matches!(
			parse_accept_line("STREAM STATUS RESULT=I2P_ERROR\n"),
			Err(SamError::I2pError(_))
		));
		assert!(matches!(
			parse_accept_line("STREAM STATUS RESULT=OK\n"),
			Err(SamError::Protocol(_))
		));
		assert!(matches!(
			parse_accept_line("garbage\n"),
			Err(SamError::Protocol(_))
		));
	}

	#[test]
	fn dial_dest_succeeds() {
		let (_bridge, session) = session();
		let dest = Destination::from_b64(&testutil::lookup_value()).unwrap();
		let conn = session.dial_dest(&dest).unwrap();
		assert_eq!(conn.remote_dest(), &dest);
		assert_eq!(conn.local_addr().network(), "i2p");
		conn.close();
		assert!(conn.is_closed());
		session.close().unwrap();
	}

	#[test]
	fn dial_resolves_names() {
		let (bridge, session) = session();
		let before = bridge.lookup_count();
		let conn = session.dial("example.i2p").unwrap();
		assert_eq!(bridge.lookup_count(), before + 1);
		assert_eq!(conn.remote_dest().base64(), testutil::lookup_value());
		session.close().unwrap();
	}

	#[test]
	fn dial_addr_passes_port() {
		let (bridge, session) = session();
		let before = bridge.lookup_count();
		let conn = session.dial_addr("example.i2p:8080").unwrap();
		assert_eq!(bridge.lookup_count(), before + 1);
		assert_eq!(conn.remote_dest().base64(), testutil::lookup_value());
		session.close().unwrap();
	}

	#[test]
	fn dial_addr_with_destination_skips_lookup() {
		let (bridge, session) = session();
		let dest = Destination::from_b64(&testutil::lookup_value()).unwrap();
		let before = bridge.lookup_count();
		let conn = session.dial_addr((dest.clone(), 8080u16)).unwrap();
		assert_eq!(bridge.lookup_count(), before);
		assert_eq!(conn.remote_dest(), &dest);
		session.close().unwrap();
	}

	#[test]
	fn dial_rejection_maps_result() {
		let (_bridge, session) = session();
		let dest = Destination::from_b64(&testutil::unreachable_destination()).unwrap();
		assert!(matches!(
			session.dial_dest(&dest),
			Err(SamError::CantReachPeer(_))
		));
		session.close().unwrap();
	}

	#[test]
	fn dial_rejects_empty_name_and_closed_session() {
		let (_bridge, session) = session();
		let dialer = session.dialer().unwrap();
		assert!(matches!(
			dialer.dial(""),
			Err(SamError::InvalidArgument(_))
		));
		session.close().unwrap();
		let dest = Destination::from_b64(&testutil::lookup_value()).unwrap();
		assert!(matches!(dialer.dial_dest(&dest), Err(SamError::Closed)));
		assert!(matches!(session.dialer(), Err(SamError::Closed)));
		assert!(matches!(session.listen(), Err(SamError::Closed)));
	}

	#[test]
	fn expired_deadline_fails_before_io() {
		let (_bridge, session) = session();
		let dialer = session.dialer().unwrap();
		let dest = Destination::from_b64(&testutil::lookup_value()).unwrap();
		let past = Instant::now() - Duration::from_secs(1);
		assert!(matches!(
			dialer.dial_dest_deadline(&dest, past),
			Err(SamError::Timeout(_))
		));
		session.close().unwrap();
	}

	#[test]
	fn accept_yields_pushed_connection() {
		let (bridge, session) = session();
		let listener = session.listen().unwrap();
		let dest_b64 = testutil::lookup_value();
		bridge.push_to_sessions(&format!("STREAM STATUS RESULT=OK DESTINATION={dest_b64}\n"));
		let conn = listener.accept().unwrap();
		assert_eq!(conn.remote_dest().base64(), dest_b64);
		listener.close();
		session.close().unwrap();
	}

	#[test]
	fn listener_close_is_idempotent() {
		let (_bridge, session) = session();
		let listener = session.listen().unwrap();
		listener.close();
		listener.close();
		assert!(listener.is_closed());
		assert!(matches!(listener.accept(), Err(SamError::Closed)));
		session.close().unwrap();
	}

	#[test]
	fn session_close_unblocks_accept() {
		let (_bridge, session) = session();
		let listener = session.listen().unwrap();
		let inner = Arc::clone(&listener.inner);
		let handle = thread::spawn(move || {
			// a blocked accept() equivalent: select on the listener channels
			select! {
				recv(inner.accept_rx) -> conn => conn.map(|_| ()).map_err(|_| SamError::Closed),
				recv(inner.err_rx) -> err => match err {
					Ok(e) => Err(e),
					Err(_) => Err(SamError::Closed),
				},
				recv(inner.close_rx) -> _ => Err(SamError::Closed),
			}
		});
		thread::sleep(Duration::from_millis(50));
		session.close().unwrap();
		let result = handle.join().unwrap();
		assert!(matches!(result, Err(SamError::Closed)));
		assert!(listener.is_closed());
	}

	#[test]
	fn concurrent_listens_complete() {
		let (_bridge, session) = session();
		let mut handles = Vec::new();
		for _ in 0..4 {
			let base = Arc::clone(&session.base);
			handles.push(thread::spawn(move || StreamListener::bind(base).is_ok()));
		}
		for handle in handles {
			assert!(handle.join().unwrap());
		}
		session.close().unwrap();
	}

	#[test]
	fn rapid_create_and_close_sessions() {
		let bridge = testutil::spawn_bridge();
		for i in 0..20 {
			let session = StreamSession::new(
				bridge.addr,
				&format!("churn-{i}"),
				"TRANSIENT",
				&SamOptions::default(),
			)
			.unwrap();
			let _listener = session.listen().unwrap();
			session.close().unwrap();
		}
	}
}
