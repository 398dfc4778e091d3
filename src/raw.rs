//! Unauthenticated, non-repliable datagrams (`STYLE=RAW`).
//!
//! Inbound raw packets arrive with no source header: the entire forwarded
//! payload is application data and the sender stays anonymous. Outbound raw
//! datagrams are injected over UDP like the other styles, or pushed through
//! the control socket with `RAW SEND` where delivery status matters.

use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::{Arc, RwLock, Weak};

use crate::datagram::{DatagramWriter, ReaderCore, WriterCore, FORWARD_BUF_LEN};
use crate::error::{Result, SamError};
use crate::net::{Destination, I2pAddr, BASE64_I2P};
use crate::options::{SamOptions, SignatureType};
use crate::parsers::sam_raw_status;
use crate::sam::{nickname, SamConnection, SessionStyle};
use crate::session::{BaseSession, SessionAddr, SessionHook, SessionKeys};
use crate::utils::{read_lock, write_lock};

/// A received raw datagram. The payload is encrypted in transit but the
/// sender is anonymous: there is no source to reply to.
#[derive(Clone, Debug)]
pub struct RawDatagram {
	data: Vec<u8>,
	local: SessionAddr,
}

impl RawDatagram {
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	pub fn into_data(self) -> Vec<u8> {
		self.data
	}

	pub fn local_addr(&self) -> &SessionAddr {
		&self.local
	}

	/// The anonymous source placeholder: the zero address tagged with the
	/// raw network.
	pub fn source(&self) -> SessionAddr {
		SessionAddr::new("i2p-raw", I2pAddr::new(""))
	}
}

/// Raw packets carry no header line; the whole packet is payload.
pub(crate) fn parse_forwarded_raw(buf: &[u8], session: &BaseSession) -> Result<RawDatagram> {
	if buf.is_empty() {
		return Err(SamError::EmptyPayload);
	}
	Ok(RawDatagram {
		data: buf.to_vec(),
		local: session.local_addr(),
	})
}

/// Reader for raw datagrams.
pub struct RawReader {
	core: ReaderCore<RawDatagram>,
}

impl RawReader {
	pub(crate) fn spawn(session: Arc<BaseSession>) -> Result<RawReader> {
		Ok(RawReader {
			core: ReaderCore::spawn(session, parse_forwarded_raw)?,
		})
	}

	pub fn receive(&self) -> Result<RawDatagram> {
		self.core.receive()
	}

	pub fn close(&self) {
		self.core.close()
	}

	pub fn is_closed(&self) -> bool {
		self.core.is_closed()
	}
}

struct RawListenerState {
	closed: bool,
	conn_readers: Vec<Weak<RawReader>>,
}

struct RawListenerInner {
	base: Arc<BaseSession>,
	reader: RawReader,
	state: RwLock<RawListenerState>,
}

impl RawListenerInner {
	/// Close without touching the session; shared by explicit close, the
	/// session cascade, and abandonment.
	fn close_internal(&self) {
		let readers = {
			let mut state = write_lock(&self.state);
			if state.closed {
				return;
			}
			state.closed = true;
			std::mem::take(&mut state.conn_readers)
		};
		self.reader.close();
		for reader in readers {
			if let Some(reader) = reader.upgrade() {
				reader.close();
			}
		}
	}
}

impl SessionHook for RawListenerInner {
	fn on_session_close(&self) {
		self.close_internal();
	}
}

/// Broadcast listener over a raw session.
///
/// Each [`RawListener::accept`] hands out a [`RawConn`] with its own receive
/// loop; the kernel distributes forwarded packets among the active loops.
/// Closing the listener closes every reader it created but never the
/// session. Close is idempotent.
pub struct RawListener {
	inner: Arc<RawListenerInner>,
}

impl RawListener {
	pub(crate) fn bind(base: Arc<BaseSession>) -> Result<RawListener> {
		base.ensure_open()?;
		let reader = RawReader::spawn(Arc::clone(&base))?;
		let inner = Arc::new(RawListenerInner {
			base,
			reader,
			state: RwLock::new(RawListenerState {
				closed: false,
				conn_readers: Vec::new(),
			}),
		});
		let hook: Weak<RawListenerInner> = Arc::downgrade(&inner);
		inner.base.register_hook(hook)?;
		Ok(RawListener { inner })
	}

	/// Datagrams delivered to the listener's own reader.
	pub fn receive(&self) -> Result<RawDatagram> {
		if read_lock(&self.inner.state).closed {
			return Err(SamError::Closed);
		}
		self.inner.reader.receive()
	}

	/// A new connection subscribed to the session's forwarded packets.
	pub fn accept(&self) -> Result<RawConn> {
		self.inner.base.ensure_open()?;
		if read_lock(&self.inner.state).closed {
			return Err(SamError::Closed);
		}
		let reader = Arc::new(RawReader::spawn(Arc::clone(&self.inner.base))?);
		write_lock(&self.inner.state)
			.conn_readers
			.push(Arc::downgrade(&reader));
		Ok(RawConn {
			reader,
			local: self.inner.base.local_addr(),
			closed: RwLock::new(false),
		})
	}

	pub fn local_addr(&self) -> SessionAddr {
		self.inner.base.local_addr()
	}

	pub fn is_closed(&self) -> bool {
		read_lock(&self.inner.state).closed
	}

	/// Idempotent close of the listener and every reader it handed out.
	pub fn close(&self) {
		self.inner.close_internal();
	}
}

impl Drop for RawListener {
	fn drop(&mut self) {
		self.inner.close_internal();
	}
}

/// A read-only packet connection produced by [`RawListener::accept`].
///
/// Dropping it without an explicit close still terminates its receive loop.
pub struct RawConn {
	reader: Arc<RawReader>,
	local: SessionAddr,
	closed: RwLock<bool>,
}

impl RawConn {
	pub fn receive(&self) -> Result<RawDatagram> {
		if *read_lock(&self.closed) {
			return Err(SamError::Closed);
		}
		self.reader.receive()
	}

	/// Receives one datagram into `buf`, returning the copied length and the
	/// anonymous source placeholder.
	pub fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SessionAddr)> {
		let datagram = self.receive()?;
		let n = datagram.data().len().min(buf.len());
		buf[..n].copy_from_slice(&datagram.data()[..n]);
		Ok((n, datagram.source()))
	}

	pub fn local_addr(&self) -> SessionAddr {
		self.local.clone()
	}

	pub fn close(&self) {
		{
			let mut closed = write_lock(&self.closed);
			if *closed {
				return;
			}
			*closed = true;
		}
		self.reader.close();
	}
}

impl Drop for RawConn {
	fn drop(&mut self) {
		self.close();
	}
}

/// An unauthenticated, non-repliable datagram session.
///
/// # Examples
///
/// ```no_run
/// use sam3::RawSession;
///
/// let session = RawSession::transient("127.0.0.1:7656").unwrap();
/// let datagram = session.receive().unwrap();
/// println!("{} anonymous bytes", datagram.data().len());
/// ```
pub struct RawSession {
	base: Arc<BaseSession>,
}

impl RawSession {
	pub fn new<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<RawSession> {
		Ok(RawSession {
			base: BaseSession::open(sam_addr, SessionStyle::Raw, id, destination, options, None)?,
		})
	}

	pub fn with_signature<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		signature: SignatureType,
	) -> Result<RawSession> {
		Ok(RawSession {
			base: BaseSession::open(
				sam_addr,
				SessionStyle::Raw,
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
	) -> Result<RawSession> {
		let mut options = options.clone();
		options.from_port = Some(from_port);
		options.to_port = Some(to_port);
		Self::new(sam_addr, id, destination, &options)
	}

	pub fn transient<A: ToSocketAddrs>(sam_addr: A) -> Result<RawSession> {
		Self::new(sam_addr, &nickname(), "TRANSIENT", &SamOptions::default())
	}

	/// Wraps a subsession pre-registered by a primary session.
	pub fn from_subsession(
		sam: SamConnection,
		id: &str,
		keys: SessionKeys,
		udp: UdpSocket,
	) -> Result<RawSession> {
		Ok(RawSession {
			base: BaseSession::from_subsession(sam, SessionStyle::Raw, id, keys, Some(udp))?,
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

	pub fn reader(&self) -> Result<RawReader> {
		RawReader::spawn(Arc::clone(&self.base))
	}

	pub fn writer(&self) -> Result<DatagramWriter> {
		self.base.ensure_open()?;
		Ok(DatagramWriter::new(Arc::clone(&self.base)))
	}

	/// A broadcast listener over this session's forwarded packets.
	pub fn listen(&self) -> Result<RawListener> {
		RawListener::bind(Arc::clone(&self.base))
	}

	/// One-shot receive bypassing the reader machinery; see
	/// [`crate::DatagramSession::receive`].
	pub fn receive(&self) -> Result<RawDatagram> {
		let mut buf = vec![0u8; FORWARD_BUF_LEN];
		let n = self.base.recv_forwarded(&mut buf)?;
		parse_forwarded_raw(&buf[..n], &self.base)
	}

	/// Sends an anonymous datagram over the UDP data plane.
	pub fn send(&self, payload: &[u8], dest: &Destination) -> Result<()> {
		WriterCore::new(Arc::clone(&self.base)).send(payload, dest)
	}

	/// Sends through the control socket instead of the UDP data plane,
	/// surfacing the bridge's delivery status.
	pub fn send_via_bridge(&self, payload: &[u8], dest: &Destination) -> Result<()> {
		let message = format!(
			"RAW SEND ID={id} DESTINATION={dest} SIZE={size}\n{payload}\n",
			id = self.base.id(),
			dest = dest.base64(),
			size = payload.len(),
			payload = BASE64_I2P.encode(payload),
		);
		self.base
			.with_sam(|sam| sam.send(message, sam_raw_status))
			.map(|_| ())
	}

	pub fn close(&self) -> Result<()> {
		self.base.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil;
	use std::net::UdpSocket;
	use std::time::Duration;

	fn session() -> (testutil::FakeBridge, RawSession) {
		let bridge = testutil::spawn_bridge();
		let session =
			RawSession::new(bridge.addr, "raw-test", "TRANSIENT", &SamOptions::default()).unwrap();
		(bridge, session)
	}

	#[test]
	fn whole_packet_is_payload() {
		let (_bridge, session) = session();
		let datagram = parse_forwarded_raw(b"anything goes \n here", &session.base).unwrap();
		assert_eq!(datagram.data(), b"anything goes \n here");
		assert_eq!(datagram.source().addr(), &I2pAddr::new(""));
		assert!(matches!(
			parse_forwarded_raw(b"", &session.base),
			Err(SamError::EmptyPayload)
		));
		session.close().unwrap();
	}

	#[test]
	fn one_shot_receive_over_forwarding_socket() {
		let (_bridge, session) = session();
		let target = session.base.udp_local_addr().unwrap();
		let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
		sender.send_to(b"anonymous payload", target).unwrap();
		let datagram = session.receive().unwrap();
		assert_eq!(datagram.data(), b"anonymous payload");
		assert_eq!(datagram.local_addr().network(), "i2p-raw");
		session.close().unwrap();
	}

	#[test]
	fn reader_round_trip() {
		let (_bridge, session) = session();
		let reader = session.reader().unwrap();
		let target = session.base.udp_local_addr().unwrap();
		let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
		sender.send_to(b"first", target).unwrap();
		assert_eq!(reader.receive().unwrap().data(), b"first");
		sender.send_to(b"second", target).unwrap();
		assert_eq!(reader.receive().unwrap().data(), b"second");
		reader.close();
		assert!(reader.is_closed());
		assert!(matches!(reader.receive(), Err(SamError::Closed)));
		session.close().unwrap();
	}

	#[test]
	fn send_via_bridge_parses_status() {
		let (_bridge, session) = session();
		let dest = Destination::from_b64(&testutil::lookup_value()).unwrap();
		session.send_via_bridge(b"status checked", &dest).unwrap();
		session.close().unwrap();
		assert!(matches!(
			session.send_via_bridge(b"nope", &dest),
			Err(SamError::Closed)
		));
	}

	#[test]
	fn listener_close_is_idempotent_and_cascades() {
		let (_bridge, session) = session();
		let listener = session.listen().unwrap();
		let conn = listener.accept().unwrap();
		listener.close();
		listener.close();
		assert!(listener.is_closed());
		assert!(matches!(listener.accept(), Err(SamError::Closed)));
		assert!(matches!(listener.receive(), Err(SamError::Closed)));
		// the accepted connection's reader was closed by the cascade
		assert!(conn.reader.is_closed());
		session.close().unwrap();
	}

	#[test]
	fn session_close_cascades_to_listener() {
		let (_bridge, session) = session();
		let listener = session.listen().unwrap();
		session.close().unwrap();
		assert!(listener.is_closed());
	}

	#[test]
	fn abandoned_conn_terminates_its_loop() {
		let (_bridge, session) = session();
		let listener = session.listen().unwrap();
		let reader = {
			let conn = listener.accept().unwrap();
			Arc::clone(&conn.reader)
			// conn dropped here without close()
		};
		assert!(reader.is_closed());
		assert!(reader.core.wait_done(Duration::from_secs(2)));
		session.close().unwrap();
	}
}
