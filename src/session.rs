//! Per-style session substrate: identity, keys, the duplex to the bridge,
//! the UDP forwarding socket, and the teardown cascade shared by all five
//! transport styles.

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Result, SamError};
use crate::net::{Destination, I2pAddr};
use crate::options::{inject_option, SamOptions, SignatureType};
use crate::sam::{SamConnection, SessionStyle, SAM_UDP_PORT};
use crate::utils::{lock_mutex, read_lock, write_lock};

/// Interval at which blocked forwarded reads re-check the closed state.
pub(crate) const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default timeout applied to writers and dialers.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Key material binding a session to its destination.
///
/// The derived address is the session's identity for its entire lifetime.
#[derive(Clone, Debug)]
pub struct SessionKeys {
	destination: Destination,
	private: String,
}

impl SessionKeys {
	pub fn new(destination: Destination, private: impl Into<String>) -> SessionKeys {
		SessionKeys {
			destination,
			private: private.into(),
		}
	}

	/// The public destination, in base64 wire form.
	pub fn destination(&self) -> &Destination {
		&self.destination
	}

	/// The private key blob handed to `SESSION CREATE`.
	pub fn private(&self) -> &str {
		&self.private
	}

	/// The b32 address derived from the destination.
	pub fn address(&self) -> Result<I2pAddr> {
		self.destination.b32_addr()
	}
}

/// An I2P address tagged with the transport it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAddr {
	network: &'static str,
	addr: I2pAddr,
}

impl SessionAddr {
	pub(crate) fn new(network: &'static str, addr: I2pAddr) -> SessionAddr {
		SessionAddr { network, addr }
	}

	/// The transport tag: `"i2p"`, `"datagram"`, `"datagram2"`,
	/// `"datagram3"` or `"i2p-raw"`.
	pub fn network(&self) -> &'static str {
		self.network
	}

	pub fn addr(&self) -> &I2pAddr {
		&self.addr
	}
}

impl fmt::Display for SessionAddr {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.addr)
	}
}

/// Close cascade hook registered by listeners.
///
/// Invoked by the session close path after the closed flag is set and the
/// exclusive lock has been released; implementations must not try to
/// unregister themselves from the session.
pub(crate) trait SessionHook: Send + Sync {
	fn on_session_close(&self);
}

struct SessionState {
	closed: bool,
	hooks: Vec<Weak<dyn SessionHook>>,
}

/// Shared core of every session style.
///
/// Owns the session id, keys, the control/data duplex to the bridge and, for
/// the UDP-forwarded styles, the loopback socket the bridge delivers inbound
/// datagrams to.
pub struct BaseSession {
	nickname: String,
	style: SessionStyle,
	keys: SessionKeys,
	address: I2pAddr,
	sam_api: SocketAddr,
	sam: Mutex<SamConnection>,
	// taken (and thereby closed) exactly once, by the teardown path
	udp: Mutex<Option<UdpSocket>>,
	state: RwLock<SessionState>,
}

impl BaseSession {
	/// Generic session construction.
	///
	/// For UDP-forwarded styles a loopback socket is allocated first and its
	/// port injected into the option list as the bridge's forwarding target,
	/// unless the caller supplied `HOST`/`PORT` itself. On any failure the
	/// socket is released and the error surfaced.
	pub(crate) fn open<A: ToSocketAddrs>(
		sam_addr: A,
		style: SessionStyle,
		id: &str,
		destination: &str,
		options: &SamOptions,
		signature: Option<SignatureType>,
	) -> Result<Arc<BaseSession>> {
		let mut sam = SamConnection::connect(sam_addr)?;
		let sam_api = sam.peer_addr()?;

		let udp = if style.forwards_udp() {
			let socket = UdpSocket::bind(("127.0.0.1", 0)).map_err(SamError::from)?;
			socket
				.set_read_timeout(Some(CLOSE_POLL_INTERVAL))
				.map_err(SamError::from)?;
			Some(socket)
		} else {
			None
		};

		let mut opts = options.to_vec();
		if let Some(socket) = &udp {
			let port = socket.local_addr().map_err(SamError::from)?.port();
			inject_option(&mut opts, "HOST", "127.0.0.1");
			inject_option(&mut opts, "PORT", &port.to_string());
		}

		let reply = sam.create_session(style, id, destination, signature, &opts.join(" "))?;

		// `ME` resolves to this session's public destination.
		let public = sam.naming_lookup("ME")?;
		let private = if destination == "TRANSIENT" {
			reply
				.get("DESTINATION")
				.cloned()
				.ok_or_else(|| SamError::Protocol("SESSION STATUS missing DESTINATION".to_string()))?
		} else {
			destination.to_string()
		};
		let keys = SessionKeys::new(Destination::from_b64(&public)?, private);
		let address = keys.address()?;

		debug!("session {} ({}) up as {}", id, style.string(), address);

		Ok(Arc::new(BaseSession {
			nickname: id.to_string(),
			style,
			keys,
			address,
			sam_api,
			sam: Mutex::new(sam),
			udp: Mutex::new(udp),
			state: RwLock::new(SessionState {
				closed: false,
				hooks: Vec::new(),
			}),
		}))
	}

	/// Constructs a session over a subsession pre-registered by a primary
	/// session: no router-side `SESSION CREATE` is issued here.
	///
	/// UDP-forwarded styles must be handed the forwarding socket whose port
	/// was announced in the `SESSION ADD` options.
	pub(crate) fn from_subsession(
		sam: SamConnection,
		style: SessionStyle,
		id: &str,
		keys: SessionKeys,
		udp: Option<UdpSocket>,
	) -> Result<Arc<BaseSession>> {
		if style.forwards_udp() && udp.is_none() {
			return Err(SamError::InvalidArgument(format!(
				"{} subsession requires a forwarding UDP socket",
				style.string()
			)));
		}
		if let Some(socket) = &udp {
			socket
				.set_read_timeout(Some(CLOSE_POLL_INTERVAL))
				.map_err(SamError::from)?;
		}
		let sam_api = sam.peer_addr()?;
		let address = keys.address()?;

		Ok(Arc::new(BaseSession {
			nickname: id.to_string(),
			style,
			keys,
			address,
			sam_api,
			sam: Mutex::new(sam),
			udp: Mutex::new(udp),
			state: RwLock::new(SessionState {
				closed: false,
				hooks: Vec::new(),
			}),
		}))
	}

	/// The session id (`ID=` nickname).
	pub fn id(&self) -> &str {
		&self.nickname
	}

	pub fn style(&self) -> SessionStyle {
		self.style
	}

	pub fn keys(&self) -> &SessionKeys {
		&self.keys
	}

	/// The b32 address this session is reachable at.
	pub fn addr(&self) -> I2pAddr {
		self.address.clone()
	}

	/// The session address tagged with its transport network.
	pub fn local_addr(&self) -> SessionAddr {
		SessionAddr::new(self.style.network(), self.address.clone())
	}

	pub(crate) fn sam_api(&self) -> SocketAddr {
		self.sam_api
	}

	/// Endpoint receiving outbound `3.x`-framed datagrams: the bridge host
	/// on its fixed UDP port.
	pub(crate) fn data_endpoint(&self) -> SocketAddr {
		SocketAddr::new(self.sam_api.ip(), SAM_UDP_PORT)
	}

	pub fn is_closed(&self) -> bool {
		read_lock(&self.state).closed
	}

	pub(crate) fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			Err(SamError::Closed)
		} else {
			Ok(())
		}
	}

	/// Short-lived duplicated handle to the forwarding socket.
	///
	/// Teardown takes the owned socket, so holders of a duplicate see reads
	/// fail out once their current poll interval elapses and cannot obtain
	/// another handle.
	pub(crate) fn udp_handle(&self) -> Result<UdpSocket> {
		if !self.style.forwards_udp() {
			return Err(SamError::InvalidArgument(format!(
				"{} sessions have no forwarding socket",
				self.style.string()
			)));
		}
		match lock_mutex(&self.udp).as_ref() {
			Some(socket) => socket.try_clone().map_err(SamError::from),
			None => Err(SamError::Closed),
		}
	}

	/// A duplicated handle to the session duplex, for accept loops and
	/// accepted connections.
	pub(crate) fn duplex(&self) -> Result<TcpStream> {
		lock_mutex(&self.sam).try_clone().map_err(SamError::from)
	}

	/// Runs a request/reply dialog on the session duplex.
	///
	/// Stream sessions must not call this while a listener owns the read
	/// side; dialers and resolvers use dedicated connections instead.
	pub(crate) fn with_sam<R>(
		&self,
		f: impl FnOnce(&mut SamConnection) -> Result<R>,
	) -> Result<R> {
		self.ensure_open()?;
		let mut sam = lock_mutex(&self.sam);
		f(&mut sam)
	}

	/// Registers a listener for the close cascade.
	pub(crate) fn register_hook(&self, hook: Weak<dyn SessionHook>) -> Result<()> {
		let mut state = write_lock(&self.state);
		if state.closed {
			return Err(SamError::Closed);
		}
		state.hooks.push(hook);
		Ok(())
	}

	/// Loopback endpoint the bridge forwards inbound datagrams to.
	pub(crate) fn udp_local_addr(&self) -> Result<SocketAddr> {
		self.udp_handle()?.local_addr().map_err(SamError::from)
	}

	/// One forwarded UDP datagram into `buf`, polling so a session close is
	/// observed within [`CLOSE_POLL_INTERVAL`].
	pub(crate) fn recv_forwarded(&self, buf: &mut [u8]) -> Result<usize> {
		let socket = self.udp_handle()?;
		loop {
			self.ensure_open()?;
			match socket.recv_from(buf) {
				Ok((n, _)) => return Ok(n),
				Err(e)
					if matches!(
						e.kind(),
						io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
					) =>
				{
					continue
				}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Tears the session down.
	///
	/// Ordering is load-bearing: the closed flag is set and the hook list
	/// snapshotted under the exclusive lock, the lock is released, and only
	/// then is the duplex shut down and the cascade run. Holding the lock
	/// across the shutdown would deadlock with a concurrent `listen()`
	/// blocked on registration.
	pub fn close(&self) -> Result<()> {
		let hooks = {
			let mut state = write_lock(&self.state);
			if state.closed {
				return Ok(());
			}
			state.closed = true;
			std::mem::take(&mut state.hooks)
		};

		debug!("closing session {}", self.nickname);

		let mut result = Ok(());
		{
			let sam = lock_mutex(&self.sam);
			if let Err(e) = sam.shutdown(Shutdown::Both) {
				// double shutdown surfaces NotConnected; anything else is real
				if e.kind() != io::ErrorKind::NotConnected {
					result = Err(SamError::from(e));
				}
			}
		}

		for hook in hooks {
			if let Some(hook) = hook.upgrade() {
				hook.on_session_close();
			}
		}

		// Closing the socket cannot itself fail here; a reader still inside
		// a blocked recv finishes on its duplicated handle within one poll
		// interval and then cannot obtain another.
		if let Some(socket) = lock_mutex(&self.udp).take() {
			debug!("session {} forwarding socket closed", self.nickname);
			drop(socket);
		}

		if let Err(e) = &result {
			warn!("session {} duplex close: {}", self.nickname, e);
		}
		result
	}
}

impl fmt::Debug for BaseSession {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("BaseSession")
			.field("id", &self.nickname)
			.field("style", &self.style)
			.field("addr", &self.address)
			.field("closed", &self.is_closed())
			.finish()
	}
}
