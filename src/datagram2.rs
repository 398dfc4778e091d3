//! Replay-protected authenticated datagrams (`STYLE=DATAGRAM2`).
//!
//! Reception is identical to the legacy style; sends use the `3.3` framing
//! the newer styles require. This is the recommended repliable style.

use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use crate::datagram::{
	parse_forwarded, Datagram, DatagramConn, DatagramReader, DatagramWriter, WriterCore,
	FORWARD_BUF_LEN,
};
use crate::error::Result;
use crate::net::I2pAddr;
use crate::options::{SamOptions, SignatureType};
use crate::sam::{nickname, SamConnection, SessionStyle};
use crate::session::{BaseSession, SessionAddr, SessionKeys};

/// An authenticated, repliable, replay-protected datagram session.
///
/// # Examples
///
/// ```no_run
/// use sam3::Datagram2Session;
///
/// let session = Datagram2Session::transient("127.0.0.1:7656").unwrap();
/// let reader = session.reader().unwrap();
/// let datagram = reader.receive().unwrap();
/// session.send(b"pong", datagram.source()).unwrap();
/// ```
pub struct Datagram2Session {
	base: Arc<BaseSession>,
}

impl Datagram2Session {
	pub fn new<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<Datagram2Session> {
		Ok(Datagram2Session {
			base: BaseSession::open(
				sam_addr,
				SessionStyle::Datagram2,
				id,
				destination,
				options,
				None,
			)?,
		})
	}

	pub fn with_signature<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		signature: SignatureType,
	) -> Result<Datagram2Session> {
		Ok(Datagram2Session {
			base: BaseSession::open(
				sam_addr,
				SessionStyle::Datagram2,
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
	) -> Result<Datagram2Session> {
		let mut options = options.clone();
		options.from_port = Some(from_port);
		options.to_port = Some(to_port);
		Self::new(sam_addr, id, destination, &options)
	}

	pub fn transient<A: ToSocketAddrs>(sam_addr: A) -> Result<Datagram2Session> {
		Self::new(sam_addr, &nickname(), "TRANSIENT", &SamOptions::default())
	}

	/// Wraps a subsession pre-registered by a primary session.
	pub fn from_subsession(
		sam: SamConnection,
		id: &str,
		keys: SessionKeys,
		udp: UdpSocket,
	) -> Result<Datagram2Session> {
		Ok(Datagram2Session {
			base: BaseSession::from_subsession(sam, SessionStyle::Datagram2, id, keys, Some(udp))?,
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

	pub fn reader(&self) -> Result<DatagramReader> {
		DatagramReader::spawn(Arc::clone(&self.base))
	}

	pub fn writer(&self) -> Result<DatagramWriter> {
		self.base.ensure_open()?;
		Ok(DatagramWriter::new(Arc::clone(&self.base)))
	}

	pub fn conn(&self) -> Result<DatagramConn> {
		Ok(DatagramConn::new(self.reader()?, self.writer()?))
	}

	/// One-shot receive bypassing the reader machinery; see
	/// [`crate::DatagramSession::receive`].
	pub fn receive(&self) -> Result<Datagram> {
		let mut buf = vec![0u8; FORWARD_BUF_LEN];
		let n = self.base.recv_forwarded(&mut buf)?;
		parse_forwarded(&buf[..n], &self.base)
	}

	pub fn send(&self, payload: &[u8], dest: &crate::net::Destination) -> Result<()> {
		WriterCore::new(Arc::clone(&self.base)).send(payload, dest)
	}

	pub fn close(&self) -> Result<()> {
		self.base.close()
	}
}
