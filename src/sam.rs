use std::collections::HashMap;
use std::io::prelude::*;
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use nom::IResult;

use crate::error::{Result, SamError};
use crate::parsers::{sam_dest_reply, sam_hello, sam_naming_reply, sam_session_status};
use crate::options::SignatureType;
use crate::utils::rand_string;

/// Default TCP endpoint of the SAM bridge's control plane.
pub static DEFAULT_API: &str = "127.0.0.1:7656";

/// UDP port on which the bridge accepts outbound `3.x`-framed datagrams.
/// Distinct from the per-session forwarding port the bridge sends *inbound*
/// datagrams to.
pub const SAM_UDP_PORT: u16 = 7655;

static SAM_MIN: &str = "3.0";
static SAM_MAX: &str = "3.3";

/// Transport style negotiated at session creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStyle {
	/// Reliable TCP-like byte streams
	Stream,
	/// Authenticated repliable datagrams (legacy, no replay protection)
	Datagram,
	/// Authenticated repliable datagrams with replay protection
	Datagram2,
	/// Repliable datagrams sourced by a 32-byte hash instead of a full
	/// destination
	Datagram3,
	/// Unauthenticated, non-repliable, source-anonymous datagrams
	Raw,
	/// SAMv3.3 multiplexing session hosting subsessions
	Primary,
}

impl SessionStyle {
	/// The exact uppercase token used on `SESSION CREATE STYLE=`.
	pub fn string(&self) -> &'static str {
		match self {
			SessionStyle::Stream => "STREAM",
			SessionStyle::Datagram => "DATAGRAM",
			SessionStyle::Datagram2 => "DATAGRAM2",
			SessionStyle::Datagram3 => "DATAGRAM3",
			SessionStyle::Raw => "RAW",
			SessionStyle::Primary => "PRIMARY",
		}
	}

	/// Network tag reported by this style's address adapters.
	pub fn network(&self) -> &'static str {
		match self {
			SessionStyle::Stream | SessionStyle::Primary => "i2p",
			SessionStyle::Datagram => "datagram",
			SessionStyle::Datagram2 => "datagram2",
			SessionStyle::Datagram3 => "datagram3",
			SessionStyle::Raw => "i2p-raw",
		}
	}

	/// Version prefix on outbound UDP datagram headers. DATAGRAM2/3 require
	/// the 3.3 framing; the legacy styles keep 3.0.
	pub(crate) fn send_prefix(&self) -> &'static str {
		match self {
			SessionStyle::Datagram2 | SessionStyle::Datagram3 => "3.3",
			_ => "3.0",
		}
	}

	/// Whether the bridge delivers inbound traffic for this style over UDP
	/// forwarding (and so whether a session owns a forwarding socket).
	pub(crate) fn forwards_udp(&self) -> bool {
		matches!(
			self,
			SessionStyle::Datagram
				| SessionStyle::Datagram2
				| SessionStyle::Datagram3
				| SessionStyle::Raw
		)
	}
}

/// Maps a reply's `RESULT=` token onto the error taxonomy. Replies without a
/// `RESULT` key count as success.
pub(crate) fn verify_response(map: &HashMap<String, String>) -> Result<()> {
	let res = map.get("RESULT").map(String::as_str).unwrap_or("OK");
	let msg = map.get("MESSAGE").map(String::as_str).unwrap_or("");
	match res {
		"OK" => Ok(()),
		"CANT_REACH_PEER" => Err(SamError::CantReachPeer(msg.to_string())),
		"KEY_NOT_FOUND" => Err(SamError::KeyNotFound(msg.to_string())),
		"PEER_NOT_FOUND" => Err(SamError::PeerNotFound(msg.to_string())),
		"DUPLICATED_DEST" => Err(SamError::DuplicatedDest(msg.to_string())),
		"DUPLICATED_ID" => Err(SamError::DuplicatedId(msg.to_string())),
		"INVALID_KEY" => Err(SamError::InvalidKey(msg.to_string())),
		"INVALID_ID" => Err(SamError::InvalidId(msg.to_string())),
		"TIMEOUT" => Err(SamError::Timeout(msg.to_string())),
		"I2P_ERROR" => Err(SamError::I2pError(msg.to_string())),
		other => Err(SamError::Protocol(format!("RESULT={other} {msg}"))),
	}
}

/// A control-plane connection to the SAM bridge.
///
/// Opens with a `HELLO` version negotiation and then carries line-framed
/// request/reply dialogs: naming lookups, destination generation and session
/// creation. For stream sessions the same TCP connection later doubles as the
/// data bearer.
#[derive(Debug)]
pub struct SamConnection {
	conn: TcpStream,
}

impl SamConnection {
	/// Connects to the bridge and negotiates the protocol version.
	pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<SamConnection> {
		let tcp_stream = TcpStream::connect(addr).map_err(SamError::from)?;

		let mut socket = SamConnection { conn: tcp_stream };
		socket.handshake()?;

		Ok(socket)
	}

	/// As [`SamConnection::connect`], bounding both the TCP connect and the
	/// handshake by `timeout`.
	pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> Result<SamConnection> {
		let tcp_stream = TcpStream::connect_timeout(addr, timeout).map_err(SamError::from)?;
		tcp_stream.set_read_timeout(Some(timeout))?;
		tcp_stream.set_write_timeout(Some(timeout))?;

		let mut socket = SamConnection { conn: tcp_stream };
		socket.handshake()?;

		Ok(socket)
	}

	fn handshake(&mut self) -> Result<HashMap<String, String>> {
		let hello_msg = format!("HELLO VERSION MIN={SAM_MIN} MAX={SAM_MAX}\n");
		self.send(hello_msg, sam_hello)
	}

	/// Writes one command line and parses the single reply line with
	/// `reply_parser`, verifying its `RESULT`.
	pub fn send<F>(&mut self, msg: String, mut reply_parser: F) -> Result<HashMap<String, String>>
	where
		F: FnMut(&str) -> IResult<&str, Vec<(&str, &str)>>,
	{
		debug!("-> {}", msg.trim_end());
		self.conn.write_all(msg.as_bytes()).map_err(SamError::from)?;

		let mut reader = BufReader::new(&self.conn);
		let mut buffer = String::new();
		reader.read_line(&mut buffer).map_err(SamError::from)?;
		debug!("<- {}", buffer.trim_end());

		let vec_opts = reply_parser(&buffer)
			.map_err(|_| SamError::Protocol(buffer.trim_end().to_string()))?
			.1;
		let map: HashMap<String, String> = vec_opts
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		verify_response(&map)?;
		Ok(map)
	}

	/// Translates a hostname, b32 address or `ME` into a full base64
	/// destination.
	pub fn naming_lookup(&mut self, name: &str) -> Result<String> {
		let naming_lookup_msg = format!("NAMING LOOKUP NAME={name}\n");
		let ret = self.send(naming_lookup_msg, sam_naming_reply)?;
		ret.get("VALUE")
			.cloned()
			.ok_or_else(|| SamError::ResolverMiss(name.to_string()))
	}

	/// Generates a fresh destination keypair, returning `(public, private)`.
	pub fn generate_destination(
		&mut self,
		signature_type: SignatureType,
	) -> Result<(String, String)> {
		let dest_gen_msg = format!("DEST GENERATE SIGNATURE_TYPE={signature_type}\n");
		let ret = self.send(dest_gen_msg, sam_dest_reply)?;
		match (ret.get("PUB"), ret.get("PRIV")) {
			(Some(public), Some(private)) => Ok((public.clone(), private.clone())),
			_ => Err(SamError::Protocol("DEST REPLY missing PUB/PRIV".to_string())),
		}
	}

	/// As [`SamConnection::generate_destination`], packaged as session keys
	/// ready to hand to a session constructor.
	pub fn generate_keys(
		&mut self,
		signature_type: SignatureType,
	) -> Result<crate::session::SessionKeys> {
		let (public, private) = self.generate_destination(signature_type)?;
		Ok(crate::session::SessionKeys::new(
			crate::net::Destination::from_b64(&public)?,
			private,
		))
	}

	/// Issues the generic `SESSION CREATE` for the given style.
	///
	/// `options` is the fully rendered option list (forwarding target, ports,
	/// tunnel options, extras). A signature type is only meaningful for
	/// `TRANSIENT` destinations, where the router generates the keys.
	pub(crate) fn create_session(
		&mut self,
		style: SessionStyle,
		id: &str,
		destination: &str,
		signature_type: Option<SignatureType>,
		options: &str,
	) -> Result<HashMap<String, String>> {
		let signature = match signature_type {
			Some(sig) if destination == "TRANSIENT" => format!(" SIGNATURE_TYPE={sig}"),
			_ => String::new(),
		};
		let create_session_msg = format!(
			"SESSION CREATE STYLE={style} ID={id} DESTINATION={destination}{signature} {options}\n",
			style = style.string(),
		);
		self.send(create_session_msg, sam_session_status)
	}

	pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
		self.conn.set_nonblocking(nonblocking).map_err(|e| e.into())
	}

	pub fn set_read_timeout(&self, duration: Option<Duration>) -> io::Result<()> {
		self.conn.set_read_timeout(duration)
	}

	pub fn set_write_timeout(&self, duration: Option<Duration>) -> io::Result<()> {
		self.conn.set_write_timeout(duration)
	}

	/// The bridge endpoint this connection talks to.
	pub fn peer_addr(&self) -> Result<SocketAddr> {
		self.conn.peer_addr().map_err(|e| e.into())
	}

	/// Shuts down both halves of the underlying socket, unblocking any
	/// thread reading from a duplicated handle.
	pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
		self.conn.shutdown(how)
	}

	/// A new handle over the same underlying socket.
	pub fn duplicate(&self) -> io::Result<SamConnection> {
		self.conn.try_clone().map(|s| SamConnection { conn: s })
	}

	/// Attempts to return a handle to the underlying socket.
	pub fn try_clone(&self) -> io::Result<TcpStream> {
		self.conn.try_clone()
	}

	/// Consumes the connection, yielding the bearer socket. Used by the
	/// stream dialer once the `STREAM CONNECT` handshake has succeeded.
	pub(crate) fn into_stream(self) -> TcpStream {
		self.conn
	}
}

/// Auto-generated session nickname.
pub fn nickname() -> String {
	format!("sam3-{}", rand_string(8))
}
