//! Hash-sourced repliable datagrams (`STYLE=DATAGRAM3`).
//!
//! Inbound packets carry a 32-byte source hash instead of a full
//! destination, so replying first requires a naming lookup of the derived
//! `.b32.i2p` address. Lookups are a router round-trip; the session fronts
//! them with an unbounded cache.

use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use log::debug;

use crate::datagram::{split_forwarded, DatagramWriter, ReaderCore, WriterCore, FORWARD_BUF_LEN};
use crate::error::{Result, SamError};
use crate::net::{Destination, I2pAddr, BASE64_I2P, DEST_HASH_LEN};
use crate::options::{SamOptions, SignatureType};
use crate::sam::{nickname, SamConnection, SessionStyle};
use crate::session::{BaseSession, SessionAddr, SessionKeys};
use crate::utils::{read_lock, write_lock};

/// Base64 width of a padded 32-byte hash on the wire.
const HASH_FIELD_LEN: usize = 44;

/// A received hash-sourced datagram.
///
/// `source` starts out unset; [`Datagram3::resolve_source`] populates it
/// through the session's resolver.
#[derive(Clone, Debug)]
pub struct Datagram3 {
	data: Vec<u8>,
	source_hash: [u8; DEST_HASH_LEN],
	source: Option<Destination>,
	local: SessionAddr,
}

impl Datagram3 {
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	pub fn into_data(self) -> Vec<u8> {
		self.data
	}

	/// The sender's 32-byte destination hash.
	pub fn source_hash(&self) -> &[u8; DEST_HASH_LEN] {
		&self.source_hash
	}

	/// The `.b32.i2p` address derived from the source hash. Available
	/// without any lookup.
	pub fn source_b32(&self) -> I2pAddr {
		I2pAddr::from_hash(&self.source_hash)
	}

	/// The resolved source destination, if [`Datagram3::resolve_source`]
	/// has run.
	pub fn source(&self) -> Option<&Destination> {
		self.source.as_ref()
	}

	/// Resolves and caches the source destination. Idempotent: once set,
	/// the stored destination is returned untouched.
	pub fn resolve_source(&mut self, resolver: &HashResolver) -> Result<&Destination> {
		if self.source.is_none() {
			self.source = Some(resolver.resolve(&self.source_hash[..])?);
		}
		match self.source.as_ref() {
			Some(dest) => Ok(dest),
			None => Err(SamError::ResolverMiss(self.source_b32().string())),
		}
	}

	pub fn local_addr(&self) -> &SessionAddr {
		&self.local
	}
}

/// Parses one forwarded DATAGRAM3 packet: a 44-character base64 hash field
/// (optionally followed by port hints), a newline, then the payload.
pub(crate) fn parse_forwarded3(buf: &[u8], session: &BaseSession) -> Result<Datagram3> {
	let (header, payload) = split_forwarded(buf)?;
	let field = header.split_ascii_whitespace().next().unwrap_or_default();
	if field.len() != HASH_FIELD_LEN {
		return Err(SamError::Framing(format!(
			"source hash field must be {HASH_FIELD_LEN} base64 chars, got {}",
			field.len()
		)));
	}
	let decoded = BASE64_I2P
		.decode(field.as_bytes())
		.map_err(|_| SamError::Framing("source hash field is not valid base64".to_string()))?;
	let source_hash: [u8; DEST_HASH_LEN] = decoded
		.try_into()
		.map_err(|_| SamError::Framing("source hash must decode to 32 bytes".to_string()))?;
	Ok(Datagram3 {
		data: payload.to_vec(),
		source_hash,
		source: None,
		local: session.local_addr(),
	})
}

fn hash_array(hash: &[u8]) -> Result<[u8; DEST_HASH_LEN]> {
	hash.try_into().map_err(|_| {
		SamError::InvalidArgument(format!(
			"destination hash must be {DEST_HASH_LEN} bytes, got {}",
			hash.len()
		))
	})
}

/// Cache-fronted translation of 32-byte destination hashes into full
/// destinations via `NAMING LOOKUP`.
///
/// The cache grows without bound; callers that churn through peers should
/// [`HashResolver::clear`] it periodically.
pub struct HashResolver {
	session: Arc<BaseSession>,
	cache: DashMap<String, Destination>,
}

impl HashResolver {
	pub(crate) fn new(session: Arc<BaseSession>) -> HashResolver {
		HashResolver {
			session,
			cache: DashMap::new(),
		}
	}

	/// Resolves a 32-byte hash, consulting the cache first. A miss costs one
	/// router round-trip.
	pub fn resolve(&self, hash: &[u8]) -> Result<Destination> {
		let hash = hash_array(hash)?;
		let addr = I2pAddr::from_hash(&hash).string();
		if let Some(hit) = self.cache.get(&addr) {
			return Ok(hit.value().clone());
		}
		debug!("resolving {}", addr);
		let value = self
			.session
			.with_sam(|sam| sam.naming_lookup(&addr))
			.map_err(|e| match e {
				SamError::Closed => SamError::Closed,
				other => SamError::ResolverMiss(format!("{addr}: {other}")),
			})?;
		let dest = Destination::from_b64(&value)?;
		self.cache.insert(addr, dest.clone());
		Ok(dest)
	}

	/// Cache-only lookup; never triggers a router round-trip.
	pub fn get_cached(&self, hash: &[u8]) -> Option<Destination> {
		let hash = hash_array(hash).ok()?;
		let addr = I2pAddr::from_hash(&hash).string();
		self.cache.get(&addr).map(|hit| hit.value().clone())
	}

	pub fn clear(&self) {
		self.cache.clear();
	}

	pub fn cache_size(&self) -> usize {
		self.cache.len()
	}
}

/// Reader for hash-sourced datagrams.
pub struct Datagram3Reader {
	core: ReaderCore<Datagram3>,
}

impl Datagram3Reader {
	pub(crate) fn spawn(session: Arc<BaseSession>) -> Result<Datagram3Reader> {
		Ok(Datagram3Reader {
			core: ReaderCore::spawn(session, parse_forwarded3)?,
		})
	}

	pub fn receive(&self) -> Result<Datagram3> {
		self.core.receive()
	}

	pub fn close(&self) {
		self.core.close()
	}

	pub fn is_closed(&self) -> bool {
		self.core.is_closed()
	}
}

/// Packet-connection adapter for hash-sourced datagrams.
///
/// The first sender seen on a stream-style [`Datagram3Conn::read`] becomes
/// the remote peer; a later [`Datagram3Conn::write`] resolves that peer's
/// hash through the session resolver.
pub struct Datagram3Conn {
	reader: Datagram3Reader,
	writer: DatagramWriter,
	resolver: Arc<HashResolver>,
	remote_hash: RwLock<Option<[u8; DEST_HASH_LEN]>>,
	closed: RwLock<bool>,
}

impl Datagram3Conn {
	fn ensure_open(&self) -> Result<()> {
		if *read_lock(&self.closed) {
			Err(SamError::Closed)
		} else {
			Ok(())
		}
	}

	/// Receives one datagram into `buf`, returning the copied length and
	/// the hash-derived source address.
	pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, I2pAddr)> {
		self.ensure_open()?;
		let datagram = self.reader.receive()?;
		let n = datagram.data().len().min(buf.len());
		buf[..n].copy_from_slice(&datagram.data()[..n]);
		Ok((n, datagram.source_b32()))
	}

	pub fn send_to(&self, payload: &[u8], dest: &Destination) -> Result<usize> {
		self.ensure_open()?;
		self.writer.send(payload, dest)?;
		Ok(payload.len())
	}

	pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
		self.ensure_open()?;
		let datagram = self.reader.receive()?;
		let n = datagram.data().len().min(buf.len());
		buf[..n].copy_from_slice(&datagram.data()[..n]);
		let mut remote = write_lock(&self.remote_hash);
		if remote.is_none() {
			*remote = Some(*datagram.source_hash());
		}
		Ok(n)
	}

	/// Writes to the cached remote peer, resolving its hash if needed.
	pub fn write(&self, payload: &[u8]) -> Result<usize> {
		let hash = *read_lock(&self.remote_hash);
		let hash = hash.ok_or_else(|| {
			SamError::InvalidArgument("no remote peer cached; read first or use send_to".to_string())
		})?;
		let dest = self.resolver.resolve(&hash[..])?;
		self.send_to(payload, &dest)
	}

	/// Placeholder: read deadlines are not applied to the forwarding socket
	/// yet. Always succeeds.
	pub fn set_read_deadline(&self, _deadline: std::time::Instant) -> Result<()> {
		Ok(())
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

impl Drop for Datagram3Conn {
	fn drop(&mut self) {
		self.close();
	}
}

/// A repliable datagram session whose inbound traffic is hash-sourced.
///
/// # Examples
///
/// ```no_run
/// use sam3::Datagram3Session;
///
/// let session = Datagram3Session::transient("127.0.0.1:7656").unwrap();
/// let mut datagram = session.receive().unwrap();
/// session.reply_to(b"pong", &mut datagram).unwrap();
/// ```
pub struct Datagram3Session {
	base: Arc<BaseSession>,
	resolver: Arc<HashResolver>,
}

impl Datagram3Session {
	fn wrap(base: Arc<BaseSession>) -> Datagram3Session {
		let resolver = Arc::new(HashResolver::new(Arc::clone(&base)));
		Datagram3Session { base, resolver }
	}

	pub fn new<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<Datagram3Session> {
		Ok(Self::wrap(BaseSession::open(
			sam_addr,
			SessionStyle::Datagram3,
			id,
			destination,
			options,
			None,
		)?))
	}

	pub fn with_signature<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		signature: SignatureType,
	) -> Result<Datagram3Session> {
		Ok(Self::wrap(BaseSession::open(
			sam_addr,
			SessionStyle::Datagram3,
			id,
			destination,
			options,
			Some(signature),
		)?))
	}

	pub fn with_ports<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
		from_port: u16,
		to_port: u16,
	) -> Result<Datagram3Session> {
		let mut options = options.clone();
		options.from_port = Some(from_port);
		options.to_port = Some(to_port);
		Self::new(sam_addr, id, destination, &options)
	}

	pub fn transient<A: ToSocketAddrs>(sam_addr: A) -> Result<Datagram3Session> {
		Self::new(sam_addr, &nickname(), "TRANSIENT", &SamOptions::default())
	}

	/// Wraps a subsession pre-registered by a primary session.
	pub fn from_subsession(
		sam: SamConnection,
		id: &str,
		keys: SessionKeys,
		udp: UdpSocket,
	) -> Result<Datagram3Session> {
		Ok(Self::wrap(BaseSession::from_subsession(
			sam,
			SessionStyle::Datagram3,
			id,
			keys,
			Some(udp),
		)?))
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

	/// The session's hash resolver and its cache.
	pub fn resolver(&self) -> &HashResolver {
		&self.resolver
	}

	pub fn reader(&self) -> Result<Datagram3Reader> {
		Datagram3Reader::spawn(Arc::clone(&self.base))
	}

	pub fn writer(&self) -> Result<DatagramWriter> {
		self.base.ensure_open()?;
		Ok(DatagramWriter::new(Arc::clone(&self.base)))
	}

	pub fn conn(&self) -> Result<Datagram3Conn> {
		Ok(Datagram3Conn {
			reader: self.reader()?,
			writer: self.writer()?,
			resolver: Arc::clone(&self.resolver),
			remote_hash: RwLock::new(None),
			closed: RwLock::new(false),
		})
	}

	/// One-shot receive bypassing the reader machinery; see
	/// [`crate::DatagramSession::receive`].
	pub fn receive(&self) -> Result<Datagram3> {
		let mut buf = vec![0u8; FORWARD_BUF_LEN];
		let n = self.base.recv_forwarded(&mut buf)?;
		parse_forwarded3(&buf[..n], &self.base)
	}

	pub fn send(&self, payload: &[u8], dest: &Destination) -> Result<()> {
		WriterCore::new(Arc::clone(&self.base)).send(payload, dest)
	}

	/// Resolves the datagram's source if needed, then sends `payload` back
	/// to it.
	pub fn reply_to(&self, payload: &[u8], datagram: &mut Datagram3) -> Result<()> {
		let dest = datagram.resolve_source(&self.resolver)?.clone();
		self.send(payload, &dest)
	}

	/// Tears the session down and drops the resolver cache.
	pub fn close(&self) -> Result<()> {
		let result = self.base.close();
		self.resolver.clear();
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil;
	use std::time::Duration;

	fn hash_field(hash: &[u8; 32]) -> String {
		BASE64_I2P.encode(hash)
	}

	#[test]
	fn hash_field_is_44_chars() {
		assert_eq!(hash_field(&[0u8; 32]).len(), HASH_FIELD_LEN);
	}

	fn session() -> (testutil::FakeBridge, Datagram3Session) {
		let bridge = testutil::spawn_bridge();
		let session = Datagram3Session::new(
			bridge.addr,
			"dg3-test",
			"TRANSIENT",
			&SamOptions::default(),
		)
		.unwrap();
		(bridge, session)
	}

	#[test]
	fn parse_carries_hash_and_payload() {
		let (_bridge, session) = session();
		let mut packet = format!(
			"{} FROM_PORT=1234 TO_PORT=5678\n",
			hash_field(&[0u8; 32])
		)
		.into_bytes();
		packet.extend_from_slice(b"payload-bytes");
		let datagram = parse_forwarded3(&packet, &session.base).unwrap();
		assert_eq!(datagram.source_hash(), &[0u8; 32]);
		assert!(datagram.source().is_none());
		assert_eq!(datagram.data(), b"payload-bytes");
		assert_eq!(datagram.local_addr().addr(), &session.addr());
		assert_eq!(datagram.local_addr().network(), "datagram3");
		session.close().unwrap();
	}

	#[test]
	fn parse_rejects_wrong_field_width() {
		let (_bridge, session) = session();
		let packet = b"short\npayload";
		assert!(matches!(
			parse_forwarded3(packet, &session.base),
			Err(SamError::Framing(_))
		));
		// 44 chars that are not valid base64
		let mut packet = vec![b'!'; HASH_FIELD_LEN];
		packet.extend_from_slice(b"\npayload");
		assert!(matches!(
			parse_forwarded3(&packet, &session.base),
			Err(SamError::Framing(_))
		));
		session.close().unwrap();
	}

	#[test]
	fn resolver_rejects_bad_hash_lengths() {
		let (_bridge, session) = session();
		let resolver = session.resolver();
		for len in [0usize, 1, 31, 33, 64] {
			let hash = vec![0u8; len];
			assert!(matches!(
				resolver.resolve(&hash),
				Err(SamError::InvalidArgument(_))
			));
			assert!(resolver.get_cached(&hash).is_none());
		}
		session.close().unwrap();
	}

	#[test]
	fn resolver_caches_lookups() {
		let (bridge, session) = session();
		let resolver = session.resolver();
		let hash = [4u8; 32];

		assert_eq!(resolver.cache_size(), 0);
		assert!(resolver.get_cached(&hash).is_none());

		let baseline = bridge.lookup_count();
		let dest = resolver.resolve(&hash).unwrap();
		assert_eq!(bridge.lookup_count(), baseline + 1);
		assert_eq!(resolver.cache_size(), 1);
		assert_eq!(resolver.get_cached(&hash).unwrap(), dest);

		// second resolve must be served from the cache
		let again = resolver.resolve(&hash).unwrap();
		assert_eq!(again, dest);
		assert_eq!(bridge.lookup_count(), baseline + 1);

		resolver.clear();
		assert_eq!(resolver.cache_size(), 0);
		let refetched = resolver.resolve(&hash).unwrap();
		assert_eq!(refetched, dest);
		assert_eq!(bridge.lookup_count(), baseline + 2);
		session.close().unwrap();
	}

	#[test]
	fn resolve_source_is_idempotent() {
		let (bridge, session) = session();
		let mut packet = format!("{}\n", hash_field(&[8u8; 32])).into_bytes();
		packet.extend_from_slice(b"data");
		let mut datagram = parse_forwarded3(&packet, &session.base).unwrap();

		assert_eq!(datagram.source_b32(), I2pAddr::from_hash(&[8u8; 32]));
		let resolved = datagram.resolve_source(session.resolver()).unwrap().clone();
		assert_eq!(datagram.source(), Some(&resolved));

		// already populated: no further lookups
		let baseline = bridge.lookup_count();
		let again = datagram.resolve_source(session.resolver()).unwrap().clone();
		assert_eq!(again, resolved);
		assert_eq!(bridge.lookup_count(), baseline);
		session.close().unwrap();
	}

	#[test]
	fn closed_session_rejects_handles() {
		let (_bridge, session) = session();
		session.close().unwrap();
		// double close is a no-op
		session.close().unwrap();
		assert!(session.is_closed());
		assert!(matches!(session.reader(), Err(SamError::Closed)));
		assert!(matches!(session.writer(), Err(SamError::Closed)));
		assert!(matches!(session.receive(), Err(SamError::Closed)));
		let dest = Destination::from_b64(&testutil::lookup_value()).unwrap();
		assert!(matches!(session.send(b"x", &dest), Err(SamError::Closed)));
	}

	#[test]
	fn reader_unblocks_on_session_close() {
		let (_bridge, session) = session();
		let reader = session.reader().unwrap();
		let handle = std::thread::spawn(move || reader.receive());
		std::thread::sleep(Duration::from_millis(50));
		session.close().unwrap();
		let result = handle.join().unwrap();
		assert!(matches!(result, Err(SamError::Closed)));
	}
}
