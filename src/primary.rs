//! SAMv3.3 primary-session multiplexing (`STYLE=PRIMARY`).
//!
//! One control session hosts any number of subordinate sessions sharing its
//! destination. Subsessions are registered router-side with `SESSION ADD`
//! and handed to the per-style `from_subsession` constructors, which skip
//! their own `SESSION CREATE`.

use std::net::UdpSocket;

use dashmap::DashMap;
use log::debug;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use crate::datagram::DatagramSession;
use crate::datagram2::Datagram2Session;
use crate::datagram3::Datagram3Session;
use crate::error::{Result, SamError};
use crate::net::I2pAddr;
use crate::options::{inject_option, SamOptions};
use crate::parsers::sam_session_status;
use crate::raw::RawSession;
use crate::sam::{SamConnection, SessionStyle};
use crate::session::{BaseSession, SessionKeys};
use crate::stream::StreamSession;

/// Registry entry for one subsession.
#[derive(Clone, Debug)]
pub struct SubSession {
	pub id: String,
	pub style: SessionStyle,
}

/// A primary session and its subsession registry.
///
/// # Examples
///
/// ```no_run
/// use sam3::{PrimarySession, SamOptions};
///
/// let primary = PrimarySession::new(
///     "127.0.0.1:7656",
///     "multiplex",
///     "TRANSIENT",
///     &SamOptions::default(),
/// ).unwrap();
/// let streams = primary.add_stream_subsession("web", &SamOptions::default()).unwrap();
/// let datagrams = primary.add_datagram2_subsession("ping", &SamOptions::default()).unwrap();
/// # let _ = (streams, datagrams);
/// ```
pub struct PrimarySession {
	base: Arc<BaseSession>,
	subsessions: DashMap<String, SubSession>,
}

impl PrimarySession {
	pub fn new<A: ToSocketAddrs>(
		sam_addr: A,
		id: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<PrimarySession> {
		Ok(PrimarySession {
			base: BaseSession::open(sam_addr, SessionStyle::Primary, id, destination, options, None)?,
			subsessions: DashMap::new(),
		})
	}

	pub fn id(&self) -> &str {
		self.base.id()
	}

	pub fn addr(&self) -> I2pAddr {
		self.base.addr()
	}

	pub fn keys(&self) -> &SessionKeys {
		self.base.keys()
	}

	pub fn is_closed(&self) -> bool {
		self.base.is_closed()
	}

	pub fn subsession_count(&self) -> usize {
		self.subsessions.len()
	}

	/// Registers a subsession router-side. For UDP-forwarded styles a
	/// forwarding socket is allocated and announced, then returned for the
	/// style constructor to own.
	fn add_subsession(
		&self,
		style: SessionStyle,
		id: &str,
		options: &SamOptions,
	) -> Result<Option<UdpSocket>> {
		self.base.ensure_open()?;
		if self.subsessions.contains_key(id) {
			return Err(SamError::DuplicatedId(id.to_string()));
		}

		let udp = if style.forwards_udp() {
			Some(UdpSocket::bind(("127.0.0.1", 0)).map_err(SamError::from)?)
		} else {
			None
		};
		let mut opts = options.to_vec();
		if let Some(socket) = &udp {
			let port = socket.local_addr().map_err(SamError::from)?.port();
			inject_option(&mut opts, "HOST", "127.0.0.1");
			inject_option(&mut opts, "PORT", &port.to_string());
		}

		let add_session_msg = format!(
			"SESSION ADD STYLE={style} ID={id} {options}\n",
			style = style.string(),
			options = opts.join(" "),
		);
		self.base
			.with_sam(|sam| sam.send(add_session_msg, sam_session_status))?;

		self.subsessions.insert(
			id.to_string(),
			SubSession {
				id: id.to_string(),
				style,
			},
		);
		debug!("primary {} added {} subsession {}", self.id(), style.string(), id);
		Ok(udp)
	}

	/// A fresh control connection for a subsession's own duplex.
	fn subsession_conn(&self) -> Result<SamConnection> {
		SamConnection::connect(self.base.sam_api())
	}

	pub fn add_stream_subsession(&self, id: &str, options: &SamOptions) -> Result<StreamSession> {
		self.add_subsession(SessionStyle::Stream, id, options)?;
		StreamSession::from_subsession(self.subsession_conn()?, id, self.keys().clone())
	}

	pub fn add_datagram_subsession(
		&self,
		id: &str,
		options: &SamOptions,
	) -> Result<DatagramSession> {
		let udp = self.require_socket(self.add_subsession(SessionStyle::Datagram, id, options)?)?;
		DatagramSession::from_subsession(self.subsession_conn()?, id, self.keys().clone(), udp)
	}

	pub fn add_datagram2_subsession(
		&self,
		id: &str,
		options: &SamOptions,
	) -> Result<Datagram2Session> {
		let udp = self.require_socket(self.add_subsession(SessionStyle::Datagram2, id, options)?)?;
		Datagram2Session::from_subsession(self.subsession_conn()?, id, self.keys().clone(), udp)
	}

	pub fn add_datagram3_subsession(
		&self,
		id: &str,
		options: &SamOptions,
	) -> Result<Datagram3Session> {
		let udp = self.require_socket(self.add_subsession(SessionStyle::Datagram3, id, options)?)?;
		Datagram3Session::from_subsession(self.subsession_conn()?, id, self.keys().clone(), udp)
	}

	pub fn add_raw_subsession(&self, id: &str, options: &SamOptions) -> Result<RawSession> {
		let udp = self.require_socket(self.add_subsession(SessionStyle::Raw, id, options)?)?;
		RawSession::from_subsession(self.subsession_conn()?, id, self.keys().clone(), udp)
	}

	fn require_socket(&self, udp: Option<UdpSocket>) -> Result<UdpSocket> {
		udp.ok_or_else(|| {
			SamError::InvalidArgument("forwarding style registered without a socket".to_string())
		})
	}

	/// Unregisters a subsession router-side and drops it from the registry.
	pub fn remove_subsession(&self, id: &str) -> Result<()> {
		let remove_session_msg = format!("SESSION REMOVE ID={id}\n");
		self.base
			.with_sam(|sam| sam.send(remove_session_msg, sam_session_status))?;
		self.subsessions.remove(id);
		Ok(())
	}

	/// Closes the primary session. Subsession handles reject further use
	/// once the router drops their registrations.
	pub fn close(&self) -> Result<()> {
		self.subsessions.clear();
		self.base.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil;

	fn primary() -> (testutil::FakeBridge, PrimarySession) {
		let bridge = testutil::spawn_bridge();
		let primary = PrimarySession::new(
			bridge.addr,
			"primary-test",
			"TRANSIENT",
			&SamOptions::default(),
		)
		.unwrap();
		(bridge, primary)
	}

	#[test]
	fn subsessions_share_the_primary_destination() {
		let (_bridge, primary) = primary();
		let stream = primary
			.add_stream_subsession("sub-stream", &SamOptions::default())
			.unwrap();
		assert_eq!(stream.addr(), primary.addr());
		assert_eq!(primary.subsession_count(), 1);

		let datagram = primary
			.add_datagram2_subsession("sub-dg2", &SamOptions::default())
			.unwrap();
		assert_eq!(datagram.addr(), primary.addr());
		assert_eq!(primary.subsession_count(), 2);
		primary.close().unwrap();
	}

	#[test]
	fn duplicate_subsession_ids_rejected() {
		let (_bridge, primary) = primary();
		primary
			.add_raw_subsession("dup", &SamOptions::default())
			.unwrap();
		assert!(matches!(
			primary.add_raw_subsession("dup", &SamOptions::default()),
			Err(SamError::DuplicatedId(_))
		));
		primary.close().unwrap();
	}

	#[test]
	fn remove_subsession_unregisters() {
		let (_bridge, primary) = primary();
		primary
			.add_datagram3_subsession("gone", &SamOptions::default())
			.unwrap();
		assert_eq!(primary.subsession_count(), 1);
		primary.remove_subsession("gone").unwrap();
		assert_eq!(primary.subsession_count(), 0);
		primary.close().unwrap();
	}

	#[test]
	fn closed_primary_rejects_additions() {
		let (_bridge, primary) = primary();
		primary.close().unwrap();
		primary.close().unwrap();
		assert!(matches!(
			primary.add_stream_subsession("late", &SamOptions::default()),
			Err(SamError::Closed)
		));
	}

	#[test]
	fn datagram_subsession_requires_socket() {
		// from_subsession itself must reject a missing socket; exercised
		// through the BaseSession constructor used by the style wrappers
		let (_bridge, primary) = primary();
		let sam = primary.subsession_conn().unwrap();
		let result = crate::session::BaseSession::from_subsession(
			sam,
			SessionStyle::Datagram,
			"no-socket",
			primary.keys().clone(),
			None,
		);
		assert!(matches!(result, Err(SamError::InvalidArgument(_))));
		primary.close().unwrap();
	}
}
