//! SAMv3 client library for I2P.
//!
//! Talks to a locally running I2P router through its SAM bridge and exposes
//! a session per transport style:
//!
//! - [`StreamSession`] — reliable TCP-like byte streams
//! - [`DatagramSession`] — authenticated repliable datagrams (legacy)
//! - [`Datagram2Session`] — authenticated repliable datagrams with replay
//!   protection (recommended)
//! - [`Datagram3Session`] — hash-sourced repliable datagrams with a cached
//!   [`HashResolver`]
//! - [`RawSession`] — unauthenticated, source-anonymous datagrams
//!
//! Datagram styles receive through bridge-driven UDP forwarding onto a
//! session-owned loopback socket, and send by injecting framed packets into
//! the bridge's datagram port. [`PrimarySession`] multiplexes several styles
//! over one destination.

pub use crate::datagram::{
	Datagram, DatagramConn, DatagramReader, DatagramSession, DatagramWriter, MAX_DATAGRAM_LEN,
	RECOMMENDED_DATAGRAM_LEN,
};
pub use crate::datagram2::Datagram2Session;
pub use crate::datagram3::{Datagram3, Datagram3Conn, Datagram3Reader, Datagram3Session, HashResolver};
pub use crate::error::{Result, SamError};
pub use crate::net::{Destination, I2pAddr, I2pEndpoint, I2pSocketAddr, ToI2pSocketAddr};
pub use crate::options::{I2cpOptions, MessageReliability, SamOptions, SignatureType, TunnelOptions};
pub use crate::primary::{PrimarySession, SubSession};
pub use crate::raw::{RawConn, RawDatagram, RawListener, RawReader, RawSession};
pub use crate::sam::{nickname, SamConnection, SessionStyle, DEFAULT_API, SAM_UDP_PORT};
pub use crate::session::{BaseSession, SessionAddr, SessionKeys, DEFAULT_SEND_TIMEOUT};
pub use crate::stream::{Incoming, StreamConn, StreamDialer, StreamListener, StreamSession};
pub use crate::watcher::SessionWatcher;

mod datagram;
mod datagram2;
mod datagram3;
mod error;
pub mod net;
mod options;
mod parsers;
mod primary;
mod raw;
mod sam;
mod session;
mod stream;
#[cfg(test)]
pub(crate) mod testutil;
mod utils;
mod watcher;
