use std::io;
use thiserror::Error as ThisError;

/// Kinds of SAM/I2P errors surfaced by this crate.
///
/// Errors are cheap to clone so the receive loops can publish them on their
/// error channels; underlying causes are carried as rendered text.
#[derive(Clone, Eq, PartialEq, Debug, ThisError)]
pub enum SamError {
	/// Wraps io errors
	#[error("IO error occurred (is the I2P router running?): {0}")]
	Io(String),
	/// Wraps nom parser errors
	#[error("Failed to parse a SAM bridge reply")]
	MessageParsing,
	#[error("Unrecognized SAM bridge reply: {0}")]
	Protocol(String),
	/// Operation attempted on a closed session, reader, listener or connection
	#[error("Use of a closed session or handle")]
	Closed,
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	/// A forwarded UDP packet did not match the expected layout
	#[error("Malformed forwarded datagram: {0}")]
	Framing(String),
	#[error("Forwarded datagram carried no payload")]
	EmptyPayload,
	#[error("I2P address isn't a valid b32 or b64 encoding: {0}")]
	BadAddressEncoding(String),
	#[error("Can't reach peer: {0}")]
	CantReachPeer(String),
	#[error("Destination key not found: {0}")]
	KeyNotFound(String),
	#[error("Peer not found: {0}")]
	PeerNotFound(String),
	#[error("Duplicate peer destination: {0}")]
	DuplicatedDest(String),
	#[error("Duplicate session id: {0}")]
	DuplicatedId(String),
	#[error("Invalid destination key: {0}")]
	InvalidKey(String),
	#[error("Invalid session id: {0}")]
	InvalidId(String),
	#[error("SAM bridge timeout: {0}")]
	Timeout(String),
	#[error("I2P router error: {0}")]
	I2pError(String),
	/// A naming lookup for a hash-derived address failed
	#[error("Naming lookup failed: {0}")]
	ResolverMiss(String),
	#[error("I2P socket address could not be resolved")]
	UnresolvableAddress,
	/// The session was torn down and rebuilt after an accept failure;
	/// the caller should retry the operation
	#[error("Accept encountered an error and the session was recreated, try again")]
	SessionRecreated,
}

impl From<io::Error> for SamError {
	fn from(err: io::Error) -> SamError {
		Self::Io(err.to_string())
	}
}

impl<E> From<nom::Err<E>> for SamError {
	fn from(_err: nom::Err<E>) -> SamError {
		Self::MessageParsing
	}
}

pub type Result<T> = std::result::Result<T, SamError>;
