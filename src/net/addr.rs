use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SamError};
use crate::net::i2p::{Destination, I2pAddr};

/// Where a dial should go: a name that still needs a `NAMING LOOKUP`, or a
/// full destination usable as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum I2pEndpoint {
	/// Hostname or b32 address
	Name(I2pAddr),
	/// Full base64 destination
	Dest(Destination),
}

impl I2pEndpoint {
	/// Whether reaching this endpoint requires a naming lookup first.
	pub fn needs_lookup(&self) -> bool {
		matches!(self, I2pEndpoint::Name(_))
	}
}

impl fmt::Display for I2pEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			I2pEndpoint::Name(addr) => write!(f, "{addr}"),
			I2pEndpoint::Dest(dest) => write!(f, "{dest}"),
		}
	}
}

/// An I2P endpoint paired with an I2CP port.
///
/// Port 0 means "unspecified"; dials omit `TO_PORT` for it.
///
/// # Examples
///
/// ```
/// use sam3::net::{I2pAddr, I2pEndpoint, I2pSocketAddr};
///
/// let socket = I2pSocketAddr::new(I2pEndpoint::Name(I2pAddr::new("example.i2p")), 8080);
/// assert_eq!(socket.port(), 8080);
/// assert!(socket.endpoint().needs_lookup());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct I2pSocketAddr {
	endpoint: I2pEndpoint,
	port: u16,
}

impl I2pSocketAddr {
	pub fn new(endpoint: I2pEndpoint, port: u16) -> I2pSocketAddr {
		I2pSocketAddr { endpoint, port }
	}

	pub fn endpoint(&self) -> &I2pEndpoint {
		&self.endpoint
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn set_port(&mut self, new_port: u16) {
		self.port = new_port;
	}
}

impl fmt::Display for I2pSocketAddr {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.endpoint, self.port)
	}
}

/// Conversion into a dialable [`I2pSocketAddr`].
///
/// I2P has no equivalent of DNS multi-homing, so unlike
/// `std::net::ToSocketAddrs` this resolves to exactly one address.
/// Implemented for socket addresses themselves, `(I2pAddr, u16)`,
/// `(Destination, u16)`, `(&str, u16)` and `"host[:port]"` strings, so
/// connection-shaped APIs take addresses in whichever form is at hand.
pub trait ToI2pSocketAddr {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr>;
}

impl ToI2pSocketAddr for I2pSocketAddr {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		Ok(self.clone())
	}
}

impl ToI2pSocketAddr for (I2pAddr, u16) {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		let (addr, port) = self.clone();
		Ok(I2pSocketAddr::new(I2pEndpoint::Name(addr), port))
	}
}

// a known destination dials without any lookup
impl ToI2pSocketAddr for (Destination, u16) {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		let (dest, port) = self.clone();
		Ok(I2pSocketAddr::new(I2pEndpoint::Dest(dest), port))
	}
}

impl<'a> ToI2pSocketAddr for (&'a str, u16) {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		let (host, port) = *self;
		if host.is_empty() {
			return Err(SamError::UnresolvableAddress);
		}
		Ok(I2pSocketAddr::new(
			I2pEndpoint::Name(I2pAddr::new(host)),
			port,
		))
	}
}

// accepts 'example.i2p:12345' as well as a bare 'example.i2p' (port 0);
// names and destinations never contain ':'
impl ToI2pSocketAddr for str {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		if self.is_empty() {
			return Err(SamError::UnresolvableAddress);
		}
		match self.rsplit_once(':') {
			Some((host, port)) => {
				let port: u16 = port.parse().map_err(|_| SamError::UnresolvableAddress)?;
				(host, port).to_i2p_socket_addr()
			}
			None => (self, 0u16).to_i2p_socket_addr(),
		}
	}
}

impl<'a, T: ToI2pSocketAddr + ?Sized> ToI2pSocketAddr for &'a T {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		(**self).to_i2p_socket_addr()
	}
}

impl ToI2pSocketAddr for String {
	fn to_i2p_socket_addr(&self) -> Result<I2pSocketAddr> {
		(&**self).to_i2p_socket_addr()
	}
}

#[cfg(test)]
mod tests {
	use crate::net::test::sa;
	use crate::net::*;

	#[test]
	fn name_and_port_forms_agree() {
		let expected = I2pSocketAddr::new(I2pEndpoint::Name(I2pAddr::new("example.i2p")), 12345);
		assert_eq!(sa((I2pAddr::new("example.i2p"), 12345)), Ok(expected.clone()));
		assert_eq!(sa(("example.i2p", 12345)), Ok(expected.clone()));
		assert_eq!(sa("example.i2p:12345"), Ok(expected.clone()));
		assert_eq!(sa(String::from("example.i2p:12345")), Ok(expected));
	}

	#[test]
	fn bare_name_gets_port_zero() {
		let addr = sa("example.i2p").unwrap();
		assert_eq!(addr.port(), 0);
		assert!(addr.endpoint().needs_lookup());
	}

	#[test]
	fn destination_endpoint_skips_lookup() {
		let dest = Destination::from_b64(&BASE64_I2P.encode(&[2u8; 64])).unwrap();
		let addr = sa((dest.clone(), 80)).unwrap();
		assert!(!addr.endpoint().needs_lookup());
		assert_eq!(addr.endpoint(), &I2pEndpoint::Dest(dest));
		assert_eq!(addr.port(), 80);
	}

	#[test]
	fn malformed_strings_rejected() {
		assert!(sa("").is_err());
		assert!(sa(":8080").is_err());
		assert!(sa("example.i2p:notaport").is_err());
		assert!(sa("example.i2p:99999").is_err());
	}

	#[test]
	fn set_port() {
		let mut addr = sa("example.i2p:80").unwrap();
		addr.set_port(8080);
		assert_eq!(addr.port(), 8080);
	}

	#[test]
	fn display_is_endpoint_colon_port() {
		let addr = sa("example.i2p:80").unwrap();
		assert_eq!(addr.to_string(), "example.i2p:80");
	}
}
