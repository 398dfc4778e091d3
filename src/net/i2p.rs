use data_encoding::{Encoding, Specification};
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Result, SamError};

pub const B32_EXT: &str = ".b32.i2p";

/// Number of bytes in a destination hash.
pub const DEST_HASH_LEN: usize = 32;

lazy_static! {
	pub static ref BASE32_I2P: Encoding = {
		let mut spec = Specification::new();

		spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
		spec.padding = None;
		spec.encoding().unwrap()
	};
}

lazy_static! {
	pub static ref BASE64_I2P: Encoding = {
		let mut spec = Specification::new();
		spec.symbols
			.push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~");
		spec.padding = Some('=');
		spec.encoding().unwrap()
	};
}

/// An I2P address, as a B32 address or hostname.
///
/// # Examples
///
/// Constructing from a hostname:
///
/// ```
/// use sam3::net::I2pAddr;
///
/// I2pAddr::new("example.i2p");
/// ```
///
/// Deriving from a 32-byte destination hash:
///
/// ```
/// use sam3::net::I2pAddr;
///
/// let addr = I2pAddr::from_hash(&[0u8; 32]);
/// assert!(addr.string().ends_with(".b32.i2p"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct I2pAddr {
	inner: String,
}

impl I2pAddr {
	/// Creates a new I2p address from a given string.
	pub fn new(dest: &str) -> I2pAddr {
		I2pAddr {
			inner: dest.to_string(),
		}
	}

	/// Creates a new I2P address from a full base64 destination string,
	/// internally converting it to the common b32.i2p form.
	pub fn from_b64(dest: &str) -> Result<I2pAddr> {
		Ok(I2pAddr::from_hash(&dest_hash(dest)?))
	}

	/// Derives the b32.i2p address encoding the given destination hash.
	///
	/// The result is always a 60-character lowercase string: 52 unpadded
	/// base32 characters followed by `.b32.i2p`.
	pub fn from_hash(hash: &[u8; DEST_HASH_LEN]) -> I2pAddr {
		let mut b32 = BASE32_I2P.encode(hash);
		b32.push_str(B32_EXT);
		I2pAddr { inner: b32 }
	}

	/// Returns the String that makes up this address.
	pub fn string(&self) -> String {
		self.inner.clone()
	}

	/// Borrowed form of [`I2pAddr::string`].
	pub fn as_str(&self) -> &str {
		&self.inner
	}
}

impl fmt::Display for I2pAddr {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		write!(fmt, "{}", self.inner)
	}
}

/// SHA-256 hash of a base64-encoded destination.
pub fn dest_hash(dest: &str) -> Result<[u8; DEST_HASH_LEN]> {
	let bin_data = BASE64_I2P.decode(dest.as_bytes()).map_err(|e| {
		error!("base64 decoding error: {:?}", e);
		SamError::BadAddressEncoding(dest.to_string())
	})?;
	let mut hasher = Sha256::new();
	hasher.update(bin_data);
	Ok(hasher.finalize().into())
}

/// A full I2P destination, kept in its base64 wire form.
///
/// Unlike [`I2pAddr`], which is a display/naming form, a `Destination` can be
/// the target of a send operation. The b32 projection is derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Destination {
	b64: String,
}

impl Destination {
	/// Wraps a base64 destination string, validating the encoding.
	pub fn from_b64(dest: &str) -> Result<Destination> {
		BASE64_I2P
			.decode(dest.as_bytes())
			.map_err(|_| SamError::BadAddressEncoding(dest.to_string()))?;
		Ok(Destination {
			b64: dest.to_string(),
		})
	}

	/// The base64 wire form.
	pub fn base64(&self) -> &str {
		&self.b64
	}

	/// The 32-byte destination hash.
	pub fn hash(&self) -> Result<[u8; DEST_HASH_LEN]> {
		dest_hash(&self.b64)
	}

	/// The derived b32.i2p address.
	pub fn b32_addr(&self) -> Result<I2pAddr> {
		I2pAddr::from_b64(&self.b64)
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		write!(fmt, "{}", self.b64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_to_b32_shape() {
		let addr = I2pAddr::from_hash(&[0u8; 32]);
		let s = addr.string();
		assert_eq!(s.len(), 60);
		assert!(s.ends_with(B32_EXT));
		assert!(!s.contains('='));
		assert_eq!(s, s.to_lowercase());
	}

	#[test]
	fn distinct_hashes_distinct_addrs() {
		let mut h1 = [0u8; 32];
		let mut h2 = [0u8; 32];
		h1[0] = 1;
		h2[31] = 1;
		assert_ne!(I2pAddr::from_hash(&h1), I2pAddr::from_hash(&h2));
		assert_ne!(I2pAddr::from_hash(&h1), I2pAddr::from_hash(&[0u8; 32]));
	}

	#[test]
	fn b64_roundtrip_through_hash() {
		// any byte string is a valid "destination" for hashing purposes
		let dest = BASE64_I2P.encode(&[7u8; 387]);
		let hash = dest_hash(&dest).unwrap();
		assert_eq!(I2pAddr::from_b64(&dest).unwrap(), I2pAddr::from_hash(&hash));
	}

	#[test]
	fn bad_b64_rejected() {
		assert!(matches!(
			I2pAddr::from_b64("not/base64!"),
			Err(SamError::BadAddressEncoding(_))
		));
		assert!(Destination::from_b64("also not base64").is_err());
	}

	#[test]
	fn destination_projections() {
		let b64 = BASE64_I2P.encode(&[3u8; 64]);
		let dest = Destination::from_b64(&b64).unwrap();
		assert_eq!(dest.base64(), b64);
		assert_eq!(
			dest.b32_addr().unwrap(),
			I2pAddr::from_hash(&dest.hash().unwrap())
		);
	}
}
