use crate::net::{I2pSocketAddr, ToI2pSocketAddr};

/// Runs a conversion and flattens the error for terse assertions.
pub fn sa<A: ToI2pSocketAddr>(a: A) -> Result<I2pSocketAddr, String> {
	a.to_i2p_socket_addr().map_err(|e| e.to_string())
}
