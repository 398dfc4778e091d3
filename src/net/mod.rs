pub use self::addr::{I2pEndpoint, I2pSocketAddr, ToI2pSocketAddr};
pub use self::i2p::{dest_hash, Destination, I2pAddr};

pub use self::i2p::B32_EXT;
pub use self::i2p::BASE32_I2P;
pub use self::i2p::BASE64_I2P;
pub use self::i2p::DEST_HASH_LEN;

mod addr;
mod i2p;
#[cfg(test)]
mod test;
