//! Session-scoped configuration rendered into `SESSION CREATE` / `SESSION ADD`
//! option lists.
//!
//! Only the options this layer itself interprets get typed fields; everything
//! else (tunnel sizing, i2cp tuning, ...) travels to the bridge unchanged
//! through [`SamOptions::extra`]. SAMv3 option names taken from
//! https://geti2p.net/en/docs/api/samv3#options

use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination signature types accepted by `SESSION CREATE` and
/// `DEST GENERATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureType {
	DsaSha1,
	EcdsaSha256P256,
	EcdsaSha384P384,
	EcdsaSha512P521,
	EdDsaSha512Ed25519,
	RedDsaSha512Ed25519,
}

impl Default for SignatureType {
	fn default() -> Self {
		SignatureType::EdDsaSha512Ed25519
	}
}

impl fmt::Display for SignatureType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let token = match self {
			SignatureType::DsaSha1 => "DSA_SHA1",
			SignatureType::EcdsaSha256P256 => "ECDSA_SHA256_P256",
			SignatureType::EcdsaSha384P384 => "ECDSA_SHA384_P384",
			SignatureType::EcdsaSha512P521 => "ECDSA_SHA512_P521",
			SignatureType::EdDsaSha512Ed25519 => "EDDSA_SHA512_ED25519",
			SignatureType::RedDsaSha512Ed25519 => "REDDSA_SHA512_ED25519",
		};
		write!(f, "{token}")
	}
}

/// Guaranteed delivery was retired router-side; `None` is the streaming-lib
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageReliability {
	BestEffort,
	None,
}

impl fmt::Display for MessageReliability {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			MessageReliability::BestEffort => write!(f, "BestEffort"),
			MessageReliability::None => write!(f, "None"),
		}
	}
}

/// I2CP client options (`i2cp.*` keys), the subset commonly tuned for SAM
/// sessions. Anything else goes through [`SamOptions::extra`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cpOptions {
	/// Close the I2P session when idle
	pub close_on_idle: Option<bool>,
	/// Idle time (ms) required before closing
	pub close_idle_time: Option<u64>,
	/// Reduce tunnel quantity when idle
	pub reduce_on_idle: Option<bool>,
	/// Idle time (ms) required before reducing
	pub reduce_idle_time: Option<u64>,
	/// Tunnel quantity when reduced
	pub reduce_quantity: Option<u8>,
	/// Gzip outbound data
	pub gzip: Option<bool>,
	/// Router sends MessagePayload without awaiting ReceiveMessageBegin
	pub fast_receive: Option<bool>,
	pub encrypt_lease_set: Option<bool>,
	/// Set for clients that never need to be reachable
	pub dont_publish_lease_set: Option<bool>,
	/// Comma-separated lease set encryption types
	pub lease_set_enc_type: Option<String>,
	pub message_reliability: Option<MessageReliability>,
}

impl I2cpOptions {
	fn render(&self, out: &mut Vec<String>) {
		if let Some(close_on_idle) = self.close_on_idle {
			out.push(format!("i2cp.closeOnIdle={close_on_idle}"));
		}
		if let Some(close_idle_time) = self.close_idle_time {
			out.push(format!("i2cp.closeIdleTime={close_idle_time}"));
		}
		if let Some(reduce_on_idle) = self.reduce_on_idle {
			out.push(format!("i2cp.reduceOnIdle={reduce_on_idle}"));
		}
		if let Some(reduce_idle_time) = self.reduce_idle_time {
			out.push(format!("i2cp.reduceIdleTime={reduce_idle_time}"));
		}
		if let Some(reduce_quantity) = self.reduce_quantity {
			out.push(format!("i2cp.reduceQuantity={reduce_quantity}"));
		}
		if let Some(gzip) = self.gzip {
			out.push(format!("i2cp.gzip={gzip}"));
		}
		if let Some(fast_receive) = self.fast_receive {
			out.push(format!("i2cp.fastReceive={fast_receive}"));
		}
		if let Some(encrypt_lease_set) = self.encrypt_lease_set {
			out.push(format!("i2cp.encryptLeaseSet={encrypt_lease_set}"));
		}
		if let Some(dont_publish) = self.dont_publish_lease_set {
			out.push(format!("i2cp.dontPublishLeaseSet={dont_publish}"));
		}
		if let Some(lease_set_enc_type) = &self.lease_set_enc_type {
			out.push(format!("i2cp.leaseSetEncType={lease_set_enc_type}"));
		}
		if let Some(reliability) = self.message_reliability {
			out.push(format!("i2cp.messageReliability={reliability}"));
		}
	}
}

/// Tunnel sizing for one direction (`inbound.*` or `outbound.*`).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelOptions {
	/// Tunnel length in hops
	pub length: Option<u8>,
	/// Random variance added to the length
	pub length_variance: Option<i8>,
	/// Number of parallel tunnels
	pub quantity: Option<u8>,
	/// Number of redundant fail-over tunnels
	pub backup_quantity: Option<u8>,
}

impl TunnelOptions {
	fn render(&self, prefix: &str, out: &mut Vec<String>) {
		if let Some(length) = self.length {
			out.push(format!("{prefix}.length={length}"));
		}
		if let Some(variance) = self.length_variance {
			out.push(format!("{prefix}.lengthVariance={variance}"));
		}
		if let Some(quantity) = self.quantity {
			out.push(format!("{prefix}.quantity={quantity}"));
		}
		if let Some(backup) = self.backup_quantity {
			out.push(format!("{prefix}.backupQuantity={backup}"));
		}
	}
}

/// Options applied when a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamOptions {
	/// Signature type for transient destinations
	pub signature_type: SignatureType,
	/// I2CP-level source port, passed through as `FROM_PORT`
	pub from_port: Option<u16>,
	/// I2CP-level target port, passed through as `TO_PORT`
	pub to_port: Option<u16>,
	pub inbound: TunnelOptions,
	pub outbound: TunnelOptions,
	pub i2cp: I2cpOptions,
	/// Free-form `KEY=VALUE` pairs forwarded to the bridge unchanged
	pub extra: Vec<String>,
}

impl Default for SamOptions {
	fn default() -> Self {
		SamOptions {
			signature_type: SignatureType::default(),
			from_port: None,
			to_port: None,
			inbound: TunnelOptions::default(),
			outbound: TunnelOptions::default(),
			i2cp: I2cpOptions::default(),
			extra: Vec::new(),
		}
	}
}

impl SamOptions {
	/// Renders the recognized options plus the extras into a `KEY=VALUE`
	/// vector, in a stable order with extras last.
	pub fn to_vec(&self) -> Vec<String> {
		let mut out = Vec::new();
		if let Some(from_port) = self.from_port {
			out.push(format!("FROM_PORT={from_port}"));
		}
		if let Some(to_port) = self.to_port {
			out.push(format!("TO_PORT={to_port}"));
		}
		self.inbound.render("inbound", &mut out);
		self.outbound.render("outbound", &mut out);
		self.i2cp.render(&mut out);
		out.extend(self.extra.iter().cloned());
		out
	}

	/// The space-joined form used on `SESSION CREATE` lines.
	pub fn options(&self) -> String {
		self.to_vec().join(" ")
	}
}

/// Appends `key=value` unless some `key=` pair is already present.
///
/// Used to point the bridge's datagram forwarding at the session's UDP
/// socket without overriding a caller-supplied target.
pub(crate) fn inject_option(pairs: &mut Vec<String>, key: &str, value: &str) {
	let taken = pairs
		.iter()
		.any(|pair| pair.split('=').next() == Some(key));
	if !taken {
		pairs.push(format!("{key}={value}"));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn render_order_and_extras() {
		let options = SamOptions {
			from_port: Some(77),
			to_port: Some(88),
			inbound: TunnelOptions {
				length: Some(2),
				quantity: Some(4),
				..Default::default()
			},
			extra: vec!["i2cp.gzip=false".to_string()],
			..Default::default()
		};
		assert_eq!(
			options.options(),
			"FROM_PORT=77 TO_PORT=88 inbound.length=2 inbound.quantity=4 i2cp.gzip=false"
		);
	}

	#[test]
	fn inject_respects_existing_host() {
		let mut pairs = vec!["HOST=10.0.0.5".to_string(), "inbound.length=2".to_string()];
		inject_option(&mut pairs, "HOST", "127.0.0.1");
		inject_option(&mut pairs, "PORT", "54321");
		assert_eq!(
			pairs,
			vec![
				"HOST=10.0.0.5".to_string(),
				"inbound.length=2".to_string(),
				"PORT=54321".to_string(),
			]
		);
	}

	#[test]
	fn inject_skips_existing_port() {
		let mut pairs = vec!["PORT=9999".to_string()];
		inject_option(&mut pairs, "PORT", "1");
		assert_eq!(pairs, vec!["PORT=9999".to_string()]);
	}

	#[test]
	fn render_i2cp_keys() {
		let options = SamOptions {
			i2cp: I2cpOptions {
				close_on_idle: Some(true),
				reduce_idle_time: Some(300_000),
				gzip: Some(false),
				message_reliability: Some(MessageReliability::None),
				..Default::default()
			},
			..Default::default()
		};
		assert_eq!(
			options.options(),
			"i2cp.closeOnIdle=true i2cp.reduceIdleTime=300000 i2cp.gzip=false \
			 i2cp.messageReliability=None"
		);
	}

	#[test]
	fn signature_tokens() {
		assert_eq!(
			SignatureType::EdDsaSha512Ed25519.to_string(),
			"EDDSA_SHA512_ED25519"
		);
		assert_eq!(SignatureType::DsaSha1.to_string(), "DSA_SHA1");
	}
}
