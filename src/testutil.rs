//! In-process SAM bridge stand-in for hermetic tests: answers the control
//! dialog with canned success replies, counts naming lookups, and can push
//! unsolicited status lines onto session connections.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::net::BASE64_I2P;

pub struct FakeBridge {
	pub addr: SocketAddr,
	lookups: Arc<AtomicUsize>,
	sessions: Arc<Mutex<Vec<TcpStream>>>,
}

impl FakeBridge {
	pub fn lookup_count(&self) -> usize {
		self.lookups.load(Ordering::SeqCst)
	}

	/// Writes a raw protocol line onto every connection that created a
	/// session, emulating bridge-initiated traffic such as inbound
	/// `STREAM STATUS` notifications.
	pub fn push_to_sessions(&self, line: &str) {
		let mut streams = self.sessions.lock().unwrap();
		for stream in streams.iter_mut() {
			let _ = stream.write_all(line.as_bytes());
		}
	}
}

/// A syntactically valid destination in the I2P base64 alphabet.
pub fn destination_b64(seed: u8) -> String {
	BASE64_I2P.encode(&[seed; 64])
}

/// The destination every `NAMING LOOKUP` (other than `ME`) resolves to.
pub fn lookup_value() -> String {
	destination_b64(7)
}

/// The public destination `ME` resolves to, i.e. every test session's
/// identity.
pub fn session_destination() -> String {
	destination_b64(1)
}

/// A destination the fake bridge refuses `STREAM CONNECT`s to with
/// `CANT_REACH_PEER`.
pub fn unreachable_destination() -> String {
	destination_b64(66)
}

pub fn spawn_bridge() -> FakeBridge {
	let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake bridge");
	let addr = listener.local_addr().expect("fake bridge addr");
	let lookups = Arc::new(AtomicUsize::new(0));
	let sessions = Arc::new(Mutex::new(Vec::new()));
	let counter = Arc::clone(&lookups);
	let session_streams = Arc::clone(&sessions);
	thread::spawn(move || {
		for stream in listener.incoming() {
			let Ok(stream) = stream else { break };
			let counter = Arc::clone(&counter);
			let session_streams = Arc::clone(&session_streams);
			thread::spawn(move || serve(stream, counter, session_streams));
		}
	});
	FakeBridge {
		addr,
		lookups,
		sessions,
	}
}

fn serve(stream: TcpStream, lookups: Arc<AtomicUsize>, sessions: Arc<Mutex<Vec<TcpStream>>>) {
	let Ok(clone) = stream.try_clone() else { return };
	let mut reader = BufReader::new(clone);
	let mut writer = stream;
	let mut line = String::new();
	loop {
		line.clear();
		match reader.read_line(&mut line) {
			Ok(0) | Err(_) => return,
			Ok(_) => {}
		}
		let reply = if line.starts_with("HELLO VERSION") {
			"HELLO REPLY RESULT=OK VERSION=3.3\n".to_string()
		} else if line.starts_with("SESSION CREATE") || line.starts_with("SESSION ADD") {
			if let Ok(clone) = writer.try_clone() {
				sessions.lock().unwrap().push(clone);
			}
			format!(
				"SESSION STATUS RESULT=OK DESTINATION={}\n",
				destination_b64(9)
			)
		} else if line.starts_with("SESSION REMOVE") {
			"SESSION STATUS RESULT=OK\n".to_string()
		} else if line.starts_with("NAMING LOOKUP") {
			let name = line
				.split("NAME=")
				.nth(1)
				.map(|s| s.split_whitespace().next().unwrap_or(""))
				.unwrap_or("")
				.to_string();
			let value = if name == "ME" {
				session_destination()
			} else {
				lookups.fetch_add(1, Ordering::SeqCst);
				lookup_value()
			};
			format!("NAMING REPLY RESULT=OK NAME={name} VALUE={value}\n")
		} else if line.starts_with("STREAM CONNECT") {
			if line.contains(&unreachable_destination()) {
				"STREAM STATUS RESULT=CANT_REACH_PEER MESSAGE=\"no route\"\n".to_string()
			} else {
				"STREAM STATUS RESULT=OK\n".to_string()
			}
		} else if line.starts_with("RAW SEND") {
			// the base64 payload line follows the command line
			let mut payload = String::new();
			let _ = reader.read_line(&mut payload);
			"RAW STATUS RESULT=OK\n".to_string()
		} else if line.starts_with("DEST GENERATE") {
			format!(
				"DEST REPLY PUB={} PRIV={}\n",
				destination_b64(5),
				destination_b64(6)
			)
		} else {
			"SESSION STATUS RESULT=I2P_ERROR MESSAGE=\"unsupported\"\n".to_string()
		};
		if writer.write_all(reply.as_bytes()).is_err() {
			return;
		}
	}
}
