//! Accept-loop supervision for stream sessions.
//!
//! Errors surfacing from `accept` usually mean the session itself died
//! (router restart, tunnel teardown, transport failure). The watcher tears
//! the session and listener down, rebuilds both, and reports
//! [`SamError::SessionRecreated`] so the caller retries on the fresh pair.

use log::error;

use crate::error::{Result, SamError};
use crate::options::SamOptions;
use crate::sam::nickname;
use crate::stream::{StreamConn, StreamListener, StreamSession};

/// Wraps a [`StreamListener`], recreating session and listener whenever
/// accept fails.
///
/// note: detection of which errors warrant a rebuild is coarse; every
/// accept error currently triggers one.
pub struct SessionWatcher {
	options: SamOptions,
	session: StreamSession,
	listener: StreamListener,
	destination: String,
	sam_endpoint: String,
}

impl SessionWatcher {
	pub fn new(
		sam_endpoint: &str,
		destination: &str,
		options: SamOptions,
	) -> Result<SessionWatcher> {
		let (session, listener) = SessionWatcher::bootstrap(sam_endpoint, destination, &options)?;
		Ok(SessionWatcher {
			options,
			session,
			listener,
			destination: destination.to_string(),
			sam_endpoint: sam_endpoint.to_string(),
		})
	}

	/// The currently live session; replaced after each recreation.
	pub fn session(&self) -> &StreamSession {
		&self.session
	}

	pub fn accept(&mut self) -> Result<StreamConn> {
		match self.listener.accept() {
			Ok(conn) => Ok(conn),
			Err(err) => {
				error!("accept failed, recreating session: {err}");
				self.listener.close();
				let _ = self.session.close();
				self.recreate()?;
				Err(SamError::SessionRecreated)
			}
		}
	}

	fn recreate(&mut self) -> Result<()> {
		let (session, listener) =
			SessionWatcher::bootstrap(&self.sam_endpoint, &self.destination, &self.options)?;
		self.session = session;
		self.listener = listener;
		Ok(())
	}

	fn bootstrap(
		sam_endpoint: &str,
		destination: &str,
		options: &SamOptions,
	) -> Result<(StreamSession, StreamListener)> {
		let session = StreamSession::new(sam_endpoint, &nickname(), destination, options)?;
		let listener = session.listen()?;
		Ok((session, listener))
	}
}
