//! Per-device poll loop.
//!
//! A two-state machine (no session / session held) driven by a timed loop.
//! The wait between cycles listens on a shutdown channel, so a drain request
//! interrupts the sleep instead of waiting out the remaining interval. Every
//! failure drops the device back to the disconnected state and retracts its
//! room series; nothing here is fatal to the process.

use crate::client::{ClientError, DeviceClient};
use crate::models::device::DataPollResponse;
use crate::services::session::DeviceSession;
use log::{info, warn};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// The subset of the client the loop drives; lets tests script failures.
pub trait DeviceTransport {
    fn login(&mut self) -> Result<(), ClientError>;
    fn read_values(&mut self) -> Result<DataPollResponse, ClientError>;
    fn close(&mut self) -> Result<(), ClientError>;
    fn is_authenticated(&self) -> bool;
}

impl DeviceTransport for DeviceClient {
    fn login(&mut self) -> Result<(), ClientError> {
        DeviceClient::login(self)
    }

    fn read_values(&mut self) -> Result<DataPollResponse, ClientError> {
        DeviceClient::read_values(self)
    }

    fn close(&mut self) -> Result<(), ClientError> {
        DeviceClient::close(self)
    }

    fn is_authenticated(&self) -> bool {
        DeviceClient::is_authenticated(self)
    }
}

/// Runs the poll loop until the shutdown channel fires, then logs out and
/// retracts every series the device owns.
pub fn run(
    client: &mut impl DeviceTransport,
    session: &mut DeviceSession,
    interval: Duration,
    shutdown: &Receiver<()>,
) {
    session.connected(false);
    loop {
        if !client.is_authenticated() {
            info!("Connecting to {}", session.sys_id());
            match client.login() {
                Ok(()) => {
                    info!("Connected to {}", session.sys_id());
                    session.connected(true);
                }
                Err(err) => {
                    warn!("Failed to connect to {} caused by {}", session.sys_id(), err);
                    session.disconnected();
                    if !wait(shutdown, interval) {
                        break;
                    }
                    continue;
                }
            }
        }
        match client.read_values() {
            Ok(values) => session.report(&values),
            Err(err) => {
                warn!("Failed to read values from {} caused by {}", session.sys_id(), err);
                session.disconnected();
                if !wait(shutdown, interval) {
                    break;
                }
                continue;
            }
        }
        if !wait(shutdown, interval) {
            break;
        }
    }

    info!("Disconnecting from {}", session.sys_id());
    if let Err(err) = client.close() {
        warn!("Failed to log out from {} caused by {}", session.sys_id(), err);
    }
    session.teardown();
    info!("Disconnected from {}", session.sys_id());
}

/// Waits out the poll interval; returns false when shutdown was requested.
/// A dropped sender counts as a shutdown request as well.
fn wait(shutdown: &Receiver<()>, interval: Duration) -> bool {
    match shutdown.recv_timeout(interval) {
        Err(RecvTimeoutError::Timeout) => true,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
    }
}
