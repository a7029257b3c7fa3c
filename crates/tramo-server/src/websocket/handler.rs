//! First-message dispatch: commands and route registration.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};
use tramo_core::{BrokerError, parse_route, validate};

use crate::broker::{Broker, ClientKey};
use crate::metrics::{COMMANDS_TOTAL, ERRORS_TOTAL};
use crate::protocol::{Command, zone_closed_reply, zone_opened_reply};

use super::connection::ClientConnection;

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No command or route accepted yet.
    AwaitingFirstMessage,
    /// A route is registered; inbound frames only refresh `last_seen`.
    RouteMode,
}

/// What the session should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep waiting for a first message.
    Await,
    /// Enter route mode.
    Subscribe,
    /// Flush replies and close.
    Close,
}

/// Handle a text message received while awaiting the first message.
///
/// Command replies go straight to `connection`; route traffic goes through
/// the broker so it can be buffered across reconnects.
pub fn handle_first_message(
    text: &str,
    broker: &Broker,
    connection: &Arc<ClientConnection>,
    key: ClientKey,
) -> Step {
    let command = Command::parse(text);
    counter!(COMMANDS_TOTAL, "command" => command.name()).increment(1);

    match command {
        Command::AddOpen(raw) => match validate(raw) {
            Ok(zone) => {
                let _ = broker.open_zone(&zone);
                reply(connection, zone_opened_reply(&zone));
                Step::Close
            }
            Err(err) => {
                reject(connection, &err);
                Step::Await
            }
        },
        Command::AddClosed(raw) => {
            let closed = validate(raw).and_then(|zone| broker.close_zone(&zone).map(|report| (zone, report)));
            match closed {
                Ok((zone, report)) => {
                    debug!(%zone, recipients = report.recipients(), "closure command applied");
                    reply(connection, zone_closed_reply(&zone));
                    Step::Close
                }
                Err(err) => {
                    reject(connection, &err);
                    Step::Await
                }
            }
        }
        Command::Route(raw) => match parse_route(raw) {
            Ok(route) => {
                let zones = route.len();
                let registration = broker.register_route(key, Arc::clone(connection), route);
                info!(
                    client = %key,
                    zones,
                    created = registration.created,
                    closed = registration.closed.len(),
                    replayed = registration.replayed,
                    "route registered"
                );
                Step::Subscribe
            }
            Err(err) => {
                reject(connection, &err);
                Step::Close
            }
        },
    }
}

/// Reply to an undecodable frame while awaiting the first message.
pub fn reject_malformed(connection: &ClientConnection) {
    reject(connection, &BrokerError::MalformedFrame);
}

fn reject(connection: &ClientConnection, err: &BrokerError) {
    warn!(conn_id = %connection.id, code = err.code(), "rejected client message");
    counter!(ERRORS_TOTAL, "code" => err.code()).increment(1);
    reply(connection, err.reply());
}

fn reply(connection: &ClientConnection, text: String) {
    if connection.send(text).is_err() {
        debug!(conn_id = %connection.id, "reply dropped, connection closed");
    }
}
