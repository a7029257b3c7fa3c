//! Text protocol: first-message commands and fixed replies.

use tramo_core::ZoneName;

/// Prefix of the open-zone command.
pub const ADD_OPEN_PREFIX: &str = "ADD_OPEN:";

/// Prefix of the close-zone command.
pub const ADD_CLOSED_PREFIX: &str = "ADD_CLOSED:";

/// Acknowledgment sent when a route is registered.
pub const ROUTE_ACK: &str = "Conexión establecida. Monitoreando cortes en tu ruta.";

/// The first message on a connection, classified by prefix.
///
/// Prefixes are case-sensitive and must start the message. Anything else is
/// a route string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `ADD_OPEN:<zone>`
    AddOpen(&'a str),
    /// `ADD_CLOSED:<zone>`
    AddClosed(&'a str),
    /// A space-separated route.
    Route(&'a str),
}

impl<'a> Command<'a> {
    /// Classify `text`.
    pub fn parse(text: &'a str) -> Self {
        if let Some(zone) = text.strip_prefix(ADD_OPEN_PREFIX) {
            Self::AddOpen(zone)
        } else if let Some(zone) = text.strip_prefix(ADD_CLOSED_PREFIX) {
            Self::AddClosed(zone)
        } else {
            Self::Route(text)
        }
    }

    /// Label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddOpen(_) => "add_open",
            Self::AddClosed(_) => "add_closed",
            Self::Route(_) => "route",
        }
    }
}

/// Reply to a successful `ADD_OPEN`.
pub fn zone_opened_reply(zone: &ZoneName) -> String {
    format!("Zona '{zone}' añadida a rutas abiertas.")
}

/// Reply to a successful `ADD_CLOSED`.
pub fn zone_closed_reply(zone: &ZoneName) -> String {
    format!("Zona '{zone}' cerrada.")
}
