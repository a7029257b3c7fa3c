//! Broker error types.
//!
//! Every variant is recoverable: the connection handler turns it into a text
//! reply (see [`BrokerError::reply`]) and leaves shared state untouched.

use thiserror::Error;

/// Errors raised while validating or applying a client message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// A zone name or route string failed the route grammar.
    #[error("Ruta no válida: máximo 60 caracteres alfabéticos y espacios.")]
    InvalidRoute {
        /// The rejected input, kept for logging.
        input: String,
    },

    /// A zone was closed without being registered as open first.
    #[error("La zona '{zone}' no existe en rutas abiertas.")]
    ZoneNotOpen {
        /// The zone that was not open.
        zone: String,
    },

    /// A frame could not be decoded as UTF-8 text.
    #[error("Mensaje no válido: se esperaba texto UTF-8.")]
    MalformedFrame,
}

impl BrokerError {
    /// Machine-readable code for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRoute { .. } => "INVALID_ROUTE",
            Self::ZoneNotOpen { .. } => "ZONE_NOT_OPEN",
            Self::MalformedFrame => "MALFORMED_FRAME",
        }
    }

    /// Wire reply sent back on the offending connection.
    pub fn reply(&self) -> String {
        format!("Error: {self}")
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
