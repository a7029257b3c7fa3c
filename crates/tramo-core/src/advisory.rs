//! Traffic advisories pushed to route subscribers.

use serde::{Deserialize, Serialize};

use crate::zone::ZoneName;

/// The only road the broker reports on.
pub const ROAD: &str = "A-4";

/// Reason attached to closures made through `ADD_CLOSED`.
pub const REASON_ROAD_CLOSURE: &str = "Cierre de vía";

/// Reason attached to zones already closed when a route registers, and to
/// the scheduled advisory.
pub const REASON_ROADWORKS: &str = "Obras en la vía";

/// Status carried by every advisory the broker emits.
pub const STATUS_INTERRUPTED: &str = "Tránsito interrumpido";

/// Segment reported by the scheduled roadworks advisory.
pub const SCHEDULED_SEGMENT: &str = "Km 127 al 135";

/// An immutable traffic advisory.
///
/// Serializes as a flat JSON object with the Spanish field names clients
/// expect: `activo`, `carretera`, `tramo_afectado`, `motivo`, `estado`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficAdvisory {
    /// Whether the disruption is in effect.
    #[serde(rename = "activo")]
    pub active: bool,
    /// Road identifier.
    #[serde(rename = "carretera")]
    pub road: String,
    /// Zone name or descriptive span affected.
    #[serde(rename = "tramo_afectado")]
    pub affected_segment: String,
    /// Why the segment is affected.
    #[serde(rename = "motivo")]
    pub reason: String,
    /// Traffic status on the segment.
    #[serde(rename = "estado")]
    pub status: String,
}

impl TrafficAdvisory {
    /// Build an active advisory on [`ROAD`].
    pub fn new(
        affected_segment: impl Into<String>,
        reason: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            active: true,
            road: ROAD.to_owned(),
            affected_segment: affected_segment.into(),
            reason: reason.into(),
            status: status.into(),
        }
    }

    /// Advisory broadcast when a zone is closed by command.
    pub fn road_closure(zone: &ZoneName) -> Self {
        Self::new(zone.as_str(), REASON_ROAD_CLOSURE, STATUS_INTERRUPTED)
    }

    /// Advisory sent to a subscriber whose route crosses an already-closed zone.
    pub fn roadworks(zone: &ZoneName) -> Self {
        Self::new(zone.as_str(), REASON_ROADWORKS, STATUS_INTERRUPTED)
    }

    /// Advisory emitted by the periodic broadcaster.
    pub fn scheduled_roadworks() -> Self {
        Self::new(SCHEDULED_SEGMENT, REASON_ROADWORKS, STATUS_INTERRUPTED)
    }

    /// Serialize to the wire payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str) -> ZoneName {
        ZoneName::new(name).unwrap()
    }

    #[test]
    fn road_closure_wire_format() {
        let json = TrafficAdvisory::road_closure(&zone("Madrid"))
            .to_json()
            .unwrap();
        insta::assert_snapshot!(json, @r#"{"activo":true,"carretera":"A-4","tramo_afectado":"Madrid","motivo":"Cierre de vía","estado":"Tránsito interrumpido"}"#);
    }

    #[test]
    fn scheduled_wire_format() {
        let json = TrafficAdvisory::scheduled_roadworks().to_json().unwrap();
        insta::assert_snapshot!(json, @r#"{"activo":true,"carretera":"A-4","tramo_afectado":"Km 127 al 135","motivo":"Obras en la vía","estado":"Tránsito interrumpido"}"#);
    }

    #[test]
    fn roadworks_uses_zone_and_reason() {
        let advisory = TrafficAdvisory::roadworks(&zone("Sevilla"));
        assert!(advisory.active);
        assert_eq!(advisory.road, ROAD);
        assert_eq!(advisory.affected_segment, "Sevilla");
        assert_eq!(advisory.reason, REASON_ROADWORKS);
        assert_eq!(advisory.status, STATUS_INTERRUPTED);
    }

    #[test]
    fn parses_back_from_wire() {
        let wire = r#"{"activo":false,"carretera":"A-4","tramo_afectado":"Lyon","motivo":"x","estado":"y"}"#;
        let advisory: TrafficAdvisory = serde_json::from_str(wire).unwrap();
        assert!(!advisory.active);
        assert_eq!(advisory.affected_segment, "Lyon");
    }

    #[test]
    fn wire_keys_are_spanish() {
        let json = TrafficAdvisory::roadworks(&zone("Bilbao")).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        for key in ["activo", "carretera", "tramo_afectado", "motivo", "estado"] {
            assert!(keys.iter().any(|k| k == key), "missing {key}");
        }
        assert_eq!(keys.len(), 5);
    }
}
