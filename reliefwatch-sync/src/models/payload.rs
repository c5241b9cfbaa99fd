//! Typed mutation payloads, one per entity kind

use super::EntityKind;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

wire_enum! {
    pub enum Severity {
        Low => "LOW",
        Moderate => "MODERATE",
        Severe => "SEVERE",
        Catastrophic => "CATASTROPHIC",
    }
}

wire_enum! {
    pub enum AssessmentType {
        Health => "HEALTH",
        Wash => "WASH",
        Shelter => "SHELTER",
        Food => "FOOD",
        Security => "SECURITY",
        Population => "POPULATION",
        Preliminary => "PRELIMINARY",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn validate(&self) -> SyncResult<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(SyncError::Validation(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(SyncError::Validation(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentPayload {
    pub assessment_type: AssessmentType,
    pub affected_entity_id: String,
    pub assessor_name: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Type-specific answers (water points, shelter counts, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    pub item: String,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub response_type: String,
    pub affected_entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_id: Option<String>,
    pub planned_date: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<ResponseItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPayload {
    pub name: String,
    pub incident_type: String,
    pub severity: Severity,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPayload {
    pub name: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lga: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Data carried by a mutation, tagged by entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum MutationPayload {
    #[serde(rename = "ASSESSMENT")]
    Assessment(AssessmentPayload),
    #[serde(rename = "RESPONSE")]
    Response(ResponsePayload),
    #[serde(rename = "INCIDENT")]
    Incident(IncidentPayload),
    #[serde(rename = "MEDIA")]
    Media(MediaPayload),
    #[serde(rename = "ENTITY")]
    Entity(EntityPayload),
}

fn require(field: &str, value: &str) -> SyncResult<()> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_location(location: Option<&GeoPoint>) -> SyncResult<()> {
    location.map_or(Ok(()), GeoPoint::validate)
}

impl MutationPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Assessment(_) => EntityKind::Assessment,
            Self::Response(_) => EntityKind::Response,
            Self::Incident(_) => EntityKind::Incident,
            Self::Media(_) => EntityKind::Media,
            Self::Entity(_) => EntityKind::Entity,
        }
    }

    /// Check field-level constraints before anything is persisted or queued
    pub fn validate(&self) -> SyncResult<()> {
        match self {
            Self::Assessment(a) => {
                require("affectedEntityId", &a.affected_entity_id)?;
                require("assessorName", &a.assessor_name)?;
                validate_location(a.location.as_ref())
            }
            Self::Response(r) => {
                require("responseType", &r.response_type)?;
                require("affectedEntityId", &r.affected_entity_id)?;
                for item in &r.items {
                    require("items.item", &item.item)?;
                    require("items.unit", &item.unit)?;
                    if !item.quantity.is_finite() || item.quantity <= 0.0 {
                        return Err(SyncError::Validation(format!(
                            "quantity for '{}' must be a positive number",
                            item.item
                        )));
                    }
                }
                Ok(())
            }
            Self::Incident(i) => {
                require("name", &i.name)?;
                require("incidentType", &i.incident_type)?;
                require("status", &i.status)?;
                validate_location(i.location.as_ref())
            }
            Self::Media(m) => {
                require("fileName", &m.file_name)?;
                if !m.mime_type.contains('/') {
                    return Err(SyncError::Validation(format!(
                        "mimeType '{}' is not a media type",
                        m.mime_type
                    )));
                }
                Ok(())
            }
            Self::Entity(e) => {
                require("name", &e.name)?;
                require("entityType", &e.entity_type)?;
                validate_location(e.location.as_ref())
            }
        }
    }

    /// The untagged JSON object of the inner payload
    pub fn to_value(&self) -> SyncResult<Value> {
        let value = match self {
            Self::Assessment(a) => serde_json::to_value(a)?,
            Self::Response(r) => serde_json::to_value(r)?,
            Self::Incident(i) => serde_json::to_value(i)?,
            Self::Media(m) => serde_json::to_value(m)?,
            Self::Entity(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }

    /// Parse an untagged JSON object as the payload of `kind`
    pub fn from_value(kind: EntityKind, value: Value) -> SyncResult<Self> {
        let payload = match kind {
            EntityKind::Assessment => Self::Assessment(serde_json::from_value(value)?),
            EntityKind::Response => Self::Response(serde_json::from_value(value)?),
            EntityKind::Incident => Self::Incident(serde_json::from_value(value)?),
            EntityKind::Media => Self::Media(serde_json::from_value(value)?),
            EntityKind::Entity => Self::Entity(serde_json::from_value(value)?),
        };
        Ok(payload)
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::Assessment(a) => a.severity,
            Self::Incident(i) => Some(i.severity),
            _ => None,
        }
    }

    pub fn affected_population(&self) -> Option<u64> {
        match self {
            Self::Assessment(a) => a.affected_population,
            Self::Incident(i) => i.affected_population,
            Self::Entity(e) => e.population,
            _ => None,
        }
    }

    /// Total units committed by a response
    pub fn response_volume(&self) -> Option<f64> {
        match self {
            Self::Response(r) => Some(r.items.iter().map(|i| i.quantity).sum()),
            _ => None,
        }
    }

    /// The kind-specific sub-type used for filtering
    pub fn sub_type(&self) -> String {
        match self {
            Self::Assessment(a) => a.assessment_type.as_str().to_string(),
            Self::Response(r) => r.response_type.clone(),
            Self::Incident(i) => i.incident_type.clone(),
            Self::Media(m) => m.mime_type.clone(),
            Self::Entity(e) => e.entity_type.clone(),
        }
    }

    /// Free text fields searched for priority keywords
    pub fn text_fragments(&self) -> Vec<String> {
        let mut fragments = Vec::new();
        match self {
            Self::Assessment(a) => {
                fragments.push(a.assessment_type.as_str().to_string());
                fragments.extend(a.notes.clone());
                for value in a.details.values() {
                    match value {
                        Value::String(s) => fragments.push(s.clone()),
                        other => fragments.push(other.to_string()),
                    }
                }
            }
            Self::Response(r) => {
                fragments.push(r.response_type.clone());
                fragments.extend(r.items.iter().map(|i| i.item.clone()));
                fragments.extend(r.notes.clone());
            }
            Self::Incident(i) => {
                fragments.push(i.name.clone());
                fragments.push(i.incident_type.clone());
                fragments.extend(i.description.clone());
            }
            Self::Media(m) => fragments.extend(m.caption.clone()),
            Self::Entity(e) => fragments.push(e.name.clone()),
        }
        fragments
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_tagged_wire_format() {
        let value = serde_json::to_value(entity("Bakassi IDP Camp")).unwrap();
        assert_eq!(value["kind"], "ENTITY");
        assert_eq!(value["data"]["entityType"], "CAMP");
    }

    #[test]
    fn test_untagged_value_roundtrip() {
        let payload = assessment("two latrines collapsed");
        let value = payload.to_value().unwrap();
        assert_eq!(value["assessmentType"], "WASH");
        assert!(value.get("kind").is_none());

        let parsed = MutationPayload::from_value(EntityKind::Assessment, value).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_from_value_rejects_wrong_shape() {
        let value = entity("Camp").to_value().unwrap();
        assert!(matches!(
            MutationPayload::from_value(EntityKind::Assessment, value),
            Err(SyncError::Serialization(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_coordinates() {
        let mut payload = assessment("ok");
        if let MutationPayload::Assessment(a) = &mut payload {
            a.location = Some(GeoPoint {
                latitude: 95.0,
                longitude: 13.0,
            });
        }
        assert!(matches!(payload.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_empty_required_field() {
        assert!(entity("  ").validate().is_err());
        assert!(entity("Camp").validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_non_positive_quantity() {
        assert!(response(0.0).validate().is_err());
        assert!(response(f64::NAN).validate().is_err());
        assert!(response(12.5).validate().is_ok());
    }

    #[test]
    fn test_response_volume_sums_items() {
        let mut payload = response(600.0);
        if let MutationPayload::Response(r) = &mut payload {
            r.items.push(ResponseItem {
                item: "beans".into(),
                quantity: 500.0,
                unit: "kg".into(),
            });
        }
        assert_eq!(payload.response_volume(), Some(1100.0));
    }
}
