//! The canonical case record: the single output of every analysis run.
//!
//! A [`CanonicalRecord`] is built exactly once per run, either from the
//! model's output (see [`crate::pipeline::interpret`]) or as a degraded
//! placeholder (see [`crate::pipeline::fallback`]). Both paths produce the
//! same serialised shape: optional content is `null` or `[]`, never a
//! missing key, so the downstream briefing renderer can read every field
//! unconditionally.
//!
//! `extraction_confidence == 0.0` is reserved for degraded records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for any scalar the model did not provide.
pub const UNKNOWN: &str = "Unknown";

/// Confidence assigned when the model leaves it unset or zero.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Characters of model output or failure text kept on a record.
pub const DIAGNOSTIC_MAX_CHARS: usize = 2000;

/// One party (driver + vehicle) involved in the accident.
///
/// `name`, `vehicle_plate` and `vehicle_type` are always populated, with
/// [`UNKNOWN`] when nothing could be read. Every other field defaults to
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyInfo {
    pub name: String,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub driver_license: Option<String>,
    pub vehicle_plate: String,
    pub vehicle_type: String,
    #[serde(default)]
    pub insurance_company: Option<String>,
    #[serde(default)]
    pub insurance_policy: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl PartyInfo {
    /// A party whose required fields are all [`UNKNOWN`].
    pub fn unknown() -> Self {
        Self::placeholder(UNKNOWN)
    }

    /// A party with the given display name and unknown vehicle.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_number: None,
            driver_license: None,
            vehicle_plate: UNKNOWN.to_string(),
            vehicle_type: UNKNOWN.to_string(),
            insurance_company: None,
            insurance_policy: None,
            phone: None,
            address: None,
        }
    }
}

/// When, where and under which conditions the accident happened.
///
/// `date`, `time` and `location` default to [`UNKNOWN`]; the condition
/// fields default to `None` and `traffic_signs` to an empty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentDetails {
    pub date: String,
    pub time: String,
    pub location: String,
    #[serde(default)]
    pub weather_conditions: Option<String>,
    #[serde(default)]
    pub road_conditions: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub traffic_signs: Vec<String>,
    #[serde(default)]
    pub speed_limit: Option<String>,
}

impl Default for AccidentDetails {
    fn default() -> Self {
        Self {
            date: UNKNOWN.to_string(),
            time: UNKNOWN.to_string(),
            location: UNKNOWN.to_string(),
            weather_conditions: None,
            road_conditions: None,
            visibility: None,
            traffic_signs: Vec::new(),
            speed_limit: None,
        }
    }
}

/// Selections read off the numbered sections of the paper accident form.
///
/// Sections 12 and 13 hold numeric checkbox codes; 12 covers the damaged
/// vehicle areas, 13 the accident circumstances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormCheckboxes {
    #[serde(default)]
    pub section_12_selections: Vec<u32>,
    #[serde(default)]
    pub section_13_selections: Vec<u32>,
    #[serde(default)]
    pub section_14_initial_impact: Option<String>,
    #[serde(default)]
    pub section_15_visible_damages: Vec<String>,
    #[serde(default)]
    pub section_16_observations: Vec<String>,
}

/// Preliminary fault estimate.
///
/// The two percentages are independent estimates in `0..=100`; they are
/// not required to sum to 100. Both stay `None` unless the source states
/// both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultAssessment {
    #[serde(default)]
    pub party_a_fault_percentage: Option<u8>,
    #[serde(default)]
    pub party_b_fault_percentage: Option<u8>,
    #[serde(default)]
    pub preliminary_fault_party: Option<String>,
    #[serde(default)]
    pub fault_indicators: Vec<String>,
    #[serde(default)]
    pub contested_points: Vec<String>,
}

/// What the model saw in one ancillary photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAnalysis {
    pub photo_id: u32,
    pub description: String,
    #[serde(default)]
    pub relevant_damages: Vec<String>,
    #[serde(default = "default_true")]
    pub consistency_with_report: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

/// The structured case record handed back to the caller.
///
/// `session_id` and `analysis_timestamp` always come from the request
/// context, never from the model, so they deserialise with defaults and are
/// overwritten by the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "Utc::now")]
    pub analysis_timestamp: DateTime<Utc>,

    pub case_summary: String,

    pub party_a: PartyInfo,
    pub party_b: PartyInfo,

    pub accident_details: AccidentDetails,

    #[serde(default)]
    pub form_checkboxes: FormCheckboxes,

    #[serde(default)]
    pub fault_assessment: FaultAssessment,

    #[serde(default)]
    pub photo_analyses: Vec<PhotoAnalysis>,

    #[serde(default)]
    pub witness_statements: Vec<String>,
    #[serde(default)]
    pub police_notes: Option<String>,

    #[serde(default)]
    pub legal_considerations: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,

    /// 0.0 means degraded; anything else means at least a partial extraction.
    #[serde(default)]
    pub extraction_confidence: f64,
    #[serde(default)]
    pub missing_information: Vec<String>,
    #[serde(default)]
    pub data_inconsistencies: Vec<String>,

    /// Truncated model output kept for debugging only.
    #[serde(default)]
    pub raw_model_output: Option<String>,
}

impl CanonicalRecord {
    /// `true` when this record was produced by the fallback path.
    pub fn is_degraded(&self) -> bool {
        self.extraction_confidence == 0.0
    }
}

/// Pipeline-owned identity stamped onto every record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStamp {
    pub session_id: String,
    pub analysis_timestamp: DateTime<Utc>,
}

impl RecordStamp {
    /// Stamp for `session_id`, timestamped now.
    pub fn now(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            analysis_timestamp: Utc::now(),
        }
    }
}

/// Truncate `s` to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &s[..byte_idx]),
        None => s.to_string(),
    }
}
