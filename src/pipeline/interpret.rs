//! Raw model output → [`CanonicalRecord`].
//!
//! Dispatch is on the output shape alone:
//!
//! * **Structured**: the object is deserialised field-for-field. Pipeline
//!   identity is stamped over whatever the model sent, a zero or missing
//!   confidence becomes [`DEFAULT_CONFIDENCE`], fault shares are narrowed to
//!   integers in `0..=100` (both cleared otherwise) and `raw_model_output` is
//!   truncated.
//! * **Free text**: the `<analysis>` fragment is parsed (see
//!   [`crate::pipeline::markup`]) and each field is read by a fixed path,
//!   falling back to [`UNKNOWN`] or an empty list when the path is missing.

use crate::error::PipelineError;
use crate::pipeline::backend::RawModelOutput;
use crate::pipeline::checkbox::{driver_statements, extract_codes, fault_percentages, Vocabulary};
use crate::pipeline::markup::{parse_analysis, XmlNode};
use crate::record::{
    truncate_chars, AccidentDetails, CanonicalRecord, FaultAssessment, FormCheckboxes, PartyInfo,
    PhotoAnalysis, RecordStamp, DEFAULT_CONFIDENCE, DIAGNOSTIC_MAX_CHARS, UNKNOWN,
};
use serde_json::Value;
use tracing::debug;

/// Map one raw output onto the canonical record.
pub fn interpret(
    raw: RawModelOutput,
    stamp: &RecordStamp,
    vocabulary: &Vocabulary,
) -> Result<CanonicalRecord, PipelineError> {
    let mut record = match raw {
        RawModelOutput::Structured(value) => from_structured(value)?,
        RawModelOutput::FreeText(text) => from_free_text(&text, vocabulary)?,
    };
    record.session_id = stamp.session_id.clone();
    record.analysis_timestamp = stamp.analysis_timestamp;
    Ok(record)
}

fn from_structured(mut value: Value) -> Result<CanonicalRecord, PipelineError> {
    if let Some(fault) = value.get_mut("fault_assessment").and_then(Value::as_object_mut) {
        narrow_percentages(fault);
    }
    let mut record: CanonicalRecord =
        serde_json::from_value(value).map_err(|e| PipelineError::Validation {
            detail: e.to_string(),
        })?;

    if !(0.0..=1.0).contains(&record.extraction_confidence) {
        return Err(PipelineError::Validation {
            detail: format!(
                "extraction_confidence {} is outside [0, 1]",
                record.extraction_confidence
            ),
        });
    }
    if record.extraction_confidence == 0.0 {
        record.extraction_confidence = DEFAULT_CONFIDENCE;
    }
    if let Some(raw) = record.raw_model_output.as_mut() {
        *raw = truncate_chars(raw, DIAGNOSTIC_MAX_CHARS);
    }
    Ok(record)
}

const PERCENTAGE_KEYS: [&str; 2] = ["party_a_fault_percentage", "party_b_fault_percentage"];

/// Rewrite both fault shares as integers in `0..=100`, or clear both when
/// either is anything else (out of range, fractional, not a number).
fn narrow_percentages(fault: &mut serde_json::Map<String, Value>) {
    let share = |v: Option<&Value>| -> Result<Option<u8>, ()> {
        match v {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && (0.0..=100.0).contains(f))
                .map(|f| Some(f as u8))
                .ok_or(()),
            Some(_) => Err(()),
        }
    };

    let shares = (
        share(fault.get(PERCENTAGE_KEYS[0])),
        share(fault.get(PERCENTAGE_KEYS[1])),
    );
    let narrowed = match shares {
        (Ok(a), Ok(b)) => [a, b],
        _ => {
            debug!("Discarding fault percentages outside 0..=100");
            [None, None]
        }
    };
    for (key, pct) in PERCENTAGE_KEYS.iter().zip(narrowed) {
        fault.insert((*key).to_string(), pct.map_or(Value::Null, Value::from));
    }
}

fn from_free_text(text: &str, vocabulary: &Vocabulary) -> Result<CanonicalRecord, PipelineError> {
    let root = parse_analysis(text)?;

    let statements = match root.find("driver_statements") {
        Some(node) if node.child("item").is_some() => root.list_at("driver_statements"),
        Some(node) => driver_statements(node.text()),
        None => Vec::new(),
    };

    Ok(CanonicalRecord {
        session_id: String::new(),
        analysis_timestamp: chrono::Utc::now(),
        case_summary: required(&root, "case_summary"),
        party_a: party(&root, "party_a"),
        party_b: party(&root, "party_b"),
        accident_details: accident_details(&root),
        form_checkboxes: form_checkboxes(&root, vocabulary),
        fault_assessment: fault_assessment(&root),
        photo_analyses: photos(&root),
        witness_statements: statements,
        police_notes: optional(&root, "police_notes"),
        legal_considerations: root.list_at("legal_considerations"),
        recommended_actions: root.list_at("recommended_actions"),
        extraction_confidence: confidence(root.text_at("confidence")),
        missing_information: root.list_at("missing_information"),
        data_inconsistencies: root.list_at("data_inconsistencies"),
        raw_model_output: Some(truncate_chars(text, DIAGNOSTIC_MAX_CHARS)),
    })
}

fn required(node: &XmlNode, path: &str) -> String {
    node.text_at(path).unwrap_or(UNKNOWN).to_string()
}

fn optional(node: &XmlNode, path: &str) -> Option<String> {
    node.text_at(path).map(str::to_string)
}

/// Text of a field that may be written as `<item>` children or plain text.
fn joined(node: &XmlNode, path: &str) -> String {
    node.list_at(path).join(", ")
}

fn party(root: &XmlNode, prefix: &str) -> PartyInfo {
    let Some(node) = root.child(prefix) else {
        return PartyInfo::unknown();
    };
    PartyInfo {
        name: required(node, "name"),
        id_number: optional(node, "id_number"),
        driver_license: optional(node, "driver_license"),
        vehicle_plate: required(node, "vehicle_plate"),
        vehicle_type: required(node, "vehicle_type"),
        insurance_company: optional(node, "insurance_company"),
        insurance_policy: optional(node, "insurance_policy"),
        phone: optional(node, "phone"),
        address: optional(node, "address"),
    }
}

fn accident_details(root: &XmlNode) -> AccidentDetails {
    let Some(node) = root.child("accident_details") else {
        return AccidentDetails::default();
    };
    AccidentDetails {
        date: required(node, "date"),
        time: required(node, "time"),
        location: required(node, "location"),
        weather_conditions: optional(node, "weather_conditions"),
        road_conditions: optional(node, "road_conditions"),
        visibility: optional(node, "visibility"),
        traffic_signs: node.list_at("traffic_signs"),
        speed_limit: optional(node, "speed_limit"),
    }
}

fn form_checkboxes(root: &XmlNode, vocabulary: &Vocabulary) -> FormCheckboxes {
    let Some(node) = root.child("form_checkboxes") else {
        return FormCheckboxes::default();
    };
    FormCheckboxes {
        section_12_selections: extract_codes(&joined(node, "section_12"), vocabulary),
        section_13_selections: extract_codes(&joined(node, "section_13"), vocabulary),
        section_14_initial_impact: optional(node, "initial_impact"),
        section_15_visible_damages: node.list_at("visible_damages"),
        section_16_observations: node.list_at("observations"),
    }
}

fn fault_assessment(root: &XmlNode) -> FaultAssessment {
    let Some(node) = root.child("fault_assessment") else {
        return FaultAssessment::default();
    };
    let (a, b) = node
        .text_at("distribution")
        .map(fault_percentages)
        .unwrap_or((None, None));
    FaultAssessment {
        party_a_fault_percentage: a,
        party_b_fault_percentage: b,
        preliminary_fault_party: optional(node, "preliminary_fault_party"),
        fault_indicators: node.list_at("fault_indicators"),
        contested_points: node.list_at("contested_points"),
    }
}

fn photos(root: &XmlNode) -> Vec<PhotoAnalysis> {
    let Some(node) = root.child("photos") else {
        return Vec::new();
    };
    node.children_named("photo")
        .enumerate()
        .map(|(idx, photo)| PhotoAnalysis {
            photo_id: photo
                .attr("id")
                .and_then(|id| id.trim().parse().ok())
                .unwrap_or(idx as u32 + 1),
            description: required(photo, "description"),
            relevant_damages: photo.list_at("relevant_damages"),
            consistency_with_report: photo.text_at("consistent").map_or(true, is_affirmative),
            notes: optional(photo, "notes"),
        })
        .collect()
}

/// Anything but an explicit negative counts as consistent.
fn is_affirmative(text: &str) -> bool {
    !matches!(
        text.to_lowercase().as_str(),
        "false" | "no" | "0" | "hayır" | "hayir" | "inconsistent"
    )
}

/// Parsed confidence, or the default when missing, unreadable or not
/// positive. Values above 1 are clamped.
fn confidence(text: Option<&str>) -> f64 {
    match text.and_then(|t| t.trim().trim_end_matches('%').trim().parse::<f64>().ok()) {
        Some(c) if c.is_finite() && c > 0.0 => c.min(1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn stamp() -> RecordStamp {
        RecordStamp {
            session_id: "sess-1".into(),
            analysis_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    fn full_record() -> CanonicalRecord {
        CanonicalRecord {
            session_id: "model-invented".into(),
            analysis_timestamp: Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap(),
            case_summary: "Rear-end collision at a red light".into(),
            party_a: PartyInfo {
                phone: Some("+90 555 000 00 00".into()),
                ..PartyInfo::placeholder("Ayşe Yılmaz")
            },
            party_b: PartyInfo::placeholder("Mehmet Demir"),
            accident_details: AccidentDetails {
                date: "12.03.2024".into(),
                time: "14:30".into(),
                location: "Kadıköy, İstanbul".into(),
                traffic_signs: vec!["Dur".into()],
                ..AccidentDetails::default()
            },
            form_checkboxes: FormCheckboxes {
                section_13_selections: vec![5, 11],
                ..FormCheckboxes::default()
            },
            fault_assessment: FaultAssessment {
                party_a_fault_percentage: Some(0),
                party_b_fault_percentage: Some(100),
                ..FaultAssessment::default()
            },
            photo_analyses: vec![PhotoAnalysis {
                photo_id: 1,
                description: "Crushed rear bumper".into(),
                relevant_damages: vec!["bumper".into()],
                consistency_with_report: true,
                notes: None,
            }],
            witness_statements: vec!["Driver A: I was stopped.".into()],
            police_notes: None,
            legal_considerations: vec![],
            recommended_actions: vec!["Request dashcam footage".into()],
            extraction_confidence: 0.8,
            missing_information: vec![],
            data_inconsistencies: vec![],
            raw_model_output: None,
        }
    }

    #[test]
    fn structured_round_trip_only_changes_identity() {
        let original = full_record();
        let value = serde_json::to_value(&original).unwrap();

        let record = interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default())
            .unwrap();

        let expected = CanonicalRecord {
            session_id: "sess-1".into(),
            analysis_timestamp: stamp().analysis_timestamp,
            ..original
        };
        assert_eq!(record, expected);
    }

    #[test]
    fn structured_zero_confidence_gets_default() {
        let mut value = serde_json::to_value(full_record()).unwrap();
        value["extraction_confidence"] = json!(0.0);
        let record =
            interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default()).unwrap();
        assert_eq!(record.extraction_confidence, DEFAULT_CONFIDENCE);

        let mut value = serde_json::to_value(full_record()).unwrap();
        value.as_object_mut().unwrap().remove("extraction_confidence");
        let record =
            interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default()).unwrap();
        assert_eq!(record.extraction_confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn structured_type_mismatch_is_validation_error() {
        let mut value = serde_json::to_value(full_record()).unwrap();
        value["party_a"] = json!("just a string");
        let err = interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);

        let mut value = serde_json::to_value(full_record()).unwrap();
        value["extraction_confidence"] = json!(1.7);
        let err = interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[test]
    fn structured_out_of_range_percentages_are_cleared() {
        let mut value = serde_json::to_value(full_record()).unwrap();
        value["fault_assessment"]["party_a_fault_percentage"] = json!(150);
        let record =
            interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default()).unwrap();
        assert_eq!(record.fault_assessment.party_a_fault_percentage, None);
        assert_eq!(record.fault_assessment.party_b_fault_percentage, None);
    }

    #[test]
    fn structured_percentages_beyond_u8_or_negative_are_cleared() {
        for bad in [json!(300), json!(-5), json!(70.5), json!("70")] {
            let mut value = serde_json::to_value(full_record()).unwrap();
            value["fault_assessment"]["party_a_fault_percentage"] = bad.clone();
            let record =
                interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default())
                    .unwrap_or_else(|e| panic!("{bad} should not degrade: {e}"));
            assert_eq!(record.fault_assessment.party_a_fault_percentage, None, "{bad}");
            assert_eq!(record.fault_assessment.party_b_fault_percentage, None, "{bad}");
            assert_eq!(record.extraction_confidence, 0.8);
        }
    }

    #[test]
    fn structured_whole_float_percentages_are_kept() {
        let mut value = serde_json::to_value(full_record()).unwrap();
        value["fault_assessment"]["party_a_fault_percentage"] = json!(70.0);
        value["fault_assessment"]["party_b_fault_percentage"] = json!(30);
        let record =
            interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default()).unwrap();
        assert_eq!(record.fault_assessment.party_a_fault_percentage, Some(70));
        assert_eq!(record.fault_assessment.party_b_fault_percentage, Some(30));
    }

    #[test]
    fn structured_raw_output_is_truncated() {
        let mut value = serde_json::to_value(full_record()).unwrap();
        value["raw_model_output"] = json!("x".repeat(DIAGNOSTIC_MAX_CHARS + 500));
        let record =
            interpret(RawModelOutput::Structured(value), &stamp(), &Vocabulary::default()).unwrap();
        let raw = record.raw_model_output.unwrap();
        assert!(raw.ends_with('…'));
        assert_eq!(raw.chars().count(), DIAGNOSTIC_MAX_CHARS + 1);
    }

    const TAGGED_REPLY: &str = r#"Sure, here is my analysis of the report.

<analysis>
  <case_summary>Vehicle B ran a red light and hit vehicle A.</case_summary>
  <party_a>
    <name>Ayşe Yılmaz</name>
    <vehicle_plate>34 ABC 123</vehicle_plate>
    <vehicle_type>Otomobil</vehicle_type>
    <insurance_company>Anadolu Sigorta</insurance_company>
  </party_a>
  <party_b>
    <name>Mehmet Demir</name>
  </party_b>
  <accident_details>
    <date>12.03.2024</date>
    <location>Kadıköy</location>
    <traffic_signs>Trafik ışığı, Yaya geçidi</traffic_signs>
  </accident_details>
  <form_checkboxes>
    <section_12>1, 4</section_12>
    <section_13>B sürücüsü kırmızı ışık ihlali yaptı</section_13>
    <initial_impact>Sol ön</initial_impact>
  </form_checkboxes>
  <fault_assessment>
    <distribution>Fault distribution: Party A 0% - Party B 100%</distribution>
    <fault_indicators><item>Red light</item><item>Skid marks</item></fault_indicators>
  </fault_assessment>
  <driver_statements>Driver A: I had green. Driver B: I did not see the light.</driver_statements>
  <photos>
    <photo id="2"><description>Left front damage</description><consistent>no</consistent></photo>
  </photos>
  <recommended_actions>Request camera footage, Contact witness</recommended_actions>
  <confidence>0.85</confidence>
</analysis>

Let me know if you need anything else."#;

    #[test]
    fn tagged_reply_is_read_by_path() {
        let record = interpret(
            RawModelOutput::FreeText(TAGGED_REPLY.into()),
            &stamp(),
            &Vocabulary::default(),
        )
        .unwrap();

        assert_eq!(record.session_id, "sess-1");
        assert_eq!(record.case_summary, "Vehicle B ran a red light and hit vehicle A.");
        assert_eq!(record.party_a.vehicle_plate, "34 ABC 123");
        assert_eq!(record.party_a.insurance_company.as_deref(), Some("Anadolu Sigorta"));
        assert_eq!(record.party_b.name, "Mehmet Demir");
        assert_eq!(record.party_b.vehicle_plate, UNKNOWN);
        assert_eq!(record.accident_details.time, UNKNOWN);
        assert_eq!(record.accident_details.traffic_signs, vec!["Trafik ışığı", "Yaya geçidi"]);
        assert_eq!(record.form_checkboxes.section_12_selections, vec![1, 4]);
        assert_eq!(record.form_checkboxes.section_13_selections, vec![11]);
        assert_eq!(record.form_checkboxes.section_14_initial_impact.as_deref(), Some("Sol ön"));
        assert_eq!(record.fault_assessment.party_a_fault_percentage, Some(0));
        assert_eq!(record.fault_assessment.party_b_fault_percentage, Some(100));
        assert_eq!(record.fault_assessment.fault_indicators, vec!["Red light", "Skid marks"]);
        assert_eq!(record.witness_statements.len(), 2);
        assert_eq!(record.photo_analyses[0].photo_id, 2);
        assert!(!record.photo_analyses[0].consistency_with_report);
        assert_eq!(
            record.recommended_actions,
            vec!["Request camera footage", "Contact witness"]
        );
        assert_eq!(record.extraction_confidence, 0.85);
        assert!(record.raw_model_output.as_deref().unwrap().starts_with("Sure"));
    }

    #[test]
    fn empty_fragment_fills_placeholders() {
        let record = interpret(
            RawModelOutput::FreeText("<analysis></analysis>".into()),
            &stamp(),
            &Vocabulary::default(),
        )
        .unwrap();
        assert_eq!(record.case_summary, UNKNOWN);
        assert_eq!(record.party_a, PartyInfo::unknown());
        assert_eq!(record.accident_details, AccidentDetails::default());
        assert_eq!(record.extraction_confidence, DEFAULT_CONFIDENCE);
        assert!(record.witness_statements.is_empty());
        assert!(!record.is_degraded());
    }

    #[test]
    fn free_text_without_fragment_is_parse_error() {
        let err = interpret(
            RawModelOutput::FreeText("The image is too blurry to read.".into()),
            &stamp(),
            &Vocabulary::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Parse);
        assert_eq!(err.raw_output(), Some("The image is too blurry to read."));
    }

    #[test]
    fn confidence_parsing() {
        assert_eq!(confidence(None), DEFAULT_CONFIDENCE);
        assert_eq!(confidence(Some("0")), DEFAULT_CONFIDENCE);
        assert_eq!(confidence(Some("-0.3")), DEFAULT_CONFIDENCE);
        assert_eq!(confidence(Some("high")), DEFAULT_CONFIDENCE);
        assert_eq!(confidence(Some("1.4")), 1.0);
        assert_eq!(confidence(Some(" 0.6 ")), 0.6);
    }
}
