//! Degraded records: the shape-complete answer for a failed run.

use crate::error::PipelineError;
use crate::record::{
    truncate_chars, AccidentDetails, CanonicalRecord, FaultAssessment, FormCheckboxes, PartyInfo,
    RecordStamp, DIAGNOSTIC_MAX_CHARS,
};

/// Party name used when nothing could be extracted.
pub const UNABLE_TO_EXTRACT: &str = "Error - Unable to extract";

/// Fixed `missing_information` entry of every degraded record.
pub const ANALYSIS_FAILED: &str = "Complete analysis failed";

/// Build the degraded record for `error`.
///
/// Every field is populated with an explicit placeholder and the confidence
/// is `0.0`. The failure message goes into `data_inconsistencies`; model text
/// that arrived before the failure is kept in `raw_model_output`.
pub fn degraded_record(error: &PipelineError, stamp: &RecordStamp) -> CanonicalRecord {
    let message = truncate_chars(&error.to_string(), DIAGNOSTIC_MAX_CHARS);

    CanonicalRecord {
        session_id: stamp.session_id.clone(),
        analysis_timestamp: stamp.analysis_timestamp,
        case_summary: format!(
            "Analysis could not be completed ({}): {}",
            error.kind(),
            message
        ),
        party_a: PartyInfo::placeholder(UNABLE_TO_EXTRACT),
        party_b: PartyInfo::placeholder(UNABLE_TO_EXTRACT),
        accident_details: AccidentDetails::default(),
        form_checkboxes: FormCheckboxes::default(),
        fault_assessment: FaultAssessment::default(),
        photo_analyses: Vec::new(),
        witness_statements: Vec::new(),
        police_notes: None,
        legal_considerations: Vec::new(),
        recommended_actions: Vec::new(),
        extraction_confidence: 0.0,
        missing_information: vec![ANALYSIS_FAILED.to_string()],
        data_inconsistencies: vec![message],
        raw_model_output: error
            .raw_output()
            .map(|raw| truncate_chars(raw, DIAGNOSTIC_MAX_CHARS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentError;
    use crate::record::UNKNOWN;

    #[test]
    fn degraded_record_has_placeholders() {
        let err = PipelineError::Transport {
            attempts: 3,
            detail: "connection refused".into(),
        };
        let record = degraded_record(&err, &RecordStamp::now("s-9"));

        assert!(record.is_degraded());
        assert_eq!(record.session_id, "s-9");
        assert_eq!(record.party_a.name, UNABLE_TO_EXTRACT);
        assert_eq!(record.party_b.vehicle_plate, UNKNOWN);
        assert_eq!(record.party_b.vehicle_type, UNKNOWN);
        assert_eq!(record.accident_details.location, UNKNOWN);
        assert_eq!(record.missing_information, vec![ANALYSIS_FAILED]);
        assert_eq!(record.data_inconsistencies.len(), 1);
        assert!(record.data_inconsistencies[0].contains("connection refused"));
        assert!(record
            .case_summary
            .starts_with("Analysis could not be completed (transport failure)"));
        assert_eq!(record.raw_model_output, None);
    }

    #[test]
    fn summary_names_the_category() {
        let stamp = RecordStamp::now("s");
        let doc = PipelineError::from(DocumentError::NotAPdf { magic: b"GIF8".to_vec() });
        assert!(degraded_record(&doc, &stamp).case_summary.contains("(document error)"));

        let refusal = PipelineError::Refusal { reason: "not a form".into() };
        assert!(degraded_record(&refusal, &stamp).case_summary.contains("(model refusal)"));
    }

    #[test]
    fn parse_failure_keeps_truncated_raw_text() {
        let raw = "x".repeat(DIAGNOSTIC_MAX_CHARS + 10);
        let err = PipelineError::Parse {
            detail: "no <analysis> tag".into(),
            raw: Some(raw),
        };
        let record = degraded_record(&err, &RecordStamp::now("s"));
        let kept = record.raw_model_output.unwrap();
        assert_eq!(kept.chars().count(), DIAGNOSTIC_MAX_CHARS + 1);
        assert!(kept.ends_with('…'));
    }

    #[test]
    fn degraded_and_normal_records_share_a_shape() {
        let err = PipelineError::Validation { detail: "bad".into() };
        let value = serde_json::to_value(degraded_record(&err, &RecordStamp::now("s"))).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        for key in ["police_notes", "raw_model_output", "photo_analyses", "fault_assessment"] {
            assert!(keys.iter().any(|k| k == key), "missing {key}");
        }
    }
}
