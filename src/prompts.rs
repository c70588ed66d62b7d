//! Instruction text for accident-report extraction.
//!
//! Every prompt lives here so a wording change touches exactly one file and
//! tests can inspect prompts without a model. Callers override the base text
//! via [`crate::config::AnalysisConfig::instructions`]; the response-format
//! directive is always appended so the interpreter's expectations and the
//! model's instructions cannot drift apart.

use crate::config::ResponseFormat;
use crate::pipeline::markup::{ANALYSIS_CLOSE, ANALYSIS_OPEN};

/// Default instruction text for reading a Turkish traffic accident report
/// (Kaza Tespit Tutanağı) and its accompanying photos.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are an experienced legal intake assistant for a Turkish law firm. You receive a scanned traffic accident report form (Kaza Tespit Tutanağı), possibly with photos of the vehicles and the scene. Extract the facts an attorney needs for a first case review.

Follow these rules precisely:

1. PARTIES
   - Party A is the vehicle in the left column of the form, Party B the right column
   - Copy names, ID numbers, licence numbers, plates and insurance details exactly as written
   - If a value is illegible or absent, leave it empty; never invent one

2. ACCIDENT DETAILS
   - Date, time and location as written on the form
   - Weather, road conditions, visibility, traffic signs and speed limit when stated

3. FORM CHECKBOXES
   - Section 12: numbers of the marked vehicle damage areas
   - Section 13: numbers of the marked accident circumstances
   - Section 14: the initial point of impact
   - Sections 15 and 16: visible damages and observations

4. FAULT
   - Give an estimated fault share for each party (0-100) only when the form supports it
   - List the indicators supporting the estimate and any contested points

5. STATEMENTS AND PHOTOS
   - Transcribe each driver's statement, prefixed "Driver A:" and "Driver B:"
   - For each photo, describe the visible damage and whether it is consistent with the report

6. REVIEW NOTES
   - Legal considerations, recommended next actions, missing information and any inconsistencies between the form, the statements and the photos
   - A confidence between 0 and 1 for the extraction as a whole

If you cannot or will not analyse the document, reply only with <refusal>reason</refusal>."#;

/// Appended when [`ResponseFormat::Structured`] is requested.
pub const STRUCTURED_DIRECTIVE: &str = r#"

OUTPUT FORMAT
Reply with a single JSON object and nothing else. Keys: case_summary, party_a, party_b (each with name, id_number, driver_license, vehicle_plate, vehicle_type, insurance_company, insurance_policy, phone, address), accident_details (date, time, location, weather_conditions, road_conditions, visibility, traffic_signs, speed_limit), form_checkboxes (section_12_selections, section_13_selections, section_14_initial_impact, section_15_visible_damages, section_16_observations), fault_assessment (party_a_fault_percentage, party_b_fault_percentage, preliminary_fault_party, fault_indicators, contested_points), photo_analyses (photo_id, description, relevant_damages, consistency_with_report, notes), witness_statements, police_notes, legal_considerations, recommended_actions, extraction_confidence, missing_information, data_inconsistencies. Use null for unknown scalars and [] for empty lists."#;

/// Build the tagged-format directive around the fragment delimiters.
fn tagged_directive() -> String {
    format!(
        r#"

OUTPUT FORMAT
You may think out loud first, but finish with exactly one fragment of this shape:
{open}
  <case_summary>…</case_summary>
  <party_a><name/><id_number/><driver_license/><vehicle_plate/><vehicle_type/><insurance_company/><insurance_policy/><phone/><address/></party_a>
  <party_b>…same fields as party_a…</party_b>
  <accident_details><date/><time/><location/><weather_conditions/><road_conditions/><visibility/><traffic_signs/><speed_limit/></accident_details>
  <form_checkboxes><section_12/><section_13/><initial_impact/><visible_damages/><observations/></form_checkboxes>
  <fault_assessment><distribution>Party A NN% - Party B NN%</distribution><preliminary_fault_party/><fault_indicators/><contested_points/></fault_assessment>
  <driver_statements>Driver A: … Driver B: …</driver_statements>
  <police_notes/>
  <photos><photo id="1"><description/><relevant_damages/><consistent>true</consistent><notes/></photo></photos>
  <legal_considerations/><recommended_actions/><missing_information/><data_inconsistencies/>
  <confidence>0.0-1.0</confidence>
{close}
Lists are comma-separated. Escape &, < and > inside values."#,
        open = ANALYSIS_OPEN,
        close = ANALYSIS_CLOSE,
    )
}

/// Full instruction block: base text (default or override) plus the directive
/// for the requested response format.
pub fn instruction_text(base: Option<&str>, format: ResponseFormat) -> String {
    let base = base.unwrap_or(DEFAULT_INSTRUCTIONS);
    match format {
        ResponseFormat::Structured => format!("{base}{STRUCTURED_DIRECTIVE}"),
        ResponseFormat::Tagged => format!("{base}{}", tagged_directive()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_instructions_name_both_delimiters() {
        let text = instruction_text(None, ResponseFormat::Tagged);
        assert!(text.starts_with(DEFAULT_INSTRUCTIONS));
        assert!(text.contains(ANALYSIS_OPEN));
        assert!(text.contains(ANALYSIS_CLOSE));
    }

    #[test]
    fn structured_instructions_ask_for_json() {
        let text = instruction_text(Some("Custom base."), ResponseFormat::Structured);
        assert!(text.starts_with("Custom base."));
        assert!(text.contains("single JSON object"));
        assert!(!text.contains(ANALYSIS_OPEN));
    }
}
