//! Field-level correction rules for RIPS billing records.
//!
//! Each rule takes the JSON object of a user or service, applies one repair
//! in place and reports whether it changed anything. Rules only touch fields
//! that are present, except where noted; the walk order across a document
//! lives in `engine`.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::data::document::{is_blank_code, value_text};

/// `codDiagnosticoRelacionado1` values known to be typos of the principal
/// diagnosis; they are cleared to null.
const RELATED1_INVALID: [&str; 5] = ["A15", "A15.", "A18.", "M32.", "UCI1"];

/// A field counts as an unset placeholder when empty, "00" or a textual null.
fn is_unset(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "" | "00" | "null" | "none"
    )
}

/// Empty markers that keep `codConsulta` cleaning from inventing values.
fn is_blank(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "" | "null" | "none" | "nan" | "nat"
    )
}

/// Replace a placeholder or `NI` user document type with `CC`. The field is
/// written even when missing: every usuario must carry one.
pub fn fix_user_document_type(user: &mut Map<String, Value>) -> bool {
    let current = user
        .get("tipoDocumentoIdentificacion")
        .map(value_text)
        .unwrap_or_default()
        .to_uppercase();
    if current != "NI" && !is_unset(&current) {
        return false;
    }
    info!("usuario tipoDocumentoIdentificacion '{current}' -> 'CC'");
    user.insert(
        "tipoDocumentoIdentificacion".to_string(),
        Value::String("CC".to_string()),
    );
    true
}

/// Default a missing or placeholder residence country to Colombia ("170").
pub fn fix_country_code(user: &mut Map<String, Value>) -> bool {
    let current = user
        .get("codPaisResidencia")
        .map(value_text)
        .unwrap_or_default();
    if !is_unset(&current) {
        return false;
    }
    info!("usuario codPaisResidencia '{current}' -> '170'");
    user.insert(
        "codPaisResidencia".to_string(),
        Value::String("170".to_string()),
    );
    true
}

/// Reduce `codConsulta` to its digits, dropping dots, dashes, letters and
/// other separators. Null and empty markers are left alone; everything else
/// is rewritten as a string so numeric codes come out normalized too.
pub fn clean_service_code(service: &mut Map<String, Value>) -> bool {
    let Some(current) = service.get("codConsulta") else {
        return false;
    };
    if current.is_null() {
        return false;
    }
    let original = value_text(current);
    if is_blank(&original) {
        return false;
    }

    let cleaned: String = original.chars().filter(|c| c.is_ascii_digit()).collect();
    let changed = cleaned != original;
    if cleaned.is_empty() {
        warn!("codConsulta has no digits, emptied: '{original}'");
    } else if changed {
        info!("codConsulta cleaned: '{original}' -> '{cleaned}'");
    }
    service.insert("codConsulta".to_string(), Value::String(cleaned));
    changed
}

/// Fill a blank principal diagnosis from the lookup table. Records whose
/// code is present (anything but empty markers and the literal "0") keep it.
pub fn complete_principal_diagnosis(
    service: &mut Map<String, Value>,
    code: Option<&str>,
) -> bool {
    let current = service
        .get("codDiagnosticoPrincipal")
        .map(value_text)
        .unwrap_or_default();
    if !is_blank_code(&current) {
        debug!("principal diagnosis already set: {current}");
        return false;
    }
    let Some(code) = code else {
        debug!("principal diagnosis blank but no lookup code available");
        return false;
    };
    info!("codDiagnosticoPrincipal '{current}' -> '{code}'");
    service.insert(
        "codDiagnosticoPrincipal".to_string(),
        Value::String(code.to_string()),
    );
    true
}

/// Fill an unset professional document type from the lookup table.
pub fn fill_professional_doc_type(
    service: &mut Map<String, Value>,
    value: Option<&str>,
) -> bool {
    fill_from_lookup(service, "tipoDocumentoIdentificacion", value)
}

/// Fill an unset professional document number from the lookup table.
pub fn fill_professional_doc_number(
    service: &mut Map<String, Value>,
    value: Option<&str>,
) -> bool {
    fill_from_lookup(service, "numDocumentoIdentificacion", value)
}

fn fill_from_lookup(service: &mut Map<String, Value>, field: &str, value: Option<&str>) -> bool {
    let Some(current) = service.get(field) else {
        return false;
    };
    let current = value_text(current);
    if !is_unset(&current) {
        return false;
    }
    let Some(value) = value else {
        debug!("{field} unset but the lookup table has no value for it");
        return false;
    };
    info!("{field} '{current}' -> '{value}'");
    service.insert(field.to_string(), Value::String(value.to_string()));
    true
}

/// Rewrite a professional document type of `NI` to `CC`.
pub fn fix_professional_ni(service: &mut Map<String, Value>) -> bool {
    let Some(current) = service.get("tipoDocumentoIdentificacion") else {
        return false;
    };
    if value_text(current).to_uppercase() != "NI" {
        return false;
    }
    info!("tipoDocumentoIdentificacion 'NI' -> 'CC'");
    service.insert(
        "tipoDocumentoIdentificacion".to_string(),
        Value::String("CC".to_string()),
    );
    true
}

/// Rewrite a principal diagnosis type of "00" to "03" (confirmed new).
pub fn fix_principal_diagnosis_type(service: &mut Map<String, Value>) -> bool {
    let Some(current) = service.get("tipoDiagnosticoPrincipal") else {
        return false;
    };
    if value_text(current) != "00" {
        return false;
    }
    info!("tipoDiagnosticoPrincipal '00' -> '03'");
    service.insert(
        "tipoDiagnosticoPrincipal".to_string(),
        Value::String("03".to_string()),
    );
    true
}

/// Null out related-diagnosis codes known to be data-entry noise. Matches
/// the exact stored string; legitimate four-character codes are untouched.
pub fn clear_invalid_related_diagnoses(service: &mut Map<String, Value>) -> usize {
    let mut cleared = 0;

    let clear_first = match service.get("codDiagnosticoRelacionado1") {
        Some(Value::String(code)) if RELATED1_INVALID.contains(&code.as_str()) => {
            Some(code.clone())
        }
        _ => None,
    };
    if let Some(code) = clear_first {
        info!("codDiagnosticoRelacionado1 '{code}' -> null");
        service.insert("codDiagnosticoRelacionado1".to_string(), Value::Null);
        cleared += 1;
    }

    let clear_second = matches!(
        service.get("codDiagnosticoRelacionado2"),
        Some(Value::String(code)) if code == "A15"
    );
    if clear_second {
        info!("codDiagnosticoRelacionado2 'A15' -> null");
        service.insert("codDiagnosticoRelacionado2".to_string(), Value::Null);
        cleared += 1;
    }

    cleared
}

/// Default an empty or null care purpose to "44". Only the exact empty
/// string and null qualify; "00" means something else for this field.
pub fn fill_care_purpose(service: &mut Map<String, Value>) -> bool {
    let fill = match service.get("finalidadTecnologiaSalud") {
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    };
    if !fill {
        return false;
    }
    info!("finalidadTecnologiaSalud '' -> '44'");
    service.insert(
        "finalidadTecnologiaSalud".to_string(),
        Value::String("44".to_string()),
    );
    true
}

/// Default an unset medication type to "01".
pub fn fill_medication_type(service: &mut Map<String, Value>) -> bool {
    fill_placeholder(service, "tipoMedicamento", "01")
}

/// Default an unset service group modality to "01".
pub fn fill_service_modality(service: &mut Map<String, Value>) -> bool {
    fill_placeholder(service, "modalidadGrupoServicioTecSal", "01")
}

fn fill_placeholder(service: &mut Map<String, Value>, field: &str, replacement: &str) -> bool {
    let Some(current) = service.get(field) else {
        return false;
    };
    let current = value_text(current);
    if !is_unset(&current) {
        return false;
    }
    info!("{field} '{current}' -> '{replacement}'");
    service.insert(field.to_string(), Value::String(replacement.to_string()));
    true
}
