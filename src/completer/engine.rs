//! Document walk: applies the correction rules to every user and service
//! record of a parsed billing document, tallying what changed.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::rules;
use crate::data::diagnostics::{clean_document_number, DiagnosticEntry, DiagnosticIndex};
use crate::data::document::{value_text, SERVICE_SECTIONS};

/// Sections whose blank principal diagnosis is completed from the lookup
/// table. `otrosServicios` gets every other repair but keeps its diagnosis.
const DIAGNOSIS_SECTIONS: [&str; 3] = ["consultas", "procedimientos", "medicamentos"];

/// Change tally for one completion run. Counters are per mutation, so a
/// service touched by three rules counts three times in `total_changes`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionStats {
    pub users_processed: usize,
    pub services_processed: usize,
    pub diagnoses_found: usize,
    pub diagnoses_completed: usize,
    pub diagnosis_type_fixed: usize,
    pub related_diagnosis_cleared: usize,
    pub care_purpose_filled: usize,
    pub medication_type_filled: usize,
    pub service_modality_filled: usize,
    pub service_codes_cleaned: usize,
    pub user_doc_type_fixed: usize,
    pub country_code_filled: usize,
    pub professional_doc_type_filled: usize,
    pub professional_doc_number_filled: usize,
}

impl CompletionStats {
    /// Every field mutation in the run; excludes the processed/found counts.
    pub fn total_changes(&self) -> usize {
        self.diagnoses_completed
            + self.diagnosis_type_fixed
            + self.related_diagnosis_cleared
            + self.care_purpose_filled
            + self.medication_type_filled
            + self.service_modality_filled
            + self.service_codes_cleaned
            + self.user_doc_type_fixed
            + self.country_code_filled
            + self.professional_doc_type_filled
            + self.professional_doc_number_filled
    }

    pub fn merge(&mut self, other: &CompletionStats) {
        self.users_processed += other.users_processed;
        self.services_processed += other.services_processed;
        self.diagnoses_found += other.diagnoses_found;
        self.diagnoses_completed += other.diagnoses_completed;
        self.diagnosis_type_fixed += other.diagnosis_type_fixed;
        self.related_diagnosis_cleared += other.related_diagnosis_cleared;
        self.care_purpose_filled += other.care_purpose_filled;
        self.medication_type_filled += other.medication_type_filled;
        self.service_modality_filled += other.service_modality_filled;
        self.service_codes_cleaned += other.service_codes_cleaned;
        self.user_doc_type_fixed += other.user_doc_type_fixed;
        self.country_code_filled += other.country_code_filled;
        self.professional_doc_type_filled += other.professional_doc_type_filled;
        self.professional_doc_number_filled += other.professional_doc_number_filled;
    }
}

pub struct Completer<'a> {
    index: &'a DiagnosticIndex,
    pub stats: CompletionStats,
}

impl<'a> Completer<'a> {
    pub fn new(index: &'a DiagnosticIndex) -> Self {
        Self {
            index,
            stats: CompletionStats::default(),
        }
    }

    /// Apply all repairs to a parsed document in place. User-level fields
    /// first, then every service of every user, so diagnostic lookups see
    /// the already-corrected document types.
    pub fn complete_document(&mut self, document: &mut Value) {
        let Some(users) = document.get_mut("usuarios").and_then(Value::as_array_mut) else {
            warn!("document has no 'usuarios' array, nothing to do");
            return;
        };

        for user in users.iter_mut() {
            let Some(user) = user.as_object_mut() else {
                continue;
            };
            self.stats.user_doc_type_fixed += rules::fix_user_document_type(user) as usize;
            self.stats.country_code_filled += rules::fix_country_code(user) as usize;
        }

        for (idx, user) in users.iter_mut().enumerate() {
            let Some(user) = user.as_object_mut() else {
                warn!("usuario {} is not an object, skipped", idx + 1);
                continue;
            };
            self.stats.users_processed += 1;
            self.process_user(user);
        }
    }

    fn process_user(&mut self, user: &mut Map<String, Value>) {
        let doc_type = user
            .get("tipoDocumentoIdentificacion")
            .map(value_text)
            .unwrap_or_default()
            .to_uppercase();
        let doc_number = clean_document_number(
            &user
                .get("numDocumentoIdentificacion")
                .map(value_text)
                .unwrap_or_default(),
        );
        debug!("processing usuario {doc_type} {doc_number}");

        let index = self.index;
        let entry = index.lookup(&doc_type, &doc_number);
        match entry {
            Some(entry) => {
                self.stats.diagnoses_found += 1;
                debug!("diagnosis for {doc_type} {doc_number}: {}", entry.code);
            }
            None => warn!(
                "no diagnostic entry for {doc_type} {doc_number}, applying standard repairs only"
            ),
        }

        let Some(services) = user.get_mut("servicios").and_then(Value::as_object_mut) else {
            debug!("usuario {doc_type} {doc_number} has no servicios");
            return;
        };

        for section in SERVICE_SECTIONS {
            let completes_diagnosis = DIAGNOSIS_SECTIONS.contains(&section);
            let Some(entries) = services.get_mut(section).and_then(Value::as_array_mut) else {
                continue;
            };
            if entries.is_empty() {
                continue;
            }
            debug!("processing {} {section}", entries.len());
            for service in entries.iter_mut() {
                let Some(service) = service.as_object_mut() else {
                    warn!("non-object entry in {section}, skipped");
                    continue;
                };
                self.process_service(service, entry, completes_diagnosis);
            }
        }
    }

    fn process_service(
        &mut self,
        service: &mut Map<String, Value>,
        entry: Option<&DiagnosticEntry>,
        completes_diagnosis: bool,
    ) {
        let stats = &mut self.stats;
        stats.services_processed += 1;

        stats.service_codes_cleaned += rules::clean_service_code(service) as usize;

        if completes_diagnosis {
            let code = entry.map(|e| e.code.as_str());
            stats.diagnoses_completed +=
                rules::complete_principal_diagnosis(service, code) as usize;
        }

        let professional_type = entry.and_then(|e| e.professional_doc_type.as_deref());
        let professional_number = entry.and_then(|e| e.professional_doc_number.as_deref());
        stats.professional_doc_type_filled +=
            rules::fill_professional_doc_type(service, professional_type) as usize;
        stats.professional_doc_number_filled +=
            rules::fill_professional_doc_number(service, professional_number) as usize;
        stats.professional_doc_type_filled += rules::fix_professional_ni(service) as usize;

        stats.diagnosis_type_fixed += rules::fix_principal_diagnosis_type(service) as usize;
        stats.related_diagnosis_cleared += rules::clear_invalid_related_diagnoses(service);
        stats.care_purpose_filled += rules::fill_care_purpose(service) as usize;
        stats.medication_type_filled += rules::fill_medication_type(service) as usize;
        stats.service_modality_filled += rules::fill_service_modality(service) as usize;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::data::diagnostics::DiagnosticEntry;

    fn index_with(entries: &[(&str, &str, &str, Option<&str>, Option<&str>)]) -> DiagnosticIndex {
        let mut index = DiagnosticIndex::default();
        for (doc_type, doc_number, code, prof_type, prof_number) in entries {
            index.insert_first(
                doc_type,
                doc_number,
                DiagnosticEntry {
                    code: code.to_string(),
                    professional_doc_type: prof_type.map(str::to_string),
                    professional_doc_number: prof_number.map(str::to_string),
                },
            );
        }
        index
    }

    #[test]
    fn completes_document_end_to_end() {
        let index = index_with(&[("CC", "12345678", "J440", Some("CC"), Some("99888777"))]);
        let mut doc = json!({
            "numFactura": "FE4501",
            "usuarios": [{
                "tipoDocumentoIdentificacion": "NI",
                "numDocumentoIdentificacion": "12.345.678",
                "codPaisResidencia": "00",
                "servicios": {
                    "consultas": [{
                        "codConsulta": "890.201",
                        "codDiagnosticoPrincipal": "",
                        "tipoDiagnosticoPrincipal": "00",
                        "codDiagnosticoRelacionado1": "A15.",
                        "finalidadTecnologiaSalud": "",
                        "tipoDocumentoIdentificacion": "",
                        "numDocumentoIdentificacion": null
                    }],
                    "medicamentos": [{
                        "codDiagnosticoPrincipal": "0",
                        "tipoMedicamento": null
                    }],
                    "otrosServicios": [{
                        "codDiagnosticoPrincipal": "",
                        "modalidadGrupoServicioTecSal": "00"
                    }]
                }
            }]
        });

        let mut completer = Completer::new(&index);
        completer.complete_document(&mut doc);

        let user = &doc["usuarios"][0];
        assert_eq!(user["tipoDocumentoIdentificacion"], json!("CC"));
        assert_eq!(user["codPaisResidencia"], json!("170"));

        let consulta = &user["servicios"]["consultas"][0];
        assert_eq!(consulta["codConsulta"], json!("890201"));
        assert_eq!(consulta["codDiagnosticoPrincipal"], json!("J440"));
        assert_eq!(consulta["tipoDiagnosticoPrincipal"], json!("03"));
        assert_eq!(consulta["codDiagnosticoRelacionado1"], json!(null));
        assert_eq!(consulta["finalidadTecnologiaSalud"], json!("44"));
        assert_eq!(consulta["tipoDocumentoIdentificacion"], json!("CC"));
        assert_eq!(consulta["numDocumentoIdentificacion"], json!("99888777"));

        let medicamento = &user["servicios"]["medicamentos"][0];
        assert_eq!(medicamento["codDiagnosticoPrincipal"], json!("J440"));
        assert_eq!(medicamento["tipoMedicamento"], json!("01"));

        // otrosServicios never receives a diagnosis but gets other repairs.
        let otro = &user["servicios"]["otrosServicios"][0];
        assert_eq!(otro["codDiagnosticoPrincipal"], json!(""));
        assert_eq!(otro["modalidadGrupoServicioTecSal"], json!("01"));

        let stats = &completer.stats;
        assert_eq!(stats.users_processed, 1);
        assert_eq!(stats.services_processed, 3);
        assert_eq!(stats.diagnoses_found, 1);
        assert_eq!(stats.diagnoses_completed, 2);
        assert_eq!(stats.diagnosis_type_fixed, 1);
        assert_eq!(stats.related_diagnosis_cleared, 1);
        assert_eq!(stats.care_purpose_filled, 1);
        assert_eq!(stats.medication_type_filled, 1);
        assert_eq!(stats.service_modality_filled, 1);
        assert_eq!(stats.service_codes_cleaned, 1);
        assert_eq!(stats.user_doc_type_fixed, 1);
        assert_eq!(stats.country_code_filled, 1);
        assert_eq!(stats.professional_doc_type_filled, 1);
        assert_eq!(stats.professional_doc_number_filled, 1);

        // Untouched top-level keys survive the walk.
        assert_eq!(doc["numFactura"], json!("FE4501"));
    }

    #[test]
    fn lookup_uses_the_corrected_document_type() {
        // The usuario arrives as NI; the table only knows CC. The user-level
        // pass must run first for the lookup to hit.
        let index = index_with(&[("CC", "555", "E119", None, None)]);
        let mut doc = json!({
            "usuarios": [{
                "tipoDocumentoIdentificacion": "NI",
                "numDocumentoIdentificacion": "555",
                "servicios": { "consultas": [{ "codDiagnosticoPrincipal": "" }] }
            }]
        });

        let mut completer = Completer::new(&index);
        completer.complete_document(&mut doc);

        assert_eq!(
            doc["usuarios"][0]["servicios"]["consultas"][0]["codDiagnosticoPrincipal"],
            json!("E119")
        );
        assert_eq!(completer.stats.diagnoses_found, 1);
    }

    #[test]
    fn unknown_patient_still_gets_standard_repairs() {
        let index = index_with(&[]);
        let mut doc = json!({
            "usuarios": [{
                "tipoDocumentoIdentificacion": "CC",
                "numDocumentoIdentificacion": "42",
                "servicios": {
                    "procedimientos": [{
                        "codDiagnosticoPrincipal": "",
                        "finalidadTecnologiaSalud": null
                    }]
                }
            }]
        });

        let mut completer = Completer::new(&index);
        completer.complete_document(&mut doc);

        let procedimiento = &doc["usuarios"][0]["servicios"]["procedimientos"][0];
        assert_eq!(
            procedimiento["codDiagnosticoPrincipal"],
            json!(""),
            "blank diagnosis stays blank without a lookup entry"
        );
        assert_eq!(procedimiento["finalidadTecnologiaSalud"], json!("44"));
        assert_eq!(completer.stats.diagnoses_found, 0);
        assert_eq!(completer.stats.diagnoses_completed, 0);
    }

    #[test]
    fn professional_ni_from_the_table_is_normalized_everywhere() {
        // The professional fill runs before the NI repair in every section,
        // so a lookup entry carrying NI ends up stored as CC even in
        // otrosServicios. Both mutations count.
        let index = index_with(&[("CC", "31", "Z019", Some("NI"), Some("800100200"))]);
        let mut doc = json!({
            "usuarios": [{
                "tipoDocumentoIdentificacion": "CC",
                "numDocumentoIdentificacion": "31",
                "servicios": {
                    "otrosServicios": [{
                        "codDiagnosticoPrincipal": "",
                        "tipoDocumentoIdentificacion": "",
                        "numDocumentoIdentificacion": ""
                    }]
                }
            }]
        });

        let mut completer = Completer::new(&index);
        completer.complete_document(&mut doc);

        let otro = &doc["usuarios"][0]["servicios"]["otrosServicios"][0];
        assert_eq!(otro["tipoDocumentoIdentificacion"], json!("CC"));
        assert_eq!(otro["numDocumentoIdentificacion"], json!("800100200"));
        assert_eq!(
            otro["codDiagnosticoPrincipal"],
            json!(""),
            "diagnosis completion never touches otrosServicios"
        );
        assert_eq!(completer.stats.professional_doc_type_filled, 2);
        assert_eq!(completer.stats.professional_doc_number_filled, 1);
    }

    #[test]
    fn users_without_services_are_counted_but_harmless() {
        let index = index_with(&[]);
        let mut doc = json!({
            "usuarios": [
                { "tipoDocumentoIdentificacion": "CC", "numDocumentoIdentificacion": "1" },
                { "tipoDocumentoIdentificacion": "CC", "numDocumentoIdentificacion": "2",
                  "servicios": {} }
            ]
        });

        let mut completer = Completer::new(&index);
        completer.complete_document(&mut doc);
        assert_eq!(completer.stats.users_processed, 2);
        assert_eq!(completer.stats.services_processed, 0);
    }

    #[test]
    fn stats_merge_accumulates() {
        let mut total = CompletionStats::default();
        let mut one = CompletionStats::default();
        one.users_processed = 2;
        one.diagnoses_completed = 3;
        one.service_codes_cleaned = 1;
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.users_processed, 4);
        assert_eq!(total.diagnoses_completed, 6);
        assert_eq!(total.total_changes(), 8);
    }
}
