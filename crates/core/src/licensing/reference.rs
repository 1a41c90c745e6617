use crate::domain::case::{CaseSubType, CaseTypeReference, ExportType};

/// Human-facing case reference, e.g. `GBSIEL/2026/0000042/P`.
pub struct CaseReference;

impl CaseReference {
    /// `number` is the per-year sequence value, starting at 1.
    pub fn format(case_type: CaseTypeReference, export_type: Option<ExportType>, year: i32, number: u64) -> String {
        let Some(prefix) = application_prefix(case_type) else {
            return format!("{}/{year}/{number:07}", other_prefix(case_type));
        };

        match export_type {
            Some(ExportType::Permanent) => format!("{prefix}/{year}/{number:07}/P"),
            Some(ExportType::Temporary) => format!("{prefix}/{year}/{number:07}/T"),
            None => format!("{prefix}/{year}/{number:07}"),
        }
    }
}

fn application_prefix(case_type: CaseTypeReference) -> Option<String> {
    let licence = match case_type.sub_type() {
        CaseSubType::Standard => 'S',
        CaseSubType::Open => 'O',
        _ => return None,
    };
    let movement = if case_type.is_trade_control() {
        'C'
    } else if case_type.is_transhipment() {
        'T'
    } else {
        'E'
    };
    Some(format!("GB{licence}I{movement}L"))
}

fn other_prefix(case_type: CaseTypeReference) -> &'static str {
    match case_type {
        CaseTypeReference::Exhc => "EXHC",
        CaseTypeReference::F680 => "F680",
        CaseTypeReference::Gift => "GIFT",
        CaseTypeReference::Cre => "CRE",
        CaseTypeReference::Eua => "EUA",
        CaseTypeReference::Gqy => "GQY",
        _ => "COMP",
    }
}

/// The first licence on a case reuses the case reference; later ones get a
/// letter suffix: `/A`, `/B`, ... `/Z`, `/AA`.
pub fn licence_reference(case_reference: &str, existing_licences: usize) -> String {
    if existing_licences == 0 {
        return case_reference.to_owned();
    }

    let mut remaining = existing_licences;
    let mut suffix = Vec::new();
    while remaining > 0 {
        remaining -= 1;
        suffix.push(char::from(b'A' + (remaining % 26) as u8));
        remaining /= 26;
    }
    let suffix: String = suffix.into_iter().rev().collect();
    format!("{case_reference}/{suffix}")
}
