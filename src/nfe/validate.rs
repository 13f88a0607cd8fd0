use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use super::tree::XmlNode;
use super::{
    ACCESS_KEY_LEN, MAX_DOCUMENT_NUMBER, declared_item_number, document_root,
    parse_document_number, parse_issue_date, raw_access_key,
};
use crate::config::IngestConfig;
use crate::core::*;

/// Outcome of [`validate_structure`]: accumulated errors and warnings plus
/// whatever metadata could be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// True iff `errors` is empty.
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    pub info: DocumentInfo,
}

impl ValidationReport {
    /// Error messages as display strings.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Warning messages as display strings.
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// Header metadata extracted during validation, present even for invalid
/// documents so callers can show diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub access_key: Option<String>,
    pub number: Option<u64>,
    pub series: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub issuer_name: Option<String>,
    pub issuer_tax_id: Option<String>,
    pub declared_net_total: Option<Decimal>,
    pub line_count: u32,
    pub schema_version: Option<String>,
    pub environment: Option<Environment>,
}

/// Top-level sections every document must carry, relative to `infNFe`.
const REQUIRED_SECTIONS: [(&str, &str); 4] = [
    ("ide", "identification"),
    ("emit", "issuer"),
    ("det", "line items"),
    ("total", "totals"),
];

const CNPJ_LEN: usize = 14;
const CPF_LEN: usize = 11;

/// Check required sections, cardinalities and field shapes of an NF-e tree.
///
/// Every check runs; findings accumulate instead of short-circuiting.
/// Warnings never affect validity.
pub fn validate_structure(tree: &XmlNode, config: &IngestConfig) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut info = DocumentInfo::default();

    let doc = match tree.find("infNFe") {
        Some(inf) => inf,
        None => {
            errors.push(ValidationError::with_rule(
                "infNFe",
                "document information block is missing",
                "NFE-SECTION",
            ));
            document_root(tree)
        }
    };

    // Required sections
    for (name, label) in REQUIRED_SECTIONS {
        if doc.child(name).is_none() {
            errors.push(ValidationError::with_rule(
                name,
                format!("required {label} section is missing"),
                "NFE-SECTION",
            ));
        }
    }

    validate_access_key(tree, doc, config, &mut info, &mut errors, &mut warnings);

    // Document number
    if let Some(raw) = doc.text_at("ide/nNF") {
        match parse_document_number(raw) {
            Some(n) => info.number = Some(n),
            None => errors.push(ValidationError::with_rule(
                "ide/nNF",
                format!(
                    "document number '{raw}' is not a positive integer up to {MAX_DOCUMENT_NUMBER}"
                ),
                "NFE-NUMBER",
            )),
        }
    } else if doc.child("ide").is_some() {
        warnings.push(ValidationError::new("ide/nNF", "document number is missing"));
    }
    info.series = doc.text_at("ide/serie").map(str::to_string);

    // Issue date
    match doc.text_at("ide/dhEmi").or_else(|| doc.text_at("ide/dEmi")) {
        Some(raw) => match parse_issue_date(raw) {
            Some(d) => info.issue_date = Some(d),
            None => warnings.push(ValidationError::new(
                "ide/dhEmi",
                format!("issue date '{raw}' could not be read"),
            )),
        },
        None => {
            if doc.child("ide").is_some() {
                warnings.push(ValidationError::new("ide/dhEmi", "issue date is missing"));
            }
        }
    }

    info.issuer_name = doc.text_at("emit/xNome").map(str::to_string);
    validate_issuer_tax_id(doc, &mut info, &mut errors);

    // Line count
    let line_count = doc.children_named("det").count();
    info.line_count = u32::try_from(line_count).unwrap_or(u32::MAX);
    if line_count == 0 {
        errors.push(ValidationError::with_rule(
            "det",
            "document has no line items",
            "NFE-LINES",
        ));
    } else if info.line_count > config.max_line_items {
        errors.push(ValidationError::with_rule(
            "det",
            format!(
                "document has {line_count} line items; at most {} are allowed",
                config.max_line_items
            ),
            "NFE-LINES",
        ));
    }

    validate_item_numbers(doc, &mut errors);

    // Declared net total
    match doc.text_at("total/ICMSTot/vNF") {
        Some(raw) => match parse_optional_decimal(Some(raw)) {
            Some(v) if v >= Decimal::ZERO => info.declared_net_total = Some(v),
            Some(v) => errors.push(ValidationError::with_rule(
                "total/ICMSTot/vNF",
                format!("declared net total {v} is negative"),
                "NFE-TOTAL",
            )),
            None => errors.push(ValidationError::with_rule(
                "total/ICMSTot/vNF",
                format!("declared net total '{raw}' is not a number"),
                "NFE-TOTAL",
            )),
        },
        None => {
            if doc.child("total").is_some() {
                warnings.push(ValidationError::new(
                    "total/ICMSTot/vNF",
                    "declared net total is missing; products total minus discount is used",
                ));
            }
        }
    }

    // Schema version
    if let Some(version) = doc.attr("versao") {
        info.schema_version = Some(version.to_string());
        if version != config.supported_schema_version {
            warnings.push(ValidationError::with_rule(
                "infNFe@versao",
                format!(
                    "schema version {version} is not fully supported (expected {})",
                    config.supported_schema_version
                ),
                "NFE-VERSION",
            ));
        }
    }

    // Environment
    if let Some(raw) = doc.text_at("ide/tpAmb") {
        info.environment = Environment::from_code(raw);
        if info.environment == Some(Environment::Homologation) {
            warnings.push(ValidationError::with_rule(
                "ide/tpAmb",
                "document was issued in the test environment and has no fiscal value",
                "NFE-ENV",
            ));
        }
    }

    debug!(
        errors = errors.len(),
        warnings = warnings.len(),
        lines = info.line_count,
        "structural validation finished"
    );

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        info,
    }
}

fn validate_access_key(
    tree: &XmlNode,
    doc: &XmlNode,
    config: &IngestConfig,
    info: &mut DocumentInfo,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationError>,
) {
    let Some(raw) = raw_access_key(tree, doc) else {
        warnings.push(ValidationError::new(
            "infNFe@Id",
            "access key is missing; the document can only be matched by id",
        ));
        return;
    };

    let key = raw.strip_prefix(config.access_key_prefix.as_str()).unwrap_or(raw);
    if key.len() != ACCESS_KEY_LEN || !key.bytes().all(|b| b.is_ascii_digit()) {
        errors.push(ValidationError::with_rule(
            "infNFe@Id",
            format!("access key '{raw}' must be exactly {ACCESS_KEY_LEN} digits"),
            "NFE-KEY",
        ));
        return;
    }

    let expected = access_key_check_digit(&key[..ACCESS_KEY_LEN - 1]);
    let actual = key.as_bytes()[ACCESS_KEY_LEN - 1] - b'0';
    if expected != Some(actual) {
        warnings.push(ValidationError::with_rule(
            "infNFe@Id",
            format!("access key check digit {actual} does not match computed digit"),
            "NFE-KEY-DV",
        ));
    }
    info.access_key = Some(key.to_string());
}

/// Line items are keyed by `nItem` (or their position when it is absent),
/// so every line needs a readable number of its own.
fn validate_item_numbers(doc: &XmlNode, errors: &mut Vec<ValidationError>) {
    let mut seen = BTreeSet::new();
    for (i, det) in doc.children_named("det").enumerate() {
        let position = u32::try_from(i + 1).unwrap_or(u32::MAX);
        let field = format!("det[{position}]@nItem");
        let number = match (det.attr("nItem"), declared_item_number(det)) {
            (_, Some(n)) => n,
            (None, None) => position,
            (Some(raw), None) => {
                errors.push(ValidationError::with_rule(
                    field,
                    format!("item number '{raw}' is not a positive integer"),
                    "NFE-ITEM",
                ));
                continue;
            }
        };
        if !seen.insert(number) {
            errors.push(ValidationError::with_rule(
                field,
                format!("item number {number} is used by more than one line"),
                "NFE-ITEM",
            ));
        }
    }
}

fn validate_issuer_tax_id(
    doc: &XmlNode,
    info: &mut DocumentInfo,
    errors: &mut Vec<ValidationError>,
) {
    let cnpj = doc.text_at("emit/CNPJ");
    let cpf = doc.text_at("emit/CPF");

    let well_formed = |v: &str, len: usize| v.len() == len && v.bytes().all(|b| b.is_ascii_digit());
    let valid = cnpj
        .filter(|v| well_formed(v, CNPJ_LEN))
        .or_else(|| cpf.filter(|v| well_formed(v, CPF_LEN)));

    match (valid, cnpj, cpf) {
        (Some(id), _, _) => info.issuer_tax_id = Some(id.to_string()),
        (None, None, None) => errors.push(ValidationError::with_rule(
            "emit/CNPJ",
            "issuer tax id (CNPJ or CPF) is missing",
            "NFE-EMIT",
        )),
        (None, Some(v), _) => errors.push(ValidationError::with_rule(
            "emit/CNPJ",
            format!("issuer tax id (CNPJ) '{v}' must be {CNPJ_LEN} digits"),
            "NFE-EMIT",
        )),
        (None, None, Some(v)) => errors.push(ValidationError::with_rule(
            "emit/CPF",
            format!("issuer tax id (CPF) '{v}' must be {CPF_LEN} digits"),
            "NFE-EMIT",
        )),
    }
}

/// Modulo-11 check digit over the first 43 digits of an access key.
///
/// Weights 2..=9 cycle from the rightmost digit leftwards; remainders 0 and
/// 1 yield 0. Returns `None` for input that is not 43 ASCII digits.
pub fn access_key_check_digit(first_43: &str) -> Option<u8> {
    if first_43.len() != ACCESS_KEY_LEN - 1 || !first_43.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sum: u32 = first_43
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * (2 + (i as u32 % 8)))
        .sum();
    let rem = sum % 11;
    Some(if rem < 2 { 0 } else { (11 - rem) as u8 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfe::parse_tree;

    fn validate(xml: &str) -> ValidationReport {
        validate_structure(&parse_tree(xml.as_bytes()).unwrap(), &IngestConfig::default())
    }

    #[test]
    fn check_digit_known_key() {
        // key published in the SEFAZ developer manual examples
        assert_eq!(
            access_key_check_digit("5206043300991100250655012000000780026730161"),
            Some(5)
        );
        assert_eq!(access_key_check_digit("123"), None);
    }

    #[test]
    fn empty_root_reports_every_section() {
        let report = validate("<NFe/>");
        assert!(!report.is_valid);
        let fields: Vec<_> = report.errors.iter().map(|e| e.field.as_str()).collect();
        for f in ["infNFe", "ide", "emit", "det", "total"] {
            assert!(fields.contains(&f), "missing error for {f}: {fields:?}");
        }
    }

    #[test]
    fn malformed_key_is_error_not_stop() {
        let report = validate(
            r#"<NFe><infNFe Id="NFe123" versao="4.00">
                <ide><nNF>7</nNF></ide>
                <emit><CNPJ>12345678000195</CNPJ><xNome>ACME</xNome></emit>
                <det nItem="1"/>
                <total><ICMSTot><vNF>10.00</vNF></ICMSTot></total>
            </infNFe></NFe>"#,
        );
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].rule.as_deref(), Some("NFE-KEY"));
        assert_eq!(report.info.number, Some(7));
        assert_eq!(report.info.issuer_name.as_deref(), Some("ACME"));
    }

    #[test]
    fn cpf_issuer_accepted() {
        let report = validate(
            r#"<NFe><infNFe versao="4.00">
                <ide><nNF>1</nNF><dhEmi>2024-03-15T10:00:00-03:00</dhEmi></ide>
                <emit><CPF>12345678901</CPF></emit>
                <det nItem="1"/>
                <total><ICMSTot><vNF>1</vNF></ICMSTot></total>
            </infNFe></NFe>"#,
        );
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.info.issuer_tax_id.as_deref(), Some("12345678901"));
        assert_eq!(
            report.info.issue_date,
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
    }

    #[test]
    fn negative_and_garbage_totals() {
        let tmpl = |v: &str| {
            format!(
                r#"<NFe><infNFe versao="4.00"><ide><nNF>1</nNF></ide>
                <emit><CNPJ>12345678000195</CNPJ></emit><det nItem="1"/>
                <total><ICMSTot><vNF>{v}</vNF></ICMSTot></total></infNFe></NFe>"#
            )
        };
        assert!(!validate(&tmpl("-1.00")).is_valid);
        assert!(!validate(&tmpl("abc")).is_valid);
        assert!(validate(&tmpl("0.00")).is_valid);
    }

    #[test]
    fn zero_document_number_is_error() {
        let report = validate(
            r#"<NFe><infNFe versao="4.00"><ide><nNF>0</nNF></ide>
            <emit><CNPJ>12345678000195</CNPJ></emit><det nItem="1"/>
            <total><ICMSTot><vNF>1</vNF></ICMSTot></total></infNFe></NFe>"#,
        );
        assert_eq!(report.error_messages().len(), 1);
        assert!(report.error_messages()[0].contains("ide/nNF"));
    }

    fn with_items(nf: &str, dets: &str) -> ValidationReport {
        validate(&format!(
            r#"<NFe><infNFe versao="4.00"><ide><nNF>{nf}</nNF></ide>
            <emit><CNPJ>12345678000195</CNPJ></emit>{dets}
            <total><ICMSTot><vNF>1</vNF></ICMSTot></total></infNFe></NFe>"#
        ))
    }

    fn item_errors(report: &ValidationReport) -> usize {
        report
            .errors
            .iter()
            .filter(|e| e.rule.as_deref() == Some("NFE-ITEM"))
            .count()
    }

    #[test]
    fn repeated_item_number_is_error() {
        let report = with_items("1", r#"<det nItem="1"/><det nItem="1"/>"#);
        assert!(!report.is_valid);
        assert_eq!(item_errors(&report), 1);
        assert_eq!(report.errors[0].field, "det[2]@nItem");
    }

    #[test]
    fn positional_fallback_may_not_collide() {
        // second line falls back to position 2, already claimed by the first
        let report = with_items("1", r#"<det nItem="2"/><det/>"#);
        assert_eq!(item_errors(&report), 1);

        assert!(with_items("1", "<det/><det/><det/>").is_valid);
        assert!(with_items("1", r#"<det nItem="3"/><det nItem="1"/>"#).is_valid);
    }

    #[test]
    fn unreadable_item_number_is_error() {
        for raw in ["x", "0", "-1", ""] {
            let report = with_items("1", &format!(r#"<det nItem="{raw}"/>"#));
            assert_eq!(item_errors(&report), 1, "nItem={raw:?}");
        }
    }

    #[test]
    fn document_number_limited_to_nine_digits() {
        assert_eq!(with_items("999999999", "<det/>").info.number, Some(999_999_999));

        for raw in ["1000000000", "18446744073709551615"] {
            let report = with_items(raw, "<det/>");
            assert!(!report.is_valid);
            assert_eq!(report.errors[0].rule.as_deref(), Some("NFE-NUMBER"));
            assert_eq!(report.info.number, None);
        }
    }
}
