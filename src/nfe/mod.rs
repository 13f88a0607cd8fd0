//! NF-e (Nota Fiscal Eletrônica) reading: tree parsing, structural
//! validation and line-item extraction.
//!
//! Only the one fixed document shape is understood (`nfeProc/NFe/infNFe`
//! or a bare `NFe/infNFe`); there is no XSD validation.
//!
//! # Example
//!
//! ```
//! use nfe_ingest::config::IngestConfig;
//! use nfe_ingest::nfe;
//!
//! let xml = br#"<NFe><infNFe versao="4.00"><ide><nNF>1</nNF></ide></infNFe></NFe>"#;
//! let tree = nfe::parse_tree(xml).unwrap();
//! let report = nfe::validate_structure(&tree, &IngestConfig::default());
//! assert!(!report.is_valid);
//! assert_eq!(report.info.number, Some(1));
//! ```

mod extract;
mod tree;
mod validate;

use chrono::NaiveDate;

pub use extract::{
    Extraction, ICMS_VARIANTS, IcmsMatcher, IcmsRegime, extract_document, extract_line,
    extract_line_items, match_icms,
};
pub use tree::{XmlNode, parse_tree};
pub use validate::{DocumentInfo, ValidationReport, access_key_check_digit, validate_structure};

/// Digits in an access key.
pub const ACCESS_KEY_LEN: usize = 44;

/// Largest `ide/nNF` the layout allows (nine digits).
pub const MAX_DOCUMENT_NUMBER: u64 = 999_999_999;

/// The `infNFe` element if present, otherwise the root itself.
pub(crate) fn document_root(tree: &XmlNode) -> &XmlNode {
    tree.find("infNFe").unwrap_or(tree)
}

/// Access key as written in the source: `infNFe@Id`, falling back to the
/// authorization protocol's `chNFe`.
pub(crate) fn raw_access_key<'a>(tree: &'a XmlNode, doc: &'a XmlNode) -> Option<&'a str> {
    doc.attr("Id")
        .filter(|v| !v.is_empty())
        .or_else(|| tree.find("chNFe").map(|n| n.text.as_str()).filter(|t| !t.is_empty()))
}

/// `det@nItem` when it is a positive integer.
pub(crate) fn declared_item_number(det: &XmlNode) -> Option<u32> {
    det.attr("nItem")
        .and_then(|n| n.trim().parse().ok())
        .filter(|n| *n > 0)
}

/// `ide/nNF` when it is a positive number within the layout's range.
pub(crate) fn parse_document_number(raw: &str) -> Option<u64> {
    raw.trim()
        .parse()
        .ok()
        .filter(|n| (1..=MAX_DOCUMENT_NUMBER).contains(n))
}

/// Read `dhEmi` (`2024-03-15T10:20:30-03:00`) or `dEmi` (`2024-03-15`).
pub(crate) fn parse_issue_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(parse_issue_date("2024-03-15T10:20:30-03:00"), expected);
        assert_eq!(parse_issue_date("2024-03-15"), expected);
        assert_eq!(parse_issue_date("15/03/2024"), None);
        assert_eq!(parse_issue_date("2024"), None);
    }

    #[test]
    fn access_key_falls_back_to_protocol() {
        let tree = parse_tree(
            br#"<nfeProc><NFe><infNFe versao="4.00"/></NFe>
                <protNFe><infProt><chNFe>123</chNFe></infProt></protNFe></nfeProc>"#,
        )
        .unwrap();
        let doc = document_root(&tree);
        assert_eq!(doc.name, "infNFe");
        assert_eq!(raw_access_key(&tree, doc), Some("123"));
    }
}
