#![cfg(feature = "core")]

use chrono::NaiveDate;
use nfe_ingest::config::IngestConfig;
use nfe_ingest::core::*;
use nfe_ingest::nfe::{self, Extraction};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const STANDARD: &[u8] = include_bytes!("fixtures/nfe_standard.xml");
const HOMOLOGATION: &[u8] = include_bytes!("fixtures/nfe_homologation.xml");

fn extract(xml: &[u8]) -> Extraction {
    let tree = nfe::parse_tree(xml).unwrap();
    nfe::extract_document(&tree, "doc-1", &IngestConfig::default())
}

fn assert_close(actual: Decimal, expected: Decimal) {
    assert!(
        (actual - expected).abs() <= ALLOCATION_EPSILON,
        "{actual} differs from {expected} by more than {ALLOCATION_EPSILON}"
    );
}

// --- Header ---

#[test]
fn header_fields() {
    let Extraction { document: doc, gaps } = extract(STANDARD);
    assert!(gaps.is_empty(), "{gaps:?}");

    assert_eq!(doc.id, "doc-1");
    assert_eq!(
        doc.access_key.as_deref(),
        Some("35240312345678000195550010000123451000000010")
    );
    assert_eq!(doc.number, Some(12345));
    assert_eq!(doc.series.as_deref(), Some("1"));
    assert_eq!(doc.issue_date, NaiveDate::from_ymd_opt(2024, 3, 15));
    assert_eq!(doc.counterparty_name, "Distribuidora Paulista de Ferragens Ltda");
    assert_eq!(doc.counterparty_tax_id, "12345678000195");
    assert_eq!(doc.declared_net_total, dec!(9305.70));
    assert_eq!(doc.declared_products_total, dec!(11111.31));
    assert_eq!(doc.declared_discount_total, dec!(1805.61));
    assert_eq!(doc.declared_freight_total, Decimal::ZERO);
    assert_eq!(doc.declared_line_count, 3);
    assert_eq!(doc.lines.len(), 3);
    assert_eq!(doc.gross_lines_total(), dec!(11111.31));
}

#[test]
fn net_total_falls_back_to_products_minus_discount() {
    let doc = extract(HOMOLOGATION).document;
    assert_eq!(doc.declared_products_total, dec!(120));
    assert_eq!(doc.declared_net_total, dec!(120));
}

#[test]
fn pricing_comes_from_config() {
    let config = IngestConfig {
        default_pricing: PricingConfig {
            entry_tax_rate: dec!(18),
            rounding: RoundingPolicy::Nearest,
            ..PricingConfig::default()
        },
        ..IngestConfig::default()
    };
    let tree = nfe::parse_tree(STANDARD).unwrap();
    let doc = nfe::extract_document(&tree, "x", &config).document;
    assert_eq!(doc.pricing.entry_tax_rate, dec!(18));
    assert_eq!(doc.pricing.rounding, RoundingPolicy::Nearest);
}

// --- Lines ---

#[test]
fn standard_regime_line() {
    let doc = extract(STANDARD).document;
    let line = &doc.lines[0];

    assert_eq!(line.item_number, 1);
    assert_eq!(line.code, "FER-001");
    assert_eq!(line.description, "Furadeira de impacto 750W");
    assert_eq!(line.ncm, "84672100");
    assert_eq!(line.cfop, "5102");
    assert_eq!(line.cest, "0800100");
    assert_eq!(line.unit, "UN");
    assert_eq!(line.quantity, dec!(10));
    assert_eq!(line.unit_price, dec!(500));
    assert_eq!(line.total, dec!(5000.00));
    assert_eq!(line.barcode.as_deref(), Some("7891234567895"));
    assert_eq!(line.supplier_reference.as_deref(), Some("PC-2024-118/1"));
    assert_eq!(line.additional_info.as_deref(), Some("Garantia de 12 meses"));

    assert_eq!(
        line.icms,
        IcmsTax::Standard {
            group: "ICMS00".into(),
            origin: "0".into(),
            cst: "00".into(),
            amounts: TaxAmounts {
                base: dec!(5000),
                rate: dec!(18),
                value: dec!(900),
            },
        }
    );
    assert_eq!(line.ipi.cst, "50");
    assert_eq!(line.ipi.amounts.value, dec!(250));
}

#[test]
fn simplified_regime_line_without_barcode() {
    let doc = extract(STANDARD).document;
    let line = &doc.lines[1];

    assert_eq!(line.barcode, None, "SEM GTIN is not a barcode");
    assert_eq!(line.supplier_reference, None);
    assert_eq!(line.icms.group(), Some("ICMSSN102"));
    assert_eq!(line.icms.situation_code(), Some("102"));
    assert_eq!(line.icms.amounts(), TaxAmounts::default());
    assert_eq!(line.ipi.cst, "53");
    assert_eq!(line.ipi.amounts, TaxAmounts::default());
}

#[test]
fn tax_substitution_line() {
    let doc = extract(STANDARD).document;
    let line = &doc.lines[2];
    assert_eq!(line.icms.group(), Some("ICMS60"));
    assert_eq!(line.icms.situation_code(), Some("60"));
    assert_eq!(line.ipi, IpiTax::default());
    assert_eq!(line.barcode, None);
}

#[test]
fn comma_decimals_and_credit_fields() {
    let Extraction { document: doc, gaps } = extract(HOMOLOGATION);
    let line = &doc.lines[0];

    assert_eq!(line.quantity, dec!(3));
    assert_eq!(line.unit_price, dec!(40));
    assert_eq!(line.total, dec!(120));
    assert_eq!(line.icms.amounts().rate, dec!(2.56));
    assert_eq!(line.icms.amounts().value, dec!(3.07));

    // no cProd: still one record, the gap is a warning
    assert_eq!(line.code, "");
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].field, "det[1]/prod/cProd");
}

#[test]
fn unknown_tax_group_zeroes_amounts() {
    let xml = br#"<NFe><infNFe>
        <det nItem="7"><prod><cProd>A</cProd><xProd>B</xProd><vProd>9.90</vProd></prod>
            <imposto><ICMS><ICMS99><vICMS>1.00</vICMS></ICMS99></ICMS></imposto></det>
    </infNFe></NFe>"#;
    let Extraction { document: doc, gaps } = extract(xml);
    assert_eq!(doc.lines[0].item_number, 7);
    assert_eq!(doc.lines[0].icms, IcmsTax::None);
    assert_eq!(gaps.len(), 1);
    assert!(gaps[0].message.contains("ICMS99"));
}

#[test]
fn line_count_matches_validator_even_for_empty_lines() {
    let xml = br#"<NFe><infNFe><det/><det><prod/></det><det nItem="x"/></infNFe></NFe>"#;
    let tree = nfe::parse_tree(xml).unwrap();
    let report = nfe::validate_structure(&tree, &IngestConfig::default());
    let doc = nfe::extract_document(&tree, "d", &IngestConfig::default()).document;

    assert_eq!(report.info.line_count, 3);
    assert_eq!(doc.lines.len(), 3);
    assert_eq!(doc.lines[2].item_number, 3);
    assert!(doc.lines.iter().all(|l| l.total.is_zero()));
}

#[test]
fn negative_amounts_are_clamped() {
    let xml = br#"<NFe><infNFe><det><prod><cProd>A</cProd><xProd>B</xProd>
        <qCom>-1</qCom><vProd>-5.00</vProd></prod></det></infNFe></NFe>"#;
    let doc = extract(xml).document;
    assert_eq!(doc.lines[0].quantity, Decimal::ZERO);
    assert_eq!(doc.lines[0].total, Decimal::ZERO);
}

// --- Allocation over extracted lines ---

#[test]
fn document_discount_is_allocated_proportionally() {
    let mut doc = extract(STANDARD).document;
    let remainder = allocate_discount(&mut doc.lines, doc.declared_net_total);

    assert_eq!(remainder, dec!(1805.61));
    assert_close(doc.allocated_discount_total(), dec!(1805.61));

    // 5000 / 11111.31 of the remainder
    assert_close(doc.lines[0].allocated_discount, dec!(812.51));
    assert!(doc.lines[0].allocated_discount > doc.lines[2].allocated_discount);
}

#[test]
fn freight_weighted_by_taxed_net_cost() {
    let mut doc = extract(STANDARD).document;
    allocate_discount(&mut doc.lines, doc.declared_net_total);
    allocate_freight(&mut doc.lines, dec!(150), dec!(10));

    let total: Decimal = doc.lines.iter().map(|l| l.freight_share).sum();
    assert_close(total, dec!(150));
    assert!(doc.lines[0].freight_share > doc.lines[1].freight_share);
}
