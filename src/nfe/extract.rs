use std::collections::BTreeSet;

use rust_decimal::Decimal;

use super::tree::XmlNode;
use super::{
    ACCESS_KEY_LEN, declared_item_number, document_root, parse_document_number, parse_issue_date,
    raw_access_key,
};
use crate::config::IngestConfig;
use crate::core::*;

/// Which ICMS regime a group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmsRegime {
    Standard,
    Simplified,
}

/// One alternative shape of the `imposto/ICMS` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmsMatcher {
    pub group: &'static str,
    pub regime: IcmsRegime,
}

impl IcmsMatcher {
    const fn standard(group: &'static str) -> Self {
        Self {
            group,
            regime: IcmsRegime::Standard,
        }
    }

    const fn simplified(group: &'static str) -> Self {
        Self {
            group,
            regime: IcmsRegime::Simplified,
        }
    }

    /// Read this variant from an `ICMS` element, if it is the one present.
    pub fn try_match(&self, icms: &XmlNode) -> Option<IcmsTax> {
        let node = icms.child(self.group)?;
        let origin = node.text_or_empty("orig");
        Some(match self.regime {
            IcmsRegime::Standard => IcmsTax::Standard {
                group: self.group.to_string(),
                origin,
                cst: node.text_or_empty("CST"),
                amounts: TaxAmounts {
                    base: decimal_at(node, "vBC"),
                    rate: decimal_at(node, "pICMS"),
                    value: decimal_at(node, "vICMS"),
                },
            },
            IcmsRegime::Simplified => IcmsTax::Simplified {
                group: self.group.to_string(),
                origin,
                csosn: node.text_or_empty("CSOSN"),
                amounts: TaxAmounts {
                    base: decimal_at(node, "vBC"),
                    // SN101 carries the credit rate/value instead of pICMS/vICMS
                    rate: first_decimal(node, &["pICMS", "pCredSN"]),
                    value: first_decimal(node, &["vICMS", "vCredICMSSN"]),
                },
            },
        })
    }
}

/// ICMS groups in the order they are tried. The first one present wins.
pub const ICMS_VARIANTS: &[IcmsMatcher] = &[
    IcmsMatcher::standard("ICMS00"),
    IcmsMatcher::standard("ICMS10"),
    IcmsMatcher::standard("ICMS20"),
    IcmsMatcher::standard("ICMS30"),
    IcmsMatcher::standard("ICMS40"),
    IcmsMatcher::standard("ICMS51"),
    IcmsMatcher::standard("ICMS60"),
    IcmsMatcher::standard("ICMS70"),
    IcmsMatcher::standard("ICMS90"),
    IcmsMatcher::standard("ICMSPart"),
    IcmsMatcher::standard("ICMSST"),
    IcmsMatcher::simplified("ICMSSN101"),
    IcmsMatcher::simplified("ICMSSN102"),
    IcmsMatcher::simplified("ICMSSN201"),
    IcmsMatcher::simplified("ICMSSN202"),
    IcmsMatcher::simplified("ICMSSN500"),
    IcmsMatcher::simplified("ICMSSN900"),
];

/// Resolve the ICMS block of an `imposto` element against [`ICMS_VARIANTS`].
/// Missing or unknown groups resolve to [`IcmsTax::None`].
pub fn match_icms(imposto: Option<&XmlNode>) -> IcmsTax {
    imposto
        .and_then(|i| i.child("ICMS"))
        .and_then(|icms| ICMS_VARIANTS.iter().find_map(|m| m.try_match(icms)))
        .unwrap_or(IcmsTax::None)
}

/// A document built from a tree, plus the soft data gaps met on the way.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub document: Document,
    /// Non-fatal findings (missing optional fields, unknown tax groups).
    pub gaps: Vec<ValidationError>,
}

/// Build a [`Document`] (header and lines) from a parsed tree.
///
/// Never fails: absent fields default to empty strings or zero. The
/// document gets `id`, and `pricing` from `config.default_pricing`;
/// discount and freight allocation are left to the caller.
pub fn extract_document(tree: &XmlNode, id: impl Into<String>, config: &IngestConfig) -> Extraction {
    let doc = document_root(tree);
    let (lines, gaps) = extract_line_items(doc);

    let access_key = raw_access_key(tree, doc)
        .map(|raw| raw.strip_prefix(config.access_key_prefix.as_str()).unwrap_or(raw))
        .filter(|k| k.len() == ACCESS_KEY_LEN && k.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string);

    let totals = doc.at("total/ICMSTot");
    let products_total = totals.map_or(Decimal::ZERO, |t| decimal_at(t, "vProd"));
    let discount_total = totals.map_or(Decimal::ZERO, |t| decimal_at(t, "vDesc"));
    let freight_total = totals.map_or(Decimal::ZERO, |t| decimal_at(t, "vFrete"));
    let net_total = totals
        .and_then(|t| parse_optional_decimal(t.text_at("vNF")))
        .unwrap_or_else(|| products_total.saturating_sub(discount_total));

    let document = Document {
        id: id.into(),
        access_key,
        number: doc.text_at("ide/nNF").and_then(parse_document_number),
        series: doc.text_at("ide/serie").map(str::to_string),
        issue_date: doc
            .text_at("ide/dhEmi")
            .or_else(|| doc.text_at("ide/dEmi"))
            .and_then(parse_issue_date),
        counterparty_name: doc.text_or_empty("emit/xNome"),
        counterparty_tax_id: doc
            .text_at("emit/CNPJ")
            .or_else(|| doc.text_at("emit/CPF"))
            .unwrap_or_default()
            .to_string(),
        declared_net_total: net_total,
        declared_products_total: products_total,
        declared_discount_total: discount_total,
        declared_freight_total: freight_total,
        declared_line_count: u32::try_from(lines.len()).unwrap_or(u32::MAX),
        pricing: config.default_pricing.clone(),
        hidden_items: BTreeSet::new(),
        show_only_hidden: false,
        lines,
    };

    Extraction { document, gaps }
}

/// Extract every `det` child of `infNFe`, one record per element.
pub fn extract_line_items(doc: &XmlNode) -> (Vec<LineItem>, Vec<ValidationError>) {
    let mut gaps = Vec::new();
    let lines = doc
        .children_named("det")
        .enumerate()
        .map(|(i, det)| {
            let position = u32::try_from(i + 1).unwrap_or(u32::MAX);
            let (line, line_gaps) = extract_line(det, position);
            gaps.extend(line_gaps);
            line
        })
        .collect();
    (lines, gaps)
}

/// Extract one `det` element. `position` is the 1-based index used when
/// `nItem` is absent or unreadable.
pub fn extract_line(det: &XmlNode, position: u32) -> (LineItem, Vec<ValidationError>) {
    let item_number = declared_item_number(det).unwrap_or(position);
    let field = |path: &str| format!("det[{item_number}]/{path}");

    let mut gaps = Vec::new();
    let mut line = LineItem::empty(item_number);

    let Some(prod) = det.child("prod") else {
        gaps.push(ValidationError::new(field("prod"), "product block is missing"));
        return (line, gaps);
    };

    line.code = prod.text_or_empty("cProd");
    line.description = prod.text_or_empty("xProd");
    line.ncm = prod.text_or_empty("NCM");
    line.cfop = prod.text_or_empty("CFOP");
    line.cest = prod.text_or_empty("CEST");
    line.unit = prod.text_or_empty("uCom");
    line.quantity = decimal_at(prod, "qCom").max(Decimal::ZERO);
    line.unit_price = decimal_at(prod, "vUnCom").max(Decimal::ZERO);
    line.total = decimal_at(prod, "vProd").max(Decimal::ZERO);
    line.discount = decimal_at(prod, "vDesc").max(Decimal::ZERO);
    line.barcode = prod
        .text_at("cEAN")
        .or_else(|| prod.text_at("cEANTrib"))
        .filter(|ean| !ean.eq_ignore_ascii_case("SEM GTIN"))
        .map(str::to_string);
    line.supplier_reference = match (prod.text_at("xPed"), prod.text_at("nItemPed")) {
        (Some(order), Some(item)) => Some(format!("{order}/{item}")),
        (Some(order), None) => Some(order.to_string()),
        _ => None,
    };
    line.additional_info = det.text_at("infAdProd").map(str::to_string);

    if line.code.is_empty() {
        gaps.push(ValidationError::new(field("prod/cProd"), "product code is missing"));
    }
    if line.description.is_empty() {
        gaps.push(ValidationError::new(
            field("prod/xProd"),
            "product description is missing",
        ));
    }

    let imposto = det.child("imposto");
    line.icms = match_icms(imposto);
    if line.icms == IcmsTax::None {
        if let Some(unknown) = imposto
            .and_then(|i| i.child("ICMS"))
            .and_then(|icms| icms.children.first())
        {
            gaps.push(ValidationError::new(
                field("imposto/ICMS"),
                format!("unknown ICMS group {}; tax values set to zero", unknown.name),
            ));
        }
    }
    line.ipi = extract_ipi(imposto);

    (line, gaps)
}

fn extract_ipi(imposto: Option<&XmlNode>) -> IpiTax {
    let Some(ipi) = imposto.and_then(|i| i.child("IPI")) else {
        return IpiTax::default();
    };
    if let Some(trib) = ipi.child("IPITrib") {
        return IpiTax {
            cst: trib.text_or_empty("CST"),
            amounts: TaxAmounts {
                base: decimal_at(trib, "vBC"),
                rate: decimal_at(trib, "pIPI"),
                value: decimal_at(trib, "vIPI"),
            },
        };
    }
    IpiTax {
        cst: ipi
            .child("IPINT")
            .map(|n| n.text_or_empty("CST"))
            .unwrap_or_default(),
        amounts: TaxAmounts::default(),
    }
}

fn decimal_at(node: &XmlNode, path: &str) -> Decimal {
    parse_locale_decimal(node.text_at(path))
}

fn first_decimal(node: &XmlNode, paths: &[&str]) -> Decimal {
    paths
        .iter()
        .find_map(|p| parse_optional_decimal(node.text_at(p)))
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfe::parse_tree;
    use rust_decimal_macros::dec;

    fn det(xml: &str) -> XmlNode {
        parse_tree(xml.as_bytes()).unwrap()
    }

    #[test]
    fn standard_icms_and_ipi() {
        let node = det(
            r#"<det nItem="3">
                <prod><cProd>A1</cProd><cEAN>7891234567895</cEAN><xProd>Parafuso</xProd>
                <NCM>73181500</NCM><CFOP>5102</CFOP><uCom>UN</uCom>
                <qCom>10.0000</qCom><vUnCom>2.5000000000</vUnCom><vProd>25.00</vProd>
                <xPed>PO-9</xPed><nItemPed>2</nItemPed></prod>
                <imposto>
                  <ICMS><ICMS00><orig>0</orig><CST>00</CST><vBC>25.00</vBC><pICMS>18.00</pICMS><vICMS>4.50</vICMS></ICMS00></ICMS>
                  <IPI><cEnq>999</cEnq><IPITrib><CST>50</CST><vBC>25.00</vBC><pIPI>5.00</pIPI><vIPI>1.25</vIPI></IPITrib></IPI>
                </imposto>
                <infAdProd>lote 42</infAdProd>
            </det>"#,
        );
        let (line, gaps) = extract_line(&node, 1);
        assert!(gaps.is_empty(), "{gaps:?}");
        assert_eq!(line.item_number, 3);
        assert_eq!(line.code, "A1");
        assert_eq!(line.quantity, dec!(10));
        assert_eq!(line.unit_price, dec!(2.5));
        assert_eq!(line.total, dec!(25));
        assert_eq!(line.barcode.as_deref(), Some("7891234567895"));
        assert_eq!(line.supplier_reference.as_deref(), Some("PO-9/2"));
        assert_eq!(line.additional_info.as_deref(), Some("lote 42"));
        assert_eq!(line.icms.group(), Some("ICMS00"));
        assert_eq!(line.icms.situation_code(), Some("00"));
        assert_eq!(line.icms.amounts().value, dec!(4.50));
        assert_eq!(line.ipi.cst, "50");
        assert_eq!(line.ipi.amounts.value, dec!(1.25));
    }

    #[test]
    fn simplified_regime_credit_fields() {
        let node = det(
            r#"<det nItem="1"><prod><cProd>X</cProd><xProd>Y</xProd><cEAN>SEM GTIN</cEAN></prod>
               <imposto><ICMS><ICMSSN101><orig>0</orig><CSOSN>101</CSOSN>
               <pCredSN>2.56</pCredSN><vCredICMSSN>0.64</vCredICMSSN></ICMSSN101></ICMS>
               <IPI><IPINT><CST>53</CST></IPINT></IPI></imposto></det>"#,
        );
        let (line, _) = extract_line(&node, 1);
        match &line.icms {
            IcmsTax::Simplified { csosn, amounts, .. } => {
                assert_eq!(csosn, "101");
                assert_eq!(amounts.rate, dec!(2.56));
                assert_eq!(amounts.value, dec!(0.64));
            }
            other => panic!("expected simplified regime, got {other:?}"),
        }
        assert_eq!(line.barcode, None);
        assert_eq!(line.ipi.cst, "53");
        assert!(line.ipi.amounts.value.is_zero());
    }

    #[test]
    fn priority_order_picks_first_listed_variant() {
        let icms = det(
            "<imposto><ICMS><ICMSSN102><CSOSN>102</CSOSN></ICMSSN102>\
             <ICMS60><CST>60</CST></ICMS60></ICMS></imposto>",
        );
        assert_eq!(match_icms(Some(&icms)).group(), Some("ICMS60"));
    }

    #[test]
    fn unknown_variant_is_soft_gap() {
        let node = det(
            "<det><prod><cProd>1</cProd><xProd>a</xProd></prod>\
             <imposto><ICMS><ICMS99><vICMS>3</vICMS></ICMS99></ICMS></imposto></det>",
        );
        let (line, gaps) = extract_line(&node, 4);
        assert_eq!(line.item_number, 4);
        assert_eq!(line.icms, IcmsTax::None);
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0].message.contains("ICMS99"));
    }

    #[test]
    fn empty_det_still_yields_record() {
        let node = det("<det nItem=\"x\"/>");
        let (line, gaps) = extract_line(&node, 2);
        assert_eq!(line.item_number, 2);
        assert_eq!(line.code, "");
        assert!(line.total.is_zero());
        assert_eq!(gaps.len(), 1);
    }

    #[test]
    fn negative_amounts_clamp_to_zero() {
        let node = det(
            "<det><prod><cProd>1</cProd><xProd>a</xProd>\
             <qCom>-2</qCom><vUnCom>-1</vUnCom><vProd>-2</vProd></prod></det>",
        );
        let (line, _) = extract_line(&node, 1);
        assert!(line.quantity.is_zero());
        assert!(line.unit_price.is_zero());
        assert!(line.total.is_zero());
    }
}
