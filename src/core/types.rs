use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An ingested fiscal document (NF-e header) and the line items it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Internal identifier; unique in the store.
    pub id: String,
    /// 44-digit access key (chave de acesso). Immutable once set; the sole
    /// deduplication key. `None` when the input carried no usable key.
    pub access_key: Option<String>,
    /// `ide/nNF`: document number.
    pub number: Option<u64>,
    /// `ide/serie`: series.
    pub series: Option<String>,
    /// `ide/dhEmi` (or `ide/dEmi` in older layouts): issue date.
    pub issue_date: Option<NaiveDate>,
    /// `emit/xNome`: issuer (supplier) name.
    pub counterparty_name: String,
    /// `emit/CNPJ` or `emit/CPF`: issuer tax id, digits only.
    pub counterparty_tax_id: String,
    /// `total/ICMSTot/vNF`: declared document total.
    pub declared_net_total: Decimal,
    /// `total/ICMSTot/vProd`: declared sum of product values.
    pub declared_products_total: Decimal,
    /// `total/ICMSTot/vDesc`: declared document discount.
    pub declared_discount_total: Decimal,
    /// `total/ICMSTot/vFrete`: declared document freight.
    pub declared_freight_total: Decimal,
    /// Number of `det` elements in the source document.
    pub declared_line_count: u32,
    /// Business settings used by pricing; unrelated to fiscal content.
    pub pricing: PricingConfig,
    /// UI bookkeeping: item numbers hidden from the default view.
    pub hidden_items: BTreeSet<u32>,
    /// UI bookkeeping: show only the hidden items.
    pub show_only_hidden: bool,
    /// Line items, in document order.
    pub lines: Vec<LineItem>,
}

impl Document {
    /// Short description used in duplicate prompts and change events.
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            access_key: self.access_key.clone(),
            number: self.number,
            counterparty: self.counterparty_name.clone(),
            value: self.declared_net_total,
        }
    }

    /// Sum of line totals before discount.
    pub fn gross_lines_total(&self) -> Decimal {
        self.lines.iter().map(|l| l.total).sum()
    }

    /// Sum of allocated discounts across all lines.
    pub fn allocated_discount_total(&self) -> Decimal {
        self.lines.iter().map(|l| l.allocated_discount).sum()
    }

    /// The user-maintained part of the header.
    pub fn settings(&self) -> DocumentSettings {
        DocumentSettings {
            pricing: self.pricing.clone(),
            hidden_items: self.hidden_items.clone(),
            show_only_hidden: self.show_only_hidden,
        }
    }

    /// Replace the user-maintained part of the header.
    pub fn apply_settings(&mut self, settings: DocumentSettings) {
        self.pricing = settings.pricing;
        self.hidden_items = settings.hidden_items;
        self.show_only_hidden = settings.show_only_hidden;
    }
}

/// Header fields edited by the user rather than read from the document:
/// pricing and the hidden-line bookkeeping. Re-ingesting a stored document
/// carries them over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSettings {
    pub pricing: PricingConfig,
    pub hidden_items: BTreeSet<u32>,
    pub show_only_hidden: bool,
}

/// Identifying fields of a document, as shown to a user deciding on a
/// duplicate or as carried by a change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    pub number: Option<u64>,
    pub counterparty: String,
    pub value: Decimal,
}

/// Mutable pricing settings attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Entry tax rate in percent, applied on top of net cost.
    pub entry_tax_rate: Decimal,
    /// Retail markup in percent.
    pub retail_markup: Decimal,
    /// Wholesale markup in percent.
    pub wholesale_markup: Decimal,
    /// How computed sale prices are rounded.
    pub rounding: RoundingPolicy,
    /// Freight value to distribute across lines (0 = none).
    pub freight: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            entry_tax_rate: Decimal::ZERO,
            retail_markup: Decimal::ZERO,
            wholesale_markup: Decimal::ZERO,
            rounding: RoundingPolicy::Exact,
            freight: Decimal::ZERO,
        }
    }
}

/// Rounding applied to computed sale prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingPolicy {
    /// No rounding beyond cents.
    #[default]
    Exact,
    /// Round up to the next whole unit.
    Up,
    /// Round down to the whole unit.
    Down,
    /// Round half-up to the nearest whole unit.
    Nearest,
}

impl RoundingPolicy {
    /// Storage code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Up => "up",
            Self::Down => "down",
            Self::Nearest => "nearest",
        }
    }

    /// Parse from storage code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "exact" => Some(Self::Exact),
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "nearest" => Some(Self::Nearest),
            _ => None,
        }
    }
}

/// One `det` entry of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// `det@nItem`; falls back to the 1-based position.
    pub item_number: u32,
    /// `prod/cProd`.
    pub code: String,
    /// `prod/xProd`.
    pub description: String,
    /// `prod/NCM`: goods classification.
    pub ncm: String,
    /// `prod/CFOP`: operation classification.
    pub cfop: String,
    /// `prod/CEST`.
    pub cest: String,
    /// `prod/uCom`.
    pub unit: String,
    /// `prod/qCom`.
    pub quantity: Decimal,
    /// `prod/vUnCom`.
    pub unit_price: Decimal,
    /// `prod/vProd`.
    pub total: Decimal,
    /// `prod/vDesc`: discount declared on the line itself.
    pub discount: Decimal,
    /// Share of the document-level discount, set by the allocator.
    pub allocated_discount: Decimal,
    /// ICMS block, whichever variant the line carried.
    pub icms: IcmsTax,
    /// IPI block.
    pub ipi: IpiTax,
    /// `prod/cEAN` (empty and "SEM GTIN" normalise to `None`).
    pub barcode: Option<String>,
    /// `prod/xPed` / `prod/nItemPed`: supplier order reference.
    pub supplier_reference: Option<String>,
    /// Brand, filled in by enrichment outside the document.
    pub brand: Option<String>,
    /// Image reference, filled in by enrichment outside the document.
    pub image_ref: Option<String>,
    /// `infAdProd`: free-text supplementary description.
    pub additional_info: Option<String>,
    /// Extra cost, computed by an allocator external to this crate.
    pub extra_cost: Decimal,
    /// Share of the configured freight, set by the allocator.
    pub freight_share: Decimal,
}

impl LineItem {
    /// An empty line with the given item number; every field defaulted.
    pub fn empty(item_number: u32) -> Self {
        Self {
            item_number,
            code: String::new(),
            description: String::new(),
            ncm: String::new(),
            cfop: String::new(),
            cest: String::new(),
            unit: String::new(),
            quantity: Decimal::ZERO,
            unit_price: Decimal::ZERO,
            total: Decimal::ZERO,
            discount: Decimal::ZERO,
            allocated_discount: Decimal::ZERO,
            icms: IcmsTax::None,
            ipi: IpiTax::default(),
            barcode: None,
            supplier_reference: None,
            brand: None,
            image_ref: None,
            additional_info: None,
            extra_cost: Decimal::ZERO,
            freight_share: Decimal::ZERO,
        }
    }

    /// Line total after its allocated discount.
    pub fn net_cost(&self) -> Decimal {
        self.total - self.allocated_discount
    }
}

/// Base/rate/value triple shared by every tax block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxAmounts {
    /// `vBC`: taxable base.
    pub base: Decimal,
    /// `pICMS` / `pIPI`: rate in percent.
    pub rate: Decimal,
    /// `vICMS` / `vIPI`: tax value.
    pub value: Decimal,
}

/// The ICMS block of a line, by tax regime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "regime", rename_all = "snake_case")]
pub enum IcmsTax {
    /// Standard regime (`ICMS00`..`ICMS90`, `ICMSPart`, `ICMSST`).
    Standard {
        /// Group the values came from, e.g. "ICMS00".
        group: String,
        /// `orig`: goods origin.
        origin: String,
        /// `CST`: tax situation code.
        cst: String,
        amounts: TaxAmounts,
    },
    /// Simplified regime for small businesses (`ICMSSN*`).
    Simplified {
        /// Group the values came from, e.g. "ICMSSN102".
        group: String,
        /// `orig`: goods origin.
        origin: String,
        /// `CSOSN`: simplified-regime situation code.
        csosn: String,
        amounts: TaxAmounts,
    },
    /// No known ICMS group was present; all amounts are zero.
    None,
}

impl IcmsTax {
    /// Tax amounts of whichever variant is present (zero for `None`).
    pub fn amounts(&self) -> TaxAmounts {
        match self {
            Self::Standard { amounts, .. } | Self::Simplified { amounts, .. } => *amounts,
            Self::None => TaxAmounts::default(),
        }
    }

    /// Source group name, if any.
    pub fn group(&self) -> Option<&str> {
        match self {
            Self::Standard { group, .. } | Self::Simplified { group, .. } => Some(group),
            Self::None => None,
        }
    }

    /// CST or CSOSN code, whichever applies.
    pub fn situation_code(&self) -> Option<&str> {
        match self {
            Self::Standard { cst, .. } => Some(cst),
            Self::Simplified { csosn, .. } => Some(csosn),
            Self::None => None,
        }
    }
}

/// The IPI block of a line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpiTax {
    /// `CST` of `IPITrib` or `IPINT`; empty when absent.
    pub cst: String,
    pub amounts: TaxAmounts,
}

/// `ide/tpAmb`: the environment a document was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// `1`: production, legally valid.
    Production,
    /// `2`: homologation (test), no fiscal value.
    Homologation,
}

impl Environment {
    /// `tpAmb` code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Production => 1,
            Self::Homologation => 2,
        }
    }

    /// Parse from `tpAmb` code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::Production),
            "2" => Some(Self::Homologation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounding_policy_codes() {
        for p in [
            RoundingPolicy::Exact,
            RoundingPolicy::Up,
            RoundingPolicy::Down,
            RoundingPolicy::Nearest,
        ] {
            assert_eq!(RoundingPolicy::from_code(p.code()), Some(p));
        }
        assert_eq!(RoundingPolicy::from_code("sideways"), None);
    }

    #[test]
    fn icms_none_has_zero_amounts() {
        assert_eq!(IcmsTax::None.amounts(), TaxAmounts::default());
        assert_eq!(IcmsTax::None.group(), None);
    }

    #[test]
    fn icms_serializes_tagged() {
        let icms = IcmsTax::Simplified {
            group: "ICMSSN102".into(),
            origin: "0".into(),
            csosn: "102".into(),
            amounts: TaxAmounts::default(),
        };
        let json = serde_json::to_value(&icms).unwrap();
        assert_eq!(json["regime"], "simplified");
        assert_eq!(json["csosn"], "102");
    }

    #[test]
    fn net_cost_subtracts_allocated_discount() {
        let mut line = LineItem::empty(1);
        line.total = dec!(100);
        line.allocated_discount = dec!(12.5);
        assert_eq!(line.net_cost(), dec!(87.5));
    }
}
