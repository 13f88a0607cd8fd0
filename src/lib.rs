//! # nfe-ingest
//!
//! Ingestion pipeline for Brazilian electronic fiscal invoices (NF-e):
//! structural validation, line-item extraction, proportional discount and
//! freight allocation, duplicate detection with a confirm/replace protocol,
//! transactional persistence and post-commit fan-out.
//!
//! All monetary values use [`rust_decimal::Decimal`], never floating point.
//!
//! ## Quick Start
//!
//! ```rust
//! use nfe_ingest::config::IngestConfig;
//! use nfe_ingest::core::allocate_discount;
//! use nfe_ingest::nfe;
//! use rust_decimal_macros::dec;
//!
//! let xml = br#"<NFe><infNFe versao="4.00">
//!     <ide><nNF>10</nNF></ide>
//!     <emit><CNPJ>12345678000195</CNPJ><xNome>Fornecedor Ltda</xNome></emit>
//!     <det nItem="1"><prod><cProd>1</cProd><xProd>Caixa</xProd><vProd>11111.31</vProd></prod></det>
//!     <total><ICMSTot><vNF>9305.70</vNF></ICMSTot></total>
//! </infNFe></NFe>"#;
//!
//! let config = IngestConfig::default();
//! let tree = nfe::parse_tree(xml).unwrap();
//! assert!(nfe::validate_structure(&tree, &config).is_valid);
//!
//! let mut doc = nfe::extract_document(&tree, "doc-1", &config).document;
//! allocate_discount(&mut doc.lines, doc.declared_net_total);
//! assert_eq!(doc.lines[0].allocated_discount, dec!(1805.61));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Domain types, numeric parsing, allocation, NF-e validation & extraction |
//! | `store` | SQLite persistence, duplicate resolution, post-commit hooks, pipeline |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod config;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "core")]
pub mod nfe;

#[cfg(feature = "store")]
pub mod store;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
