//! The logical role vocabulary.
//!
//! Metrics never reference physical spreadsheet columns directly. They
//! reference one of these roles, and the semantic mapping layer binds each
//! role to at most one physical column per dataset. The vocabulary is
//! deliberately closed: adding a role is a code change, not a runtime event.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// LogicalRole
// ============================================================================

/// A canonical business meaning a physical column can carry.
///
/// Covers POS, DDT, invoice, e-commerce and generic ERP exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalRole {
    DocumentId,
    OrderId,
    LineId,
    RevenueAmount,
    Price,
    Cost,
    Quantity,
    TotalNet,
    DiscountPercent,
    DiscountAmount,
    ProductId,
    ProductName,
    Category,
    OrderDate,
    CustomerId,
    CustomerName,
    TaxAmount,
    TaxRate,
    PaymentMethod,
    Status,
    SupplierId,
    SupplierName,
    Warehouse,
    LineType,
    IsSellable,
    DocumentType,
    TimeSlot,
    SalesChannel,
    Staff,
}

/// Expected physical type of a role's bound column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleDataType {
    Text,
    Numeric,
    Integer,
    Date,
}

impl LogicalRole {
    /// All roles, in registry order.
    pub const ALL: [LogicalRole; 29] = [
        LogicalRole::DocumentId,
        LogicalRole::OrderId,
        LogicalRole::LineId,
        LogicalRole::RevenueAmount,
        LogicalRole::Price,
        LogicalRole::Cost,
        LogicalRole::Quantity,
        LogicalRole::TotalNet,
        LogicalRole::DiscountPercent,
        LogicalRole::DiscountAmount,
        LogicalRole::ProductId,
        LogicalRole::ProductName,
        LogicalRole::Category,
        LogicalRole::OrderDate,
        LogicalRole::CustomerId,
        LogicalRole::CustomerName,
        LogicalRole::TaxAmount,
        LogicalRole::TaxRate,
        LogicalRole::PaymentMethod,
        LogicalRole::Status,
        LogicalRole::SupplierId,
        LogicalRole::SupplierName,
        LogicalRole::Warehouse,
        LogicalRole::LineType,
        LogicalRole::IsSellable,
        LogicalRole::DocumentType,
        LogicalRole::TimeSlot,
        LogicalRole::SalesChannel,
        LogicalRole::Staff,
    ];

    /// Canonical snake_case name (the wire and storage form).
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalRole::DocumentId => "document_id",
            LogicalRole::OrderId => "order_id",
            LogicalRole::LineId => "line_id",
            LogicalRole::RevenueAmount => "revenue_amount",
            LogicalRole::Price => "price",
            LogicalRole::Cost => "cost",
            LogicalRole::Quantity => "quantity",
            LogicalRole::TotalNet => "total_net",
            LogicalRole::DiscountPercent => "discount_percent",
            LogicalRole::DiscountAmount => "discount_amount",
            LogicalRole::ProductId => "product_id",
            LogicalRole::ProductName => "product_name",
            LogicalRole::Category => "category",
            LogicalRole::OrderDate => "order_date",
            LogicalRole::CustomerId => "customer_id",
            LogicalRole::CustomerName => "customer_name",
            LogicalRole::TaxAmount => "tax_amount",
            LogicalRole::TaxRate => "tax_rate",
            LogicalRole::PaymentMethod => "payment_method",
            LogicalRole::Status => "status",
            LogicalRole::SupplierId => "supplier_id",
            LogicalRole::SupplierName => "supplier_name",
            LogicalRole::Warehouse => "warehouse",
            LogicalRole::LineType => "line_type",
            LogicalRole::IsSellable => "is_sellable",
            LogicalRole::DocumentType => "document_type",
            LogicalRole::TimeSlot => "time_slot",
            LogicalRole::SalesChannel => "sales_channel",
            LogicalRole::Staff => "staff",
        }
    }

    /// Parse the canonical name back into a role.
    pub fn parse(name: &str) -> Option<LogicalRole> {
        LogicalRole::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == name)
    }

    /// Physical type the bound column must have.
    pub fn data_type(&self) -> RoleDataType {
        match self {
            LogicalRole::RevenueAmount
            | LogicalRole::Price
            | LogicalRole::Cost
            | LogicalRole::Quantity
            | LogicalRole::TotalNet
            | LogicalRole::DiscountPercent
            | LogicalRole::DiscountAmount
            | LogicalRole::TaxAmount
            | LogicalRole::TaxRate => RoleDataType::Numeric,
            LogicalRole::OrderDate => RoleDataType::Date,
            // 0/1 flag column.
            LogicalRole::IsSellable => RoleDataType::Integer,
            _ => RoleDataType::Text,
        }
    }

    /// Roles the analytics gate requires a confirmed mapping for (or at
    /// least no pending one); mapping these wrong corrupts every metric.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            LogicalRole::RevenueAmount
                | LogicalRole::Price
                | LogicalRole::Cost
                | LogicalRole::Quantity
                | LogicalRole::OrderDate
                | LogicalRole::DocumentId
        )
    }

    /// Human-readable label.
    pub fn display_name(&self) -> &'static str {
        match self {
            LogicalRole::DocumentId => "Document ID",
            LogicalRole::OrderId => "Order ID",
            LogicalRole::LineId => "Line ID",
            LogicalRole::RevenueAmount => "Revenue Amount (Line Total)",
            LogicalRole::Price => "Selling Price",
            LogicalRole::Cost => "Unit Cost",
            LogicalRole::Quantity => "Quantity",
            LogicalRole::TotalNet => "Net Total",
            LogicalRole::DiscountPercent => "Discount %",
            LogicalRole::DiscountAmount => "Discount Amount",
            LogicalRole::ProductId => "Product ID",
            LogicalRole::ProductName => "Product Name",
            LogicalRole::Category => "Category",
            LogicalRole::OrderDate => "Order Date",
            LogicalRole::CustomerId => "Customer ID",
            LogicalRole::CustomerName => "Customer Name",
            LogicalRole::TaxAmount => "Tax Amount",
            LogicalRole::TaxRate => "Tax Rate",
            LogicalRole::PaymentMethod => "Payment Method",
            LogicalRole::Status => "Status",
            LogicalRole::SupplierId => "Supplier ID",
            LogicalRole::SupplierName => "Supplier Name",
            LogicalRole::Warehouse => "Warehouse",
            LogicalRole::LineType => "Line Type",
            LogicalRole::IsSellable => "Is Sellable Item",
            LogicalRole::DocumentType => "Document Type",
            LogicalRole::TimeSlot => "Time Slot",
            LogicalRole::SalesChannel => "Sales Channel",
            LogicalRole::Staff => "Staff/Operator",
        }
    }

    /// Interchangeable roles: a metric asking for one of these may be served
    /// by a column confirmed under the other.
    pub fn aliases(&self) -> &'static [LogicalRole] {
        match self {
            LogicalRole::DocumentId => &[LogicalRole::OrderId],
            LogicalRole::OrderId => &[LogicalRole::DocumentId],
            _ => &[],
        }
    }
}

impl fmt::Display for LogicalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Name-based auto-detection
// ============================================================================

/// A single role detection: matched the role's primary pattern (0.95) or a
/// secondary alias pattern (0.80).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleDetection {
    pub role: LogicalRole,
    pub confidence: f64,
}

/// Confidence granted by pattern position within a role's list.
pub mod detect_confidence {
    /// A fully-anchored canonical spelling matched.
    pub const PRIMARY: f64 = 0.95;
    /// A looser prefix alias matched.
    pub const SECONDARY: f64 = 0.80;
}

struct RolePatterns {
    role: LogicalRole,
    patterns: Vec<Regex>,
}

fn rx(p: &str) -> Regex {
    Regex::new(&format!("(?i){p}")).expect("role pattern must compile")
}

static ROLE_PATTERNS: Lazy<Vec<RolePatterns>> = Lazy::new(|| {
    use LogicalRole::*;
    let table: Vec<(LogicalRole, Vec<&str>)> = vec![
        (
            DocumentId,
            vec![
                r"^document_?id$",
                r"^order_?id$",
                r"^idddt",
                r"^id_?ddt",
                r"^doc_?id",
                r"^id_?documento",
                r"^numero_?doc",
                r"^invoice_?id",
                r"^fattura_?id",
                r"^id_?fattura",
                r"^receipt_?id",
                r"^scontrino",
                r"^id_?ordine",
                r"^transaction_?id",
                r"^numero_?ordine",
            ],
        ),
        (
            LineId,
            vec![
                r"^line_?id$",
                r"^id_?riga",
                r"^detail_?id",
                r"^idriga",
                r"^riga_?id",
                r"^row_?id",
            ],
        ),
        (
            RevenueAmount,
            vec![
                r"^revenue_?amount$",
                r"^prezzo_?finale",
                r"^prezzofinale",
                r"^importo_?riga",
                r"^line_?total",
                r"^totale_?riga",
                r"^importo_?fatturato",
                r"^net_?amount",
                r"^final_?price",
                r"^importo2",
                r"^total_?line",
                r"^row_?total",
                r"^amount",
            ],
        ),
        (
            Price,
            vec![
                r"^price$",
                r"^prezzo$",
                r"^unit_?price",
                r"^prezzo_?unitario",
                r"^selling_?price",
                r"^importo_?vendita",
                r"^pvp$",
                r"^listino",
            ],
        ),
        (
            Cost,
            vec![
                r"^cost$",
                r"^costo$",
                r"^cost_?amount",
                r"^costo_?amount",
                r"^unit_?cost",
                r"^costo_?unitario",
                r"^food_?cost",
                r"^costo_?acquisto",
                r"^costo_?produzione",
                r"^costoproduzione",
                r"^prezzo_?acquisto",
                r"^purchase_?price",
                r"^buy_?price",
                r"^costo_?materia",
                r"^raw_?cost",
            ],
        ),
        (
            Quantity,
            vec![
                r"^quantity$",
                r"^quantita",
                r"^qty",
                r"^qta",
                r"^numero_?pezzi",
                r"^pieces",
                r"^units",
                r"^pezzi",
            ],
        ),
        (
            TotalNet,
            vec![
                r"^total_?net",
                r"^totale_?netto",
                r"^net_?total",
                r"^importo_?totale",
                r"^importo$",
            ],
        ),
        (
            DiscountPercent,
            vec![
                r"^discount_?percent$",
                r"^sconto_?percent",
                r"^sconto_?perc",
                r"^discount_?pct",
                r"^perc_?sconto",
            ],
        ),
        (
            DiscountAmount,
            vec![
                r"^discount_?amount$",
                r"^sconto$",
                r"^discount$",
                r"^sconto_?importo",
                r"^importo_?sconto",
            ],
        ),
        (
            ProductId,
            vec![
                r"^product_?id$",
                r"^idprodotto",
                r"^id_?prodotto",
                r"^sku",
                r"^codice_?articolo",
                r"^item_?id",
                r"^cod_?art",
                r"^codart",
                r"^article_?id",
                r"^art_?id",
            ],
        ),
        (
            ProductName,
            vec![
                r"^product_?name$",
                r"^descrprod",
                r"^descr_?prod",
                r"^nome_?prodotto",
                r"^descrizione",
                r"^description",
                r"^articolo",
                r"^item_?name",
                r"^prodotto",
            ],
        ),
        (
            Category,
            vec![
                r"^category$",
                r"^categoria",
                r"^cat$",
                r"^product_?category",
                r"^tipologia",
                r"^tipo$",
                r"^type$",
                r"^famiglia",
                r"^group",
                r"^gruppo",
            ],
        ),
        (
            OrderDate,
            vec![
                r"^order_?date$",
                r"^data$",
                r"^date$",
                r"^data_?doc",
                r"^data_?ordine",
                r"^invoice_?date",
                r"^data_?fattura",
                r"^timestamp",
                r"^created_?at",
                r"^transaction_?date",
                r"^data_?documento",
            ],
        ),
        (
            CustomerId,
            vec![
                r"^customer_?id$",
                r"^idcliente",
                r"^id_?cliente",
                r"^client_?id",
                r"^cod_?cliente",
                r"^codcliente",
                r"^buyer_?id",
            ],
        ),
        (
            CustomerName,
            vec![
                r"^customer_?name$",
                r"^ragione_?sociale",
                r"^cliente",
                r"^nominativo",
                r"^client_?name",
                r"^buyer_?name",
                r"^intestatario",
            ],
        ),
        (
            TaxAmount,
            vec![
                r"^tax_?amount$",
                r"^iva$",
                r"^tax$",
                r"^vat$",
                r"^imposta",
                r"^importo_?iva",
                r"^vat_?amount",
            ],
        ),
        (
            TaxRate,
            vec![
                r"^tax_?rate$",
                r"^aliquota",
                r"^vat_?rate",
                r"^iva_?perc",
                r"^perc_?iva",
            ],
        ),
        (
            PaymentMethod,
            vec![
                r"^payment_?method$",
                r"^pagamento",
                r"^payment",
                r"^tipo_?pagamento",
                r"^modalita_?pagamento",
                r"^metodo_?pagamento",
            ],
        ),
        (
            Status,
            vec![
                r"^stato$",
                r"^status$",
                r"^state$",
                r"^order_?status",
                r"^doc_?status",
            ],
        ),
        (
            SupplierId,
            vec![
                r"^id_?fornitore",
                r"^idfornitore",
                r"^supplier_?id",
                r"^vendor_?id",
                r"^cod_?fornitore",
                r"^codfornitore",
            ],
        ),
        (
            SupplierName,
            vec![
                r"^fornitore",
                r"^supplier",
                r"^supplier_?name",
                r"^vendor",
                r"^vendor_?name",
                r"^ragione_?sociale_?fornitore",
            ],
        ),
        (
            Warehouse,
            vec![
                r"^magazzino",
                r"^warehouse",
                r"^deposito",
                r"^storage",
                r"^location",
            ],
        ),
        (
            LineType,
            vec![
                r"^tipo_?riga",
                r"^tiporiga",
                r"^line_?type",
                r"^row_?type",
                r"^tipo_?linea",
            ],
        ),
        (
            IsSellable,
            vec![
                r"^is_?sellable$",
                r"^vendibile",
                r"^sellable",
                r"^is_?product",
                r"^is_?item",
            ],
        ),
        (
            DocumentType,
            vec![
                r"^document_?type$",
                r"^tipo_?doc",
                r"^tipodoc",
                r"^doc_?type",
                r"^transaction_?type",
                r"^tipo_?transazione",
                r"^tipotransazione",
                r"^tipo_?movimento",
                r"^movement_?type",
            ],
        ),
        (
            TimeSlot,
            vec![
                r"^time_?slot$",
                r"^fascia_?oraria",
                r"^fasciaoraria",
                r"^timeslot",
                r"^turno",
                r"^shift",
                r"^servizio",
                r"^service_?period",
                r"^meal_?period",
            ],
        ),
        (
            SalesChannel,
            vec![
                r"^sales_?channel$",
                r"^canale",
                r"^channel",
                r"^modalita_?servizio",
                r"^service_?mode",
                r"^order_?type",
                r"^tipo_?ordine",
                r"^delivery_?type",
                r"^dine_?in",
                r"^takeaway",
                r"^asporto",
            ],
        ),
        (
            Staff,
            vec![
                r"^staff$",
                r"^waiter$",
                r"^cameriere",
                r"^operator$",
                r"^operatore",
                r"^employee$",
                r"^dipendente",
                r"^addetto",
                r"^cassiere",
                r"^cashier$",
            ],
        ),
    ];
    table
        .into_iter()
        .map(|(role, pats)| RolePatterns {
            role,
            patterns: pats.into_iter().map(rx).collect(),
        })
        .collect()
});

/// Detect the logical role a physical column name suggests, if any.
///
/// Fully-anchored patterns are the role's canonical spellings and score
/// higher than the looser prefix aliases that follow.
pub fn auto_detect_role(physical_name: &str) -> Option<RoleDetection> {
    let name = physical_name.trim().to_lowercase();
    for entry in ROLE_PATTERNS.iter() {
        for pattern in entry.patterns.iter() {
            if pattern.is_match(&name) {
                let confidence = if pattern.as_str().ends_with('$') {
                    detect_confidence::PRIMARY
                } else {
                    detect_confidence::SECONDARY
                };
                return Some(RoleDetection {
                    role: entry.role,
                    confidence,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for role in LogicalRole::ALL {
            assert_eq!(LogicalRole::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn critical_roles_are_the_metric_inputs() {
        assert!(LogicalRole::Price.is_critical());
        assert!(LogicalRole::OrderDate.is_critical());
        assert!(!LogicalRole::Warehouse.is_critical());
        assert!(!LogicalRole::Staff.is_critical());
    }

    #[test]
    fn primary_pattern_scores_higher_than_alias() {
        let exact = auto_detect_role("price").unwrap();
        assert_eq!(exact.role, LogicalRole::Price);
        assert_eq!(exact.confidence, detect_confidence::PRIMARY);

        let alias = auto_detect_role("prezzo_unitario").unwrap();
        assert_eq!(alias.role, LogicalRole::Price);
        assert_eq!(alias.confidence, detect_confidence::SECONDARY);
    }

    #[test]
    fn every_canonical_spelling_scores_primary() {
        for name in ["price", "prezzo", "pvp"] {
            let hit = auto_detect_role(name).unwrap();
            assert_eq!(hit.role, LogicalRole::Price, "{name}");
            assert_eq!(hit.confidence, detect_confidence::PRIMARY, "{name}");
        }
    }

    #[test]
    fn italian_names_resolve() {
        assert_eq!(
            auto_detect_role("qta").map(|d| d.role),
            Some(LogicalRole::Quantity)
        );
        assert_eq!(
            auto_detect_role("DataDocumento").map(|d| d.role),
            Some(LogicalRole::OrderDate)
        );
        assert_eq!(
            auto_detect_role("tipologia").map(|d| d.role),
            Some(LogicalRole::Category)
        );
    }

    #[test]
    fn unknown_names_detect_nothing() {
        assert!(auto_detect_role("colonna_misteriosa").is_none());
    }

    #[test]
    fn document_and_order_ids_alias_each_other() {
        assert_eq!(LogicalRole::DocumentId.aliases(), &[LogicalRole::OrderId]);
        assert_eq!(LogicalRole::OrderId.aliases(), &[LogicalRole::DocumentId]);
    }
}
