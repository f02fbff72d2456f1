//! CSV loading: header-mapped columns into order lines and fulfillment records.

use std::path::Path;

use crate::config::{ColumnMapping, ReconConfig};
use crate::error::ReconError;
use crate::keys::is_placeholder;
use crate::model::{FulfillmentRecord, OrderLine, ReconInput, SourceType};

/// Header positions for one file.
struct Columns {
    customer: usize,
    po: usize,
    alt_po: Option<usize>,
    style: usize,
    pattern_id: Option<usize>,
    color: usize,
    size: usize,
    quantity: usize,
}

impl Columns {
    fn resolve(input: &str, headers: &csv::StringRecord, map: &ColumnMapping) -> Result<Self, ReconError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let required = |name: &str| {
            find(name).ok_or_else(|| ReconError::MissingColumn {
                input: input.into(),
                column: name.into(),
            })
        };

        Ok(Self {
            customer: required(map.customer.as_str())?,
            po: required(map.po.as_str())?,
            alt_po: find(map.alt_po.as_str()),
            style: required(map.style.as_str())?,
            pattern_id: find(map.pattern_id.as_str()),
            color: required(map.color.as_str())?,
            size: required(map.size.as_str())?,
            quantity: required(map.quantity.as_str())?,
        })
    }
}

/// Fields common to both record kinds, read from one CSV row.
struct RawRow {
    customer: String,
    po: String,
    alt_po: Option<String>,
    style: Option<String>,
    pattern_id: Option<String>,
    color: Option<String>,
    size: Option<String>,
    quantity: u64,
}

/// Blank and null-like cells become `None`.
fn optional(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    let value = record.get(idx?)?.trim();
    if is_placeholder(value) {
        None
    } else {
        Some(value.to_string())
    }
}

/// Whole units; "50" and "50.0" both parse. Blank is zero.
fn parse_quantity(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Some(0);
    }
    if let Ok(q) = value.parse::<u64>() {
        return Some(q);
    }
    let f: f64 = value.parse().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn read_rows(input: &str, csv_data: &str, map: &ColumnMapping) -> Result<Vec<RawRow>, ReconError> {
    let csv_err = |e: csv::Error| ReconError::Csv {
        input: input.into(),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers = reader.headers().map_err(csv_err)?.clone();
    let cols = Columns::resolve(input, &headers, map)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let qty_raw = record.get(cols.quantity).unwrap_or("");
        let quantity = parse_quantity(qty_raw).ok_or_else(|| ReconError::QuantityParse {
            input: input.into(),
            line,
            value: qty_raw.into(),
        })?;

        rows.push(RawRow {
            customer: record.get(cols.customer).unwrap_or("").trim().to_string(),
            po: record.get(cols.po).unwrap_or("").trim().to_string(),
            alt_po: optional(&record, cols.alt_po),
            style: optional(&record, Some(cols.style)),
            pattern_id: optional(&record, cols.pattern_id),
            color: optional(&record, Some(cols.color)),
            size: optional(&record, Some(cols.size)),
            quantity,
        });
    }

    Ok(rows)
}

/// Load order-book lines from CSV text. `input` names the file in errors.
pub fn load_orders(input: &str, csv_data: &str, map: &ColumnMapping) -> Result<Vec<OrderLine>, ReconError> {
    Ok(read_rows(input, csv_data, map)?
        .into_iter()
        .map(|r| OrderLine {
            customer: r.customer,
            po: r.po,
            alt_po: r.alt_po,
            style: r.style,
            pattern_id: r.pattern_id,
            color: r.color,
            size: r.size,
            quantity: r.quantity,
        })
        .collect())
}

/// Load packed or shipped records from CSV text, tagging each with `source`.
pub fn load_fulfillment(
    input: &str,
    csv_data: &str,
    source: SourceType,
    map: &ColumnMapping,
) -> Result<Vec<FulfillmentRecord>, ReconError> {
    Ok(read_rows(input, csv_data, map)?
        .into_iter()
        .map(|r| FulfillmentRecord {
            customer: r.customer,
            po: r.po,
            alt_po: r.alt_po,
            style: r.style,
            pattern_id: r.pattern_id,
            color: r.color,
            size: r.size,
            quantity: r.quantity,
            source,
        })
        .collect())
}

/// Read every file declared under `[inputs]`, resolving paths against `base_dir`.
pub fn load_input(config: &ReconConfig, base_dir: &Path) -> Result<ReconInput, ReconError> {
    let inputs = config
        .inputs
        .as_ref()
        .ok_or_else(|| ReconError::NoInputs(config.name.clone()))?;

    let read = |file: &str| {
        let path = base_dir.join(file);
        std::fs::read_to_string(&path)
            .map_err(|e| ReconError::Io(format!("cannot read {}: {e}", path.display())))
    };

    let orders = load_orders(&inputs.orders.file, &read(inputs.orders.file.as_str())?, &inputs.orders.columns)?;

    let mut fulfillment = Vec::new();
    for f in &inputs.fulfillment {
        fulfillment.extend(load_fulfillment(&f.file, &read(f.file.as_str())?, f.source, &f.columns)?);
    }

    Ok(ReconInput { orders, fulfillment })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = "\
customer,po,alt_po,style,pattern_id,color,size,quantity
ACME,123,NONE,A,,RED,M,50
ACME, 456 ,789,B,PAT-1,BLUE,L,12.0
BETA,999,,C,,GREEN,S,
";

    #[test]
    fn load_orders_basic() {
        let rows = load_orders("orders.csv", ORDERS, &ColumnMapping::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].po, "123");
        assert_eq!(rows[0].alt_po, None);
        assert_eq!(rows[0].pattern_id, None);
        assert_eq!(rows[0].quantity, 50);
        assert_eq!(rows[1].po, "456");
        assert_eq!(rows[1].alt_po.as_deref(), Some("789"));
        assert_eq!(rows[1].pattern_id.as_deref(), Some("PAT-1"));
        assert_eq!(rows[1].quantity, 12);
        assert_eq!(rows[2].quantity, 0);
    }

    #[test]
    fn load_fulfillment_with_mapping_and_missing_optionals() {
        let csv = "\
Customer,PO Number,Style,Color,Size,Shipped Qty
ACME,123,A,RED,M,50
";
        let map = ColumnMapping {
            customer: "Customer".into(),
            po: "PO Number".into(),
            style: "Style".into(),
            color: "Color".into(),
            size: "Size".into(),
            quantity: "Shipped Qty".into(),
            ..ColumnMapping::default()
        };
        let rows = load_fulfillment("shipped.csv", csv, SourceType::Shipped, &map).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, SourceType::Shipped);
        assert_eq!(rows[0].alt_po, None);
        assert_eq!(rows[0].quantity, 50);
    }

    #[test]
    fn missing_required_column() {
        let csv = "customer,po,style,color,quantity\nACME,1,A,RED,5\n";
        let err = load_orders("orders.csv", csv, &ColumnMapping::default()).unwrap_err();
        match err {
            ReconError::MissingColumn { input, column } => {
                assert_eq!(input, "orders.csv");
                assert_eq!(column, "size");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_quantity_names_line() {
        let csv = "customer,po,style,color,size,quantity\nACME,1,A,RED,M,5\nACME,2,A,RED,M,-3\n";
        let err = load_orders("orders.csv", csv, &ColumnMapping::default()).unwrap_err();
        assert_eq!(err.to_string(), "orders.csv, line 3: cannot parse quantity '-3'");

        let csv = "customer,po,style,color,size,quantity\nACME,1,A,RED,M,2.5\n";
        assert!(load_orders("orders.csv", csv, &ColumnMapping::default()).is_err());
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("50"), Some(50));
        assert_eq!(parse_quantity(" 50.0 "), Some(50));
        assert_eq!(parse_quantity(""), Some(0));
        assert_eq!(parse_quantity("abc"), None);
        assert_eq!(parse_quantity("-1"), None);
        assert_eq!(parse_quantity("NaN"), None);
    }

    #[test]
    fn load_input_requires_inputs_section() {
        let config = ReconConfig::default();
        let err = load_input(&config, Path::new(".")).unwrap_err();
        assert!(matches!(err, ReconError::NoInputs(_)));
    }
}
