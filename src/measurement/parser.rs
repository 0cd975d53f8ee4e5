//! Comma-separated reading blobs to records.
//!
//! The instrument emits readings in acquisition order as one flat comma-separated list.
//! Parsing splits it, converts every token, and reshapes the values into fixed-arity
//! records without reordering anything.

use super::{MeasurementRecord, RecordShape};
use crate::error::{AppResult, SmuError};

/// Split `raw` into records of `fields_per_record` values each.
///
/// # Errors
/// `MalformedData` if the token count is not an exact multiple of `fields_per_record`, or
/// if any token is not a number (the message names the token).
pub fn parse_fields(raw: &str, fields_per_record: usize) -> AppResult<Vec<Vec<f64>>> {
    if fields_per_record == 0 {
        return Err(SmuError::MalformedData(
            "records must have at least one field".to_string(),
        ));
    }

    let tokens: Vec<&str> = raw.trim().split(',').collect();
    if tokens.len() % fields_per_record != 0 {
        return Err(SmuError::MalformedData(format!(
            "{} values cannot be split into records of {}",
            tokens.len(),
            fields_per_record
        )));
    }

    let values = tokens
        .iter()
        .map(|token| {
            let token = token.trim();
            token
                .parse::<f64>()
                .map_err(|_| SmuError::MalformedData(format!("'{}' is not a number", token)))
        })
        .collect::<AppResult<Vec<f64>>>()?;

    Ok(values
        .chunks_exact(fields_per_record)
        .map(<[f64]>::to_vec)
        .collect())
}

/// Parse `raw` into records laid out as `shape`, deriving resistance for each.
pub fn parse_records(raw: &str, shape: RecordShape) -> AppResult<Vec<MeasurementRecord>> {
    parse_fields(raw, shape.fields())?
        .iter()
        .map(|fields| MeasurementRecord::from_fields(fields, shape))
        .collect()
}

/// Parse a fetched burst and check it holds exactly `expected` records
/// (arm count × trigger count).
pub fn parse_burst(
    raw: &str,
    shape: RecordShape,
    expected: usize,
) -> AppResult<Vec<MeasurementRecord>> {
    let records = parse_records(raw, shape)?;
    if records.len() != expected {
        return Err(SmuError::MalformedData(format!(
            "expected {} records, got {}",
            expected,
            records.len()
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshapes_in_order() {
        let rows = parse_fields("1,2,3,4,5,6", 3).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn values_survive_parsing_unchanged() {
        let values: Vec<f64> = (0..20).map(|i| (i as f64) * 0.37 - 2.0).collect();
        for k in [1usize, 2, 4, 5] {
            let raw = values
                .iter()
                .map(|v| format!("{:e}", v))
                .collect::<Vec<_>>()
                .join(",");
            let rows = parse_fields(&raw, k).unwrap();
            assert_eq!(rows.len(), values.len() / k);
            assert_eq!(rows.concat(), values);
        }
    }

    #[test]
    fn uneven_blob_is_malformed() {
        let err = parse_fields("1.0,2.0,3.0", 5).unwrap_err();
        assert!(matches!(err, SmuError::MalformedData(_)));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn bad_token_is_named() {
        let err = parse_fields("1.0,abc,3.0", 3).unwrap_err();
        assert!(matches!(err, SmuError::MalformedData(_)));
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn empty_blob_is_malformed() {
        assert!(parse_fields("", 1).is_err());
        assert!(parse_fields("", 3).is_err());
        assert!(parse_fields("1,2", 0).is_err());
    }

    #[test]
    fn accepts_instrument_number_format() {
        let records = parse_records(
            "+1.000000E-01,+1.000000E-07,+9.910000E+37,+1.234500E+00,+0.000000E+00",
            RecordShape::Full,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].voltage(), 0.1);
        assert_eq!(records[0].resistance(), 0.1 / 1e-7);
        assert_eq!(records[0].timestamp(), 1.2345);
    }

    #[test]
    fn zero_current_is_surfaced_not_rejected() {
        let records = parse_records("0.5,0.0,1.0", RecordShape::Reduced).unwrap();
        assert!(!records[0].resistance().is_finite());
    }

    #[test]
    fn burst_count_checked() {
        let raw = "1,1,0,2,1,1,3,1,2";
        assert_eq!(parse_burst(raw, RecordShape::Reduced, 3).unwrap().len(), 3);
        assert!(matches!(
            parse_burst(raw, RecordShape::Reduced, 1),
            Err(SmuError::MalformedData(_))
        ));
    }
}
