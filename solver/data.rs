//! CSV loading of dense designs and targets.

use csv::{ReaderBuilder, StringRecord};
use ndarray::Array2;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error reading CSV input: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The file '{0}' has no header row.")]
    MissingHeader(String),
    #[error("The file '{0}' contains no data rows.")]
    Empty(String),
    #[error("Row {row} has {found} fields, but the header declares {expected}.")]
    RowWidthMismatch {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Parsed values do not fit the table shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Value '{value}' in row {row}, column '{column}' is not a finite number.")]
    NotANumber {
        row: usize,
        column: String,
        value: String,
    },
}

/// A numeric table with its column names.
#[derive(Debug, Clone)]
pub struct NumericTable {
    pub headers: Vec<String>,
    /// Shape `(n_rows, n_columns)`.
    pub values: Array2<f64>,
}

/// Reads a comma-separated file with a header row into a dense matrix.
pub fn load_matrix(path: &Path) -> Result<NumericTable, DataError> {
    let display = path.display().to_string();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(DataError::MissingHeader(display));
    }

    let n_columns = headers.len();
    let mut flat = Vec::new();
    let mut n_rows = 0;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        // Row numbers in messages count the header as row 1.
        let row = n_rows + 2;
        if record.len() != n_columns {
            return Err(DataError::RowWidthMismatch {
                row,
                found: record.len(),
                expected: n_columns,
            });
        }
        for (field, column) in record.iter().zip(&headers) {
            match field.parse::<f64>() {
                Ok(value) if value.is_finite() => flat.push(value),
                _ => {
                    return Err(DataError::NotANumber {
                        row,
                        column: column.clone(),
                        value: field.to_string(),
                    });
                }
            }
        }
        n_rows += 1;
    }
    if n_rows == 0 {
        return Err(DataError::Empty(display));
    }

    let values = Array2::from_shape_vec((n_rows, n_columns), flat)?;
    Ok(NumericTable { headers, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_rows_in_order() {
        let file = write_csv("a,b\n1,2\n3, 4.5\n");
        let table = load_matrix(file.path()).unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.values, ndarray::array![[1.0, 2.0], [3.0, 4.5]]);
    }

    #[test]
    fn rejects_non_numeric_fields() {
        let file = write_csv("a,b\n1,x\n");
        match load_matrix(file.path()) {
            Err(DataError::NotANumber { row, column, value }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "b");
                assert_eq!(value, "x");
            }
            other => panic!("Expected NotANumber, got {:?}", other),
        }
    }

    #[test]
    fn rejects_ragged_rows() {
        let file = write_csv("a,b\n1,2\n3\n");
        assert!(matches!(
            load_matrix(file.path()),
            Err(DataError::RowWidthMismatch {
                row: 3,
                found: 1,
                expected: 2
            })
        ));
    }

    #[test]
    fn shape_errors_are_not_reported_as_empty_input() {
        let err = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0]).unwrap_err();
        let error = DataError::from(err);
        assert!(matches!(error, DataError::Shape(_)));
        assert!(error.to_string().starts_with("Parsed values do not fit"));
    }

    #[test]
    fn rejects_empty_files() {
        let file = write_csv("a,b\n");
        assert!(matches!(load_matrix(file.path()), Err(DataError::Empty(_))));
    }
}
