//! # Annotation Data
//!
//! Owns the three inputs every estimator consumes and validates them once:
//!
//! - `x`: design matrix, `n × p`, shared across annotators.
//! - `y`: label matrix, `n × M`. Binary for the one-step estimator, categorical
//!   `0..=K` for the multinomial estimator. Entries that were not annotated are
//!   never read and may hold anything, including `NaN`.
//! - `a`: annotation indicator, `n × M`, entries in `{0, 1}`.
//!
//! Files are headerless tab-separated matrices, one row per example.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to read or write tab-separated data: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Could not parse value '{value}' at row {row}, column {column} of {file}.")]
    ParseError {
        file: String,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("Row {row} of {file} has {found} columns, expected {expected}.")]
    RaggedRows {
        file: String,
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("{0} contains no rows.")]
    Empty(String),
    #[error(
        "Shape mismatch: features have {x_rows} rows, labels are {y_rows}x{y_cols}, annotations are {a_rows}x{a_cols}."
    )]
    ShapeMismatch {
        x_rows: usize,
        y_rows: usize,
        y_cols: usize,
        a_rows: usize,
        a_cols: usize,
    },
    #[error("Non-finite value in the design matrix at row {row}, column {column}.")]
    NonFiniteFeature { row: usize, column: usize },
    #[error("Annotation indicator at row {row}, annotator {annotator} is {value}; expected 0 or 1.")]
    InvalidIndicator {
        row: usize,
        annotator: usize,
        value: f64,
    },
    #[error(
        "Label {value} at row {row}, annotator {annotator} is outside the allowed classes 0..={max_class}."
    )]
    InvalidLabel {
        row: usize,
        annotator: usize,
        value: f64,
        max_class: usize,
    },
}

/// Validated estimator input.
#[derive(Clone, Debug)]
pub struct AnnotationData {
    x: Array2<f64>,
    y: Array2<f64>,
    a: Array2<f64>,
}

impl AnnotationData {
    /// Validates shapes, finiteness of `x` and binarity of `a`.
    pub fn new(x: Array2<f64>, y: Array2<f64>, a: Array2<f64>) -> Result<Self, DataError> {
        if x.nrows() == 0 {
            return Err(DataError::Empty("design matrix".to_string()));
        }
        if y.nrows() != x.nrows() || a.dim() != y.dim() {
            return Err(DataError::ShapeMismatch {
                x_rows: x.nrows(),
                y_rows: y.nrows(),
                y_cols: y.ncols(),
                a_rows: a.nrows(),
                a_cols: a.ncols(),
            });
        }
        if let Some(((row, column), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(DataError::NonFiniteFeature { row, column });
        }
        if let Some(((row, annotator), &value)) =
            a.indexed_iter().find(|(_, v)| **v != 0.0 && **v != 1.0)
        {
            return Err(DataError::InvalidIndicator {
                row,
                annotator,
                value,
            });
        }
        Ok(Self { x, y, a })
    }

    /// Checks that every annotated label is an integer class in `0..=max_class`.
    pub fn require_classes(&self, max_class: usize) -> Result<(), DataError> {
        for ((row, annotator), &indicator) in self.a.indexed_iter() {
            if indicator == 0.0 {
                continue;
            }
            let value = self.y[[row, annotator]];
            let valid = value.is_finite()
                && value.fract() == 0.0
                && value >= 0.0
                && value <= max_class as f64;
            if !valid {
                return Err(DataError::InvalidLabel {
                    row,
                    annotator,
                    value,
                    max_class,
                });
            }
        }
        Ok(())
    }

    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f64> {
        self.y.view()
    }

    pub fn a(&self) -> ArrayView2<'_, f64> {
        self.a.view()
    }

    pub fn num_examples(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn num_annotators(&self) -> usize {
        self.y.ncols()
    }

    /// Number of examples each annotator labeled.
    pub fn annotation_counts(&self) -> Vec<usize> {
        self.a
            .axis_iter(Axis(1))
            .map(|column| column.iter().filter(|&&v| v == 1.0).count())
            .collect()
    }

    /// Labels with every unannotated entry replaced by zero.
    ///
    /// The estimators multiply by the indicator anyway; zeroing first keeps
    /// `NaN` placeholders from leaking through `0 · NaN`.
    pub fn masked_labels(&self) -> Array2<f64> {
        let mut y = self.y.clone();
        y.zip_mut_with(&self.a, |label, &indicator| {
            if indicator == 0.0 {
                *label = 0.0;
            }
        });
        y
    }

    /// Rows of `x` and labels of one annotator restricted to the examples it labeled.
    pub fn annotator_subset(&self, annotator: usize) -> (Array2<f64>, Vec<f64>) {
        let rows: Vec<usize> = self
            .a
            .column(annotator)
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == 1.0)
            .map(|(i, _)| i)
            .collect();
        let x = self.x.select(Axis(0), &rows);
        let labels = rows.iter().map(|&i| self.y[[i, annotator]]).collect();
        (x, labels)
    }

    /// Loads `features.tsv`, `labels.tsv` and `annotations.tsv` from a directory.
    pub fn load_dir(dir: &Path) -> Result<Self, DataError> {
        let x = read_matrix(&dir.join(FEATURES_FILE))?;
        let y = read_matrix(&dir.join(LABELS_FILE))?;
        let a = read_matrix(&dir.join(ANNOTATIONS_FILE))?;
        Self::new(x, y, a)
    }

    /// Writes the three matrices into `dir` using the file names `load_dir` expects.
    pub fn save_dir(&self, dir: &Path) -> Result<(), DataError> {
        std::fs::create_dir_all(dir)?;
        write_matrix(&dir.join(FEATURES_FILE), self.x.view())?;
        write_matrix(&dir.join(LABELS_FILE), self.y.view())?;
        write_matrix(&dir.join(ANNOTATIONS_FILE), self.a.view())?;
        Ok(())
    }
}

pub const FEATURES_FILE: &str = "features.tsv";
pub const LABELS_FILE: &str = "labels.tsv";
pub const ANNOTATIONS_FILE: &str = "annotations.tsv";

/// Reads a headerless tab-separated numeric matrix. `NaN` is accepted as a value.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>, DataError> {
    let file_name = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut values = Vec::new();
    let mut ncols = None;
    let mut nrows = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let expected = *ncols.get_or_insert(record.len());
        if record.len() != expected {
            return Err(DataError::RaggedRows {
                file: file_name,
                row,
                found: record.len(),
                expected,
            });
        }
        for (column, field) in record.iter().enumerate() {
            let value = field
                .trim()
                .parse::<f64>()
                .map_err(|_| DataError::ParseError {
                    file: file_name.clone(),
                    row,
                    column,
                    value: field.to_string(),
                })?;
            values.push(value);
        }
        nrows += 1;
    }

    let ncols = ncols.ok_or_else(|| DataError::Empty(file_name.clone()))?;
    Array2::from_shape_vec((nrows, ncols), values)
        .map_err(|e| DataError::IoError(std::io::Error::other(e.to_string())))
}

/// Writes a matrix as headerless tab-separated text.
pub fn write_matrix(path: &Path, matrix: ArrayView2<f64>) -> Result<(), DataError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;
    for row in matrix.rows() {
        writer.write_record(format_row(row))?;
    }
    writer.flush()?;
    Ok(())
}

fn format_row(row: ArrayView1<f64>) -> Vec<String> {
    row.iter()
        .map(|v| {
            if v.fract() == 0.0 && v.abs() < 1e15 {
                format!("{}", *v as i64)
            } else {
                format!("{v}")
            }
        })
        .collect()
}
