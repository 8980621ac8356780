//! Chunks and backend-neutral column access.
//!
//! Rules, trackers and profilers read values through [`ColumnAccessor`] and
//! never touch a concrete array type. [`ArrowColumn`] is the Arrow backend:
//! it casts the underlying array to Utf8 or Float64 the first time a view is
//! requested and reuses the cast for the rest of the chunk.
use arrow::{compute, datatypes::DataType};
use arrow_array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray};
use once_cell::unsync::OnceCell;

use crate::errors::CoreError;

/// A bounded batch of rows plus the stream position of its first row.
#[derive(Debug, Clone)]
pub struct Chunk {
    batch: RecordBatch,
    offset: u64,
}

impl Chunk {
    pub fn new(batch: RecordBatch, offset: u64) -> Self {
        Self { batch, offset }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Stream-wide row number of the first row.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// The returned column borrows its name from the batch schema.
    pub fn column(&self, name: &str) -> Result<ArrowColumn<'_>, CoreError> {
        let schema = self.batch.schema_ref();
        match schema.index_of(name) {
            Ok(index) => Ok(ArrowColumn::new(
                schema.field(index).name(),
                self.batch.column(index),
            )),
            Err(_) => Err(CoreError::ColumnNotFound {
                column: name.to_string(),
                available: self.column_names(),
            }),
        }
    }

    /// All requested columns, failing on the first missing one.
    pub fn columns(&self, names: &[String]) -> Result<Vec<ArrowColumn<'_>>, CoreError> {
        names.iter().map(|name| self.column(name)).collect()
    }
}

/// Capability interface every column backend provides.
pub trait ColumnAccessor {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_null(&self, row: usize) -> bool;

    fn null_count(&self) -> usize;

    /// Values rendered as text. Nulls stay null.
    fn text_view(&self) -> Result<&StringArray, CoreError>;

    /// Values cast to `f64`. Nulls and unparseable values become null.
    fn numeric_view(&self) -> Result<&Float64Array, CoreError>;

    fn value_as_str(&self, row: usize) -> Option<&str> {
        let view = self.text_view().ok()?;
        (row < view.len() && view.is_valid(row)).then(|| view.value(row))
    }

    fn value_as_string(&self, row: usize) -> Option<String> {
        self.value_as_str(row).map(str::to_string)
    }

    fn value_as_f64(&self, row: usize) -> Option<f64> {
        let view = self.numeric_view().ok()?;
        (row < view.len() && view.is_valid(row)).then(|| view.value(row))
    }

    /// Non-null values that could not be read as numbers.
    fn non_numeric_count(&self) -> Result<usize, CoreError> {
        Ok(self
            .numeric_view()?
            .null_count()
            .saturating_sub(self.null_count()))
    }
}

pub struct ArrowColumn<'a> {
    name: &'a str,
    array: &'a ArrayRef,
    text: OnceCell<ArrayRef>,
    numeric: OnceCell<ArrayRef>,
}

impl<'a> ArrowColumn<'a> {
    pub fn new(name: &'a str, array: &'a ArrayRef) -> Self {
        Self {
            name,
            array,
            text: OnceCell::new(),
            numeric: OnceCell::new(),
        }
    }

    pub fn array(&self) -> &ArrayRef {
        self.array
    }

    fn cast_once<'c>(
        &self,
        cell: &'c OnceCell<ArrayRef>,
        to: &DataType,
    ) -> Result<&'c ArrayRef, CoreError> {
        cell.get_or_try_init(|| {
            if self.array.data_type() == to {
                Ok(self.array.clone())
            } else {
                compute::cast(self.array.as_ref(), to).map_err(CoreError::from)
            }
        })
    }
}

impl ColumnAccessor for ArrowColumn<'_> {
    fn name(&self) -> &str {
        self.name
    }

    fn len(&self) -> usize {
        self.array.len()
    }

    fn is_null(&self, row: usize) -> bool {
        self.array.is_null(row)
    }

    fn null_count(&self) -> usize {
        self.array.null_count()
    }

    fn text_view(&self) -> Result<&StringArray, CoreError> {
        self.cast_once(&self.text, &DataType::Utf8)?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| CoreError::Data(format!("column '{}' has no text view", self.name)))
    }

    fn numeric_view(&self) -> Result<&Float64Array, CoreError> {
        self.cast_once(&self.numeric, &DataType::Float64)?
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| {
                CoreError::Data(format!("column '{}' has no numeric view", self.name))
            })
    }
}
