use std::path::Path;

use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;
use voltwatch_core::{date_column, float_column, Frame};

use crate::error::{IngestError, IngestResult};
use crate::{typed_column, ImportOptions};

/// Per-column accumulator across record batches.
enum Pending {
    Raw(Vec<Option<String>>),
    Floats(Vec<Option<f64>>),
    Dates(Vec<Option<NaiveDate>>),
}

pub struct ParquetImporter;

impl ParquetImporter {
    pub fn import(path: &Path, opts: &ImportOptions) -> IngestResult<Frame> {
        let file = std::fs::File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| IngestError::Parquet(e.to_string()))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| IngestError::Parquet(e.to_string()))?;

        let names: Vec<String> = schema.fields().iter().map(|f| f.name().trim().to_string()).collect();
        let mut pending: Vec<Pending> = schema
            .fields()
            .iter()
            .zip(&names)
            .map(|(field, name)| initial(name, field.data_type(), opts))
            .collect();

        for batch_result in reader {
            let batch = batch_result.map_err(|e| IngestError::Parquet(e.to_string()))?;
            for (i, slot) in pending.iter_mut().enumerate() {
                append(slot, batch.column(i))?;
            }
        }

        let columns = names
            .iter()
            .zip(pending)
            .map(|(name, slot)| match slot {
                Pending::Raw(cells) => typed_column(name, cells, opts),
                Pending::Floats(v) => Ok(float_column(name, v)),
                Pending::Dates(v) => Ok(date_column(name, &v)?),
            })
            .collect::<IngestResult<Vec<_>>>()?;
        let frame = Frame::from_columns(columns)?;

        info!(
            rows = frame.rows(),
            columns = frame.width(),
            "Imported {}",
            path.display()
        );
        Ok(frame)
    }
}

fn initial(name: &str, data_type: &DataType, opts: &ImportOptions) -> Pending {
    let is_temporal = matches!(
        data_type,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _)
    );
    if name == opts.timestamp_column && is_temporal {
        Pending::Dates(Vec::new())
    } else if name != opts.entity_column && data_type.is_numeric() {
        Pending::Floats(Vec::new())
    } else {
        Pending::Raw(Vec::new())
    }
}

fn append(slot: &mut Pending, array: &ArrayRef) -> IngestResult<()> {
    let arrow_err = |e: arrow::error::ArrowError| IngestError::Parquet(e.to_string());
    match slot {
        Pending::Floats(out) => {
            let casted = cast(array.as_ref(), &DataType::Float64).map_err(arrow_err)?;
            let arr = downcast::<Float64Array>(&casted)?;
            out.extend((0..arr.len()).map(|i| {
                (!arr.is_null(i)).then(|| arr.value(i)).filter(|v| v.is_finite())
            }));
        }
        Pending::Dates(out) => {
            let casted = cast(array.as_ref(), &DataType::Date32).map_err(arrow_err)?;
            let arr = downcast::<Date32Array>(&casted)?;
            out.extend((0..arr.len()).map(|i| if arr.is_null(i) { None } else { arr.value_as_date(i) }));
        }
        Pending::Raw(out) => {
            let casted = cast(array.as_ref(), &DataType::Utf8).map_err(arrow_err)?;
            let arr = downcast::<StringArray>(&casted)?;
            out.extend((0..arr.len()).map(|i| (!arr.is_null(i)).then(|| arr.value(i).to_string())));
        }
    }
    Ok(())
}

fn downcast<T: 'static>(array: &ArrayRef) -> IngestResult<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| IngestError::Parquet(format!("unexpected array type {}", array.data_type())))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    use super::*;

    fn write_sample(path: &Path) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("Sehir", DataType::Utf8, true),
            Field::new("Donem", DataType::Utf8, true),
            Field::new("Genel_Toplam_MWh", DataType::Float64, true),
            Field::new("nufus", DataType::Int64, true),
            Field::new("sicaklik", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![Some("ANKARA"), Some("IZMIR")])),
                Arc::new(StringArray::from(vec![Some("2023-01"), Some("2023-02-01")])),
                Arc::new(Float64Array::from(vec![Some(10.5), None])),
                Arc::new(Int64Array::from(vec![Some(5_000_000), Some(4_400_000)])),
                Arc::new(StringArray::from(vec![Some("3.5"), Some("None")])),
            ],
        )
        .unwrap();
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn imports_mixed_types() {
        let dir = std::env::temp_dir().join(format!("voltwatch-parquet-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("energy.parquet");
        write_sample(&path);

        let frame = ParquetImporter::import(&path, &ImportOptions::default()).unwrap();
        assert_eq!(frame.shape(), (2, 5));
        assert_eq!(frame.floats("Genel_Toplam_MWh", "test").unwrap(), &[Some(10.5), None]);
        assert_eq!(
            frame.floats("nufus", "test").unwrap(),
            &[Some(5_000_000.0), Some(4_400_000.0)]
        );
        // numeric strings are inferred, "None" is missing
        assert_eq!(frame.floats("sicaklik", "test").unwrap(), &[Some(3.5), None]);
        assert_eq!(
            frame.dates("Donem", "test").unwrap()[1],
            NaiveDate::from_ymd_opt(2023, 2, 1)
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
