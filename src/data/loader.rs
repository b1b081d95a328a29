use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::info;

use crate::errors::AppError;
use crate::models::kline::{validate_klines, Kline};

const COLUMN_COUNT: usize = 6;

/// Load a `[time_ms, open, high, low, close, volume]` CSV file into a validated series.
/// A leading header row is detected and skipped.
pub fn load_klines_csv(path: &Path) -> Result<Vec<Kline>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::FileRead(format!("{}: {}", path.display(), e)))?;
    let klines = read_klines(BufReader::new(file))?;
    info!("Loaded {} klines from {}", klines.len(), path.display());
    Ok(klines)
}

/// Parse klines from any CSV reader. Rows are 1-based in errors, header included.
pub fn read_klines<R: Read>(reader: R) -> Result<Vec<Kline>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut klines = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let row = i + 1;
        if i == 0 && is_header(&record) {
            continue;
        }
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        klines.push(parse_record(&record, row)?);
    }

    validate_klines(&klines)?;
    Ok(klines)
}

fn is_header(record: &csv::StringRecord) -> bool {
    record
        .get(0)
        .map(|f| f.parse::<f64>().is_err())
        .unwrap_or(false)
}

fn parse_record(record: &csv::StringRecord, row: usize) -> Result<Kline, AppError> {
    if record.len() < COLUMN_COUNT {
        return Err(AppError::CsvParseError {
            row,
            message: format!("expected {} columns, found {}", COLUMN_COUNT, record.len()),
        });
    }

    let time = parse_time(&record[0]).ok_or_else(|| AppError::CsvParseError {
        row,
        message: format!("invalid timestamp '{}'", &record[0]),
    })?;

    let mut values = [0.0; COLUMN_COUNT - 1];
    for (slot, field) in values.iter_mut().zip(record.iter().skip(1)) {
        *slot = field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| AppError::CsvParseError {
                row,
                message: format!("invalid number '{}'", field),
            })?;
    }
    let [open, high, low, close, volume] = values;

    if high < low {
        return Err(AppError::CsvParseError {
            row,
            message: format!("high {} below low {}", high, low),
        });
    }

    Ok(Kline::new(time, open, high, low, close, volume))
}

/// Integer milliseconds, or a float export such as `1700000000000.0`.
fn parse_time(field: &str) -> Option<i64> {
    field.parse::<i64>().ok().or_else(|| {
        field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_with_header() {
        let data = "time,open,high,low,close,volume\n\
                    0,1.0,2.0,0.5,1.5,10\n\
                    60000,1.5,2.5,1.0,2.0,12\n";
        let klines = read_klines(data.as_bytes()).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1], Kline::new(60_000, 1.5, 2.5, 1.0, 2.0, 12.0));
    }

    #[test]
    fn test_read_without_header() {
        let data = "1700000000000.0,1,1,1,1,0\n1700000060000,1,1,1,1,0\n";
        let klines = read_klines(data.as_bytes()).unwrap();
        assert_eq!(klines[0].time, 1_700_000_000_000);
    }

    #[test]
    fn test_bad_number_reports_row() {
        let data = "time,open,high,low,close,volume\n0,1,1,1,1,1\n60000,1,x,1,1,1\n";
        match read_klines(data.as_bytes()) {
            Err(AppError::CsvParseError { row, message }) => {
                assert_eq!(row, 3);
                assert!(message.contains("'x'"));
            }
            other => panic!("Expected CsvParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_short_row_and_inverted_range() {
        assert!(matches!(
            read_klines("0,1,1,1,1\n".as_bytes()),
            Err(AppError::CsvParseError { row: 1, .. })
        ));
        assert!(matches!(
            read_klines("0,1,1,2,1,1\n".as_bytes()),
            Err(AppError::CsvParseError { row: 1, .. })
        ));
    }

    #[test]
    fn test_series_invariants_checked() {
        assert!(matches!(
            read_klines("time,open,high,low,close,volume\n".as_bytes()),
            Err(AppError::EmptyKlines)
        ));
        assert!(matches!(
            read_klines("60000,1,1,1,1,1\n0,1,1,1,1,1\n".as_bytes()),
            Err(AppError::NonMonotonicTime { index: 1, .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,open,high,low,close,volume").unwrap();
        writeln!(file, "0,10,11,9,10.5,100").unwrap();
        let klines = load_klines_csv(file.path()).unwrap();
        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].close, 10.5);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            load_klines_csv(&missing),
            Err(AppError::FileRead(_))
        ));
    }
}
