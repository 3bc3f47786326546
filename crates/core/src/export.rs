//! CSV export of a table or view.

use crate::frame::TypedFrame;
use crate::types::TimeZone;

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
pub const EXPORT_FILENAME: &str = "ontask_table.csv";

/// `Content-Disposition` value for a download.
pub fn content_disposition() -> String {
    format!("attachment; filename=\"{EXPORT_FILENAME}\"")
}

/// Header row of column names, then one line per row. Nulls are empty.
pub fn frame_to_csv(frame: &TypedFrame, tz: &TimeZone) -> String {
    let mut csv = frame
        .column_names()
        .iter()
        .map(|name| csv_escape(name))
        .collect::<Vec<_>>()
        .join(",");
    csv.push('\n');
    for row in frame.render_rows(tz) {
        csv.push_str(&row.iter().map(|v| csv_escape(v)).collect::<Vec<_>>().join(","));
        csv.push('\n');
    }
    csv
}

/// Quote a field containing a comma, quote or line break.
fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameColumn;
    use crate::types::utc;
    use crate::value::{DataType, Value};

    #[test]
    fn writes_header_and_rows() {
        let frame = TypedFrame::from_rows(
            vec![
                FrameColumn::new("sid", DataType::Integer),
                FrameColumn::new("note", DataType::String),
                FrameColumn::new("passed", DataType::Boolean),
            ],
            vec![
                vec![Some(Value::Integer(1)), Some(Value::String("a, \"b\"".into())), Some(Value::Boolean(true))],
                vec![Some(Value::Integer(2)), None, Some(Value::Boolean(false))],
            ],
        )
        .unwrap();
        assert_eq!(
            frame_to_csv(&frame, &utc()),
            "sid,note,passed\n1,\"a, \"\"b\"\"\",True\n2,,False\n"
        );
    }

    #[test]
    fn disposition_names_file() {
        assert_eq!(content_disposition(), "attachment; filename=\"ontask_table.csv\"");
    }
}
