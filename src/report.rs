#![cfg(not(tarpaulin_include))]

use crate::models::ScanRecord;
use std::error::Error;

const HEADERS: [&str; 6] = [
    "Scan ID",
    "Event ID",
    "Event",
    "Guest ID",
    "Guest",
    "Scanned At",
];

fn row(scan: &ScanRecord) -> [String; 6] {
    [
        scan.id.clone(),
        scan.event_id.clone(),
        scan.event_name.clone(),
        scan.guest_id.clone(),
        scan.guest_name.clone(),
        scan.scanned_at.to_rfc3339(),
    ]
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Attendance log as CSV, one scan per line, oldest first.
///
/// # Examples
/// ```
/// use secura::report::to_csv;
///
/// let csv = to_csv(&[]);
/// assert!(csv.starts_with("Scan ID,"));
/// ```
pub fn to_csv(scans: &[ScanRecord]) -> String {
    let mut sorted: Vec<&ScanRecord> = scans.iter().collect();
    sorted.sort_by_key(|s| s.scanned_at);

    let mut csv_content = HEADERS.join(",");
    csv_content.push('\n');
    for scan in sorted {
        let line: Vec<String> = row(scan).iter().map(|v| escape_csv(v)).collect();
        csv_content.push_str(&line.join(","));
        csv_content.push('\n');
    }
    csv_content
}

/// Attendance log as an XLSX workbook.
#[cfg(feature = "web")]
pub fn to_xlsx(scans: &[ScanRecord]) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (c, header) in HEADERS.iter().enumerate() {
        worksheet.write_string(0, c as u16, *header)?;
    }

    let mut sorted: Vec<&ScanRecord> = scans.iter().collect();
    sorted.sort_by_key(|s| s.scanned_at);
    for (r, scan) in sorted.iter().enumerate() {
        for (c, value) in row(scan).iter().enumerate() {
            worksheet.write_string((r + 1) as u32, c as u16, value.as_str())?;
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

#[cfg(not(feature = "web"))]
pub fn to_xlsx(_scans: &[ScanRecord]) -> Result<Vec<u8>, Box<dyn Error>> {
    Err("XLSX export requires the 'web' feature".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn scan(id: &str, name: &str, hour: u32) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            event_id: "evt_1".to_string(),
            guest_id: format!("g_{id}"),
            guest_name: name.to_string(),
            event_name: "Gala".to_string(),
            scanned_at: Utc.with_ymd_and_hms(2026, 11, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn csv_is_time_ordered_and_escaped() {
        let csv = to_csv(&[scan("2", "Doe, Jane", 21), scan("1", "Ann", 19)]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].contains("\"Doe, Jane\""));
    }
}
