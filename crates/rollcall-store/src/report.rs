//! Attendance reporting queries.

use crate::{parse_date, parse_time, SqliteStore, StoreError, DATE_FORMAT};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::ToSql;
use serde::Serialize;

/// Optional filters; empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    /// Case-insensitive substring of the student's name.
    pub name: Option<String>,
    /// Case-insensitive substring of the department.
    pub department: Option<String>,
    /// Exact date, `YYYY-MM-DD`.
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRow {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub email: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SqliteStore {
    /// Every mark for `date`, most recent first.
    pub fn attendance_log(&self, date: NaiveDate) -> Result<Vec<AttendanceRow>, StoreError> {
        self.report(&ReportFilter {
            date: Some(date.format(DATE_FORMAT).to_string()),
            ..ReportFilter::default()
        })
    }

    /// Filtered attendance, newest date first and newest time first within a date.
    pub fn report(&self, filter: &ReportFilter) -> Result<Vec<AttendanceRow>, StoreError> {
        let mut sql = String::from(
            "SELECT s.student_id, s.name, s.department, s.email, a.date, a.time
             FROM students s
             JOIN attendance a ON s.student_id = a.student_id
             WHERE 1=1",
        );
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(name) = non_empty(&filter.name) {
            args.push(Box::new(name.to_string()));
            sql.push_str(&format!(" AND s.name LIKE '%' || ?{} || '%'", args.len()));
        }
        if let Some(department) = non_empty(&filter.department) {
            args.push(Box::new(department.to_string()));
            sql.push_str(&format!(
                " AND s.department LIKE '%' || ?{} || '%'",
                args.len()
            ));
        }
        if let Some(date) = non_empty(&filter.date) {
            let parsed = NaiveDate::parse_from_str(date, DATE_FORMAT)
                .map_err(|_| StoreError::InvalidDate(date.to_string()))?;
            args.push(Box::new(parsed.format(DATE_FORMAT).to_string()));
            sql.push_str(&format!(" AND a.date = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY a.date DESC, a.time DESC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = args.iter().map(|a| &**a).collect();
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (student_id, name, department, email, date, time) = row?;
            out.push(AttendanceRow {
                student_id,
                name,
                department,
                email,
                date: parse_date(&date)?,
                time: parse_time(&time)?,
            });
        }
        tracing::debug!(rows = out.len(), ?filter, "attendance report");
        Ok(out)
    }
}
