use rollcall_core::{SessionEvent, SessionSummary};
use rollcall_store::{AttendanceRow, Student};

/// Left-aligned plain-text table with a dashed rule under the header.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = pad_row(headers.iter().copied(), &widths);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in rows {
        out.push('\n');
        out.push_str(&pad_row(row.iter().map(String::as_str), &widths));
    }
    out
}

fn pad_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .zip(widths.iter().copied())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    padded.join("  ").trim_end().to_string()
}

pub fn students(students: &[Student]) -> String {
    let rows: Vec<Vec<String>> = students
        .iter()
        .map(|s| {
            vec![
                s.student_id.clone(),
                s.name.clone(),
                s.department.clone(),
                s.email.clone(),
                if s.enrolled { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    table(&["ID", "NAME", "DEPARTMENT", "EMAIL", "ENROLLED"], &rows)
}

pub fn attendance(rows: &[AttendanceRow]) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.date.to_string(),
                r.time.format("%H:%M:%S").to_string(),
                r.student_id.clone(),
                r.name.clone(),
                r.department.clone(),
            ]
        })
        .collect();
    table(&["DATE", "TIME", "ID", "NAME", "DEPARTMENT"], &rows)
}

pub fn summary(summary: &SessionSummary) -> String {
    format!(
        "{} frames, {} faces, {} marked, {} unknown, {} frame errors",
        summary.frames, summary.faces, summary.marks, summary.unknown, summary.frame_errors
    )
}

/// One console line per session event.
pub fn event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Started {
            session_id,
            gallery_size,
            date,
            already_marked,
        } => format!(
            "session {session_id} started: {gallery_size} enrolled, {already_marked} already marked on {date}"
        ),
        SessionEvent::Marked(mark) => format!(
            "marked   {} at {} (distance {:.3})",
            mark.identity,
            mark.timestamp.format("%H:%M:%S"),
            mark.distance
        ),
        SessionEvent::AlreadyMarked { identity } => format!("already  {identity}"),
        SessionEvent::Unknown { nearest: Some(d) } => format!("unknown  face (nearest {d:.3})"),
        SessionEvent::Unknown { nearest: None } => "unknown  face".to_string(),
        SessionEvent::RejectedProbe { reason } => format!("rejected probe: {reason}"),
        SessionEvent::FrameReadError { message } => format!("frame error: {message}"),
        SessionEvent::MarkFailed { identity, reason } => {
            format!("could not record {identity}: {reason}")
        }
        SessionEvent::DateRolledOver { from, to } => format!("date changed {from} -> {to}"),
        SessionEvent::Stopped(s) => format!("session stopped: {}", summary(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use rollcall_core::{AttendanceEvent, Identity};

    #[test]
    fn test_table_pads_columns() {
        let out = table(
            &["ID", "NAME"],
            &[
                vec!["S1".into(), "Alice".into()],
                vec!["S100".into(), "Bo".into()],
            ],
        );
        assert_eq!(out, "ID    NAME\n----  -----\nS1    Alice\nS100  Bo");
    }

    #[test]
    fn test_table_without_rows() {
        assert_eq!(table(&["ID"], &[]), "ID\n--");
    }

    #[test]
    fn test_attendance_rows() {
        let out = attendance(&[AttendanceRow {
            student_id: "S1".into(),
            name: "Alice".into(),
            department: "Physics".into(),
            email: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
        }]);
        assert!(out.ends_with("2024-05-01  09:05:00  S1  Alice  Physics"), "{out}");
    }

    #[test]
    fn test_event_lines() {
        let identity = Identity::new("S1", "Alice");
        let marked = SessionEvent::Marked(AttendanceEvent {
            identity: identity.clone(),
            distance: 0.25,
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        });
        assert_eq!(event(&marked), "marked   Alice (S1) at 09:00:00 (distance 0.250)");
        assert_eq!(
            event(&SessionEvent::Unknown { nearest: Some(0.9) }),
            "unknown  face (nearest 0.900)"
        );
        assert_eq!(
            event(&SessionEvent::AlreadyMarked { identity }),
            "already  Alice (S1)"
        );
    }
}
