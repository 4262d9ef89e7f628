use crate::{SqliteStore, StoreError};
use rusqlite::{params, ErrorCode};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub email: String,
}

/// Fields to change on an existing student; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentUpdate {
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub email: String,
    /// Whether a face embedding has been stored.
    pub enrolled: bool,
}

fn required(value: &str, what: &'static str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidStudent(what));
    }
    Ok(trimmed.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

impl SqliteStore {
    pub fn add_student(&self, student: &NewStudent) -> Result<(), StoreError> {
        let student_id = required(&student.student_id, "student id is required")?;
        let name = required(&student.name, "name is required")?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO students (student_id, name, department, email) VALUES (?1, ?2, ?3, ?4)",
            params![student_id, name, student.department.trim(), student.email.trim()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateStudent(student_id.clone())
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        tracing::info!(student = %student_id, "student added");
        Ok(())
    }

    pub fn update_student(&self, student_id: &str, update: &StudentUpdate) -> Result<(), StoreError> {
        let current = self
            .student(student_id)?
            .ok_or_else(|| StoreError::UnknownStudent(student_id.to_string()))?;

        let new_id = match &update.student_id {
            Some(id) => required(id, "student id is required")?,
            None => current.student_id,
        };
        let name = match &update.name {
            Some(name) => required(name, "name is required")?,
            None => current.name,
        };
        let department = update
            .department
            .as_deref()
            .map_or(current.department, |d| d.trim().to_string());
        let email = update
            .email
            .as_deref()
            .map_or(current.email, |e| e.trim().to_string());

        let conn = self.lock()?;
        conn.execute(
            "UPDATE students SET student_id = ?1, name = ?2, department = ?3, email = ?4
             WHERE student_id = ?5",
            params![new_id, name, department, email, student_id],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateStudent(new_id.clone())
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        tracing::info!(student = student_id, new_id = %new_id, "student updated");
        Ok(())
    }

    /// Delete a student together with their attendance history.
    pub fn remove_student(&self, student_id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let marks = tx.execute(
            "DELETE FROM attendance WHERE student_id = ?1",
            params![student_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM students WHERE student_id = ?1",
            params![student_id],
        )?;
        if removed == 0 {
            return Err(StoreError::UnknownStudent(student_id.to_string()));
        }
        tx.commit()?;

        tracing::info!(student = student_id, marks, "student removed");
        Ok(())
    }

    pub fn student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self
            .query_students("WHERE student_id = ?1", params![student_id])?
            .into_iter()
            .next())
    }

    pub fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        self.query_students("", params![])
    }

    fn query_students(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Student>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT student_id, name, department, email, face_encoding IS NOT NULL
             FROM students {filter} ORDER BY student_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(Student {
                student_id: row.get(0)?,
                name: row.get(1)?,
                department: row.get(2)?,
                email: row.get(3)?,
                enrolled: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
