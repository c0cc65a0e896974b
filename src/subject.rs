/*!
Subjects, and the views of them handed back to clients.
*/
use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};

use crate::enroll::Seat;

/// A teacher as seen from one of their subjects.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRef {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// A student as seen from a subject they are enrolled in.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub credits: i32,
    pub teacher: Option<TeacherRef>,
    pub students: Vec<StudentRef>,
}

impl Subject {
    pub fn seat(&self) -> Seat {
        Seat {
            subject: self.id,
            credits: self.credits,
            teacher: self.teacher.as_ref().map(|t| t.id),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub credits: i32,
    pub teacher: Option<TeacherRef>,
    pub enrolled_count: usize,
    /// Credits this subject contributes across every enrolled student.
    pub enrolled_credits: i64,
    pub students: Vec<StudentRef>,
}

impl From<Subject> for SubjectStats {
    fn from(s: Subject) -> SubjectStats {
        let enrolled_count = s.students.len();
        SubjectStats {
            id: s.id,
            enrolled_credits: s.credits as i64 * enrolled_count as i64,
            name: s.name,
            code: s.code,
            credits: s.credits,
            teacher: s.teacher,
            enrolled_count,
            students: s.students,
        }
    }
}

/// Confirmation of a dropped enrollment, with the student's new totals.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dropped {
    pub message: String,
    pub student_id: i64,
    pub subject_id: i64,
    pub total_credits: i64,
    pub enrolled_count: usize,
}

/// A student's classmates in one subject, not counting the student.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classmates {
    pub subject_id: i64,
    pub subject_name: String,
    pub total_classmates: usize,
    pub classmates: Vec<StudentRef>,
}

impl Classmates {
    pub fn of(student_id: i64, subject: Subject) -> Classmates {
        let classmates: Vec<StudentRef> = subject.students.into_iter()
            .filter(|s| s.id != student_id)
            .collect();

        Classmates {
            subject_id: subject.id,
            subject_name: subject.name,
            total_classmates: classmates.len(),
            classmates,
        }
    }
}

/// Data for creating a subject.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDraft {
    pub name: String,
    pub code: String,
    pub credits: i32,
    pub teacher_id: Option<i64>,
}

impl SubjectDraft {
    /// `max_credits` is the student credit cap; a subject worth more than
    /// that could never be taken.
    pub fn validate(&self, max_credits: i32) -> Result<(), String> {
        validate_text("name", &self.name)?;
        validate_text("code", &self.code)?;
        validate_credits(self.credits, max_credits)
    }
}

/// Data for updating a subject; absent fields are left alone.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub credits: Option<i32>,
    /// `Some(None)` (an explicit `"teacherId": null`) unassigns the subject.
    #[serde(default, deserialize_with = "present")]
    pub teacher_id: Option<Option<i64>>,
}

/// Wraps whatever is there, `null` included, so an absent field and a
/// `null` one come out different.
fn present<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(d).map(Some)
}

impl SubjectPatch {
    pub fn validate(&self, max_credits: i32) -> Result<(), String> {
        if let Some(name) = &self.name {
            validate_text("name", name)?;
        }
        if let Some(code) = &self.code {
            validate_text("code", code)?;
        }
        if let Some(credits) = self.credits {
            validate_credits(credits, max_credits)?;
        }
        Ok(())
    }
}

fn validate_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("Subject {} must not be blank.", field))
    } else {
        Ok(())
    }
}

fn validate_credits(credits: i32, max_credits: i32) -> Result<(), String> {
    if (1..=max_credits).contains(&credits) {
        Ok(())
    } else {
        Err(format!(
            "Credits must be between 1 and {}, not {}.", max_credits, credits
        ))
    }
}

/// One row of a subject seed file.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectRow {
    pub name: String,
    pub code: String,
    pub credits: i32,
    /// Blank means the subject starts out unassigned.
    pub teacher_email: Option<String>,
}

impl SubjectRow {
    /**
    Subject .csv rows look like this

    ```csv
    #name,          code,   credits,    teacher email
    Compilers,      CS310,  5,          niklaus@example.edu
    Seminar,        CS099,  1,
    ```
    */
    pub fn from_csv_line(row: &csv::StringRecord) -> Result<SubjectRow, String> {
        log::trace!("SubjectRow::from_csv_line( {:?} ) called.", row);

        let name = match row.get(0) {
            Some(s) => s.to_owned(),
            None => { return Err("no name".to_owned()); },
        };
        let code = match row.get(1) {
            Some(s) => s.to_owned(),
            None => { return Err("no code".to_owned()); },
        };
        let credits: i32 = match row.get(2) {
            Some(s) => s.parse()
                .map_err(|e| format!("unable to parse {:?} as credits: {}", s, &e))?,
            None => { return Err("no credits".to_owned()); },
        };
        let teacher_email = match row.get(3) {
            Some("") | None => None,
            Some(s) => Some(s.to_owned()),
        };

        let draft = SubjectRow { name, code, credits, teacher_email };
        validate_text("name", &draft.name)?;
        validate_text("code", &draft.code)?;
        // The configured cap is applied again when the row is inserted.
        validate_credits(draft.credits, i32::MAX)?;
        Ok(draft)
    }

    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<SubjectRow>, String> {
        log::trace!("SubjectRow::vec_from_csv_reader(...) called.");

        let mut csv_reader = crate::csv_reader(r);
        let mut rows: Vec<SubjectRow> = Vec::new();

        for (n, res) in csv_reader.records().enumerate() {
            let record = res.map_err(|e| crate::csv_error_message(n, e.position(), &e))?;
            let row = SubjectRow::from_csv_line(&record)
                .map_err(|e| crate::csv_error_message(n, record.position(), &e))?;
            rows.push(row);
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    fn student(id: i64, name: &str) -> StudentRef {
        StudentRef {
            id,
            name: name.to_owned(),
            email: format!("{}@example.edu", name.to_lowercase()),
        }
    }

    fn compilers() -> Subject {
        Subject {
            id: 7,
            name: "Compilers".to_owned(),
            code: "CS310".to_owned(),
            credits: 5,
            teacher: Some(TeacherRef {
                id: 3,
                name: "Niklaus Wirth".to_owned(),
                email: "niklaus@example.edu".to_owned(),
            }),
            students: vec![student(1, "Ada"), student(2, "Grace"), student(4, "Alan")],
        }
    }

    #[test]
    fn seat_carries_teacher() {
        let s = compilers();
        assert_eq!(s.seat(), Seat { subject: 7, credits: 5, teacher: Some(3) });
    }

    #[test]
    fn classmates_exclude_self() {
        let c = Classmates::of(2, compilers());
        assert_eq!(c.total_classmates, 2);
        assert!(c.classmates.iter().all(|s| s.id != 2));
    }

    #[test]
    fn stats() {
        let st = SubjectStats::from(compilers());
        assert_eq!((st.enrolled_count, st.enrolled_credits), (3, 15));
    }

    #[test]
    fn drafts_need_positive_credits() {
        let draft: SubjectDraft = serde_json::from_str(
            r#"{ "name": "Logic", "code": "PH120", "credits": 0 }"#
        ).unwrap();
        assert_eq!(draft.teacher_id, None);
        assert!(draft.validate(21).is_err());

        let patch: SubjectPatch = serde_json::from_str(r#"{ "teacherId": 4 }"#).unwrap();
        assert_eq!(patch.teacher_id, Some(Some(4)));
        assert!(patch.validate(21).is_ok());
        assert!(SubjectPatch { credits: Some(-2), ..Default::default() }.validate(21).is_err());
    }

    #[test]
    fn null_teacher_unassigns() {
        let patch: SubjectPatch = serde_json::from_str(r#"{ "teacherId": null }"#).unwrap();
        assert_eq!(patch.teacher_id, Some(None));
        assert!(patch.validate(21).is_ok());

        let patch: SubjectPatch = serde_json::from_str(r#"{ "name": "Logic II" }"#).unwrap();
        assert_eq!(patch.teacher_id, None);
    }

    #[test]
    fn credits_above_the_cap_are_invalid() {
        let mut draft = SubjectDraft {
            name: "Everything".to_owned(),
            code: "ALL999".to_owned(),
            credits: i32::MAX,
            teacher_id: None,
        };
        assert!(draft.validate(21).is_err());
        draft.credits = 22;
        assert!(draft.validate(21).is_err());
        draft.credits = 21;
        assert!(draft.validate(21).is_ok());

        let patch = SubjectPatch { credits: Some(i32::MAX), ..Default::default() };
        assert!(patch.validate(21).is_err());
    }

    #[test]
    fn subjects_from_csv() {
        ensure_logging();
        let f = std::fs::File::open("test/good_subjects_0.csv").unwrap();
        let rows = SubjectRow::vec_from_csv_reader(f).unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].teacher_email.as_deref(), Some("edsger@example.edu"));
        assert_eq!(rows[4].teacher_email, None);
        assert_eq!(rows[3].credits, 5);
    }

    #[test]
    fn bad_credits_in_csv() {
        ensure_logging();
        let text = "Compilers, CS310, five, niklaus@example.edu\n";
        assert!(SubjectRow::vec_from_csv_reader(text.as_bytes()).is_err());
    }
}
