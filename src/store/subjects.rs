/*!
`Store` methods for subjects, including the rule that caps how many
subjects one teacher may own.
*/
use std::collections::HashMap;

use tokio_postgres::{GenericClient, Row, Transaction, types::ToSql};

use super::{Store, DbError};
use crate::{
    enroll::{self, Load, Seat},
    subject::{StudentRef, Subject, SubjectDraft, SubjectPatch, SubjectRow, TeacherRef},
};

const SUBJECT_FROM: &str =
"SELECT su.id, su.name, su.code, su.credits, su.teacher,
        p.name AS teacher_name, p.email AS teacher_email
    FROM subjects su
    LEFT JOIN teachers t ON t.id = su.teacher
    LEFT JOIN people p ON p.id = t.person";

fn subject_from_row(row: &Row) -> Result<Subject, DbError> {
    let teacher_id: Option<i64> = row.try_get("teacher")?;
    let teacher = match teacher_id {
        None => None,
        Some(id) => Some(TeacherRef {
            id,
            name: row.try_get("teacher_name")?,
            email: row.try_get("teacher_email")?,
        }),
    };

    Ok(Subject {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        credits: row.try_get("credits")?,
        teacher,
        students: Vec::new(),
    })
}

pub(super) fn seat_from_row(row: &Row) -> Result<Seat, DbError> {
    Ok(Seat {
        subject: row.try_get("subject")?,
        credits: row.try_get("credits")?,
        teacher: row.try_get("teacher")?,
    })
}

/**
Load the subjects selected by `clause` (appended after the `FROM` and joins;
it can refer to the subject table as `su`), along with the students enrolled
in each.
*/
pub(super) async fn subjects_where<C: GenericClient + Sync>(
    c: &C,
    clause: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<Vec<Subject>, DbError> {
    let stmt = format!("{} {} ORDER BY su.id", SUBJECT_FROM, clause);
    let rows = c.query(stmt.as_str(), params).await?;

    let mut subjects: Vec<Subject> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        subjects.push(subject_from_row(row)?);
    }
    if subjects.is_empty() {
        return Ok(subjects);
    }

    let ids: Vec<i64> = subjects.iter().map(|s| s.id).collect();
    let rows = c.query(
        "SELECT e.subject, st.id, p.name, p.email
            FROM enrollments e
            JOIN students st ON st.id = e.student
            JOIN people p ON p.id = st.person
            WHERE e.subject = ANY($1)
            ORDER BY st.id",
        &[&ids]
    ).await?;

    let mut rosters: HashMap<i64, Vec<StudentRef>> = HashMap::new();
    for row in rows.iter() {
        let subject: i64 = row.try_get("subject")?;
        rosters.entry(subject).or_default().push(StudentRef {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
        });
    }

    for s in subjects.iter_mut() {
        if let Some(students) = rosters.remove(&s.id) {
            s.students = students;
        }
    }

    Ok(subjects)
}

pub(super) async fn subject_by_id<C: GenericClient + Sync>(
    c: &C,
    id: i64,
) -> Result<Subject, DbError> {
    let mut subjects = subjects_where(c, "WHERE su.id = $1", &[&id]).await?;
    subjects.pop()
        .ok_or_else(|| DbError::NotFound(format!("There is no subject with id {}.", &id)))
}

/**
Lock every student enrolled in `subject` and return each one's `Load`.

Holding these locks keeps the students from enrolling in anything else until
the caller's transaction is done with its decision.
*/
async fn lock_roster(
    t: &Transaction<'_>,
    subject: i64,
) -> Result<Vec<Load>, DbError> {
    log::trace!("lock_roster( T, {} ) called.", &subject);

    let rows = t.query(
        "SELECT st.id FROM students st
            JOIN enrollments e ON e.student = st.id
            WHERE e.subject = $1
            ORDER BY st.id
            FOR UPDATE OF st",
        &[&subject]
    ).await?;
    let mut students: Vec<i64> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        students.push(row.try_get("id")?);
    }

    let rows = t.query(
        "SELECT e.student, su.id AS subject, su.credits, su.teacher
            FROM enrollments e
            JOIN subjects su ON su.id = e.subject
            WHERE e.student = ANY($1)",
        &[&students]
    ).await?;
    let mut seats: HashMap<i64, Vec<Seat>> = HashMap::with_capacity(students.len());
    for row in rows.iter() {
        let student: i64 = row.try_get("student")?;
        seats.entry(student).or_default().push(seat_from_row(row)?);
    }

    Ok(seats.into_values().map(Load::new).collect())
}

/**
Lock teacher `teacher` and make sure they have room for one more subject.

`except` is the subject being (re)assigned, which doesn't count against
the teacher.
*/
async fn claim_teacher(
    t: &Transaction<'_>,
    limits: &enroll::Limits,
    teacher: i64,
    except: Option<i64>,
) -> Result<(), DbError> {
    log::trace!("claim_teacher( T, {}, {:?} ) called.", &teacher, &except);

    if t.query_opt(
        "SELECT id FROM teachers WHERE id = $1 FOR UPDATE",
        &[&teacher]
    ).await?.is_none() {
        return Err(DbError::NotFound(format!("There is no teacher with id {}.", &teacher)));
    }

    let row = t.query_one(
        "SELECT COUNT(*) AS n FROM subjects
            WHERE teacher = $1 AND ($2::BIGINT IS NULL OR id <> $2)",
        &[&teacher, &except]
    ).await?;
    let owned: i64 = row.try_get("n")?;

    enroll::check_teacher_capacity(limits, owned as usize)?;
    Ok(())
}

/// Validate, claim the teacher slot and insert; returns the new id.
async fn insert_draft(
    t: &Transaction<'_>,
    limits: &enroll::Limits,
    draft: &SubjectDraft,
) -> Result<i64, DbError> {
    draft.validate(limits.max_credits).map_err(DbError::Invalid)?;

    if let Some(teacher) = draft.teacher_id {
        claim_teacher(t, limits, teacher, None).await?;
    }

    let row = t.query_one(
        "INSERT INTO subjects (name, code, credits, teacher)
            VALUES ($1, $2, $3, $4)
            RETURNING id",
        &[&draft.name, &draft.code, &draft.credits, &draft.teacher_id]
    ).await?;
    let id: i64 = row.try_get("id")?;
    Ok(id)
}

impl Store {
    pub async fn get_subjects(&self) -> Result<Vec<Subject>, DbError> {
        log::trace!("Store::get_subjects() called.");

        let client = self.connect().await?;
        subjects_where(&client, "", &[]).await
    }

    pub async fn get_subject(&self, id: i64) -> Result<Subject, DbError> {
        log::trace!("Store::get_subject( {} ) called.", &id);

        let client = self.connect().await?;
        subject_by_id(&client, id).await
    }

    pub async fn get_teacher_subjects(&self, teacher: i64) -> Result<Vec<Subject>, DbError> {
        log::trace!("Store::get_teacher_subjects( {} ) called.", &teacher);

        let client = self.connect().await?;
        if client.query_opt(
            "SELECT id FROM teachers WHERE id = $1",
            &[&teacher]
        ).await?.is_none() {
            return Err(DbError::NotFound(format!("There is no teacher with id {}.", &teacher)));
        }

        subjects_where(&client, "WHERE su.teacher = $1", &[&teacher]).await
    }

    pub async fn insert_subject(&self, draft: &SubjectDraft) -> Result<Subject, DbError> {
        log::trace!("Store::insert_subject( {:?} ) called.", draft);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let id = insert_draft(&t, &self.limits, draft).await?;
        let subj = subject_by_id(&t, id).await?;
        t.commit().await?;

        log::trace!("Inserted Subject {} {:?} ({}).", &id, &draft.name, &draft.code);
        Ok(subj)
    }

    /**
    Insert seed-file subjects, resolving each teacher by email.

    All of them go in one transaction: if any row names an unknown teacher,
    breaks a rule, or duplicates a code, none are inserted.
    */
    pub async fn insert_subject_rows(&self, rows: &[SubjectRow]) -> Result<usize, DbError> {
        log::trace!("Store::insert_subject_rows( [ {} rows ] ) called.", &rows.len());

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        for row in rows.iter() {
            let teacher_id = match &row.teacher_email {
                None => None,
                Some(email) => match t.query_opt(
                    "SELECT t.id FROM teachers t
                        JOIN people p ON p.id = t.person
                        WHERE p.email = $1",
                    &[email]
                ).await? {
                    Some(trow) => Some(trow.try_get::<_, i64>("id")?),
                    None => {
                        return Err(DbError::NotFound(format!(
                            "Subject {}: there is no teacher with email {:?}.",
                            &row.code, email
                        )));
                    },
                },
            };
            let draft = SubjectDraft {
                name: row.name.clone(),
                code: row.code.clone(),
                credits: row.credits,
                teacher_id,
            };
            insert_draft(&t, &self.limits, &draft).await
                .map_err(|e| e.annotate(&format!("Error inserting subject {}", &row.code)))?;
        }

        t.commit().await?;
        log::trace!("Inserted {} subjects.", &rows.len());
        Ok(rows.len())
    }

    /**
    Apply `patch` to subject `id`.

    A new teacher must have room for it, and must not already teach another
    subject to any of its enrolled students. New credits must not push any
    enrolled student over the credit cap.
    */
    pub async fn update_subject(
        &self,
        id: i64,
        patch: &SubjectPatch,
    ) -> Result<Subject, DbError> {
        log::trace!("Store::update_subject( {}, {:?} ) called.", &id, patch);

        patch.validate(self.limits.max_credits).map_err(DbError::Invalid)?;

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = match t.query_opt(
            "SELECT credits, teacher FROM subjects WHERE id = $1 FOR UPDATE",
            &[&id]
        ).await? {
            Some(row) => row,
            None => {
                return Err(DbError::NotFound(format!("There is no subject with id {}.", &id)));
            },
        };
        let old_credits: i32 = row.try_get("credits")?;
        let old_teacher: Option<i64> = row.try_get("teacher")?;

        // Outer `None`: teacher untouched. `Some(None)`: unassigned.
        let teacher_change = patch.teacher_id.filter(|&tid| tid != old_teacher);
        let new_teacher = teacher_change.flatten();
        let new_credits = patch.credits.filter(|&c| c != old_credits);

        if let Some(teacher) = new_teacher {
            claim_teacher(&t, &self.limits, teacher, Some(id)).await?;
        }
        if new_teacher.is_some() || new_credits.is_some() {
            let rosters = lock_roster(&t, id).await?;
            if let Some(teacher) = new_teacher {
                enroll::check_reassignment(teacher, id, &rosters)?;
            }
            if let Some(credits) = new_credits {
                enroll::check_credit_change(&self.limits, id, credits, &rosters)?;
            }
        }

        t.execute(
            "UPDATE subjects SET
                name = COALESCE($2, name),
                code = COALESCE($3, code),
                credits = COALESCE($4, credits),
                teacher = CASE WHEN $5::BOOLEAN THEN $6::BIGINT ELSE teacher END
            WHERE id = $1",
            &[
                &id, &patch.name, &patch.code, &patch.credits,
                &teacher_change.is_some(), &new_teacher,
            ]
        ).await?;

        let subj = subject_by_id(&t, id).await?;
        t.commit().await?;

        if let Some(teacher) = teacher_change {
            log::info!(
                "Subject {} moved from teacher {:?} to teacher {:?}.",
                &id, &old_teacher, &teacher
            );
        }
        Ok(subj)
    }

    /// Delete a subject, along with every enrollment in it. Returns the
    /// number of enrollments removed.
    pub async fn delete_subject(&self, id: i64) -> Result<usize, DbError> {
        log::trace!("Store::delete_subject( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if t.query_opt(
            "SELECT id FROM subjects WHERE id = $1 FOR UPDATE",
            &[&id]
        ).await?.is_none() {
            return Err(DbError::NotFound(format!("There is no subject with id {}.", &id)));
        }

        let n = t.execute("DELETE FROM enrollments WHERE subject = $1", &[&id]).await?;
        t.execute("DELETE FROM subjects WHERE id = $1", &[&id]).await?;

        t.commit().await?;
        log::trace!("Deleted subject {} and {} enrollments.", &id, &n);
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::test_store;

    fn draft(name: &str, code: &str, credits: i32, teacher_id: Option<i64>) -> SubjectDraft {
        SubjectDraft {
            name: name.to_owned(),
            code: code.to_owned(),
            credits,
            teacher_id,
        }
    }

    #[tokio::test]
    #[serial]
    async fn teacher_capacity() {
        ensure_logging();

        let db = test_store();
        db.ensure_db_schema().await.unwrap();

        let dijkstra = db.insert_teacher("Edsger Dijkstra", "edsger@example.edu", "x").await.unwrap();
        let knuth = db.insert_teacher("Donald Knuth", "donald@example.edu", "x").await.unwrap();

        let a = db.insert_subject(&draft("Structured Programming", "CS101", 3, Some(dijkstra.id))).await.unwrap();
        db.insert_subject(&draft("Concurrency", "CS240", 4, Some(dijkstra.id))).await.unwrap();

        // A third subject for the same teacher is refused...
        assert!(matches!(
            db.insert_subject(&draft("Semaphores", "CS241", 2, Some(dijkstra.id))).await,
            Err(DbError::Conflict(_))
        ));
        assert_eq!(db.get_teacher(dijkstra.id).await.unwrap().total_subjects, 2);

        // ...whether created or reassigned.
        let c = db.insert_subject(&draft("Algorithms", "CS201", 4, Some(knuth.id))).await.unwrap();
        let patch = SubjectPatch { teacher_id: Some(Some(dijkstra.id)), ..Default::default() };
        assert!(matches!(db.update_subject(c.id, &patch).await, Err(DbError::Conflict(_))));

        // Touching a subject without changing its teacher doesn't count it twice.
        let patch = SubjectPatch {
            name: Some("Structured Programming I".to_owned()),
            teacher_id: Some(Some(dijkstra.id)),
            ..Default::default()
        };
        let a = db.update_subject(a.id, &patch).await.unwrap();
        assert_eq!(a.name, "Structured Programming I");

        // Moving a subject updates both teachers' counts.
        let patch = SubjectPatch { teacher_id: Some(Some(knuth.id)), ..Default::default() };
        db.update_subject(a.id, &patch).await.unwrap();
        assert_eq!(db.get_teacher(dijkstra.id).await.unwrap().total_subjects, 1);
        assert_eq!(db.get_teacher(knuth.id).await.unwrap().total_subjects, 2);
        assert_eq!(db.get_teacher_subjects(knuth.id).await.unwrap().len(), 2);

        // An explicit null detaches a subject and frees the teacher's slot.
        let patch = SubjectPatch { teacher_id: Some(None), ..Default::default() };
        let c = db.update_subject(c.id, &patch).await.unwrap();
        assert_eq!(c.teacher, None);
        assert_eq!(db.get_teacher(knuth.id).await.unwrap().total_subjects, 1);
        let patch = SubjectPatch { name: Some("Algorithms II".to_owned()), ..Default::default() };
        let c = db.update_subject(c.id, &patch).await.unwrap();
        assert_eq!((c.name.as_str(), c.teacher), ("Algorithms II", None));

        // Deleting a teacher leaves their subjects unassigned.
        db.delete_teacher(knuth.id).await.unwrap();
        let a = db.get_subject(a.id).await.unwrap();
        assert_eq!(a.teacher, None);

        assert!(matches!(
            db.insert_subject(&draft("Nothing", "CS000", 0, None)).await,
            Err(DbError::Invalid(_))
        ));
        assert!(matches!(
            db.insert_subject(&draft("Ghost", "CS404", 1, Some(9999))).await,
            Err(DbError::NotFound(_))
        ));

        db.nuke_database().await.unwrap();
    }

    fn row(name: &str, code: &str, credits: i32, teacher: Option<&str>) -> SubjectRow {
        SubjectRow {
            name: name.to_owned(),
            code: code.to_owned(),
            credits,
            teacher_email: teacher.map(|s| s.to_owned()),
        }
    }

    #[tokio::test]
    #[serial]
    async fn seed_rows_all_or_nothing() {
        ensure_logging();

        let db = test_store();
        db.ensure_db_schema().await.unwrap();

        let wirth = db.insert_teacher("Niklaus Wirth", "niklaus@example.edu", "x").await.unwrap();

        // The last row names nobody, so the first two roll back with it.
        let rows = vec![
            row("Compilers", "CS310", 5, Some("niklaus@example.edu")),
            row("Seminar", "CS099", 1, None),
            row("Ghosts", "CS404", 3, Some("nobody@example.edu")),
        ];
        assert!(matches!(db.insert_subject_rows(&rows).await, Err(DbError::NotFound(_))));
        assert!(db.get_subjects().await.unwrap().is_empty());

        // A third subject for one teacher sinks the batch too.
        let rows = vec![
            row("Compilers", "CS310", 5, Some("niklaus@example.edu")),
            row("Pascal", "CS120", 4, Some("niklaus@example.edu")),
            row("Oberon", "CS320", 4, Some("niklaus@example.edu")),
        ];
        assert!(matches!(db.insert_subject_rows(&rows).await, Err(DbError::Conflict(_))));
        assert!(db.get_subjects().await.unwrap().is_empty());

        assert_eq!(db.insert_subject_rows(&rows[..2]).await.unwrap(), 2);
        assert_eq!(db.get_teacher(wirth.id).await.unwrap().total_subjects, 2);
        assert_eq!(db.get_subjects().await.unwrap().len(), 2);

        db.nuke_database().await.unwrap();
    }
}
