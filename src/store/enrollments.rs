/*!
`Store` methods for enrolling students in subjects and dropping them.

Both `enroll()` and `drop_subject()` lock the student's row before looking at what
the student already holds, so two requests for the same student run one
after the other and each sees the other's result.

Lock order is always subject first, then student, the same order
`update_subject()` uses.
*/
use tokio_postgres::{GenericClient, IsolationLevel, Transaction};

use super::{Store, DbError};
use super::subjects::{seat_from_row, subject_by_id, subjects_where};
use super::users::student_by_id;
use crate::{
    enroll::{self, Load, Refusal},
    subject::{Classmates, Dropped, Subject},
    user::Student,
};

async fn student_load<C: GenericClient + Sync>(
    c: &C,
    student: i64,
) -> Result<Load, DbError> {
    let rows = c.query(
        "SELECT su.id AS subject, su.credits, su.teacher
            FROM enrollments e
            JOIN subjects su ON su.id = e.subject
            WHERE e.student = $1
            ORDER BY su.id",
        &[&student]
    ).await?;

    let mut seats = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        seats.push(seat_from_row(row)?);
    }
    Ok(Load::new(seats))
}

async fn ensure_student<C: GenericClient + Sync>(
    c: &C,
    student: i64,
) -> Result<(), DbError> {
    match c.query_opt("SELECT id FROM students WHERE id = $1", &[&student]).await? {
        Some(_) => Ok(()),
        None => Err(DbError::NotFound(format!("There is no student with id {}.", &student))),
    }
}

/// Lock the subject row against reassignment or deletion, and the student
/// row against any other enrollment change, in that order.
async fn lock_pair(
    t: &Transaction<'_>,
    student: i64,
    subject: i64,
) -> Result<enroll::Seat, DbError> {
    ensure_student(t, student).await?;

    let row = match t.query_opt(
        "SELECT id AS subject, credits, teacher FROM subjects
            WHERE id = $1 FOR SHARE",
        &[&subject]
    ).await? {
        Some(row) => row,
        None => {
            return Err(DbError::NotFound(format!("There is no subject with id {}.", &subject)));
        },
    };
    let seat = seat_from_row(&row)?;

    // It may have vanished between the existence check and here.
    if t.query_opt(
        "SELECT id FROM students WHERE id = $1 FOR UPDATE",
        &[&student]
    ).await?.is_none() {
        return Err(DbError::NotFound(format!("There is no student with id {}.", &student)));
    }

    Ok(seat)
}

impl Store {
    /**
    Enroll student `student` in subject `subject`, returning the subject as
    it stands afterward.

    Refusals come back as `DbError::Conflict` and leave nothing changed.
    */
    pub async fn enroll(
        &self,
        student: i64,
        subject: i64,
    ) -> Result<Subject, DbError> {
        log::trace!("Store::enroll( {}, {} ) called.", &student, &subject);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let seat = lock_pair(&t, student, subject).await?;
        let mut load = student_load(&t, student).await?;

        if let Err(r) = load.enroll(&self.limits, seat) {
            log::trace!("Student {} refused subject {}: {}", &student, &subject, &r);
            return Err(DbError::from(r));
        }

        t.execute(
            "INSERT INTO enrollments (student, subject) VALUES ($1, $2)",
            &[&student, &subject]
        ).await?;

        let subj = subject_by_id(&t, subject).await?;
        t.commit().await?;

        log::info!(
            "Student {} enrolled in subject {} ({} subjects, {} credits).",
            &student, &subject, load.count(), load.total_credits()
        );
        Ok(subj)
    }

    /// Remove student `student` from subject `subject`.
    pub async fn drop_subject(
        &self,
        student: i64,
        subject: i64,
    ) -> Result<Dropped, DbError> {
        log::trace!("Store::drop_subject( {}, {} ) called.", &student, &subject);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        lock_pair(&t, student, subject).await?;
        let mut load = student_load(&t, student).await?;
        load.drop_subject(subject)?;

        let n = t.execute(
            "DELETE FROM enrollments WHERE student = $1 AND subject = $2",
            &[&student, &subject]
        ).await?;
        if n != 1 {
            log::warn!(
                "Dropping student {} from subject {} affected {} rows.",
                &student, &subject, &n
            );
        }

        t.commit().await?;

        log::info!(
            "Student {} dropped subject {} ({} subjects, {} credits).",
            &student, &subject, load.count(), load.total_credits()
        );
        Ok(Dropped {
            message: "Enrollment cancelled.".to_owned(),
            student_id: student,
            subject_id: subject,
            total_credits: load.total_credits(),
            enrolled_count: load.count(),
        })
    }

    /// What student `student` is currently enrolled in.
    pub async fn get_student_load(&self, student: i64) -> Result<Load, DbError> {
        log::trace!("Store::get_student_load( {} ) called.", &student);

        let client = self.connect().await?;
        ensure_student(&client, student).await?;
        student_load(&client, student).await
    }

    /// The subjects student `student` is enrolled in, each with its teacher
    /// and full roster.
    pub async fn get_student_subjects(&self, student: i64) -> Result<Vec<Subject>, DbError> {
        log::trace!("Store::get_student_subjects( {} ) called.", &student);

        let client = self.connect().await?;
        ensure_student(&client, student).await?;
        subjects_where(
            &client,
            "WHERE su.id IN (SELECT subject FROM enrollments WHERE student = $1)",
            &[&student]
        ).await
    }

    /// A student and the subjects they hold, read from one snapshot so the
    /// totals agree with the list.
    pub async fn get_student_detail(
        &self,
        student: i64,
    ) -> Result<(Student, Vec<Subject>), DbError> {
        log::trace!("Store::get_student_detail( {} ) called.", &student);

        let mut client = self.connect().await?;
        let t = client.build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let s = student_by_id(&t, student).await?;
        let subjects = subjects_where(
            &t,
            "WHERE su.id IN (SELECT subject FROM enrollments WHERE student = $1)",
            &[&student]
        ).await?;
        t.commit().await?;

        Ok((s, subjects))
    }

    pub async fn get_classmates(
        &self,
        student: i64,
        subject: i64,
    ) -> Result<Classmates, DbError> {
        log::trace!("Store::get_classmates( {}, {} ) called.", &student, &subject);

        let client = self.connect().await?;
        ensure_student(&client, student).await?;
        let subj = subject_by_id(&client, subject).await?;

        if !subj.students.iter().any(|s| s.id == student) {
            return Err(DbError::from(Refusal::NotEnrolled));
        }

        Ok(Classmates::of(student, subj))
    }
}
