/*!
`Store` methods et. al. for dealing with people and their student/teacher
profiles.
*/
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_postgres::{GenericClient, Row, Transaction};

use super::{Store, DbError};
use crate::user::*;

const STUDENT_FROM: &str =
"SELECT st.id, st.person, p.name, p.email,
        COALESCE(SUM(su.credits), 0)::BIGINT AS total_credits,
        COUNT(su.id) AS enrolled_count
    FROM students st
    JOIN people p ON p.id = st.person
    LEFT JOIN enrollments e ON e.student = st.id
    LEFT JOIN subjects su ON su.id = e.subject";

const STUDENT_GROUP: &str = "GROUP BY st.id, p.id ORDER BY st.id";

const TEACHER_FROM: &str =
"SELECT t.id, t.person, p.name, p.email,
        COUNT(su.id) AS total_subjects
    FROM teachers t
    JOIN people p ON p.id = t.person
    LEFT JOIN subjects su ON su.teacher = t.id";

const TEACHER_GROUP: &str = "GROUP BY t.id, p.id ORDER BY t.id";

fn student_from_row(row: &Row) -> Result<Student, DbError> {
    Ok(Student {
        id: row.try_get("id")?,
        person_id: row.try_get("person")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        total_credits: row.try_get("total_credits")?,
        enrolled_count: row.try_get("enrolled_count")?,
    })
}

fn teacher_from_row(row: &Row) -> Result<Teacher, DbError> {
    Ok(Teacher {
        id: row.try_get("id")?,
        person_id: row.try_get("person")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        total_subjects: row.try_get("total_subjects")?,
    })
}

pub(super) async fn student_by_id<C: GenericClient + Sync>(
    c: &C,
    id: i64,
) -> Result<Student, DbError> {
    let stmt = format!("{} WHERE st.id = $1 {}", STUDENT_FROM, STUDENT_GROUP);
    match c.query_opt(stmt.as_str(), &[&id]).await? {
        Some(row) => student_from_row(&row),
        None => Err(DbError::NotFound(format!("There is no student with id {}.", &id))),
    }
}

/// Return the role of whoever is registered under `email`, if anyone.
///
/// Used when inserting new people, mainly to ensure good error messaging
/// when an address is already in use.
async fn check_existing_email_role(
    t: &Transaction<'_>,
    email: &str,
) -> Result<Option<Role>, DbError> {
    log::trace!("check_existing_email_role( T, {:?} ) called.", email);

    match t.query_opt(
        "SELECT role FROM people WHERE email = $1",
        &[&email]
    ).await.map_err(|e|
        DbError::from(e).annotate("Error querying for preexisting email")
    )? {
        None => Ok(None),
        Some(row) => {
            let role_str: &str = row.try_get("role")?;
            let role: Role = role_str.parse()?;
            Ok(Some(role))
        },
    }
}

/// Inserts a row into `people` and the matching profile table, returning
/// `(person id, profile id)`.
async fn insert_person(
    t: &Transaction<'_>,
    name: &str,
    email: &str,
    hash: &str,
    role: Role,
) -> Result<(i64, i64), DbError> {
    log::trace!(
        "insert_person( T, {:?}, {:?}, [ hash ], {} ) called.",
        name, email, role
    );

    if let Some(role) = check_existing_email_role(t, email).await? {
        return Err(DbError::Conflict(format!(
            "Email {} is already registered to a {}.",
            email, &role
        )));
    }

    let row = t.query_one(
        "INSERT INTO people (name, email, hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id",
        &[&name, &email, &hash, &role.to_string()]
    ).await?;
    let person_id: i64 = row.try_get("id")?;

    let profile_stmt = match role {
        Role::Student => "INSERT INTO students (person) VALUES ($1) RETURNING id",
        Role::Teacher => "INSERT INTO teachers (person) VALUES ($1) RETURNING id",
    };
    let row = t.query_one(profile_stmt, &[&person_id]).await?;
    let profile_id: i64 = row.try_get("id")?;

    Ok((person_id, profile_id))
}

impl Store {
    pub async fn insert_student(
        &self,
        name: &str,
        email: &str,
        hash: &str,
    ) -> Result<Student, DbError> {
        log::trace!("Store::insert_student( {:?}, {:?}, [ hash ] ) called.", name, email);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let (person_id, id) = insert_person(&t, name, email, hash, Role::Student).await?;

        t.commit().await?;
        log::trace!("Inserted Student {} {:?} ({}).", &id, name, email);
        Ok(Student {
            id,
            person_id,
            name: name.to_owned(),
            email: email.to_owned(),
            total_credits: 0,
            enrolled_count: 0,
        })
    }

    pub async fn insert_teacher(
        &self,
        name: &str,
        email: &str,
        hash: &str,
    ) -> Result<Teacher, DbError> {
        log::trace!("Store::insert_teacher( {:?}, {:?}, [ hash ] ) called.", name, email);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let (person_id, id) = insert_person(&t, name, email, hash, Role::Teacher).await?;

        t.commit().await?;
        log::trace!("Inserted Teacher {} {:?} ({}).", &id, name, email);
        Ok(Teacher {
            id,
            person_id,
            name: name.to_owned(),
            email: email.to_owned(),
            total_subjects: 0,
        })
    }

    /**
    Insert a batch of people, all with the same `role`, in one transaction.

    `hashes[n]` is the password hash for `regs[n]`. Either every person goes
    in, or none do.
    */
    pub async fn insert_people(
        &self,
        role: Role,
        regs: &[Registration],
        hashes: &[String],
    ) -> Result<usize, DbError> {
        log::trace!(
            "Store::insert_people( {}, [ {} registrations ] ) called.",
            &role, regs.len()
        );

        if regs.len() != hashes.len() {
            return Err(DbError::Invalid(format!(
                "{} registrations but {} password hashes.",
                regs.len(), hashes.len()
            )));
        }

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let mut n_inserted: usize = 0;
        {
            let mut inserts = FuturesUnordered::new();
            for (reg, hash) in regs.iter().zip(hashes.iter()) {
                inserts.push(insert_person(&t, &reg.name, &reg.email, hash, role));
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_inserted += 1; },
                    Err(e) => {
                        return Err(e.annotate("Error inserting batch of people"));
                    },
                }
            }
        }

        t.commit().await?;
        log::trace!("Inserted {} {} records.", &n_inserted, &role);
        Ok(n_inserted)
    }

    pub async fn get_students(&self) -> Result<Vec<Student>, DbError> {
        log::trace!("Store::get_students() called.");

        let client = self.connect().await?;
        let stmt = format!("{} {}", STUDENT_FROM, STUDENT_GROUP);
        let rows = client.query(stmt.as_str(), &[]).await?;

        let mut students: Vec<Student> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            students.push(student_from_row(row)?);
        }
        Ok(students)
    }

    pub async fn get_student(&self, id: i64) -> Result<Student, DbError> {
        log::trace!("Store::get_student( {} ) called.", &id);

        let client = self.connect().await?;
        student_by_id(&client, id).await
    }

    pub async fn get_teachers(&self) -> Result<Vec<Teacher>, DbError> {
        log::trace!("Store::get_teachers() called.");

        let client = self.connect().await?;
        let stmt = format!("{} {}", TEACHER_FROM, TEACHER_GROUP);
        let rows = client.query(stmt.as_str(), &[]).await?;

        let mut teachers: Vec<Teacher> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            teachers.push(teacher_from_row(row)?);
        }
        Ok(teachers)
    }

    pub async fn get_teacher(&self, id: i64) -> Result<Teacher, DbError> {
        log::trace!("Store::get_teacher( {} ) called.", &id);

        let client = self.connect().await?;
        let stmt = format!("{} WHERE t.id = $1 {}", TEACHER_FROM, TEACHER_GROUP);
        match client.query_opt(stmt.as_str(), &[&id]).await? {
            Some(row) => teacher_from_row(&row),
            None => Err(DbError::NotFound(format!("There is no teacher with id {}.", &id))),
        }
    }

    /// Look up the login details of the person registered as `email` with
    /// the given `role`.
    pub async fn get_credentials(
        &self,
        email: &str,
        role: Role,
    ) -> Result<Option<Credentials>, DbError> {
        log::trace!("Store::get_credentials( {:?}, {} ) called.", email, &role);

        let stmt = match role {
            Role::Student => "SELECT st.id AS profile, p.name, p.email, p.hash
                FROM people p JOIN students st ON st.person = p.id
                WHERE p.email = $1",
            Role::Teacher => "SELECT t.id AS profile, p.name, p.email, p.hash
                FROM people p JOIN teachers t ON t.person = p.id
                WHERE p.email = $1",
        };

        let client = self.connect().await?;
        let row = match client.query_opt(stmt, &[&email]).await? {
            None => { return Ok(None); },
            Some(row) => row,
        };

        Ok(Some(Credentials {
            profile_id: row.try_get("profile")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            hash: row.try_get("hash")?,
        }))
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, DbError> {
        log::trace!("Store::email_exists( {:?} ) called.", email);

        let client = self.connect().await?;
        let row = client.query_opt(
            "SELECT id FROM people WHERE email = $1",
            &[&email]
        ).await?;
        Ok(row.is_some())
    }

    /// `hash` replaces the stored password hash when present; `upd.password`
    /// itself is ignored here.
    pub async fn update_teacher(
        &self,
        id: i64,
        upd: &PersonUpdate,
        hash: Option<&str>,
    ) -> Result<Teacher, DbError> {
        log::trace!("Store::update_teacher( {}, {:?}, [ hash ] ) called.", &id, upd);

        {
            let mut client = self.connect().await?;
            let t = client.transaction().await?;

            let person_id: i64 = match t.query_opt(
                "SELECT person FROM teachers WHERE id = $1 FOR UPDATE",
                &[&id]
            ).await? {
                Some(row) => row.try_get("person")?,
                None => {
                    return Err(DbError::NotFound(format!("There is no teacher with id {}.", &id)));
                },
            };

            if let Some(email) = &upd.email {
                let clash = t.query_opt(
                    "SELECT id FROM people WHERE email = $1 AND id <> $2",
                    &[email, &person_id]
                ).await?;
                if clash.is_some() {
                    return Err(DbError::Conflict(format!(
                        "Email {} is already registered.", email
                    )));
                }
            }

            t.execute(
                "UPDATE people SET
                    name = COALESCE($2, name),
                    email = COALESCE($3, email),
                    hash = COALESCE($4, hash)
                WHERE id = $1",
                &[&person_id, &upd.name, &upd.email, &hash]
            ).await?;

            t.commit().await?;
        }

        self.get_teacher(id).await
    }

    /**
    Delete a teacher and their person record.

    Subjects the teacher owned are kept, but left without a teacher.
    */
    pub async fn delete_teacher(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_teacher( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let person_id: i64 = match t.query_opt(
            "SELECT person FROM teachers WHERE id = $1 FOR UPDATE",
            &[&id]
        ).await? {
            Some(row) => row.try_get("person")?,
            None => {
                return Err(DbError::NotFound(format!("There is no teacher with id {}.", &id)));
            },
        };

        let n = t.execute(
            "UPDATE subjects SET teacher = NULL WHERE teacher = $1",
            &[&id]
        ).await?;
        log::trace!("Detached {} subjects from teacher {}.", &n, &id);

        t.execute("DELETE FROM teachers WHERE id = $1", &[&id]).await?;
        t.execute("DELETE FROM people WHERE id = $1", &[&person_id]).await?;

        t.commit().await?;
        Ok(())
    }

    /// Delete a student, their person record, and all their enrollments.
    pub async fn delete_student(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_student( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let person_id: i64 = match t.query_opt(
            "SELECT person FROM students WHERE id = $1 FOR UPDATE",
            &[&id]
        ).await? {
            Some(row) => row.try_get("person")?,
            None => {
                return Err(DbError::NotFound(format!("There is no student with id {}.", &id)));
            },
        };

        let n = t.execute("DELETE FROM enrollments WHERE student = $1", &[&id]).await?;
        log::trace!("Removed {} enrollments of student {}.", &n, &id);

        t.execute("DELETE FROM students WHERE id = $1", &[&id]).await?;
        t.execute("DELETE FROM people WHERE id = $1", &[&person_id]).await?;

        t.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::test_store;

    // Password hashes aren't checked by the store, so anything will do.
    static TEACHERS: &[(&str, &str)] = &[
        ("Edsger Dijkstra", "edsger@example.edu"),
        ("Donald Knuth", "donald@example.edu"),
    ];

    static STUDENTS: &[(&str, &str)] = &[
        ("Ada Lovelace", "ada@example.edu"),
        ("Grace Hopper", "grace@example.edu"),
    ];

    #[tokio::test]
    #[serial]
    async fn insert_people() {
        ensure_logging();

        let db = test_store();
        db.ensure_db_schema().await.unwrap();

        for (name, email) in TEACHERS.iter() {
            db.insert_teacher(name, email, "x").await.unwrap();
        }
        for (name, email) in STUDENTS.iter() {
            db.insert_student(name, email, "x").await.unwrap();
        }

        // Emails are unique across roles.
        assert!(matches!(
            db.insert_student("Imposter", "donald@example.edu", "x").await,
            Err(DbError::Conflict(_))
        ));

        let teachers = db.get_teachers().await.unwrap();
        assert_eq!(teachers.len(), TEACHERS.len());
        assert!(teachers.iter().all(|t| t.total_subjects == 0));

        let students = db.get_students().await.unwrap();
        assert_eq!(students.len(), STUDENTS.len());
        assert!(students.iter().all(|s| s.total_credits == 0 && s.enrolled_count == 0));

        let creds = db.get_credentials("ada@example.edu", Role::Student).await.unwrap().unwrap();
        assert_eq!(creds.profile_id, students[0].id);
        assert!(db.get_credentials("ada@example.edu", Role::Teacher).await.unwrap().is_none());

        let upd = PersonUpdate { name: Some("Prof. Knuth".to_owned()), ..Default::default() };
        let knuth = db.update_teacher(teachers[1].id, &upd, None).await.unwrap();
        assert_eq!((knuth.name.as_str(), knuth.email.as_str()), ("Prof. Knuth", "donald@example.edu"));

        let upd = PersonUpdate { email: Some("ada@example.edu".to_owned()), ..Default::default() };
        assert!(matches!(
            db.update_teacher(teachers[1].id, &upd, None).await,
            Err(DbError::Conflict(_))
        ));

        db.delete_teacher(teachers[0].id).await.unwrap();
        assert!(matches!(db.get_teacher(teachers[0].id).await, Err(DbError::NotFound(_))));
        assert!(!db.email_exists("edsger@example.edu").await.unwrap());
        db.delete_student(students[0].id).await.unwrap();
        assert!(matches!(db.delete_student(students[0].id).await, Err(DbError::NotFound(_))));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn insert_batch() {
        ensure_logging();

        let db = test_store();
        db.ensure_db_schema().await.unwrap();

        let f = std::fs::File::open("test/good_students_0.csv").unwrap();
        let regs = Registration::vec_from_csv_reader(f).unwrap();
        let hashes: Vec<String> = regs.iter().map(|_| "x".to_owned()).collect();

        let n = db.insert_people(Role::Student, &regs, &hashes).await.unwrap();
        assert_eq!(n, regs.len());
        assert_eq!(db.get_students().await.unwrap().len(), regs.len());

        // Whole batch is refused if any one of them clashes.
        assert!(db.insert_people(Role::Student, &regs[..1], &hashes[..1]).await.is_err());
        assert_eq!(db.get_students().await.unwrap().len(), regs.len());

        db.nuke_database().await.unwrap();
    }
}
