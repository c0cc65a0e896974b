/*!
Database interaction module.

The Postgres database to which this connects is meant to have the following
tables.

```sql
CREATE TABLE people (
    id    BIGSERIAL PRIMARY KEY,
    name  TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL,
    hash  TEXT NOT NULL,    /* bcrypt hash of the password */
    role  TEXT NOT NULL     /* one of { 'Student', 'Teacher' } */
);

CREATE TABLE students (
    id     BIGSERIAL PRIMARY KEY,
    person BIGINT UNIQUE NOT NULL REFERENCES people(id) ON DELETE CASCADE
);

CREATE TABLE teachers (
    id     BIGSERIAL PRIMARY KEY,
    person BIGINT UNIQUE NOT NULL REFERENCES people(id) ON DELETE CASCADE
);

CREATE TABLE subjects (
    id      BIGSERIAL PRIMARY KEY,
    name    TEXT NOT NULL,
    code    TEXT NOT NULL,
    credits INTEGER NOT NULL CHECK (credits > 0),
    teacher BIGINT REFERENCES teachers(id) ON DELETE SET NULL
);

CREATE TABLE enrollments (
    student BIGINT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    subject BIGINT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
    PRIMARY KEY (student, subject)
);
```

A student's credit total and a teacher's subject count are never stored;
they are always computed from `enrollments` and `subjects` when read.
*/
use std::fmt::{Display, Formatter};

use tokio_postgres::{Client, NoTls, error::SqlState};

use crate::enroll::{Limits, Refusal};

mod enrollments;
mod subjects;
mod users;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'people'",
        "CREATE TABLE people (
            id    BIGSERIAL PRIMARY KEY,
            name  TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            hash  TEXT NOT NULL,
            role  TEXT NOT NULL
        )",
        "DROP TABLE people",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'students'",
        "CREATE TABLE students (
            id     BIGSERIAL PRIMARY KEY,
            person BIGINT UNIQUE NOT NULL REFERENCES people(id) ON DELETE CASCADE
        )",
        "DROP TABLE students",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'teachers'",
        "CREATE TABLE teachers (
            id     BIGSERIAL PRIMARY KEY,
            person BIGINT UNIQUE NOT NULL REFERENCES people(id) ON DELETE CASCADE
        )",
        "DROP TABLE teachers",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'subjects'",
        "CREATE TABLE subjects (
            id      BIGSERIAL PRIMARY KEY,
            name    TEXT NOT NULL,
            code    TEXT NOT NULL,
            credits INTEGER NOT NULL CHECK (credits > 0),
            teacher BIGINT REFERENCES teachers(id) ON DELETE SET NULL
        )",
        "DROP TABLE subjects",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'enrollments'",
        "CREATE TABLE enrollments (
            student BIGINT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
            subject BIGINT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            PRIMARY KEY (student, subject)
        )",
        "DROP TABLE enrollments",
    ),
];

#[derive(Debug, PartialEq)]
pub enum DbError {
    /// Some id or email doesn't resolve to anything.
    NotFound(String),
    /// A business rule (or uniqueness constraint) forbids the change.
    Conflict(String),
    /// The request itself is malformed.
    Invalid(String),
    /// Anything going wrong with the database itself.
    Data(String),
}

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    pub fn annotate(self, annotation: &str) -> Self {
        match self {
            DbError::NotFound(s) => DbError::NotFound(format!("{}: {}", annotation, &s)),
            DbError::Conflict(s) => DbError::Conflict(format!("{}: {}", annotation, &s)),
            DbError::Invalid(s) => DbError::Invalid(format!("{}: {}", annotation, &s)),
            DbError::Data(s) => DbError::Data(format!("{}: {}", annotation, &s)),
        }
    }

    pub fn display(&self) -> &str {
        match self {
            DbError::NotFound(s) => s,
            DbError::Conflict(s) => s,
            DbError::Invalid(s) => s,
            DbError::Data(s) => s,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            s.push_str(&format!("; {}", dbe));
        }
        match e.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => DbError::Conflict(s),
            _ => DbError::Data(s),
        }
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError::Data(s) }
}

impl From<Refusal> for DbError {
    fn from(r: Refusal) -> DbError {
        match r {
            Refusal::NotEnrolled => DbError::NotFound(r.to_string()),
            _ => DbError::Conflict(r.to_string()),
        }
    }
}

pub struct Store {
    config: tokio_postgres::Config,
    limits: Limits,
}

impl Store {
    pub fn new(config: tokio_postgres::Config, limits: Limits) -> Self {
        log::trace!("Store::new( {:?}, {:?} ) called.", &config, &limits);

        Self { config, limits }
    }

    pub fn limits(&self) -> &Limits { &self.limits }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!("Store::connect() called.");

        match self.config.connect(NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(*test_stmt, &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(*create_stmt, &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look at
    the ERROR level log output when testing to ensure this method did its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(*drop_stmt, &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err.display());
            }
        }

        log::trace!("    ....nuking complete.");
        Ok(())
    }
}
