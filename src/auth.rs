/*!
Authentication: password hashes and the keys handed out at login.

Passwords are stored (in the data DB's `people` table) as bcrypt hashes.
A successful login issues a random key, which the client then presents as
`Authorization: Bearer <key>`. Keys live in their own database:

```sql
CREATE TABLE keys (
    key     TEXT PRIMARY KEY,
    role    TEXT NOT NULL,      /* one of { 'Student', 'Teacher' } */
    id      BIGINT NOT NULL,    /* student or teacher id */
    expires TIMESTAMPTZ NOT NULL
);
```

Everything downstream of the key check only ever sees an `Identity`.
*/
use rand::{Rng, distributions::Alphanumeric};
use time::{Duration, OffsetDateTime};
use tokio_postgres::{Client, NoTls};

use crate::{
    store::DbError,
    user::{Credentials, Role},
};

pub const DEFAULT_KEY_LENGTH: usize = 32;
pub const DEFAULT_KEY_LIFETIME: i64 = 24 * 60 * 60;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'keys'",
        "CREATE TABLE keys (
            key     TEXT PRIMARY KEY,
            role    TEXT NOT NULL,
            id      BIGINT NOT NULL,
            expires TIMESTAMPTZ NOT NULL
        )",
        "DROP TABLE keys",
    ),
];

/// Who is making a request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Identity {
    pub role: Role,
    /// Student id or teacher id, depending on `role`.
    pub id: i64,
}

impl Identity {
    pub fn is_student(&self, id: i64) -> bool {
        self.role == Role::Student && self.id == id
    }

    pub fn is_teacher(&self, id: i64) -> bool {
        self.role == Role::Teacher && self.id == id
    }
}

#[derive(Debug, PartialEq)]
pub enum AuthResult {
    Key(String),
    Valid(Identity),
    BadPassword,
    NoSuchUser,
    InvalidKey,
}

/// Hash `password` with bcrypt at the given `cost`, on the blocking pool.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, DbError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| DbError::Data(format!("Password hashing task failed: {}", &e)))?
        .map_err(|e| DbError::Data(format!("Unable to hash password: {}", &e)))
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, DbError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| DbError::Data(format!("Password verification task failed: {}", &e)))?
        .map_err(|e| DbError::Data(format!("Unable to verify password: {}", &e)))
}

pub struct Db {
    config: tokio_postgres::Config,
    key_length: usize,
    key_lifetime: Duration,
}

impl Db {
    pub fn new(config: tokio_postgres::Config) -> Self {
        log::trace!("auth::Db::new( {:?} ) called.", &config);

        Self {
            config,
            key_length: DEFAULT_KEY_LENGTH,
            key_lifetime: Duration::seconds(DEFAULT_KEY_LIFETIME),
        }
    }

    /// Set the length of keys to generate.
    ///
    /// Will quietly do nothing if set to zero.
    pub fn set_key_length(&mut self, new_length: usize) {
        if new_length > 0 {
            self.key_length = new_length;
        }
    }

    /// Set how long, in seconds, a newly-issued key stays good.
    ///
    /// Will quietly do nothing if not positive.
    pub fn set_key_lifetime(&mut self, seconds: i64) {
        if seconds > 0 {
            self.key_lifetime = Duration::seconds(seconds);
        }
    }

    fn generate_key(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.key_length)
            .map(char::from)
            .collect()
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!("auth::Db::connect() called.");

        match self.config.connect(NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Auth DB connection error: {}", &e);
                    }
                });
                Ok(client)
            },
            Err(e) => Err(DbError::from(e).annotate("Unable to connect to auth DB")),
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("auth::Db::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

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
            .map_err(|e| DbError::from(e).annotate("Error committing transaction"))
    }

    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("auth::Db::nuke_database() called.");

        let client = self.connect().await?;
        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(*drop_stmt, &[]).await {
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &DbError::from(e));
            }
        }
        Ok(())
    }

    /**
    Check `password` against `creds` (as looked up for the given `role`) and,
    if it matches, issue and store a new key.

    Returns `AuthResult::Key(_)` on success, `NoSuchUser` if `creds` is
    `None`, and `BadPassword` if the password is wrong.
    */
    pub async fn check_password_and_issue_key(
        &self,
        creds: Option<&Credentials>,
        password: &str,
        role: Role,
    ) -> Result<AuthResult, DbError> {
        let creds = match creds {
            Some(creds) => creds,
            None => { return Ok(AuthResult::NoSuchUser); },
        };
        log::trace!(
            "auth::Db::check_password_and_issue_key( {:?}, [ password ], {} ) called.",
            &creds.email, &role
        );

        if !verify_password(password, &creds.hash).await? {
            return Ok(AuthResult::BadPassword);
        }

        let key = self.generate_key();
        let expires = OffsetDateTime::now_utc() + self.key_lifetime;

        let client = self.connect().await?;
        client.execute(
            "INSERT INTO keys (key, role, id, expires) VALUES ($1, $2, $3, $4)",
            &[&key, &role.to_string(), &creds.profile_id, &expires]
        ).await?;

        log::trace!("Issued key to {} {}.", &role, &creds.profile_id);
        Ok(AuthResult::Key(key))
    }

    /// Resolve `key` to the `Identity` it was issued to, if it is known and
    /// hasn't expired.
    pub async fn check_key(&self, key: &str) -> Result<AuthResult, DbError> {
        log::trace!("auth::Db::check_key( [ key ] ) called.");

        let client = self.connect().await?;
        let row = match client.query_opt(
            "SELECT role, id FROM keys WHERE key = $1 AND expires > now()",
            &[&key]
        ).await? {
            None => { return Ok(AuthResult::InvalidKey); },
            Some(row) => row,
        };

        let role_str: &str = row.try_get("role")?;
        let ident = Identity {
            role: role_str.parse()?,
            id: row.try_get("id")?,
        };
        Ok(AuthResult::Valid(ident))
    }

    pub async fn revoke_key(&self, key: &str) -> Result<(), DbError> {
        log::trace!("auth::Db::revoke_key( [ key ] ) called.");

        let client = self.connect().await?;
        client.execute("DELETE FROM keys WHERE key = $1", &[&key]).await?;
        Ok(())
    }

    /// Remove every expired key, returning how many went.
    pub async fn cull_keys(&self) -> Result<usize, DbError> {
        log::trace!("auth::Db::cull_keys() called.");

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM keys WHERE expires <= now()", &[]).await?;
        Ok(n as usize)
    }
}
