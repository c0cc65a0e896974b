/*!
People: the students and teachers who log in.

Every `Person` row owns exactly one profile, either a `Student` or a
`Teacher`, and `Role` says which.
*/
use std::io::Read;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum Role {
    Student,
    Teacher,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Student" => Ok(Role::Student),
            "Teacher" => Ok(Role::Teacher),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub person_id: i64,
    pub name: String,
    pub email: String,
    /// Sum of the credits of every enrolled subject.
    pub total_credits: i64,
    pub enrolled_count: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: i64,
    pub person_id: i64,
    pub name: String,
    pub email: String,
    /// Number of subjects this teacher currently owns.
    pub total_subjects: i64,
}

/// What the login check needs to know about a person.
#[derive(Debug)]
pub struct Credentials {
    /// Student or teacher id, depending on role.
    pub profile_id: i64,
    pub name: String,
    pub email: String,
    pub hash: String,
}

/// Data needed to create a new person along with their profile.
#[derive(Clone, Debug, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name must not be blank.".to_owned());
        }
        validate_email(&self.email)?;
        if self.password.is_empty() {
            return Err("Password must not be blank.".to_owned());
        }
        Ok(())
    }

    /**
    Registration .csv rows look like this

    ```csv
    #name,          email,                  password
    Ada Lovelace,   ada@example.edu,        hunter2
    ```
    */
    pub fn from_csv_line(
        row: &csv::StringRecord
    ) -> Result<Registration, &'static str> {
        log::trace!("Registration::from_csv_line( {:?} ) called.", row);

        let name = match row.get(0) {
            Some(s) => s.to_owned(),
            None => { return Err("no name"); },
        };
        let email = match row.get(1) {
            Some(s) => s.to_owned(),
            None => { return Err("no email address"); },
        };
        let password = match row.get(2) {
            Some(s) => s.to_owned(),
            None => { return Err("no password"); },
        };

        Ok(Registration { name, email, password })
    }

    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<Registration>, String> {
        log::trace!("Registration::vec_from_csv_reader(...) called.");

        let mut csv_reader = crate::csv_reader(r);
        let mut regs: Vec<Registration> = Vec::new();

        for (n, res) in csv_reader.records().enumerate() {
            let record = res.map_err(|e| crate::csv_error_message(n, e.position(), &e))?;
            let reg = Registration::from_csv_line(&record)
                .map_err(|e| crate::csv_error_message(n, record.position(), &e))?;
            regs.push(reg);
        }

        log::trace!(
            "Registration::vec_from_csv_reader() returns {} Registrations.",
            regs.len()
        );
        Ok(regs)
    }
}

/// Fields of a person that may be changed after registration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl PersonUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("Name must not be blank.".to_owned());
            }
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(password) = &self.password {
            if password.is_empty() {
                return Err("Password must not be blank.".to_owned());
            }
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), String> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(format!("{:?} is not a usable email address.", email)),
    }
}
