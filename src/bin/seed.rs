/*!
Populating a database with teachers, subjects, and students from .csv files,
to have something to experiment with.

```bash
seed teachers.csv subjects.csv students.csv
```

Database settings come from `REGISTRAR_CONFIG` and the usual environment
overrides, same as the server. Sample files live in `test/`.
*/
use std::fs::File;

use futures::future::try_join_all;
use simplelog::{ColorChoice, TerminalMode, TermLogger};

use registrar::{
    auth,
    config::{self, Glob},
    store::DbError,
    subject::SubjectRow,
    user::{Registration, Role},
};

fn read_registrations(path: &str) -> Result<Vec<Registration>, String> {
    let f = File::open(path)
        .map_err(|e| format!("Unable to open {:?}: {}", path, &e))?;
    let regs = Registration::vec_from_csv_reader(f)
        .map_err(|e| format!("Error reading {:?}: {}", path, &e))?;
    for reg in regs.iter() {
        reg.validate()
            .map_err(|e| format!("Bad record in {:?} ({}): {}", path, &reg.email, &e))?;
    }
    Ok(regs)
}

async fn insert_people(
    glob: &Glob,
    role: Role,
    regs: &[Registration],
) -> Result<usize, DbError> {
    let hashes = try_join_all(
        regs.iter().map(|r| auth::hash_password(&r.password, glob.bcrypt_cost))
    ).await?;
    glob.data().insert_people(role, regs, &hashes).await
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("registrar")
        .add_filter_allow_str("seed")
        .build();
    TermLogger::init(
        registrar::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).map_err(|e| format!("Unable to start logging: {}", &e))?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (teacher_file, subject_file, student_file) = match args.as_slice() {
        [t, su, st] => (t, su, st),
        _ => {
            return Err("usage: seed <teachers.csv> <subjects.csv> <students.csv>".to_owned());
        },
    };

    let teachers = read_registrations(teacher_file)?;
    let students = read_registrations(student_file)?;
    let subjects = {
        let f = File::open(subject_file)
            .map_err(|e| format!("Unable to open {:?}: {}", subject_file, &e))?;
        SubjectRow::vec_from_csv_reader(f)
            .map_err(|e| format!("Error reading {:?}: {}", subject_file, &e))?
    };

    let config_path = std::env::var("REGISTRAR_CONFIG").ok();
    let cfg = config::read_configuration(config_path.as_deref())?;
    let glob = Glob::new(&cfg);
    glob.data().ensure_db_schema().await
        .map_err(|e| format!("Unable to ensure state of data DB: {}", &e))?;

    let n = insert_people(&glob, Role::Teacher, &teachers).await
        .map_err(|e| format!("Error inserting teachers: {}", &e))?;
    log::info!("Inserted {} teachers.", &n);

    let n = glob.data().insert_subject_rows(&subjects).await
        .map_err(|e| format!("Error inserting subjects: {}", &e))?;
    log::info!("Inserted {} subjects.", &n);

    let n = insert_people(&glob, Role::Student, &students).await
        .map_err(|e| format!("Error inserting students: {}", &e))?;
    log::info!("Inserted {} students.", &n);

    Ok(())
}
