/*!
Student registration, lookup, and enrollment.
*/
use axum::extract::Path;

use crate::{
    auth,
    subject::Subject,
    user::{Registration, Student},
};
use super::*;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentDetail {
    #[serde(flatten)]
    student: Student,
    subjects: Vec<Subject>,
}

/// `POST /api/students`
pub async fn register(
    Extension(glob): Extension<Arc<Glob>>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> Response {
    let reg = match json_body(payload) {
        Ok(reg) => reg,
        Err(resp) => { return resp; },
    };
    log::trace!("student::register( {:?}, {:?} ) called.", &reg.name, &reg.email);

    if let Err(e) = reg.validate() {
        return respond_bad_request(e);
    }

    let hash = match auth::hash_password(&reg.password, glob.bcrypt_cost).await {
        Ok(hash) => hash,
        Err(e) => { return respond_db_error(e); },
    };

    match glob.data().insert_student(&reg.name, &reg.email, &hash).await {
        Ok(s) => {
            log::info!("Registered Student {} ({}).", &s.id, &s.email);
            respond_json(StatusCode::CREATED, &s)
        },
        Err(e) => respond_db_error(e),
    }
}

/// `GET /api/students`
pub async fn list(Extension(glob): Extension<Arc<Glob>>) -> Response {
    log::trace!("student::list() called.");

    match glob.data().get_students().await {
        Ok(students) => respond_json(StatusCode::OK, &students),
        Err(e) => respond_db_error(e),
    }
}

/// `GET /api/students/:id`
pub async fn one(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("student::one( {} ) called.", &id);

    match glob.data().get_student_detail(id).await {
        Ok((student, subjects)) => respond_json(
            StatusCode::OK,
            &StudentDetail { student, subjects }
        ),
        Err(e) => respond_db_error(e),
    }
}

/// `DELETE /api/students/:id`
pub async fn delete(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("student::delete( {}, {:?} ) called.", &id, &ident);

    if let Err(resp) = require_student(&ident, id) {
        return resp;
    }

    match glob.data().delete_student(id).await {
        Ok(()) => {
            log::info!("Deleted Student {}.", &id);
            respond_json(StatusCode::OK, &json!({ "message": "Student deleted." }))
        },
        Err(e) => respond_db_error(e),
    }
}

/// `GET /api/students/:id/subjects`
pub async fn subjects(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("student::subjects( {} ) called.", &id);

    match glob.data().get_student_subjects(id).await {
        Ok(subjects) => respond_json(StatusCode::OK, &subjects),
        Err(e) => respond_db_error(e),
    }
}

/// `GET /api/students/:id/subjects/:subject_id/classmates`
pub async fn classmates(
    Path((id, subject_id)): Path<(i64, i64)>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("student::classmates( {}, {}, {:?} ) called.", &id, &subject_id, &ident);

    if let Err(resp) = require_student(&ident, id) {
        return resp;
    }

    match glob.data().get_classmates(id, subject_id).await {
        Ok(mates) => respond_json(StatusCode::OK, &mates),
        Err(e) => respond_db_error(e),
    }
}

/// `POST /api/students/:id/subjects/:subject_id/enroll`
pub async fn enroll(
    Path((id, subject_id)): Path<(i64, i64)>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("student::enroll( {}, {}, {:?} ) called.", &id, &subject_id, &ident);

    if let Err(resp) = require_student(&ident, id) {
        return resp;
    }

    match glob.data().enroll(id, subject_id).await {
        Ok(subject) => respond_json(StatusCode::OK, &json!({
            "message": "Enrollment successful.",
            "subject": subject,
        })),
        Err(e) => respond_db_error(e.annotate("Unable to enroll")),
    }
}

/// `POST /api/students/:id/subjects/:subject_id/drop`
pub async fn drop(
    Path((id, subject_id)): Path<(i64, i64)>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("student::drop( {}, {}, {:?} ) called.", &id, &subject_id, &ident);

    if let Err(resp) = require_student(&ident, id) {
        return resp;
    }

    match glob.data().drop_subject(id, subject_id).await {
        Ok(dropped) => respond_json(StatusCode::OK, &dropped),
        Err(e) => respond_db_error(e.annotate("Unable to drop")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_flattens_student() {
        let detail = StudentDetail {
            student: Student {
                id: 4,
                person_id: 9,
                name: "Ada Lovelace".to_owned(),
                email: "ada@example.edu".to_owned(),
                total_credits: 8,
                enrolled_count: 2,
            },
            subjects: Vec::new(),
        };

        let v = serde_json::to_value(&detail).unwrap();
        assert_eq!(v["id"], 4);
        assert_eq!(v["totalCredits"], 8);
        assert_eq!(v["enrolledCount"], 2);
        assert!(v["subjects"].as_array().unwrap().is_empty());
    }
}
