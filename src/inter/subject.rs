/*!
Subject CRUD. Anyone logged in may look; only teachers may change things.
*/
use axum::extract::Path;

use crate::{
    enroll::{self, Limits, Load},
    subject::{Subject, SubjectDraft, SubjectPatch, SubjectStats},
};
use super::*;

/// A subject as listed for browsing, marked with whether the caller could
/// enroll in it right now (students only).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Available {
    #[serde(flatten)]
    subject: Subject,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_enroll: Option<bool>,
}

fn mark_available(
    subjects: Vec<Subject>,
    load: Option<&Load>,
    limits: &Limits,
) -> Vec<Available> {
    subjects.into_iter().map(|subject| {
        let can_enroll = load.map(|load| enroll::can_enroll(limits, load, &subject.seat()));
        Available { subject, can_enroll }
    }).collect()
}

/// `POST /api/subjects`
pub async fn create(
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
    payload: Result<Json<SubjectDraft>, JsonRejection>,
) -> Response {
    let draft = match json_body(payload) {
        Ok(draft) => draft,
        Err(resp) => { return resp; },
    };
    log::trace!("subject::create( {:?}, {:?} ) called.", &draft, &ident);

    if let Err(resp) = require_teacher(&ident) {
        return resp;
    }

    match glob.data().insert_subject(&draft).await {
        Ok(subj) => {
            log::info!("Teacher {} created Subject {} ({}).", &ident.id, &subj.id, &subj.code);
            respond_json(StatusCode::CREATED, &subj)
        },
        Err(e) => respond_db_error(e),
    }
}

pub async fn list(Extension(glob): Extension<Arc<Glob>>) -> Response {
    log::trace!("subject::list() called.");

    match glob.data().get_subjects().await {
        Ok(subjects) => respond_json(StatusCode::OK, &subjects),
        Err(e) => respond_db_error(e),
    }
}

pub async fn one(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("subject::one( {} ) called.", &id);

    match glob.data().get_subject(id).await {
        Ok(subj) => respond_json(StatusCode::OK, &subj),
        Err(e) => respond_db_error(e),
    }
}

/// `GET /api/subjects/:id/stats`
pub async fn stats(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("subject::stats( {} ) called.", &id);

    match glob.data().get_subject(id).await {
        Ok(subj) => respond_json(StatusCode::OK, &SubjectStats::from(subj)),
        Err(e) => respond_db_error(e),
    }
}

/// `GET /api/subjects/available`
pub async fn available(
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("subject::available( {:?} ) called.", &ident);

    let subjects = match glob.data().get_subjects().await {
        Ok(subjects) => subjects,
        Err(e) => { return respond_db_error(e); },
    };

    let load = match ident.role {
        Role::Teacher => None,
        Role::Student => match glob.data().get_student_load(ident.id).await {
            Ok(load) => Some(load),
            Err(e) => { return respond_db_error(e); },
        },
    };

    let marked = mark_available(subjects, load.as_ref(), glob.data().limits());
    respond_json(StatusCode::OK, &marked)
}

/// `PUT /api/subjects/:id`
pub async fn update(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
    payload: Result<Json<SubjectPatch>, JsonRejection>,
) -> Response {
    let patch = match json_body(payload) {
        Ok(patch) => patch,
        Err(resp) => { return resp; },
    };
    log::trace!("subject::update( {}, {:?}, {:?} ) called.", &id, &patch, &ident);

    if let Err(resp) = require_teacher(&ident) {
        return resp;
    }

    match glob.data().update_subject(id, &patch).await {
        Ok(subj) => respond_json(StatusCode::OK, &subj),
        Err(e) => respond_db_error(e),
    }
}

/// `DELETE /api/subjects/:id`
pub async fn delete(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("subject::delete( {}, {:?} ) called.", &id, &ident);

    if let Err(resp) = require_teacher(&ident) {
        return resp;
    }

    match glob.data().delete_subject(id).await {
        Ok(n) => {
            log::info!("Teacher {} deleted Subject {} ({} enrollments).", &ident.id, &id, &n);
            respond_json(StatusCode::OK, &json!({
                "message": "Subject deleted.",
                "enrollmentsRemoved": n,
            }))
        },
        Err(e) => respond_db_error(e),
    }
}
