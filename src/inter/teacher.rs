/*!
Subcrate for interoperation with Teacher users.
*/
use axum::extract::Path;

use crate::{
    auth,
    user::{PersonUpdate, Registration},
};
use super::*;

/// `POST /api/teachers`
pub async fn register(
    Extension(glob): Extension<Arc<Glob>>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> Response {
    let reg = match json_body(payload) {
        Ok(reg) => reg,
        Err(resp) => { return resp; },
    };
    log::trace!("teacher::register( {:?}, {:?} ) called.", &reg.name, &reg.email);

    if let Err(e) = reg.validate() {
        return respond_bad_request(e);
    }

    let hash = match auth::hash_password(&reg.password, glob.bcrypt_cost).await {
        Ok(hash) => hash,
        Err(e) => { return respond_db_error(e); },
    };

    match glob.data().insert_teacher(&reg.name, &reg.email, &hash).await {
        Ok(t) => {
            log::info!("Registered Teacher {} ({}).", &t.id, &t.email);
            respond_json(StatusCode::CREATED, &t)
        },
        Err(e) => respond_db_error(e),
    }
}

pub async fn list(Extension(glob): Extension<Arc<Glob>>) -> Response {
    log::trace!("teacher::list() called.");

    match glob.data().get_teachers().await {
        Ok(teachers) => respond_json(StatusCode::OK, &teachers),
        Err(e) => respond_db_error(e),
    }
}

pub async fn one(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("teacher::one( {} ) called.", &id);

    match glob.data().get_teacher(id).await {
        Ok(t) => respond_json(StatusCode::OK, &t),
        Err(e) => respond_db_error(e),
    }
}

/**
`PUT /api/teachers/:id`

Only the teacher themself may change their name, email, or password. A new
password gets hashed before it goes anywhere near the store.
*/
pub async fn update(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
    payload: Result<Json<PersonUpdate>, JsonRejection>,
) -> Response {
    let upd = match json_body(payload) {
        Ok(upd) => upd,
        Err(resp) => { return resp; },
    };
    log::trace!("teacher::update( {}, {:?}, {:?} ) called.", &id, &upd.email, &ident);

    if let Err(resp) = require_self_teacher(&ident, id) {
        return resp;
    }
    if let Err(e) = upd.validate() {
        return respond_bad_request(e);
    }

    let hash = match &upd.password {
        Some(password) => match auth::hash_password(password, glob.bcrypt_cost).await {
            Ok(hash) => Some(hash),
            Err(e) => { return respond_db_error(e); },
        },
        None => None,
    };

    match glob.data().update_teacher(id, &upd, hash.as_deref()).await {
        Ok(t) => respond_json(StatusCode::OK, &t),
        Err(e) => respond_db_error(e),
    }
}

/// `DELETE /api/teachers/:id`
pub async fn delete(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("teacher::delete( {}, {:?} ) called.", &id, &ident);

    if let Err(resp) = require_self_teacher(&ident, id) {
        return resp;
    }

    match glob.data().delete_teacher(id).await {
        Ok(()) => {
            log::info!("Deleted Teacher {}.", &id);
            respond_json(StatusCode::OK, &json!({ "message": "Teacher deleted." }))
        },
        Err(e) => respond_db_error(e),
    }
}

pub async fn subjects(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("teacher::subjects( {} ) called.", &id);

    match glob.data().get_teacher_subjects(id).await {
        Ok(subjects) => respond_json(StatusCode::OK, &subjects),
        Err(e) => respond_db_error(e),
    }
}
