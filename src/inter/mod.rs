/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `auth` and `store`.)

Everything is JSON. Errors come back as `{ "error": "<message>" }` with the
appropriate status code.
*/
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::{header, HeaderValue, Method, Request, StatusCode},
    http::header::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::{
    auth::{AuthResult, Identity},
    config::Glob,
    store::DbError,
    user::Role,
};

pub mod login;
pub mod student;
pub mod subject;
pub mod teacher;

static TEXT_500: &str = "An internal error occurred; an appropriate response was inconstructable.";

pub fn respond_error(code: StatusCode, msg: &str) -> Response {
    (code, Json(json!({ "error": msg }))).into_response()
}

pub fn text_500(text: Option<String>) -> Response {
    match text {
        Some(text) => respond_error(StatusCode::INTERNAL_SERVER_ERROR, &text),
        None => respond_error(StatusCode::INTERNAL_SERVER_ERROR, TEXT_500),
    }
}

pub fn respond_bad_request(msg: String) -> Response {
    log::trace!("respond_bad_request( {:?} ) called.", &msg);
    respond_error(StatusCode::BAD_REQUEST, &msg)
}

pub fn respond_unauthorized(msg: &str) -> Response {
    log::trace!("respond_unauthorized( {:?} ) called.", msg);
    respond_error(StatusCode::UNAUTHORIZED, msg)
}

pub fn respond_forbidden(msg: &str) -> Response {
    log::trace!("respond_forbidden( {:?} ) called.", msg);
    respond_error(StatusCode::FORBIDDEN, msg)
}

/// Map a store error to the response it deserves. `Data` errors are logged
/// here and not passed on to the client.
pub fn respond_db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound(msg) => respond_error(StatusCode::NOT_FOUND, &msg),
        DbError::Conflict(msg) => respond_error(StatusCode::CONFLICT, &msg),
        DbError::Invalid(msg) => respond_bad_request(msg),
        DbError::Data(msg) => {
            log::error!("{}", &msg);
            text_500(None)
        },
    }
}

/// Serialize `data` as the body of a response with status `code`.
pub fn respond_json<S: Serialize>(code: StatusCode, data: &S) -> Response {
    (code, Json(data)).into_response()
}

/// Unwrap a JSON body, or produce the 400 to send instead.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(t)) => Ok(t),
        Err(e) => Err(respond_bad_request(e.body_text())),
    }
}

/// Pull the key out of an `Authorization: Bearer <key>` header.
pub fn bearer_key(headers: &HeaderMap) -> Result<&str, &'static str> {
    let val = match headers.get(header::AUTHORIZATION) {
        Some(val) => val,
        None => { return Err("Request must have an Authorization header."); },
    };
    let val = val.to_str()
        .map_err(|_| "Authorization header value unrecognizable.")?;

    match val.split_once(' ') {
        Some((scheme, key)) if scheme.eq_ignore_ascii_case("bearer") => {
            let key = key.trim();
            if key.is_empty() {
                Err("Authorization header has no key.")
            } else {
                Ok(key)
            }
        },
        _ => Err("Authorization header must be of the form \"Bearer <key>\"."),
    }
}

/// Pass only if the caller is the student with id `id`.
pub fn require_student(ident: &Identity, id: i64) -> Result<(), Response> {
    if ident.is_student(id) {
        Ok(())
    } else {
        Err(respond_forbidden("You may only act on your own student record."))
    }
}

/// Pass only if the caller is the teacher with id `id`.
pub fn require_self_teacher(ident: &Identity, id: i64) -> Result<(), Response> {
    if ident.is_teacher(id) {
        Ok(())
    } else {
        Err(respond_forbidden("You may only act on your own teacher record."))
    }
}

/// Pass only if the caller is some teacher.
pub fn require_teacher(ident: &Identity) -> Result<(), Response> {
    if ident.role == Role::Teacher {
        Ok(())
    } else {
        Err(respond_forbidden("Only teachers may do that."))
    }
}

/**
Middleware that resolves the bearer key to an `Identity` and inserts it into
the request's extensions for the handlers downstream.
*/
pub async fn key_authenticate<B>(
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    let glob: Arc<Glob> = match req.extensions().get::<Arc<Glob>>() {
        Some(glob) => glob.clone(),
        None => {
            log::error!("key_authenticate() found no Glob in request extensions.");
            return text_500(None);
        },
    };

    let key = match bearer_key(req.headers()) {
        Ok(key) => key.to_owned(),
        Err(msg) => { return respond_unauthorized(msg); },
    };

    let ident = match glob.auth().check_key(&key).await {
        Err(e) => {
            log::error!("auth::Db::check_key( [ key ] ) returned error: {}", &e);
            return text_500(None);
        },
        Ok(AuthResult::InvalidKey) => {
            return respond_unauthorized("Invalid authorization key.");
        },
        Ok(AuthResult::Valid(ident)) => ident,
        Ok(x) => {
            log::warn!(
                "auth::Db::check_key() returned {:?}, which should never happen.",
                &x
            );
            return text_500(None);
        },
    };

    req.extensions_mut().insert(ident);
    next.run(req).await
}

fn cors_layer(origin: &str) -> Result<CorsLayer, String> {
    let origin: HeaderValue = origin.parse()
        .map_err(|e| format!("Invalid CORS origin {:?}: {}", origin, &e))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// The whole API, nested under `/api`.
pub fn router(glob: Arc<Glob>) -> Result<Router, String> {
    let cors = cors_layer(&glob.cors_origin)?;

    let open = Router::new()
        .route("/auth/login/:role", post(login::login))
        .route("/auth/check-email", post(login::check_email))
        .route("/students", post(student::register))
        .route("/teachers", post(teacher::register));

    let keyed = Router::new()
        .route("/auth/logout", post(login::logout))
        .route("/students", get(student::list))
        .route("/students/:id", get(student::one).delete(student::delete))
        .route("/students/:id/subjects", get(student::subjects))
        .route(
            "/students/:id/subjects/:subject_id/classmates",
            get(student::classmates)
        )
        .route("/students/:id/subjects/:subject_id/enroll", post(student::enroll))
        .route("/students/:id/subjects/:subject_id/drop", post(student::drop))
        .route("/teachers", get(teacher::list))
        .route(
            "/teachers/:id",
            get(teacher::one).put(teacher::update).delete(teacher::delete)
        )
        .route("/teachers/:id/subjects", get(teacher::subjects))
        .route("/subjects", get(subject::list).post(subject::create))
        .route("/subjects/available", get(subject::available))
        .route(
            "/subjects/:id",
            get(subject::one).put(subject::update).delete(subject::delete)
        )
        .route("/subjects/:id/stats", get(subject::stats))
        .route_layer(middleware::from_fn(key_authenticate));

    let api = open.merge(keyed);

    Ok(Router::new()
        .nest("/api", api)
        .layer(Extension(glob))
        .layer(cors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cfg;

    use axum::body::Body;
    use tower::ServiceExt;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn bearer_keys() {
        assert_eq!(bearer_key(&headers_with("Bearer abc123")), Ok("abc123"));
        assert_eq!(bearer_key(&headers_with("bearer   abc123 ")), Ok("abc123"));
        assert!(bearer_key(&headers_with("Basic abc123")).is_err());
        assert!(bearer_key(&headers_with("Bearer ")).is_err());
        assert!(bearer_key(&headers_with("abc123")).is_err());
        assert!(bearer_key(&HeaderMap::new()).is_err());
    }

    #[test]
    fn error_statuses() {
        let cases = [
            (DbError::NotFound("x".to_owned()), StatusCode::NOT_FOUND),
            (DbError::Conflict("x".to_owned()), StatusCode::CONFLICT),
            (DbError::Invalid("x".to_owned()), StatusCode::BAD_REQUEST),
            (DbError::Data("x".to_owned()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (e, code) in cases {
            assert_eq!(respond_db_error(e).status(), code);
        }
    }

    #[test]
    fn permission_checks() {
        let student = Identity { role: Role::Student, id: 5 };
        let teacher = Identity { role: Role::Teacher, id: 5 };

        assert!(require_student(&student, 5).is_ok());
        assert_eq!(require_student(&student, 6).unwrap_err().status(), StatusCode::FORBIDDEN);
        assert!(require_student(&teacher, 5).is_err());

        assert!(require_teacher(&teacher).is_ok());
        assert!(require_teacher(&student).is_err());
        assert!(require_self_teacher(&teacher, 5).is_ok());
        assert!(require_self_teacher(&teacher, 4).is_err());
    }

    // Nothing here gets as far as a database.
    fn app() -> Router {
        router(Arc::new(Glob::new(&Cfg::default()))).unwrap()
    }

    async fn status_of(req: Request<Body>) -> StatusCode {
        app().oneshot(req).await.unwrap().status()
    }

    fn bare(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn json_post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn keyed_routes_need_a_key() {
        for (method, uri) in [
            (Method::GET, "/api/students"),
            (Method::GET, "/api/students/1"),
            (Method::POST, "/api/students/1/subjects/2/enroll"),
            (Method::POST, "/api/students/1/subjects/2/drop"),
            (Method::GET, "/api/subjects/available"),
            (Method::GET, "/api/subjects/3/stats"),
            (Method::PUT, "/api/teachers/1"),
            (Method::DELETE, "/api/subjects/3"),
            (Method::POST, "/api/auth/logout"),
        ] {
            assert_eq!(
                status_of(bare(method.clone(), uri)).await,
                StatusCode::UNAUTHORIZED,
                "{} {}", &method, uri
            );
        }
    }

    #[tokio::test]
    async fn malformed_authorization_is_unauthorized() {
        let req = Request::builder()
            .uri("/api/subjects")
            .header(header::AUTHORIZATION, "Basic dXNlcjpwdw==")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn open_routes_skip_the_key_check() {
        // Missing fields are caught before any hashing or store access.
        assert_eq!(status_of(json_post("/api/students", "{}")).await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of(json_post("/api/teachers", "{}")).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(json_post("/api/auth/check-email", "not json")).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(json_post(
                "/api/students",
                r#"{ "name": "Ada", "email": "nope", "password": "x" }"#
            )).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn unknown_routes() {
        assert_eq!(status_of(bare(Method::GET, "/api/nowhere")).await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(bare(Method::GET, "/students")).await, StatusCode::NOT_FOUND);
    }

    #[test]
    fn cors_origin_must_parse() {
        assert!(cors_layer("http://localhost:4200").is_ok());
        assert!(cors_layer("bad\norigin").is_err());
    }
}
