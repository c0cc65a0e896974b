/*!
Logging in and out, and checking whether an email address is taken.
*/
use axum::extract::Path;
use serde::Deserialize;

use crate::user::Role;
use super::*;

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailData {
    pub email: String,
}

static BAD_LOGIN: &str = "Invalid email/password combination.";

fn role_from_path(role: &str) -> Option<Role> {
    match role {
        "student" => Some(Role::Student),
        "teacher" => Some(Role::Teacher),
        _ => None,
    }
}

async fn profile_json(glob: &Glob, role: Role, id: i64) -> Result<serde_json::Value, DbError> {
    let value = match role {
        Role::Student => serde_json::to_value(glob.data().get_student(id).await?),
        Role::Teacher => serde_json::to_value(glob.data().get_teacher(id).await?),
    };
    value.map_err(|e| DbError::Data(format!("Error serializing profile: {}", &e)))
}

/// `POST /api/auth/login/{student|teacher}`
pub async fn login(
    Path(role): Path<String>,
    Extension(glob): Extension<Arc<Glob>>,
    payload: Result<Json<LoginData>, JsonRejection>,
) -> Response {
    let form = match json_body(payload) {
        Ok(form) => form,
        Err(resp) => { return resp; },
    };
    log::trace!("login( {:?}, {:?}, [ password ] ) called.", &role, &form.email);

    let role = match role_from_path(&role) {
        Some(role) => role,
        None => {
            return respond_error(
                StatusCode::NOT_FOUND,
                &format!("{:?} is not a role one can log in as.", &role)
            );
        },
    };

    let creds = match glob.data().get_credentials(&form.email, role).await {
        Ok(creds) => creds,
        Err(e) => { return respond_db_error(e); },
    };

    let auth_response = glob.auth().check_password_and_issue_key(
        creds.as_ref(),
        &form.password,
        role
    ).await;

    let key = match auth_response {
        Err(e) => { return respond_db_error(e.annotate("Error checking password")); },
        Ok(AuthResult::Key(k)) => k,
        Ok(AuthResult::BadPassword) | Ok(AuthResult::NoSuchUser) => {
            return respond_unauthorized(BAD_LOGIN);
        },
        Ok(x) => {
            log::warn!(
                "auth::Db::check_password_and_issue_key( {:?}, [ password ], {} ) returned {:?}, which shouldn't ever happen.",
                &form.email, &role, &x
            );
            return respond_unauthorized(BAD_LOGIN);
        },
    };

    // Present by construction: a key is only issued when credentials exist.
    let id = match creds {
        Some(c) => c.profile_id,
        None => { return text_500(None); },
    };

    let profile = match profile_json(&glob, role, id).await {
        Ok(profile) => profile,
        Err(e) => { return respond_db_error(e); },
    };

    log::info!("{} {} logged in.", &role, &id);
    respond_json(StatusCode::OK, &json!({
        "token": key,
        "role": role,
        "profile": profile,
    }))
}

/// `POST /api/auth/logout`
pub async fn logout(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<Glob>>,
    Extension(ident): Extension<Identity>,
) -> Response {
    log::trace!("logout( {:?} ) called.", &ident);

    let key = match bearer_key(&headers) {
        Ok(key) => key,
        Err(msg) => { return respond_unauthorized(msg); },
    };

    match glob.auth().revoke_key(key).await {
        Ok(()) => respond_json(StatusCode::OK, &json!({ "message": "Logged out." })),
        Err(e) => respond_db_error(e),
    }
}

/// `POST /api/auth/check-email`
pub async fn check_email(
    Extension(glob): Extension<Arc<Glob>>,
    payload: Result<Json<EmailData>, JsonRejection>,
) -> Response {
    let data = match json_body(payload) {
        Ok(data) => data,
        Err(resp) => { return resp; },
    };
    log::trace!("check_email( {:?} ) called.", &data.email);

    match glob.data().email_exists(&data.email).await {
        Ok(true) => respond_error(
            StatusCode::CONFLICT,
            &format!("Email {} is already registered.", &data.email)
        ),
        Ok(false) => respond_json(StatusCode::OK, &json!({ "available": true })),
        Err(e) => respond_db_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_roles() {
        assert_eq!(role_from_path("student"), Some(Role::Student));
        assert_eq!(role_from_path("teacher"), Some(Role::Teacher));
        assert_eq!(role_from_path("admin"), None);
        assert_eq!(role_from_path("Student"), None);
    }
}
