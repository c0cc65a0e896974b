/*!
Structs to hold configuration data and global variables.

Settings come from three places, each overriding the last: `Cfg::default()`,
an optional TOML file, and a handful of environment variables.

```toml
addr = "0.0.0.0:8001"
cors_origin = "http://localhost:4200"
db_host = "localhost"
db_port = 5432
db_user = "registrar"
db_password = "registrar"
db_name = "registrar"
auth_db_name = "registrar_auth"
connect_timeout = 10      # seconds
key_lifetime = 86400      # seconds
bcrypt_cost = 12

[limits]
max_subjects = 3
max_credits = 21
max_teacher_subjects = 2
```
*/
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{auth, enroll::Limits, store::Store};

#[derive(Deserialize)]
struct ConfigFile {
    addr: Option<String>,
    cors_origin: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_user: Option<String>,
    db_password: Option<String>,
    db_name: Option<String>,
    auth_db_name: Option<String>,
    connect_timeout: Option<u64>,
    key_lifetime: Option<i64>,
    bcrypt_cost: Option<u32>,
    limits: Option<Limits>,
}

pub struct Cfg {
    pub addr: SocketAddr,
    pub cors_origin: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub auth_db_name: String,
    /// Seconds.
    pub connect_timeout: u64,
    /// Seconds an issued key stays good.
    pub key_lifetime: i64,
    pub bcrypt_cost: u32,
    pub limits: Limits,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            cors_origin: "http://localhost:4200".to_owned(),
            db_host: "localhost".to_owned(),
            db_port: 5432,
            db_user: "registrar".to_owned(),
            db_password: "registrar".to_owned(),
            db_name: "registrar".to_owned(),
            auth_db_name: "registrar_auth".to_owned(),
            connect_timeout: 10,
            key_lifetime: auth::DEFAULT_KEY_LIFETIME,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            limits: Limits::default(),
        }
    }
}

// Hand-written so the database password never ends up in the log.
impl std::fmt::Debug for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cfg")
            .field("addr", &self.addr)
            .field("cors_origin", &self.cors_origin)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_password", &"[ redacted ]")
            .field("db_name", &self.db_name)
            .field("auth_db_name", &self.auth_db_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("key_lifetime", &self.key_lifetime)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("limits", &self.limits)
            .finish()
    }
}

fn parse_addr(s: &str) -> Result<SocketAddr, String> {
    s.parse().map_err(|e| format!(
        "Error parsing {:?} as socket address: {}", s, &e
    ))
}

impl Cfg {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(text)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.addr {
            c.addr = parse_addr(&s)?;
        }
        if let Some(s) = cf.cors_origin {
            c.cors_origin = s;
        }
        if let Some(s) = cf.db_host {
            c.db_host = s;
        }
        if let Some(n) = cf.db_port {
            c.db_port = n;
        }
        if let Some(s) = cf.db_user {
            c.db_user = s;
        }
        if let Some(s) = cf.db_password {
            c.db_password = s;
        }
        if let Some(s) = cf.db_name {
            c.db_name = s;
        }
        if let Some(s) = cf.auth_db_name {
            c.auth_db_name = s;
        }
        if let Some(n) = cf.connect_timeout {
            c.connect_timeout = n;
        }
        if let Some(n) = cf.key_lifetime {
            c.key_lifetime = n;
        }
        if let Some(n) = cf.bcrypt_cost {
            if !(4..=31).contains(&n) {
                return Err(format!("bcrypt_cost must be between 4 and 31, not {}.", &n));
            }
            c.bcrypt_cost = n;
        }
        if let Some(limits) = cf.limits {
            c.limits = limits;
        }

        Ok(c)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file {}: {}", path.display(), &e))?;
        Self::from_toml(&file_contents)
    }

    /**
    Overlay values from the environment.

    `var` looks up a variable by name; `main()` passes a wrapper around
    `std::env::var`.
    */
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>
    {
        if let Some(s) = var("DB_HOST") {
            self.db_host = s;
        }
        if let Some(s) = var("DB_PORT") {
            self.db_port = s.parse().map_err(|e| format!(
                "Error parsing DB_PORT value {:?}: {}", &s, &e
            ))?;
        }
        if let Some(s) = var("DB_USER") {
            self.db_user = s;
        }
        if let Some(s) = var("DB_PASSWORD") {
            self.db_password = s;
        }
        if let Some(s) = var("DB_NAME") {
            self.db_name = s;
        }
        if let Some(s) = var("AUTH_DB_NAME") {
            self.auth_db_name = s;
        }
        if let Some(s) = var("REGISTRAR_ADDR") {
            self.addr = parse_addr(&s)?;
        }
        Ok(())
    }

    fn pg_config(&self, dbname: &str) -> tokio_postgres::Config {
        let mut c = tokio_postgres::Config::new();
        c.host(&self.db_host)
            .port(self.db_port)
            .user(&self.db_user)
            .password(&self.db_password)
            .dbname(dbname)
            .connect_timeout(Duration::from_secs(self.connect_timeout));
        c
    }

    pub fn data_db_config(&self) -> tokio_postgres::Config {
        self.pg_config(&self.db_name)
    }

    pub fn auth_db_config(&self) -> tokio_postgres::Config {
        self.pg_config(&self.auth_db_name)
    }
}

/**
This guy will haul around the database handles and the few settings the
handlers need, and be passed in an `axum::Extension` to the handlers who
need him.
*/
pub struct Glob {
    store: Store,
    auth: auth::Db,
    pub addr: SocketAddr,
    pub cors_origin: String,
    pub bcrypt_cost: u32,
}

impl Glob {
    pub fn new(cfg: &Cfg) -> Self {
        let mut auth = auth::Db::new(cfg.auth_db_config());
        auth.set_key_lifetime(cfg.key_lifetime);

        Self {
            store: Store::new(cfg.data_db_config(), cfg.limits),
            auth,
            addr: cfg.addr,
            cors_origin: cfg.cors_origin.clone(),
            bcrypt_cost: cfg.bcrypt_cost,
        }
    }

    pub fn data(&self) -> &Store { &self.store }

    pub fn auth(&self) -> &auth::Db { &self.auth }
}

/// Read the configuration (if `path` is given), apply environment
/// overrides, and build the configuration struct.
pub fn read_configuration<P: AsRef<Path>>(path: Option<P>) -> Result<Cfg, String> {
    let mut cfg = match path {
        Some(path) => Cfg::from_file(path)?,
        None => {
            log::info!("No configuration file given; using defaults.");
            Cfg::default()
        },
    };
    cfg.apply_env(|name| std::env::var(name).ok())?;
    Ok(cfg)
}

/// Loads system configuration and ensures all appropriate database tables
/// exist.
pub async fn load_configuration<P: AsRef<Path>>(path: Option<P>) -> Result<Glob, String> {
    let cfg = read_configuration(path)?;
    log::info!("Configuration read:\n{:#?}", &cfg);

    let glob = Glob::new(&cfg);

    log::trace!("Checking state of auth DB...");
    if let Err(e) = glob.auth().ensure_db_schema().await {
        return Err(format!("Unable to ensure state of auth DB: {}", &e));
    }
    log::trace!("...auth DB okay.");
    match glob.auth().cull_keys().await {
        Ok(0) => {},
        Ok(n) => { log::info!("Removed {} expired keys.", &n); },
        Err(e) => { log::warn!("Unable to remove expired keys: {}", &e); },
    }

    log::trace!("Checking state of data DB...");
    if let Err(e) = glob.data().ensure_db_schema().await {
        return Err(format!("Unable to ensure state of data DB: {}", &e));
    }
    log::trace!("...data DB okay.");

    Ok(glob)
}
