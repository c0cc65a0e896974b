/*!
Here we go!

```bash
registrar [ config.toml ]
```

The config file may also be named by the `REGISTRAR_CONFIG` environment
variable; with neither, built-in defaults are used.
*/
use std::sync::Arc;

use simplelog::{ColorChoice, TerminalMode, TermLogger};

use registrar::{config, inter};

#[tokio::main]
async fn main() -> Result<(), String> {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("registrar")
        .build();
    TermLogger::init(
        registrar::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).map_err(|e| format!("Unable to start logging: {}", &e))?;
    log::info!("Logging started.");

    let config_path = std::env::args().nth(1)
        .or_else(|| std::env::var("REGISTRAR_CONFIG").ok());

    let glob = config::load_configuration(config_path.as_deref()).await?;
    let glob = Arc::new(glob);
    let addr = glob.addr;

    let app = inter::router(glob)?;

    log::info!("Listening on {}", &addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| format!("Server error: {}", &e))
}
