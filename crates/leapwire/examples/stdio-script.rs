//! A LEAP script: run it as a child of a LEAP host (e.g. a viewer started
//! with `--leap`), which talks to it over stdin/stdout.
//!
//! Lists the host's APIs, waits for one `mainloop` event and opens the
//! preferences floater.
//!
//! Build with:
//!   cargo build --example stdio-script --features logging

use std::sync::Arc;
use std::time::Duration;

use leapwire::client::{Client, ClientConfig};
use leapwire::logging::{init_stderr_logging, LevelFilter};
use leapwire::value::{Map, Value};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_stderr_logging(LevelFilter::INFO);

    let config = ClientConfig {
        call_timeout: Some(Duration::from_secs(10)),
        ..ClientConfig::viewer()
    };
    let client = Client::connect_stdio(config).await?;
    if let Some(welcome) = client.welcome() {
        info!(
            command_pump = %welcome.command_pump,
            process_id = ?welcome.process_id,
            "connected to host"
        );
    }

    let apis = client.sys_command("getAPIs", Map::new()).await?;
    let names: Vec<String> = apis
        .as_map()
        .map(|apis| apis.keys().map(str::to_string).collect())
        .unwrap_or_default();

    // Run every getAPI concurrently.
    let client = Arc::new(client);
    let mut calls = Vec::with_capacity(names.len());
    for name in names {
        let client = Arc::clone(&client);
        calls.push(tokio::spawn(async move {
            let mut args = Map::new();
            args.insert("api", name.as_str());
            let api = client.sys_command("getAPI", args).await;
            (name, api)
        }));
    }
    for call in calls {
        match call.await? {
            (name, Ok(api)) => eprintln!("===== {name} =====\n{api}"),
            (name, Err(err)) => warn!(api = %name, error = %err, "getAPI failed"),
        }
    }

    // The host starts forwarding mainloop once the first listener subscribes.
    let mut mainloop = client.listen("mainloop").await?;
    if let Some(event) = mainloop.recv().await {
        info!(%event, "mainloop tick");
    }
    mainloop.close();

    let build_map = client
        .command("LLFloaterReg", "getBuildMap", Map::new())
        .await?;
    eprintln!("{build_map}");

    let mut args = Map::new();
    args.insert("name", Value::from("preferences"));
    client
        .void_command("LLFloaterReg", "showInstance", args)
        .await?;

    client.close().await;
    Ok(())
}
