use std::io::{self, BufRead};

use serde_json::Value;
use smart_kissan::config::Config;
use smart_kissan::rpc::{emit_line, err_response, JsonRpcRequest, Shell, PARSE_ERROR};
use smart_kissan::telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    telemetry::init();

    let config = Config::load();
    let mut shell = Shell::new(&config);
    let handle = tokio::runtime::Handle::current();

    // Stdin loop on a blocking thread to avoid blocking the async runtime.
    let result = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut line = String::new();

        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                _ => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    let resp = err_response(
                        Value::Number(0.into()),
                        PARSE_ERROR,
                        format!("Parse error: {e}"),
                    );
                    emit_line(&mut out, &resp);
                    continue;
                }
            };

            let is_shutdown = request.method == "shutdown";

            let response = handle.block_on(shell.handle_request(&request, &mut out));
            emit_line(&mut out, &response);

            if is_shutdown {
                info!("Shutdown requested");
                break;
            }
        }
    })
    .await;

    if let Err(e) = result {
        error!(error = %e, "stdin loop terminated abnormally");
    }
}
