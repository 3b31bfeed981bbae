use std::io;
use std::process::ExitCode;

use logscope::server::protocol::Response;
use logscope::server::Dispatcher;

fn main() -> ExitCode {
    let stdout = io::stdout();

    match Dispatcher::run(io::stdin(), stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let record = Response::Error {
                message: format!("Internal: {err:#}"),
            };
            if let Ok(json) = serde_json::to_string(&record) {
                eprintln!("{json}");
            }
            ExitCode::FAILURE
        }
    }
}
