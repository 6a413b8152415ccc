use std::process::ExitCode;

fn main() -> ExitCode {
    match actionsd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("actionsd: {error}");
            ExitCode::FAILURE
        }
    }
}
