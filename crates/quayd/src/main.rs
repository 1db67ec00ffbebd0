use std::process::ExitCode;

fn main() -> ExitCode {
    match quayd::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("quayd: {error}");
            ExitCode::FAILURE
        }
    }
}
