use std::process::ExitCode;

fn main() -> ExitCode {
    lite_cli::run()
}
