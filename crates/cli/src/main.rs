use std::process::ExitCode;

fn main() -> ExitCode {
    idguard_cli::run()
}
