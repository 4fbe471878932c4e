use std::process::ExitCode;

fn main() -> ExitCode {
    alcoguard_cli::run()
}
