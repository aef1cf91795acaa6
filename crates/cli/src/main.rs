use std::process::ExitCode;

fn main() -> ExitCode {
    phasequote_cli::run()
}
