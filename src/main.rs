use std::process::ExitCode;

fn main() -> ExitCode {
    disruptor::app::startup::startup()
}
