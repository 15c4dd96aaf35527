use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use tvmux::ErrorBody;

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Structured body for a failed command. Engine errors keep their kind;
/// anything else is internal to the CLI.
pub fn error_body(err: &anyhow::Error) -> ErrorBody {
    match err.downcast_ref::<tvmux::Error>() {
        Some(e) => e.body(),
        None => ErrorBody::internal(format!("{err:#}")),
    }
}

/// Errors go to stdout too so callers parse one stream.
pub fn print_error(body: &ErrorBody) {
    match serde_json::to_string_pretty(body) {
        Ok(json) => println!("{json}"),
        Err(_) => eprintln!("{}", body.message),
    }
}
