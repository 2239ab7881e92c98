use std::io::{self, Write};

use serde::Serialize;

use crate::error::CliError;
use crate::metadata::Envelope;

pub fn render<T: Serialize>(envelope: &Envelope<T>, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_json(&mut handle, envelope, pretty)
}

fn write_json<W: Write, T: Serialize>(writer: &mut W, envelope: &Envelope<T>, pretty: bool) -> Result<(), CliError> {
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, envelope)?;
    } else {
        serde_json::to_writer(&mut *writer, envelope)?;
    }
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;

    #[test]
    fn compact_output_is_one_line() {
        let envelope = Envelope {
            meta: Metadata::new(Vec::new(), 0, false),
            data: serde_json::json!({"final_results": 2}),
        };
        let mut buffer = Vec::new();
        write_json(&mut buffer, &envelope, false).expect("write");

        let text = String::from_utf8(buffer).expect("utf8");
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"final_results\":2"));
    }

    #[test]
    fn pretty_output_is_indented() {
        let envelope = Envelope {
            meta: Metadata::new(Vec::new(), 0, false),
            data: serde_json::json!({"final_results": 2}),
        };
        let mut buffer = Vec::new();
        write_json(&mut buffer, &envelope, true).expect("write");

        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.lines().count() > 1);
        assert!(text.contains("  \"data\""));
    }
}
