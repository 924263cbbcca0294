use std::io::Write;

use carbonroute_core::Envelope;
use serde::Serialize;

use crate::error::CliError;

pub fn render<T: Serialize>(envelope: &Envelope<T>, pretty: bool) -> Result<(), CliError> {
    let rendered = to_json(envelope, pretty)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    stdout.flush()?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_output_is_one_line() {
        let value = serde_json::json!({"a": [1, 2], "b": "x"});
        let compact = to_json(&value, false).expect("serializes");
        let pretty = to_json(&value, true).expect("serializes");

        assert!(!compact.contains('\n'));
        assert!(pretty.contains('\n'));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&pretty).expect("valid json"),
            value
        );
    }
}
