// Shell line protocol
//
// Outbound, one line per job:   "<timestamp> <output path>: <command>\n"
// Timestamp 0 is a maintenance command, evaluated inside the shell itself.
//
// Inbound lines:
//   "data: <timestamp> <field> <value>"   job update (pid, return_code)
//   "warning: <text>"                     logged at warn
//   anything else                         logged at info

use outpost_core::port::ExecutionError;
use std::path::Path;

pub const MAINTENANCE_TIMESTAMP: i64 = 0;
pub const MAINTENANCE_TARGET: &str = "/dev/stdout";

/// Driver run by `bash -c`. Each job runs in the background with its
/// combined output redirected to the requested file; the subshell reports
/// the pid right away and the exit code once the command ends.
pub const DRIVER_SCRIPT: &str = r#"exec 2>&1
while IFS= read -r line; do
    [ -z "$line" ] && continue
    ts="${line%% *}"
    rest="${line#* }"
    target="${rest%%: *}"
    cmd="${rest#*: }"
    if [ "$ts" = "0" ]; then
        eval "$cmd" || echo "warning: maintenance command failed: $cmd"
        continue
    fi
    {
        bash -c "$cmd" > "$target" 2>&1 < /dev/null &
        pid=$!
        echo "data: $ts pid $pid"
        wait "$pid"
        echo "data: $ts return_code $?"
    } &
done
"#;

/// A decoded line of shell output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine<'a> {
    Update {
        key: i64,
        field: &'a str,
        value: &'a str,
    },
    Warning(&'a str),
    Log(&'a str),
    Empty,
}

pub fn encode_job(timestamp: i64, target: &Path, command: &str) -> Result<String, ExecutionError> {
    if command.contains(['\n', '\r']) {
        return Err(ExecutionError::InvalidCommand(
            "command spans multiple lines".to_string(),
        ));
    }
    let target = target.to_str().ok_or_else(|| {
        ExecutionError::InvalidCommand("output path is not valid UTF-8".to_string())
    })?;
    if target.contains(": ") || target.contains(['\n', '\r', ' ']) {
        return Err(ExecutionError::InvalidCommand(format!(
            "output path cannot be framed: {}",
            target
        )));
    }

    Ok(format!("{} {}: {}\n", timestamp, target, command))
}

pub fn encode_maintenance(command: &str) -> Result<String, ExecutionError> {
    encode_job(MAINTENANCE_TIMESTAMP, Path::new(MAINTENANCE_TARGET), command)
}

pub fn decode_line(line: &str) -> InboundLine<'_> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return InboundLine::Empty;
    }

    if let Some(rest) = line.strip_prefix("data:") {
        let mut parts = rest.split_whitespace();
        let key = parts.next().and_then(|k| k.parse::<i64>().ok());
        return match (key, parts.next(), parts.next()) {
            (Some(key), Some(field), Some(value)) => InboundLine::Update { key, field, value },
            _ => InboundLine::Log(line),
        };
    }

    match line.strip_prefix("warning:") {
        Some(rest) => InboundLine::Warning(rest.trim()),
        None => InboundLine::Log(line),
    }
}

/// Single-quote a value for bash; embedded quotes and line breaks survive
pub fn shell_quote(value: &str) -> String {
    let escaped = value
        .replace('\'', r"'\''")
        .replace('\n', r"'$'\n''")
        .replace('\r', r"'$'\r''");
    format!("'{}'", escaped)
}

pub fn export_command(name: &str, value: &str) -> String {
    format!("export {}={}", name, shell_quote(value))
}

pub fn unset_command(name: &str) -> String {
    format!("unset {}", name)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_job_line() {
        let line =
            encode_job(1_700_000_000_123, Path::new("/tmp/outpost/1.out"), "echo a: b").unwrap();
        assert_eq!(line, "1700000000123 /tmp/outpost/1.out: echo a: b\n");
    }

    #[test]
    fn test_encode_rejects_unframeable_input() {
        assert!(encode_job(1, Path::new("/tmp/x.out"), "echo a\necho b").is_err());
        assert!(encode_job(1, Path::new("/tmp/odd: dir/x.out"), "true").is_err());
        assert_eq!(
            encode_maintenance("unset FOO").unwrap(),
            "0 /dev/stdout: unset FOO\n"
        );
    }

    #[test]
    fn test_decode_lines() {
        assert_eq!(
            decode_line("data: 1700 pid 4242\n"),
            InboundLine::Update {
                key: 1700,
                field: "pid",
                value: "4242"
            }
        );
        assert_eq!(
            decode_line("data: 1700 return_code 0"),
            InboundLine::Update {
                key: 1700,
                field: "return_code",
                value: "0"
            }
        );
        assert_eq!(decode_line("warning: disk low"), InboundLine::Warning("disk low"));
        assert_eq!(decode_line("data: garbage"), InboundLine::Log("data: garbage"));
        assert_eq!(decode_line("hello"), InboundLine::Log("hello"));
        assert_eq!(decode_line("   \n"), InboundLine::Empty);
    }

    #[test]
    fn test_shell_quote_escapes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("a\nb"), r"'a'$'\n''b'");
        assert_eq!(export_command("X", "1 2"), "export X='1 2'");
    }

    #[test]
    fn test_env_name_validation() {
        assert!(is_valid_env_name("PATH"));
        assert!(is_valid_env_name("_private9"));
        assert!(!is_valid_env_name("9LIVES"));
        assert!(!is_valid_env_name("A-B"));
        assert!(!is_valid_env_name("$(rm -rf /)"));
        assert!(!is_valid_env_name(""));
    }
}
