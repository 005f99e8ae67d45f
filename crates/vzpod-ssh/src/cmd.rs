//! Shell command-string construction for in-guest execution.

/// Quotes a value for safe interpolation into a shell command line.
fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' | '$' | '`' => {
                quoted.push('\\');
                quoted.push(c);
            }
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Returns a shell command exporting the given environment variable.
///
/// Single-line values are quoted; multi-line values are passed through a
/// quoted heredoc so embedded newlines survive.
#[must_use]
pub fn build_export_env_command(name: &str, value: &str) -> String {
    if value.contains('\n') {
        format!("export {name}=$(cat <<'ESCAPE_EOF'\n{value}\nESCAPE_EOF\n)\n")
    } else {
        format!("export {name}={}\n", shell_quote(value))
    }
}

/// Builds the one-shot command string for a `sh -c` shaped command.
///
/// `["sh", "-c", body, args…]` becomes env exports followed by
/// `sh -c $'<body>'` with the remaining words quoted as positional
/// parameters. Commands of any other shape return `None`; the caller then
/// falls back to an interactive shell session.
#[must_use]
pub fn build_exec_command_string(cmd: &[String], env: &[(String, String)]) -> Option<String> {
    if cmd.len() < 3 || cmd[1] != "-c" {
        return None;
    }

    let mut cmd_str = String::new();
    for (name, value) in env {
        cmd_str.push_str(&build_export_env_command(name, value));
    }

    // Commands are read from the string after -c; single quotes in the
    // body are escaped for the $'...' form.
    cmd_str.push_str(&cmd[0]);
    cmd_str.push(' ');
    cmd_str.push_str(&cmd[1]);
    cmd_str.push_str(&format!(" $'{}'", cmd[2].replace('\'', "\\'")));

    // Remaining words become positional parameters, starting with $0.
    for arg in &cmd[3..] {
        cmd_str.push(' ');
        cmd_str.push_str(&shell_quote(arg));
    }

    Some(cmd_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| (*w).to_string()).collect()
    }

    #[test]
    fn test_export_single_line() {
        assert_eq!(
            build_export_env_command("FOO", "bar"),
            "export FOO=\"bar\"\n"
        );
    }

    #[test]
    fn test_export_escapes_specials() {
        assert_eq!(
            build_export_env_command("FOO", "a\"b$c"),
            "export FOO=\"a\\\"b\\$c\"\n"
        );
    }

    #[test]
    fn test_export_multiline_uses_heredoc() {
        let cmd = build_export_env_command("CERT", "line1\nline2");
        assert!(cmd.starts_with("export CERT=$(cat <<'ESCAPE_EOF'\n"));
        assert!(cmd.contains("line1\nline2"));
        assert!(cmd.ends_with("ESCAPE_EOF\n)\n"));
    }

    #[test]
    fn test_exec_command_string_shell_shape() {
        let cmd = build_exec_command_string(&strings(&["sh", "-c", "echo hello"]), &[]).unwrap();
        assert_eq!(cmd, "sh -c $'echo hello'");
    }

    #[test]
    fn test_exec_command_string_with_env_and_args() {
        let env = vec![("FOO".to_string(), "bar".to_string())];
        let cmd = build_exec_command_string(
            &strings(&["sh", "-c", "echo $FOO \"$@\"", "arg one", "arg2"]),
            &env,
        )
        .unwrap();
        assert_eq!(
            cmd,
            "export FOO=\"bar\"\nsh -c $'echo $FOO \"$@\"' \"arg one\" \"arg2\""
        );
    }

    #[test]
    fn test_exec_command_string_escapes_single_quotes() {
        let cmd =
            build_exec_command_string(&strings(&["sh", "-c", "echo 'quoted'"]), &[]).unwrap();
        assert_eq!(cmd, "sh -c $'echo \\'quoted\\''");
    }

    #[test]
    fn test_exec_command_string_rejects_other_shapes() {
        assert!(build_exec_command_string(&strings(&["uname"]), &[]).is_none());
        assert!(build_exec_command_string(&strings(&["bash", "script.sh", "x"]), &[]).is_none());
        assert!(build_exec_command_string(&[], &[]).is_none());
    }
}
