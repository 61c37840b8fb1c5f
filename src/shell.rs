//! Shell quoting for printing runnable command lines.

/// Escape single quotes within a string for use inside a single-quoted shell argument.
///
/// The caller is responsible for wrapping the result in single quotes.
pub fn shell_escape(s: &str) -> String {
    s.replace('\'', "'\\''")
}

/// Quote a string for safe use as a shell argument.
///
/// Returns the string unchanged if it contains only safe characters
/// (alphanumeric, `-`, `_`, `.`, `/`, `:`, `=`, `,`). Otherwise wraps it in
/// single quotes with internal single quotes escaped. Empty strings return `''`.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',')
    }) {
        s.to_string()
    } else {
        format!("'{}'", shell_escape(s))
    }
}

/// Render a program and its arguments as a single copy-pasteable command line.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(shell_quote(program))
        .chain(args.iter().map(|a| shell_quote(a.as_ref())))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_single_quotes() {
        assert_eq!(shell_escape("it's"), "it'\\''s");
    }

    #[test]
    fn test_shell_quote_safe_passthrough() {
        assert_eq!(shell_quote("/home/me/src"), "/home/me/src");
        assert_eq!(shell_quote("8080:8080/tcp"), "8080:8080/tcp");
        assert_eq!(
            shell_quote("type=bind,source=/a,target=/src"),
            "type=bind,source=/a,target=/src"
        );
    }

    #[test]
    fn test_shell_quote_wraps_unsafe() {
        assert_eq!(shell_quote("ssh-ed25519 AAAA me@host"), "'ssh-ed25519 AAAA me@host'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_shell_quote_empty_string() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_command_line_joins_quoted_args() {
        let line = command_line("docker", &["run", "-d", "my image"]);
        assert_eq!(line, "docker run -d 'my image'");
    }
}
