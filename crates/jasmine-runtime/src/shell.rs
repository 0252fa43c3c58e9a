//! Shell quoting and command composition helpers

/// Quote a string for POSIX `sh`, leaving plain words bare
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | ',' | '=' | '@' | '+')
    }) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Quote a directory, keeping a leading `~/` outside the quotes so it expands
pub fn quote_dir(dir: &str) -> String {
    if dir == "~" {
        return "~".to_string();
    }
    match dir.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_string(),
        Some(rest) => format!("~/{}", quote(rest)),
        None => quote(dir),
    }
}

/// `cd <dir> && <command>` when a working directory is given
pub fn in_dir(command: &str, cwd: Option<&str>) -> String {
    match cwd {
        Some(dir) => format!("cd {} && {}", quote_dir(dir), command),
        None => command.to_string(),
    }
}

/// `export PATH="a:b:$PATH"` for the given directories
pub fn path_prelude(dirs: &[String]) -> Option<String> {
    if dirs.is_empty() {
        return None;
    }
    Some(format!("export PATH=\"{}:$PATH\"", dirs.join(":")))
}

/// `export K=V && ...` for an environment mapping, in iteration order
pub fn export_env<'a, I>(vars: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let parts: Vec<String> = vars
        .into_iter()
        .map(|(key, value)| format!("export {}={}", key, quote(value)))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" && "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain/path-1.txt"), "plain/path-1.txt");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_quote_dir_keeps_tilde() {
        assert_eq!(quote_dir("~/src/my project"), "~/'src/my project'");
        assert_eq!(quote_dir("~"), "~");
        assert_eq!(quote_dir("/srv/app"), "/srv/app");
    }

    #[test]
    fn test_in_dir() {
        assert_eq!(in_dir("ls", None), "ls");
        assert_eq!(in_dir("ls", Some("/tmp")), "cd /tmp && ls");
    }

    #[test]
    fn test_path_prelude() {
        assert!(path_prelude(&[]).is_none());
        let prelude = path_prelude(&["$HOME/.local/bin".to_string()]).unwrap();
        assert_eq!(prelude, "export PATH=\"$HOME/.local/bin:$PATH\"");
    }

    #[test]
    fn test_export_env() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        env.insert("B".to_string(), "x y".to_string());
        assert_eq!(export_env(&env).unwrap(), "export A=1 && export B='x y'");
        assert!(export_env(&BTreeMap::new()).is_none());
    }
}
