//! Command-line splitting.
//!
//! Splits a command string into argv tokens using POSIX-shell-like quoting:
//! single quotes are literal, double quotes allow `\"`, `\\`, `\$` and `` \` ``
//! escapes, and an unquoted backslash escapes the next character. No
//! expansion of variables, globs or redirections is performed.

use crate::error::{ExecError, ExecResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split `command` into argv tokens.
pub fn split_command(command: &str) -> ExecResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Distinguishes `''` (an empty argument) from no token at all.
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some('\n') => {}
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(ExecError::UnbalancedQuote(command.to_string())),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => match chars.next() {
                    Some('\n') => {}
                    Some(next) => {
                        current.push(next);
                        in_token = true;
                    }
                    None => return Err(ExecError::UnbalancedQuote(command.to_string())),
                },
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(ExecError::UnbalancedQuote(command.to_string()));
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Quote a single argument so a POSIX shell reads it back unchanged.
pub fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}

/// Join argv tokens back into a single shell-safe command line.
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_words() {
        assert_eq!(
            split_command("echo  hello\tworld").unwrap(),
            vec!["echo", "hello", "world"]
        );
    }

    #[test]
    fn test_split_double_quoted_script() {
        assert_eq!(
            split_command(r#"sh -c "echo ERROR: bad 1>&2""#).unwrap(),
            vec!["sh", "-c", "echo ERROR: bad 1>&2"]
        );
    }

    #[test]
    fn test_single_quotes_keep_backslashes() {
        assert_eq!(
            split_command(r"printf 'line1\nline2\n'").unwrap(),
            vec!["printf", r"line1\nline2\n"]
        );
    }

    #[test]
    fn test_empty_quoted_argument_is_kept() {
        assert_eq!(split_command("cmd '' x").unwrap(), vec!["cmd", "", "x"]);
    }

    #[test]
    fn test_adjacent_quotes_join_into_one_token() {
        assert_eq!(
            split_command(r#"a"b c"'d e'f"#).unwrap(),
            vec!["ab cd ef"]
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            split_command(r#"echo a\ b "q\"uote" "keep\n""#).unwrap(),
            vec!["echo", "a b", "q\"uote", r"keep\n"]
        );
    }

    #[test]
    fn test_unbalanced_quote_is_an_error() {
        assert!(matches!(
            split_command("echo 'oops"),
            Err(ExecError::UnbalancedQuote(_))
        ));
        assert!(matches!(
            split_command("echo \"oops"),
            Err(ExecError::UnbalancedQuote(_))
        ));
        assert!(matches!(
            split_command("echo oops\\"),
            Err(ExecError::UnbalancedQuote(_))
        ));
    }

    #[test]
    fn test_blank_command_has_no_tokens() {
        assert!(split_command("   ").unwrap().is_empty());
    }

    #[test]
    fn test_join_round_trips_through_split() {
        let args = vec!["sh", "-c", "echo it's $HOME", ""];
        let joined = join_args(&args);
        assert_eq!(split_command(&joined).unwrap(), args);
    }

    #[test]
    fn test_quote_arg_leaves_safe_words_alone() {
        assert_eq!(quote_arg("out/file-1.txt"), "out/file-1.txt");
        assert_eq!(quote_arg("a b"), "'a b'");
    }
}
