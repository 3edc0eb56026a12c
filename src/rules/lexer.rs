use crate::rules::errors::RuleError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Number(String),
    Str(String),
    Newline,
    Dot,
    Comma,
    Semi,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Assign, // :=
    Unify,  // =
    Eq,     // ==
    Ne,     // !=
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pipe,
    Amp,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
    /// Byte range in the source.
    pub start: usize,
    pub end: usize,
}

pub(crate) fn tokenize(source_name: &str, src: &str) -> Result<Vec<Token>, RuleError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map(|(b, _)| *b).unwrap_or(src.len());
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = 0;

    let err = |message: String, line: usize, column: usize| RuleError::Parse {
        source_name: source_name.to_string(),
        message,
        line,
        column,
    };

    while i < chars.len() {
        let c = chars[i].1;
        let next = chars.get(i + 1).map(|(_, c)| *c);
        let column = i - line_start + 1;
        let start = i;

        let simple = match (c, next) {
            (':', Some('=')) => Some((Tok::Assign, 2)),
            ('=', Some('=')) => Some((Tok::Eq, 2)),
            ('!', Some('=')) => Some((Tok::Ne, 2)),
            ('<', Some('=')) => Some((Tok::Le, 2)),
            ('>', Some('=')) => Some((Tok::Ge, 2)),
            ('=', _) => Some((Tok::Unify, 1)),
            ('<', _) => Some((Tok::Lt, 1)),
            ('>', _) => Some((Tok::Gt, 1)),
            ('.', _) => Some((Tok::Dot, 1)),
            (',', _) => Some((Tok::Comma, 1)),
            (';', _) => Some((Tok::Semi, 1)),
            (':', _) => Some((Tok::Colon, 1)),
            ('(', _) => Some((Tok::LParen, 1)),
            (')', _) => Some((Tok::RParen, 1)),
            ('[', _) => Some((Tok::LBracket, 1)),
            (']', _) => Some((Tok::RBracket, 1)),
            ('{', _) => Some((Tok::LBrace, 1)),
            ('}', _) => Some((Tok::RBrace, 1)),
            ('+', _) => Some((Tok::Plus, 1)),
            ('-', _) => Some((Tok::Minus, 1)),
            ('*', _) => Some((Tok::Star, 1)),
            ('/', _) => Some((Tok::Slash, 1)),
            ('%', _) => Some((Tok::Percent, 1)),
            ('|', _) => Some((Tok::Pipe, 1)),
            ('&', _) => Some((Tok::Amp, 1)),
            _ => None,
        };
        if let Some((tok, width)) = simple {
            i += width;
            tokens.push(Token {
                tok,
                line,
                column,
                start: byte_at(start),
                end: byte_at(i),
            });
            continue;
        }

        match c {
            '\n' => {
                tokens.push(Token {
                    tok: Tok::Newline,
                    line,
                    column,
                    start: byte_at(start),
                    end: byte_at(start + 1),
                });
                i += 1;
                line += 1;
                line_start = i;
            }
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                while i < chars.len() && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    let Some(&(_, ch)) = chars.get(i) else {
                        return Err(err("unterminated string".into(), line, column));
                    };
                    i += 1;
                    match ch {
                        '"' => break,
                        '\n' => return Err(err("unterminated string".into(), line, column)),
                        '\\' => {
                            let Some(&(_, esc)) = chars.get(i) else {
                                return Err(err("unterminated string".into(), line, column));
                            };
                            i += 1;
                            match esc {
                                '"' => s.push('"'),
                                '\\' => s.push('\\'),
                                '/' => s.push('/'),
                                'b' => s.push('\u{8}'),
                                'f' => s.push('\u{c}'),
                                'n' => s.push('\n'),
                                'r' => s.push('\r'),
                                't' => s.push('\t'),
                                'u' => {
                                    let hex: String =
                                        chars.iter().skip(i).take(4).map(|(_, c)| *c).collect();
                                    let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                                        err(format!("invalid unicode escape `\\u{hex}`"), line, column)
                                    })?;
                                    i += 4;
                                    s.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                                }
                                other => {
                                    return Err(err(
                                        format!("invalid escape sequence `\\{other}`"),
                                        line,
                                        column,
                                    ))
                                }
                            }
                        }
                        ch => s.push(ch),
                    }
                }
                tokens.push(Token {
                    tok: Tok::Str(s),
                    line,
                    column,
                    start: byte_at(start),
                    end: byte_at(i),
                });
            }
            '`' => {
                let mut s = String::new();
                let (start_line, start_column) = (line, column);
                i += 1;
                loop {
                    let Some(&(_, ch)) = chars.get(i) else {
                        return Err(err("unterminated raw string".into(), start_line, start_column));
                    };
                    i += 1;
                    if ch == '`' {
                        break;
                    }
                    if ch == '\n' {
                        line += 1;
                        line_start = i;
                    }
                    s.push(ch);
                }
                tokens.push(Token {
                    tok: Tok::Str(s),
                    line: start_line,
                    column: start_column,
                    start: byte_at(start),
                    end: byte_at(i),
                });
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].1.is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].1.is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                tokens.push(Token {
                    tok: Tok::Number(src[byte_at(start)..byte_at(i)].to_string()),
                    line,
                    column,
                    start: byte_at(start),
                    end: byte_at(i),
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(src[byte_at(start)..byte_at(i)].to_string()),
                    line,
                    column,
                    start: byte_at(start),
                    end: byte_at(i),
                });
            }
            other => {
                return Err(err(format!("unexpected character `{other}`"), line, column));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize("test", src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_operators_and_idents() {
        assert_eq!(
            kinds("x := input.a[_] != 3.5"),
            vec![
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Ident("input".into()),
                Tok::Dot,
                Tok::Ident("a".into()),
                Tok::LBracket,
                Tok::Ident("_".into()),
                Tok::RBracket,
                Tok::Ne,
                Tok::Number("3.5".into()),
            ]
        );
    }

    #[test]
    fn test_strings_comments_newlines() {
        assert_eq!(
            kinds("\"a\\n\\\"b\" # comment\n`raw\\n`"),
            vec![
                Tok::Str("a\n\"b".into()),
                Tok::Newline,
                Tok::Str("raw\\n".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("test", "a\n  bb").unwrap();
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
        assert_eq!((tokens[2].start, tokens[2].end), (4, 6));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("m.rego", "x := \"abc").unwrap_err();
        assert!(matches!(err, RuleError::Parse { line: 1, column: 6, .. }));
    }
}
