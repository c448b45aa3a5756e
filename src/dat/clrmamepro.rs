//! ClrMamePro DAT parser: a whitespace-separated token stream with
//! parenthesized groups and `"..."` strings (`\"` escapes).

use crate::error::{Error, Result};

use super::{catalog_rom, DatMeta, Game};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Word(String),
}

/// `None` means the text does not even tokenize as this dialect.
fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '"' => {
                let mut word = String::new();
                loop {
                    match chars.next() {
                        // Only a quote needs escaping; any other
                        // backslash is a literal name separator.
                        Some('\\') => match chars.next() {
                            Some('"') => word.push('"'),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return None,
                        },
                        Some('"') => break,
                        Some(c) => word.push(c),
                        None => return None,
                    }
                }
                tokens.push(Token::Word(word));
            }
            c => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Some(tokens)
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// The next token, which must be a scalar value.
    fn value(&mut self, key: &str) -> Result<String> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(Error::content(format!(
                "expected a value for {key}, got {other:?}"
            ))),
        }
    }
}

/// Probe and parse. Returns `Ok(None)` when the text is not this
/// dialect (no top-level `clrmamepro(...)` group); parse failures past
/// that probe are content errors.
pub fn parse(text: &str) -> Result<Option<(DatMeta, Vec<Game>)>> {
    let Some(tokens) = tokenize(text) else {
        return Ok(None);
    };

    // The header group is what identifies the dialect.
    let mut depth = 0usize;
    let mut found = false;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => depth += 1,
            Token::Close => depth = depth.saturating_sub(1),
            Token::Word(word) if depth == 0 && word == "clrmamepro" => {
                if matches!(tokens.get(i + 1), Some(Token::Open)) {
                    found = true;
                    break;
                }
            }
            _ => {}
        }
    }
    if !found {
        return Ok(None);
    }

    let mut cursor = Cursor { tokens, pos: 0 };
    let mut meta = DatMeta::default();
    let mut games = Vec::new();
    let mut headers = 0usize;

    while let Some(token) = cursor.next() {
        let Token::Word(key) = token else {
            return Err(Error::content("expected a top-level key"));
        };
        match cursor.peek() {
            Some(Token::Open) => {
                cursor.next();
                match key.as_str() {
                    "clrmamepro" => {
                        headers += 1;
                        if headers > 1 {
                            return Err(Error::content("multiple clrmamepro headers"));
                        }
                        parse_header(&mut cursor, &mut meta)?;
                    }
                    "game" | "resource" => games.push(parse_game(&mut cursor)?),
                    _ => skip_group(&mut cursor)?,
                }
            }
            Some(Token::Word(_)) => {
                cursor.next();
            }
            _ => return Err(Error::content(format!("dangling key {key}"))),
        }
    }

    Ok(Some((meta, games)))
}

fn parse_header(cursor: &mut Cursor, meta: &mut DatMeta) -> Result<()> {
    loop {
        match cursor.next() {
            Some(Token::Close) => return Ok(()),
            Some(Token::Word(key)) => {
                if matches!(cursor.peek(), Some(Token::Open)) {
                    cursor.next();
                    skip_group(cursor)?;
                    continue;
                }
                let value = cursor.value(&key)?;
                match key.as_str() {
                    "name" => meta.name = Some(value),
                    "description" => meta.description = Some(value),
                    "version" => meta.version = Some(value),
                    "date" => meta.date = Some(value),
                    "author" => meta.author = Some(value),
                    "url" | "homepage" => meta.url = Some(value),
                    _ => {}
                }
            }
            other => return Err(Error::content(format!("bad header token {other:?}"))),
        }
    }
}

fn parse_game(cursor: &mut Cursor) -> Result<Game> {
    let mut name: Option<String> = None;
    let mut description = None;
    let mut cloneof = None;
    let mut roms = Vec::new();

    loop {
        match cursor.next() {
            Some(Token::Close) => break,
            Some(Token::Word(key)) => {
                if matches!(cursor.peek(), Some(Token::Open)) {
                    cursor.next();
                    match key.as_str() {
                        "rom" | "disk" => roms.push(parse_rom(cursor)?),
                        _ => skip_group(cursor)?,
                    }
                    continue;
                }
                let value = cursor.value(&key)?;
                match key.as_str() {
                    "name" => name = Some(value),
                    "description" => description = Some(value),
                    "cloneof" => cloneof = Some(value),
                    // romof, sampleof, year, manufacturer, sample:
                    // recognized scalars with no model counterpart.
                    _ => {}
                }
            }
            other => return Err(Error::content(format!("bad game token {other:?}"))),
        }
    }

    let name = name.ok_or_else(|| Error::content("game without a name"))?;
    Ok(Game {
        name,
        description,
        cloneof,
        roms,
        releases: Vec::new(),
    })
}

fn parse_rom(cursor: &mut Cursor) -> Result<crate::rom::Rom> {
    let mut name: Option<String> = None;
    let mut size: Option<u64> = None;
    let mut crc = None;
    let mut md5 = None;
    let mut sha1 = None;

    loop {
        match cursor.next() {
            Some(Token::Close) => break,
            Some(Token::Word(key)) => {
                if matches!(cursor.peek(), Some(Token::Open)) {
                    cursor.next();
                    skip_group(cursor)?;
                    continue;
                }
                let value = cursor.value(&key)?;
                match key.as_str() {
                    "name" => name = Some(value),
                    "size" => {
                        size = Some(value.parse().map_err(|_| {
                            Error::content(format!("bad rom size {value:?}"))
                        })?)
                    }
                    "crc" => crc = Some(value),
                    "md5" => md5 = Some(value),
                    "sha1" => sha1 = Some(value),
                    // merge, flags: carried by the dialect, not the model.
                    _ => {}
                }
            }
            other => return Err(Error::content(format!("bad rom token {other:?}"))),
        }
    }

    let name = name.ok_or_else(|| Error::content("rom without a name"))?;
    catalog_rom(
        &name,
        size,
        crc.as_deref(),
        md5.as_deref(),
        sha1.as_deref(),
        None,
    )
}

fn skip_group(cursor: &mut Cursor) -> Result<()> {
    let mut depth = 1usize;
    while depth > 0 {
        match cursor.next() {
            Some(Token::Open) => depth += 1,
            Some(Token::Close) => depth -= 1,
            Some(Token::Word(_)) => {}
            None => return Err(Error::content("unbalanced parentheses")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumKind;

    #[test]
    fn missing_header_means_not_this_format() {
        assert!(parse("game ( name x )").unwrap().is_none());
        assert!(parse("<xml/>").unwrap().is_none());
        assert!(parse("").unwrap().is_none());
    }

    #[test]
    fn quoted_strings_and_escapes() {
        let text = r#"clrmamepro (
	name "My \"quoted\" set"
)
game (
	name "Game (proto)"
	rom ( name "a b.bin" size 3 crc 352441c2 )
)
"#;
        let (meta, games) = parse(text).unwrap().unwrap();
        assert_eq!(meta.name.as_deref(), Some(r#"My "quoted" set"#));
        assert_eq!(games[0].name, "Game (proto)");
        assert_eq!(games[0].roms[0].entry(), "a b.bin");
    }

    #[test]
    fn resource_groups_count_as_games() {
        let text = r#"clrmamepro ( name set )
resource (
	name "BIOS"
	rom ( name bios.bin size 3 crc 352441c2 )
)
"#;
        let (_, games) = parse(text).unwrap().unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "BIOS");
    }

    #[test]
    fn checksum_widths_are_enforced() {
        let bad = r#"clrmamepro ( name set )
game ( name g rom ( name a.bin crc 3524 ) )
"#;
        assert!(parse(bad).is_err());
    }

    #[test]
    fn backslash_names_are_rejoined() {
        let text = r#"clrmamepro ( name set )
game ( name g rom ( name "dir\sub\a.bin" size 3 crc 352441c2 ) )
"#;
        let (_, games) = parse(text).unwrap().unwrap();
        assert_eq!(games[0].roms[0].entry(), "dir/sub/a.bin");
    }

    #[test]
    fn checksums_normalize_to_lowercase() {
        let text = r#"clrmamepro ( name set )
game ( name g rom ( name a.bin size 3 crc 352441C2 sha1 A9993E364706816ABA3E25717850C26C9CD0D89D ) )
"#;
        let (_, games) = parse(text).unwrap().unwrap();
        let rom = &games[0].roms[0];
        assert_eq!(rom.checksums().get(ChecksumKind::Crc32), Some("352441c2"));
        assert_eq!(
            rom.checksums().get(ChecksumKind::Sha1),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
    }

    #[test]
    fn unterminated_quote_is_not_this_format() {
        assert!(parse("clrmamepro ( name \"broken )").unwrap().is_none());
    }
}
