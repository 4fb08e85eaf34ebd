//! Dotted-key parsing for document addressing.
//!
//! Keys address nested members with dots and array elements with bracketed
//! decimal indices: `a.b[3].c`. Segments are validated against the reserved
//! character set `[]{}.,` — a key containing a reserved character inside a
//! member name is malformed and rejected by the write paths.
//!
//! The empty key addresses the document root. A key may start with an index
//! (`[2].name`), which is how scratch documents produced by transformation
//! pipelines are addressed.

/// One step of a parsed key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Member(&'a str),
    Index(usize),
}

/// Characters that may not appear inside a member segment.
pub const RESERVED: &str = "[]{}.,";

/// Parses `key` into path segments. Returns `None` for malformed keys
/// (empty member segments, unterminated brackets, non-decimal indices).
/// The empty key parses to an empty path (the root).
pub fn parse(key: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let bytes = key.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => {
                let close = key[pos..].find(']')? + pos;
                let index: usize = key[pos + 1..close].parse().ok()?;
                segments.push(Segment::Index(index));
                pos = close + 1;
                // After an index: end of key, another index, or a dot.
                if pos < bytes.len() {
                    match bytes[pos] {
                        b'.' => pos += 1,
                        b'[' => {}
                        _ => return None,
                    }
                }
            }
            b'.' => return None, // empty member segment
            _ => {
                let rest = &key[pos..];
                let end = rest
                    .find(['.', '['])
                    .map_or(key.len(), |offset| pos + offset);
                let member = &key[pos..end];
                if member.is_empty() || member.chars().any(|c| "]{},".contains(c)) {
                    return None;
                }
                segments.push(Segment::Member(member));
                pos = end;
                if pos < bytes.len() && bytes[pos] == b'.' {
                    pos += 1;
                    if pos == bytes.len() {
                        return None; // trailing dot
                    }
                }
            }
        }
    }
    Some(segments)
}

/// True iff `key` parses as a document path.
pub fn is_valid(key: &str) -> bool {
    parse(key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_runs() {
        let segs = parse("a[0][1].b").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Member("a"),
                Segment::Index(0),
                Segment::Index(1),
                Segment::Member("b"),
            ]
        );
    }

    #[test]
    fn parses_leading_index() {
        assert_eq!(
            parse("[2].c").unwrap(),
            vec![Segment::Index(2), Segment::Member("c")]
        );
    }

    #[test]
    fn empty_key_is_root() {
        assert_eq!(parse("").unwrap(), vec![]);
    }

    #[test]
    fn rejects_reserved_characters() {
        assert!(parse("a.b{c}").is_none());
        assert!(parse("a,b").is_none());
        assert!(parse("a..b").is_none());
        assert!(parse("a.").is_none());
        assert!(parse("a[x]").is_none());
        assert!(parse("a[1").is_none());
    }

    #[test]
    fn accepts_plain_members() {
        assert!(is_valid("sprite.spritesheet.isSpritesheet"));
        assert!(is_valid("objects[12]"));
    }
}
