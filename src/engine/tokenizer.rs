// ============================================================
// Layer 5 — Reversible Tokenizer
// ============================================================
// Splits text into tokens that concatenate back to the exact
// input, whitespace included. Three token kinds:
//
//   Word   — a maximal run of letters, digits, '_' and
//            combining marks ("è" written as e + U+0300 stays whole)
//   Space  — a maximal run of whitespace
//   Punct  — any other single character
//
// Example:
//   "Un eror, qui."  →  ["Un", " ", "eror", ",", " ", "qui", "."]
//
// Every token remembers the byte offset it started at in the
// source string. The reconstructor uses that offset to find
// which formatted run the token came from.

use unicode_normalization::char::is_combining_mark;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Space,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text:   String,
    /// Byte offset of the token's first character in the source
    pub offset: usize,
    pub kind:   TokenKind,
}

impl Token {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    pub fn is_word(&self) -> bool {
        self.kind == TokenKind::Word
    }
}

fn classify(c: char) -> TokenKind {
    if c.is_alphanumeric() || c == '_' || is_combining_mark(c) {
        TokenKind::Word
    } else if c.is_whitespace() {
        TokenKind::Space
    } else {
        TokenKind::Punct
    }
}

/// Tokenize `text`. Deterministic and lossless for any input,
/// including the empty string (which yields no tokens).
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars  = text.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let kind    = classify(c);
        let mut end = start + c.len_utf8();

        // Words and whitespace group; punctuation is one char per token
        if kind != TokenKind::Punct {
            while let Some(&(i, next)) = chars.peek() {
                if classify(next) != kind {
                    break;
                }
                end = i + next.len_utf8();
                chars.next();
            }
        }

        tokens.push(Token {
            text:   text[start..end].to_string(),
            offset: start,
            kind,
        });
    }

    tokens
}

/// Number of word tokens in `text`.
pub fn word_count(text: &str) -> usize {
    tokenize(text).iter().filter(|t| t.is_word()).count()
}

/// Rough sentence count: sentence-final punctuation followed by
/// whitespace or end of text. Text with words but no terminator
/// counts as one sentence; text without words counts as zero.
pub fn sentence_count(text: &str) -> usize {
    let tokens = tokenize(text);
    if !tokens.iter().any(Token::is_word) {
        return 0;
    }

    let mut count = 0usize;
    let mut open  = false;

    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::Word => open = true,
            TokenKind::Punct if open && is_terminator(&tok.text) => {
                let next = tokens.get(i + 1);
                let ends_here = match next {
                    None    => true,
                    Some(n) => n.kind == TokenKind::Space
                        || (n.kind == TokenKind::Punct && !is_terminator(&n.text)),
                };
                if ends_here {
                    count += 1;
                    open = false;
                }
            }
            _ => {}
        }
    }

    if open {
        count += 1;
    }
    count
}

fn is_terminator(s: &str) -> bool {
    matches!(s, "." | "!" | "?" | "…")
}
