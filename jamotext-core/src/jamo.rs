//! Hangul syllable decomposition.
//!
//! Every syllable in U+AC00..=U+D7A3 is split into its compatibility jamo
//! (초성, 중성 and, when present, 종성) followed by the terminator `ᴥ`
//! (U+1D25). The terminator keeps syllable boundaries visible to the n-gram
//! generator while still letting n-grams span them. Everything outside the
//! syllable range passes through untouched, so the transform is the identity
//! on non-Korean text and idempotent on its own output.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Emitted after every decomposed syllable.
pub const SYLLABLE_TERMINATOR: char = '\u{1D25}';

const HANGUL_BASE: u32 = 0xAC00;
const HANGUL_LAST: u32 = 0xD7A3;

const CHO_SUNG: [char; 19] = [
    'ㄱ', 'ㄲ', 'ㄴ', 'ㄷ', 'ㄸ', 'ㄹ', 'ㅁ', 'ㅂ', 'ㅃ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅉ', 'ㅊ',
    'ㅋ', 'ㅌ', 'ㅍ', 'ㅎ',
];

const JWUNG_SUNG: [char; 21] = [
    'ㅏ', 'ㅐ', 'ㅑ', 'ㅒ', 'ㅓ', 'ㅔ', 'ㅕ', 'ㅖ', 'ㅗ', 'ㅘ', 'ㅙ', 'ㅚ', 'ㅛ', 'ㅜ', 'ㅝ',
    'ㅞ', 'ㅟ', 'ㅠ', 'ㅡ', 'ㅢ', 'ㅣ',
];

// Index i holds the final consonant for jong code i + 1; code 0 means the
// syllable has no final.
const JONG_SUNG: [char; 27] = [
    'ㄱ', 'ㄲ', 'ㄳ', 'ㄴ', 'ㄵ', 'ㄶ', 'ㄷ', 'ㄹ', 'ㄺ', 'ㄻ', 'ㄼ', 'ㄽ', 'ㄾ', 'ㄿ', 'ㅀ',
    'ㅁ', 'ㅂ', 'ㅄ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅊ', 'ㅋ', 'ㅌ', 'ㅍ', 'ㅎ',
];

// Adjacent jamo pairs that fold back into one cluster jamo during
// composition. ㄲ, ㅆ and the like are single code points already and never
// arrive as pairs.
static DOUBLE_JAMO: Lazy<HashMap<(char, char), char>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for (first, second, merged) in [
        ('ㄱ', 'ㅅ', 'ㄳ'),
        ('ㄴ', 'ㅈ', 'ㄵ'),
        ('ㄴ', 'ㅎ', 'ㄶ'),
        ('ㄹ', 'ㄱ', 'ㄺ'),
        ('ㄹ', 'ㅁ', 'ㄻ'),
        ('ㄹ', 'ㅂ', 'ㄼ'),
        ('ㄹ', 'ㅅ', 'ㄽ'),
        ('ㄹ', 'ㅌ', 'ㄾ'),
        ('ㄹ', 'ㅍ', 'ㄿ'),
        ('ㄹ', 'ㅎ', 'ㅀ'),
        ('ㅂ', 'ㅅ', 'ㅄ'),
        ('ㅗ', 'ㅏ', 'ㅘ'),
        ('ㅗ', 'ㅐ', 'ㅙ'),
        ('ㅗ', 'ㅣ', 'ㅚ'),
        ('ㅜ', 'ㅓ', 'ㅝ'),
        ('ㅜ', 'ㅔ', 'ㅞ'),
        ('ㅜ', 'ㅣ', 'ㅟ'),
        ('ㅡ', 'ㅣ', 'ㅢ'),
    ] {
        table.insert((first, second), merged);
    }
    table
});

pub fn is_hangul_syllable(ch: char) -> bool {
    (HANGUL_BASE..=HANGUL_LAST).contains(&(ch as u32))
}

pub fn is_jamo(ch: char) -> bool {
    ('\u{3131}'..='\u{3163}').contains(&ch)
}

pub fn is_jamo_consonant(ch: char) -> bool {
    ('\u{3131}'..='\u{314E}').contains(&ch)
}

pub fn is_jamo_vowel(ch: char) -> bool {
    ('\u{314F}'..='\u{3163}').contains(&ch)
}

pub fn contains_hangul(text: &str) -> bool {
    text.chars().any(is_hangul_syllable)
}

/// Decomposes every Hangul syllable in `text` into jamo followed by `ᴥ`.
pub fn decompose(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        let code = ch as u32;
        if !(HANGUL_BASE..=HANGUL_LAST).contains(&code) {
            out.push(ch);
            continue;
        }
        let offset = code - HANGUL_BASE;
        out.push(CHO_SUNG[(offset / (21 * 28)) as usize]);
        out.push(JWUNG_SUNG[((offset / 28) % 21) as usize]);
        let jong = offset % 28;
        if jong != 0 {
            out.push(JONG_SUNG[(jong - 1) as usize]);
        }
        out.push(SYLLABLE_TERMINATOR);
    }
    out
}

/// Recomposes jamo runs terminated by `ᴥ` back into syllables. Runs that do
/// not form a valid 초+중(+종) group after cluster folding are passed through
/// unchanged. Used for diagnostics output only.
pub fn compose(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut group: Vec<char> = Vec::new();
    for ch in text.chars() {
        if ch == SYLLABLE_TERMINATOR {
            flush_group(&mut out, &group, true);
            group.clear();
        } else if is_jamo(ch) {
            group.push(ch);
        } else {
            flush_group(&mut out, &group, false);
            group.clear();
            out.push(ch);
        }
    }
    flush_group(&mut out, &group, false);
    out
}

fn flush_group(out: &mut String, group: &[char], terminated: bool) {
    if group.is_empty() {
        return;
    }
    if terminated {
        if let Some(syllable) = compose_group(group) {
            out.push(syllable);
            return;
        }
    }
    out.extend(group.iter());
}

fn compose_group(group: &[char]) -> Option<char> {
    let folded = fold_clusters(group);
    let (cho, jung, jong) = match folded.as_slice() {
        [cho, jung] => (*cho, *jung, 0u32),
        [cho, jung, jong] => {
            let code = JONG_SUNG.iter().position(|&j| j == *jong)? as u32 + 1;
            (*cho, *jung, code)
        }
        _ => return None,
    };
    let cho = CHO_SUNG.iter().position(|&c| c == cho)? as u32;
    let jung = JWUNG_SUNG.iter().position(|&v| v == jung)? as u32;
    char::from_u32(HANGUL_BASE + cho * 21 * 28 + jung * 28 + jong)
}

// Right-to-left so the final consonant cluster folds before anything else
// gets a chance to pair up.
fn fold_clusters(group: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(group.len());
    let mut i = group.len();
    while i > 0 {
        if i >= 2 {
            if let Some(&merged) = DOUBLE_JAMO.get(&(group[i - 2], group[i - 1])) {
                out.push(merged);
                i -= 2;
                continue;
            }
        }
        out.push(group[i - 1]);
        i -= 1;
    }
    out.reverse();
    out
}

/// Splits a decomposed word into its `ᴥ`-terminated syllable groups. Text
/// outside any terminated group (latin letters, digits, stray jamo) forms its
/// own group.
pub fn syllable_groups(text: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == SYLLABLE_TERMINATOR {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_basic() {
        assert_eq!(decompose("대한"), "ㄷㅐᴥㅎㅏㄴᴥ");
        assert_eq!(decompose("대한민국"), "ㄷㅐᴥㅎㅏㄴᴥㅁㅣㄴᴥㄱㅜㄱᴥ");
    }

    #[test]
    fn test_decompose_passthrough() {
        assert_eq!(decompose("hello"), "hello");
        assert_eq!(decompose("한glish"), "ㅎㅏㄴᴥglish");
        assert_eq!(decompose("这是"), "这是");
        assert_eq!(decompose(""), "");
    }

    #[test]
    fn test_decompose_idempotent() {
        let once = decompose("이명박은 대통령이다.");
        let twice = decompose(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_compose_inverts_decompose() {
        for text in ["대한민국", "좋아요", "값", "닭", "많이", "한glish 텍스트"] {
            assert_eq!(compose(&decompose(text)), text);
        }
    }

    #[test]
    fn test_compose_folds_clusters() {
        // ㅂ+ㅅ folds into the ㅄ final, ㅗ+ㅏ into the ㅘ medial.
        assert_eq!(compose("ㄱㅏㅂㅅᴥ"), "값");
        assert_eq!(compose("ㄱㅗㅏᴥ"), "과");
    }

    #[test]
    fn test_compose_leaves_invalid_runs() {
        // No medial vowel, not a syllable.
        assert_eq!(compose("ㄱㄴᴥ"), "ㄱㄴ");
        // Unterminated trailing jamo stay as they are.
        assert_eq!(compose("ㄷㅐ"), "ㄷㅐ");
    }

    #[test]
    fn test_syllable_groups() {
        assert_eq!(
            syllable_groups("ㄷㅐᴥㅎㅏㄴᴥ"),
            vec!["ㄷㅐ".to_string(), "ㅎㅏㄴ".to_string()]
        );
        assert_eq!(syllable_groups("abcㄱㅏᴥ"), vec!["abcㄱㅏ".to_string()]);
    }

    #[test]
    fn test_jamo_classes() {
        assert!(is_jamo_consonant('ㄱ'));
        assert!(is_jamo_vowel('ㅏ'));
        assert!(!is_jamo_vowel('ㄱ'));
        assert!(!is_jamo('a'));
        assert!(is_hangul_syllable('한'));
        assert!(!is_hangul_syllable('ㄱ'));
    }
}
