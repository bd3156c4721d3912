// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Free-identifier classification for Lua fragments.
//!
//! Lowering needs to know which names a fragment reads so it can bind them
//! from the data argument, the helper table or the block-helper table.
//! String and comment bodies are blanked, member-access chains (`a.b`,
//! `a:b()`) keep only their head, and reserved words are never reported.

/// Lua keywords.
pub const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Names the generated program binds itself.
pub const INTERNAL_NAMES: &[&str] = &["_ENV", "_G", "__include", "__data", "__escape"];

/// Lua globals that are never rebound from data.
pub const HOST_GLOBALS: &[&str] = &[
    "assert", "error", "ipairs", "math", "next", "os", "pairs", "pcall", "print", "rawequal",
    "rawget", "rawlen", "rawset", "select", "setmetatable", "getmetatable", "string", "table",
    "tonumber", "tostring", "type", "utf8", "xpcall",
];

/// Returns true when `name` may never become a binding.
pub fn is_reserved(name: &str) -> bool {
    LUA_KEYWORDS.contains(&name) || INTERNAL_NAMES.contains(&name)
}

/// Returns true when `name` refers to a Lua global function or library.
pub fn is_host_global(name: &str) -> bool {
    HOST_GLOBALS.contains(&name)
}

/// Returns the free identifiers of `code` in first-seen order, without duplicates.
pub fn free_identifiers(code: &str) -> Vec<String> {
    let stripped = strip_literals(code);
    let chars: Vec<char> = stripped.chars().collect();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_ascii_digit() {
            // Numbers, including hex and exponents, never start an identifier
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                i += 1;
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if is_member_access(&chars, start) || is_reserved(&word) {
                continue;
            }
            if !found.contains(&word) {
                found.push(word);
            }
            continue;
        }

        i += 1;
    }

    found
}

/// Checks whether the word starting at `start` follows `.` or `:` (but not `..`).
fn is_member_access(chars: &[char], start: usize) -> bool {
    let mut j = start;
    while j > 0 && chars[j - 1].is_whitespace() {
        j -= 1;
    }
    if j == 0 {
        return false;
    }
    match chars[j - 1] {
        ':' => !(j >= 2 && chars[j - 2] == ':'),
        '.' => !(j >= 2 && chars[j - 2] == '.'),
        _ => false,
    }
}

/// Replaces string and comment bodies with spaces.
fn strip_literals(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // -- line comment or --[[ block comment ]]
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            if let Some(level) = long_bracket_level(&chars, i + 2) {
                i = skip_long_bracket(&chars, i + 2, level);
            } else {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            out.push(' ');
            continue;
        }

        if c == '[' {
            if let Some(level) = long_bracket_level(&chars, i) {
                i = skip_long_bracket(&chars, i, level);
                out.push_str("\"\"");
                continue;
            }
        }

        if c == '"' || c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            out.push_str("\"\"");
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Returns the level of a long bracket (`[[`, `[=[`, ...) opening at `at`.
fn long_bracket_level(chars: &[char], at: usize) -> Option<usize> {
    if chars.get(at) != Some(&'[') {
        return None;
    }
    let mut level = 0;
    let mut j = at + 1;
    while chars.get(j) == Some(&'=') {
        level += 1;
        j += 1;
    }
    (chars.get(j) == Some(&'[')).then_some(level)
}

/// Returns the index just past the long bracket opening at `at`.
fn skip_long_bracket(chars: &[char], at: usize, level: usize) -> usize {
    let mut i = at + level + 2;
    while i < chars.len() {
        if chars[i] == ']' {
            let mut j = i + 1;
            let mut seen = 0;
            while chars.get(j) == Some(&'=') {
                seen += 1;
                j += 1;
            }
            if seen == level && chars.get(j) == Some(&']') {
                return j + 1;
            }
        }
        i += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_expression() {
        assert_eq!(free_identifiers("a + b * a"), vec!["a", "b"]);
    }

    #[test]
    fn test_member_chains_keep_only_head() {
        assert_eq!(free_identifiers("user.name .. user:greet(other)"), vec!["user", "other"]);
        assert_eq!(free_identifiers("first .. last"), vec!["first", "last"]);
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        assert_eq!(free_identifiers(r#"f("hidden", 'also hidden')"#), vec!["f"]);
        assert_eq!(free_identifiers("x -- trailing comment y"), vec!["x"]);
        assert_eq!(free_identifiers("--[[ block z ]] w"), vec!["w"]);
        assert_eq!(free_identifiers("[==[ long q ]==] .. r"), vec!["r"]);
        assert_eq!(free_identifiers(r#""esc \" aped" .. s"#), vec!["s"]);
    }

    #[test]
    fn test_numbers_are_not_identifiers() {
        assert_eq!(free_identifiers("0x1F + 1e10 + n2"), vec!["n2"]);
    }

    #[test]
    fn test_reserved_words_never_surface() {
        for word in LUA_KEYWORDS.iter().chain(INTERNAL_NAMES) {
            let code = format!("{} x", word);
            let ids = free_identifiers(&code);
            assert!(!ids.iter().any(|id| id == word), "{} leaked: {:?}", word, ids);
        }
    }

    #[test]
    fn test_host_globals_are_reported_but_flagged() {
        let ids = free_identifiers("tostring(v)");
        assert_eq!(ids, vec!["tostring", "v"]);
        assert!(is_host_global("tostring"));
        assert!(!is_host_global("v"));
    }
}
