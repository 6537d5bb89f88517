//! Key chord parsing for the sendkeys blocklist.
//!
//! A `keys` string is split into tokens on whitespace, commas and semicolons.
//! Each token becomes a set of key names. Both `ctrl+alt+del` and SendKeys
//! notation (`^%{DEL}`) are understood, with or without surrounding braces.

use std::collections::BTreeSet;

type KeySet = BTreeSet<String>;

/// Blocked chords, parsed once from the input policy.
#[derive(Debug, Clone)]
pub struct KeyBlocklist {
    chords: Vec<KeySet>,
}

impl KeyBlocklist {
    pub fn new(sequences: &[String]) -> Self {
        let chords = sequences
            .iter()
            .map(|sequence| chord_keys(sequence))
            .filter(|keys| !keys.is_empty())
            .collect();
        Self { chords }
    }

    /// Whether any token of `keys` presses every key of a blocked chord.
    pub fn is_blocked(&self, keys: &str) -> bool {
        let joined = join_spaced_plus(keys);
        joined
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|token| !token.is_empty())
            .map(chord_keys)
            .any(|pressed| self.chords.iter().any(|chord| chord.is_subset(&pressed)))
    }
}

/// `ctrl + alt + del` is the same chord as `ctrl+alt+del`.
fn join_spaced_plus(keys: &str) -> String {
    let mut out = String::with_capacity(keys.len());
    let mut pending_space = false;
    for ch in keys.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && ch != '+' && !out.is_empty() && !out.ends_with('+') {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }
    out
}

fn chord_keys(token: &str) -> KeySet {
    let lowered = token.trim().to_lowercase();
    let body = match lowered.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        Some(inner) if !inner.contains(['{', '}']) => inner,
        _ => lowered.as_str(),
    };

    if is_send_keys_notation(body) {
        send_keys_chord(body)
    } else {
        body.split('+')
            .filter(|part| !part.is_empty())
            .map(canonical_key)
            .collect()
    }
}

fn is_send_keys_notation(body: &str) -> bool {
    body.contains(['^', '%', '{']) || (body.starts_with('+') && body.len() > 1)
}

fn send_keys_chord(body: &str) -> KeySet {
    let mut keys = KeySet::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '^' => {
                keys.insert("ctrl".to_string());
            }
            '%' => {
                keys.insert("alt".to_string());
            }
            '+' => {
                keys.insert("shift".to_string());
            }
            '{' => {
                let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                // `{DEL 3}` repeats a key.
                let name = name.split_whitespace().next().unwrap_or_default();
                if !name.is_empty() {
                    keys.insert(canonical_key(name));
                }
            }
            '(' | ')' => {}
            other => {
                keys.insert(other.to_string());
            }
        }
    }
    keys
}

fn canonical_key(name: &str) -> String {
    let name = name.trim();
    let canonical = match name {
        "control" | "ctl" | "lctrl" | "rctrl" | "lcontrol" | "rcontrol" => "ctrl",
        "menu" | "lalt" | "ralt" | "lmenu" | "rmenu" | "option" => "alt",
        "lshift" | "rshift" => "shift",
        "delete" => "del",
        "escape" => "esc",
        "return" => "enter",
        "windows" | "lwin" | "rwin" | "meta" | "super" | "cmd" | "command" => "win",
        other => other,
    };
    canonical.to_string()
}
