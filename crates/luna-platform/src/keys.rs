//! Chord grammar shared by the keyboard injector and the key blocklist.
//!
//! `keys` is a whitespace separated list of chords such as `ctrl+c alt+tab
//! {ENTER}`. Each chord resolves to Windows virtual-key codes. Text that is
//! not entirely chords is typed literally by the injector.

/// Named keys and every spelling the injector accepts for them.
pub const KEY_NAMES: &[(&str, u16)] = &[
    ("ctrl", 0x11),
    ("control", 0x11),
    ("alt", 0x12),
    ("menu", 0x12),
    ("shift", 0x10),
    ("win", 0x5B),
    ("windows", 0x5B),
    ("lwin", 0x5B),
    ("enter", 0x0D),
    ("return", 0x0D),
    ("tab", 0x09),
    ("esc", 0x1B),
    ("escape", 0x1B),
    ("space", 0x20),
    ("backspace", 0x08),
    ("bs", 0x08),
    ("del", 0x2E),
    ("delete", 0x2E),
    ("ins", 0x2D),
    ("insert", 0x2D),
    ("home", 0x24),
    ("end", 0x23),
    ("pgup", 0x21),
    ("pageup", 0x21),
    ("pgdn", 0x22),
    ("pagedown", 0x22),
    ("left", 0x25),
    ("up", 0x26),
    ("right", 0x27),
    ("down", 0x28),
];

/// Virtual-key code for a lowercase key name: a [`KEY_NAMES`] entry, a
/// single letter or digit, or `f1` through `f24`.
pub fn virtual_key(name: &str) -> Option<u16> {
    if let Some(&(_, vk)) = KEY_NAMES.iter().find(|(known, _)| *known == name) {
        return Some(vk);
    }
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(ch @ 'a'..='z'), None) => Some(ch.to_ascii_uppercase() as u16),
        (Some(ch @ '0'..='9'), None) => Some(ch as u16),
        (Some('f'), Some(_)) => {
            let n: u16 = name[1..].parse().ok()?;
            (1..=24).contains(&n).then(|| 0x70 + n - 1)
        }
        _ => None,
    }
}

/// Every spelling that [`virtual_key`] maps to `vk`.
pub fn key_aliases(vk: u16) -> Vec<&'static str> {
    KEY_NAMES
        .iter()
        .filter(|(_, code)| *code == vk)
        .map(|(name, _)| *name)
        .collect()
}

/// Parse `keys` as a sequence of chords. Returns `None` when any token is not
/// a chord, in which case the text is typed literally.
pub fn parse_chords(keys: &str) -> Option<Vec<Vec<u16>>> {
    let mut chords = Vec::new();
    for token in keys.split_whitespace() {
        let lowered = token.to_ascii_lowercase();
        let body = lowered
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or(&lowered);
        if !token.starts_with('{') && !body.contains('+') {
            return None;
        }
        let chord = body
            .split('+')
            .map(virtual_key)
            .collect::<Option<Vec<u16>>>()?;
        chords.push(chord);
    }
    (!chords.is_empty()).then_some(chords)
}
