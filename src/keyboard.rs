//! Key-name to Hack key-code mapping for hosts feeding the memory-mapped
//! keyboard register.

use crate::definitions::{Word, BACKSPACE_KEY, NEWLINE_KEY};
use std::collections::HashMap;

use lazy_static::lazy_static;

const LEFT_KEY: Word = 130;
const UP_KEY: Word = 131;
const RIGHT_KEY: Word = 132;
const DOWN_KEY: Word = 133;
const HOME_KEY: Word = 134;
const END_KEY: Word = 135;
const PAGE_UP_KEY: Word = 136;
const PAGE_DOWN_KEY: Word = 137;
const INSERT_KEY: Word = 138;
const DELETE_KEY: Word = 139;
const ESC_KEY: Word = 140;
const F1_KEY: Word = 141;

lazy_static! {
    static ref ACTION_KEY_CODES: HashMap<&'static str, Word> = {
        let mut map = HashMap::new();
        map.insert("ArrowLeft", LEFT_KEY);
        map.insert("ArrowUp", UP_KEY);
        map.insert("ArrowRight", RIGHT_KEY);
        map.insert("ArrowDown", DOWN_KEY);
        map.insert("Home", HOME_KEY);
        map.insert("End", END_KEY);
        map.insert("PageUp", PAGE_UP_KEY);
        map.insert("PageDown", PAGE_DOWN_KEY);
        map.insert("Insert", INSERT_KEY);
        map.insert("Delete", DELETE_KEY);
        map.insert("Escape", ESC_KEY);
        map.insert("Backspace", BACKSPACE_KEY);
        map.insert("Enter", NEWLINE_KEY);
        for i in 0..12 {
            const NAMES: [&str; 12] = [
                "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12",
            ];
            map.insert(NAMES[i], F1_KEY + i as Word);
        }
        map
    };
}

/// Translate a key name (single character or action key like "Enter") into
/// the code the Hack keyboard register expects.
pub fn get_key_code(key: &str) -> Option<Word> {
    if let Some(code) = ACTION_KEY_CODES.get(key) {
        return Some(*code);
    }

    let mut chars = key.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    // printable characters map to their ASCII value
    if (' '..='~').contains(&c) {
        Some(c as Word)
    } else {
        None
    }
}
